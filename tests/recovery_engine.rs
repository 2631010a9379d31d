mod common;

// std
use std::sync::{
	Arc,
	atomic::{AtomicUsize, Ordering},
};
// crates.io
use cloud_storage_resilience::{
	classify::RawFailure,
	config::EngineConfig,
	connection::{ConnectionKey, TokenStatus, UserId},
	engine::{Engine, SweepReport},
	health::{ConnectionHealthRecord, ConsolidatedStatus},
	notify::template,
	recovery::{AttemptOutcome, RecoveryState, RecoveryStrategy},
	store::{HealthStore, StoreError, StoreFuture},
	taxonomy::ErrorType,
};
use time::{Duration, OffsetDateTime};
// self
use common::*;

struct Harness {
	engine: Engine,
	refresher: Arc<ScriptedRefresher>,
	notifier: Arc<RecordingNotifier>,
}

async fn harness(refresher: Arc<ScriptedRefresher>, probe: Option<Arc<ScriptedProbe>>) -> Harness {
	let notifier = Arc::new(RecordingNotifier::default());
	let mut builder = builder(config(), refresher.clone(), notifier.clone());

	if let Some(probe) = probe {
		builder = builder.with_probe(provider(S3), probe);
	}

	let engine = builder.build().expect("Engine fixture should build.");

	engine
		.connect_at(&key("alice", DRIVE), oauth_token(T0), T0)
		.await
		.expect("Connecting Google Drive should succeed.");
	engine
		.connect_at(&key("alice", S3), key_secret_token(T0), T0)
		.await
		.expect("Connecting Amazon S3 should succeed.");

	Harness { engine, refresher, notifier }
}

async fn record(engine: &Engine, key: &ConnectionKey) -> ConnectionHealthRecord {
	engine
		.health()
		.peek(key)
		.await
		.expect("Peeking the record should succeed.")
		.expect("The connection should have a record.")
}

#[tokio::test]
async fn successful_operations_keep_the_connection_healthy() {
	let Harness { engine, .. } = harness(ScriptedRefresher::issuing(None), None).await;
	let drive = key("alice", DRIVE);
	let at = T0 + Duration::minutes(5);

	assert_eq!(
		engine.record_success_at(&drive, at).await.expect("Recording a success should work."),
		ConsolidatedStatus::Healthy
	);

	let report = engine.report_health_at(&drive, at).await.expect("Reporting should succeed.");

	assert_eq!(report.consolidated_status, ConsolidatedStatus::Healthy);
	assert_eq!(report.status_message, "Connected to google-drive.");
	assert_eq!(report.last_successful_operation_at, Some(at));
	assert_eq!(report.token_status, TokenStatus::Valid);
	assert!(!report.is_rate_limited);
	assert!(report.recovery_instructions.is_empty());
}

#[tokio::test]
async fn quota_failures_wait_and_clear_on_success() {
	let Harness { engine, notifier, .. } = harness(ScriptedRefresher::issuing(None), None).await;
	let drive = key("alice", DRIVE);
	let first_at = T0 + Duration::minutes(1);
	let first = engine
		.handle_failure_at(
			&drive,
			RawFailure::http(429).with_retry_after(Duration::minutes(5)),
			first_at,
		)
		.await;

	assert_eq!(first.state, RecoveryState::Scheduled);
	assert_eq!(first.strategy, RecoveryStrategy::QuotaWait);
	assert_eq!(first.error.error_type, ErrorType::ApiQuotaExceeded);
	assert!(first.is_rate_limited);
	assert_eq!(first.retry_at, Some(first_at + Duration::minutes(5)));
	assert_eq!(first.message, "Rate limited by google-drive; retry in 5 minutes.");
	assert_eq!(first.consolidated_status, Some(ConsolidatedStatus::Healthy));

	engine.handle_failure_at(&drive, RawFailure::http(429), T0 + Duration::minutes(2)).await;

	let third_at = T0 + Duration::minutes(3);
	let third = engine.handle_failure_at(&drive, RawFailure::http(429), third_at).await;

	assert_eq!(third.attempt.attempt_number, 3);
	assert_eq!(third.attempt.max_attempts, None);
	assert_eq!(third.retry_at, Some(third_at + Duration::minutes(60)));
	assert_eq!(third.consolidated_status, Some(ConsolidatedStatus::ConnectionIssues));
	assert!(!third.requires_user_action());

	let report = engine.report_health_at(&drive, third_at).await.expect("Reporting should succeed.");

	assert!(report.is_rate_limited);
	assert_eq!(report.rate_limit_resets_in, Some(Duration::minutes(60)));
	assert_eq!(report.status_message, "Rate limited by google-drive; retry in 60 minutes.");
	assert_eq!(report.consecutive_failures, 3);
	assert!(notifier.sent().is_empty());

	let status = engine
		.record_success_at(&drive, T0 + Duration::minutes(70))
		.await
		.expect("Recording a success should work.");

	assert_eq!(status, ConsolidatedStatus::Healthy);
	assert!(engine.recovery().pending_retry(&drive).is_none());
	assert_eq!(record(&engine, &drive).await.consecutive_failures, 0);
}

#[tokio::test]
async fn rejected_refresh_token_notifies_once_and_blocks_until_reconnect() {
	let Harness { engine, refresher, notifier } =
		harness(ScriptedRefresher::failing(RawFailure::http(400).with_reason("invalid_grant")), None)
			.await;
	let drive = key("alice", DRIVE);
	let outcome =
		engine.handle_failure_at(&drive, RawFailure::http(401), T0 + Duration::minutes(10)).await;

	assert_eq!(outcome.state, RecoveryState::ManualInterventionRequired);
	assert_eq!(outcome.strategy, RecoveryStrategy::TokenRefresh);
	assert_eq!(outcome.error.error_type, ErrorType::InvalidRefreshToken);
	assert_eq!(outcome.consolidated_status, Some(ConsolidatedStatus::AuthenticationRequired));
	assert!(outcome.notified);
	assert!(outcome.requires_user_action());

	let sent = notifier.sent();

	assert_eq!(sent.len(), 1);
	assert_eq!(sent[0].template_key, template::AUTHENTICATION_REQUIRED);
	assert_eq!(sent[0].error_type, ErrorType::InvalidRefreshToken);

	let again =
		engine.handle_failure_at(&drive, RawFailure::http(401), T0 + Duration::minutes(20)).await;

	assert_eq!(again.state, RecoveryState::ManualInterventionRequired);
	assert_eq!(again.error.error_type, ErrorType::InvalidRefreshToken);
	assert!(!again.notified);
	assert_eq!(notifier.sent().len(), 1);
	assert_eq!(refresher.calls(), 1);

	let report = engine
		.report_health_at(&drive, T0 + Duration::minutes(20))
		.await
		.expect("Reporting should succeed.");

	assert_eq!(report.consolidated_status, ConsolidatedStatus::AuthenticationRequired);
	assert!(report.requires_reconnection);
	assert!(!report.is_rate_limited);
	assert!(!report.recovery_instructions.is_empty());

	let status = engine
		.connect_at(&drive, oauth_token(T0 + Duration::minutes(30)), T0 + Duration::minutes(30))
		.await
		.expect("Reconnecting should succeed.");

	assert_eq!(status, ConsolidatedStatus::Healthy);

	let record = record(&engine, &drive).await;

	assert!(!record.requires_reconnection);
	assert_eq!(record.token_status, TokenStatus::Valid);
	assert_eq!(record.consecutive_failures, 0);
}

#[tokio::test]
async fn network_failures_back_off_then_exhaust() {
	let Harness { engine, notifier, .. } = harness(ScriptedRefresher::issuing(None), None).await;
	let s3 = key("alice", S3);
	let first = engine.handle_failure_at(&s3, RawFailure::network("connection reset"), T0).await;

	assert_eq!(first.state, RecoveryState::Scheduled);
	assert_eq!(first.strategy, RecoveryStrategy::NetworkRetry);
	assert_eq!(first.attempt.attempt_number, 1);
	assert_eq!(first.attempt.max_attempts, Some(3));
	assert_eq!(first.retry_at, Some(T0 + Duration::seconds(1)));
	assert_eq!(
		first.transitions,
		[
			RecoveryState::Idle,
			RecoveryState::Classifying,
			RecoveryState::StrategySelected,
			RecoveryState::Executing,
			RecoveryState::Scheduled,
		]
	);

	let pending = engine.recovery().pending_retry(&s3).expect("A retry should be scheduled.");

	assert_eq!(pending.attempt_number, 2);
	assert!(!pending.exhausted);

	let second_at = T0 + Duration::seconds(1);
	let second = engine.handle_failure_at(&s3, RawFailure::timeout(), second_at).await;

	assert_eq!(second.attempt.attempt_number, 2);
	assert_eq!(second.retry_at, Some(second_at + Duration::seconds(2)));

	let third_at = T0 + Duration::seconds(3);
	let third =
		engine.handle_failure_at(&s3, RawFailure::network("connection reset"), third_at).await;

	assert_eq!(third.state, RecoveryState::Exhausted);
	assert_eq!(third.attempt.attempt_number, 3);
	assert_eq!(third.retry_at, Some(third_at + Duration::minutes(60)));
	assert_eq!(third.consolidated_status, Some(ConsolidatedStatus::ConnectionIssues));
	assert!(third.notified);

	let pending = engine.recovery().pending_retry(&s3).expect("Exhausted retries are requeued.");

	assert!(pending.exhausted);
	assert_eq!(pending.attempt_number, 1);

	let sent = notifier.sent();

	assert_eq!(sent.len(), 1);
	assert_eq!(sent[0].template_key, template::CONNECTION_ISSUES);
}

#[tokio::test]
async fn repeated_unknown_errors_escalate_to_the_user() {
	let Harness { engine, notifier, .. } = harness(ScriptedRefresher::issuing(None), None).await;
	let drive = key("alice", DRIVE);
	let first = engine.handle_failure_at(&drive, RawFailure::http(418), T0).await;

	assert_eq!(first.state, RecoveryState::Scheduled);
	assert_eq!(first.strategy, RecoveryStrategy::UnknownRetry);
	assert_eq!(first.attempt.describe(), "attempt 1 of 2");
	assert_eq!(first.error.error_type, ErrorType::UnknownError);

	let second =
		engine.handle_failure_at(&drive, RawFailure::http(418), T0 + Duration::seconds(1)).await;

	assert_eq!(second.state, RecoveryState::ManualInterventionRequired);
	assert_eq!(second.strategy, RecoveryStrategy::UserInterventionRequired);
	assert_eq!(second.consolidated_status, Some(ConsolidatedStatus::AuthenticationRequired));
	assert!(second.notified);
	assert!(engine.recovery().pending_retry(&drive).is_none());
	assert_eq!(notifier.sent()[0].template_key, template::AUTHENTICATION_REQUIRED);
}

#[tokio::test]
async fn actionable_failures_are_not_retried() {
	let Harness { engine, notifier, .. } = harness(ScriptedRefresher::issuing(None), None).await;
	let s3 = key("alice", S3);
	let too_large = engine.handle_failure_at(&s3, RawFailure::http(413), T0).await;

	assert_eq!(too_large.state, RecoveryState::NotRetryable);
	assert_eq!(too_large.error.error_type, ErrorType::FileTooLarge);
	assert_eq!(too_large.retry_at, None);
	assert!(!too_large.notified);
	assert!(!too_large.requires_user_action());
	assert!(engine.recovery().pending_retry(&s3).is_none());

	let drive = key("alice", DRIVE);
	let full = engine
		.handle_failure_at(&drive, RawFailure::http(403).with_reason("storageQuotaExceeded"), T0)
		.await;

	assert_eq!(full.state, RecoveryState::NotRetryable);
	assert_eq!(full.error.error_type, ErrorType::StorageQuotaExceeded);
	assert!(full.notified);
	assert!(full.requires_user_action());

	let sent = notifier.sent();

	assert_eq!(sent.len(), 1);
	assert_eq!(sent[0].template_key, template::ACTION_REQUIRED);
}

#[tokio::test]
async fn unregistered_providers_are_not_retryable() {
	let Harness { engine, .. } = harness(ScriptedRefresher::issuing(None), None).await;
	let outcome = engine.handle_failure_at(&key("alice", "dropbox"), RawFailure::http(500), T0).await;

	assert_eq!(outcome.state, RecoveryState::NotRetryable);
	assert_eq!(outcome.error.error_type, ErrorType::ProviderNotConfigured);
	assert_eq!(outcome.error.context.get("provider").map(String::as_str), Some("dropbox"));
}

#[tokio::test]
async fn sweep_runs_due_retries_through_the_probe() {
	let probe = ScriptedProbe::answering([]);
	let Harness { engine, .. } = harness(ScriptedRefresher::issuing(None), Some(probe.clone())).await;
	let s3 = key("alice", S3);

	engine.handle_failure_at(&s3, RawFailure::http(503), T0).await;

	// Nothing is due yet.
	assert_eq!(engine.run_sweep_at(T0).await, SweepReport::default());
	assert_eq!(probe.calls(), 0);

	let report = engine.run_sweep_at(T0 + Duration::seconds(1)).await;

	assert_eq!(report.retries_run, 1);
	assert_eq!(report.retries_succeeded, 1);
	assert_eq!(probe.calls(), 1);
	assert!(engine.recovery().pending_retry(&s3).is_none());
	assert_eq!(record(&engine, &s3).await.consecutive_failures, 0);
}

#[tokio::test]
async fn sweep_failures_continue_the_backoff() {
	let probe = ScriptedProbe::answering([
		Err(RawFailure::network("connection reset")),
		Err(RawFailure::network("connection reset")),
	]);
	let Harness { engine, notifier, .. } =
		harness(ScriptedRefresher::issuing(None), Some(probe.clone())).await;
	let s3 = key("alice", S3);

	engine.handle_failure_at(&s3, RawFailure::network("connection reset"), T0).await;
	engine.run_sweep_at(T0 + Duration::seconds(1)).await;

	let pending = engine.recovery().pending_retry(&s3).expect("The backoff should continue.");

	assert_eq!(pending.attempt_number, 3);
	assert_eq!(pending.next_eligible_at, T0 + Duration::seconds(3));

	engine.run_sweep_at(T0 + Duration::seconds(3)).await;

	let pending = engine.recovery().pending_retry(&s3).expect("Exhausted retries are requeued.");

	assert!(pending.exhausted);
	assert_eq!(probe.calls(), 2);
	assert_eq!(notifier.sent().len(), 1);
}

#[tokio::test]
async fn sweep_renews_tokens_ahead_of_expiry() {
	let renew_at = T0 + Duration::minutes(46);
	let refresher = ScriptedRefresher::issuing(Some(renew_at));
	let Harness { engine, .. } = harness(refresher.clone(), None).await;
	let report = engine.run_sweep_at(renew_at).await;

	assert_eq!(report.renewals_attempted, 1);
	assert_eq!(report.renewals_succeeded, 1);
	assert_eq!(refresher.calls(), 1);
	assert_eq!(
		record(&engine, &key("alice", DRIVE)).await.token_expires_at,
		Some(renew_at + Duration::HOUR)
	);
}

#[tokio::test]
async fn failed_renewals_follow_the_backoff_schedule() {
	let refresher = ScriptedRefresher::failing(RawFailure::http(503));
	let Harness { engine, notifier, .. } = harness(refresher.clone(), None).await;
	let drive = key("alice", DRIVE);
	let mut calls = Vec::new();

	for minute in 46..=50 {
		engine.run_sweep_at(T0 + Duration::minutes(minute)).await;
		calls.push(refresher.calls());
	}

	// Renewal at +46m, retries at +47m and +48m, then the episode waits out the exhausted delay.
	assert_eq!(calls, [1, 2, 3, 3, 3]);

	let pending = engine.recovery().pending_retry(&drive).expect("Exhausted retries are requeued.");

	assert!(pending.exhausted);
	assert_eq!(pending.strategy, RecoveryStrategy::TokenRefresh);
	assert_eq!(pending.next_eligible_at, T0 + Duration::minutes(48) + Duration::HOUR);

	let record = record(&engine, &drive).await;

	assert!(!record.requires_reconnection);
	assert_eq!(record.refresh_failure_count, 3);
	assert_eq!(record.next_scheduled_renewal_at, None);
	assert_eq!(notifier.sent().len(), 1);
	assert_eq!(notifier.sent()[0].template_key, template::CONNECTION_ISSUES);
}

#[tokio::test]
async fn repeated_refresh_failures_escalate_to_reconnection() {
	let refresher = ScriptedRefresher::failing(RawFailure::http(503));
	let notifier = Arc::new(RecordingNotifier::default());
	let engine = builder(
		EngineConfig { max_refresh_failures: 1, ..config() },
		refresher.clone(),
		notifier.clone(),
	)
	.build()
	.expect("Engine fixture should build.");
	let drive = key("alice", DRIVE);
	let at = T0 + Duration::hours(2);

	engine.connect_at(&drive, oauth_token(T0), T0).await.expect("Connecting should succeed.");

	let first = engine.handle_failure_at(&drive, RawFailure::http(401), at).await;

	assert_eq!(first.state, RecoveryState::Scheduled);
	assert!(notifier.sent().is_empty());

	let second =
		engine.handle_failure_at(&drive, RawFailure::http(401), at + Duration::seconds(1)).await;

	assert_eq!(refresher.calls(), 2);
	assert_eq!(second.state, RecoveryState::ManualInterventionRequired);
	assert_eq!(second.error.error_type, ErrorType::InvalidCredentials);
	assert_eq!(second.retry_at, None);
	assert!(second.notified);
	assert_eq!(second.consolidated_status, Some(ConsolidatedStatus::AuthenticationRequired));
	assert!(engine.recovery().pending_retry(&drive).is_none());

	let sent = notifier.sent();

	assert_eq!(sent.len(), 1);
	assert_eq!(sent[0].template_key, template::AUTHENTICATION_REQUIRED);
}

#[tokio::test]
async fn perform_reruns_the_operation_after_a_refresh() {
	let refresher = ScriptedRefresher::issuing(None);
	let notifier = Arc::new(RecordingNotifier::default());
	let engine = builder(config(), refresher.clone(), notifier)
		.build()
		.expect("Engine fixture should build.");
	let drive = key("alice", DRIVE);

	engine
		.connect(&drive, oauth_token(OffsetDateTime::now_utc()))
		.await
		.expect("Connecting Google Drive should succeed.");

	let runs = AtomicUsize::new(0);
	let value = engine
		.perform(&drive, |credentials| {
			let run = runs.fetch_add(1, Ordering::SeqCst);

			async move {
				assert!(credentials.is_some());

				if run == 0 { Err(RawFailure::http(401)) } else { Ok(42) }
			}
		})
		.await
		.expect("The operation should succeed after the refresh.");

	assert_eq!(value, 42);
	assert_eq!(runs.load(Ordering::SeqCst), 2);
	assert_eq!(refresher.calls(), 1);
	assert_eq!(
		engine.report_health(&drive).await.expect("Reporting should succeed.").consolidated_status,
		ConsolidatedStatus::Healthy
	);
}

#[tokio::test]
async fn disconnect_clears_credentials_and_pending_retries() {
	let Harness { engine, .. } = harness(ScriptedRefresher::issuing(None), None).await;
	let s3 = key("alice", S3);

	engine.handle_failure_at(&s3, RawFailure::network("connection reset"), T0).await;
	engine.disconnect_at(&s3, T0 + Duration::minutes(1)).await.expect("Disconnect should work.");

	assert!(engine.recovery().pending_retry(&s3).is_none());

	let reports = engine
		.report_all_health_at(&UserId::new("alice").expect("User fixture should be valid."), T0)
		.await
		.expect("Reporting should succeed.");
	let statuses: Vec<_> = reports
		.iter()
		.map(|report| (report.provider.to_string(), report.consolidated_status))
		.collect();

	assert_eq!(
		statuses,
		[
			(S3.to_owned(), ConsolidatedStatus::NotConnected),
			(DRIVE.to_owned(), ConsolidatedStatus::Healthy),
		]
	);
}

struct UnwritableStore;
impl HealthStore for UnwritableStore {
	fn save(&self, _record: ConnectionHealthRecord) -> StoreFuture<'_, ()> {
		Box::pin(async { Err(StoreError::Backend { message: "disk full".into() }) })
	}

	fn fetch<'a>(
		&'a self,
		_key: &'a ConnectionKey,
	) -> StoreFuture<'a, Option<ConnectionHealthRecord>> {
		Box::pin(async { Ok(None) })
	}

	fn list<'a>(&'a self, _user: Option<&'a UserId>) -> StoreFuture<'a, Vec<ConnectionHealthRecord>> {
		Box::pin(async { Ok(Vec::new()) })
	}
}

#[tokio::test]
async fn storage_failures_fold_into_a_single_unknown_retry() {
	let engine = builder(
		config(),
		ScriptedRefresher::issuing(None),
		Arc::new(RecordingNotifier::default()),
	)
	.with_store(Arc::new(UnwritableStore))
	.build()
	.expect("Engine fixture should build.");
	let drive = key("alice", DRIVE);
	let outcome = engine.handle_failure_at(&drive, RawFailure::http(503), T0).await;

	assert_eq!(outcome.state, RecoveryState::Scheduled);
	assert_eq!(outcome.strategy, RecoveryStrategy::UnknownRetry);
	assert_eq!(outcome.attempt.outcome, AttemptOutcome::Exception);
	assert_eq!(outcome.error.error_type, ErrorType::UnknownError);
	assert_eq!(outcome.consolidated_status, None);
	assert!(engine.recovery().pending_retry(&drive).is_some());
}
