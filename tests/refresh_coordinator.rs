mod common;

// std
use std::sync::Arc;
// crates.io
use cloud_storage_resilience::{
	classify::RawFailure,
	config::EngineConfig,
	connection::TokenStatus,
	engine::Engine,
	refresh::RefreshOutcome,
	taxonomy::ErrorType,
};
use time::Duration;
// self
use common::*;

async fn connected_engine(refresher: Arc<ScriptedRefresher>, config: EngineConfig) -> Engine {
	let engine = builder(config, refresher, Arc::new(RecordingNotifier::default()))
		.build()
		.expect("Engine fixture should build.");

	engine
		.connect_at(&key("alice", DRIVE), oauth_token(T0), T0)
		.await
		.expect("Connecting the fixture account should succeed.");

	engine
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_callers_share_one_provider_refresh() {
	let at = T0 + Duration::hours(2);
	let refresher = ScriptedRefresher::slow(at, std::time::Duration::from_millis(50));
	let engine = connected_engine(refresher.clone(), config()).await;
	let connection = key("alice", DRIVE);
	let mut tasks = Vec::new();

	for _ in 0..8 {
		let engine = engine.clone();
		let connection = connection.clone();

		tasks.push(tokio::spawn(async move { engine.ensure_valid_token_at(&connection, at).await }));
	}

	let mut outcomes = Vec::new();

	for task in tasks {
		outcomes.push(task.await.expect("Refresh task should not panic."));
	}

	assert_eq!(refresher.calls(), 1);
	assert!(outcomes.iter().all(|outcome| outcome.is_usable()));
	assert_eq!(outcomes.iter().filter(|outcome| **outcome == RefreshOutcome::Refreshed).count(), 1);

	let record = engine
		.health()
		.peek(&connection)
		.await
		.expect("Peeking the record should succeed.")
		.expect("The connection should have a record.");

	assert_eq!(record.token_status, TokenStatus::Valid);
	assert_eq!(record.token_expires_at, Some(at + Duration::HOUR));
	assert_eq!(engine.coordinator().metrics().provider_calls(), 1);
}

#[tokio::test]
async fn dropping_the_initiator_does_not_cancel_the_refresh() {
	let at = T0 + Duration::hours(2);
	let refresher = ScriptedRefresher::slow(at, std::time::Duration::from_millis(50));
	let engine = connected_engine(refresher.clone(), config()).await;
	let connection = key("alice", DRIVE);
	let mut initiator = Box::pin(engine.ensure_valid_token_at(&connection, at));

	assert!(futures::poll!(&mut initiator).is_pending());

	drop(initiator);

	let outcome = engine.ensure_valid_token_at(&connection, at).await;

	assert_eq!(outcome, RefreshOutcome::RefreshedByOther);
	assert_eq!(refresher.calls(), 1);
}

#[tokio::test]
async fn abandoned_flights_do_not_answer_for_later_instants() {
	let later = T0 + Duration::hours(2);
	let refresher = ScriptedRefresher::issuing(Some(later));
	let engine = connected_engine(refresher.clone(), config()).await;
	let connection = key("alice", DRIVE);
	let held = engine.coordinator().exclusive(&connection).await;
	let mut abandoned =
		Box::pin(engine.ensure_valid_token_at(&connection, T0 + Duration::minutes(10)));

	assert!(futures::poll!(&mut abandoned).is_pending());

	drop(abandoned);
	drop(held);

	let outcome = engine.ensure_valid_token_at(&connection, later).await;

	assert_eq!(outcome, RefreshOutcome::Refreshed);
	assert_eq!(refresher.calls(), 1);
	assert_eq!(
		engine
			.health()
			.peek(&connection)
			.await
			.expect("Peeking the record should succeed.")
			.expect("The connection should have a record.")
			.token_expires_at,
		Some(later + Duration::HOUR)
	);
}

#[tokio::test]
async fn valid_tokens_are_not_refreshed() {
	let refresher = ScriptedRefresher::issuing(None);
	let engine = connected_engine(refresher.clone(), config()).await;
	let outcome = engine.ensure_valid_token_at(&key("alice", DRIVE), T0 + Duration::minutes(10)).await;

	assert_eq!(outcome, RefreshOutcome::AlreadyValid);
	assert_eq!(refresher.calls(), 0);
}

#[tokio::test]
async fn tokens_inside_the_proactive_window_are_refreshed() {
	let at = T0 + Duration::minutes(50);
	let refresher = ScriptedRefresher::issuing(Some(at));
	let engine = connected_engine(refresher.clone(), config()).await;
	let outcome = engine.ensure_valid_token_at(&key("alice", DRIVE), at).await;

	assert_eq!(outcome, RefreshOutcome::Refreshed);
	assert_eq!(refresher.calls(), 1);
}

#[tokio::test]
async fn rejected_refresh_token_requires_reconnection() {
	let refresher =
		ScriptedRefresher::failing(RawFailure::http(400).with_reason("invalid_grant"));
	let engine = connected_engine(refresher.clone(), config()).await;
	let connection = key("alice", DRIVE);
	let at = T0 + Duration::hours(2);

	assert_eq!(
		engine.ensure_valid_token_at(&connection, at).await,
		RefreshOutcome::Failed(ErrorType::InvalidRefreshToken)
	);

	let record = engine
		.health()
		.peek(&connection)
		.await
		.expect("Peeking the record should succeed.")
		.expect("The connection should have a record.");

	assert!(record.requires_reconnection);
	assert_eq!(record.token_status, TokenStatus::Invalid);

	// Blocked connections never reach the provider again.
	assert_eq!(
		engine.ensure_valid_token_at(&connection, at + Duration::minutes(1)).await,
		RefreshOutcome::Failed(ErrorType::InvalidRefreshToken)
	);
	assert_eq!(refresher.calls(), 1);
}

#[tokio::test]
async fn transient_refresh_failures_keep_the_refresh_path() {
	let refresher = ScriptedRefresher::failing(RawFailure::network("connection reset"));
	let engine = connected_engine(refresher.clone(), config()).await;
	let connection = key("alice", DRIVE);
	let at = T0 + Duration::hours(2);

	assert_eq!(
		engine.ensure_valid_token_at(&connection, at).await,
		RefreshOutcome::Failed(ErrorType::NetworkError)
	);

	let record = engine
		.health()
		.peek(&connection)
		.await
		.expect("Peeking the record should succeed.")
		.expect("The connection should have a record.");

	assert!(!record.requires_reconnection);
	assert_eq!(record.token_status, TokenStatus::Expired);
	assert_eq!(record.refresh_failure_count, 1);
}

#[tokio::test]
async fn refresh_budget_blocks_provider_calls() {
	let config = EngineConfig { max_refresh_attempts_per_hour: 1, ..config() };
	let refresher = ScriptedRefresher::failing(RawFailure::network("connection reset"));
	let engine = connected_engine(refresher.clone(), config).await;
	let connection = key("alice", DRIVE);
	let at = T0 + Duration::hours(2);

	assert_eq!(
		engine.ensure_valid_token_at(&connection, at).await,
		RefreshOutcome::Failed(ErrorType::NetworkError)
	);
	assert_eq!(
		engine.ensure_valid_token_at(&connection, at + Duration::minutes(5)).await,
		RefreshOutcome::Failed(ErrorType::ApiQuotaExceeded)
	);
	assert_eq!(refresher.calls(), 1);
}

#[tokio::test]
async fn key_secret_connections_skip_token_refresh() {
	let refresher = ScriptedRefresher::issuing(None);
	let engine = builder(config(), refresher.clone(), Arc::new(RecordingNotifier::default()))
		.build()
		.expect("Engine fixture should build.");
	let connection = key("alice", S3);

	engine
		.connect_at(&connection, key_secret_token(T0), T0)
		.await
		.expect("Connecting the key/secret account should succeed.");

	assert_eq!(
		engine.ensure_valid_token_at(&connection, T0 + Duration::days(30)).await,
		RefreshOutcome::AlreadyValid
	);
	assert_eq!(refresher.calls(), 0);
}

#[tokio::test]
async fn missing_credentials_and_unknown_providers_fail_without_calls() {
	let refresher = ScriptedRefresher::issuing(None);
	let engine = builder(config(), refresher.clone(), Arc::new(RecordingNotifier::default()))
		.build()
		.expect("Engine fixture should build.");

	assert_eq!(
		engine.ensure_valid_token_at(&key("bob", DRIVE), T0).await,
		RefreshOutcome::Failed(ErrorType::InvalidCredentials)
	);
	assert_eq!(
		engine.ensure_valid_token_at(&key("bob", "dropbox"), T0).await,
		RefreshOutcome::Failed(ErrorType::ProviderNotConfigured)
	);
	assert_eq!(refresher.calls(), 0);
}
