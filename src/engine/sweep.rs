//! Periodic sweep: proactive token renewals, then due retry continuations.

// self
use crate::{
	_prelude::*,
	engine::Engine,
	limit::{RateLimitConcern, RateLimitDecision, RateLimitKey},
	obs::{self, OperationKind, OperationOutcome, OperationSpan},
	recovery::{RecoveryState, RecoveryStrategy, ScheduledRetry},
};

/// Counts of what one sweep did.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
	/// Tokens whose scheduled renewal was due.
	pub renewals_attempted: u32,
	/// Renewals that left a usable token.
	pub renewals_succeeded: u32,
	/// Continuations executed.
	pub retries_run: u32,
	/// Continuations that restored the connection.
	pub retries_succeeded: u32,
	/// Continuations pushed back by the health-check budget.
	pub retries_deferred: u32,
	/// Continuations dropped because nothing can execute them; the next operation retries.
	pub retries_released: u32,
}

impl Engine {
	/// Runs one sweep at the current time.
	pub async fn run_sweep(&self) -> SweepReport {
		self.run_sweep_at(OffsetDateTime::now_utc()).await
	}

	/// Runs one sweep at `now`.
	pub async fn run_sweep_at(&self, now: OffsetDateTime) -> SweepReport {
		const KIND: OperationKind = OperationKind::Sweep;

		let span = OperationSpan::new(KIND, "run_sweep");

		obs::record_operation_outcome(KIND, OperationOutcome::Attempt);

		let report = span
			.instrument(async move {
				let mut report = SweepReport::default();

				self.renew_due_tokens(now, &mut report).await;

				for retry in self.recovery.queue().take_due(now) {
					self.run_retry(retry, now, &mut report).await;
				}

				self.limiter.prune_at(now);
				self.recovery.throttler().prune_at(now);
				self.health.prune_idle_guards();
				self.coordinator.prune_idle_locks();

				report
			})
			.await;

		obs::record_operation_outcome(KIND, OperationOutcome::Success);

		report
	}

	async fn renew_due_tokens(&self, now: OffsetDateTime, report: &mut SweepReport) {
		let records = match self.health.list(None).await {
			Ok(records) => records,
			Err(e) => {
				obs::trace_sweep_failure("renewals", &e);

				return;
			},
		};

		for record in records.into_iter().filter(|record| record.renewal_due_at(now)) {
			let key = record.key;

			if self.providers.get(&key.provider).is_none() {
				continue;
			}
			// A failed renewal is retried by its continuation, on the backoff schedule.
			if self
				.recovery
				.pending_retry(&key)
				.is_some_and(|retry| retry.strategy == RecoveryStrategy::TokenRefresh)
			{
				continue;
			}

			report.renewals_attempted += 1;

			let outcome = self.coordinator.ensure_valid_token_at(&key, now).await;

			if outcome.is_usable() {
				report.renewals_succeeded += 1;
			} else {
				self.recovery.recover_refresh_at(&key, outcome, now).await;
			}
		}
	}

	async fn run_retry(&self, retry: ScheduledRetry, now: OffsetDateTime, report: &mut SweepReport) {
		let key = retry.key.clone();
		let Some(registration) = self.providers.get(&key.provider) else {
			report.retries_released += 1;

			return;
		};
		let budget = RateLimitKey::new(key.clone(), RateLimitConcern::HealthCheck);

		if let RateLimitDecision::Delay(directive) = self.limiter.acquire_at(
			&budget,
			self.config.max_health_checks_per_minute,
			Duration::MINUTE,
			now,
		) {
			report.retries_deferred += 1;

			self.recovery
				.queue()
				.schedule(ScheduledRetry { next_eligible_at: directive.earliest_retry_at, ..retry });

			return;
		}

		if retry.strategy == RecoveryStrategy::TokenRefresh {
			report.retries_run += 1;

			if self.recovery.resume_refresh_at(&retry, now).await.state == RecoveryState::Succeeded {
				report.retries_succeeded += 1;
			}

			return;
		}

		let Some(probe) = registration.probe.clone() else {
			report.retries_released += 1;

			return;
		};

		report.retries_run += 1;

		let credentials = match self.health.peek(&key).await {
			Ok(record) => record.and_then(|record| record.credentials),
			Err(e) => {
				obs::trace_absorbed_failure(&key, "sweep_credentials", &e);

				None
			},
		};

		match probe.probe(&key, credentials.as_ref()).await {
			Ok(()) => match self.recovery.record_success_at(&key, now).await {
				Ok(_) => report.retries_succeeded += 1,
				Err(e) => obs::trace_absorbed_failure(&key, "sweep_success", &e),
			},
			Err(failure) => {
				self.recovery.handle_failure_at(&key, failure.observed_at(now), now).await;
			},
		}
	}
}
