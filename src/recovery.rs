//! Recovery episodes: strategy selection, execution, and scheduled continuations.
//!
//! [`RecoveryStrategyEngine::handle_failure`] is the entry point for any caller that just saw a
//! provider failure. It never returns an error. Storage problems hit while recovering fold into
//! `UNKNOWN_ERROR` handling and schedule a single retry instead.
//!
//! Retries are not loops with sleeps. Each one is a [`ScheduledRetry`] with an attempt number
//! and an eligibility instant, driven later by the sweep or by a synchronous caller.

pub mod backoff;
pub mod queue;
pub mod strategy;

pub use backoff::BackoffPolicy;
pub use queue::{RetryQueue, ScheduledRetry};
pub use strategy::RecoveryStrategy;

// self
use crate::{
	_prelude::*,
	classify::{ErrorClassifier, RawFailure},
	config::EngineConfig,
	connection::{ConnectionKey, ProviderKind},
	health::{ConnectionHealthStore, ConsolidatedStatus, HealthMutation},
	limit::{RateLimitConcern, RateLimitKey, RateLimiter},
	notify::{Notification, NotificationSender, NotificationThrottler, template},
	obs::{self, OperationKind, OperationOutcome, OperationSpan},
	provider::{ProviderRegistration, ProviderRegistry},
	refresh::{RefreshOutcome, TokenRefreshCoordinator},
	taxonomy::{ConnectionError, ErrorType},
};

const UNKNOWN_RETRY_ATTEMPTS: u32 = 2;

/// States of one recovery episode.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryState {
	/// No recovery running.
	Idle,
	/// The raw failure is being classified.
	Classifying,
	/// A strategy was picked for the error type.
	StrategySelected,
	/// The strategy is running.
	Executing,
	/// Executing, suspended until the sweep runs the continuation.
	Scheduled,
	/// The connection works again.
	Succeeded,
	/// Retries were consumed; the sweep tries again later.
	Exhausted,
	/// No further automatic action; the user must reconnect.
	ManualInterventionRequired,
	/// Actionable failure surfaced to the caller without a retry.
	NotRetryable,
}
impl RecoveryState {
	/// Returns `true` for states that end the episode.
	pub const fn is_terminal(self) -> bool {
		matches!(
			self,
			RecoveryState::Succeeded
				| RecoveryState::Exhausted
				| RecoveryState::ManualInterventionRequired
				| RecoveryState::NotRetryable
		)
	}

	/// Returns a stable label suitable for logs and metrics.
	pub const fn as_str(self) -> &'static str {
		match self {
			RecoveryState::Idle => "idle",
			RecoveryState::Classifying => "classifying",
			RecoveryState::StrategySelected => "strategy_selected",
			RecoveryState::Executing => "executing",
			RecoveryState::Scheduled => "scheduled",
			RecoveryState::Succeeded => "succeeded",
			RecoveryState::Exhausted => "exhausted",
			RecoveryState::ManualInterventionRequired => "manual_intervention_required",
			RecoveryState::NotRetryable => "not_retryable",
		}
	}
}
impl Display for RecoveryState {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// How one recovery attempt ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
	/// The strategy restored the connection.
	Success,
	/// The strategy ran and the connection still fails.
	Failure,
	/// The engine itself failed while recovering.
	Exception,
}

/// One attempt inside a recovery episode.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryAttempt {
	/// Strategy that ran.
	pub strategy: RecoveryStrategy,
	/// When the attempt started.
	pub started_at: OffsetDateTime,
	/// How it ended.
	pub outcome: AttemptOutcome,
	/// 1-based attempt number; the failed original call is attempt 1.
	pub attempt_number: u32,
	/// Attempt budget; `None` for quota waits, which never exhaust.
	pub max_attempts: Option<u32>,
}
impl RecoveryAttempt {
	/// Renders `attempt N of M` for user-facing messages.
	pub fn describe(&self) -> String {
		match self.max_attempts {
			Some(max) => format!("attempt {} of {max}", self.attempt_number),
			None => format!("attempt {}", self.attempt_number),
		}
	}
}

/// Result of [`RecoveryStrategyEngine::handle_failure`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryOutcome {
	/// State the episode reached.
	pub state: RecoveryState,
	/// Strategy that ran.
	pub strategy: RecoveryStrategy,
	/// Structured error for UI, logs, and templates.
	pub error: ConnectionError,
	/// The attempt this call performed.
	pub attempt: RecoveryAttempt,
	/// When the sweep picks the connection up again.
	pub retry_at: Option<OffsetDateTime>,
	/// The wait comes from a rate limit rather than a genuine failure.
	pub is_rate_limited: bool,
	/// A notification was delivered.
	pub notified: bool,
	/// Consolidated status after recovery; `None` when it could not be read.
	pub consolidated_status: Option<ConsolidatedStatus>,
	/// Human-readable summary.
	pub message: String,
	/// States visited, in order.
	pub transitions: Vec<RecoveryState>,
}
impl RecoveryOutcome {
	/// Returns `true` when the user has to do something.
	pub fn requires_user_action(&self) -> bool {
		match self.state {
			RecoveryState::ManualInterventionRequired => true,
			RecoveryState::NotRetryable => self.error.requires_user_intervention,
			_ => false,
		}
	}
}

#[derive(Clone, Copy, Debug)]
struct Episode {
	strategy: RecoveryStrategy,
	attempts: u32,
}

struct Plan {
	state: RecoveryState,
	error_type: ErrorType,
	attempt_outcome: AttemptOutcome,
	attempt_number: u32,
	max_attempts: Option<u32>,
	retry_at: Option<OffsetDateTime>,
	is_rate_limited: bool,
	notified: bool,
	message: String,
}
impl Plan {
	fn new(state: RecoveryState, error_type: ErrorType, attempt_number: u32) -> Self {
		Self {
			state,
			error_type,
			attempt_outcome: AttemptOutcome::Failure,
			attempt_number,
			max_attempts: Some(attempt_number),
			retry_at: None,
			is_rate_limited: false,
			notified: false,
			message: error_type.user_message().into(),
		}
	}
}

/// Selects and drives recovery strategies for classified failures.
#[derive(Clone)]
pub struct RecoveryStrategyEngine {
	inner: Arc<RecoveryInner>,
}
struct RecoveryInner {
	health: ConnectionHealthStore,
	providers: Arc<ProviderRegistry>,
	classifier: ErrorClassifier,
	coordinator: TokenRefreshCoordinator,
	limiter: Arc<RateLimiter>,
	throttler: NotificationThrottler,
	notifier: Arc<dyn NotificationSender>,
	config: Arc<EngineConfig>,
	backoff: BackoffPolicy,
	queue: RetryQueue,
	episodes: Mutex<HashMap<ConnectionKey, Episode>>,
}
impl RecoveryStrategyEngine {
	/// Creates an engine over shared components.
	pub fn new(
		health: ConnectionHealthStore,
		providers: Arc<ProviderRegistry>,
		coordinator: TokenRefreshCoordinator,
		limiter: Arc<RateLimiter>,
		notifier: Arc<dyn NotificationSender>,
		config: Arc<EngineConfig>,
	) -> Self {
		let throttler = NotificationThrottler::new(config.notification_cooldown());
		let backoff = BackoffPolicy::from_config(&config);

		Self {
			inner: Arc::new(RecoveryInner {
				health,
				providers,
				classifier: ErrorClassifier::new(),
				coordinator,
				limiter,
				throttler,
				notifier,
				config,
				backoff,
				queue: RetryQueue::default(),
				episodes: Default::default(),
			}),
		}
	}

	/// Notification cooldowns.
	pub fn throttler(&self) -> &NotificationThrottler {
		&self.inner.throttler
	}

	/// Pending continuations.
	pub fn queue(&self) -> &RetryQueue {
		&self.inner.queue
	}

	/// Backoff applied between retries.
	pub fn backoff(&self) -> BackoffPolicy {
		self.inner.backoff
	}

	/// Returns the continuation scheduled for a connection, if any.
	pub fn pending_retry(&self, key: &ConnectionKey) -> Option<ScheduledRetry> {
		self.inner.queue.get(key)
	}

	/// Classifies and recovers from a provider failure observed now.
	pub async fn handle_failure(&self, key: &ConnectionKey, failure: RawFailure) -> RecoveryOutcome {
		self.handle_failure_at(key, failure, OffsetDateTime::now_utc()).await
	}

	/// Classifies and recovers from a provider failure observed at `now`.
	pub async fn handle_failure_at(
		&self,
		key: &ConnectionKey,
		failure: RawFailure,
		now: OffsetDateTime,
	) -> RecoveryOutcome {
		const KIND: OperationKind = OperationKind::HandleFailure;

		let span = OperationSpan::new(KIND, "handle_failure");

		obs::record_operation_outcome(KIND, OperationOutcome::Attempt);

		let outcome = span
			.instrument(async move {
				let mut trail = vec![RecoveryState::Idle, RecoveryState::Classifying];

				let recovered = self.recover_failure(key, &failure, now, &mut trail).await;

				match recovered {
					Ok(outcome) => outcome,
					Err(e) => self.absorb(key, &e, now, trail),
				}
			})
			.await;

		Self::observe(KIND, &outcome);

		outcome
	}

	/// Settles a refresh outcome obtained from the coordinator, e.g. a pre-flight token check.
	pub async fn recover_refresh_at(
		&self,
		key: &ConnectionKey,
		outcome: RefreshOutcome,
		now: OffsetDateTime,
	) -> RecoveryOutcome {
		const KIND: OperationKind = OperationKind::HandleFailure;

		let span = OperationSpan::new(KIND, "recover_refresh");
		let recovered = span
			.instrument(async move {
				let mut trail = vec![RecoveryState::StrategySelected, RecoveryState::Executing];
				let attempt = self.advance_episode(key, RecoveryStrategy::TokenRefresh);

				let recovered =
					self.settle_refresh_outcome(key, outcome, attempt, now, &mut trail).await;

				match recovered {
					Ok(recovered) => recovered,
					Err(e) => self.absorb(key, &e, now, trail),
				}
			})
			.await;

		Self::observe(KIND, &recovered);

		recovered
	}

	/// Runs a scheduled token-refresh continuation.
	pub(crate) async fn resume_refresh_at(
		&self,
		retry: &ScheduledRetry,
		now: OffsetDateTime,
	) -> RecoveryOutcome {
		let key = &retry.key;
		let mut trail = vec![RecoveryState::Executing];

		self.inner.episodes.lock().insert(key.clone(), Episode {
			strategy: RecoveryStrategy::TokenRefresh,
			attempts: retry.attempt_number,
		});

		let outcome = self.inner.coordinator.ensure_valid_token_at(key, now).await;

		let recovered =
			self.settle_refresh_outcome(key, outcome, retry.attempt_number, now, &mut trail).await;

		match recovered {
			Ok(recovered) => recovered,
			Err(e) => self.absorb(key, &e, now, trail),
		}
	}

	/// Records a successful provider operation and ends any running episode.
	pub async fn record_success_at(
		&self,
		key: &ConnectionKey,
		now: OffsetDateTime,
	) -> Result<ConsolidatedStatus> {
		let registration = self.registration(key)?;
		let record = self
			.inner
			.health
			.update(key, registration.kind, HealthMutation::OperationSucceeded { at: now })
			.await?;

		self.forget(key);

		Ok(record.consolidate())
	}

	/// Drops the episode and pending continuation of a connection.
	pub fn forget(&self, key: &ConnectionKey) {
		self.inner.queue.cancel(key);
		self.inner.episodes.lock().remove(key);
	}

	pub(crate) fn registration(&self, key: &ConnectionKey) -> Result<&ProviderRegistration> {
		self.inner
			.providers
			.get(&key.provider)
			.ok_or_else(|| Error::ProviderNotRegistered { provider: key.provider.to_string() })
	}

	async fn recover_failure(
		&self,
		key: &ConnectionKey,
		raw: &RawFailure,
		now: OffsetDateTime,
		trail: &mut Vec<RecoveryState>,
	) -> Result<RecoveryOutcome> {
		let inner = &self.inner;
		let Some(registration) = inner.providers.get(&key.provider) else {
			return Ok(self.unregistered(key, now, trail).await);
		};
		let kind = registration.kind;
		let record = inner.health.get(key, kind).await?;
		// A blocked connection keeps reporting the error that blocked it.
		let blocked_by = record.blocking_error();
		let classification = inner.classifier.classify(
			&key.provider,
			&registration.reasons,
			raw,
			record.refresh_token().is_some(),
		);
		let error_type = classification.error_type;

		if error_type == ErrorType::TokenExpired {
			let observed_at = raw.observed_at.unwrap_or(now);

			inner.health.update(key, kind, HealthMutation::TokenRejected { observed_at }).await?;
		}

		let record = inner
			.health
			.update(key, kind, HealthMutation::OperationFailed {
				error_type,
				message: raw.summary(),
				context: classification.context.clone(),
				at: now,
				manual_intervention_threshold: inner.config.manual_intervention_threshold,
			})
			.await?;
		let strategy = {
			let unknown_recurred = inner
				.episodes
				.lock()
				.get(key)
				.is_some_and(|episode| episode.strategy == RecoveryStrategy::UnknownRetry);

			if record.requires_reconnection {
				RecoveryStrategy::UserInterventionRequired
			} else {
				RecoveryStrategy::select(error_type, record.has_refresh_path(), unknown_recurred)
			}
		};

		trail.push(RecoveryState::StrategySelected);

		let attempt = self.advance_episode(key, strategy);

		trail.push(RecoveryState::Executing);

		let plan = match strategy {
			RecoveryStrategy::TokenRefresh => {
				let outcome = inner.coordinator.ensure_valid_token_at(key, now).await;

				self.settle_refresh(key, kind, error_type, outcome, attempt, now).await?
			},
			RecoveryStrategy::NetworkRetry | RecoveryStrategy::ServiceRetry =>
				self.retry_with_backoff(key, kind, strategy, error_type, attempt, now).await?,
			RecoveryStrategy::QuotaWait => self.wait_for_quota(key, raw.retry_after, attempt, now),
			RecoveryStrategy::UnknownRetry => self.retry_unknown(key, now),
			RecoveryStrategy::UserInterventionRequired => {
				let error_type = blocked_by.unwrap_or(error_type);

				self.require_intervention(key, kind, error_type, attempt, now).await?
			},
			RecoveryStrategy::NotRetryable => self.not_retryable(key, error_type, attempt, now).await,
		};

		Ok(self.finish(key, strategy, plan, classification.context, trail, now).await)
	}

	async fn settle_refresh_outcome(
		&self,
		key: &ConnectionKey,
		outcome: RefreshOutcome,
		attempt: u32,
		now: OffsetDateTime,
		trail: &mut Vec<RecoveryState>,
	) -> Result<RecoveryOutcome> {
		let Some(registration) = self.inner.providers.get(&key.provider) else {
			return Ok(self.unregistered(key, now, trail).await);
		};
		let plan = self
			.settle_refresh(key, registration.kind, ErrorType::TokenExpired, outcome, attempt, now)
			.await?;

		Ok(self.finish(key, RecoveryStrategy::TokenRefresh, plan, BTreeMap::new(), trail, now).await)
	}

	async fn settle_refresh(
		&self,
		key: &ConnectionKey,
		kind: ProviderKind,
		trigger: ErrorType,
		outcome: RefreshOutcome,
		attempt: u32,
		now: OffsetDateTime,
	) -> Result<Plan> {
		let inner = &self.inner;

		match outcome.error_type() {
			None => {
				self.forget(key);

				Ok(Plan {
					attempt_outcome: AttemptOutcome::Success,
					max_attempts: Some(inner.config.max_retry_attempts),
					message: "Access token renewed; the operation can run again.".into(),
					..Plan::new(RecoveryState::Succeeded, trigger, attempt)
				})
			},
			Some(ErrorType::ApiQuotaExceeded) => {
				let budget = RateLimitKey::new(key.clone(), RateLimitConcern::TokenRefresh);
				let wait = if inner.limiter.is_limited_at(
					&budget,
					inner.config.max_refresh_attempts_per_hour,
					now,
				) {
					inner.limiter.time_until_reset_at(&budget, now)
				} else {
					inner.config.quota_reset_estimate()
				};
				let retry_at = now + wait;

				self.schedule(
					key,
					RecoveryStrategy::TokenRefresh,
					ErrorType::ApiQuotaExceeded,
					attempt,
					None,
					retry_at,
				);

				Ok(Plan {
					max_attempts: None,
					retry_at: Some(retry_at),
					is_rate_limited: true,
					message: rate_limited_message(&key.provider, wait),
					..Plan::new(RecoveryState::Scheduled, ErrorType::ApiQuotaExceeded, attempt)
				})
			},
			Some(ErrorType::ProviderNotConfigured) =>
				Ok(self.not_retryable(key, ErrorType::ProviderNotConfigured, attempt, now).await),
			Some(error_type) if error_type.requires_user_intervention() =>
				self.require_intervention(key, kind, error_type, attempt, now).await,
			Some(error_type) => {
				// Too many transient failures also block the connection.
				if let Some(blocked_by) =
					inner.health.peek(key).await?.and_then(|record| record.blocking_error())
				{
					return self.require_intervention(key, kind, blocked_by, attempt, now).await;
				}

				self.retry_with_backoff(key, kind, RecoveryStrategy::TokenRefresh, error_type, attempt, now)
					.await
			},
		}
	}

	async fn retry_with_backoff(
		&self,
		key: &ConnectionKey,
		kind: ProviderKind,
		strategy: RecoveryStrategy,
		error_type: ErrorType,
		attempt: u32,
		now: OffsetDateTime,
	) -> Result<Plan> {
		let max = self.inner.config.max_retry_attempts;

		if attempt >= max {
			return self.exhaust(key, kind, strategy, error_type, attempt, now).await;
		}

		let delay = self.inner.backoff.delay_for(attempt);
		let retry_at = now + delay;

		self.schedule(key, strategy, error_type, attempt + 1, Some(max), retry_at);

		Ok(Plan {
			max_attempts: Some(max),
			retry_at: Some(retry_at),
			message: format!(
				"{} Retrying in {} (attempt {} of {max} next).",
				error_type.user_message(),
				describe_delay(delay),
				attempt + 1,
			),
			..Plan::new(RecoveryState::Scheduled, error_type, attempt)
		})
	}

	fn wait_for_quota(
		&self,
		key: &ConnectionKey,
		retry_after: Option<Duration>,
		attempt: u32,
		now: OffsetDateTime,
	) -> Plan {
		let wait = retry_after
			.filter(|delay| delay.is_positive())
			.unwrap_or_else(|| self.inner.config.quota_reset_estimate());
		let retry_at = now + wait;

		self.schedule(
			key,
			RecoveryStrategy::QuotaWait,
			ErrorType::ApiQuotaExceeded,
			attempt + 1,
			None,
			retry_at,
		);

		Plan {
			max_attempts: None,
			retry_at: Some(retry_at),
			is_rate_limited: true,
			message: rate_limited_message(&key.provider, wait),
			..Plan::new(RecoveryState::Scheduled, ErrorType::ApiQuotaExceeded, attempt)
		}
	}

	fn retry_unknown(&self, key: &ConnectionKey, now: OffsetDateTime) -> Plan {
		let delay = self.inner.backoff.delay_for(1);
		let retry_at = now + delay;

		self.schedule(
			key,
			RecoveryStrategy::UnknownRetry,
			ErrorType::UnknownError,
			UNKNOWN_RETRY_ATTEMPTS,
			Some(UNKNOWN_RETRY_ATTEMPTS),
			retry_at,
		);

		Plan {
			max_attempts: Some(UNKNOWN_RETRY_ATTEMPTS),
			retry_at: Some(retry_at),
			message: format!(
				"{} Retrying once in {}.",
				ErrorType::UnknownError.user_message(),
				describe_delay(delay)
			),
			..Plan::new(RecoveryState::Scheduled, ErrorType::UnknownError, 1)
		}
	}

	async fn require_intervention(
		&self,
		key: &ConnectionKey,
		kind: ProviderKind,
		error_type: ErrorType,
		attempt: u32,
		now: OffsetDateTime,
	) -> Result<Plan> {
		let inner = &self.inner;
		let already_flagged =
			inner.health.peek(key).await?.is_some_and(|record| record.requires_reconnection);

		if !already_flagged {
			inner
				.health
				.update(key, kind, HealthMutation::RequireReconnection {
					error_type,
					message: error_type.user_message().into(),
					at: now,
				})
				.await?;
		}

		self.forget(key);

		let notified = self.notify(key, error_type, template::AUTHENTICATION_REQUIRED, now).await;

		Ok(Plan { notified, ..Plan::new(RecoveryState::ManualInterventionRequired, error_type, attempt) })
	}

	async fn not_retryable(
		&self,
		key: &ConnectionKey,
		error_type: ErrorType,
		attempt: u32,
		now: OffsetDateTime,
	) -> Plan {
		self.inner.episodes.lock().remove(key);

		let notified = if error_type.requires_user_intervention() {
			self.notify(key, error_type, template::ACTION_REQUIRED, now).await
		} else {
			false
		};

		Plan { notified, ..Plan::new(RecoveryState::NotRetryable, error_type, attempt) }
	}

	async fn exhaust(
		&self,
		key: &ConnectionKey,
		kind: ProviderKind,
		strategy: RecoveryStrategy,
		error_type: ErrorType,
		attempt: u32,
		now: OffsetDateTime,
	) -> Result<Plan> {
		let inner = &self.inner;

		inner.health.update(key, kind, HealthMutation::RecoveryExhausted { at: now }).await?;
		inner.episodes.lock().remove(key);

		let delay = inner.config.exhausted_retry_delay();
		let retry_at = now + delay;

		inner.queue.schedule(ScheduledRetry {
			key: key.clone(),
			strategy,
			error_type,
			attempt_number: 1,
			max_attempts: Some(inner.config.max_retry_attempts),
			next_eligible_at: retry_at,
			exhausted: true,
		});

		let notified = self.notify(key, error_type, template::CONNECTION_ISSUES, now).await;

		Ok(Plan {
			max_attempts: Some(inner.config.max_retry_attempts),
			retry_at: Some(retry_at),
			notified,
			message: format!(
				"Automatic recovery stopped after {attempt} attempts; the next try runs in {}.",
				describe_delay(delay)
			),
			..Plan::new(RecoveryState::Exhausted, error_type, attempt)
		})
	}

	async fn unregistered(
		&self,
		key: &ConnectionKey,
		now: OffsetDateTime,
		trail: &mut Vec<RecoveryState>,
	) -> RecoveryOutcome {
		trail.extend([RecoveryState::StrategySelected, RecoveryState::Executing]);

		let plan = self.not_retryable(key, ErrorType::ProviderNotConfigured, 1, now).await;
		let context = BTreeMap::from([("provider".to_owned(), key.provider.to_string())]);

		self.finish(key, RecoveryStrategy::NotRetryable, plan, context, trail, now).await
	}

	// Storage failures while recovering become a single scheduled unknown-error retry.
	fn absorb(
		&self,
		key: &ConnectionKey,
		error: &Error,
		now: OffsetDateTime,
		mut trail: Vec<RecoveryState>,
	) -> RecoveryOutcome {
		obs::trace_absorbed_failure(key, "recovery", error);

		let strategy = RecoveryStrategy::UnknownRetry;
		let delay = self.inner.backoff.delay_for(1);
		let retry_at = now + delay;

		self.inner.episodes.lock().insert(key.clone(), Episode { strategy, attempts: 1 });
		self.schedule(
			key,
			strategy,
			ErrorType::UnknownError,
			UNKNOWN_RETRY_ATTEMPTS,
			Some(UNKNOWN_RETRY_ATTEMPTS),
			retry_at,
		);
		trail.push(RecoveryState::Scheduled);

		let state = RecoveryState::Scheduled;

		obs::trace_recovery(key, ErrorType::UnknownError.as_str(), strategy.as_str(), state.as_str());
		obs::record_recovery(strategy.as_str(), state.as_str());

		RecoveryOutcome {
			state,
			strategy,
			error: ConnectionError::new(ErrorType::UnknownError, key.provider.clone())
				.with_message(error.to_string()),
			attempt: RecoveryAttempt {
				strategy,
				started_at: now,
				outcome: AttemptOutcome::Exception,
				attempt_number: 1,
				max_attempts: Some(UNKNOWN_RETRY_ATTEMPTS),
			},
			retry_at: Some(retry_at),
			is_rate_limited: false,
			notified: false,
			consolidated_status: None,
			message: format!(
				"Recovery hit an internal error; retrying in {}.",
				describe_delay(delay)
			),
			transitions: trail,
		}
	}

	async fn finish(
		&self,
		key: &ConnectionKey,
		strategy: RecoveryStrategy,
		plan: Plan,
		context: BTreeMap<String, String>,
		trail: &mut Vec<RecoveryState>,
		now: OffsetDateTime,
	) -> RecoveryOutcome {
		trail.push(plan.state);

		let consolidated_status = match self.inner.health.consolidate(key).await {
			Ok(status) => Some(status),
			Err(e) => {
				obs::trace_absorbed_failure(key, "recovery_consolidate", &e);

				None
			},
		};

		obs::trace_recovery(key, plan.error_type.as_str(), strategy.as_str(), plan.state.as_str());
		obs::record_recovery(strategy.as_str(), plan.state.as_str());

		RecoveryOutcome {
			state: plan.state,
			strategy,
			error: ConnectionError::new(plan.error_type, key.provider.clone()).with_context(context),
			attempt: RecoveryAttempt {
				strategy,
				started_at: now,
				outcome: plan.attempt_outcome,
				attempt_number: plan.attempt_number,
				max_attempts: plan.max_attempts,
			},
			retry_at: plan.retry_at,
			is_rate_limited: plan.is_rate_limited,
			notified: plan.notified,
			consolidated_status,
			message: plan.message,
			transitions: std::mem::take(trail),
		}
	}

	fn advance_episode(&self, key: &ConnectionKey, strategy: RecoveryStrategy) -> u32 {
		let mut episodes = self.inner.episodes.lock();
		let attempts = match episodes.get(key) {
			Some(episode) if episode.strategy == strategy => episode.attempts.saturating_add(1),
			_ => 1,
		};

		episodes.insert(key.clone(), Episode { strategy, attempts });

		attempts
	}

	fn schedule(
		&self,
		key: &ConnectionKey,
		strategy: RecoveryStrategy,
		error_type: ErrorType,
		attempt_number: u32,
		max_attempts: Option<u32>,
		next_eligible_at: OffsetDateTime,
	) {
		self.inner.queue.schedule(ScheduledRetry {
			key: key.clone(),
			strategy,
			error_type,
			attempt_number,
			max_attempts,
			next_eligible_at,
			exhausted: false,
		});
	}

	async fn notify(
		&self,
		key: &ConnectionKey,
		error_type: ErrorType,
		template_key: &'static str,
		now: OffsetDateTime,
	) -> bool {
		let inner = &self.inner;

		if !inner.config.notifications_enabled
			|| !inner.throttler.should_notify_at(&key.user, &key.provider, error_type, now)
		{
			return false;
		}

		let notification =
			Notification::for_error(key.user.clone(), key.provider.clone(), error_type, template_key);
		let sent = inner.notifier.send(&notification).await;

		obs::trace_notification(key, template_key, error_type.as_str(), sent);

		sent
	}

	fn observe(kind: OperationKind, outcome: &RecoveryOutcome) {
		let result = match outcome.state {
			RecoveryState::Succeeded | RecoveryState::Scheduled => OperationOutcome::Success,
			_ => OperationOutcome::Failure,
		};

		obs::record_operation_outcome(kind, result);
	}
}
impl Debug for RecoveryStrategyEngine {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("RecoveryStrategyEngine")
			.field("backoff", &self.inner.backoff)
			.field("pending_retries", &self.inner.queue.len())
			.field("episodes", &self.inner.episodes.lock().len())
			.finish()
	}
}

/// Renders the user-facing message for a rate-limited wait.
pub fn rate_limited_message(provider: &impl Display, wait: Duration) -> String {
	let minutes = ((wait.whole_seconds() + 59) / 60).max(1);
	let unit = if minutes == 1 { "minute" } else { "minutes" };

	format!("Rate limited by {provider}; retry in {minutes} {unit}.")
}

fn describe_delay(delay: Duration) -> String {
	let seconds = delay.whole_seconds().max(0);

	match seconds {
		1 => "1 second".into(),
		s if s < 60 => format!("{s} seconds"),
		s => {
			let minutes = (s + 59) / 60;

			if minutes == 1 { "1 minute".into() } else { format!("{minutes} minutes") }
		},
	}
}
