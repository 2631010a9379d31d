//! Token refresh coordination with per-connection singleflight and shared in-flight refreshes.
//!
//! [`TokenRefreshCoordinator::ensure_valid_token`] answers whether a connection holds a usable
//! token, refreshing it when needed. Each connection has at most one refresh flight at a time:
//! the first caller starts it under the connection's exclusive lock and every concurrent caller
//! joins the same shared future. A caller that gives up (drops its future) never cancels the
//! flight for the others, because any remaining waiter keeps polling it to completion.

mod metrics;
#[cfg(feature = "reqwest")] pub mod oauth;

pub use metrics::RefreshMetrics;
#[cfg(feature = "reqwest")] pub use oauth::OAuthTokenRefresher;

// crates.io
use async_lock::MutexGuardArc;
use futures::future::{BoxFuture, FutureExt, Shared};
// self
use crate::{
	_prelude::*,
	classify::ErrorClassifier,
	config::EngineConfig,
	connection::{ConnectionKey, TokenStatus},
	health::{ConnectionHealthStore, HealthMutation},
	limit::{RateLimitConcern, RateLimitKey, RateLimiter},
	obs::{self, OperationKind, OperationOutcome, OperationSpan},
	provider::ProviderRegistry,
	taxonomy::ErrorType,
};

type Flight = Shared<BoxFuture<'static, RefreshOutcome>>;

/// Result of [`TokenRefreshCoordinator::ensure_valid_token`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshOutcome {
	/// The token was already usable; nothing was refreshed.
	AlreadyValid,
	/// This caller's flight refreshed the token.
	Refreshed,
	/// Another caller refreshed the token while this one waited.
	RefreshedByOther,
	/// No usable token could be produced.
	Failed(ErrorType),
}
impl RefreshOutcome {
	/// Outcome callers report when their own lock-wait timer fires.
	pub const fn lock_wait_timeout() -> Self {
		RefreshOutcome::Failed(ErrorType::Timeout)
	}

	/// Returns `true` when the connection now holds a usable token.
	pub const fn is_usable(self) -> bool {
		!matches!(self, RefreshOutcome::Failed(_))
	}

	/// Returns the failure classification, if any.
	pub const fn error_type(self) -> Option<ErrorType> {
		match self {
			RefreshOutcome::Failed(error_type) => Some(error_type),
			_ => None,
		}
	}

	/// Returns a stable label suitable for logs.
	pub const fn as_str(self) -> &'static str {
		match self {
			RefreshOutcome::AlreadyValid => "already_valid",
			RefreshOutcome::Refreshed => "refreshed",
			RefreshOutcome::RefreshedByOther => "refreshed_by_other",
			RefreshOutcome::Failed(_) => "failed",
		}
	}
}

/// Executes the refresh protocol exactly once per need, even under concurrent callers.
#[derive(Clone)]
pub struct TokenRefreshCoordinator {
	inner: Arc<CoordinatorInner>,
}
struct CoordinatorInner {
	health: ConnectionHealthStore,
	providers: Arc<ProviderRegistry>,
	classifier: ErrorClassifier,
	limiter: Arc<RateLimiter>,
	config: Arc<EngineConfig>,
	locks: Mutex<HashMap<ConnectionKey, Arc<AsyncMutex<()>>>>,
	flights: Mutex<HashMap<ConnectionKey, Flight>>,
	metrics: RefreshMetrics,
}
impl TokenRefreshCoordinator {
	/// Creates a coordinator over shared engine components.
	pub fn new(
		health: ConnectionHealthStore,
		providers: Arc<ProviderRegistry>,
		limiter: Arc<RateLimiter>,
		config: Arc<EngineConfig>,
	) -> Self {
		Self {
			inner: Arc::new(CoordinatorInner {
				health,
				providers,
				classifier: ErrorClassifier::new(),
				limiter,
				config,
				locks: Default::default(),
				flights: Default::default(),
				metrics: Default::default(),
			}),
		}
	}

	/// Returns the coordinator's counters.
	pub fn metrics(&self) -> &RefreshMetrics {
		&self.inner.metrics
	}

	/// Ensures the connection holds a usable token at the current time.
	///
	/// Callers that need a bound on the wait wrap this future in their own timer and report
	/// [`RefreshOutcome::lock_wait_timeout`] when it fires.
	pub async fn ensure_valid_token(&self, key: &ConnectionKey) -> RefreshOutcome {
		self.ensure_valid_token_at(key, OffsetDateTime::now_utc()).await
	}

	/// Ensures the connection holds a usable token at `instant`.
	pub async fn ensure_valid_token_at(
		&self,
		key: &ConnectionKey,
		instant: OffsetDateTime,
	) -> RefreshOutcome {
		const KIND: OperationKind = OperationKind::EnsureToken;

		let span = OperationSpan::new(KIND, "ensure_valid_token");

		obs::record_operation_outcome(KIND, OperationOutcome::Attempt);
		self.inner.metrics.record_attempt();

		let outcome = span
			.instrument(async move {
				let observed = match self.inner.health.peek(key).await {
					Ok(record) => record.map(|record| record.token_generation).unwrap_or_default(),
					Err(e) => {
						obs::trace_absorbed_failure(key, "ensure_valid_token", &e);

						return RefreshOutcome::Failed(ErrorType::UnknownError);
					},
				};
				let (flight, mut joined) = self.flight(key, instant, observed);
				let mut outcome = flight.await;

				// A joined flight may have been started for an earlier instant by a caller that
				// has since given up; its answer does not cover this caller.
				if joined && outcome.is_usable() && self.still_needs_refresh(key, instant).await {
					let (flight, rejoined) = self.flight(key, instant, observed);

					outcome = flight.await;
					joined = rejoined;
				}

				match outcome {
					RefreshOutcome::Refreshed if joined => RefreshOutcome::RefreshedByOther,
					other => other,
				}
			})
			.await;

		match outcome {
			RefreshOutcome::Refreshed => {},
			RefreshOutcome::AlreadyValid | RefreshOutcome::RefreshedByOther =>
				self.inner.metrics.record_reused(),
			RefreshOutcome::Failed(_) => self.inner.metrics.record_failure(),
		}

		obs::record_operation_outcome(
			KIND,
			if outcome.is_usable() { OperationOutcome::Success } else { OperationOutcome::Failure },
		);

		outcome
	}

	/// Waits for any in-flight refresh of `key`, then takes the connection's exclusive lock.
	///
	/// Used by connect/disconnect so credential changes never interleave with a refresh.
	pub async fn exclusive(&self, key: &ConnectionKey) -> MutexGuardArc<()> {
		let pending = self.inner.flights.lock().get(key).cloned();

		if let Some(flight) = pending {
			flight.await;
		}

		self.lock(key).lock_arc().await
	}

	/// Drops per-connection locks nobody holds or waits on.
	pub fn prune_idle_locks(&self) {
		self.inner.locks.lock().retain(|_, lock| Arc::strong_count(lock) > 1);
	}

	async fn still_needs_refresh(&self, key: &ConnectionKey, instant: OffsetDateTime) -> bool {
		match self.inner.health.peek(key).await {
			Ok(Some(record)) =>
				record.has_refresh_path()
					&& record.needs_refresh_at(instant, self.inner.config.proactive_refresh_window()),
			Ok(None) => false,
			Err(e) => {
				obs::trace_absorbed_failure(key, "refresh_recheck", &e);

				false
			},
		}
	}

	fn lock(&self, key: &ConnectionKey) -> Arc<AsyncMutex<()>> {
		let mut locks = self.inner.locks.lock();

		locks.entry(key.clone()).or_insert_with(|| Arc::new(AsyncMutex::new(()))).clone()
	}

	fn flight(&self, key: &ConnectionKey, instant: OffsetDateTime, observed: u64) -> (Flight, bool) {
		let mut flights = self.inner.flights.lock();

		if let Some(flight) = flights.get(key) {
			return (flight.clone(), true);
		}

		let this = self.clone();
		let owned_key = key.clone();
		let flight = async move {
			let outcome = this.run_flight(&owned_key, instant, observed).await;

			this.inner.flights.lock().remove(&owned_key);

			outcome
		}
		.boxed()
		.shared();

		flights.insert(key.clone(), flight.clone());

		(flight, false)
	}

	async fn run_flight(
		&self,
		key: &ConnectionKey,
		instant: OffsetDateTime,
		observed: u64,
	) -> RefreshOutcome {
		let lock = self.lock(key);
		let _exclusive = lock.lock().await;
		let inner = &self.inner;
		let Some(registration) = inner.providers.get(&key.provider) else {
			return RefreshOutcome::Failed(ErrorType::ProviderNotConfigured);
		};
		let kind = registration.kind;
		// Re-read under the lock: a previous holder may have refreshed already.
		let record = match inner.health.get(key, kind).await {
			Ok(record) => record,
			Err(e) => {
				obs::trace_absorbed_failure(key, "refresh_read", &e);

				return RefreshOutcome::Failed(ErrorType::UnknownError);
			},
		};

		if let Some(error_type) = record.blocking_error() {
			return RefreshOutcome::Failed(error_type);
		}
		if !kind.uses_tokens() {
			return RefreshOutcome::AlreadyValid;
		}
		if record.token_status == TokenStatus::Missing {
			return RefreshOutcome::Failed(ErrorType::InvalidCredentials);
		}

		let window = inner.config.proactive_refresh_window();

		if !record.needs_refresh_at(instant, window) {
			return if record.token_generation != observed {
				RefreshOutcome::RefreshedByOther
			} else {
				RefreshOutcome::AlreadyValid
			};
		}

		let Some(refresh_token) = record.refresh_token().cloned() else {
			let still_usable = record.token_status == TokenStatus::Valid
				&& record.token_expires_at.is_none_or(|expires| instant < expires);

			if still_usable {
				return RefreshOutcome::AlreadyValid;
			}

			let mutation = HealthMutation::RequireReconnection {
				error_type: ErrorType::InvalidCredentials,
				message: "Token expired and no refresh token is available.".into(),
				at: instant,
			};

			if let Err(e) = inner.health.update(key, kind, mutation).await {
				obs::trace_absorbed_failure(key, "refresh_require_reconnection", &e);
			}

			return RefreshOutcome::Failed(ErrorType::InvalidCredentials);
		};
		let Some(refresher) = registration.refresher.clone() else {
			return RefreshOutcome::Failed(ErrorType::ProviderNotConfigured);
		};
		let budget = RateLimitKey::new(key.clone(), RateLimitConcern::TokenRefresh);

		if !inner.limiter.try_acquire_at(
			&budget,
			inner.config.max_refresh_attempts_per_hour,
			Duration::HOUR,
			instant,
		) {
			return RefreshOutcome::Failed(ErrorType::ApiQuotaExceeded);
		}

		inner.metrics.record_provider_call();

		let (mutation, outcome) = match refresher.refresh(key, &refresh_token).await {
			Ok(token) => {
				inner.metrics.record_refreshed();

				(
					HealthMutation::TokenRefreshed { token, renewal_lead: window, at: instant },
					RefreshOutcome::Refreshed,
				)
			},
			Err(failure) => {
				let failure = failure.during_refresh();
				let classification =
					inner.classifier.classify(&key.provider, &registration.reasons, &failure, true);

				(
					HealthMutation::RefreshFailed {
						error_type: classification.error_type,
						message: failure.summary(),
						at: instant,
						max_refresh_failures: inner.config.max_refresh_failures,
					},
					RefreshOutcome::Failed(classification.error_type),
				)
			},
		};

		match inner.health.update(key, kind, mutation).await {
			Ok(_) => outcome,
			Err(e) => {
				obs::trace_absorbed_failure(key, "refresh_write", &e);

				RefreshOutcome::Failed(ErrorType::UnknownError)
			},
		}
	}
}
impl Debug for TokenRefreshCoordinator {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("TokenRefreshCoordinator")
			.field("providers", &self.inner.providers.len())
			.field("in_flight", &self.inner.flights.lock().len())
			.field("metrics", &self.inner.metrics)
			.finish()
	}
}
