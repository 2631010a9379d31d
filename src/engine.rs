//! Engine facade wiring every component behind the operations exposed to the host application.
//!
//! The host calls [`Engine::ensure_valid_token`] before provider operations,
//! [`Engine::handle_failure`] after a failed one, [`Engine::record_success`] after a successful
//! one, or lets [`Engine::perform`] do all three. A periodic task calls [`Engine::run_sweep`].

mod sweep;

pub use sweep::SweepReport;

// self
use crate::{
	_prelude::*,
	classify::RawFailure,
	config::EngineConfig,
	connection::{ConnectionKey, IssuedToken, ProviderId, UserId},
	error::ConfigError,
	health::{ConnectionHealthStore, ConsolidatedStatus, HealthMutation},
	limit::RateLimiter,
	notify::{NoopSender, NotificationSender},
	obs::{self, OperationKind, OperationOutcome, OperationSpan},
	provider::{HealthProbe, ProviderRegistration, ProviderRegistry, TokenRefresher},
	recovery::{RecoveryOutcome, RecoveryState, RecoveryStrategyEngine},
	refresh::{RefreshOutcome, TokenRefreshCoordinator},
	report::{HealthReport, HealthStatusAggregator},
	store::HealthStore,
};

/// Cloud-storage connection resilience engine.
#[derive(Clone, Debug)]
pub struct Engine {
	health: ConnectionHealthStore,
	providers: Arc<ProviderRegistry>,
	limiter: Arc<RateLimiter>,
	coordinator: TokenRefreshCoordinator,
	recovery: RecoveryStrategyEngine,
	aggregator: HealthStatusAggregator,
	config: Arc<EngineConfig>,
}
impl Engine {
	/// Starts building an engine from a configuration.
	pub fn builder(config: EngineConfig) -> EngineBuilder {
		EngineBuilder::new(config)
	}

	/// Validated configuration.
	pub fn config(&self) -> &EngineConfig {
		&self.config
	}

	/// Health record store.
	pub fn health(&self) -> &ConnectionHealthStore {
		&self.health
	}

	/// Registered providers.
	pub fn providers(&self) -> &ProviderRegistry {
		&self.providers
	}

	/// Shared attempt budgets.
	pub fn limiter(&self) -> &RateLimiter {
		&self.limiter
	}

	/// Token refresh coordinator.
	pub fn coordinator(&self) -> &TokenRefreshCoordinator {
		&self.coordinator
	}

	/// Recovery strategy engine.
	pub fn recovery(&self) -> &RecoveryStrategyEngine {
		&self.recovery
	}

	/// Ensures the connection holds a usable token.
	pub async fn ensure_valid_token(&self, key: &ConnectionKey) -> RefreshOutcome {
		self.coordinator.ensure_valid_token(key).await
	}

	/// Ensures the connection holds a usable token at `now`.
	pub async fn ensure_valid_token_at(
		&self,
		key: &ConnectionKey,
		now: OffsetDateTime,
	) -> RefreshOutcome {
		self.coordinator.ensure_valid_token_at(key, now).await
	}

	/// Reports one connection.
	pub async fn report_health(&self, key: &ConnectionKey) -> Result<HealthReport> {
		self.aggregator.report(key).await
	}

	/// Reports one connection at `now`.
	pub async fn report_health_at(
		&self,
		key: &ConnectionKey,
		now: OffsetDateTime,
	) -> Result<HealthReport> {
		self.aggregator.report_at(key, now).await
	}

	/// Reports every registered provider for `user`.
	pub async fn report_all_health(&self, user: &UserId) -> Result<Vec<HealthReport>> {
		self.aggregator.report_all(user).await
	}

	/// Reports every registered provider for `user` at `now`.
	pub async fn report_all_health_at(
		&self,
		user: &UserId,
		now: OffsetDateTime,
	) -> Result<Vec<HealthReport>> {
		self.aggregator.report_all_at(user, now).await
	}

	/// Classifies and recovers from a provider failure.
	pub async fn handle_failure(&self, key: &ConnectionKey, failure: RawFailure) -> RecoveryOutcome {
		self.recovery.handle_failure(key, failure).await
	}

	/// Classifies and recovers from a provider failure observed at `now`.
	pub async fn handle_failure_at(
		&self,
		key: &ConnectionKey,
		failure: RawFailure,
		now: OffsetDateTime,
	) -> RecoveryOutcome {
		self.recovery.handle_failure_at(key, failure, now).await
	}

	/// Records a successful provider operation.
	pub async fn record_success(&self, key: &ConnectionKey) -> Result<ConsolidatedStatus> {
		self.recovery.record_success_at(key, OffsetDateTime::now_utc()).await
	}

	/// Records a successful provider operation at `now`.
	pub async fn record_success_at(
		&self,
		key: &ConnectionKey,
		now: OffsetDateTime,
	) -> Result<ConsolidatedStatus> {
		self.recovery.record_success_at(key, now).await
	}

	/// Stores credentials from a completed authorization flow and clears reconnection flags.
	pub async fn connect(
		&self,
		key: &ConnectionKey,
		token: IssuedToken,
	) -> Result<ConsolidatedStatus> {
		self.connect_at(key, token, OffsetDateTime::now_utc()).await
	}

	/// Stores credentials from a completed authorization flow at `now`.
	pub async fn connect_at(
		&self,
		key: &ConnectionKey,
		token: IssuedToken,
		now: OffsetDateTime,
	) -> Result<ConsolidatedStatus> {
		const KIND: OperationKind = OperationKind::Connect;

		let span = OperationSpan::new(KIND, "connect");

		obs::record_operation_outcome(KIND, OperationOutcome::Attempt);

		let result = span
			.instrument(async move {
				let kind = self.recovery.registration(key)?.kind;
				let _exclusive = self.coordinator.exclusive(key).await;
				let record = self
					.health
					.update(key, kind, HealthMutation::Connected {
						token,
						renewal_lead: self.config.proactive_refresh_window(),
						at: now,
					})
					.await?;

				self.recovery.forget(key);
				self.recovery.throttler().clear_connection(&key.user, &key.provider);

				Ok::<_, Error>(record.consolidate())
			})
			.await;

		Self::observe(KIND, result.is_ok());

		result
	}

	/// Clears the stored credentials; the connection reports `not_connected` afterwards.
	pub async fn disconnect(&self, key: &ConnectionKey) -> Result<()> {
		self.disconnect_at(key, OffsetDateTime::now_utc()).await
	}

	/// Clears the stored credentials at `now`.
	pub async fn disconnect_at(&self, key: &ConnectionKey, now: OffsetDateTime) -> Result<()> {
		const KIND: OperationKind = OperationKind::Disconnect;

		let span = OperationSpan::new(KIND, "disconnect");

		obs::record_operation_outcome(KIND, OperationOutcome::Attempt);

		let result = span
			.instrument(async move {
				let kind = self.recovery.registration(key)?.kind;
				let _exclusive = self.coordinator.exclusive(key).await;

				self.health.update(key, kind, HealthMutation::Disconnected { at: now }).await?;
				self.recovery.forget(key);

				Ok::<_, Error>(())
			})
			.await;

		Self::observe(KIND, result.is_ok());

		result
	}

	/// Runs a provider operation with token pre-check, success bookkeeping, and recovery.
	///
	/// The operation receives the stored credentials. When its failure is fixed by a token
	/// refresh, it runs once more before the recovery outcome is returned.
	pub async fn perform<T, F, Fut>(
		&self,
		key: &ConnectionKey,
		mut operation: F,
	) -> Result<T, Box<RecoveryOutcome>>
	where
		F: FnMut(Option<IssuedToken>) -> Fut,
		Fut: Future<Output = Result<T, RawFailure>>,
	{
		let mut rerun = true;

		loop {
			let started = OffsetDateTime::now_utc();
			let refresh = self.coordinator.ensure_valid_token_at(key, started).await;

			if !refresh.is_usable() {
				return Err(Box::new(self.recovery.recover_refresh_at(key, refresh, started).await));
			}

			let credentials = match self.health.peek(key).await {
				Ok(record) => record.and_then(|record| record.credentials),
				Err(e) => {
					obs::trace_absorbed_failure(key, "perform_credentials", &e);

					None
				},
			};

			match operation(credentials).await {
				Ok(value) => {
					if let Err(e) =
						self.recovery.record_success_at(key, OffsetDateTime::now_utc()).await
					{
						obs::trace_absorbed_failure(key, "perform_success", &e);
					}

					return Ok(value);
				},
				Err(failure) => {
					let failure = if failure.observed_at.is_some() {
						failure
					} else {
						failure.observed_at(started)
					};
					let outcome = self
						.recovery
						.handle_failure_at(key, failure, OffsetDateTime::now_utc())
						.await;

					if rerun && outcome.state == RecoveryState::Succeeded {
						rerun = false;

						continue;
					}

					return Err(Box::new(outcome));
				},
			}
		}
	}

	fn observe(kind: OperationKind, ok: bool) {
		obs::record_operation_outcome(
			kind,
			if ok { OperationOutcome::Success } else { OperationOutcome::Failure },
		);
	}
}

/// Builder for [`Engine`].
pub struct EngineBuilder {
	config: EngineConfig,
	registrations: Vec<ProviderRegistration>,
	refreshers: Vec<(ProviderId, Arc<dyn TokenRefresher>)>,
	probes: Vec<(ProviderId, Arc<dyn HealthProbe>)>,
	store: Option<Arc<dyn HealthStore>>,
	notifier: Option<Arc<dyn NotificationSender>>,
}
impl EngineBuilder {
	fn new(config: EngineConfig) -> Self {
		Self {
			config,
			registrations: Vec::new(),
			refreshers: Vec::new(),
			probes: Vec::new(),
			store: None,
			notifier: None,
		}
	}

	/// Registers a provider defined in code rather than in the configuration.
	pub fn register_provider(mut self, registration: ProviderRegistration) -> Self {
		self.registrations.push(registration);

		self
	}

	/// Attaches a token refresher to a configured provider.
	pub fn with_refresher(mut self, provider: ProviderId, refresher: Arc<dyn TokenRefresher>) -> Self {
		self.refreshers.push((provider, refresher));

		self
	}

	/// Attaches a health probe to a configured provider.
	pub fn with_probe(mut self, provider: ProviderId, probe: Arc<dyn HealthProbe>) -> Self {
		self.probes.push((provider, probe));

		self
	}

	/// Persists health records in `store` (in-memory by default).
	pub fn with_store(mut self, store: Arc<dyn HealthStore>) -> Self {
		self.store = Some(store);

		self
	}

	/// Delivers notifications through `notifier` (dropped by default).
	pub fn with_notifier(mut self, notifier: Arc<dyn NotificationSender>) -> Self {
		self.notifier = Some(notifier);

		self
	}

	/// Validates the configuration and wires the engine.
	pub fn build(self) -> Result<Engine> {
		self.config.validate()?;

		let mut declared: Vec<_> =
			self.config.providers.iter().map(ProviderRegistration::from_config).collect();

		for (provider, refresher) in self.refreshers {
			let registration = find_declared(&mut declared, &provider)?;

			registration.refresher = Some(refresher);
		}
		for (provider, probe) in self.probes {
			let registration = find_declared(&mut declared, &provider)?;

			registration.probe = Some(probe);
		}

		let mut registry = ProviderRegistry::default();

		for registration in declared.into_iter().chain(self.registrations) {
			registry.register(registration)?;
		}

		let config = Arc::new(self.config);
		let providers = Arc::new(registry);
		let health = match self.store {
			Some(store) => ConnectionHealthStore::new(store),
			None => ConnectionHealthStore::in_memory(),
		};
		let limiter = Arc::new(RateLimiter::new());
		let notifier = self.notifier.unwrap_or_else(|| Arc::new(NoopSender));
		let coordinator = TokenRefreshCoordinator::new(
			health.clone(),
			providers.clone(),
			limiter.clone(),
			config.clone(),
		);
		let recovery = RecoveryStrategyEngine::new(
			health.clone(),
			providers.clone(),
			coordinator.clone(),
			limiter.clone(),
			notifier,
			config.clone(),
		);
		let aggregator = HealthStatusAggregator::new(
			health.clone(),
			providers.clone(),
			limiter.clone(),
			recovery.clone(),
			config.clone(),
		);

		Ok(Engine { health, providers, limiter, coordinator, recovery, aggregator, config })
	}
}
impl Debug for EngineBuilder {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("EngineBuilder")
			.field("config", &self.config)
			.field("registrations", &self.registrations)
			.field("refreshers", &self.refreshers.len())
			.field("probes", &self.probes.len())
			.field("store_set", &self.store.is_some())
			.field("notifier_set", &self.notifier.is_some())
			.finish()
	}
}

fn find_declared<'a>(
	declared: &'a mut [ProviderRegistration],
	provider: &ProviderId,
) -> Result<&'a mut ProviderRegistration, ConfigError> {
	declared
		.iter_mut()
		.find(|registration| &registration.id == provider)
		.ok_or_else(|| ConfigError::UnknownProvider { provider: provider.to_string() })
}
