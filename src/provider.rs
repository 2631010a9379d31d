//! Provider registrations: authentication style, reason tables, and the external collaborators
//! that refresh tokens and probe connection health.
//!
//! Collaborators are trait objects with crate-owned inputs and outputs so the engine never
//! depends on a particular provider SDK or HTTP client. Failures come back as [`RawFailure`]
//! values and are classified by the engine.

// self
use crate::{
	_prelude::*,
	classify::{RawFailure, ReasonTable},
	config::ProviderConfig,
	connection::{ConnectionKey, IssuedToken, ProviderId, ProviderKind, TokenSecret},
	error::ConfigError,
};

/// Boxed future returned by provider collaborators.
pub type ProviderFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, RawFailure>> + 'a + Send>>;

/// Performs the provider's `refresh_token` operation.
pub trait TokenRefresher
where
	Self: Send + Sync,
{
	/// Exchanges `refresh_token` for a new token.
	///
	/// A response without a refresh token keeps the stored one.
	fn refresh<'a>(
		&'a self,
		key: &'a ConnectionKey,
		refresh_token: &'a TokenSecret,
	) -> ProviderFuture<'a, IssuedToken>;
}

/// Cheap provider call used by the sweep to verify that a connection works again.
pub trait HealthProbe
where
	Self: Send + Sync,
{
	/// Probes the connection with its current credentials.
	fn probe<'a>(
		&'a self,
		key: &'a ConnectionKey,
		credentials: Option<&'a IssuedToken>,
	) -> ProviderFuture<'a, ()>;
}

/// Everything the engine knows about one provider.
#[derive(Clone)]
pub struct ProviderRegistration {
	/// Provider identifier.
	pub id: ProviderId,
	/// Authentication style.
	pub kind: ProviderKind,
	/// Provider-specific reasons layered over the generic OAuth codes.
	pub reasons: ReasonTable,
	/// Token refresh collaborator (OAuth providers).
	pub refresher: Option<Arc<dyn TokenRefresher>>,
	/// Health-check collaborator used by scheduled retries.
	pub probe: Option<Arc<dyn HealthProbe>>,
}
impl ProviderRegistration {
	/// Registration for an OAuth-token provider.
	pub fn oauth(id: ProviderId) -> Self {
		Self::new(id, ProviderKind::OauthToken)
	}

	/// Registration for a key/secret provider.
	pub fn key_secret(id: ProviderId) -> Self {
		Self::new(id, ProviderKind::KeySecret)
	}

	/// Builds a registration from a configuration entry (collaborators are attached separately).
	pub fn from_config(config: &ProviderConfig) -> Self {
		let mut reasons = ReasonTable::preset(config.reason_table);

		for (reason, error_type) in &config.reasons {
			reasons.insert(reason, *error_type);
		}

		Self { reasons, ..Self::new(config.id.clone(), config.kind) }
	}

	/// Attaches the token refresher.
	pub fn with_refresher(mut self, refresher: Arc<dyn TokenRefresher>) -> Self {
		self.refresher = Some(refresher);

		self
	}

	/// Attaches the health probe.
	pub fn with_probe(mut self, probe: Arc<dyn HealthProbe>) -> Self {
		self.probe = Some(probe);

		self
	}

	/// Replaces the provider reason table.
	pub fn with_reason_table(mut self, reasons: ReasonTable) -> Self {
		self.reasons = reasons;

		self
	}

	fn new(id: ProviderId, kind: ProviderKind) -> Self {
		Self { id, kind, reasons: ReasonTable::default(), refresher: None, probe: None }
	}
}
impl Debug for ProviderRegistration {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("ProviderRegistration")
			.field("id", &self.id)
			.field("kind", &self.kind)
			.field("reasons", &self.reasons.len())
			.field("refresher_set", &self.refresher.is_some())
			.field("probe_set", &self.probe.is_some())
			.finish()
	}
}

/// Registered providers keyed by identifier.
#[derive(Clone, Debug, Default)]
pub struct ProviderRegistry(BTreeMap<ProviderId, ProviderRegistration>);
impl ProviderRegistry {
	/// Adds a registration; registering the same identifier twice is a configuration error.
	pub fn register(&mut self, registration: ProviderRegistration) -> Result<(), ConfigError> {
		if self.0.contains_key(&registration.id) {
			return Err(ConfigError::DuplicateProvider { provider: registration.id.to_string() });
		}

		self.0.insert(registration.id.clone(), registration);

		Ok(())
	}

	/// Looks up a registration.
	pub fn get(&self, id: &ProviderId) -> Option<&ProviderRegistration> {
		self.0.get(id)
	}

	/// Iterates registrations ordered by identifier.
	pub fn iter(&self) -> impl Iterator<Item = &ProviderRegistration> {
		self.0.values()
	}

	/// Returns the number of registrations.
	pub fn len(&self) -> usize {
		self.0.len()
	}

	/// Returns `true` when nothing is registered.
	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}
}
