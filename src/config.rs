//! Engine configuration knobs, TOML loading, and range validation.

// self
use crate::{
	_prelude::*,
	classify::ReasonPreset,
	connection::{ProviderId, ProviderKind},
	error::ConfigError,
	taxonomy::ErrorType,
};

/// Numeric and boolean knobs driving refresh, retry, and notification behavior.
///
/// Values are validated by [`EngineConfig::validate`]; out-of-range values are rejected rather
/// than clamped.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
	/// Lead time before expiry at which tokens are renewed (1-60).
	pub proactive_refresh_minutes: i64,
	/// Refresh failures tolerated before requiring a reconnection (1-10).
	pub max_refresh_failures: u32,
	/// Total tries per retry episode, including the failed original call (1-10).
	pub max_retry_attempts: u32,
	/// First retry delay (1-3600).
	pub retry_base_delay_seconds: i64,
	/// Growth factor between consecutive retry delays (1-10).
	pub retry_backoff_multiplier: u32,
	/// Upper bound for a single retry delay (base-86400).
	pub retry_max_delay_seconds: i64,
	/// Notification cooldown per user/provider/error type (1-168).
	pub notification_throttle_hours: i64,
	/// Token refresh budget per connection and hour (1-100).
	pub max_refresh_attempts_per_hour: u32,
	/// Health-check budget per connection and minute (1-60).
	pub max_health_checks_per_minute: u32,
	/// Consecutive failures that force a reconnection (4-100).
	pub manual_intervention_threshold: u32,
	/// Quota reset estimate used when the provider reports none (1-1440).
	pub quota_reset_estimate_minutes: i64,
	/// Delay before an exhausted episode is retried by the sweep (1-1440).
	pub exhausted_retry_minutes: i64,
	/// Master switch for user notifications.
	pub notifications_enabled: bool,
	/// Providers known to the engine.
	pub providers: Vec<ProviderConfig>,
}
impl EngineConfig {
	/// Parses and validates a TOML document.
	pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
		let config: Self = toml::from_str(source)?;

		config.validate()?;

		Ok(config)
	}

	/// Checks every knob against its documented range.
	pub fn validate(&self) -> Result<(), ConfigError> {
		ConfigError::ensure_range("proactive_refresh_minutes", self.proactive_refresh_minutes, 1, 60)?;
		ConfigError::ensure_range("max_refresh_failures", self.max_refresh_failures.into(), 1, 10)?;
		ConfigError::ensure_range("max_retry_attempts", self.max_retry_attempts.into(), 1, 10)?;
		ConfigError::ensure_range(
			"retry_base_delay_seconds",
			self.retry_base_delay_seconds,
			1,
			3_600,
		)?;
		ConfigError::ensure_range(
			"retry_backoff_multiplier",
			self.retry_backoff_multiplier.into(),
			1,
			10,
		)?;
		ConfigError::ensure_range(
			"retry_max_delay_seconds",
			self.retry_max_delay_seconds,
			self.retry_base_delay_seconds,
			86_400,
		)?;
		ConfigError::ensure_range(
			"notification_throttle_hours",
			self.notification_throttle_hours,
			1,
			168,
		)?;
		ConfigError::ensure_range(
			"max_refresh_attempts_per_hour",
			self.max_refresh_attempts_per_hour.into(),
			1,
			100,
		)?;
		ConfigError::ensure_range(
			"max_health_checks_per_minute",
			self.max_health_checks_per_minute.into(),
			1,
			60,
		)?;
		ConfigError::ensure_range(
			"manual_intervention_threshold",
			self.manual_intervention_threshold.into(),
			4,
			100,
		)?;
		ConfigError::ensure_range(
			"quota_reset_estimate_minutes",
			self.quota_reset_estimate_minutes,
			1,
			1_440,
		)?;
		ConfigError::ensure_range("exhausted_retry_minutes", self.exhausted_retry_minutes, 1, 1_440)?;

		let mut seen = Vec::with_capacity(self.providers.len());

		for provider in &self.providers {
			if seen.contains(&&provider.id) {
				return Err(ConfigError::DuplicateProvider { provider: provider.id.to_string() });
			}

			seen.push(&provider.id);
		}

		Ok(())
	}

	/// Proactive refresh window.
	pub fn proactive_refresh_window(&self) -> Duration {
		Duration::minutes(self.proactive_refresh_minutes)
	}

	/// Notification cooldown.
	pub fn notification_cooldown(&self) -> Duration {
		Duration::hours(self.notification_throttle_hours)
	}

	/// Quota reset estimate.
	pub fn quota_reset_estimate(&self) -> Duration {
		Duration::minutes(self.quota_reset_estimate_minutes)
	}

	/// Delay before an exhausted episode is retried.
	pub fn exhausted_retry_delay(&self) -> Duration {
		Duration::minutes(self.exhausted_retry_minutes)
	}
}
impl Default for EngineConfig {
	fn default() -> Self {
		Self {
			proactive_refresh_minutes: 15,
			max_refresh_failures: 3,
			max_retry_attempts: 3,
			retry_base_delay_seconds: 1,
			retry_backoff_multiplier: 2,
			retry_max_delay_seconds: 300,
			notification_throttle_hours: 24,
			max_refresh_attempts_per_hour: 10,
			max_health_checks_per_minute: 5,
			manual_intervention_threshold: 10,
			quota_reset_estimate_minutes: 60,
			exhausted_retry_minutes: 60,
			notifications_enabled: true,
			providers: Vec::new(),
		}
	}
}
impl FromStr for EngineConfig {
	type Err = ConfigError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Self::from_toml_str(s)
	}
}

/// Configuration entry describing one provider.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProviderConfig {
	/// Provider identifier.
	pub id: ProviderId,
	/// Authentication style.
	#[serde(default)]
	pub kind: ProviderKind,
	/// Reason-table preset layered under the generic OAuth codes.
	#[serde(default)]
	pub reason_table: ReasonPreset,
	/// Extra reason mappings that override the preset.
	#[serde(default)]
	pub reasons: BTreeMap<String, ErrorType>,
	/// OAuth token endpoint used by the bundled refresher.
	#[serde(default)]
	pub token_endpoint: Option<Url>,
}
impl ProviderConfig {
	/// Creates an entry with the generic reason table.
	pub fn new(id: ProviderId, kind: ProviderKind) -> Self {
		Self {
			id,
			kind,
			reason_table: ReasonPreset::Generic,
			reasons: BTreeMap::new(),
			token_endpoint: None,
		}
	}
}
