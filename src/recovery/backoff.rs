//! Exponential backoff between retry attempts.

// self
use crate::{_prelude::*, config::EngineConfig};

/// Capped exponential backoff: `min(base * multiplier^(attempt - 1), max)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BackoffPolicy {
	/// Delay after the first failed attempt.
	pub base: Duration,
	/// Growth factor between consecutive delays.
	pub multiplier: u32,
	/// Upper bound for any single delay.
	pub max: Duration,
}
impl BackoffPolicy {
	/// Builds the policy from validated configuration.
	pub fn from_config(config: &EngineConfig) -> Self {
		Self {
			base: Duration::seconds(config.retry_base_delay_seconds),
			multiplier: config.retry_backoff_multiplier,
			max: Duration::seconds(config.retry_max_delay_seconds),
		}
	}

	/// Returns the delay to wait after failed attempt number `attempt` (1-based).
	pub fn delay_for(&self, attempt: u32) -> Duration {
		let exponent = attempt.saturating_sub(1);
		let factor = i32::try_from(self.multiplier.saturating_pow(exponent)).unwrap_or(i32::MAX);

		self.base.saturating_mul(factor).min(self.max)
	}
}
impl Default for BackoffPolicy {
	fn default() -> Self {
		Self::from_config(&EngineConfig::default())
	}
}
