//! Fixed-window attempt budgets per connection and concern.

// self
use crate::{_prelude::*, connection::ConnectionKey};

/// Concern a budget applies to; each concern counts independently.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RateLimitConcern {
	/// Token refresh calls.
	TokenRefresh,
	/// Health-check probes and retry continuations.
	HealthCheck,
}
impl RateLimitConcern {
	/// Returns a stable label suitable for logs.
	pub const fn as_str(self) -> &'static str {
		match self {
			RateLimitConcern::TokenRefresh => "token_refresh",
			RateLimitConcern::HealthCheck => "health_check",
		}
	}
}

/// Key of one budget window.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RateLimitKey {
	/// Connection the budget belongs to.
	pub connection: ConnectionKey,
	/// Concern being limited.
	pub concern: RateLimitConcern,
}
impl RateLimitKey {
	/// Builds a key for the provided connection and concern.
	pub fn new(connection: ConnectionKey, concern: RateLimitConcern) -> Self {
		Self { connection, concern }
	}
}

/// Attempts recorded in the current window.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RateLimitWindow {
	/// Attempts recorded since the window opened.
	pub attempts: u32,
	/// Instant the window closes and the counter resets.
	pub reset_at: OffsetDateTime,
}
impl RateLimitWindow {
	fn is_open_at(&self, instant: OffsetDateTime) -> bool {
		instant < self.reset_at
	}
}

/// Result of [`RateLimiter::acquire_at`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RateLimitDecision {
	/// The attempt was recorded and may proceed immediately.
	Allow,
	/// The budget is exhausted; nothing was recorded.
	Delay(RetryDirective),
}
impl RateLimitDecision {
	/// Returns `true` for [`RateLimitDecision::Allow`].
	pub fn is_allowed(&self) -> bool {
		matches!(self, RateLimitDecision::Allow)
	}
}

/// Advises callers when to retry after a [`RateLimitDecision::Delay`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryDirective {
	/// Instant when it is safe to retry.
	pub earliest_retry_at: OffsetDateTime,
	/// Time left until the window resets.
	pub recommended_backoff: Duration,
}

/// In-memory fixed-window limiter.
///
/// Once a window holds `window_max` attempts, further attempts are rejected (not queued) until
/// `reset_at`. Checks never block beyond a short map lock.
#[derive(Debug, Default)]
pub struct RateLimiter {
	windows: Mutex<HashMap<RateLimitKey, RateLimitWindow>>,
}
impl RateLimiter {
	/// Creates an empty limiter.
	pub fn new() -> Self {
		Self::default()
	}

	/// Records an attempt at the current time if the budget allows it.
	pub fn try_acquire(&self, key: &RateLimitKey, window_max: u32, window: Duration) -> bool {
		self.try_acquire_at(key, window_max, window, OffsetDateTime::now_utc())
	}

	/// Records an attempt at `instant` if the budget allows it.
	pub fn try_acquire_at(
		&self,
		key: &RateLimitKey,
		window_max: u32,
		window: Duration,
		instant: OffsetDateTime,
	) -> bool {
		self.acquire_at(key, window_max, window, instant).is_allowed()
	}

	/// Records an attempt at `instant` and explains a rejection.
	pub fn acquire_at(
		&self,
		key: &RateLimitKey,
		window_max: u32,
		window: Duration,
		instant: OffsetDateTime,
	) -> RateLimitDecision {
		let mut windows = self.windows.lock();
		let entry = windows
			.entry(key.clone())
			.or_insert(RateLimitWindow { attempts: 0, reset_at: instant + window });

		if !entry.is_open_at(instant) {
			*entry = RateLimitWindow { attempts: 0, reset_at: instant + window };
		}
		if entry.attempts >= window_max {
			return RateLimitDecision::Delay(RetryDirective {
				earliest_retry_at: entry.reset_at,
				recommended_backoff: entry.reset_at - instant,
			});
		}

		entry.attempts += 1;

		RateLimitDecision::Allow
	}

	/// Time left until the window for `key` resets, measured from now.
	pub fn time_until_reset(&self, key: &RateLimitKey) -> Duration {
		self.time_until_reset_at(key, OffsetDateTime::now_utc())
	}

	/// Returns the time left until the window for `key` resets; zero when it is not limited.
	pub fn time_until_reset_at(&self, key: &RateLimitKey, instant: OffsetDateTime) -> Duration {
		self.windows
			.lock()
			.get(key)
			.filter(|window| window.is_open_at(instant))
			.map(|window| window.reset_at - instant)
			.unwrap_or(Duration::ZERO)
	}

	/// Returns `true` when the next attempt at `instant` would be rejected.
	pub fn is_limited_at(&self, key: &RateLimitKey, window_max: u32, instant: OffsetDateTime) -> bool {
		self.windows
			.lock()
			.get(key)
			.is_some_and(|window| window.is_open_at(instant) && window.attempts >= window_max)
	}

	/// Returns a copy of the current window for `key`.
	pub fn window(&self, key: &RateLimitKey) -> Option<RateLimitWindow> {
		self.windows.lock().get(key).copied()
	}

	/// Drops every closed window.
	pub fn prune_at(&self, instant: OffsetDateTime) {
		self.windows.lock().retain(|_, window| window.is_open_at(instant));
	}
}
