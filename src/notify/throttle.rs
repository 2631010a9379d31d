//! Cooldowns that keep one problem from producing an alert storm.

// self
use crate::{
	_prelude::*,
	connection::{ProviderId, UserId},
	taxonomy::ErrorType,
};

type ThrottleKey = (UserId, ProviderId, ErrorType);

/// Cooldown bookkeeping for one `(user, provider, error_type)` triple.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NotificationThrottleEntry {
	/// Last time a notification was permitted.
	pub last_sent_at: OffsetDateTime,
	/// Instant before which further notifications are suppressed.
	pub cooldown_until: OffsetDateTime,
}

/// Permits at most one notification per triple and cooldown period.
#[derive(Debug)]
pub struct NotificationThrottler {
	cooldown: Duration,
	entries: Mutex<HashMap<ThrottleKey, NotificationThrottleEntry>>,
}
impl NotificationThrottler {
	/// Creates a throttler with the provided cooldown.
	pub fn new(cooldown: Duration) -> Self {
		Self { cooldown, entries: Default::default() }
	}

	/// Returns the configured cooldown.
	pub fn cooldown(&self) -> Duration {
		self.cooldown
	}

	/// Decides at the current time whether a notification may be sent.
	pub fn should_notify(&self, user: &UserId, provider: &ProviderId, error_type: ErrorType) -> bool {
		self.should_notify_at(user, provider, error_type, OffsetDateTime::now_utc())
	}

	/// Decides at `instant` whether a notification may be sent, recording it when permitted.
	///
	/// A cooldown only ever blocks the same error type; a different problem on the same
	/// connection is always reportable.
	pub fn should_notify_at(
		&self,
		user: &UserId,
		provider: &ProviderId,
		error_type: ErrorType,
		instant: OffsetDateTime,
	) -> bool {
		let mut entries = self.entries.lock();
		let key = (user.clone(), provider.clone(), error_type);

		if entries.get(&key).is_some_and(|entry| instant < entry.cooldown_until) {
			return false;
		}

		entries.insert(key, NotificationThrottleEntry {
			last_sent_at: instant,
			cooldown_until: instant + self.cooldown,
		});

		true
	}

	/// Returns the entry for a triple, if one is tracked.
	pub fn entry(
		&self,
		user: &UserId,
		provider: &ProviderId,
		error_type: ErrorType,
	) -> Option<NotificationThrottleEntry> {
		self.entries.lock().get(&(user.clone(), provider.clone(), error_type)).copied()
	}

	/// Forgets every entry for a connection, e.g. after the user reconnected.
	pub fn clear_connection(&self, user: &UserId, provider: &ProviderId) {
		self.entries.lock().retain(|(u, p, _), _| !(u == user && p == provider));
	}

	/// Drops entries whose cooldown elapsed.
	pub fn prune_at(&self, instant: OffsetDateTime) {
		self.entries.lock().retain(|_, entry| instant < entry.cooldown_until);
	}
}

#[cfg(test)]
mod tests {
	// crates.io
	use time::macros;
	// self
	use super::*;

	const T0: OffsetDateTime = macros::datetime!(2025-05-01 10:00 UTC);

	fn ids() -> (UserId, ProviderId) {
		(
			UserId::new("user-1").expect("User fixture should be valid."),
			ProviderId::new("google-drive").expect("Provider fixture should be valid."),
		)
	}

	#[test]
	fn cooldown_blocks_repeats_but_not_new_problems() {
		let throttler = NotificationThrottler::new(Duration::hours(24));
		let (user, provider) = ids();

		assert!(throttler.should_notify_at(&user, &provider, ErrorType::TokenExpired, T0));
		assert!(throttler.should_notify_at(
			&user,
			&provider,
			ErrorType::InsufficientPermissions,
			T0 + Duration::minutes(1)
		));
		assert!(!throttler.should_notify_at(
			&user,
			&provider,
			ErrorType::TokenExpired,
			T0 + Duration::hours(2)
		));
		assert!(throttler.should_notify_at(
			&user,
			&provider,
			ErrorType::TokenExpired,
			T0 + Duration::hours(24)
		));
		assert_eq!(
			throttler
				.entry(&user, &provider, ErrorType::TokenExpired)
				.map(|entry| entry.last_sent_at),
			Some(T0 + Duration::hours(24))
		);
	}

	#[test]
	fn clearing_a_connection_reopens_notifications() {
		let throttler = NotificationThrottler::new(Duration::hours(1));
		let (user, provider) = ids();

		assert!(throttler.should_notify_at(&user, &provider, ErrorType::InvalidRefreshToken, T0));

		throttler.clear_connection(&user, &provider);

		assert!(throttler.should_notify_at(&user, &provider, ErrorType::InvalidRefreshToken, T0));

		throttler.prune_at(T0 + Duration::hours(2));

		assert_eq!(throttler.entry(&user, &provider, ErrorType::InvalidRefreshToken), None);
	}
}
