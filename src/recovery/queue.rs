//! Scheduled retry continuations, one per connection.

// self
use crate::{
	_prelude::*,
	connection::ConnectionKey,
	recovery::RecoveryStrategy,
	taxonomy::ErrorType,
};

/// A recovery step waiting for the sweep to run it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledRetry {
	/// Connection to retry.
	pub key: ConnectionKey,
	/// Strategy that scheduled the retry.
	pub strategy: RecoveryStrategy,
	/// Error that started the episode.
	pub error_type: ErrorType,
	/// Attempt number the retry will be.
	pub attempt_number: u32,
	/// Attempt budget of the episode; `None` for uncapped quota waits.
	pub max_attempts: Option<u32>,
	/// Earliest instant the retry may run.
	pub next_eligible_at: OffsetDateTime,
	/// The episode exhausted its retries; this entry starts a new one.
	pub exhausted: bool,
}

/// Pending retries keyed by connection; scheduling replaces an existing entry.
#[derive(Debug, Default)]
pub struct RetryQueue(Mutex<BTreeMap<ConnectionKey, ScheduledRetry>>);
impl RetryQueue {
	/// Schedules (or reschedules) the retry for its connection.
	pub fn schedule(&self, retry: ScheduledRetry) {
		self.0.lock().insert(retry.key.clone(), retry);
	}

	/// Removes and returns every retry due at `instant`, earliest first.
	pub fn take_due(&self, instant: OffsetDateTime) -> Vec<ScheduledRetry> {
		let mut queue = self.0.lock();
		let due_keys: Vec<_> = queue
			.values()
			.filter(|retry| retry.next_eligible_at <= instant)
			.map(|retry| retry.key.clone())
			.collect();
		let mut due: Vec<_> = due_keys.iter().filter_map(|key| queue.remove(key)).collect();

		due.sort_by_key(|retry| retry.next_eligible_at);

		due
	}

	/// Returns the pending retry for a connection.
	pub fn get(&self, key: &ConnectionKey) -> Option<ScheduledRetry> {
		self.0.lock().get(key).cloned()
	}

	/// Drops the pending retry for a connection.
	pub fn cancel(&self, key: &ConnectionKey) -> Option<ScheduledRetry> {
		self.0.lock().remove(key)
	}

	/// Returns the number of pending retries.
	pub fn len(&self) -> usize {
		self.0.lock().len()
	}

	/// Returns `true` when nothing is pending.
	pub fn is_empty(&self) -> bool {
		self.0.lock().is_empty()
	}
}
