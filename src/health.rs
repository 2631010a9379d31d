//! Connection health bookkeeping with atomic, per-connection mutations.

pub mod record;

pub use record::*;

// self
use crate::{
	_prelude::*,
	connection::{ConnectionKey, ProviderKind, UserId},
	store::{HealthStore, MemoryStore},
};

type GuardMap = Arc<Mutex<HashMap<ConnectionKey, Arc<AsyncMutex<()>>>>>;

/// Durable per-connection health records backed by a [`HealthStore`].
///
/// Every mutation runs as read-modify-write under a per-connection async guard, so concurrent
/// callers never lose increments or partially observe a transition.
#[derive(Clone)]
pub struct ConnectionHealthStore {
	backend: Arc<dyn HealthStore>,
	guards: GuardMap,
}
impl ConnectionHealthStore {
	/// Wraps the provided backend.
	pub fn new(backend: Arc<dyn HealthStore>) -> Self {
		Self { backend, guards: Default::default() }
	}

	/// Creates a store backed by a fresh [`MemoryStore`].
	pub fn in_memory() -> Self {
		Self::new(Arc::new(MemoryStore::default()))
	}

	/// Returns the record for `key`, creating and persisting the default record if absent.
	pub async fn get(&self, key: &ConnectionKey, kind: ProviderKind) -> Result<ConnectionHealthRecord> {
		if let Some(record) = self.peek(key).await? {
			return Ok(record);
		}

		let guard = self.guard(key);
		let _exclusive = guard.lock().await;

		// Another writer may have created the record while we waited.
		if let Some(record) = self.peek(key).await? {
			return Ok(record);
		}

		let record = ConnectionHealthRecord::new(key.clone(), kind, OffsetDateTime::now_utc());

		self.backend.save(record.clone()).await?;

		Ok(record)
	}

	/// Returns the stored record without creating one.
	pub async fn peek(&self, key: &ConnectionKey) -> Result<Option<ConnectionHealthRecord>> {
		Ok(self.backend.fetch(key).await?)
	}

	/// Applies `mutation` atomically and returns the resulting record.
	///
	/// A missing record is created with `kind` before the mutation is applied.
	pub async fn update(
		&self,
		key: &ConnectionKey,
		kind: ProviderKind,
		mutation: HealthMutation,
	) -> Result<ConnectionHealthRecord> {
		let guard = self.guard(key);
		let _exclusive = guard.lock().await;
		let mut record = match self.backend.fetch(key).await? {
			Some(record) => record,
			None => ConnectionHealthRecord::new(key.clone(), kind, OffsetDateTime::now_utc()),
		};

		record.apply(mutation);
		self.backend.save(record.clone()).await?;

		Ok(record)
	}

	/// Lists stored records, optionally restricted to one user.
	pub async fn list(&self, user: Option<&UserId>) -> Result<Vec<ConnectionHealthRecord>> {
		Ok(self.backend.list(user).await?)
	}

	/// Returns the consolidated status; unknown connections report `not_connected`.
	pub async fn consolidate(&self, key: &ConnectionKey) -> Result<ConsolidatedStatus> {
		Ok(self
			.peek(key)
			.await?
			.map(|record| record.consolidate())
			.unwrap_or(ConsolidatedStatus::NotConnected))
	}

	/// Drops per-connection guards nobody holds or waits on.
	pub fn prune_idle_guards(&self) {
		self.guards.lock().retain(|_, guard| Arc::strong_count(guard) > 1);
	}

	fn guard(&self, key: &ConnectionKey) -> Arc<AsyncMutex<()>> {
		let mut guards = self.guards.lock();

		guards.entry(key.clone()).or_insert_with(|| Arc::new(AsyncMutex::new(()))).clone()
	}
}
impl Debug for ConnectionHealthStore {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("ConnectionHealthStore")
			.field("tracked_guards", &self.guards.lock().len())
			.finish()
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::{connection::ProviderId, taxonomy::ErrorType};

	fn key() -> ConnectionKey {
		ConnectionKey::new(
			UserId::new("user-1").expect("User fixture should be valid."),
			ProviderId::new("amazon-s3").expect("Provider fixture should be valid."),
		)
	}

	#[tokio::test]
	async fn get_creates_default_record_once() {
		let store = ConnectionHealthStore::in_memory();
		let first = store.get(&key(), ProviderKind::KeySecret).await.expect("Get should succeed.");
		let second = store.get(&key(), ProviderKind::KeySecret).await.expect("Get should succeed.");

		assert_eq!(first, second);
		assert_eq!(first.consolidate(), ConsolidatedStatus::NotConnected);
		assert_eq!(
			store.consolidate(&key()).await.expect("Consolidate should succeed."),
			ConsolidatedStatus::NotConnected
		);
	}

	#[tokio::test]
	async fn concurrent_failures_are_not_lost() {
		let store = ConnectionHealthStore::in_memory();
		let mut tasks = Vec::new();

		for _ in 0..32 {
			let store = store.clone();

			tasks.push(tokio::spawn(async move {
				store
					.update(&key(), ProviderKind::KeySecret, HealthMutation::OperationFailed {
						error_type: ErrorType::NetworkError,
						message: "reset by peer".into(),
						context: BTreeMap::new(),
						at: OffsetDateTime::now_utc(),
						manual_intervention_threshold: 100,
					})
					.await
					.expect("Update should succeed.")
			}));
		}

		for task in tasks {
			task.await.expect("Update task should not panic.");
		}

		let record = store
			.peek(&key())
			.await
			.expect("Peek should succeed.")
			.expect("Record should exist after updates.");

		assert_eq!(record.consecutive_failures, 32);
		assert_eq!(record.last_error_type, Some(ErrorType::NetworkError));
	}

	#[tokio::test]
	async fn idle_guards_are_pruned() {
		let store = ConnectionHealthStore::in_memory();

		store
			.update(&key(), ProviderKind::KeySecret, HealthMutation::OperationSucceeded {
				at: OffsetDateTime::now_utc(),
			})
			.await
			.expect("Update should succeed.");

		let held = store.guard(&key());

		store.prune_idle_guards();

		assert_eq!(store.guards.lock().len(), 1);

		drop(held);
		store.prune_idle_guards();

		assert!(store.guards.lock().is_empty());
	}
}
