//! Thread-safe in-memory [`HealthStore`] implementation for local development and tests.

// self
use crate::{
	_prelude::*,
	connection::{ConnectionKey, UserId},
	health::ConnectionHealthRecord,
	store::{HealthStore, StoreError, StoreFuture},
};

type StoreMap = Arc<RwLock<HashMap<ConnectionKey, ConnectionHealthRecord>>>;

/// Thread-safe storage backend that keeps records in-process for tests and demos.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore(StoreMap);
impl MemoryStore {
	/// Returns the number of stored records.
	pub fn len(&self) -> usize {
		self.0.read().len()
	}

	/// Returns `true` when nothing has been stored yet.
	pub fn is_empty(&self) -> bool {
		self.0.read().is_empty()
	}

	fn save_now(map: StoreMap, record: ConnectionHealthRecord) -> Result<(), StoreError> {
		map.write().insert(record.key.clone(), record);

		Ok(())
	}

	fn fetch_now(map: StoreMap, key: ConnectionKey) -> Option<ConnectionHealthRecord> {
		map.read().get(&key).cloned()
	}

	fn list_now(map: StoreMap, user: Option<UserId>) -> Vec<ConnectionHealthRecord> {
		let guard = map.read();

		super::sorted_records(guard.values().cloned(), user.as_ref())
	}
}
impl HealthStore for MemoryStore {
	fn save(&self, record: ConnectionHealthRecord) -> StoreFuture<'_, ()> {
		let map = self.0.clone();

		Box::pin(async move { Self::save_now(map, record) })
	}

	fn fetch<'a>(
		&'a self,
		key: &'a ConnectionKey,
	) -> StoreFuture<'a, Option<ConnectionHealthRecord>> {
		let map = self.0.clone();
		let key = key.to_owned();

		Box::pin(async move { Ok(Self::fetch_now(map, key)) })
	}

	fn list<'a>(&'a self, user: Option<&'a UserId>) -> StoreFuture<'a, Vec<ConnectionHealthRecord>> {
		let map = self.0.clone();
		let user = user.cloned();

		Box::pin(async move { Ok(Self::list_now(map, user)) })
	}
}
