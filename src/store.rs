//! Persistence contract and built-in backends for connection health records.

pub mod file;
pub mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

// self
use crate::{
	_prelude::*,
	connection::{ConnectionKey, UserId},
	health::ConnectionHealthRecord,
};

/// Boxed future returned by [`HealthStore`] operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + 'a + Send>>;

/// Storage backend contract for connection health records.
///
/// Backends only need last-writer-wins semantics per key; the engine serializes writers for the
/// same connection before calling [`save`](HealthStore::save).
pub trait HealthStore
where
	Self: Send + Sync,
{
	/// Persists or replaces the record for its connection key.
	fn save(&self, record: ConnectionHealthRecord) -> StoreFuture<'_, ()>;

	/// Fetches the record for the provided key, if present.
	fn fetch<'a>(&'a self, key: &'a ConnectionKey)
	-> StoreFuture<'a, Option<ConnectionHealthRecord>>;

	/// Lists stored records ordered by key, optionally restricted to one user.
	fn list<'a>(&'a self, user: Option<&'a UserId>)
	-> StoreFuture<'a, Vec<ConnectionHealthRecord>>;
}

/// Error type produced by [`HealthStore`] implementations.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum StoreError {
	/// Serialization failures surfaced by the backend.
	#[error("Serialization error: {message}.")]
	Serialization {
		/// Human-readable error payload.
		message: String,
	},
	/// Backend-level failure for the storage engine.
	#[error("Backend failure: {message}.")]
	Backend {
		/// Human-readable error payload.
		message: String,
	},
}

fn sorted_records(
	records: impl Iterator<Item = ConnectionHealthRecord>,
	user: Option<&UserId>,
) -> Vec<ConnectionHealthRecord> {
	let mut selected: Vec<_> =
		records.filter(|record| user.is_none_or(|user| &record.key.user == user)).collect();

	selected.sort_by(|a, b| a.key.cmp(&b.key));

	selected
}
