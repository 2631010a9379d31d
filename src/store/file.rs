//! File-backed [`HealthStore`] that survives process restarts.

// std
use std::{
	fs::{self, File},
	io::Write,
	path::{Path, PathBuf},
};
// self
use crate::{
	_prelude::*,
	connection::{ConnectionKey, UserId},
	health::ConnectionHealthRecord,
	store::{HealthStore, StoreError, StoreFuture},
};

type Snapshot = HashMap<ConnectionKey, ConnectionHealthRecord>;

/// Persists health records to a JSON file after each mutation.
#[derive(Clone, Debug)]
pub struct FileStore {
	path: PathBuf,
	inner: Arc<RwLock<Snapshot>>,
}
impl FileStore {
	/// Opens (or creates) a store at the provided path, eagerly loading existing data.
	pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
		let path = path.into();

		Self::ensure_parent_exists(&path)?;

		let snapshot = Self::load_snapshot(&path)?;

		Ok(Self { path, inner: Arc::new(RwLock::new(snapshot)) })
	}

	/// Returns the backing file path.
	pub fn path(&self) -> &Path {
		&self.path
	}

	fn load_snapshot(path: &Path) -> Result<Snapshot, StoreError> {
		if !path.exists() {
			return Ok(HashMap::new());
		}

		let bytes = fs::read(path).map_err(|e| io_failure("read", path, e))?;

		if bytes.is_empty() {
			return Ok(HashMap::new());
		}

		let records: Vec<ConnectionHealthRecord> =
			serde_json::from_slice(&bytes).map_err(|e| StoreError::Serialization {
				message: format!("Failed to parse {}: {e}", path.display()),
			})?;

		Ok(records.into_iter().map(|record| (record.key.clone(), record)).collect())
	}

	fn ensure_parent_exists(path: &Path) -> Result<(), StoreError> {
		if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
			fs::create_dir_all(parent).map_err(|e| io_failure("create store directory", parent, e))?;
		}

		Ok(())
	}

	fn persist_locked(&self, contents: &Snapshot) -> Result<(), StoreError> {
		let mut records: Vec<_> = contents.values().collect();

		records.sort_by(|a, b| a.key.cmp(&b.key));

		let serialized =
			serde_json::to_vec_pretty(&records).map_err(|e| StoreError::Serialization {
				message: format!("Failed to serialize health snapshot: {e}"),
			})?;
		let mut tmp_path = self.path.clone();

		tmp_path.set_extension("tmp");

		{
			let mut file = File::create(&tmp_path).map_err(|e| io_failure("create", &tmp_path, e))?;

			file.write_all(&serialized).map_err(|e| io_failure("write", &tmp_path, e))?;
			file.sync_all().map_err(|e| io_failure("sync", &tmp_path, e))?;
		}

		fs::rename(&tmp_path, &self.path).map_err(|e| io_failure("replace", &self.path, e))
	}
}
impl HealthStore for FileStore {
	fn save(&self, record: ConnectionHealthRecord) -> StoreFuture<'_, ()> {
		Box::pin(async move {
			let mut guard = self.inner.write();
			let previous = guard.insert(record.key.clone(), record.clone());

			if let Err(e) = self.persist_locked(&guard) {
				// Keep memory consistent with the file when the write fails.
				match previous {
					Some(previous) => guard.insert(record.key, previous),
					None => guard.remove(&record.key),
				};

				return Err(e);
			}

			Ok(())
		})
	}

	fn fetch<'a>(
		&'a self,
		key: &'a ConnectionKey,
	) -> StoreFuture<'a, Option<ConnectionHealthRecord>> {
		Box::pin(async move { Ok(self.inner.read().get(key).cloned()) })
	}

	fn list<'a>(&'a self, user: Option<&'a UserId>) -> StoreFuture<'a, Vec<ConnectionHealthRecord>> {
		Box::pin(async move {
			let guard = self.inner.read();

			Ok(super::sorted_records(guard.values().cloned(), user))
		})
	}
}

fn io_failure(action: &str, path: &Path, e: std::io::Error) -> StoreError {
	StoreError::Backend { message: format!("Failed to {action} {}: {e}", path.display()) }
}

#[cfg(test)]
mod tests {
	// std
	use std::{env, process};
	// crates.io
	use time::macros;
	use tokio::runtime::Runtime;
	// self
	use super::*;
	use crate::{
		connection::{IssuedToken, ProviderId, ProviderKind},
		health::HealthMutation,
	};

	fn temp_path() -> PathBuf {
		let unique = format!(
			"cloud_storage_resilience_file_store_{}_{}.json",
			process::id(),
			OffsetDateTime::now_utc().unix_timestamp_nanos(),
		);

		env::temp_dir().join(unique)
	}

	fn build_record() -> ConnectionHealthRecord {
		let at = macros::datetime!(2025-02-01 09:00 UTC);
		let key = ConnectionKey::new(
			UserId::new("user-demo").expect("Failed to build user fixture."),
			ProviderId::new("google-drive").expect("Failed to build provider fixture."),
		);
		let token = IssuedToken::builder("access-token")
			.refresh_token("refresh-token")
			.issued_at(at)
			.expires_in(Duration::hours(1))
			.build()
			.expect("Failed to build token fixture.");
		let mut record = ConnectionHealthRecord::new(key, ProviderKind::OauthToken, at);

		record.apply(HealthMutation::Connected { token, renewal_lead: Duration::minutes(15), at });

		record
	}

	#[test]
	fn save_and_reload_keeps_token_lifecycle() {
		let path = temp_path();
		let store = FileStore::open(&path).expect("Failed to open file store snapshot.");
		let record = build_record();
		let rt = Runtime::new().expect("Failed to build Tokio runtime for file store test.");

		rt.block_on(store.save(record.clone()))
			.expect("Failed to save fixture record to file store.");
		drop(store);

		let reopened = FileStore::open(&path).expect("Failed to reopen file store snapshot.");
		let fetched = rt
			.block_on(reopened.fetch(&record.key))
			.expect("Failed to fetch fixture record from file store.")
			.expect("File store lost record after reopen.");

		assert_eq!(fetched, record);
		assert_eq!(fetched.refresh_token().map(|secret| secret.expose()), Some("refresh-token"));

		fs::remove_file(&path).unwrap_or_else(|e| {
			panic!("Failed to remove temporary file store snapshot {}: {e}", path.display())
		});
	}

	#[test]
	fn empty_file_opens_as_empty_store() {
		let path = temp_path();

		fs::write(&path, b"").expect("Failed to create empty snapshot.");

		let store = FileStore::open(&path).expect("Empty snapshot should open.");
		let rt = Runtime::new().expect("Failed to build Tokio runtime for file store test.");
		let listed = rt.block_on(store.list(None)).expect("Listing should succeed.");

		assert!(listed.is_empty());
		assert_eq!(store.path(), path.as_path());

		fs::remove_file(&path).unwrap_or_else(|e| {
			panic!("Failed to remove temporary file store snapshot {}: {e}", path.display())
		});
	}
}
