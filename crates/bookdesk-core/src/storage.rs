//! Persisted record storage.
//!
//! A [`RecordStore`] holds named JSON documents. [`FileRecordStore`] writes
//! `<dir>/<name>.json` with owner-only permissions (0o600);
//! [`MemoryRecordStore`] keeps everything in a map and is used for ephemeral
//! clients and tests.
//!
//! [`load_record`] never fails: a missing file, unreadable JSON, or a version
//! mismatch all yield `None` (with a warning for the latter two).

use std::collections::HashMap;
use std::path::PathBuf;

use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::errors::StorageError;

/// Read/write contract for named persisted records.
pub trait RecordStore: Send + Sync {
    /// Read the raw contents of a record, `None` if it does not exist.
    fn read(&self, name: &str) -> Result<Option<String>, StorageError>;

    /// Replace the contents of a record.
    fn write(&self, name: &str, contents: &str) -> Result<(), StorageError>;

    /// Delete a record. Deleting a missing record is not an error.
    fn remove(&self, name: &str) -> Result<(), StorageError>;
}

/// A serializable record with a fixed name and schema version.
pub trait VersionedRecord: Serialize + DeserializeOwned {
    /// Record name inside the store.
    const NAME: &'static str;
    /// Schema version this build reads and writes.
    const VERSION: u32;
}

/// Leading fields checked before the full record is decoded.
#[derive(serde::Deserialize)]
struct RecordHeader {
    version: u32,
}

/// Load a versioned record.
///
/// Returns `None` if the record is missing, invalid, or written by another
/// schema version.
pub fn load_record<R: VersionedRecord>(store: &dyn RecordStore) -> Option<R> {
    let data = match store.read(R::NAME) {
        Ok(Some(d)) => d,
        Ok(None) => return None,
        Err(e) => {
            tracing::warn!(record = R::NAME, "failed to read record: {e}");
            return None;
        }
    };

    match serde_json::from_str::<RecordHeader>(&data) {
        Ok(header) if header.version == R::VERSION => {}
        Ok(header) => {
            tracing::warn!(
                record = R::NAME,
                found = header.version,
                expected = R::VERSION,
                "unsupported record version, resetting"
            );
            return None;
        }
        Err(e) => {
            tracing::warn!(record = R::NAME, "failed to parse record: {e}");
            return None;
        }
    }

    match serde_json::from_str::<R>(&data) {
        Ok(record) => Some(record),
        Err(e) => {
            tracing::warn!(record = R::NAME, "failed to decode record: {e}");
            None
        }
    }
}

/// Serialize and write a versioned record.
pub fn save_record<R: VersionedRecord>(
    store: &dyn RecordStore,
    record: &R,
) -> Result<(), StorageError> {
    let json = serde_json::to_string_pretty(record)?;
    store.write(R::NAME, &json)
}

/// Delete a versioned record.
pub fn remove_record<R: VersionedRecord>(store: &dyn RecordStore) -> Result<(), StorageError> {
    store.remove(R::NAME)
}

// ─────────────────────────────────────────────────────────────────────────────
// File store
// ─────────────────────────────────────────────────────────────────────────────

/// Records stored as `<dir>/<name>.json`.
#[derive(Clone, Debug)]
pub struct FileRecordStore {
    dir: PathBuf,
}

impl FileRecordStore {
    /// Create a store rooted at `dir`. The directory is created on first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Path of the file backing `name`.
    pub fn record_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.json"))
    }
}

impl RecordStore for FileRecordStore {
    fn read(&self, name: &str) -> Result<Option<String>, StorageError> {
        match std::fs::read_to_string(self.record_path(name)) {
            Ok(d) => Ok(Some(d)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    fn write(&self, name: &str, contents: &str) -> Result<(), StorageError> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.record_path(name);
        std::fs::write(&path, contents)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            let _ = std::fs::set_permissions(&path, perms);
        }

        Ok(())
    }

    fn remove(&self, name: &str) -> Result<(), StorageError> {
        match std::fs::remove_file(self.record_path(name)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::Io(e)),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Memory store
// ─────────────────────────────────────────────────────────────────────────────

/// Records kept in process memory.
#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    records: Mutex<HashMap<String, String>>,
}

impl MemoryRecordStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// Whether the store holds no records.
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

impl RecordStore for MemoryRecordStore {
    fn read(&self, name: &str) -> Result<Option<String>, StorageError> {
        Ok(self.records.lock().get(name).cloned())
    }

    fn write(&self, name: &str, contents: &str) -> Result<(), StorageError> {
        let _ = self
            .records
            .lock()
            .insert(name.to_string(), contents.to_string());
        Ok(())
    }

    fn remove(&self, name: &str) -> Result<(), StorageError> {
        let _ = self.records.lock().remove(name);
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
