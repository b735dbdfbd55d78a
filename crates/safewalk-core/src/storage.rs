//! Persistent key-value storage backing the contact store and the location cache.
//!
//! The core only needs `get`/`set` on a handful of string keys, so the store
//! is a flat map persisted as a single JSON document.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// File name of the key-value document inside the data directory.
pub const STORE_FILE_NAME: &str = "store.json";

/// Keys understood by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum StoreKey {
    /// Display name used in the alert message.
    #[serde(rename = "username")]
    Username,
    /// First emergency contact.
    #[serde(rename = "contact1")]
    Contact1,
    /// Second emergency contact.
    #[serde(rename = "contact2")]
    Contact2,
    /// Last successfully captured coordinate, serialized as JSON.
    #[serde(rename = "lastLocation")]
    LastLocation,
}

impl StoreKey {
    /// The persisted key name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Username => "username",
            Self::Contact1 => "contact1",
            Self::Contact2 => "contact2",
            Self::LastLocation => "lastLocation",
        }
    }
}

impl fmt::Display for StoreKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised by a [`KeyValueStore`].
#[derive(Debug, Error)]
pub enum StoreError {
    /// Reading or writing the backing file failed.
    #[error("store I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// The backing file is not valid JSON.
    #[error("store file {} is corrupt: {source}", path.display())]
    Corrupt {
        /// Backing file.
        path: PathBuf,
        /// Parse error.
        #[source]
        source: serde_json::Error,
    },

    /// A value could not be encoded or decoded.
    #[error("failed to encode value for {key}: {source}")]
    Encoding {
        /// Key being accessed.
        key: StoreKey,
        /// Serialization error.
        #[source]
        source: serde_json::Error,
    },

    /// The in-process lock was poisoned by a panicking writer.
    #[error("store lock poisoned")]
    Poisoned,
}

/// Result type for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// String key-value storage used by the contact store and the location resolver.
pub trait KeyValueStore: Send + Sync {
    /// Read a value. Absent keys yield `Ok(None)`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing storage cannot be read.
    fn get(&self, key: StoreKey) -> StoreResult<Option<String>>;

    /// Write a value, replacing any previous one.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing storage cannot be written.
    fn set(&self, key: StoreKey, value: &str) -> StoreResult<()> {
        self.set_many(&[(key, value)])
    }

    /// Write several values as one update. Either all of them are stored or
    /// none are.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing storage cannot be written.
    fn set_many(&self, entries: &[(StoreKey, &str)]) -> StoreResult<()>;
}

/// In-memory store, used in tests and when no data directory is available.
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: RwLock<BTreeMap<StoreKey, String>>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: StoreKey) -> StoreResult<Option<String>> {
        let values = self.values.read().map_err(|_| StoreError::Poisoned)?;
        Ok(values.get(&key).cloned())
    }

    fn set_many(&self, entries: &[(StoreKey, &str)]) -> StoreResult<()> {
        let mut values = self.values.write().map_err(|_| StoreError::Poisoned)?;
        for (key, value) in entries {
            values.insert(*key, (*value).to_string());
        }
        Ok(())
    }
}

/// JSON-file backed store.
///
/// The whole document is rewritten on every update; writes go to a temporary
/// file first and are renamed into place. A failed write leaves the in-memory
/// view unchanged. Calls block on file I/O, so async callers should run them
/// on the blocking pool.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    values: RwLock<BTreeMap<String, String>>,
}

impl FileStore {
    /// Open (or lazily create) the store at `data_dir/store.json`.
    ///
    /// # Errors
    ///
    /// Returns an error if an existing file cannot be read or parsed.
    pub fn open(data_dir: impl AsRef<Path>) -> StoreResult<Self> {
        let path = data_dir.as_ref().join(STORE_FILE_NAME);
        let values = if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            serde_json::from_str(&content).map_err(|source| StoreError::Corrupt {
                path: path.clone(),
                source,
            })?
        } else {
            BTreeMap::new()
        };
        tracing::debug!(path = %path.display(), keys = values.len(), "Opened key-value store");

        Ok(Self {
            path,
            values: RwLock::new(values),
        })
    }

    /// Path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, values: &BTreeMap<String, String>) -> StoreResult<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(values).map_err(std::io::Error::other)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, content)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: StoreKey) -> StoreResult<Option<String>> {
        let values = self.values.read().map_err(|_| StoreError::Poisoned)?;
        Ok(values.get(key.as_str()).cloned())
    }

    fn set_many(&self, entries: &[(StoreKey, &str)]) -> StoreResult<()> {
        let mut values = self.values.write().map_err(|_| StoreError::Poisoned)?;
        let mut updated = values.clone();
        for (key, value) in entries {
            updated.insert(key.as_str().to_string(), (*value).to_string());
        }
        self.persist(&updated)?;
        *values = updated;
        Ok(())
    }
}

/// Get the default data directory.
///
/// On Linux: `/var/lib/safewalk/`
/// Elsewhere: the platform data directory, e.g. `~/.local/share/safewalk/`.
#[must_use]
pub fn default_data_dir() -> PathBuf {
    #[cfg(target_os = "linux")]
    {
        PathBuf::from("/var/lib/safewalk")
    }
    #[cfg(not(target_os = "linux"))]
    {
        directories::ProjectDirs::from("", "", "safewalk").map_or_else(
            || PathBuf::from("./data"),
            |dirs| dirs.data_dir().to_path_buf(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_memory_store_get_set() {
        let store = MemoryStore::new();
        assert_eq!(store.get(StoreKey::Username).unwrap(), None);

        store.set(StoreKey::Username, "alice").unwrap();
        store.set(StoreKey::Username, "bob").unwrap();
        assert_eq!(store.get(StoreKey::Username).unwrap().as_deref(), Some("bob"));
    }

    #[test]
    fn test_file_store_persists_across_opens() {
        let dir = TempDir::new().unwrap();

        let store = FileStore::open(dir.path()).unwrap();
        store.set(StoreKey::Contact1, "5551234567").unwrap();
        store.set(StoreKey::LastLocation, r#"{"latitude":1.0}"#).unwrap();
        drop(store);

        let reopened = FileStore::open(dir.path()).unwrap();
        assert_eq!(
            reopened.get(StoreKey::Contact1).unwrap().as_deref(),
            Some("5551234567")
        );
        assert!(reopened.get(StoreKey::Contact2).unwrap().is_none());

        let raw = std::fs::read_to_string(reopened.path()).unwrap();
        assert!(raw.contains("\"lastLocation\""));
    }

    #[test]
    fn test_file_store_batch_is_all_or_nothing() {
        let dir = TempDir::new().unwrap();
        let blocked = dir.path().join("blocked");
        let store = FileStore::open(blocked.join("data")).unwrap();
        std::fs::write(&blocked, "not a directory").unwrap();

        let result = store.set_many(&[
            (StoreKey::Username, "Alex"),
            (StoreKey::Contact1, "5551234567"),
        ]);
        assert!(matches!(result, Err(StoreError::Io(_))));
        assert!(store.get(StoreKey::Username).unwrap().is_none());
        assert!(store.get(StoreKey::Contact1).unwrap().is_none());
    }

    #[test]
    fn test_file_store_rejects_corrupt_file() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(STORE_FILE_NAME), "not json").unwrap();

        assert!(matches!(
            FileStore::open(dir.path()),
            Err(StoreError::Corrupt { .. })
        ));
    }

    #[test]
    fn test_key_names() {
        assert_eq!(StoreKey::LastLocation.to_string(), "lastLocation");
        assert_eq!(StoreKey::Contact2.as_str(), "contact2");
    }
}
