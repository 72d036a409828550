use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{StoreError, TokenStore};

/// Application name used for the cache directory path
const APP_NAME: &str = "fintrack";

/// Session file name in cache directory
const SESSION_FILE: &str = "session.json";

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreContents {
    #[serde(default)]
    entries: BTreeMap<String, String>,
    updated_at: Option<DateTime<Utc>>,
}

/// Stores session keys in a single JSON file.
///
/// Every write rewrites the whole file; the mutex serializes
/// read-modify-write cycles within the process.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// Store in `<cache dir>/fintrack/session.json`
    pub fn default_location() -> Result<Self, StoreError> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| StoreError::Location("could not find cache directory".to_string()))?;
        Ok(Self::in_dir(cache_dir.join(APP_NAME)))
    }

    /// Store in `<dir>/session.json`
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        Self::new(dir.as_ref().join(SESSION_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<StoreContents, StoreError> {
        if !self.path.exists() {
            return Ok(StoreContents::default());
        }
        let contents = std::fs::read_to_string(&self.path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    fn save(&self, mut contents: StoreContents) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        contents.updated_at = Some(Utc::now());
        let serialized = serde_json::to_string_pretty(&contents)?;
        std::fs::write(&self.path, serialized)?;
        debug!(path = %self.path.display(), keys = contents.entries.len(), "Session file written");
        Ok(())
    }

    /// When the file was last written, if it exists
    pub fn updated_at(&self) -> Result<Option<DateTime<Utc>>, StoreError> {
        let _guard = self.lock.lock().expect("Failed to acquire store lock");
        Ok(self.load()?.updated_at)
    }
}

impl TokenStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let _guard = self.lock.lock().expect("Failed to acquire store lock");
        Ok(self.load()?.entries.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let _guard = self.lock.lock().expect("Failed to acquire store lock");
        let mut contents = self.load()?;
        contents.entries.insert(key.to_string(), value.to_string());
        self.save(contents)
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        let _guard = self.lock.lock().expect("Failed to acquire store lock");
        let mut contents = self.load()?;
        if contents.entries.remove(key).is_none() {
            return Ok(());
        }
        self.save(contents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY, USER_KEY};

    #[test]
    fn test_missing_file_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::in_dir(dir.path());
        assert_eq!(store.get(ACCESS_TOKEN_KEY).unwrap(), None);
        assert_eq!(store.updated_at().unwrap(), None);
        // Removing from a missing file does not create it
        store.remove(ACCESS_TOKEN_KEY).unwrap();
        assert!(!store.path().exists());
    }

    #[test]
    fn test_values_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("nested").join("deeper");

        let store = FileStore::in_dir(&nested);
        store.set(ACCESS_TOKEN_KEY, "a1").unwrap();
        store.set(REFRESH_TOKEN_KEY, "r1").unwrap();
        assert!(store.updated_at().unwrap().is_some());

        let reopened = FileStore::in_dir(&nested);
        assert_eq!(reopened.get(ACCESS_TOKEN_KEY).unwrap().as_deref(), Some("a1"));
        assert_eq!(reopened.get(REFRESH_TOKEN_KEY).unwrap().as_deref(), Some("r1"));
    }

    #[test]
    fn test_clear_session() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::in_dir(dir.path());
        store.set(ACCESS_TOKEN_KEY, "a1").unwrap();
        store.set(REFRESH_TOKEN_KEY, "r1").unwrap();
        store.set(USER_KEY, "{\"id\":1}").unwrap();

        store.clear_session().unwrap();

        assert_eq!(store.get(ACCESS_TOKEN_KEY).unwrap(), None);
        assert_eq!(store.get(REFRESH_TOKEN_KEY).unwrap(), None);
        assert_eq!(store.get(USER_KEY).unwrap(), None);
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::in_dir(dir.path());
        std::fs::write(store.path(), "not json").unwrap();
        assert!(matches!(store.get(ACCESS_TOKEN_KEY), Err(StoreError::Serialization(_))));
    }
}
