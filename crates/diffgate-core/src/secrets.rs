//! Credential and registry storage behind one small trait, so handlers
//! never care which backend holds the webhook secret or the protected
//! branch registry.

use crate::error::GateError;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

pub trait SecretStore: Send + Sync {
    /// Fails with a lookup error when the key is unset.
    fn get_secret(&self, key: &str) -> Result<String, GateError>;
    fn set_secret(&self, key: &str, value: &str) -> Result<(), GateError>;
}

/// In-process store. Used in tests and single-node deployments where
/// secrets are seeded at startup.
#[derive(Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }

    pub fn seeded(pairs: &[(&str, &str)]) -> Self {
        let store = MemoryStore::new();
        for (k, v) in pairs {
            let _ = store.set_secret(k, v);
        }
        store
    }
}

impl SecretStore for MemoryStore {
    fn get_secret(&self, key: &str) -> Result<String, GateError> {
        self.values
            .lock()
            .map_err(|_| GateError::SecretStore("store lock poisoned".into()))?
            .get(key)
            .cloned()
            .ok_or_else(|| GateError::SecretLookup(key.to_string()))
    }

    fn set_secret(&self, key: &str, value: &str) -> Result<(), GateError> {
        self.values
            .lock()
            .map_err(|_| GateError::SecretStore("store lock poisoned".into()))?
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// JSON file on disk, one object of key/value pairs. Reads go to the
/// file each time so external writers are picked up; the OS serializes
/// concurrent writers.
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        FileStore { path: path.into() }
    }

    fn read_all(&self) -> Result<HashMap<String, String>, GateError> {
        if !self.path.exists() {
            return Ok(HashMap::new());
        }
        let raw = std::fs::read_to_string(&self.path)?;
        if raw.trim().is_empty() {
            return Ok(HashMap::new());
        }
        serde_json::from_str(&raw)
            .map_err(|e| GateError::SecretStore(format!("corrupt secret file: {e}")))
    }
}

impl SecretStore for FileStore {
    fn get_secret(&self, key: &str) -> Result<String, GateError> {
        self.read_all()?
            .remove(key)
            .ok_or_else(|| GateError::SecretLookup(key.to_string()))
    }

    fn set_secret(&self, key: &str, value: &str) -> Result<(), GateError> {
        let mut all = self.read_all()?;
        all.insert(key.to_string(), value.to_string());
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, serde_json::to_string_pretty(&all)?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_store_round_trips() {
        let store = MemoryStore::new();
        store.set_secret("WEBHOOK_SECRET", "hunter2").unwrap();
        assert_eq!(store.get_secret("WEBHOOK_SECRET").unwrap(), "hunter2");
    }

    #[test]
    fn missing_key_is_a_lookup_error() {
        let store = MemoryStore::new();
        assert!(matches!(
            store.get_secret("NOPE"),
            Err(GateError::SecretLookup(_))
        ));
    }

    #[test]
    fn file_store_persists_between_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secrets.json");

        let store = FileStore::new(&path);
        store.set_secret("TOKEN", "abc").unwrap();
        store.set_secret("OTHER", "def").unwrap();

        let reopened = FileStore::new(&path);
        assert_eq!(reopened.get_secret("TOKEN").unwrap(), "abc");
        assert_eq!(reopened.get_secret("OTHER").unwrap(), "def");
    }

    #[test]
    fn file_store_overwrites_existing_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join("secrets.json"));
        store.set_secret("K", "one").unwrap();
        store.set_secret("K", "two").unwrap();
        assert_eq!(store.get_secret("K").unwrap(), "two");
    }
}
