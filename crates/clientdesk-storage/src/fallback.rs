use crate::{write_atomic, StorageError};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Local key-value file used when no session exists. Every value is a string;
/// collections are stored as JSON array text under their collection name.
#[derive(Debug, Clone)]
pub struct FallbackStore {
    path: PathBuf,
    entries: BTreeMap<String, String>,
}

impl FallbackStore {
    /// Loads the file at `path`. A missing file starts empty; an unreadable
    /// one is logged and also starts empty.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let path = path.into();
        let entries = if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            match serde_json::from_str::<BTreeMap<String, String>>(&content) {
                Ok(entries) => entries,
                Err(err) => {
                    warn!(
                        event = "parse_fallback",
                        path = %path.display(),
                        error = %err,
                        "fallback file is not a string map; starting empty"
                    );
                    BTreeMap::new()
                }
            }
        } else {
            BTreeMap::new()
        };
        Ok(Self { path, entries })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn set(&mut self, key: &str, value: impl Into<String>) -> Result<(), StorageError> {
        let mut entries = self.entries.clone();
        entries.insert(key.to_string(), value.into());
        self.persist(entries)
    }

    pub fn remove(&mut self, key: &str) -> Result<bool, StorageError> {
        if !self.entries.contains_key(key) {
            return Ok(false);
        }
        let mut entries = self.entries.clone();
        entries.remove(key);
        self.persist(entries)?;
        Ok(true)
    }

    /// Decodes the array stored under `key`. Absent keys and values that do
    /// not decode both yield an empty list; the latter is logged.
    pub fn read_array<T: DeserializeOwned>(&self, key: &str) -> Vec<T> {
        let Some(raw) = self.get(key) else {
            return Vec::new();
        };
        match serde_json::from_str(raw) {
            Ok(items) => items,
            Err(err) => {
                warn!(event = "parse_fallback", key, error = %err);
                Vec::new()
            }
        }
    }

    /// Raw JSON elements under `key`; `None` when the key is absent or the
    /// value is not a JSON array.
    pub fn read_json_array(&self, key: &str) -> Option<Vec<Value>> {
        let raw = self.get(key)?;
        match serde_json::from_str::<Value>(raw) {
            Ok(Value::Array(items)) => Some(items),
            Ok(_) => {
                warn!(event = "parse_fallback", key, "value is not a JSON array");
                None
            }
            Err(err) => {
                warn!(event = "parse_fallback", key, error = %err);
                None
            }
        }
    }

    pub fn write_array<T: Serialize>(
        &mut self,
        key: &str,
        items: &[T],
    ) -> Result<(), StorageError> {
        let payload = serde_json::to_string(items)
            .map_err(|err| StorageError::Serialization(err.to_string()))?;
        self.set(key, payload)
    }

    fn persist(&mut self, entries: BTreeMap<String, String>) -> Result<(), StorageError> {
        let payload = serde_json::to_string_pretty(&entries)
            .map_err(|err| StorageError::Serialization(err.to_string()))?;
        write_atomic(&self.path, &payload)?;
        self.entries = entries;
        Ok(())
    }
}
