//! Persisted key-value preferences
//!
//! Watermarks, the hash salt, coordinate references and membership snapshots
//! all persist through the same small key-value contract. Durability and
//! atomicity of individual writes are the backend's concern; this layer only
//! defines the contract plus two backends: an in-memory store for tests and
//! a JSON-document file store for real deployments.

use crate::error::{ArgusError, Result};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::debug;

/// Key-value persistence contract
///
/// Values are strings; typed accessors are provided on top of the raw
/// contract so backends only implement three methods.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;

    /// Read a signed integer value
    fn get_i64(&self, key: &str) -> Result<Option<i64>> {
        match self.get(key)? {
            Some(raw) => raw
                .parse::<i64>()
                .map(Some)
                .map_err(|e| ArgusError::Store(format!("Malformed integer at {}: {}", key, e))),
            None => Ok(None),
        }
    }

    fn set_i64(&self, key: &str, value: i64) -> Result<()> {
        self.set(key, &value.to_string())
    }

    /// Read a float stored as its decimal rendering
    fn get_f64(&self, key: &str) -> Result<Option<f64>> {
        match self.get(key)? {
            Some(raw) => raw
                .parse::<f64>()
                .map(Some)
                .map_err(|e| ArgusError::Store(format!("Malformed float at {}: {}", key, e))),
            None => Ok(None),
        }
    }

    fn set_f64(&self, key: &str, value: f64) -> Result<()> {
        self.set(key, &value.to_string())
    }

    /// Read a string set stored as a JSON array
    fn get_string_set(&self, key: &str) -> Result<Option<HashSet<String>>> {
        match self.get(key)? {
            Some(raw) => {
                let set: HashSet<String> = serde_json::from_str(&raw)?;
                Ok(Some(set))
            }
            None => Ok(None),
        }
    }

    fn set_string_set(&self, key: &str, value: &HashSet<String>) -> Result<()> {
        let mut sorted: Vec<&String> = value.iter().collect();
        sorted.sort();
        self.set(key, &serde_json::to_string(&sorted)?)
    }
}

/// Volatile store for tests and ephemeral runs
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let values = self
            .values
            .lock()
            .map_err(|e| ArgusError::Store(format!("Lock poisoned: {}", e)))?;
        Ok(values.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut values = self
            .values
            .lock()
            .map_err(|e| ArgusError::Store(format!("Lock poisoned: {}", e)))?;
        values.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut values = self
            .values
            .lock()
            .map_err(|e| ArgusError::Store(format!("Lock poisoned: {}", e)))?;
        values.remove(key);
        Ok(())
    }
}

/// File-backed store holding all keys in one JSON document
///
/// Writes go to a temporary sibling file first and replace the document with
/// a rename, so a crash mid-write leaves the previous document intact.
pub struct JsonFileStore {
    path: PathBuf,
    values: Mutex<BTreeMap<String, String>>,
}

impl JsonFileStore {
    /// Open the store, loading the existing document if present
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let values = if path.exists() {
            let raw = std::fs::read_to_string(&path)?;
            serde_json::from_str(&raw)?
        } else {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            BTreeMap::new()
        };
        debug!("Opened preference store at {}", path.display());
        Ok(Self {
            path,
            values: Mutex::new(values),
        })
    }

    fn flush(&self, values: &BTreeMap<String, String>) -> Result<()> {
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(values)?)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl KeyValueStore for JsonFileStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let values = self
            .values
            .lock()
            .map_err(|e| ArgusError::Store(format!("Lock poisoned: {}", e)))?;
        Ok(values.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut values = self
            .values
            .lock()
            .map_err(|e| ArgusError::Store(format!("Lock poisoned: {}", e)))?;
        values.insert(key.to_string(), value.to_string());
        self.flush(&values)
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut values = self
            .values
            .lock()
            .map_err(|e| ArgusError::Store(format!("Lock poisoned: {}", e)))?;
        if values.remove(key).is_some() {
            self.flush(&values)?;
        }
        Ok(())
    }
}
