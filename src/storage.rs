//! Plugin data store
//!
//! A small key/value document store: each key holds one JSON value that is
//! read and rewritten as a whole. Callers needing read-modify-write atomicity
//! must serialise access themselves.

use crate::error::StoreError;
use log::debug;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// File name of the JSON document under the data directory
pub const DATA_FILE_NAME: &str = "plugin_data.json";

/// Whole-value key/value persistence
pub trait DataStore: Send + Sync {
    /// Read the value stored under `key`, if any
    fn get(&self, key: &str) -> Result<Option<Value>, StoreError>;

    /// Replace the value stored under `key`
    fn set(&self, key: &str, value: Value) -> Result<(), StoreError>;
}

/// Data store backed by a single pretty-printed JSON object on disk
///
/// Writes go to a temporary file first and are renamed into place, so a crash
/// mid-write leaves the previous document intact.
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    /// Open (or lazily create) the store under `dir`
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Io` if the directory cannot be created.
    pub fn open(dir: &Path) -> Result<Self, StoreError> {
        fs::create_dir_all(dir)?;
        Ok(Self {
            path: dir.join(DATA_FILE_NAME),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<Map<String, Value>, StoreError> {
        if !self.path.exists() {
            return Ok(Map::new());
        }
        let text = fs::read_to_string(&self.path)?;
        if text.trim().is_empty() {
            return Ok(Map::new());
        }
        match serde_json::from_str(&text)? {
            Value::Object(map) => Ok(map),
            other => Err(StoreError::Corrupt(format!(
                "{} holds {} instead of an object",
                self.path.display(),
                json_kind(&other)
            ))),
        }
    }

    fn save(&self, document: &Map<String, Value>) -> Result<(), StoreError> {
        let json = serde_json::to_string_pretty(document)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path)?;
        debug!("Saved plugin data to {}", self.path.display());
        Ok(())
    }
}

impl DataStore for JsonFileStore {
    fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.load()?.remove(key))
    }

    fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
        let mut document = self.load()?;
        document.insert(key.to_string(), value);
        self.save(&document)
    }
}

/// In-memory data store
#[derive(Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DataStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        Ok(self
            .values
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned())
    }

    fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
        self.values
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_string(), value);
        Ok(())
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
