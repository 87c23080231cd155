//! Persisted key-value store.
//!
//! A single JSON object kept in memory and mirrored to one file. Every
//! write is announced on a broadcast channel as `(key, new value)` so
//! other components (the settings store in particular) can follow
//! external edits.

use crate::error::StoreError;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, warn};

pub const TX_BUNDLE_KEY: &str = "txBundle";
pub const TRANSACTION_RECEIPTS_KEY: &str = "transactionReceipts";

const CHANGE_CHANNEL_CAPACITY: usize = 64;

/// One written key and its new value.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreChange {
    pub key: String,
    pub new_value: Value,
}

pub struct Store {
    path: Option<PathBuf>,
    data: Mutex<Map<String, Value>>,
    changes: broadcast::Sender<StoreChange>,
}

impl Store {
    /// Open the store at `path`, starting empty if the file is missing.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let data = read_file(&path).await?;
        debug!(path = %path.display(), keys = data.len(), "Store opened");
        Ok(Self::with_data(Some(path), data))
    }

    /// A store that never touches disk.
    pub fn in_memory() -> Self {
        Self::with_data(None, Map::new())
    }

    fn with_data(path: Option<PathBuf>, data: Map<String, Value>) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            path,
            data: Mutex::new(data),
            changes,
        }
    }

    /// Values of the requested keys that are present.
    pub async fn get(&self, keys: &[&str]) -> Map<String, Value> {
        let data = self.data.lock().await;
        keys.iter()
            .filter_map(|k| data.get(*k).map(|v| (k.to_string(), v.clone())))
            .collect()
    }

    pub async fn get_one(&self, key: &str) -> Option<Value> {
        self.data.lock().await.get(key).cloned()
    }

    /// Write `entries`, flush to disk, then announce each key.
    pub async fn set(&self, entries: Map<String, Value>) -> Result<(), StoreError> {
        {
            let mut data = self.data.lock().await;
            for (key, value) in &entries {
                data.insert(key.clone(), value.clone());
            }
            if let Some(path) = &self.path {
                write_file(path, &data).await?;
            }
        }

        for (key, new_value) in entries {
            // No receivers is fine.
            let _ = self.changes.send(StoreChange { key, new_value });
        }
        Ok(())
    }

    pub async fn set_one(&self, key: &str, value: Value) -> Result<(), StoreError> {
        let mut entries = Map::new();
        entries.insert(key.to_string(), value);
        self.set(entries).await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.changes.subscribe()
    }
}

async fn read_file(path: &Path) -> Result<Map<String, Value>, StoreError> {
    match tokio::fs::read(path).await {
        Ok(bytes) if bytes.is_empty() => Ok(Map::new()),
        Ok(bytes) => match serde_json::from_slice::<Value>(&bytes)? {
            Value::Object(map) => Ok(map),
            _ => Err(StoreError::NotAnObject),
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Map::new()),
        Err(e) => Err(e.into()),
    }
}

async fn write_file(path: &Path, data: &Map<String, Value>) -> Result<(), StoreError> {
    let bytes = serde_json::to_vec_pretty(data)?;
    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, bytes).await?;
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        warn!(path = %path.display(), error = %e, "Store rename failed");
        return Err(e.into());
    }
    Ok(())
}

// ── Tests ───────────────────────────────────────────────────────
