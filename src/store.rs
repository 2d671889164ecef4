//! In-memory key-value store implementation with thread-safe access
//!
//! A single RwLock guards the whole mapping: `get`s share it, `set`s hold it
//! exclusively for the mutation and the snapshot write that follows.

use crate::error::Result;
use crate::snapshot::Snapshot;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::warn;

/// Trait defining the interface for key-value storage operations
pub trait Store: Send + Sync {
    /// Values for the requested keys, in request order; absent keys are skipped
    async fn get(&self, keys: &[String]) -> Vec<(String, Vec<u8>)>;

    /// Insert or overwrite a value. Fails only if the value could not be persisted.
    async fn set(&self, key: String, value: Vec<u8>) -> Result<()>;

    /// Get the number of stored items
    async fn len(&self) -> usize;
}

/// Thread-safe in-memory key-value store
pub struct MemoryStore {
    data: RwLock<HashMap<String, Vec<u8>>>,
    snapshot: Option<Snapshot>,
}

impl MemoryStore {
    /// Create a new memory store without persistence
    pub fn new() -> Self {
        Self {
            data: RwLock::new(HashMap::new()),
            snapshot: None,
        }
    }

    /// Create a memory store backed by `snapshot`, loading whatever it holds
    pub async fn with_snapshot(snapshot: Snapshot) -> Result<Self> {
        let entries = snapshot.load().await?;
        Ok(Self {
            data: RwLock::new(entries),
            snapshot: Some(snapshot),
        })
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Store for MemoryStore {
    async fn get(&self, keys: &[String]) -> Vec<(String, Vec<u8>)> {
        let data = self.data.read().await;
        keys.iter()
            .filter_map(|key| data.get(key).map(|value| (key.clone(), value.clone())))
            .collect()
    }

    async fn set(&self, key: String, value: Vec<u8>) -> Result<()> {
        let mut data = self.data.write().await;
        let previous = data.insert(key.clone(), value);

        // The snapshot is written under the write lock so it always matches memory
        if let Some(snapshot) = &self.snapshot {
            if let Err(e) = snapshot.save(&data).await {
                warn!(key = %key, error = %e, "Snapshot failed, rolling back");
                match previous {
                    Some(previous) => data.insert(key, previous),
                    None => data.remove(&key),
                };
                return Err(e);
            }
        }
        Ok(())
    }

    async fn len(&self) -> usize {
        self.data.read().await.len()
    }
}
