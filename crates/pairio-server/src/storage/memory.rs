//! In-memory storage backend

use super::StorageBackend;
use crate::error::StorageError;
use async_trait::async_trait;
use dashmap::DashMap;

/// In-memory storage backend
#[derive(Debug, Default)]
pub struct MemoryStorage {
    /// (collection, key) -> value
    pairs: DashMap<(String, String), String>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

#[async_trait]
impl StorageBackend for MemoryStorage {
    async fn get(&self, collection: &str, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self
            .pairs
            .get(&(collection.to_string(), key.to_string()))
            .map(|v| v.clone()))
    }

    async fn set(&self, collection: &str, key: &str, value: &str) -> Result<(), StorageError> {
        self.pairs
            .insert((collection.to_string(), key.to_string()), value.to_string());
        Ok(())
    }
}
