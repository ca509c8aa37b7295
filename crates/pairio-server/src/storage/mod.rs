//! Key/value storage backends
//!
//! The admission engine only calls into storage after a ticket is admitted.
//! Backends are keyed by `(collection, key)` and overwrite on set.

mod memory;

pub use memory::MemoryStorage;

use crate::error::StorageError;
use async_trait::async_trait;
use std::sync::Arc;

/// Storage backend trait for key/value persistence
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Look up a value; `None` when the key has never been set
    async fn get(&self, collection: &str, key: &str) -> Result<Option<String>, StorageError>;

    /// Insert or overwrite a value
    async fn set(&self, collection: &str, key: &str, value: &str) -> Result<(), StorageError>;
}

/// Type alias for storage backend
pub type Storage = Arc<dyn StorageBackend>;

/// Create a storage backend from configuration
pub fn create_storage(config: &crate::config::StorageConfig) -> Storage {
    match config {
        crate::config::StorageConfig::Memory => Arc::new(MemoryStorage::new()),
    }
}
