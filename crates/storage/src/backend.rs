//! Blob store trait definition
//!
//! The engine depends only on this key-value interface. Platform specific
//! persistence (a database, the app sandbox, a remote store) implements it
//! outside of this workspace.

use async_trait::async_trait;

use crate::error::StorageResult;

/// Byte-oriented key-value store
///
/// Implementations must be safe for concurrent use from multiple tasks and
/// must make each individual `set` atomic: a concurrent `get` observes
/// either the old or the new value, never a partial one.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Retrieve the value stored under `key`
    async fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>>;

    /// Store `value` under `key`, overwriting any previous value
    async fn set(&self, key: &str, value: &[u8]) -> StorageResult<()>;

    /// Delete a key. Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> StorageResult<()>;

    /// List all keys starting with `prefix`
    async fn list_keys(&self, prefix: &str) -> StorageResult<Vec<String>>;

    /// Check if a key exists
    async fn contains(&self, key: &str) -> StorageResult<bool> {
        Ok(self.get(key).await?.is_some())
    }
}
