//! Object store trait definition
//!
//! Defines the async interface that all object store backends must implement.

use std::path::Path;

use async_trait::async_trait;
use runtime_core::{Error, Result};

/// Async trait for object stores
///
/// Objects are addressed by a container (bucket) and a `/`-separated key.
/// Implementations cover the local filesystem, memory, and S3-compatible
/// services.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store the bytes of a local file at the given key
    ///
    /// Any existing object at the key is overwritten.
    ///
    /// # Arguments
    /// * `container` - Container (bucket) name
    /// * `key` - Object key within the container
    /// * `local_path` - File whose contents are uploaded
    ///
    /// # Returns
    /// Number of bytes stored
    ///
    /// # Errors
    /// Returns error if the file cannot be read or the store rejects the write
    async fn put(&self, container: &str, key: &str, local_path: &Path) -> Result<u64>;

    /// Check if an object exists
    async fn exists(&self, container: &str, key: &str) -> Result<bool>;

    /// List all keys in a container under a given prefix
    ///
    /// # Returns
    /// Sorted keys matching the prefix
    async fn list(&self, container: &str, prefix: &str) -> Result<Vec<String>>;
}

/// Reject keys that cannot be mapped onto a filesystem-like namespace
pub(crate) fn validate_key(key: &str) -> Result<()> {
    let invalid = key.is_empty()
        || key.starts_with('/')
        || key.split('/').any(|segment| segment.is_empty() || segment == "..");

    if invalid {
        return Err(Error::InvalidObjectKey {
            key: key.to_string(),
        });
    }
    Ok(())
}

/// Reject container names that are empty or contain separators
pub(crate) fn validate_container(container: &str) -> Result<()> {
    if container.is_empty() || container.contains('/') || container == ".." {
        return Err(Error::Storage {
            message: format!("invalid container name {:?}", container),
        });
    }
    Ok(())
}
