//! Storage - Object store backends for checkpoint uploads
//!
//! Provides async object store operations with support for:
//! - Local filesystem (default feature)
//! - In-memory store for tests and dry runs
//! - Amazon S3 / S3-compatible storage (with `s3` feature)
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use storage::{LocalObjectStore, ObjectStore};
//!
//! # async fn example() -> runtime_core::Result<()> {
//! let store = LocalObjectStore::new("/tmp/object-store");
//! store
//!     .put("bucket-x", "ckpt/step200/model.bin", Path::new("/tmp/run1/step200/model.bin"))
//!     .await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use runtime_core::{Result, StoreConfig};

mod backend;
mod local;
mod memory;

#[cfg(feature = "s3")]
mod s3;

pub use backend::ObjectStore;
pub use local::LocalObjectStore;
pub use memory::InMemoryObjectStore;

#[cfg(feature = "s3")]
pub use s3::{S3Config, S3ObjectStore};

/// Shared handle to an object store
pub type ObjectStoreHandle = Arc<dyn ObjectStore>;

/// Build the object store selected by configuration
pub async fn open_store(config: &StoreConfig) -> Result<ObjectStoreHandle> {
    match config {
        StoreConfig::Local { root } => Ok(Arc::new(LocalObjectStore::new(root))),
        StoreConfig::Memory => Ok(Arc::new(InMemoryObjectStore::new())),
        #[cfg(feature = "s3")]
        StoreConfig::S3 {
            endpoint,
            region,
            force_path_style,
        } => Ok(Arc::new(
            S3ObjectStore::with_config(S3Config {
                endpoint_url: endpoint.clone(),
                region: Some(region.clone()),
                force_path_style: *force_path_style,
            })
            .await,
        )),
        #[cfg(not(feature = "s3"))]
        StoreConfig::S3 { .. } => Err(runtime_core::Error::StorageUnavailable {
            backend: "s3 (crate built without the `s3` feature)".to_string(),
        }),
    }
}
