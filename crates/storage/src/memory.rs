//! In-memory object store

use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use runtime_core::{Error, Result};
use tracing::{debug, instrument};

use crate::backend::{validate_container, validate_key};
use crate::ObjectStore;

/// Process-local object store for tests and dry runs
#[derive(Debug, Default)]
pub struct InMemoryObjectStore {
    /// container -> key -> contents
    objects: RwLock<BTreeMap<String, BTreeMap<String, Bytes>>>,

    /// Every put in arrival order, including overwrites
    puts: RwLock<Vec<(String, String)>>,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Contents of an object, if present
    pub fn get(&self, container: &str, key: &str) -> Option<Bytes> {
        self.objects
            .read()
            .get(container)
            .and_then(|objects| objects.get(key))
            .cloned()
    }

    /// Number of objects currently stored across all containers
    pub fn object_count(&self) -> usize {
        self.objects.read().values().map(BTreeMap::len).sum()
    }

    /// `(container, key)` of every put, in order
    pub fn put_log(&self) -> Vec<(String, String)> {
        self.puts.read().clone()
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    #[instrument(skip(self, local_path), fields(backend = "memory"))]
    async fn put(&self, container: &str, key: &str, local_path: &Path) -> Result<u64> {
        validate_container(container)?;
        validate_key(key)?;

        let data = match tokio::fs::read(local_path).await {
            Ok(data) => Bytes::from(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::StoragePathNotFound {
                    path: local_path.display().to_string(),
                })
            }
            Err(e) => return Err(Error::Io(e)),
        };
        let size = data.len() as u64;

        self.objects
            .write()
            .entry(container.to_string())
            .or_default()
            .insert(key.to_string(), data);
        self.puts
            .write()
            .push((container.to_string(), key.to_string()));

        debug!(container, key, size, "Stored object in memory");
        Ok(size)
    }

    async fn exists(&self, container: &str, key: &str) -> Result<bool> {
        Ok(self.get(container, key).is_some())
    }

    async fn list(&self, container: &str, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .objects
            .read()
            .get(container)
            .map(|objects| {
                objects
                    .keys()
                    .filter(|key| key.starts_with(prefix))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}
