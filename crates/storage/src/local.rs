//! Local filesystem object store
//!
//! Maps each container onto a directory under a root and writes objects
//! atomically to prevent partial/corrupt files.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use runtime_core::{Error, Result};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::backend::{validate_container, validate_key};
use crate::ObjectStore;

/// Local filesystem object store
///
/// Objects live at `<root>/<container>/<key>`, with:
/// - Atomic writes (write to .tmp, then rename)
/// - Automatic directory creation
/// - Recursive key listing
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    /// Directory holding one subdirectory per container
    root: PathBuf,
}

impl LocalObjectStore {
    /// Create a new LocalObjectStore rooted at `root`
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Get the root path
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Filesystem path an object is stored at
    pub fn object_path(&self, container: &str, key: &str) -> PathBuf {
        key.split('/')
            .fold(self.root.join(container), |path, segment| path.join(segment))
    }

    /// Generate a unique temporary file path next to the target
    fn temp_path(target: &Path) -> PathBuf {
        let temp_name = format!(
            ".{}.{}.tmp",
            target.file_name().unwrap_or_default().to_string_lossy(),
            Uuid::new_v4()
        );
        target.with_file_name(temp_name)
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    #[instrument(skip(self, local_path), fields(backend = "local"))]
    async fn put(&self, container: &str, key: &str, local_path: &Path) -> Result<u64> {
        validate_container(container)?;
        validate_key(key)?;

        let data = match fs::read(local_path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::StoragePathNotFound {
                    path: local_path.display().to_string(),
                })
            }
            Err(e) => return Err(Error::Io(e)),
        };

        let target = self.object_path(container, key);
        let temp_path = Self::temp_path(&target);
        let size = data.len() as u64;

        debug!(?target, ?temp_path, size, "Writing object atomically");

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::Storage {
                    message: format!("Failed to create directory {:?}: {}", parent, e),
                })?;
        }

        let mut file = fs::File::create(&temp_path)
            .await
            .map_err(|e| Error::Storage {
                message: format!("Failed to create temp file {:?}: {}", temp_path, e),
            })?;

        file.write_all(&data).await.map_err(|e| Error::Storage {
            message: format!("Failed to write data: {}", e),
        })?;

        file.sync_all().await.map_err(|e| Error::Storage {
            message: format!("Failed to sync file: {}", e),
        })?;

        fs::rename(&temp_path, &target)
            .await
            .map_err(|e| Error::Storage {
                message: format!("Failed to rename {:?} to {:?}: {}", temp_path, target, e),
            })?;

        debug!(?target, size, "Object written successfully");
        Ok(size)
    }

    #[instrument(skip(self), fields(backend = "local"))]
    async fn exists(&self, container: &str, key: &str) -> Result<bool> {
        validate_container(container)?;
        validate_key(key)?;
        let path = self.object_path(container, key);
        Ok(fs::metadata(&path).await.map(|m| m.is_file()).unwrap_or(false))
    }

    #[instrument(skip(self), fields(backend = "local"))]
    async fn list(&self, container: &str, prefix: &str) -> Result<Vec<String>> {
        validate_container(container)?;
        let container_root = self.root.join(container);
        let mut results = Vec::new();

        debug!(?container_root, prefix, "Listing objects with prefix");

        let mut stack = vec![container_root.clone()];
        while let Some(dir) = stack.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(_) => continue,
            };

            while let Ok(Some(entry)) = entries.next_entry().await {
                let entry_path = entry.path();
                let file_type = match entry.file_type().await {
                    Ok(t) => t,
                    Err(_) => continue,
                };

                if file_type.is_dir() {
                    stack.push(entry_path);
                } else if file_type.is_file() {
                    let name = entry.file_name().to_string_lossy().to_string();
                    // In-flight atomic writes
                    if name.starts_with('.') && name.ends_with(".tmp") {
                        continue;
                    }
                    if let Ok(relative) = entry_path.strip_prefix(&container_root) {
                        let key = relative
                            .components()
                            .map(|c| c.as_os_str().to_string_lossy())
                            .collect::<Vec<_>>()
                            .join("/");
                        if key.starts_with(prefix) {
                            results.push(key);
                        }
                    }
                }
            }
        }

        results.sort();
        debug!(count = results.len(), "Found objects");
        Ok(results)
    }
}
