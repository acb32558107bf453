//! Directory-to-object-store upload pass

use std::path::{Path, PathBuf};

use runtime_core::{Error, Result, UploadReport};
use storage::ObjectStore;
use tokio::fs;
use tracing::{debug, info, instrument, warn};

use crate::Destination;

/// A regular file found under an output directory
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct LocalFile {
    /// Path relative to the scanned directory, `/`-separated
    pub relative: String,

    /// Absolute (or caller-relative) path on disk
    pub path: PathBuf,
}

/// Recursively collect every regular file under `root`, sorted by relative path.
///
/// Symlinked files are included; symlinked directories are not descended.
/// A missing `root` yields an empty list. A file whose name is not valid
/// UTF-8 fails with [`Error::UploadFailed`] naming that file.
pub async fn collect_files(root: &Path) -> Result<Vec<LocalFile>> {
    let mut files = Vec::new();

    match fs::metadata(root).await {
        Ok(meta) if meta.is_dir() => {}
        Ok(_) => {
            return Err(Error::Storage {
                message: format!("Output path {:?} is not a directory", root),
            })
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(files),
        Err(e) => return Err(Error::Io(e)),
    }

    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let mut entries = fs::read_dir(&dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let file_type = entry.file_type().await?;

            let is_file = if file_type.is_dir() {
                stack.push(path);
                continue;
            } else if file_type.is_symlink() {
                fs::metadata(&path).await.map(|m| m.is_file()).unwrap_or(false)
            } else {
                file_type.is_file()
            };

            if !is_file {
                continue;
            }

            let relative = relative_key(root, &path).map_err(|e| Error::UploadFailed {
                file: path.clone(),
                key: path.strip_prefix(root).unwrap_or(&path).to_string_lossy().to_string(),
                source: Box::new(e),
            })?;
            files.push(LocalFile { relative, path });
        }
    }

    files.sort();
    Ok(files)
}

/// `/`-joined path of `path` relative to `root`
fn relative_key(root: &Path, path: &Path) -> Result<String> {
    let relative = path.strip_prefix(root).map_err(|_| Error::Internal {
        message: format!("{:?} is not under {:?}", path, root),
    })?;

    relative
        .components()
        .map(|c| {
            c.as_os_str().to_str().ok_or_else(|| Error::InvalidObjectKey {
                key: relative.to_string_lossy().to_string(),
            })
        })
        .collect::<Result<Vec<_>>>()
        .map(|segments| segments.join("/"))
}

/// Upload every regular file under `output_dir` to `destination`.
///
/// Files are uploaded one at a time in sorted order. The first failure
/// aborts the pass with [`Error::UploadFailed`]; objects already written
/// stay in place.
#[instrument(skip(store, destination), fields(dest = %destination))]
pub async fn upload_directory(
    store: &dyn ObjectStore,
    output_dir: &Path,
    destination: &Destination,
) -> Result<UploadReport> {
    let mut report = UploadReport::begin(destination.container(), destination.key_prefix());

    let files = collect_files(output_dir).await?;
    if files.is_empty() {
        warn!(?output_dir, "No files to upload");
        return Ok(report.finish());
    }

    for file in files {
        let key = destination.object_key(&file.relative);
        let size = store
            .put(destination.container(), &key, &file.path)
            .await
            .map_err(|e| Error::UploadFailed {
                file: file.path.clone(),
                key: key.clone(),
                source: Box::new(e),
            })?;

        debug!(%key, size, "Uploaded file");
        report.record(key, size);
    }

    let report = report.finish();
    info!(
        container = %report.container,
        objects = report.len(),
        total_bytes = report.total_bytes,
        elapsed_ms = (report.finished_at - report.started_at).num_milliseconds(),
        "Upload pass complete"
    );
    Ok(report)
}
