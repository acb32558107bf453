//! Core type definitions shared by storage and checkpoint crates

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Object store container (bucket) name
pub type ContainerName = String;

/// Object key within a container
pub type ObjectKey = String;

/// A single object written during an upload pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadedObject {
    /// Key the file was stored under
    pub key: ObjectKey,

    /// Bytes stored
    pub size_bytes: u64,
}

/// Summary of one upload pass over an output directory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadReport {
    /// Destination container
    pub container: ContainerName,

    /// Key prefix every object was stored under
    pub key_prefix: String,

    /// Objects uploaded, in upload order
    pub objects: Vec<UploadedObject>,

    /// Sum of all object sizes
    pub total_bytes: u64,

    /// When the pass started
    pub started_at: DateTime<Utc>,

    /// When the pass finished
    pub finished_at: DateTime<Utc>,
}

impl UploadReport {
    /// Create an empty report for a pass starting now
    pub fn begin(container: impl Into<ContainerName>, key_prefix: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            container: container.into(),
            key_prefix: key_prefix.into(),
            objects: Vec::new(),
            total_bytes: 0,
            started_at: now,
            finished_at: now,
        }
    }

    /// Record an uploaded object
    pub fn record(&mut self, key: ObjectKey, size_bytes: u64) {
        self.total_bytes += size_bytes;
        self.objects.push(UploadedObject { key, size_bytes });
    }

    /// Stamp the finish time
    pub fn finish(mut self) -> Self {
        self.finished_at = Utc::now();
        self
    }

    /// Number of objects uploaded
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// True if the pass uploaded nothing
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Keys uploaded, in upload order
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.objects.iter().map(|o| o.key.as_str())
    }
}
