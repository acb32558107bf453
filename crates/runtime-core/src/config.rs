//! Checkpoint saver configuration types

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Main saver configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SaverConfig {
    /// Destination URI, e.g. `store://my-bucket/runs/42`
    pub destination: String,

    /// Materialize and upload the final model when the training scope exits
    pub persist_final_model: bool,

    /// Object store backend
    pub store: StoreConfig,

    /// Logging settings
    pub logging: LoggingConfig,
}

impl Default for SaverConfig {
    fn default() -> Self {
        Self {
            destination: String::new(),
            persist_final_model: true,
            store: StoreConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl SaverConfig {
    /// Parse a configuration from JSON and validate it
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the configuration for values that can never work
    pub fn validate(&self) -> Result<()> {
        if self.destination.trim().is_empty() {
            return Err(Error::InvalidConfig {
                message: "destination must not be empty".to_string(),
            });
        }

        match &self.store {
            StoreConfig::Local { root } if root.trim().is_empty() => Err(Error::InvalidConfig {
                message: "local store root must not be empty".to_string(),
            }),
            StoreConfig::S3 { region, .. } if region.trim().is_empty() => {
                Err(Error::InvalidConfig {
                    message: "s3 region must not be empty".to_string(),
                })
            }
            _ => Ok(()),
        }
    }
}

/// Object store backend selection
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum StoreConfig {
    /// Local filesystem; each container is a directory under `root`
    Local { root: String },

    /// Process-local in-memory store
    Memory,

    /// S3-compatible storage
    S3 {
        /// Custom endpoint (MinIO, LocalStack, ...)
        endpoint: Option<String>,
        region: String,
        /// Path-style addressing, required by MinIO
        #[serde(default)]
        force_path_style: bool,
    },
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig::Local {
            root: "./object-store".to_string(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter used when `RUST_LOG` is not set
    pub default_filter: String,

    /// Colored output
    pub ansi: bool,

    /// Include the event target in each line
    pub with_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            default_filter: "checkpoint=info,storage=info,runtime_core=info".to_string(),
            ansi: true,
            with_target: true,
        }
    }
}
