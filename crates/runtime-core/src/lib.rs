//! Runtime Core - Foundation for checkpoint persistence
//!
//! Provides the shared error taxonomy, configuration types and tracing
//! setup used by the storage and checkpoint crates.

pub mod config;
pub mod error;
pub mod logging;
pub mod types;

pub use config::{LoggingConfig, SaverConfig, StoreConfig};
pub use error::{Error, Result};
pub use logging::init_tracing;
pub use types::*;
