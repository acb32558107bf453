//! Checkpoint persistence for training runs
//!
//! Copies a training run's output directory to object storage whenever the
//! run saves a checkpoint, and once more when the training scope ends.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use checkpoint::{CheckpointSaver, Destination, TrainingRun};
//! use storage::LocalObjectStore;
//!
//! # async fn example(run: &dyn TrainingRun) -> runtime_core::Result<()> {
//! let saver = CheckpointSaver::new(
//!     Destination::parse("store://bucket-x/ckpt")?,
//!     Arc::new(LocalObjectStore::new("/tmp/object-store")),
//! );
//!
//! saver
//!     .run(run, || async {
//!         // train, letting the run fire save events
//!         Ok::<_, runtime_core::Error>(())
//!     })
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod destination;
pub mod persister;
pub mod saver;
pub mod training;
pub mod upload;

pub use destination::Destination;
pub use persister::{CheckpointPersister, PersisterState};
pub use saver::CheckpointSaver;
pub use training::{SaveHooks, SaveListener, TrainingRun};
pub use upload::{collect_files, upload_directory, LocalFile};
