//! Contracts between a training run and the checkpoint persister

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use runtime_core::Result;

/// Receives a training run's save events
#[async_trait]
pub trait SaveListener: Send + Sync {
    /// Called after the run has written a new checkpoint to its output directory
    async fn on_save(&self) -> Result<()>;
}

/// A training run, as seen by the persister
///
/// The run owns its output directory and decides when to save; the
/// persister only listens and reads.
#[async_trait]
pub trait TrainingRun: Send + Sync {
    /// Register a listener for save events
    fn add_save_listener(&self, listener: Arc<dyn SaveListener>);

    /// Directory the run writes serialized model state to
    fn output_dir(&self) -> PathBuf;

    /// Write the final model state into `output_dir`, returning once it is on disk
    async fn materialize_final_model(&self, output_dir: &Path) -> Result<()>;

    /// Whether this process is the single writer of a distributed job
    fn is_primary(&self) -> bool;
}

/// Save-listener registry a [`TrainingRun`] implementation can embed
#[derive(Default)]
pub struct SaveHooks {
    listeners: RwLock<Vec<Arc<dyn SaveListener>>>,
}

impl SaveHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, listener: Arc<dyn SaveListener>) {
        self.listeners.write().push(listener);
    }

    pub fn len(&self) -> usize {
        self.listeners.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.read().is_empty()
    }

    /// Notify every listener in registration order.
    ///
    /// Stops at the first listener that fails and returns its error.
    pub async fn notify_saved(&self) -> Result<()> {
        // Listeners may register more listeners; don't hold the lock across awaits
        let listeners = self.listeners.read().clone();
        for listener in listeners {
            listener.on_save().await?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for SaveHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SaveHooks")
            .field("listeners", &self.len())
            .finish()
    }
}
