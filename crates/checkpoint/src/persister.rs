//! Checkpoint persister bridging a run's save lifecycle to object storage

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use runtime_core::{Error, Result, UploadReport};
use storage::ObjectStoreHandle;
use tracing::{debug, info, instrument, warn};

use crate::training::{SaveListener, TrainingRun};
use crate::upload::upload_directory;
use crate::Destination;

/// Persister lifecycle state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PersisterState {
    /// Created, not yet listening to a run
    Idle,

    /// Listening to a run's save events
    Attached {
        /// Output directory of the attached run
        output_dir: PathBuf,
    },

    /// Training scope has exited; terminal
    Finalized,
}

impl PersisterState {
    fn name(&self) -> &'static str {
        match self {
            PersisterState::Idle => "Idle",
            PersisterState::Attached { .. } => "Attached",
            PersisterState::Finalized => "Finalized",
        }
    }
}

impl fmt::Display for PersisterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Copies a training run's output directory to object storage.
///
/// Uploads on every save event while attached, and once more from
/// [`finalize`](Self::finalize) when the training scope ends.
pub struct CheckpointPersister {
    destination: Destination,
    store: ObjectStoreHandle,
    state: Mutex<PersisterState>,
}

impl CheckpointPersister {
    /// Create an idle persister uploading to `destination`
    pub fn new(destination: Destination, store: ObjectStoreHandle) -> Arc<Self> {
        Arc::new(Self {
            destination,
            store,
            state: Mutex::new(PersisterState::Idle),
        })
    }

    pub fn destination(&self) -> &Destination {
        &self.destination
    }

    /// Current lifecycle state
    pub fn state(&self) -> PersisterState {
        self.state.lock().clone()
    }

    fn invalid_state(expected: &str, actual: &PersisterState) -> Error {
        Error::InvalidPersisterState {
            expected: vec![expected.to_string()],
            actual: actual.to_string(),
        }
    }

    /// Output directory of the attached run
    fn attached_output_dir(&self) -> Result<PathBuf> {
        match &*self.state.lock() {
            PersisterState::Attached { output_dir } => Ok(output_dir.clone()),
            other => Err(Self::invalid_state("Attached", other)),
        }
    }

    /// Register this persister as a save listener on `run`.
    ///
    /// Uploads nothing.
    pub fn attach<R: TrainingRun + ?Sized>(self: &Arc<Self>, run: &R) -> Result<()> {
        {
            let mut state = self.state.lock();
            if *state != PersisterState::Idle {
                return Err(Self::invalid_state("Idle", &state));
            }
            *state = PersisterState::Attached {
                output_dir: run.output_dir(),
            };
        }

        run.add_save_listener(self.clone());
        info!(destination = %self.destination, "Checkpoint persister attached");
        Ok(())
    }

    /// Upload everything currently under the run's output directory.
    ///
    /// Fails fast on the first file that cannot be uploaded.
    #[instrument(skip(self), fields(destination = %self.destination))]
    pub async fn on_save_event(&self) -> Result<UploadReport> {
        let output_dir = self.attached_output_dir()?;
        debug!(?output_dir, "Save event received");
        upload_directory(self.store.as_ref(), &output_dir, &self.destination).await
    }

    /// End-of-scope persistence.
    ///
    /// Moves to `Finalized` before doing any work. When `persist_final_model`
    /// is set and `run` is the primary, materializes the final model and
    /// uploads the output directory; otherwise does nothing and returns `None`.
    #[instrument(skip(self, run), fields(destination = %self.destination))]
    pub async fn finalize<R: TrainingRun + ?Sized>(
        &self,
        run: &R,
        persist_final_model: bool,
    ) -> Result<Option<UploadReport>> {
        let output_dir = {
            let mut state = self.state.lock();
            let output_dir = match &*state {
                PersisterState::Attached { output_dir } => output_dir.clone(),
                other => return Err(Self::invalid_state("Attached", other)),
            };
            *state = PersisterState::Finalized;
            output_dir
        };

        if !persist_final_model {
            debug!("Final model persistence disabled");
            return Ok(None);
        }
        if !run.is_primary() {
            debug!("Not the primary process; skipping final upload");
            return Ok(None);
        }

        info!(?output_dir, "Materializing final model");
        run.materialize_final_model(&output_dir)
            .await
            .map_err(|e| Error::MaterializationFailed { source: Box::new(e) })?;

        let report = upload_directory(self.store.as_ref(), &output_dir, &self.destination).await?;
        Ok(Some(report))
    }

    /// Move to `Finalized` without any final upload.
    ///
    /// Used when the training scope is dropped before finalize could run.
    pub(crate) fn abandon(&self) {
        let mut state = self.state.lock();
        if let PersisterState::Attached { output_dir } = &*state {
            warn!(
                destination = %self.destination,
                ?output_dir,
                "Training scope dropped before finalize; final model not persisted"
            );
        }
        *state = PersisterState::Finalized;
    }
}

#[async_trait]
impl SaveListener for CheckpointPersister {
    async fn on_save(&self) -> Result<()> {
        if *self.state.lock() == PersisterState::Finalized {
            debug!(destination = %self.destination, "Save event after finalize ignored");
            return Ok(());
        }
        self.on_save_event().await.map(|_| ())
    }
}

impl fmt::Debug for CheckpointPersister {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CheckpointPersister")
            .field("destination", &self.destination)
            .field("state", &*self.state.lock())
            .finish()
    }
}
