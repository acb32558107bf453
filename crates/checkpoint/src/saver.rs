//! Scoped checkpoint saving
//!
//! [`CheckpointSaver::run`] attaches a persister to a training run, runs the
//! training body, and always finalizes afterwards, including when the body
//! fails or panics.

use std::any::Any;
use std::future::Future;
use std::panic::{catch_unwind, resume_unwind, AssertUnwindSafe};
use std::pin::Pin;
use std::task::{Context, Poll};

use runtime_core::{Error, Result, SaverConfig};
use storage::{open_store, ObjectStoreHandle};
use tracing::{error, warn};

use crate::training::TrainingRun;
use crate::{CheckpointPersister, Destination};

/// Runs a training scope with guaranteed checkpoint persistence on exit
#[derive(Clone)]
pub struct CheckpointSaver {
    destination: Destination,
    store: ObjectStoreHandle,
    persist_final_model: bool,
}

impl CheckpointSaver {
    /// Saver that persists the final model on exit
    pub fn new(destination: Destination, store: ObjectStoreHandle) -> Self {
        Self {
            destination,
            store,
            persist_final_model: true,
        }
    }

    /// Build a saver from configuration, opening the configured store
    pub async fn from_config(config: &SaverConfig) -> Result<Self> {
        config.validate()?;
        let destination = Destination::parse(&config.destination)?;
        let store = open_store(&config.store).await?;
        Ok(Self::new(destination, store).persist_final_model(config.persist_final_model))
    }

    /// Whether to materialize and upload the final model when the scope exits
    pub fn persist_final_model(mut self, persist: bool) -> Self {
        self.persist_final_model = persist;
        self
    }

    pub fn destination(&self) -> &Destination {
        &self.destination
    }

    /// Run `body` as a training scope over `run`.
    ///
    /// A fresh persister is attached before `body` starts and finalized after
    /// it ends, whatever the outcome:
    /// - body `Ok`, finalize `Err` returns the finalize error;
    /// - body `Err`, finalize `Ok` returns the body error;
    /// - both fail: [`Error::ScopeAndFinalizeFailed`] carrying both, with the
    ///   body error as its source;
    /// - body panics: finalize runs, its error (if any) is logged, and the
    ///   panic resumes. This includes a panic from `body` itself before it
    ///   returns its future.
    ///
    /// Dropping the returned future before it completes (under
    /// `tokio::time::timeout` or `select!`) cannot run the async finalize.
    /// The persister is then marked finalized without uploading, so it stops
    /// reacting to the run's save events, and a warning is logged.
    pub async fn run<R, F, Fut, T>(&self, run: &R, body: F) -> Result<T>
    where
        R: TrainingRun + ?Sized,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let persister = CheckpointPersister::new(self.destination.clone(), self.store.clone());
        persister.attach(run)?;
        let guard = AbandonGuard {
            persister: &persister,
            armed: true,
        };

        let outcome = CatchUnwind::new(async move { body().await }).await;
        let finalized = persister.finalize(run, self.persist_final_model).await;
        guard.disarm();

        match outcome {
            Ok(body_result) => combine(body_result, finalized),
            Err(panic) => {
                if let Err(e) = finalized {
                    error!(error = %e, "Finalize failed while training scope was panicking");
                }
                resume_unwind(panic)
            }
        }
    }
}

/// Marks the persister abandoned if `run` is dropped before finalize completes
struct AbandonGuard<'a> {
    persister: &'a CheckpointPersister,
    armed: bool,
}

impl AbandonGuard<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for AbandonGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.persister.abandon();
        }
    }
}

/// Merge the body's result with the finalize result
fn combine<T, U>(body: Result<T>, finalized: Result<U>) -> Result<T> {
    match (body, finalized) {
        (Ok(value), Ok(_)) => Ok(value),
        (Ok(_), Err(finalize)) => Err(finalize),
        (Err(scope), Ok(_)) => Err(scope),
        (Err(scope), Err(finalize)) => {
            warn!(scope = %scope, finalize = %finalize, "Training scope and finalize both failed");
            Err(Error::ScopeAndFinalizeFailed {
                scope: Box::new(scope),
                finalize: Box::new(finalize),
            })
        }
    }
}

/// Future adapter that turns a panic while polling into an `Err` payload
struct CatchUnwind<F> {
    inner: Pin<Box<F>>,
}

impl<F> CatchUnwind<F> {
    fn new(inner: F) -> Self {
        Self {
            inner: Box::pin(inner),
        }
    }
}

impl<F: Future> Future for CatchUnwind<F> {
    type Output = std::result::Result<F::Output, Box<dyn Any + Send>>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let inner = self.inner.as_mut();
        match catch_unwind(AssertUnwindSafe(|| inner.poll(cx))) {
            Ok(Poll::Pending) => Poll::Pending,
            Ok(Poll::Ready(value)) => Poll::Ready(Ok(value)),
            Err(panic) => Poll::Ready(Err(panic)),
        }
    }
}

impl std::fmt::Debug for CheckpointSaver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckpointSaver")
            .field("destination", &self.destination)
            .field("persist_final_model", &self.persist_final_model)
            .finish()
    }
}
