//! End-to-end training simulation test
//!
//! Simulates a training run that writes checkpoints to its output directory
//! and fires save events, with the persister uploading to a local object
//! store:
//! - Periodic uploads on save events
//! - Final model persistence on success, failure and panic
//! - Primary-only finalize in a multi-participant job
//! - Fail-fast partial uploads

use anyhow::Result;
use async_trait::async_trait;
use checkpoint::{CheckpointPersister, CheckpointSaver, Destination, SaveHooks, SaveListener, TrainingRun};
use parking_lot::Mutex;
use runtime_core::{Error, LoggingConfig, SaverConfig, StoreConfig};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use storage::{LocalObjectStore, ObjectStore};
use tempfile::TempDir;

fn init_logging() {
    let _ = runtime_core::init_tracing(&LoggingConfig {
        ansi: false,
        ..Default::default()
    });
}

/// Simulates a training process owning an output directory
struct SimulatedTrainer {
    output_dir: PathBuf,
    hooks: SaveHooks,
    primary: bool,
    final_saves: AtomicUsize,
}

impl SimulatedTrainer {
    fn new(output_dir: &Path, primary: bool) -> Self {
        Self {
            output_dir: output_dir.to_path_buf(),
            hooks: SaveHooks::new(),
            primary,
            final_saves: AtomicUsize::new(0),
        }
    }

    /// Write a checkpoint for `step` and notify listeners
    async fn save_checkpoint(&self, step: u64) -> runtime_core::Result<()> {
        let step_dir = self.output_dir.join(format!("step{}", step));
        std::fs::create_dir_all(&step_dir)?;
        std::fs::write(step_dir.join("model.bin"), format!("weights@{}", step))?;
        std::fs::write(step_dir.join("trainer_state.json"), format!("{{\"step\":{}}}", step))?;
        self.hooks.notify_saved().await
    }
}

#[async_trait]
impl TrainingRun for SimulatedTrainer {
    fn add_save_listener(&self, listener: Arc<dyn SaveListener>) {
        self.hooks.add(listener);
    }

    fn output_dir(&self) -> PathBuf {
        self.output_dir.clone()
    }

    async fn materialize_final_model(&self, output_dir: &Path) -> runtime_core::Result<()> {
        self.final_saves.fetch_add(1, Ordering::SeqCst);
        std::fs::create_dir_all(output_dir)?;
        std::fs::write(output_dir.join("final_model.bin"), b"final weights")?;
        Ok(())
    }

    fn is_primary(&self) -> bool {
        self.primary
    }
}

/// Delegates to a local store but fails puts for one key, recording attempts
struct FlakyStore {
    inner: LocalObjectStore,
    fail_key: Option<String>,
    attempts: Mutex<Vec<String>>,
}

impl FlakyStore {
    fn new(root: &Path, fail_key: Option<&str>) -> Self {
        Self {
            inner: LocalObjectStore::new(root),
            fail_key: fail_key.map(String::from),
            attempts: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl ObjectStore for FlakyStore {
    async fn put(&self, container: &str, key: &str, local_path: &Path) -> runtime_core::Result<u64> {
        self.attempts.lock().push(key.to_string());
        if self.fail_key.as_deref() == Some(key) {
            return Err(Error::Storage {
                message: "AccessDenied".to_string(),
            });
        }
        self.inner.put(container, key, local_path).await
    }

    async fn exists(&self, container: &str, key: &str) -> runtime_core::Result<bool> {
        self.inner.exists(container, key).await
    }

    async fn list(&self, container: &str, prefix: &str) -> runtime_core::Result<Vec<String>> {
        self.inner.list(container, prefix).await
    }
}

struct Env {
    _work: TempDir,
    output_dir: PathBuf,
    store_root: PathBuf,
}

fn env() -> Result<Env> {
    init_logging();
    let work = tempfile::tempdir()?;
    let output_dir = work.path().join("run1");
    let store_root = work.path().join("object-store");
    std::fs::create_dir_all(&output_dir)?;
    Ok(Env {
        output_dir,
        store_root,
        _work: work,
    })
}

#[tokio::test]
async fn test_save_events_upload_with_derived_keys() -> Result<()> {
    let env = env()?;
    let store = Arc::new(LocalObjectStore::new(&env.store_root));
    let trainer = SimulatedTrainer::new(&env.output_dir, true);

    let persister = CheckpointPersister::new(Destination::parse("store://bucket-x/ckpt")?, store.clone());
    persister.attach(&trainer)?;
    assert!(store.list("bucket-x", "").await?.is_empty());

    trainer.save_checkpoint(200).await?;

    let stored = std::fs::read_to_string(store.object_path("bucket-x", "ckpt/step200/model.bin"))?;
    assert_eq!(stored, "weights@200");
    assert_eq!(
        store.list("bucket-x", "ckpt/").await?,
        vec!["ckpt/step200/model.bin", "ckpt/step200/trainer_state.json"]
    );
    Ok(())
}

#[tokio::test]
async fn test_repeated_save_event_is_idempotent() -> Result<()> {
    let env = env()?;
    let store = Arc::new(LocalObjectStore::new(&env.store_root));
    let trainer = SimulatedTrainer::new(&env.output_dir, true);
    let persister = CheckpointPersister::new(Destination::parse("store://bucket-x/ckpt")?, store.clone());
    persister.attach(&trainer)?;

    trainer.save_checkpoint(100).await?;
    let first = store.list("bucket-x", "").await?;
    let again = persister.on_save_event().await?;
    let second = store.list("bucket-x", "").await?;

    assert_eq!(first, second);
    assert_eq!(again.len(), first.len());
    assert_eq!(
        std::fs::read_to_string(store.object_path("bucket-x", "ckpt/step100/model.bin"))?,
        "weights@100"
    );
    Ok(())
}

#[tokio::test]
async fn test_partial_failure_keeps_earlier_uploads() -> Result<()> {
    let env = env()?;
    for name in ["a.bin", "b.bin", "c.bin"] {
        std::fs::write(env.output_dir.join(name), name)?;
    }
    let store = Arc::new(FlakyStore::new(&env.store_root, Some("ckpt/b.bin")));
    let trainer = SimulatedTrainer::new(&env.output_dir, true);
    let persister = CheckpointPersister::new(Destination::parse("store://bucket-x/ckpt")?, store.clone());
    persister.attach(&trainer)?;

    let err = persister.on_save_event().await.unwrap_err();

    assert!(matches!(err, Error::UploadFailed { ref key, .. } if key == "ckpt/b.bin"));
    assert_eq!(err.failed_file(), Some(env.output_dir.join("b.bin").as_path()));
    assert!(store.exists("bucket-x", "ckpt/a.bin").await?);
    assert!(!store.exists("bucket-x", "ckpt/c.bin").await?);
    assert_eq!(*store.attempts.lock(), vec!["ckpt/a.bin", "ckpt/b.bin"]);
    Ok(())
}

#[tokio::test]
async fn test_scope_success_persists_final_model() -> Result<()> {
    let env = env()?;
    let store = Arc::new(LocalObjectStore::new(&env.store_root));
    let trainer = SimulatedTrainer::new(&env.output_dir, true);
    let saver = CheckpointSaver::new(Destination::parse("store://bucket-x/ckpt")?, store.clone());

    let steps = saver
        .run(&trainer, || async {
            trainer.save_checkpoint(100).await?;
            trainer.save_checkpoint(200).await?;
            Ok::<_, Error>(2)
        })
        .await?;

    assert_eq!(steps, 2);
    assert_eq!(trainer.final_saves.load(Ordering::SeqCst), 1);
    assert!(store.exists("bucket-x", "ckpt/final_model.bin").await?);
    assert!(store.exists("bucket-x", "ckpt/step100/model.bin").await?);
    assert!(store.exists("bucket-x", "ckpt/step200/model.bin").await?);
    Ok(())
}

#[tokio::test]
async fn test_scope_failure_still_finalizes() -> Result<()> {
    let env = env()?;
    let store = Arc::new(LocalObjectStore::new(&env.store_root));
    let trainer = SimulatedTrainer::new(&env.output_dir, true);
    let saver = CheckpointSaver::new(Destination::parse("store://bucket-x/ckpt")?, store.clone());

    let result: runtime_core::Result<()> = saver
        .run(&trainer, || async {
            trainer.save_checkpoint(100).await?;
            Err(Error::Training {
                message: "Something went wrong!".to_string(),
            })
        })
        .await;

    assert!(matches!(result, Err(Error::Training { ref message }) if message == "Something went wrong!"));
    assert_eq!(trainer.final_saves.load(Ordering::SeqCst), 1);
    assert!(store.exists("bucket-x", "ckpt/final_model.bin").await?);
    Ok(())
}

#[tokio::test]
async fn test_scope_and_finalize_failures_are_both_reported() -> Result<()> {
    let env = env()?;
    let store = Arc::new(FlakyStore::new(&env.store_root, Some("ckpt/final_model.bin")));
    let trainer = SimulatedTrainer::new(&env.output_dir, true);
    let saver = CheckpointSaver::new(Destination::parse("store://bucket-x/ckpt")?, store.clone());

    let result: runtime_core::Result<()> = saver
        .run(&trainer, || async {
            Err(Error::Training {
                message: "loss diverged".to_string(),
            })
        })
        .await;

    let err = result.unwrap_err();
    let rendered = err.to_string();
    assert!(rendered.contains("loss diverged"));
    assert!(rendered.contains("AccessDenied"));
    match &err {
        Error::ScopeAndFinalizeFailed { scope, finalize } => {
            assert!(matches!(**scope, Error::Training { .. }));
            assert!(matches!(**finalize, Error::UploadFailed { .. }));
        }
        other => panic!("unexpected error: {:?}", other),
    }
    let source = std::error::Error::source(&err).map(|s| s.to_string());
    assert_eq!(source.as_deref(), Some("Training failed: loss diverged"));
    assert_eq!(err.failed_file(), Some(env.output_dir.join("final_model.bin").as_path()));
    Ok(())
}

#[tokio::test]
async fn test_scope_panic_still_finalizes() -> Result<()> {
    let env = env()?;
    let store = Arc::new(LocalObjectStore::new(&env.store_root));
    let trainer = Arc::new(SimulatedTrainer::new(&env.output_dir, true));
    let saver = CheckpointSaver::new(Destination::parse("store://bucket-x/ckpt")?, store.clone());

    let task_trainer = trainer.clone();
    let handle = tokio::spawn(async move {
        let trainer = task_trainer;
        saver
            .run(trainer.as_ref(), || async {
                trainer.save_checkpoint(100).await?;
                if trainer.is_primary() {
                    panic!("CUDA out of memory");
                }
                Ok::<_, Error>(())
            })
            .await
    });

    let join = handle.await;
    assert!(join.unwrap_err().is_panic());
    assert_eq!(trainer.final_saves.load(Ordering::SeqCst), 1);
    assert!(store.exists("bucket-x", "ckpt/final_model.bin").await?);
    Ok(())
}

#[tokio::test]
async fn test_panic_before_body_future_still_finalizes() -> Result<()> {
    let env = env()?;
    let store = Arc::new(LocalObjectStore::new(&env.store_root));
    let trainer = Arc::new(SimulatedTrainer::new(&env.output_dir, true));
    let saver = CheckpointSaver::new(Destination::parse("store://bucket-x/ckpt")?, store.clone());

    let task_trainer = trainer.clone();
    let handle = tokio::spawn(async move {
        saver
            .run(task_trainer.as_ref(), || -> std::future::Ready<runtime_core::Result<()>> {
                panic!("setup failed")
            })
            .await
    });

    assert!(handle.await.unwrap_err().is_panic());
    assert_eq!(trainer.final_saves.load(Ordering::SeqCst), 1);
    assert!(store.exists("bucket-x", "ckpt/final_model.bin").await?);
    Ok(())
}

#[tokio::test]
async fn test_run_saves_after_scope_exit_and_in_second_scope() -> Result<()> {
    let env = env()?;
    let store = Arc::new(LocalObjectStore::new(&env.store_root));
    let trainer = SimulatedTrainer::new(&env.output_dir, true);
    let saver = CheckpointSaver::new(Destination::parse("store://bucket-x/ckpt")?, store.clone())
        .persist_final_model(false);

    saver.run(&trainer, || async { Ok(()) }).await?;
    trainer.save_checkpoint(50).await?;
    assert!(!store.exists("bucket-x", "ckpt/step50/model.bin").await?);

    saver.run(&trainer, || trainer.save_checkpoint(100)).await?;
    assert!(store.exists("bucket-x", "ckpt/step50/model.bin").await?);
    assert!(store.exists("bucket-x", "ckpt/step100/model.bin").await?);
    Ok(())
}

#[tokio::test]
async fn test_dropped_scope_stops_uploading() -> Result<()> {
    let env = env()?;
    let store = Arc::new(LocalObjectStore::new(&env.store_root));
    let trainer = SimulatedTrainer::new(&env.output_dir, true);
    let saver = CheckpointSaver::new(Destination::parse("store://bucket-x/ckpt")?, store.clone());

    let scope = saver.run(&trainer, || async {
        trainer.save_checkpoint(100).await?;
        std::future::pending::<()>().await;
        Ok::<_, Error>(())
    });
    let timed_out = tokio::time::timeout(std::time::Duration::from_millis(50), scope).await;
    assert!(timed_out.is_err());

    trainer.save_checkpoint(200).await?;
    assert!(store.exists("bucket-x", "ckpt/step100/model.bin").await?);
    assert!(!store.exists("bucket-x", "ckpt/step200/model.bin").await?);
    assert_eq!(trainer.final_saves.load(Ordering::SeqCst), 0);
    Ok(())
}

#[tokio::test]
async fn test_only_primary_persists_final_model() -> Result<()> {
    let env = env()?;
    let store = Arc::new(LocalObjectStore::new(&env.store_root));
    let rank1_dir = env.output_dir.with_file_name("run1-rank1");
    std::fs::create_dir_all(&rank1_dir)?;

    let rank0 = SimulatedTrainer::new(&env.output_dir, true);
    let rank1 = SimulatedTrainer::new(&rank1_dir, false);

    let saver0 = CheckpointSaver::new(Destination::parse("store://bucket-x/rank0")?, store.clone());
    let saver1 = CheckpointSaver::new(Destination::parse("store://bucket-x/rank1")?, store.clone());

    saver0.run(&rank0, || async { Ok(()) }).await?;
    saver1.run(&rank1, || async { Ok(()) }).await?;

    assert_eq!(rank0.final_saves.load(Ordering::SeqCst), 1);
    assert_eq!(rank1.final_saves.load(Ordering::SeqCst), 0);
    assert_eq!(store.list("bucket-x", "rank0/").await?, vec!["rank0/final_model.bin"]);
    assert!(store.list("bucket-x", "rank1/").await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_persist_final_model_disabled() -> Result<()> {
    let env = env()?;
    let store = Arc::new(LocalObjectStore::new(&env.store_root));
    let trainer = SimulatedTrainer::new(&env.output_dir, true);
    let saver = CheckpointSaver::new(Destination::parse("store://bucket-x/ckpt")?, store.clone())
        .persist_final_model(false);

    let result: runtime_core::Result<()> = saver
        .run(&trainer, || async {
            Err(Error::Training {
                message: "interrupted".to_string(),
            })
        })
        .await;

    assert!(result.is_err());
    assert_eq!(trainer.final_saves.load(Ordering::SeqCst), 0);
    assert!(store.list("bucket-x", "").await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_saver_from_config() -> Result<()> {
    let env = env()?;
    let config = SaverConfig {
        destination: "s3://bucket-x/runs/42".to_string(),
        store: StoreConfig::Local {
            root: env.store_root.to_string_lossy().to_string(),
        },
        ..Default::default()
    };
    let saver = CheckpointSaver::from_config(&config).await?;
    assert_eq!(saver.destination().container(), "bucket-x");
    assert_eq!(saver.destination().key_prefix(), "runs/42");

    let trainer = SimulatedTrainer::new(&env.output_dir, true);
    saver.run(&trainer, || trainer.save_checkpoint(1)).await?;

    let store = LocalObjectStore::new(&env.store_root);
    assert_eq!(
        store.list("bucket-x", "runs/42/").await?,
        vec![
            "runs/42/final_model.bin",
            "runs/42/step1/model.bin",
            "runs/42/step1/trainer_state.json",
        ]
    );
    Ok(())
}

#[tokio::test]
async fn test_saver_rejects_bad_destination_before_training() -> Result<()> {
    let config = SaverConfig {
        destination: "bucket-x/ckpt".to_string(),
        store: StoreConfig::Memory,
        ..Default::default()
    };
    let result = CheckpointSaver::from_config(&config).await;
    assert!(matches!(result, Err(Error::InvalidDestination { .. })));
    Ok(())
}
