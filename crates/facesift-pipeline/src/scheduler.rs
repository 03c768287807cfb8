//! Batch scheduler: splits pending documents into fixed-size batches and
//! runs one isolated worker unit per batch, strictly one after another.

use crate::config::Config;
use crate::worker::{WorkerError, WorkerManifest};
use facesift_raster::Document;
use indicatif::ProgressBar;
use std::collections::HashSet;
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use thiserror::Error;
use tokio::process::Command;
use tokio::signal::unix::{signal, Signal, SignalKind};

/// Hidden CLI flag that turns the binary into a worker unit.
pub const WORKER_FLAG: &str = "--worker";

const SIGINT: i32 = 2;

#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("failed to spawn worker: {0}")]
    Spawn(std::io::Error),
    #[error("failed to wait for worker: {0}")]
    Wait(std::io::Error),
    #[error("worker manifest: {0}")]
    Manifest(#[from] WorkerError),
    #[error("scratch directory: {0}")]
    Scratch(std::io::Error),
    #[error("failed to listen for interrupts: {0}")]
    Signal(std::io::Error),
}

/// How a worker unit ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerExit {
    Completed,
    /// Crashed, killed or exited non-zero. Unmarked documents stay pending.
    Failed(String),
    /// The operator interrupted the run while this worker was active.
    Interrupted,
}

/// Starts a worker unit for one batch and waits until it has fully terminated.
#[allow(async_fn_in_trait)]
pub trait WorkerLauncher {
    async fn launch(&mut self, batch: &[Document]) -> Result<WorkerExit, SchedulerError>;
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerReport {
    pub pending: usize,
    pub batches: usize,
    pub failed_batches: usize,
    pub interrupted: bool,
}

/// `candidates − processed`, in discovery order.
///
/// Identity is the content hash, so a renamed copy of a processed document
/// is not pending, and two copies in the same run are dispatched once.
pub fn plan(candidates: Vec<Document>, processed: &HashSet<String>) -> Vec<Document> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut pending = Vec::new();

    for doc in candidates {
        if processed.contains(&doc.hash) {
            continue;
        }
        if !seen.insert(doc.hash.clone()) {
            tracing::info!(path = %doc.path.display(), "duplicate content of an earlier document; skipping");
            continue;
        }
        pending.push(doc);
    }
    pending
}

/// Fixed-size batches in order. A size of zero is treated as one.
pub fn batches(pending: &[Document], size: usize) -> std::slice::Chunks<'_, Document> {
    pending.chunks(size.max(1))
}

pub struct Scheduler {
    batch_size: usize,
}

impl Scheduler {
    pub fn new(batch_size: usize) -> Self {
        Self { batch_size: batch_size.max(1) }
    }

    /// Run every batch through `launcher`, one at a time.
    ///
    /// A failed worker does not stop the run. An interrupt does.
    pub async fn run<L: WorkerLauncher>(
        &self,
        pending: &[Document],
        launcher: &mut L,
        progress: &ProgressBar,
    ) -> Result<SchedulerReport, SchedulerError> {
        let mut report = SchedulerReport {
            pending: pending.len(),
            ..Default::default()
        };
        progress.set_length(pending.len() as u64);

        for (index, batch) in batches(pending, self.batch_size).enumerate() {
            tracing::debug!(batch = index, documents = batch.len(), "dispatching batch");
            report.batches += 1;

            match launcher.launch(batch).await? {
                WorkerExit::Completed => {}
                WorkerExit::Failed(reason) => {
                    tracing::warn!(batch = index, %reason, "worker terminated abnormally; unfinished documents stay pending");
                    report.failed_batches += 1;
                }
                WorkerExit::Interrupted => {
                    tracing::warn!(batch = index, "interrupted; unfinished documents stay pending");
                    report.interrupted = true;
                    break;
                }
            }
            progress.inc(batch.len() as u64);
        }

        Ok(report)
    }
}

/// Launches each batch as a child process running this same binary with
/// [`WORKER_FLAG`].
///
/// Workers run in their own process group, so a terminal Ctrl-C reaches
/// only the controller, which then kills the active worker. The SIGINT
/// listener lives as long as the launcher, so an interrupt that lands
/// between batches stops the next one.
pub struct ProcessLauncher {
    program: PathBuf,
    template: WorkerManifest,
    scratch: tempfile::TempDir,
    launched: usize,
    interrupt: Option<Signal>,
}

impl ProcessLauncher {
    pub fn new(program: PathBuf, config: &Config, db_path: &Path, crops_dir: &Path) -> Result<Self, SchedulerError> {
        let scratch = tempfile::Builder::new()
            .prefix("facesift-batches-")
            .tempdir()
            .map_err(SchedulerError::Scratch)?;
        Ok(Self {
            program,
            template: WorkerManifest {
                db_path: db_path.to_path_buf(),
                crops_dir: crops_dir.to_path_buf(),
                model_dir: config.model_dir.clone(),
                dpi: config.raster_dpi,
                pdftoppm: config.pdftoppm.clone(),
                detection_threshold: config.detection_threshold,
                documents: Vec::new(),
            },
            scratch,
            launched: 0,
            interrupt: None,
        })
    }
}

impl WorkerLauncher for ProcessLauncher {
    async fn launch(&mut self, batch: &[Document]) -> Result<WorkerExit, SchedulerError> {
        let interrupt = match &mut self.interrupt {
            Some(listener) => listener,
            slot => slot.insert(signal(SignalKind::interrupt()).map_err(SchedulerError::Signal)?),
        };

        let manifest_path = self.scratch.path().join(format!("batch-{}.json", self.launched));
        self.launched += 1;

        let manifest = WorkerManifest {
            documents: batch.to_vec(),
            ..self.template.clone()
        };
        manifest.write(&manifest_path)?;

        let mut child = Command::new(&self.program)
            .arg(WORKER_FLAG)
            .arg(&manifest_path)
            .stdin(Stdio::null())
            .process_group(0)
            .kill_on_drop(true)
            .spawn()
            .map_err(SchedulerError::Spawn)?;

        let exit = tokio::select! {
            biased;
            _ = interrupt.recv() => {
                if let Err(e) = child.kill().await {
                    tracing::warn!(error = %e, "failed to kill worker");
                }
                WorkerExit::Interrupted
            }
            status = child.wait() => {
                let status = status.map_err(SchedulerError::Wait)?;
                if status.success() {
                    WorkerExit::Completed
                } else if status.signal() == Some(SIGINT) {
                    // Outside the terminal's group, only an interrupt of
                    // this run sends the worker SIGINT.
                    WorkerExit::Interrupted
                } else {
                    WorkerExit::Failed(status.to_string())
                }
            }
        };

        if let Err(e) = std::fs::remove_file(&manifest_path) {
            tracing::debug!(path = %manifest_path.display(), error = %e, "failed to remove worker manifest");
        }
        Ok(exit)
    }
}
