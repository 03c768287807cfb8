//! facesift-pipeline — resumable face-extraction pipeline.
//!
//! A scheduler hands fixed-size batches of pending documents to worker
//! units, each a separate process that loads the face models, ingests its
//! batch into the SQLite state store and exits. Once every batch has run,
//! all stored detections are clustered into identities and their crops are
//! organized into per-person folders.

pub mod config;
pub mod ingest;
pub mod organizer;
pub mod scheduler;
pub mod store;
pub mod worker;

pub use config::{Config, OutputLayout};
pub use organizer::{cluster_and_organize, PersonSummary};
pub use scheduler::{ProcessLauncher, Scheduler, SchedulerReport, WorkerExit, WorkerLauncher, WORKER_FLAG};
pub use store::{Detection, StateStore, StoreError};
pub use worker::{process_batch, run_worker, BatchOutcome, WorkerManifest};
