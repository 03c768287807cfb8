//! Worker unit: processes one batch of documents, then its process exits.
//!
//! The analyzer's ONNX sessions are built once per batch and never outlive
//! the process, so whatever the runtime holds on to is returned to the OS
//! when the batch is done.

use crate::ingest::{self, IngestError};
use crate::store::{StateStore, StoreError};
use facesift_core::{AnalyzerError, FaceAnalyzer, OnnxFaceAnalyzer};
use facesift_raster::{Document, PdftoppmRasterizer, RasterError, Rasterizer};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("failed to read manifest {path}: {source}")]
    ManifestIo {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid manifest: {0}")]
    ManifestFormat(#[from] serde_json::Error),
    #[error("state store: {0}")]
    Store(#[from] StoreError),
    #[error("model load: {0}")]
    Analyzer(#[from] AnalyzerError),
    #[error("failed to create crops directory: {0}")]
    CropsDir(std::io::Error),
}

/// Why a single document was left unprocessed.
#[derive(Error, Debug)]
pub enum DocumentFailure {
    #[error("rasterize: {0}")]
    Raster(#[from] RasterError),
    #[error("analyze page {page}: {source}")]
    Analyze {
        page: usize,
        #[source]
        source: AnalyzerError,
    },
    #[error("ingest: {0}")]
    Ingest(#[from] IngestError),
    #[error("state store: {0}")]
    Store(#[from] StoreError),
}

/// Everything a worker process needs, handed over as a JSON file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerManifest {
    pub db_path: PathBuf,
    pub crops_dir: PathBuf,
    pub model_dir: PathBuf,
    pub dpi: u32,
    pub pdftoppm: String,
    pub detection_threshold: f32,
    pub documents: Vec<Document>,
}

impl WorkerManifest {
    pub fn read(path: &Path) -> Result<Self, WorkerError> {
        let raw = std::fs::read(path).map_err(|source| WorkerError::ManifestIo {
            path: path.display().to_string(),
            source,
        })?;
        Ok(serde_json::from_slice(&raw)?)
    }

    pub fn write(&self, path: &Path) -> Result<(), WorkerError> {
        let raw = serde_json::to_vec(self)?;
        std::fs::write(path, raw).map_err(|source| WorkerError::ManifestIo {
            path: path.display().to_string(),
            source,
        })
    }
}

/// Per-batch tally.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchOutcome {
    /// Documents ingested and marked in this batch.
    pub processed: usize,
    /// Documents that were already marked.
    pub skipped: usize,
    /// Documents left unmarked after an error.
    pub failed: usize,
    /// Detections stored in this batch.
    pub detections: usize,
}

/// Build the production collaborators and process the manifest's batch.
pub fn run_worker(manifest: &WorkerManifest) -> Result<BatchOutcome, WorkerError> {
    std::fs::create_dir_all(&manifest.crops_dir).map_err(WorkerError::CropsDir)?;
    let store = StateStore::open(&manifest.db_path)?;
    let rasterizer = PdftoppmRasterizer::new(manifest.pdftoppm.clone());
    let mut analyzer = OnnxFaceAnalyzer::load(&manifest.model_dir, manifest.detection_threshold)?;

    tracing::info!(
        documents = manifest.documents.len(),
        pid = std::process::id(),
        "worker started"
    );

    let outcome = process_batch(
        &manifest.documents,
        &store,
        &rasterizer,
        &mut analyzer,
        &manifest.crops_dir,
        manifest.dpi,
    );

    tracing::info!(
        processed = outcome.processed,
        skipped = outcome.skipped,
        failed = outcome.failed,
        detections = outcome.detections,
        "worker finished"
    );
    Ok(outcome)
}

/// Process documents in order. A failure affects only its own document.
pub fn process_batch<R, A>(
    documents: &[Document],
    store: &StateStore,
    rasterizer: &R,
    analyzer: &mut A,
    crops_dir: &Path,
    dpi: u32,
) -> BatchOutcome
where
    R: Rasterizer,
    A: FaceAnalyzer,
{
    let mut outcome = BatchOutcome::default();

    for document in documents {
        match store.is_processed(&document.hash) {
            Ok(true) => {
                tracing::debug!(path = %document.path.display(), "already processed");
                outcome.skipped += 1;
                continue;
            }
            Ok(false) => {}
            Err(e) => {
                tracing::warn!(path = %document.path.display(), error = %e, "state lookup failed");
                outcome.failed += 1;
                continue;
            }
        }

        match process_document(document, store, rasterizer, analyzer, crops_dir, dpi) {
            Ok(stored) => {
                tracing::info!(path = %document.path.display(), faces = stored, "document processed");
                outcome.processed += 1;
                outcome.detections += stored;
            }
            Err(e) => {
                tracing::warn!(path = %document.path.display(), error = %e, "document failed; will retry next run");
                outcome.failed += 1;
            }
        }
    }

    outcome
}

/// Ingest one document and mark it processed as a single commit. On any
/// failure the document contributes nothing: its rows roll back and the
/// crops it wrote are removed.
fn process_document<R, A>(
    document: &Document,
    store: &StateStore,
    rasterizer: &R,
    analyzer: &mut A,
    crops_dir: &Path,
    dpi: u32,
) -> Result<usize, DocumentFailure>
where
    R: Rasterizer,
    A: FaceAnalyzer,
{
    let stale = store.discard_unfinished(&document.hash)?;
    if stale > 0 {
        tracing::info!(path = %document.path.display(), stale, "discarded detections from an interrupted run");
    }

    let tx = store.begin_document()?;
    let result = ingest_document(document, store, rasterizer, analyzer, crops_dir, dpi).and_then(|stored| {
        tx.commit().map_err(StoreError::from)?;
        Ok(stored)
    });

    if result.is_err() {
        remove_document_crops(crops_dir, document);
    }
    result
}

fn ingest_document<R, A>(
    document: &Document,
    store: &StateStore,
    rasterizer: &R,
    analyzer: &mut A,
    crops_dir: &Path,
    dpi: u32,
) -> Result<usize, DocumentFailure>
where
    R: Rasterizer,
    A: FaceAnalyzer,
{
    let mut stored = 0;
    for page in rasterizer.rasterize(&document.path, dpi)? {
        let page = page?;
        let faces = analyzer
            .analyze(&page.image)
            .map_err(|source| DocumentFailure::Analyze { page: page.index, source })?;
        stored += ingest::ingest_page(store, crops_dir, document, &page, &faces)?;
    }

    match store.mark_processed(&document.hash, &document.path) {
        Ok(()) | Err(StoreError::AlreadyProcessed(_)) => Ok(stored),
        Err(e) => Err(e.into()),
    }
}

/// Delete crops a failed attempt left in `crops_dir`.
fn remove_document_crops(crops_dir: &Path, document: &Document) {
    let prefix = ingest::crop_file_prefix(document);
    let Ok(entries) = std::fs::read_dir(crops_dir) else {
        return;
    };
    for entry in entries.flatten() {
        if !entry.file_name().to_string_lossy().starts_with(&prefix) {
            continue;
        }
        if let Err(e) = std::fs::remove_file(entry.path()) {
            tracing::debug!(path = %entry.path().display(), error = %e, "failed to remove crop of failed document");
        }
    }
}
