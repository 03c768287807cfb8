//! SQLite state store: processed documents and face detections.
//!
//! Schema:
//! - processed_documents: hash -> path, one row per fully ingested document
//! - detections: one row per face crop, in insertion order
//!
//! A document's detections and its processed mark commit together in one
//! transaction, so an unmarked document normally has no rows. Any that do
//! exist are discarded before that document is retried.

use facesift_core::Embedding;
use rusqlite::{params, Connection, ErrorCode, Transaction};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;

const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS processed_documents (
    hash TEXT PRIMARY KEY,
    path TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS detections (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    document_hash TEXT NOT NULL,
    document_path TEXT NOT NULL,
    page_index INTEGER NOT NULL,
    embedding BLOB NOT NULL,
    crop_path TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_detections_document_hash ON detections(document_hash);
";

const BUSY_TIMEOUT_MS: u32 = 5_000;

pub type DetectionId = i64;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("document already marked processed: {0}")]
    AlreadyProcessed(String),
    #[error("detection {id} has a corrupt embedding ({len} bytes)")]
    CorruptEmbedding { id: DetectionId, len: usize },
    #[error("failed to create store directory {path}: {source}")]
    CreateDir {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// One face found on one page of one document.
#[derive(Debug, Clone)]
pub struct Detection {
    pub id: DetectionId,
    pub document_hash: String,
    pub document_path: String,
    pub page_index: u32,
    pub embedding: Embedding,
    pub crop_path: PathBuf,
}

/// Row counts, for end-of-run reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreCounts {
    pub processed: usize,
    pub detections: usize,
}

/// Connection wrapper. One writer at a time; readers may run alongside.
pub struct StateStore {
    conn: Connection,
}

impl StateStore {
    /// Open or create the store at `path`.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| StoreError::CreateDir {
                path: parent.display().to_string(),
                source,
            })?;
        }

        let conn = Connection::open(path)?;
        conn.busy_timeout(std::time::Duration::from_millis(BUSY_TIMEOUT_MS as u64))?;
        // WAL lets the controller read while a worker writes; FULL makes
        // every commit durable before it returns.
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = FULL;",
        )?;
        conn.execute_batch(SCHEMA)?;

        tracing::debug!(path = %path.display(), "state store opened");
        Ok(Self { conn })
    }

    /// Open an in-memory store (for testing).
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    pub fn is_processed(&self, hash: &str) -> Result<bool, StoreError> {
        let found: i64 = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM processed_documents WHERE hash = ?1)",
            params![hash],
            |row| row.get(0),
        )?;
        Ok(found != 0)
    }

    /// Every processed document hash.
    pub fn processed_hashes(&self) -> Result<HashSet<String>, StoreError> {
        let mut stmt = self.conn.prepare("SELECT hash FROM processed_documents")?;
        let hashes = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<HashSet<_>, _>>()?;
        Ok(hashes)
    }

    /// Mark a document processed. Fails with [`StoreError::AlreadyProcessed`]
    /// if it already is; callers treat that as a no-op.
    pub fn mark_processed(&self, hash: &str, path: &Path) -> Result<(), StoreError> {
        let result = self.conn.execute(
            "INSERT INTO processed_documents (hash, path) VALUES (?1, ?2)",
            params![hash, path.to_string_lossy()],
        );
        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
                Err(StoreError::AlreadyProcessed(hash.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Open a transaction spanning one document's detections and its
    /// processed mark. Dropping it without `commit` rolls all of them back.
    pub fn begin_document(&self) -> Result<Transaction<'_>, StoreError> {
        Ok(self.conn.unchecked_transaction()?)
    }

    /// Record one detection and return its id.
    pub fn insert_detection(
        &self,
        document_hash: &str,
        document_path: &Path,
        page_index: u32,
        embedding: &Embedding,
        crop_path: &Path,
    ) -> Result<DetectionId, StoreError> {
        self.conn.execute(
            "INSERT INTO detections (document_hash, document_path, page_index, embedding, crop_path)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                document_hash,
                document_path.to_string_lossy(),
                page_index,
                embedding.to_le_bytes(),
                crop_path.to_string_lossy(),
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// All detections in insertion order.
    pub fn all_detections(&self) -> Result<Vec<Detection>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, document_hash, document_path, page_index, embedding, crop_path
             FROM detections ORDER BY id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, DetectionId>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, u32>(3)?,
                row.get::<_, Vec<u8>>(4)?,
                row.get::<_, String>(5)?,
            ))
        })?;

        let mut detections = Vec::new();
        for row in rows {
            let (id, document_hash, document_path, page_index, blob, crop_path) = row?;
            let embedding = Embedding::from_le_bytes(&blob)
                .ok_or(StoreError::CorruptEmbedding { id, len: blob.len() })?;
            detections.push(Detection {
                id,
                document_hash,
                document_path,
                page_index,
                embedding,
                crop_path: PathBuf::from(crop_path),
            });
        }
        Ok(detections)
    }

    /// Delete detections left behind by an interrupted ingestion of an
    /// unprocessed document. Never touches processed documents.
    pub fn discard_unfinished(&self, hash: &str) -> Result<usize, StoreError> {
        let removed = self.conn.execute(
            "DELETE FROM detections
             WHERE document_hash = ?1
               AND NOT EXISTS (SELECT 1 FROM processed_documents WHERE hash = ?1)",
            params![hash],
        )?;
        Ok(removed)
    }

    /// Point a detection at its crop's new location.
    pub fn update_crop_path(&self, id: DetectionId, crop_path: &Path) -> Result<(), StoreError> {
        self.conn.execute(
            "UPDATE detections SET crop_path = ?1 WHERE id = ?2",
            params![crop_path.to_string_lossy(), id],
        )?;
        Ok(())
    }

    pub fn counts(&self) -> Result<StoreCounts, StoreError> {
        let count = |sql: &str| -> Result<usize, StoreError> {
            let n: i64 = self.conn.query_row(sql, [], |row| row.get(0))?;
            Ok(n as usize)
        };
        Ok(StoreCounts {
            processed: count("SELECT COUNT(*) FROM processed_documents")?,
            detections: count("SELECT COUNT(*) FROM detections")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn emb(v: &[f32]) -> Embedding {
        Embedding::new(v.to_vec())
    }

    #[test]
    fn test_mark_processed_once() {
        let store = StateStore::in_memory().unwrap();
        assert!(!store.is_processed("h1").unwrap());
        store.mark_processed("h1", Path::new("/in/a.pdf")).unwrap();
        assert!(store.is_processed("h1").unwrap());

        let again = store.mark_processed("h1", Path::new("/in/renamed.pdf"));
        assert!(matches!(again, Err(StoreError::AlreadyProcessed(h)) if h == "h1"));
        assert_eq!(store.counts().unwrap().processed, 1);
    }

    #[test]
    fn test_detections_in_insertion_order() {
        let store = StateStore::in_memory().unwrap();
        let a = store
            .insert_detection("h1", Path::new("/in/a.pdf"), 0, &emb(&[1.0, 0.0]), Path::new("/c/1.jpg"))
            .unwrap();
        let b = store
            .insert_detection("h2", Path::new("/in/b.pdf"), 3, &emb(&[0.0, 1.0]), Path::new("/c/2.jpg"))
            .unwrap();
        assert!(b > a);

        let all = store.all_detections().unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id, a);
        assert_eq!(all[0].document_path, "/in/a.pdf");
        assert_eq!(all[1].page_index, 3);
        assert_eq!(all[1].embedding, emb(&[0.0, 1.0]));
        assert_eq!(all[1].crop_path, PathBuf::from("/c/2.jpg"));
    }

    #[test]
    fn test_discard_unfinished_only_touches_unmarked() {
        let store = StateStore::in_memory().unwrap();
        let e = emb(&[1.0]);
        store.insert_detection("done", Path::new("/a"), 0, &e, Path::new("/c/a")).unwrap();
        store.mark_processed("done", Path::new("/a")).unwrap();
        store.insert_detection("partial", Path::new("/b"), 0, &e, Path::new("/c/b0")).unwrap();
        store.insert_detection("partial", Path::new("/b"), 1, &e, Path::new("/c/b1")).unwrap();

        assert_eq!(store.discard_unfinished("done").unwrap(), 0);
        assert_eq!(store.discard_unfinished("partial").unwrap(), 2);
        assert_eq!(store.counts().unwrap(), StoreCounts { processed: 1, detections: 1 });
    }

    #[test]
    fn test_uncommitted_document_rolls_back() {
        let store = StateStore::in_memory().unwrap();
        let e = emb(&[1.0]);
        {
            let _tx = store.begin_document().unwrap();
            store.insert_detection("h", Path::new("/a"), 0, &e, Path::new("/c/a0")).unwrap();
        }
        assert_eq!(store.counts().unwrap(), StoreCounts { processed: 0, detections: 0 });

        let tx = store.begin_document().unwrap();
        store.insert_detection("h", Path::new("/a"), 0, &e, Path::new("/c/a0")).unwrap();
        store.mark_processed("h", Path::new("/a")).unwrap();
        tx.commit().unwrap();
        assert_eq!(store.counts().unwrap(), StoreCounts { processed: 1, detections: 1 });
    }

    #[test]
    fn test_update_crop_path() {
        let store = StateStore::in_memory().unwrap();
        let id = store
            .insert_detection("h", Path::new("/a"), 0, &emb(&[1.0]), Path::new("/u/x.jpg"))
            .unwrap();
        store.update_crop_path(id, Path::new("/Person_1/x.jpg")).unwrap();
        assert_eq!(store.all_detections().unwrap()[0].crop_path, PathBuf::from("/Person_1/x.jpg"));
    }

    #[test]
    fn test_corrupt_embedding_reported() {
        let store = StateStore::in_memory().unwrap();
        store
            .conn
            .execute(
                "INSERT INTO detections (document_hash, document_path, page_index, embedding, crop_path)
                 VALUES ('h', '/a', 0, x'010203', '/c')",
                [],
            )
            .unwrap();
        assert!(matches!(
            store.all_detections(),
            Err(StoreError::CorruptEmbedding { len: 3, .. })
        ));
    }

    #[test]
    fn test_state_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state/scan_state.db");
        {
            let store = StateStore::open(&path).unwrap();
            store.insert_detection("h", Path::new("/a"), 0, &emb(&[0.5]), Path::new("/c")).unwrap();
            store.mark_processed("h", Path::new("/a")).unwrap();
        }
        let store = StateStore::open(&path).unwrap();
        assert!(store.is_processed("h").unwrap());
        assert_eq!(store.processed_hashes().unwrap(), HashSet::from(["h".to_string()]));
        assert_eq!(store.all_detections().unwrap().len(), 1);
    }
}
