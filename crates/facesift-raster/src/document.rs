//! Input documents: discovery and content-hash identity.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use thiserror::Error;

const DOCUMENT_EXTENSION: &str = "pdf";
const HASH_BUF_SIZE: usize = 64 * 1024;

#[derive(Error, Debug)]
pub enum DocumentError {
    #[error("input directory not found: {0}")]
    InputNotFound(String),
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
}

impl DocumentError {
    fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.display().to_string(),
            source,
        }
    }
}

/// A source document, identified by the hash of its bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    /// Lowercase hex SHA-256 of the file contents.
    pub hash: String,
    pub path: PathBuf,
}

impl Document {
    /// Hash `path` and build its document record.
    pub fn from_path(path: impl Into<PathBuf>) -> Result<Self, DocumentError> {
        let path = path.into();
        let hash = content_hash(&path)?;
        Ok(Self { hash, path })
    }

    /// Short, filename-safe prefix of the content hash.
    pub fn short_hash(&self) -> &str {
        &self.hash[..self.hash.len().min(16)]
    }
}

/// Streaming SHA-256 of a file, as lowercase hex.
pub fn content_hash(path: &Path) -> Result<String, DocumentError> {
    let mut file = File::open(path).map_err(|e| DocumentError::io(path, e))?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; HASH_BUF_SIZE];
    loop {
        let n = file.read(&mut buf).map_err(|e| DocumentError::io(path, e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect())
}

/// List the PDF files directly inside `dir`, sorted by file name.
///
/// Not recursive. The extension match is case-insensitive.
pub fn discover_documents(dir: &Path) -> Result<Vec<PathBuf>, DocumentError> {
    if !dir.is_dir() {
        return Err(DocumentError::InputNotFound(dir.display().to_string()));
    }

    let mut paths = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(|e| DocumentError::io(dir, e))? {
        let path = entry.map_err(|e| DocumentError::io(dir, e))?.path();
        let is_pdf = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case(DOCUMENT_EXTENSION));
        if is_pdf && path.is_file() {
            paths.push(path);
        }
    }
    paths.sort_by(|a, b| a.file_name().cmp(&b.file_name()));

    tracing::debug!(dir = %dir.display(), count = paths.len(), "discovered documents");
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_hash_known_value() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("a.pdf");
        std::fs::write(&p, b"abc").unwrap();
        assert_eq!(
            content_hash(&p).unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_same_bytes_same_identity() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("original.pdf");
        let b = dir.path().join("renamed copy.pdf");
        std::fs::write(&a, b"%PDF-1.4 same bytes").unwrap();
        std::fs::write(&b, b"%PDF-1.4 same bytes").unwrap();
        let da = Document::from_path(&a).unwrap();
        let db = Document::from_path(&b).unwrap();
        assert_eq!(da.hash, db.hash);
        assert_ne!(da.path, db.path);
        assert_eq!(da.short_hash().len(), 16);
    }

    #[test]
    fn test_discover_filters_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.pdf", "a.PDF", "notes.txt", "c.pdf"] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }
        std::fs::create_dir(dir.path().join("nested.pdf")).unwrap();

        let found = discover_documents(dir.path()).unwrap();
        let names: Vec<_> = found
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.PDF", "b.pdf", "c.pdf"]);
    }

    #[test]
    fn test_discover_missing_dir() {
        let err = discover_documents(Path::new("/nonexistent/facesift-input")).unwrap_err();
        assert!(matches!(err, DocumentError::InputNotFound(_)));
    }

    #[test]
    fn test_document_serde_shape() {
        let doc = Document { hash: "ab".into(), path: PathBuf::from("/in/a.pdf") };
        let json = serde_json::to_string(&doc).unwrap();
        assert_eq!(json, r#"{"hash":"ab","path":"/in/a.pdf"}"#);
    }
}
