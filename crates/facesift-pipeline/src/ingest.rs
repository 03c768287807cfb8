//! Detection ingestion: analyzer output for one page → crop files + rows.

use crate::store::{StateStore, StoreError};
use facesift_core::DetectedFace;
use facesift_raster::{clip_to_bounds, Document, Page};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("failed to write crop {path}: {source}")]
    WriteCrop {
        path: String,
        #[source]
        source: image::ImageError,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// File name of a face crop: content hash prefix, page index, per-page
/// face index. Unique within a document and stable across retries.
pub fn crop_file_name(document: &Document, page_index: usize, face_index: usize) -> String {
    format!("{}{page_index}_f{face_index}.jpg", crop_file_prefix(document))
}

/// Shared prefix of every crop file name of `document`.
pub fn crop_file_prefix(document: &Document) -> String {
    format!("{}_p", document.short_hash())
}

/// Persist the faces found on one page. Returns the number of detections
/// stored; faces whose box clips to nothing are dropped.
pub fn ingest_page(
    store: &StateStore,
    crops_dir: &Path,
    document: &Document,
    page: &Page,
    faces: &[DetectedFace],
) -> Result<usize, IngestError> {
    let mut stored = 0;

    for (face_index, face) in faces.iter().enumerate() {
        let Some(region) = clip_to_bounds(face.bbox.corners(), page.width(), page.height()) else {
            tracing::debug!(
                document = %document.path.display(),
                page = page.index,
                face = face_index,
                "discarding face with empty crop region"
            );
            continue;
        };

        let crop_path: PathBuf = crops_dir.join(crop_file_name(document, page.index, face_index));
        page.crop(region)
            .save(&crop_path)
            .map_err(|source| IngestError::WriteCrop {
                path: crop_path.display().to_string(),
                source,
            })?;

        store.insert_detection(
            &document.hash,
            &document.path,
            page.index as u32,
            &face.embedding,
            &crop_path,
        )?;
        stored += 1;
    }

    Ok(stored)
}

#[cfg(test)]
mod tests {
    use super::*;
    use facesift_core::{BoundingBox, Embedding};
    use image::RgbImage;

    fn doc() -> Document {
        Document {
            hash: "0123456789abcdef0123456789abcdef".into(),
            path: PathBuf::from("/in/a.pdf"),
        }
    }

    fn face(x1: f32, y1: f32, x2: f32, y2: f32) -> DetectedFace {
        DetectedFace {
            bbox: BoundingBox::from_corners(x1, y1, x2, y2),
            embedding: Embedding::new(vec![1.0, 0.0]),
        }
    }

    #[test]
    fn test_crop_file_name() {
        assert_eq!(crop_file_name(&doc(), 3, 1), "0123456789abcdef_p3_f1.jpg");
    }

    #[test]
    fn test_ingest_writes_crops_and_rows() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::in_memory().unwrap();
        let page = Page { index: 2, image: RgbImage::new(100, 80) };
        let faces = vec![face(10.0, 10.0, 40.0, 50.0), face(-20.0, 60.0, 30.0, 120.0)];

        let n = ingest_page(&store, dir.path(), &doc(), &page, &faces).unwrap();
        assert_eq!(n, 2);

        let rows = store.all_detections().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].page_index, 2);
        assert_eq!(rows[0].document_hash, doc().hash);
        assert_eq!(rows[1].crop_path, dir.path().join("0123456789abcdef_p2_f1.jpg"));

        let edge = image::open(&rows[1].crop_path).unwrap();
        assert_eq!((edge.width(), edge.height()), (30, 20));
    }

    #[test]
    fn test_empty_region_is_skipped_silently() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::in_memory().unwrap();
        let page = Page { index: 0, image: RgbImage::new(50, 50) };
        let faces = vec![face(60.0, 0.0, 90.0, 20.0), face(5.0, 5.0, 25.0, 25.0)];

        let n = ingest_page(&store, dir.path(), &doc(), &page, &faces).unwrap();
        assert_eq!(n, 1);
        // The surviving face keeps its model index in the file name.
        let rows = store.all_detections().unwrap();
        assert!(rows[0].crop_path.ends_with("0123456789abcdef_p0_f1.jpg"));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_no_faces_is_valid() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::in_memory().unwrap();
        let page = Page { index: 0, image: RgbImage::new(10, 10) };
        assert_eq!(ingest_page(&store, dir.path(), &doc(), &page, &[]).unwrap(), 0);
    }
}
