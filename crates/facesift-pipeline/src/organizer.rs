//! Directory organizer: clusters → person folders + JSON summary.

use crate::store::{Detection, DetectionId, StateStore, StoreError};
use facesift_core::{cluster, ClusterInput, IdentityCluster};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const PERSON_DIR_PREFIX: &str = "Person_";

#[derive(Error, Debug)]
pub enum OrganizeError {
    #[error("state store: {0}")]
    Store(#[from] StoreError),
    #[error("{action} {path}: {source}")]
    Io {
        action: &'static str,
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("summary encoding: {0}")]
    Encode(#[from] serde_json::Error),
}

impl OrganizeError {
    fn io(action: &'static str, path: &Path, source: io::Error) -> Self {
        Self::Io {
            action,
            path: path.display().to_string(),
            source,
        }
    }
}

/// One entry of the summary document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonSummary {
    pub person_id: usize,
    pub detection_count: usize,
    pub source_documents: Vec<String>,
}

/// Cluster detections in the order given (insertion order from the store).
pub fn cluster_detections(detections: &[Detection], threshold: f32) -> Vec<IdentityCluster> {
    cluster(
        detections.iter().map(|d| ClusterInput {
            id: d.id,
            document: &d.document_path,
            embedding: &d.embedding,
        }),
        threshold,
    )
}

/// Move each cluster's crops into `Person_<n>` under `faces_dir`, recording
/// the new paths in the store. Returns one summary entry per cluster.
pub fn organize(
    clusters: &[IdentityCluster],
    detections: &[Detection],
    faces_dir: &Path,
    store: &StateStore,
) -> Result<Vec<PersonSummary>, OrganizeError> {
    let by_id: HashMap<DetectionId, &Detection> = detections.iter().map(|d| (d.id, d)).collect();
    let mut summary = Vec::with_capacity(clusters.len());

    for (index, cluster) in clusters.iter().enumerate() {
        let person_id = index + 1;
        let person_dir = faces_dir.join(format!("{PERSON_DIR_PREFIX}{person_id}"));
        std::fs::create_dir_all(&person_dir)
            .map_err(|e| OrganizeError::io("create", &person_dir, e))?;

        for id in &cluster.members {
            let Some(detection) = by_id.get(id) else {
                continue;
            };
            if let Some(moved) = move_crop(&detection.crop_path, &person_dir)? {
                store.update_crop_path(detection.id, &moved)?;
            }
        }

        summary.push(PersonSummary {
            person_id,
            detection_count: cluster.members.len(),
            source_documents: cluster.documents.clone(),
        });
    }

    remove_empty_person_dirs(faces_dir)?;
    Ok(summary)
}

/// Move `crop` into `dir`. Returns the new path, or `None` when there was
/// nothing to move (already in place, or missing from an earlier partial run).
fn move_crop(crop: &Path, dir: &Path) -> Result<Option<PathBuf>, OrganizeError> {
    let Some(name) = crop.file_name() else {
        return Ok(None);
    };
    let target = dir.join(name);
    if target == crop || !crop.exists() {
        return Ok(None);
    }

    if std::fs::rename(crop, &target).is_err() {
        // Different filesystem: copy, then drop the original.
        std::fs::copy(crop, &target).map_err(|e| OrganizeError::io("copy", crop, e))?;
        std::fs::remove_file(crop).map_err(|e| OrganizeError::io("remove", crop, e))?;
    }
    Ok(Some(target))
}

/// Person folders emptied by a renumbering re-run are deleted.
fn remove_empty_person_dirs(faces_dir: &Path) -> Result<(), OrganizeError> {
    let entries = std::fs::read_dir(faces_dir).map_err(|e| OrganizeError::io("list", faces_dir, e))?;
    for entry in entries.flatten() {
        let path = entry.path();
        let is_person = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with(PERSON_DIR_PREFIX));
        if !is_person || !path.is_dir() {
            continue;
        }
        let empty = std::fs::read_dir(&path)
            .map(|mut d| d.next().is_none())
            .unwrap_or(false);
        if empty {
            std::fs::remove_dir(&path).map_err(|e| OrganizeError::io("remove", &path, e))?;
            tracing::debug!(path = %path.display(), "removed empty person folder");
        }
    }
    Ok(())
}

/// Write the summary as one pretty-printed JSON array. Goes through a
/// temporary file and a rename, so the file is either old or complete.
pub fn write_summary(summary: &[PersonSummary], path: &Path) -> Result<(), OrganizeError> {
    let json = serde_json::to_vec_pretty(summary)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json).map_err(|e| OrganizeError::io("write", &tmp, e))?;
    std::fs::rename(&tmp, path).map_err(|e| OrganizeError::io("rename", path, e))?;
    Ok(())
}

/// Cluster everything in the store, organize crops and write the summary.
pub fn cluster_and_organize(
    store: &StateStore,
    faces_dir: &Path,
    summary_path: &Path,
    threshold: f32,
) -> Result<Vec<PersonSummary>, OrganizeError> {
    let detections = store.all_detections()?;
    if detections.is_empty() {
        tracing::info!("no faces found to organize");
    }

    let clusters = cluster_detections(&detections, threshold);
    let summary = organize(&clusters, &detections, faces_dir, store)?;
    write_summary(&summary, summary_path)?;

    tracing::info!(
        people = summary.len(),
        detections = detections.len(),
        summary = %summary_path.display(),
        "organization complete"
    );
    Ok(summary)
}
