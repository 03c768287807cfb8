//! facesift-core — face analysis and identity clustering.
//!
//! Uses SCRFD for face detection and ArcFace for face embeddings, both
//! running via ONNX Runtime for CPU inference, and groups embeddings into
//! identity clusters with a single greedy pass.

pub mod alignment;
pub mod analyzer;
pub mod clustering;
pub mod detector;
pub mod recognizer;
pub mod types;

pub use analyzer::{default_model_dir, AnalyzerError, FaceAnalyzer, OnnxFaceAnalyzer};
pub use clustering::{cluster, ClusterInput, IdentityCluster, DEFAULT_CLUSTER_THRESHOLD};
pub use types::{BoundingBox, DetectedFace, Embedding};
