use std::io;
use std::path::{Path, PathBuf};

/// Pipeline configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory containing the SCRFD and ArcFace ONNX files.
    pub model_dir: PathBuf,
    /// Documents per worker unit.
    pub batch_size: usize,
    /// Dot-product similarity a detection must exceed to join a cluster.
    pub cluster_threshold: f32,
    /// Rasterization resolution in dots per inch.
    pub raster_dpi: u32,
    /// `pdftoppm` executable name or path.
    pub pdftoppm: String,
    /// Minimum SCRFD score for a face to be reported.
    pub detection_threshold: f32,
    /// Whether to draw a progress bar.
    pub progress: bool,
}

impl Config {
    /// Load configuration from `FACESIFT_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let model_dir = std::env::var("FACESIFT_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| facesift_core::default_model_dir());

        Self {
            model_dir,
            batch_size: env_usize("FACESIFT_BATCH_SIZE", 10).max(1),
            cluster_threshold: env_f32(
                "FACESIFT_CLUSTER_THRESHOLD",
                facesift_core::DEFAULT_CLUSTER_THRESHOLD,
            ),
            raster_dpi: env_u32("FACESIFT_RASTER_DPI", facesift_raster::DEFAULT_DPI),
            pdftoppm: std::env::var("FACESIFT_PDFTOPPM").unwrap_or_else(|_| "pdftoppm".to_string()),
            detection_threshold: env_f32(
                "FACESIFT_DETECTION_THRESHOLD",
                facesift_core::detector::SCRFD_CONFIDENCE_THRESHOLD,
            ),
            progress: std::env::var("FACESIFT_PROGRESS")
                .map(|v| v != "0")
                .unwrap_or(true),
        }
    }
}

/// Where everything lives under the output directory.
#[derive(Debug, Clone)]
pub struct OutputLayout {
    pub root: PathBuf,
    /// SQLite state store.
    pub db_path: PathBuf,
    /// Parent of the unsorted directory and the person folders.
    pub faces_dir: PathBuf,
    /// Crops waiting to be organized.
    pub unsorted_dir: PathBuf,
    /// JSON summary written by the organizer.
    pub summary_path: PathBuf,
}

impl OutputLayout {
    pub fn new(root: &Path) -> Self {
        let faces_dir = root.join("identified_faces");
        Self {
            root: root.to_path_buf(),
            db_path: root.join("scan_state.db"),
            unsorted_dir: faces_dir.join("temp_unsorted"),
            faces_dir,
            summary_path: root.join("face_db.json"),
        }
    }

    /// Create the directory tree. Fails if the output root is not writable.
    pub fn create(&self) -> io::Result<()> {
        std::fs::create_dir_all(&self.unsorted_dir)
    }
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_paths() {
        let layout = OutputLayout::new(Path::new("/out"));
        assert_eq!(layout.db_path, PathBuf::from("/out/scan_state.db"));
        assert_eq!(layout.unsorted_dir, PathBuf::from("/out/identified_faces/temp_unsorted"));
        assert_eq!(layout.summary_path, PathBuf::from("/out/face_db.json"));
    }

    #[test]
    fn test_layout_create() {
        let dir = tempfile::tempdir().unwrap();
        let layout = OutputLayout::new(&dir.path().join("nested/out"));
        layout.create().unwrap();
        assert!(layout.unsorted_dir.is_dir());
    }

    #[test]
    fn test_env_parse_fallback() {
        assert_eq!(env_usize("FACESIFT_TEST_UNSET_VARIABLE", 7), 7);
        assert_eq!(env_f32("FACESIFT_TEST_UNSET_VARIABLE", 0.5), 0.5);
    }
}
