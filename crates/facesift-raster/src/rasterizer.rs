//! PDF rasterization via poppler's `pdftoppm`.

use crate::page::Page;
use image::RgbImage;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;
use thiserror::Error;

/// Default rasterization resolution. Balances memory use and detection accuracy.
pub const DEFAULT_DPI: u32 = 120;

const PAGE_PREFIX: &str = "page";

#[derive(Error, Debug)]
pub enum RasterError {
    #[error("failed to run {tool}: {source}")]
    ToolUnavailable {
        tool: String,
        #[source]
        source: std::io::Error,
    },
    #[error("rasterizer failed on {path}: {stderr}")]
    ToolFailed { path: String, stderr: String },
    #[error("document produced no pages: {0}")]
    NoPages(String),
    #[error("page {index} could not be decoded: {source}")]
    Decode {
        index: usize,
        #[source]
        source: image::ImageError,
    },
    #[error("scratch directory: {0}")]
    Scratch(#[from] std::io::Error),
}

/// Turns a document into an ordered sequence of page rasters.
pub trait Rasterizer {
    fn rasterize(&self, path: &Path, dpi: u32) -> Result<Pages, RasterError>;
}

/// Ordered page rasters of one document.
///
/// File-backed pages are decoded one at a time as the iterator advances, so
/// only a single page is resident. The scratch directory is removed on drop.
pub struct Pages {
    source: PageSource,
    next_index: usize,
}

enum PageSource {
    Files { _scratch: TempDir, paths: Vec<PathBuf> },
    Memory(Vec<RgbImage>),
}

impl Pages {
    /// Pages already held in memory, in page order.
    pub fn from_images(images: Vec<RgbImage>) -> Self {
        let mut images = images;
        images.reverse();
        Self {
            source: PageSource::Memory(images),
            next_index: 0,
        }
    }

    fn from_files(scratch: TempDir, mut paths: Vec<PathBuf>) -> Self {
        paths.reverse();
        Self {
            source: PageSource::Files { _scratch: scratch, paths },
            next_index: 0,
        }
    }

    pub fn remaining(&self) -> usize {
        match &self.source {
            PageSource::Files { paths, .. } => paths.len(),
            PageSource::Memory(images) => images.len(),
        }
    }
}

impl Iterator for Pages {
    type Item = Result<Page, RasterError>;

    fn next(&mut self) -> Option<Self::Item> {
        let index = self.next_index;
        let image = match &mut self.source {
            PageSource::Memory(images) => Ok(images.pop()?),
            PageSource::Files { paths, .. } => {
                let path = paths.pop()?;
                image::open(&path)
                    .map(|img| img.to_rgb8())
                    .map_err(|source| RasterError::Decode { index, source })
            }
        };
        self.next_index += 1;
        Some(image.map(|image| Page { index, image }))
    }
}

/// Rasterizer backed by the `pdftoppm` command-line tool.
pub struct PdftoppmRasterizer {
    program: String,
}

impl PdftoppmRasterizer {
    pub fn new(program: impl Into<String>) -> Self {
        Self { program: program.into() }
    }
}

impl Default for PdftoppmRasterizer {
    fn default() -> Self {
        Self::new("pdftoppm")
    }
}

impl Rasterizer for PdftoppmRasterizer {
    fn rasterize(&self, path: &Path, dpi: u32) -> Result<Pages, RasterError> {
        let scratch = tempfile::Builder::new().prefix("facesift-pages-").tempdir()?;
        let output_root = scratch.path().join(PAGE_PREFIX);

        let output = Command::new(&self.program)
            .arg("-r")
            .arg(dpi.to_string())
            .arg("-png")
            .arg(path)
            .arg(&output_root)
            .output()
            .map_err(|source| RasterError::ToolUnavailable {
                tool: self.program.clone(),
                source,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(RasterError::ToolFailed {
                path: path.display().to_string(),
                stderr: if stderr.is_empty() { output.status.to_string() } else { stderr },
            });
        }

        let paths = collect_page_files(scratch.path())?;
        if paths.is_empty() {
            return Err(RasterError::NoPages(path.display().to_string()));
        }

        tracing::debug!(path = %path.display(), pages = paths.len(), dpi, "rasterized document");
        Ok(Pages::from_files(scratch, paths))
    }
}

/// Page files written by `pdftoppm`, ordered by page number.
///
/// Names look like `page-1.png` or `page-001.png` depending on page count.
fn collect_page_files(dir: &Path) -> Result<Vec<PathBuf>, std::io::Error> {
    let mut numbered = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let number = path
            .file_stem()
            .and_then(|s| s.to_str())
            .and_then(|s| s.strip_prefix(PAGE_PREFIX))
            .and_then(|s| s.strip_prefix('-'))
            .and_then(|s| s.parse::<u32>().ok());
        if let Some(n) = number {
            numbered.push((n, path));
        }
    }
    numbered.sort_by_key(|(n, _)| *n);
    Ok(numbered.into_iter().map(|(_, p)| p).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_memory_pages_in_order() {
        let pages = Pages::from_images(vec![
            RgbImage::from_pixel(1, 1, Rgb([1, 0, 0])),
            RgbImage::from_pixel(1, 1, Rgb([2, 0, 0])),
        ]);
        assert_eq!(pages.remaining(), 2);
        let got: Vec<(usize, u8)> = pages
            .map(|p| p.unwrap())
            .map(|p| (p.index, p.image.get_pixel(0, 0).0[0]))
            .collect();
        assert_eq!(got, vec![(0, 1), (1, 2)]);
    }

    #[test]
    fn test_collect_page_files_numeric_order() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["page-10.png", "page-2.png", "page-1.png", "other.png"] {
            std::fs::write(dir.path().join(name), b"").unwrap();
        }
        let files = collect_page_files(dir.path()).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["page-1.png", "page-2.png", "page-10.png"]);
    }

    #[test]
    fn test_file_pages_decode_lazily() {
        let dir = tempfile::tempdir().unwrap();
        RgbImage::from_pixel(3, 2, Rgb([10, 20, 30]))
            .save(dir.path().join("page-1.png"))
            .unwrap();
        std::fs::write(dir.path().join("page-2.png"), b"not a png").unwrap();
        let paths = collect_page_files(dir.path()).unwrap();

        let mut pages = Pages::from_files(dir, paths);
        let first = pages.next().unwrap().unwrap();
        assert_eq!((first.index, first.width(), first.height()), (0, 3, 2));
        assert!(matches!(pages.next(), Some(Err(RasterError::Decode { index: 1, .. }))));
        assert!(pages.next().is_none());
    }

    #[test]
    fn test_missing_tool_is_an_error() {
        let r = PdftoppmRasterizer::new("/nonexistent/pdftoppm");
        let err = r.rasterize(Path::new("/nonexistent/a.pdf"), DEFAULT_DPI).err();
        assert!(matches!(err, Some(RasterError::ToolUnavailable { .. })));
    }
}
