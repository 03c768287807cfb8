//! facesift-raster — document input for the face pipeline.
//!
//! Discovers source PDFs, identifies them by content hash and rasterizes
//! their pages through poppler's `pdftoppm`.

pub mod document;
pub mod page;
pub mod rasterizer;

pub use document::{content_hash, discover_documents, Document, DocumentError};
pub use page::{clip_to_bounds, CropRegion, Page};
pub use rasterizer::{Pages, PdftoppmRasterizer, RasterError, Rasterizer, DEFAULT_DPI};
