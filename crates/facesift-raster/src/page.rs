//! Page rasters and crop-region clipping.

use image::{imageops, RgbImage};

/// One rasterized document page.
#[derive(Clone)]
pub struct Page {
    /// Zero-based page index within the document.
    pub index: usize,
    pub image: RgbImage,
}

impl Page {
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Copy out a clipped region of the page.
    pub fn crop(&self, region: CropRegion) -> RgbImage {
        imageops::crop_imm(&self.image, region.x, region.y, region.width, region.height).to_image()
    }
}

/// A non-empty pixel rectangle fully inside a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Clip corner coordinates `(x1, y1, x2, y2)` to a `width × height` image.
///
/// Coordinates are truncated to whole pixels. Returns `None` when nothing
/// of the box remains, which happens for boxes hanging off an edge.
pub fn clip_to_bounds(corners: (f32, f32, f32, f32), width: u32, height: u32) -> Option<CropRegion> {
    let (x1, y1, x2, y2) = corners;
    let clamp = |v: f32, max: u32| -> u32 {
        if v.is_nan() {
            0
        } else {
            (v.trunc().max(0.0) as u64).min(max as u64) as u32
        }
    };

    let (x1, x2) = (clamp(x1, width), clamp(x2, width));
    let (y1, y2) = (clamp(y1, height), clamp(y2, height));

    if x2 <= x1 || y2 <= y1 {
        return None;
    }
    Some(CropRegion {
        x: x1,
        y: y1,
        width: x2 - x1,
        height: y2 - y1,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_clip_inside() {
        let r = clip_to_bounds((10.0, 20.0, 50.0, 80.0), 100, 100).unwrap();
        assert_eq!(r, CropRegion { x: 10, y: 20, width: 40, height: 60 });
    }

    #[test]
    fn test_clip_overhanging_edges() {
        let r = clip_to_bounds((-15.5, -3.0, 120.0, 40.9), 100, 50).unwrap();
        assert_eq!(r, CropRegion { x: 0, y: 0, width: 100, height: 40 });
    }

    #[test]
    fn test_clip_fully_outside_is_empty() {
        assert!(clip_to_bounds((-50.0, 10.0, -5.0, 30.0), 100, 100).is_none());
        assert!(clip_to_bounds((110.0, 10.0, 150.0, 30.0), 100, 100).is_none());
    }

    #[test]
    fn test_clip_degenerate_box_is_empty() {
        assert!(clip_to_bounds((30.0, 30.0, 30.4, 60.0), 100, 100).is_none());
        assert!(clip_to_bounds((f32::NAN, 0.0, f32::NAN, 10.0), 100, 100).is_none());
    }

    #[test]
    fn test_crop_copies_region() {
        let mut image = RgbImage::new(20, 10);
        image.put_pixel(5, 3, Rgb([9, 8, 7]));
        let page = Page { index: 0, image };
        let crop = page.crop(CropRegion { x: 5, y: 3, width: 4, height: 2 });
        assert_eq!(crop.dimensions(), (4, 2));
        assert_eq!(crop.get_pixel(0, 0).0, [9, 8, 7]);
    }
}
