//! Vision and image processing module
//!
//! Frame capture caching, color probing, template matching, and the OCR
//! collaborator boundary. Matchers never mutate their inputs and never fail:
//! an unreadable frame or template is simply "no match".

pub mod capture;
pub mod color;
pub mod ocr;
pub mod template;

use image::{ImageBuffer, Rgba, RgbaImage};
use serde::{Deserialize, Serialize};

pub use capture::{FrameBorrow, FrameCache};
pub use color::{match_color, match_colors, Color, ColorProbe, ScanDirection, Similarity};
pub use ocr::{read_fraction, read_number, OcrError, TextBox, TextRecognizer};
pub use template::{match_template, match_template_multi, Template, TemplateLibrary, TemplateSpec};

/// One captured screen image.
///
/// Frames are immutable once built. Anything that needs to keep a frame
/// around past the next capture holds its own copy or an `Arc`.
#[derive(Debug, Clone)]
pub struct Frame {
    image: RgbaImage,
    sequence: u64,
}

impl Frame {
    /// Wrap an already converted image
    pub fn new(image: RgbaImage) -> Self {
        Self::with_sequence(image, 0)
    }

    pub(crate) fn with_sequence(image: RgbaImage, sequence: u64) -> Self {
        Self { image, sequence }
    }

    /// Build a frame from raw RGBA bytes
    pub fn from_raw(data: &[u8], width: u32, height: u32) -> Result<Self, VisionError> {
        let expected_size = width as usize * height as usize * 4;
        if data.len() != expected_size {
            return Err(VisionError::InvalidFrameData);
        }

        let image: RgbaImage = ImageBuffer::from_raw(width, height, data.to_vec())
            .ok_or(VisionError::InvalidFrameData)?;
        Ok(Self::new(image))
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    /// Monotonic capture number assigned by the frame cache (0 if built by hand)
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Pixel at signed coordinates, `None` outside the frame
    pub fn pixel(&self, x: i64, y: i64) -> Option<Rgba<u8>> {
        if x < 0 || y < 0 || x >= self.width() as i64 || y >= self.height() as i64 {
            return None;
        }
        Some(*self.image.get_pixel(x as u32, y as u32))
    }

    /// Copy out a region, clamped to the frame bounds
    pub fn crop(&self, region: Region) -> Option<RgbaImage> {
        let region = region.clamp_to(self.width(), self.height())?;
        let sub = image::imageops::crop_imm(
            &self.image,
            region.x1,
            region.y1,
            region.width(),
            region.height(),
        );
        Some(sub.to_image())
    }
}

/// Axis-aligned rectangle in frame coordinates, `[x1, x2) x [y1, y2)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Region {
    pub x1: u32,
    pub y1: u32,
    pub x2: u32,
    pub y2: u32,
}

impl Region {
    pub const fn new(x1: u32, y1: u32, x2: u32, y2: u32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> u32 {
        self.x2.saturating_sub(self.x1)
    }

    pub fn height(&self) -> u32 {
        self.y2.saturating_sub(self.y1)
    }

    pub fn is_empty(&self) -> bool {
        self.width() == 0 || self.height() == 0
    }

    pub fn contains(&self, x: u32, y: u32) -> bool {
        x >= self.x1 && x < self.x2 && y >= self.y1 && y < self.y2
    }

    /// Intersect with a `width x height` frame; `None` if nothing is left
    pub fn clamp_to(&self, width: u32, height: u32) -> Option<Region> {
        let clamped = Region {
            x1: self.x1.min(width),
            y1: self.y1.min(height),
            x2: self.x2.min(width),
            y2: self.y2.min(height),
        };
        (!clamped.is_empty()).then_some(clamped)
    }
}

/// A template hit: top-left corner in full-frame coordinates plus score
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub x: u32,
    pub y: u32,
    pub score: f32,
}

impl MatchResult {
    /// Center of the matched area for a template of the given size
    pub fn center(&self, width: u32, height: u32) -> (i32, i32) {
        ((self.x + width / 2) as i32, (self.y + height / 2) as i32)
    }
}

/// Vision system errors
#[derive(Debug, thiserror::Error)]
pub enum VisionError {
    #[error("Failed to load template {path}: {source}")]
    TemplateLoad {
        path: String,
        #[source]
        source: image::ImageError,
    },
    #[error("Invalid color value: {0}")]
    InvalidColor(String),
    #[error("Invalid frame data")]
    InvalidFrameData,
    #[error("Template {template} is larger than the search area")]
    TemplateTooLarge { template: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_from_raw() {
        let data = vec![255u8; 10 * 10 * 4];
        let frame = Frame::from_raw(&data, 10, 10).unwrap();
        assert_eq!(frame.dimensions(), (10, 10));

        assert!(Frame::from_raw(&data[..100], 10, 10).is_err());
    }

    #[test]
    fn test_pixel_bounds() {
        let frame = Frame::new(RgbaImage::from_pixel(4, 4, Rgba([1, 2, 3, 255])));
        assert_eq!(frame.pixel(3, 3), Some(Rgba([1, 2, 3, 255])));
        assert_eq!(frame.pixel(-1, 0), None);
        assert_eq!(frame.pixel(4, 0), None);
    }

    #[test]
    fn test_region_clamp() {
        let region = Region::new(5, 5, 50, 50);
        assert_eq!(region.clamp_to(20, 10), Some(Region::new(5, 5, 20, 10)));
        assert_eq!(Region::new(30, 0, 40, 5).clamp_to(20, 10), None);
    }

    #[test]
    fn test_crop_is_clamped() {
        let frame = Frame::new(RgbaImage::new(8, 8));
        let crop = frame.crop(Region::new(6, 6, 20, 20)).unwrap();
        assert_eq!(crop.dimensions(), (2, 2));
    }
}
