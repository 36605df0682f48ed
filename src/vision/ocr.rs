//! OCR collaborator boundary
//!
//! Recognition itself is provided from outside the crate. This module defines
//! the interface and turns recognized text into numeric readouts.

use image::RgbaImage;

use super::Region;

/// One recognized run of text
#[derive(Debug, Clone, PartialEq)]
pub struct TextBox {
    pub text: String,
    /// Bounding box in the coordinates of the image passed in
    pub bounds: Region,
    pub confidence: f32,
}

/// Text recognition service
pub trait TextRecognizer: Send + Sync {
    /// Recognize text in `image`, optionally restricted to `region`
    fn recognize_text(
        &self,
        image: &RgbaImage,
        region: Option<Region>,
    ) -> Result<Vec<TextBox>, OcrError>;
}

/// Read a single integer from a region, taking the most confident box that
/// contains digits
pub fn read_number(
    recognizer: &dyn TextRecognizer,
    image: &RgbaImage,
    region: Region,
) -> Option<u32> {
    read_best(recognizer, image, region, parse_number)
}

/// Read a `"current/total"` readout from a region
pub fn read_fraction(
    recognizer: &dyn TextRecognizer,
    image: &RgbaImage,
    region: Region,
) -> Option<(u32, u32)> {
    read_best(recognizer, image, region, parse_fraction)
}

fn read_best<T>(
    recognizer: &dyn TextRecognizer,
    image: &RgbaImage,
    region: Region,
    parse: fn(&str) -> Option<T>,
) -> Option<T> {
    let boxes = match recognizer.recognize_text(image, Some(region)) {
        Ok(boxes) => boxes,
        Err(e) => {
            log::warn!("OCR failed: {}", e);
            return None;
        }
    };

    boxes
        .iter()
        .filter_map(|b| parse(&b.text).map(|value| (value, b.confidence)))
        .max_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(value, _)| value)
}

/// Digits of `text` as a number, ignoring separators and stray characters
/// (`"1,250"` -> 1250, `"x3"` -> 3)
pub fn parse_number(text: &str) -> Option<u32> {
    let digits: String = text.chars().filter(char::is_ascii_digit).collect();
    if digits.is_empty() {
        return None;
    }
    digits.parse().ok()
}

/// Parse a `"current/total"` readout such as `"3/10"` or `"Round 3 / 10"`
pub fn parse_fraction(text: &str) -> Option<(u32, u32)> {
    let (current, total) = text.split_once('/')?;
    Some((parse_number(current)?, parse_number(total)?))
}

/// OCR error types
#[derive(Debug, thiserror::Error)]
pub enum OcrError {
    #[error("OCR engine unavailable")]
    Unavailable,
    #[error("Failed to process image: {0}")]
    ProcessingError(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeOcr;

    #[test]
    fn test_parse_number() {
        assert_eq!(parse_number("42"), Some(42));
        assert_eq!(parse_number("1,250"), Some(1250));
        assert_eq!(parse_number("x3"), Some(3));
        assert_eq!(parse_number("none"), None);
    }

    #[test]
    fn test_parse_fraction() {
        assert_eq!(parse_fraction("3/10"), Some((3, 10)));
        assert_eq!(parse_fraction("Round 3 / 10"), Some((3, 10)));
        assert_eq!(parse_fraction("3 of 10"), None);
        assert_eq!(parse_fraction("/10"), None);
    }

    #[test]
    fn test_read_number_prefers_confident_box() {
        let ocr = FakeOcr::new(vec![("7", 0.4), ("8", 0.9), ("round", 0.99)]);
        let image = RgbaImage::new(4, 4);
        assert_eq!(read_number(&ocr, &image, Region::new(0, 0, 4, 4)), Some(8));
    }

    #[test]
    fn test_read_fraction() {
        let ocr = FakeOcr::new(vec![("2/3", 0.8), ("Round", 0.95)]);
        let image = RgbaImage::new(4, 4);
        assert_eq!(
            read_fraction(&ocr, &image, Region::new(0, 0, 4, 4)),
            Some((2, 3))
        );
    }

    #[test]
    fn test_read_number_on_failure() {
        let ocr = FakeOcr::failing();
        let image = RgbaImage::new(4, 4);
        assert_eq!(read_number(&ocr, &image, Region::new(0, 0, 4, 4)), None);
    }
}
