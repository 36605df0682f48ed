//! Point and region color probing
//!
//! A [`ColorProbe`] asserts that some pixel in a small square around a point
//! is close enough to an expected color. Probe tables for the game screens
//! are compile-time constants, so the constructors here are `const`.

use std::fmt;
use std::str::FromStr;

use image::{Rgb, Rgba};
use serde::{Deserialize, Serialize};

use super::{Frame, VisionError};

/// An RGB color
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Color(pub [u8; 3]);

impl Color {
    /// Build from a packed `0xRRGGBB` value
    pub const fn hex(rgb: u32) -> Self {
        Self([(rgb >> 16) as u8, (rgb >> 8) as u8, rgb as u8])
    }

    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self([r, g, b])
    }

    pub fn r(&self) -> u8 {
        self.0[0]
    }

    pub fn g(&self) -> u8 {
        self.0[1]
    }

    pub fn b(&self) -> u8 {
        self.0[2]
    }

    /// Opaque RGBA pixel of this color
    pub fn to_rgba(self) -> Rgba<u8> {
        Rgba([self.0[0], self.0[1], self.0[2], 255])
    }
}

impl From<[u8; 3]> for Color {
    fn from(rgb: [u8; 3]) -> Self {
        Self(rgb)
    }
}

impl From<Rgb<u8>> for Color {
    fn from(pixel: Rgb<u8>) -> Self {
        Self(pixel.0)
    }
}

impl From<Rgba<u8>> for Color {
    fn from(pixel: Rgba<u8>) -> Self {
        Self([pixel[0], pixel[1], pixel[2]])
    }
}

/// Parses `#RRGGBB`, `RRGGBB` or `0xRRGGBB`
impl FromStr for Color {
    type Err = VisionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let digits = trimmed
            .strip_prefix('#')
            .or_else(|| trimmed.strip_prefix("0x"))
            .or_else(|| trimmed.strip_prefix("0X"))
            .unwrap_or(trimmed);

        if digits.len() != 6 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(VisionError::InvalidColor(s.to_string()));
        }

        u32::from_str_radix(digits, 16)
            .map(Color::hex)
            .map_err(|_| VisionError::InvalidColor(s.to_string()))
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02X}{:02X}{:02X}", self.0[0], self.0[1], self.0[2])
    }
}

/// How two colors are compared
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Similarity {
    /// Plain RGB euclidean distance
    #[default]
    Euclidean,
    /// Red-mean weighted distance, closer to perceived difference
    RedMean,
}

/// `sqrt(3 * 255^2)`
const MAX_EUCLIDEAN: f64 = 441.672_955_930_063_7;

impl Similarity {
    /// Similarity in `[0, 1]`; 1 means identical
    pub fn score(self, a: Color, b: Color) -> f64 {
        let (distance, max) = match self {
            Similarity::Euclidean => (euclidean_distance(a, b), MAX_EUCLIDEAN),
            Similarity::RedMean => (red_mean_distance(a, b), max_red_mean_distance()),
        };
        (1.0 - distance / max).clamp(0.0, 1.0)
    }
}

fn euclidean_distance(a: Color, b: Color) -> f64 {
    let dr = a.r() as f64 - b.r() as f64;
    let dg = a.g() as f64 - b.g() as f64;
    let db = a.b() as f64 - b.b() as f64;
    (dr * dr + dg * dg + db * db).sqrt()
}

fn red_mean_distance(a: Color, b: Color) -> f64 {
    let mean_r = (a.r() as f64 + b.r() as f64) / 2.0;
    let dr = a.r() as f64 - b.r() as f64;
    let dg = a.g() as f64 - b.g() as f64;
    let db = a.b() as f64 - b.b() as f64;
    ((2.0 + mean_r / 256.0) * dr * dr + 4.0 * dg * dg + (2.0 + (255.0 - mean_r) / 256.0) * db * db)
        .sqrt()
}

/// Black against white is the farthest pair under the red-mean weighting
fn max_red_mean_distance() -> f64 {
    red_mean_distance(Color::rgb(0, 0, 0), Color::rgb(255, 255, 255))
}

/// Order in which pixels of a probe square are visited.
///
/// Only decides which matching pixel is reported first, never whether one
/// is found.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScanDirection {
    #[default]
    TopLeft,
    TopRight,
    BottomLeft,
    BottomRight,
    /// Rings of increasing distance around the probe point
    Center,
}

impl ScanDirection {
    /// Offsets `(dx, dy)` of a `(2r+1)^2` square in scan order
    pub fn offsets(self, radius: u32) -> Vec<(i64, i64)> {
        let r = radius as i64;
        let forward: Vec<i64> = (-r..=r).collect();
        let backward: Vec<i64> = (-r..=r).rev().collect();

        let (rows, cols) = match self {
            ScanDirection::TopLeft => (&forward, &forward),
            ScanDirection::TopRight => (&forward, &backward),
            ScanDirection::BottomLeft => (&backward, &forward),
            ScanDirection::BottomRight => (&backward, &backward),
            ScanDirection::Center => {
                let mut offsets: Vec<(i64, i64)> = forward
                    .iter()
                    .flat_map(|&dy| forward.iter().map(move |&dx| (dx, dy)))
                    .collect();
                offsets.sort_by_key(|&(dx, dy)| (dx.abs().max(dy.abs()), dy, dx));
                return offsets;
            }
        };

        rows.iter()
            .flat_map(|&dy| cols.iter().map(move |&dx| (dx, dy)))
            .collect()
    }
}

/// Single pixel-region color assertion
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ColorProbe {
    pub x: u32,
    pub y: u32,
    pub color: Color,
    /// Half-width of the searched square
    pub radius: u32,
    /// Minimum similarity in `[0, 1]`
    pub threshold: f64,
    pub direction: ScanDirection,
    pub similarity: Similarity,
}

impl ColorProbe {
    pub const DEFAULT_RADIUS: u32 = 2;
    pub const DEFAULT_THRESHOLD: f64 = 0.9;

    pub const fn new(x: u32, y: u32, color: Color) -> Self {
        Self {
            x,
            y,
            color,
            radius: Self::DEFAULT_RADIUS,
            threshold: Self::DEFAULT_THRESHOLD,
            direction: ScanDirection::TopLeft,
            similarity: Similarity::Euclidean,
        }
    }

    /// Probe with the color given as a hex string
    pub fn from_hex(x: u32, y: u32, color: &str) -> Result<Self, VisionError> {
        Ok(Self::new(x, y, color.parse()?))
    }

    pub const fn with_radius(mut self, radius: u32) -> Self {
        self.radius = radius;
        self
    }

    pub const fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    pub const fn with_direction(mut self, direction: ScanDirection) -> Self {
        self.direction = direction;
        self
    }

    pub const fn with_similarity(mut self, similarity: Similarity) -> Self {
        self.similarity = similarity;
        self
    }

    /// Tap point for the probed element
    pub fn point(&self) -> (i32, i32) {
        (self.x as i32, self.y as i32)
    }
}

/// First pixel in the probe square that matches, in scan order
pub fn find_color(frame: &Frame, probe: &ColorProbe) -> Option<(u32, u32)> {
    probe
        .direction
        .offsets(probe.radius)
        .into_iter()
        .find_map(|(dx, dy)| {
            let x = probe.x as i64 + dx;
            let y = probe.y as i64 + dy;
            let pixel = frame.pixel(x, y)?;
            let score = probe.similarity.score(Color::from(pixel), probe.color);
            (score >= probe.threshold).then_some((x as u32, y as u32))
        })
}

/// Whether any pixel in the probe square matches
pub fn match_color(frame: &Frame, probe: &ColorProbe) -> bool {
    find_color(frame, probe).is_some()
}

/// Whether every probe matches; stops at the first failure
pub fn match_colors(frame: &Frame, probes: &[ColorProbe]) -> bool {
    probes.iter().all(|probe| match_color(frame, probe))
}
