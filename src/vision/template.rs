//! Template loading and matching
//!
//! Templates are small reference images searched for inside a frame with a
//! zero-mean normalized cross-correlation surface. A template file may carry
//! its own search region in its name: `<name>__<x1>_<y1>_<x2>_<y2>.<ext>`.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use image::imageops;
use image::{GrayImage, ImageBuffer, Luma, RgbaImage};
use imageproc::integral_image::{integral_image, integral_squared_image};
use imageproc::template_matching::{self, MatchTemplateMethod};

use super::{Frame, MatchResult, Region, VisionError};

/// Correlation scores, one per candidate top-left position
type Surface = ImageBuffer<Luma<f32>, Vec<f32>>;

/// Running sums of pixel values or their squares
type SumTable = ImageBuffer<Luma<u64>, Vec<u64>>;

/// Per-pixel variance below which a window or template counts as flat
const MIN_VARIANCE: f64 = 1.0;

/// A reference image to look for on screen
#[derive(Debug, Clone)]
pub struct Template {
    name: String,
    image: RgbaImage,
    gray: GrayImage,
    region: Option<Region>,
}

impl Template {
    /// Load a template file, honoring a region encoded in its name
    pub fn load(path: impl AsRef<Path>) -> Result<Self, VisionError> {
        let path = path.as_ref();
        let image = image::open(path)
            .map_err(|source| VisionError::TemplateLoad {
                path: path.display().to_string(),
                source,
            })?
            .to_rgba8();

        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(Self::from_image(&stem, image))
    }

    /// Build a template from an in-memory image; `name` may carry a region suffix
    pub fn from_image(name: &str, image: RgbaImage) -> Self {
        let (base, region) = split_region_suffix(name);
        let gray = imageops::grayscale(&image);
        Self {
            name: base,
            image,
            gray,
            region,
        }
    }

    /// Name without the region suffix
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    pub fn gray(&self) -> &GrayImage {
        &self.gray
    }

    /// Search region encoded in the file name, if any
    pub fn region(&self) -> Option<Region> {
        self.region
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }
}

/// Split `name__x1_y1_x2_y2` into the base name and its region.
///
/// Anything that does not parse as four increasing coordinates leaves the
/// name untouched.
pub fn split_region_suffix(stem: &str) -> (String, Option<Region>) {
    let Some((base, coords)) = stem.rsplit_once("__") else {
        return (stem.to_string(), None);
    };

    let parsed: Vec<u32> = coords
        .split('_')
        .map_while(|part| part.parse().ok())
        .collect();
    match parsed[..] {
        [x1, y1, x2, y2]
            if coords.split('_').count() == 4 && x2 > x1 && y2 > y1 && !base.is_empty() =>
        {
            (base.to_string(), Some(Region::new(x1, y1, x2, y2)))
        }
        _ => (stem.to_string(), None),
    }
}

/// What to search for and how
#[derive(Debug, Clone)]
pub struct TemplateSpec {
    pub template: Arc<Template>,
    /// Minimum correlation score in `[0, 1]`
    pub threshold: f32,
    /// Explicit search region; the template's own region wins over this
    pub region: Option<Region>,
    /// Compare luma only instead of all three color channels
    pub grayscale: bool,
}

impl TemplateSpec {
    pub fn new(template: Arc<Template>, threshold: f32) -> Self {
        Self {
            template,
            threshold,
            region: None,
            grayscale: false,
        }
    }

    pub fn in_region(mut self, region: Region) -> Self {
        self.region = Some(region);
        self
    }

    pub fn grayscale(mut self, grayscale: bool) -> Self {
        self.grayscale = grayscale;
        self
    }

    /// Region actually searched: file-name region, then explicit region
    pub fn effective_region(&self) -> Option<Region> {
        self.template.region().or(self.region)
    }
}

/// Best match of the template, if it clears the threshold
pub fn match_template(frame: &Frame, spec: &TemplateSpec) -> Option<MatchResult> {
    let (surface, offset_x, offset_y) = correlation_surface(frame, spec)?;

    let mut best: Option<(u32, u32, f32)> = None;
    for (x, y, score) in surface.enumerate_pixels() {
        let score = score[0];
        if !score.is_finite() {
            continue;
        }
        if best.map_or(true, |(_, _, best_score)| score > best_score) {
            best = Some((x, y, score));
        }
    }

    let (x, y, score) = best?;
    if score < spec.threshold {
        log::debug!(
            "Template {} best score {:.3} below {:.3}",
            spec.template.name(),
            score,
            spec.threshold
        );
        return None;
    }

    Some(MatchResult {
        x: x + offset_x,
        y: y + offset_y,
        score,
    })
}

/// Every non-overlapping location scoring at or above the threshold,
/// best first.
///
/// Neighbouring positions of one on-screen instance are collapsed into the
/// highest-scoring one.
pub fn match_template_multi(frame: &Frame, spec: &TemplateSpec) -> Vec<MatchResult> {
    let Some((surface, offset_x, offset_y)) = correlation_surface(frame, spec) else {
        return Vec::new();
    };

    let mut candidates: Vec<(u32, u32, f32)> = surface
        .enumerate_pixels()
        .filter(|(_, _, score)| score[0].is_finite() && score[0] >= spec.threshold)
        .map(|(x, y, score)| (x, y, score[0]))
        .collect();
    candidates.sort_by(|a, b| b.2.total_cmp(&a.2).then((a.1, a.0).cmp(&(b.1, b.0))));

    let (width, height) = spec.template.dimensions();
    let mut kept: Vec<(u32, u32, f32)> = Vec::new();
    for candidate in candidates {
        let overlaps = kept
            .iter()
            .any(|k| k.0.abs_diff(candidate.0) < width && k.1.abs_diff(candidate.1) < height);
        if !overlaps {
            kept.push(candidate);
        }
    }

    kept.into_iter()
        .map(|(x, y, score)| MatchResult {
            x: x + offset_x,
            y: y + offset_y,
            score,
        })
        .collect()
}

fn correlation_surface(frame: &Frame, spec: &TemplateSpec) -> Option<(Surface, u32, u32)> {
    let (frame_w, frame_h) = frame.dimensions();
    let region = spec
        .effective_region()
        .unwrap_or(Region::new(0, 0, frame_w, frame_h))
        .clamp_to(frame_w, frame_h)?;

    let template = &spec.template;
    let (tw, th) = template.dimensions();
    if tw == 0 || th == 0 || tw > region.width() || th > region.height() {
        let error = VisionError::TemplateTooLarge {
            template: template.name().to_string(),
        };
        log::debug!("{}", error);
        return None;
    }

    let crop = imageops::crop_imm(
        frame.image(),
        region.x1,
        region.y1,
        region.width(),
        region.height(),
    )
    .to_image();

    let surface = if spec.grayscale {
        zero_mean_ncc(&imageops::grayscale(&crop), template.gray())
    } else {
        let channels: Vec<Surface> = (0..3)
            .map(|c| zero_mean_ncc(&channel(&crop, c), &channel(template.image(), c)))
            .collect();
        average_surfaces(&channels)
    };

    Some((surface, region.x1, region.y1))
}

/// Correlation of mean-subtracted windows against the mean-subtracted
/// template, in `[-1, 1]`.
///
/// A flat window scores NaN rather than its brightness ratio to the
/// template, so uniform screens never match.
fn zero_mean_ncc(image: &GrayImage, template: &GrayImage) -> Surface {
    let cross =
        template_matching::match_template(image, template, MatchTemplateMethod::CrossCorrelation);
    let (tw, th) = template.dimensions();
    let n = f64::from(tw * th);

    let (t_sum, t_squares) = template.pixels().fold((0.0f64, 0.0f64), |(sum, sq), p| {
        let v = f64::from(p[0]);
        (sum + v, sq + v * v)
    });
    let t_var = t_squares - t_sum * t_sum / n;

    let sums: SumTable = integral_image::<_, u64>(image);
    let squares: SumTable = integral_squared_image::<_, u64>(image);
    let window = |table: &SumTable, x: u32, y: u32| {
        let at = |x: u32, y: u32| table.get_pixel(x, y)[0] as f64;
        at(x + tw, y + th) + at(x, y) - at(x + tw, y) - at(x, y + th)
    };

    Surface::from_fn(cross.width(), cross.height(), |x, y| {
        let w_sum = window(&sums, x, y);
        let w_var = window(&squares, x, y) - w_sum * w_sum / n;
        if t_var < MIN_VARIANCE * n || w_var < MIN_VARIANCE * n {
            return Luma([f32::NAN]);
        }
        let numerator = f64::from(cross.get_pixel(x, y)[0]) - w_sum * t_sum / n;
        Luma([(numerator / (w_var * t_var).sqrt()).clamp(-1.0, 1.0) as f32])
    })
}

fn channel(image: &RgbaImage, index: usize) -> GrayImage {
    GrayImage::from_fn(image.width(), image.height(), |x, y| {
        Luma([image.get_pixel(x, y)[index]])
    })
}

/// Per-position mean over channels; a channel with no energy (NaN) is skipped
fn average_surfaces(channels: &[Surface]) -> Surface {
    let (width, height) = channels[0].dimensions();
    Surface::from_fn(width, height, |x, y| {
        let (sum, count) = channels
            .iter()
            .map(|s| s.get_pixel(x, y)[0])
            .filter(|v| v.is_finite())
            .fold((0.0f32, 0u32), |(sum, count), v| (sum + v, count + 1));
        Luma([if count == 0 { f32::NAN } else { sum / count as f32 }])
    })
}

/// Lazily loaded, cached template assets
pub struct TemplateLibrary {
    dir: PathBuf,
    cache: Mutex<HashMap<String, Arc<Template>>>,
}

impl TemplateLibrary {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Register an in-memory template under its base name
    pub fn insert(&self, template: Template) -> Arc<Template> {
        let template = Arc::new(template);
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(template.name().to_string(), Arc::clone(&template));
        template
    }

    /// Look a template up by base name, loading it from the asset directory
    /// on first use. Missing or unreadable assets yield `None`.
    pub fn get(&self, name: &str) -> Option<Arc<Template>> {
        if let Some(template) = self
            .cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
        {
            return Some(Arc::clone(template));
        }

        let path = self.find_asset(name)?;
        match Template::load(&path) {
            Ok(template) => Some(self.insert(template)),
            Err(e) => {
                log::warn!("{}", e);
                None
            }
        }
    }

    fn find_asset(&self, name: &str) -> Option<PathBuf> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) => {
                log::debug!("Template directory {} unreadable: {}", self.dir.display(), e);
                return None;
            }
        };

        entries
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.is_file())
            .find(|path| {
                path.file_stem()
                    .map(|stem| split_region_suffix(&stem.to_string_lossy()).0 == name)
                    .unwrap_or(false)
            })
    }
}
