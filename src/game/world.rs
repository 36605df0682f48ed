//! World navigation capability
//!
//! Battle routines only need two things from the world screens: whether the
//! game is back in the world, and a way to click through dialogs. They get
//! both through [`WorldView`], wired in at construction time.

use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::OnceCell;

use crate::runtime::{PollError, Poller};
use crate::vision::{
    match_color, match_colors, match_template_multi, Color, ColorProbe, Frame, Region, Template,
    TemplateLibrary, TemplateSpec,
};

/// What battle routines need from the world screens
pub trait WorldView: Send + Sync {
    /// Whether the frame shows the world (either map)
    fn is_in_world(&self, frame: &Frame) -> bool;

    /// Click through `count` dialogs, waiting for each one to appear.
    ///
    /// Returns `Ok(false)` if a dialog never showed up or never closed.
    fn dismiss_dialog(&self, poller: &Poller, count: u32) -> Result<bool, PollError>;
}

/// Compass and quest tracker of the full map
pub const WORLD_MAP: [ColorProbe; 2] = [
    ColorProbe::new(60, 660, Color::hex(0x3B7D3B)),
    ColorProbe::new(1220, 660, Color::hex(0xC2B280)),
];

/// Frame of the corner minimap
pub const MINI_MAP: [ColorProbe; 2] = [
    ColorProbe::new(1140, 120, Color::hex(0x1E90FF)),
    ColorProbe::new(1240, 120, Color::hex(0xF5F5DC)),
];

/// Text box and its next-page arrow
pub const DIALOG: [ColorProbe; 2] = [
    ColorProbe::new(640, 620, Color::hex(0xFAF0E6)),
    ColorProbe::new(1180, 640, Color::hex(0xB8860B)),
];

pub const DIALOG_NEXT: (i32, i32) = (1180, 640);

/// Area of the full map where discovered points are drawn
pub const MAP_AREA: Region = Region::new(0, 80, 1280, 640);

const MAP_POINT_TEMPLATE: &str = "map_point";

/// Probe and template based [`WorldView`] for the map screens
pub struct MapScreen {
    templates: Option<Arc<TemplateLibrary>>,
    threshold: f32,
    dialog_timeout: Duration,
    map_point: OnceCell<Option<Arc<Template>>>,
}

impl MapScreen {
    pub fn new(templates: Arc<TemplateLibrary>, threshold: f32, dialog_timeout: Duration) -> Self {
        Self {
            templates: Some(templates),
            threshold,
            dialog_timeout,
            map_point: OnceCell::new(),
        }
    }

    /// Probes only; template lookups always miss
    pub fn detached() -> Self {
        Self {
            templates: None,
            threshold: 1.0,
            dialog_timeout: Duration::from_secs(5),
            map_point: OnceCell::new(),
        }
    }

    pub fn in_world_map(&self, frame: &Frame) -> bool {
        match_colors(frame, &WORLD_MAP)
    }

    pub fn in_mini_map(&self, frame: &Frame) -> bool {
        match_colors(frame, &MINI_MAP)
    }

    pub fn dialog_open(&self, frame: &Frame) -> bool {
        match_color(frame, &DIALOG[0]) && match_color(frame, &DIALOG[1])
    }

    /// Centers of every discovered point drawn on the full map
    pub fn discovered_points(&self, frame: &Frame) -> Vec<(i32, i32)> {
        let Some(template) = self.map_point_template() else {
            return Vec::new();
        };
        let (width, height) = template.dimensions();
        let spec = TemplateSpec::new(template, self.threshold)
            .in_region(MAP_AREA)
            .grayscale(true);

        match_template_multi(frame, &spec)
            .into_iter()
            .map(|m| m.center(width, height))
            .collect()
    }

    fn map_point_template(&self) -> Option<Arc<Template>> {
        self.map_point
            .get_or_init(|| {
                let template = self.templates.as_ref()?.get(MAP_POINT_TEMPLATE);
                if template.is_none() {
                    log::warn!("Map point template not found");
                }
                template
            })
            .clone()
    }
}

impl WorldView for MapScreen {
    fn is_in_world(&self, frame: &Frame) -> bool {
        self.in_world_map(frame) || self.in_mini_map(frame)
    }

    fn dismiss_dialog(&self, poller: &Poller, count: u32) -> Result<bool, PollError> {
        let opts = poller.options(self.dialog_timeout);
        for n in 1..=count {
            if !poller.wait_until(opts, |frame| self.dialog_open(frame))? {
                log::warn!("Dialog {}/{} never appeared", n, count);
                return Ok(false);
            }
            if !poller.tap_until(opts, DIALOG_NEXT, |frame| !self.dialog_open(frame))? {
                log::warn!("Dialog {}/{} did not close", n, count);
                return Ok(false);
            }
            log::debug!("Dismissed dialog {}/{}", n, count);
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::android::TouchAction;
    use crate::testing::{fast_poller, paint_probes, pattern, screen, unpaint_probes, FakeDevice};
    use image::imageops;

    #[test]
    fn test_world_probes() {
        let map = MapScreen::detached();

        let frame = screen(&[&WORLD_MAP]);
        assert!(map.in_world_map(&frame));
        assert!(!map.in_mini_map(&frame));
        assert!(map.is_in_world(&frame));

        let frame = screen(&[&MINI_MAP]);
        assert!(map.is_in_world(&frame));

        assert!(!map.is_in_world(&screen(&[])));
    }

    #[test]
    fn test_dismiss_dialogs() {
        let device = FakeDevice::blank();
        device.set_screen(crate::testing::screen_image(&[&MINI_MAP, &DIALOG]));

        // Two pages, then the box goes away
        let mut pages = 2;
        device.set_scene(move |action, screen| {
            if *action == (TouchAction::Tap { x: 1180, y: 640 }) {
                pages -= 1;
                if pages == 0 {
                    unpaint_probes(screen, &DIALOG);
                }
            }
        });

        let poller = fast_poller(&device);
        let map = MapScreen::detached();
        assert!(map.dismiss_dialog(&poller, 1).unwrap());
        assert_eq!(device.taps(), vec![DIALOG_NEXT, DIALOG_NEXT]);
    }

    #[test]
    fn test_missing_dialog_gives_up() {
        let device = FakeDevice::blank();
        let poller = fast_poller(&device);
        let map = MapScreen::new(
            Arc::new(TemplateLibrary::new("missing-assets")),
            0.9,
            Duration::from_millis(30),
        );

        assert!(!map.dismiss_dialog(&poller, 2).unwrap());
        assert!(device.taps().is_empty());
    }

    #[test]
    fn test_discovered_points() {
        let marker = pattern(12, 12, 7);
        let library = Arc::new(TemplateLibrary::new("missing-assets"));
        library.insert(Template::from_image("map_point__200_200_520_360", marker.clone()));

        let mut image = crate::testing::screen_image(&[]);
        paint_probes(&mut image, &WORLD_MAP);
        for (x, y) in [(220, 220), (300, 250), (450, 330)] {
            imageops::replace(&mut image, &marker, x, y);
        }
        let frame = Frame::new(image);

        let map = MapScreen::new(library, 0.95, Duration::from_secs(1));
        let mut points = map.discovered_points(&frame);
        points.sort();
        assert_eq!(points, vec![(226, 226), (306, 256), (456, 336)]);
    }

    #[test]
    fn test_discovered_points_without_template() {
        let map = MapScreen::detached();
        assert!(map.discovered_points(&screen(&[&WORLD_MAP])).is_empty());
    }
}
