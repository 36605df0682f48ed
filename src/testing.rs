//! Test doubles and synthetic screens

use std::cell::RefCell;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};

use image::{DynamicImage, Rgba, RgbaImage};

use crate::android::{ActionChannel, DeviceController, DeviceError, TouchAction};
use crate::config::{Settings, TimingSettings};
use crate::runtime::{CancelToken, Poller};
use crate::vision::{ColorProbe, Frame, FrameCache, OcrError, Region, TextBox, TextRecognizer};

const BLACK: Rgba<u8> = Rgba([0, 0, 0, 255]);

type Scene = Box<dyn FnMut(&TouchAction, &mut RgbaImage) + Send>;

/// Scripted device: serves a mutable screen, records every action and lets
/// a scene callback react to touches by repainting the screen
pub struct FakeDevice {
    screen: Mutex<RgbaImage>,
    actions: Mutex<Vec<TouchAction>>,
    scene: Mutex<Option<Scene>>,
    fail_captures: AtomicBool,
    fail_actions: AtomicBool,
    app_running: AtomicBool,
    captures: AtomicUsize,
}

impl FakeDevice {
    pub fn new(screen: RgbaImage) -> Arc<Self> {
        Arc::new(Self {
            screen: Mutex::new(screen),
            actions: Mutex::new(Vec::new()),
            scene: Mutex::new(None),
            fail_captures: AtomicBool::new(false),
            fail_actions: AtomicBool::new(false),
            app_running: AtomicBool::new(true),
            captures: AtomicUsize::new(0),
        })
    }

    /// Black 1280x720 screen
    pub fn blank() -> Arc<Self> {
        Self::new(screen_image(&[]))
    }

    pub fn set_screen(&self, screen: RgbaImage) {
        *self.screen.lock().unwrap() = screen;
    }

    pub fn set_scene(&self, scene: impl FnMut(&TouchAction, &mut RgbaImage) + Send + 'static) {
        *self.scene.lock().unwrap() = Some(Box::new(scene));
    }

    pub fn fail_captures(&self, fail: bool) {
        self.fail_captures.store(fail, Ordering::SeqCst);
    }

    pub fn fail_actions(&self, fail: bool) {
        self.fail_actions.store(fail, Ordering::SeqCst);
    }

    pub fn set_app_running(&self, running: bool) {
        self.app_running.store(running, Ordering::SeqCst);
    }

    pub fn capture_count(&self) -> usize {
        self.captures.load(Ordering::SeqCst)
    }

    pub fn actions(&self) -> Vec<TouchAction> {
        self.actions.lock().unwrap().clone()
    }

    /// Points of plain taps, in order
    pub fn taps(&self) -> Vec<(i32, i32)> {
        self.actions()
            .into_iter()
            .filter_map(|action| match action {
                TouchAction::Tap { x, y } => Some((x, y)),
                _ => None,
            })
            .collect()
    }

    fn record(&self, action: TouchAction) -> Result<(), DeviceError> {
        if self.fail_actions.load(Ordering::SeqCst) {
            return Err(DeviceError::Action(format!("{:?} rejected", action)));
        }
        self.actions.lock().unwrap().push(action);

        let mut scene = self.scene.lock().unwrap();
        if let Some(scene) = scene.as_mut() {
            let mut screen = self.screen.lock().unwrap();
            scene(&action, &mut *screen);
        }
        Ok(())
    }
}

impl DeviceController for FakeDevice {
    fn capture(&self) -> Result<DynamicImage, DeviceError> {
        if self.fail_captures.load(Ordering::SeqCst) {
            return Err(DeviceError::Capture("screen unavailable".to_string()));
        }
        self.captures.fetch_add(1, Ordering::SeqCst);
        Ok(DynamicImage::ImageRgba8(self.screen.lock().unwrap().clone()))
    }

    fn tap(&self, x: i32, y: i32) -> Result<(), DeviceError> {
        self.record(TouchAction::Tap { x, y })
    }

    fn long_tap(&self, x: i32, y: i32, duration_ms: u32) -> Result<(), DeviceError> {
        self.record(TouchAction::LongTap { x, y, duration_ms })
    }

    fn press_down(&self, x: i32, y: i32) -> Result<(), DeviceError> {
        self.record(TouchAction::PressDown { x, y })
    }

    fn press_move(&self, x: i32, y: i32) -> Result<(), DeviceError> {
        self.record(TouchAction::PressMove { x, y })
    }

    fn press_up(&self, x: i32, y: i32) -> Result<(), DeviceError> {
        self.record(TouchAction::PressUp { x, y })
    }

    fn is_app_running(&self) -> Result<bool, DeviceError> {
        Ok(self.app_running.load(Ordering::SeqCst))
    }
}

/// OCR stand-in returning fixed text boxes
pub struct FakeOcr {
    boxes: Vec<TextBox>,
    fail: bool,
}

impl FakeOcr {
    pub fn new(texts: Vec<(&str, f32)>) -> Self {
        let boxes = texts
            .into_iter()
            .map(|(text, confidence)| TextBox {
                text: text.to_string(),
                bounds: Region::new(0, 0, 1, 1),
                confidence,
            })
            .collect();
        Self { boxes, fail: false }
    }

    pub fn failing() -> Self {
        Self {
            boxes: Vec::new(),
            fail: true,
        }
    }
}

impl TextRecognizer for FakeOcr {
    fn recognize_text(
        &self,
        _image: &RgbaImage,
        _region: Option<Region>,
    ) -> Result<Vec<TextBox>, OcrError> {
        if self.fail {
            return Err(OcrError::Unavailable);
        }
        Ok(self.boxes.clone())
    }
}

/// Paint the probed pixel of each probe with its expected color
pub fn paint_probes(image: &mut RgbaImage, probes: &[ColorProbe]) {
    for probe in probes {
        image.put_pixel(probe.x, probe.y, probe.color.to_rgba());
    }
}

/// Blank out the probed pixels again
pub fn unpaint_probes(image: &mut RgbaImage, probes: &[ColorProbe]) {
    for probe in probes {
        image.put_pixel(probe.x, probe.y, BLACK);
    }
}

/// Black reference-size screen with the given probe groups painted
pub fn screen_image(groups: &[&[ColorProbe]]) -> RgbaImage {
    let (width, height) = crate::game::state::SCREEN_SIZE;
    let mut image = RgbaImage::from_pixel(width, height, BLACK);
    for group in groups {
        paint_probes(&mut image, group);
    }
    image
}

pub fn screen(groups: &[&[ColorProbe]]) -> Frame {
    Frame::new(screen_image(groups))
}

/// Deterministic high-contrast texture, each channel either 0 or 255
pub fn pattern(width: u32, height: u32, seed: u32) -> RgbaImage {
    let mut state = seed.wrapping_mul(2_654_435_761).wrapping_add(1);
    RgbaImage::from_fn(width, height, |_, _| {
        let mut next = || {
            state = state.wrapping_mul(1_103_515_245).wrapping_add(12_345);
            if (state >> 16) & 1 == 1 {
                255
            } else {
                0
            }
        };
        Rgba([next(), next(), next(), 255])
    })
}

/// Settings with no pacing delays and short waits
pub fn fast_settings() -> Settings {
    let mut settings = Settings::default();
    settings.timings = TimingSettings::immediate();
    let t = &mut settings.timeouts;
    t.battle_start_ms = 500;
    t.command_round_ms = 500;
    t.skill_panel_ms = 300;
    t.panel_close_ms = 300;
    t.toggle_ms = 300;
    t.round_exit_ms = 500;
    t.auto_battle_ms = 500;
    t.check_dead_ms = 50;
    t.exit_battle_ms = 600;
    t.resolution_ms = 100;
    t.battle_end_ms = 300;
    t.skip_ms = 300;
    t.settlement_ms = 500;
    t.dialog_ms = 100;
    settings.monitor.interval_ms = 10;
    settings
}

pub fn fast_poller(device: &Arc<FakeDevice>) -> Poller {
    let device: Arc<dyn DeviceController> = device.clone();
    let cache = Arc::new(FrameCache::new(Arc::clone(&device)));
    let channel = ActionChannel::new(device, cache, TimingSettings::immediate());
    Poller::new(channel, CancelToken::new())
}

thread_local! {
    static CAPTURED: RefCell<Vec<(log::Level, String)>> = const { RefCell::new(Vec::new()) };
}

/// Logger that keeps records on the thread that emitted them, so parallel
/// tests never see each other's output
struct CaptureLogger;

impl log::Log for CaptureLogger {
    fn enabled(&self, _metadata: &log::Metadata) -> bool {
        true
    }

    fn log(&self, record: &log::Record) {
        CAPTURED.with(|records| {
            records
                .borrow_mut()
                .push((record.level(), record.args().to_string()))
        });
    }

    fn flush(&self) {}
}

static CAPTURE_LOGGER: CaptureLogger = CaptureLogger;

/// Run `f` and return what it logged on this thread
pub fn capture_logs<T>(f: impl FnOnce() -> T) -> (T, Vec<(log::Level, String)>) {
    static INSTALL: Once = Once::new();
    INSTALL.call_once(|| {
        log::set_logger(&CAPTURE_LOGGER).unwrap();
        log::set_max_level(log::LevelFilter::Trace);
    });

    CAPTURED.with(|records| records.borrow_mut().clear());
    let value = f();
    let records = CAPTURED.with(|records| records.borrow_mut().drain(..).collect());
    (value, records)
}

/// Messages logged at exactly `level`
pub fn at_level(records: &[(log::Level, String)], level: log::Level) -> Vec<&str> {
    records
        .iter()
        .filter(|(l, _)| *l == level)
        .map(|(_, message)| message.as_str())
        .collect()
}
