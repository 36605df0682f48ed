//! Battle Pilot - screen-driven battle automation for Android RPGs
//!
//! The library captures the device screen, decides which state the game is
//! in from color probes and template matches, and issues touch actions to
//! play through a battle script. Every wait is bounded.
//!
//! ## Layout
//!
//! - `vision`: frame cache, color probes, template matching, OCR boundary
//! - `android`: device collaborator trait and the touch action channel
//! - `runtime`: bounded poll loop, cancellation, background helpers
//! - `game`: screen predicates and battle transition routines
//! - `script`: script parsing and execution
//!
//! The device transport and the OCR engine are supplied by the caller.

pub mod android;
pub mod config;
pub mod game;
pub mod runtime;
pub mod script;
pub mod vision;

#[cfg(test)]
mod testing;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::android::{ActionChannel, DeviceController};
use crate::config::Settings;
use crate::game::{Battle, MapScreen};
use crate::runtime::{BackgroundTask, CancelToken, Poller};
use crate::script::{CommandExecutor, RunOutcome, RunReport, Script, ScriptError};
use crate::vision::{FrameCache, TemplateLibrary, TextRecognizer};

/// Install the platform logger. Safe to call more than once.
pub fn init_logging() {
    #[cfg(target_os = "android")]
    android_logger::init_once(
        android_logger::Config::default()
            .with_max_level(log::LevelFilter::Debug)
            .with_tag("Pilot"),
    );

    #[cfg(not(target_os = "android"))]
    {
        let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
            .try_init();
    }
}

/// Automation engine for one device
pub struct Pilot {
    settings: Settings,
    device: Arc<dyn DeviceController>,
    cancel: CancelToken,
    executor: CommandExecutor<Battle>,
}

impl Pilot {
    /// Wire the engine together around a device and an optional OCR service
    pub fn new(
        device: Arc<dyn DeviceController>,
        ocr: Option<Arc<dyn TextRecognizer>>,
        settings: Settings,
    ) -> Self {
        let cancel = CancelToken::new();
        let cache = Arc::new(FrameCache::new(Arc::clone(&device)));
        let channel = ActionChannel::new(Arc::clone(&device), cache, settings.timings.clone());
        let poller = Poller::new(channel, cancel.clone());

        let threshold = settings.vision.template_threshold;
        let templates = Arc::new(TemplateLibrary::new(&settings.vision.asset_dir));
        let world = Arc::new(MapScreen::new(
            Arc::clone(&templates),
            threshold,
            Duration::from_millis(settings.timeouts.dialog_ms),
        ));

        let timeouts = settings.timeouts.clone();
        let mut battle = Battle::new(poller, world, templates, timeouts, threshold);
        if let Some(ocr) = ocr {
            battle = battle.with_ocr(ocr);
        }

        let executor = CommandExecutor::new(battle, settings.timeouts.clone(), cancel.clone());
        log::info!("Pilot initialized (assets: {})", settings.vision.asset_dir);

        Self {
            settings,
            device,
            cancel,
            executor,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn battle(&self) -> &Battle {
        self.executor.routines()
    }

    /// Parse and load script text, returning how many lines were dropped
    pub fn load_script(&mut self, text: &str) -> usize {
        let script = Script::parse(text);
        let malformed = script.malformed().len();
        self.executor.load(script);
        malformed
    }

    pub fn load_script_file(&mut self, path: impl AsRef<Path>) -> Result<usize, ScriptError> {
        self.executor.load_file(path)?;
        Ok(self.executor.script().map_or(0, |script| script.malformed().len()))
    }

    /// Token that stops the current run from another thread
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn stop(&self) {
        log::info!("Stop requested");
        self.cancel.cancel();
    }

    /// Forget the loaded script
    pub fn reset(&mut self) {
        self.executor.reset();
        self.cancel.reset();
    }

    /// Run the loaded script to completion
    pub fn run(&mut self) -> RunReport {
        self.cancel.reset();

        let monitor = self
            .settings
            .monitor
            .enabled
            .then(|| self.start_monitor());

        let report = self.executor.run();

        if report.outcome == RunOutcome::BattleConcluded
            && self.settings.executor.leave_settlement
            && !self.cancel.is_cancelled()
        {
            let timeout = Duration::from_millis(self.settings.timeouts.settlement_ms);
            match self.battle().leave_settlement(timeout) {
                Ok(true) => {}
                Ok(false) => log::warn!("Still on the settlement screens"),
                Err(e) => log::error!("Leaving settlement failed: {}", e),
            }
        }

        if let Some(monitor) = monitor {
            monitor.stop(self.settings.timings.join_grace());
        }
        report
    }

    /// Watch the game process and cancel the run when it goes away
    fn start_monitor(&self) -> BackgroundTask {
        let device = Arc::clone(&self.device);
        let cancel = self.cancel.clone();
        let interval = Duration::from_millis(self.settings.monitor.interval_ms);

        BackgroundTask::spawn("liveness-monitor", move |stop| loop {
            match device.is_app_running() {
                Ok(true) => {}
                Ok(false) => {
                    log::warn!("Game is no longer running, stopping the run");
                    cancel.cancel();
                    break;
                }
                Err(e) => log::debug!("Liveness check failed: {}", e),
            }
            if !stop.sleep(interval) {
                break;
            }
        })
    }
}
