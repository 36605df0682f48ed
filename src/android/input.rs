//! Touch input channel
//!
//! Issues discrete touch actions through the device collaborator and routes
//! capture requests to the frame cache. All coordinates are in the fixed
//! 1280x720 reference space the game UI is laid out in.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::config::TimingSettings;
use crate::runtime::BackgroundTask;
use crate::vision::{Frame, FrameBorrow, FrameCache};

use super::{DeviceController, DeviceError};

/// One touch primitive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TouchAction {
    Tap { x: i32, y: i32 },
    LongTap { x: i32, y: i32, duration_ms: u32 },
    PressDown { x: i32, y: i32 },
    PressMove { x: i32, y: i32 },
    PressUp { x: i32, y: i32 },
}

impl TouchAction {
    /// Where the action lands
    pub fn point(&self) -> (i32, i32) {
        match *self {
            TouchAction::Tap { x, y }
            | TouchAction::LongTap { x, y, .. }
            | TouchAction::PressDown { x, y }
            | TouchAction::PressMove { x, y }
            | TouchAction::PressUp { x, y } => (x, y),
        }
    }
}

/// Thin wrapper over the device collaborator
#[derive(Clone)]
pub struct ActionChannel {
    device: Arc<dyn DeviceController>,
    cache: Arc<FrameCache>,
    timings: TimingSettings,
}

impl ActionChannel {
    pub fn new(
        device: Arc<dyn DeviceController>,
        cache: Arc<FrameCache>,
        timings: TimingSettings,
    ) -> Self {
        Self {
            device,
            cache,
            timings,
        }
    }

    /// Forward one action to the device without any pacing
    pub fn perform(&self, action: &TouchAction) -> Result<(), DeviceError> {
        log::debug!("Touch: {:?}", action);
        match *action {
            TouchAction::Tap { x, y } => self.device.tap(x, y),
            TouchAction::LongTap { x, y, duration_ms } => self.device.long_tap(x, y, duration_ms),
            TouchAction::PressDown { x, y } => self.device.press_down(x, y),
            TouchAction::PressMove { x, y } => self.device.press_move(x, y),
            TouchAction::PressUp { x, y } => self.device.press_up(x, y),
        }
    }

    /// Tap and wait for the UI to react
    pub fn tap(&self, x: i32, y: i32) -> Result<(), DeviceError> {
        self.perform(&TouchAction::Tap { x, y })?;
        pause(self.timings.tap_delay_ms);
        Ok(())
    }

    pub fn tap_point(&self, point: (i32, i32)) -> Result<(), DeviceError> {
        self.tap(point.0, point.1)
    }

    /// Long tap with the configured hold duration
    pub fn long_tap(&self, x: i32, y: i32) -> Result<(), DeviceError> {
        self.long_tap_for(x, y, self.timings.long_tap_ms)
    }

    pub fn long_tap_for(&self, x: i32, y: i32, duration_ms: u32) -> Result<(), DeviceError> {
        self.perform(&TouchAction::LongTap { x, y, duration_ms })?;
        pause(self.timings.tap_delay_ms);
        Ok(())
    }

    pub fn press_down(&self, x: i32, y: i32) -> Result<(), DeviceError> {
        self.perform(&TouchAction::PressDown { x, y })
    }

    pub fn press_move(&self, x: i32, y: i32) -> Result<(), DeviceError> {
        self.perform(&TouchAction::PressMove { x, y })
    }

    pub fn press_up(&self, x: i32, y: i32) -> Result<(), DeviceError> {
        self.perform(&TouchAction::PressUp { x, y })
    }

    /// Press at `from`, move in evenly spaced steps and release at `to`.
    ///
    /// If the gesture breaks halfway the finger is lifted where it was last
    /// placed so the device is not left with a stuck touch.
    pub fn drag(&self, from: (i32, i32), to: (i32, i32)) -> Result<(), DeviceError> {
        self.press_down(from.0, from.1)?;

        let steps = self.timings.drag_steps.max(1) as i32;
        let mut last = from;
        for step in 1..=steps {
            let x = from.0 + (to.0 - from.0) * step / steps;
            let y = from.1 + (to.1 - from.1) * step / steps;
            pause(self.timings.drag_step_delay_ms);
            if let Err(e) = self.press_move(x, y) {
                log::warn!("Drag interrupted at ({}, {}): {}", x, y, e);
                let _ = self.press_up(last.0, last.1);
                return Err(e);
            }
            last = (x, y);
        }

        pause(self.timings.drag_step_delay_ms);
        self.press_up(to.0, to.1)?;
        pause(self.timings.tap_delay_ms);
        Ok(())
    }

    /// Fresh capture through the cache (primary path only)
    pub fn capture(&self) -> Result<Arc<Frame>, DeviceError> {
        self.cache.capture_new()
    }

    /// Copy of the last capture, `None` if nothing was captured yet
    pub fn cached(&self) -> Option<FrameBorrow<'_>> {
        self.cache.borrow_cached()
    }

    /// Tap `point` every `interval` on a background thread until the
    /// returned task is stopped or dropped
    pub fn keep_tapping(&self, point: (i32, i32), interval: Duration) -> BackgroundTask {
        let device = Arc::clone(&self.device);
        let name = format!("tapper-{}-{}", point.0, point.1);
        BackgroundTask::spawn(name, move |stop| {
            while !stop.is_cancelled() {
                if let Err(e) = device.tap(point.0, point.1) {
                    log::debug!("Background tap at {:?} failed: {}", point, e);
                }
                if !stop.sleep(interval) {
                    break;
                }
            }
        })
    }

    pub fn cache(&self) -> &Arc<FrameCache> {
        &self.cache
    }

    pub fn device(&self) -> &Arc<dyn DeviceController> {
        &self.device
    }

    pub fn timings(&self) -> &TimingSettings {
        &self.timings
    }
}

fn pause(ms: u64) {
    if ms > 0 {
        thread::sleep(Duration::from_millis(ms));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeDevice;

    fn channel(device: &Arc<FakeDevice>) -> ActionChannel {
        let device: Arc<dyn DeviceController> = device.clone();
        let cache = Arc::new(FrameCache::new(Arc::clone(&device)));
        ActionChannel::new(device, cache, TimingSettings::immediate())
    }

    #[test]
    fn test_tap_and_long_tap() {
        let device = FakeDevice::blank();
        let input = channel(&device);

        input.tap(10, 20).unwrap();
        input.long_tap_for(30, 40, 500).unwrap();
        input.long_tap(50, 60).unwrap();

        assert_eq!(
            device.actions(),
            vec![
                TouchAction::Tap { x: 10, y: 20 },
                TouchAction::LongTap {
                    x: 30,
                    y: 40,
                    duration_ms: 500
                },
                TouchAction::LongTap {
                    x: 50,
                    y: 60,
                    duration_ms: input.timings().long_tap_ms
                },
            ]
        );
    }

    #[test]
    fn test_drag_interpolates() {
        let device = FakeDevice::blank();
        let mut timings = TimingSettings::immediate();
        timings.drag_steps = 4;
        let cache = Arc::new(FrameCache::new(device.clone()));
        let input = ActionChannel::new(device.clone(), cache, timings);

        input.drag((100, 500), (180, 500)).unwrap();

        assert_eq!(
            device.actions(),
            vec![
                TouchAction::PressDown { x: 100, y: 500 },
                TouchAction::PressMove { x: 120, y: 500 },
                TouchAction::PressMove { x: 140, y: 500 },
                TouchAction::PressMove { x: 160, y: 500 },
                TouchAction::PressMove { x: 180, y: 500 },
                TouchAction::PressUp { x: 180, y: 500 },
            ]
        );
    }

    #[test]
    fn test_failed_tap_is_reported() {
        let device = FakeDevice::blank();
        device.fail_actions(true);
        let input = channel(&device);

        assert!(input.tap(1, 1).is_err());
        assert!(device.actions().is_empty());
    }

    #[test]
    fn test_capture_goes_through_cache() {
        let device = FakeDevice::blank();
        let input = channel(&device);

        assert!(input.cached().is_none());
        let frame = input.capture().unwrap();
        assert_eq!(frame.dimensions(), (1280, 720));
        assert_eq!(input.cached().unwrap().sequence(), frame.sequence());
        assert_eq!(device.capture_count(), 1);
    }

    #[test]
    fn test_keep_tapping_until_stopped() {
        let device = FakeDevice::blank();
        let input = channel(&device);

        let tapper = input.keep_tapping((640, 360), Duration::from_millis(5));
        thread::sleep(Duration::from_millis(60));
        assert!(tapper.stop(Duration::from_secs(1)));

        let taps = device.taps();
        assert!(taps.len() >= 2);
        assert!(taps.iter().all(|&p| p == (640, 360)));

        thread::sleep(Duration::from_millis(30));
        assert_eq!(device.taps().len(), taps.len());
    }
}
