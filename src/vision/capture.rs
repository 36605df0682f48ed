//! Screen frame cache
//!
//! Holds the most recent capture. The primary automation loop is the only
//! caller of [`FrameCache::capture_new`]; background helpers read the last
//! frame through [`FrameCache::borrow_cached`] and always get their own copy.

use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::android::{DeviceController, DeviceError};

use super::Frame;

/// Thread-safe holder of the latest screen capture
pub struct FrameCache {
    device: Arc<dyn DeviceController>,
    /// Guards the cached pointer and the borrow counter, nothing else
    state: Mutex<CacheState>,
    sequence: AtomicU64,
}

#[derive(Default)]
struct CacheState {
    current: Option<Arc<Frame>>,
    borrows: usize,
    /// Frames replaced while a borrow was outstanding
    retired: Vec<Arc<Frame>>,
    released: u64,
}

/// Snapshot of cache bookkeeping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    /// Outstanding borrows
    pub borrows: usize,
    /// Replaced frames waiting for the borrow count to reach zero
    pub pending_release: usize,
    /// Replaced frames released after borrows drained
    pub released: u64,
    /// Captures published so far
    pub captures: u64,
}

impl FrameCache {
    /// Create an empty cache in front of a device
    pub fn new(device: Arc<dyn DeviceController>) -> Self {
        Self {
            device,
            state: Mutex::new(CacheState::default()),
            sequence: AtomicU64::new(0),
        }
    }

    /// Take a fresh capture and publish it as the cached frame.
    ///
    /// Failures are reported, not retried; retry policy belongs to the poll
    /// loop. The device round-trip and pixel conversion happen outside the
    /// lock.
    pub fn capture_new(&self) -> Result<Arc<Frame>, DeviceError> {
        let raw = self.device.capture()?;
        let image = raw.into_rgba8();
        if image.width() == 0 || image.height() == 0 {
            return Err(DeviceError::Capture("device returned an empty image".into()));
        }

        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        let frame = Arc::new(Frame::with_sequence(image, sequence));

        let dropped = {
            let mut state = self.lock();
            match state.current.replace(Arc::clone(&frame)) {
                Some(previous) if state.borrows > 0 => {
                    state.retired.push(previous);
                    None
                }
                previous => previous,
            }
        };
        // Free the old buffer after the lock is gone
        drop(dropped);

        log::trace!("Published frame #{}", sequence);
        Ok(frame)
    }

    /// Borrow an independent copy of the last capture.
    ///
    /// Returns `None` if nothing was ever captured. Never triggers a capture.
    pub fn borrow_cached(&self) -> Option<FrameBorrow<'_>> {
        let shared = {
            let mut state = self.lock();
            let frame = state.current.clone()?;
            state.borrows += 1;
            frame
        };

        // Copy outside the lock so slow readers don't serialize each other
        let frame = Frame::clone(&shared);
        Some(FrameBorrow { cache: self, frame })
    }

    /// Whether any frame has been published
    pub fn has_frame(&self) -> bool {
        self.lock().current.is_some()
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.lock();
        CacheStats {
            borrows: state.borrows,
            pending_release: state.retired.len(),
            released: state.released,
            captures: self.sequence.load(Ordering::Relaxed),
        }
    }

    fn release(&self) {
        let retired = {
            let mut state = self.lock();
            debug_assert!(state.borrows > 0, "frame borrow released without a matching borrow");
            state.borrows = state.borrows.saturating_sub(1);
            if state.borrows == 0 && !state.retired.is_empty() {
                let retired = std::mem::take(&mut state.retired);
                state.released += retired.len() as u64;
                retired
            } else {
                Vec::new()
            }
        };
        drop(retired);
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        // The state is two plain fields; a panicking holder cannot leave it torn
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A copy of the cached frame; releases the borrow when dropped
pub struct FrameBorrow<'a> {
    cache: &'a FrameCache,
    frame: Frame,
}

impl FrameBorrow<'_> {
    pub fn frame(&self) -> &Frame {
        &self.frame
    }
}

impl Deref for FrameBorrow<'_> {
    type Target = Frame;

    fn deref(&self) -> &Frame {
        &self.frame
    }
}

impl Drop for FrameBorrow<'_> {
    fn drop(&mut self) {
        self.cache.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeDevice;
    use image::{DynamicImage, Rgba, RgbaImage};
    use std::sync::atomic::AtomicBool;
    use std::thread;

    /// Serves uniformly colored frames whose color encodes the capture count
    struct CountingDevice {
        counter: AtomicU64,
    }

    impl DeviceController for CountingDevice {
        fn capture(&self) -> Result<DynamicImage, DeviceError> {
            let n = self.counter.fetch_add(1, Ordering::Relaxed);
            let value = (n % 251) as u8;
            Ok(DynamicImage::ImageRgba8(RgbaImage::from_pixel(
                64,
                48,
                Rgba([value, value.wrapping_add(1), value.wrapping_add(2), 255]),
            )))
        }
        fn tap(&self, _: i32, _: i32) -> Result<(), DeviceError> {
            Ok(())
        }
        fn long_tap(&self, _: i32, _: i32, _: u32) -> Result<(), DeviceError> {
            Ok(())
        }
        fn press_down(&self, _: i32, _: i32) -> Result<(), DeviceError> {
            Ok(())
        }
        fn press_move(&self, _: i32, _: i32) -> Result<(), DeviceError> {
            Ok(())
        }
        fn press_up(&self, _: i32, _: i32) -> Result<(), DeviceError> {
            Ok(())
        }
    }

    #[test]
    fn test_borrow_before_capture_is_none() {
        let device = FakeDevice::blank();
        let cache = FrameCache::new(device.clone());

        assert!(cache.borrow_cached().is_none());
        assert_eq!(device.capture_count(), 0);
        assert_eq!(cache.stats().borrows, 0);
    }

    #[test]
    fn test_capture_publishes_frame() {
        let cache = FrameCache::new(FakeDevice::blank());

        let first = cache.capture_new().unwrap();
        let second = cache.capture_new().unwrap();
        assert_eq!(first.sequence() + 1, second.sequence());

        let borrowed = cache.borrow_cached().unwrap();
        assert_eq!(borrowed.sequence(), second.sequence());
        assert_eq!(cache.stats().borrows, 1);
        drop(borrowed);
        assert_eq!(cache.stats().borrows, 0);
    }

    #[test]
    fn test_capture_failure_is_reported() {
        let device = FakeDevice::blank();
        device.fail_captures(true);
        let cache = FrameCache::new(device);

        assert!(cache.capture_new().is_err());
        assert!(!cache.has_frame());
    }

    #[test]
    fn test_replacement_waits_for_borrows() {
        let cache = FrameCache::new(FakeDevice::blank());
        cache.capture_new().unwrap();

        let borrow = cache.borrow_cached().unwrap();
        cache.capture_new().unwrap();
        cache.capture_new().unwrap();
        assert_eq!(cache.stats().pending_release, 2);
        assert_eq!(cache.stats().released, 0);

        drop(borrow);
        let stats = cache.stats();
        assert_eq!(stats.pending_release, 0);
        assert_eq!(stats.released, 2);
    }

    #[test]
    fn test_borrow_is_an_independent_copy() {
        let cache = FrameCache::new(FakeDevice::blank());
        let published = cache.capture_new().unwrap();

        let borrow = cache.borrow_cached().unwrap();
        assert_ne!(
            borrow.image().as_raw().as_ptr(),
            published.image().as_raw().as_ptr()
        );
    }

    #[test]
    fn test_concurrent_borrowers_never_see_torn_frames() {
        let cache = Arc::new(FrameCache::new(Arc::new(CountingDevice {
            counter: AtomicU64::new(0),
        })));
        cache.capture_new().unwrap();
        let done = Arc::new(AtomicBool::new(false));

        let readers: Vec<_> = (0..6)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let done = Arc::clone(&done);
                thread::spawn(move || {
                    let mut reads = 0u32;
                    while !done.load(Ordering::Relaxed) || reads < 10 {
                        let borrow = cache.borrow_cached().expect("frame was published");
                        let first = *borrow.image().get_pixel(0, 0);
                        assert!(borrow.image().pixels().all(|p| *p == first));
                        reads += 1;
                    }
                })
            })
            .collect();

        for _ in 0..200 {
            cache.capture_new().unwrap();
        }
        done.store(true, Ordering::Relaxed);

        for reader in readers {
            reader.join().unwrap();
        }

        let stats = cache.stats();
        assert_eq!(stats.borrows, 0);
        assert_eq!(stats.pending_release, 0);
        assert_eq!(stats.captures, 201);
    }
}
