//! Bounded observe/act polling
//!
//! Every wait in the automation goes through [`Poller::poll`]: take a frame,
//! ask the observer whether the wanted state holds, otherwise run the
//! corrective action and sleep. Nothing here waits without a deadline.

use std::time::{Duration, Instant};

use crate::android::{ActionChannel, DeviceError};
use crate::vision::Frame;

use super::CancelToken;

/// Where a poll tick gets its frame from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FrameSource {
    /// New capture every tick
    #[default]
    Fresh,
    /// Copy of the last capture; falls back to a fresh one when the cache is
    /// still empty
    Cached,
}

/// Timing of one poll
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PollOptions {
    pub timeout: Duration,
    pub interval: Duration,
    pub source: FrameSource,
}

impl PollOptions {
    pub fn new(timeout: Duration, interval: Duration) -> Self {
        Self {
            timeout,
            interval,
            source: FrameSource::Fresh,
        }
    }

    pub fn from_millis(timeout_ms: u64, interval_ms: u64) -> Self {
        Self::new(
            Duration::from_millis(timeout_ms),
            Duration::from_millis(interval_ms),
        )
    }

    /// Read from the frame cache instead of capturing
    pub fn cached(mut self) -> Self {
        self.source = FrameSource::Cached;
        self
    }
}

/// How a poll ended
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome<T> {
    Satisfied(T),
    TimedOut,
    /// The shared cancel token tripped (e.g. the game stopped running)
    Cancelled,
}

impl<T> PollOutcome<T> {
    pub fn is_satisfied(&self) -> bool {
        matches!(self, PollOutcome::Satisfied(_))
    }

    pub fn into_option(self) -> Option<T> {
        match self {
            PollOutcome::Satisfied(value) => Some(value),
            _ => None,
        }
    }
}

/// Poll errors
#[derive(Debug, thiserror::Error)]
pub enum PollError {
    /// No frame could be obtained on any tick
    #[error("No frame could be captured within {timeout:?}")]
    CaptureUnavailable {
        timeout: Duration,
        #[source]
        source: DeviceError,
    },
}

/// Runs poll loops against one action channel
#[derive(Clone)]
pub struct Poller {
    channel: ActionChannel,
    cancel: CancelToken,
}

impl Poller {
    pub fn new(channel: ActionChannel, cancel: CancelToken) -> Self {
        Self { channel, cancel }
    }

    pub fn channel(&self) -> &ActionChannel {
        &self.channel
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Default options: `timeout` with the configured poll interval
    pub fn options(&self, timeout: Duration) -> PollOptions {
        PollOptions::new(timeout, self.channel.timings().poll_interval())
    }

    /// Observe until `observe` yields a value, the timeout elapses or the run
    /// is cancelled.
    ///
    /// `on_tick` runs after every negative observation, before sleeping.
    /// A tick whose capture fails counts as "state unknown" and is retried;
    /// only when every tick failed is the last capture error returned.
    pub fn poll<T, O, A>(
        &self,
        opts: PollOptions,
        mut observe: O,
        mut on_tick: A,
    ) -> Result<PollOutcome<T>, PollError>
    where
        O: FnMut(&Frame) -> Option<T>,
        A: FnMut(&Frame, &ActionChannel),
    {
        let start = Instant::now();
        let mut saw_frame = false;
        let mut last_error = None;

        loop {
            if self.cancel.is_cancelled() {
                return Ok(PollOutcome::Cancelled);
            }

            match self.frame(opts.source) {
                Ok(frame) => {
                    saw_frame = true;
                    if let Some(value) = observe(&frame) {
                        return Ok(PollOutcome::Satisfied(value));
                    }
                    if start.elapsed() >= opts.timeout {
                        return Ok(PollOutcome::TimedOut);
                    }
                    on_tick(&frame, &self.channel);
                }
                Err(e) => {
                    log::debug!("Capture failed during poll: {}", e);
                    last_error = Some(e);
                }
            }

            let elapsed = start.elapsed();
            if elapsed >= opts.timeout {
                return match last_error {
                    Some(source) if !saw_frame => Err(PollError::CaptureUnavailable {
                        timeout: opts.timeout,
                        source,
                    }),
                    _ => Ok(PollOutcome::TimedOut),
                };
            }

            let remaining = opts.timeout - elapsed;
            if !self.cancel.sleep(opts.interval.min(remaining)) {
                return Ok(PollOutcome::Cancelled);
            }
        }
    }

    /// Poll without a corrective action
    pub fn wait_for<T, O>(&self, opts: PollOptions, observe: O) -> Result<PollOutcome<T>, PollError>
    where
        O: FnMut(&Frame) -> Option<T>,
    {
        self.poll(opts, observe, |_, _| {})
    }

    /// Wait until `predicate` holds; `Ok(false)` on timeout or cancellation
    pub fn wait_until<P>(&self, opts: PollOptions, predicate: P) -> Result<bool, PollError>
    where
        P: Fn(&Frame) -> bool,
    {
        let outcome = self.wait_for(opts, |frame| predicate(frame).then_some(()))?;
        Ok(outcome.is_satisfied())
    }

    /// Tap `point` on every negative tick until `predicate` holds
    pub fn tap_until<P>(
        &self,
        opts: PollOptions,
        point: (i32, i32),
        predicate: P,
    ) -> Result<bool, PollError>
    where
        P: Fn(&Frame) -> bool,
    {
        let outcome = self.poll(
            opts,
            |frame| predicate(frame).then_some(()),
            |_, channel| {
                if let Err(e) = channel.tap_point(point) {
                    log::warn!("Tap at {:?} failed: {}", point, e);
                }
            },
        )?;
        Ok(outcome.is_satisfied())
    }

    fn frame(&self, source: FrameSource) -> Result<Frame, DeviceError> {
        if source == FrameSource::Cached {
            if let Some(borrow) = self.channel.cached() {
                return Ok(borrow.frame().clone());
            }
        }
        let frame = self.channel.capture()?;
        Ok(Frame::clone(&frame))
    }
}
