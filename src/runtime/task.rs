//! Cancellation and background helpers
//!
//! Auxiliary work (liveness checks, "keep tapping here" helpers) runs on its
//! own thread, owned by whoever started it. Stopping always sets the flag and
//! attempts a bounded join; a helper that does not finish in time is logged
//! and abandoned so it can never stall the primary loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Grace period used when a task is dropped without an explicit stop
const DROP_GRACE: Duration = Duration::from_secs(2);

/// Longest uninterrupted sleep inside [`CancelToken::sleep`]
const SLEEP_SLICE: Duration = Duration::from_millis(20);

/// Shared stop flag
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Clear the flag so the token can be reused for another run
    pub fn reset(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }

    /// Sleep for `duration` unless cancelled first.
    ///
    /// Returns `false` if the token was cancelled before or during the sleep.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.is_cancelled() {
                return false;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return true;
            }
            thread::sleep(remaining.min(SLEEP_SLICE));
        }
    }
}

/// A named helper thread with a stop flag and bounded shutdown
pub struct BackgroundTask {
    name: String,
    stop: CancelToken,
    done: Receiver<()>,
    handle: Option<JoinHandle<()>>,
}

impl BackgroundTask {
    /// Start `work` on a new thread. `work` must return soon after its
    /// token is cancelled.
    pub fn spawn<F>(name: impl Into<String>, work: F) -> Self
    where
        F: FnOnce(CancelToken) + Send + 'static,
    {
        let name = name.into();
        let stop = CancelToken::new();
        let (done_tx, done) = mpsc::channel();

        let token = stop.clone();
        let spawned = thread::Builder::new().name(name.clone()).spawn(move || {
            work(token);
            let _ = done_tx.send(());
        });

        let handle = match spawned {
            Ok(handle) => Some(handle),
            Err(e) => {
                log::error!("Failed to start background task {}: {}", name, e);
                None
            }
        };

        log::debug!("Background task {} started", name);
        Self {
            name,
            stop,
            done,
            handle,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the thread has already returned (or never started)
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Cancel and join, waiting at most `grace`.
    ///
    /// Returns `true` if the thread was joined, `false` if it was abandoned.
    pub fn stop(mut self, grace: Duration) -> bool {
        self.shutdown(grace)
    }

    fn shutdown(&mut self, grace: Duration) -> bool {
        let Some(handle) = self.handle.take() else {
            return true;
        };
        self.stop.cancel();

        match self.done.recv_timeout(grace) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if handle.join().is_err() {
                    log::error!("Background task {} panicked", self.name);
                } else {
                    log::debug!("Background task {} stopped", self.name);
                }
                true
            }
            Err(RecvTimeoutError::Timeout) => {
                log::warn!(
                    "Background task {} did not stop within {:?}; abandoning it",
                    self.name,
                    grace
                );
                false
            }
        }
    }
}

impl Drop for BackgroundTask {
    fn drop(&mut self) {
        self.shutdown(DROP_GRACE);
    }
}
