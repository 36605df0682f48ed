//! Runtime primitives
//!
//! The bounded poll loop every routine is built from, plus cancellation and
//! background helper threads.

pub mod poll;
pub mod task;

pub use poll::{FrameSource, PollError, PollOptions, PollOutcome, Poller};
pub use task::{BackgroundTask, CancelToken};
