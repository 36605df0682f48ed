//! Device-automation collaborator boundary
//!
//! The transport that actually reaches the phone (ADB, an accessibility
//! service, a remote agent) lives outside this crate. Everything here talks
//! to it through [`DeviceController`].

use image::DynamicImage;

/// Operations the automation core needs from a connected device.
///
/// Every call may fail; callers treat a failed capture as "state unknown"
/// and a failed action as "did not happen".
pub trait DeviceController: Send + Sync {
    /// Grab the current screen contents
    fn capture(&self) -> Result<DynamicImage, DeviceError>;

    /// Single tap
    fn tap(&self, x: i32, y: i32) -> Result<(), DeviceError>;

    /// Press and hold for `duration_ms`
    fn long_tap(&self, x: i32, y: i32, duration_ms: u32) -> Result<(), DeviceError>;

    /// Put a finger down (start of a gesture)
    fn press_down(&self, x: i32, y: i32) -> Result<(), DeviceError>;

    /// Move a finger that is already down
    fn press_move(&self, x: i32, y: i32) -> Result<(), DeviceError>;

    /// Lift the finger (end of a gesture)
    fn press_up(&self, x: i32, y: i32) -> Result<(), DeviceError>;

    /// Whether the game process is still in the foreground.
    ///
    /// Transports that cannot tell report `true`.
    fn is_app_running(&self) -> Result<bool, DeviceError> {
        Ok(true)
    }
}

/// Device errors
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("Screen capture failed: {0}")]
    Capture(String),
    #[error("Touch action failed: {0}")]
    Action(String),
    #[error("Device disconnected")]
    Disconnected,
}
