//! Android device module
//!
//! The device collaborator interface and the action channel the rest of
//! the crate uses to touch the screen.

pub mod device;
pub mod input;

pub use device::*;
pub use input::*;
