//! Configuration module
//!
//! Timeouts, pacing, asset locations and monitor options.

pub mod settings;

pub use settings::{
    ConfigError, ExecutorSettings, MonitorSettings, Settings, TimeoutSettings, TimingSettings,
    VisionSettings,
};
