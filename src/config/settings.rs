//! Automation settings
//!
//! Every wait in the core is bounded; the bounds live here. Settings load
//! from JSON and any missing field falls back to its default.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Main settings structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Per-routine wait bounds
    pub timeouts: TimeoutSettings,
    /// Polling and touch pacing
    pub timings: TimingSettings,
    /// Template assets and matching
    pub vision: VisionSettings,
    /// Script execution behavior
    pub executor: ExecutorSettings,
    /// Game-process liveness monitor
    pub monitor: MonitorSettings,
}

impl Settings {
    /// Load settings from a JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    /// Parse settings from a JSON string
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Wait bounds in milliseconds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutSettings {
    /// Waiting for the first command round of a battle
    pub battle_start_ms: u64,
    /// Waiting for the command round before acting
    pub command_round_ms: u64,
    /// Waiting for the skill or special panel to open
    pub skill_panel_ms: u64,
    /// Waiting for the panel to close after a cast
    pub panel_close_ms: u64,
    /// Formation and boost toggles
    pub toggle_ms: u64,
    /// Waiting for the round to play out after attacking
    pub round_exit_ms: u64,
    /// Turning delegated combat on
    pub auto_battle_ms: u64,
    /// Looking for a downed character
    pub check_dead_ms: u64,
    /// Retreating from battle
    pub exit_battle_ms: u64,
    /// Checking whether the battle is over
    pub resolution_ms: u64,
    /// Waiting for the battle to finish at the end of a script
    pub battle_end_ms: u64,
    /// Tapping through animations
    pub skip_ms: u64,
    /// Tapping through the settlement screens
    pub settlement_ms: u64,
    /// Waiting for each dialog to show up
    pub dialog_ms: u64,
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            battle_start_ms: 60_000,
            command_round_ms: 15_000,
            skill_panel_ms: 5_000,
            panel_close_ms: 8_000,
            toggle_ms: 5_000,
            round_exit_ms: 30_000,
            auto_battle_ms: 20_000,
            check_dead_ms: 3_000,
            exit_battle_ms: 20_000,
            resolution_ms: 8_000,
            battle_end_ms: 120_000,
            skip_ms: 30_000,
            settlement_ms: 30_000,
            dialog_ms: 5_000,
        }
    }
}

/// Polling and touch pacing in milliseconds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingSettings {
    /// Sleep between poll ticks
    pub poll_interval_ms: u64,
    /// Pause after every tap
    pub tap_delay_ms: u64,
    /// Hold duration of a long tap
    pub long_tap_ms: u32,
    /// Intermediate moves in a drag gesture
    pub drag_steps: u32,
    /// Pause between drag moves
    pub drag_step_delay_ms: u64,
    /// Period of background tapping helpers
    pub tapper_interval_ms: u64,
    /// How long to wait for a background helper to stop
    pub join_grace_ms: u64,
}

impl Default for TimingSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 300,
            tap_delay_ms: 150,
            long_tap_ms: 800,
            drag_steps: 6,
            drag_step_delay_ms: 30,
            tapper_interval_ms: 400,
            join_grace_ms: 2_000,
        }
    }
}

impl TimingSettings {
    /// No pacing delays; polls spin every few milliseconds
    pub fn immediate() -> Self {
        Self {
            poll_interval_ms: 5,
            tap_delay_ms: 0,
            long_tap_ms: 0,
            drag_steps: 2,
            drag_step_delay_ms: 0,
            tapper_interval_ms: 5,
            join_grace_ms: 1_000,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn join_grace(&self) -> Duration {
        Duration::from_millis(self.join_grace_ms)
    }
}

/// Template assets and matching
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VisionSettings {
    /// Directory holding template images
    pub asset_dir: String,
    /// Default minimum correlation for template matches
    pub template_threshold: f32,
}

impl Default for VisionSettings {
    fn default() -> Self {
        Self {
            asset_dir: "assets".to_string(),
            template_threshold: 0.85,
        }
    }
}

/// Script execution behavior
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorSettings {
    /// Tap through the settlement screens after a concluded battle
    pub leave_settlement: bool,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            leave_settlement: true,
        }
    }
}

/// Game-process liveness monitor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorSettings {
    pub enabled: bool,
    /// Time between liveness checks
    pub interval_ms: u64,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: 2_000,
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read settings: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse settings: {0}")]
    Parse(#[from] serde_json::Error),
}
