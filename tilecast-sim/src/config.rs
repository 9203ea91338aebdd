//! Configuration for the pipeline simulator.

use std::path::Path;

use serde::{Deserialize, Serialize};

use tilecast_core::PipelineConfig;

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Capture and render settings handed to the core.
    pub pipeline: PipelineConfig,
    /// What the run does.
    pub sim: RunConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
}

/// Shape of one simulated call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Wall-clock length of the run.
    pub duration_secs: f64,
    /// Rate the virtual camera produces frames at.
    pub fps: u32,
    /// Remote participants echoing our camera back.
    pub remote_participants: u32,
    /// Also share the virtual screen as a content tile.
    pub screen_share: bool,
    /// Rotate the virtual screen this far into the run. Negative disables.
    pub flip_orientation_after_secs: f64,
    /// Width and height of the virtual phone screen, portrait.
    pub screen_width: u32,
    pub screen_height: u32,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            duration_secs: 5.0,
            fps: 15,
            remote_participants: 2,
            screen_share: true,
            flip_orientation_after_secs: 2.5,
            screen_width: 1080,
            screen_height: 2400,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".into() }
    }
}

// ── Loading ──────────────────────────────────────────────────────

impl SimConfig {
    /// Load configuration from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!("invalid config {}: {e}; using defaults", path.display());
                Self::default()
            }),
            Err(_) => {
                tracing::info!("no config at {}; using defaults", path.display());
                Self::default()
            }
        }
    }

    /// Write the default configuration to a file.
    pub fn write_default(path: &Path) -> std::io::Result<()> {
        let text = toml::to_string_pretty(&Self::default()).map_err(std::io::Error::other)?;
        std::fs::write(path, text)
    }

    /// Number of camera frames the run emits.
    pub fn total_frames(&self) -> u64 {
        let frames = self.sim.duration_secs.max(0.0) * f64::from(self.sim.fps.max(1));
        frames.round() as u64
    }

    /// Frame index at which the screen rotates, if it does.
    pub fn flip_frame(&self) -> Option<u64> {
        let after = self.sim.flip_orientation_after_secs;
        if !self.sim.screen_share || after < 0.0 {
            return None;
        }
        Some((after * f64::from(self.sim.fps.max(1))).round() as u64)
    }
}

// ── Tests ────────────────────────────────────────────────────────
