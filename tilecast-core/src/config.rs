//! Pipeline configuration.
//!
//! Every section has serde defaults, so a partial TOML or JSON document
//! fills in the rest.

use serde::{Deserialize, Serialize};

use crate::capture::device::{VideoCaptureFormat, VideoResolution};
use crate::render::layout::VideoScalingType;

/// Top-level pipeline settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub camera: CameraConfig,
    pub screen: ScreenConfig,
    pub render: RenderConfig,
}

/// Camera capture settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// Desired capture width; the closest supported format wins.
    pub width: u32,
    pub height: u32,
    /// Upper bound for the frame rate range.
    pub max_fps: u32,
    /// Formats larger than this are never chosen.
    pub max_resolution: VideoResolution,
}

/// Screen capture settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScreenConfig {
    /// Static screens stop producing frames; resend at least this often.
    pub min_fps: u32,
    /// Bound on the long side of the captured size.
    pub target_long: u32,
    /// Bound on the short side of the captured size.
    pub target_short: u32,
}

/// Renderer settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    pub scaling: VideoScalingType,
    /// Mirror horizontally, usually for the local preview.
    pub mirror: bool,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            width: 960,
            height: 720,
            max_fps: 30,
            max_resolution: VideoResolution::HD,
        }
    }
}

impl Default for ScreenConfig {
    fn default() -> Self {
        Self {
            min_fps: 15,
            target_long: 1920,
            target_short: 1080,
        }
    }
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            scaling: VideoScalingType::AspectFit,
            mirror: false,
        }
    }
}

impl CameraConfig {
    pub fn desired_format(&self) -> VideoCaptureFormat {
        VideoCaptureFormat::new(self.width, self.height, self.max_fps.clamp(1, 60))
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_document_keeps_defaults() {
        let cfg: PipelineConfig =
            serde_json::from_str(r#"{ "camera": { "width": 640 } }"#).unwrap();
        assert_eq!(cfg.camera.width, 640);
        assert_eq!(cfg.camera.height, 720);
        assert_eq!(cfg.screen.min_fps, 15);
        assert_eq!(cfg.render.scaling, VideoScalingType::AspectFit);
    }

    #[test]
    fn desired_format_clamps_fps() {
        let cfg = CameraConfig {
            max_fps: 240,
            ..CameraConfig::default()
        };
        assert_eq!(cfg.desired_format(), VideoCaptureFormat::new(960, 720, 60));
    }
}
