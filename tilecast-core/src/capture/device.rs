//! Devices, formats and capture parameter selection.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::capture::platform::NativeSurface;
use crate::error::CaptureSourceError;
use crate::frame::VideoRotation;

// ── Devices ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MediaDeviceKind {
    FrontCamera,
    BackCamera,
    OtherCamera,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MediaDevice {
    pub id: String,
    pub label: String,
    pub kind: MediaDeviceKind,
}

impl MediaDevice {
    pub fn new(id: impl Into<String>, label: impl Into<String>, kind: MediaDeviceKind) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            kind,
        }
    }
}

impl std::fmt::Display for MediaDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({:?}, id {})", self.label, self.kind, self.id)
    }
}

/// Front camera if present, else back camera.
pub fn default_device(devices: &[MediaDevice]) -> Option<MediaDevice> {
    first_of_kind(devices, MediaDeviceKind::FrontCamera)
        .or_else(|| first_of_kind(devices, MediaDeviceKind::BackCamera))
}

pub fn first_of_kind(devices: &[MediaDevice], kind: MediaDeviceKind) -> Option<MediaDevice> {
    devices.iter().find(|d| d.kind == kind).cloned()
}

// ── Formats ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VideoCaptureFormat {
    pub width: u32,
    pub height: u32,
    pub max_fps: u32,
}

impl VideoCaptureFormat {
    pub const fn new(width: u32, height: u32, max_fps: u32) -> Self {
        Self {
            width,
            height,
            max_fps,
        }
    }
}

impl std::fmt::Display for VideoCaptureFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{} @ {}fps", self.width, self.height, self.max_fps)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VideoResolution {
    pub width: u32,
    pub height: u32,
}

impl VideoResolution {
    pub const SD: VideoResolution = VideoResolution::new(640, 480);
    pub const HD: VideoResolution = VideoResolution::new(1280, 720);
    pub const FHD: VideoResolution = VideoResolution::new(1920, 1080);

    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// The format closest to `desired` by `|dw| + |dh|`.
pub fn choose_format(
    formats: &[VideoCaptureFormat],
    desired: &VideoCaptureFormat,
) -> Option<VideoCaptureFormat> {
    formats
        .iter()
        .min_by_key(|f| f.width.abs_diff(desired.width) + f.height.abs_diff(desired.height))
        .copied()
}

// ── Characteristics ──────────────────────────────────────────────

bitflags! {
    /// Optional hardware features of a camera.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct CameraFeatures: u8 {
        const FLASH                  = 0b0000_0001;
        const OPTICAL_STABILIZATION  = 0b0000_0010;
        const VIDEO_STABILIZATION    = 0b0000_0100;
        const CONTINUOUS_AUTOFOCUS   = 0b0000_1000;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LensFacing {
    Front,
    Back,
    External,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FpsRange {
    pub min: u32,
    pub max: u32,
}

impl FpsRange {
    pub const fn new(min: u32, max: u32) -> Self {
        Self { min, max }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraCharacteristics {
    /// Clockwise degrees the sensor image must rotate to be upright.
    pub sensor_orientation: u32,
    pub facing: LensFacing,
    pub fps_ranges: Vec<FpsRange>,
    pub features: CameraFeatures,
}

impl CameraCharacteristics {
    pub fn is_front_facing(&self) -> bool {
        self.facing == LensFacing::Front
    }
}

/// Range with the highest upper bound not above `max_fps`, else the
/// range whose upper bound is nearest to it.
pub fn choose_fps_range(ranges: &[FpsRange], max_fps: u32) -> Option<FpsRange> {
    ranges
        .iter()
        .filter(|r| r.max <= max_fps)
        .min_by_key(|r| max_fps - r.max)
        .or_else(|| ranges.iter().min_by_key(|r| r.max.abs_diff(max_fps)))
        .copied()
}

// ── Requests ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Stabilization {
    Off,
    Optical,
    Video,
}

/// Parameters of a repeating capture request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureRequest {
    pub target: NativeSurface,
    pub fps_range: FpsRange,
    pub auto_exposure: bool,
    pub exposure_lock: bool,
    pub torch: bool,
    pub stabilization: Stabilization,
    pub continuous_autofocus: bool,
}

impl CaptureRequest {
    pub fn build(
        target: NativeSurface,
        characteristics: &CameraCharacteristics,
        max_fps: u32,
        torch: bool,
    ) -> Result<Self, CaptureSourceError> {
        let fps_range = choose_fps_range(&characteristics.fps_ranges, max_fps)
            .ok_or(CaptureSourceError::ConfigurationFailure)?;
        let features = characteristics.features;
        let stabilization = if features.contains(CameraFeatures::OPTICAL_STABILIZATION) {
            Stabilization::Optical
        } else if features.contains(CameraFeatures::VIDEO_STABILIZATION) {
            Stabilization::Video
        } else {
            Stabilization::Off
        };
        Ok(Self {
            target,
            fps_range,
            auto_exposure: true,
            exposure_lock: false,
            torch: torch && features.contains(CameraFeatures::FLASH),
            stabilization,
            continuous_autofocus: features.contains(CameraFeatures::CONTINUOUS_AUTOFOCUS),
        })
    }
}

/// Rotation to tag camera frames with.
///
/// Front sensors turn with the display, back sensors against it.
pub fn capture_rotation(sensor_orientation: u32, front_facing: bool, display: VideoRotation) -> VideoRotation {
    let display = display.degrees();
    let display = if front_facing { display } else { (360 - display) % 360 };
    VideoRotation::from_degrees(((sensor_orientation + display) % 360) as i32)
}

// ── Tests ────────────────────────────────────────────────────────
