//! Contracts the platform implements for capture.
//!
//! ```text
//!   SurfaceFactory ──► CaptureSurface ◄── draws ── CameraDevice / VirtualDisplay
//!                          │
//!                          └─ image-available ──► SurfaceCaptureSource
//! ```
//!
//! Listener traits mirror the platform's callback contracts one to one.
//! Each capture source implements every contract with its own small
//! dispatcher type, so no object has to serve several of them.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::capture::device::{
    CameraCharacteristics, CaptureRequest, MediaDevice, VideoCaptureFormat, VideoResolution,
};
use crate::error::{CaptureSourceError, MediaError};
use crate::frame::{Matrix3, VideoRotation};

/// Opaque handle to a platform drawing surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NativeSurface(pub u64);

// ── Capture surfaces ─────────────────────────────────────────────

/// Called on an arbitrary thread whenever a new image is ready.
pub type ImageAvailableListener = Arc<dyn Fn() + Send + Sync>;

/// The latest image latched into a capture surface's texture.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SurfaceImage {
    pub timestamp_ns: i64,
    pub transform: Matrix3,
}

/// A surface producers draw into and a texture the pipeline samples.
///
/// Only used from the owning source's worker thread.
pub trait CaptureSurface {
    /// Handle producers draw into.
    fn producer(&self) -> NativeSurface;

    /// External texture the latest image is latched into.
    fn texture_id(&self) -> u32;

    fn set_image_listener(&mut self, listener: Option<ImageAvailableListener>);

    /// Latch the newest image into the texture.
    fn acquire_latest_image(&mut self) -> Result<SurfaceImage, MediaError>;

    fn release(&mut self);
}

pub trait SurfaceFactory: Send + Sync {
    fn create_surface(&self, width: u32, height: u32) -> Result<Box<dyn CaptureSurface>, MediaError>;
}

// ── Display ──────────────────────────────────────────────────────

/// Real size of the default display in its current orientation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayMetrics {
    pub width: u32,
    pub height: u32,
    pub density_dpi: u32,
}

pub trait DisplayProvider: Send + Sync {
    /// Rotation of the display from its natural orientation.
    fn rotation(&self) -> VideoRotation;

    fn metrics(&self) -> DisplayMetrics;

    /// Height of the system status bar in pixels.
    fn status_bar_height(&self) -> u32;
}

// ── Camera ───────────────────────────────────────────────────────

pub trait CameraSystem: Send + Sync {
    fn video_devices(&self) -> Vec<MediaDevice>;

    fn characteristics(&self, device_id: &str) -> Result<CameraCharacteristics, MediaError>;

    /// Output formats no larger than `max` and no faster than `max_fps`.
    fn supported_formats(
        &self,
        device_id: &str,
        max_fps: u32,
        max: VideoResolution,
    ) -> Vec<VideoCaptureFormat>;

    fn has_camera_permission(&self) -> bool;

    /// Open a device; the result arrives through `listener`.
    fn open_camera(
        &self,
        device_id: &str,
        listener: Arc<dyn CameraDeviceListener>,
    ) -> Result<(), MediaError>;

    /// Torch control while no device is open.
    fn set_torch_mode(&self, device_id: &str, enabled: bool) -> Result<(), MediaError>;
}

pub trait CameraDevice: Send {
    fn id(&self) -> &str;

    /// Configure a session drawing into `target`; the result arrives
    /// through `listener`.
    fn create_capture_session(
        &mut self,
        target: NativeSurface,
        listener: Arc<dyn SessionListener>,
    ) -> Result<(), MediaError>;

    /// Close the device. The platform reports `on_closed` afterwards.
    fn close(&mut self);
}

pub trait CaptureSession: Send {
    fn set_repeating_request(
        &mut self,
        request: &CaptureRequest,
        listener: Arc<dyn CaptureListener>,
    ) -> Result<(), MediaError>;

    fn close(&mut self);
}

pub trait CameraDeviceListener: Send + Sync {
    fn on_opened(&self, device: Box<dyn CameraDevice>);
    fn on_closed(&self);
    fn on_disconnected(&self);
    fn on_error(&self, code: i32);
}

pub trait SessionListener: Send + Sync {
    fn on_configured(&self, session: Box<dyn CaptureSession>);
    fn on_configure_failed(&self);
}

pub trait CaptureListener: Send + Sync {
    fn on_capture_failed(&self, reason: i32);
}

// ── Screen projection ────────────────────────────────────────────

pub trait ScreenProjector: Send + Sync {
    /// Acquire a fresh projection.
    ///
    /// `SystemFailure` when the platform refuses, `ConfigurationFailure`
    /// when the grant data does not yield a projection.
    fn create_projection(&self) -> Result<Box<dyn Projection>, CaptureSourceError>;
}

pub trait Projection: Send {
    fn create_virtual_display(
        &mut self,
        name: &str,
        width: u32,
        height: u32,
        density_dpi: u32,
        target: NativeSurface,
        listener: Arc<dyn VirtualDisplayListener>,
    ) -> Result<Box<dyn VirtualDisplay>, MediaError>;

    fn stop(&mut self);
}

pub trait VirtualDisplay: Send {
    fn release(&mut self);
}

pub trait VirtualDisplayListener: Send + Sync {
    fn on_stopped(&self);
}
