//! Capture sources.
//!
//! | Source                  | Input                       | Content hint |
//! |-------------------------|-----------------------------|--------------|
//! | `SurfaceCaptureSource`  | platform capture surface    | caller's     |
//! | `CameraCaptureSource`   | camera device via a surface | `Motion`     |
//! | `ScreenCaptureSource`   | display projection          | `Text`       |

pub mod camera;
pub mod device;
pub mod observer;
pub mod platform;
pub mod screen;
pub mod surface;

use std::sync::Arc;

use crate::error::MediaError;
use crate::sink::VideoSource;

pub use camera::CameraCaptureSource;
pub use device::{
    CameraCharacteristics, CameraFeatures, CaptureRequest, FpsRange, LensFacing, MediaDevice,
    MediaDeviceKind, Stabilization, VideoCaptureFormat, VideoResolution,
};
pub use observer::CaptureSourceObserver;
pub use screen::ScreenCaptureSource;
pub use surface::SurfaceCaptureSource;

/// A video source driven by a device with a start/stop lifecycle.
pub trait VideoCaptureSource: VideoSource {
    fn start(&self) -> Result<(), MediaError>;

    /// Blocks until capture has stopped.
    fn stop(&self) -> Result<(), MediaError>;

    fn add_capture_source_observer(&self, observer: Arc<dyn CaptureSourceObserver>);

    fn remove_capture_source_observer(&self, observer: &Arc<dyn CaptureSourceObserver>);
}
