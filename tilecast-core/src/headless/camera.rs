//! A camera system with scripted devices.
//!
//! Devices open and sessions configure immediately, on the calling thread.
//! Frames are produced on demand with [`VirtualCameraSystem::emit_frame`],
//! which signals whatever surface the active capture request targets.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::capture::device::{
    CameraCharacteristics, CameraFeatures, CaptureRequest, FpsRange, LensFacing, MediaDevice,
    MediaDeviceKind, VideoCaptureFormat, VideoResolution,
};
use crate::capture::platform::{
    CameraDevice, CameraDeviceListener, CameraSystem, CaptureListener, CaptureSession,
    NativeSurface, SessionListener,
};
use crate::error::MediaError;
use crate::headless::HeadlessSurfaceFactory;

/// One scripted camera.
#[derive(Debug, Clone)]
pub struct VirtualCamera {
    pub device: MediaDevice,
    pub characteristics: CameraCharacteristics,
    pub formats: Vec<VideoCaptureFormat>,
}

impl VirtualCamera {
    pub fn front() -> Self {
        Self {
            device: MediaDevice::new("1", "Front camera", MediaDeviceKind::FrontCamera),
            characteristics: CameraCharacteristics {
                sensor_orientation: 270,
                facing: LensFacing::Front,
                fps_ranges: vec![FpsRange::new(15, 15), FpsRange::new(7, 30), FpsRange::new(30, 30)],
                features: CameraFeatures::VIDEO_STABILIZATION,
            },
            formats: standard_formats(),
        }
    }

    pub fn back() -> Self {
        Self {
            device: MediaDevice::new("0", "Back camera", MediaDeviceKind::BackCamera),
            characteristics: CameraCharacteristics {
                sensor_orientation: 90,
                facing: LensFacing::Back,
                fps_ranges: vec![FpsRange::new(15, 30), FpsRange::new(30, 30)],
                features: CameraFeatures::FLASH
                    | CameraFeatures::OPTICAL_STABILIZATION
                    | CameraFeatures::CONTINUOUS_AUTOFOCUS,
            },
            formats: standard_formats(),
        }
    }
}

fn standard_formats() -> Vec<VideoCaptureFormat> {
    vec![
        VideoCaptureFormat::new(640, 480, 30),
        VideoCaptureFormat::new(1280, 720, 30),
        VideoCaptureFormat::new(1920, 1080, 30),
    ]
}

#[derive(Default)]
struct Rig {
    cameras: Vec<VirtualCamera>,
    permission: bool,
    listener: Option<Arc<dyn CameraDeviceListener>>,
    active_target: Option<NativeSurface>,
    torch: HashMap<String, bool>,
    requests: Vec<CaptureRequest>,
    opens: usize,
    closes: usize,
}

type SharedRig = Arc<Mutex<Rig>>;

pub struct VirtualCameraSystem {
    rig: SharedRig,
    surfaces: Arc<HeadlessSurfaceFactory>,
}

impl VirtualCameraSystem {
    /// A phone with a front and a back camera, permission granted.
    pub fn new(surfaces: Arc<HeadlessSurfaceFactory>) -> Arc<Self> {
        Self::with_cameras(surfaces, vec![VirtualCamera::front(), VirtualCamera::back()])
    }

    pub fn with_cameras(surfaces: Arc<HeadlessSurfaceFactory>, cameras: Vec<VirtualCamera>) -> Arc<Self> {
        let rig = Rig {
            cameras,
            permission: true,
            ..Rig::default()
        };
        Arc::new(Self {
            rig: Arc::new(Mutex::new(rig)),
            surfaces,
        })
    }

    pub fn set_permission(&self, granted: bool) {
        self.rig.lock().permission = granted;
    }

    /// Produce one image on the surface the current request draws into.
    /// Returns `false` when nothing is capturing.
    pub fn emit_frame(&self, timestamp_ns: i64) -> bool {
        self.active_surface()
            .and_then(|t| self.surfaces.feed(t))
            .is_some_and(|feed| feed.push_image(timestamp_ns))
    }

    /// Report the open device as disconnected.
    pub fn disconnect(&self) {
        let listener = self.rig.lock().listener.clone();
        if let Some(listener) = listener {
            listener.on_disconnected();
        }
    }

    pub fn is_capturing(&self) -> bool {
        self.rig.lock().active_target.is_some()
    }

    /// Surface the active capture request draws into.
    pub fn active_surface(&self) -> Option<NativeSurface> {
        self.rig.lock().active_target
    }

    pub fn open_count(&self) -> usize {
        self.rig.lock().opens
    }

    pub fn close_count(&self) -> usize {
        self.rig.lock().closes
    }

    pub fn requests(&self) -> Vec<CaptureRequest> {
        self.rig.lock().requests.clone()
    }

    /// Torch state set while no device was open.
    pub fn torch_mode(&self, device_id: &str) -> bool {
        self.rig.lock().torch.get(device_id).copied().unwrap_or(false)
    }

    fn camera(&self, device_id: &str) -> Result<VirtualCamera, MediaError> {
        self.rig
            .lock()
            .cameras
            .iter()
            .find(|c| c.device.id == device_id)
            .cloned()
            .ok_or_else(|| MediaError::UnknownDevice(device_id.to_string()))
    }
}

impl CameraSystem for VirtualCameraSystem {
    fn video_devices(&self) -> Vec<MediaDevice> {
        self.rig.lock().cameras.iter().map(|c| c.device.clone()).collect()
    }

    fn characteristics(&self, device_id: &str) -> Result<CameraCharacteristics, MediaError> {
        Ok(self.camera(device_id)?.characteristics)
    }

    fn supported_formats(&self, device_id: &str, max_fps: u32, max: VideoResolution) -> Vec<VideoCaptureFormat> {
        let Ok(camera) = self.camera(device_id) else {
            return Vec::new();
        };
        camera
            .formats
            .into_iter()
            .filter(|f| f.width <= max.width && f.height <= max.height)
            .map(|f| VideoCaptureFormat::new(f.width, f.height, f.max_fps.min(max_fps)))
            .collect()
    }

    fn has_camera_permission(&self) -> bool {
        self.rig.lock().permission
    }

    fn open_camera(&self, device_id: &str, listener: Arc<dyn CameraDeviceListener>) -> Result<(), MediaError> {
        self.camera(device_id)?;
        {
            let mut rig = self.rig.lock();
            rig.opens += 1;
            rig.listener = Some(Arc::clone(&listener));
        }
        listener.on_opened(Box::new(VirtualCameraDevice {
            id: device_id.to_string(),
            rig: Arc::clone(&self.rig),
            listener: Arc::clone(&listener),
            target: None,
            closed: false,
        }));
        Ok(())
    }

    fn set_torch_mode(&self, device_id: &str, enabled: bool) -> Result<(), MediaError> {
        let camera = self.camera(device_id)?;
        if !camera.characteristics.features.contains(CameraFeatures::FLASH) {
            return Err(MediaError::Unsupported("torch"));
        }
        self.rig.lock().torch.insert(device_id.to_string(), enabled);
        Ok(())
    }
}

struct VirtualCameraDevice {
    id: String,
    rig: SharedRig,
    listener: Arc<dyn CameraDeviceListener>,
    target: Option<NativeSurface>,
    closed: bool,
}

impl CameraDevice for VirtualCameraDevice {
    fn id(&self) -> &str {
        &self.id
    }

    fn create_capture_session(
        &mut self,
        target: NativeSurface,
        listener: Arc<dyn SessionListener>,
    ) -> Result<(), MediaError> {
        if self.closed {
            return Err(MediaError::Other("session on a closed camera".into()));
        }
        self.target = Some(target);
        listener.on_configured(Box::new(VirtualSession {
            rig: Arc::clone(&self.rig),
            target,
        }));
        Ok(())
    }

    fn close(&mut self) {
        if std::mem::replace(&mut self.closed, true) {
            return;
        }
        {
            let mut rig = self.rig.lock();
            rig.closes += 1;
            if rig.active_target.is_some() && rig.active_target == self.target {
                rig.active_target = None;
            }
            if rig.listener.as_ref().is_some_and(|l| Arc::ptr_eq(l, &self.listener)) {
                rig.listener = None;
            }
        }
        self.listener.on_closed();
    }
}

struct VirtualSession {
    rig: SharedRig,
    target: NativeSurface,
}

impl CaptureSession for VirtualSession {
    fn set_repeating_request(
        &mut self,
        request: &CaptureRequest,
        _listener: Arc<dyn CaptureListener>,
    ) -> Result<(), MediaError> {
        let mut rig = self.rig.lock();
        rig.requests.push(request.clone());
        rig.active_target = Some(self.target);
        Ok(())
    }

    fn close(&mut self) {
        let mut rig = self.rig.lock();
        if rig.active_target == Some(self.target) {
            rig.active_target = None;
        }
    }
}
