//! Camera capture.
//!
//! The camera source composes a [`SurfaceCaptureSource`] per run: the
//! device draws into the source's surface, and every frame coming out of
//! it is mirrored and rotated for the current device before it reaches
//! the sinks.
//!
//! ```text
//!   start ─► open_camera ─► on_opened ─► create_session ─► on_configured
//!                                                              │
//!                              on_capture_started ◄─ set_repeating_request
//! ```
//!
//! Every run gets a generation number. Platform callbacks carry the
//! generation they were issued for, and callbacks from an earlier run are
//! ignored (stale devices and sessions are closed on arrival).

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{info, warn};

use crate::capture::device::{
    CameraCharacteristics, CameraFeatures, CaptureRequest, MediaDevice, MediaDeviceKind,
    VideoCaptureFormat, VideoResolution, capture_rotation, choose_format, default_device,
    first_of_kind,
};
use crate::capture::observer::{CaptureObservers, CaptureSourceObserver};
use crate::capture::platform::{
    CameraDevice, CameraDeviceListener, CameraSystem, CaptureListener, CaptureSession,
    DisplayProvider, SessionListener, SurfaceFactory,
};
use crate::capture::surface::SurfaceCaptureSource;
use crate::capture::VideoCaptureSource;
use crate::config::CameraConfig;
use crate::delivery::DeliveryQueue;
use crate::error::{CaptureSourceError, MediaError};
use crate::frame::{Matrix3, VideoContentHint, VideoFrame};
use crate::sink::{SinkSet, VideoSink, VideoSource, deliver};
use crate::worker::{SerialWorker, WorkerHandle};

/// Upper bound on the frame rate formats are listed for.
pub const MAX_CAPTURE_FPS: u32 = 30;

type Handle = WorkerHandle<CameraState>;

// ── Worker state ─────────────────────────────────────────────────

struct Running {
    source: SurfaceCaptureSource,
    forwarder: Arc<dyn VideoSink>,
    characteristics: CameraCharacteristics,
    device: Option<Box<dyn CameraDevice>>,
    session: Option<Box<dyn CaptureSession>>,
    /// The platform already reported this run as stopped.
    stop_reported: bool,
}

struct CameraState {
    system: Arc<dyn CameraSystem>,
    surfaces: Arc<dyn SurfaceFactory>,
    display: Arc<dyn DisplayProvider>,
    observers: Arc<CaptureObservers>,
    sinks: Arc<SinkSet>,
    device: Option<MediaDevice>,
    format: VideoCaptureFormat,
    max_resolution: VideoResolution,
    torch_enabled: bool,
    /// Characteristics of the selected device, kept after stop for torch checks.
    characteristics: Option<CameraCharacteristics>,
    running: Option<Running>,
    generation: u64,
    interrupted: bool,
}

impl CameraState {
    fn is_running(&self) -> bool {
        self.running.is_some()
    }

    fn fail(&self, error: CaptureSourceError) -> MediaError {
        self.observers.failed(error);
        MediaError::Capture(error)
    }

    fn start_internal(&mut self, handle: &Handle) -> Result<(), MediaError> {
        if !self.system.has_camera_permission() {
            warn!("camera permission missing");
            return Err(self.fail(CaptureSourceError::PermissionError));
        }
        self.stop_internal();

        let Some(device) = self.device.clone() else {
            info!("no camera device selected; not starting");
            return Ok(());
        };
        info!(%device, "starting camera capture");

        let characteristics = match self.system.characteristics(&device.id) {
            Ok(c) => c,
            Err(e) => {
                warn!(%device, "failed to read characteristics: {e}");
                return Err(self.fail(CaptureSourceError::SystemFailure));
            }
        };
        self.characteristics = Some(characteristics.clone());

        let formats = self
            .system
            .supported_formats(&device.id, MAX_CAPTURE_FPS, self.max_resolution);
        let Some(chosen) = choose_format(&formats, &self.format) else {
            warn!(%device, "no format close to {}", self.format);
            return Err(self.fail(CaptureSourceError::ConfigurationFailure));
        };
        info!(format = %chosen, "chosen capture format");

        let source = SurfaceCaptureSource::new(
            Arc::clone(&self.surfaces),
            chosen.width,
            chosen.height,
            VideoContentHint::Motion,
        )
        .map_err(|e| {
            warn!("failed to create capture surface: {e}");
            self.fail(CaptureSourceError::SystemFailure)
        })?;
        let forwarder: Arc<dyn VideoSink> = Arc::new(CameraFrameProcessor {
            sinks: Arc::clone(&self.sinks),
            display: Arc::clone(&self.display),
            sensor_orientation: characteristics.sensor_orientation,
            front_facing: characteristics.is_front_facing(),
        });
        source.add_video_sink(Arc::clone(&forwarder));
        source.start();

        self.generation += 1;
        self.running = Some(Running {
            source,
            forwarder,
            characteristics,
            device: None,
            session: None,
            stop_reported: false,
        });

        let listener = Arc::new(DeviceDispatcher {
            worker: handle.clone(),
            generation: self.generation,
        });
        if let Err(e) = self.system.open_camera(&device.id, listener) {
            warn!(%device, "failed to open camera: {e}");
            self.teardown();
            return Err(self.fail(CaptureSourceError::SystemFailure));
        }
        Ok(())
    }

    /// Stop the current run and report it, once, to observers.
    fn stop_internal(&mut self) {
        if self.teardown() {
            self.observers.stopped();
        }
    }

    /// Tear down the current run. Returns whether a stopped callback is owed.
    fn teardown(&mut self) -> bool {
        let Some(mut running) = self.running.take() else {
            return false;
        };
        info!("stopping camera capture");
        if let Some(mut session) = running.session.take() {
            session.close();
        }
        // The device's own close callback arrives after the run is gone and is ignored.
        if let Some(mut device) = running.device.take() {
            device.close();
        }
        running.source.remove_video_sink(&running.forwarder);
        running.source.stop();
        running.source.release();
        !running.stop_reported
    }

    /// Report a stop the platform initiated for the current run.
    fn report_platform_stop(&mut self) {
        if let Some(running) = self.running.as_mut()
            && !running.stop_reported
        {
            running.stop_reported = true;
            self.observers.stopped();
        }
    }

    fn restart_if_running(&mut self, handle: &Handle) -> Result<(), MediaError> {
        if !self.is_running() {
            return Ok(());
        }
        self.stop_internal();
        self.start_internal(handle)
    }

    fn set_device(&mut self, device: Option<MediaDevice>, handle: &Handle) -> Result<(), MediaError> {
        if self.device == device {
            info!("camera device unchanged; ignoring");
            return Ok(());
        }
        if let Some(d) = &device {
            if !self.system.video_devices().contains(d) {
                return Err(MediaError::UnknownDevice(d.id.clone()));
            }
        }
        info!(device = ?device.as_ref().map(|d| d.id.as_str()), "setting camera device");
        self.device = device;
        self.characteristics = None;
        self.restart_if_running(handle)
    }

    fn switch_camera(&mut self, handle: &Handle) -> Result<(), MediaError> {
        let devices = self.system.video_devices();
        let desired = match self.device.as_ref().map(|d| d.kind) {
            Some(MediaDeviceKind::FrontCamera) => MediaDeviceKind::BackCamera,
            _ => MediaDeviceKind::FrontCamera,
        };
        match first_of_kind(&devices, desired) {
            Some(next) => self.set_device(Some(next), handle),
            None => {
                info!(?desired, "no camera of the other kind; keeping current device");
                Ok(())
            }
        }
    }

    fn set_format(&mut self, format: VideoCaptureFormat, handle: &Handle) -> Result<(), MediaError> {
        if self.format == format {
            info!(%format, "capture format unchanged; ignoring");
            return Ok(());
        }
        info!(%format, "setting capture format");
        self.format = format;
        self.restart_if_running(handle)
    }

    fn set_torch_enabled(&mut self, enabled: bool, handle: &Handle) -> Result<(), MediaError> {
        if let Some(c) = &self.characteristics {
            if !c.features.contains(CameraFeatures::FLASH) {
                warn!("torch not supported on current camera");
                return Err(MediaError::Unsupported("torch"));
            }
        }
        self.torch_enabled = enabled;
        let device_open = self.running.as_ref().is_some_and(|r| r.device.is_some());
        if device_open {
            self.issue_request(handle, false);
            Ok(())
        } else if let Some(device) = &self.device {
            self.system.set_torch_mode(&device.id, enabled)
        } else {
            Ok(())
        }
    }

    // ── Platform callbacks ───────────────────────────────────────

    fn on_device_opened(&mut self, generation: u64, mut device: Box<dyn CameraDevice>, handle: &Handle) {
        let current = generation == self.generation;
        let Some(running) = self.running.as_mut().filter(|_| current) else {
            info!(id = device.id(), "closing camera opened for a previous run");
            device.close();
            return;
        };
        info!(id = device.id(), "camera device opened");
        self.interrupted = false;

        let listener = Arc::new(SessionDispatcher {
            worker: handle.clone(),
            generation,
        });
        let target = running.source.surface();
        let result = device.create_capture_session(target, listener);
        running.device = Some(device);
        if let Err(e) = result {
            warn!("failed to create capture session: {e}");
            self.observers.failed(CaptureSourceError::SystemFailure);
        }
    }

    fn on_session_configured(&mut self, generation: u64, mut session: Box<dyn CaptureSession>, handle: &Handle) {
        let current = generation == self.generation;
        let Some(running) = self.running.as_mut().filter(|_| current) else {
            session.close();
            return;
        };
        info!("camera capture session configured");
        running.session = Some(session);
        self.issue_request(handle, true);
    }

    fn issue_request(&mut self, handle: &Handle, notify_started: bool) {
        let Some(running) = self.running.as_mut() else {
            warn!("capture request without a running camera; may be mid restart");
            return;
        };
        let Some(session) = running.session.as_mut() else {
            warn!("capture request without a session; may be mid restart");
            return;
        };
        let request = match CaptureRequest::build(
            running.source.surface(),
            &running.characteristics,
            self.format.max_fps,
            self.torch_enabled,
        ) {
            Ok(request) => request,
            Err(reason) => {
                warn!("no usable frame rate range");
                self.observers.failed(reason);
                return;
            }
        };
        info!(fps = ?request.fps_range, stabilization = ?request.stabilization, "issuing capture request");
        let listener = Arc::new(CaptureDispatcher {
            worker: handle.clone(),
            generation: self.generation,
        });
        match session.set_repeating_request(&request, listener) {
            Ok(()) if notify_started => self.observers.started(),
            Ok(()) => {}
            Err(e) => {
                warn!("failed to start capture request: {e}");
                self.observers.failed(CaptureSourceError::SystemFailure);
            }
        }
    }
}

// ── Callback dispatchers ─────────────────────────────────────────

struct DeviceDispatcher {
    worker: Handle,
    generation: u64,
}

impl CameraDeviceListener for DeviceDispatcher {
    fn on_opened(&self, device: Box<dyn CameraDevice>) {
        let generation = self.generation;
        self.worker.post(move |state, handle| state.on_device_opened(generation, device, handle));
    }

    fn on_closed(&self) {
        let generation = self.generation;
        self.worker.post(move |state, _| {
            if generation == state.generation {
                info!("camera device closed");
                state.report_platform_stop();
            }
        });
    }

    fn on_disconnected(&self) {
        let generation = self.generation;
        self.worker.post(move |state, _| {
            if generation == state.generation {
                info!("camera device disconnected");
                state.interrupted = true;
                state.report_platform_stop();
            }
        });
    }

    fn on_error(&self, code: i32) {
        let generation = self.generation;
        self.worker.post(move |state, _| {
            if generation == state.generation {
                warn!(code, "camera device error");
                state.observers.failed(CaptureSourceError::SystemFailure);
            }
        });
    }
}

struct SessionDispatcher {
    worker: Handle,
    generation: u64,
}

impl SessionListener for SessionDispatcher {
    fn on_configured(&self, session: Box<dyn CaptureSession>) {
        let generation = self.generation;
        self.worker
            .post(move |state, handle| state.on_session_configured(generation, session, handle));
    }

    fn on_configure_failed(&self) {
        let generation = self.generation;
        self.worker.post(move |state, _| {
            if generation == state.generation {
                warn!("camera session configuration failed");
                state.observers.failed(CaptureSourceError::ConfigurationFailure);
            }
        });
    }
}

struct CaptureDispatcher {
    worker: Handle,
    generation: u64,
}

impl CaptureListener for CaptureDispatcher {
    fn on_capture_failed(&self, reason: i32) {
        let generation = self.generation;
        self.worker.post(move |state, _| {
            if generation == state.generation {
                warn!(reason, "camera capture failed");
                state.observers.failed(CaptureSourceError::SystemFailure);
            }
        });
    }
}

/// Runs on the surface worker: mirrors and rotates each frame.
struct CameraFrameProcessor {
    sinks: Arc<SinkSet>,
    display: Arc<dyn DisplayProvider>,
    sensor_orientation: u32,
    front_facing: bool,
}

impl VideoSink for CameraFrameProcessor {
    fn on_video_frame_received(&self, frame: &VideoFrame) {
        let mut extra = Matrix3::IDENTITY;
        extra.pre_translate(0.5, 0.5);
        if self.front_facing {
            extra.pre_scale(-1.0, 1.0);
        }
        extra.pre_rotate(-(self.sensor_orientation as f32));
        extra.pre_translate(-0.5, -0.5);

        let rotation = capture_rotation(
            self.sensor_orientation,
            self.front_facing,
            self.display.rotation(),
        );
        let processed = VideoFrame::new(frame.timestamp_ns, frame.buffer.with_transform(&extra), rotation);
        deliver(&self.sinks, &processed);
    }
}

// ── CameraCaptureSource ──────────────────────────────────────────

/// Capture source for device cameras.
///
/// Setters that change what is captured restart capture when it is
/// running and report the outcome.
pub struct CameraCaptureSource {
    worker: SerialWorker<CameraState>,
    system: Arc<dyn CameraSystem>,
    sinks: Arc<SinkSet>,
    observers: Arc<CaptureObservers>,
    released: AtomicBool,
}

impl CameraCaptureSource {
    pub fn new(
        system: Arc<dyn CameraSystem>,
        surfaces: Arc<dyn SurfaceFactory>,
        display: Arc<dyn DisplayProvider>,
        queue: DeliveryQueue,
        config: &CameraConfig,
    ) -> Result<Self, MediaError> {
        let sinks = Arc::new(SinkSet::new());
        let observers = Arc::new(CaptureObservers::new("camera", queue));
        let device = default_device(&system.video_devices());
        info!(device = ?device.as_ref().map(|d| d.id.as_str()), "default camera device");

        let state_system = Arc::clone(&system);
        let state_sinks = Arc::clone(&sinks);
        let state_observers = Arc::clone(&observers);
        let format = config.desired_format();
        let max_resolution = config.max_resolution;
        let worker = SerialWorker::spawn("camera-capture", move |_| {
            Ok(CameraState {
                system: state_system,
                surfaces,
                display,
                observers: state_observers,
                sinks: state_sinks,
                device,
                format,
                max_resolution,
                torch_enabled: false,
                characteristics: None,
                running: None,
                generation: 0,
                interrupted: false,
            })
        })?;
        Ok(Self {
            worker,
            system,
            sinks,
            observers,
            released: AtomicBool::new(false),
        })
    }

    /// Cameras the platform reports.
    pub fn list_video_devices(&self) -> Vec<MediaDevice> {
        self.system.video_devices()
    }

    pub fn device(&self) -> Option<MediaDevice> {
        self.worker.run_sync(|state, _| state.device.clone()).ok().flatten()
    }

    /// Select a device; restarts capture if running.
    pub fn set_device(&self, device: Option<MediaDevice>) -> Result<(), MediaError> {
        self.worker.run_sync(move |state, handle| state.set_device(device, handle))?
    }

    /// Front camera becomes back camera; anything else becomes front.
    /// Keeps the current device when the other kind is absent.
    pub fn switch_camera(&self) -> Result<(), MediaError> {
        self.worker.run_sync(|state, handle| state.switch_camera(handle))?
    }

    pub fn format(&self) -> Result<VideoCaptureFormat, MediaError> {
        self.worker.run_sync(|state, _| state.format)
    }

    /// Set the desired format; restarts capture if running.
    pub fn set_format(&self, format: VideoCaptureFormat) -> Result<(), MediaError> {
        self.worker.run_sync(move |state, handle| state.set_format(format, handle))?
    }

    /// Bound for format selection on the next start.
    pub fn set_max_resolution(&self, max: VideoResolution) {
        self.worker.post(move |state, _| state.max_resolution = max);
    }

    pub fn torch_enabled(&self) -> bool {
        self.worker.run_sync(|state, _| state.torch_enabled).unwrap_or(false)
    }

    pub fn set_torch_enabled(&self, enabled: bool) -> Result<(), MediaError> {
        self.worker
            .run_sync(move |state, handle| state.set_torch_enabled(enabled, handle))?
    }

    /// Whether the last run was cut off by the device disconnecting.
    pub fn is_interrupted(&self) -> bool {
        self.worker.run_sync(|state, _| state.interrupted).unwrap_or(false)
    }

    /// Stop capture and end the worker.
    pub fn release(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.worker.run_sync(|state, _| state.stop_internal());
        self.worker.shutdown();
    }
}

impl VideoSource for CameraCaptureSource {
    fn add_video_sink(&self, sink: Arc<dyn VideoSink>) {
        self.sinks.add(sink);
    }

    fn remove_video_sink(&self, sink: &Arc<dyn VideoSink>) {
        self.sinks.remove(sink);
    }

    fn content_hint(&self) -> VideoContentHint {
        VideoContentHint::Motion
    }
}

impl VideoCaptureSource for CameraCaptureSource {
    /// Fails with a `PermissionError` capture error when the permission
    /// is missing; observers are told as well.
    fn start(&self) -> Result<(), MediaError> {
        self.worker.run_sync(|state, handle| state.start_internal(handle))?
    }

    fn stop(&self) -> Result<(), MediaError> {
        self.worker.run_sync(|state, _| state.stop_internal())
    }

    fn add_capture_source_observer(&self, observer: Arc<dyn CaptureSourceObserver>) {
        self.observers.add(observer);
    }

    fn remove_capture_source_observer(&self, observer: &Arc<dyn CaptureSourceObserver>) {
        self.observers.remove(observer);
    }
}

impl Drop for CameraCaptureSource {
    fn drop(&mut self) {
        self.release();
    }
}

// ── Tests ────────────────────────────────────────────────────────
