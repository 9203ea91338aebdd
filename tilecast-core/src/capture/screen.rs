//! Screen capture through a platform projection.
//!
//! A projection mirrors the display into a virtual display that draws
//! into a capture surface. The projection draws with the display's current
//! orientation and letterboxes into a surface of the other shape, so an
//! orientation change requires a full restart with a new surface:
//!
//! ```text
//!   frame (surface worker) ── orientation changed? ──► restarting = true
//!                                                      post restart to screen worker
//!   frames while restarting ─► dropped
//!   restart: stop_internal + start_internal, no observer callbacks
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tracing::{debug, info, warn};

use crate::capture::VideoCaptureSource;
use crate::capture::observer::{CaptureObservers, CaptureSourceObserver};
use crate::capture::platform::{
    DisplayProvider, Projection, ScreenProjector, SurfaceFactory, VirtualDisplay,
    VirtualDisplayListener,
};
use crate::capture::surface::SurfaceCaptureSource;
use crate::config::ScreenConfig;
use crate::delivery::DeliveryQueue;
use crate::error::{CaptureSourceError, MediaError};
use crate::frame::{VideoContentHint, VideoFrame, VideoRotation};
use crate::sink::{SinkSet, VideoSink, VideoSource, deliver};
use crate::worker::{SerialWorker, WorkerHandle};

const VIRTUAL_DISPLAY_NAME: &str = "tilecast-screen";

type Handle = WorkerHandle<ScreenState>;

// ── Sizing ───────────────────────────────────────────────────────

/// Scale a display size to fit within `long x short`, keeping aspect.
///
/// Sizes already inside the bound are returned unchanged.
pub fn compute_target_size(width: u32, height: u32, long: u32, short: u32) -> (u32, u32) {
    let display_short = width.min(height);
    let display_long = width.max(height);
    if display_short <= short && display_long <= long {
        return (width, height);
    }
    // Integer ratios keep exact results where float division would
    // truncate one pixel short.
    let scaled = |v: u32, to: u32, from: u32| (u64::from(v) * u64::from(to) / u64::from(from)) as u32;
    let short_constrains = u64::from(display_short) * u64::from(long) > u64::from(display_long) * u64::from(short);
    // Pin the constraining side exactly, derive the other.
    if short_constrains {
        if display_short == width {
            (short, scaled(height, short, display_short))
        } else {
            (scaled(width, short, display_short), short)
        }
    } else if display_long == width {
        (long, scaled(height, long, display_long))
    } else {
        (scaled(width, long, display_long), long)
    }
}

pub fn align_to_even(value: u32) -> u32 {
    value & !1
}

/// Round down to a multiple of 16; some encoders reject anything else.
pub fn align_to_16(value: u32) -> u32 {
    value & !0xF
}

fn is_portrait(rotation: VideoRotation) -> bool {
    matches!(rotation, VideoRotation::Rotation0 | VideoRotation::Rotation180)
}

// ── Shared flags ─────────────────────────────────────────────────

/// Read by the frame path on the surface worker.
#[derive(Default)]
struct ScreenFlags {
    portrait: AtomicBool,
    restarting: AtomicBool,
    /// Bumped whenever this source tears down its own virtual display.
    display_generation: AtomicU64,
}

// ── Worker state ─────────────────────────────────────────────────

struct Running {
    projection: Box<dyn Projection>,
    display: Option<Box<dyn VirtualDisplay>>,
    source: SurfaceCaptureSource,
    forwarder: Arc<dyn VideoSink>,
}

struct ScreenState {
    projector: Arc<dyn ScreenProjector>,
    surfaces: Arc<dyn SurfaceFactory>,
    display: Arc<dyn DisplayProvider>,
    observers: Arc<CaptureObservers>,
    sinks: Arc<SinkSet>,
    flags: Arc<ScreenFlags>,
    config: ScreenConfig,
    running: Option<Running>,
    restarts: u64,
}

impl ScreenState {
    fn start_internal(&mut self, handle: &Handle) -> bool {
        if self.running.is_some() {
            warn!("screen capture not stopped before start; stopping first");
            self.stop_internal();
        }
        info!("starting screen capture");

        let mut projection = match self.projector.create_projection() {
            Ok(projection) => projection,
            Err(reason) => {
                warn!(?reason, "failed to acquire screen projection");
                self.observers.failed(reason);
                return false;
            }
        };

        let metrics = self.display.metrics();
        let portrait = is_portrait(self.display.rotation());
        self.flags.portrait.store(portrait, Ordering::SeqCst);

        let (target_w, target_h) = compute_target_size(
            metrics.width,
            metrics.height,
            self.config.target_long,
            self.config.target_short,
        );
        let (target_w, target_h) = (align_to_even(target_w), align_to_even(target_h));
        // Landscape metrics include the status bar; trim it to avoid letterboxing.
        let status_bar = if portrait { 0 } else { self.display.status_bar_height() };
        let surface_w = align_to_16(target_w.saturating_sub(status_bar));
        let surface_h = align_to_16(target_h);

        let source = match SurfaceCaptureSource::new(
            Arc::clone(&self.surfaces),
            surface_w,
            surface_h,
            VideoContentHint::Text,
        ) {
            Ok(source) => source,
            Err(e) => {
                warn!("failed to create capture surface: {e}");
                projection.stop();
                self.observers.failed(CaptureSourceError::SystemFailure);
                return false;
            }
        };
        source.set_min_fps(self.config.min_fps);
        let forwarder: Arc<dyn VideoSink> = Arc::new(ScreenFrameFilter {
            sinks: Arc::clone(&self.sinks),
            display: Arc::clone(&self.display),
            flags: Arc::clone(&self.flags),
            worker: handle.clone(),
        });
        source.add_video_sink(Arc::clone(&forwarder));
        source.start();

        let listener = Arc::new(DisplayDispatcher {
            observers: Arc::clone(&self.observers),
            flags: Arc::clone(&self.flags),
            generation: self.flags.display_generation.load(Ordering::SeqCst),
        });
        let display = match projection.create_virtual_display(
            VIRTUAL_DISPLAY_NAME,
            target_w,
            target_h,
            metrics.density_dpi,
            source.surface(),
            listener,
        ) {
            Ok(display) => display,
            Err(e) => {
                warn!("failed to create virtual display: {e}");
                projection.stop();
                source.remove_video_sink(&forwarder);
                source.release();
                self.observers.failed(CaptureSourceError::SystemFailure);
                return false;
            }
        };
        info!(target_w, target_h, surface_w, surface_h, "virtual display created");

        self.running = Some(Running {
            projection,
            display: Some(display),
            source,
            forwarder,
        });
        true
    }

    fn stop_internal(&mut self) {
        let Some(mut running) = self.running.take() else {
            return;
        };
        info!("stopping screen capture");
        self.flags.display_generation.fetch_add(1, Ordering::SeqCst);
        running.projection.stop();
        if let Some(mut display) = running.display.take() {
            display.release();
        }
        running.source.remove_video_sink(&running.forwarder);
        running.source.stop();
        running.source.release();
    }

    fn restart_for_orientation(&mut self, handle: &Handle) {
        // A stop or start in between cancelled this restart.
        if !self.flags.restarting.load(Ordering::SeqCst) {
            return;
        }
        info!("display orientation changed; restarting screen capture");
        self.restarts += 1;
        self.stop_internal();
        self.start_internal(handle);
        self.flags.restarting.store(false, Ordering::SeqCst);
    }
}

// ── Dispatchers ──────────────────────────────────────────────────

/// Runs on the surface worker.
struct ScreenFrameFilter {
    sinks: Arc<SinkSet>,
    display: Arc<dyn DisplayProvider>,
    flags: Arc<ScreenFlags>,
    worker: Handle,
}

impl VideoSink for ScreenFrameFilter {
    fn on_video_frame_received(&self, frame: &VideoFrame) {
        // Polled per frame: nothing else tells a projection the display turned.
        let portrait = is_portrait(self.display.rotation());
        if portrait != self.flags.portrait.load(Ordering::SeqCst) {
            if !self.flags.restarting.swap(true, Ordering::SeqCst) {
                self.worker.post(|state, handle| state.restart_for_orientation(handle));
            }
            return;
        }
        if self.flags.restarting.load(Ordering::SeqCst) {
            return;
        }
        deliver(&self.sinks, frame);
    }
}

struct DisplayDispatcher {
    observers: Arc<CaptureObservers>,
    flags: Arc<ScreenFlags>,
    generation: u64,
}

impl VirtualDisplayListener for DisplayDispatcher {
    fn on_stopped(&self) {
        // Our own teardowns bump the generation first; report only
        // stops the platform initiated.
        let current = self.flags.display_generation.load(Ordering::SeqCst);
        if current == self.generation && !self.flags.restarting.load(Ordering::SeqCst) {
            debug!("virtual display stopped by the platform");
            self.observers.stopped();
        }
    }
}

// ── ScreenCaptureSource ──────────────────────────────────────────

/// Capture source for the full display.
pub struct ScreenCaptureSource {
    worker: SerialWorker<ScreenState>,
    sinks: Arc<SinkSet>,
    observers: Arc<CaptureObservers>,
    flags: Arc<ScreenFlags>,
    released: AtomicBool,
}

impl ScreenCaptureSource {
    pub fn new(
        projector: Arc<dyn ScreenProjector>,
        surfaces: Arc<dyn SurfaceFactory>,
        display: Arc<dyn DisplayProvider>,
        queue: DeliveryQueue,
        config: &ScreenConfig,
    ) -> Result<Self, MediaError> {
        let sinks = Arc::new(SinkSet::new());
        let observers = Arc::new(CaptureObservers::new("screen", queue));
        let flags = Arc::new(ScreenFlags::default());

        let state_sinks = Arc::clone(&sinks);
        let state_observers = Arc::clone(&observers);
        let state_flags = Arc::clone(&flags);
        let config = config.clone();
        let worker = SerialWorker::spawn("screen-capture", move |_| {
            Ok(ScreenState {
                projector,
                surfaces,
                display,
                observers: state_observers,
                sinks: state_sinks,
                flags: state_flags,
                config,
                running: None,
                restarts: 0,
            })
        })?;
        Ok(Self {
            worker,
            sinks,
            observers,
            flags,
            released: AtomicBool::new(false),
        })
    }

    /// Orientation restarts performed so far.
    pub fn restart_count(&self) -> u64 {
        self.worker.run_sync(|state, _| state.restarts).unwrap_or(0)
    }

    /// Whether an orientation restart is underway.
    pub fn is_restarting(&self) -> bool {
        self.flags.restarting.load(Ordering::SeqCst)
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

impl VideoSource for ScreenCaptureSource {
    fn add_video_sink(&self, sink: Arc<dyn VideoSink>) {
        self.sinks.add(sink);
    }

    fn remove_video_sink(&self, sink: &Arc<dyn VideoSink>) {
        self.sinks.remove(sink);
    }

    fn content_hint(&self) -> VideoContentHint {
        VideoContentHint::Text
    }
}

impl VideoCaptureSource for ScreenCaptureSource {
    /// Asynchronous: failures reach observers only.
    fn start(&self) -> Result<(), MediaError> {
        let posted = self.worker.post(|state, handle| {
            let started = state.start_internal(handle);
            state.flags.restarting.store(false, Ordering::SeqCst);
            if started {
                state.observers.started();
            }
        });
        if posted {
            Ok(())
        } else {
            Err(MediaError::WorkerStopped(self.worker.name().to_string()))
        }
    }

    fn stop(&self) -> Result<(), MediaError> {
        self.worker.run_sync(|state, _| {
            state.stop_internal();
            state.flags.restarting.store(false, Ordering::SeqCst);
            state.observers.stopped();
        })
    }

    fn add_capture_source_observer(&self, observer: Arc<dyn CaptureSourceObserver>) {
        self.observers.add(observer);
    }

    fn remove_capture_source_observer(&self, observer: &Arc<dyn CaptureSourceObserver>) {
        self.observers.remove(observer);
    }
}

impl Drop for ScreenCaptureSource {
    fn drop(&mut self) {
        self.release();
    }
}

// ── Tests ────────────────────────────────────────────────────────
