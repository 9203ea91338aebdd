//! Frames from a platform capture surface.
//!
//! The source owns a [`CaptureSurface`] on its own worker and turns
//! image-available signals into texture frames.
//!
//! ```text
//!   signal ──► pending = true ──► try_capture ──► sinks
//!                                    ▲   │
//!                                    │   └─ in_flight = true
//!   final release of the buffer ─────┘      (later signals coalesce)
//! ```
//!
//! At most one buffer is outstanding. Signals arriving meanwhile set the
//! pending flag, and the next capture happens when the outstanding buffer
//! is released. A slow consumer therefore drops frames instead of queueing
//! them.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tracing::{debug, info, trace, warn};

use crate::capture::platform::{CaptureSurface, NativeSurface, SurfaceFactory};
use crate::error::MediaError;
use crate::frame::{FrameBuffer, TextureHandle, TextureKind, VideoContentHint, VideoFrame, VideoRotation};
use crate::sink::{SinkSet, VideoSink, VideoSource, deliver};
use crate::worker::{SerialWorker, WorkerHandle};

/// Added to the minimum-rate interval before a resend fires.
pub const RESEND_SLACK: Duration = Duration::from_millis(10);

struct SurfaceState {
    surface: Box<dyn CaptureSurface>,
    sinks: Arc<SinkSet>,
    width: u32,
    height: u32,
    listening: bool,
    pending: bool,
    in_flight: bool,
    release_requested: bool,
    released: bool,
    last_sent_ns: Option<i64>,
    min_fps: u32,
}

impl SurfaceState {
    fn on_image_available(&mut self, handle: &WorkerHandle<SurfaceState>) {
        if !self.listening {
            return;
        }
        self.pending = true;
        self.try_capture(handle);
    }

    fn try_capture(&mut self, handle: &WorkerHandle<SurfaceState>) {
        if self.release_requested || !self.pending || self.in_flight {
            return;
        }
        self.pending = false;

        let image = match self.surface.acquire_latest_image() {
            Ok(image) => image,
            Err(e) => {
                warn!(worker = handle.name(), "failed to acquire image: {e}");
                return;
            }
        };
        self.in_flight = true;

        let release_handle = handle.clone();
        let buffer = FrameBuffer::texture(
            self.width,
            self.height,
            TextureHandle {
                id: self.surface.texture_id(),
                kind: TextureKind::ExternalOes,
                transform: image.transform,
            },
            Some(Box::new(move || {
                release_handle.post(|state, handle| state.on_frame_released(handle));
            })),
        );
        let frame = VideoFrame::new(image.timestamp_ns, buffer, VideoRotation::Rotation0);
        deliver(&self.sinks, &frame);
        frame.release();

        self.last_sent_ns = Some(image.timestamp_ns);
        if self.min_fps > 0 {
            let sent = image.timestamp_ns;
            handle.post_delayed(resend_delay(self.min_fps), move |state, handle| {
                // A newer frame, or a stop, moved last_sent_ns on.
                if state.listening && state.last_sent_ns == Some(sent) {
                    trace!(worker = handle.name(), "resending frame at minimum rate");
                    state.pending = true;
                    state.try_capture(handle);
                }
            });
        }
    }

    fn on_frame_released(&mut self, handle: &WorkerHandle<SurfaceState>) {
        self.in_flight = false;
        if self.release_requested {
            self.complete_release(handle);
        } else {
            self.try_capture(handle);
        }
    }

    fn stop(&mut self) {
        self.surface.set_image_listener(None);
        self.listening = false;
        self.pending = false;
        self.last_sent_ns = None;
    }

    fn complete_release(&mut self, handle: &WorkerHandle<SurfaceState>) {
        if self.released {
            return;
        }
        self.released = true;
        self.surface.set_image_listener(None);
        self.surface.release();
        info!(worker = handle.name(), "capture surface released");
        handle.quit();
    }
}

fn resend_delay(min_fps: u32) -> Duration {
    Duration::from_millis(1000 / u64::from(min_fps)) + RESEND_SLACK
}

// ── SurfaceCaptureSource ─────────────────────────────────────────

/// A video source fed by a platform capture surface.
///
/// `start` and `release` are asynchronous; `stop` waits for the worker.
/// `release` is terminal and completes only after the outstanding buffer,
/// if any, has been released.
pub struct SurfaceCaptureSource {
    worker: SerialWorker<SurfaceState>,
    sinks: Arc<SinkSet>,
    producer: NativeSurface,
    width: u32,
    height: u32,
    content_hint: VideoContentHint,
    released: AtomicBool,
}

impl SurfaceCaptureSource {
    pub fn new(
        factory: Arc<dyn SurfaceFactory>,
        width: u32,
        height: u32,
        content_hint: VideoContentHint,
    ) -> Result<Self, MediaError> {
        if width == 0 || height == 0 {
            return Err(MediaError::InvalidDimensions { width, height });
        }
        let sinks = Arc::new(SinkSet::new());
        let state_sinks = Arc::clone(&sinks);
        let worker = SerialWorker::spawn("surface-capture", move |_| {
            let surface = factory.create_surface(width, height)?;
            Ok(SurfaceState {
                surface,
                sinks: state_sinks,
                width,
                height,
                listening: false,
                pending: false,
                in_flight: false,
                release_requested: false,
                released: false,
                last_sent_ns: None,
                min_fps: 0,
            })
        })?;
        let producer = worker.run_sync(|state, _| state.surface.producer())?;
        debug!(?producer, width, height, "created surface capture source");
        Ok(Self {
            worker,
            sinks,
            producer,
            width,
            height,
            content_hint,
            released: AtomicBool::new(false),
        })
    }

    /// Surface that producers should draw into.
    pub fn surface(&self) -> NativeSurface {
        self.producer
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Resend the last frame if nothing new arrives within `1 / fps`.
    /// Zero disables resending.
    pub fn set_min_fps(&self, fps: u32) {
        self.worker.post(move |state, _| state.min_fps = fps);
    }

    /// Begin listening for new images.
    pub fn start(&self) {
        self.worker.post(|state, handle| {
            if state.release_requested {
                return;
            }
            let listener_handle = handle.clone();
            state.surface.set_image_listener(Some(Arc::new(move || {
                listener_handle.post(|state, handle| state.on_image_available(handle));
            })));
            state.listening = true;
        });
    }

    /// Stop listening and wait until the worker has done so. Resources
    /// stay allocated.
    pub fn stop(&self) {
        if let Err(e) = self.worker.run_sync(|state, _| state.stop()) {
            debug!("stop on finished surface source: {e}");
        }
    }

    /// Tear down once any outstanding buffer has been released.
    pub fn release(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        self.worker.post(|state, handle| {
            state.stop();
            if state.in_flight {
                debug!(worker = handle.name(), "release deferred until buffer returns");
                state.release_requested = true;
            } else {
                state.complete_release(handle);
            }
        });
    }

    /// Whether the worker has finished its teardown.
    pub fn is_released(&self) -> bool {
        self.worker.run_sync(|state, _| state.released).unwrap_or(true)
    }
}

impl VideoSource for SurfaceCaptureSource {
    fn add_video_sink(&self, sink: Arc<dyn VideoSink>) {
        self.sinks.add(sink);
    }

    fn remove_video_sink(&self, sink: &Arc<dyn VideoSink>) {
        self.sinks.remove(sink);
    }

    fn content_hint(&self) -> VideoContentHint {
        self.content_hint
    }
}

impl Drop for SurfaceCaptureSource {
    fn drop(&mut self) {
        self.release();
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headless::HeadlessSurfaceFactory;
    use parking_lot::Mutex;
    use std::sync::atomic::AtomicUsize;

    /// Keeps every frame it receives until told to let go.
    #[derive(Default)]
    struct HoldingSink {
        held: Mutex<Vec<VideoFrame>>,
        received: AtomicUsize,
    }

    impl HoldingSink {
        fn release_all(&self) {
            self.held.lock().clear();
        }

        fn received(&self) -> usize {
            self.received.load(Ordering::SeqCst)
        }
    }

    impl VideoSink for HoldingSink {
        fn on_video_frame_received(&self, frame: &VideoFrame) {
            self.received.fetch_add(1, Ordering::SeqCst);
            self.held.lock().push(frame.retain());
        }
    }

    fn setup() -> (Arc<HeadlessSurfaceFactory>, SurfaceCaptureSource, Arc<HoldingSink>) {
        let factory = HeadlessSurfaceFactory::new();
        let source = SurfaceCaptureSource::new(factory.clone(), 64, 48, VideoContentHint::Motion).unwrap();
        let sink = Arc::new(HoldingSink::default());
        source.add_video_sink(sink.clone());
        source.start();
        (factory, source, sink)
    }

    /// Wait until everything the worker has queued so far has run.
    fn settle(source: &SurfaceCaptureSource) {
        let _ = source.worker.run_sync(|_, _| ());
        let _ = source.worker.run_sync(|_, _| ());
    }

    #[test]
    fn frames_carry_surface_dimensions_and_timestamp() {
        let (factory, source, sink) = setup();
        settle(&source);
        factory.feed(source.surface()).unwrap().push_image(1_000);
        settle(&source);

        let held = sink.held.lock();
        assert_eq!(held.len(), 1);
        assert_eq!(held[0].timestamp_ns, 1_000);
        assert_eq!((held[0].width(), held[0].height()), (64, 48));
        assert_eq!(held[0].buffer.as_texture().unwrap().kind, TextureKind::ExternalOes);
    }

    #[test]
    fn signals_coalesce_while_a_buffer_is_outstanding() {
        let (factory, source, sink) = setup();
        settle(&source);
        let feed = factory.feed(source.surface()).unwrap();
        for ts in 1..=5 {
            feed.push_image(ts);
        }
        settle(&source);
        assert_eq!(sink.received(), 1);

        // Returning the buffer lets exactly one more capture happen.
        sink.release_all();
        settle(&source);
        assert_eq!(sink.received(), 2);
        assert_eq!(sink.held.lock()[0].timestamp_ns, 5);
    }

    #[test]
    fn stop_ignores_later_signals() {
        let (factory, source, sink) = setup();
        settle(&source);
        source.stop();
        factory.feed(source.surface()).unwrap().push_image(7);
        settle(&source);
        assert_eq!(sink.received(), 0);
    }

    #[test]
    fn release_waits_for_outstanding_buffer() {
        let (factory, source, sink) = setup();
        settle(&source);
        let feed = factory.feed(source.surface()).unwrap();
        feed.push_image(1);
        settle(&source);

        source.release();
        settle(&source);
        assert!(!feed.is_released());

        sink.release_all();
        for _ in 0..200 {
            if feed.is_released() {
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(feed.is_released());
    }

    #[test]
    fn min_fps_resends_static_content() {
        let (factory, source, sink) = setup();
        source.set_min_fps(50);
        settle(&source);
        factory.feed(source.surface()).unwrap().push_image(42);
        settle(&source);
        sink.release_all();

        // 1000 / 50 + 10 = 30 ms per resend.
        std::thread::sleep(Duration::from_millis(150));
        settle(&source);
        assert!(sink.received() >= 2, "received {}", sink.received());
        assert!(sink.held.lock().iter().all(|f| f.timestamp_ns == 42));
    }

    #[test]
    fn resend_after_stop_is_discarded() {
        let (factory, source, sink) = setup();
        source.set_min_fps(50);
        settle(&source);
        factory.feed(source.surface()).unwrap().push_image(42);
        settle(&source);
        sink.release_all();
        source.stop();
        source.start();

        std::thread::sleep(Duration::from_millis(100));
        settle(&source);
        assert_eq!(sink.received(), 1);
    }
}
