//! A renderer: one graphics context, one window surface, one pending frame.
//!
//! ```text
//!   producer thread                  render worker
//!   ───────────────                  ─────────────────────────────────
//!   on_video_frame_received
//!     pending.replace(frame) ──┐
//!     (old frame released)     └──►  take pending ─► layout ─► draw ─► swap
//!     post(render)                   release frame
//! ```
//!
//! The pending slot is the only state shared with producers. Everything
//! else lives on the worker.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::Mutex;
use tracing::{debug, info, trace, warn};

use crate::capture::platform::NativeSurface;
use crate::config::RenderConfig;
use crate::error::MediaError;
use crate::frame::VideoFrame;
use crate::render::drawer::FrameDrawer;
use crate::render::graphics::{GraphicsContext, GraphicsFactory, Viewport};
use crate::render::layout::{VideoScalingType, display_size, layout_matrix};
use crate::sink::VideoSink;
use crate::tile::{TileId, VideoRenderView};
use crate::worker::{SerialWorker, WorkerHandle};

type PendingSlot = Arc<Mutex<Option<VideoFrame>>>;

#[derive(Debug, Clone, Copy)]
struct RenderSettings {
    mirror: bool,
    /// Zero follows the viewport.
    aspect_ratio: f32,
    scaling: VideoScalingType,
}

#[derive(Debug, Default)]
struct RenderStats {
    drawn: AtomicUsize,
    dropped: AtomicUsize,
}

struct RenderState {
    context: Box<dyn GraphicsContext>,
    drawer: FrameDrawer,
    pending: PendingSlot,
    settings: Arc<Mutex<RenderSettings>>,
    stats: Arc<RenderStats>,
}

impl RenderState {
    fn render(&mut self, handle: &WorkerHandle<RenderState>) {
        let Some(frame) = self.pending.lock().take() else {
            return;
        };
        if !self.context.has_window_surface() {
            trace!(worker = handle.name(), "no window surface; frame dropped");
            frame.release();
            return;
        }

        let settings = *self.settings.lock();
        let (surface_w, surface_h) = self.context.surface_size();
        let frame_aspect = frame.rotated_width() as f32 / frame.rotated_height() as f32;
        let (width, height) = display_size(
            settings.scaling.min_visible_fraction(),
            frame_aspect,
            surface_w,
            surface_h,
        );
        if width == 0 || height == 0 {
            frame.release();
            return;
        }
        let viewport = Viewport::centered(width, height, surface_w, surface_h);
        let drawn_aspect = if settings.aspect_ratio > 0.0 {
            settings.aspect_ratio
        } else {
            width as f32 / height as f32
        };
        let layout = layout_matrix(frame_aspect, drawn_aspect, settings.mirror);

        match self.drawer.draw_frame(self.context.as_mut(), &frame, &layout, viewport) {
            Ok(true) => match self.context.swap_buffers() {
                Ok(()) => {
                    self.stats.drawn.fetch_add(1, Ordering::SeqCst);
                }
                Err(e) => warn!(worker = handle.name(), "present failed: {e}"),
            },
            Ok(false) => {}
            Err(e) => warn!(worker = handle.name(), "draw failed: {e}"),
        }
        frame.release();
    }

    fn release_drawing_resources(&mut self) {
        self.drawer.release(self.context.as_mut());
    }
}

// ── Renderer ─────────────────────────────────────────────────────

/// Draws the frames it receives into an attached window surface.
///
/// Frames arriving faster than the worker draws them supersede each other;
/// only the newest is drawn.
pub struct Renderer {
    worker: SerialWorker<RenderState>,
    pending: PendingSlot,
    settings: Arc<Mutex<RenderSettings>>,
    stats: Arc<RenderStats>,
    bound_tile: Mutex<Option<TileId>>,
    released: AtomicBool,
}

impl Renderer {
    /// Spawn a renderer; its graphics context is created on the new worker.
    pub fn new(
        name: &str,
        factory: Arc<dyn GraphicsFactory>,
        config: &RenderConfig,
    ) -> Result<Self, MediaError> {
        let pending = PendingSlot::default();
        let settings = Arc::new(Mutex::new(RenderSettings {
            mirror: config.mirror,
            aspect_ratio: 0.0,
            scaling: config.scaling,
        }));
        let stats = Arc::new(RenderStats::default());

        let (state_pending, state_settings, state_stats) =
            (Arc::clone(&pending), Arc::clone(&settings), Arc::clone(&stats));
        let worker = SerialWorker::spawn(name, move |_| {
            Ok(RenderState {
                context: factory.create_context()?,
                drawer: FrameDrawer::new(),
                pending: state_pending,
                settings: state_settings,
                stats: state_stats,
            })
        })?;
        debug!(renderer = name, "renderer created");
        Ok(Self {
            worker,
            pending,
            settings,
            stats,
            bound_tile: Mutex::new(None),
            released: AtomicBool::new(false),
        })
    }

    /// Start drawing into `target`. A frame pending from before is dropped.
    pub fn attach_surface(&self, target: NativeSurface) -> Result<(), MediaError> {
        self.clear_pending();
        self.worker
            .run_sync(move |state, _| state.context.create_window_surface(target))??;
        info!(renderer = self.worker.name(), ?target, "window surface attached");
        Ok(())
    }

    /// Stop drawing. The pending frame is released before the surface goes.
    pub fn detach_surface(&self) {
        self.clear_pending();
        let detached = self.worker.run_sync(|state, _| {
            state.release_drawing_resources();
            state.context.destroy_window_surface();
        });
        match detached {
            Ok(()) => info!(renderer = self.worker.name(), "window surface detached"),
            Err(e) => debug!("detach on finished renderer: {e}"),
        }
    }

    pub fn set_mirror(&self, mirror: bool) {
        self.settings.lock().mirror = mirror;
    }

    /// Crop to `aspect_ratio` (width / height). Zero follows the viewport.
    pub fn set_aspect_ratio(&self, aspect_ratio: f32) {
        self.settings.lock().aspect_ratio = aspect_ratio.max(0.0);
    }

    pub fn set_scaling_type(&self, scaling: VideoScalingType) {
        self.settings.lock().scaling = scaling;
    }

    /// Release the pending frame, if any, without drawing it.
    pub fn clear_pending(&self) {
        let previous = self.pending.lock().take();
        if let Some(frame) = previous {
            frame.release();
        }
    }

    /// Block until every render tick queued so far has run.
    pub fn flush(&self) {
        let _ = self.worker.run_sync(|_, _| ());
    }

    pub fn frames_drawn(&self) -> usize {
        self.stats.drawn.load(Ordering::SeqCst)
    }

    /// Frames replaced in the slot before they could be drawn.
    pub fn frames_dropped(&self) -> usize {
        self.stats.dropped.load(Ordering::SeqCst)
    }

    /// Tile this renderer is currently bound to.
    pub fn bound_tile(&self) -> Option<TileId> {
        *self.bound_tile.lock()
    }

    /// Drop the pending frame, release the graphics context and end the
    /// worker. Further frames are ignored.
    pub fn release(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        self.clear_pending();
        let released = self.worker.run_sync(|state, _| {
            state.release_drawing_resources();
            state.context.release();
        });
        if let Err(e) = released {
            debug!("release on finished renderer: {e}");
        }
        self.worker.shutdown();
        info!(renderer = self.worker.name(), "renderer released");
    }
}

impl VideoSink for Renderer {
    fn on_video_frame_received(&self, frame: &VideoFrame) {
        if self.released.load(Ordering::SeqCst) {
            return;
        }
        self.stash(frame);
    }
}

impl Renderer {
    /// Put `frame` in the pending slot and schedule a render.
    fn stash(&self, frame: &VideoFrame) {
        let previous = self.pending.lock().replace(frame.retain());
        if let Some(previous) = previous {
            self.stats.dropped.fetch_add(1, Ordering::SeqCst);
            previous.release();
        }
        // A release that ran after the check above has already emptied the slot
        // and nothing will render again.
        let scheduled = self.worker.post(|state, handle| state.render(handle));
        if !scheduled || self.released.load(Ordering::SeqCst) {
            self.clear_pending();
        }
    }
}

impl VideoRenderView for Renderer {
    fn on_bound(&self, tile_id: TileId) {
        *self.bound_tile.lock() = Some(tile_id);
    }

    fn on_unbound(&self) {
        *self.bound_tile.lock() = None;
        self.clear_pending();
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        self.release();
    }
}

// ── Tests ────────────────────────────────────────────────────────
