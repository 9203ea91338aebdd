//! One simulated call on the headless backend.
//!
//! The virtual camera feeds the loopback engine through a
//! `VideoSourceAdapter`; the engine echoes every frame back as the local
//! tile and one tile per participant, which the tile controller routes to
//! renderers. An optional screen share appears as a content tile. Tile and
//! capture events are written as JSON lines.

use std::io::Write;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{info, warn};

use tilecast_core::capture::platform::NativeSurface;
use tilecast_core::headless::{
    HeadlessGraphicsFactory, HeadlessSurfaceFactory, LoopbackEngine, VirtualCameraSystem, VirtualScreen,
};
use tilecast_core::tile::CONTENT_SHARE_SUFFIX;
use tilecast_core::{
    CameraCaptureSource, CaptureSourceError, CaptureSourceObserver, DeliveryQueue, MediaError,
    RemoteVideoObserver, Renderer, ScreenCaptureSource, TileController, TileId, VideoCaptureSource,
    VideoFrame, VideoPauseState, VideoRotation, VideoSink, VideoSource, VideoSourceAdapter,
    VideoTileObserver, VideoTileState,
};

use crate::config::SimConfig;

const LOCAL_ATTENDEE: &str = "sim-local";
const CONTENT_TILE_ID: TileId = 1000;
const SCREEN_DPI: u32 = 420;
const SURFACE_BASE: u64 = 0x5000;

// ── Event output ─────────────────────────────────────────────────

#[derive(Serialize)]
struct EventLine<'a> {
    event: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    source: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tile: Option<&'a VideoTileState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<CaptureSourceError>,
}

/// Writes one JSON object per line.
pub struct EventPrinter {
    out: Mutex<Box<dyn Write + Send>>,
}

impl EventPrinter {
    pub fn new(out: Box<dyn Write + Send>) -> Self {
        Self { out: Mutex::new(out) }
    }

    fn emit<T: Serialize>(&self, line: &T) {
        let mut out = self.out.lock();
        let written = serde_json::to_writer(&mut *out, line)
            .map_err(std::io::Error::other)
            .and_then(|()| writeln!(out))
            .and_then(|()| out.flush());
        if let Err(e) = written {
            warn!("failed to write event: {e}");
        }
    }

    fn tile(&self, event: &str, state: &VideoTileState) {
        self.emit(&EventLine {
            event,
            source: None,
            tile: Some(state),
            error: None,
        });
    }

    fn capture(&self, event: &str, source: &str, error: Option<CaptureSourceError>) {
        self.emit(&EventLine {
            event,
            source: Some(source),
            tile: None,
            error,
        });
    }
}

impl VideoTileObserver for EventPrinter {
    fn on_video_tile_added(&self, state: &VideoTileState) {
        self.tile("tile_added", state);
    }
    fn on_video_tile_removed(&self, state: &VideoTileState) {
        self.tile("tile_removed", state);
    }
    fn on_video_tile_paused(&self, state: &VideoTileState) {
        self.tile("tile_paused", state);
    }
    fn on_video_tile_resumed(&self, state: &VideoTileState) {
        self.tile("tile_resumed", state);
    }
    fn on_video_tile_size_changed(&self, state: &VideoTileState) {
        self.tile("tile_size_changed", state);
    }
}

struct CaptureEvents {
    source: &'static str,
    printer: Arc<EventPrinter>,
}

impl CaptureSourceObserver for CaptureEvents {
    fn on_capture_started(&self) {
        self.printer.capture("capture_started", self.source, None);
    }
    fn on_capture_stopped(&self) {
        self.printer.capture("capture_stopped", self.source, None);
    }
    fn on_capture_failed(&self, error: CaptureSourceError) {
        self.printer.capture("capture_failed", self.source, Some(error));
    }
}

// ── Content share ────────────────────────────────────────────────

/// Reports screen frames to the controller as our content tile.
struct ContentShareSink {
    controller: Arc<TileController>,
    attendee_id: String,
}

impl VideoSink for ContentShareSink {
    fn on_video_frame_received(&self, frame: &VideoFrame) {
        self.controller.on_receive_frame(
            Some(frame),
            CONTENT_TILE_ID,
            Some(&self.attendee_id),
            VideoPauseState::Unpaused,
        );
    }
}

// ── Simulation ───────────────────────────────────────────────────

/// Totals printed when the run ends.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SimReport {
    pub frames_emitted: u64,
    pub frames_sent: usize,
    pub frames_drawn: usize,
    pub frames_dropped: usize,
    pub screen_restarts: u64,
    pub tiles: Vec<VideoTileState>,
}

pub struct Simulation {
    config: SimConfig,
    running: Arc<AtomicBool>,
}

impl Simulation {
    pub fn new(config: SimConfig) -> Self {
        Self {
            config,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Clearing the flag ends the run after the current frame.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    /// Run to completion, blocking the calling thread.
    pub fn run(&self, out: Box<dyn Write + Send>) -> Result<SimReport, MediaError> {
        self.running.store(true, Ordering::SeqCst);
        let cfg = &self.config;
        let printer = Arc::new(EventPrinter::new(out));

        let surfaces = HeadlessSurfaceFactory::new();
        let screen = VirtualScreen::new(
            surfaces.clone(),
            cfg.sim.screen_width,
            cfg.sim.screen_height,
            SCREEN_DPI,
        );
        let cameras = VirtualCameraSystem::new(surfaces.clone());
        let queue = DeliveryQueue::new("sim-delivery")?;

        // Engine and tiles.
        let engine = LoopbackEngine::new(LOCAL_ATTENDEE, true);
        let controller = Arc::new(TileController::new(engine.clone(), queue.clone()));
        controller.add_video_tile_observer(printer.clone());
        let remote_observer: Arc<dyn RemoteVideoObserver> = controller.clone();
        engine.set_remote_observer(Some(remote_observer));
        let remote_ids: Vec<TileId> = (1..=cfg.sim.remote_participants)
            .map(|n| engine.add_participant(&format!("attendee-{n}")))
            .collect();

        // Camera into the engine.
        let camera = Arc::new(CameraCaptureSource::new(
            cameras.clone(),
            surfaces.clone(),
            screen.clone(),
            queue.clone(),
            &cfg.pipeline.camera,
        )?);
        camera.add_capture_source_observer(Arc::new(CaptureEvents {
            source: "camera",
            printer: printer.clone(),
        }));
        let adapter = VideoSourceAdapter::new();
        adapter.add_video_sink(engine.clone());
        let camera_source: Arc<dyn VideoSource> = camera.clone();
        adapter.set_source(Some(camera_source));

        // Screen share as a content tile.
        let content_attendee = format!("{LOCAL_ATTENDEE}{CONTENT_SHARE_SUFFIX}");
        let screen_source = if cfg.sim.screen_share {
            let source = ScreenCaptureSource::new(
                screen.clone(),
                surfaces.clone(),
                screen.clone(),
                queue.clone(),
                &cfg.pipeline.screen,
            )?;
            source.add_capture_source_observer(Arc::new(CaptureEvents {
                source: "screen",
                printer: printer.clone(),
            }));
            source.add_video_sink(Arc::new(ContentShareSink {
                controller: controller.clone(),
                attendee_id: content_attendee.clone(),
            }));
            Some(source)
        } else {
            None
        };

        // One renderer per remote and content tile.
        let graphics = HeadlessGraphicsFactory::new(720, 1280);
        let mut view_ids = remote_ids.clone();
        if screen_source.is_some() {
            view_ids.push(CONTENT_TILE_ID);
        }
        let mut renderers = Vec::with_capacity(view_ids.len());
        for tile_id in view_ids {
            let renderer = Arc::new(Renderer::new(
                &format!("render-{tile_id}"),
                graphics.clone(),
                &cfg.pipeline.render,
            )?);
            renderer.attach_surface(NativeSurface(SURFACE_BASE + u64::from(tile_id)))?;
            renderers.push((tile_id, renderer));
        }

        camera.start()?;
        if let Some(source) = &screen_source {
            source.start()?;
        }

        let total = cfg.total_frames();
        let flip_at = cfg.flip_frame();
        let interval = Duration::from_secs(1) / cfg.sim.fps.max(1);
        info!(total, ?interval, participants = remote_ids.len(), "simulation started");

        let started = Instant::now();
        let mut emitted = 0;
        for frame in 0..total {
            if !self.running.load(Ordering::SeqCst) {
                info!(frame, "simulation stopped early");
                break;
            }
            let timestamp_ns = i64::try_from(interval.as_nanos() * u128::from(frame)).unwrap_or(i64::MAX);
            if cameras.emit_frame(timestamp_ns) {
                emitted += 1;
            }
            if screen_source.is_some() {
                screen.emit_frame(timestamp_ns);
            }
            if flip_at == Some(frame) {
                info!(frame, "rotating screen to landscape");
                screen.set_rotation(VideoRotation::Rotation90);
            }

            // Tiles appear once their first frame arrives.
            for (tile_id, renderer) in &renderers {
                if renderer.bound_tile().is_none() && controller.get_video_tile(*tile_id).is_some() {
                    controller.bind_video_view(renderer.clone(), *tile_id);
                }
            }

            let deadline = started + interval * u32::try_from(frame + 1).unwrap_or(u32::MAX);
            if let Some(wait) = deadline.checked_duration_since(Instant::now()) {
                std::thread::sleep(wait);
            }
        }

        // Teardown: sources first, then the participants leave.
        adapter.set_source(None);
        if let Err(e) = camera.stop() {
            warn!("camera stop failed: {e}");
        }
        let screen_restarts = match &screen_source {
            Some(source) => {
                if let Err(e) = source.stop() {
                    warn!("screen stop failed: {e}");
                }
                controller.on_receive_frame(None, CONTENT_TILE_ID, Some(&content_attendee), VideoPauseState::Unpaused);
                source.restart_count()
            }
            None => 0,
        };
        for tile_id in &remote_ids {
            engine.remove_participant(*tile_id);
        }
        for (_, renderer) in &renderers {
            renderer.flush();
        }

        let report = SimReport {
            frames_emitted: emitted,
            frames_sent: engine.frames_received(),
            frames_drawn: renderers.iter().map(|(_, r)| r.frames_drawn()).sum(),
            frames_dropped: renderers.iter().map(|(_, r)| r.frames_dropped()).sum(),
            screen_restarts,
            tiles: controller.video_tiles(),
        };

        for (_, renderer) in &renderers {
            renderer.release();
        }
        if let Some(source) = &screen_source {
            source.release();
        }
        camera.release();
        queue.flush();
        self.running.store(false, Ordering::SeqCst);
        info!(emitted, drawn = report.frames_drawn, "simulation finished");
        Ok(report)
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl SharedBuf {
        fn lines(&self) -> Vec<serde_json::Value> {
            let text = String::from_utf8(self.0.lock().clone()).unwrap();
            text.lines().map(|l| serde_json::from_str(l).unwrap()).collect()
        }
    }

    fn short_config(screen_share: bool) -> SimConfig {
        let mut cfg = SimConfig::default();
        cfg.sim.duration_secs = 0.5;
        cfg.sim.fps = 20;
        cfg.sim.remote_participants = 1;
        cfg.sim.screen_share = screen_share;
        cfg.sim.flip_orientation_after_secs = 0.25;
        cfg
    }

    #[test]
    fn camera_call_adds_and_removes_participant_tile() {
        let buf = SharedBuf::default();
        let report = Simulation::new(short_config(false)).run(Box::new(buf.clone())).unwrap();

        let lines = buf.lines();
        let events_for = |attendee: &str| -> Vec<String> {
            lines
                .iter()
                .filter(|l| l["tile"]["attendee_id"] == attendee)
                .map(|l| l["event"].as_str().unwrap().to_string())
                .collect()
        };
        let remote = events_for("attendee-1");
        assert_eq!(remote.first().map(String::as_str), Some("tile_added"));
        assert_eq!(remote.last().map(String::as_str), Some("tile_removed"));
        assert_eq!(events_for(LOCAL_ATTENDEE).first().map(String::as_str), Some("tile_added"));
        assert!(lines.iter().any(|l| l["event"] == "capture_started" && l["source"] == "camera"));

        assert!(report.frames_sent > 0);
        assert!(report.frames_drawn > 0);
        assert_eq!(report.screen_restarts, 0);
        // Only the local tile survives the participants leaving.
        assert_eq!(report.tiles.len(), 1);
        assert!(report.tiles[0].is_local_tile);
    }

    #[test]
    fn screen_share_shows_content_tile_and_survives_rotation() {
        let buf = SharedBuf::default();
        let report = Simulation::new(short_config(true)).run(Box::new(buf.clone())).unwrap();

        let lines = buf.lines();
        let content_added = lines
            .iter()
            .find(|l| l["event"] == "tile_added" && l["tile"]["is_content"] == true);
        assert!(content_added.is_some());
        let screen_starts = lines
            .iter()
            .filter(|l| l["event"] == "capture_started" && l["source"] == "screen")
            .count();
        assert_eq!(screen_starts, 1);
        assert!(report.tiles.iter().all(|t| !t.is_content));
    }
}
