//! Integration tests: the pipeline end to end on the headless backend,
//! plus the ownership and state-machine properties it relies on.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use proptest::prelude::*;

use tilecast_core::frame::{TextureHandle, TextureKind};
use tilecast_core::headless::{
    HeadlessGraphicsFactory, HeadlessSurfaceFactory, LOCAL_TILE_ID, LoopbackEngine, VirtualCameraSystem,
    VirtualScreen,
};
use tilecast_core::{
    CameraCaptureSource, CameraConfig, CaptureSourceError, CaptureSourceObserver, DeliveryQueue,
    FrameBuffer, Matrix3, MediaDeviceKind, RemoteVideoObserver, RenderConfig, Renderer, ScreenCaptureSource, ScreenConfig,
    SurfaceCaptureSource, TileController, TileId, VideoCaptureSource, VideoContentHint, VideoFrame,
    VideoPauseState, VideoRenderView, VideoRotation, VideoSink, VideoSource, VideoSourceAdapter,
    VideoTileObserver, VideoTileState,
};

// ── Helpers ──────────────────────────────────────────────────────

/// Poll `condition` for up to a second.
fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    false
}

fn counted_texture_frame(id: u32, releases: &Arc<AtomicUsize>) -> VideoFrame {
    let releases = Arc::clone(releases);
    let texture = TextureHandle {
        id,
        kind: TextureKind::Texture2d,
        transform: Matrix3::IDENTITY,
    };
    let buffer = FrameBuffer::texture(
        320,
        240,
        texture,
        Some(Box::new(move || {
            releases.fetch_add(1, Ordering::SeqCst);
        })),
    );
    VideoFrame::new(i64::from(id), buffer, VideoRotation::Rotation0)
}

fn plain_frame() -> VideoFrame {
    counted_texture_frame(1, &Arc::new(AtomicUsize::new(0)))
}

#[derive(Default)]
struct TileEvents(Mutex<Vec<(&'static str, TileId)>>);

impl TileEvents {
    fn names_for(&self, tile_id: TileId) -> Vec<&'static str> {
        self.0
            .lock()
            .iter()
            .filter(|(_, id)| *id == tile_id)
            .map(|(name, _)| *name)
            .collect()
    }
}

impl VideoTileObserver for TileEvents {
    fn on_video_tile_added(&self, state: &VideoTileState) {
        self.0.lock().push(("added", state.tile_id));
    }
    fn on_video_tile_removed(&self, state: &VideoTileState) {
        self.0.lock().push(("removed", state.tile_id));
    }
    fn on_video_tile_paused(&self, state: &VideoTileState) {
        self.0.lock().push(("paused", state.tile_id));
    }
    fn on_video_tile_resumed(&self, state: &VideoTileState) {
        self.0.lock().push(("resumed", state.tile_id));
    }
    fn on_video_tile_size_changed(&self, state: &VideoTileState) {
        self.0.lock().push(("size", state.tile_id));
    }
}

#[derive(Default)]
struct CaptureEvents(Mutex<Vec<String>>);

impl CaptureSourceObserver for CaptureEvents {
    fn on_capture_started(&self) {
        self.0.lock().push("started".into());
    }
    fn on_capture_stopped(&self) {
        self.0.lock().push("stopped".into());
    }
    fn on_capture_failed(&self, error: CaptureSourceError) {
        self.0.lock().push(format!("failed:{error:?}"));
    }
}

fn controller() -> (Arc<LoopbackEngine>, DeliveryQueue, Arc<TileEvents>, TileController) {
    let engine = LoopbackEngine::new("local-attendee", false);
    let queue = DeliveryQueue::new("it-delivery").unwrap();
    let controller = TileController::new(engine.clone(), queue.clone());
    let events = Arc::new(TileEvents::default());
    controller.add_video_tile_observer(events.clone());
    (engine, queue, events, controller)
}

// ── Frame ownership ──────────────────────────────────────────────

proptest! {
    #[test]
    fn test_release_callback_runs_once_at_zero(ops in prop::collection::vec(any::<bool>(), 0..64)) {
        let released = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&released);
        let texture = TextureHandle { id: 1, kind: TextureKind::ExternalOes, transform: Matrix3::IDENTITY };
        let first = FrameBuffer::texture(2, 2, texture, Some(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })));

        let mut held = vec![first];
        for retain in ops {
            if retain {
                let extra = held[0].retain();
                held.push(extra);
            } else if held.len() > 1 {
                let handle = held.pop().unwrap();
                handle.release();
            }
            prop_assert_eq!(released.load(Ordering::SeqCst), 0);
            prop_assert_eq!(held[0].ref_count(), held.len());
        }
        for handle in held {
            handle.release();
        }
        prop_assert_eq!(released.load(Ordering::SeqCst), 1);
    }
}

#[test]
fn test_derived_buffer_keeps_parent_alive() {
    let releases = Arc::new(AtomicUsize::new(0));
    let frame = counted_texture_frame(3, &releases);
    let derived = frame.buffer.with_transform(&Matrix3::scale(-1.0, 1.0));
    frame.release();
    assert_eq!(releases.load(Ordering::SeqCst), 0);
    derived.release();
    assert_eq!(releases.load(Ordering::SeqCst), 1);
}

// ── Surface capture backpressure ─────────────────────────────────

#[derive(Default)]
struct HoldingSink {
    held: Mutex<Vec<VideoFrame>>,
    received: AtomicUsize,
}

impl VideoSink for HoldingSink {
    fn on_video_frame_received(&self, frame: &VideoFrame) {
        self.received.fetch_add(1, Ordering::SeqCst);
        self.held.lock().push(frame.retain());
    }
}

#[test]
fn test_surface_source_keeps_one_buffer_in_flight() {
    let factory = HeadlessSurfaceFactory::new();
    let source = SurfaceCaptureSource::new(factory.clone(), 32, 32, VideoContentHint::Detail).unwrap();
    let sink = Arc::new(HoldingSink::default());
    source.add_video_sink(sink.clone());
    source.start();

    let feed = factory.feed(source.surface()).unwrap();
    assert!(wait_until(|| feed.is_listening()));
    for ts in 0..10 {
        feed.push_image(ts);
    }
    assert!(wait_until(|| sink.received.load(Ordering::SeqCst) == 1));
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(sink.received.load(Ordering::SeqCst), 1, "second buffer while one is outstanding");

    // Each return of the outstanding buffer admits exactly one more.
    sink.held.lock().clear();
    assert!(wait_until(|| sink.received.load(Ordering::SeqCst) == 2));
    assert_eq!(sink.held.lock()[0].timestamp_ns, 9);

    source.release();
    sink.held.lock().clear();
    assert!(wait_until(|| feed.is_released()));
}

// ── Tile state machine ───────────────────────────────────────────

#[test]
fn test_tile_added_then_removed() {
    let (_engine, queue, events, controller) = controller();
    controller.on_receive_frame(Some(&plain_frame()), 5, Some("A"), VideoPauseState::Unpaused);
    controller.on_receive_frame(None, 5, Some("A"), VideoPauseState::Unpaused);
    queue.flush();

    assert_eq!(events.names_for(5), vec!["added", "removed"]);
    assert!(controller.get_video_tile(5).is_none());
}

#[test]
fn test_user_pause_is_not_overridden() {
    let (engine, queue, events, controller) = controller();
    controller.on_receive_frame(Some(&plain_frame()), 2, Some("B"), VideoPauseState::Unpaused);
    controller.pause_remote_video_tile(2);

    controller.on_receive_frame(None, 2, Some("B"), VideoPauseState::PausedForPoorConnection);
    controller.on_receive_frame(Some(&plain_frame()), 2, Some("B"), VideoPauseState::Unpaused);
    queue.flush();

    assert_eq!(events.names_for(2), vec!["added", "paused"]);
    assert_eq!(
        controller.get_video_tile(2).unwrap().pause_state,
        VideoPauseState::PausedByUser
    );
    assert_eq!(engine.pause_calls(), vec![(true, 2)]);
}

#[derive(Default)]
struct CountingView {
    unbound: AtomicUsize,
}

impl VideoSink for CountingView {
    fn on_video_frame_received(&self, _frame: &VideoFrame) {}
}

impl VideoRenderView for CountingView {
    fn on_unbound(&self) {
        self.unbound.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn test_rebinding_view_unbinds_first_tile_once() {
    let (_engine, _queue, _events, controller) = controller();
    controller.on_receive_frame(Some(&plain_frame()), 1, Some("A"), VideoPauseState::Unpaused);
    controller.on_receive_frame(Some(&plain_frame()), 2, Some("B"), VideoPauseState::Unpaused);

    let view = Arc::new(CountingView::default());
    let as_view: Arc<dyn VideoRenderView> = view.clone();
    controller.bind_video_view(as_view.clone(), 1);
    controller.bind_video_view(as_view.clone(), 2);

    assert_eq!(view.unbound.load(Ordering::SeqCst), 1);
    assert_eq!(controller.bound_tile(&as_view), Some(2));
}

// ── Renderer ─────────────────────────────────────────────────────

#[test]
fn test_renderer_releases_every_frame_once_and_draws_newest() {
    let graphics = HeadlessGraphicsFactory::new(640, 480);
    let renderer = Renderer::new("it-render", graphics.clone(), &RenderConfig::default()).unwrap();
    renderer.attach_surface(tilecast_core::capture::platform::NativeSurface(7)).unwrap();

    let releases = Arc::new(AtomicUsize::new(0));
    let first = counted_texture_frame(10, &releases);
    let second = counted_texture_frame(11, &releases);
    renderer.on_video_frame_received(&first);
    renderer.on_video_frame_received(&second);
    first.release();
    second.release();
    renderer.flush();

    assert_eq!(releases.load(Ordering::SeqCst), 2);
    let log = graphics.log();
    let log = log.lock();
    assert_eq!(log.draws.last().unwrap().textures, vec![11]);
    assert_eq!(renderer.frames_drawn() + renderer.frames_dropped(), 2);
}

// ── Capture sources ──────────────────────────────────────────────

#[test]
fn test_switch_camera_restarts_once() {
    let surfaces = HeadlessSurfaceFactory::new();
    let system = VirtualCameraSystem::new(surfaces.clone());
    let display = VirtualScreen::new(surfaces.clone(), 1080, 1920, 420);
    let queue = DeliveryQueue::new("it-camera-delivery").unwrap();
    let camera =
        CameraCaptureSource::new(system.clone(), surfaces, display, queue, &CameraConfig::default()).unwrap();
    assert_eq!(camera.device().unwrap().kind, MediaDeviceKind::FrontCamera);

    camera.start().unwrap();
    assert!(wait_until(|| system.is_capturing()));
    camera.switch_camera().unwrap();
    assert!(wait_until(|| system.is_capturing()));

    assert_eq!(camera.device().unwrap().kind, MediaDeviceKind::BackCamera);
    assert_eq!(system.open_count(), 2);
    assert_eq!(system.close_count(), 1);
}

#[test]
fn test_screen_orientation_flip_is_transparent() {
    let surfaces = HeadlessSurfaceFactory::new();
    let screen = VirtualScreen::new(surfaces.clone(), 1080, 1920, 420);
    let queue = DeliveryQueue::new("it-screen-delivery").unwrap();
    let source = ScreenCaptureSource::new(
        screen.clone(),
        surfaces,
        screen.clone(),
        queue.clone(),
        &ScreenConfig::default(),
    )
    .unwrap();
    let events = Arc::new(CaptureEvents::default());
    source.add_capture_source_observer(events.clone());

    source.start().unwrap();
    assert!(wait_until(|| screen.emit_frame(1)));

    screen.set_rotation(VideoRotation::Rotation270);
    assert!(wait_until(|| screen.emit_frame(2) && source.restart_count() == 1));
    queue.flush();

    assert_eq!(source.restart_count(), 1);
    assert_eq!(*events.0.lock(), vec!["started"]);
    assert_eq!(screen.display_size(), Some((1920, 1080)));
}

// ── End to end ───────────────────────────────────────────────────

#[test]
fn test_camera_to_renderer_through_loopback_engine() {
    let surfaces = HeadlessSurfaceFactory::new();
    let system = VirtualCameraSystem::new(surfaces.clone());
    let display = VirtualScreen::new(surfaces.clone(), 1080, 1920, 420);
    let queue = DeliveryQueue::new("it-e2e-delivery").unwrap();
    let camera = Arc::new(
        CameraCaptureSource::new(system.clone(), surfaces, display, queue.clone(), &CameraConfig::default())
            .unwrap(),
    );

    let engine = LoopbackEngine::new("me", true);
    let remote = engine.add_participant("friend");
    let controller = Arc::new(TileController::new(engine.clone(), queue.clone()));
    let events = Arc::new(TileEvents::default());
    controller.add_video_tile_observer(events.clone());
    let observer: Arc<dyn RemoteVideoObserver> = controller.clone();
    engine.set_remote_observer(Some(observer));

    let adapter = VideoSourceAdapter::new();
    adapter.add_video_sink(engine.clone());
    let source: Arc<dyn VideoSource> = camera.clone();
    adapter.set_source(Some(source));

    camera.start().unwrap();
    assert!(wait_until(|| system.emit_frame(1)));
    assert!(wait_until(|| controller.get_video_tile(remote).is_some()));

    let graphics = HeadlessGraphicsFactory::new(720, 1280);
    let renderer = Arc::new(Renderer::new("it-e2e-render", graphics.clone(), &RenderConfig::default()).unwrap());
    renderer.attach_surface(tilecast_core::capture::platform::NativeSurface(99)).unwrap();
    controller.bind_video_view(renderer.clone(), remote);

    let mut ts = 2;
    assert!(wait_until(|| {
        ts += 1;
        system.emit_frame(ts);
        renderer.frames_drawn() > 0
    }));
    queue.flush();

    let local = controller.get_video_tile(LOCAL_TILE_ID).unwrap();
    assert!(local.is_local_tile);
    assert_eq!(local.attendee_id, "me");
    assert_eq!(events.names_for(remote)[0], "added");
    assert_eq!(renderer.bound_tile(), Some(remote));

    adapter.set_source(None);
    camera.release();
    renderer.release();
}
