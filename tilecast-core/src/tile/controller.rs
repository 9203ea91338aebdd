//! The tile state machine.
//!
//! ```text
//!   tile     frame    pause                       action
//!   ───────  ───────  ──────────────────────────  ─────────────────────────
//!   none     some     any                         create, added
//!   none     none     paused                      create, added
//!   none     none     Unpaused                    ignore
//!   exists   none     Unpaused                    removed, destroy
//!   exists   some     size differs                sizeChanged
//!   exists   any      differs, tile not ByUser    paused / resumed
//!   exists   some     tile Unpaused               forward to bound view
//! ```
//!
//! Notifications are posted to the delivery queue while the table lock is
//! held, so their order matches the order of the transitions. Views and the
//! engine are called after the lock is released.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::delivery::DeliveryQueue;
use crate::engine::{RemoteVideoObserver, VideoClientController};
use crate::frame::VideoFrame;
use crate::registry::Registry;
use crate::tile::{TileId, VideoPauseState, VideoRenderView, VideoTile, VideoTileObserver, VideoTileState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TileEvent {
    Added,
    Removed,
    Paused,
    Resumed,
    SizeChanged,
}

/// Views are keyed by the address of their allocation.
type ViewKey = usize;

fn view_key(view: &Arc<dyn VideoRenderView>) -> ViewKey {
    Arc::as_ptr(view) as *const () as usize
}

#[derive(Default)]
struct TileTable {
    tiles: HashMap<TileId, VideoTile>,
    views: HashMap<ViewKey, TileId>,
}

impl TileTable {
    /// Detach the view of `tile_id` on both sides of the binding.
    fn detach_view(&mut self, tile_id: TileId) -> Option<Arc<dyn VideoRenderView>> {
        let view = self.tiles.get_mut(&tile_id)?.unbind()?;
        self.views.remove(&view_key(&view));
        Some(view)
    }
}

/// Owns every tile and the view bound to each.
pub struct TileController {
    client: Arc<dyn VideoClientController>,
    observers: Registry<dyn VideoTileObserver>,
    queue: DeliveryQueue,
    table: Mutex<TileTable>,
}

impl TileController {
    pub fn new(client: Arc<dyn VideoClientController>, queue: DeliveryQueue) -> Self {
        Self {
            client,
            observers: Registry::new(),
            queue,
            table: Mutex::new(TileTable::default()),
        }
    }

    // ── Engine input ─────────────────────────────────────────────

    /// Apply one engine event. `attendee_id` is `None` for the local tile.
    pub fn on_receive_frame(
        &self,
        frame: Option<&VideoFrame>,
        tile_id: TileId,
        attendee_id: Option<&str>,
        pause_state: VideoPauseState,
    ) {
        let mut table = self.table.lock();

        let Some(tile) = table.tiles.get_mut(&tile_id) else {
            if frame.is_none() && pause_state == VideoPauseState::Unpaused {
                return;
            }
            let (attendee, is_local) = match attendee_id {
                Some(id) => (id.to_string(), false),
                None => (self.client.local_attendee_id(), true),
            };
            let mut state = VideoTileState::new(tile_id, attendee, is_local);
            state.pause_state = pause_state;
            if let Some(frame) = frame {
                state.video_stream_content_width = frame.width();
                state.video_stream_content_height = frame.height();
            }
            info!(tile_id, attendee = %state.attendee_id, is_local, "adding video tile");
            self.notify(TileEvent::Added, &state);
            table.tiles.insert(tile_id, VideoTile::new(state));
            return;
        };

        // End of stream removes the tile whatever its pause state.
        if frame.is_none() && pause_state == VideoPauseState::Unpaused {
            info!(tile_id, "removing video tile");
            let view = table.detach_view(tile_id);
            if let Some(tile) = table.tiles.remove(&tile_id) {
                self.notify(TileEvent::Removed, tile.state());
            }
            drop(table);
            if let Some(view) = view {
                view.on_unbound();
            }
            return;
        }

        if let Some(frame) = frame {
            if tile.update_size(frame.width(), frame.height()) {
                debug!(tile_id, width = frame.width(), height = frame.height(), "tile size changed");
                self.notify(TileEvent::SizeChanged, tile.state());
            }
        }

        // A user pause is only lifted by the user; engine pause changes
        // that arrive meanwhile are ignored.
        let current = tile.state().pause_state;
        if pause_state != current && current != VideoPauseState::PausedByUser {
            tile.set_pause_state(pause_state);
            let event = if pause_state.is_paused() {
                TileEvent::Paused
            } else {
                TileEvent::Resumed
            };
            debug!(tile_id, ?pause_state, "tile pause state changed");
            self.notify(event, tile.state());
        }

        let target = match frame {
            Some(_) if !tile.state().pause_state.is_paused() => tile.view().cloned(),
            _ => None,
        };
        drop(table);
        if let (Some(view), Some(frame)) = (target, frame) {
            view.on_video_frame_received(frame);
        }
    }

    // ── Application control ──────────────────────────────────────

    /// Route frames of `tile_id` to `view`. Whatever either side was bound
    /// to before is unbound first.
    pub fn bind_video_view(&self, view: Arc<dyn VideoRenderView>, tile_id: TileId) {
        let mut unbound = Vec::new();
        let bound = {
            let mut table = self.table.lock();
            if let Some(previous) = table.views.get(&view_key(&view)).copied() {
                warn!(from = previous, to = tile_id, "view rebound to another tile");
                unbound.extend(table.detach_view(previous));
            }
            if table.tiles.contains_key(&tile_id) {
                unbound.extend(table.detach_view(tile_id));
                table.views.insert(view_key(&view), tile_id);
                if let Some(tile) = table.tiles.get_mut(&tile_id) {
                    tile.bind(Arc::clone(&view));
                }
                true
            } else {
                warn!(tile_id, "bind to unknown tile ignored");
                false
            }
        };

        for old in unbound {
            old.on_unbound();
        }
        if bound {
            info!(tile_id, "view bound");
            view.on_bound(tile_id);
        }
    }

    /// Unbind the view of `tile_id` and forget the tile.
    pub fn unbind_video_view(&self, tile_id: TileId) {
        let view = {
            let mut table = self.table.lock();
            let view = table.detach_view(tile_id);
            table.tiles.remove(&tile_id);
            view
        };
        info!(tile_id, "tile unbound");
        if let Some(view) = view {
            view.on_unbound();
        }
    }

    /// Ask the engine to stop sending `tile_id`. Local and unknown tiles
    /// are left alone.
    pub fn pause_remote_video_tile(&self, tile_id: TileId) {
        if !self.set_user_paused(tile_id, true) {
            return;
        }
        self.client.set_remote_paused(true, tile_id);
    }

    /// Undo [`pause_remote_video_tile`](Self::pause_remote_video_tile).
    /// A tile paused for poor connection stays paused until the engine
    /// resumes it.
    pub fn resume_remote_video_tile(&self, tile_id: TileId) {
        if !self.set_user_paused(tile_id, false) {
            return;
        }
        self.client.set_remote_paused(false, tile_id);
    }

    fn set_user_paused(&self, tile_id: TileId, paused: bool) -> bool {
        let mut table = self.table.lock();
        let Some(tile) = table.tiles.get_mut(&tile_id) else {
            debug!(tile_id, "pause change for unknown tile ignored");
            return false;
        };
        if tile.state().is_local_tile {
            warn!(tile_id, "cannot pause or resume the local tile");
            return false;
        }
        let current = tile.state().pause_state;
        if paused && current != VideoPauseState::PausedByUser {
            tile.set_pause_state(VideoPauseState::PausedByUser);
            self.notify(TileEvent::Paused, tile.state());
        } else if !paused && current == VideoPauseState::PausedByUser {
            tile.set_pause_state(VideoPauseState::Unpaused);
            self.notify(TileEvent::Resumed, tile.state());
        }
        info!(tile_id, paused, "remote tile pause requested");
        true
    }

    // ── Queries and observers ────────────────────────────────────

    pub fn get_video_tile(&self, tile_id: TileId) -> Option<VideoTileState> {
        self.table.lock().tiles.get(&tile_id).map(|t| t.state().clone())
    }

    /// All live tiles, ordered by id.
    pub fn video_tiles(&self) -> Vec<VideoTileState> {
        let table = self.table.lock();
        let mut tiles: Vec<_> = table.tiles.values().map(|t| t.state().clone()).collect();
        tiles.sort_by_key(|s| s.tile_id);
        tiles
    }

    /// Tile `view` is bound to, if any.
    pub fn bound_tile(&self, view: &Arc<dyn VideoRenderView>) -> Option<TileId> {
        self.table.lock().views.get(&view_key(view)).copied()
    }

    pub fn add_video_tile_observer(&self, observer: Arc<dyn VideoTileObserver>) {
        self.observers.add(observer);
    }

    pub fn remove_video_tile_observer(&self, observer: &Arc<dyn VideoTileObserver>) {
        self.observers.remove(observer);
    }

    fn notify(&self, event: TileEvent, state: &VideoTileState) {
        let observers = self.observers.snapshot();
        if observers.is_empty() {
            return;
        }
        let state = state.clone();
        self.queue.post(move || {
            for observer in observers {
                match event {
                    TileEvent::Added => observer.on_video_tile_added(&state),
                    TileEvent::Removed => observer.on_video_tile_removed(&state),
                    TileEvent::Paused => observer.on_video_tile_paused(&state),
                    TileEvent::Resumed => observer.on_video_tile_resumed(&state),
                    TileEvent::SizeChanged => observer.on_video_tile_size_changed(&state),
                }
            }
        });
    }
}

impl RemoteVideoObserver for TileController {
    fn on_remote_video_frame(
        &self,
        frame: Option<&VideoFrame>,
        tile_id: TileId,
        attendee_id: Option<&str>,
        pause_code: i32,
    ) {
        self.on_receive_frame(frame, tile_id, attendee_id, VideoPauseState::from_code(pause_code));
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{FrameBuffer, Matrix3, TextureHandle, TextureKind, VideoRotation};
    use crate::sink::VideoSink;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use VideoPauseState::{PausedByUser, PausedForPoorConnection, Unpaused};

    #[derive(Default)]
    struct FakeClient {
        pause_calls: Mutex<Vec<(bool, TileId)>>,
    }

    impl VideoClientController for FakeClient {
        fn local_attendee_id(&self) -> String {
            "me".into()
        }

        fn set_remote_paused(&self, paused: bool, tile_id: TileId) {
            self.pause_calls.lock().push((paused, tile_id));
        }
    }

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<(&'static str, TileId, VideoPauseState)>>,
    }

    impl Recorder {
        fn record(&self, name: &'static str, state: &VideoTileState) {
            self.events.lock().push((name, state.tile_id, state.pause_state));
        }

        fn names(&self) -> Vec<&'static str> {
            self.events.lock().iter().map(|e| e.0).collect()
        }
    }

    impl VideoTileObserver for Recorder {
        fn on_video_tile_added(&self, state: &VideoTileState) {
            self.record("added", state);
        }
        fn on_video_tile_removed(&self, state: &VideoTileState) {
            self.record("removed", state);
        }
        fn on_video_tile_paused(&self, state: &VideoTileState) {
            self.record("paused", state);
        }
        fn on_video_tile_resumed(&self, state: &VideoTileState) {
            self.record("resumed", state);
        }
        fn on_video_tile_size_changed(&self, state: &VideoTileState) {
            self.record("size", state);
        }
    }

    #[derive(Default)]
    struct CountingView {
        frames: AtomicUsize,
        bound: AtomicUsize,
        unbound: AtomicUsize,
    }

    impl VideoSink for CountingView {
        fn on_video_frame_received(&self, _frame: &VideoFrame) {
            self.frames.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl VideoRenderView for CountingView {
        fn on_bound(&self, _tile_id: TileId) {
            self.bound.fetch_add(1, Ordering::SeqCst);
        }
        fn on_unbound(&self) {
            self.unbound.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Fixture {
        client: Arc<FakeClient>,
        recorder: Arc<Recorder>,
        queue: DeliveryQueue,
        controller: TileController,
    }

    impl Fixture {
        fn new() -> Self {
            let client = Arc::new(FakeClient::default());
            let queue = DeliveryQueue::new("tile-test-delivery").unwrap();
            let controller = TileController::new(client.clone(), queue.clone());
            let recorder = Arc::new(Recorder::default());
            controller.add_video_tile_observer(recorder.clone());
            Self {
                client,
                recorder,
                queue,
                controller,
            }
        }

        fn events(&self) -> Vec<&'static str> {
            self.queue.flush();
            self.recorder.names()
        }
    }

    fn frame(width: u32, height: u32) -> VideoFrame {
        let texture = TextureHandle {
            id: 1,
            kind: TextureKind::Texture2d,
            transform: Matrix3::IDENTITY,
        };
        VideoFrame::new(0, FrameBuffer::texture(width, height, texture, None), VideoRotation::Rotation0)
    }

    #[test]
    fn frame_then_null_adds_then_removes() {
        let f = Fixture::new();
        f.controller.on_receive_frame(Some(&frame(4, 4)), 5, Some("A"), Unpaused);
        f.controller.on_receive_frame(None, 5, Some("A"), Unpaused);
        assert_eq!(f.events(), vec!["added", "removed"]);
        assert!(f.controller.get_video_tile(5).is_none());
    }

    #[test]
    fn null_unpaused_for_unknown_tile_is_ignored() {
        let f = Fixture::new();
        f.controller.on_receive_frame(None, 1, Some("A"), Unpaused);
        assert!(f.events().is_empty());
    }

    #[test]
    fn paused_event_creates_tile_without_frame() {
        let f = Fixture::new();
        f.controller.on_receive_frame(None, 2, Some("A"), PausedForPoorConnection);
        assert_eq!(f.events(), vec!["added"]);
        let state = f.controller.get_video_tile(2).unwrap();
        assert_eq!(state.pause_state, PausedForPoorConnection);
        assert_eq!(state.video_stream_content_width, 0);
    }

    #[test]
    fn local_tile_takes_attendee_from_client() {
        let f = Fixture::new();
        f.controller.on_receive_frame(Some(&frame(4, 4)), 0, None, Unpaused);
        let state = f.controller.get_video_tile(0).unwrap();
        assert!(state.is_local_tile);
        assert_eq!(state.attendee_id, "me");
    }

    #[test]
    fn size_change_is_reported() {
        let f = Fixture::new();
        f.controller.on_receive_frame(Some(&frame(4, 4)), 3, Some("A"), Unpaused);
        f.controller.on_receive_frame(Some(&frame(4, 4)), 3, Some("A"), Unpaused);
        f.controller.on_receive_frame(Some(&frame(8, 6)), 3, Some("A"), Unpaused);
        assert_eq!(f.events(), vec!["added", "size"]);
        assert_eq!(f.controller.get_video_tile(3).unwrap().video_stream_content_height, 6);
    }

    #[test]
    fn poor_connection_pauses_and_resumes_automatically() {
        let f = Fixture::new();
        f.controller.on_receive_frame(Some(&frame(4, 4)), 4, Some("A"), Unpaused);
        f.controller.on_receive_frame(None, 4, Some("A"), PausedForPoorConnection);
        f.controller.on_receive_frame(Some(&frame(4, 4)), 4, Some("A"), Unpaused);
        assert_eq!(f.events(), vec!["added", "paused", "resumed"]);
    }

    #[test]
    fn user_pause_shadows_engine_pause_changes() {
        let f = Fixture::new();
        f.controller.on_receive_frame(Some(&frame(4, 4)), 6, Some("A"), Unpaused);
        f.controller.pause_remote_video_tile(6);
        f.controller.on_receive_frame(None, 6, Some("A"), PausedForPoorConnection);
        f.controller.on_receive_frame(Some(&frame(4, 4)), 6, Some("A"), Unpaused);
        assert_eq!(f.events(), vec!["added", "paused"]);
        assert_eq!(f.controller.get_video_tile(6).unwrap().pause_state, PausedByUser);

        f.controller.resume_remote_video_tile(6);
        assert_eq!(f.events(), vec!["added", "paused", "resumed"]);
        assert_eq!(*f.client.pause_calls.lock(), vec![(true, 6), (false, 6)]);
    }

    #[test]
    fn resume_does_not_clear_poor_connection_pause() {
        let f = Fixture::new();
        f.controller.on_receive_frame(None, 7, Some("A"), PausedForPoorConnection);
        f.controller.resume_remote_video_tile(7);
        assert_eq!(f.controller.get_video_tile(7).unwrap().pause_state, PausedForPoorConnection);
        assert_eq!(*f.client.pause_calls.lock(), vec![(false, 7)]);
    }

    #[test]
    fn local_and_unknown_tiles_cannot_be_paused() {
        let f = Fixture::new();
        f.controller.on_receive_frame(Some(&frame(4, 4)), 0, None, Unpaused);
        f.controller.pause_remote_video_tile(0);
        f.controller.pause_remote_video_tile(99);
        assert!(f.client.pause_calls.lock().is_empty());
        assert_eq!(f.events(), vec!["added"]);
    }

    #[test]
    fn frames_reach_bound_view_only_while_unpaused() {
        let f = Fixture::new();
        let view = Arc::new(CountingView::default());
        f.controller.on_receive_frame(Some(&frame(4, 4)), 8, Some("A"), Unpaused);
        f.controller.bind_video_view(view.clone(), 8);
        f.controller.on_receive_frame(Some(&frame(4, 4)), 8, Some("A"), Unpaused);
        f.controller.pause_remote_video_tile(8);
        f.controller.on_receive_frame(Some(&frame(4, 4)), 8, Some("A"), Unpaused);
        assert_eq!(view.frames.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn rebinding_a_view_unbinds_the_first_tile_once() {
        let f = Fixture::new();
        let view = Arc::new(CountingView::default());
        let as_view: Arc<dyn VideoRenderView> = view.clone();
        f.controller.on_receive_frame(Some(&frame(4, 4)), 1, Some("A"), Unpaused);
        f.controller.on_receive_frame(Some(&frame(4, 4)), 2, Some("B"), Unpaused);

        f.controller.bind_video_view(as_view.clone(), 1);
        f.controller.bind_video_view(as_view.clone(), 2);
        assert_eq!(view.unbound.load(Ordering::SeqCst), 1);
        assert_eq!(view.bound.load(Ordering::SeqCst), 2);
        assert_eq!(f.controller.bound_tile(&as_view), Some(2));

        // Tile 1 no longer routes to the view.
        f.controller.on_receive_frame(Some(&frame(4, 4)), 1, Some("A"), Unpaused);
        assert_eq!(view.frames.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn binding_a_taken_tile_unbinds_its_view() {
        let f = Fixture::new();
        let first = Arc::new(CountingView::default());
        let second = Arc::new(CountingView::default());
        f.controller.on_receive_frame(Some(&frame(4, 4)), 1, Some("A"), Unpaused);
        f.controller.bind_video_view(first.clone(), 1);
        f.controller.bind_video_view(second.clone(), 1);
        assert_eq!(first.unbound.load(Ordering::SeqCst), 1);
        f.controller.on_receive_frame(Some(&frame(4, 4)), 1, Some("A"), Unpaused);
        assert_eq!(first.frames.load(Ordering::SeqCst), 0);
        assert_eq!(second.frames.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unbind_forgets_the_tile() {
        let f = Fixture::new();
        let view = Arc::new(CountingView::default());
        f.controller.on_receive_frame(Some(&frame(4, 4)), 1, Some("A"), Unpaused);
        f.controller.bind_video_view(view.clone(), 1);
        f.controller.unbind_video_view(1);
        assert_eq!(view.unbound.load(Ordering::SeqCst), 1);
        assert!(f.controller.get_video_tile(1).is_none());

        // The next frame re-creates the tile.
        f.controller.on_receive_frame(Some(&frame(4, 4)), 1, Some("A"), Unpaused);
        assert_eq!(f.events(), vec!["added", "added"]);
    }

    #[test]
    fn removal_unbinds_the_view() {
        let f = Fixture::new();
        let view = Arc::new(CountingView::default());
        f.controller.on_receive_frame(Some(&frame(4, 4)), 1, Some("A"), Unpaused);
        f.controller.bind_video_view(view.clone(), 1);
        f.controller.on_receive_frame(None, 1, Some("A"), Unpaused);
        assert_eq!(view.unbound.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn end_of_stream_removes_tile_paused_for_poor_connection() {
        let f = Fixture::new();
        f.controller.on_receive_frame(Some(&frame(4, 4)), 5, Some("A"), Unpaused);
        f.controller.on_receive_frame(None, 5, Some("A"), PausedForPoorConnection);
        f.controller.on_receive_frame(None, 5, Some("A"), Unpaused);
        assert_eq!(f.events(), vec!["added", "paused", "removed"]);
        assert!(f.controller.get_video_tile(5).is_none());
    }

    #[test]
    fn end_of_stream_removes_user_paused_tile() {
        let f = Fixture::new();
        let view = Arc::new(CountingView::default());
        f.controller.on_receive_frame(Some(&frame(4, 4)), 6, Some("A"), Unpaused);
        f.controller.bind_video_view(view.clone(), 6);
        f.controller.pause_remote_video_tile(6);
        f.controller.on_receive_frame(None, 6, Some("A"), Unpaused);
        assert!(f.controller.get_video_tile(6).is_none());
        assert_eq!(view.unbound.load(Ordering::SeqCst), 1);

        // Gone for good: resuming it afterwards does nothing.
        f.controller.resume_remote_video_tile(6);
        assert_eq!(f.events(), vec!["added", "paused", "removed"]);
        assert_eq!(*f.client.pause_calls.lock(), vec![(true, 6)]);
    }

    #[test]
    fn engine_codes_are_decoded() {
        let f = Fixture::new();
        f.controller.on_remote_video_frame(None, 3, Some("A"), 2);
        assert_eq!(f.controller.get_video_tile(3).unwrap().pause_state, PausedForPoorConnection);
    }
}
