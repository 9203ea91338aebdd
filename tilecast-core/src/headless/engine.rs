//! An engine that sends every outgoing frame straight back as remote video.
//!
//! Each frame the engine receives is replayed to the remote observer once
//! for the local tile and once per simulated participant. Participants can
//! be paused, degraded and removed to drive the tile state machine.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use tracing::debug;

use crate::engine::{RemoteVideoObserver, VideoClientController};
use crate::frame::VideoFrame;
use crate::sink::VideoSink;
use crate::tile::{TileId, VideoPauseState};

/// Tile id the engine reports our own video under.
pub const LOCAL_TILE_ID: TileId = 0;

#[derive(Debug, Clone)]
struct Participant {
    attendee_id: String,
    paused_by_user: bool,
    poor_connection: bool,
}

impl Participant {
    fn pause_state(&self) -> VideoPauseState {
        if self.paused_by_user {
            VideoPauseState::PausedByUser
        } else if self.poor_connection {
            VideoPauseState::PausedForPoorConnection
        } else {
            VideoPauseState::Unpaused
        }
    }
}

pub struct LoopbackEngine {
    local_attendee_id: String,
    echo_local: bool,
    observer: Mutex<Option<Arc<dyn RemoteVideoObserver>>>,
    participants: Mutex<BTreeMap<TileId, Participant>>,
    pause_calls: Mutex<Vec<(bool, TileId)>>,
    frames: AtomicUsize,
}

impl LoopbackEngine {
    /// `echo_local` also reports outgoing frames as the local tile.
    pub fn new(local_attendee_id: &str, echo_local: bool) -> Arc<Self> {
        Arc::new(Self {
            local_attendee_id: local_attendee_id.to_string(),
            echo_local,
            observer: Mutex::new(None),
            participants: Mutex::new(BTreeMap::new()),
            pause_calls: Mutex::new(Vec::new()),
            frames: AtomicUsize::new(0),
        })
    }

    pub fn set_remote_observer(&self, observer: Option<Arc<dyn RemoteVideoObserver>>) {
        *self.observer.lock() = observer;
    }

    /// Add a participant whose video mirrors ours. Ids start at 1.
    pub fn add_participant(&self, attendee_id: &str) -> TileId {
        let mut participants = self.participants.lock();
        let tile_id = participants.keys().next_back().map_or(1, |last| last + 1);
        participants.insert(
            tile_id,
            Participant {
                attendee_id: attendee_id.to_string(),
                paused_by_user: false,
                poor_connection: false,
            },
        );
        tile_id
    }

    /// The participant leaves: an end-of-stream event is reported.
    pub fn remove_participant(&self, tile_id: TileId) {
        let removed = self.participants.lock().remove(&tile_id);
        if let Some(p) = removed {
            self.report(None, tile_id, Some(&p.attendee_id), VideoPauseState::Unpaused);
        }
    }

    /// Simulate the downlink degrading or recovering for one participant.
    pub fn set_poor_connection(&self, tile_id: TileId, poor: bool) {
        let participant = {
            let mut participants = self.participants.lock();
            let Some(p) = participants.get_mut(&tile_id) else {
                return;
            };
            p.poor_connection = poor;
            p.clone()
        };
        if poor {
            self.report(None, tile_id, Some(&participant.attendee_id), participant.pause_state());
        }
    }

    pub fn frames_received(&self) -> usize {
        self.frames.load(Ordering::SeqCst)
    }

    pub fn pause_calls(&self) -> Vec<(bool, TileId)> {
        self.pause_calls.lock().clone()
    }

    fn report(&self, frame: Option<&VideoFrame>, tile_id: TileId, attendee: Option<&str>, pause: VideoPauseState) {
        let observer = self.observer.lock().clone();
        if let Some(observer) = observer {
            observer.on_remote_video_frame(frame, tile_id, attendee, pause.code());
        }
    }
}

impl VideoClientController for LoopbackEngine {
    fn local_attendee_id(&self) -> String {
        self.local_attendee_id.clone()
    }

    fn set_remote_paused(&self, paused: bool, tile_id: TileId) {
        debug!(tile_id, paused, "remote pause requested");
        self.pause_calls.lock().push((paused, tile_id));
        if let Some(p) = self.participants.lock().get_mut(&tile_id) {
            p.paused_by_user = paused;
        }
    }
}

impl VideoSink for LoopbackEngine {
    fn on_video_frame_received(&self, frame: &VideoFrame) {
        self.frames.fetch_add(1, Ordering::SeqCst);
        if self.echo_local {
            self.report(Some(frame), LOCAL_TILE_ID, None, VideoPauseState::Unpaused);
        }
        let participants: Vec<_> = self
            .participants
            .lock()
            .iter()
            .map(|(id, p)| (*id, p.clone()))
            .collect();
        for (tile_id, p) in participants {
            let pause = p.pause_state();
            let frame = if pause.is_paused() { None } else { Some(frame) };
            self.report(frame, tile_id, Some(&p.attendee_id), pause);
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Log(Mutex<Vec<(bool, TileId, Option<String>, i32)>>);

    impl RemoteVideoObserver for Log {
        fn on_remote_video_frame(
            &self,
            frame: Option<&VideoFrame>,
            tile_id: TileId,
            attendee_id: Option<&str>,
            pause_code: i32,
        ) {
            self.0
                .lock()
                .push((frame.is_some(), tile_id, attendee_id.map(str::to_string), pause_code));
        }
    }

    fn frame() -> VideoFrame {
        use crate::frame::{FrameBuffer, Matrix3, TextureHandle, TextureKind, VideoRotation};
        let texture = TextureHandle {
            id: 1,
            kind: TextureKind::Texture2d,
            transform: Matrix3::IDENTITY,
        };
        VideoFrame::new(0, FrameBuffer::texture(2, 2, texture, None), VideoRotation::Rotation0)
    }

    #[test]
    fn frames_fan_out_to_local_and_participants() {
        let engine = LoopbackEngine::new("me", true);
        let log = Arc::new(Log::default());
        engine.set_remote_observer(Some(log.clone()));
        let a = engine.add_participant("a");
        let b = engine.add_participant("b");
        assert_eq!((a, b), (1, 2));

        engine.set_remote_paused(true, b);
        engine.on_video_frame_received(&frame());
        assert_eq!(
            *log.0.lock(),
            vec![
                (true, 0, None, 0),
                (true, 1, Some("a".into()), 0),
                (false, 2, Some("b".into()), 1),
            ]
        );
        assert_eq!(engine.frames_received(), 1);
    }

    #[test]
    fn removal_reports_end_of_stream() {
        let engine = LoopbackEngine::new("me", false);
        let log = Arc::new(Log::default());
        engine.set_remote_observer(Some(log.clone()));
        let a = engine.add_participant("a");
        engine.remove_participant(a);
        assert_eq!(*log.0.lock(), vec![(false, 1, Some("a".into()), 0)]);
    }
}
