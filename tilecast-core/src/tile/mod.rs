//! Per-participant video tiles.
//!
//! The engine reports every remote (and the local) stream as a series of
//! `(frame?, tile id, attendee?, pause state)` events. The controller turns
//! them into tile lifecycle notifications and routes frames to the view
//! bound to each tile.

pub mod controller;
pub mod video_tile;

use serde::{Deserialize, Serialize};

use crate::sink::VideoSink;

pub use controller::TileController;
pub use video_tile::VideoTile;

/// Engine-assigned stream id; unique among live tiles.
pub type TileId = u32;

/// Attendee ids of screen-share streams carry this suffix.
pub const CONTENT_SHARE_SUFFIX: &str = "#content";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum VideoPauseState {
    #[default]
    Unpaused,
    /// Paused on request of the local user; only the user resumes it.
    PausedByUser,
    /// Paused by the engine to save downlink bandwidth; resumes by itself.
    PausedForPoorConnection,
}

impl VideoPauseState {
    /// Decode the engine's pause code. Unknown codes mean unpaused.
    pub fn from_code(code: i32) -> Self {
        match code {
            1 => Self::PausedByUser,
            2 => Self::PausedForPoorConnection,
            _ => Self::Unpaused,
        }
    }

    pub fn code(self) -> i32 {
        match self {
            Self::Unpaused => 0,
            Self::PausedByUser => 1,
            Self::PausedForPoorConnection => 2,
        }
    }

    pub fn is_paused(self) -> bool {
        self != Self::Unpaused
    }
}

/// What the application sees of a tile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoTileState {
    pub tile_id: TileId,
    pub attendee_id: String,
    pub video_stream_content_width: u32,
    pub video_stream_content_height: u32,
    pub pause_state: VideoPauseState,
    /// The engine delivered no attendee id: this is our own video.
    pub is_local_tile: bool,
    /// Screen share rather than camera.
    pub is_content: bool,
}

impl VideoTileState {
    pub fn new(tile_id: TileId, attendee_id: String, is_local_tile: bool) -> Self {
        let is_content = attendee_id.ends_with(CONTENT_SHARE_SUFFIX);
        Self {
            tile_id,
            attendee_id,
            video_stream_content_width: 0,
            video_stream_content_height: 0,
            pause_state: VideoPauseState::Unpaused,
            is_local_tile,
            is_content,
        }
    }
}

/// Tile lifecycle callbacks, delivered on the shared delivery queue.
///
/// For each tile, `added` comes before any other callback and `removed`
/// comes last.
pub trait VideoTileObserver: Send + Sync {
    fn on_video_tile_added(&self, _state: &VideoTileState) {}
    fn on_video_tile_removed(&self, _state: &VideoTileState) {}
    fn on_video_tile_paused(&self, _state: &VideoTileState) {}
    fn on_video_tile_resumed(&self, _state: &VideoTileState) {}
    fn on_video_tile_size_changed(&self, _state: &VideoTileState) {}
}

/// A sink that can be bound to one tile at a time.
pub trait VideoRenderView: VideoSink {
    fn on_bound(&self, _tile_id: TileId) {}

    /// The tile is gone or another view took it. Drop held frames.
    fn on_unbound(&self) {}
}

// ── Tests ────────────────────────────────────────────────────────
