//! Seams to the native transport engine.
//!
//! ```text
//!   capture source ──► VideoSourceAdapter ──► engine sinks      (outgoing)
//!   engine ──► RemoteVideoObserver (TileController)             (incoming)
//!   TileController ──► VideoClientController                     (control)
//! ```

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::debug;

use crate::frame::{VideoContentHint, VideoFrame};
use crate::sink::{SinkSet, VideoSink, VideoSource, deliver};
use crate::tile::TileId;

/// Calls the tile controller makes into the engine.
pub trait VideoClientController: Send + Sync {
    /// Attendee id of this client, for tiles the engine reports without one.
    fn local_attendee_id(&self) -> String;

    /// Stop or restart receiving the stream of `tile_id`.
    fn set_remote_paused(&self, paused: bool, tile_id: TileId);
}

/// Incoming video from the engine: a frame, or `None` for a pause or end
/// of stream, with the engine's pause code.
pub trait RemoteVideoObserver: Send + Sync {
    fn on_remote_video_frame(
        &self,
        frame: Option<&VideoFrame>,
        tile_id: TileId,
        attendee_id: Option<&str>,
        pause_code: i32,
    );
}

// ── VideoSourceAdapter ───────────────────────────────────────────

/// Presents whichever source is current to the engine as one stable
/// source.
///
/// The adapter registers itself as a sink of the current source, so the
/// source keeps it alive until [`set_source`](Self::set_source) replaces or
/// clears it.
pub struct VideoSourceAdapter {
    this: Weak<VideoSourceAdapter>,
    source: Mutex<Option<Arc<dyn VideoSource>>>,
    sinks: SinkSet,
}

impl VideoSourceAdapter {
    pub fn new() -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            this: this.clone(),
            source: Mutex::new(None),
            sinks: SinkSet::new(),
        })
    }

    /// Detach from the current source, if any, and attach to `source`.
    pub fn set_source(&self, source: Option<Arc<dyn VideoSource>>) {
        let Some(me) = self.this.upgrade() else {
            return;
        };
        let me: Arc<dyn VideoSink> = me;
        let previous = std::mem::replace(&mut *self.source.lock(), source.clone());
        if let Some(previous) = previous {
            previous.remove_video_sink(&me);
        }
        if let Some(source) = source {
            debug!(hint = ?source.content_hint(), "adapter attached to source");
            source.add_video_sink(me);
        }
    }

    pub fn source(&self) -> Option<Arc<dyn VideoSource>> {
        self.source.lock().clone()
    }

    pub fn sink_count(&self) -> usize {
        self.sinks.len()
    }
}

impl VideoSource for VideoSourceAdapter {
    fn add_video_sink(&self, sink: Arc<dyn VideoSink>) {
        self.sinks.add(sink);
    }

    fn remove_video_sink(&self, sink: &Arc<dyn VideoSink>) {
        self.sinks.remove(sink);
    }

    fn content_hint(&self) -> VideoContentHint {
        self.source
            .lock()
            .as_ref()
            .map_or(VideoContentHint::None, |s| s.content_hint())
    }
}

impl VideoSink for VideoSourceAdapter {
    fn on_video_frame_received(&self, frame: &VideoFrame) {
        deliver(&self.sinks, frame);
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{FrameBuffer, Matrix3, TextureHandle, TextureKind, VideoRotation};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct PushSource {
        hint: VideoContentHint,
        sinks: SinkSet,
    }

    impl PushSource {
        fn new(hint: VideoContentHint) -> Arc<Self> {
            Arc::new(Self {
                hint,
                sinks: SinkSet::new(),
            })
        }

        fn push(&self) {
            let texture = TextureHandle {
                id: 1,
                kind: TextureKind::ExternalOes,
                transform: Matrix3::IDENTITY,
            };
            let frame = VideoFrame::new(0, FrameBuffer::texture(2, 2, texture, None), VideoRotation::Rotation0);
            deliver(&self.sinks, &frame);
        }
    }

    impl VideoSource for PushSource {
        fn add_video_sink(&self, sink: Arc<dyn VideoSink>) {
            self.sinks.add(sink);
        }
        fn remove_video_sink(&self, sink: &Arc<dyn VideoSink>) {
            self.sinks.remove(sink);
        }
        fn content_hint(&self) -> VideoContentHint {
            self.hint
        }
    }

    #[derive(Default)]
    struct Counter(AtomicUsize);

    impl VideoSink for Counter {
        fn on_video_frame_received(&self, _frame: &VideoFrame) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn forwards_frames_of_current_source_only() {
        let adapter = VideoSourceAdapter::new();
        let engine = Arc::new(Counter::default());
        adapter.add_video_sink(engine.clone());

        let camera = PushSource::new(VideoContentHint::Motion);
        let screen = PushSource::new(VideoContentHint::Text);
        adapter.set_source(Some(camera.clone()));
        camera.push();
        assert_eq!(adapter.content_hint(), VideoContentHint::Motion);

        adapter.set_source(Some(screen.clone()));
        camera.push();
        screen.push();
        assert_eq!(engine.0.load(Ordering::SeqCst), 2);
        assert!(camera.sinks.is_empty());
        assert_eq!(adapter.content_hint(), VideoContentHint::Text);

        adapter.set_source(None);
        assert!(screen.sinks.is_empty());
        assert_eq!(adapter.content_hint(), VideoContentHint::None);
    }
}
