//! Frame consumers and producers.

use std::sync::Arc;

use crate::frame::{VideoContentHint, VideoFrame};
use crate::registry::Registry;

/// Receives frames. Called on the producer's thread; implementations
/// must return quickly and clone the frame to keep it.
pub trait VideoSink: Send + Sync {
    fn on_video_frame_received(&self, frame: &VideoFrame);
}

/// Produces frames for any number of sinks.
pub trait VideoSource: Send + Sync {
    fn add_video_sink(&self, sink: Arc<dyn VideoSink>);
    fn remove_video_sink(&self, sink: &Arc<dyn VideoSink>);
    fn content_hint(&self) -> VideoContentHint;
}

pub type SinkSet = Registry<dyn VideoSink>;

/// Deliver `frame` to every sink registered right now.
pub fn deliver(sinks: &SinkSet, frame: &VideoFrame) {
    for sink in sinks.snapshot() {
        sink.on_video_frame_received(frame);
    }
}
