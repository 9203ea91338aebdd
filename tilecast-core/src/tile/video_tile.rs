use std::sync::Arc;

use crate::tile::{VideoPauseState, VideoRenderView, VideoTileState};

/// A tile's state plus the view it renders into, if any.
pub struct VideoTile {
    state: VideoTileState,
    view: Option<Arc<dyn VideoRenderView>>,
}

impl VideoTile {
    pub fn new(state: VideoTileState) -> Self {
        Self { state, view: None }
    }

    pub fn state(&self) -> &VideoTileState {
        &self.state
    }

    pub fn view(&self) -> Option<&Arc<dyn VideoRenderView>> {
        self.view.as_ref()
    }

    pub(crate) fn bind(&mut self, view: Arc<dyn VideoRenderView>) -> Option<Arc<dyn VideoRenderView>> {
        self.view.replace(view)
    }

    pub(crate) fn unbind(&mut self) -> Option<Arc<dyn VideoRenderView>> {
        self.view.take()
    }

    pub(crate) fn set_pause_state(&mut self, pause_state: VideoPauseState) {
        self.state.pause_state = pause_state;
    }

    /// Returns `true` if the size changed.
    pub(crate) fn update_size(&mut self, width: u32, height: u32) -> bool {
        let state = &mut self.state;
        if (state.video_stream_content_width, state.video_stream_content_height) == (width, height) {
            return false;
        }
        state.video_stream_content_width = width;
        state.video_stream_content_height = height;
        true
    }
}

impl std::fmt::Debug for VideoTile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VideoTile")
            .field("state", &self.state)
            .field("bound", &self.view.is_some())
            .finish()
    }
}
