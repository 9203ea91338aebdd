//! Frames and the buffers behind them.

pub mod buffer;
pub mod matrix;

use serde::{Deserialize, Serialize};

pub use buffer::{
    BufferData, FrameBuffer, ReleaseCallback, Representation, RgbaPlane, TextureHandle,
    TextureKind, YuvPlanes,
};
pub use matrix::Matrix3;

// ── VideoRotation ────────────────────────────────────────────────

/// Clockwise rotation to apply before display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum VideoRotation {
    #[default]
    Rotation0,
    Rotation90,
    Rotation180,
    Rotation270,
}

impl VideoRotation {
    /// Snap any angle to the nearest lower quarter turn.
    pub fn from_degrees(degrees: i32) -> Self {
        match degrees.rem_euclid(360) / 90 {
            1 => Self::Rotation90,
            2 => Self::Rotation180,
            3 => Self::Rotation270,
            _ => Self::Rotation0,
        }
    }

    pub fn degrees(self) -> u32 {
        match self {
            Self::Rotation0 => 0,
            Self::Rotation90 => 90,
            Self::Rotation180 => 180,
            Self::Rotation270 => 270,
        }
    }

    /// Whether width and height swap on display.
    pub fn is_transposed(self) -> bool {
        matches!(self, Self::Rotation90 | Self::Rotation270)
    }
}

// ── VideoContentHint ─────────────────────────────────────────────

/// What a source's content looks like, for encoder tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum VideoContentHint {
    #[default]
    None,
    Motion,
    Detail,
    Text,
}

// ── VideoFrame ───────────────────────────────────────────────────

/// One captured or decoded picture.
///
/// Cloning a frame retains its buffer. A sink that keeps a frame past
/// the delivering call must clone it; dropping the clone releases it.
#[derive(Debug, Clone)]
pub struct VideoFrame {
    /// Monotonic capture time in nanoseconds.
    pub timestamp_ns: i64,
    pub buffer: FrameBuffer,
    pub rotation: VideoRotation,
}

impl VideoFrame {
    pub fn new(timestamp_ns: i64, buffer: FrameBuffer, rotation: VideoRotation) -> Self {
        Self {
            timestamp_ns,
            buffer,
            rotation,
        }
    }

    pub fn width(&self) -> u32 {
        self.buffer.width()
    }

    pub fn height(&self) -> u32 {
        self.buffer.height()
    }

    pub fn rotated_width(&self) -> u32 {
        if self.rotation.is_transposed() {
            self.buffer.height()
        } else {
            self.buffer.width()
        }
    }

    pub fn rotated_height(&self) -> u32 {
        if self.rotation.is_transposed() {
            self.buffer.width()
        } else {
            self.buffer.height()
        }
    }

    /// Retain the buffer into a second frame handle.
    pub fn retain(&self) -> VideoFrame {
        self.clone()
    }

    pub fn release(self) {
        drop(self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(rotation: VideoRotation) -> VideoFrame {
        let texture = TextureHandle {
            id: 1,
            kind: TextureKind::Texture2d,
            transform: Matrix3::IDENTITY,
        };
        VideoFrame::new(0, FrameBuffer::texture(640, 480, texture, None), rotation)
    }

    #[test]
    fn rotated_dimensions_swap_on_quarter_turns() {
        let f = frame(VideoRotation::Rotation90);
        assert_eq!((f.rotated_width(), f.rotated_height()), (480, 640));
        let f = frame(VideoRotation::Rotation180);
        assert_eq!((f.rotated_width(), f.rotated_height()), (640, 480));
    }

    #[test]
    fn rotation_from_degrees_wraps() {
        assert_eq!(VideoRotation::from_degrees(450), VideoRotation::Rotation90);
        assert_eq!(VideoRotation::from_degrees(-90), VideoRotation::Rotation270);
        assert_eq!(VideoRotation::from_degrees(0).degrees(), 0);
    }

    #[test]
    fn frame_clone_shares_buffer() {
        let f = frame(VideoRotation::Rotation0);
        let g = f.retain();
        assert_eq!(f.buffer.ref_count(), 2);
        g.release();
        assert_eq!(f.buffer.ref_count(), 1);
    }
}
