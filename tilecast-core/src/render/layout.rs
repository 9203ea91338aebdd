//! Where and how large a frame is drawn.
//!
//! ```text
//!   surface ┌──────────────────────┐
//!           │  ┌────────────────┐  │  display size: largest size inside the
//!           │  │    viewport    │  │  surface that still shows the minimum
//!           │  └────────────────┘  │  visible fraction of the frame
//!           └──────────────────────┘
//! ```
//!
//! The layout matrix then crops the frame to the viewport's aspect ratio.

use serde::{Deserialize, Serialize};

use crate::frame::Matrix3;

/// How a frame fills its surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum VideoScalingType {
    /// Whole frame visible, letterboxed.
    #[default]
    AspectFit,
    /// Surface fully covered, frame cropped.
    AspectFill,
    /// In between: at least 9/16 of the frame stays visible.
    AspectBalanced,
}

impl VideoScalingType {
    pub fn min_visible_fraction(self) -> f32 {
        match self {
            Self::AspectFit => 1.0,
            Self::AspectFill => 0.0,
            Self::AspectBalanced => 0.5625,
        }
    }
}

/// Largest size within `max_width x max_height` showing at least
/// `min_visible_fraction` of a frame with `aspect` (width / height).
pub fn display_size(min_visible_fraction: f32, aspect: f32, max_width: u32, max_height: u32) -> (u32, u32) {
    if min_visible_fraction == 0.0 || aspect == 0.0 {
        return (max_width, max_height);
    }
    let width = (max_height as f32 / min_visible_fraction * aspect).round() as u32;
    let height = (max_width as f32 / min_visible_fraction / aspect).round() as u32;
    (width.min(max_width), height.min(max_height))
}

/// Texture matrix cropping a frame of `frame_aspect` to `drawn_aspect`,
/// optionally mirrored, around the texture center.
pub fn layout_matrix(frame_aspect: f32, drawn_aspect: f32, mirror: bool) -> Matrix3 {
    let (scale_x, scale_y) = if frame_aspect > drawn_aspect {
        (drawn_aspect / frame_aspect, 1.0)
    } else {
        (1.0, frame_aspect / drawn_aspect)
    };
    let mut m = Matrix3::IDENTITY;
    m.pre_translate(0.5, 0.5);
    if mirror {
        m.pre_scale(-1.0, 1.0);
    }
    m.pre_scale(scale_x, scale_y).pre_translate(-0.5, -0.5);
    m
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fit_letterboxes_wide_frames() {
        // 2:1 frame in a square surface.
        assert_eq!(display_size(1.0, 2.0, 1000, 1000), (1000, 500));
    }

    #[test]
    fn fill_takes_the_whole_surface() {
        assert_eq!(display_size(0.0, 2.0, 1000, 1000), (1000, 1000));
    }

    #[test]
    fn balanced_sits_between_fit_and_fill() {
        let (w, h) = display_size(0.5625, 2.0, 1000, 1000);
        assert_eq!(w, 1000);
        assert!(h > 500 && h < 1000);
    }

    #[test]
    fn equal_aspects_need_no_crop() {
        assert!(layout_matrix(1.5, 1.5, false).is_identity());
    }

    #[test]
    fn wider_frame_is_cropped_horizontally() {
        let m = layout_matrix(2.0, 1.0, false);
        let (x0, _) = m.map_point(0.0, 0.5);
        let (x1, _) = m.map_point(1.0, 0.5);
        assert!((x0 - 0.25).abs() < 1e-6 && (x1 - 0.75).abs() < 1e-6);
    }

    #[test]
    fn mirror_flips_horizontally() {
        let m = layout_matrix(1.0, 1.0, true);
        assert_eq!(m.map_point(0.0, 0.0), (1.0, 0.0));
    }
}
