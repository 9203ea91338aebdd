//! On-screen rendering of video frames.
//!
//! | Module     | Role                                              |
//! |------------|---------------------------------------------------|
//! | `graphics` | Backend contract: context, surface, upload, draw  |
//! | `layout`   | Scaling types, display size, crop/mirror matrix   |
//! | `drawer`   | Render matrix and per-representation draw paths   |
//! | `renderer` | Worker-owned context with a single pending frame  |

pub mod drawer;
pub mod graphics;
pub mod layout;
pub mod renderer;

pub use drawer::FrameDrawer;
pub use graphics::{
    GraphicsContext, GraphicsFactory, PlaneFormat, ShaderProgram, SharedGraphicsFactory, Viewport,
};
pub use layout::{VideoScalingType, display_size, layout_matrix};
pub use renderer::Renderer;
