//! The graphics backend a renderer draws through.

use std::sync::Arc;

use crate::capture::platform::NativeSurface;
use crate::error::MediaError;
use crate::frame::TextureKind;

/// Shader used for a draw call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderProgram {
    /// One external (OES) sampler.
    ExternalOes,
    /// One 2D RGB(A) sampler.
    Rgb,
    /// Three luminance samplers combined as I420.
    Yuv,
}

impl ShaderProgram {
    pub fn for_texture(kind: TextureKind) -> Self {
        match kind {
            TextureKind::ExternalOes => Self::ExternalOes,
            TextureKind::Texture2d => Self::Rgb,
        }
    }
}

/// Pixel layout of an uploaded plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlaneFormat {
    Luminance,
    Rgba,
}

impl PlaneFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            Self::Luminance => 1,
            Self::Rgba => 4,
        }
    }
}

/// Output rectangle in surface pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Viewport {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    /// A `width x height` rectangle centered in the surface.
    pub fn centered(width: u32, height: u32, surface_width: u32, surface_height: u32) -> Self {
        Self {
            x: (surface_width as i32 - width as i32) / 2,
            y: (surface_height as i32 - height as i32) / 2,
            width,
            height,
        }
    }
}

/// A graphics context with at most one window surface.
///
/// Used only from the owning renderer's worker thread.
pub trait GraphicsContext {
    fn create_window_surface(&mut self, target: NativeSurface) -> Result<(), MediaError>;

    fn destroy_window_surface(&mut self);

    fn has_window_surface(&self) -> bool;

    /// Current size of the window surface; zero without one.
    fn surface_size(&self) -> (u32, u32);

    /// Upload tightly packed pixels, reusing `texture` when given.
    /// Returns the texture id.
    fn upload_plane(
        &mut self,
        texture: Option<u32>,
        format: PlaneFormat,
        width: u32,
        height: u32,
        pixels: &[u8],
    ) -> Result<u32, MediaError>;

    fn delete_textures(&mut self, textures: &[u32]);

    /// Draw `textures` with a column-major texture matrix.
    fn draw(
        &mut self,
        program: ShaderProgram,
        textures: &[u32],
        tex_matrix: &[f32; 16],
        viewport: Viewport,
    ) -> Result<(), MediaError>;

    fn swap_buffers(&mut self) -> Result<(), MediaError>;

    fn release(&mut self);
}

/// Creates contexts, on the thread that will use them.
pub trait GraphicsFactory: Send + Sync {
    fn create_context(&self) -> Result<Box<dyn GraphicsContext>, MediaError>;
}

pub type SharedGraphicsFactory = Arc<dyn GraphicsFactory>;
