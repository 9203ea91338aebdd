//! A graphics backend that records calls instead of drawing.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::capture::platform::NativeSurface;
use crate::error::MediaError;
use crate::render::graphics::{
    GraphicsContext, GraphicsFactory, PlaneFormat, ShaderProgram, Viewport,
};

#[derive(Debug, Clone, PartialEq)]
pub struct UploadCall {
    pub texture: u32,
    pub format: PlaneFormat,
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DrawCall {
    pub program: ShaderProgram,
    pub textures: Vec<u32>,
    pub tex_matrix: [f32; 16],
    pub viewport: Viewport,
}

/// Everything the contexts of one factory were asked to do.
#[derive(Debug, Default)]
pub struct GraphicsLog {
    pub uploads: Vec<UploadCall>,
    pub draws: Vec<DrawCall>,
    pub swaps: usize,
    pub surfaces_created: usize,
    pub surfaces_destroyed: usize,
    pub contexts_released: usize,
}

pub type SharedGraphicsLog = Arc<Mutex<GraphicsLog>>;

pub struct HeadlessGraphics {
    surface: Option<NativeSurface>,
    surface_size: (u32, u32),
    next_texture: u32,
    live: HashSet<u32>,
    log: SharedGraphicsLog,
}

impl HeadlessGraphics {
    /// A context whose window surfaces are `surface_size`, with its log.
    pub fn with_log(surface_size: (u32, u32)) -> (Self, SharedGraphicsLog) {
        let log = SharedGraphicsLog::default();
        (Self::new(surface_size, Arc::clone(&log)), log)
    }

    fn new(surface_size: (u32, u32), log: SharedGraphicsLog) -> Self {
        Self {
            surface: None,
            surface_size,
            next_texture: 1,
            live: HashSet::new(),
            log,
        }
    }

    pub fn live_textures(&self) -> usize {
        self.live.len()
    }
}

impl GraphicsContext for HeadlessGraphics {
    fn create_window_surface(&mut self, target: NativeSurface) -> Result<(), MediaError> {
        if self.surface.is_some() {
            return Err(MediaError::Graphics("window surface already exists".into()));
        }
        self.surface = Some(target);
        self.log.lock().surfaces_created += 1;
        Ok(())
    }

    fn destroy_window_surface(&mut self) {
        if self.surface.take().is_some() {
            self.log.lock().surfaces_destroyed += 1;
        }
    }

    fn has_window_surface(&self) -> bool {
        self.surface.is_some()
    }

    fn surface_size(&self) -> (u32, u32) {
        if self.surface.is_some() { self.surface_size } else { (0, 0) }
    }

    fn upload_plane(
        &mut self,
        texture: Option<u32>,
        format: PlaneFormat,
        width: u32,
        height: u32,
        pixels: &[u8],
    ) -> Result<u32, MediaError> {
        let needed = width as usize * height as usize * format.bytes_per_pixel();
        if pixels.len() < needed {
            return Err(MediaError::Graphics(format!(
                "upload of {width}x{height} needs {needed} bytes, got {}",
                pixels.len()
            )));
        }
        let texture = match texture {
            Some(id) if self.live.contains(&id) => id,
            _ => {
                let id = self.next_texture;
                self.next_texture += 1;
                self.live.insert(id);
                id
            }
        };
        self.log.lock().uploads.push(UploadCall {
            texture,
            format,
            width,
            height,
            pixels: pixels[..needed].to_vec(),
        });
        Ok(texture)
    }

    fn delete_textures(&mut self, textures: &[u32]) {
        for id in textures {
            self.live.remove(id);
        }
    }

    fn draw(
        &mut self,
        program: ShaderProgram,
        textures: &[u32],
        tex_matrix: &[f32; 16],
        viewport: Viewport,
    ) -> Result<(), MediaError> {
        self.log.lock().draws.push(DrawCall {
            program,
            textures: textures.to_vec(),
            tex_matrix: *tex_matrix,
            viewport,
        });
        Ok(())
    }

    fn swap_buffers(&mut self) -> Result<(), MediaError> {
        if self.surface.is_none() {
            return Err(MediaError::Graphics("swap without a window surface".into()));
        }
        self.log.lock().swaps += 1;
        Ok(())
    }

    fn release(&mut self) {
        self.destroy_window_surface();
        self.live.clear();
        self.log.lock().contexts_released += 1;
    }
}

/// Hands out [`HeadlessGraphics`] contexts sharing one log.
pub struct HeadlessGraphicsFactory {
    surface_size: (u32, u32),
    log: SharedGraphicsLog,
}

impl HeadlessGraphicsFactory {
    pub fn new(surface_width: u32, surface_height: u32) -> Arc<Self> {
        Arc::new(Self {
            surface_size: (surface_width, surface_height),
            log: SharedGraphicsLog::default(),
        })
    }

    pub fn log(&self) -> SharedGraphicsLog {
        Arc::clone(&self.log)
    }

    pub fn draw_count(&self) -> usize {
        self.log.lock().draws.len()
    }
}

impl GraphicsFactory for HeadlessGraphicsFactory {
    fn create_context(&self) -> Result<Box<dyn GraphicsContext>, MediaError> {
        Ok(Box::new(HeadlessGraphics::new(self.surface_size, Arc::clone(&self.log))))
    }
}
