//! Draws one frame through a [`GraphicsContext`].
//!
//! ```text
//!   render = T(.5,.5) · [flip Y for I420] · R(rotation) · T(-.5,-.5) · layout
//!
//!   texture buffer  ─► buffer.transform · render   ─► OES / RGB program
//!   RGBA buffer     ─► upload 1 plane, render      ─► RGB program
//!   I420 buffer     ─► upload 3 planes, render     ─► YUV program
//! ```

use tracing::trace;

use crate::error::MediaError;
use crate::frame::{BufferData, Matrix3, VideoFrame};
use crate::render::graphics::{GraphicsContext, PlaneFormat, ShaderProgram, Viewport};

/// Per-context drawing resources; textures are reused across frames.
#[derive(Debug, Default)]
pub struct FrameDrawer {
    yuv_textures: Option<[u32; 3]>,
    rgba_texture: Option<u32>,
    packed: Vec<u8>,
}

impl FrameDrawer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Draw `frame` into `viewport`. Returns `false` if the transformed
    /// frame has no area and nothing was drawn.
    pub fn draw_frame(
        &mut self,
        ctx: &mut dyn GraphicsContext,
        frame: &VideoFrame,
        layout: &Matrix3,
        viewport: Viewport,
    ) -> Result<bool, MediaError> {
        let (render_w, render_h) =
            transformed_render_size(frame.rotated_width(), frame.rotated_height(), layout);
        if render_w == 0 || render_h == 0 {
            trace!("frame transforms to nothing; skipped");
            return Ok(false);
        }
        let render = render_matrix(frame, layout);
        let (width, height) = (frame.width(), frame.height());

        match frame.buffer.data() {
            BufferData::Texture(texture) => {
                let mut full = texture.transform;
                full.pre_concat(&render);
                ctx.draw(
                    ShaderProgram::for_texture(texture.kind),
                    &[texture.id],
                    &full.to_gl(),
                    viewport,
                )?;
            }
            BufferData::InterleavedRgba(plane) => {
                let row = width as usize * 4;
                let pixels = pack_plane(&plane.data, plane.stride as usize, row, height as usize, &mut self.packed);
                let id = ctx.upload_plane(self.rgba_texture, PlaneFormat::Rgba, width, height, pixels)?;
                self.rgba_texture = Some(id);
                ctx.draw(ShaderProgram::Rgb, &[id], &render.to_gl(), viewport)?;
            }
            BufferData::PlanarYuv(planes) => {
                let (chroma_w, chroma_h) = ((width + 1) / 2, (height + 1) / 2);
                let existing = self.yuv_textures;
                let mut ids = [0u32; 3];
                let sources = [
                    (&planes.y, planes.stride_y, width, height),
                    (&planes.u, planes.stride_u, chroma_w, chroma_h),
                    (&planes.v, planes.stride_v, chroma_w, chroma_h),
                ];
                for (i, (data, stride, plane_w, plane_h)) in sources.into_iter().enumerate() {
                    let pixels = pack_plane(
                        data,
                        stride as usize,
                        plane_w as usize,
                        plane_h as usize,
                        &mut self.packed,
                    );
                    ids[i] = ctx.upload_plane(
                        existing.map(|t| t[i]),
                        PlaneFormat::Luminance,
                        plane_w,
                        plane_h,
                        pixels,
                    )?;
                }
                self.yuv_textures = Some(ids);
                ctx.draw(ShaderProgram::Yuv, &ids, &render.to_gl(), viewport)?;
            }
        }
        Ok(true)
    }

    /// Delete uploaded textures. Call before the context goes away.
    pub fn release(&mut self, ctx: &mut dyn GraphicsContext) {
        if let Some(ids) = self.yuv_textures.take() {
            ctx.delete_textures(&ids);
        }
        if let Some(id) = self.rgba_texture.take() {
            ctx.delete_textures(&[id]);
        }
        self.packed = Vec::new();
    }
}

/// Rotation, I420 flip and `layout` composed around the texture center.
pub fn render_matrix(frame: &VideoFrame, layout: &Matrix3) -> Matrix3 {
    let mut m = Matrix3::IDENTITY;
    m.pre_translate(0.5, 0.5);
    if matches!(frame.buffer.data(), BufferData::PlanarYuv(_)) {
        // I420 rows are stored top-down, texture space is bottom-up.
        m.pre_scale(1.0, -1.0);
    }
    m.pre_rotate(frame.rotation.degrees() as f32)
        .pre_translate(-0.5, -0.5)
        .pre_concat(layout);
    m
}

/// Pixel size of a `width x height` frame after `m` maps its unit square.
pub fn transformed_render_size(width: u32, height: u32, m: &Matrix3) -> (u32, u32) {
    let (x0, y0) = m.map_point(0.0, 0.0);
    let (x1, y1) = m.map_point(1.0, 0.0);
    let (x2, y2) = m.map_point(0.0, 1.0);
    let (w, h) = (width as f32, height as f32);
    let side = |ax: f32, ay: f32, bx: f32, by: f32| ((bx - ax) * w).hypot((by - ay) * h).round() as u32;
    (side(x0, y0, x1, y1), side(x0, y0, x2, y2))
}

/// Rows of `row_bytes` out of a strided plane, packed contiguously.
///
/// Returns `src` itself when there is no padding to strip.
pub fn pack_plane<'a>(
    src: &'a [u8],
    stride: usize,
    row_bytes: usize,
    rows: usize,
    scratch: &'a mut Vec<u8>,
) -> &'a [u8] {
    if stride == row_bytes {
        return &src[..row_bytes * rows];
    }
    scratch.clear();
    for row in src.chunks(stride).take(rows) {
        scratch.extend_from_slice(&row[..row_bytes]);
    }
    scratch
}

// ── Tests ────────────────────────────────────────────────────────
