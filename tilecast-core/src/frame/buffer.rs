//! Reference-counted pixel storage.
//!
//! A [`FrameBuffer`] is an immutable descriptor over pixel data in one of
//! three representations. Each clone is one reference; the optional release
//! callback runs exactly once, when the last reference is dropped.
//!
//! ```text
//!   producer                    sink A            sink B
//!   ────────                    ──────            ──────
//!   FrameBuffer::texture(cb) ─► retain() ───────► retain()
//!   release()                   release()         release()  ─► cb()
//! ```
//!
//! Release callbacks may run on any thread, so they must only post back
//! to whatever owns the underlying resource.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;

use crate::error::MediaError;
use crate::frame::matrix::Matrix3;

/// Callback run when the final reference to a buffer goes away.
pub type ReleaseCallback = Box<dyn FnOnce() + Send + 'static>;

/// Representation tag of a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Representation {
    PlanarYuv,
    InterleavedRgba,
    GpuTexture,
}

/// Three I420 planes. Chroma planes are half size, rounded up.
#[derive(Debug, Clone)]
pub struct YuvPlanes {
    pub y: Bytes,
    pub u: Bytes,
    pub v: Bytes,
    pub stride_y: u32,
    pub stride_u: u32,
    pub stride_v: u32,
}

/// One interleaved 4-byte-per-pixel plane.
#[derive(Debug, Clone)]
pub struct RgbaPlane {
    pub data: Bytes,
    pub stride: u32,
}

/// Sampler type a texture must be bound with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureKind {
    /// Externally produced image stream (camera, virtual display).
    ExternalOes,
    Texture2d,
}

/// A GPU texture owned by a graphics context elsewhere.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TextureHandle {
    pub id: u32,
    pub kind: TextureKind,
    /// Maps output texture coordinates to sampling coordinates.
    pub transform: Matrix3,
}

#[derive(Debug, Clone)]
pub enum BufferData {
    PlanarYuv(YuvPlanes),
    InterleavedRgba(RgbaPlane),
    Texture(TextureHandle),
}

struct Shared {
    width: u32,
    height: u32,
    data: BufferData,
    on_release: Mutex<Option<ReleaseCallback>>,
}

impl Drop for Shared {
    fn drop(&mut self) {
        if let Some(callback) = self.on_release.get_mut().take() {
            callback();
        }
    }
}

// ── FrameBuffer ──────────────────────────────────────────────────

/// Shared handle to immutable pixel data.
///
/// `Clone` and [`retain`](Self::retain) add a reference; dropping and
/// [`release`](Self::release) remove one. Ownership makes double release
/// and use after release unrepresentable.
#[derive(Clone)]
pub struct FrameBuffer {
    shared: Arc<Shared>,
}

impl FrameBuffer {
    /// Wrap three I420 planes.
    pub fn planar_yuv(
        width: u32,
        height: u32,
        planes: YuvPlanes,
        on_release: Option<ReleaseCallback>,
    ) -> Result<Self, MediaError> {
        check_dimensions(width, height)?;
        let (chroma_w, chroma_h) = ((width + 1) / 2, (height + 1) / 2);
        check_plane("y", &planes.y, planes.stride_y, width, height)?;
        check_plane("u", &planes.u, planes.stride_u, chroma_w, chroma_h)?;
        check_plane("v", &planes.v, planes.stride_v, chroma_w, chroma_h)?;
        Ok(Self::new(width, height, BufferData::PlanarYuv(planes), on_release))
    }

    /// Wrap one RGBA plane.
    pub fn rgba(
        width: u32,
        height: u32,
        plane: RgbaPlane,
        on_release: Option<ReleaseCallback>,
    ) -> Result<Self, MediaError> {
        check_dimensions(width, height)?;
        let row = width
            .checked_mul(4)
            .ok_or(MediaError::InvalidDimensions { width, height })?;
        check_plane("rgba", &plane.data, plane.stride, row, height)?;
        Ok(Self::new(width, height, BufferData::InterleavedRgba(plane), on_release))
    }

    /// Wrap a texture. `on_release` typically hands the texture back to
    /// its producer.
    pub fn texture(
        width: u32,
        height: u32,
        texture: TextureHandle,
        on_release: Option<ReleaseCallback>,
    ) -> Self {
        Self::new(width, height, BufferData::Texture(texture), on_release)
    }

    fn new(width: u32, height: u32, data: BufferData, on_release: Option<ReleaseCallback>) -> Self {
        Self {
            shared: Arc::new(Shared {
                width,
                height,
                data,
                on_release: Mutex::new(on_release),
            }),
        }
    }

    pub fn width(&self) -> u32 {
        self.shared.width
    }

    pub fn height(&self) -> u32 {
        self.shared.height
    }

    pub fn data(&self) -> &BufferData {
        &self.shared.data
    }

    pub fn representation(&self) -> Representation {
        match self.shared.data {
            BufferData::PlanarYuv(_) => Representation::PlanarYuv,
            BufferData::InterleavedRgba(_) => Representation::InterleavedRgba,
            BufferData::Texture(_) => Representation::GpuTexture,
        }
    }

    pub fn as_texture(&self) -> Option<&TextureHandle> {
        match &self.shared.data {
            BufferData::Texture(texture) => Some(texture),
            _ => None,
        }
    }

    /// Take another reference, for storing the buffer past the call that
    /// delivered it.
    pub fn retain(&self) -> FrameBuffer {
        self.clone()
    }

    /// Give up this reference. The last one runs the release callback.
    pub fn release(self) {
        drop(self);
    }

    /// Number of live references.
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.shared)
    }

    /// A texture buffer sampling through `transform * extra`.
    ///
    /// The derived buffer keeps this one alive until its own final
    /// release. Non-texture buffers have no transform and are retained
    /// as they are.
    pub fn with_transform(&self, extra: &Matrix3) -> FrameBuffer {
        let Some(texture) = self.as_texture() else {
            return self.retain();
        };
        let mut transformed = *texture;
        transformed.transform.pre_concat(extra);
        let parent = self.retain();
        FrameBuffer::texture(
            self.width(),
            self.height(),
            transformed,
            Some(Box::new(move || parent.release())),
        )
    }
}

impl fmt::Debug for FrameBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameBuffer")
            .field("width", &self.shared.width)
            .field("height", &self.shared.height)
            .field("representation", &self.representation())
            .field("refs", &self.ref_count())
            .finish()
    }
}

// ── Validation ───────────────────────────────────────────────────

fn check_dimensions(width: u32, height: u32) -> Result<(), MediaError> {
    if width == 0 || height == 0 {
        return Err(MediaError::InvalidDimensions { width, height });
    }
    Ok(())
}

fn check_plane(
    plane: &'static str,
    data: &Bytes,
    stride: u32,
    row: u32,
    rows: u32,
) -> Result<(), MediaError> {
    if stride < row {
        return Err(MediaError::InvalidStride { plane, stride, row });
    }
    // The last row only needs its visible bytes.
    let needed = stride as usize * (rows as usize - 1) + row as usize;
    if data.len() < needed {
        return Err(MediaError::InvalidPlane {
            plane,
            needed,
            actual: data.len(),
        });
    }
    Ok(())
}

// ── Tests ────────────────────────────────────────────────────────
