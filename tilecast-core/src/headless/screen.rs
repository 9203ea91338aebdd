//! A display that can be rotated and projected by hand.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::capture::platform::{
    DisplayMetrics, DisplayProvider, NativeSurface, Projection, ScreenProjector, VirtualDisplay,
    VirtualDisplayListener,
};
use crate::error::{CaptureSourceError, MediaError};
use crate::frame::VideoRotation;
use crate::headless::HeadlessSurfaceFactory;

struct ActiveDisplay {
    id: u64,
    target: NativeSurface,
    size: (u32, u32),
    listener: Arc<dyn VirtualDisplayListener>,
}

struct ScreenRig {
    /// Size in the natural (portrait) orientation.
    natural: (u32, u32),
    density_dpi: u32,
    rotation: VideoRotation,
    status_bar_height: u32,
    refusal: Option<CaptureSourceError>,
    active: Option<ActiveDisplay>,
    next_display: u64,
    projections: usize,
    displays_created: usize,
    displays_released: usize,
}

type SharedRig = Arc<Mutex<ScreenRig>>;

/// Implements both the display queries and the projection contract.
pub struct VirtualScreen {
    rig: SharedRig,
    surfaces: Arc<HeadlessSurfaceFactory>,
}

impl VirtualScreen {
    /// A portrait display of `width x height` pixels.
    pub fn new(surfaces: Arc<HeadlessSurfaceFactory>, width: u32, height: u32, density_dpi: u32) -> Arc<Self> {
        Arc::new(Self {
            rig: Arc::new(Mutex::new(ScreenRig {
                natural: (width, height),
                density_dpi,
                rotation: VideoRotation::Rotation0,
                status_bar_height: 0,
                refusal: None,
                active: None,
                next_display: 1,
                projections: 0,
                displays_created: 0,
                displays_released: 0,
            })),
            surfaces,
        })
    }

    pub fn set_rotation(&self, rotation: VideoRotation) {
        self.rig.lock().rotation = rotation;
    }

    pub fn set_status_bar_height(&self, height: u32) {
        self.rig.lock().status_bar_height = height;
    }

    /// Make the next projections fail with `reason`; `None` grants again.
    pub fn refuse_projection(&self, reason: Option<CaptureSourceError>) {
        self.rig.lock().refusal = reason;
    }

    /// Produce one image on the active virtual display's surface.
    pub fn emit_frame(&self, timestamp_ns: i64) -> bool {
        let target = self.rig.lock().active.as_ref().map(|a| a.target);
        target
            .and_then(|t| self.surfaces.feed(t))
            .is_some_and(|feed| feed.push_image(timestamp_ns))
    }

    /// End the active virtual display as if the platform revoked it.
    pub fn stop_from_platform(&self) {
        let active = self.rig.lock().active.take();
        if let Some(active) = active {
            active.listener.on_stopped();
        }
    }

    pub fn projection_count(&self) -> usize {
        self.rig.lock().projections
    }

    pub fn display_count(&self) -> usize {
        self.rig.lock().displays_created
    }

    pub fn released_display_count(&self) -> usize {
        self.rig.lock().displays_released
    }

    /// Size of the active virtual display.
    pub fn display_size(&self) -> Option<(u32, u32)> {
        self.rig.lock().active.as_ref().map(|a| a.size)
    }

    /// Size of the surface the active virtual display draws into.
    pub fn surface_size(&self) -> Option<(u32, u32)> {
        let target = self.rig.lock().active.as_ref().map(|a| a.target)?;
        self.surfaces.feed(target).map(|feed| feed.size())
    }
}

impl DisplayProvider for VirtualScreen {
    fn rotation(&self) -> VideoRotation {
        self.rig.lock().rotation
    }

    fn metrics(&self) -> DisplayMetrics {
        let rig = self.rig.lock();
        let (w, h) = rig.natural;
        let (width, height) = if rig.rotation.is_transposed() { (h, w) } else { (w, h) };
        DisplayMetrics {
            width,
            height,
            density_dpi: rig.density_dpi,
        }
    }

    fn status_bar_height(&self) -> u32 {
        self.rig.lock().status_bar_height
    }
}

impl ScreenProjector for VirtualScreen {
    fn create_projection(&self) -> Result<Box<dyn Projection>, CaptureSourceError> {
        let mut rig = self.rig.lock();
        if let Some(reason) = rig.refusal {
            return Err(reason);
        }
        rig.projections += 1;
        Ok(Box::new(VirtualProjection {
            rig: Arc::clone(&self.rig),
            stopped: false,
        }))
    }
}

struct VirtualProjection {
    rig: SharedRig,
    stopped: bool,
}

impl Projection for VirtualProjection {
    fn create_virtual_display(
        &mut self,
        _name: &str,
        width: u32,
        height: u32,
        _density_dpi: u32,
        target: NativeSurface,
        listener: Arc<dyn VirtualDisplayListener>,
    ) -> Result<Box<dyn VirtualDisplay>, MediaError> {
        if self.stopped {
            return Err(MediaError::Other("projection already stopped".into()));
        }
        let mut rig = self.rig.lock();
        let id = rig.next_display;
        rig.next_display += 1;
        rig.displays_created += 1;
        rig.active = Some(ActiveDisplay {
            id,
            target,
            size: (width, height),
            listener,
        });
        Ok(Box::new(VirtualDisplayHandle {
            rig: Arc::clone(&self.rig),
            id,
            released: false,
        }))
    }

    fn stop(&mut self) {
        self.stopped = true;
    }
}

struct VirtualDisplayHandle {
    rig: SharedRig,
    id: u64,
    released: bool,
}

impl VirtualDisplay for VirtualDisplayHandle {
    fn release(&mut self) {
        if std::mem::replace(&mut self.released, true) {
            return;
        }
        let ended = {
            let mut rig = self.rig.lock();
            rig.displays_released += 1;
            match rig.active.take() {
                Some(active) if active.id == self.id => Some(active),
                other => {
                    rig.active = other;
                    None
                }
            }
        };
        // The platform reports a stop for every display that goes away.
        if let Some(active) = ended {
            active.listener.on_stopped();
        }
    }
}
