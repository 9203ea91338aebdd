//! Capture surfaces that are signalled by hand.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::capture::platform::{
    CaptureSurface, ImageAvailableListener, NativeSurface, SurfaceFactory, SurfaceImage,
};
use crate::error::MediaError;
use crate::frame::Matrix3;

/// The producer side of a headless surface.
pub struct SurfaceFeed {
    width: u32,
    height: u32,
    listener: Mutex<Option<ImageAvailableListener>>,
    latest: Mutex<Option<SurfaceImage>>,
    acquired: AtomicUsize,
    released: AtomicBool,
}

impl SurfaceFeed {
    /// Make an image with `timestamp_ns` the latest and signal the listener.
    /// Returns `false` if nobody is listening.
    pub fn push_image(&self, timestamp_ns: i64) -> bool {
        self.push_image_with_transform(timestamp_ns, Matrix3::IDENTITY)
    }

    pub fn push_image_with_transform(&self, timestamp_ns: i64, transform: Matrix3) -> bool {
        if self.is_released() {
            return false;
        }
        *self.latest.lock() = Some(SurfaceImage {
            timestamp_ns,
            transform,
        });
        let listener = self.listener.lock().clone();
        match listener {
            Some(listener) => {
                listener();
                true
            }
            None => false,
        }
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn acquire_count(&self) -> usize {
        self.acquired.load(Ordering::SeqCst)
    }

    pub fn is_listening(&self) -> bool {
        self.listener.lock().is_some()
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }
}

struct HeadlessSurface {
    handle: NativeSurface,
    texture_id: u32,
    feed: Arc<SurfaceFeed>,
    registry: Arc<Mutex<HashMap<NativeSurface, Arc<SurfaceFeed>>>>,
}

impl CaptureSurface for HeadlessSurface {
    fn producer(&self) -> NativeSurface {
        self.handle
    }

    fn texture_id(&self) -> u32 {
        self.texture_id
    }

    fn set_image_listener(&mut self, listener: Option<ImageAvailableListener>) {
        *self.feed.listener.lock() = listener;
    }

    fn acquire_latest_image(&mut self) -> Result<SurfaceImage, MediaError> {
        let image = (*self.feed.latest.lock())
            .ok_or_else(|| MediaError::Graphics("no image to acquire".into()))?;
        self.feed.acquired.fetch_add(1, Ordering::SeqCst);
        Ok(image)
    }

    fn release(&mut self) {
        *self.feed.listener.lock() = None;
        self.feed.released.store(true, Ordering::SeqCst);
        self.registry.lock().remove(&self.handle);
    }
}

/// Creates headless surfaces and lets producers find them by handle.
pub struct HeadlessSurfaceFactory {
    next_handle: AtomicU64,
    next_texture: AtomicU32,
    live: Arc<Mutex<HashMap<NativeSurface, Arc<SurfaceFeed>>>>,
    created: AtomicUsize,
}

impl HeadlessSurfaceFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            next_handle: AtomicU64::new(1),
            next_texture: AtomicU32::new(1),
            live: Arc::new(Mutex::new(HashMap::new())),
            created: AtomicUsize::new(0),
        })
    }

    /// Feed of a surface that has not been released yet.
    pub fn feed(&self, surface: NativeSurface) -> Option<Arc<SurfaceFeed>> {
        self.live.lock().get(&surface).cloned()
    }

    pub fn live_surfaces(&self) -> usize {
        self.live.lock().len()
    }

    pub fn created_surfaces(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

impl SurfaceFactory for HeadlessSurfaceFactory {
    fn create_surface(&self, width: u32, height: u32) -> Result<Box<dyn CaptureSurface>, MediaError> {
        let handle = NativeSurface(self.next_handle.fetch_add(1, Ordering::SeqCst));
        let feed = Arc::new(SurfaceFeed {
            width,
            height,
            listener: Mutex::new(None),
            latest: Mutex::new(None),
            acquired: AtomicUsize::new(0),
            released: AtomicBool::new(false),
        });
        self.live.lock().insert(handle, Arc::clone(&feed));
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(HeadlessSurface {
            handle,
            texture_id: self.next_texture.fetch_add(1, Ordering::SeqCst),
            feed,
            registry: Arc::clone(&self.live),
        }))
    }
}
