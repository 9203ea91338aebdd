//! Software implementations of every platform contract.
//!
//! Nothing here touches a device: surfaces are signalled by hand, cameras
//! and screens are scripted, graphics calls are recorded and the engine
//! loops outgoing video back as remote tiles. Tests and the simulator run
//! the pipeline on top of it.

pub mod camera;
pub mod engine;
pub mod graphics;
pub mod screen;
pub mod surface;

pub use camera::{VirtualCamera, VirtualCameraSystem};
pub use engine::{LOCAL_TILE_ID, LoopbackEngine};
pub use graphics::{
    DrawCall, GraphicsLog, HeadlessGraphics, HeadlessGraphicsFactory, SharedGraphicsLog, UploadCall,
};
pub use screen::VirtualScreen;
pub use surface::{HeadlessSurfaceFactory, SurfaceFeed};
