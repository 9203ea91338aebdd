//! # tilecast-core
//!
//! Video media pipeline for a conferencing client: capture, transport
//! hand-off, per-participant tiles and rendering.
//!
//! This crate contains:
//! - **Frames**: `FrameBuffer` (reference-counted YUV, RGBA or texture
//!   data with an exactly-once release callback), `VideoFrame`, `Matrix3`
//! - **Workers**: `SerialWorker`, the single-threaded actor every
//!   component keeps its mutable state on, and the shared `DeliveryQueue`
//!   observers are notified on
//! - **Capture**: `SurfaceCaptureSource` with single-slot backpressure,
//!   `CameraCaptureSource` and `ScreenCaptureSource` on top of it
//! - **Engine seams**: `VideoSourceAdapter`, `VideoClientController`,
//!   `RemoteVideoObserver`
//! - **Tiles**: `TileController`, the per-tile state machine and view binding
//! - **Rendering**: `Renderer` with a single pending-frame slot
//! - **Headless**: software implementations of every platform contract
//! - **Error**: `MediaError` and `CaptureSourceError`, `thiserror`-based
//!
//! ```text
//!   CaptureSource ─► VideoSourceAdapter ─► engine ─► TileController ─► Renderer
//! ```

pub mod capture;
pub mod config;
pub mod delivery;
pub mod engine;
pub mod error;
pub mod frame;
pub mod headless;
pub mod registry;
pub mod render;
pub mod sink;
pub mod tile;
pub mod worker;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use capture::{
    CameraCaptureSource, CaptureSourceObserver, MediaDevice, MediaDeviceKind, ScreenCaptureSource,
    SurfaceCaptureSource, VideoCaptureFormat, VideoCaptureSource, VideoResolution,
};
pub use config::{CameraConfig, PipelineConfig, RenderConfig, ScreenConfig};
pub use delivery::DeliveryQueue;
pub use engine::{RemoteVideoObserver, VideoClientController, VideoSourceAdapter};
pub use error::{CaptureSourceError, MediaError};
pub use frame::{FrameBuffer, Matrix3, VideoContentHint, VideoFrame, VideoRotation};
pub use render::{Renderer, VideoScalingType};
pub use sink::{VideoSink, VideoSource};
pub use tile::{
    TileController, TileId, VideoPauseState, VideoRenderView, VideoTileObserver, VideoTileState,
};
pub use worker::{SerialWorker, WorkerHandle};
