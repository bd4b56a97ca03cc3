//! Frame core of the rtrt renderer.
//!
//! This crate provides:
//! - Frame synchronization (acquire, polled fence wait, submit, present)
//! - The per-frame driver recording the rasterize or ray-trace path
//! - The post-process pass and the overlay injection point
//! - Camera and view management
//! - Frame error taxonomy

pub mod camera;
pub mod error;
pub mod frame;
pub mod overlay;
pub mod path;
pub mod post;
pub mod raster;
pub mod raytrace;
pub mod renderer;
pub mod scene;

pub use camera::{record_camera_update, Camera, CameraUniforms};
pub use error::{FrameError, StalePoint};
pub use frame::{FrameState, FrameSynchronizer, ACQUIRE_WAIT_STAGE, RELEASE_WAIT_STAGE};
pub use overlay::{DrawListOverlay, NoOverlay, OverlayDraw, OverlayDrawData, OverlayQuad, OverlayRenderer};
pub use path::{PathSelector, RenderPath};
pub use post::PostProcessPass;
pub use raster::{RasterDraw, RasterPass, RasterPushConstants};
pub use raytrace::RayTracePass;
pub use renderer::{FrameStats, FrameTargets, Renderer, RendererConfig};
pub use scene::{ObjectDesc, Vertex};
