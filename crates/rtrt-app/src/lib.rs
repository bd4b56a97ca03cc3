//! Windowed host for the rtrt frame core.
//!
//! [`run_app`] sets up `tracing`, opens a window, brings up the GPU with the
//! options from [`AppConfig`] and then drives an [`RtrtApp`] from the winit
//! event loop. The app owns its [`Renderer`](rtrt_render::Renderer); the
//! host owns the swapchain and replaces it whenever a frame comes back with
//! [`FrameError::SwapchainStale`].
//!
//! Keys: `Space` toggles the render path, `Escape` quits.
//!
//! # Example
//!
//! ```no_run
//! use rtrt_app::{run_app, AppConfig, AppContext, FrameError, RtrtApp};
//!
//! struct MyApp;
//!
//! impl RtrtApp for MyApp {
//!     fn init(_ctx: &mut AppContext) -> anyhow::Result<Self> {
//!         Ok(MyApp)
//!     }
//!
//!     fn update(&mut self, _ctx: &AppContext, _dt: f32) {}
//!
//!     fn render(&mut self, _ctx: &AppContext) -> Result<(), FrameError> {
//!         Ok(())
//!     }
//! }
//!
//! fn main() -> anyhow::Result<()> {
//!     run_app::<MyApp>(AppConfig::default())
//! }
//! ```

mod app;
mod config;
mod context;
mod runner;

pub use app::RtrtApp;
pub use config::{AppConfig, API_DUMP_ENV, FORCE_RASTER_ENV};
pub use context::AppContext;
pub use runner::run_app;

pub use rtrt_gpu::{GpuContext, GpuContextBuilder};
pub use rtrt_render::{Camera, FrameError, RenderPath};
pub use winit::event::WindowEvent;
