//! `RtrtApp` trait definition.

use crate::context::AppContext;
use rtrt_render::{FrameError, RenderPath};
use winit::event::WindowEvent;

/// Trait for rtrt applications.
///
/// The framework creates the window, the GPU context and the swapchain, runs
/// the event loop and recreates the swapchain when a frame reports it stale.
pub trait RtrtApp: Sized {
    /// Initialize the application.
    ///
    /// Called once when the application starts, after the GPU context and
    /// window have been created.
    fn init(ctx: &mut AppContext) -> anyhow::Result<Self>;

    /// Update application state.
    ///
    /// Called every frame before rendering.
    ///
    /// # Arguments
    /// * `ctx` - Application context with GPU and window access
    /// * `dt` - Delta time in seconds since last frame
    fn update(&mut self, ctx: &AppContext, dt: f32);

    /// Render one frame.
    ///
    /// [`FrameError::SwapchainStale`] makes the framework recreate the
    /// swapchain and call [`on_resize`](Self::on_resize). Any other error
    /// ends the event loop.
    fn render(&mut self, ctx: &AppContext) -> Result<(), FrameError>;

    /// Handle a recreated swapchain.
    ///
    /// Called after resize and after a stale swapchain was replaced.
    /// Rebuild size-dependent resources here.
    ///
    /// Default implementation does nothing.
    #[allow(unused_variables)]
    fn on_resize(&mut self, ctx: &mut AppContext, width: u32, height: u32) -> anyhow::Result<()> {
        Ok(())
    }

    /// Switch between the rasterize and ray-trace paths. Bound to `Space`.
    ///
    /// Returns the path now requested, or `None` if the app has no paths.
    fn toggle_path(&mut self) -> Option<RenderPath> {
        None
    }

    /// Handle window events.
    ///
    /// Called for each window event. Return `true` if the event was
    /// handled and should not be processed further.
    ///
    /// Default implementation does nothing and returns `false`.
    #[allow(unused_variables)]
    fn on_event(&mut self, event: &WindowEvent) -> bool {
        false
    }

    /// Cleanup resources before shutdown.
    ///
    /// Called when the application is about to exit. The GPU will be
    /// idle when this is called, so it's safe to destroy GPU resources.
    ///
    /// Default implementation does nothing.
    #[allow(unused_variables)]
    fn cleanup(&mut self, ctx: &mut AppContext) {}
}
