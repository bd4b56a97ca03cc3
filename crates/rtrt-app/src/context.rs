//! Application context.

use std::sync::Arc;
use std::time::Instant;

use ash::vk;
use rtrt_gpu::{DeviceContext, GpuContext, SurfaceContext, Swapchain};
use rtrt_render::RenderPath;
use winit::window::Window;

/// Application context shared across all app methods.
///
/// Provides access to the GPU context, window and swapchain. The swapchain
/// is owned here and recreated by the runner; apps rebuild their
/// size-dependent resources in `on_resize`.
pub struct AppContext {
    /// The window handle.
    pub window: Arc<Window>,
    /// GPU context with device, queue and command pool.
    pub gpu: Arc<GpuContext>,
    /// Surface context for windowed rendering.
    pub surface: SurfaceContext,
    /// Current swapchain.
    pub swapchain: Swapchain,
    /// Total frames rendered.
    pub frame_count: u64,
    /// Time of last frame (for delta time calculation).
    pub(crate) last_frame_time: Instant,
    /// Whether vsync is enabled.
    pub vsync: bool,
    /// Path of the first frame, with the raster override applied.
    pub initial_path: RenderPath,
    /// Whether the ray-trace path may be used.
    pub ray_tracing: bool,
    /// Whether the HUD overlay is recorded.
    pub overlay: bool,
}

impl AppContext {
    /// Create a new application context.
    ///
    /// # Safety
    /// The window must have valid handles.
    pub(crate) unsafe fn new(
        window: Arc<Window>,
        gpu: GpuContext,
        vsync: bool,
        initial_path: RenderPath,
        ray_tracing: bool,
        overlay: bool,
    ) -> anyhow::Result<Self> {
        // SAFETY: Caller guarantees window has valid handles
        let surface = unsafe { SurfaceContext::from_window(&gpu, window.as_ref())? };

        let size = window.inner_size();
        let width = size.width.max(1);
        let height = size.height.max(1);

        // SAFETY: GPU context is valid
        let swapchain = unsafe { surface.create_swapchain(&gpu, width, height, vsync, None)? };

        tracing::info!(
            "Swapchain created: {}x{} ({} images)",
            swapchain.extent.width,
            swapchain.extent.height,
            swapchain.images.len()
        );

        Ok(Self {
            window,
            ray_tracing: ray_tracing && gpu.supports_ray_tracing(),
            gpu: Arc::new(gpu),
            surface,
            swapchain,
            frame_count: 0,
            last_frame_time: Instant::now(),
            vsync,
            initial_path,
            overlay,
        })
    }

    /// The device as the frame core sees it.
    pub fn device(&self) -> Arc<dyn DeviceContext> {
        self.gpu.clone()
    }

    /// Get the current swapchain extent.
    pub fn extent(&self) -> vk::Extent2D {
        self.swapchain.extent
    }

    /// Get the swapchain width.
    pub fn width(&self) -> u32 {
        self.swapchain.extent.width
    }

    /// Get the swapchain height.
    pub fn height(&self) -> u32 {
        self.swapchain.extent.height
    }

    /// Get the aspect ratio (width / height).
    pub fn aspect_ratio(&self) -> f32 {
        self.swapchain.extent.width as f32 / self.swapchain.extent.height.max(1) as f32
    }

    /// Recreate the swapchain (e.g., after resize).
    ///
    /// # Safety
    /// The GPU must be idle.
    pub(crate) unsafe fn recreate_swapchain(
        &mut self,
        width: u32,
        height: u32,
    ) -> anyhow::Result<()> {
        // SAFETY: Caller guarantees GPU is idle
        unsafe {
            self.surface.recreate_swapchain(
                &self.gpu,
                &mut self.swapchain,
                width,
                height,
                self.vsync,
            )?;
        }

        tracing::info!(
            "Swapchain recreated: {}x{}",
            self.swapchain.extent.width,
            self.swapchain.extent.height
        );

        Ok(())
    }

    /// Cleanup all resources.
    ///
    /// # Safety
    /// The GPU must be idle and all resources must not be in use.
    pub(crate) unsafe fn cleanup(&mut self) {
        // SAFETY: Caller guarantees GPU is idle and resources are not in use
        unsafe {
            self.swapchain
                .destroy(self.gpu.device(), self.gpu.swapchain_loader());
            self.surface.destroy();
        }
    }
}
