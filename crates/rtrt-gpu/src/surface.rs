//! Surface management for windowed rendering.
//!
//! Hides the raw-window-handle plumbing from application code and owns the
//! swapchain lifecycle for one window.

use crate::context::GpuContext;
use crate::error::{GpuError, Result};
use crate::swapchain::{calculate_extent, select_present_mode, select_surface_format, Swapchain};
use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

/// Surface context for windowed rendering.
pub struct SurfaceContext {
    /// The Vulkan surface handle.
    pub surface: vk::SurfaceKHR,
    /// Surface extension loader.
    pub surface_loader: ash::khr::surface::Instance,
}

impl SurfaceContext {
    /// Create a new surface context from a window.
    ///
    /// # Safety
    /// The GPU context must be valid and the window must have valid handles.
    pub unsafe fn from_window<W>(gpu: &GpuContext, window: &W) -> Result<Self>
    where
        W: HasDisplayHandle + HasWindowHandle,
    {
        let display = window
            .display_handle()
            .map_err(|e| GpuError::SurfaceCreation(format!("Failed to get display handle: {e}")))?;
        let window_handle = window
            .window_handle()
            .map_err(|e| GpuError::SurfaceCreation(format!("Failed to get window handle: {e}")))?;

        let surface = ash_window::create_surface(
            gpu.entry(),
            gpu.instance(),
            display.as_raw(),
            window_handle.as_raw(),
            None,
        )
        .map_err(|e| GpuError::SurfaceCreation(e.to_string()))?;

        let surface_loader = ash::khr::surface::Instance::new(gpu.entry(), gpu.instance());

        let supported = surface_loader.get_physical_device_surface_support(
            gpu.physical_device(),
            gpu.graphics_queue_family(),
            surface,
        )?;
        if !supported {
            surface_loader.destroy_surface(surface, None);
            return Err(GpuError::SurfaceCreation(
                "Graphics queue cannot present to this surface".to_string(),
            ));
        }

        Ok(Self {
            surface,
            surface_loader,
        })
    }

    /// Query surface capabilities.
    pub fn capabilities(&self, gpu: &GpuContext) -> Result<SurfaceCapabilities> {
        unsafe {
            let caps = self
                .surface_loader
                .get_physical_device_surface_capabilities(gpu.physical_device(), self.surface)?;

            let formats = self
                .surface_loader
                .get_physical_device_surface_formats(gpu.physical_device(), self.surface)?;

            let present_modes = self
                .surface_loader
                .get_physical_device_surface_present_modes(gpu.physical_device(), self.surface)?;

            Ok(SurfaceCapabilities {
                capabilities: caps,
                formats,
                present_modes,
            })
        }
    }

    /// Create a swapchain for this surface.
    ///
    /// # Safety
    /// The GPU context must be valid.
    pub unsafe fn create_swapchain(
        &self,
        gpu: &GpuContext,
        width: u32,
        height: u32,
        vsync: bool,
        old_swapchain: Option<vk::SwapchainKHR>,
    ) -> Result<Swapchain> {
        let caps = self.capabilities(gpu)?;

        let surface_format = select_surface_format(&caps.formats)?;
        let present_mode = select_present_mode(&caps.present_modes, vsync);
        let extent = calculate_extent(&caps.capabilities, width, height);

        tracing::debug!(
            ?surface_format.format,
            ?present_mode,
            width = extent.width,
            height = extent.height,
            "Creating swapchain"
        );

        Swapchain::new(
            gpu.device(),
            gpu.swapchain_loader(),
            self.surface,
            &caps.capabilities,
            surface_format,
            present_mode,
            extent,
            old_swapchain,
            gpu.graphics_queue_family(),
        )
    }

    /// Replace `swapchain` with one sized for the current surface.
    ///
    /// The old swapchain is handed to the driver as `old_swapchain` and
    /// destroyed once the new one exists.
    ///
    /// # Safety
    /// The old swapchain must not be in use.
    pub unsafe fn recreate_swapchain(
        &self,
        gpu: &GpuContext,
        swapchain: &mut Swapchain,
        width: u32,
        height: u32,
        vsync: bool,
    ) -> Result<()> {
        let new_swapchain =
            self.create_swapchain(gpu, width, height, vsync, Some(swapchain.swapchain))?;
        let old = std::mem::replace(swapchain, new_swapchain);
        old.destroy(gpu.device(), gpu.swapchain_loader());
        Ok(())
    }

    /// Destroy the surface.
    ///
    /// # Safety
    /// The surface must not be in use.
    pub unsafe fn destroy(&self) {
        self.surface_loader.destroy_surface(self.surface, None);
    }
}

/// Surface capabilities query result.
pub struct SurfaceCapabilities {
    /// Raw surface capabilities.
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    /// Supported surface formats.
    pub formats: Vec<vk::SurfaceFormatKHR>,
    /// Supported present modes.
    pub present_modes: Vec<vk::PresentModeKHR>,
}
