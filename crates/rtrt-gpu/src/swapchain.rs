//! Swapchain management.
//!
//! Acquire and present go through [`DeviceContext`](crate::DeviceContext) so
//! the frame synchronizer can run against any device implementation.

use crate::error::{GpuError, Result};
use ash::vk;

/// Swapchain wrapper.
pub struct Swapchain {
    pub swapchain: vk::SwapchainKHR,
    pub images: Vec<vk::Image>,
    pub image_views: Vec<vk::ImageView>,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
}

impl Swapchain {
    /// Create a new swapchain.
    ///
    /// # Safety
    /// All handles must be valid.
    #[allow(clippy::too_many_arguments)]
    pub unsafe fn new(
        device: &ash::Device,
        swapchain_loader: &ash::khr::swapchain::Device,
        surface: vk::SurfaceKHR,
        surface_capabilities: &vk::SurfaceCapabilitiesKHR,
        surface_format: vk::SurfaceFormatKHR,
        present_mode: vk::PresentModeKHR,
        extent: vk::Extent2D,
        old_swapchain: Option<vk::SwapchainKHR>,
        graphics_queue_family: u32,
    ) -> Result<Self> {
        let image_count = select_image_count(surface_capabilities);

        let queue_families = [graphics_queue_family];
        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(surface)
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .queue_family_indices(&queue_families)
            .pre_transform(surface_capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(old_swapchain.unwrap_or(vk::SwapchainKHR::null()));

        let swapchain = swapchain_loader
            .create_swapchain(&create_info, None)
            .map_err(|e| GpuError::SwapchainCreation(e.to_string()))?;

        let images = swapchain_loader.get_swapchain_images(swapchain)?;

        let mut image_views = Vec::with_capacity(images.len());
        for &image in &images {
            let view_info = vk::ImageViewCreateInfo::default()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(surface_format.format)
                .subresource_range(crate::transition::single_subresource(
                    vk::ImageAspectFlags::COLOR,
                ));

            match device.create_image_view(&view_info, None) {
                Ok(view) => image_views.push(view),
                Err(e) => {
                    for view in image_views {
                        device.destroy_image_view(view, None);
                    }
                    swapchain_loader.destroy_swapchain(swapchain, None);
                    return Err(e.into());
                }
            }
        }

        Ok(Self {
            swapchain,
            images,
            image_views,
            format: surface_format.format,
            extent,
        })
    }

    /// Number of presentable images.
    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    /// Destroy the swapchain.
    ///
    /// # Safety
    /// All handles must be valid and swapchain must not be in use.
    pub unsafe fn destroy(
        &self,
        device: &ash::Device,
        swapchain_loader: &ash::khr::swapchain::Device,
    ) {
        for &view in &self.image_views {
            device.destroy_image_view(view, None);
        }
        swapchain_loader.destroy_swapchain(self.swapchain, None);
    }
}

/// One more image than the minimum, clamped to the maximum (0 means unbounded).
pub fn select_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let desired = capabilities.min_image_count + 1;
    if capabilities.max_image_count > 0 {
        desired.min(capabilities.max_image_count)
    } else {
        desired
    }
}

/// Select the best surface format.
pub fn select_surface_format(available: &[vk::SurfaceFormatKHR]) -> Result<vk::SurfaceFormatKHR> {
    let preferred = available.iter().find(|format| {
        format.format == vk::Format::B8G8R8A8_UNORM
            && format.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
    });

    preferred
        .or_else(|| available.first())
        .copied()
        .ok_or_else(|| GpuError::SwapchainCreation("Surface reports no formats".to_string()))
}

/// Select the best present mode.
pub fn select_present_mode(available: &[vk::PresentModeKHR], vsync: bool) -> vk::PresentModeKHR {
    if vsync {
        return vk::PresentModeKHR::FIFO;
    }

    [vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::IMMEDIATE]
        .into_iter()
        .find(|mode| available.contains(mode))
        // FIFO is always supported
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

/// Calculate swapchain extent.
pub fn calculate_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    desired_width: u32,
    desired_height: u32,
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        capabilities.current_extent
    } else {
        vk::Extent2D {
            width: desired_width.clamp(
                capabilities.min_image_extent.width,
                capabilities.max_image_extent.width,
            ),
            height: desired_height.clamp(
                capabilities.min_image_extent.height,
                capabilities.max_image_extent.height,
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn format(format: vk::Format) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }
    }

    #[test]
    fn prefers_unorm_bgra() {
        let available = [
            format(vk::Format::R8G8B8A8_SRGB),
            format(vk::Format::B8G8R8A8_UNORM),
        ];
        assert_eq!(
            select_surface_format(&available).unwrap().format,
            vk::Format::B8G8R8A8_UNORM
        );
        assert_eq!(
            select_surface_format(&available[..1]).unwrap().format,
            vk::Format::R8G8B8A8_SRGB
        );
        assert!(select_surface_format(&[]).is_err());
    }

    #[test]
    fn present_mode_falls_back_to_fifo() {
        assert_eq!(
            select_present_mode(&[vk::PresentModeKHR::MAILBOX], true),
            vk::PresentModeKHR::FIFO
        );
        assert_eq!(
            select_present_mode(
                &[vk::PresentModeKHR::IMMEDIATE, vk::PresentModeKHR::MAILBOX],
                false
            ),
            vk::PresentModeKHR::MAILBOX
        );
        assert_eq!(
            select_present_mode(&[vk::PresentModeKHR::FIFO], false),
            vk::PresentModeKHR::FIFO
        );
    }

    #[test]
    fn extent_uses_current_when_fixed() {
        let caps = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: 800,
                height: 600,
            },
            ..Default::default()
        };
        let extent = calculate_extent(&caps, 1920, 1080);
        assert_eq!((extent.width, extent.height), (800, 600));
    }

    #[test]
    fn extent_clamps_when_surface_defers() {
        let caps = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D {
                width: 1,
                height: 1,
            },
            max_image_extent: vk::Extent2D {
                width: 1024,
                height: 768,
            },
            ..Default::default()
        };
        let extent = calculate_extent(&caps, 4096, 600);
        assert_eq!((extent.width, extent.height), (1024, 600));
    }

    #[test]
    fn image_count_respects_maximum() {
        let mut caps = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 0,
            ..Default::default()
        };
        assert_eq!(select_image_count(&caps), 3);
        caps.max_image_count = 2;
        assert_eq!(select_image_count(&caps), 2);
    }
}
