//! GPU capability detection.

use ash::vk;
use std::collections::HashSet;
use std::ffi::CStr;

/// GPU vendor identification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GpuVendor {
    Nvidia,
    Amd,
    Intel,
    Apple,
    Other(u32),
}

impl GpuVendor {
    /// Identify vendor from PCI vendor ID.
    pub fn from_vendor_id(id: u32) -> Self {
        match id {
            0x10DE => Self::Nvidia,
            0x1002 => Self::Amd,
            0x8086 => Self::Intel,
            0x106B => Self::Apple,
            other => Self::Other(other),
        }
    }
}

/// Device extensions required for hardware ray tracing.
pub const RAY_TRACING_EXTENSIONS: [&CStr; 3] = [
    ash::khr::acceleration_structure::NAME,
    ash::khr::ray_tracing_pipeline::NAME,
    ash::khr::deferred_host_operations::NAME,
];

/// Ray tracing pipeline limits needed to lay out a shader binding table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RayTracingCapabilities {
    pub shader_group_handle_size: u32,
    pub shader_group_handle_alignment: u32,
    pub shader_group_base_alignment: u32,
    pub max_ray_recursion_depth: u32,
}

impl RayTracingCapabilities {
    /// Query ray tracing pipeline properties.
    ///
    /// # Safety
    /// The instance and physical device must be valid.
    pub unsafe fn query(instance: &ash::Instance, physical_device: vk::PhysicalDevice) -> Self {
        let mut rt_properties = vk::PhysicalDeviceRayTracingPipelinePropertiesKHR::default();
        let mut properties2 =
            vk::PhysicalDeviceProperties2::default().push_next(&mut rt_properties);
        instance.get_physical_device_properties2(physical_device, &mut properties2);

        Self {
            shader_group_handle_size: rt_properties.shader_group_handle_size,
            shader_group_handle_alignment: rt_properties.shader_group_handle_alignment,
            shader_group_base_alignment: rt_properties.shader_group_base_alignment,
            max_ray_recursion_depth: rt_properties.max_ray_recursion_depth,
        }
    }
}

/// Detected GPU capabilities.
#[derive(Debug, Clone)]
pub struct GpuCapabilities {
    /// GPU vendor
    pub vendor: GpuVendor,
    /// Device name
    pub device_name: String,
    /// Vulkan API version
    pub api_version: u32,
    /// Driver version
    pub driver_version: u32,

    /// Buffer device address support
    pub supports_buffer_device_address: bool,
    /// Descriptor indexing support
    pub supports_descriptor_indexing: bool,
    /// Scalar block layout support
    pub supports_scalar_block_layout: bool,
    /// All of [`RAY_TRACING_EXTENSIONS`] are available
    pub supports_ray_tracing: bool,

    /// Device-local memory in MB
    pub device_local_memory_mb: u64,

    // Available extensions
    pub available_extensions: HashSet<String>,
}

impl GpuCapabilities {
    /// Query capabilities from a physical device.
    ///
    /// # Safety
    /// The instance and physical device must be valid.
    pub unsafe fn query(instance: &ash::Instance, physical_device: vk::PhysicalDevice) -> Self {
        let properties = instance.get_physical_device_properties(physical_device);
        let memory_properties = instance.get_physical_device_memory_properties(physical_device);

        let extensions = instance
            .enumerate_device_extension_properties(physical_device)
            .unwrap_or_default();

        let available_extensions: HashSet<String> = extensions
            .iter()
            .filter_map(|ext| {
                CStr::from_ptr(ext.extension_name.as_ptr())
                    .to_str()
                    .ok()
                    .map(String::from)
            })
            .collect();

        let vendor = GpuVendor::from_vendor_id(properties.vendor_id);
        let device_name = CStr::from_ptr(properties.device_name.as_ptr())
            .to_string_lossy()
            .into_owned();

        let device_local_memory_mb: u64 = memory_properties
            .memory_heaps
            .iter()
            .take(memory_properties.memory_heap_count as usize)
            .filter(|heap| heap.flags.contains(vk::MemoryHeapFlags::DEVICE_LOCAL))
            .map(|heap| heap.size / (1024 * 1024))
            .sum();

        // Vulkan 1.2+ promotes these to core
        let api_version = properties.api_version;
        let has_vulkan_1_2 =
            vk::api_version_major(api_version) >= 1 && vk::api_version_minor(api_version) >= 2;

        let supports_ray_tracing = has_all_extensions(&available_extensions, &RAY_TRACING_EXTENSIONS);

        Self {
            vendor,
            device_name,
            api_version,
            driver_version: properties.driver_version,

            supports_buffer_device_address: has_vulkan_1_2
                || available_extensions.contains("VK_KHR_buffer_device_address"),
            supports_descriptor_indexing: has_vulkan_1_2
                || available_extensions.contains("VK_EXT_descriptor_indexing"),
            supports_scalar_block_layout: has_vulkan_1_2
                || available_extensions.contains("VK_EXT_scalar_block_layout"),
            supports_ray_tracing,

            device_local_memory_mb,

            available_extensions,
        }
    }

    /// Check if the GPU meets minimum requirements for the renderer.
    ///
    /// Ray tracing is optional; without it only the rasterize path is available.
    pub fn meets_requirements(&self) -> bool {
        let api_major = vk::api_version_major(self.api_version);
        let api_minor = vk::api_version_minor(self.api_version);

        if api_major < 1 || (api_major == 1 && api_minor < 3) {
            return false;
        }

        self.supports_buffer_device_address && self.supports_scalar_block_layout
    }

    /// Get a human-readable summary of capabilities.
    pub fn summary(&self) -> String {
        format!(
            "{} ({:?}) - Vulkan {}.{}.{} - {} MB VRAM - ray tracing: {}",
            self.device_name,
            self.vendor,
            vk::api_version_major(self.api_version),
            vk::api_version_minor(self.api_version),
            vk::api_version_patch(self.api_version),
            self.device_local_memory_mb,
            if self.supports_ray_tracing { "yes" } else { "no" },
        )
    }
}

fn has_all_extensions(available: &HashSet<String>, required: &[&CStr]) -> bool {
    required
        .iter()
        .all(|ext| ext.to_str().is_ok_and(|name| available.contains(name)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vendor_identification() {
        assert_eq!(GpuVendor::from_vendor_id(0x10DE), GpuVendor::Nvidia);
        assert_eq!(GpuVendor::from_vendor_id(0x1002), GpuVendor::Amd);
        assert_eq!(GpuVendor::from_vendor_id(0x8086), GpuVendor::Intel);
        assert_eq!(GpuVendor::from_vendor_id(0x1234), GpuVendor::Other(0x1234));
    }

    #[test]
    fn ray_tracing_needs_every_extension() {
        let mut available: HashSet<String> = [
            "VK_KHR_acceleration_structure",
            "VK_KHR_ray_tracing_pipeline",
        ]
        .into_iter()
        .map(String::from)
        .collect();
        assert!(!has_all_extensions(&available, &RAY_TRACING_EXTENSIONS));

        available.insert("VK_KHR_deferred_host_operations".to_string());
        assert!(has_all_extensions(&available, &RAY_TRACING_EXTENSIONS));
    }
}
