//! Shader Binding Table (SBT) management for hardware ray tracing.
//!
//! The SBT is a GPU buffer containing shader handles organized by type:
//! - Ray generation shaders
//! - Miss shaders
//! - Hit groups (closest-hit)
//! - Callable shaders (unused)

use ash::vk;
use rtrt_gpu::{
    GpuBuffer, GpuContext, GpuError, MemoryLocation, RayTracingCapabilities, Result, SbtRegions,
};

/// Byte layout of an SBT with one raygen, `miss_count` miss and `hit_count`
/// hit group records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SbtLayout {
    pub handle_size: u32,
    pub handle_stride: u32,
    pub raygen_size: u32,
    pub miss_size: u32,
    pub hit_size: u32,
    pub miss_count: u32,
    pub hit_count: u32,
}

impl SbtLayout {
    pub fn new(caps: &RayTracingCapabilities, miss_count: u32, hit_count: u32) -> Self {
        let handle_size = caps.shader_group_handle_size;
        let handle_stride = align_up(handle_size, caps.shader_group_handle_alignment);
        let base = caps.shader_group_base_alignment;

        Self {
            handle_size,
            handle_stride,
            raygen_size: align_up(handle_stride, base),
            miss_size: align_up(handle_stride * miss_count, base),
            hit_size: align_up(handle_stride * hit_count, base),
            miss_count,
            hit_count,
        }
    }

    /// Total number of shader groups, in raygen, miss, hit order.
    pub fn group_count(&self) -> u32 {
        1 + self.miss_count + self.hit_count
    }

    pub fn total_size(&self) -> u32 {
        self.raygen_size + self.miss_size + self.hit_size
    }

    /// Buffer offset of the record for shader group `group`.
    pub fn record_offset(&self, group: u32) -> u32 {
        if group == 0 {
            0
        } else if group <= self.miss_count {
            self.raygen_size + (group - 1) * self.handle_stride
        } else {
            self.raygen_size + self.miss_size + (group - 1 - self.miss_count) * self.handle_stride
        }
    }

    /// Regions for a table starting at `base_address`.
    pub fn regions(&self, base_address: vk::DeviceAddress) -> SbtRegions {
        let stride = u64::from(self.handle_stride);
        // Raygen size must equal its stride
        SbtRegions {
            raygen: vk::StridedDeviceAddressRegionKHR {
                device_address: base_address,
                stride,
                size: stride,
            },
            miss: vk::StridedDeviceAddressRegionKHR {
                device_address: base_address + u64::from(self.raygen_size),
                stride,
                size: u64::from(self.miss_size),
            },
            hit: vk::StridedDeviceAddressRegionKHR {
                device_address: base_address + u64::from(self.raygen_size + self.miss_size),
                stride,
                size: u64::from(self.hit_size),
            },
            callable: vk::StridedDeviceAddressRegionKHR::default(),
        }
    }
}

/// Align a value up to the given power-of-two alignment.
fn align_up(value: u32, alignment: u32) -> u32 {
    if alignment == 0 {
        return value;
    }
    (value + alignment - 1) & !(alignment - 1)
}

/// Shader Binding Table for a ray tracing pipeline.
pub struct ShaderBindingTable {
    buffer: GpuBuffer,
    regions: SbtRegions,
}

impl ShaderBindingTable {
    /// Fetch the group handles of `pipeline` and lay them out per `layout`.
    ///
    /// # Safety
    /// `pipeline` must be a valid ray tracing pipeline with
    /// `layout.group_count()` groups.
    pub unsafe fn new(gpu: &GpuContext, pipeline: vk::Pipeline, layout: &SbtLayout) -> Result<Self> {
        let loaders = gpu.ray_tracing().ok_or_else(|| {
            GpuError::ExtensionNotSupported("VK_KHR_ray_tracing_pipeline".to_string())
        })?;

        let group_count = layout.group_count();
        let handle_size = layout.handle_size as usize;
        let handles = loaders.pipeline.get_ray_tracing_shader_group_handles(
            pipeline,
            0,
            group_count,
            handle_size * group_count as usize,
        )?;

        let mut allocator = gpu.allocator().lock();
        let mut buffer = allocator.create_buffer(
            u64::from(layout.total_size()),
            vk::BufferUsageFlags::SHADER_BINDING_TABLE_KHR
                | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS,
            MemoryLocation::CpuToGpu,
            "shader_binding_table",
        )?;

        for (group, handle) in handles.chunks_exact(handle_size).enumerate() {
            let offset = layout.record_offset(group as u32);
            if let Err(e) = buffer.write_bytes(u64::from(offset), handle) {
                allocator.free_buffer(&mut buffer)?;
                return Err(e);
            }
        }

        let regions = layout.regions(buffer.device_address);
        tracing::debug!(
            size = layout.total_size(),
            groups = group_count,
            "Created shader binding table"
        );

        Ok(Self { buffer, regions })
    }

    /// Regions for `vkCmdTraceRaysKHR`.
    pub fn regions(&self) -> SbtRegions {
        self.regions
    }

    /// Destroy the SBT and free resources.
    ///
    /// # Safety
    /// The SBT must not be in use.
    pub unsafe fn destroy(mut self, gpu: &GpuContext) -> Result<()> {
        gpu.allocator().lock().free_buffer(&mut self.buffer)
    }
}
