//! GPU context management.

use crate::capabilities::{GpuCapabilities, RayTracingCapabilities, RAY_TRACING_EXTENSIONS};
use crate::command::CommandPool;
use crate::device::{DeviceContext, FenceStatus, RenderPassBegin, SbtRegions, Submission};
use crate::error::{GpuError, Result};
use crate::instance::{create_instance, select_physical_device};
use crate::memory::GpuAllocator;
use crate::sync;
use crate::transition::{BufferBarrier, ImageBarrier};
use ash::vk;
use parking_lot::Mutex;
use std::ffi::CStr;
use std::sync::Arc;

/// Extension loaders that exist only when ray tracing was enabled.
pub struct RayTracingLoaders {
    pub acceleration_structure: ash::khr::acceleration_structure::Device,
    pub pipeline: ash::khr::ray_tracing_pipeline::Device,
    pub properties: RayTracingCapabilities,
}

/// Main GPU context holding Vulkan resources.
///
/// Owns the single graphics queue (also used for presentation) and the
/// command pool every command buffer of the renderer is allocated from.
pub struct GpuContext {
    // Entry must be kept alive for the lifetime of the context
    #[allow(dead_code)]
    pub(crate) entry: ash::Entry,
    pub(crate) instance: ash::Instance,
    pub(crate) physical_device: vk::PhysicalDevice,
    pub(crate) device: Arc<ash::Device>,
    pub(crate) capabilities: GpuCapabilities,
    pub(crate) allocator: Mutex<GpuAllocator>,

    pub(crate) graphics_queue_family: u32,
    pub(crate) graphics_queue: vk::Queue,
    pub(crate) command_pool: CommandPool,

    pub(crate) swapchain_loader: ash::khr::swapchain::Device,
    pub(crate) ray_tracing: Option<RayTracingLoaders>,
}

impl GpuContext {
    /// Get the Vulkan device handle.
    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    /// Get the physical device handle.
    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    /// Get GPU capabilities.
    pub fn capabilities(&self) -> &GpuCapabilities {
        &self.capabilities
    }

    /// Get the graphics queue.
    pub fn graphics_queue(&self) -> vk::Queue {
        self.graphics_queue
    }

    /// Get the graphics queue family index.
    pub fn graphics_queue_family(&self) -> u32 {
        self.graphics_queue_family
    }

    /// Get the shared command pool.
    pub fn command_pool(&self) -> &CommandPool {
        &self.command_pool
    }

    /// Get the Vulkan instance handle.
    pub fn instance(&self) -> &ash::Instance {
        &self.instance
    }

    /// Get the Vulkan entry point.
    pub fn entry(&self) -> &ash::Entry {
        &self.entry
    }

    /// Get access to the GPU allocator.
    pub fn allocator(&self) -> &Mutex<GpuAllocator> {
        &self.allocator
    }

    /// Get the swapchain extension loader.
    pub fn swapchain_loader(&self) -> &ash::khr::swapchain::Device {
        &self.swapchain_loader
    }

    /// Ray tracing loaders, if the device was created with ray tracing.
    pub fn ray_tracing(&self) -> Option<&RayTracingLoaders> {
        self.ray_tracing.as_ref()
    }

    /// Whether the ray trace path can run on this context.
    pub fn supports_ray_tracing(&self) -> bool {
        self.ray_tracing.is_some()
    }

    /// Wait for device to be idle.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub fn wait_idle(&self) -> Result<()> {
        unsafe {
            self.device.device_wait_idle()?;
        }
        Ok(())
    }
}

impl Drop for GpuContext {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();

            self.command_pool.destroy(&self.device);

            // Shutdown allocator BEFORE destroying device
            // This frees all VkDeviceMemory allocations
            self.allocator.lock().shutdown();

            self.device.destroy_device(None);
            self.instance.destroy_instance(None);
        }
    }
}

impl DeviceContext for GpuContext {
    fn allocate_command_buffer(&self) -> Result<vk::CommandBuffer> {
        unsafe {
            self.command_pool
                .allocate_command_buffer(&self.device, vk::CommandBufferLevel::PRIMARY)
        }
    }

    fn free_command_buffer(&self, cmd: vk::CommandBuffer) {
        unsafe {
            self.device
                .free_command_buffers(self.command_pool.handle(), &[cmd]);
        }
    }

    fn begin_command_buffer(
        &self,
        cmd: vk::CommandBuffer,
        flags: vk::CommandBufferUsageFlags,
    ) -> Result<()> {
        let begin_info = vk::CommandBufferBeginInfo::default().flags(flags);
        unsafe { self.device.begin_command_buffer(cmd, &begin_info)? };
        Ok(())
    }

    fn end_command_buffer(&self, cmd: vk::CommandBuffer) -> Result<()> {
        unsafe { self.device.end_command_buffer(cmd)? };
        Ok(())
    }

    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    fn queue_submit(&self, submission: &Submission<'_>, fence: vk::Fence) -> Result<()> {
        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(submission.wait_semaphores)
            .wait_dst_stage_mask(submission.wait_stages)
            .command_buffers(submission.command_buffers)
            .signal_semaphores(submission.signal_semaphores);
        unsafe {
            self.device
                .queue_submit(self.graphics_queue, &[submit_info], fence)?;
        }
        Ok(())
    }

    fn queue_wait_idle(&self) -> Result<()> {
        unsafe { self.device.queue_wait_idle(self.graphics_queue)? };
        Ok(())
    }

    fn create_fence(&self, signaled: bool) -> Result<vk::Fence> {
        unsafe { sync::create_fence(&self.device, signaled) }
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        unsafe { self.device.destroy_fence(fence, None) };
    }

    fn create_semaphore(&self) -> Result<vk::Semaphore> {
        unsafe { sync::create_semaphore(&self.device) }
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        unsafe { self.device.destroy_semaphore(semaphore, None) };
    }

    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    fn wait_for_fence(&self, fence: vk::Fence, timeout_ns: u64) -> Result<FenceStatus> {
        match unsafe { self.device.wait_for_fences(&[fence], true, timeout_ns) } {
            Ok(()) => Ok(FenceStatus::Signaled),
            Err(vk::Result::TIMEOUT) => Ok(FenceStatus::TimedOut),
            Err(e) => Err(e.into()),
        }
    }

    fn reset_fence(&self, fence: vk::Fence) -> Result<()> {
        unsafe { self.device.reset_fences(&[fence])? };
        Ok(())
    }

    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        timeout_ns: u64,
        semaphore: vk::Semaphore,
    ) -> Result<(u32, bool)> {
        let result = unsafe {
            self.swapchain_loader.acquire_next_image(
                swapchain,
                timeout_ns,
                semaphore,
                vk::Fence::null(),
            )?
        };
        Ok(result)
    }

    fn queue_present(
        &self,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait_semaphores: &[vk::Semaphore],
    ) -> Result<bool> {
        let swapchains = [swapchain];
        let indices = [image_index];
        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&indices);

        match unsafe {
            self.swapchain_loader
                .queue_present(self.graphics_queue, &present_info)
        } {
            Ok(suboptimal) => Ok(suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(true),
            Err(e) => Err(e.into()),
        }
    }

    fn cmd_image_barrier(&self, cmd: vk::CommandBuffer, barrier: &ImageBarrier) {
        unsafe {
            self.device.cmd_pipeline_barrier(
                cmd,
                barrier.src.stage,
                barrier.dst.stage,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[barrier.to_vk()],
            );
        }
    }

    fn cmd_buffer_barrier(&self, cmd: vk::CommandBuffer, barrier: &BufferBarrier) {
        unsafe {
            self.device.cmd_pipeline_barrier(
                cmd,
                barrier.src_stage,
                barrier.dst_stage,
                vk::DependencyFlags::empty(),
                &[],
                &[barrier.to_vk()],
                &[],
            );
        }
    }

    fn cmd_update_buffer(
        &self,
        cmd: vk::CommandBuffer,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        data: &[u8],
    ) {
        unsafe { self.device.cmd_update_buffer(cmd, buffer, offset, data) };
    }

    fn cmd_copy_buffer(
        &self,
        cmd: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Buffer,
        size: vk::DeviceSize,
    ) {
        let region = vk::BufferCopy::default().size(size);
        unsafe { self.device.cmd_copy_buffer(cmd, src, dst, &[region]) };
    }

    fn cmd_begin_render_pass(&self, cmd: vk::CommandBuffer, begin: &RenderPassBegin<'_>) {
        let begin_info = vk::RenderPassBeginInfo::default()
            .render_pass(begin.render_pass)
            .framebuffer(begin.framebuffer)
            .render_area(begin.render_area)
            .clear_values(begin.clear_values);
        unsafe {
            self.device
                .cmd_begin_render_pass(cmd, &begin_info, vk::SubpassContents::INLINE);
        }
    }

    fn cmd_end_render_pass(&self, cmd: vk::CommandBuffer) {
        unsafe { self.device.cmd_end_render_pass(cmd) };
    }

    fn cmd_set_viewport(&self, cmd: vk::CommandBuffer, extent: vk::Extent2D) {
        let viewport = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };
        let scissor = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent,
        };
        unsafe {
            self.device.cmd_set_viewport(cmd, 0, &[viewport]);
            self.device.cmd_set_scissor(cmd, 0, &[scissor]);
        }
    }

    fn cmd_bind_pipeline(
        &self,
        cmd: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        pipeline: vk::Pipeline,
    ) {
        unsafe { self.device.cmd_bind_pipeline(cmd, bind_point, pipeline) };
    }

    fn cmd_bind_descriptor_sets(
        &self,
        cmd: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
        first_set: u32,
        sets: &[vk::DescriptorSet],
    ) {
        unsafe {
            self.device
                .cmd_bind_descriptor_sets(cmd, bind_point, layout, first_set, sets, &[]);
        }
    }

    fn cmd_push_constants(
        &self,
        cmd: vk::CommandBuffer,
        layout: vk::PipelineLayout,
        stages: vk::ShaderStageFlags,
        offset: u32,
        data: &[u8],
    ) {
        unsafe { self.device.cmd_push_constants(cmd, layout, stages, offset, data) };
    }

    fn cmd_bind_vertex_buffer(
        &self,
        cmd: vk::CommandBuffer,
        binding: u32,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
    ) {
        unsafe {
            self.device
                .cmd_bind_vertex_buffers(cmd, binding, &[buffer], &[offset]);
        }
    }

    fn cmd_bind_index_buffer(
        &self,
        cmd: vk::CommandBuffer,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        index_type: vk::IndexType,
    ) {
        unsafe {
            self.device
                .cmd_bind_index_buffer(cmd, buffer, offset, index_type);
        }
    }

    fn cmd_draw(
        &self,
        cmd: vk::CommandBuffer,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    ) {
        unsafe {
            self.device
                .cmd_draw(cmd, vertex_count, instance_count, first_vertex, first_instance);
        }
    }

    fn cmd_draw_indexed(
        &self,
        cmd: vk::CommandBuffer,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) {
        unsafe {
            self.device.cmd_draw_indexed(
                cmd,
                index_count,
                instance_count,
                first_index,
                vertex_offset,
                first_instance,
            );
        }
    }

    fn cmd_trace_rays(
        &self,
        cmd: vk::CommandBuffer,
        regions: &SbtRegions,
        width: u32,
        height: u32,
        depth: u32,
    ) -> Result<()> {
        let rt = self.ray_tracing.as_ref().ok_or_else(|| {
            GpuError::ExtensionNotSupported("VK_KHR_ray_tracing_pipeline".to_string())
        })?;
        unsafe {
            rt.pipeline.cmd_trace_rays(
                cmd,
                &regions.raygen,
                &regions.miss,
                &regions.hit,
                &regions.callable,
                width,
                height,
                depth,
            );
        }
        Ok(())
    }
}

/// Builder for creating a GPU context.
pub struct GpuContextBuilder {
    app_name: String,
    enable_validation: bool,
    enable_api_dump: bool,
    enable_ray_tracing: bool,
}

impl Default for GpuContextBuilder {
    fn default() -> Self {
        Self {
            app_name: "rtrt".to_string(),
            enable_validation: cfg!(debug_assertions),
            enable_api_dump: false,
            enable_ray_tracing: true,
        }
    }
}

impl GpuContextBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the application name.
    pub fn app_name(mut self, name: impl Into<String>) -> Self {
        self.app_name = name.into();
        self
    }

    /// Enable or disable validation layers.
    pub fn validation(mut self, enable: bool) -> Self {
        self.enable_validation = enable;
        self
    }

    /// Enable or disable the API dump layer.
    pub fn api_dump(mut self, enable: bool) -> Self {
        self.enable_api_dump = enable;
        self
    }

    /// Request ray tracing. Ignored when the device lacks the extensions.
    pub fn ray_tracing(mut self, enable: bool) -> Self {
        self.enable_ray_tracing = enable;
        self
    }

    /// Build the GPU context.
    pub fn build(self) -> Result<GpuContext> {
        // Load Vulkan entry point
        let entry = unsafe { ash::Entry::load() }
            .map_err(|e| GpuError::Other(format!("Failed to load Vulkan: {e}")))?;

        let instance = unsafe {
            create_instance(
                &entry,
                &self.app_name,
                self.enable_validation,
                self.enable_api_dump,
            )
        }?;

        let physical_device = unsafe { select_physical_device(&instance) }?;

        let capabilities = unsafe { GpuCapabilities::query(&instance, physical_device) };

        if !capabilities.meets_requirements() {
            return Err(GpuError::NoSuitableDevice);
        }

        tracing::info!("Selected GPU: {}", capabilities.summary());

        let use_ray_tracing = self.enable_ray_tracing && capabilities.supports_ray_tracing;
        if self.enable_ray_tracing && !use_ray_tracing {
            tracing::warn!("Ray tracing requested but not supported; rasterization only");
        }

        let graphics_queue_family =
            unsafe { find_graphics_queue_family(&instance, physical_device) }?;

        let (device, graphics_queue) = unsafe {
            create_device(
                &instance,
                physical_device,
                graphics_queue_family,
                use_ray_tracing,
            )?
        };

        let device = Arc::new(device);

        let allocator = unsafe { GpuAllocator::new(&instance, device.clone(), physical_device) }?;

        // Individual resets let every begin() implicitly reset its buffer
        let command_pool = unsafe {
            CommandPool::new(
                &device,
                graphics_queue_family,
                vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
            )
        }?;

        let swapchain_loader = ash::khr::swapchain::Device::new(&instance, &device);

        let ray_tracing = use_ray_tracing.then(|| RayTracingLoaders {
            acceleration_structure: ash::khr::acceleration_structure::Device::new(
                &instance, &device,
            ),
            pipeline: ash::khr::ray_tracing_pipeline::Device::new(&instance, &device),
            properties: unsafe { RayTracingCapabilities::query(&instance, physical_device) },
        });

        if let Some(rt) = &ray_tracing {
            tracing::debug!(?rt.properties, "Ray tracing enabled");
        }

        Ok(GpuContext {
            entry,
            instance,
            physical_device,
            device,
            capabilities,
            allocator: Mutex::new(allocator),
            graphics_queue_family,
            graphics_queue,
            command_pool,
            swapchain_loader,
            ray_tracing,
        })
    }
}

/// Find a queue family that supports graphics and compute.
///
/// # Safety
/// The instance and physical device must be valid.
unsafe fn find_graphics_queue_family(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
) -> Result<u32> {
    let queue_families = instance.get_physical_device_queue_family_properties(physical_device);

    queue_families
        .iter()
        .position(|family| {
            family
                .queue_flags
                .contains(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE)
        })
        .map(|i| i as u32)
        .ok_or(GpuError::NoSuitableDevice)
}

/// Required device extensions.
fn required_device_extensions(ray_tracing: bool) -> Vec<&'static CStr> {
    let mut extensions = vec![ash::khr::swapchain::NAME];
    if ray_tracing {
        extensions.extend(RAY_TRACING_EXTENSIONS);
    }
    extensions
}

/// Create the logical device and retrieve the graphics queue.
///
/// # Safety
/// The instance and physical device must be valid.
unsafe fn create_device(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    queue_family: u32,
    ray_tracing: bool,
) -> Result<(ash::Device, vk::Queue)> {
    let queue_priority = 1.0_f32;
    let queue_create_infos = [vk::DeviceQueueCreateInfo::default()
        .queue_family_index(queue_family)
        .queue_priorities(std::slice::from_ref(&queue_priority))];

    let extensions = required_device_extensions(ray_tracing);
    let extension_names: Vec<*const i8> = extensions.iter().map(|ext| ext.as_ptr()).collect();

    let mut vulkan_1_2_features = vk::PhysicalDeviceVulkan12Features::default()
        .buffer_device_address(true)
        .descriptor_indexing(true)
        .scalar_block_layout(true)
        .runtime_descriptor_array(true)
        .shader_sampled_image_array_non_uniform_indexing(true);

    let mut acceleration_structure_features =
        vk::PhysicalDeviceAccelerationStructureFeaturesKHR::default().acceleration_structure(true);
    let mut ray_tracing_features =
        vk::PhysicalDeviceRayTracingPipelineFeaturesKHR::default().ray_tracing_pipeline(true);

    let features = vk::PhysicalDeviceFeatures::default()
        .shader_int64(true)
        .fill_mode_non_solid(true);

    let mut features2 = vk::PhysicalDeviceFeatures2::default()
        .features(features)
        .push_next(&mut vulkan_1_2_features);
    if ray_tracing {
        features2 = features2
            .push_next(&mut acceleration_structure_features)
            .push_next(&mut ray_tracing_features);
    }

    let device_create_info = vk::DeviceCreateInfo::default()
        .queue_create_infos(&queue_create_infos)
        .enabled_extension_names(&extension_names)
        .push_next(&mut features2);

    let device = instance
        .create_device(physical_device, &device_create_info, None)
        .map_err(GpuError::from)?;

    let graphics_queue = device.get_device_queue(queue_family, 0);

    Ok((device, graphics_queue))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_extensions_include_ray_tracing_only_when_requested() {
        assert_eq!(required_device_extensions(false), vec![ash::khr::swapchain::NAME]);

        let with_rt = required_device_extensions(true);
        assert_eq!(with_rt.len(), 1 + RAY_TRACING_EXTENSIONS.len());
        assert!(with_rt.contains(&ash::khr::ray_tracing_pipeline::NAME));
    }
}
