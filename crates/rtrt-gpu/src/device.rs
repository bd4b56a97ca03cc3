//! Device context: the explicit handle to the device, queue and command pool.
//!
//! Every component of the frame core receives a `&dyn DeviceContext` instead
//! of reaching for global handles. [`GpuContext`](crate::GpuContext) implements
//! it over `ash`; the `mock` feature provides a recording implementation.
//!
//! Handles passed to these methods must originate from the same context.

use ash::vk;

use crate::error::Result;
use crate::transition::{BufferBarrier, ImageBarrier};

/// Outcome of a bounded fence wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FenceStatus {
    /// The fence is signaled.
    Signaled,
    /// The timeout elapsed first. Not an error; callers retry.
    TimedOut,
}

/// One queue submission batch.
#[derive(Debug, Clone, Copy, Default)]
pub struct Submission<'a> {
    pub wait_semaphores: &'a [vk::Semaphore],
    /// One stage mask per wait semaphore.
    pub wait_stages: &'a [vk::PipelineStageFlags],
    pub command_buffers: &'a [vk::CommandBuffer],
    pub signal_semaphores: &'a [vk::Semaphore],
}

/// Parameters of a render pass instance.
#[derive(Clone, Copy)]
pub struct RenderPassBegin<'a> {
    pub render_pass: vk::RenderPass,
    pub framebuffer: vk::Framebuffer,
    pub render_area: vk::Rect2D,
    pub clear_values: &'a [vk::ClearValue],
}

/// Shader binding table regions for a trace-rays dispatch.
#[derive(Debug, Clone, Copy, Default)]
pub struct SbtRegions {
    pub raygen: vk::StridedDeviceAddressRegionKHR,
    pub miss: vk::StridedDeviceAddressRegionKHR,
    pub hit: vk::StridedDeviceAddressRegionKHR,
    pub callable: vk::StridedDeviceAddressRegionKHR,
}

/// Device, queue and command pool operations used by the renderer.
///
/// The queue is the combined graphics/compute/present queue. The command pool
/// allows individual command buffer resets so that beginning a buffer resets
/// it implicitly.
pub trait DeviceContext {
    /// Allocate one primary command buffer from the shared pool.
    fn allocate_command_buffer(&self) -> Result<vk::CommandBuffer>;

    /// Return a command buffer to the shared pool.
    fn free_command_buffer(&self, cmd: vk::CommandBuffer);

    /// Begin recording.
    fn begin_command_buffer(
        &self,
        cmd: vk::CommandBuffer,
        flags: vk::CommandBufferUsageFlags,
    ) -> Result<()>;

    /// End recording.
    fn end_command_buffer(&self, cmd: vk::CommandBuffer) -> Result<()>;

    /// Submit one batch to the queue. `fence` may be null.
    fn queue_submit(&self, submission: &Submission<'_>, fence: vk::Fence) -> Result<()>;

    /// Block until the queue has drained.
    fn queue_wait_idle(&self) -> Result<()>;

    fn create_fence(&self, signaled: bool) -> Result<vk::Fence>;

    fn destroy_fence(&self, fence: vk::Fence);

    fn create_semaphore(&self) -> Result<vk::Semaphore>;

    fn destroy_semaphore(&self, semaphore: vk::Semaphore);

    /// Wait for `fence` for at most `timeout_ns`.
    fn wait_for_fence(&self, fence: vk::Fence, timeout_ns: u64) -> Result<FenceStatus>;

    /// Return `fence` to the unsignaled state.
    fn reset_fence(&self, fence: vk::Fence) -> Result<()>;

    /// Acquire the next presentable image, signaling `semaphore` when it is
    /// ready. Returns the image index and whether the swapchain is suboptimal.
    /// An out-of-date swapchain is reported as `ERROR_OUT_OF_DATE_KHR`.
    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        timeout_ns: u64,
        semaphore: vk::Semaphore,
    ) -> Result<(u32, bool)>;

    /// Queue `image_index` for presentation once `wait_semaphores` signal.
    /// Returns `true` if the swapchain is suboptimal or out of date.
    fn queue_present(
        &self,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait_semaphores: &[vk::Semaphore],
    ) -> Result<bool>;

    fn cmd_image_barrier(&self, cmd: vk::CommandBuffer, barrier: &ImageBarrier);

    fn cmd_buffer_barrier(&self, cmd: vk::CommandBuffer, barrier: &BufferBarrier);

    /// Inline buffer update (at most 65536 bytes, multiple of 4).
    fn cmd_update_buffer(
        &self,
        cmd: vk::CommandBuffer,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        data: &[u8],
    );

    fn cmd_copy_buffer(
        &self,
        cmd: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Buffer,
        size: vk::DeviceSize,
    );

    fn cmd_begin_render_pass(&self, cmd: vk::CommandBuffer, begin: &RenderPassBegin<'_>);

    fn cmd_end_render_pass(&self, cmd: vk::CommandBuffer);

    /// Set the dynamic viewport and scissor to cover `extent`.
    fn cmd_set_viewport(&self, cmd: vk::CommandBuffer, extent: vk::Extent2D);

    fn cmd_bind_pipeline(
        &self,
        cmd: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        pipeline: vk::Pipeline,
    );

    fn cmd_bind_descriptor_sets(
        &self,
        cmd: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
        first_set: u32,
        sets: &[vk::DescriptorSet],
    );

    fn cmd_push_constants(
        &self,
        cmd: vk::CommandBuffer,
        layout: vk::PipelineLayout,
        stages: vk::ShaderStageFlags,
        offset: u32,
        data: &[u8],
    );

    fn cmd_bind_vertex_buffer(
        &self,
        cmd: vk::CommandBuffer,
        binding: u32,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
    );

    fn cmd_bind_index_buffer(
        &self,
        cmd: vk::CommandBuffer,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        index_type: vk::IndexType,
    );

    fn cmd_draw(
        &self,
        cmd: vk::CommandBuffer,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    );

    fn cmd_draw_indexed(
        &self,
        cmd: vk::CommandBuffer,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    );

    /// Dispatch rays. Fails if the device was created without ray tracing.
    fn cmd_trace_rays(
        &self,
        cmd: vk::CommandBuffer,
        regions: &SbtRegions,
        width: u32,
        height: u32,
        depth: u32,
    ) -> Result<()>;
}
