//! Recording [`DeviceContext`] for tests.
//!
//! `MockDevice` never touches a GPU. It hands out fresh handles, appends every
//! call to an ordered log and simulates fence completion according to a
//! [`FenceBehavior`]. Failures can be injected at allocation, begin, end and
//! submit, and acquire/present outcomes can be scripted.
//!
//! Clear values of a render pass begin are decoded by position: the first is
//! read as a color clear, the rest as depth/stencil clears.

use crate::device::{DeviceContext, FenceStatus, RenderPassBegin, SbtRegions, Submission};
use crate::error::{GpuError, Result};
use crate::transition::{BufferBarrier, ImageBarrier};
use ash::vk;
use ash::vk::Handle;
use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;

/// How an unsignaled fence behaves when waited on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FenceBehavior {
    /// Submitted work completes at once; the first wait sees it signaled.
    Immediate,
    /// The wait that makes `n` polls since the fence was last reset signals it.
    SignalAfterPolls(u64),
    /// Never signals by itself; each wait blocks for its full timeout.
    /// Only [`MockDevice::signal_fence`] releases it.
    Hang,
    /// The `n`-th poll fails with the given result.
    FailAfterPolls(u64, vk::Result),
}

/// A decoded clear value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RecordedClear {
    Color([f32; 4]),
    DepthStencil { depth: f32, stencil: u32 },
}

/// One call made on the mock, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum Recorded {
    AllocateCommandBuffer(vk::CommandBuffer),
    FreeCommandBuffer(vk::CommandBuffer),
    Begin {
        cmd: vk::CommandBuffer,
        flags: vk::CommandBufferUsageFlags,
    },
    End(vk::CommandBuffer),
    Submit {
        command_buffers: Vec<vk::CommandBuffer>,
        wait_semaphores: Vec<vk::Semaphore>,
        wait_stages: Vec<vk::PipelineStageFlags>,
        signal_semaphores: Vec<vk::Semaphore>,
        fence: vk::Fence,
    },
    QueueWaitIdle,
    CreateFence {
        fence: vk::Fence,
        signaled: bool,
    },
    DestroyFence(vk::Fence),
    CreateSemaphore(vk::Semaphore),
    DestroySemaphore(vk::Semaphore),
    WaitForFence {
        fence: vk::Fence,
        timeout_ns: u64,
    },
    ResetFence(vk::Fence),
    Acquire {
        swapchain: vk::SwapchainKHR,
        semaphore: vk::Semaphore,
        timeout_ns: u64,
    },
    Present {
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait_semaphores: Vec<vk::Semaphore>,
    },
    ImageBarrier {
        cmd: vk::CommandBuffer,
        image: vk::Image,
        old_layout: vk::ImageLayout,
        new_layout: vk::ImageLayout,
        src_access: vk::AccessFlags,
        dst_access: vk::AccessFlags,
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
    },
    BufferBarrier {
        cmd: vk::CommandBuffer,
        barrier: BufferBarrier,
    },
    UpdateBuffer {
        cmd: vk::CommandBuffer,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        data: Vec<u8>,
    },
    CopyBuffer {
        cmd: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Buffer,
        size: vk::DeviceSize,
    },
    BeginRenderPass {
        cmd: vk::CommandBuffer,
        render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        width: u32,
        height: u32,
        clear_values: Vec<RecordedClear>,
    },
    EndRenderPass(vk::CommandBuffer),
    SetViewport {
        cmd: vk::CommandBuffer,
        width: u32,
        height: u32,
    },
    BindPipeline {
        cmd: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        pipeline: vk::Pipeline,
    },
    BindDescriptorSets {
        cmd: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
        first_set: u32,
        sets: Vec<vk::DescriptorSet>,
    },
    PushConstants {
        cmd: vk::CommandBuffer,
        layout: vk::PipelineLayout,
        stages: vk::ShaderStageFlags,
        offset: u32,
        data: Vec<u8>,
    },
    BindVertexBuffer {
        cmd: vk::CommandBuffer,
        binding: u32,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
    },
    BindIndexBuffer {
        cmd: vk::CommandBuffer,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        index_type: vk::IndexType,
    },
    Draw {
        cmd: vk::CommandBuffer,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    },
    DrawIndexed {
        cmd: vk::CommandBuffer,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    },
    TraceRays {
        cmd: vk::CommandBuffer,
        raygen_address: vk::DeviceAddress,
        width: u32,
        height: u32,
        depth: u32,
    },
}

impl Recorded {
    /// The command buffer a recording call was made into, if any.
    pub fn command_buffer(&self) -> Option<vk::CommandBuffer> {
        match self {
            Self::ImageBarrier { cmd, .. }
            | Self::BufferBarrier { cmd, .. }
            | Self::UpdateBuffer { cmd, .. }
            | Self::CopyBuffer { cmd, .. }
            | Self::BeginRenderPass { cmd, .. }
            | Self::SetViewport { cmd, .. }
            | Self::BindPipeline { cmd, .. }
            | Self::BindDescriptorSets { cmd, .. }
            | Self::PushConstants { cmd, .. }
            | Self::BindVertexBuffer { cmd, .. }
            | Self::BindIndexBuffer { cmd, .. }
            | Self::Draw { cmd, .. }
            | Self::DrawIndexed { cmd, .. }
            | Self::TraceRays { cmd, .. }
            | Self::Begin { cmd, .. } => Some(*cmd),
            Self::End(cmd) | Self::EndRenderPass(cmd) => Some(*cmd),
            _ => None,
        }
    }
}

/// Point at which a one-shot failure can be injected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum FailPoint {
    Allocate,
    Begin,
    End,
    Submit,
}

#[derive(Debug)]
struct FenceState {
    signaled: bool,
    behavior: FenceBehavior,
    /// Polls since the fence last became unsignaled.
    pending_polls: u64,
    /// Polls over the fence's lifetime.
    total_polls: u64,
}

#[derive(Debug)]
struct MockState {
    log: Vec<Recorded>,
    next_handle: u64,
    live_command_buffers: HashSet<vk::CommandBuffer>,
    fences: HashMap<vk::Fence, FenceState>,
    default_fence_behavior: FenceBehavior,
    failures: HashMap<FailPoint, vk::Result>,
    acquire_script: VecDeque<std::result::Result<(u32, bool), vk::Result>>,
    present_script: VecDeque<std::result::Result<bool, vk::Result>>,
    image_count: u32,
    acquire_count: u32,
    ray_tracing: bool,
}

impl MockState {
    fn next_raw(&mut self) -> u64 {
        self.next_handle += 1;
        self.next_handle
    }

    fn take_failure(&mut self, point: FailPoint) -> Result<()> {
        match self.failures.remove(&point) {
            Some(result) => Err(GpuError::Vulkan(result)),
            None => Ok(()),
        }
    }
}

/// A recording, failure-injecting device for tests.
pub struct MockDevice {
    state: Mutex<MockState>,
    fence_signaled: Condvar,
}

impl Default for MockDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDevice {
    /// A device with three swapchain images, ray tracing support and
    /// immediately completing submissions.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState {
                log: Vec::new(),
                next_handle: 0x1000,
                live_command_buffers: HashSet::new(),
                fences: HashMap::new(),
                default_fence_behavior: FenceBehavior::Immediate,
                failures: HashMap::new(),
                acquire_script: VecDeque::new(),
                present_script: VecDeque::new(),
                image_count: 3,
                acquire_count: 0,
                ray_tracing: true,
            }),
            fence_signaled: Condvar::new(),
        }
    }

    /// Make `cmd_trace_rays` fail as on a device without ray tracing.
    pub fn without_ray_tracing(self) -> Self {
        self.state.lock().ray_tracing = false;
        self
    }

    /// Number of images the default acquire cycles through.
    pub fn set_image_count(&self, count: u32) {
        self.state.lock().image_count = count.max(1);
    }

    /// Behavior of fences created from now on.
    pub fn set_default_fence_behavior(&self, behavior: FenceBehavior) {
        self.state.lock().default_fence_behavior = behavior;
    }

    /// Behavior of an existing fence.
    pub fn set_fence_behavior(&self, fence: vk::Fence, behavior: FenceBehavior) {
        if let Some(state) = self.state.lock().fences.get_mut(&fence) {
            state.behavior = behavior;
        }
    }

    /// Signal `fence` as the GPU would on completion. Callable from any thread.
    pub fn signal_fence(&self, fence: vk::Fence) {
        let mut state = self.state.lock();
        if let Some(fence_state) = state.fences.get_mut(&fence) {
            fence_state.signaled = true;
        }
        drop(state);
        self.fence_signaled.notify_all();
    }

    pub fn is_fence_signaled(&self, fence: vk::Fence) -> bool {
        self.state
            .lock()
            .fences
            .get(&fence)
            .is_some_and(|f| f.signaled)
    }

    /// Waits made on `fence` over its lifetime.
    pub fn fence_polls(&self, fence: vk::Fence) -> u64 {
        self.state
            .lock()
            .fences
            .get(&fence)
            .map_or(0, |f| f.total_polls)
    }

    /// Script the next acquire result. Unscripted acquires cycle through the
    /// image indices without suboptimal flag.
    pub fn push_acquire_result(&self, result: std::result::Result<(u32, bool), vk::Result>) {
        self.state.lock().acquire_script.push_back(result);
    }

    /// Script the next present result. Unscripted presents return `Ok(false)`.
    pub fn push_present_result(&self, result: std::result::Result<bool, vk::Result>) {
        self.state.lock().present_script.push_back(result);
    }

    pub fn fail_next_allocate(&self, result: vk::Result) {
        self.state.lock().failures.insert(FailPoint::Allocate, result);
    }

    pub fn fail_next_begin(&self, result: vk::Result) {
        self.state.lock().failures.insert(FailPoint::Begin, result);
    }

    pub fn fail_next_end(&self, result: vk::Result) {
        self.state.lock().failures.insert(FailPoint::End, result);
    }

    pub fn fail_next_submit(&self, result: vk::Result) {
        self.state.lock().failures.insert(FailPoint::Submit, result);
    }

    /// Copy of the call log.
    pub fn log(&self) -> Vec<Recorded> {
        self.state.lock().log.clone()
    }

    /// Drain the call log.
    pub fn take_log(&self) -> Vec<Recorded> {
        std::mem::take(&mut self.state.lock().log)
    }

    /// Recording calls made into `cmd`, excluding begin and end.
    pub fn commands_for(&self, cmd: vk::CommandBuffer) -> Vec<Recorded> {
        self.state
            .lock()
            .log
            .iter()
            .filter(|r| !matches!(r, Recorded::Begin { .. } | Recorded::End(_)))
            .filter(|r| r.command_buffer() == Some(cmd))
            .cloned()
            .collect()
    }

    pub fn submit_count(&self) -> usize {
        self.count(|r| matches!(r, Recorded::Submit { .. }))
    }

    pub fn present_count(&self) -> usize {
        self.count(|r| matches!(r, Recorded::Present { .. }))
    }

    /// Number of logged calls matching `predicate`.
    pub fn count(&self, predicate: impl Fn(&Recorded) -> bool) -> usize {
        self.state.lock().log.iter().filter(|r| predicate(r)).count()
    }

    /// Command buffers allocated and not yet freed.
    pub fn live_command_buffers(&self) -> usize {
        self.state.lock().live_command_buffers.len()
    }

    /// Fences created and not yet destroyed.
    pub fn live_fences(&self) -> usize {
        self.state.lock().fences.len()
    }

    fn record(&self, entry: Recorded) {
        self.state.lock().log.push(entry);
    }
}

fn decode_clear(index: usize, value: &vk::ClearValue) -> RecordedClear {
    // SAFETY: callers put the color clear first and depth/stencil clears after
    // it; every initialized ClearValue covers the depth_stencil bytes.
    unsafe {
        if index == 0 {
            RecordedClear::Color(value.color.float32)
        } else {
            RecordedClear::DepthStencil {
                depth: value.depth_stencil.depth,
                stencil: value.depth_stencil.stencil,
            }
        }
    }
}

impl DeviceContext for MockDevice {
    fn allocate_command_buffer(&self) -> Result<vk::CommandBuffer> {
        let mut state = self.state.lock();
        state.take_failure(FailPoint::Allocate)?;
        let cmd = vk::CommandBuffer::from_raw(state.next_raw());
        state.live_command_buffers.insert(cmd);
        state.log.push(Recorded::AllocateCommandBuffer(cmd));
        Ok(cmd)
    }

    fn free_command_buffer(&self, cmd: vk::CommandBuffer) {
        let mut state = self.state.lock();
        state.live_command_buffers.remove(&cmd);
        state.log.push(Recorded::FreeCommandBuffer(cmd));
    }

    fn begin_command_buffer(
        &self,
        cmd: vk::CommandBuffer,
        flags: vk::CommandBufferUsageFlags,
    ) -> Result<()> {
        let mut state = self.state.lock();
        state.take_failure(FailPoint::Begin)?;
        state.log.push(Recorded::Begin { cmd, flags });
        Ok(())
    }

    fn end_command_buffer(&self, cmd: vk::CommandBuffer) -> Result<()> {
        let mut state = self.state.lock();
        state.take_failure(FailPoint::End)?;
        state.log.push(Recorded::End(cmd));
        Ok(())
    }

    fn queue_submit(&self, submission: &Submission<'_>, fence: vk::Fence) -> Result<()> {
        let mut state = self.state.lock();
        state.take_failure(FailPoint::Submit)?;
        if let Some(fence_state) = state.fences.get_mut(&fence) {
            fence_state.signaled = false;
            fence_state.pending_polls = 0;
        }
        state.log.push(Recorded::Submit {
            command_buffers: submission.command_buffers.to_vec(),
            wait_semaphores: submission.wait_semaphores.to_vec(),
            wait_stages: submission.wait_stages.to_vec(),
            signal_semaphores: submission.signal_semaphores.to_vec(),
            fence,
        });
        Ok(())
    }

    fn queue_wait_idle(&self) -> Result<()> {
        self.record(Recorded::QueueWaitIdle);
        Ok(())
    }

    fn create_fence(&self, signaled: bool) -> Result<vk::Fence> {
        let mut state = self.state.lock();
        let fence = vk::Fence::from_raw(state.next_raw());
        let behavior = state.default_fence_behavior;
        state.fences.insert(
            fence,
            FenceState {
                signaled,
                behavior,
                pending_polls: 0,
                total_polls: 0,
            },
        );
        state.log.push(Recorded::CreateFence { fence, signaled });
        Ok(fence)
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        let mut state = self.state.lock();
        state.fences.remove(&fence);
        state.log.push(Recorded::DestroyFence(fence));
    }

    fn create_semaphore(&self) -> Result<vk::Semaphore> {
        let mut state = self.state.lock();
        let semaphore = vk::Semaphore::from_raw(state.next_raw());
        state.log.push(Recorded::CreateSemaphore(semaphore));
        Ok(semaphore)
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        self.record(Recorded::DestroySemaphore(semaphore));
    }

    fn wait_for_fence(&self, fence: vk::Fence, timeout_ns: u64) -> Result<FenceStatus> {
        let mut state = self.state.lock();
        state.log.push(Recorded::WaitForFence { fence, timeout_ns });

        let fence_state = state
            .fences
            .get_mut(&fence)
            .ok_or_else(|| GpuError::InvalidState(format!("Unknown fence {fence:?}")))?;
        fence_state.total_polls += 1;
        if fence_state.signaled {
            return Ok(FenceStatus::Signaled);
        }
        fence_state.pending_polls += 1;

        match fence_state.behavior {
            FenceBehavior::Immediate => {
                fence_state.signaled = true;
                Ok(FenceStatus::Signaled)
            }
            FenceBehavior::SignalAfterPolls(n) => {
                if fence_state.pending_polls >= n {
                    fence_state.signaled = true;
                    Ok(FenceStatus::Signaled)
                } else {
                    Ok(FenceStatus::TimedOut)
                }
            }
            FenceBehavior::FailAfterPolls(n, result) => {
                if fence_state.pending_polls >= n {
                    Err(GpuError::Vulkan(result))
                } else {
                    Ok(FenceStatus::TimedOut)
                }
            }
            FenceBehavior::Hang => {
                let timeout = Duration::from_nanos(timeout_ns);
                // Woken by signal_fence from another thread
                self.fence_signaled.wait_for(&mut state, timeout);
                let signaled = state.fences.get(&fence).is_some_and(|f| f.signaled);
                Ok(if signaled {
                    FenceStatus::Signaled
                } else {
                    FenceStatus::TimedOut
                })
            }
        }
    }

    fn reset_fence(&self, fence: vk::Fence) -> Result<()> {
        let mut state = self.state.lock();
        let fence_state = state
            .fences
            .get_mut(&fence)
            .ok_or_else(|| GpuError::InvalidState(format!("Unknown fence {fence:?}")))?;
        fence_state.signaled = false;
        fence_state.pending_polls = 0;
        state.log.push(Recorded::ResetFence(fence));
        Ok(())
    }

    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        timeout_ns: u64,
        semaphore: vk::Semaphore,
    ) -> Result<(u32, bool)> {
        let mut state = self.state.lock();
        state.log.push(Recorded::Acquire {
            swapchain,
            semaphore,
            timeout_ns,
        });
        let result = match state.acquire_script.pop_front() {
            Some(scripted) => scripted.map_err(GpuError::Vulkan),
            None => Ok((state.acquire_count % state.image_count, false)),
        };
        if result.is_ok() {
            state.acquire_count += 1;
        }
        result
    }

    fn queue_present(
        &self,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait_semaphores: &[vk::Semaphore],
    ) -> Result<bool> {
        let mut state = self.state.lock();
        state.log.push(Recorded::Present {
            swapchain,
            image_index,
            wait_semaphores: wait_semaphores.to_vec(),
        });
        match state.present_script.pop_front() {
            Some(scripted) => scripted.map_err(GpuError::Vulkan),
            None => Ok(false),
        }
    }

    fn cmd_image_barrier(&self, cmd: vk::CommandBuffer, barrier: &ImageBarrier) {
        self.record(Recorded::ImageBarrier {
            cmd,
            image: barrier.image,
            old_layout: barrier.old_layout(),
            new_layout: barrier.new_layout(),
            src_access: barrier.src.access,
            dst_access: barrier.dst.access,
            src_stage: barrier.src.stage,
            dst_stage: barrier.dst.stage,
        });
    }

    fn cmd_buffer_barrier(&self, cmd: vk::CommandBuffer, barrier: &BufferBarrier) {
        self.record(Recorded::BufferBarrier {
            cmd,
            barrier: *barrier,
        });
    }

    fn cmd_update_buffer(
        &self,
        cmd: vk::CommandBuffer,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        data: &[u8],
    ) {
        self.record(Recorded::UpdateBuffer {
            cmd,
            buffer,
            offset,
            data: data.to_vec(),
        });
    }

    fn cmd_copy_buffer(
        &self,
        cmd: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Buffer,
        size: vk::DeviceSize,
    ) {
        self.record(Recorded::CopyBuffer {
            cmd,
            src,
            dst,
            size,
        });
    }

    fn cmd_begin_render_pass(&self, cmd: vk::CommandBuffer, begin: &RenderPassBegin<'_>) {
        self.record(Recorded::BeginRenderPass {
            cmd,
            render_pass: begin.render_pass,
            framebuffer: begin.framebuffer,
            width: begin.render_area.extent.width,
            height: begin.render_area.extent.height,
            clear_values: begin
                .clear_values
                .iter()
                .enumerate()
                .map(|(i, v)| decode_clear(i, v))
                .collect(),
        });
    }

    fn cmd_end_render_pass(&self, cmd: vk::CommandBuffer) {
        self.record(Recorded::EndRenderPass(cmd));
    }

    fn cmd_set_viewport(&self, cmd: vk::CommandBuffer, extent: vk::Extent2D) {
        self.record(Recorded::SetViewport {
            cmd,
            width: extent.width,
            height: extent.height,
        });
    }

    fn cmd_bind_pipeline(
        &self,
        cmd: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        pipeline: vk::Pipeline,
    ) {
        self.record(Recorded::BindPipeline {
            cmd,
            bind_point,
            pipeline,
        });
    }

    fn cmd_bind_descriptor_sets(
        &self,
        cmd: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
        first_set: u32,
        sets: &[vk::DescriptorSet],
    ) {
        self.record(Recorded::BindDescriptorSets {
            cmd,
            bind_point,
            layout,
            first_set,
            sets: sets.to_vec(),
        });
    }

    fn cmd_push_constants(
        &self,
        cmd: vk::CommandBuffer,
        layout: vk::PipelineLayout,
        stages: vk::ShaderStageFlags,
        offset: u32,
        data: &[u8],
    ) {
        self.record(Recorded::PushConstants {
            cmd,
            layout,
            stages,
            offset,
            data: data.to_vec(),
        });
    }

    fn cmd_bind_vertex_buffer(
        &self,
        cmd: vk::CommandBuffer,
        binding: u32,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
    ) {
        self.record(Recorded::BindVertexBuffer {
            cmd,
            binding,
            buffer,
            offset,
        });
    }

    fn cmd_bind_index_buffer(
        &self,
        cmd: vk::CommandBuffer,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        index_type: vk::IndexType,
    ) {
        self.record(Recorded::BindIndexBuffer {
            cmd,
            buffer,
            offset,
            index_type,
        });
    }

    fn cmd_draw(
        &self,
        cmd: vk::CommandBuffer,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    ) {
        self.record(Recorded::Draw {
            cmd,
            vertex_count,
            instance_count,
            first_vertex,
            first_instance,
        });
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
        self.record(Recorded::DrawIndexed {
            cmd,
            index_count,
            instance_count,
            first_index,
            vertex_offset,
            first_instance,
        });
    }

    fn cmd_trace_rays(
        &self,
        cmd: vk::CommandBuffer,
        regions: &SbtRegions,
        width: u32,
        height: u32,
        depth: u32,
    ) -> Result<()> {
        let mut state = self.state.lock();
        if !state.ray_tracing {
            return Err(GpuError::ExtensionNotSupported(
                "VK_KHR_ray_tracing_pipeline".to_string(),
            ));
        }
        state.log.push(Recorded::TraceRays {
            cmd,
            raygen_address: regions.raygen.device_address,
            width,
            height,
            depth,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Instant;

    #[test]
    fn handles_are_unique() {
        let device = MockDevice::new();
        let a = device.allocate_command_buffer().unwrap();
        let b = device.allocate_command_buffer().unwrap();
        let fence = device.create_fence(false).unwrap();
        assert_ne!(a, b);
        assert_ne!(a.as_raw(), fence.as_raw());
        assert_eq!(device.live_command_buffers(), 2);
    }

    #[test]
    fn submit_unsignals_its_fence() {
        let device = MockDevice::new();
        let fence = device.create_fence(true).unwrap();
        device.set_fence_behavior(fence, FenceBehavior::Hang);

        device.queue_submit(&Submission::default(), fence).unwrap();
        assert!(!device.is_fence_signaled(fence));
        assert_eq!(
            device.wait_for_fence(fence, 0).unwrap(),
            FenceStatus::TimedOut
        );
    }

    #[test]
    fn hung_fence_is_released_from_another_thread() {
        let device = Arc::new(MockDevice::new());
        let fence = device.create_fence(false).unwrap();
        device.set_fence_behavior(fence, FenceBehavior::Hang);

        let signaller = {
            let device = Arc::clone(&device);
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(10));
                device.signal_fence(fence);
            })
        };

        let start = Instant::now();
        while device.wait_for_fence(fence, 1_000_000).unwrap() == FenceStatus::TimedOut {}
        assert!(start.elapsed() >= Duration::from_millis(10));
        signaller.join().unwrap();
    }

    #[test]
    fn scripted_acquire_and_present() {
        let device = MockDevice::new();
        device.set_image_count(2);
        device.push_acquire_result(Err(vk::Result::ERROR_OUT_OF_DATE_KHR));
        let swapchain = vk::SwapchainKHR::null();
        let semaphore = vk::Semaphore::null();

        let err = device
            .acquire_next_image(swapchain, u64::MAX, semaphore)
            .unwrap_err();
        assert!(err.is_out_of_date());
        assert_eq!(
            device.acquire_next_image(swapchain, u64::MAX, semaphore).unwrap(),
            (0, false)
        );
        assert_eq!(
            device.acquire_next_image(swapchain, u64::MAX, semaphore).unwrap(),
            (1, false)
        );
        assert_eq!(
            device.acquire_next_image(swapchain, u64::MAX, semaphore).unwrap(),
            (0, false)
        );

        device.push_present_result(Ok(true));
        assert!(device.queue_present(swapchain, 0, &[]).unwrap());
        assert!(!device.queue_present(swapchain, 1, &[]).unwrap());
    }

    #[test]
    fn injected_failures_fire_once() {
        let device = MockDevice::new();
        device.fail_next_allocate(vk::Result::ERROR_OUT_OF_POOL_MEMORY);
        assert!(device.allocate_command_buffer().is_err());
        assert!(device.allocate_command_buffer().is_ok());
    }

    #[test]
    fn clear_values_decode_by_position() {
        let device = MockDevice::new();
        let cmd = device.allocate_command_buffer().unwrap();
        let clears = [
            vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: [1.0, 1.0, 1.0, 1.0],
                },
            },
            vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: 1.0,
                    stencil: 0,
                },
            },
        ];
        device.cmd_begin_render_pass(
            cmd,
            &RenderPassBegin {
                render_pass: vk::RenderPass::null(),
                framebuffer: vk::Framebuffer::null(),
                render_area: vk::Rect2D::default(),
                clear_values: &clears,
            },
        );

        let commands = device.commands_for(cmd);
        assert!(matches!(
            &commands[0],
            Recorded::BeginRenderPass { clear_values, .. } if clear_values == &vec![
                RecordedClear::Color([1.0; 4]),
                RecordedClear::DepthStencil { depth: 1.0, stencil: 0 },
            ]
        ));
    }
}
