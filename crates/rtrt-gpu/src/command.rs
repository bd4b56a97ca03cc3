//! Command buffer management.
//!
//! [`TemporaryCommands`] is the one-shot recorder used for setup work such as
//! uploads and acceleration structure builds. It blocks until the queue is
//! idle, so it must never be used inside the per-frame path.

use crate::context::GpuContext;
use crate::device::{DeviceContext, Submission};
use crate::error::{GpuError, Result};
use crate::memory::GpuBuffer;
use crate::transition::BufferBarrier;
use ash::vk;
use gpu_allocator::MemoryLocation;

/// Command pool for allocating command buffers.
pub struct CommandPool {
    pool: vk::CommandPool,
    queue_family: u32,
}

impl CommandPool {
    /// Create a new command pool.
    ///
    /// # Safety
    /// The device must be valid and the queue family must exist.
    pub unsafe fn new(
        device: &ash::Device,
        queue_family: u32,
        flags: vk::CommandPoolCreateFlags,
    ) -> Result<Self> {
        let create_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(queue_family)
            .flags(flags);

        let pool = device.create_command_pool(&create_info, None)?;

        Ok(Self { pool, queue_family })
    }

    /// Get the raw pool handle.
    pub fn handle(&self) -> vk::CommandPool {
        self.pool
    }

    /// Get the queue family index.
    pub fn queue_family(&self) -> u32 {
        self.queue_family
    }

    /// Allocate a single command buffer.
    ///
    /// # Safety
    /// The device must be valid.
    pub unsafe fn allocate_command_buffer(
        &self,
        device: &ash::Device,
        level: vk::CommandBufferLevel,
    ) -> Result<vk::CommandBuffer> {
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.pool)
            .level(level)
            .command_buffer_count(1);

        let buffers = device.allocate_command_buffers(&alloc_info)?;
        buffers
            .first()
            .copied()
            .ok_or_else(|| GpuError::Other("Driver returned no command buffer".to_string()))
    }

    /// Destroy the command pool.
    ///
    /// # Safety
    /// The device must be valid and the pool must not be in use.
    pub unsafe fn destroy(&self, device: &ash::Device) {
        device.destroy_command_pool(self.pool, None);
    }
}

/// A command buffer in the recording state, submitted once and then freed.
///
/// Dropping it without calling [`submit_and_wait`](Self::submit_and_wait)
/// frees the buffer without executing anything.
pub struct TemporaryCommands<'a> {
    device: &'a dyn DeviceContext,
    cmd: vk::CommandBuffer,
    submitted: bool,
}

impl<'a> TemporaryCommands<'a> {
    /// Allocate a primary command buffer and begin it for one-time submission.
    pub fn begin(device: &'a dyn DeviceContext) -> Result<Self> {
        let cmd = device.allocate_command_buffer()?;
        if let Err(e) =
            device.begin_command_buffer(cmd, vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT)
        {
            device.free_command_buffer(cmd);
            return Err(e);
        }
        Ok(Self {
            device,
            cmd,
            submitted: false,
        })
    }

    /// The command buffer to record into.
    pub fn handle(&self) -> vk::CommandBuffer {
        self.cmd
    }

    /// End recording, submit without semaphores or fence, wait for the queue
    /// to go idle and free the buffer.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub fn submit_and_wait(mut self) -> Result<()> {
        // Freed by Drop whichever way this returns
        self.submitted = true;
        self.device.end_command_buffer(self.cmd)?;

        let command_buffers = [self.cmd];
        let submission = Submission {
            command_buffers: &command_buffers,
            ..Default::default()
        };
        self.device.queue_submit(&submission, vk::Fence::null())?;
        self.device.queue_wait_idle()
    }
}

impl Drop for TemporaryCommands<'_> {
    fn drop(&mut self) {
        if !self.submitted {
            tracing::debug!("Temporary command buffer dropped without submission");
        }
        self.device.free_command_buffer(self.cmd);
    }
}

/// Record commands with `f` into a temporary buffer and execute them
/// synchronously.
pub fn execute_single_time_commands<F>(device: &dyn DeviceContext, f: F) -> Result<()>
where
    F: FnOnce(vk::CommandBuffer),
{
    let commands = TemporaryCommands::begin(device)?;
    f(commands.handle());
    commands.submit_and_wait()
}

/// Record a copy of `size` bytes from `staging` into `dst`, followed by a
/// barrier that makes the copy visible to `dst_stage` reads.
pub fn record_staged_copy(
    device: &dyn DeviceContext,
    cmd: vk::CommandBuffer,
    staging: vk::Buffer,
    dst: vk::Buffer,
    size: vk::DeviceSize,
    dst_access: vk::AccessFlags,
    dst_stage: vk::PipelineStageFlags,
) {
    device.cmd_copy_buffer(cmd, staging, dst, size);
    device.cmd_buffer_barrier(
        cmd,
        &BufferBarrier {
            buffer: dst,
            offset: 0,
            size,
            src_access: vk::AccessFlags::TRANSFER_WRITE,
            dst_access,
            src_stage: vk::PipelineStageFlags::TRANSFER,
            dst_stage,
        },
    );
}

/// Create a device-local buffer holding `data`, copied through a staging
/// buffer with a temporary command buffer.
pub fn upload_buffer<T: bytemuck::Pod>(
    gpu: &GpuContext,
    data: &[T],
    usage: vk::BufferUsageFlags,
    name: &str,
) -> Result<GpuBuffer> {
    let bytes: &[u8] = bytemuck::cast_slice(data);
    let size = bytes.len() as vk::DeviceSize;
    if size == 0 {
        return Err(GpuError::InvalidState(format!("{name}: empty upload")));
    }

    let mut allocator = gpu.allocator().lock();
    let mut staging = allocator.create_buffer(
        size,
        vk::BufferUsageFlags::TRANSFER_SRC,
        MemoryLocation::CpuToGpu,
        &format!("{name} staging"),
    )?;
    let mut buffer = match allocator.create_buffer(
        size,
        usage | vk::BufferUsageFlags::TRANSFER_DST,
        MemoryLocation::GpuOnly,
        name,
    ) {
        Ok(buffer) => buffer,
        Err(e) => {
            allocator.free_buffer(&mut staging)?;
            return Err(e);
        }
    };
    drop(allocator);

    let copied = staging.write_bytes(0, bytes).and_then(|()| {
        let commands = TemporaryCommands::begin(gpu)?;
        record_staged_copy(
            gpu,
            commands.handle(),
            staging.buffer,
            buffer.buffer,
            size,
            vk::AccessFlags::MEMORY_READ,
            vk::PipelineStageFlags::ALL_COMMANDS,
        );
        commands.submit_and_wait()
    });

    let mut allocator = gpu.allocator().lock();
    allocator.free_buffer(&mut staging)?;
    if let Err(e) = copied {
        allocator.free_buffer(&mut buffer)?;
        return Err(e);
    }

    tracing::debug!(name, size, "Uploaded buffer");
    Ok(buffer)
}
