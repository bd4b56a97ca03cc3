//! Frame synchronization: one fence and one acquire/present semaphore pair.
//!
//! The design is single-buffered. A frame acquires an image, waits until the
//! previous frame's fence signals, records, then submits and presents. Only
//! one frame is ever outstanding.

use ash::vk;
use rtrt_gpu::{poll_fence, DeviceContext, GpuError, Submission, FENCE_POLL_TIMEOUT_NS};

use crate::error::{FrameError, StalePoint};

/// Stage at which rendering waits for the acquired image.
pub const ACQUIRE_WAIT_STAGE: vk::PipelineStageFlags =
    vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT;

/// Stage at which a release batch waits for an acquire that will not be
/// rendered to.
pub const RELEASE_WAIT_STAGE: vk::PipelineStageFlags = vk::PipelineStageFlags::ALL_COMMANDS;

/// Where the synchronizer is in the frame protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameState {
    /// No frame in progress, or the fence has been confirmed clear.
    Idle,
    /// Waiting for a swapchain image or the previous frame's fence.
    Acquiring,
    /// The command buffer is being recorded for an acquired image.
    Recording,
    /// Work has been handed to the queue and the image to the presentation
    /// engine.
    Submitted,
}

/// Fence and semaphores of the single frame slot.
#[derive(Debug)]
pub struct FrameSynchronizer {
    fence: vk::Fence,
    acquire_semaphore: vk::Semaphore,
    present_semaphore: vk::Semaphore,
    state: FrameState,
    poll_timeout_ns: u64,
    acquired_suboptimal: bool,
    /// An acquire has signaled (or will signal) `acquire_semaphore` and no
    /// submission has waited on it yet.
    acquire_pending: bool,
    last_poll_count: u64,
    total_polls: u64,
}

impl FrameSynchronizer {
    /// Create the primitives. The fence starts signaled so that the first
    /// [`prepare`](Self::prepare) does not block.
    pub fn new(device: &dyn DeviceContext) -> Result<Self, GpuError> {
        let fence = device.create_fence(true)?;
        let acquire_semaphore = match device.create_semaphore() {
            Ok(semaphore) => semaphore,
            Err(e) => {
                device.destroy_fence(fence);
                return Err(e);
            }
        };
        let present_semaphore = match device.create_semaphore() {
            Ok(semaphore) => semaphore,
            Err(e) => {
                device.destroy_semaphore(acquire_semaphore);
                device.destroy_fence(fence);
                return Err(e);
            }
        };

        Ok(Self {
            fence,
            acquire_semaphore,
            present_semaphore,
            state: FrameState::Idle,
            poll_timeout_ns: FENCE_POLL_TIMEOUT_NS,
            acquired_suboptimal: false,
            acquire_pending: false,
            last_poll_count: 0,
            total_polls: 0,
        })
    }

    /// Acquire the next image of `swapchain`, then wait in bounded polls until
    /// the previous frame's fence has signaled.
    ///
    /// Acquire may block indefinitely. A timed-out poll is retried, never
    /// reported. An out-of-date swapchain at acquire is reported before the
    /// fence is touched.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub fn prepare(
        &mut self,
        device: &dyn DeviceContext,
        swapchain: vk::SwapchainKHR,
    ) -> Result<u32, FrameError> {
        self.state = FrameState::Acquiring;

        let (image_index, suboptimal) =
            match device.acquire_next_image(swapchain, u64::MAX, self.acquire_semaphore) {
                Ok(acquired) => acquired,
                Err(e) if e.is_out_of_date() => {
                    self.state = FrameState::Idle;
                    tracing::debug!("Swapchain out of date at acquire");
                    return Err(FrameError::SwapchainStale {
                        at: StalePoint::Acquire,
                    });
                }
                Err(e) => {
                    self.state = FrameState::Idle;
                    return Err(FrameError::Device(e));
                }
            };
        self.acquired_suboptimal = suboptimal;
        self.acquire_pending = true;

        let total = &mut self.total_polls;
        let polls = poll_fence(device, self.fence, self.poll_timeout_ns, |_| *total += 1)
            .map_err(|e| {
                self.state = FrameState::Idle;
                FrameError::Device(e)
            })?;
        self.last_poll_count = polls;

        self.state = FrameState::Idle;
        Ok(image_index)
    }

    /// Mark the acquired frame as being recorded.
    pub fn begin_recording(&mut self) {
        self.state = FrameState::Recording;
    }

    /// Give up on the frame being recorded.
    ///
    /// The acquired image is not presented. If an acquire is outstanding, an
    /// empty batch waits on its semaphore and signals the fence, so the next
    /// [`prepare`](Self::prepare) can reuse the semaphore and does not block.
    pub fn abandon(&mut self, device: &dyn DeviceContext) -> Result<(), GpuError> {
        if self.state == FrameState::Recording {
            tracing::debug!("Frame abandoned before submission");
        }
        self.state = FrameState::Idle;
        self.acquired_suboptimal = false;
        if !self.acquire_pending {
            return Ok(());
        }
        device.reset_fence(self.fence)?;
        self.release_acquire(device)
    }

    /// Reset the fence, submit `cmd` waiting on the acquire semaphore at the
    /// color-attachment-output stage and signaling the present semaphore and
    /// fence, then present `image_index` once the present semaphore signals.
    ///
    /// Only valid once per successful [`prepare`](Self::prepare). If the
    /// submission itself fails, the acquire is released as in
    /// [`abandon`](Self::abandon). A failed fence reset leaves the
    /// synchronizer unusable.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub fn submit(
        &mut self,
        device: &dyn DeviceContext,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        cmd: vk::CommandBuffer,
    ) -> Result<(), FrameError> {
        if !self.acquire_pending || self.state == FrameState::Submitted {
            return Err(FrameError::Device(GpuError::InvalidState(format!(
                "Submit without an acquired image (state {:?})",
                self.state
            ))));
        }

        device.reset_fence(self.fence).map_err(FrameError::Device)?;

        let wait_semaphores = [self.acquire_semaphore];
        let wait_stages = [ACQUIRE_WAIT_STAGE];
        let command_buffers = [cmd];
        let signal_semaphores = [self.present_semaphore];
        let submission = Submission {
            wait_semaphores: &wait_semaphores,
            wait_stages: &wait_stages,
            command_buffers: &command_buffers,
            signal_semaphores: &signal_semaphores,
        };
        if let Err(e) = device.queue_submit(&submission, self.fence) {
            self.state = FrameState::Idle;
            self.acquired_suboptimal = false;
            if let Err(release) = self.release_acquire(device) {
                tracing::error!("Failed to release acquire after failed submit: {release}");
            }
            return Err(FrameError::Device(e));
        }
        self.acquire_pending = false;
        self.state = FrameState::Submitted;

        let stale = match device.queue_present(swapchain, image_index, &signal_semaphores) {
            Ok(stale) => stale,
            Err(e) if e.is_out_of_date() => true,
            Err(e) => return Err(FrameError::Device(e)),
        };

        if stale || std::mem::take(&mut self.acquired_suboptimal) {
            tracing::debug!(image_index, "Swapchain stale at present");
            return Err(FrameError::SwapchainStale {
                at: StalePoint::Present,
            });
        }
        Ok(())
    }

    /// Submit an empty batch that consumes the pending acquire signal and
    /// signals the (already reset) fence.
    fn release_acquire(&mut self, device: &dyn DeviceContext) -> Result<(), GpuError> {
        let wait_semaphores = [self.acquire_semaphore];
        let wait_stages = [RELEASE_WAIT_STAGE];
        let submission = Submission {
            wait_semaphores: &wait_semaphores,
            wait_stages: &wait_stages,
            ..Default::default()
        };
        device.queue_submit(&submission, self.fence)?;
        self.acquire_pending = false;
        Ok(())
    }

    pub fn state(&self) -> FrameState {
        self.state
    }

    pub fn fence(&self) -> vk::Fence {
        self.fence
    }

    pub fn acquire_semaphore(&self) -> vk::Semaphore {
        self.acquire_semaphore
    }

    pub fn present_semaphore(&self) -> vk::Semaphore {
        self.present_semaphore
    }

    /// Fence polls made by the most recent [`prepare`](Self::prepare).
    pub fn last_poll_count(&self) -> u64 {
        self.last_poll_count
    }

    /// Fence polls made over the synchronizer's lifetime, including polls of
    /// waits that ended in an error.
    pub fn total_polls(&self) -> u64 {
        self.total_polls
    }

    /// Override the per-poll timeout.
    pub fn set_poll_timeout(&mut self, timeout_ns: u64) {
        self.poll_timeout_ns = timeout_ns.max(1);
    }

    /// Destroy the fence and semaphores. The device must be idle.
    pub fn destroy(self, device: &dyn DeviceContext) {
        device.destroy_semaphore(self.present_semaphore);
        device.destroy_semaphore(self.acquire_semaphore);
        device.destroy_fence(self.fence);
    }
}
