//! Frame error taxonomy.

use rtrt_gpu::GpuError;
use thiserror::Error;

/// Where a stale swapchain was detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StalePoint {
    /// Acquire failed; nothing was recorded or submitted.
    Acquire,
    /// The frame was submitted, but present reported out-of-date or the
    /// acquired image was suboptimal.
    Present,
}

/// Reasons a frame could not be rendered.
#[derive(Error, Debug)]
pub enum FrameError {
    /// The swapchain no longer matches the surface and must be recreated.
    #[error("Swapchain is stale (detected at {at:?})")]
    SwapchainStale { at: StalePoint },

    /// Device, allocation or submission failure.
    #[error("Device failure: {0}")]
    Device(#[source] GpuError),

    /// A command could not be recorded; the frame was not submitted.
    #[error("Recording failed: {0}")]
    Recording(#[source] GpuError),
}

impl FrameError {
    /// Whether the frame can be retried after recreating swapchain resources.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::SwapchainStale { .. })
    }
}
