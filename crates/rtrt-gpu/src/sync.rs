//! Synchronization primitives.

use crate::device::{DeviceContext, FenceStatus};
use crate::error::Result;
use ash::vk;

/// Granularity of a polled fence wait: one millisecond.
pub const FENCE_POLL_TIMEOUT_NS: u64 = 1_000_000;

/// Create a semaphore.
///
/// # Safety
/// The device must be valid.
pub unsafe fn create_semaphore(device: &ash::Device) -> Result<vk::Semaphore> {
    let create_info = vk::SemaphoreCreateInfo::default();
    let semaphore = device.create_semaphore(&create_info, None)?;
    Ok(semaphore)
}

/// Create a fence.
///
/// # Safety
/// The device must be valid.
pub unsafe fn create_fence(device: &ash::Device, signaled: bool) -> Result<vk::Fence> {
    let flags = if signaled {
        vk::FenceCreateFlags::SIGNALED
    } else {
        vk::FenceCreateFlags::empty()
    };

    let create_info = vk::FenceCreateInfo::default().flags(flags);
    let fence = device.create_fence(&create_info, None)?;
    Ok(fence)
}

/// Wait for `fence` in bounded slices of `poll_timeout_ns` until it signals.
///
/// A timed-out slice is not an error; the wait is retried with no overall
/// deadline. `on_poll` is called after every slice with the number of slices
/// so far. Returns the total number of slices, at least one.
#[cfg_attr(
    feature = "profiling-tracy",
    tracing::instrument(level = "trace", skip_all)
)]
pub fn poll_fence(
    device: &dyn DeviceContext,
    fence: vk::Fence,
    poll_timeout_ns: u64,
    mut on_poll: impl FnMut(u64),
) -> Result<u64> {
    let mut polls = 0u64;
    loop {
        let status = device.wait_for_fence(fence, poll_timeout_ns)?;
        polls += 1;
        on_poll(polls);
        if status == FenceStatus::Signaled {
            return Ok(polls);
        }
        tracing::trace!(polls, "Fence not signaled yet, polling again");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{FenceBehavior, MockDevice};

    #[test]
    fn signaled_fence_takes_one_poll() {
        let device = MockDevice::new();
        let fence = device.create_fence(true).unwrap();
        let polls = poll_fence(&device, fence, FENCE_POLL_TIMEOUT_NS, |_| {}).unwrap();
        assert_eq!(polls, 1);
    }

    #[test]
    fn slow_fence_is_retried_until_signaled() {
        let device = MockDevice::new();
        let fence = device.create_fence(false).unwrap();
        device.set_fence_behavior(fence, FenceBehavior::SignalAfterPolls(5));

        let mut seen = Vec::new();
        let polls = poll_fence(&device, fence, FENCE_POLL_TIMEOUT_NS, |n| seen.push(n)).unwrap();
        assert_eq!(polls, 5);
        assert_eq!(seen, vec![1, 2, 3, 4, 5]);
        assert!(device.is_fence_signaled(fence));
    }

    #[test]
    fn device_loss_during_wait_is_an_error() {
        let device = MockDevice::new();
        let fence = device.create_fence(false).unwrap();
        device.set_fence_behavior(
            fence,
            FenceBehavior::FailAfterPolls(3, vk::Result::ERROR_DEVICE_LOST),
        );

        let err = poll_fence(&device, fence, FENCE_POLL_TIMEOUT_NS, |_| {}).unwrap_err();
        assert!(err.is_device_lost());
        assert_eq!(device.fence_polls(fence), 3);
    }
}
