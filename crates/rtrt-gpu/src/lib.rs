//! Vulkan layer for the rtrt renderer.
//!
//! This crate provides:
//! - Vulkan instance and device bring-up with optional ray tracing
//! - The [`DeviceContext`] seam every frame component records through
//! - The image layout transition policy
//! - One-shot command recording for setup work
//! - Memory allocation via gpu-allocator
//! - Descriptor, pipeline and render pass builders
//! - Surface and swapchain handling

pub mod capabilities;
pub mod command;
pub mod context;
pub mod descriptors;
pub mod device;
pub mod error;
pub mod instance;
pub mod memory;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
pub mod pipeline;
pub mod render_pass;
pub mod surface;
pub mod swapchain;
pub mod sync;
pub mod transition;

pub use ash;
pub use gpu_allocator::MemoryLocation;

pub use capabilities::{GpuCapabilities, GpuVendor, RayTracingCapabilities};
pub use command::{execute_single_time_commands, upload_buffer, CommandPool, TemporaryCommands};
pub use context::{GpuContext, GpuContextBuilder, RayTracingLoaders};
pub use descriptors::{DescriptorPool, DescriptorSetLayoutBuilder};
pub use device::{DeviceContext, FenceStatus, RenderPassBegin, SbtRegions, Submission};
pub use error::{GpuError, Result};
pub use memory::{GpuAllocator, GpuBuffer, GpuImage};
pub use pipeline::{GraphicsPipeline, GraphicsPipelineConfig};
pub use render_pass::{RenderPassConfig, DEPTH_FORMAT};
pub use surface::{SurfaceCapabilities, SurfaceContext};
pub use swapchain::Swapchain;
pub use sync::{poll_fence, FENCE_POLL_TIMEOUT_NS};
pub use transition::{
    access_flags_for_layout, pipeline_stage_for_layout, record_image_transition, BufferBarrier,
    ImageBarrier, LayoutScope,
};
