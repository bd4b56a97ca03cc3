//! GPU error types.

use ash::vk;
use thiserror::Error;

/// GPU-related errors.
#[derive(Error, Debug)]
pub enum GpuError {
    /// Vulkan error.
    #[error("Vulkan error: {0}")]
    Vulkan(#[from] vk::Result),

    /// No suitable GPU found.
    #[error("No suitable GPU found")]
    NoSuitableDevice,

    /// Required extension not supported.
    #[error("Required extension not supported: {0}")]
    ExtensionNotSupported(String),

    /// Memory allocation failed.
    #[error("Memory allocation failed: {0}")]
    AllocationFailed(String),

    /// Surface creation failed.
    #[error("Surface creation failed: {0}")]
    SurfaceCreation(String),

    /// Swapchain creation failed.
    #[error("Swapchain creation failed: {0}")]
    SwapchainCreation(String),

    /// Shader module creation failed.
    #[error("Shader module creation failed: {0}")]
    ShaderCompilation(String),

    /// Pipeline creation failed.
    #[error("Pipeline creation failed: {0}")]
    PipelineCreation(String),

    /// Invalid state.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

impl GpuError {
    /// Whether this error means the swapchain no longer matches the surface.
    pub fn is_out_of_date(&self) -> bool {
        matches!(
            self,
            Self::Vulkan(vk::Result::ERROR_OUT_OF_DATE_KHR | vk::Result::SUBOPTIMAL_KHR)
        )
    }

    /// Whether the device was lost and nothing submitted to it can complete.
    pub fn is_device_lost(&self) -> bool {
        matches!(self, Self::Vulkan(vk::Result::ERROR_DEVICE_LOST))
    }
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, GpuError>;
