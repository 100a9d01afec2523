//! Vulkan backend errors.

use ash::vk;
use nova_rhi::RhiError;
use thiserror::Error;

/// Errors raised while creating or driving the Vulkan device.
#[derive(Error, Debug)]
pub enum VulkanError {
    /// Vulkan error.
    #[error("Vulkan error: {0}")]
    Vulkan(#[from] vk::Result),

    /// The Vulkan loader could not be found.
    #[error("Failed to load Vulkan: {0}")]
    Loading(String),

    /// No suitable GPU found.
    #[error("No suitable GPU found")]
    NoSuitableDevice,

    /// Memory allocation failed.
    #[error("Memory allocation failed: {0}")]
    Allocation(String),

    /// Surface creation failed.
    #[error("Surface creation failed: {0}")]
    SurfaceCreation(String),

    /// The surface reports no formats.
    #[error("Surface supports no formats")]
    NoSurfaceFormat,
}

impl From<gpu_allocator::AllocationError> for VulkanError {
    fn from(error: gpu_allocator::AllocationError) -> Self {
        Self::Allocation(error.to_string())
    }
}

impl From<VulkanError> for RhiError {
    fn from(error: VulkanError) -> Self {
        match error {
            VulkanError::Vulkan(
                vk::Result::ERROR_OUT_OF_DATE_KHR | vk::Result::ERROR_SURFACE_LOST_KHR,
            )
            | VulkanError::SurfaceCreation(_)
            | VulkanError::NoSurfaceFormat => Self::Swapchain(error.to_string()),
            VulkanError::Vulkan(
                vk::Result::ERROR_OUT_OF_DEVICE_MEMORY | vk::Result::ERROR_OUT_OF_HOST_MEMORY,
            ) => Self::OutOfDeviceMemory { requested: 0 },
            other => Self::Backend(other.to_string()),
        }
    }
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, VulkanError>;

/// Convert a raw Vulkan result into an RHI error.
pub(crate) fn rhi(result: vk::Result) -> RhiError {
    VulkanError::Vulkan(result).into()
}
