//! Vulkan backend for the Nova render hardware interface.
//!
//! This crate provides:
//! - Vulkan instance, device and queue setup for a window surface
//! - GPU capability detection
//! - Raw buffer memory blocks and `gpu-allocator` backed render targets
//! - Command lists recorded on the CPU and replayed into per-frame pools
//! - Swapchain handling

pub mod capabilities;
pub mod command;
pub mod convert;
pub mod descriptors;
pub mod device;
pub mod error;
pub mod instance;
pub mod memory;
pub mod objects;
pub mod pipeline;
pub mod swapchain;
pub mod sync;

pub use command::VulkanCommandList;
pub use device::{QueueFamilies, VulkanRenderDevice};
pub use error::{Result, VulkanError};
