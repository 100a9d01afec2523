//! Render hardware interface for the Nova renderer.
//!
//! This crate provides:
//! - The `RenderDevice` and `CommandList` contracts every backend implements
//! - Generational handles for device objects
//! - Block and bump allocation strategies for sub-allocating device memory
//! - Vertex input layouts derived from declared vertex fields
//! - A headless CPU backend used for testing and tooling

pub mod allocation;
pub mod device;
pub mod error;
pub mod handles;
pub mod headless;
pub mod memory;
pub mod types;
pub mod vertex;

pub use allocation::{
    AllocationInfo, AllocationStrategy, BlockAllocationStrategy, BumpPointAllocationStrategy,
};
pub use device::{CommandList, RenderDevice};
pub use error::{Result, RhiError};
pub use handles::{
    BufferHandle, DescriptorPoolHandle, DescriptorSetHandle, DeviceMemoryHandle, FenceHandle,
    FramebufferHandle, ImageHandle, PipelineHandle, PipelineInterfaceHandle, RenderpassHandle,
    SamplerHandle, SemaphoreHandle,
};
pub use headless::{
    DescriptorPoolSizes, HeadlessCommandList, HeadlessConfig, HeadlessDevice, RecordedCommand,
    Submission,
};
pub use memory::{DeviceMemoryAllocation, DeviceMemoryResource};
pub use types::*;
pub use vertex::{VertexAttribute, VertexLayout};
