//! Backend-agnostic descriptions of device objects and commands.

use bitflags::bitflags;
use glam::UVec2;
use nova_core::shaderpack::PixelFormat;

use crate::handles::{BufferHandle, DescriptorSetHandle, ImageHandle, SamplerHandle};

/// GPU vendor family.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum DeviceArchitecture {
    #[default]
    Unknown,
    Amd,
    Nvidia,
    Intel,
}

impl DeviceArchitecture {
    /// Identify the architecture from a PCI vendor ID.
    pub const fn from_vendor_id(id: u32) -> Self {
        match id {
            0x10DE => Self::Nvidia,
            0x1002 => Self::Amd,
            0x8086 => Self::Intel,
            _ => Self::Unknown,
        }
    }
}

/// What the renderer needs to know about the device it runs on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub architecture: DeviceArchitecture,
    pub device_name: String,
    pub max_texture_size: u32,
    pub max_color_attachments: u32,
    /// CPU and GPU share one memory pool
    pub is_uma: bool,
    pub supports_raytracing: bool,
    pub supports_mesh_shaders: bool,
}

impl Default for DeviceInfo {
    fn default() -> Self {
        Self {
            architecture: DeviceArchitecture::Unknown,
            device_name: String::new(),
            max_texture_size: 16384,
            max_color_attachments: 8,
            is_uma: false,
            supports_raytracing: false,
            supports_mesh_shaders: false,
        }
    }
}

/// How memory will be accessed. Backends map this to a memory type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryUsage {
    /// Only the GPU touches the memory
    DeviceOnly,
    /// The CPU writes occasionally, the GPU reads often
    LowFrequencyUpload,
    /// Persistently mapped memory the CPU writes every frame
    StagingBuffer,
}

impl MemoryUsage {
    pub const fn is_host_visible(self) -> bool {
        !matches!(self, Self::DeviceOnly)
    }
}

bitflags! {
    /// Kinds of object a memory allocation may back.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ObjectType: u32 {
        const BUFFER = 1 << 0;
        const TEXTURE = 1 << 1;
        const RENDER_TEXTURE = 1 << 2;
        const SWAPCHAIN_SURFACE = 1 << 3;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferUsage {
    UniformBuffer,
    IndexBuffer,
    VertexBuffer,
    StagingBuffer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferCreateInfo {
    pub size: u64,
    pub buffer_usage: BufferUsage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageUsage {
    /// Written by renderpasses, sampled by later passes
    RenderTarget,
    /// Uploaded once and sampled
    SampledImage,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageCreateInfo {
    pub name: String,
    pub pixel_format: PixelFormat,
    pub size: UVec2,
    pub usage: ImageUsage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueType {
    Graphics,
    Transfer,
    AsyncCompute,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandListLevel {
    /// Submitted directly to a queue
    Primary,
    /// Executed from a primary command list
    Secondary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexType {
    U16,
    U32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DescriptorType {
    CombinedImageSampler,
    UniformBuffer,
    StorageBuffer,
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ShaderStage: u32 {
        const VERTEX = 1 << 0;
        const TESSELLATION_CONTROL = 1 << 1;
        const TESSELLATION_EVALUATION = 1 << 2;
        const GEOMETRY = 1 << 3;
        const FRAGMENT = 1 << 4;
        const COMPUTE = 1 << 5;
    }
}

/// A shader resource slot, as reflected from the shaders that use it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceBindingDescription {
    pub set: u32,
    pub binding: u32,
    /// Array length, one for non-arrays
    pub count: u32,
    pub descriptor_type: DescriptorType,
    pub stages: ShaderStage,
    /// Runtime-sized array whose length is chosen when the set is allocated
    pub is_unbounded: bool,
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PipelineStage: u32 {
        const TOP_OF_PIPE = 1 << 0;
        const DRAW_INDIRECT = 1 << 1;
        const VERTEX_INPUT = 1 << 2;
        const VERTEX_SHADER = 1 << 3;
        const TESSELLATION_CONTROL_SHADER = 1 << 4;
        const TESSELLATION_EVALUATION_SHADER = 1 << 5;
        const GEOMETRY_SHADER = 1 << 6;
        const FRAGMENT_SHADER = 1 << 7;
        const EARLY_FRAGMENT_TESTS = 1 << 8;
        const LATE_FRAGMENT_TESTS = 1 << 9;
        const COLOR_ATTACHMENT_OUTPUT = 1 << 10;
        const COMPUTE_SHADER = 1 << 11;
        const TRANSFER = 1 << 12;
        const BOTTOM_OF_PIPE = 1 << 13;
        const HOST = 1 << 14;
        const ALL_GRAPHICS = 1 << 15;
        const ALL_COMMANDS = 1 << 16;
    }
}

/// How a resource is being used at a point in a command list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceState {
    Undefined,
    Common,
    CopySource,
    CopyDestination,
    UniformBuffer,
    VertexBuffer,
    IndexBuffer,
    ShaderRead,
    ShaderWrite,
    RenderTarget,
    DepthWrite,
    DepthRead,
    PresentSource,
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ResourceAccess: u32 {
        const INDIRECT_COMMAND_READ = 1 << 0;
        const INDEX_READ = 1 << 1;
        const VERTEX_ATTRIBUTE_READ = 1 << 2;
        const UNIFORM_READ = 1 << 3;
        const INPUT_ATTACHMENT_READ = 1 << 4;
        const SHADER_READ = 1 << 5;
        const SHADER_WRITE = 1 << 6;
        const COLOR_ATTACHMENT_READ = 1 << 7;
        const COLOR_ATTACHMENT_WRITE = 1 << 8;
        const DEPTH_STENCIL_ATTACHMENT_READ = 1 << 9;
        const DEPTH_STENCIL_ATTACHMENT_WRITE = 1 << 10;
        const COPY_READ = 1 << 11;
        const COPY_WRITE = 1 << 12;
        const HOST_READ = 1 << 13;
        const HOST_WRITE = 1 << 14;
        const MEMORY_READ = 1 << 15;
        const MEMORY_WRITE = 1 << 16;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ImageAspect: u32 {
        const COLOR = 1 << 0;
        const DEPTH = 1 << 1;
        const STENCIL = 1 << 2;
    }
}

/// The resource a barrier applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BarrierResource {
    Buffer {
        buffer: BufferHandle,
        offset: u64,
        size: u64,
    },
    Image {
        image: ImageHandle,
        aspect: ImageAspect,
    },
}

/// An explicit state transition. The RHI never infers these.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceBarrier {
    pub resource: BarrierResource,
    pub old_state: ResourceState,
    pub new_state: ResourceState,
    pub access_before: ResourceAccess,
    pub access_after: ResourceAccess,
    pub source_queue: QueueType,
    pub destination_queue: QueueType,
}

impl ResourceBarrier {
    /// A same-queue transition of a whole buffer range.
    pub fn buffer(
        buffer: BufferHandle,
        offset: u64,
        size: u64,
        (old_state, access_before): (ResourceState, ResourceAccess),
        (new_state, access_after): (ResourceState, ResourceAccess),
        queue: QueueType,
    ) -> Self {
        Self {
            resource: BarrierResource::Buffer {
                buffer,
                offset,
                size,
            },
            old_state,
            new_state,
            access_before,
            access_after,
            source_queue: queue,
            destination_queue: queue,
        }
    }
}

/// What a descriptor write points its binding at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorResource {
    Image {
        image: ImageHandle,
        sampler: SamplerHandle,
    },
    Buffer {
        buffer: BufferHandle,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorSetWrite {
    pub set: DescriptorSetHandle,
    pub binding: u32,
    pub resource: DescriptorResource,
}
