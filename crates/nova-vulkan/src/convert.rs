//! Translation of RHI and shaderpack enums into Vulkan ones.

use ash::vk;
use nova_core::shaderpack::{
    BlendFactor, CompareOp, PixelFormat, PrimitiveTopology, StencilOp, StencilOpState, TextureFilter,
    VertexField, WrapMode,
};
use nova_rhi::{
    BufferUsage, DescriptorType, ImageAspect, IndexType, PipelineStage, ResourceAccess, ResourceState,
    ShaderStage,
};

pub const fn pixel_format(format: PixelFormat) -> vk::Format {
    match format {
        PixelFormat::Rgba8 => vk::Format::R8G8B8A8_UNORM,
        PixelFormat::Rgba16F => vk::Format::R16G16B16A16_SFLOAT,
        PixelFormat::Rgba32F => vk::Format::R32G32B32A32_SFLOAT,
        PixelFormat::U32 => vk::Format::R32_UINT,
        PixelFormat::Depth => vk::Format::D32_SFLOAT,
        PixelFormat::DepthStencil => vk::Format::D24_UNORM_S8_UINT,
    }
}

pub const fn aspect_of(format: PixelFormat) -> vk::ImageAspectFlags {
    match format {
        PixelFormat::Depth => vk::ImageAspectFlags::DEPTH,
        PixelFormat::DepthStencil => {
            vk::ImageAspectFlags::from_raw(vk::ImageAspectFlags::DEPTH.as_raw() | vk::ImageAspectFlags::STENCIL.as_raw())
        }
        _ => vk::ImageAspectFlags::COLOR,
    }
}

pub const fn vertex_format(field: VertexField) -> vk::Format {
    match field {
        VertexField::Position | VertexField::Normal | VertexField::Tangent | VertexField::McEntityId => {
            vk::Format::R32G32B32_SFLOAT
        }
        VertexField::Color => vk::Format::R8G8B8A8_UNORM,
        VertexField::Uv0 | VertexField::MidTexCoord => vk::Format::R32G32_SFLOAT,
        VertexField::Uv1 => vk::Format::R8G8_UNORM,
        VertexField::VirtualTextureId => vk::Format::R32_UINT,
    }
}

pub const fn buffer_usage(usage: BufferUsage) -> vk::BufferUsageFlags {
    match usage {
        BufferUsage::UniformBuffer => vk::BufferUsageFlags::UNIFORM_BUFFER,
        BufferUsage::IndexBuffer => vk::BufferUsageFlags::from_raw(
            vk::BufferUsageFlags::INDEX_BUFFER.as_raw() | vk::BufferUsageFlags::TRANSFER_DST.as_raw(),
        ),
        BufferUsage::VertexBuffer => vk::BufferUsageFlags::from_raw(
            vk::BufferUsageFlags::VERTEX_BUFFER.as_raw() | vk::BufferUsageFlags::TRANSFER_DST.as_raw(),
        ),
        BufferUsage::StagingBuffer => vk::BufferUsageFlags::TRANSFER_SRC,
    }
}

pub const fn index_type(index_type: IndexType) -> vk::IndexType {
    match index_type {
        IndexType::U16 => vk::IndexType::UINT16,
        IndexType::U32 => vk::IndexType::UINT32,
    }
}

pub const fn descriptor_type(descriptor_type: DescriptorType) -> vk::DescriptorType {
    match descriptor_type {
        DescriptorType::CombinedImageSampler => vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
        DescriptorType::UniformBuffer => vk::DescriptorType::UNIFORM_BUFFER,
        DescriptorType::StorageBuffer => vk::DescriptorType::STORAGE_BUFFER,
    }
}

pub fn shader_stages(stages: ShaderStage) -> vk::ShaderStageFlags {
    let mut flags = vk::ShaderStageFlags::empty();
    for (stage, flag) in [
        (ShaderStage::VERTEX, vk::ShaderStageFlags::VERTEX),
        (ShaderStage::TESSELLATION_CONTROL, vk::ShaderStageFlags::TESSELLATION_CONTROL),
        (ShaderStage::TESSELLATION_EVALUATION, vk::ShaderStageFlags::TESSELLATION_EVALUATION),
        (ShaderStage::GEOMETRY, vk::ShaderStageFlags::GEOMETRY),
        (ShaderStage::FRAGMENT, vk::ShaderStageFlags::FRAGMENT),
        (ShaderStage::COMPUTE, vk::ShaderStageFlags::COMPUTE),
    ] {
        if stages.contains(stage) {
            flags |= flag;
        }
    }
    flags
}

pub fn pipeline_stages(stages: PipelineStage) -> vk::PipelineStageFlags {
    let mut flags = vk::PipelineStageFlags::empty();
    for (stage, flag) in [
        (PipelineStage::TOP_OF_PIPE, vk::PipelineStageFlags::TOP_OF_PIPE),
        (PipelineStage::DRAW_INDIRECT, vk::PipelineStageFlags::DRAW_INDIRECT),
        (PipelineStage::VERTEX_INPUT, vk::PipelineStageFlags::VERTEX_INPUT),
        (PipelineStage::VERTEX_SHADER, vk::PipelineStageFlags::VERTEX_SHADER),
        (
            PipelineStage::TESSELLATION_CONTROL_SHADER,
            vk::PipelineStageFlags::TESSELLATION_CONTROL_SHADER,
        ),
        (
            PipelineStage::TESSELLATION_EVALUATION_SHADER,
            vk::PipelineStageFlags::TESSELLATION_EVALUATION_SHADER,
        ),
        (PipelineStage::GEOMETRY_SHADER, vk::PipelineStageFlags::GEOMETRY_SHADER),
        (PipelineStage::FRAGMENT_SHADER, vk::PipelineStageFlags::FRAGMENT_SHADER),
        (PipelineStage::EARLY_FRAGMENT_TESTS, vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS),
        (PipelineStage::LATE_FRAGMENT_TESTS, vk::PipelineStageFlags::LATE_FRAGMENT_TESTS),
        (PipelineStage::COLOR_ATTACHMENT_OUTPUT, vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT),
        (PipelineStage::COMPUTE_SHADER, vk::PipelineStageFlags::COMPUTE_SHADER),
        (PipelineStage::TRANSFER, vk::PipelineStageFlags::TRANSFER),
        (PipelineStage::BOTTOM_OF_PIPE, vk::PipelineStageFlags::BOTTOM_OF_PIPE),
        (PipelineStage::HOST, vk::PipelineStageFlags::HOST),
        (PipelineStage::ALL_GRAPHICS, vk::PipelineStageFlags::ALL_GRAPHICS),
        (PipelineStage::ALL_COMMANDS, vk::PipelineStageFlags::ALL_COMMANDS),
    ] {
        if stages.contains(stage) {
            flags |= flag;
        }
    }
    flags
}

pub fn access_flags(access: ResourceAccess) -> vk::AccessFlags {
    let mut flags = vk::AccessFlags::empty();
    for (bit, flag) in [
        (ResourceAccess::INDIRECT_COMMAND_READ, vk::AccessFlags::INDIRECT_COMMAND_READ),
        (ResourceAccess::INDEX_READ, vk::AccessFlags::INDEX_READ),
        (ResourceAccess::VERTEX_ATTRIBUTE_READ, vk::AccessFlags::VERTEX_ATTRIBUTE_READ),
        (ResourceAccess::UNIFORM_READ, vk::AccessFlags::UNIFORM_READ),
        (ResourceAccess::INPUT_ATTACHMENT_READ, vk::AccessFlags::INPUT_ATTACHMENT_READ),
        (ResourceAccess::SHADER_READ, vk::AccessFlags::SHADER_READ),
        (ResourceAccess::SHADER_WRITE, vk::AccessFlags::SHADER_WRITE),
        (ResourceAccess::COLOR_ATTACHMENT_READ, vk::AccessFlags::COLOR_ATTACHMENT_READ),
        (ResourceAccess::COLOR_ATTACHMENT_WRITE, vk::AccessFlags::COLOR_ATTACHMENT_WRITE),
        (
            ResourceAccess::DEPTH_STENCIL_ATTACHMENT_READ,
            vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ,
        ),
        (
            ResourceAccess::DEPTH_STENCIL_ATTACHMENT_WRITE,
            vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
        ),
        (ResourceAccess::COPY_READ, vk::AccessFlags::TRANSFER_READ),
        (ResourceAccess::COPY_WRITE, vk::AccessFlags::TRANSFER_WRITE),
        (ResourceAccess::HOST_READ, vk::AccessFlags::HOST_READ),
        (ResourceAccess::HOST_WRITE, vk::AccessFlags::HOST_WRITE),
        (ResourceAccess::MEMORY_READ, vk::AccessFlags::MEMORY_READ),
        (ResourceAccess::MEMORY_WRITE, vk::AccessFlags::MEMORY_WRITE),
    ] {
        if access.contains(bit) {
            flags |= flag;
        }
    }
    flags
}

pub fn image_aspect(aspect: ImageAspect) -> vk::ImageAspectFlags {
    let mut flags = vk::ImageAspectFlags::empty();
    if aspect.contains(ImageAspect::COLOR) {
        flags |= vk::ImageAspectFlags::COLOR;
    }
    if aspect.contains(ImageAspect::DEPTH) {
        flags |= vk::ImageAspectFlags::DEPTH;
    }
    if aspect.contains(ImageAspect::STENCIL) {
        flags |= vk::ImageAspectFlags::STENCIL;
    }
    flags
}

pub const fn image_layout(state: ResourceState) -> vk::ImageLayout {
    match state {
        ResourceState::Undefined => vk::ImageLayout::UNDEFINED,
        ResourceState::Common
        | ResourceState::UniformBuffer
        | ResourceState::VertexBuffer
        | ResourceState::IndexBuffer
        | ResourceState::ShaderWrite => vk::ImageLayout::GENERAL,
        ResourceState::CopySource => vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        ResourceState::CopyDestination => vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        ResourceState::ShaderRead => vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        ResourceState::RenderTarget => vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        ResourceState::DepthWrite => vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        ResourceState::DepthRead => vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL,
        ResourceState::PresentSource => vk::ImageLayout::PRESENT_SRC_KHR,
    }
}

pub const fn compare_op(op: CompareOp) -> vk::CompareOp {
    match op {
        CompareOp::Never => vk::CompareOp::NEVER,
        CompareOp::Less => vk::CompareOp::LESS,
        CompareOp::LessEqual => vk::CompareOp::LESS_OR_EQUAL,
        CompareOp::Greater => vk::CompareOp::GREATER,
        CompareOp::GreaterEqual => vk::CompareOp::GREATER_OR_EQUAL,
        CompareOp::Equal => vk::CompareOp::EQUAL,
        CompareOp::NotEqual => vk::CompareOp::NOT_EQUAL,
        CompareOp::Always => vk::CompareOp::ALWAYS,
    }
}

pub const fn stencil_op(op: StencilOp) -> vk::StencilOp {
    match op {
        StencilOp::Keep => vk::StencilOp::KEEP,
        StencilOp::Zero => vk::StencilOp::ZERO,
        StencilOp::Replace => vk::StencilOp::REPLACE,
        StencilOp::Incr => vk::StencilOp::INCREMENT_AND_CLAMP,
        StencilOp::IncrWrap => vk::StencilOp::INCREMENT_AND_WRAP,
        StencilOp::Decr => vk::StencilOp::DECREMENT_AND_CLAMP,
        StencilOp::DecrWrap => vk::StencilOp::DECREMENT_AND_WRAP,
        StencilOp::Invert => vk::StencilOp::INVERT,
    }
}

/// A stencil face, with the pipeline-wide reference and masks.
pub fn stencil_state(state: &StencilOpState, reference: u32, read_mask: u32, write_mask: u32) -> vk::StencilOpState {
    vk::StencilOpState {
        fail_op: stencil_op(state.fail_op),
        pass_op: stencil_op(state.pass_op),
        depth_fail_op: stencil_op(state.depth_fail_op),
        compare_op: compare_op(state.compare_op),
        compare_mask: state.compare_mask & read_mask,
        write_mask: state.write_mask & write_mask,
        reference,
    }
}

pub const fn blend_factor(factor: BlendFactor) -> vk::BlendFactor {
    match factor {
        BlendFactor::One => vk::BlendFactor::ONE,
        BlendFactor::Zero => vk::BlendFactor::ZERO,
        BlendFactor::SrcColor => vk::BlendFactor::SRC_COLOR,
        BlendFactor::DstColor => vk::BlendFactor::DST_COLOR,
        BlendFactor::OneMinusSrcColor => vk::BlendFactor::ONE_MINUS_SRC_COLOR,
        BlendFactor::OneMinusDstColor => vk::BlendFactor::ONE_MINUS_DST_COLOR,
        BlendFactor::SrcAlpha => vk::BlendFactor::SRC_ALPHA,
        BlendFactor::DstAlpha => vk::BlendFactor::DST_ALPHA,
        BlendFactor::OneMinusSrcAlpha => vk::BlendFactor::ONE_MINUS_SRC_ALPHA,
        BlendFactor::OneMinusDstAlpha => vk::BlendFactor::ONE_MINUS_DST_ALPHA,
    }
}

pub const fn topology(topology: PrimitiveTopology) -> vk::PrimitiveTopology {
    match topology {
        PrimitiveTopology::Triangles => vk::PrimitiveTopology::TRIANGLE_LIST,
        PrimitiveTopology::Lines => vk::PrimitiveTopology::LINE_LIST,
    }
}

pub const fn filter(filter: TextureFilter) -> vk::Filter {
    match filter {
        TextureFilter::Point => vk::Filter::NEAREST,
        TextureFilter::Bilinear | TextureFilter::TexelAa => vk::Filter::LINEAR,
    }
}

pub const fn address_mode(wrap_mode: WrapMode) -> vk::SamplerAddressMode {
    match wrap_mode {
        WrapMode::Repeat => vk::SamplerAddressMode::REPEAT,
        WrapMode::Clamp => vk::SamplerAddressMode::CLAMP_TO_EDGE,
    }
}
