//! The render device and command list contracts.

use std::collections::HashMap;

use glam::UVec2;
use nova_core::shaderpack::{
    PipelineCreateInfo, RenderPassCreateInfo, SamplerCreateInfo, TextureAttachmentInfo,
};

use crate::error::{Result, RhiError};
use crate::handles::{
    BufferHandle, DescriptorPoolHandle, DescriptorSetHandle, DeviceMemoryHandle, FenceHandle,
    FramebufferHandle, ImageHandle, PipelineHandle, PipelineInterfaceHandle, RenderpassHandle,
    SamplerHandle, SemaphoreHandle,
};
use crate::memory::DeviceMemoryResource;
use crate::types::{
    BufferCreateInfo, CommandListLevel, DescriptorSetWrite, DeviceInfo, ImageCreateInfo,
    IndexType, MemoryUsage, ObjectType, PipelineStage, QueueType, ResourceBarrier,
    ResourceBindingDescription,
};

/// A list of GPU commands being recorded.
///
/// A command list records from one thread and is consumed by
/// [`RenderDevice::submit_command_list`], so it cannot be recorded into after
/// submission. Commands that reference a stale handle are logged and skipped.
pub trait CommandList {
    fn set_debug_name(&mut self, name: &str);

    /// Record a barrier between `stages_before` and `stages_after`.
    fn resource_barriers(
        &mut self,
        stages_before: PipelineStage,
        stages_after: PipelineStage,
        barriers: &[ResourceBarrier],
    );

    fn copy_buffer(
        &mut self,
        destination: BufferHandle,
        destination_offset: u64,
        source: BufferHandle,
        source_offset: u64,
        num_bytes: u64,
    );

    /// Copy pixel data, already written to `staging_buffer`, into `image`.
    fn upload_data_to_image(
        &mut self,
        image: ImageHandle,
        size: UVec2,
        bytes_per_pixel: u32,
        staging_buffer: BufferHandle,
    );

    /// Execute secondary command lists from this one.
    fn execute_command_lists(&mut self, lists: Vec<Self>)
    where
        Self: Sized;

    /// Begin a renderpass. `None` renders into the current swapchain image.
    fn begin_renderpass(
        &mut self,
        renderpass: RenderpassHandle,
        framebuffer: Option<FramebufferHandle>,
    );

    fn end_renderpass(&mut self);

    fn bind_pipeline(&mut self, pipeline: PipelineHandle);

    fn bind_descriptor_sets(
        &mut self,
        descriptor_sets: &[DescriptorSetHandle],
        pipeline_interface: PipelineInterfaceHandle,
    );

    fn bind_vertex_buffers(&mut self, buffers: &[BufferHandle]);

    fn bind_index_buffer(&mut self, buffer: BufferHandle, index_type: IndexType);

    fn draw_indexed_mesh(&mut self, num_indices: u32, num_instances: u32, first_instance: u32);

    fn set_scissor_rect(&mut self, x: u32, y: u32, width: u32, height: u32);
}

/// A graphics device: creates GPU objects and runs command lists.
///
/// Creation calls are synchronous. Objects are addressed by generational
/// handles and stay alive until the matching `destroy_*` call.
pub trait RenderDevice {
    type CommandList: CommandList;

    fn info(&self) -> &DeviceInfo;

    /// Size of the swapchain images in pixels.
    fn swapchain_size(&self) -> UVec2;

    fn num_swapchain_images(&self) -> u32;

    /// Acquire the next swapchain image, blocking until one is available.
    fn acquire_next_swapchain_image(&mut self) -> Result<u32>;

    fn present(&mut self, image_index: u32) -> Result<()>;

    /// Allocate raw device memory of a type matching `usage`.
    ///
    /// Backends try an exact memory-type match first and fall back to a
    /// looser one.
    fn allocate_device_memory(
        &mut self,
        size: u64,
        usage: MemoryUsage,
        allowed_objects: ObjectType,
    ) -> Result<DeviceMemoryHandle>;

    fn free_device_memory(&mut self, memory: DeviceMemoryHandle);

    /// Create a buffer in a range sub-allocated from `memory`.
    fn create_buffer(
        &mut self,
        info: &BufferCreateInfo,
        memory: &mut DeviceMemoryResource,
    ) -> Result<BufferHandle>;

    /// Copy `data` into the buffer at `offset`. The buffer's memory must be
    /// host visible.
    fn write_data_to_buffer(&mut self, data: &[u8], offset: u64, buffer: BufferHandle)
        -> Result<()>;

    /// Destroy a buffer and return its range to `memory`.
    fn destroy_buffer(&mut self, buffer: BufferHandle, memory: &mut DeviceMemoryResource);

    fn create_image(&mut self, info: &ImageCreateInfo) -> Result<ImageHandle>;

    fn destroy_image(&mut self, image: ImageHandle);

    /// Create a renderpass for the pass's color outputs and depth texture.
    ///
    /// Fails when the framebuffer size is zero or the pass has more color
    /// outputs than the device supports.
    fn create_renderpass(
        &mut self,
        data: &RenderPassCreateInfo,
        framebuffer_size: UVec2,
    ) -> Result<RenderpassHandle>;

    fn destroy_renderpass(&mut self, renderpass: RenderpassHandle);

    /// Create a framebuffer. A depth attachment, if any, must come last.
    fn create_framebuffer(
        &mut self,
        renderpass: RenderpassHandle,
        attachments: &[ImageHandle],
        framebuffer_size: UVec2,
    ) -> Result<FramebufferHandle>;

    fn destroy_framebuffer(&mut self, framebuffer: FramebufferHandle);

    /// Create the descriptor set layouts and pipeline layout for a set of
    /// reflected bindings.
    fn create_pipeline_interface(
        &mut self,
        bindings: &HashMap<String, ResourceBindingDescription>,
        color_attachments: &[TextureAttachmentInfo],
        depth_texture: Option<&TextureAttachmentInfo>,
    ) -> Result<PipelineInterfaceHandle>;

    fn destroy_pipeline_interface(&mut self, pipeline_interface: PipelineInterfaceHandle);

    fn create_pipeline(
        &mut self,
        pipeline_interface: PipelineInterfaceHandle,
        data: &PipelineCreateInfo,
    ) -> Result<PipelineHandle>;

    fn destroy_pipeline(&mut self, pipeline: PipelineHandle);

    fn create_descriptor_pool(
        &mut self,
        num_sampled_images: u32,
        num_samplers: u32,
        num_uniform_buffers: u32,
    ) -> Result<DescriptorPoolHandle>;

    /// Destroy a pool and every descriptor set allocated from it.
    fn destroy_descriptor_pool(&mut self, pool: DescriptorPoolHandle);

    /// Allocate one descriptor set per set layout of the pipeline interface.
    fn create_descriptor_sets(
        &mut self,
        pipeline_interface: PipelineInterfaceHandle,
        pool: DescriptorPoolHandle,
    ) -> Result<Vec<DescriptorSetHandle>>;

    fn update_descriptor_sets(&mut self, writes: &[DescriptorSetWrite]);

    fn create_sampler(&mut self, info: &SamplerCreateInfo) -> Result<SamplerHandle>;

    fn destroy_sampler(&mut self, sampler: SamplerHandle);

    fn create_semaphores(&mut self, count: u32) -> Result<Vec<SemaphoreHandle>>;

    fn destroy_semaphores(&mut self, semaphores: &[SemaphoreHandle]);

    fn create_fences(&mut self, count: u32, signaled: bool) -> Result<Vec<FenceHandle>>;

    fn destroy_fences(&mut self, fences: &[FenceHandle]);

    /// Block until every fence is signaled. There is no timeout.
    fn wait_for_fences(&mut self, fences: &[FenceHandle]) -> Result<()>;

    fn reset_fences(&mut self, fences: &[FenceHandle]) -> Result<()>;

    /// Start recording for in-flight frame `frame_index`.
    ///
    /// Resets every command pool that belongs to that frame, which
    /// invalidates command lists recorded the last time the index was used.
    fn begin_frame(&mut self, frame_index: u32) -> Result<()>;

    /// Allocate a command list from the pool for `(thread_index, queue_type)`
    /// of the current frame.
    fn create_command_list(
        &mut self,
        thread_index: u32,
        queue_type: QueueType,
        level: CommandListLevel,
    ) -> Result<Self::CommandList>;

    fn submit_command_list(
        &mut self,
        list: Self::CommandList,
        queue_type: QueueType,
        fence: Option<FenceHandle>,
        wait_semaphores: &[SemaphoreHandle],
        signal_semaphores: &[SemaphoreHandle],
    ) -> Result<()>;

    /// Block until the device has finished all submitted work.
    fn wait_idle(&mut self) -> Result<()>;

    fn create_semaphore(&mut self) -> Result<SemaphoreHandle> {
        self.create_semaphores(1)?
            .pop()
            .ok_or_else(|| RhiError::Backend("Device created no semaphore".to_string()))
    }

    fn create_fence(&mut self, signaled: bool) -> Result<FenceHandle> {
        self.create_fences(1, signaled)?
            .pop()
            .ok_or_else(|| RhiError::Backend("Device created no fence".to_string()))
    }
}
