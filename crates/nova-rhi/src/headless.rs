//! A render device that runs entirely on the CPU.
//!
//! Objects live in slotmaps, device memory is a byte vector and command lists
//! record into a `Vec`. Submitting a list replays its buffer copies, signals
//! its fence and appends it to a log that callers can inspect. This is what
//! the renderer's tests drive, and it doubles as a backend for tools that
//! only need the render graph without a GPU.

use std::collections::HashMap;

use glam::UVec2;
use nova_core::shaderpack::{
    PipelineCreateInfo, RenderPassCreateInfo, SamplerCreateInfo, TextureAttachmentInfo,
};
use slotmap::SlotMap;

use crate::device::{CommandList, RenderDevice};
use crate::error::{Result, RhiError};
use crate::handles::{
    BufferHandle, DescriptorPoolHandle, DescriptorSetHandle, DeviceMemoryHandle, FenceHandle,
    FramebufferHandle, ImageHandle, PipelineHandle, PipelineInterfaceHandle, RenderpassHandle,
    SamplerHandle, SemaphoreHandle,
};
use crate::memory::{DeviceMemoryAllocation, DeviceMemoryResource};
use crate::types::{
    BufferCreateInfo, CommandListLevel, DescriptorResource, DescriptorSetWrite, DeviceInfo,
    ImageCreateInfo, IndexType, MemoryUsage, ObjectType, PipelineStage, QueueType,
    ResourceBarrier, ResourceBindingDescription,
};

/// Shape of the simulated device.
#[derive(Debug, Clone)]
pub struct HeadlessConfig {
    pub swapchain_size: UVec2,
    pub num_swapchain_images: u32,
    pub max_color_attachments: u32,
}

impl Default for HeadlessConfig {
    fn default() -> Self {
        Self {
            swapchain_size: UVec2::new(1280, 720),
            num_swapchain_images: 3,
            max_color_attachments: 8,
        }
    }
}

/// A command as recorded by [`HeadlessCommandList`].
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedCommand {
    SetDebugName(String),
    ResourceBarriers {
        stages_before: PipelineStage,
        stages_after: PipelineStage,
        barriers: Vec<ResourceBarrier>,
    },
    CopyBuffer {
        destination: BufferHandle,
        destination_offset: u64,
        source: BufferHandle,
        source_offset: u64,
        num_bytes: u64,
    },
    UploadDataToImage {
        image: ImageHandle,
        size: UVec2,
        bytes_per_pixel: u32,
        staging_buffer: BufferHandle,
    },
    BeginRenderpass {
        renderpass: RenderpassHandle,
        framebuffer: Option<FramebufferHandle>,
    },
    EndRenderpass,
    BindPipeline(PipelineHandle),
    BindDescriptorSets {
        descriptor_sets: Vec<DescriptorSetHandle>,
        pipeline_interface: PipelineInterfaceHandle,
    },
    BindVertexBuffers(Vec<BufferHandle>),
    BindIndexBuffer {
        buffer: BufferHandle,
        index_type: IndexType,
    },
    DrawIndexedMesh {
        num_indices: u32,
        num_instances: u32,
        first_instance: u32,
    },
    SetScissorRect {
        x: u32,
        y: u32,
        width: u32,
        height: u32,
    },
}

/// Command list of the [`HeadlessDevice`].
#[derive(Debug)]
pub struct HeadlessCommandList {
    queue_type: QueueType,
    level: CommandListLevel,
    frame_index: u32,
    pool_generation: u64,
    commands: Vec<RecordedCommand>,
}

impl HeadlessCommandList {
    pub fn commands(&self) -> &[RecordedCommand] {
        &self.commands
    }

    pub fn queue_type(&self) -> QueueType {
        self.queue_type
    }

    pub fn level(&self) -> CommandListLevel {
        self.level
    }
}

impl CommandList for HeadlessCommandList {
    fn set_debug_name(&mut self, name: &str) {
        self.commands.push(RecordedCommand::SetDebugName(name.to_string()));
    }

    fn resource_barriers(
        &mut self,
        stages_before: PipelineStage,
        stages_after: PipelineStage,
        barriers: &[ResourceBarrier],
    ) {
        self.commands.push(RecordedCommand::ResourceBarriers {
            stages_before,
            stages_after,
            barriers: barriers.to_vec(),
        });
    }

    fn copy_buffer(
        &mut self,
        destination: BufferHandle,
        destination_offset: u64,
        source: BufferHandle,
        source_offset: u64,
        num_bytes: u64,
    ) {
        self.commands.push(RecordedCommand::CopyBuffer {
            destination,
            destination_offset,
            source,
            source_offset,
            num_bytes,
        });
    }

    fn upload_data_to_image(
        &mut self,
        image: ImageHandle,
        size: UVec2,
        bytes_per_pixel: u32,
        staging_buffer: BufferHandle,
    ) {
        self.commands.push(RecordedCommand::UploadDataToImage {
            image,
            size,
            bytes_per_pixel,
            staging_buffer,
        });
    }

    fn execute_command_lists(&mut self, lists: Vec<Self>) {
        for list in lists {
            self.commands.extend(list.commands);
        }
    }

    fn begin_renderpass(
        &mut self,
        renderpass: RenderpassHandle,
        framebuffer: Option<FramebufferHandle>,
    ) {
        self.commands.push(RecordedCommand::BeginRenderpass {
            renderpass,
            framebuffer,
        });
    }

    fn end_renderpass(&mut self) {
        self.commands.push(RecordedCommand::EndRenderpass);
    }

    fn bind_pipeline(&mut self, pipeline: PipelineHandle) {
        self.commands.push(RecordedCommand::BindPipeline(pipeline));
    }

    fn bind_descriptor_sets(
        &mut self,
        descriptor_sets: &[DescriptorSetHandle],
        pipeline_interface: PipelineInterfaceHandle,
    ) {
        self.commands.push(RecordedCommand::BindDescriptorSets {
            descriptor_sets: descriptor_sets.to_vec(),
            pipeline_interface,
        });
    }

    fn bind_vertex_buffers(&mut self, buffers: &[BufferHandle]) {
        self.commands
            .push(RecordedCommand::BindVertexBuffers(buffers.to_vec()));
    }

    fn bind_index_buffer(&mut self, buffer: BufferHandle, index_type: IndexType) {
        self.commands
            .push(RecordedCommand::BindIndexBuffer { buffer, index_type });
    }

    fn draw_indexed_mesh(&mut self, num_indices: u32, num_instances: u32, first_instance: u32) {
        self.commands.push(RecordedCommand::DrawIndexedMesh {
            num_indices,
            num_instances,
            first_instance,
        });
    }

    fn set_scissor_rect(&mut self, x: u32, y: u32, width: u32, height: u32) {
        self.commands.push(RecordedCommand::SetScissorRect {
            x,
            y,
            width,
            height,
        });
    }
}

/// One call to [`RenderDevice::submit_command_list`].
#[derive(Debug, Clone)]
pub struct Submission {
    pub queue_type: QueueType,
    pub frame_index: u32,
    pub commands: Vec<RecordedCommand>,
    pub fence: Option<FenceHandle>,
    pub wait_semaphores: Vec<SemaphoreHandle>,
    pub signal_semaphores: Vec<SemaphoreHandle>,
}

struct HeadlessMemory {
    usage: MemoryUsage,
    size: u64,
    /// Grows on first write; unwritten bytes read as zero
    bytes: Vec<u8>,
}

struct HeadlessBuffer {
    info: BufferCreateInfo,
    allocation: DeviceMemoryAllocation,
}

/// A renderpass as the headless device saw it.
#[derive(Debug, Clone)]
pub struct HeadlessRenderpass {
    pub name: String,
    pub color_attachments: Vec<TextureAttachmentInfo>,
    pub depth_attachment: Option<TextureAttachmentInfo>,
    pub size: UVec2,
}

/// A framebuffer as the headless device saw it.
#[derive(Debug, Clone)]
pub struct HeadlessFramebuffer {
    pub renderpass: RenderpassHandle,
    pub attachments: Vec<ImageHandle>,
    pub size: UVec2,
}

/// Descriptor counts a pool was created with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorPoolSizes {
    pub sampled_images: u32,
    pub samplers: u32,
    pub uniform_buffers: u32,
}

struct HeadlessPipelineInterface {
    num_sets: u32,
}

struct HeadlessDescriptorSet {
    pool: DescriptorPoolHandle,
    writes: HashMap<u32, DescriptorResource>,
}

struct HeadlessFence {
    signaled: bool,
}

/// CPU-only implementation of [`RenderDevice`].
pub struct HeadlessDevice {
    config: HeadlessConfig,
    info: DeviceInfo,
    next_image: u32,
    current_frame: u32,
    frame_generations: HashMap<u32, u64>,

    memories: SlotMap<DeviceMemoryHandle, HeadlessMemory>,
    buffers: SlotMap<BufferHandle, HeadlessBuffer>,
    images: SlotMap<ImageHandle, ImageCreateInfo>,
    renderpasses: SlotMap<RenderpassHandle, HeadlessRenderpass>,
    framebuffers: SlotMap<FramebufferHandle, HeadlessFramebuffer>,
    pipeline_interfaces: SlotMap<PipelineInterfaceHandle, HeadlessPipelineInterface>,
    pipelines: SlotMap<PipelineHandle, String>,
    descriptor_pools: SlotMap<DescriptorPoolHandle, DescriptorPoolSizes>,
    descriptor_sets: SlotMap<DescriptorSetHandle, HeadlessDescriptorSet>,
    samplers: SlotMap<SamplerHandle, SamplerCreateInfo>,
    semaphores: SlotMap<SemaphoreHandle, ()>,
    fences: SlotMap<FenceHandle, HeadlessFence>,

    submissions: Vec<Submission>,
    presented: Vec<u32>,
}

impl Default for HeadlessDevice {
    fn default() -> Self {
        Self::new(HeadlessConfig::default())
    }
}

impl HeadlessDevice {
    pub fn new(config: HeadlessConfig) -> Self {
        let info = DeviceInfo {
            device_name: "Headless".to_string(),
            max_color_attachments: config.max_color_attachments,
            is_uma: true,
            ..DeviceInfo::default()
        };

        Self {
            config,
            info,
            next_image: 0,
            current_frame: 0,
            frame_generations: HashMap::new(),
            memories: SlotMap::with_key(),
            buffers: SlotMap::with_key(),
            images: SlotMap::with_key(),
            renderpasses: SlotMap::with_key(),
            framebuffers: SlotMap::with_key(),
            pipeline_interfaces: SlotMap::with_key(),
            pipelines: SlotMap::with_key(),
            descriptor_pools: SlotMap::with_key(),
            descriptor_sets: SlotMap::with_key(),
            samplers: SlotMap::with_key(),
            semaphores: SlotMap::with_key(),
            fences: SlotMap::with_key(),
            submissions: Vec::new(),
            presented: Vec::new(),
        }
    }

    /// Every submission so far, oldest first.
    pub fn submissions(&self) -> &[Submission] {
        &self.submissions
    }

    /// Swapchain image indices passed to `present`, oldest first.
    pub fn presented_images(&self) -> &[u32] {
        &self.presented
    }

    /// Read back a buffer's contents.
    pub fn buffer_contents(&self, buffer: BufferHandle) -> Option<Vec<u8>> {
        let buffer = self.buffers.get(buffer)?;
        Some(self.read_memory(
            buffer.allocation.memory,
            buffer.allocation.allocation.offset,
            buffer.info.size,
        ))
    }

    pub fn buffer_info(&self, buffer: BufferHandle) -> Option<BufferCreateInfo> {
        self.buffers.get(buffer).map(|buffer| buffer.info)
    }

    pub fn image_info(&self, image: ImageHandle) -> Option<&ImageCreateInfo> {
        self.images.get(image)
    }

    pub fn renderpass(&self, renderpass: RenderpassHandle) -> Option<&HeadlessRenderpass> {
        self.renderpasses.get(renderpass)
    }

    pub fn framebuffer(&self, framebuffer: FramebufferHandle) -> Option<&HeadlessFramebuffer> {
        self.framebuffers.get(framebuffer)
    }

    pub fn pipeline_name(&self, pipeline: PipelineHandle) -> Option<&str> {
        self.pipelines.get(pipeline).map(String::as_str)
    }

    /// What each binding of a descriptor set was last written with.
    pub fn descriptor_writes(&self, set: DescriptorSetHandle) -> Option<&HashMap<u32, DescriptorResource>> {
        self.descriptor_sets.get(set).map(|set| &set.writes)
    }

    pub fn descriptor_pool_sizes(&self, pool: DescriptorPoolHandle) -> Option<DescriptorPoolSizes> {
        self.descriptor_pools.get(pool).copied()
    }

    pub fn sampler_info(&self, sampler: SamplerHandle) -> Option<&SamplerCreateInfo> {
        self.samplers.get(sampler)
    }

    pub fn num_samplers(&self) -> usize {
        self.samplers.len()
    }

    pub fn num_renderpasses(&self) -> usize {
        self.renderpasses.len()
    }

    pub fn num_framebuffers(&self) -> usize {
        self.framebuffers.len()
    }

    pub fn num_images(&self) -> usize {
        self.images.len()
    }

    pub fn num_pipelines(&self) -> usize {
        self.pipelines.len()
    }

    pub fn num_buffers(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_fence_signaled(&self, fence: FenceHandle) -> Option<bool> {
        self.fences.get(fence).map(|fence| fence.signaled)
    }

    fn read_memory(&self, memory: DeviceMemoryHandle, offset: u64, size: u64) -> Vec<u8> {
        let mut out = vec![0; usize::try_from(size).unwrap_or(0)];
        if let Some(memory) = self.memories.get(memory) {
            let start = usize::try_from(offset).unwrap_or(usize::MAX);
            if start < memory.bytes.len() {
                let end = (start + out.len()).min(memory.bytes.len());
                out[..end - start].copy_from_slice(&memory.bytes[start..end]);
            }
        }
        out
    }

    fn write_memory(&mut self, memory: DeviceMemoryHandle, offset: u64, data: &[u8]) -> Result<()> {
        let memory = self
            .memories
            .get_mut(memory)
            .ok_or(RhiError::InvalidHandle("device memory"))?;

        let Some(end) = offset
            .checked_add(data.len() as u64)
            .filter(|end| *end <= memory.size)
        else {
            return Err(RhiError::WriteOutOfBounds {
                offset,
                size: data.len() as u64,
                capacity: memory.size,
            });
        };

        let (start, end) = (offset as usize, end as usize);
        if memory.bytes.len() < end {
            memory.bytes.resize(end, 0);
        }
        memory.bytes[start..end].copy_from_slice(data);
        Ok(())
    }

    fn copy_buffer_range(
        &mut self,
        destination: BufferHandle,
        destination_offset: u64,
        source: BufferHandle,
        source_offset: u64,
        num_bytes: u64,
    ) -> Result<()> {
        let source = self
            .buffers
            .get(source)
            .ok_or(RhiError::InvalidHandle("buffer"))?;
        let destination = self
            .buffers
            .get(destination)
            .ok_or(RhiError::InvalidHandle("buffer"))?;

        for (buffer, offset) in [(source, source_offset), (destination, destination_offset)] {
            if offset.checked_add(num_bytes).map_or(true, |end| end > buffer.info.size) {
                return Err(RhiError::WriteOutOfBounds {
                    offset,
                    size: num_bytes,
                    capacity: buffer.info.size,
                });
            }
        }

        let bytes = self.read_memory(
            source.allocation.memory,
            source.allocation.allocation.offset + source_offset,
            num_bytes,
        );
        let (memory, base) = (
            destination.allocation.memory,
            destination.allocation.allocation.offset,
        );
        self.write_memory(memory, base + destination_offset, &bytes)
    }
}

impl RenderDevice for HeadlessDevice {
    type CommandList = HeadlessCommandList;

    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn swapchain_size(&self) -> UVec2 {
        self.config.swapchain_size
    }

    fn num_swapchain_images(&self) -> u32 {
        self.config.num_swapchain_images
    }

    fn acquire_next_swapchain_image(&mut self) -> Result<u32> {
        let image = self.next_image;
        self.next_image = (self.next_image + 1) % self.config.num_swapchain_images.max(1);
        Ok(image)
    }

    fn present(&mut self, image_index: u32) -> Result<()> {
        if image_index >= self.config.num_swapchain_images {
            return Err(RhiError::Swapchain(format!(
                "Image index {image_index} is out of range"
            )));
        }
        self.presented.push(image_index);
        Ok(())
    }

    fn allocate_device_memory(
        &mut self,
        size: u64,
        usage: MemoryUsage,
        _allowed_objects: ObjectType,
    ) -> Result<DeviceMemoryHandle> {
        Ok(self.memories.insert(HeadlessMemory {
            usage,
            size,
            bytes: Vec::new(),
        }))
    }

    fn free_device_memory(&mut self, memory: DeviceMemoryHandle) {
        self.memories.remove(memory);
    }

    fn create_buffer(
        &mut self,
        info: &BufferCreateInfo,
        memory: &mut DeviceMemoryResource,
    ) -> Result<BufferHandle> {
        if !self.memories.contains_key(memory.memory()) {
            return Err(RhiError::InvalidHandle("device memory"));
        }

        let allocation = memory
            .allocate(info.size)
            .ok_or(RhiError::OutOfDeviceMemory {
                requested: info.size,
            })?;

        Ok(self.buffers.insert(HeadlessBuffer {
            info: *info,
            allocation,
        }))
    }

    fn write_data_to_buffer(&mut self, data: &[u8], offset: u64, buffer: BufferHandle) -> Result<()> {
        let buffer = self
            .buffers
            .get(buffer)
            .ok_or(RhiError::InvalidHandle("buffer"))?;
        let allocation = buffer.allocation;
        let capacity = buffer.info.size;

        let host_visible = self
            .memories
            .get(allocation.memory)
            .is_some_and(|memory| memory.usage.is_host_visible());
        if !host_visible {
            return Err(RhiError::MemoryNotHostVisible);
        }

        if offset.checked_add(data.len() as u64).map_or(true, |end| end > capacity) {
            return Err(RhiError::WriteOutOfBounds {
                offset,
                size: data.len() as u64,
                capacity,
            });
        }

        self.write_memory(allocation.memory, allocation.allocation.offset + offset, data)
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle, memory: &mut DeviceMemoryResource) {
        if let Some(buffer) = self.buffers.remove(buffer) {
            memory.free(&buffer.allocation);
        }
    }

    fn create_image(&mut self, info: &ImageCreateInfo) -> Result<ImageHandle> {
        if info.size.x == 0 || info.size.y == 0 {
            return Err(RhiError::Backend(format!(
                "Image {} has a zero dimension",
                info.name
            )));
        }
        Ok(self.images.insert(info.clone()))
    }

    fn destroy_image(&mut self, image: ImageHandle) {
        self.images.remove(image);
    }

    fn create_renderpass(
        &mut self,
        data: &RenderPassCreateInfo,
        framebuffer_size: UVec2,
    ) -> Result<RenderpassHandle> {
        if framebuffer_size.x == 0 || framebuffer_size.y == 0 {
            return Err(RhiError::ZeroFramebufferSize {
                width: framebuffer_size.x,
                height: framebuffer_size.y,
            });
        }

        let count = u32::try_from(data.texture_outputs.len()).unwrap_or(u32::MAX);
        if count > self.info.max_color_attachments {
            return Err(RhiError::TooManyColorAttachments {
                pass: data.name.clone(),
                count,
                max: self.info.max_color_attachments,
            });
        }

        Ok(self.renderpasses.insert(HeadlessRenderpass {
            name: data.name.clone(),
            color_attachments: data.texture_outputs.clone(),
            depth_attachment: data.depth_texture.clone(),
            size: framebuffer_size,
        }))
    }

    fn destroy_renderpass(&mut self, renderpass: RenderpassHandle) {
        self.renderpasses.remove(renderpass);
    }

    fn create_framebuffer(
        &mut self,
        renderpass: RenderpassHandle,
        attachments: &[ImageHandle],
        framebuffer_size: UVec2,
    ) -> Result<FramebufferHandle> {
        if framebuffer_size.x == 0 || framebuffer_size.y == 0 {
            return Err(RhiError::ZeroFramebufferSize {
                width: framebuffer_size.x,
                height: framebuffer_size.y,
            });
        }
        if !self.renderpasses.contains_key(renderpass) {
            return Err(RhiError::InvalidHandle("renderpass"));
        }
        if let Some(missing) = attachments.iter().find(|image| !self.images.contains_key(**image)) {
            tracing::error!("Framebuffer attachment {missing:?} does not exist");
            return Err(RhiError::InvalidHandle("image"));
        }

        Ok(self.framebuffers.insert(HeadlessFramebuffer {
            renderpass,
            attachments: attachments.to_vec(),
            size: framebuffer_size,
        }))
    }

    fn destroy_framebuffer(&mut self, framebuffer: FramebufferHandle) {
        self.framebuffers.remove(framebuffer);
    }

    fn create_pipeline_interface(
        &mut self,
        bindings: &HashMap<String, ResourceBindingDescription>,
        _color_attachments: &[TextureAttachmentInfo],
        _depth_texture: Option<&TextureAttachmentInfo>,
    ) -> Result<PipelineInterfaceHandle> {
        let num_sets = bindings
            .values()
            .map(|binding| binding.set + 1)
            .max()
            .unwrap_or(0);

        Ok(self
            .pipeline_interfaces
            .insert(HeadlessPipelineInterface { num_sets }))
    }

    fn destroy_pipeline_interface(&mut self, pipeline_interface: PipelineInterfaceHandle) {
        self.pipeline_interfaces.remove(pipeline_interface);
    }

    fn create_pipeline(
        &mut self,
        pipeline_interface: PipelineInterfaceHandle,
        data: &PipelineCreateInfo,
    ) -> Result<PipelineHandle> {
        if !self.pipeline_interfaces.contains_key(pipeline_interface) {
            return Err(RhiError::InvalidHandle("pipeline interface"));
        }
        if data.vertex_shader.source.is_empty() {
            return Err(RhiError::ShaderCompilation(format!(
                "Pipeline {} has no vertex shader code",
                data.name
            )));
        }

        Ok(self.pipelines.insert(data.name.clone()))
    }

    fn destroy_pipeline(&mut self, pipeline: PipelineHandle) {
        self.pipelines.remove(pipeline);
    }

    fn create_descriptor_pool(
        &mut self,
        num_sampled_images: u32,
        num_samplers: u32,
        num_uniform_buffers: u32,
    ) -> Result<DescriptorPoolHandle> {
        Ok(self.descriptor_pools.insert(DescriptorPoolSizes {
            sampled_images: num_sampled_images,
            samplers: num_samplers,
            uniform_buffers: num_uniform_buffers,
        }))
    }

    fn destroy_descriptor_pool(&mut self, pool: DescriptorPoolHandle) {
        self.descriptor_pools.remove(pool);
        self.descriptor_sets.retain(|_, set| set.pool != pool);
    }

    fn create_descriptor_sets(
        &mut self,
        pipeline_interface: PipelineInterfaceHandle,
        pool: DescriptorPoolHandle,
    ) -> Result<Vec<DescriptorSetHandle>> {
        let num_sets = self
            .pipeline_interfaces
            .get(pipeline_interface)
            .ok_or(RhiError::InvalidHandle("pipeline interface"))?
            .num_sets;
        if !self.descriptor_pools.contains_key(pool) {
            return Err(RhiError::InvalidHandle("descriptor pool"));
        }

        Ok((0..num_sets)
            .map(|_| {
                self.descriptor_sets.insert(HeadlessDescriptorSet {
                    pool,
                    writes: HashMap::new(),
                })
            })
            .collect())
    }

    fn update_descriptor_sets(&mut self, writes: &[DescriptorSetWrite]) {
        for write in writes {
            match self.descriptor_sets.get_mut(write.set) {
                Some(set) => {
                    set.writes.insert(write.binding, write.resource);
                }
                None => tracing::error!("Descriptor write to a destroyed descriptor set"),
            }
        }
    }

    fn create_sampler(&mut self, info: &SamplerCreateInfo) -> Result<SamplerHandle> {
        Ok(self.samplers.insert(info.clone()))
    }

    fn destroy_sampler(&mut self, sampler: SamplerHandle) {
        self.samplers.remove(sampler);
    }

    fn create_semaphores(&mut self, count: u32) -> Result<Vec<SemaphoreHandle>> {
        Ok((0..count).map(|_| self.semaphores.insert(())).collect())
    }

    fn destroy_semaphores(&mut self, semaphores: &[SemaphoreHandle]) {
        for semaphore in semaphores {
            self.semaphores.remove(*semaphore);
        }
    }

    fn create_fences(&mut self, count: u32, signaled: bool) -> Result<Vec<FenceHandle>> {
        Ok((0..count)
            .map(|_| self.fences.insert(HeadlessFence { signaled }))
            .collect())
    }

    fn destroy_fences(&mut self, fences: &[FenceHandle]) {
        for fence in fences {
            self.fences.remove(*fence);
        }
    }

    fn wait_for_fences(&mut self, fences: &[FenceHandle]) -> Result<()> {
        for fence in fences {
            let fence = self
                .fences
                .get(*fence)
                .ok_or(RhiError::InvalidHandle("fence"))?;
            if !fence.signaled {
                return Err(RhiError::FenceNeverSignaled);
            }
        }
        Ok(())
    }

    fn reset_fences(&mut self, fences: &[FenceHandle]) -> Result<()> {
        for fence in fences {
            self.fences
                .get_mut(*fence)
                .ok_or(RhiError::InvalidHandle("fence"))?
                .signaled = false;
        }
        Ok(())
    }

    fn begin_frame(&mut self, frame_index: u32) -> Result<()> {
        self.current_frame = frame_index;
        *self.frame_generations.entry(frame_index).or_insert(0) += 1;
        Ok(())
    }

    fn create_command_list(
        &mut self,
        _thread_index: u32,
        queue_type: QueueType,
        level: CommandListLevel,
    ) -> Result<Self::CommandList> {
        Ok(HeadlessCommandList {
            queue_type,
            level,
            frame_index: self.current_frame,
            pool_generation: self
                .frame_generations
                .get(&self.current_frame)
                .copied()
                .unwrap_or(0),
            commands: Vec::new(),
        })
    }

    fn submit_command_list(
        &mut self,
        list: Self::CommandList,
        queue_type: QueueType,
        fence: Option<FenceHandle>,
        wait_semaphores: &[SemaphoreHandle],
        signal_semaphores: &[SemaphoreHandle],
    ) -> Result<()> {
        let generation = self
            .frame_generations
            .get(&list.frame_index)
            .copied()
            .unwrap_or(0);
        if generation != list.pool_generation {
            return Err(RhiError::Backend(format!(
                "Command list for frame {} was recorded before its pool was reset",
                list.frame_index
            )));
        }

        for command in &list.commands {
            if let RecordedCommand::CopyBuffer {
                destination,
                destination_offset,
                source,
                source_offset,
                num_bytes,
            } = *command
            {
                self.copy_buffer_range(
                    destination,
                    destination_offset,
                    source,
                    source_offset,
                    num_bytes,
                )?;
            }
        }

        if let Some(fence) = fence {
            self.fences
                .get_mut(fence)
                .ok_or(RhiError::InvalidHandle("fence"))?
                .signaled = true;
        }

        self.submissions.push(Submission {
            queue_type,
            frame_index: list.frame_index,
            commands: list.commands,
            fence,
            wait_semaphores: wait_semaphores.to_vec(),
            signal_semaphores: signal_semaphores.to_vec(),
        });
        Ok(())
    }

    fn wait_idle(&mut self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocation::BlockAllocationStrategy;
    use crate::types::BufferUsage;
    use nova_core::shaderpack::PixelFormat;

    fn memory(device: &mut HeadlessDevice, usage: MemoryUsage) -> DeviceMemoryResource {
        let handle = device
            .allocate_device_memory(4096, usage, ObjectType::BUFFER)
            .unwrap();
        DeviceMemoryResource::new(handle, BlockAllocationStrategy::new(4096, 64))
    }

    fn buffer(
        device: &mut HeadlessDevice,
        memory: &mut DeviceMemoryResource,
        size: u64,
        buffer_usage: BufferUsage,
    ) -> BufferHandle {
        device
            .create_buffer(&BufferCreateInfo { size, buffer_usage }, memory)
            .unwrap()
    }

    #[test]
    fn copies_run_on_submit() {
        let mut device = HeadlessDevice::default();
        let mut staging_memory = memory(&mut device, MemoryUsage::StagingBuffer);
        let mut device_memory = memory(&mut device, MemoryUsage::DeviceOnly);
        let staging = buffer(&mut device, &mut staging_memory, 8, BufferUsage::StagingBuffer);
        let vertices = buffer(&mut device, &mut device_memory, 8, BufferUsage::VertexBuffer);

        device
            .write_data_to_buffer(&[1, 2, 3, 4, 5, 6, 7, 8], 0, staging)
            .unwrap();
        let mut cmds = device
            .create_command_list(0, QueueType::Transfer, CommandListLevel::Primary)
            .unwrap();
        cmds.copy_buffer(vertices, 0, staging, 2, 4);

        assert_eq!(device.buffer_contents(vertices).unwrap(), vec![0; 8]);
        device
            .submit_command_list(cmds, QueueType::Transfer, None, &[], &[])
            .unwrap();
        assert_eq!(
            device.buffer_contents(vertices).unwrap(),
            vec![3, 4, 5, 6, 0, 0, 0, 0]
        );
    }

    #[test]
    fn device_only_memory_rejects_cpu_writes() {
        let mut device = HeadlessDevice::default();
        let mut device_memory = memory(&mut device, MemoryUsage::DeviceOnly);
        let vertices = buffer(&mut device, &mut device_memory, 8, BufferUsage::VertexBuffer);

        assert!(matches!(
            device.write_data_to_buffer(&[1], 0, vertices),
            Err(RhiError::MemoryNotHostVisible)
        ));
    }

    #[test]
    fn writes_past_the_end_are_rejected() {
        let mut device = HeadlessDevice::default();
        let mut staging_memory = memory(&mut device, MemoryUsage::StagingBuffer);
        let staging = buffer(&mut device, &mut staging_memory, 4, BufferUsage::StagingBuffer);

        assert!(matches!(
            device.write_data_to_buffer(&[0; 4], 2, staging),
            Err(RhiError::WriteOutOfBounds { capacity: 4, .. })
        ));
    }

    #[test]
    fn offsets_near_u64_max_do_not_wrap() {
        let mut device = HeadlessDevice::default();
        let mut staging_memory = memory(&mut device, MemoryUsage::StagingBuffer);
        let mut device_memory = memory(&mut device, MemoryUsage::DeviceOnly);
        let staging = buffer(&mut device, &mut staging_memory, 8, BufferUsage::StagingBuffer);
        let vertices = buffer(&mut device, &mut device_memory, 8, BufferUsage::VertexBuffer);

        assert!(matches!(
            device.write_data_to_buffer(&[1, 2], u64::MAX, staging),
            Err(RhiError::WriteOutOfBounds { offset: u64::MAX, capacity: 8, .. })
        ));

        let mut cmds = device
            .create_command_list(0, QueueType::Transfer, CommandListLevel::Primary)
            .unwrap();
        cmds.copy_buffer(vertices, u64::MAX, staging, 0, 4);
        assert!(matches!(
            device.submit_command_list(cmds, QueueType::Transfer, None, &[], &[]),
            Err(RhiError::WriteOutOfBounds { offset: u64::MAX, .. })
        ));
        assert_eq!(device.buffer_contents(vertices).unwrap(), vec![0; 8]);
    }

    #[test]
    fn destroying_a_buffer_returns_its_memory() {
        let mut device = HeadlessDevice::default();
        let mut staging_memory = memory(&mut device, MemoryUsage::StagingBuffer);
        let staging = buffer(&mut device, &mut staging_memory, 100, BufferUsage::StagingBuffer);
        assert_eq!(staging_memory.free_bytes(), 4096 - 128);

        device.destroy_buffer(staging, &mut staging_memory);

        assert_eq!(staging_memory.free_bytes(), 4096);
        assert!(device.buffer_contents(staging).is_none());
    }

    #[test]
    fn fences_signal_on_submit() {
        let mut device = HeadlessDevice::default();
        let fence = device.create_fence(false).unwrap();

        assert!(matches!(
            device.wait_for_fences(&[fence]),
            Err(RhiError::FenceNeverSignaled)
        ));

        let cmds = device
            .create_command_list(0, QueueType::Graphics, CommandListLevel::Primary)
            .unwrap();
        device
            .submit_command_list(cmds, QueueType::Graphics, Some(fence), &[], &[])
            .unwrap();
        device.wait_for_fences(&[fence]).unwrap();

        device.reset_fences(&[fence]).unwrap();
        assert_eq!(device.is_fence_signaled(fence), Some(false));
    }

    #[test]
    fn command_lists_die_with_their_frame_pool() {
        let mut device = HeadlessDevice::default();
        device.begin_frame(0).unwrap();
        let stale = device
            .create_command_list(0, QueueType::Graphics, CommandListLevel::Primary)
            .unwrap();

        device.begin_frame(1).unwrap();
        let other_frame = device
            .create_command_list(0, QueueType::Graphics, CommandListLevel::Primary)
            .unwrap();
        device.begin_frame(0).unwrap();

        assert!(device
            .submit_command_list(other_frame, QueueType::Graphics, None, &[], &[])
            .is_ok());
        assert!(device
            .submit_command_list(stale, QueueType::Graphics, None, &[], &[])
            .is_err());
    }

    #[test]
    fn renderpass_creation_validates_size_and_attachment_count() {
        let mut device = HeadlessDevice::new(HeadlessConfig {
            max_color_attachments: 1,
            ..HeadlessConfig::default()
        });
        let pass = RenderPassCreateInfo {
            name: "Gbuffer".into(),
            texture_outputs: vec![
                TextureAttachmentInfo::new("Albedo", PixelFormat::Rgba8, true),
                TextureAttachmentInfo::new("Normal", PixelFormat::Rgba16F, true),
            ],
            ..Default::default()
        };

        assert!(matches!(
            device.create_renderpass(&pass, UVec2::new(0, 720)),
            Err(RhiError::ZeroFramebufferSize { width: 0, .. })
        ));
        assert!(matches!(
            device.create_renderpass(&pass, UVec2::new(1280, 720)),
            Err(RhiError::TooManyColorAttachments { count: 2, max: 1, .. })
        ));
    }

    #[test]
    fn acquire_cycles_through_images() {
        let mut device = HeadlessDevice::default();
        let images: Vec<_> = (0..4)
            .map(|_| device.acquire_next_swapchain_image().unwrap())
            .collect();
        assert_eq!(images, vec![0, 1, 2, 0]);
    }
}
