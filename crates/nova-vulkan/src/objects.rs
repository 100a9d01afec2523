//! Device objects owned by the Vulkan backend, addressed by RHI handles.

use std::collections::HashMap;

use ash::vk;
use glam::UVec2;
use gpu_allocator::vulkan::Allocation;
use nova_rhi::{
    BufferHandle, DescriptorPoolHandle, DescriptorSetHandle, DeviceMemoryAllocation, DeviceMemoryHandle, FenceHandle,
    FramebufferHandle, ImageHandle, PipelineHandle, PipelineInterfaceHandle, RenderpassHandle, SamplerHandle,
    SemaphoreHandle,
};
use slotmap::SlotMap;

use crate::memory::{ImageAllocator, VulkanMemory};

pub struct VulkanBuffer {
    pub buffer: vk::Buffer,
    pub size: u64,
    pub allocation: DeviceMemoryAllocation,
}

pub struct VulkanImage {
    pub image: vk::Image,
    pub view: vk::ImageView,
    pub aspect: vk::ImageAspectFlags,
    pub size: UVec2,
    /// Layout the image is kept in between renderpasses and uploads
    pub resting_layout: vk::ImageLayout,
    pub allocation: Option<Allocation>,
}

pub struct VulkanRenderpass {
    pub renderpass: vk::RenderPass,
    pub size: UVec2,
    pub num_attachments: usize,
    /// The last attachment is a depth attachment
    pub has_depth: bool,
    /// One framebuffer per swapchain image, for passes that render to the
    /// backbuffer
    pub backbuffer_framebuffers: Vec<vk::Framebuffer>,
}

pub struct VulkanFramebuffer {
    pub framebuffer: vk::Framebuffer,
    pub size: UVec2,
}

pub struct VulkanPipelineInterface {
    pub set_layouts: Vec<vk::DescriptorSetLayout>,
    pub layout: vk::PipelineLayout,
    /// Renderpass the interface's pipelines are compatible with
    pub renderpass: vk::RenderPass,
    pub num_color_attachments: usize,
    /// Descriptor type of every binding, per set
    pub binding_types: Vec<HashMap<u32, vk::DescriptorType>>,
    /// Sets whose last binding is a runtime-sized array
    pub variable_sets: Vec<bool>,
}

pub struct VulkanPipeline {
    pub pipeline: vk::Pipeline,
}

pub struct VulkanDescriptorSet {
    pub set: vk::DescriptorSet,
    pub pool: DescriptorPoolHandle,
    pub binding_types: HashMap<u32, vk::DescriptorType>,
}

/// Every object the device hands out a handle for.
#[derive(Default)]
pub struct Objects {
    pub memories: SlotMap<DeviceMemoryHandle, VulkanMemory>,
    pub buffers: SlotMap<BufferHandle, VulkanBuffer>,
    pub images: SlotMap<ImageHandle, VulkanImage>,
    pub renderpasses: SlotMap<RenderpassHandle, VulkanRenderpass>,
    pub framebuffers: SlotMap<FramebufferHandle, VulkanFramebuffer>,
    pub pipeline_interfaces: SlotMap<PipelineInterfaceHandle, VulkanPipelineInterface>,
    pub pipelines: SlotMap<PipelineHandle, VulkanPipeline>,
    pub descriptor_pools: SlotMap<DescriptorPoolHandle, vk::DescriptorPool>,
    pub descriptor_sets: SlotMap<DescriptorSetHandle, VulkanDescriptorSet>,
    pub samplers: SlotMap<SamplerHandle, vk::Sampler>,
    pub semaphores: SlotMap<SemaphoreHandle, vk::Semaphore>,
    pub fences: SlotMap<FenceHandle, vk::Fence>,
}

impl VulkanImage {
    /// # Safety
    /// The image must not be in use.
    pub unsafe fn destroy(self, device: &ash::Device, allocator: &mut ImageAllocator) {
        device.destroy_image_view(self.view, None);
        device.destroy_image(self.image, None);
        if let Some(allocation) = self.allocation {
            allocator.free(allocation);
        }
    }
}

impl VulkanRenderpass {
    /// # Safety
    /// The renderpass must not be in use.
    pub unsafe fn destroy(self, device: &ash::Device) {
        for framebuffer in self.backbuffer_framebuffers {
            device.destroy_framebuffer(framebuffer, None);
        }
        device.destroy_render_pass(self.renderpass, None);
    }
}

impl VulkanPipelineInterface {
    /// # Safety
    /// No pipeline created from the interface may be in use.
    pub unsafe fn destroy(self, device: &ash::Device) {
        device.destroy_pipeline_layout(self.layout, None);
        for layout in self.set_layouts {
            device.destroy_descriptor_set_layout(layout, None);
        }
        device.destroy_render_pass(self.renderpass, None);
    }
}

impl Objects {
    /// Destroy everything still alive. Leaked objects are reported, since the
    /// renderer is expected to release what it creates.
    ///
    /// # Safety
    /// The device must be idle.
    pub unsafe fn destroy_all(&mut self, device: &ash::Device, allocator: &mut ImageAllocator) {
        let leaked = self.buffers.len() + self.images.len() + self.renderpasses.len() + self.pipelines.len();
        if leaked > 0 {
            tracing::warn!("{leaked} buffers, images, renderpasses and pipelines were never destroyed");
        }

        for (_, pipeline) in self.pipelines.drain() {
            device.destroy_pipeline(pipeline.pipeline, None);
        }
        for (_, interface) in self.pipeline_interfaces.drain() {
            interface.destroy(device);
        }
        for (_, framebuffer) in self.framebuffers.drain() {
            device.destroy_framebuffer(framebuffer.framebuffer, None);
        }
        for (_, renderpass) in self.renderpasses.drain() {
            renderpass.destroy(device);
        }
        for (_, image) in self.images.drain() {
            image.destroy(device, allocator);
        }
        for (_, buffer) in self.buffers.drain() {
            device.destroy_buffer(buffer.buffer, None);
        }
        for (_, memory) in self.memories.drain() {
            memory.free(device);
        }
        self.descriptor_sets.clear();
        for (_, pool) in self.descriptor_pools.drain() {
            device.destroy_descriptor_pool(pool, None);
        }
        for (_, sampler) in self.samplers.drain() {
            device.destroy_sampler(sampler, None);
        }
        for (_, semaphore) in self.semaphores.drain() {
            device.destroy_semaphore(semaphore, None);
        }
        for (_, fence) in self.fences.drain() {
            device.destroy_fence(fence, None);
        }
    }
}
