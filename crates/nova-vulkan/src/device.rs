//! The Vulkan render device.

use std::collections::{HashMap, HashSet};

use ash::vk;
use glam::UVec2;
use nova_core::settings::NovaSettings;
use nova_core::shaderpack::{PipelineCreateInfo, RenderPassCreateInfo, SamplerCreateInfo, TextureAttachmentInfo};
use nova_rhi::{
    BufferCreateInfo, BufferHandle, CommandListLevel, DescriptorPoolHandle, DescriptorSetHandle, DescriptorSetWrite,
    DeviceInfo, DeviceMemoryHandle, DeviceMemoryResource, FenceHandle, FramebufferHandle, ImageCreateInfo,
    ImageHandle, ImageUsage, MemoryUsage, ObjectType, PipelineHandle, PipelineInterfaceHandle, QueueType,
    RenderDevice, RenderpassHandle, ResourceBindingDescription, Result, RhiError, SamplerHandle, SemaphoreHandle,
};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

use crate::capabilities::query_device_info;
use crate::command::{self, CommandPools, RecordContext, VulkanCommandList};
use crate::convert;
use crate::descriptors;
use crate::error::{self, VulkanError};
use crate::instance::{create_instance, select_physical_device};
use crate::memory::{ImageAllocator, VulkanMemory};
use crate::objects::{
    Objects, VulkanBuffer, VulkanDescriptorSet, VulkanFramebuffer, VulkanImage, VulkanPipeline, VulkanRenderpass,
};
use crate::pipeline;
use crate::swapchain::{color_subresource_range, create_surface, Swapchain};
use crate::sync;

/// Queue family indices. Compute and transfer fall back to the graphics
/// family when the device has no dedicated one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilies {
    pub graphics: u32,
    pub compute: u32,
    pub transfer: u32,
}

impl QueueFamilies {
    /// Pick queue families. The graphics family must also be able to
    /// present, as `can_present` reports.
    pub fn select(families: &[vk::QueueFamilyProperties], can_present: impl Fn(u32) -> bool) -> Option<Self> {
        let mut graphics = None;
        let mut compute = None;
        let mut transfer = None;

        for (index, family) in (0u32..).zip(families) {
            let flags = family.queue_flags;
            if flags.contains(vk::QueueFlags::GRAPHICS) && graphics.is_none() && can_present(index) {
                graphics = Some(index);
            }
            if flags.contains(vk::QueueFlags::COMPUTE) && !flags.contains(vk::QueueFlags::GRAPHICS) && compute.is_none()
            {
                compute = Some(index);
            }
            if flags.contains(vk::QueueFlags::TRANSFER)
                && !flags.intersects(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE)
                && transfer.is_none()
            {
                transfer = Some(index);
            }
        }

        let graphics = graphics?;
        let compute = compute.unwrap_or(graphics);
        Some(Self {
            graphics,
            compute,
            transfer: transfer.unwrap_or(compute),
        })
    }

    /// Every distinct family, for concurrent resource sharing.
    pub fn unique(&self) -> Vec<u32> {
        let mut families = vec![self.graphics];
        for family in [self.compute, self.transfer] {
            if !families.contains(&family) {
                families.push(family);
            }
        }
        families
    }
}

struct Queues {
    families: QueueFamilies,
    graphics: vk::Queue,
    compute: vk::Queue,
    transfer: vk::Queue,
}

impl Queues {
    fn get(&self, queue_type: QueueType) -> (u32, vk::Queue) {
        match queue_type {
            QueueType::Graphics => (self.families.graphics, self.graphics),
            QueueType::AsyncCompute => (self.families.compute, self.compute),
            QueueType::Transfer => (self.families.transfer, self.transfer),
        }
    }
}

/// [`RenderDevice`] backed by Vulkan 1.2 and a window surface.
///
/// Buffers are bound into raw `vkDeviceMemory` blocks that the renderer
/// sub-allocates itself; render targets get their memory from
/// `gpu-allocator`. Command lists are recorded on the CPU and translated into
/// command buffers from per-frame pools at submission.
pub struct VulkanRenderDevice {
    // Kept alive for the lifetime of the instance
    #[allow(dead_code)]
    entry: ash::Entry,
    instance: ash::Instance,
    surface_loader: ash::khr::surface::Instance,
    surface: vk::SurfaceKHR,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
    device: ash::Device,
    swapchain_loader: ash::khr::swapchain::Device,
    debug_utils: Option<ash::ext::debug_utils::Device>,
    info: DeviceInfo,
    queues: Queues,

    swapchain: Swapchain,
    image_allocator: ImageAllocator,
    objects: Objects,
    command_pools: CommandPools,
    one_shot_pool: vk::CommandPool,
    acquire_fence: vk::Fence,
    /// Memory types a buffer of any usage may live in
    buffer_memory_types: u32,

    current_image: Option<u32>,
    current_frame: u32,
    frame_generations: HashMap<u32, u64>,
}

impl VulkanRenderDevice {
    /// Create a device that presents to `window`.
    pub fn new<W>(window: &W, settings: &NovaSettings) -> std::result::Result<Self, VulkanError>
    where
        W: HasDisplayHandle + HasWindowHandle,
    {
        let enable_validation = settings.debug.enabled && settings.debug.enable_validation_layers;
        let display = window
            .display_handle()
            .map_err(|e| VulkanError::SurfaceCreation(format!("Failed to get display handle: {e}")))?
            .as_raw();

        unsafe {
            let entry = ash::Entry::load().map_err(|e| VulkanError::Loading(format!("Failed to load Vulkan: {e}")))?;
            let instance = create_instance(&entry, &settings.vulkan, enable_validation, display)?;
            let surface_loader = ash::khr::surface::Instance::new(&entry, &instance);
            let surface = create_surface(&entry, &instance, window)?;

            let physical_device = select_physical_device(&instance, &surface_loader, surface)?;
            let info = query_device_info(&instance, physical_device);
            tracing::info!("Selected GPU: {} ({:?})", info.device_name, info.architecture);

            let families = QueueFamilies::select(
                &instance.get_physical_device_queue_family_properties(physical_device),
                |index| {
                    surface_loader
                        .get_physical_device_surface_support(physical_device, index, surface)
                        .unwrap_or(false)
                },
            )
            .ok_or(VulkanError::NoSuitableDevice)?;
            tracing::debug!("Queue families: {families:?}");

            let device = create_logical_device(&instance, physical_device, &families)?;
            let queues = Queues {
                families,
                graphics: device.get_device_queue(families.graphics, 0),
                compute: device.get_device_queue(families.compute, 0),
                transfer: device.get_device_queue(families.transfer, 0),
            };

            let swapchain_loader = ash::khr::swapchain::Device::new(&instance, &device);
            let debug_utils = enable_validation.then(|| ash::ext::debug_utils::Device::new(&instance, &device));
            let image_allocator = ImageAllocator::new(&instance, &device, physical_device)?;
            let swapchain = Swapchain::new(
                &device,
                &surface_loader,
                &swapchain_loader,
                physical_device,
                surface,
                vk::Extent2D {
                    width: settings.window.width,
                    height: settings.window.height,
                },
            )?;

            let pool_info = vk::CommandPoolCreateInfo::default()
                .queue_family_index(families.graphics)
                .flags(vk::CommandPoolCreateFlags::TRANSIENT);
            let one_shot_pool = device.create_command_pool(&pool_info, None)?;
            let acquire_fence = sync::create_fence(&device, false)?;
            let buffer_memory_types = query_buffer_memory_types(&device, &families)?;

            let render_device = Self {
                entry,
                memory_properties: instance.get_physical_device_memory_properties(physical_device),
                instance,
                surface_loader,
                surface,
                device,
                swapchain_loader,
                debug_utils,
                info,
                queues,
                swapchain,
                image_allocator,
                objects: Objects::default(),
                command_pools: CommandPools::default(),
                one_shot_pool,
                acquire_fence,
                buffer_memory_types,
                current_image: None,
                current_frame: 0,
                frame_generations: HashMap::new(),
            };

            // Swapchain images rest in the present layout between frames
            let images = render_device.swapchain.images.clone();
            render_device.one_shot(|cmd| {
                let barriers: Vec<vk::ImageMemoryBarrier> = images
                    .iter()
                    .map(|&image| {
                        vk::ImageMemoryBarrier::default()
                            .image(image)
                            .old_layout(vk::ImageLayout::UNDEFINED)
                            .new_layout(vk::ImageLayout::PRESENT_SRC_KHR)
                            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                            .subresource_range(color_subresource_range())
                    })
                    .collect();
                render_device.device.cmd_pipeline_barrier(
                    cmd,
                    vk::PipelineStageFlags::TOP_OF_PIPE,
                    vk::PipelineStageFlags::BOTTOM_OF_PIPE,
                    vk::DependencyFlags::empty(),
                    &[],
                    &[],
                    &barriers,
                );
            })?;

            Ok(render_device)
        }
    }

    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    pub fn queue_families(&self) -> QueueFamilies {
        self.queues.families
    }

    fn sharing(&self) -> (vk::SharingMode, Vec<u32>) {
        let families = self.queues.families.unique();
        if families.len() > 1 {
            (vk::SharingMode::CONCURRENT, families)
        } else {
            (vk::SharingMode::EXCLUSIVE, Vec::new())
        }
    }

    fn one_shot<F: FnOnce(vk::CommandBuffer)>(&self, f: F) -> error::Result<()> {
        unsafe { command::execute_one_shot(&self.device, self.one_shot_pool, self.queues.graphics, f) }
    }

    fn fence(&self, fence: FenceHandle) -> Result<vk::Fence> {
        self.objects
            .fences
            .get(fence)
            .copied()
            .ok_or(RhiError::InvalidHandle("fence"))
    }

    fn semaphores(&self, semaphores: &[SemaphoreHandle]) -> Result<Vec<vk::Semaphore>> {
        semaphores
            .iter()
            .map(|semaphore| {
                self.objects
                    .semaphores
                    .get(*semaphore)
                    .copied()
                    .ok_or(RhiError::InvalidHandle("semaphore"))
            })
            .collect()
    }
}

/// Memory types usable by a buffer of every usage the renderer creates.
unsafe fn query_buffer_memory_types(device: &ash::Device, families: &QueueFamilies) -> error::Result<u32> {
    let family_list = families.unique();
    let mut create_info = vk::BufferCreateInfo::default().size(256).usage(
        vk::BufferUsageFlags::UNIFORM_BUFFER
            | vk::BufferUsageFlags::INDEX_BUFFER
            | vk::BufferUsageFlags::VERTEX_BUFFER
            | vk::BufferUsageFlags::TRANSFER_SRC
            | vk::BufferUsageFlags::TRANSFER_DST,
    );
    if family_list.len() > 1 {
        create_info = create_info
            .sharing_mode(vk::SharingMode::CONCURRENT)
            .queue_family_indices(&family_list);
    }

    let scratch = device.create_buffer(&create_info, None)?;
    let requirements = device.get_buffer_memory_requirements(scratch);
    device.destroy_buffer(scratch, None);
    Ok(requirements.memory_type_bits)
}

unsafe fn create_logical_device(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    families: &QueueFamilies,
) -> error::Result<ash::Device> {
    let unique: HashSet<u32> = families.unique().into_iter().collect();
    let priority = 1.0_f32;
    let queue_infos: Vec<vk::DeviceQueueCreateInfo> = unique
        .iter()
        .map(|&family| {
            vk::DeviceQueueCreateInfo::default()
                .queue_family_index(family)
                .queue_priorities(std::slice::from_ref(&priority))
        })
        .collect();

    let extension_names = [ash::khr::swapchain::NAME.as_ptr()];

    let mut vulkan_1_2_features = vk::PhysicalDeviceVulkan12Features::default()
        .descriptor_indexing(true)
        .runtime_descriptor_array(true)
        .descriptor_binding_partially_bound(true)
        .descriptor_binding_variable_descriptor_count(true)
        .shader_sampled_image_array_non_uniform_indexing(true);
    let features = vk::PhysicalDeviceFeatures::default();
    let mut features2 = vk::PhysicalDeviceFeatures2::default()
        .features(features)
        .push_next(&mut vulkan_1_2_features);

    let create_info = vk::DeviceCreateInfo::default()
        .queue_create_infos(&queue_infos)
        .enabled_extension_names(&extension_names)
        .push_next(&mut features2);

    Ok(instance.create_device(physical_device, &create_info, None)?)
}

impl RenderDevice for VulkanRenderDevice {
    type CommandList = VulkanCommandList;

    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn swapchain_size(&self) -> UVec2 {
        UVec2::new(self.swapchain.extent.width, self.swapchain.extent.height)
    }

    fn num_swapchain_images(&self) -> u32 {
        u32::try_from(self.swapchain.images.len()).unwrap_or(u32::MAX)
    }

    fn acquire_next_swapchain_image(&mut self) -> Result<u32> {
        unsafe {
            let index = self
                .swapchain
                .acquire_next_image(&self.swapchain_loader, self.acquire_fence)?;
            sync::wait_for_fences(&self.device, &[self.acquire_fence], true)?;
            self.current_image = Some(index);
            Ok(index)
        }
    }

    fn present(&mut self, image_index: u32) -> Result<()> {
        unsafe {
            self.swapchain
                .present(&self.swapchain_loader, self.queues.graphics, image_index)?;
        }
        self.current_image = None;
        Ok(())
    }

    fn allocate_device_memory(&mut self, size: u64, usage: MemoryUsage, allowed_objects: ObjectType) -> Result<DeviceMemoryHandle> {
        if !allowed_objects.contains(ObjectType::BUFFER) {
            tracing::warn!("Device memory only backs buffers here, images allocate their own");
        }
        let memory = unsafe {
            VulkanMemory::allocate(
                &self.device,
                &self.memory_properties,
                self.buffer_memory_types,
                size,
                usage,
            )?
        };
        Ok(self.objects.memories.insert(memory))
    }

    fn free_device_memory(&mut self, memory: DeviceMemoryHandle) {
        if let Some(memory) = self.objects.memories.remove(memory) {
            unsafe { memory.free(&self.device) };
        }
    }

    fn create_buffer(&mut self, info: &BufferCreateInfo, memory: &mut DeviceMemoryResource) -> Result<BufferHandle> {
        let device_memory = self
            .objects
            .memories
            .get(memory.memory())
            .ok_or(RhiError::InvalidHandle("device memory"))?
            .memory;

        let (sharing_mode, families) = self.sharing();
        let create_info = vk::BufferCreateInfo::default()
            .size(info.size.max(1))
            .usage(convert::buffer_usage(info.buffer_usage))
            .sharing_mode(sharing_mode)
            .queue_family_indices(&families);

        unsafe {
            let buffer = self.device.create_buffer(&create_info, None).map_err(error::rhi)?;
            let requirements = self.device.get_buffer_memory_requirements(buffer);

            let Some(allocation) = memory.allocate(requirements.size) else {
                self.device.destroy_buffer(buffer, None);
                return Err(RhiError::OutOfDeviceMemory {
                    requested: requirements.size,
                });
            };
            if allocation.allocation.offset % requirements.alignment.max(1) != 0 {
                memory.free(&allocation);
                self.device.destroy_buffer(buffer, None);
                return Err(RhiError::Backend(format!(
                    "Buffer offset {} does not meet the device's {}-byte alignment",
                    allocation.allocation.offset, requirements.alignment
                )));
            }
            if let Err(e) = self
                .device
                .bind_buffer_memory(buffer, device_memory, allocation.allocation.offset)
            {
                memory.free(&allocation);
                self.device.destroy_buffer(buffer, None);
                return Err(error::rhi(e));
            }

            Ok(self.objects.buffers.insert(VulkanBuffer {
                buffer,
                size: info.size,
                allocation,
            }))
        }
    }

    fn write_data_to_buffer(&mut self, data: &[u8], offset: u64, buffer: BufferHandle) -> Result<()> {
        let buffer = self
            .objects
            .buffers
            .get(buffer)
            .ok_or(RhiError::InvalidHandle("buffer"))?;
        let size = data.len() as u64;
        if offset.checked_add(size).map_or(true, |end| end > buffer.size) {
            return Err(RhiError::WriteOutOfBounds {
                offset,
                size,
                capacity: buffer.size,
            });
        }

        let memory = self
            .objects
            .memories
            .get(buffer.allocation.memory)
            .ok_or(RhiError::InvalidHandle("device memory"))?;
        unsafe { memory.write(&self.device, buffer.allocation.allocation.offset + offset, data) }
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle, memory: &mut DeviceMemoryResource) {
        if let Some(buffer) = self.objects.buffers.remove(buffer) {
            unsafe { self.device.destroy_buffer(buffer.buffer, None) };
            memory.free(&buffer.allocation);
        }
    }

    fn create_image(&mut self, info: &ImageCreateInfo) -> Result<ImageHandle> {
        if info.size.x == 0 || info.size.y == 0 {
            return Err(RhiError::Backend(format!("Image {} has a zero dimension", info.name)));
        }

        let is_depth = info.pixel_format.is_depth();
        let format = convert::pixel_format(info.pixel_format);
        let aspect = convert::aspect_of(info.pixel_format);
        let resting_layout = pipeline::resting_layout(info.pixel_format);
        let usage = match (info.usage, is_depth) {
            (ImageUsage::RenderTarget, true) => vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            (ImageUsage::RenderTarget, false) => vk::ImageUsageFlags::COLOR_ATTACHMENT,
            (ImageUsage::SampledImage, _) => vk::ImageUsageFlags::empty(),
        } | vk::ImageUsageFlags::SAMPLED
            | vk::ImageUsageFlags::TRANSFER_DST;

        let (sharing_mode, families) = self.sharing();
        let create_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(format)
            .extent(vk::Extent3D {
                width: info.size.x,
                height: info.size.y,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(usage)
            .sharing_mode(sharing_mode)
            .queue_family_indices(&families)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        unsafe {
            let image = self.device.create_image(&create_info, None).map_err(error::rhi)?;
            let allocation = match self.image_allocator.allocate_image(&self.device, image, &info.name) {
                Ok(allocation) => allocation,
                Err(e) => {
                    self.device.destroy_image(image, None);
                    return Err(e.into());
                }
            };

            let range = vk::ImageSubresourceRange::default()
                .aspect_mask(aspect)
                .level_count(1)
                .layer_count(1);
            let view_info = vk::ImageViewCreateInfo::default()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(format)
                .subresource_range(range);
            let view = match self.device.create_image_view(&view_info, None) {
                Ok(view) => view,
                Err(e) => {
                    self.device.destroy_image(image, None);
                    self.image_allocator.free(allocation);
                    return Err(error::rhi(e));
                }
            };

            let vulkan_image = VulkanImage {
                image,
                view,
                aspect,
                size: info.size,
                resting_layout,
                allocation: Some(allocation),
            };

            let transition = self.one_shot(|cmd| {
                let barrier = vk::ImageMemoryBarrier::default()
                    .image(image)
                    .old_layout(vk::ImageLayout::UNDEFINED)
                    .new_layout(resting_layout)
                    .dst_access_mask(vk::AccessFlags::MEMORY_READ | vk::AccessFlags::MEMORY_WRITE)
                    .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .subresource_range(range);
                self.device.cmd_pipeline_barrier(
                    cmd,
                    vk::PipelineStageFlags::TOP_OF_PIPE,
                    vk::PipelineStageFlags::ALL_COMMANDS,
                    vk::DependencyFlags::empty(),
                    &[],
                    &[],
                    &[barrier],
                );
            });
            if let Err(e) = transition {
                vulkan_image.destroy(&self.device, &mut self.image_allocator);
                return Err(e.into());
            }

            tracing::debug!(
                "Created {}x{} image {} ({:?})",
                info.size.x,
                info.size.y,
                info.name,
                info.pixel_format
            );
            Ok(self.objects.images.insert(vulkan_image))
        }
    }

    fn destroy_image(&mut self, image: ImageHandle) {
        if let Some(image) = self.objects.images.remove(image) {
            unsafe { image.destroy(&self.device, &mut self.image_allocator) };
        }
    }

    fn create_renderpass(&mut self, data: &RenderPassCreateInfo, framebuffer_size: UVec2) -> Result<RenderpassHandle> {
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

        let writes_to_backbuffer = data.writes_to_backbuffer();
        if writes_to_backbuffer && (count > 1 || data.depth_texture.is_some()) {
            return Err(RhiError::RenderpassCreation(format!(
                "{} renders to the backbuffer and other attachments",
                data.name
            )));
        }

        unsafe {
            let renderpass = pipeline::create_renderpass(
                &self.device,
                &data.name,
                &data.texture_outputs,
                data.depth_texture.as_ref(),
                self.swapchain.format,
            )?;

            let mut backbuffer_framebuffers = Vec::new();
            if writes_to_backbuffer {
                let size = UVec2::new(self.swapchain.extent.width, self.swapchain.extent.height);
                for &view in &self.swapchain.image_views {
                    match pipeline::create_framebuffer(&self.device, renderpass, &[view], size) {
                        Ok(framebuffer) => backbuffer_framebuffers.push(framebuffer),
                        Err(e) => {
                            for framebuffer in backbuffer_framebuffers {
                                self.device.destroy_framebuffer(framebuffer, None);
                            }
                            self.device.destroy_render_pass(renderpass, None);
                            return Err(e);
                        }
                    }
                }
            }

            Ok(self.objects.renderpasses.insert(VulkanRenderpass {
                renderpass,
                size: framebuffer_size,
                num_attachments: data.texture_outputs.len() + usize::from(data.depth_texture.is_some()),
                has_depth: data.depth_texture.is_some(),
                backbuffer_framebuffers,
            }))
        }
    }

    fn destroy_renderpass(&mut self, renderpass: RenderpassHandle) {
        if let Some(renderpass) = self.objects.renderpasses.remove(renderpass) {
            unsafe { renderpass.destroy(&self.device) };
        }
    }

    fn create_framebuffer(
        &mut self,
        renderpass: RenderpassHandle,
        attachments: &[ImageHandle],
        framebuffer_size: UVec2,
    ) -> Result<FramebufferHandle> {
        let renderpass = self
            .objects
            .renderpasses
            .get(renderpass)
            .ok_or(RhiError::InvalidHandle("renderpass"))?;
        if renderpass.size != framebuffer_size {
            tracing::warn!(
                "Framebuffer is {framebuffer_size} but its renderpass was made for {}",
                renderpass.size
            );
        }

        let views = attachments
            .iter()
            .map(|image| self.objects.images.get(*image).map(|image| image.view))
            .collect::<Option<Vec<_>>>()
            .ok_or(RhiError::InvalidHandle("image"))?;

        let framebuffer = unsafe { pipeline::create_framebuffer(&self.device, renderpass.renderpass, &views, framebuffer_size)? };
        Ok(self.objects.framebuffers.insert(VulkanFramebuffer {
            framebuffer,
            size: framebuffer_size,
        }))
    }

    fn destroy_framebuffer(&mut self, framebuffer: FramebufferHandle) {
        if let Some(framebuffer) = self.objects.framebuffers.remove(framebuffer) {
            unsafe { self.device.destroy_framebuffer(framebuffer.framebuffer, None) };
        }
    }

    fn create_pipeline_interface(
        &mut self,
        bindings: &HashMap<String, ResourceBindingDescription>,
        color_attachments: &[TextureAttachmentInfo],
        depth_texture: Option<&TextureAttachmentInfo>,
    ) -> Result<PipelineInterfaceHandle> {
        let interface = unsafe {
            pipeline::create_pipeline_interface(
                &self.device,
                bindings,
                color_attachments,
                depth_texture,
                self.swapchain.format,
            )?
        };
        Ok(self.objects.pipeline_interfaces.insert(interface))
    }

    fn destroy_pipeline_interface(&mut self, pipeline_interface: PipelineInterfaceHandle) {
        if let Some(interface) = self.objects.pipeline_interfaces.remove(pipeline_interface) {
            unsafe { interface.destroy(&self.device) };
        }
    }

    fn create_pipeline(&mut self, pipeline_interface: PipelineInterfaceHandle, data: &PipelineCreateInfo) -> Result<PipelineHandle> {
        let interface = self
            .objects
            .pipeline_interfaces
            .get(pipeline_interface)
            .ok_or(RhiError::InvalidHandle("pipeline interface"))?;
        let pipeline = unsafe { pipeline::create_graphics_pipeline(&self.device, interface, data)? };
        tracing::debug!("Created pipeline {}", data.name);
        Ok(self.objects.pipelines.insert(VulkanPipeline { pipeline }))
    }

    fn destroy_pipeline(&mut self, pipeline: PipelineHandle) {
        if let Some(pipeline) = self.objects.pipelines.remove(pipeline) {
            unsafe { self.device.destroy_pipeline(pipeline.pipeline, None) };
        }
    }

    fn create_descriptor_pool(
        &mut self,
        num_sampled_images: u32,
        num_samplers: u32,
        num_uniform_buffers: u32,
    ) -> Result<DescriptorPoolHandle> {
        let pool = unsafe {
            descriptors::create_descriptor_pool(&self.device, num_sampled_images, num_samplers, num_uniform_buffers)?
        };
        Ok(self.objects.descriptor_pools.insert(pool))
    }

    fn destroy_descriptor_pool(&mut self, pool: DescriptorPoolHandle) {
        if let Some(vk_pool) = self.objects.descriptor_pools.remove(pool) {
            self.objects.descriptor_sets.retain(|_, set| set.pool != pool);
            unsafe { self.device.destroy_descriptor_pool(vk_pool, None) };
        }
    }

    fn create_descriptor_sets(
        &mut self,
        pipeline_interface: PipelineInterfaceHandle,
        pool: DescriptorPoolHandle,
    ) -> Result<Vec<DescriptorSetHandle>> {
        let interface = self
            .objects
            .pipeline_interfaces
            .get(pipeline_interface)
            .ok_or(RhiError::InvalidHandle("pipeline interface"))?;
        let vk_pool = *self
            .objects
            .descriptor_pools
            .get(pool)
            .ok_or(RhiError::InvalidHandle("descriptor pool"))?;

        let sets = unsafe { descriptors::allocate_sets(&self.device, vk_pool, interface)? };
        let binding_types = interface.binding_types.clone();

        Ok(sets
            .into_iter()
            .zip(binding_types)
            .map(|(set, binding_types)| {
                self.objects.descriptor_sets.insert(VulkanDescriptorSet {
                    set,
                    pool,
                    binding_types,
                })
            })
            .collect())
    }

    fn update_descriptor_sets(&mut self, writes: &[DescriptorSetWrite]) {
        unsafe { descriptors::update_descriptor_sets(&self.device, &self.objects, writes) };
    }

    fn create_sampler(&mut self, info: &SamplerCreateInfo) -> Result<SamplerHandle> {
        let filter = convert::filter(info.filter);
        let address_mode = convert::address_mode(info.wrap_mode);
        let create_info = vk::SamplerCreateInfo::default()
            .mag_filter(filter)
            .min_filter(filter)
            .mipmap_mode(vk::SamplerMipmapMode::NEAREST)
            .address_mode_u(address_mode)
            .address_mode_v(address_mode)
            .address_mode_w(address_mode)
            .max_lod(vk::LOD_CLAMP_NONE);

        let sampler = unsafe { self.device.create_sampler(&create_info, None).map_err(error::rhi)? };
        Ok(self.objects.samplers.insert(sampler))
    }

    fn destroy_sampler(&mut self, sampler: SamplerHandle) {
        if let Some(sampler) = self.objects.samplers.remove(sampler) {
            unsafe { self.device.destroy_sampler(sampler, None) };
        }
    }

    fn create_semaphores(&mut self, count: u32) -> Result<Vec<SemaphoreHandle>> {
        (0..count)
            .map(|_| {
                let semaphore = unsafe { sync::create_semaphore(&self.device)? };
                Ok(self.objects.semaphores.insert(semaphore))
            })
            .collect()
    }

    fn destroy_semaphores(&mut self, semaphores: &[SemaphoreHandle]) {
        for semaphore in semaphores {
            if let Some(semaphore) = self.objects.semaphores.remove(*semaphore) {
                unsafe { self.device.destroy_semaphore(semaphore, None) };
            }
        }
    }

    fn create_fences(&mut self, count: u32, signaled: bool) -> Result<Vec<FenceHandle>> {
        (0..count)
            .map(|_| {
                let fence = unsafe { sync::create_fence(&self.device, signaled)? };
                Ok(self.objects.fences.insert(fence))
            })
            .collect()
    }

    fn destroy_fences(&mut self, fences: &[FenceHandle]) {
        for fence in fences {
            if let Some(fence) = self.objects.fences.remove(*fence) {
                unsafe { self.device.destroy_fence(fence, None) };
            }
        }
    }

    fn wait_for_fences(&mut self, fences: &[FenceHandle]) -> Result<()> {
        let fences = fences
            .iter()
            .map(|fence| self.fence(*fence))
            .collect::<Result<Vec<_>>>()?;
        unsafe { sync::wait_for_fences(&self.device, &fences, false)? };
        Ok(())
    }

    fn reset_fences(&mut self, fences: &[FenceHandle]) -> Result<()> {
        let fences = fences
            .iter()
            .map(|fence| self.fence(*fence))
            .collect::<Result<Vec<_>>>()?;
        if !fences.is_empty() {
            unsafe { self.device.reset_fences(&fences).map_err(error::rhi)? };
        }
        Ok(())
    }

    fn begin_frame(&mut self, frame_index: u32) -> Result<()> {
        unsafe { self.command_pools.reset_frame(&self.device, frame_index)? };
        self.current_frame = frame_index;
        *self.frame_generations.entry(frame_index).or_insert(0) += 1;
        Ok(())
    }

    fn create_command_list(
        &mut self,
        thread_index: u32,
        queue_type: QueueType,
        level: CommandListLevel,
    ) -> Result<Self::CommandList> {
        if level == CommandListLevel::Secondary {
            tracing::trace!("Secondary command lists are inlined into the list that executes them");
        }
        Ok(VulkanCommandList {
            queue_type,
            thread_index,
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
        if list.queue_type != queue_type {
            tracing::warn!(
                "Command list created for the {:?} queue is submitted to the {queue_type:?} queue",
                list.queue_type
            );
        }

        let fence = fence.map(|fence| self.fence(fence)).transpose()?.unwrap_or_default();
        let waits = self.semaphores(wait_semaphores)?;
        let signals = self.semaphores(signal_semaphores)?;
        let wait_stages = vec![vk::PipelineStageFlags::ALL_COMMANDS; waits.len()];
        let (family, queue) = self.queues.get(queue_type);

        unsafe {
            let cmd = self
                .command_pools
                .next_buffer(&self.device, list.frame_index, list.thread_index, family)?;
            let begin_info = vk::CommandBufferBeginInfo::default().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
            self.device.begin_command_buffer(cmd, &begin_info).map_err(error::rhi)?;

            let ctx = RecordContext {
                objects: &self.objects,
                swapchain_image: self.current_image,
                swapchain_extent: self.swapchain.extent,
                graphics_capable: family == self.queues.families.graphics,
                debug_utils: self.debug_utils.as_ref(),
            };
            command::record_commands(&self.device, cmd, &list.commands, &ctx);
            self.device.end_command_buffer(cmd).map_err(error::rhi)?;

            let command_buffers = [cmd];
            let submit_info = vk::SubmitInfo::default()
                .command_buffers(&command_buffers)
                .wait_semaphores(&waits)
                .wait_dst_stage_mask(&wait_stages)
                .signal_semaphores(&signals);
            self.device
                .queue_submit(queue, &[submit_info], fence)
                .map_err(error::rhi)?;
        }
        Ok(())
    }

    fn wait_idle(&mut self) -> Result<()> {
        unsafe { self.device.device_wait_idle().map_err(error::rhi) }
    }
}

impl Drop for VulkanRenderDevice {
    fn drop(&mut self) {
        unsafe {
            if let Err(e) = self.device.device_wait_idle() {
                tracing::error!("Could not wait for the device before destroying it: {e}");
            }

            self.objects.destroy_all(&self.device, &mut self.image_allocator);
            self.command_pools.destroy(&self.device);
            self.device.destroy_command_pool(self.one_shot_pool, None);
            self.device.destroy_fence(self.acquire_fence, None);
            self.swapchain.destroy(&self.device, &self.swapchain_loader);

            // Frees every image allocation, so it must run before the device goes
            self.image_allocator.shutdown();

            self.device.destroy_device(None);
            self.surface_loader.destroy_surface(self.surface, None);
            self.instance.destroy_instance(None);
        }
        tracing::info!("Vulkan device destroyed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: 1,
            ..Default::default()
        }
    }

    #[test]
    fn dedicated_families_are_preferred() {
        let families = [
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::TRANSFER),
        ];
        let selected = QueueFamilies::select(&families, |_| true);
        assert_eq!(
            selected,
            Some(QueueFamilies {
                graphics: 0,
                compute: 1,
                transfer: 2,
            })
        );
        assert_eq!(selected.map(|families| families.unique()), Some(vec![0, 1, 2]));
    }

    #[test]
    fn single_family_devices_share_it() {
        let families = [family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER)];
        let selected = QueueFamilies::select(&families, |_| true);
        assert_eq!(selected.map(|families| families.unique()), Some(vec![0]));
    }

    #[test]
    fn graphics_family_must_present() {
        let families = [
            family(vk::QueueFlags::GRAPHICS),
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE),
        ];
        assert_eq!(QueueFamilies::select(&families, |index| index == 1).map(|f| f.graphics), Some(1));
        assert_eq!(QueueFamilies::select(&families, |_| false), None);
    }
}
