//! Command lists and command pools.
//!
//! A [`VulkanCommandList`] only records RHI commands. The device turns the
//! recording into a `vk::CommandBuffer` when the list is submitted, which
//! keeps command lists `Send` and free of device borrows while the renderer
//! walks its passes.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::ffi::CString;

use ash::vk;
use glam::UVec2;
use nova_rhi::{
    BarrierResource, BufferHandle, CommandList, DescriptorSetHandle, FramebufferHandle, ImageHandle, IndexType,
    PipelineHandle, PipelineInterfaceHandle, PipelineStage, QueueType, RecordedCommand, RenderpassHandle,
    ResourceAccess, ResourceBarrier,
};

use crate::convert;
use crate::error::Result;
use crate::objects::Objects;

/// Command list of the [`VulkanRenderDevice`](crate::VulkanRenderDevice).
#[derive(Debug)]
pub struct VulkanCommandList {
    pub(crate) queue_type: QueueType,
    pub(crate) thread_index: u32,
    pub(crate) frame_index: u32,
    pub(crate) pool_generation: u64,
    pub(crate) commands: Vec<RecordedCommand>,
}

impl VulkanCommandList {
    pub fn commands(&self) -> &[RecordedCommand] {
        &self.commands
    }

    pub fn queue_type(&self) -> QueueType {
        self.queue_type
    }
}

impl CommandList for VulkanCommandList {
    fn set_debug_name(&mut self, name: &str) {
        self.commands.push(RecordedCommand::SetDebugName(name.to_string()));
    }

    fn resource_barriers(&mut self, stages_before: PipelineStage, stages_after: PipelineStage, barriers: &[ResourceBarrier]) {
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

    fn upload_data_to_image(&mut self, image: ImageHandle, size: UVec2, bytes_per_pixel: u32, staging_buffer: BufferHandle) {
        self.commands.push(RecordedCommand::UploadDataToImage {
            image,
            size,
            bytes_per_pixel,
            staging_buffer,
        });
    }

    /// Secondary lists are inlined into this one.
    fn execute_command_lists(&mut self, lists: Vec<Self>) {
        for list in lists {
            self.commands.extend(list.commands);
        }
    }

    fn begin_renderpass(&mut self, renderpass: RenderpassHandle, framebuffer: Option<FramebufferHandle>) {
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

    fn bind_descriptor_sets(&mut self, descriptor_sets: &[DescriptorSetHandle], pipeline_interface: PipelineInterfaceHandle) {
        self.commands.push(RecordedCommand::BindDescriptorSets {
            descriptor_sets: descriptor_sets.to_vec(),
            pipeline_interface,
        });
    }

    fn bind_vertex_buffers(&mut self, buffers: &[BufferHandle]) {
        self.commands.push(RecordedCommand::BindVertexBuffers(buffers.to_vec()));
    }

    fn bind_index_buffer(&mut self, buffer: BufferHandle, index_type: IndexType) {
        self.commands.push(RecordedCommand::BindIndexBuffer { buffer, index_type });
    }

    fn draw_indexed_mesh(&mut self, num_indices: u32, num_instances: u32, first_instance: u32) {
        self.commands.push(RecordedCommand::DrawIndexedMesh {
            num_indices,
            num_instances,
            first_instance,
        });
    }

    fn set_scissor_rect(&mut self, x: u32, y: u32, width: u32, height: u32) {
        self.commands.push(RecordedCommand::SetScissorRect { x, y, width, height });
    }
}

struct PoolEntry {
    pool: vk::CommandPool,
    buffers: Vec<vk::CommandBuffer>,
    /// Buffers before this index are in use this frame
    next: usize,
}

/// One command pool per in-flight frame, recording thread and queue family.
///
/// Command buffers are reused: resetting a frame's pools rewinds them, and
/// new buffers are allocated only when a frame submits more lists than any
/// frame before it.
#[derive(Default)]
pub struct CommandPools {
    pools: HashMap<(u32, u32, u32), PoolEntry>,
}

impl CommandPools {
    /// A primary command buffer from the pool for `(frame_index, thread_index, queue_family)`.
    ///
    /// # Safety
    /// The device must be valid.
    pub unsafe fn next_buffer(
        &mut self,
        device: &ash::Device,
        frame_index: u32,
        thread_index: u32,
        queue_family: u32,
    ) -> Result<vk::CommandBuffer> {
        let entry = match self.pools.entry((frame_index, thread_index, queue_family)) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let create_info = vk::CommandPoolCreateInfo::default()
                    .queue_family_index(queue_family)
                    .flags(vk::CommandPoolCreateFlags::TRANSIENT);
                let pool = device.create_command_pool(&create_info, None)?;
                tracing::debug!(
                    "Created command pool for frame {frame_index}, thread {thread_index}, family {queue_family}"
                );
                entry.insert(PoolEntry {
                    pool,
                    buffers: Vec::new(),
                    next: 0,
                })
            }
        };

        if entry.next == entry.buffers.len() {
            let allocate_info = vk::CommandBufferAllocateInfo::default()
                .command_pool(entry.pool)
                .level(vk::CommandBufferLevel::PRIMARY)
                .command_buffer_count(1);
            entry.buffers.extend(device.allocate_command_buffers(&allocate_info)?);
        }
        let buffer = entry.buffers[entry.next];
        entry.next += 1;
        Ok(buffer)
    }

    /// Reset every pool of `frame_index`.
    ///
    /// # Safety
    /// No command buffer of the frame may still be executing.
    pub unsafe fn reset_frame(&mut self, device: &ash::Device, frame_index: u32) -> Result<()> {
        for (_, entry) in self.pools.iter_mut().filter(|((frame, _, _), _)| *frame == frame_index) {
            device.reset_command_pool(entry.pool, vk::CommandPoolResetFlags::empty())?;
            entry.next = 0;
        }
        Ok(())
    }

    /// # Safety
    /// The device must be idle.
    pub unsafe fn destroy(&mut self, device: &ash::Device) {
        for (_, entry) in self.pools.drain() {
            device.destroy_command_pool(entry.pool, None);
        }
    }
}

/// Record commands with `f` and run them to completion on `queue`.
///
/// # Safety
/// All handles must be valid and `pool` must belong to `queue`'s family.
pub unsafe fn execute_one_shot<F>(device: &ash::Device, pool: vk::CommandPool, queue: vk::Queue, f: F) -> Result<()>
where
    F: FnOnce(vk::CommandBuffer),
{
    let allocate_info = vk::CommandBufferAllocateInfo::default()
        .command_pool(pool)
        .level(vk::CommandBufferLevel::PRIMARY)
        .command_buffer_count(1);
    let cmds = device.allocate_command_buffers(&allocate_info)?;

    let result = (|| {
        let begin_info = vk::CommandBufferBeginInfo::default().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        device.begin_command_buffer(cmds[0], &begin_info)?;
        f(cmds[0]);
        device.end_command_buffer(cmds[0])?;

        let submit_info = vk::SubmitInfo::default().command_buffers(&cmds);
        device.queue_submit(queue, &[submit_info], vk::Fence::null())?;
        device.queue_wait_idle(queue)
    })();

    device.free_command_buffers(pool, &cmds);
    Ok(result?)
}

/// What recording needs besides the command stream.
pub struct RecordContext<'a> {
    pub objects: &'a Objects,
    /// Swapchain image backbuffer renderpasses render into
    pub swapchain_image: Option<u32>,
    pub swapchain_extent: vk::Extent2D,
    /// The target queue family supports graphics work
    pub graphics_capable: bool,
    pub debug_utils: Option<&'a ash::ext::debug_utils::Device>,
}

/// Stages and access of one side of a barrier, narrowed to what a queue
/// without graphics support may name.
pub fn barrier_scope(
    stages: PipelineStage,
    access: ResourceAccess,
    graphics_capable: bool,
) -> (vk::PipelineStageFlags, vk::AccessFlags) {
    let stages = convert::pipeline_stages(stages);
    let access = convert::access_flags(access);
    if graphics_capable {
        return (stages, access);
    }

    let transfer_access = vk::AccessFlags::TRANSFER_READ
        | vk::AccessFlags::TRANSFER_WRITE
        | vk::AccessFlags::HOST_READ
        | vk::AccessFlags::HOST_WRITE
        | vk::AccessFlags::MEMORY_READ
        | vk::AccessFlags::MEMORY_WRITE;
    (vk::PipelineStageFlags::ALL_COMMANDS, access & transfer_access)
}

/// Translate `commands` into `cmd`, which must be in the recording state.
///
/// Commands naming destroyed objects are logged and skipped. When a
/// renderpass cannot begin, everything up to its end is skipped as well.
///
/// # Safety
/// The device and command buffer must be valid.
#[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
pub unsafe fn record_commands(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    commands: &[RecordedCommand],
    ctx: &RecordContext<'_>,
) {
    let objects = ctx.objects;
    let mut in_renderpass = false;
    let mut skipping_pass = false;

    for command in commands {
        if skipping_pass && !matches!(command, RecordedCommand::EndRenderpass) {
            continue;
        }

        match command {
            RecordedCommand::SetDebugName(name) => {
                if let (Some(debug_utils), Ok(name)) = (ctx.debug_utils, CString::new(name.as_str())) {
                    let label = vk::DebugUtilsLabelEXT::default().label_name(&name);
                    debug_utils.cmd_insert_debug_utils_label(cmd, &label);
                }
            }
            RecordedCommand::ResourceBarriers {
                stages_before,
                stages_after,
                barriers,
            } => record_barriers(device, cmd, *stages_before, *stages_after, barriers, ctx),
            RecordedCommand::CopyBuffer {
                destination,
                destination_offset,
                source,
                source_offset,
                num_bytes,
            } => {
                let (Some(destination), Some(source)) = (objects.buffers.get(*destination), objects.buffers.get(*source))
                else {
                    tracing::error!("Buffer copy names a destroyed buffer, skipping it");
                    continue;
                };
                let region = vk::BufferCopy {
                    src_offset: *source_offset,
                    dst_offset: *destination_offset,
                    size: *num_bytes,
                };
                device.cmd_copy_buffer(cmd, source.buffer, destination.buffer, &[region]);
            }
            RecordedCommand::UploadDataToImage {
                image,
                size,
                bytes_per_pixel,
                staging_buffer,
            } => {
                let (Some(image), Some(staging)) = (objects.images.get(*image), objects.buffers.get(*staging_buffer))
                else {
                    tracing::error!("Image upload names a destroyed image or buffer, skipping it");
                    continue;
                };
                let needed = u64::from(size.x) * u64::from(size.y) * u64::from(*bytes_per_pixel);
                if needed > staging.size {
                    tracing::error!("Staging buffer holds {} bytes but the upload needs {needed}", staging.size);
                    continue;
                }

                let range = vk::ImageSubresourceRange::default()
                    .aspect_mask(image.aspect)
                    .level_count(1)
                    .layer_count(1);
                let to_transfer = vk::ImageMemoryBarrier::default()
                    .image(image.image)
                    .old_layout(image.resting_layout)
                    .new_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
                    .src_access_mask(vk::AccessFlags::MEMORY_READ)
                    .dst_access_mask(vk::AccessFlags::TRANSFER_WRITE)
                    .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .subresource_range(range);
                device.cmd_pipeline_barrier(
                    cmd,
                    vk::PipelineStageFlags::ALL_COMMANDS,
                    vk::PipelineStageFlags::TRANSFER,
                    vk::DependencyFlags::empty(),
                    &[],
                    &[],
                    &[to_transfer],
                );

                let region = vk::BufferImageCopy::default()
                    .image_subresource(
                        vk::ImageSubresourceLayers::default()
                            .aspect_mask(image.aspect)
                            .layer_count(1),
                    )
                    .image_extent(vk::Extent3D {
                        width: size.x,
                        height: size.y,
                        depth: 1,
                    });
                device.cmd_copy_buffer_to_image(
                    cmd,
                    staging.buffer,
                    image.image,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    &[region],
                );

                let to_resting = to_transfer
                    .old_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
                    .new_layout(image.resting_layout)
                    .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
                    .dst_access_mask(vk::AccessFlags::MEMORY_READ);
                device.cmd_pipeline_barrier(
                    cmd,
                    vk::PipelineStageFlags::TRANSFER,
                    vk::PipelineStageFlags::ALL_COMMANDS,
                    vk::DependencyFlags::empty(),
                    &[],
                    &[],
                    &[to_resting],
                );
            }
            RecordedCommand::BeginRenderpass {
                renderpass,
                framebuffer,
            } => {
                let Some(target) = renderpass_target(*renderpass, *framebuffer, ctx) else {
                    skipping_pass = true;
                    continue;
                };
                begin_renderpass(device, cmd, &target);
                in_renderpass = true;
            }
            RecordedCommand::EndRenderpass => {
                if in_renderpass {
                    device.cmd_end_render_pass(cmd);
                }
                in_renderpass = false;
                skipping_pass = false;
            }
            RecordedCommand::BindPipeline(pipeline) => match objects.pipelines.get(*pipeline) {
                Some(pipeline) => device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, pipeline.pipeline),
                None => tracing::error!("Binding a destroyed pipeline, skipping it"),
            },
            RecordedCommand::BindDescriptorSets {
                descriptor_sets,
                pipeline_interface,
            } => {
                let Some(interface) = objects.pipeline_interfaces.get(*pipeline_interface) else {
                    tracing::error!("Binding descriptor sets for a destroyed pipeline interface, skipping it");
                    continue;
                };
                let sets: Option<Vec<vk::DescriptorSet>> = descriptor_sets
                    .iter()
                    .map(|set| objects.descriptor_sets.get(*set).map(|set| set.set))
                    .collect();
                match sets {
                    Some(sets) => device.cmd_bind_descriptor_sets(
                        cmd,
                        vk::PipelineBindPoint::GRAPHICS,
                        interface.layout,
                        0,
                        &sets,
                        &[],
                    ),
                    None => tracing::error!("Binding a destroyed descriptor set, skipping it"),
                }
            }
            RecordedCommand::BindVertexBuffers(buffers) => {
                let buffers: Option<Vec<vk::Buffer>> = buffers
                    .iter()
                    .map(|buffer| objects.buffers.get(*buffer).map(|buffer| buffer.buffer))
                    .collect();
                match buffers {
                    Some(buffers) => {
                        let offsets = vec![0; buffers.len()];
                        device.cmd_bind_vertex_buffers(cmd, 0, &buffers, &offsets);
                    }
                    None => tracing::error!("Binding a destroyed vertex buffer, skipping it"),
                }
            }
            RecordedCommand::BindIndexBuffer { buffer, index_type } => match objects.buffers.get(*buffer) {
                Some(buffer) => device.cmd_bind_index_buffer(cmd, buffer.buffer, 0, convert::index_type(*index_type)),
                None => tracing::error!("Binding a destroyed index buffer, skipping it"),
            },
            RecordedCommand::DrawIndexedMesh {
                num_indices,
                num_instances,
                first_instance,
            } => device.cmd_draw_indexed(cmd, *num_indices, *num_instances, 0, 0, *first_instance),
            RecordedCommand::SetScissorRect { x, y, width, height } => {
                let scissor = vk::Rect2D {
                    offset: vk::Offset2D {
                        x: i32::try_from(*x).unwrap_or(i32::MAX),
                        y: i32::try_from(*y).unwrap_or(i32::MAX),
                    },
                    extent: vk::Extent2D {
                        width: *width,
                        height: *height,
                    },
                };
                device.cmd_set_scissor(cmd, 0, &[scissor]);
            }
        }
    }

    if in_renderpass {
        tracing::warn!("Command list ended inside a renderpass, closing it");
        device.cmd_end_render_pass(cmd);
    }
}

struct RenderpassTarget {
    renderpass: vk::RenderPass,
    framebuffer: vk::Framebuffer,
    size: UVec2,
    num_attachments: usize,
    has_depth: bool,
}

fn renderpass_target(
    renderpass: RenderpassHandle,
    framebuffer: Option<FramebufferHandle>,
    ctx: &RecordContext<'_>,
) -> Option<RenderpassTarget> {
    let Some(pass) = ctx.objects.renderpasses.get(renderpass) else {
        tracing::error!("Beginning a destroyed renderpass, skipping it");
        return None;
    };

    let (framebuffer, size) = match framebuffer {
        Some(handle) => {
            let Some(framebuffer) = ctx.objects.framebuffers.get(handle) else {
                tracing::error!("Beginning a renderpass with a destroyed framebuffer, skipping it");
                return None;
            };
            (framebuffer.framebuffer, framebuffer.size)
        }
        None => {
            let framebuffer = ctx
                .swapchain_image
                .and_then(|index| pass.backbuffer_framebuffers.get(index as usize).copied());
            let Some(framebuffer) = framebuffer else {
                tracing::error!("Renderpass has no framebuffer for the current swapchain image, skipping it");
                return None;
            };
            (
                framebuffer,
                UVec2::new(ctx.swapchain_extent.width, ctx.swapchain_extent.height),
            )
        }
    };

    Some(RenderpassTarget {
        renderpass: pass.renderpass,
        framebuffer,
        size,
        num_attachments: pass.num_attachments,
        has_depth: pass.has_depth,
    })
}

unsafe fn begin_renderpass(device: &ash::Device, cmd: vk::CommandBuffer, target: &RenderpassTarget) {
    let clear_values: Vec<vk::ClearValue> = (0..target.num_attachments)
        .map(|index| {
            if target.has_depth && index + 1 == target.num_attachments {
                vk::ClearValue {
                    depth_stencil: vk::ClearDepthStencilValue { depth: 1.0, stencil: 0 },
                }
            } else {
                vk::ClearValue {
                    color: vk::ClearColorValue { float32: [0.0; 4] },
                }
            }
        })
        .collect();

    let extent = vk::Extent2D {
        width: target.size.x,
        height: target.size.y,
    };
    let begin_info = vk::RenderPassBeginInfo::default()
        .render_pass(target.renderpass)
        .framebuffer(target.framebuffer)
        .render_area(vk::Rect2D {
            offset: vk::Offset2D::default(),
            extent,
        })
        .clear_values(&clear_values);
    device.cmd_begin_render_pass(cmd, &begin_info, vk::SubpassContents::INLINE);

    #[allow(clippy::cast_precision_loss)]
    let viewport = vk::Viewport {
        x: 0.0,
        y: 0.0,
        width: target.size.x as f32,
        height: target.size.y as f32,
        min_depth: 0.0,
        max_depth: 1.0,
    };
    device.cmd_set_viewport(cmd, 0, &[viewport]);
    device.cmd_set_scissor(
        cmd,
        0,
        &[vk::Rect2D {
            offset: vk::Offset2D::default(),
            extent,
        }],
    );
}

unsafe fn record_barriers(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    stages_before: PipelineStage,
    stages_after: PipelineStage,
    barriers: &[ResourceBarrier],
    ctx: &RecordContext<'_>,
) {
    let (src_stages, _) = barrier_scope(stages_before, ResourceAccess::empty(), ctx.graphics_capable);
    let (dst_stages, _) = barrier_scope(stages_after, ResourceAccess::empty(), ctx.graphics_capable);

    let mut buffer_barriers = Vec::new();
    let mut image_barriers = Vec::new();
    for barrier in barriers {
        let (_, src_access) = barrier_scope(stages_before, barrier.access_before, ctx.graphics_capable);
        let (_, dst_access) = barrier_scope(stages_after, barrier.access_after, ctx.graphics_capable);

        // Resources shared between queue families use concurrent sharing, so
        // no ownership transfer is recorded.
        match barrier.resource {
            BarrierResource::Buffer { buffer, offset, size } => {
                let Some(buffer) = ctx.objects.buffers.get(buffer) else {
                    tracing::error!("Barrier names a destroyed buffer, skipping it");
                    continue;
                };
                buffer_barriers.push(
                    vk::BufferMemoryBarrier::default()
                        .buffer(buffer.buffer)
                        .offset(offset)
                        .size(size)
                        .src_access_mask(src_access)
                        .dst_access_mask(dst_access)
                        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED),
                );
            }
            BarrierResource::Image { image, aspect } => {
                let Some(image) = ctx.objects.images.get(image) else {
                    tracing::error!("Barrier names a destroyed image, skipping it");
                    continue;
                };
                image_barriers.push(
                    vk::ImageMemoryBarrier::default()
                        .image(image.image)
                        .old_layout(convert::image_layout(barrier.old_state))
                        .new_layout(convert::image_layout(barrier.new_state))
                        .src_access_mask(src_access)
                        .dst_access_mask(dst_access)
                        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                        .subresource_range(
                            vk::ImageSubresourceRange::default()
                                .aspect_mask(convert::image_aspect(aspect))
                                .level_count(1)
                                .layer_count(1),
                        ),
                );
            }
        }
    }

    if buffer_barriers.is_empty() && image_barriers.is_empty() {
        return;
    }
    device.cmd_pipeline_barrier(
        cmd,
        src_stages,
        dst_stages,
        vk::DependencyFlags::empty(),
        &[],
        &buffer_barriers,
        &image_barriers,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn graphics_queues_keep_the_full_scope() {
        let (stages, access) = barrier_scope(
            PipelineStage::VERTEX_INPUT,
            ResourceAccess::VERTEX_ATTRIBUTE_READ,
            true,
        );
        assert_eq!(stages, vk::PipelineStageFlags::VERTEX_INPUT);
        assert_eq!(access, vk::AccessFlags::VERTEX_ATTRIBUTE_READ);
    }

    #[test]
    fn transfer_queues_drop_graphics_stages_and_access() {
        let (stages, access) = barrier_scope(
            PipelineStage::VERTEX_INPUT,
            ResourceAccess::VERTEX_ATTRIBUTE_READ | ResourceAccess::COPY_WRITE,
            false,
        );
        assert_eq!(stages, vk::PipelineStageFlags::ALL_COMMANDS);
        assert_eq!(access, vk::AccessFlags::TRANSFER_WRITE);
    }

    #[test]
    fn lists_record_without_a_device() {
        let mut list = VulkanCommandList {
            queue_type: QueueType::Graphics,
            thread_index: 0,
            frame_index: 1,
            pool_generation: 0,
            commands: Vec::new(),
        };
        let mut secondary = VulkanCommandList {
            commands: Vec::new(),
            ..list
        };
        secondary.draw_indexed_mesh(3, 1, 0);
        list.end_renderpass();
        list.execute_command_lists(vec![secondary]);

        assert_eq!(
            list.commands(),
            &[
                RecordedCommand::EndRenderpass,
                RecordedCommand::DrawIndexedMesh {
                    num_indices: 3,
                    num_instances: 1,
                    first_instance: 0,
                },
            ]
        );
    }
}
