//! Descriptor pools, set allocation and descriptor writes.

use ash::vk;
use nova_rhi::{DescriptorResource, DescriptorSetWrite};

use crate::error::Result;
use crate::objects::{Objects, VulkanPipelineInterface};

/// Pool sizes for the descriptor counts the renderer asks for. Storage
/// buffers share the uniform buffer budget.
pub fn pool_sizes(num_sampled_images: u32, num_samplers: u32, num_uniform_buffers: u32) -> Vec<vk::DescriptorPoolSize> {
    [
        (vk::DescriptorType::COMBINED_IMAGE_SAMPLER, num_sampled_images),
        (vk::DescriptorType::SAMPLER, num_samplers),
        (vk::DescriptorType::UNIFORM_BUFFER, num_uniform_buffers),
        (vk::DescriptorType::STORAGE_BUFFER, num_uniform_buffers),
    ]
    .into_iter()
    .filter(|(_, count)| *count > 0)
    .map(|(ty, descriptor_count)| vk::DescriptorPoolSize { ty, descriptor_count })
    .collect()
}

/// # Safety
/// The device must be valid.
pub unsafe fn create_descriptor_pool(
    device: &ash::Device,
    num_sampled_images: u32,
    num_samplers: u32,
    num_uniform_buffers: u32,
) -> Result<vk::DescriptorPool> {
    let sizes = pool_sizes(num_sampled_images, num_samplers, num_uniform_buffers);
    let max_sets = num_sampled_images.saturating_add(num_uniform_buffers).max(1);

    let create_info = vk::DescriptorPoolCreateInfo::default()
        .max_sets(max_sets)
        .pool_sizes(&sizes);
    Ok(device.create_descriptor_pool(&create_info, None)?)
}

/// Allocate one set per layout of `interface`. Sets with a runtime-sized
/// array get one descriptor in it.
///
/// # Safety
/// The device, pool and interface must be valid.
pub unsafe fn allocate_sets(
    device: &ash::Device,
    pool: vk::DescriptorPool,
    interface: &VulkanPipelineInterface,
) -> Result<Vec<vk::DescriptorSet>> {
    if interface.set_layouts.is_empty() {
        return Ok(Vec::new());
    }

    let variable_counts: Vec<u32> = interface.variable_sets.iter().map(|&variable| u32::from(variable)).collect();
    let mut variable_info =
        vk::DescriptorSetVariableDescriptorCountAllocateInfo::default().descriptor_counts(&variable_counts);

    let mut allocate_info = vk::DescriptorSetAllocateInfo::default()
        .descriptor_pool(pool)
        .set_layouts(&interface.set_layouts);
    if interface.variable_sets.iter().any(|&variable| variable) {
        allocate_info = allocate_info.push_next(&mut variable_info);
    }

    Ok(device.allocate_descriptor_sets(&allocate_info)?)
}

/// Whether a resource can be written to a binding of type `ty`.
pub fn resource_fits(ty: vk::DescriptorType, resource: &DescriptorResource) -> bool {
    match resource {
        DescriptorResource::Image { .. } => ty == vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
        DescriptorResource::Buffer { .. } => {
            ty == vk::DescriptorType::UNIFORM_BUFFER || ty == vk::DescriptorType::STORAGE_BUFFER
        }
    }
}

enum ResolvedInfo {
    Image(vk::DescriptorImageInfo),
    Buffer(vk::DescriptorBufferInfo),
}

/// Apply `writes`. Writes naming destroyed objects, or a binding the set
/// does not have, are logged and skipped.
///
/// # Safety
/// The device must be valid and the sets must not be in use by the GPU.
pub unsafe fn update_descriptor_sets(device: &ash::Device, objects: &Objects, writes: &[DescriptorSetWrite]) {
    let mut resolved = Vec::with_capacity(writes.len());

    for write in writes {
        let Some(set) = objects.descriptor_sets.get(write.set) else {
            tracing::error!("Descriptor write to a destroyed descriptor set");
            continue;
        };
        let Some(&ty) = set.binding_types.get(&write.binding) else {
            tracing::error!("Descriptor set has no binding {}", write.binding);
            continue;
        };
        if !resource_fits(ty, &write.resource) {
            tracing::error!("Binding {} is a {ty:?} and cannot hold {:?}", write.binding, write.resource);
            continue;
        }

        let info = match write.resource {
            DescriptorResource::Image { image, sampler } => {
                let (Some(image), Some(&sampler)) = (objects.images.get(image), objects.samplers.get(sampler)) else {
                    tracing::error!("Descriptor write names a destroyed image or sampler");
                    continue;
                };
                ResolvedInfo::Image(
                    vk::DescriptorImageInfo::default()
                        .image_view(image.view)
                        .sampler(sampler)
                        .image_layout(image.resting_layout),
                )
            }
            DescriptorResource::Buffer { buffer } => {
                let Some(buffer) = objects.buffers.get(buffer) else {
                    tracing::error!("Descriptor write names a destroyed buffer");
                    continue;
                };
                ResolvedInfo::Buffer(
                    vk::DescriptorBufferInfo::default()
                        .buffer(buffer.buffer)
                        .offset(0)
                        .range(vk::WHOLE_SIZE),
                )
            }
        };
        resolved.push((set.set, write.binding, ty, info));
    }

    let vk_writes: Vec<vk::WriteDescriptorSet> = resolved
        .iter()
        .map(|(set, binding, ty, info)| {
            let write = vk::WriteDescriptorSet::default()
                .dst_set(*set)
                .dst_binding(*binding)
                .descriptor_type(*ty);
            match info {
                ResolvedInfo::Image(info) => write.image_info(std::slice::from_ref(info)),
                ResolvedInfo::Buffer(info) => write.buffer_info(std::slice::from_ref(info)),
            }
        })
        .collect();

    if !vk_writes.is_empty() {
        device.update_descriptor_sets(&vk_writes, &[]);
    }
}
