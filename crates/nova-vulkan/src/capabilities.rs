//! Physical device capability queries.

use std::collections::HashSet;
use std::ffi::CStr;

use ash::vk;
use nova_rhi::{DeviceArchitecture, DeviceInfo};

/// Query what the renderer needs to know about `physical_device`.
///
/// # Safety
/// The instance and physical device must be valid.
pub unsafe fn query_device_info(instance: &ash::Instance, physical_device: vk::PhysicalDevice) -> DeviceInfo {
    let properties = instance.get_physical_device_properties(physical_device);
    let memory_properties = instance.get_physical_device_memory_properties(physical_device);

    let extensions: HashSet<String> = instance
        .enumerate_device_extension_properties(physical_device)
        .unwrap_or_default()
        .iter()
        .filter_map(|ext| {
            CStr::from_ptr(ext.extension_name.as_ptr())
                .to_str()
                .ok()
                .map(String::from)
        })
        .collect();

    DeviceInfo {
        architecture: DeviceArchitecture::from_vendor_id(properties.vendor_id),
        device_name: CStr::from_ptr(properties.device_name.as_ptr())
            .to_string_lossy()
            .into_owned(),
        max_texture_size: properties.limits.max_image_dimension2_d,
        max_color_attachments: properties.limits.max_color_attachments,
        is_uma: is_uma(&memory_properties),
        supports_raytracing: extensions.contains("VK_KHR_ray_tracing_pipeline"),
        supports_mesh_shaders: extensions.contains("VK_EXT_mesh_shader")
            || extensions.contains("VK_NV_mesh_shader"),
    }
}

/// A device is UMA when every device-local heap is also reachable by a
/// host-visible memory type.
fn is_uma(memory: &vk::PhysicalDeviceMemoryProperties) -> bool {
    let types = &memory.memory_types[..memory.memory_type_count as usize];
    let heaps = &memory.memory_heaps[..memory.memory_heap_count as usize];

    let mut device_local_heaps = (0u32..)
        .zip(heaps)
        .filter(|(_, heap)| heap.flags.contains(vk::MemoryHeapFlags::DEVICE_LOCAL))
        .map(|(index, _)| index)
        .peekable();
    if device_local_heaps.peek().is_none() {
        return false;
    }

    device_local_heaps.all(|heap| {
        types.iter().any(|memory_type| {
            memory_type.heap_index == heap
                && memory_type.property_flags.contains(
                    vk::MemoryPropertyFlags::DEVICE_LOCAL | vk::MemoryPropertyFlags::HOST_VISIBLE,
                )
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory(types: &[(u32, vk::MemoryPropertyFlags)], heaps: &[vk::MemoryHeapFlags]) -> vk::PhysicalDeviceMemoryProperties {
        let mut properties = vk::PhysicalDeviceMemoryProperties::default();
        for (i, &(heap_index, property_flags)) in types.iter().enumerate() {
            properties.memory_types[i] = vk::MemoryType {
                property_flags,
                heap_index,
            };
        }
        for (i, &flags) in heaps.iter().enumerate() {
            properties.memory_heaps[i] = vk::MemoryHeap { size: 1 << 30, flags };
        }
        properties.memory_type_count = types.len() as u32;
        properties.memory_heap_count = heaps.len() as u32;
        properties
    }

    #[test]
    fn discrete_layout_is_not_uma() {
        let properties = memory(
            &[
                (0, vk::MemoryPropertyFlags::DEVICE_LOCAL),
                (1, vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT),
            ],
            &[vk::MemoryHeapFlags::DEVICE_LOCAL, vk::MemoryHeapFlags::empty()],
        );
        assert!(!is_uma(&properties));
    }

    #[test]
    fn shared_heap_is_uma() {
        let properties = memory(
            &[(
                0,
                vk::MemoryPropertyFlags::DEVICE_LOCAL | vk::MemoryPropertyFlags::HOST_VISIBLE,
            )],
            &[vk::MemoryHeapFlags::DEVICE_LOCAL],
        );
        assert!(is_uma(&properties));
    }
}
