//! Device memory: raw allocations for sub-allocated buffers, and
//! `gpu-allocator` for images.

use std::ptr::NonNull;

use ash::vk;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme, Allocator, AllocatorCreateDesc};
use gpu_allocator::MemoryLocation;
use nova_rhi::{MemoryUsage, RhiError};

use crate::error::{Result, VulkanError};

/// Memory property flags `usage` wants: an exact match is tried first, then
/// any type sharing a flag with the fuzzy set.
pub const fn wanted_memory_flags(usage: MemoryUsage) -> (vk::MemoryPropertyFlags, vk::MemoryPropertyFlags) {
    match usage {
        MemoryUsage::DeviceOnly => (
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        ),
        MemoryUsage::LowFrequencyUpload => (
            vk::MemoryPropertyFlags::from_raw(
                vk::MemoryPropertyFlags::DEVICE_LOCAL.as_raw() | vk::MemoryPropertyFlags::HOST_VISIBLE.as_raw(),
            ),
            vk::MemoryPropertyFlags::HOST_VISIBLE,
        ),
        MemoryUsage::StagingBuffer => (
            vk::MemoryPropertyFlags::from_raw(
                vk::MemoryPropertyFlags::HOST_VISIBLE.as_raw() | vk::MemoryPropertyFlags::HOST_CACHED.as_raw(),
            ),
            vk::MemoryPropertyFlags::HOST_VISIBLE,
        ),
    }
}

/// Index of the memory type to allocate `usage` memory from.
///
/// `allowed_types` is a bitmask of acceptable type indices, as found in
/// `vk::MemoryRequirements::memory_type_bits`.
pub fn find_memory_type(
    memory: &vk::PhysicalDeviceMemoryProperties,
    allowed_types: u32,
    usage: MemoryUsage,
) -> Option<u32> {
    let (exact, fuzzy) = wanted_memory_flags(usage);
    let types = &memory.memory_types[..memory.memory_type_count as usize];
    let candidates = || {
        (0u32..)
            .zip(types)
            .filter(move |(index, _)| allowed_types & (1 << index) != 0)
    };

    candidates()
        .find(|(_, memory_type)| memory_type.property_flags == exact)
        .or_else(|| candidates().find(|(_, memory_type)| memory_type.property_flags.intersects(fuzzy)))
        .map(|(index, _)| index)
}

/// A `vkDeviceMemory` block that buffers are bound into.
pub struct VulkanMemory {
    pub memory: vk::DeviceMemory,
    pub size: u64,
    /// Persistent mapping of the whole block, for host-visible memory
    pub mapped: Option<NonNull<u8>>,
    pub is_coherent: bool,
}

impl VulkanMemory {
    /// Allocate `size` bytes of `usage` memory usable by buffers.
    ///
    /// # Safety
    /// The device must be valid.
    pub unsafe fn allocate(
        device: &ash::Device,
        memory_properties: &vk::PhysicalDeviceMemoryProperties,
        buffer_memory_types: u32,
        size: u64,
        usage: MemoryUsage,
    ) -> std::result::Result<Self, RhiError> {
        let type_index = find_memory_type(memory_properties, buffer_memory_types, usage)
            .ok_or_else(|| RhiError::NoSuitableMemoryType(format!("{usage:?}")))?;
        let flags = memory_properties.memory_types[type_index as usize].property_flags;

        let allocate_info = vk::MemoryAllocateInfo::default()
            .allocation_size(size)
            .memory_type_index(type_index);
        let memory = device
            .allocate_memory(&allocate_info, None)
            .map_err(|e| match e {
                vk::Result::ERROR_OUT_OF_DEVICE_MEMORY | vk::Result::ERROR_OUT_OF_HOST_MEMORY => {
                    RhiError::OutOfDeviceMemory { requested: size }
                }
                other => VulkanError::Vulkan(other).into(),
            })?;

        let mapped = if usage.is_host_visible() && flags.contains(vk::MemoryPropertyFlags::HOST_VISIBLE) {
            match device.map_memory(memory, 0, vk::WHOLE_SIZE, vk::MemoryMapFlags::empty()) {
                Ok(pointer) => NonNull::new(pointer.cast::<u8>()),
                Err(e) => {
                    device.free_memory(memory, None);
                    return Err(VulkanError::Vulkan(e).into());
                }
            }
        } else {
            None
        };

        tracing::debug!("Allocated {size} bytes of {usage:?} memory from type {type_index} ({flags:?})");

        Ok(Self {
            memory,
            size,
            mapped,
            is_coherent: flags.contains(vk::MemoryPropertyFlags::HOST_COHERENT),
        })
    }

    /// Copy `data` to `offset` bytes into the block, flushing it if the
    /// memory is not coherent.
    ///
    /// # Safety
    /// The device must be valid and the range must not be in use by the GPU.
    pub unsafe fn write(&self, device: &ash::Device, offset: u64, data: &[u8]) -> std::result::Result<(), RhiError> {
        let pointer = self.mapped.ok_or(RhiError::MemoryNotHostVisible)?;
        let size = data.len() as u64;
        if offset.checked_add(size).map_or(true, |end| end > self.size) {
            return Err(RhiError::WriteOutOfBounds {
                offset,
                size,
                capacity: self.size,
            });
        }

        let start = usize::try_from(offset).map_err(|_| RhiError::WriteOutOfBounds {
            offset,
            size,
            capacity: self.size,
        })?;
        std::ptr::copy_nonoverlapping(data.as_ptr(), pointer.as_ptr().add(start), data.len());

        if !self.is_coherent {
            let range = vk::MappedMemoryRange::default()
                .memory(self.memory)
                .offset(0)
                .size(vk::WHOLE_SIZE);
            device
                .flush_mapped_memory_ranges(&[range])
                .map_err(crate::error::rhi)?;
        }
        Ok(())
    }

    /// # Safety
    /// No buffer bound to the memory may still be in use.
    pub unsafe fn free(self, device: &ash::Device) {
        if self.mapped.is_some() {
            device.unmap_memory(self.memory);
        }
        device.free_memory(self.memory, None);
    }
}

/// `gpu-allocator` wrapper for render target and texture images.
pub struct ImageAllocator {
    allocator: Option<Allocator>,
}

impl ImageAllocator {
    /// # Safety
    /// The instance, device and physical device must be valid.
    pub unsafe fn new(instance: &ash::Instance, device: &ash::Device, physical_device: vk::PhysicalDevice) -> Result<Self> {
        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.clone(),
            device: device.clone(),
            physical_device,
            debug_settings: gpu_allocator::AllocatorDebugSettings {
                log_memory_information: cfg!(debug_assertions),
                log_leaks_on_shutdown: true,
                ..Default::default()
            },
            buffer_device_address: false,
            allocation_sizes: gpu_allocator::AllocationSizes::default(),
        })?;

        Ok(Self {
            allocator: Some(allocator),
        })
    }

    /// Allocate and bind memory for `image`.
    ///
    /// # Safety
    /// The device and image must be valid.
    pub unsafe fn allocate_image(&mut self, device: &ash::Device, image: vk::Image, name: &str) -> Result<Allocation> {
        let requirements = device.get_image_memory_requirements(image);
        let allocation = self
            .allocator
            .as_mut()
            .ok_or_else(|| VulkanError::Allocation("Image allocator was shut down".to_string()))?
            .allocate(&AllocationCreateDesc {
                name,
                requirements,
                location: MemoryLocation::GpuOnly,
                linear: false,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })?;

        if let Err(e) = device.bind_image_memory(image, allocation.memory(), allocation.offset()) {
            self.free(allocation);
            return Err(e.into());
        }
        Ok(allocation)
    }

    pub fn free(&mut self, allocation: Allocation) {
        if let Some(allocator) = self.allocator.as_mut() {
            if let Err(e) = allocator.free(allocation) {
                tracing::error!("Could not free image memory: {e}");
            }
        }
    }

    /// Free every allocation. Must run before the device is destroyed.
    pub fn shutdown(&mut self) {
        self.allocator.take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn properties(flags: &[vk::MemoryPropertyFlags]) -> vk::PhysicalDeviceMemoryProperties {
        let mut properties = vk::PhysicalDeviceMemoryProperties::default();
        for (i, &property_flags) in flags.iter().enumerate() {
            properties.memory_types[i] = vk::MemoryType {
                property_flags,
                heap_index: 0,
            };
        }
        properties.memory_type_count = flags.len() as u32;
        properties
    }

    #[test]
    fn exact_match_wins_over_earlier_fuzzy_match() {
        let memory = properties(&[
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_CACHED,
        ]);
        assert_eq!(find_memory_type(&memory, u32::MAX, MemoryUsage::StagingBuffer), Some(1));
    }

    #[test]
    fn fuzzy_match_is_the_fallback() {
        let memory = properties(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        ]);
        assert_eq!(find_memory_type(&memory, u32::MAX, MemoryUsage::LowFrequencyUpload), Some(1));
        assert_eq!(find_memory_type(&memory, u32::MAX, MemoryUsage::DeviceOnly), Some(0));
    }

    #[test]
    fn disallowed_types_are_skipped() {
        let memory = properties(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        ]);
        assert_eq!(find_memory_type(&memory, 0b10, MemoryUsage::DeviceOnly), Some(1));
        assert_eq!(find_memory_type(&memory, 0, MemoryUsage::DeviceOnly), None);
    }
}
