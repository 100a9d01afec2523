//! Device memory paired with an allocation strategy.

use crate::allocation::{AllocationInfo, AllocationStrategy};
use crate::handles::DeviceMemoryHandle;

/// A range of a [`DeviceMemoryResource`] handed to one buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceMemoryAllocation {
    pub memory: DeviceMemoryHandle,
    pub allocation: AllocationInfo,
}

/// One block of device memory sub-allocated by a strategy.
///
/// Every buffer created from the resource shares its backing memory but gets
/// a disjoint byte range.
pub struct DeviceMemoryResource {
    memory: DeviceMemoryHandle,
    strategy: Box<dyn AllocationStrategy>,
}

impl DeviceMemoryResource {
    pub fn new(memory: DeviceMemoryHandle, strategy: impl AllocationStrategy + 'static) -> Self {
        Self {
            memory,
            strategy: Box::new(strategy),
        }
    }

    /// The device memory backing this resource.
    pub fn memory(&self) -> DeviceMemoryHandle {
        self.memory
    }

    pub fn allocate(&mut self, size: u64) -> Option<DeviceMemoryAllocation> {
        let allocation = self.strategy.allocate(size)?;
        Some(DeviceMemoryAllocation {
            memory: self.memory,
            allocation,
        })
    }

    pub fn free(&mut self, allocation: &DeviceMemoryAllocation) {
        if allocation.memory != self.memory {
            tracing::warn!("Freeing an allocation into a memory resource it did not come from");
            return;
        }
        self.strategy.free(&allocation.allocation);
    }

    pub fn capacity(&self) -> u64 {
        self.strategy.capacity()
    }

    pub fn free_bytes(&self) -> u64 {
        self.strategy.free_bytes()
    }
}
