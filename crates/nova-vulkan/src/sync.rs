//! Synchronization primitives.

use ash::vk;

use crate::error::Result;

/// # Safety
/// The device must be valid.
pub unsafe fn create_semaphore(device: &ash::Device) -> Result<vk::Semaphore> {
    let create_info = vk::SemaphoreCreateInfo::default();
    Ok(device.create_semaphore(&create_info, None)?)
}

/// # Safety
/// The device must be valid.
pub unsafe fn create_fence(device: &ash::Device, signaled: bool) -> Result<vk::Fence> {
    let flags = if signaled {
        vk::FenceCreateFlags::SIGNALED
    } else {
        vk::FenceCreateFlags::empty()
    };

    let create_info = vk::FenceCreateInfo::default().flags(flags);
    Ok(device.create_fence(&create_info, None)?)
}

/// Block until every fence is signaled, then optionally reset them.
///
/// # Safety
/// The device and fences must be valid.
#[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
pub unsafe fn wait_for_fences(device: &ash::Device, fences: &[vk::Fence], reset: bool) -> Result<()> {
    if fences.is_empty() {
        return Ok(());
    }
    device.wait_for_fences(fences, true, u64::MAX)?;
    if reset {
        device.reset_fences(fences)?;
    }
    Ok(())
}
