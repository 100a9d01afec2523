//! Vulkan instance creation and physical device selection.

use std::ffi::{c_char, CStr, CString};

use ash::vk;
use nova_core::settings::VulkanOptions;
use raw_window_handle::RawDisplayHandle;

use crate::error::{Result, VulkanError};

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Oldest API version the backend runs on. Descriptor indexing is core
/// from 1.2.
pub const MIN_API_VERSION: u32 = vk::API_VERSION_1_2;

/// Create a Vulkan instance with the extensions `display` needs.
///
/// # Safety
/// The entry must be a valid Vulkan entry point.
pub unsafe fn create_instance(
    entry: &ash::Entry,
    options: &VulkanOptions,
    enable_validation: bool,
    display: RawDisplayHandle,
) -> Result<ash::Instance> {
    let app_name = CString::new(options.application_name.as_str())
        .map_err(|_| VulkanError::Loading("Application name contains a NUL byte".to_string()))?;
    let version = options.application_version;

    let app_info = vk::ApplicationInfo::default()
        .application_name(&app_name)
        .application_version(vk::make_api_version(0, version.major, version.minor, version.patch))
        .engine_name(c"Nova Renderer")
        .engine_version(vk::make_api_version(0, version.major, version.minor, version.patch))
        .api_version(MIN_API_VERSION);

    let mut extension_names: Vec<*const c_char> = ash_window::enumerate_required_extensions(display)
        .map_err(VulkanError::from)?
        .to_vec();
    #[cfg(target_os = "macos")]
    extension_names.push(ash::khr::portability_enumeration::NAME.as_ptr());
    if enable_validation {
        extension_names.push(ash::ext::debug_utils::NAME.as_ptr());
    }

    let mut layer_names = Vec::new();
    if enable_validation {
        let available_layers = entry.enumerate_instance_layer_properties()?;
        let found = available_layers
            .iter()
            .any(|props| CStr::from_ptr(props.layer_name.as_ptr()) == VALIDATION_LAYER);
        if found {
            layer_names.push(VALIDATION_LAYER.as_ptr());
        } else {
            tracing::warn!("Validation layer {} not available", VALIDATION_LAYER.to_string_lossy());
        }
    }

    #[cfg(target_os = "macos")]
    let create_flags = vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR;
    #[cfg(not(target_os = "macos"))]
    let create_flags = vk::InstanceCreateFlags::empty();

    let create_info = vk::InstanceCreateInfo::default()
        .application_info(&app_info)
        .enabled_extension_names(&extension_names)
        .enabled_layer_names(&layer_names)
        .flags(create_flags);

    Ok(entry.create_instance(&create_info, None)?)
}

/// Pick the highest scoring physical device that can present to `surface`.
///
/// # Safety
/// The instance and surface must be valid.
pub unsafe fn select_physical_device(
    instance: &ash::Instance,
    surface_loader: &ash::khr::surface::Instance,
    surface: vk::SurfaceKHR,
) -> Result<vk::PhysicalDevice> {
    let mut best = None;
    let mut best_score = -1;

    for device in instance.enumerate_physical_devices()? {
        let can_present = instance
            .get_physical_device_queue_family_properties(device)
            .iter()
            .enumerate()
            .any(|(index, family)| {
                family.queue_flags.contains(vk::QueueFlags::GRAPHICS)
                    && u32::try_from(index).is_ok_and(|index| {
                        surface_loader
                            .get_physical_device_surface_support(device, index, surface)
                            .unwrap_or(false)
                    })
            });
        if !can_present {
            continue;
        }

        let properties = instance.get_physical_device_properties(device);
        let score = score_physical_device(properties.api_version, properties.device_type);
        if score > best_score {
            best_score = score;
            best = Some(device);
        }
    }

    best.ok_or(VulkanError::NoSuitableDevice)
}

/// Discrete GPUs beat integrated ones, which beat virtual ones. Devices
/// older than [`MIN_API_VERSION`] score -1.
pub fn score_physical_device(api_version: u32, device_type: vk::PhysicalDeviceType) -> i32 {
    if vk::api_version_major(api_version) < 1
        || (vk::api_version_major(api_version) == 1 && vk::api_version_minor(api_version) < 2)
    {
        return -1;
    }

    match device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => 1000,
        vk::PhysicalDeviceType::INTEGRATED_GPU => 100,
        vk::PhysicalDeviceType::VIRTUAL_GPU => 50,
        _ => 0,
    }
}
