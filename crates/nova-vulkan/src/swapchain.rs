//! Window surface and swapchain.

use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

use crate::error::{Result, VulkanError};

/// Create a surface for `window`.
///
/// # Safety
/// The instance must be valid and outlive the surface.
pub unsafe fn create_surface<W>(entry: &ash::Entry, instance: &ash::Instance, window: &W) -> Result<vk::SurfaceKHR>
where
    W: HasDisplayHandle + HasWindowHandle,
{
    let display = window
        .display_handle()
        .map_err(|e| VulkanError::SurfaceCreation(format!("Failed to get display handle: {e}")))?;
    let window_handle = window
        .window_handle()
        .map_err(|e| VulkanError::SurfaceCreation(format!("Failed to get window handle: {e}")))?;

    ash_window::create_surface(entry, instance, display.as_raw(), window_handle.as_raw(), None)
        .map_err(|e| VulkanError::SurfaceCreation(e.to_string()))
}

pub struct Swapchain {
    pub swapchain: vk::SwapchainKHR,
    pub images: Vec<vk::Image>,
    pub image_views: Vec<vk::ImageView>,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
}

impl Swapchain {
    /// Create a swapchain for `surface`, sized to `desired` when the surface
    /// lets the application choose.
    ///
    /// # Safety
    /// All handles must be valid.
    pub unsafe fn new(
        device: &ash::Device,
        surface_loader: &ash::khr::surface::Instance,
        swapchain_loader: &ash::khr::swapchain::Device,
        physical_device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
        desired: vk::Extent2D,
    ) -> Result<Self> {
        let capabilities = surface_loader.get_physical_device_surface_capabilities(physical_device, surface)?;
        let formats = surface_loader.get_physical_device_surface_formats(physical_device, surface)?;
        let surface_format = select_surface_format(&formats).ok_or(VulkanError::NoSurfaceFormat)?;
        let extent = calculate_extent(&capabilities, desired);

        let mut image_count = capabilities.min_image_count + 1;
        if capabilities.max_image_count > 0 && image_count > capabilities.max_image_count {
            image_count = capabilities.max_image_count;
        }

        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(surface)
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(vk::PresentModeKHR::FIFO)
            .clipped(true);

        let swapchain = swapchain_loader
            .create_swapchain(&create_info, None)
            .map_err(|e| VulkanError::SurfaceCreation(format!("Swapchain creation failed: {e}")))?;
        let images = swapchain_loader.get_swapchain_images(swapchain)?;

        let mut image_views = Vec::with_capacity(images.len());
        for &image in &images {
            let view_info = vk::ImageViewCreateInfo::default()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(surface_format.format)
                .subresource_range(color_subresource_range());
            match device.create_image_view(&view_info, None) {
                Ok(view) => image_views.push(view),
                Err(e) => {
                    for view in image_views {
                        device.destroy_image_view(view, None);
                    }
                    swapchain_loader.destroy_swapchain(swapchain, None);
                    return Err(e.into());
                }
            }
        }

        tracing::info!(
            "Created {}x{} swapchain with {} {:?} images",
            extent.width,
            extent.height,
            images.len(),
            surface_format.format
        );

        Ok(Self {
            swapchain,
            images,
            image_views,
            format: surface_format.format,
            extent,
        })
    }

    /// Acquire the next image, signaling `fence` once it is ready.
    ///
    /// # Safety
    /// All handles must be valid.
    #[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
    pub unsafe fn acquire_next_image(&self, swapchain_loader: &ash::khr::swapchain::Device, fence: vk::Fence) -> Result<u32> {
        let (index, suboptimal) =
            swapchain_loader.acquire_next_image(self.swapchain, u64::MAX, vk::Semaphore::null(), fence)?;
        if suboptimal {
            tracing::debug!("Swapchain is suboptimal for the surface");
        }
        Ok(index)
    }

    /// # Safety
    /// All handles must be valid.
    #[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
    pub unsafe fn present(&self, swapchain_loader: &ash::khr::swapchain::Device, queue: vk::Queue, image_index: u32) -> Result<()> {
        let swapchains = [self.swapchain];
        let image_indices = [image_index];
        let present_info = vk::PresentInfoKHR::default()
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        match swapchain_loader.queue_present(queue, &present_info) {
            Ok(_) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// # Safety
    /// The swapchain must not be in use.
    pub unsafe fn destroy(&self, device: &ash::Device, swapchain_loader: &ash::khr::swapchain::Device) {
        for &view in &self.image_views {
            device.destroy_image_view(view, None);
        }
        swapchain_loader.destroy_swapchain(self.swapchain, None);
    }
}

pub fn color_subresource_range() -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange::default()
        .aspect_mask(vk::ImageAspectFlags::COLOR)
        .level_count(1)
        .layer_count(1)
}

/// Prefer 8-bit BGRA sRGB, else whatever the surface lists first.
pub fn select_surface_format(available: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    available
        .iter()
        .find(|format| {
            format.format == vk::Format::B8G8R8A8_SRGB && format.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .or_else(|| available.first())
        .copied()
}

pub fn calculate_extent(capabilities: &vk::SurfaceCapabilitiesKHR, desired: vk::Extent2D) -> vk::Extent2D {
    if capabilities.current_extent.width == u32::MAX {
        vk::Extent2D {
            width: desired
                .width
                .clamp(capabilities.min_image_extent.width, capabilities.max_image_extent.width),
            height: desired
                .height
                .clamp(capabilities.min_image_extent.height, capabilities.max_image_extent.height),
        }
    } else {
        capabilities.current_extent
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn srgb_is_preferred() {
        let unorm = vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_UNORM,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        };
        let srgb = vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_SRGB,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        };
        assert_eq!(select_surface_format(&[unorm, srgb]).map(|f| f.format), Some(vk::Format::B8G8R8A8_SRGB));
        assert_eq!(select_surface_format(&[unorm]).map(|f| f.format), Some(vk::Format::B8G8R8A8_UNORM));
        assert!(select_surface_format(&[]).is_none());
    }

    #[test]
    fn extent_is_clamped_when_the_surface_leaves_it_open() {
        let capabilities = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D { width: 1, height: 1 },
            max_image_extent: vk::Extent2D {
                width: 1024,
                height: 1024,
            },
            ..Default::default()
        };
        let extent = calculate_extent(
            &capabilities,
            vk::Extent2D {
                width: 4096,
                height: 480,
            },
        );
        assert_eq!((extent.width, extent.height), (1024, 480));
    }
}
