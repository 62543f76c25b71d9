// SPDX-License-Identifier: CEPL-1.0
use ash::khr::surface;
use ash::vk;
use lux_render::RenderSize;
use tracing::info;

use crate::device::{DeviceContext, QueueFamilies};
use crate::error::{EngineError, EngineResult, VkContext};

pub const PREFERRED_FORMAT: vk::SurfaceFormatKHR = vk::SurfaceFormatKHR {
    format: vk::Format::B8G8R8A8_UNORM,
    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
};

/// Surface properties for one (device, surface) pair. Queried fresh on every
/// swapchain build, never kept.
#[derive(Clone, Debug)]
pub struct SwapchainSupport {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SwapchainSupport {
    pub unsafe fn query(
        surface_loader: &surface::Instance,
        phys: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
    ) -> EngineResult<Self> {
        Ok(Self {
            capabilities: surface_loader
                .get_physical_device_surface_capabilities(phys, surface)
                .vk_op("vkGetPhysicalDeviceSurfaceCapabilitiesKHR")?,
            formats: surface_loader
                .get_physical_device_surface_formats(phys, surface)
                .vk_op("vkGetPhysicalDeviceSurfaceFormatsKHR")?,
            present_modes: surface_loader
                .get_physical_device_surface_present_modes(phys, surface)
                .vk_op("vkGetPhysicalDeviceSurfacePresentModesKHR")?,
        })
    }
}

/// One more than the minimum, capped by the maximum (0 means no maximum).
pub fn choose_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let wanted = caps.min_image_count + 1;
    if caps.max_image_count > 0 {
        wanted.min(caps.max_image_count)
    } else {
        wanted
    }
}

pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> (vk::SurfaceFormatKHR, &'static str) {
    match formats {
        [only] if only.format == vk::Format::UNDEFINED => (PREFERRED_FORMAT, "surface_unconstrained"),
        _ => formats
            .iter()
            .copied()
            .find(|f| f.format == PREFERRED_FORMAT.format && f.color_space == PREFERRED_FORMAT.color_space)
            .map(|f| (f, "preferred_bgra8_unorm_srgb"))
            .or_else(|| formats.first().map(|&f| (f, "driver_default")))
            .unwrap_or((PREFERRED_FORMAT, "no_formats_reported")),
    }
}

/// Mailbox wins the moment it is seen; immediate is remembered in case mailbox
/// shows up later; FIFO is always available.
pub fn choose_present_mode(modes: &[vk::PresentModeKHR]) -> (vk::PresentModeKHR, &'static str) {
    let mut best = (vk::PresentModeKHR::FIFO, "fifo_fallback");
    for &mode in modes {
        if mode == vk::PresentModeKHR::MAILBOX {
            return (mode, "mailbox");
        }
        if mode == vk::PresentModeKHR::IMMEDIATE {
            best = (mode, "immediate");
        }
    }
    best
}

pub fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, want: RenderSize) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        caps.current_extent
    } else {
        vk::Extent2D {
            width: want
                .width
                .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
            height: want
                .height
                .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
        }
    }
}

/// Concurrent sharing across both families when they differ, exclusive otherwise.
pub fn choose_sharing(families: QueueFamilies) -> (vk::SharingMode, Vec<u32>) {
    if families.coincide() {
        (vk::SharingMode::EXCLUSIVE, Vec::new())
    } else {
        (
            vk::SharingMode::CONCURRENT,
            vec![families.graphics, families.present],
        )
    }
}

fn pm_name(m: vk::PresentModeKHR) -> &'static str {
    match m {
        vk::PresentModeKHR::FIFO => "FIFO",
        vk::PresentModeKHR::MAILBOX => "MAILBOX",
        vk::PresentModeKHR::IMMEDIATE => "IMMEDIATE",
        vk::PresentModeKHR::FIFO_RELAXED => "FIFO_RELAXED",
        _ => "OTHER",
    }
}

pub struct SwapchainBundle {
    pub swapchain: vk::SwapchainKHR,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    /// Owned by the swapchain; never destroyed individually.
    pub images: Vec<vk::Image>,
}

pub unsafe fn create_swapchain(
    surface_loader: &surface::Instance,
    dev: &DeviceContext,
    surface: vk::SurfaceKHR,
    want: RenderSize,
) -> EngineResult<SwapchainBundle> {
    let support = SwapchainSupport::query(surface_loader, dev.phys, surface)?;
    if support.formats.is_empty() || support.present_modes.is_empty() {
        return Err(EngineError::Vulkan {
            op: "swapchain support query",
            result: vk::Result::ERROR_SURFACE_LOST_KHR,
        });
    }

    let caps = &support.capabilities;
    let (surf_format, format_reason) = choose_surface_format(&support.formats);
    let (present_mode, mode_reason) = choose_present_mode(&support.present_modes);
    let extent = choose_extent(caps, want);
    let image_count = choose_image_count(caps);
    let (sharing_mode, family_indices) = choose_sharing(dev.families);

    info!(
        "swapchain: format {:?}/{:?} ({}), present_mode {} ({}), extent {}x{}, images(min={} max={} -> {}), sharing {:?}",
        surf_format.format,
        surf_format.color_space,
        format_reason,
        pm_name(present_mode),
        mode_reason,
        extent.width,
        extent.height,
        caps.min_image_count,
        caps.max_image_count,
        image_count,
        sharing_mode,
    );

    let swap_info = vk::SwapchainCreateInfoKHR {
        s_type: vk::StructureType::SWAPCHAIN_CREATE_INFO_KHR,
        surface,
        min_image_count: image_count,
        image_format: surf_format.format,
        image_color_space: surf_format.color_space,
        image_extent: extent,
        image_array_layers: 1,
        image_usage: vk::ImageUsageFlags::COLOR_ATTACHMENT,
        image_sharing_mode: sharing_mode,
        queue_family_index_count: family_indices.len() as u32,
        p_queue_family_indices: family_indices.as_ptr(),
        pre_transform: caps.current_transform,
        composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
        present_mode,
        clipped: vk::TRUE,
        // Recreation tears the old chain down first; no overlap.
        old_swapchain: vk::SwapchainKHR::null(),
        ..Default::default()
    };

    let swapchain = dev
        .swapchain_loader
        .create_swapchain(&swap_info, None)
        .vk_op("vkCreateSwapchainKHR")?;
    let images = match dev.swapchain_loader.get_swapchain_images(swapchain) {
        Ok(images) => images,
        Err(result) => {
            dev.swapchain_loader.destroy_swapchain(swapchain, None);
            return Err(EngineError::Vulkan {
                op: "vkGetSwapchainImagesKHR",
                result,
            });
        }
    };

    Ok(SwapchainBundle {
        swapchain,
        format: surf_format.format,
        extent,
        images,
    })
}

/// 2D color view, identity swizzle, one mip, one layer.
pub fn image_view_info(image: vk::Image, format: vk::Format) -> vk::ImageViewCreateInfo<'static> {
    vk::ImageViewCreateInfo {
        s_type: vk::StructureType::IMAGE_VIEW_CREATE_INFO,
        image,
        view_type: vk::ImageViewType::TYPE_2D,
        format,
        components: vk::ComponentMapping {
            r: vk::ComponentSwizzle::IDENTITY,
            g: vk::ComponentSwizzle::IDENTITY,
            b: vk::ComponentSwizzle::IDENTITY,
            a: vk::ComponentSwizzle::IDENTITY,
        },
        subresource_range: vk::ImageSubresourceRange {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        },
        ..Default::default()
    }
}

/// One view per swapchain image.
pub unsafe fn create_image_views(
    device: &ash::Device,
    bundle: &SwapchainBundle,
) -> EngineResult<Vec<vk::ImageView>> {
    let mut views = Vec::with_capacity(bundle.images.len());
    for &image in &bundle.images {
        let iv_info = image_view_info(image, bundle.format);
        match device.create_image_view(&iv_info, None) {
            Ok(view) => views.push(view),
            Err(result) => {
                destroy_image_views(device, &views);
                return Err(EngineError::Vulkan {
                    op: "vkCreateImageView",
                    result,
                });
            }
        }
    }
    Ok(views)
}

pub unsafe fn destroy_image_views(device: &ash::Device, views: &[vk::ImageView]) {
    for &view in views {
        device.destroy_image_view(view, None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(min: u32, max: u32) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: min,
            max_image_count: max,
            ..Default::default()
        }
    }

    fn fmt(format: vk::Format, color_space: vk::ColorSpaceKHR) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR { format, color_space }
    }

    #[test]
    fn image_count_is_min_plus_one_within_max() {
        assert_eq!(choose_image_count(&caps(2, 4)), 3);
        assert_eq!(choose_image_count(&caps(3, 3)), 3);
        assert_eq!(choose_image_count(&caps(2, 0)), 3);
        assert_eq!(choose_image_count(&caps(1, 2)), 2);
    }

    #[test]
    fn undefined_only_format_gets_the_default() {
        let formats = [fmt(vk::Format::UNDEFINED, vk::ColorSpaceKHR::SRGB_NONLINEAR)];
        assert_eq!(choose_surface_format(&formats).0, PREFERRED_FORMAT);
    }

    #[test]
    fn exact_preferred_format_is_found() {
        let formats = [
            fmt(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::EXTENDED_SRGB_LINEAR_EXT),
            fmt(vk::Format::B8G8R8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];
        let (chosen, reason) = choose_surface_format(&formats);
        assert_eq!(chosen, formats[1]);
        assert_eq!(reason, "preferred_bgra8_unorm_srgb");
    }

    #[test]
    fn otherwise_first_format() {
        let formats = [fmt(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::EXTENDED_SRGB_LINEAR_EXT)];
        assert_eq!(choose_surface_format(&formats), (formats[0], "driver_default"));

        // Right format, wrong color space is not an exact match.
        let formats = [
            fmt(vk::Format::R16G16B16A16_SFLOAT, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            fmt(vk::Format::B8G8R8A8_UNORM, vk::ColorSpaceKHR::EXTENDED_SRGB_LINEAR_EXT),
        ];
        assert_eq!(choose_surface_format(&formats).0, formats[0]);
    }

    #[test]
    fn present_mode_preference() {
        use vk::PresentModeKHR as P;
        assert_eq!(choose_present_mode(&[P::FIFO, P::MAILBOX]).0, P::MAILBOX);
        assert_eq!(choose_present_mode(&[P::FIFO, P::IMMEDIATE]).0, P::IMMEDIATE);
        assert_eq!(choose_present_mode(&[P::FIFO]).0, P::FIFO);
        assert_eq!(choose_present_mode(&[P::IMMEDIATE, P::FIFO, P::MAILBOX]).0, P::MAILBOX);
        assert_eq!(choose_present_mode(&[P::FIFO_RELAXED]).0, P::FIFO);
    }

    #[test]
    fn defined_current_extent_is_used_verbatim() {
        let mut c = caps(2, 3);
        c.current_extent = vk::Extent2D { width: 800, height: 600 };
        c.min_image_extent = vk::Extent2D { width: 64, height: 64 };
        c.max_image_extent = vk::Extent2D { width: 4096, height: 4096 };
        assert_eq!(
            choose_extent(&c, RenderSize::new(1280, 720)),
            vk::Extent2D { width: 800, height: 600 }
        );
    }

    #[test]
    fn sentinel_extent_clamps_the_request() {
        let mut c = caps(2, 3);
        c.current_extent = vk::Extent2D { width: u32::MAX, height: u32::MAX };
        c.min_image_extent = vk::Extent2D { width: 64, height: 64 };
        c.max_image_extent = vk::Extent2D { width: 4096, height: 4096 };
        assert_eq!(
            choose_extent(&c, RenderSize::new(u32::MAX, u32::MAX)),
            vk::Extent2D { width: 4096, height: 4096 }
        );
        assert_eq!(
            choose_extent(&c, RenderSize::new(16, 1000)),
            vk::Extent2D { width: 64, height: 1000 }
        );
    }

    #[test]
    fn sharing_follows_family_split() {
        let same = QueueFamilies { graphics: 0, present: 0 };
        assert_eq!(choose_sharing(same), (vk::SharingMode::EXCLUSIVE, vec![]));

        let split = QueueFamilies { graphics: 0, present: 2 };
        assert_eq!(choose_sharing(split), (vk::SharingMode::CONCURRENT, vec![0, 2]));
    }

    #[test]
    fn image_views_are_plain_2d_color() {
        let info = image_view_info(vk::Image::null(), PREFERRED_FORMAT.format);
        assert_eq!(info.view_type, vk::ImageViewType::TYPE_2D);
        assert_eq!(info.format, PREFERRED_FORMAT.format);
        for swizzle in [info.components.r, info.components.g, info.components.b, info.components.a] {
            assert_eq!(swizzle, vk::ComponentSwizzle::IDENTITY);
        }
        let range = info.subresource_range;
        assert_eq!(range.aspect_mask, vk::ImageAspectFlags::COLOR);
        assert_eq!((range.base_mip_level, range.level_count), (0, 1));
        assert_eq!((range.base_array_layer, range.layer_count), (0, 1));
    }
}
