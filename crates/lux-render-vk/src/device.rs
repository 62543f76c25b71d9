// SPDX-License-Identifier: CEPL-1.0
use ash::khr::{surface, swapchain};
use ash::vk;
use std::ffi::CStr;
use std::fmt;
use tracing::{debug, info, warn};

use crate::error::{EngineError, EngineResult, VkContext};
use crate::instance::InstanceContext;
use crate::negotiate::{extension_names, negotiate};

/// Graphics and present family indices, each unknown until found.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    pub graphics: Option<u32>,
    pub present: Option<u32>,
}

/// A complete index pair. `graphics == present` is allowed and common.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueFamilies {
    pub graphics: u32,
    pub present: u32,
}

impl QueueFamilyIndices {
    pub fn is_complete(&self) -> bool {
        self.graphics.is_some() && self.present.is_some()
    }

    pub fn resolve(&self) -> Option<QueueFamilies> {
        Some(QueueFamilies {
            graphics: self.graphics?,
            present: self.present?,
        })
    }
}

impl QueueFamilies {
    pub fn coincide(&self) -> bool {
        self.graphics == self.present
    }

    /// Distinct family indices, graphics first. One queue-create request each.
    pub fn unique(&self) -> Vec<u32> {
        if self.coincide() {
            vec![self.graphics]
        } else {
            vec![self.graphics, self.present]
        }
    }
}

/// Scans families in order, keeping the first with graphics and the first that can
/// present to the surface. Stops as soon as both are known.
pub fn find_queue_families(
    families: &[vk::QueueFamilyProperties],
    mut supports_present: impl FnMut(u32) -> bool,
) -> QueueFamilyIndices {
    let mut found = QueueFamilyIndices::default();
    for (i, family) in families.iter().enumerate() {
        let i = i as u32;
        if found.graphics.is_none()
            && family.queue_count > 0
            && family.queue_flags.contains(vk::QueueFlags::GRAPHICS)
        {
            found.graphics = Some(i);
        }
        if found.present.is_none() && family.queue_count > 0 && supports_present(i) {
            found.present = Some(i);
        }
        if found.is_complete() {
            break;
        }
    }
    found
}

/// What the selector needs to know about one physical device.
#[derive(Clone, Debug)]
pub struct DeviceReport {
    pub name: String,
    pub device_type: vk::PhysicalDeviceType,
    pub geometry_shader: bool,
    pub queue_families: QueueFamilyIndices,
    pub has_swapchain_ext: bool,
    pub surface_formats: usize,
    pub present_modes: usize,
    /// A capability query that failed while probing; the device is rejected.
    pub query_error: Option<(&'static str, vk::Result)>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Rejection {
    DeviceType(vk::PhysicalDeviceType),
    NoGeometryShader,
    IncompleteQueueFamilies,
    MissingSwapchainExtension,
    NoSurfaceFormats,
    NoPresentModes,
    QueryFailed { op: &'static str, result: vk::Result },
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::DeviceType(t) => write!(f, "device type {t:?} is not a discrete or virtual GPU"),
            Rejection::NoGeometryShader => f.write_str("no geometry shader support"),
            Rejection::IncompleteQueueFamilies => f.write_str("no graphics + present queue families"),
            Rejection::MissingSwapchainExtension => f.write_str("VK_KHR_swapchain not exposed"),
            Rejection::NoSurfaceFormats => f.write_str("surface reports no formats"),
            Rejection::NoPresentModes => f.write_str("surface reports no present modes"),
            Rejection::QueryFailed { op, result } => write!(f, "{op} failed: {result}"),
        }
    }
}

/// Suitability predicates, applied in order; the first failure is the reason.
pub fn check_suitability(report: &DeviceReport) -> Result<QueueFamilies, Rejection> {
    if let Some((op, result)) = report.query_error {
        return Err(Rejection::QueryFailed { op, result });
    }
    if !matches!(
        report.device_type,
        vk::PhysicalDeviceType::DISCRETE_GPU | vk::PhysicalDeviceType::VIRTUAL_GPU
    ) {
        return Err(Rejection::DeviceType(report.device_type));
    }
    if !report.geometry_shader {
        return Err(Rejection::NoGeometryShader);
    }
    let families = report
        .queue_families
        .resolve()
        .ok_or(Rejection::IncompleteQueueFamilies)?;
    if !report.has_swapchain_ext {
        return Err(Rejection::MissingSwapchainExtension);
    }
    if report.surface_formats == 0 {
        return Err(Rejection::NoSurfaceFormats);
    }
    if report.present_modes == 0 {
        return Err(Rejection::NoPresentModes);
    }
    Ok(families)
}

/// First match in enumeration order. No ranking between suitable devices.
pub fn select_device(reports: &[DeviceReport]) -> EngineResult<(usize, QueueFamilies)> {
    if reports.is_empty() {
        return Err(EngineError::NoPhysicalDevice);
    }
    let mut rejected = Vec::new();
    for (i, report) in reports.iter().enumerate() {
        match check_suitability(report) {
            Ok(families) => {
                info!(
                    "selected device {} \"{}\" (graphics family {}, present family {})",
                    i, report.name, families.graphics, families.present
                );
                return Ok((i, families));
            }
            Err(why) => {
                debug!("device {} \"{}\" rejected: {}", i, report.name, why);
                rejected.push(format!("{}: {}", report.name, why));
            }
        }
    }
    Err(EngineError::NoSuitableDevice { rejected })
}

/// Swapchain extension, surface format count, present mode count.
unsafe fn query_swapchain_support(
    instance: &ash::Instance,
    surface_loader: &surface::Instance,
    surface: vk::SurfaceKHR,
    phys: vk::PhysicalDevice,
) -> Result<(bool, usize, usize), (&'static str, vk::Result)> {
    let ext_props = instance
        .enumerate_device_extension_properties(phys)
        .map_err(|r| ("vkEnumerateDeviceExtensionProperties", r))?;
    if !extension_names(&ext_props).contains(&swapchain::NAME) {
        return Ok((false, 0, 0));
    }
    let formats = surface_loader
        .get_physical_device_surface_formats(phys, surface)
        .map_err(|r| ("vkGetPhysicalDeviceSurfaceFormatsKHR", r))?;
    let modes = surface_loader
        .get_physical_device_surface_present_modes(phys, surface)
        .map_err(|r| ("vkGetPhysicalDeviceSurfacePresentModesKHR", r))?;
    Ok((true, formats.len(), modes.len()))
}

/// Never fails: a query error is recorded in the report and rejects the device.
unsafe fn probe_device(
    instance: &ash::Instance,
    surface_loader: &surface::Instance,
    surface: vk::SurfaceKHR,
    phys: vk::PhysicalDevice,
) -> DeviceReport {
    let props = instance.get_physical_device_properties(phys);
    let features = instance.get_physical_device_features(phys);
    let families = instance.get_physical_device_queue_family_properties(phys);

    let queue_families = find_queue_families(&families, |i| {
        surface_loader
            .get_physical_device_surface_support(phys, i, surface)
            .unwrap_or(false)
    });

    let (support, query_error) = match query_swapchain_support(instance, surface_loader, surface, phys) {
        Ok(support) => (support, None),
        Err(failed) => ((false, 0, 0), Some(failed)),
    };
    let (has_swapchain_ext, surface_formats, present_modes) = support;

    DeviceReport {
        name: props
            .device_name_as_c_str()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "<unnamed>".to_owned()),
        device_type: props.device_type,
        geometry_shader: features.geometry_shader == vk::TRUE,
        queue_families,
        has_swapchain_ext,
        surface_formats,
        present_modes,
        query_error,
    }
}

/// Enumerates physical devices and returns the first suitable one.
pub unsafe fn pick_physical_device(
    ctx: &InstanceContext,
    surface: vk::SurfaceKHR,
) -> EngineResult<(vk::PhysicalDevice, QueueFamilies)> {
    let devices = ctx
        .instance
        .enumerate_physical_devices()
        .vk_op("vkEnumeratePhysicalDevices")?;
    let mut reports = Vec::with_capacity(devices.len());
    for &phys in &devices {
        reports.push(probe_device(&ctx.instance, &ctx.surface_loader, surface, phys));
    }
    let (i, families) = select_device(&reports)?;
    Ok((devices[i], families))
}

/// Logical device plus its queues and the swapchain loader bound to it.
pub struct DeviceContext {
    pub phys: vk::PhysicalDevice,
    pub families: QueueFamilies,
    pub device: ash::Device,
    pub graphics_queue: vk::Queue,
    pub present_queue: vk::Queue,
    pub swapchain_loader: swapchain::Device,
}

pub unsafe fn create_logical_device(
    ctx: &InstanceContext,
    phys: vk::PhysicalDevice,
    families: QueueFamilies,
) -> EngineResult<DeviceContext> {
    let device_exts: [&CStr; 1] = [swapchain::NAME];
    let ext_props = ctx
        .instance
        .enumerate_device_extension_properties(phys)
        .vk_op("vkEnumerateDeviceExtensionProperties")?;
    negotiate("device extensions", &device_exts, extension_names(&ext_props))?;

    let priorities = [1.0_f32];
    let queue_infos: Vec<vk::DeviceQueueCreateInfo> = families
        .unique()
        .into_iter()
        .map(|family| vk::DeviceQueueCreateInfo {
            s_type: vk::StructureType::DEVICE_QUEUE_CREATE_INFO,
            queue_family_index: family,
            queue_count: 1,
            p_queue_priorities: priorities.as_ptr(),
            ..Default::default()
        })
        .collect();

    let ext_ptrs: Vec<_> = device_exts.iter().map(|e| e.as_ptr()).collect();
    // Device layers are deprecated; mirrored for older loaders.
    let layer_ptrs: Vec<_> = ctx.layers.iter().map(|l| l.as_ptr()).collect();
    let features = vk::PhysicalDeviceFeatures::default();

    let dinfo = vk::DeviceCreateInfo {
        s_type: vk::StructureType::DEVICE_CREATE_INFO,
        queue_create_info_count: queue_infos.len() as u32,
        p_queue_create_infos: queue_infos.as_ptr(),
        enabled_extension_count: ext_ptrs.len() as u32,
        pp_enabled_extension_names: ext_ptrs.as_ptr(),
        enabled_layer_count: layer_ptrs.len() as u32,
        pp_enabled_layer_names: layer_ptrs.as_ptr(),
        p_enabled_features: &features,
        ..Default::default()
    };

    let device = ctx
        .instance
        .create_device(phys, &dinfo, None)
        .vk_op("vkCreateDevice")?;
    let graphics_queue = device.get_device_queue(families.graphics, 0);
    let present_queue = device.get_device_queue(families.present, 0);
    if families.coincide() {
        debug!("graphics and present share queue family {}", families.graphics);
    } else {
        warn!(
            "graphics ({}) and present ({}) families differ; swapchain images will be shared concurrently",
            families.graphics, families.present
        );
    }

    let swapchain_loader = swapchain::Device::new(&ctx.instance, &device);
    Ok(DeviceContext {
        phys,
        families,
        device,
        graphics_queue,
        present_queue,
        swapchain_loader,
    })
}

impl DeviceContext {
    /// Blocks until the GPU has finished everything submitted so far.
    pub unsafe fn wait_idle(&self) -> EngineResult<()> {
        self.device.device_wait_idle().vk_op("vkDeviceWaitIdle")
    }

    pub unsafe fn destroy(&self) {
        self.device.destroy_device(None);
    }
}
