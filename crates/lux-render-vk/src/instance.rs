// SPDX-License-Identifier: CEPL-1.0
use ash::ext::debug_utils;
use ash::khr::surface;
use ash::{vk, Entry, Instance};
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
use std::ffi::{CStr, CString};
use tracing::{debug, error, info, trace, warn};

use crate::error::{EngineResult, VkContext};
use crate::negotiate::{extension_names, layer_names, negotiate};
use crate::EngineConfig;

pub const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

pub struct DebugMessenger {
    loader: debug_utils::Instance,
    messenger: vk::DebugUtilsMessengerEXT,
}

/// Entry, instance and the instance-level loaders. Destroyed last.
pub struct InstanceContext {
    pub entry: Entry,
    pub instance: Instance,
    pub surface_loader: surface::Instance,
    debug: Option<DebugMessenger>,
    /// Enabled instance layers, mirrored into device creation.
    pub layers: Vec<&'static CStr>,
}

unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    types: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user: *mut std::os::raw::c_void,
) -> vk::Bool32 {
    if data.is_null() || (*data).p_message.is_null() {
        return vk::FALSE;
    }
    let msg = CStr::from_ptr((*data).p_message).to_string_lossy();
    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        error!("[vulkan {types:?}] {msg}");
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        warn!("[vulkan {types:?}] {msg}");
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO) {
        debug!("[vulkan {types:?}] {msg}");
    } else {
        trace!("[vulkan {types:?}] {msg}");
    }
    vk::FALSE
}

fn c_string(s: &str) -> CString {
    CString::new(s.replace('\0', "")).unwrap_or_default()
}

fn version(v: [u32; 3]) -> u32 {
    vk::make_api_version(0, v[0], v[1], v[2])
}

unsafe fn create_debug_messenger(entry: &Entry, instance: &Instance) -> EngineResult<DebugMessenger> {
    let loader = debug_utils::Instance::new(entry, instance);
    let ci = vk::DebugUtilsMessengerCreateInfoEXT {
        s_type: vk::StructureType::DEBUG_UTILS_MESSENGER_CREATE_INFO_EXT,
        message_severity: vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
            | vk::DebugUtilsMessageSeverityFlagsEXT::INFO
            | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
            | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
        message_type: vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
            | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
            | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        pfn_user_callback: Some(debug_callback),
        ..Default::default()
    };
    let messenger = loader
        .create_debug_utils_messenger(&ci, None)
        .vk_op("vkCreateDebugUtilsMessengerEXT")?;
    Ok(DebugMessenger { loader, messenger })
}

/// Loads the Vulkan library, negotiates extensions and layers, and creates the instance.
pub unsafe fn create_instance(
    cfg: &EngineConfig,
    display: RawDisplayHandle,
) -> EngineResult<InstanceContext> {
    let entry = Entry::load()?;

    // Platform WSI extensions first, then optional debug utils.
    let mut extensions: Vec<&'static CStr> = ash_window::enumerate_required_extensions(display)
        .vk_op("enumerate_required_extensions")?
        .iter()
        .map(|&p| CStr::from_ptr(p))
        .collect();
    if cfg.validation {
        extensions.push(debug_utils::NAME);
    }

    let ext_props = entry
        .enumerate_instance_extension_properties(None)
        .vk_op("vkEnumerateInstanceExtensionProperties")?;
    negotiate("instance extensions", &extensions, extension_names(&ext_props))?;

    info!(
        "{} validation layers",
        if cfg.validation { "using" } else { "not using" }
    );
    let layers: Vec<&'static CStr> = if cfg.validation {
        vec![VALIDATION_LAYER]
    } else {
        Vec::new()
    };
    if !layers.is_empty() {
        let layer_props = entry
            .enumerate_instance_layer_properties()
            .vk_op("vkEnumerateInstanceLayerProperties")?;
        negotiate("instance layers", &layers, layer_names(&layer_props))?;
    }

    let app_name = c_string(&cfg.app_name);
    let engine_name = c_string(&cfg.engine_name);
    let app_info = vk::ApplicationInfo {
        s_type: vk::StructureType::APPLICATION_INFO,
        p_application_name: app_name.as_ptr(),
        application_version: version(cfg.app_version),
        p_engine_name: engine_name.as_ptr(),
        engine_version: version(cfg.engine_version),
        api_version: vk::API_VERSION_1_0,
        ..Default::default()
    };

    let ext_ptrs: Vec<_> = extensions.iter().map(|e| e.as_ptr()).collect();
    let layer_ptrs: Vec<_> = layers.iter().map(|l| l.as_ptr()).collect();
    let create_info = vk::InstanceCreateInfo {
        s_type: vk::StructureType::INSTANCE_CREATE_INFO,
        p_application_info: &app_info,
        enabled_extension_count: ext_ptrs.len() as u32,
        pp_enabled_extension_names: ext_ptrs.as_ptr(),
        enabled_layer_count: layer_ptrs.len() as u32,
        pp_enabled_layer_names: layer_ptrs.as_ptr(),
        ..Default::default()
    };
    let instance = entry
        .create_instance(&create_info, None)
        .vk_op("vkCreateInstance")?;
    info!("instance created for application \"{}\"", cfg.app_name);

    let debug = if cfg.validation {
        match create_debug_messenger(&entry, &instance) {
            Ok(d) => Some(d),
            Err(e) => {
                instance.destroy_instance(None);
                return Err(e);
            }
        }
    } else {
        None
    };

    let surface_loader = surface::Instance::new(&entry, &instance);
    Ok(InstanceContext {
        entry,
        instance,
        surface_loader,
        debug,
        layers,
    })
}

impl InstanceContext {
    /// Binds the instance to the native window.
    pub unsafe fn create_surface(
        &self,
        display: RawDisplayHandle,
        window: RawWindowHandle,
    ) -> EngineResult<vk::SurfaceKHR> {
        let surface = ash_window::create_surface(&self.entry, &self.instance, display, window, None)
            .vk_op("vkCreateSurfaceKHR")?;
        debug!("surface bound to native window");
        Ok(surface)
    }

    pub unsafe fn destroy_surface(&self, surface: vk::SurfaceKHR) {
        self.surface_loader.destroy_surface(surface, None);
    }

    /// Everything created from this instance must already be gone.
    pub unsafe fn destroy(&mut self) {
        if let Some(d) = self.debug.take() {
            d.loader.destroy_debug_utils_messenger(d.messenger, None);
        }
        self.instance.destroy_instance(None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_triple_packs_like_vulkan() {
        let v = version([1, 2, 3]);
        assert_eq!(vk::api_version_major(v), 1);
        assert_eq!(vk::api_version_minor(v), 2);
        assert_eq!(vk::api_version_patch(v), 3);
    }

    #[test]
    fn interior_nul_is_stripped_from_names() {
        assert_eq!(c_string("Lux\0Editor").as_c_str(), c"LuxEditor");
        assert_eq!(c_string("Lux Graphics").as_c_str(), c"Lux Graphics");
    }
}
