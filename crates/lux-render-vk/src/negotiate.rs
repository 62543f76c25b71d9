// SPDX-License-Identifier: CEPL-1.0
//! Requested-versus-available checks for instance extensions, instance layers
//! and device extensions. All-or-nothing: one missing name fails the call.

use ash::vk;
use std::ffi::CStr;
use tracing::{debug, error};

use crate::error::{EngineError, EngineResult};

/// Checks `requested ⊆ available`. On failure the error names exactly
/// `requested \ available`, in request order.
pub fn negotiate<'a>(
    kind: &'static str,
    requested: &[&CStr],
    available: impl IntoIterator<Item = &'a CStr>,
) -> EngineResult<()> {
    let available: Vec<&CStr> = available.into_iter().collect();

    debug!("requested {kind}: {:?}", requested);
    debug!("available {kind}: {:?}", available);

    let mut missing: Vec<String> = Vec::new();
    for want in requested.iter().filter(|want| !available.contains(want)) {
        let name = want.to_string_lossy().into_owned();
        if !missing.contains(&name) {
            missing.push(name);
        }
    }

    if missing.is_empty() {
        debug!("all requested {kind} are supported");
        return Ok(());
    }

    for name in &missing {
        error!("{kind}: {name} not available");
    }
    Err(EngineError::Unsupported { kind, missing })
}

pub(crate) fn extension_names(props: &[vk::ExtensionProperties]) -> Vec<&CStr> {
    props
        .iter()
        .filter_map(|p| p.extension_name_as_c_str().ok())
        .collect()
}

pub(crate) fn layer_names(props: &[vk::LayerProperties]) -> Vec<&CStr> {
    props
        .iter()
        .filter_map(|p| p.layer_name_as_c_str().ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SURFACE: &CStr = c"VK_KHR_surface";
    const XLIB: &CStr = c"VK_KHR_xlib_surface";
    const DEBUG: &CStr = c"VK_EXT_debug_utils";
    const VALIDATION: &CStr = c"VK_LAYER_KHRONOS_validation";

    #[test]
    fn subset_succeeds() {
        negotiate("instance extensions", &[SURFACE, XLIB], [DEBUG, XLIB, SURFACE]).unwrap();
    }

    #[test]
    fn empty_request_always_succeeds() {
        negotiate("instance layers", &[], []).unwrap();
    }

    #[test]
    fn reports_exactly_the_difference() {
        let err = negotiate("instance extensions", &[SURFACE, XLIB, DEBUG], [SURFACE]).unwrap_err();
        match err {
            EngineError::Unsupported { kind, missing } => {
                assert_eq!(kind, "instance extensions");
                assert_eq!(missing, vec!["VK_KHR_xlib_surface", "VK_EXT_debug_utils"]);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn repeated_request_is_reported_once() {
        let err = negotiate("instance extensions", &[DEBUG, SURFACE, DEBUG], [SURFACE]).unwrap_err();
        match err {
            EngineError::Unsupported { missing, .. } => {
                assert_eq!(missing, vec!["VK_EXT_debug_utils".to_owned()]);
            }
            other => panic!("unexpected {other:?}"),
        }
        negotiate("instance extensions", &[SURFACE, SURFACE], [SURFACE]).unwrap();
    }

    #[test]
    fn missing_layer_against_empty_set() {
        let err = negotiate("instance layers", &[VALIDATION], []).unwrap_err();
        assert!(matches!(
            err,
            EngineError::Unsupported { ref missing, .. } if missing == &["VK_LAYER_KHRONOS_validation"]
        ));
    }

    #[test]
    fn names_are_read_from_properties() {
        let mut prop = vk::ExtensionProperties::default();
        for (dst, src) in prop.extension_name.iter_mut().zip(SURFACE.to_bytes()) {
            *dst = *src as std::ffi::c_char;
        }
        let props = [prop];
        assert_eq!(extension_names(&props), vec![SURFACE]);
    }
}
