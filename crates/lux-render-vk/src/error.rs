// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use std::path::PathBuf;
use thiserror::Error;

use crate::lifecycle::EngineState;

pub type EngineResult<T> = std::result::Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("requested {kind} not available: {}", missing.join(", "))]
    Unsupported {
        kind: &'static str,
        missing: Vec<String>,
    },

    #[error("no Vulkan physical devices found")]
    NoPhysicalDevice,

    #[error("no suitable physical device ({})", rejected.join("; "))]
    NoSuitableDevice { rejected: Vec<String> },

    #[error("{op} failed: {result}")]
    Vulkan {
        op: &'static str,
        result: vk::Result,
    },

    #[error("Vulkan loader unavailable: {0}")]
    Loader(#[from] ash::LoadingError),

    #[error("native window handle unavailable: {0}")]
    WindowHandle(#[from] raw_window_handle::HandleError),

    #[error("shader binary {} could not be read: {source}", path.display())]
    ShaderMissing {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("shader binary {} is empty", path.display())]
    ShaderEmpty { path: PathBuf },

    #[error("{op} requires state {expected:?}, engine is {actual:?}")]
    InvalidState {
        op: &'static str,
        expected: EngineState,
        actual: EngineState,
    },

    #[error("cannot build a swapchain for a {width}x{height} surface")]
    EmptySurface { width: u32, height: u32 },

    #[error("swapchain no longer matches the surface")]
    SwapchainStale,
}

/// Attaches the failing call's name to a raw `vk::Result`.
pub(crate) trait VkContext<T> {
    fn vk_op(self, op: &'static str) -> EngineResult<T>;
}

impl<T> VkContext<T> for Result<T, vk::Result> {
    fn vk_op(self, op: &'static str) -> EngineResult<T> {
        self.map_err(|result| EngineError::Vulkan { op, result })
    }
}
