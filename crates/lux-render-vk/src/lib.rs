// SPDX-License-Identifier: CEPL-1.0
//! Vulkan triangle engine: instance, surface, device, swapchain, render pass,
//! pipeline, framebuffers, pre-recorded command buffers and the per-frame
//! acquire/submit/present cycle.

use std::path::PathBuf;

pub mod commands;
pub mod device;
mod engine;
pub mod error;
pub mod frame;
pub mod instance;
pub mod lifecycle;
pub mod negotiate;
pub mod pipeline;
pub mod shader;
pub mod swapchain;

pub use engine::GraphicsEngine;
pub use error::{EngineError, EngineResult};
pub use frame::{Acquired, FrameDriver, FrameOutcome, FrameTarget, Presented};
pub use lifecycle::EngineState;

/// SPIR-V produced by `build.rs`.
pub const BUILTIN_VERTEX_SHADER: &str = concat!(env!("OUT_DIR"), "/triangle.vert.spv");
pub const BUILTIN_FRAGMENT_SHADER: &str = concat!(env!("OUT_DIR"), "/triangle.frag.spv");

#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub app_name: String,
    pub app_version: [u32; 3],
    pub engine_name: String,
    pub engine_version: [u32; 3],
    /// Enables `VK_LAYER_KHRONOS_validation` and the debug messenger.
    pub validation: bool,
    pub vertex_shader: PathBuf,
    pub fragment_shader: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            app_name: "Vulkan Application".to_owned(),
            app_version: [1, 0, 0],
            engine_name: "Lux Graphics".to_owned(),
            engine_version: [0, 1, 0],
            validation: cfg!(debug_assertions),
            vertex_shader: PathBuf::from(BUILTIN_VERTEX_SHADER),
            fragment_shader: PathBuf::from(BUILTIN_FRAGMENT_SHADER),
        }
    }
}
