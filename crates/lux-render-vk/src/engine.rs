// SPDX-License-Identifier: CEPL-1.0
use anyhow::Result;
use ash::vk;
use lux_render::{RenderSize, Renderer};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle, RawDisplayHandle, RawWindowHandle};
use tracing::{debug, error, info, warn};

use crate::commands::{
    allocate_command_buffers, create_command_pool, create_framebuffers, destroy_framebuffers,
    free_command_buffers, record_draw_commands,
};
use crate::device::{create_logical_device, pick_physical_device, DeviceContext};
use crate::error::{EngineError, EngineResult};
use crate::frame::{FrameDriver, FrameOutcome, FrameSync, VkFrame};
use crate::instance::{create_instance, InstanceContext};
use crate::lifecycle::{
    check_order, create_steps, destroy_steps, EngineState, Resource, Step, RECREATE_STEPS,
};
use crate::pipeline::{create_pipeline, create_render_pass, PipelineBundle};
use crate::shader::ShaderPair;
use crate::swapchain::{create_image_views, create_swapchain, destroy_image_views, SwapchainBundle};
use crate::EngineConfig;

/// Owns every Vulkan object behind one window and drives the frame loop.
///
/// Objects are created in `run` in dependency order and released in reverse by
/// `tear_down` (also on drop). Swapchain-dependent objects are rebuilt through
/// the fixed `RECREATE_STEPS` sequence.
pub struct GraphicsEngine {
    cfg: EngineConfig,
    state: EngineState,
    size: RenderSize,
    // Zero-sized window: frames are skipped until the next non-empty resize.
    paused: bool,

    shaders: Option<ShaderPair>,
    inst: Option<InstanceContext>,
    surface: vk::SurfaceKHR,
    dev: Option<DeviceContext>,
    command_pool: vk::CommandPool,
    sync: Option<FrameSync>,

    swapchain: Option<SwapchainBundle>,
    image_views: Vec<vk::ImageView>,
    render_pass: vk::RenderPass,
    pipeline: Option<PipelineBundle>,
    framebuffers: Vec<vk::Framebuffer>,
    command_buffers: Vec<vk::CommandBuffer>,

    driver: FrameDriver,
}

fn missing(op: &'static str, expected: EngineState, actual: EngineState) -> EngineError {
    EngineError::InvalidState {
        op,
        expected,
        actual,
    }
}

impl GraphicsEngine {
    pub fn new(cfg: EngineConfig) -> Self {
        Self {
            cfg,
            state: EngineState::Uninitialized,
            size: RenderSize::default(),
            paused: false,
            shaders: None,
            inst: None,
            surface: vk::SurfaceKHR::null(),
            dev: None,
            command_pool: vk::CommandPool::null(),
            sync: None,
            swapchain: None,
            image_views: Vec::new(),
            render_pass: vk::RenderPass::null(),
            pipeline: None,
            framebuffers: Vec::new(),
            command_buffers: Vec::new(),
            driver: FrameDriver::new(),
        }
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    /// Current swapchain extent, if one exists.
    pub fn extent(&self) -> Option<vk::Extent2D> {
        self.swapchain.as_ref().map(|sc| sc.extent)
    }

    pub fn image_count(&self) -> usize {
        self.swapchain.as_ref().map_or(0, |sc| sc.images.len())
    }

    /// Frames presented since `run`.
    pub fn frames(&self) -> u64 {
        self.driver.frames()
    }

    /// Builds everything up to `Running` against the given window. On failure
    /// whatever was created is released and the engine ends `TornDown`.
    /// An empty `size` is refused up front and leaves the engine untouched.
    pub fn run(
        &mut self,
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
    ) -> EngineResult<()> {
        self.state.require(EngineState::Uninitialized, "run")?;
        if size.is_empty() {
            return Err(EngineError::EmptySurface {
                width: size.width,
                height: size.height,
            });
        }
        let display = display.display_handle()?.as_raw();
        let window = window.window_handle()?.as_raw();
        self.size = size;

        if let Err(e) = unsafe { self.initialize(display, window) } {
            error!("initialisation failed in state {:?}: {e}", self.state);
            self.tear_down();
            return Err(e);
        }
        info!(
            "engine running: {} swapchain images, extent {:?}",
            self.image_count(),
            self.extent()
        );
        Ok(())
    }

    unsafe fn initialize(&mut self, display: RawDisplayHandle, window: RawWindowHandle) -> EngineResult<()> {
        // Shaders first: a missing binary should fail before any GPU object exists.
        self.shaders = Some(ShaderPair::load(&self.cfg.vertex_shader, &self.cfg.fragment_shader)?);

        self.inst = Some(create_instance(&self.cfg, display)?);
        self.advance(EngineState::InstanceReady);

        self.surface = self
            .inst
            .as_ref()
            .ok_or_else(|| missing("create_surface", EngineState::InstanceReady, self.state))?
            .create_surface(display, window)?;
        self.advance(EngineState::SurfaceReady);

        let inst = self
            .inst
            .as_ref()
            .ok_or_else(|| missing("pick_physical_device", EngineState::SurfaceReady, self.state))?;
        let (phys, families) = pick_physical_device(inst, self.surface)?;
        let dev = create_logical_device(inst, phys, families)?;
        self.dev = Some(dev);
        let device = self
            .dev
            .as_ref()
            .map(|d| &d.device)
            .ok_or_else(|| missing("create_command_pool", EngineState::DeviceReady, self.state))?;
        self.command_pool = create_command_pool(device, families.graphics)?;
        self.sync = Some(FrameSync::create(device)?);
        self.advance(EngineState::DeviceReady);

        let creates = create_steps();
        debug_assert!(check_order(creates, &[]).is_ok());
        let stages = [
            (&creates[..2], EngineState::SwapchainReady),
            (&creates[2..4], EngineState::PipelineReady),
            (&creates[4..], EngineState::CommandsReady),
        ];
        for (steps, reached) in stages {
            for &step in steps {
                self.apply(step)?;
            }
            self.advance(reached);
        }

        self.advance(EngineState::Running);
        Ok(())
    }

    fn advance(&mut self, to: EngineState) {
        debug_assert_eq!(self.state.next(), Some(to));
        debug!("engine {:?} -> {:?}", self.state, to);
        self.state = to;
    }

    /// Executes one step of the swapchain protocol. Destroying an absent
    /// object is a no-op so partial builds can be unwound with the same steps.
    unsafe fn apply(&mut self, step: Step) -> EngineResult<()> {
        let state = self.state;
        let dev = self
            .dev
            .as_ref()
            .ok_or_else(|| missing("swapchain resources", EngineState::DeviceReady, state))?;
        let device = &dev.device;

        match step {
            Step::WaitIdle => dev.wait_idle()?,

            Step::Destroy(Resource::CommandBuffers) => {
                free_command_buffers(device, self.command_pool, &self.command_buffers);
                self.command_buffers.clear();
            }
            Step::Destroy(Resource::Framebuffers) => {
                destroy_framebuffers(device, &self.framebuffers);
                self.framebuffers.clear();
            }
            Step::Destroy(Resource::Pipeline) => {
                if let Some(p) = self.pipeline.take() {
                    p.destroy(device);
                }
            }
            Step::Destroy(Resource::ImageViews) => {
                destroy_image_views(device, &self.image_views);
                self.image_views.clear();
            }
            Step::Destroy(Resource::RenderPass) => {
                if self.render_pass != vk::RenderPass::null() {
                    device.destroy_render_pass(self.render_pass, None);
                    self.render_pass = vk::RenderPass::null();
                }
            }
            Step::Destroy(Resource::Swapchain) => {
                if let Some(sc) = self.swapchain.take() {
                    dev.swapchain_loader.destroy_swapchain(sc.swapchain, None);
                }
            }

            Step::Create(Resource::Swapchain) => {
                let inst = self
                    .inst
                    .as_ref()
                    .ok_or_else(|| missing("create_swapchain", EngineState::InstanceReady, state))?;
                self.swapchain = Some(create_swapchain(
                    &inst.surface_loader,
                    dev,
                    self.surface,
                    self.size,
                )?);
            }
            Step::Create(Resource::ImageViews) => {
                let sc = self
                    .swapchain
                    .as_ref()
                    .ok_or_else(|| missing("create_image_views", EngineState::SwapchainReady, state))?;
                self.image_views = create_image_views(device, sc)?;
            }
            Step::Create(Resource::RenderPass) => {
                let sc = self
                    .swapchain
                    .as_ref()
                    .ok_or_else(|| missing("create_render_pass", EngineState::SwapchainReady, state))?;
                self.render_pass = create_render_pass(device, sc.format)?;
            }
            Step::Create(Resource::Pipeline) => {
                let sc = self
                    .swapchain
                    .as_ref()
                    .ok_or_else(|| missing("create_pipeline", EngineState::SwapchainReady, state))?;
                let shaders = self
                    .shaders
                    .as_ref()
                    .ok_or_else(|| missing("create_pipeline", EngineState::DeviceReady, state))?;
                self.pipeline = Some(create_pipeline(device, self.render_pass, sc.extent, shaders)?);
            }
            Step::Create(Resource::Framebuffers) => {
                let sc = self
                    .swapchain
                    .as_ref()
                    .ok_or_else(|| missing("create_framebuffers", EngineState::SwapchainReady, state))?;
                self.framebuffers = create_framebuffers(device, self.render_pass, &self.image_views, sc.extent)?;
            }
            Step::Create(Resource::CommandBuffers) => {
                let sc = self
                    .swapchain
                    .as_ref()
                    .ok_or_else(|| missing("record_commands", EngineState::SwapchainReady, state))?;
                let pipeline = self
                    .pipeline
                    .as_ref()
                    .ok_or_else(|| missing("record_commands", EngineState::PipelineReady, state))?;
                self.command_buffers =
                    allocate_command_buffers(device, self.command_pool, self.framebuffers.len())?;
                record_draw_commands(
                    device,
                    &self.command_buffers,
                    &self.framebuffers,
                    self.render_pass,
                    pipeline.pipeline,
                    sc.extent,
                )?;
            }
        }
        Ok(())
    }

    /// Draws one frame. A stale swapchain is rebuilt at the last known size
    /// before returning.
    pub fn draw_frame(&mut self) -> EngineResult<FrameOutcome> {
        self.state.require(EngineState::Running, "draw_frame")?;
        if self.paused {
            return Ok(FrameOutcome::Skipped);
        }

        let state = self.state;
        let outcome = {
            let dev = self
                .dev
                .as_ref()
                .ok_or_else(|| missing("draw_frame", EngineState::DeviceReady, state))?;
            let sc = self
                .swapchain
                .as_ref()
                .ok_or_else(|| missing("draw_frame", EngineState::SwapchainReady, state))?;
            let sync = self
                .sync
                .as_ref()
                .ok_or_else(|| missing("draw_frame", EngineState::DeviceReady, state))?;
            let mut frame = VkFrame {
                dev,
                swapchain: sc.swapchain,
                command_buffers: &self.command_buffers,
                sync,
            };
            self.driver.tick(&mut frame)?
        };

        if outcome == FrameOutcome::Stale {
            info!("swapchain out of date, rebuilding at {}x{}", self.size.width, self.size.height);
            self.recreate_swapchain(self.size)?;
        }
        Ok(outcome)
    }

    /// Rebuilds every swapchain-dependent object for `size`. A zero-sized
    /// window only pauses drawing; the rebuild happens on the next real size.
    /// Failure is fatal: the engine is torn down.
    pub fn recreate_swapchain(&mut self, size: RenderSize) -> EngineResult<()> {
        self.state.require(EngineState::Running, "recreate_swapchain")?;
        self.size = size;
        if size.is_empty() {
            if !self.paused {
                info!("resize to {}x{}, paused", size.width, size.height);
            }
            self.paused = true;
            return Ok(());
        }
        if self.paused {
            info!("resize to {}x{}, resumed", size.width, size.height);
        }
        self.paused = false;

        debug_assert!(check_order(&RECREATE_STEPS, &Resource::ALL).is_ok());
        for &step in RECREATE_STEPS.iter() {
            if let Err(e) = unsafe { self.apply(step) } {
                error!("swapchain rebuild failed at {step:?}: {e}");
                self.tear_down();
                return Err(e);
            }
        }
        info!(
            "swapchain rebuilt: {} images, extent {:?}",
            self.image_count(),
            self.extent()
        );
        Ok(())
    }

    /// Releases everything in reverse creation order. Safe from any state and
    /// safe to call twice.
    pub fn tear_down(&mut self) {
        if self.state == EngineState::TornDown {
            return;
        }
        debug!("tearing down from {:?}", self.state);

        unsafe {
            if self.dev.is_some() {
                for &step in destroy_steps() {
                    if let Err(e) = self.apply(step) {
                        warn!("{step:?} during teardown: {e}");
                    }
                }
            }

            if let Some(dev) = self.dev.take() {
                if let Some(sync) = self.sync.take() {
                    sync.destroy(&dev.device);
                }
                if self.command_pool != vk::CommandPool::null() {
                    dev.device.destroy_command_pool(self.command_pool, None);
                    self.command_pool = vk::CommandPool::null();
                }
                dev.destroy();
            }

            if let Some(mut inst) = self.inst.take() {
                if self.surface != vk::SurfaceKHR::null() {
                    inst.destroy_surface(self.surface);
                    self.surface = vk::SurfaceKHR::null();
                }
                inst.destroy();
            }
        }

        self.shaders = None;
        self.state = EngineState::TornDown;
        info!("engine torn down after {} frames", self.driver.frames());
    }
}

impl Drop for GraphicsEngine {
    fn drop(&mut self) {
        self.tear_down();
    }
}

impl Renderer for GraphicsEngine {
    fn resize(&mut self, size: RenderSize) -> Result<()> {
        Ok(self.recreate_swapchain(size)?)
    }

    fn render(&mut self) -> Result<bool> {
        Ok(self.draw_frame()? != FrameOutcome::Skipped)
    }

    fn tear_down(&mut self) {
        GraphicsEngine::tear_down(self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use raw_window_handle::{
        DisplayHandle, HandleError, WindowHandle, XlibDisplayHandle, XlibWindowHandle,
    };

    /// Handles that are never dereferenced: every test below fails before
    /// the surface is created.
    struct DetachedWindow;

    impl HasWindowHandle for DetachedWindow {
        fn window_handle(&self) -> Result<WindowHandle<'_>, HandleError> {
            let raw = RawWindowHandle::Xlib(XlibWindowHandle::new(1));
            // SAFETY: the handle is only carried, never passed to Vulkan.
            Ok(unsafe { WindowHandle::borrow_raw(raw) })
        }
    }

    impl HasDisplayHandle for DetachedWindow {
        fn display_handle(&self) -> Result<DisplayHandle<'_>, HandleError> {
            let raw = RawDisplayHandle::Xlib(XlibDisplayHandle::new(None, 0));
            // SAFETY: as above.
            Ok(unsafe { DisplayHandle::borrow_raw(raw) })
        }
    }

    #[test]
    fn fresh_engine_is_uninitialized() {
        let engine = GraphicsEngine::new(EngineConfig::default());
        assert_eq!(engine.state(), EngineState::Uninitialized);
        assert_eq!(engine.extent(), None);
        assert_eq!(engine.image_count(), 0);
        assert_eq!(engine.frames(), 0);
    }

    #[test]
    fn frame_and_resize_need_running_engine() {
        let mut engine = GraphicsEngine::new(EngineConfig::default());
        assert!(matches!(
            engine.draw_frame(),
            Err(EngineError::InvalidState {
                op: "draw_frame",
                expected: EngineState::Running,
                actual: EngineState::Uninitialized
            })
        ));
        assert!(matches!(
            engine.recreate_swapchain(RenderSize::new(640, 480)),
            Err(EngineError::InvalidState {
                op: "recreate_swapchain",
                ..
            })
        ));
        assert_eq!(engine.state(), EngineState::Uninitialized);
    }

    #[test]
    fn tear_down_is_idempotent() {
        let mut engine = GraphicsEngine::new(EngineConfig::default());
        engine.tear_down();
        assert_eq!(engine.state(), EngineState::TornDown);
        engine.tear_down();
        assert_eq!(engine.state(), EngineState::TornDown);
        assert!(engine.draw_frame().is_err());
    }

    #[test]
    fn renderer_trait_reports_engine_errors() {
        let mut engine = GraphicsEngine::new(EngineConfig::default());
        let err = Renderer::render(&mut engine).unwrap_err();
        assert!(err.downcast_ref::<EngineError>().is_some());
    }

    #[test]
    fn missing_shader_fails_run_and_tears_down() {
        let cfg = EngineConfig {
            vertex_shader: "no/such/dir/triangle.vert.spv".into(),
            ..EngineConfig::default()
        };
        let mut engine = GraphicsEngine::new(cfg);
        let err = engine
            .run(&DetachedWindow, &DetachedWindow, RenderSize::new(1280, 720))
            .unwrap_err();

        assert!(matches!(err, EngineError::ShaderMissing { ref path, .. } if path.ends_with("triangle.vert.spv")));
        assert_eq!(engine.state(), EngineState::TornDown);
        assert_eq!(engine.extent(), None);
        assert!(matches!(
            engine.run(&DetachedWindow, &DetachedWindow, RenderSize::new(1280, 720)),
            Err(EngineError::InvalidState { op: "run", .. })
        ));
    }

    #[test]
    fn run_refuses_empty_surface() {
        let mut engine = GraphicsEngine::new(EngineConfig::default());
        let err = engine
            .run(&DetachedWindow, &DetachedWindow, RenderSize::new(0, 720))
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::EmptySurface {
                width: 0,
                height: 720
            }
        ));
        assert_eq!(engine.state(), EngineState::Uninitialized);
    }

    #[test]
    fn shell_drives_engine_through_renderer_trait() {
        let mut shared: Box<dyn Renderer + Send> = Box::new(GraphicsEngine::new(EngineConfig::default()));
        let err = shared.resize(RenderSize::new(800, 600)).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<EngineError>(),
            Some(EngineError::InvalidState {
                op: "recreate_swapchain",
                ..
            })
        ));
        shared.tear_down();
        shared.tear_down();
    }
}
