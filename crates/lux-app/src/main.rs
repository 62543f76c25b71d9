// SPDX-License-Identifier: CEPL-1.0
use anyhow::Result;
use clap::Parser;
use lux_core::init_tracing;
use lux_platform::render_size;
use lux_render::{RenderThread, Renderer};
use lux_render_vk::{EngineConfig, GraphicsEngine};
use parking_lot::Mutex;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use lux_platform::winit::{
    application::ApplicationHandler,
    dpi::PhysicalSize,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    window::{Window, WindowId},
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Config file; missing or malformed files fall back to defaults
    #[arg(long, default_value = "lux.toml")]
    config: PathBuf,
    /// Force the Khronos validation layer on
    #[arg(long, conflicts_with = "no_validation")]
    validation: bool,
    /// Force the Khronos validation layer off
    #[arg(long)]
    no_validation: bool,
    #[arg(long)]
    app_name: Option<String>,
    #[arg(long)]
    width: Option<u32>,
    #[arg(long)]
    height: Option<u32>,
    /// Render loop cap; 0 leaves pacing to present
    #[arg(long)]
    max_fps: Option<u32>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
struct WindowCfg {
    title: String,
    width: u32,
    height: u32,
    max_fps: u32,
}

impl Default for WindowCfg {
    fn default() -> Self {
        WindowCfg {
            title: "Lux Engine Editor".to_owned(),
            width: 1280,
            height: 720,
            max_fps: 0,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
struct EngineCfg {
    app_name: Option<String>,
    validation: Option<bool>,
    vertex_shader: Option<PathBuf>,
    fragment_shader: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone, Default)]
struct AppCfg {
    #[serde(default)]
    window: WindowCfg,
    #[serde(default)]
    engine: EngineCfg,
}

impl AppCfg {
    fn apply_args(&mut self, args: &Args) {
        if let Some(name) = &args.app_name {
            self.engine.app_name = Some(name.clone());
        }
        if args.validation {
            self.engine.validation = Some(true);
        } else if args.no_validation {
            self.engine.validation = Some(false);
        }
        if let Some(w) = args.width {
            self.window.width = w;
        }
        if let Some(h) = args.height {
            self.window.height = h;
        }
        if let Some(fps) = args.max_fps {
            self.window.max_fps = fps;
        }
    }

    fn engine_config(&self) -> EngineConfig {
        let mut cfg = EngineConfig::default();
        if let Some(name) = &self.engine.app_name {
            cfg.app_name = name.clone();
        }
        if let Some(v) = self.engine.validation {
            cfg.validation = v;
        }
        if let Some(p) = &self.engine.vertex_shader {
            cfg.vertex_shader = p.clone();
        }
        if let Some(p) = &self.engine.fragment_shader {
            cfg.fragment_shader = p.clone();
        }
        cfg
    }
}

fn load_cfg(path: &Path) -> AppCfg {
    match fs::read_to_string(path) {
        Ok(s) => toml::from_str::<AppCfg>(&s).unwrap_or_else(|e| {
            warn!("{} is malformed, using defaults: {e}", path.display());
            AppCfg::default()
        }),
        Err(e) => {
            debug!("no config at {} ({e}), using defaults", path.display());
            AppCfg::default()
        }
    }
}

struct App {
    cfg: AppCfg,
    // Declared before `window`: the surface must go before the window it was made from.
    engine: Option<Arc<Mutex<dyn Renderer + Send>>>,
    worker: Option<RenderThread>,
    window: Option<Window>,
    failure: Option<anyhow::Error>,
    exiting: bool,
}

impl App {
    fn new(cfg: AppCfg) -> Self {
        App {
            cfg,
            engine: None,
            worker: None,
            window: None,
            failure: None,
            exiting: false,
        }
    }

    fn start(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let attrs = Window::default_attributes()
            .with_title(self.cfg.window.title.clone())
            .with_inner_size(PhysicalSize::new(self.cfg.window.width, self.cfg.window.height));
        let window = event_loop.create_window(attrs)?;
        let size = render_size(window.inner_size());

        let mut engine = GraphicsEngine::new(self.cfg.engine_config());
        engine.run(&window, &window, size)?;

        let engine = Arc::new(Mutex::new(engine));
        let worker = RenderThread::spawn(Arc::clone(&engine), self.cfg.window.max_fps)?;
        info!(
            "{} {}x{} running (max_fps={})",
            self.cfg.window.title, size.width, size.height, self.cfg.window.max_fps
        );

        self.window = Some(window);
        self.engine = Some(engine as Arc<Mutex<dyn Renderer + Send>>);
        self.worker = Some(worker);
        Ok(())
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, e: anyhow::Error) {
        error!("{e:#}");
        self.failure.get_or_insert(e);
        self.shutdown(event_loop);
    }

    /// Stops the worker, then releases the engine while the window still exists.
    fn shutdown(&mut self, event_loop: &ActiveEventLoop) {
        if self.exiting {
            return;
        }
        self.exiting = true;

        if let Some(worker) = self.worker.take() {
            match worker.stop() {
                Ok(frames) => info!("render thread stopped after {frames} frames"),
                Err(e) => {
                    error!("render thread: {e:#}");
                    self.failure.get_or_insert(e);
                }
            }
        }
        if let Some(engine) = self.engine.take() {
            engine.lock().tear_down();
        }
        self.window = None;
        event_loop.exit();
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() || self.exiting {
            return;
        }
        if let Err(e) = self.start(event_loop) {
            self.fail(event_loop, e);
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        window_id: WindowId,
        event: WindowEvent,
    ) {
        match &self.window {
            Some(window) if window.id() == window_id => {}
            _ => return,
        }

        match event {
            WindowEvent::CloseRequested => {
                info!("CloseRequested");
                self.shutdown(event_loop);
            }

            WindowEvent::Resized(new_size) => {
                let size = render_size(new_size);
                info!("Resized -> {}x{}", size.width, size.height);
                let res = match &self.engine {
                    Some(engine) => engine.lock().resize(size),
                    None => Ok(()),
                };
                if let Err(e) = res {
                    self.fail(event_loop, e.context("resize"));
                }
            }

            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if self.exiting {
            return;
        }
        if self.worker.as_ref().is_some_and(|w| !w.is_running()) {
            warn!("render thread exited on its own");
            self.shutdown(event_loop);
            return;
        }
        // Frames come from the worker; wake periodically to notice it stopping.
        event_loop.set_control_flow(ControlFlow::WaitUntil(Instant::now() + Duration::from_millis(250)));
    }
}

fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();
    let mut cfg = load_cfg(&args.config);
    cfg.apply_args(&args);

    let event_loop: EventLoop<()> = EventLoop::new()?;
    let mut app = App::new(cfg);
    event_loop.run_app(&mut app)?;

    match app.failure.take() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
