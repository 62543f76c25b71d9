// SPDX-License-Identifier: CEPL-1.0
use anyhow::{anyhow, Context, Result};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{error, info};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RenderSize {
    pub width: u32,
    pub height: u32,
}

impl RenderSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// A minimised window reports a zero dimension; nothing can be presented then.
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// How long the worker sleeps after a call that drew nothing (minimised window).
pub const IDLE_WAIT: Duration = Duration::from_millis(10);

pub trait Renderer {
    fn resize(&mut self, size: RenderSize) -> Result<()>;
    /// Draws one frame. `Ok(false)` means there was nothing to draw.
    fn render(&mut self) -> Result<bool>;
    fn tear_down(&mut self);
}

/// Dedicated render worker. Each iteration locks the shared renderer, draws one
/// frame and re-checks the running flag. Structural changes (resize, teardown)
/// from other threads go through the same mutex, so they never overlap a frame.
pub struct RenderThread {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<Result<u64>>>,
}

impl RenderThread {
    /// `max_fps == 0` leaves the loop uncapped (present pacing only).
    pub fn spawn<R>(renderer: Arc<Mutex<R>>, max_fps: u32) -> Result<Self>
    where
        R: Renderer + Send + 'static,
    {
        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);
        let frame_dt = (max_fps > 0).then(|| Duration::from_nanos(1_000_000_000 / max_fps as u64));

        let handle = thread::Builder::new()
            .name("lux-render".into())
            .spawn(move || {
                let mut frames = 0u64;
                while flag.load(Ordering::Acquire) {
                    let start = Instant::now();
                    let res = renderer.lock().render();
                    match res {
                        Ok(true) => frames += 1,
                        Ok(false) => {
                            thread::sleep(IDLE_WAIT);
                            continue;
                        }
                        Err(e) => {
                            error!("render loop stopped: {e:#}");
                            flag.store(false, Ordering::Release);
                            return Err(e);
                        }
                    }

                    match frame_dt {
                        Some(dt) => {
                            let spent = start.elapsed();
                            if spent < dt {
                                thread::sleep(dt - spent);
                            }
                        }
                        None => thread::yield_now(),
                    }
                }
                Ok(frames)
            })
            .context("spawn render thread")?;

        info!("render thread started (max_fps={max_fps})");
        Ok(Self {
            running,
            handle: Some(handle),
        })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Flips the running flag and joins. Returns the number of frames drawn,
    /// or the error that ended the loop early.
    pub fn stop(mut self) -> Result<u64> {
        self.running.store(false, Ordering::Release);
        let handle = self
            .handle
            .take()
            .ok_or_else(|| anyhow!("render thread already joined"))?;
        let frames = handle
            .join()
            .map_err(|_| anyhow!("render thread panicked"))??;
        info!("render thread stopped after {frames} frames");
        Ok(frames)
    }
}

impl Drop for RenderThread {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
