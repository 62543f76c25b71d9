// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use tracing::{trace, warn};

use crate::device::DeviceContext;
use crate::error::{EngineError, EngineResult, VkContext};

/// Result of asking the swapchain for its next image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Acquired {
    Image { index: u32, suboptimal: bool },
    /// The swapchain no longer matches the surface; nothing was signalled.
    Stale,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Presented {
    Done,
    Suboptimal,
    Stale,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameOutcome {
    Presented { image_index: u32 },
    /// Presented, but the surface would prefer a rebuilt swapchain.
    Suboptimal { image_index: u32 },
    /// Swapchain must be recreated before the next frame.
    Stale,
    /// Window has no area; nothing was drawn.
    Skipped,
}

/// The three per-frame actions. Implementations own the semaphore pair:
/// `acquire` signals "image available", `submit` waits on it and signals
/// "render finished", `present` waits on that.
pub trait FrameTarget {
    fn acquire(&mut self) -> EngineResult<Acquired>;
    fn submit(&mut self, image_index: u32) -> EngineResult<()>;
    fn present(&mut self, image_index: u32) -> EngineResult<Presented>;
}

/// Acquire -> submit -> present, once per tick.
#[derive(Debug, Default)]
pub struct FrameDriver {
    frames: u64,
}

impl FrameDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tick<T: FrameTarget + ?Sized>(&mut self, target: &mut T) -> EngineResult<FrameOutcome> {
        let (image_index, acquire_suboptimal) = match target.acquire()? {
            Acquired::Image { index, suboptimal } => (index, suboptimal),
            Acquired::Stale => return Ok(FrameOutcome::Stale),
        };

        target.submit(image_index)?;

        let outcome = match target.present(image_index)? {
            Presented::Done if !acquire_suboptimal => FrameOutcome::Presented { image_index },
            Presented::Done | Presented::Suboptimal => FrameOutcome::Suboptimal { image_index },
            Presented::Stale => FrameOutcome::Stale,
        };
        self.frames += 1;
        trace!("frame {} -> {:?}", self.frames, outcome);
        Ok(outcome)
    }

    /// Frames that reached present.
    pub fn frames(&self) -> u64 {
        self.frames
    }
}

/// The single semaphore pair reused every frame.
pub struct FrameSync {
    pub image_available: vk::Semaphore,
    pub render_finished: vk::Semaphore,
}

impl FrameSync {
    pub unsafe fn create(device: &ash::Device) -> EngineResult<Self> {
        let ci = vk::SemaphoreCreateInfo::default();
        let image_available = device
            .create_semaphore(&ci, None)
            .vk_op("vkCreateSemaphore")?;
        let render_finished = match device.create_semaphore(&ci, None) {
            Ok(s) => s,
            Err(result) => {
                device.destroy_semaphore(image_available, None);
                return Err(EngineError::Vulkan {
                    op: "vkCreateSemaphore",
                    result,
                });
            }
        };
        Ok(Self {
            image_available,
            render_finished,
        })
    }

    pub unsafe fn destroy(&self, device: &ash::Device) {
        device.destroy_semaphore(self.render_finished, None);
        device.destroy_semaphore(self.image_available, None);
    }
}

/// Live Vulkan objects for one tick.
pub struct VkFrame<'a> {
    pub dev: &'a DeviceContext,
    pub swapchain: vk::SwapchainKHR,
    pub command_buffers: &'a [vk::CommandBuffer],
    pub sync: &'a FrameSync,
}

impl FrameTarget for VkFrame<'_> {
    fn acquire(&mut self) -> EngineResult<Acquired> {
        let res = unsafe {
            self.dev.swapchain_loader.acquire_next_image(
                self.swapchain,
                u64::MAX,
                self.sync.image_available,
                vk::Fence::null(),
            )
        };
        match res {
            Ok((index, suboptimal)) => Ok(Acquired::Image { index, suboptimal }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(Acquired::Stale),
            Err(result) => Err(EngineError::Vulkan {
                op: "vkAcquireNextImageKHR",
                result,
            }),
        }
    }

    fn submit(&mut self, image_index: u32) -> EngineResult<()> {
        let cmd = self
            .command_buffers
            .get(image_index as usize)
            .ok_or(EngineError::SwapchainStale)?;

        let wait_stage = vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT;
        let submit = vk::SubmitInfo {
            s_type: vk::StructureType::SUBMIT_INFO,
            wait_semaphore_count: 1,
            p_wait_semaphores: &self.sync.image_available,
            p_wait_dst_stage_mask: &wait_stage,
            command_buffer_count: 1,
            p_command_buffers: cmd,
            signal_semaphore_count: 1,
            p_signal_semaphores: &self.sync.render_finished,
            ..Default::default()
        };
        unsafe {
            self.dev
                .device
                .queue_submit(self.dev.graphics_queue, std::slice::from_ref(&submit), vk::Fence::null())
                .vk_op("vkQueueSubmit")
        }
    }

    fn present(&mut self, image_index: u32) -> EngineResult<Presented> {
        let present = vk::PresentInfoKHR {
            s_type: vk::StructureType::PRESENT_INFO_KHR,
            wait_semaphore_count: 1,
            p_wait_semaphores: &self.sync.render_finished,
            swapchain_count: 1,
            p_swapchains: &self.swapchain,
            p_image_indices: &image_index,
            ..Default::default()
        };
        let res = unsafe {
            self.dev
                .swapchain_loader
                .queue_present(self.dev.present_queue, &present)
        };
        let presented = match res {
            Ok(false) => Presented::Done,
            Ok(true) => {
                warn!("present reported a suboptimal swapchain");
                Presented::Suboptimal
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => return Ok(Presented::Stale),
            Err(result) => {
                return Err(EngineError::Vulkan {
                    op: "vkQueuePresentKHR",
                    result,
                })
            }
        };

        // One frame in flight: the semaphore pair is reused next tick.
        unsafe {
            self.dev
                .device
                .queue_wait_idle(self.dev.present_queue)
                .vk_op("vkQueueWaitIdle")?;
        }
        Ok(presented)
    }
}
