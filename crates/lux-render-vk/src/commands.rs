// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use tracing::debug;

use crate::error::{EngineError, EngineResult, VkContext};

pub const CLEAR_COLOR: [f32; 4] = [0.0, 0.0, 0.0, 1.0];
pub const TRIANGLE_VERTICES: u32 = 3;

/// Arguments of the single non-indexed draw.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DrawCall {
    pub vertex_count: u32,
    pub instance_count: u32,
    pub first_vertex: u32,
    pub first_instance: u32,
}

pub const TRIANGLE_DRAW: DrawCall = DrawCall {
    vertex_count: TRIANGLE_VERTICES,
    instance_count: 1,
    first_vertex: 0,
    first_instance: 0,
};

/// Buffers are recorded once and may be pending while resubmitted.
pub fn begin_info() -> vk::CommandBufferBeginInfo<'static> {
    vk::CommandBufferBeginInfo {
        s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
        flags: vk::CommandBufferUsageFlags::SIMULTANEOUS_USE,
        ..Default::default()
    }
}

pub fn clear_value() -> vk::ClearValue {
    vk::ClearValue {
        color: vk::ClearColorValue {
            float32: CLEAR_COLOR,
        },
    }
}

/// One framebuffer per image view, swapchain-sized, one layer.
pub unsafe fn create_framebuffers(
    device: &ash::Device,
    render_pass: vk::RenderPass,
    views: &[vk::ImageView],
    extent: vk::Extent2D,
) -> EngineResult<Vec<vk::Framebuffer>> {
    let mut framebuffers = Vec::with_capacity(views.len());
    for view in views {
        let fb_info = vk::FramebufferCreateInfo {
            s_type: vk::StructureType::FRAMEBUFFER_CREATE_INFO,
            render_pass,
            attachment_count: 1,
            p_attachments: view,
            width: extent.width,
            height: extent.height,
            layers: 1,
            ..Default::default()
        };
        match device.create_framebuffer(&fb_info, None) {
            Ok(fb) => framebuffers.push(fb),
            Err(result) => {
                destroy_framebuffers(device, &framebuffers);
                return Err(EngineError::Vulkan {
                    op: "vkCreateFramebuffer",
                    result,
                });
            }
        }
    }
    Ok(framebuffers)
}

pub unsafe fn destroy_framebuffers(device: &ash::Device, framebuffers: &[vk::Framebuffer]) {
    for &fb in framebuffers {
        device.destroy_framebuffer(fb, None);
    }
}

/// Pool on the graphics family. Buffers are freed and reallocated, never reset.
pub unsafe fn create_command_pool(device: &ash::Device, graphics_family: u32) -> EngineResult<vk::CommandPool> {
    let pool_info = vk::CommandPoolCreateInfo {
        s_type: vk::StructureType::COMMAND_POOL_CREATE_INFO,
        queue_family_index: graphics_family,
        ..Default::default()
    };
    device
        .create_command_pool(&pool_info, None)
        .vk_op("vkCreateCommandPool")
}

pub unsafe fn allocate_command_buffers(
    device: &ash::Device,
    pool: vk::CommandPool,
    count: usize,
) -> EngineResult<Vec<vk::CommandBuffer>> {
    let alloc_info = vk::CommandBufferAllocateInfo {
        s_type: vk::StructureType::COMMAND_BUFFER_ALLOCATE_INFO,
        command_pool: pool,
        level: vk::CommandBufferLevel::PRIMARY,
        command_buffer_count: count as u32,
        ..Default::default()
    };
    device
        .allocate_command_buffers(&alloc_info)
        .vk_op("vkAllocateCommandBuffers")
}

pub unsafe fn free_command_buffers(device: &ash::Device, pool: vk::CommandPool, bufs: &[vk::CommandBuffer]) {
    if !bufs.is_empty() {
        device.free_command_buffers(pool, bufs);
    }
}

/// Records the same pass into every buffer; only the framebuffer differs.
pub unsafe fn record_draw_commands(
    device: &ash::Device,
    bufs: &[vk::CommandBuffer],
    framebuffers: &[vk::Framebuffer],
    render_pass: vk::RenderPass,
    pipeline: vk::Pipeline,
    extent: vk::Extent2D,
) -> EngineResult<()> {
    let clears = [clear_value()];
    for (&cmd, &framebuffer) in bufs.iter().zip(framebuffers) {
        let begin = begin_info();
        device
            .begin_command_buffer(cmd, &begin)
            .vk_op("vkBeginCommandBuffer")?;

        let rp_begin = vk::RenderPassBeginInfo {
            s_type: vk::StructureType::RENDER_PASS_BEGIN_INFO,
            render_pass,
            framebuffer,
            render_area: vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent,
            },
            clear_value_count: clears.len() as u32,
            p_clear_values: clears.as_ptr(),
            ..Default::default()
        };

        device.cmd_begin_render_pass(cmd, &rp_begin, vk::SubpassContents::INLINE);
        device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, pipeline);
        let draw = TRIANGLE_DRAW;
        device.cmd_draw(
            cmd,
            draw.vertex_count,
            draw.instance_count,
            draw.first_vertex,
            draw.first_instance,
        );
        device.cmd_end_render_pass(cmd);

        device.end_command_buffer(cmd).vk_op("vkEndCommandBuffer")?;
    }
    debug!("recorded {} command buffers", bufs.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clears_to_opaque_black() {
        let v = clear_value();
        // SAFETY: written through the float32 member just above.
        let rgba = unsafe { v.color.float32 };
        assert_eq!(rgba, [0.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn one_triangle_one_instance() {
        assert_eq!(
            TRIANGLE_DRAW,
            DrawCall {
                vertex_count: 3,
                instance_count: 1,
                first_vertex: 0,
                first_instance: 0
            }
        );
    }

    #[test]
    fn buffers_allow_resubmission_while_pending() {
        let info = begin_info();
        assert_eq!(info.flags, vk::CommandBufferUsageFlags::SIMULTANEOUS_USE);
        assert!(info.p_inheritance_info.is_null());
    }
}
