// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use std::ffi::CStr;
use tracing::debug;

use crate::error::{EngineError, EngineResult, VkContext};
use crate::shader::ShaderPair;

/// Single color attachment: cleared on load, stored, handed to present.
pub fn color_attachment(format: vk::Format) -> vk::AttachmentDescription {
    vk::AttachmentDescription {
        format,
        samples: vk::SampleCountFlags::TYPE_1,
        load_op: vk::AttachmentLoadOp::CLEAR,
        store_op: vk::AttachmentStoreOp::STORE,
        stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
        stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
        initial_layout: vk::ImageLayout::UNDEFINED,
        final_layout: vk::ImageLayout::PRESENT_SRC_KHR,
        ..Default::default()
    }
}

/// External -> subpass 0 and back, so the implicit layout transitions at the
/// start and end of the pass do not race with presentation.
pub fn subpass_dependencies() -> [vk::SubpassDependency; 2] {
    let color_rw = vk::AccessFlags::COLOR_ATTACHMENT_READ | vk::AccessFlags::COLOR_ATTACHMENT_WRITE;
    [
        vk::SubpassDependency {
            src_subpass: vk::SUBPASS_EXTERNAL,
            dst_subpass: 0,
            src_stage_mask: vk::PipelineStageFlags::BOTTOM_OF_PIPE,
            src_access_mask: vk::AccessFlags::MEMORY_READ,
            dst_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            dst_access_mask: color_rw,
            dependency_flags: vk::DependencyFlags::BY_REGION,
        },
        vk::SubpassDependency {
            src_subpass: 0,
            dst_subpass: vk::SUBPASS_EXTERNAL,
            src_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            src_access_mask: color_rw,
            dst_stage_mask: vk::PipelineStageFlags::BOTTOM_OF_PIPE,
            dst_access_mask: vk::AccessFlags::MEMORY_READ,
            dependency_flags: vk::DependencyFlags::BY_REGION,
        },
    ]
}

pub unsafe fn create_render_pass(device: &ash::Device, format: vk::Format) -> EngineResult<vk::RenderPass> {
    let attachment = color_attachment(format);
    let color_ref = vk::AttachmentReference {
        attachment: 0,
        layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
    };
    let subpass = vk::SubpassDescription {
        pipeline_bind_point: vk::PipelineBindPoint::GRAPHICS,
        color_attachment_count: 1,
        p_color_attachments: &color_ref,
        ..Default::default()
    };
    let dependencies = subpass_dependencies();

    let rp_info = vk::RenderPassCreateInfo {
        s_type: vk::StructureType::RENDER_PASS_CREATE_INFO,
        attachment_count: 1,
        p_attachments: &attachment,
        subpass_count: 1,
        p_subpasses: &subpass,
        dependency_count: dependencies.len() as u32,
        p_dependencies: dependencies.as_ptr(),
        ..Default::default()
    };
    device
        .create_render_pass(&rp_info, None)
        .vk_op("vkCreateRenderPass")
}

pub struct PipelineBundle {
    pub layout: vk::PipelineLayout,
    pub pipeline: vk::Pipeline,
}

impl PipelineBundle {
    pub unsafe fn destroy(&self, device: &ash::Device) {
        device.destroy_pipeline(self.pipeline, None);
        device.destroy_pipeline_layout(self.layout, None);
    }
}

pub const SHADER_ENTRY: &CStr = c"main";

pub fn shader_stages(vs: vk::ShaderModule, fs: vk::ShaderModule) -> [vk::PipelineShaderStageCreateInfo<'static>; 2] {
    [
        vk::PipelineShaderStageCreateInfo {
            s_type: vk::StructureType::PIPELINE_SHADER_STAGE_CREATE_INFO,
            stage: vk::ShaderStageFlags::VERTEX,
            module: vs,
            p_name: SHADER_ENTRY.as_ptr(),
            ..Default::default()
        },
        vk::PipelineShaderStageCreateInfo {
            s_type: vk::StructureType::PIPELINE_SHADER_STAGE_CREATE_INFO,
            stage: vk::ShaderStageFlags::FRAGMENT,
            module: fs,
            p_name: SHADER_ENTRY.as_ptr(),
            ..Default::default()
        },
    ]
}

/// Geometry is generated in the vertex shader: no bindings, no attributes.
pub fn vertex_input_state() -> vk::PipelineVertexInputStateCreateInfo<'static> {
    vk::PipelineVertexInputStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_VERTEX_INPUT_STATE_CREATE_INFO,
        ..Default::default()
    }
}

pub fn input_assembly_state() -> vk::PipelineInputAssemblyStateCreateInfo<'static> {
    vk::PipelineInputAssemblyStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_INPUT_ASSEMBLY_STATE_CREATE_INFO,
        topology: vk::PrimitiveTopology::TRIANGLE_LIST,
        primitive_restart_enable: vk::FALSE,
        ..Default::default()
    }
}

pub fn raster_state() -> vk::PipelineRasterizationStateCreateInfo<'static> {
    vk::PipelineRasterizationStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_RASTERIZATION_STATE_CREATE_INFO,
        depth_clamp_enable: vk::FALSE,
        rasterizer_discard_enable: vk::FALSE,
        polygon_mode: vk::PolygonMode::FILL,
        cull_mode: vk::CullModeFlags::BACK,
        front_face: vk::FrontFace::CLOCKWISE,
        depth_bias_enable: vk::FALSE,
        line_width: 1.0,
        ..Default::default()
    }
}

pub fn multisample_state() -> vk::PipelineMultisampleStateCreateInfo<'static> {
    vk::PipelineMultisampleStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_MULTISAMPLE_STATE_CREATE_INFO,
        rasterization_samples: vk::SampleCountFlags::TYPE_1,
        sample_shading_enable: vk::FALSE,
        min_sample_shading: 1.0,
        ..Default::default()
    }
}

/// Alpha-over factors are filled in but blending stays off: pass-through.
pub fn blend_attachment() -> vk::PipelineColorBlendAttachmentState {
    vk::PipelineColorBlendAttachmentState {
        blend_enable: vk::FALSE,
        src_color_blend_factor: vk::BlendFactor::SRC_ALPHA,
        dst_color_blend_factor: vk::BlendFactor::ONE_MINUS_SRC_ALPHA,
        color_blend_op: vk::BlendOp::ADD,
        src_alpha_blend_factor: vk::BlendFactor::ONE,
        dst_alpha_blend_factor: vk::BlendFactor::ZERO,
        alpha_blend_op: vk::BlendOp::ADD,
        color_write_mask: vk::ColorComponentFlags::R
            | vk::ColorComponentFlags::G
            | vk::ColorComponentFlags::B
            | vk::ColorComponentFlags::A,
    }
}

/// Fixed-function triangle pipeline. Viewport and scissor are baked in, so any
/// extent change means a rebuild.
pub unsafe fn create_pipeline(
    device: &ash::Device,
    render_pass: vk::RenderPass,
    extent: vk::Extent2D,
    shaders: &ShaderPair,
) -> EngineResult<PipelineBundle> {
    let vs = shaders.vertex.create_module(device)?;
    let fs = match shaders.fragment.create_module(device) {
        Ok(fs) => fs,
        Err(e) => {
            device.destroy_shader_module(vs, None);
            return Err(e);
        }
    };

    let result = build_pipeline(device, render_pass, extent, vs, fs);

    device.destroy_shader_module(vs, None);
    device.destroy_shader_module(fs, None);
    result
}

unsafe fn build_pipeline(
    device: &ash::Device,
    render_pass: vk::RenderPass,
    extent: vk::Extent2D,
    vs: vk::ShaderModule,
    fs: vk::ShaderModule,
) -> EngineResult<PipelineBundle> {
    let stages = shader_stages(vs, fs);
    let vertex_input = vertex_input_state();
    let input_assembly = input_assembly_state();

    let viewport = vk::Viewport {
        x: 0.0,
        y: 0.0,
        width: extent.width as f32,
        height: extent.height as f32,
        min_depth: 0.0,
        max_depth: 1.0,
    };
    let scissor = vk::Rect2D {
        offset: vk::Offset2D { x: 0, y: 0 },
        extent,
    };
    let viewport_state = vk::PipelineViewportStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_VIEWPORT_STATE_CREATE_INFO,
        viewport_count: 1,
        p_viewports: &viewport,
        scissor_count: 1,
        p_scissors: &scissor,
        ..Default::default()
    };

    let raster = raster_state();
    let multisample = multisample_state();
    let color_blend_att = blend_attachment();
    let color_blend = vk::PipelineColorBlendStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_COLOR_BLEND_STATE_CREATE_INFO,
        logic_op_enable: vk::FALSE,
        logic_op: vk::LogicOp::COPY,
        attachment_count: 1,
        p_attachments: &color_blend_att,
        ..Default::default()
    };

    let layout_info = vk::PipelineLayoutCreateInfo {
        s_type: vk::StructureType::PIPELINE_LAYOUT_CREATE_INFO,
        ..Default::default()
    };
    let layout = device
        .create_pipeline_layout(&layout_info, None)
        .vk_op("vkCreatePipelineLayout")?;

    let pipeline_info = vk::GraphicsPipelineCreateInfo {
        s_type: vk::StructureType::GRAPHICS_PIPELINE_CREATE_INFO,
        stage_count: stages.len() as u32,
        p_stages: stages.as_ptr(),
        p_vertex_input_state: &vertex_input,
        p_input_assembly_state: &input_assembly,
        p_viewport_state: &viewport_state,
        p_rasterization_state: &raster,
        p_multisample_state: &multisample,
        p_color_blend_state: &color_blend,
        layout,
        render_pass,
        subpass: 0,
        base_pipeline_index: -1,
        ..Default::default()
    };

    let pipelines = match device.create_graphics_pipelines(
        vk::PipelineCache::null(),
        std::slice::from_ref(&pipeline_info),
        None,
    ) {
        Ok(p) => p,
        Err((_, result)) => {
            device.destroy_pipeline_layout(layout, None);
            return Err(EngineError::Vulkan {
                op: "vkCreateGraphicsPipelines",
                result,
            });
        }
    };
    debug!("graphics pipeline built for {}x{}", extent.width, extent.height);

    Ok(PipelineBundle {
        layout,
        pipeline: pipelines[0],
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attachment_clears_and_presents() {
        let a = color_attachment(vk::Format::B8G8R8A8_UNORM);
        assert_eq!(a.format, vk::Format::B8G8R8A8_UNORM);
        assert_eq!(a.samples, vk::SampleCountFlags::TYPE_1);
        assert_eq!(a.load_op, vk::AttachmentLoadOp::CLEAR);
        assert_eq!(a.store_op, vk::AttachmentStoreOp::STORE);
        assert_eq!(a.stencil_load_op, vk::AttachmentLoadOp::DONT_CARE);
        assert_eq!(a.stencil_store_op, vk::AttachmentStoreOp::DONT_CARE);
        assert_eq!(a.initial_layout, vk::ImageLayout::UNDEFINED);
        assert_eq!(a.final_layout, vk::ImageLayout::PRESENT_SRC_KHR);
    }

    #[test]
    fn dependencies_bridge_external_both_ways() {
        let [into, out_of] = subpass_dependencies();
        let color_rw = vk::AccessFlags::COLOR_ATTACHMENT_READ | vk::AccessFlags::COLOR_ATTACHMENT_WRITE;

        assert_eq!((into.src_subpass, into.dst_subpass), (vk::SUBPASS_EXTERNAL, 0));
        assert_eq!(into.dst_access_mask, color_rw);
        assert_eq!(into.dst_stage_mask, vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT);

        assert_eq!((out_of.src_subpass, out_of.dst_subpass), (0, vk::SUBPASS_EXTERNAL));
        assert_eq!(out_of.src_access_mask, color_rw);
        assert_eq!(out_of.dst_stage_mask, vk::PipelineStageFlags::BOTTOM_OF_PIPE);
    }

    #[test]
    fn fixed_function_state_draws_plain_triangles() {
        let vi = vertex_input_state();
        assert_eq!(vi.vertex_binding_description_count, 0);
        assert_eq!(vi.vertex_attribute_description_count, 0);

        let ia = input_assembly_state();
        assert_eq!(ia.topology, vk::PrimitiveTopology::TRIANGLE_LIST);
        assert_eq!(ia.primitive_restart_enable, vk::FALSE);

        let rs = raster_state();
        assert_eq!(rs.polygon_mode, vk::PolygonMode::FILL);
        assert_eq!(rs.cull_mode, vk::CullModeFlags::BACK);
        assert_eq!(rs.front_face, vk::FrontFace::CLOCKWISE);
        assert_eq!(rs.depth_bias_enable, vk::FALSE);
        assert_eq!(rs.line_width, 1.0);

        let ms = multisample_state();
        assert_eq!(ms.rasterization_samples, vk::SampleCountFlags::TYPE_1);
        assert_eq!(ms.sample_shading_enable, vk::FALSE);
    }

    #[test]
    fn blending_is_off_and_writes_all_channels() {
        let b = blend_attachment();
        assert_eq!(b.blend_enable, vk::FALSE);
        assert_eq!(
            b.color_write_mask,
            vk::ColorComponentFlags::R
                | vk::ColorComponentFlags::G
                | vk::ColorComponentFlags::B
                | vk::ColorComponentFlags::A
        );
    }

    #[test]
    fn both_stages_enter_at_main() {
        let [vs, fs] = shader_stages(vk::ShaderModule::null(), vk::ShaderModule::null());
        assert_eq!(vs.stage, vk::ShaderStageFlags::VERTEX);
        assert_eq!(fs.stage, vk::ShaderStageFlags::FRAGMENT);
        for stage in [vs, fs] {
            // SAFETY: p_name points at the 'static SHADER_ENTRY literal.
            let name = unsafe { CStr::from_ptr(stage.p_name) };
            assert_eq!(name, c"main");
        }
    }
}
