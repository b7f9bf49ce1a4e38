//! Graphics pipeline creation for dynamic rendering.
//!
//! Pipelines are described by a plain [`GraphicsPipelineDesc`] and built in
//! one call through a shared in-memory [`PipelineCache`]. Viewport and
//! scissor are always dynamic.

use ash::vk;

use super::VulkanContext;
use crate::error::{RenderError, Result, VkResultExt};

const ENTRY_POINT: &std::ffi::CStr = c"main";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DepthState {
    pub test: bool,
    pub write: bool,
    pub compare: vk::CompareOp,
}

impl DepthState {
    pub const DISABLED: Self = Self {
        test: false,
        write: false,
        compare: vk::CompareOp::ALWAYS,
    };

    /// Depth prepass and shadow maps.
    pub const WRITE_LESS: Self = Self {
        test: true,
        write: true,
        compare: vk::CompareOp::LESS,
    };

    /// G-buffer pass over a prepassed depth buffer.
    pub const EQUAL_NO_WRITE: Self = Self {
        test: true,
        write: false,
        compare: vk::CompareOp::EQUAL,
    };
}

/// Constant factor and slope factor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DepthBias {
    pub constant: f32,
    pub slope: f32,
}

/// Everything baked into one graphics pipeline.
#[derive(Debug, Clone, Copy)]
pub struct GraphicsPipelineDesc<'a> {
    pub name: &'a str,
    pub vertex: vk::ShaderModule,
    pub fragment: vk::ShaderModule,
    pub layout: vk::PipelineLayout,
    pub vertex_bindings: &'a [vk::VertexInputBindingDescription],
    pub vertex_attributes: &'a [vk::VertexInputAttributeDescription],
    pub color_formats: &'a [vk::Format],
    /// `UNDEFINED` when there is no depth attachment.
    pub depth_format: vk::Format,
    pub depth: DepthState,
    pub cull_mode: vk::CullModeFlags,
    pub front_face: vk::FrontFace,
    pub depth_bias: Option<DepthBias>,
}

impl<'a> GraphicsPipelineDesc<'a> {
    /// Full-screen triangle generated in the vertex shader; no vertex
    /// input, no depth.
    pub fn fullscreen(
        name: &'a str,
        vertex: vk::ShaderModule,
        fragment: vk::ShaderModule,
        layout: vk::PipelineLayout,
        color_formats: &'a [vk::Format],
    ) -> Self {
        Self {
            name,
            vertex,
            fragment,
            layout,
            vertex_bindings: &[],
            vertex_attributes: &[],
            color_formats,
            depth_format: vk::Format::UNDEFINED,
            depth: DepthState::DISABLED,
            cull_mode: vk::CullModeFlags::NONE,
            front_face: vk::FrontFace::COUNTER_CLOCKWISE,
            depth_bias: None,
        }
    }
}

/// In-memory pipeline cache shared by every pipeline the renderer builds.
pub struct PipelineCache {
    handle: vk::PipelineCache,
}

impl PipelineCache {
    pub unsafe fn new(ctx: &VulkanContext) -> Result<Self> {
        let handle = ctx
            .device
            .create_pipeline_cache(&vk::PipelineCacheCreateInfo::default(), None)
            .vk("create pipeline cache")?;
        Ok(Self { handle })
    }

    /// Build one pipeline from `desc`.
    pub unsafe fn create_graphics(&self, ctx: &VulkanContext, desc: &GraphicsPipelineDesc) -> Result<vk::Pipeline> {
        let shader_stages = [
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::VERTEX)
                .module(desc.vertex)
                .name(ENTRY_POINT),
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::FRAGMENT)
                .module(desc.fragment)
                .name(ENTRY_POINT),
        ];

        let vertex_input = vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(desc.vertex_bindings)
            .vertex_attribute_descriptions(desc.vertex_attributes);

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
            .primitive_restart_enable(false);

        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state = vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

        let viewport_state = vk::PipelineViewportStateCreateInfo::default()
            .viewport_count(1)
            .scissor_count(1);

        let bias = desc.depth_bias.unwrap_or(DepthBias {
            constant: 0.0,
            slope: 0.0,
        });
        let rasterizer = vk::PipelineRasterizationStateCreateInfo::default()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(vk::PolygonMode::FILL)
            .line_width(1.0)
            .cull_mode(desc.cull_mode)
            .front_face(desc.front_face)
            .depth_bias_enable(desc.depth_bias.is_some())
            .depth_bias_constant_factor(bias.constant)
            .depth_bias_slope_factor(bias.slope);

        let multisampling = vk::PipelineMultisampleStateCreateInfo::default()
            .sample_shading_enable(false)
            .rasterization_samples(vk::SampleCountFlags::TYPE_1);

        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::default()
            .depth_test_enable(desc.depth.test)
            .depth_write_enable(desc.depth.write)
            .depth_compare_op(desc.depth.compare)
            .depth_bounds_test_enable(false)
            .stencil_test_enable(false);

        let color_blend_attachments: Vec<_> = desc
            .color_formats
            .iter()
            .map(|_| {
                vk::PipelineColorBlendAttachmentState::default()
                    .color_write_mask(vk::ColorComponentFlags::RGBA)
                    .blend_enable(false)
            })
            .collect();
        let color_blending = vk::PipelineColorBlendStateCreateInfo::default()
            .logic_op_enable(false)
            .attachments(&color_blend_attachments);

        let mut rendering_info = vk::PipelineRenderingCreateInfo::default()
            .color_attachment_formats(desc.color_formats)
            .depth_attachment_format(desc.depth_format);

        let pipeline_info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&shader_stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterizer)
            .multisample_state(&multisampling)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&color_blending)
            .dynamic_state(&dynamic_state)
            .layout(desc.layout)
            .push_next(&mut rendering_info);

        let pipelines = ctx
            .device
            .create_graphics_pipelines(self.handle, &[pipeline_info], None)
            .map_err(|(_, result)| RenderError::Vulkan {
                what: "create graphics pipeline",
                result,
            })?;

        let pipeline = pipelines[0];
        ctx.debug.name_object(pipeline, desc.name);
        log::debug!("pipeline {} created", desc.name);
        Ok(pipeline)
    }

    pub unsafe fn destroy(&mut self, device: &ash::Device) {
        device.destroy_pipeline_cache(self.handle, None);
        self.handle = vk::PipelineCache::null();
    }
}

/// Viewport covering `extent`, for the dynamic viewport state.
pub fn full_viewport(extent: vk::Extent2D) -> vk::Viewport {
    vk::Viewport {
        x: 0.0,
        y: 0.0,
        width: extent.width as f32,
        height: extent.height as f32,
        min_depth: 0.0,
        max_depth: 1.0,
    }
}

pub fn full_scissor(extent: vk::Extent2D) -> vk::Rect2D {
    vk::Rect2D {
        offset: vk::Offset2D { x: 0, y: 0 },
        extent,
    }
}

/// Set the dynamic viewport and scissor to `extent`.
pub unsafe fn set_viewport(device: &ash::Device, cmd: vk::CommandBuffer, extent: vk::Extent2D) {
    device.cmd_set_viewport(cmd, 0, &[full_viewport(extent)]);
    device.cmd_set_scissor(cmd, 0, &[full_scissor(extent)]);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fullscreen_desc() {
        let formats = [vk::Format::R32G32B32A32_SFLOAT];
        let desc = GraphicsPipelineDesc::fullscreen(
            "Lighting",
            vk::ShaderModule::null(),
            vk::ShaderModule::null(),
            vk::PipelineLayout::null(),
            &formats,
        );
        assert!(desc.vertex_bindings.is_empty());
        assert_eq!(desc.depth, DepthState::DISABLED);
        assert_eq!(desc.depth_format, vk::Format::UNDEFINED);
        assert!(desc.depth_bias.is_none());
    }

    #[test]
    fn test_viewport_matches_extent() {
        let extent = vk::Extent2D { width: 1280, height: 720 };
        let viewport = full_viewport(extent);
        assert_eq!((viewport.width, viewport.height), (1280.0, 720.0));
        assert_eq!(viewport.max_depth, 1.0);
        assert_eq!(full_scissor(extent).extent.width, 1280);
    }
}
