//! Pipelines and draw recording of the depth prepass, G-buffer and
//! lighting passes. Barriers between them belong to the renderer.

use ash::vk;

use super::gbuffer::GBuffer;
use super::pingpong::HDR_FORMAT;
use crate::config::RendererConfig;
use crate::error::Result;
use crate::scene::{Mesh, TextureIndices, Vertex};
use crate::vulkan::descriptors::create_pipeline_layout;
use crate::vulkan::pipeline::{set_viewport, DepthState};
use crate::vulkan::rendering::{begin_rendering, color_attachment, depth_attachment};
use crate::vulkan::shader::ShaderModules;
use crate::vulkan::{GraphicsPipelineDesc, PipelineCache, VulkanContext};

const GBUFFER_CLEAR: [f32; 4] = [0.0, 0.0, 0.0, 0.0];
const HDR_CLEAR: [f32; 4] = [0.0, 0.0, 0.0, 1.0];

pub struct ScenePipelines {
    /// Sets 0 and 1, texture indices pushed to the fragment stage.
    geometry_layout: vk::PipelineLayout,
    /// Sets 0, 1 and 2.
    lighting_layout: vk::PipelineLayout,
    depth_prepass: vk::Pipeline,
    gbuffer: vk::Pipeline,
    lighting: vk::Pipeline,
}

impl ScenePipelines {
    pub unsafe fn new(
        ctx: &VulkanContext,
        cache: &PipelineCache,
        set_layouts: &[vk::DescriptorSetLayout; 3],
        config: &RendererConfig,
    ) -> Result<Self> {
        let paths = [
            config.shader_path("geometry.vert"),
            config.shader_path("depth_prepass.frag"),
            config.shader_path("gbuffer.frag"),
            config.shader_path("quad.vert"),
            config.shader_path("lighting.frag"),
        ];
        let path_refs: Vec<&std::path::Path> = paths.iter().map(|p| p.as_path()).collect();
        let modules = ShaderModules::load(ctx, &path_refs)?;
        let [geometry_vs, prepass_fs, gbuffer_fs, quad_vs, lighting_fs] =
            [modules.0[0], modules.0[1], modules.0[2], modules.0[3], modules.0[4]];

        let texture_push = [vk::PushConstantRange {
            stage_flags: vk::ShaderStageFlags::FRAGMENT,
            offset: 0,
            size: std::mem::size_of::<TextureIndices>() as u32,
        }];

        let mut pipelines = Self {
            geometry_layout: vk::PipelineLayout::null(),
            lighting_layout: vk::PipelineLayout::null(),
            depth_prepass: vk::Pipeline::null(),
            gbuffer: vk::Pipeline::null(),
            lighting: vk::Pipeline::null(),
        };

        let bindings = Vertex::binding_descriptions();
        let attributes = Vertex::attribute_descriptions();
        let gbuffer_formats = GBuffer::color_formats();
        let hdr_formats = [HDR_FORMAT];

        let built = (|| -> Result<()> {
            pipelines.geometry_layout = create_pipeline_layout(&ctx.device, &set_layouts[..2], &texture_push)?;
            pipelines.lighting_layout = create_pipeline_layout(&ctx.device, set_layouts, &[])?;

            let prepass_desc = GraphicsPipelineDesc {
                name: "DepthPrepass",
                vertex: geometry_vs,
                fragment: prepass_fs,
                layout: pipelines.geometry_layout,
                vertex_bindings: &bindings,
                vertex_attributes: &attributes,
                color_formats: &[],
                depth_format: ctx.depth_format,
                depth: DepthState::WRITE_LESS,
                cull_mode: vk::CullModeFlags::BACK,
                front_face: vk::FrontFace::COUNTER_CLOCKWISE,
                depth_bias: None,
            };
            let gbuffer_desc = GraphicsPipelineDesc {
                name: "GBuffer",
                fragment: gbuffer_fs,
                color_formats: &gbuffer_formats,
                depth: DepthState::EQUAL_NO_WRITE,
                ..prepass_desc
            };
            let lighting_desc =
                GraphicsPipelineDesc::fullscreen("Lighting", quad_vs, lighting_fs, pipelines.lighting_layout, &hdr_formats);

            pipelines.depth_prepass = cache.create_graphics(ctx, &prepass_desc)?;
            pipelines.gbuffer = cache.create_graphics(ctx, &gbuffer_desc)?;
            pipelines.lighting = cache.create_graphics(ctx, &lighting_desc)?;
            Ok(())
        })();
        modules.destroy(ctx);

        match built {
            Ok(()) => Ok(pipelines),
            Err(e) => {
                pipelines.destroy(&ctx.device);
                Err(e)
            }
        }
    }

    /// Depth-only draw of every mesh; the diffuse index drives alpha discard.
    pub unsafe fn record_depth_prepass(
        &self,
        device: &ash::Device,
        cmd: vk::CommandBuffer,
        meshes: &[Mesh],
        sets: &[vk::DescriptorSet],
        depth_view: vk::ImageView,
        extent: vk::Extent2D,
    ) {
        let depth = depth_attachment(depth_view, Some(1.0));
        begin_rendering(device, cmd, extent, &[], Some(&depth));
        self.draw_meshes(device, cmd, self.depth_prepass, meshes, sets, extent);
        device.cmd_end_rendering(cmd);
    }

    /// Albedo and material targets over the prepassed depth (loaded, equal test).
    pub unsafe fn record_gbuffer(
        &self,
        device: &ash::Device,
        cmd: vk::CommandBuffer,
        meshes: &[Mesh],
        sets: &[vk::DescriptorSet],
        gbuffer: &GBuffer,
    ) {
        let colors = [
            color_attachment(gbuffer.albedo.view, Some(GBUFFER_CLEAR)),
            color_attachment(gbuffer.material.view, Some(GBUFFER_CLEAR)),
        ];
        let depth = depth_attachment(gbuffer.depth.view, None);
        let extent = gbuffer.extent();
        begin_rendering(device, cmd, extent, &colors, Some(&depth));
        self.draw_meshes(device, cmd, self.gbuffer, meshes, sets, extent);
        device.cmd_end_rendering(cmd);
    }

    /// Full-screen lighting into one HDR image.
    pub unsafe fn record_lighting(
        &self,
        device: &ash::Device,
        cmd: vk::CommandBuffer,
        sets: &[vk::DescriptorSet],
        hdr_view: vk::ImageView,
        extent: vk::Extent2D,
    ) {
        let colors = [color_attachment(hdr_view, Some(HDR_CLEAR))];
        begin_rendering(device, cmd, extent, &colors, None);
        device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, self.lighting);
        device.cmd_bind_descriptor_sets(cmd, vk::PipelineBindPoint::GRAPHICS, self.lighting_layout, 0, sets, &[]);
        set_viewport(device, cmd, extent);
        device.cmd_draw(cmd, 3, 1, 0, 0);
        device.cmd_end_rendering(cmd);
    }

    unsafe fn draw_meshes(
        &self,
        device: &ash::Device,
        cmd: vk::CommandBuffer,
        pipeline: vk::Pipeline,
        meshes: &[Mesh],
        sets: &[vk::DescriptorSet],
        extent: vk::Extent2D,
    ) {
        device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, pipeline);
        device.cmd_bind_descriptor_sets(cmd, vk::PipelineBindPoint::GRAPHICS, self.geometry_layout, 0, &sets[..2], &[]);
        set_viewport(device, cmd, extent);
        for mesh in meshes {
            device.cmd_push_constants(
                cmd,
                self.geometry_layout,
                vk::ShaderStageFlags::FRAGMENT,
                0,
                bytemuck::bytes_of(&mesh.textures),
            );
            mesh.draw(device, cmd);
        }
    }

    pub unsafe fn destroy(&mut self, device: &ash::Device) {
        for pipeline in [self.depth_prepass, self.gbuffer, self.lighting] {
            device.destroy_pipeline(pipeline, None);
        }
        device.destroy_pipeline_layout(self.geometry_layout, None);
        device.destroy_pipeline_layout(self.lighting_layout, None);
        self.depth_prepass = vk::Pipeline::null();
        self.gbuffer = vk::Pipeline::null();
        self.lighting = vk::Pipeline::null();
        self.geometry_layout = vk::PipelineLayout::null();
        self.lighting_layout = vk::PipelineLayout::null();
    }
}
