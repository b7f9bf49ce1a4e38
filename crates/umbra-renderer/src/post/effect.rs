//! One full-screen post-processing pass.

use ash::vk;

use super::ini::EffectConfig;
use super::params::PushConstantBlock;
use super::reflect::reflect_push_constants;
use crate::config::RendererConfig;
use crate::error::Result;
use crate::render::pingpong::HDR_FORMAT;
use crate::vulkan::debug::{DebugUtils, EFFECT_LABEL_COLOR};
use crate::vulkan::descriptors::create_pipeline_layout;
use crate::vulkan::pipeline::set_viewport;
use crate::vulkan::rendering::{begin_rendering, color_attachment};
use crate::vulkan::shader::{create_shader_module, load_spirv, ShaderModules};
use crate::vulkan::{GraphicsPipelineDesc, PipelineCache, VulkanContext};

/// Name of the built-in pass that copies the HDR target to the swapchain
/// when no effect is enabled.
pub const BLIT_EFFECT: &str = "blit";

/// Where an effect draws this frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EffectTarget {
    /// The other HDR ping-pong image.
    PingPong,
    /// The acquired swapchain image.
    Swapchain,
}

/// A shader-driven full-screen pass with reflected parameters.
///
/// Two pipelines are built from the same shaders: one for the HDR format
/// and one for the swapchain format, so any enabled effect can be last.
pub struct PostEffect {
    name: String,
    pub enabled: bool,
    layout: vk::PipelineLayout,
    hdr_pipeline: vk::Pipeline,
    swapchain_pipeline: vk::Pipeline,
    push: PushConstantBlock,
}

impl PostEffect {
    /// Build `<name>.frag` with defaults from `<name>.ini`.
    pub unsafe fn new(
        ctx: &VulkanContext,
        cache: &PipelineCache,
        set_layouts: &[vk::DescriptorSetLayout],
        config: &RendererConfig,
        name: &str,
        swapchain_format: vk::Format,
    ) -> Result<Self> {
        let defaults = EffectConfig::load(&config.effect_config_path(name))?;
        Self::build(ctx, cache, set_layouts, config, name, swapchain_format, Some(&defaults))
    }

    /// The built-in blit: header-only push constants, no config file.
    pub unsafe fn blit(
        ctx: &VulkanContext,
        cache: &PipelineCache,
        set_layouts: &[vk::DescriptorSetLayout],
        config: &RendererConfig,
        swapchain_format: vk::Format,
    ) -> Result<Self> {
        Self::build(ctx, cache, set_layouts, config, BLIT_EFFECT, swapchain_format, None)
    }

    #[allow(clippy::too_many_arguments)]
    unsafe fn build(
        ctx: &VulkanContext,
        cache: &PipelineCache,
        set_layouts: &[vk::DescriptorSetLayout],
        config: &RendererConfig,
        name: &str,
        swapchain_format: vk::Format,
        defaults: Option<&EffectConfig>,
    ) -> Result<Self> {
        let fragment_path = config.shader_path(&format!("{name}.frag"));
        let fragment_words = load_spirv(&fragment_path)?;
        let reflected = reflect_push_constants(bytemuck::cast_slice(&fragment_words), name)?;
        let push = match defaults {
            Some(defaults) => PushConstantBlock::with_defaults(reflected, defaults)?,
            None => PushConstantBlock::new(reflected),
        };

        let quad_path = config.shader_path("quad.vert");
        let mut modules = ShaderModules::load(ctx, &[quad_path.as_path()])?;
        match create_shader_module(&ctx.device, &fragment_words) {
            Ok(module) => modules.0.push(module),
            Err(e) => {
                modules.destroy(ctx);
                return Err(e);
            }
        }
        let (vertex, fragment) = (modules.0[0], modules.0[1]);

        let ranges = [vk::PushConstantRange {
            stage_flags: vk::ShaderStageFlags::FRAGMENT,
            offset: 0,
            size: push.layout().size,
        }];
        let layout = match create_pipeline_layout(&ctx.device, set_layouts, &ranges) {
            Ok(layout) => layout,
            Err(e) => {
                modules.destroy(ctx);
                return Err(e);
            }
        };

        let mut effect = Self {
            name: name.to_string(),
            enabled: true,
            layout,
            hdr_pipeline: vk::Pipeline::null(),
            swapchain_pipeline: vk::Pipeline::null(),
            push,
        };
        let hdr_name = format!("{name} (HDR)");
        let swapchain_name = format!("{name} (swapchain)");
        let hdr_formats = [HDR_FORMAT];
        let swapchain_formats = [swapchain_format];
        let built = (|| -> Result<()> {
            effect.hdr_pipeline = cache.create_graphics(
                ctx,
                &GraphicsPipelineDesc::fullscreen(&hdr_name, vertex, fragment, layout, &hdr_formats),
            )?;
            effect.swapchain_pipeline = cache.create_graphics(
                ctx,
                &GraphicsPipelineDesc::fullscreen(&swapchain_name, vertex, fragment, layout, &swapchain_formats),
            )?;
            Ok(())
        })();
        modules.destroy(ctx);

        match built {
            Ok(()) => {
                log::info!(
                    "post effect {name}: {} parameters, {} push-constant bytes",
                    effect.push.layout().params.len(),
                    effect.push.layout().size
                );
                Ok(effect)
            }
            Err(e) => {
                effect.destroy(&ctx.device);
                Err(e)
            }
        }
    }

    /// An effect with no GPU objects, for exercising chain bookkeeping.
    #[cfg(test)]
    pub(crate) fn unbacked(name: &str, layout: super::params::PushConstantLayout) -> Self {
        Self {
            name: name.to_string(),
            enabled: true,
            layout: vk::PipelineLayout::null(),
            hdr_pipeline: vk::Pipeline::null(),
            swapchain_pipeline: vk::Pipeline::null(),
            push: PushConstantBlock::new(layout),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn push_constants(&self) -> &PushConstantBlock {
        &self.push
    }

    pub fn push_constants_mut(&mut self) -> &mut PushConstantBlock {
        &mut self.push
    }

    /// Record the draw. The input image must already be shader-readable and
    /// `output_view` a color attachment of the matching target.
    #[allow(clippy::too_many_arguments)]
    pub unsafe fn record(
        &mut self,
        device: &ash::Device,
        debug: &DebugUtils,
        cmd: vk::CommandBuffer,
        sets: &[vk::DescriptorSet],
        output_view: vk::ImageView,
        target: EffectTarget,
        extent: vk::Extent2D,
        time_ms: u64,
        read_index: u32,
    ) {
        debug.begin_label(cmd, &self.name, EFFECT_LABEL_COLOR);

        self.push.set_time(time_ms);
        self.push.set_read_index(read_index);

        let pipeline = match target {
            EffectTarget::PingPong => self.hdr_pipeline,
            EffectTarget::Swapchain => self.swapchain_pipeline,
        };
        let colors = [color_attachment(output_view, None)];
        begin_rendering(device, cmd, extent, &colors, None);
        device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, pipeline);
        device.cmd_bind_descriptor_sets(cmd, vk::PipelineBindPoint::GRAPHICS, self.layout, 0, sets, &[]);
        set_viewport(device, cmd, extent);
        device.cmd_push_constants(cmd, self.layout, vk::ShaderStageFlags::FRAGMENT, 0, self.push.bytes());
        device.cmd_draw(cmd, 3, 1, 0, 0);
        device.cmd_end_rendering(cmd);

        debug.end_label(cmd);
    }

    pub unsafe fn destroy(&mut self, device: &ash::Device) {
        device.destroy_pipeline(self.hdr_pipeline, None);
        device.destroy_pipeline(self.swapchain_pipeline, None);
        device.destroy_pipeline_layout(self.layout, None);
        self.hdr_pipeline = vk::Pipeline::null();
        self.swapchain_pipeline = vk::Pipeline::null();
        self.layout = vk::PipelineLayout::null();
    }
}
