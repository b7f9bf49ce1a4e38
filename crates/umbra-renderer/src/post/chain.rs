//! Ordered, toggleable chain of post-processing effects.
//!
//! Effects read the HDR image written last and write the other one; the
//! final enabled effect writes the swapchain image instead. With nothing
//! enabled the built-in blit does that final write, so exactly one draw
//! per frame reaches the swapchain.

use std::time::{SystemTime, UNIX_EPOCH};

use ash::vk;

use super::effect::{EffectTarget, PostEffect};
use super::params::ParamValue;
use crate::config::RendererConfig;
use crate::error::{RenderError, Result};
use crate::render::pingpong::PingPongTarget;
use crate::render::targets::Barriers;
use crate::vulkan::debug::DebugUtils;
use crate::vulkan::image::{record_barriers, Transition};
use crate::vulkan::{PipelineCache, TrackedImage, VulkanContext};

/// Which pass a step runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepPass {
    /// Index into the chain's effect list.
    Effect(usize),
    Blit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Step {
    pub pass: StepPass,
    pub target: EffectTarget,
}

/// Steps for one frame given each effect's enabled flag, in chain order.
///
/// Disabled effects produce no step, so the ping-pong cursor only advances
/// for passes that actually draw.
pub fn plan(enabled: &[bool]) -> Vec<Step> {
    let active: Vec<usize> = enabled
        .iter()
        .enumerate()
        .filter_map(|(i, &on)| on.then_some(i))
        .collect();

    let Some((&last, rest)) = active.split_last() else {
        return vec![Step {
            pass: StepPass::Blit,
            target: EffectTarget::Swapchain,
        }];
    };

    rest.iter()
        .map(|&i| Step {
            pass: StepPass::Effect(i),
            target: EffectTarget::PingPong,
        })
        .chain(std::iter::once(Step {
            pass: StepPass::Effect(last),
            target: EffectTarget::Swapchain,
        }))
        .collect()
}

/// What one step reads and writes once its barriers are recorded.
pub struct StepTargets {
    pub barriers: Barriers,
    /// HDR slot the effect samples.
    pub read_index: u32,
    pub output_view: vk::ImageView,
}

/// Plan the transitions of one step: the image written last becomes
/// sampled, the step's output becomes a discarded color attachment.
pub fn prepare_step(step: &Step, hdr: &mut PingPongTarget, swapchain_image: &mut TrackedImage) -> StepTargets {
    let input = hdr.acquire_last_rendered_to();
    let range = input.full_range();
    let mut barriers = vec![input.plan_transition(&Transition::color_to_shader_read(), range)];
    let read_index = hdr.current_index() as u32;

    let (output, transition) = match step.target {
        EffectTarget::PingPong => (
            hdr.acquire_next(),
            Transition::to_color_attachment().after(vk::PipelineStageFlags2::FRAGMENT_SHADER, vk::AccessFlags2::NONE),
        ),
        EffectTarget::Swapchain => (swapchain_image, Transition::to_color_attachment()),
    };
    output.discard_contents();
    let range = output.full_range();
    barriers.push(output.plan_transition(&transition, range));

    StepTargets {
        barriers,
        read_index,
        output_view: output.view,
    }
}

/// Change to the chain requested by the input layer, applied between frames.
#[derive(Debug, Clone, PartialEq)]
pub enum EffectCommand {
    Toggle(String),
    SetEnabled(String, bool),
    /// Effect name, parameter name, new value.
    SetParam(String, String, ParamValue),
}

pub struct PostChain {
    effects: Vec<PostEffect>,
    blit: PostEffect,
}

impl PostChain {
    /// Build every configured effect plus the blit.
    pub unsafe fn new(
        ctx: &VulkanContext,
        cache: &PipelineCache,
        set_layouts: &[vk::DescriptorSetLayout],
        config: &RendererConfig,
        swapchain_format: vk::Format,
    ) -> Result<Self> {
        let mut blit = PostEffect::blit(ctx, cache, set_layouts, config, swapchain_format)?;
        let mut effects: Vec<PostEffect> = Vec::with_capacity(config.effects.len());
        for name in &config.effects {
            match PostEffect::new(ctx, cache, set_layouts, config, name, swapchain_format) {
                Ok(effect) => effects.push(effect),
                Err(e) => {
                    for mut effect in effects {
                        effect.destroy(&ctx.device);
                    }
                    blit.destroy(&ctx.device);
                    return Err(e);
                }
            }
        }
        Ok(Self { effects, blit })
    }

    #[cfg(test)]
    pub(crate) fn from_effects(effects: Vec<PostEffect>) -> Self {
        Self {
            effects,
            blit: PostEffect::unbacked(super::effect::BLIT_EFFECT, super::params::PushConstantLayout::header_only()),
        }
    }

    pub fn effects(&self) -> &[PostEffect] {
        &self.effects
    }

    pub fn effect(&self, name: &str) -> Option<&PostEffect> {
        self.effects.iter().find(|e| e.name() == name)
    }

    fn effect_mut(&mut self, name: &str) -> Result<&mut PostEffect> {
        self.effects
            .iter_mut()
            .find(|e| e.name() == name)
            .ok_or_else(|| RenderError::UnknownEffect(name.to_string()))
    }

    /// Apply a command and return the effect's enabled state afterwards.
    pub fn apply(&mut self, command: EffectCommand) -> Result<bool> {
        match command {
            EffectCommand::Toggle(name) => {
                let effect = self.effect_mut(&name)?;
                effect.enabled = !effect.enabled;
                log::info!("{name} {}", if effect.enabled { "enabled" } else { "disabled" });
                Ok(effect.enabled)
            }
            EffectCommand::SetEnabled(name, enabled) => {
                let effect = self.effect_mut(&name)?;
                effect.enabled = enabled;
                Ok(enabled)
            }
            EffectCommand::SetParam(name, param, value) => {
                let effect = self.effect_mut(&name)?;
                effect.push_constants_mut().set(&param, value)?;
                Ok(effect.enabled)
            }
        }
    }

    pub fn plan(&self) -> Vec<Step> {
        let enabled: Vec<bool> = self.effects.iter().map(|e| e.enabled).collect();
        plan(&enabled)
    }

    /// Record this frame's steps. The HDR target must hold the lighting
    /// output; the swapchain image ends as a color attachment.
    #[allow(clippy::too_many_arguments)]
    pub unsafe fn record(
        &mut self,
        device: &ash::Device,
        debug: &DebugUtils,
        cmd: vk::CommandBuffer,
        sets: &[vk::DescriptorSet],
        hdr: &mut PingPongTarget,
        swapchain_image: &mut TrackedImage,
    ) {
        let time_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        let extent = hdr.extent();

        for step in self.plan() {
            let targets = prepare_step(&step, hdr, swapchain_image);
            record_barriers(device, cmd, &targets.barriers);

            let effect = match step.pass {
                StepPass::Effect(i) => &mut self.effects[i],
                StepPass::Blit => &mut self.blit,
            };
            effect.record(
                device,
                debug,
                cmd,
                sets,
                targets.output_view,
                step.target,
                extent,
                time_ms,
                targets.read_index,
            );
        }
    }

    pub unsafe fn destroy(&mut self, device: &ash::Device) {
        for effect in &mut self.effects {
            effect.destroy(device);
        }
        self.blit.destroy(device);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::post::params::{ParamKind, ParamSlot, PushConstantLayout};
    use crate::render::pingpong::PingPongCursor;

    fn chain(names: &[&str]) -> PostChain {
        let layout = PushConstantLayout {
            size: 32,
            params: vec![
                ParamSlot {
                    name: "strength".to_string(),
                    kind: ParamKind::Float,
                    offset: 12,
                },
                ParamSlot {
                    name: "direction".to_string(),
                    kind: ParamKind::Vec2,
                    offset: 16,
                },
            ],
        };
        PostChain::from_effects(names.iter().map(|n| PostEffect::unbacked(n, layout.clone())).collect())
    }

    fn swapchain_writes(steps: &[Step]) -> usize {
        steps.iter().filter(|s| s.target == EffectTarget::Swapchain).count()
    }

    // ============================================================
    // Termination
    // ============================================================

    #[test]
    fn test_every_configuration_writes_swapchain_once() {
        for effect_count in 0..6 {
            for mask in 0u32..(1 << effect_count) {
                let enabled: Vec<bool> = (0..effect_count).map(|i| mask & (1 << i) != 0).collect();
                let steps = plan(&enabled);
                assert_eq!(swapchain_writes(&steps), 1, "enabled = {enabled:?}");
                assert_eq!(steps.last().unwrap().target, EffectTarget::Swapchain);
            }
        }
    }

    #[test]
    fn test_empty_chain_blits() {
        assert_eq!(
            plan(&[false, false]),
            vec![Step {
                pass: StepPass::Blit,
                target: EffectTarget::Swapchain
            }]
        );
        assert_eq!(plan(&[]).len(), 1);
    }

    #[test]
    fn test_disabled_effect_keeps_order() {
        let steps = plan(&[true, false, true]);
        assert_eq!(
            steps,
            vec![
                Step {
                    pass: StepPass::Effect(0),
                    target: EffectTarget::PingPong
                },
                Step {
                    pass: StepPass::Effect(2),
                    target: EffectTarget::Swapchain
                },
            ]
        );
    }

    // ============================================================
    // Ping-pong reads
    // ============================================================

    /// Replays a frame on a cursor: lighting writes first, then each step
    /// reads the current slot and ping-pong steps advance.
    fn read_indices(steps: &[Step]) -> (Vec<usize>, usize) {
        let mut cursor = PingPongCursor::new();
        let lighting = cursor.advance();
        let mut reads = Vec::new();
        let mut written = vec![lighting];
        for step in steps {
            reads.push(cursor.current());
            if step.target == EffectTarget::PingPong {
                written.push(cursor.advance());
            }
        }
        (reads, written.len())
    }

    #[test]
    fn test_each_step_reads_previous_output() {
        let steps = plan(&[true, true, false, true]);
        let (reads, writes) = read_indices(&steps);
        // Lighting writes slot 0, effect 0 writes 1, effect 1 writes 0,
        // effect 3 writes the swapchain.
        assert_eq!(reads, vec![0, 1, 0]);
        assert_eq!(writes, 3);
    }

    #[test]
    fn test_cursor_advances_only_for_drawn_effects() {
        for enabled in [vec![false, false, false], vec![true, false, false], vec![false, true, true]] {
            let steps = plan(&enabled);
            let active = enabled.iter().filter(|&&on| on).count();
            let advances = steps.iter().filter(|s| s.target == EffectTarget::PingPong).count();
            assert_eq!(advances, active.saturating_sub(1));
        }
    }

    // ============================================================
    // Commands
    // ============================================================

    #[test]
    fn test_toggle_reports_new_state() {
        let mut chain = chain(&["chromatic_aberration", "vignette", "tonemap"]);
        assert!(!chain.apply(EffectCommand::Toggle("vignette".to_string())).unwrap());
        assert!(chain.apply(EffectCommand::Toggle("vignette".to_string())).unwrap());
        assert!(chain.effect("vignette").unwrap().enabled);
    }

    #[test]
    fn test_reenabled_effect_keeps_position() {
        let mut chain = chain(&["chromatic_aberration", "vignette", "tonemap"]);
        chain.apply(EffectCommand::Toggle("chromatic_aberration".to_string())).unwrap();
        assert_eq!(
            chain.plan().iter().map(|s| s.pass).collect::<Vec<_>>(),
            vec![StepPass::Effect(1), StepPass::Effect(2)]
        );

        chain.apply(EffectCommand::SetEnabled("chromatic_aberration".to_string(), true)).unwrap();
        assert_eq!(
            chain.plan().iter().map(|s| s.pass).collect::<Vec<_>>(),
            vec![StepPass::Effect(0), StepPass::Effect(1), StepPass::Effect(2)]
        );
        assert_eq!(chain.effects()[0].name(), "chromatic_aberration");
    }

    #[test]
    fn test_set_param_writes_reflected_offset() {
        let mut chain = chain(&["chromatic_aberration"]);
        let enabled = chain
            .apply(EffectCommand::SetParam(
                "chromatic_aberration".to_string(),
                "strength".to_string(),
                ParamValue::Float(0.5),
            ))
            .unwrap();
        assert!(enabled);
        chain
            .apply(EffectCommand::SetParam(
                "chromatic_aberration".to_string(),
                "direction".to_string(),
                ParamValue::Vec2([0.0, 1.0]),
            ))
            .unwrap();

        let bytes = chain.effect("chromatic_aberration").unwrap().push_constants().bytes();
        assert_eq!(&bytes[12..16], &0.5f32.to_ne_bytes());
        assert_eq!(&bytes[16..20], &0.0f32.to_ne_bytes());
        assert_eq!(&bytes[20..24], &1.0f32.to_ne_bytes());
    }

    #[test]
    fn test_unknown_names_are_rejected() {
        let mut chain = chain(&["tonemap"]);
        assert!(matches!(
            chain.apply(EffectCommand::Toggle("bloom".to_string())),
            Err(RenderError::UnknownEffect(name)) if name == "bloom"
        ));
        assert!(matches!(
            chain.apply(EffectCommand::SetParam(
                "tonemap".to_string(),
                "exposure".to_string(),
                ParamValue::Float(2.0)
            )),
            Err(RenderError::UnknownParameter(_))
        ));
        assert!(chain.effect("tonemap").unwrap().enabled);
    }
}
