//! Screen-sized targets and the barriers between the passes that use them.
//!
//! Every frame starts by discarding the previous frame's contents: the
//! last reader of depth, the G-buffer colors and the HDR pair was a
//! fragment shader (lighting or post), so each first write waits on that
//! stage only.

use ash::vk;

use super::gbuffer::GBuffer;
use super::pingpong::PingPongTarget;
use crate::error::Result;
use crate::vulkan::image::Transition;
use crate::vulkan::{MemoryManager, TrackedImage, VulkanContext};

pub type Barriers = Vec<vk::ImageMemoryBarrier2<'static>>;

/// Everything recreated with the swapchain.
pub struct ScreenTargets {
    pub gbuffer: GBuffer,
    pub hdr: PingPongTarget,
}

/// First write of a target that was sampled last frame.
fn overwrite_after_sampling(base: Transition) -> Transition {
    base.after(vk::PipelineStageFlags2::FRAGMENT_SHADER, vk::AccessFlags2::NONE)
}

fn overwrite(image: &mut TrackedImage, transition: Transition) -> vk::ImageMemoryBarrier2<'static> {
    image.discard_contents();
    let range = image.full_range();
    image.plan_transition(&overwrite_after_sampling(transition), range)
}

fn full(image: &mut TrackedImage, transition: Transition) -> vk::ImageMemoryBarrier2<'static> {
    let range = image.full_range();
    image.plan_transition(&transition, range)
}

impl ScreenTargets {
    pub unsafe fn new(ctx: &VulkanContext, memory: &MemoryManager, extent: vk::Extent2D) -> Result<Self> {
        let gbuffer = GBuffer::new(ctx, memory, extent)?;
        let hdr = match PingPongTarget::new(ctx, memory, extent) {
            Ok(hdr) => hdr,
            Err(e) => {
                gbuffer.destroy(memory);
                return Err(e);
            }
        };
        Ok(Self { gbuffer, hdr })
    }

    /// Targets with no GPU objects, for replaying barrier sequences.
    #[cfg(test)]
    pub(crate) fn unbacked() -> Self {
        use super::gbuffer::{ALBEDO_FORMAT, MATERIAL_FORMAT};
        use super::pingpong::HDR_FORMAT;

        Self {
            gbuffer: GBuffer {
                depth: TrackedImage::unbacked("DepthBuffer", vk::Format::D32_SFLOAT, 1),
                albedo: TrackedImage::unbacked("GBufferAlbedo", ALBEDO_FORMAT, 1),
                material: TrackedImage::unbacked("GBufferMaterial", MATERIAL_FORMAT, 1),
            },
            hdr: PingPongTarget::from_images([
                TrackedImage::unbacked("HDRImage", HDR_FORMAT, 1),
                TrackedImage::unbacked("HDRImage", HDR_FORMAT, 1),
            ]),
        }
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.gbuffer.extent()
    }

    /// Depth becomes a cleared attachment for the prepass.
    pub fn prepass_barriers(&mut self) -> Barriers {
        vec![overwrite(&mut self.gbuffer.depth, Transition::to_depth_attachment())]
    }

    /// Prepassed depth becomes test-only; albedo and material become
    /// cleared attachments.
    pub fn gbuffer_barriers(&mut self) -> Barriers {
        vec![
            full(&mut self.gbuffer.depth, Transition::depth_write_to_test()),
            overwrite(&mut self.gbuffer.albedo, Transition::to_color_attachment()),
            overwrite(&mut self.gbuffer.material, Transition::to_color_attachment()),
        ]
    }

    /// G-buffer becomes sampled; the first HDR image of the frame becomes
    /// the lighting output. Returns the barriers and the output view.
    pub fn lighting_barriers(&mut self) -> (Barriers, vk::ImageView) {
        let mut barriers = vec![
            full(&mut self.gbuffer.albedo, Transition::color_to_shader_read()),
            full(&mut self.gbuffer.material, Transition::color_to_shader_read()),
            full(&mut self.gbuffer.depth, Transition::depth_to_shader_read()),
        ];
        self.hdr.begin_frame();
        let output = self.hdr.acquire_next();
        barriers.push(overwrite(output, Transition::to_color_attachment()));
        (barriers, output.view)
    }

    pub unsafe fn destroy(self, memory: &MemoryManager) {
        self.gbuffer.destroy(memory);
        self.hdr.destroy(memory);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn targets() -> ScreenTargets {
        ScreenTargets::unbacked()
    }

    fn frame(targets: &mut ScreenTargets) -> [Barriers; 3] {
        let prepass = targets.prepass_barriers();
        let gbuffer = targets.gbuffer_barriers();
        let (lighting, _) = targets.lighting_barriers();
        [prepass, gbuffer, lighting]
    }

    // ============================================================
    // Pass sequence
    // ============================================================

    #[test]
    fn test_layouts_follow_pass_sequence() {
        let mut t = targets();
        let [prepass, gbuffer, lighting] = frame(&mut t);

        assert_eq!(prepass[0].new_layout, vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL);
        assert_eq!(gbuffer[0].old_layout, vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL);
        assert_eq!(gbuffer[0].dst_access_mask, vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_READ);
        assert!(gbuffer[1..]
            .iter()
            .all(|b| b.new_layout == vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL));
        assert!(lighting[..3]
            .iter()
            .all(|b| b.new_layout == vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL));
        assert_eq!(lighting[3].new_layout, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);

        assert_eq!(t.hdr.current_index(), 0);
        assert_eq!(t.gbuffer.depth.layout(), vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
    }

    #[test]
    fn test_next_frame_discards_and_waits_for_readers() {
        let mut t = targets();
        frame(&mut t);
        let [prepass, gbuffer, lighting] = frame(&mut t);

        for barrier in [&prepass[0], &gbuffer[1], &gbuffer[2], &lighting[3]] {
            assert_eq!(barrier.old_layout, vk::ImageLayout::UNDEFINED);
            assert_eq!(barrier.src_stage_mask, vk::PipelineStageFlags2::FRAGMENT_SHADER);
            assert_eq!(barrier.src_access_mask, vk::AccessFlags2::NONE);
        }
        // The cursor restarts each frame, so lighting always writes slot 0.
        assert_eq!(t.hdr.current_index(), 0);
    }

    #[test]
    fn test_sampled_targets_wait_for_their_writers() {
        let mut t = targets();
        let [_, _, lighting] = frame(&mut t);
        assert_eq!(lighting[0].src_access_mask, vk::AccessFlags2::COLOR_ATTACHMENT_WRITE);
        assert_eq!(lighting[0].dst_stage_mask, vk::PipelineStageFlags2::FRAGMENT_SHADER);
        assert!(lighting[2]
            .src_stage_mask
            .contains(vk::PipelineStageFlags2::LATE_FRAGMENT_TESTS));
    }
}
