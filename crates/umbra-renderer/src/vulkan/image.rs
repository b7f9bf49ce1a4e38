//! Images with per-subresource layout tracking.
//!
//! Every image carries the layout each (mip, layer) pair is in as of the
//! last recorded command. [`TrackedImage::transition`] records exactly one
//! `VkImageMemoryBarrier2` from the tracked layout to the requested one and
//! updates the tracked state for the affected range only, so cube faces
//! written one at a time keep independent layouts.
//!
//! Source stage/access masks are supplied by the caller and are not
//! inferred from the tracked state.

use ash::vk;
use gpu_allocator::vulkan::Allocation;

/// Layout of every (mip, layer) pair of one image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubresourceStates {
    mip_levels: u32,
    array_layers: u32,
    layouts: Vec<vk::ImageLayout>,
}

impl SubresourceStates {
    pub fn new(mip_levels: u32, array_layers: u32) -> Self {
        Self {
            mip_levels,
            array_layers,
            layouts: vec![vk::ImageLayout::UNDEFINED; (mip_levels * array_layers) as usize],
        }
    }

    pub fn mip_levels(&self) -> u32 {
        self.mip_levels
    }

    pub fn array_layers(&self) -> u32 {
        self.array_layers
    }

    fn slot(&self, mip: u32, layer: u32) -> usize {
        (mip * self.array_layers + layer) as usize
    }

    /// Tracked layout of one subresource.
    pub fn layout(&self, mip: u32, layer: u32) -> vk::ImageLayout {
        assert!(
            mip < self.mip_levels && layer < self.array_layers,
            "subresource ({mip}, {layer}) outside {}x{}",
            self.mip_levels,
            self.array_layers
        );
        self.layouts[self.slot(mip, layer)]
    }

    /// Resolve `REMAINING_*` counts and clamp the range to the image.
    fn resolve(&self, range: &vk::ImageSubresourceRange) -> (std::ops::Range<u32>, std::ops::Range<u32>) {
        let mip_end = if range.level_count == vk::REMAINING_MIP_LEVELS {
            self.mip_levels
        } else {
            (range.base_mip_level + range.level_count).min(self.mip_levels)
        };
        let layer_end = if range.layer_count == vk::REMAINING_ARRAY_LAYERS {
            self.array_layers
        } else {
            (range.base_array_layer + range.layer_count).min(self.array_layers)
        };
        (range.base_mip_level..mip_end, range.base_array_layer..layer_end)
    }

    /// The single layout shared by every subresource in `range`, if any.
    pub fn uniform_layout(&self, range: &vk::ImageSubresourceRange) -> Option<vk::ImageLayout> {
        let (mips, layers) = self.resolve(range);
        let mut found = None;
        for mip in mips {
            for layer in layers.clone() {
                let layout = self.layouts[self.slot(mip, layer)];
                match found {
                    None => found = Some(layout),
                    Some(prev) if prev != layout => return None,
                    Some(_) => {}
                }
            }
        }
        found
    }

    /// Move `range` to `new_layout` and return the layout the barrier
    /// transitions from.
    ///
    /// A range whose subresources disagree is transitioned from
    /// `UNDEFINED`, discarding its contents.
    pub fn apply(&mut self, range: &vk::ImageSubresourceRange, new_layout: vk::ImageLayout) -> vk::ImageLayout {
        let old_layout = self.uniform_layout(range).unwrap_or_else(|| {
            log::warn!("transition over subresources in mixed layouts; contents discarded");
            vk::ImageLayout::UNDEFINED
        });

        let (mips, layers) = self.resolve(range);
        for mip in mips {
            for layer in layers.clone() {
                let slot = self.slot(mip, layer);
                self.layouts[slot] = new_layout;
            }
        }
        old_layout
    }

    /// Forget all contents: every subresource goes back to `UNDEFINED`.
    pub fn reset(&mut self) {
        self.layouts.fill(vk::ImageLayout::UNDEFINED);
    }
}

/// A single layout change plus the dependency guarding it.
#[derive(Debug, Clone, Copy)]
pub struct Transition {
    pub new_layout: vk::ImageLayout,
    pub src_stage: vk::PipelineStageFlags2,
    pub dst_stage: vk::PipelineStageFlags2,
    pub src_access: vk::AccessFlags2,
    pub dst_access: vk::AccessFlags2,
}

impl Transition {
    /// Nothing earlier to wait on: first use of a target this frame.
    pub fn to_color_attachment() -> Self {
        Self {
            new_layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            src_stage: vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
            dst_stage: vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
            src_access: vk::AccessFlags2::NONE,
            dst_access: vk::AccessFlags2::COLOR_ATTACHMENT_WRITE,
        }
    }

    /// Depth written by this frame's earlier depth passes.
    pub fn to_depth_attachment() -> Self {
        Self {
            new_layout: vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL,
            src_stage: vk::PipelineStageFlags2::TOP_OF_PIPE,
            dst_stage: vk::PipelineStageFlags2::EARLY_FRAGMENT_TESTS
                | vk::PipelineStageFlags2::LATE_FRAGMENT_TESTS,
            src_access: vk::AccessFlags2::NONE,
            dst_access: vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_WRITE
                | vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_READ,
        }
    }

    /// Color output of the previous pass sampled by the next fragment shader.
    pub fn color_to_shader_read() -> Self {
        Self {
            new_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            src_stage: vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
            dst_stage: vk::PipelineStageFlags2::FRAGMENT_SHADER,
            src_access: vk::AccessFlags2::COLOR_ATTACHMENT_WRITE,
            dst_access: vk::AccessFlags2::SHADER_SAMPLED_READ,
        }
    }

    /// Depth output of the previous pass sampled by the next fragment shader.
    pub fn depth_to_shader_read() -> Self {
        Self {
            new_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            src_stage: vk::PipelineStageFlags2::EARLY_FRAGMENT_TESTS
                | vk::PipelineStageFlags2::LATE_FRAGMENT_TESTS,
            dst_stage: vk::PipelineStageFlags2::FRAGMENT_SHADER,
            src_access: vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_WRITE,
            dst_access: vk::AccessFlags2::SHADER_SAMPLED_READ,
        }
    }

    /// Depth written by the prepass, tested (read-only) by the next pass.
    pub fn depth_write_to_test() -> Self {
        Self {
            new_layout: vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL,
            src_stage: vk::PipelineStageFlags2::EARLY_FRAGMENT_TESTS
                | vk::PipelineStageFlags2::LATE_FRAGMENT_TESTS,
            dst_stage: vk::PipelineStageFlags2::EARLY_FRAGMENT_TESTS
                | vk::PipelineStageFlags2::LATE_FRAGMENT_TESTS,
            src_access: vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_WRITE,
            dst_access: vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_READ,
        }
    }

    /// Swapchain image handed to the presentation engine.
    pub fn color_to_present() -> Self {
        Self {
            new_layout: vk::ImageLayout::PRESENT_SRC_KHR,
            src_stage: vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
            dst_stage: vk::PipelineStageFlags2::BOTTOM_OF_PIPE,
            src_access: vk::AccessFlags2::COLOR_ATTACHMENT_WRITE,
            dst_access: vk::AccessFlags2::NONE,
        }
    }

    /// Texture upload destination.
    pub fn to_transfer_dst() -> Self {
        Self {
            new_layout: vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            src_stage: vk::PipelineStageFlags2::TOP_OF_PIPE,
            dst_stage: vk::PipelineStageFlags2::COPY,
            src_access: vk::AccessFlags2::NONE,
            dst_access: vk::AccessFlags2::TRANSFER_WRITE,
        }
    }

    pub fn transfer_to_shader_read() -> Self {
        Self {
            new_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            src_stage: vk::PipelineStageFlags2::COPY,
            dst_stage: vk::PipelineStageFlags2::FRAGMENT_SHADER,
            src_access: vk::AccessFlags2::TRANSFER_WRITE,
            dst_access: vk::AccessFlags2::SHADER_SAMPLED_READ,
        }
    }

    /// Override the source half of the dependency.
    pub fn after(mut self, src_stage: vk::PipelineStageFlags2, src_access: vk::AccessFlags2) -> Self {
        self.src_stage = src_stage;
        self.src_access = src_access;
        self
    }
}

/// Build the barrier for one transition. Queue family ownership never moves.
pub fn image_barrier(
    image: vk::Image,
    old_layout: vk::ImageLayout,
    transition: &Transition,
    range: vk::ImageSubresourceRange,
) -> vk::ImageMemoryBarrier2<'static> {
    vk::ImageMemoryBarrier2::default()
        .src_stage_mask(transition.src_stage)
        .src_access_mask(transition.src_access)
        .dst_stage_mask(transition.dst_stage)
        .dst_access_mask(transition.dst_access)
        .old_layout(old_layout)
        .new_layout(transition.new_layout)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(range)
}

/// Record planned barriers as one dependency. Nothing is recorded for an
/// empty batch.
pub unsafe fn record_barriers(device: &ash::Device, cmd: vk::CommandBuffer, barriers: &[vk::ImageMemoryBarrier2]) {
    if barriers.is_empty() {
        return;
    }
    let dependency = vk::DependencyInfo::default().image_memory_barriers(barriers);
    device.cmd_pipeline_barrier2(cmd, &dependency);
}

/// Aspect flags for a format: depth (+stencil) or color.
pub fn aspect_for_format(format: vk::Format) -> vk::ImageAspectFlags {
    match format {
        vk::Format::D16_UNORM | vk::Format::D32_SFLOAT | vk::Format::X8_D24_UNORM_PACK32 => {
            vk::ImageAspectFlags::DEPTH
        }
        vk::Format::D16_UNORM_S8_UINT | vk::Format::D24_UNORM_S8_UINT | vk::Format::D32_SFLOAT_S8_UINT => {
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        }
        vk::Format::S8_UINT => vk::ImageAspectFlags::STENCIL,
        _ => vk::ImageAspectFlags::COLOR,
    }
}

/// GPU image with memory, a default view and tracked layouts.
pub struct TrackedImage {
    pub handle: vk::Image,
    pub view: vk::ImageView,
    pub allocation: Option<Allocation>,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    pub aspect: vk::ImageAspectFlags,
    pub states: SubresourceStates,
    pub name: String,
}

impl TrackedImage {
    /// Every mip and layer.
    pub fn full_range(&self) -> vk::ImageSubresourceRange {
        vk::ImageSubresourceRange {
            aspect_mask: self.aspect,
            base_mip_level: 0,
            level_count: self.states.mip_levels(),
            base_array_layer: 0,
            layer_count: self.states.array_layers(),
        }
    }

    /// Mip 0 of one array layer (one cube face).
    pub fn layer_range(&self, layer: u32) -> vk::ImageSubresourceRange {
        vk::ImageSubresourceRange {
            aspect_mask: self.aspect,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: layer,
            layer_count: 1,
        }
    }

    pub fn layout(&self) -> vk::ImageLayout {
        self.states.layout(0, 0)
    }

    /// Image with no GPU object behind it, for exercising state tracking.
    #[cfg(test)]
    pub(crate) fn unbacked(name: &str, format: vk::Format, array_layers: u32) -> Self {
        Self {
            handle: vk::Image::null(),
            view: vk::ImageView::null(),
            allocation: None,
            format,
            extent: vk::Extent2D { width: 64, height: 64 },
            aspect: aspect_for_format(format),
            states: SubresourceStates::new(1, array_layers),
            name: name.to_string(),
        }
    }

    /// Transition every subresource.
    pub unsafe fn transition(&mut self, device: &ash::Device, cmd: vk::CommandBuffer, transition: &Transition) {
        let range = self.full_range();
        self.transition_range(device, cmd, transition, range);
    }

    /// Record one barrier moving `range` to `transition.new_layout`.
    pub unsafe fn transition_range(
        &mut self,
        device: &ash::Device,
        cmd: vk::CommandBuffer,
        transition: &Transition,
        range: vk::ImageSubresourceRange,
    ) {
        let barrier = self.plan_transition(transition, range);
        record_barriers(device, cmd, &[barrier]);
    }

    /// Update the tracked state and return the barrier to record.
    pub fn plan_transition(
        &mut self,
        transition: &Transition,
        range: vk::ImageSubresourceRange,
    ) -> vk::ImageMemoryBarrier2<'static> {
        let old_layout = self.states.apply(&range, transition.new_layout);
        image_barrier(self.handle, old_layout, transition, range)
    }

    /// The next transition starts from `UNDEFINED` (contents are not needed).
    pub fn discard_contents(&mut self) {
        self.states.reset();
    }

    /// Create an extra 2D view of one layer, e.g. a cube face to render into.
    pub unsafe fn create_layer_view(&self, device: &ash::Device, layer: u32) -> ash::prelude::VkResult<vk::ImageView> {
        let view_aspect = if self.aspect.contains(vk::ImageAspectFlags::DEPTH) {
            vk::ImageAspectFlags::DEPTH
        } else {
            self.aspect
        };
        let view_info = vk::ImageViewCreateInfo::default()
            .image(self.handle)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(self.format)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: view_aspect,
                ..self.layer_range(layer)
            });
        device.create_image_view(&view_info, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cube_map() -> TrackedImage {
        TrackedImage {
            handle: vk::Image::null(),
            view: vk::ImageView::null(),
            allocation: None,
            format: vk::Format::D32_SFLOAT,
            extent: vk::Extent2D { width: 64, height: 64 },
            aspect: vk::ImageAspectFlags::DEPTH,
            states: SubresourceStates::new(1, 6),
            name: "ShadowMap[0]".to_string(),
        }
    }

    // ============================================================
    // SubresourceStates
    // ============================================================

    #[test]
    fn test_states_start_undefined() {
        let states = SubresourceStates::new(3, 2);
        for mip in 0..3 {
            for layer in 0..2 {
                assert_eq!(states.layout(mip, layer), vk::ImageLayout::UNDEFINED);
            }
        }
    }

    #[test]
    #[should_panic]
    fn test_states_out_of_range_panics() {
        SubresourceStates::new(1, 6).layout(0, 6);
    }

    #[test]
    fn test_remaining_counts_cover_the_rest() {
        let mut states = SubresourceStates::new(4, 3);
        let range = vk::ImageSubresourceRange {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            base_mip_level: 2,
            level_count: vk::REMAINING_MIP_LEVELS,
            base_array_layer: 1,
            layer_count: vk::REMAINING_ARRAY_LAYERS,
        };
        states.apply(&range, vk::ImageLayout::GENERAL);

        for mip in 0..4 {
            for layer in 0..3 {
                let expected = if mip >= 2 && layer >= 1 {
                    vk::ImageLayout::GENERAL
                } else {
                    vk::ImageLayout::UNDEFINED
                };
                assert_eq!(states.layout(mip, layer), expected, "({mip}, {layer})");
            }
        }
    }

    #[test]
    fn test_replayed_log_matches_tracked_state() {
        // Replay a transition log and compare each subresource against the
        // last transition that touched it.
        let mut states = SubresourceStates::new(2, 6);
        let layouts = [
            vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            vk::ImageLayout::GENERAL,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        ];
        let mut log: Vec<(u32, u32, u32, u32, vk::ImageLayout)> = Vec::new();

        let mut seed = 17u32;
        for _ in 0..64 {
            seed = seed.wrapping_mul(1_103_515_245).wrapping_add(12_345);
            let base_mip = (seed >> 4) % 2;
            let mip_count = 1 + (seed >> 8) % (2 - base_mip);
            let base_layer = (seed >> 12) % 6;
            let layer_count = 1 + (seed >> 16) % (6 - base_layer);
            let layout = layouts[((seed >> 20) % 4) as usize];

            let range = vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::DEPTH,
                base_mip_level: base_mip,
                level_count: mip_count,
                base_array_layer: base_layer,
                layer_count,
            };
            states.apply(&range, layout);
            log.push((base_mip, mip_count, base_layer, layer_count, layout));
        }

        for mip in 0..2 {
            for layer in 0..6 {
                let expected = log
                    .iter()
                    .rev()
                    .find(|(bm, mc, bl, lc, _)| {
                        (*bm..bm + mc).contains(&mip) && (*bl..bl + lc).contains(&layer)
                    })
                    .map(|entry| entry.4)
                    .unwrap_or(vk::ImageLayout::UNDEFINED);
                assert_eq!(states.layout(mip, layer), expected, "({mip}, {layer})");
            }
        }
    }

    // ============================================================
    // TrackedImage transitions
    // ============================================================

    #[test]
    fn test_cube_face_transition_leaves_other_faces() {
        let mut image = cube_map();
        for face in 0..3 {
            let range = image.layer_range(face);
            image.plan_transition(&Transition::to_depth_attachment(), range);
        }
        let range = image.layer_range(3);
        let barrier = image.plan_transition(&Transition::to_depth_attachment(), range);

        assert_eq!(barrier.old_layout, vk::ImageLayout::UNDEFINED);
        assert_eq!(barrier.subresource_range.base_array_layer, 3);
        assert_eq!(barrier.subresource_range.layer_count, 1);
        for face in 0..4 {
            assert_eq!(image.states.layout(0, face), vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL);
        }
        for face in 4..6 {
            assert_eq!(image.states.layout(0, face), vk::ImageLayout::UNDEFINED);
        }
    }

    #[test]
    fn test_full_transition_after_all_faces() {
        let mut image = cube_map();
        for face in 0..6 {
            let range = image.layer_range(face);
            image.plan_transition(&Transition::to_depth_attachment(), range);
        }
        let range = image.full_range();
        let barrier = image.plan_transition(&Transition::depth_to_shader_read(), range);

        assert_eq!(barrier.old_layout, vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL);
        assert_eq!(barrier.new_layout, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
        assert_eq!(barrier.src_access_mask, vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_WRITE);
        assert_eq!(barrier.dst_stage_mask, vk::PipelineStageFlags2::FRAGMENT_SHADER);
        assert_eq!(image.layout(), vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
    }

    #[test]
    fn test_mixed_range_transitions_from_undefined() {
        let mut image = cube_map();
        let range = image.layer_range(2);
        image.plan_transition(&Transition::to_depth_attachment(), range);

        let range = image.full_range();
        let barrier = image.plan_transition(&Transition::depth_to_shader_read(), range);
        assert_eq!(barrier.old_layout, vk::ImageLayout::UNDEFINED);
        assert_eq!(
            image.states.uniform_layout(&range),
            Some(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
        );
    }

    #[test]
    fn test_discard_contents() {
        let mut image = cube_map();
        let range = image.full_range();
        image.plan_transition(&Transition::to_depth_attachment(), range);
        image.discard_contents();

        let barrier = image.plan_transition(&Transition::to_depth_attachment(), range);
        assert_eq!(barrier.old_layout, vk::ImageLayout::UNDEFINED);
    }

    #[test]
    fn test_after_overrides_source() {
        let t = Transition::to_color_attachment()
            .after(vk::PipelineStageFlags2::FRAGMENT_SHADER, vk::AccessFlags2::SHADER_SAMPLED_READ);
        assert_eq!(t.src_stage, vk::PipelineStageFlags2::FRAGMENT_SHADER);
        assert_eq!(t.src_access, vk::AccessFlags2::SHADER_SAMPLED_READ);
        assert_eq!(t.dst_access, vk::AccessFlags2::COLOR_ATTACHMENT_WRITE);
    }

    #[test]
    fn test_aspect_for_format() {
        assert_eq!(aspect_for_format(vk::Format::D32_SFLOAT), vk::ImageAspectFlags::DEPTH);
        assert_eq!(
            aspect_for_format(vk::Format::D24_UNORM_S8_UINT),
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        );
        assert_eq!(aspect_for_format(vk::Format::R8G8B8A8_UNORM), vk::ImageAspectFlags::COLOR);
    }
}
