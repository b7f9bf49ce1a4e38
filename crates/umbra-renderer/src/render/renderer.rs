//! Frame orchestration.
//!
//! One frame: wait for the slot's fence, acquire a swapchain image, record
//! depth prepass, G-buffer, lighting and post processing with a barrier
//! batch at every change of role, submit, present. A stale swapchain on
//! acquire or present abandons the frame and rebuilds every screen-sized
//! resource.

use ash::vk;
use crossbeam::channel::{self, Receiver, Sender};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use winit::window::Window;

use super::frame::{slot_for_frame, FrameSlot};
use super::passes::ScenePipelines;
use super::shadow::generate_shadow_maps;
use super::targets::ScreenTargets;
use super::uniforms::{CameraMatrices, CameraUniform, LightingState};
use crate::config::{RendererConfig, TIMED_PASS_COUNT};
use crate::error::{RenderError, Result};
use crate::post::{EffectCommand, PostChain};
use crate::scene::{Mesh, Scene, SceneBuilder};
use crate::vulkan::debug::PASS_LABEL_COLOR;
use crate::vulkan::descriptors::DescriptorManager;
use crate::vulkan::image::{record_barriers, Transition};
use crate::vulkan::{
    AcquireOutcome, BindlessTextures, CommandManager, DeletionQueue, MemoryManager, PipelineCache, Samplers,
    Swapchain, VulkanContext, VulkanSurface,
};

pub const DEPTH_PREPASS_LABEL: &str = "Depth Prepass";
pub const GBUFFER_LABEL: &str = "GBuffer";
pub const LIGHTING_LABEL: &str = "Lighting";
pub const POST_PROCESSING_LABEL: &str = "Post Processing";

/// Timed passes in recording order.
pub const PASS_LABELS: [&str; TIMED_PASS_COUNT as usize] =
    [DEPTH_PREPASS_LABEL, GBUFFER_LABEL, LIGHTING_LABEL, POST_PROCESSING_LABEL];

/// What happened to one call of [`Renderer::draw_frame`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    Presented,
    /// Nothing to draw into (minimized window).
    Skipped,
    /// The swapchain was stale; the frame was dropped and screen targets
    /// rebuilt at this extent.
    Recreated(vk::Extent2D),
}

/// Deferred renderer bound to one window.
///
/// Field order matters for drop: `memory` must go before `ctx`.
pub struct Renderer {
    config: RendererConfig,
    window_extent: vk::Extent2D,
    resize_requested: bool,
    frame_counter: u64,

    commands_tx: Sender<EffectCommand>,
    commands_rx: Receiver<EffectCommand>,
    last_timings: Vec<(String, f64)>,

    scene: Option<Scene>,
    targets: Option<ScreenTargets>,
    slots: Vec<FrameSlot>,
    post: PostChain,
    scene_pipelines: ScenePipelines,
    pipeline_cache: PipelineCache,
    bindless: BindlessTextures,
    descriptors: DescriptorManager,
    commands: CommandManager,
    swapchain: Swapchain,
    surface: VulkanSurface,
    deletion: DeletionQueue,

    memory: MemoryManager,
    ctx: VulkanContext,
}

impl Renderer {
    /// Bring up Vulkan against `window` and build every pipeline. Any
    /// failure here is fatal to the caller.
    pub fn new(window: &Window, config: RendererConfig) -> Result<Self> {
        config.validate()?;
        let size = window.inner_size();
        let window_extent = vk::Extent2D {
            width: size.width,
            height: size.height,
        };
        let display_handle = window.display_handle()?.as_raw();
        let window_handle = window.window_handle()?.as_raw();

        // SAFETY: the handles come from a live window that outlives the
        // renderer; every object below is created on this context and torn
        // down in Drop before it.
        unsafe {
            let (ctx, surface_handle) = VulkanContext::new(display_handle, window_handle, config.validation)?;
            let memory = MemoryManager::new(&ctx)?;
            let surface = VulkanSurface::new(&ctx, surface_handle, config.vsync)?;
            let swapchain = Swapchain::new(&ctx, &surface, window_extent.width, window_extent.height, None)?;
            let slot_count = swapchain.image_count();

            let commands = CommandManager::new(&ctx, slot_count)?;
            let descriptors = DescriptorManager::new(&ctx, slot_count as u32)?;
            let samplers = Samplers::new(&ctx)?;
            let bindless = BindlessTextures::new(&ctx, &samplers)?;
            let mut deletion = DeletionQueue::new();
            // Deletion-queue entries are flushed in `Drop` after the device
            // is idle.
            deletion.push("samplers", move |ctx: &VulkanContext, _: &MemoryManager| {
                samplers.destroy(&ctx.device)
            });

            let pipeline_cache = PipelineCache::new(&ctx)?;
            let set_layouts = [bindless.layout, descriptors.per_frame_layout, descriptors.gbuffer_layout];
            let scene_pipelines = ScenePipelines::new(&ctx, &pipeline_cache, &set_layouts, &config)?;
            let post = PostChain::new(&ctx, &pipeline_cache, &set_layouts, &config, swapchain.format)?;

            let targets = ScreenTargets::new(&ctx, &memory, swapchain.extent)?;

            let per_frame_sets = descriptors.allocate_sets(descriptors.per_frame_layout, slot_count)?;
            let gbuffer_sets = descriptors.allocate_sets(descriptors.gbuffer_layout, slot_count)?;
            let max_lights = config.max_lights as usize;
            let mut slots = Vec::with_capacity(slot_count);
            for (index, (&per_frame_set, &gbuffer_set)) in per_frame_sets.iter().zip(&gbuffer_sets).enumerate() {
                let slot = FrameSlot::new(
                    &ctx,
                    &memory,
                    &descriptors,
                    per_frame_set,
                    gbuffer_set,
                    index,
                    max_lights,
                    max_lights,
                    config.timing_queries,
                )?;
                write_gbuffer_set(&slot, &descriptors, &targets);
                slots.push(slot);
            }

            log::info!(
                "renderer ready: {} frame slots, {} post effects",
                slots.len(),
                post.effects().len()
            );

            let (commands_tx, commands_rx) = channel::unbounded();
            Ok(Self {
                config,
                window_extent,
                resize_requested: false,
                frame_counter: 0,
                commands_tx,
                commands_rx,
                last_timings: Vec::new(),
                scene: None,
                targets: Some(targets),
                slots,
                post,
                scene_pipelines,
                pipeline_cache,
                bindless,
                descriptors,
                commands,
                swapchain,
                surface,
                deletion,
                memory,
                ctx,
            })
        }
    }

    /// Upload `builder`'s meshes and textures, render the shadow maps once
    /// and copy lights and light-space matrices into every frame slot.
    pub fn load_scene(&mut self, builder: SceneBuilder) -> Result<()> {
        if self.scene.is_some() {
            return Err(RenderError::Unsupported("a scene is already loaded".to_string()));
        }
        let light_count = builder.lights().len();
        if light_count > self.config.max_lights as usize {
            return Err(RenderError::Unsupported(format!(
                "{light_count} lights, at most {} supported",
                self.config.max_lights
            )));
        }

        self.ctx.wait_idle()?;
        // SAFETY: the device is idle, so no submission reads the bindless
        // set or the per-frame buffers while they are written.
        unsafe {
            let mut scene = builder.upload(&self.ctx, &self.memory, &self.commands, &mut self.bindless)?;
            let shadows = match generate_shadow_maps(
                &self.ctx,
                &self.memory,
                &self.commands,
                &self.pipeline_cache,
                &mut self.bindless,
                &self.config,
                &mut scene,
            ) {
                Ok(shadows) => shadows,
                Err(e) => {
                    scene.destroy(&self.memory);
                    return Err(e);
                }
            };

            let textures = std::mem::take(&mut scene.textures);
            self.deletion.push("scene textures", move |_: &VulkanContext, memory: &MemoryManager| {
                for texture in textures {
                    memory.destroy_image(texture);
                }
            });
            self.deletion.push("shadow maps", move |ctx: &VulkanContext, memory: &MemoryManager| {
                shadows.destroy(ctx, memory)
            });

            for slot in &mut self.slots {
                slot.lights.write(0, scene.lights.as_slice())?;
                slot.light_matrices.write(0, scene.light_matrices.as_slice())?;
            }

            log::info!(
                "scene loaded: {} meshes, {} directional and {} point lights",
                scene.meshes.len(),
                scene.lights.directional_count(),
                scene.lights.point_count()
            );
            self.scene = Some(scene);
        }
        Ok(())
    }

    /// Record the new window size; the swapchain follows on the next frame.
    pub fn resize(&mut self, width: u32, height: u32) {
        self.window_extent = vk::Extent2D { width, height };
        self.resize_requested = true;
    }

    /// Queue for effect commands from other threads or the input layer.
    /// Drained at the start of every frame.
    pub fn command_sender(&self) -> Sender<EffectCommand> {
        self.commands_tx.clone()
    }

    /// Apply an effect command now (between frames) and return the
    /// effect's enabled state.
    pub fn apply(&mut self, command: EffectCommand) -> Result<bool> {
        self.post.apply(command)
    }

    pub fn post_chain(&self) -> &PostChain {
        &self.post
    }

    /// Pass timings of the most recently completed frame, in milliseconds.
    pub fn timings(&self) -> &[(String, f64)] {
        &self.last_timings
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.swapchain.extent
    }

    fn drain_commands(&mut self) {
        while let Ok(command) = self.commands_rx.try_recv() {
            if let Err(e) = self.post.apply(command) {
                log::warn!("effect command ignored: {e}");
            }
        }
    }

    pub fn draw_frame(&mut self, camera: &CameraMatrices) -> Result<FrameOutcome> {
        self.drain_commands();

        if self.window_extent.width == 0 || self.window_extent.height == 0 {
            return Ok(FrameOutcome::Skipped);
        }
        if self.resize_requested {
            return self.recreate().map(FrameOutcome::Recreated);
        }

        let slot_index = slot_for_frame(self.frame_counter, self.slots.len());

        // SAFETY: the slot's fence is waited on before anything it owns is
        // touched; all recorded objects live until the device is idle.
        unsafe {
            let slot = &mut self.slots[slot_index];
            slot.wait(&self.ctx)?;
            if slot.timing_pending {
                slot.timing_pending = false;
                self.last_timings = slot.timing.fetch(&self.ctx.device)?;
                for (label, ms) in &self.last_timings {
                    log::debug!("{label}: {ms:.3} ms");
                }
            }

            let image_index = match self.swapchain.acquire_next_image(&self.ctx, slot.image_available)? {
                AcquireOutcome::Acquired(index) => index,
                AcquireOutcome::Stale => return self.recreate().map(FrameOutcome::Recreated),
            };

            slot.tracker.begin_recording()?;
            if let Err(e) = self.record_slot(slot_index, image_index as usize, camera) {
                self.slots[slot_index].tracker.abandon();
                return Err(e);
            }

            // The fence is reset only once a recorded buffer is ready to go,
            // so every early return above leaves it signalled.
            let slot = &mut self.slots[slot_index];
            let submitted = slot.reset_fence(&self.ctx).and_then(|()| {
                self.commands.submit_frame(
                    &self.ctx,
                    slot_index,
                    slot.image_available,
                    slot.render_finished,
                    slot.in_flight,
                )
            });
            if let Err(e) = submitted {
                slot.tracker.abandon();
                slot.restore_fence(&self.ctx)?;
                return Err(e);
            }
            slot.tracker.submitted()?;
            slot.timing_pending = true;
            self.frame_counter += 1;

            let presented = self.swapchain.present(&self.ctx, image_index, slot.render_finished)?;
            if !presented || self.resize_requested {
                return self.recreate().map(FrameOutcome::Recreated);
            }
        }
        Ok(FrameOutcome::Presented)
    }

    /// Record the slot's command buffer from begin to end.
    unsafe fn record_slot(&mut self, slot_index: usize, image_index: usize, camera: &CameraMatrices) -> Result<()> {
        let cmd = self.commands.begin_frame(slot_index)?;
        self.record_frame(cmd, slot_index, image_index, camera)?;
        self.commands.end_frame(slot_index)?;
        self.slots[slot_index].tracker.finish_recording()
    }

    unsafe fn record_frame(
        &mut self,
        cmd: vk::CommandBuffer,
        slot_index: usize,
        image_index: usize,
        camera: &CameraMatrices,
    ) -> Result<()> {
        let Self {
            config,
            scene,
            targets,
            slots,
            post,
            scene_pipelines,
            bindless,
            swapchain,
            ctx,
            ..
        } = self;
        let device = &ctx.device;
        let debug = &ctx.debug;
        let slot = &mut slots[slot_index];
        let targets = targets
            .as_mut()
            .ok_or_else(|| RenderError::Unsupported("screen targets missing".to_string()))?;
        let meshes: &[Mesh] = scene.as_ref().map_or(&[], |s| s.meshes.as_slice());

        let lighting = LightingState {
            directional_count: scene.as_ref().map_or(0, |s| s.lights.directional_count()),
            point_count: scene.as_ref().map_or(0, |s| s.lights.point_count()),
            enable_directional: config.enable_directional_lights,
            enable_point: config.enable_point_lights,
            shadow_far_plane: config.shadow_far_plane,
        };
        slot.camera.write(0, &[CameraUniform::new(camera, &lighting)])?;

        let sets = [bindless.set, slot.per_frame_set, slot.gbuffer_set];
        let extent = targets.extent();
        slot.timing.reset(device, cmd);

        debug.begin_label(cmd, DEPTH_PREPASS_LABEL, PASS_LABEL_COLOR);
        slot.timing.begin(device, cmd, DEPTH_PREPASS_LABEL);
        record_barriers(device, cmd, &targets.prepass_barriers());
        scene_pipelines.record_depth_prepass(device, cmd, meshes, &sets, targets.gbuffer.depth.view, extent);
        slot.timing.end(device, cmd, DEPTH_PREPASS_LABEL);
        debug.end_label(cmd);

        debug.begin_label(cmd, GBUFFER_LABEL, PASS_LABEL_COLOR);
        slot.timing.begin(device, cmd, GBUFFER_LABEL);
        record_barriers(device, cmd, &targets.gbuffer_barriers());
        scene_pipelines.record_gbuffer(device, cmd, meshes, &sets, &targets.gbuffer);
        slot.timing.end(device, cmd, GBUFFER_LABEL);
        debug.end_label(cmd);

        debug.begin_label(cmd, LIGHTING_LABEL, PASS_LABEL_COLOR);
        slot.timing.begin(device, cmd, LIGHTING_LABEL);
        let (barriers, hdr_view) = targets.lighting_barriers();
        record_barriers(device, cmd, &barriers);
        scene_pipelines.record_lighting(device, cmd, &sets, hdr_view, extent);
        slot.timing.end(device, cmd, LIGHTING_LABEL);
        debug.end_label(cmd);

        let swapchain_image = &mut swapchain.images[image_index];
        debug.begin_label(cmd, POST_PROCESSING_LABEL, PASS_LABEL_COLOR);
        slot.timing.begin(device, cmd, POST_PROCESSING_LABEL);
        post.record(device, debug, cmd, &sets, &mut targets.hdr, swapchain_image);
        slot.timing.end(device, cmd, POST_PROCESSING_LABEL);
        debug.end_label(cmd);

        swapchain_image.transition(device, cmd, &Transition::color_to_present());
        Ok(())
    }

    /// Rebuild the swapchain and every screen-sized target at the window's
    /// current size.
    fn recreate(&mut self) -> Result<vk::Extent2D> {
        self.ctx.wait_idle()?;
        self.resize_requested = false;

        // SAFETY: the device is idle; nothing references the old targets.
        unsafe {
            self.surface.refresh_capabilities(&self.ctx)?;
            self.swapchain.recreate(
                &self.ctx,
                &self.surface,
                self.window_extent.width,
                self.window_extent.height,
            )?;
            let extent = self.swapchain.extent;

            let targets = ScreenTargets::new(&self.ctx, &self.memory, extent)?;
            if let Some(old) = self.targets.replace(targets) {
                old.destroy(&self.memory);
            }
            if let Some(targets) = &self.targets {
                for slot in &mut self.slots {
                    write_gbuffer_set(slot, &self.descriptors, targets);
                    slot.recreate_image_available(&self.ctx)?;
                }
            }

            log::info!("swapchain recreated at {}x{}", extent.width, extent.height);
            Ok(extent)
        }
    }
}

unsafe fn write_gbuffer_set(slot: &FrameSlot, descriptors: &DescriptorManager, targets: &ScreenTargets) {
    slot.write_gbuffer_set(
        descriptors,
        targets.gbuffer.albedo.view,
        targets.gbuffer.material.view,
        targets.gbuffer.depth.view,
        targets.hdr.views(),
    );
}

impl Drop for Renderer {
    fn drop(&mut self) {
        if let Err(e) = self.ctx.wait_idle() {
            log::error!("device did not go idle before teardown: {e}");
        }
        // SAFETY: the device is idle and every object below was created on
        // this context; each is destroyed exactly once.
        unsafe {
            let device = &self.ctx.device;
            for slot in self.slots.drain(..) {
                slot.destroy(&self.ctx, &self.memory);
            }
            if let Some(targets) = self.targets.take() {
                targets.destroy(&self.memory);
            }
            if let Some(scene) = self.scene.take() {
                scene.destroy(&self.memory);
            }
            self.post.destroy(device);
            self.scene_pipelines.destroy(device);
            self.pipeline_cache.destroy(device);
            self.deletion.flush(&self.ctx, &self.memory);
            self.bindless.destroy(device);
            self.descriptors.destroy();
            self.commands.destroy();
            self.swapchain.destroy(&self.ctx);
            self.surface.destroy(&self.ctx);
        }
        log::info!("renderer destroyed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::post::chain::{plan, prepare_step};
    use crate::render::targets::Barriers;
    use crate::render::timing::LabelBook;
    use crate::vulkan::TrackedImage;
    use ash::vk::Handle;

    /// Barrier batches of one frame in the order `record_frame` emits them.
    fn replay_frame(targets: &mut ScreenTargets, enabled: &[bool], swapchain: &mut TrackedImage) -> Vec<Barriers> {
        let mut batches = vec![targets.prepass_barriers(), targets.gbuffer_barriers(), targets.lighting_barriers().0];
        for step in plan(enabled) {
            batches.push(prepare_step(&step, &mut targets.hdr, swapchain).barriers);
        }
        let range = swapchain.full_range();
        batches.push(vec![swapchain.plan_transition(&Transition::color_to_present(), range)]);
        batches
    }

    fn swapchain_image() -> TrackedImage {
        let mut image = TrackedImage::unbacked("Swapchain[0]", vk::Format::B8G8R8A8_SRGB, 1);
        image.handle = vk::Image::from_raw(0x5c);
        image
    }

    // ============================================================
    // Frame sequence
    // ============================================================

    #[test]
    fn test_swapchain_written_once_then_presented() {
        for mask in 0u32..8 {
            let enabled: Vec<bool> = (0..3).map(|i| mask & (1 << i) != 0).collect();
            let mut targets = ScreenTargets::unbacked();
            let mut swapchain = swapchain_image();

            for _ in 0..2 {
                let batches = replay_frame(&mut targets, &enabled, &mut swapchain);
                let writes = batches
                    .iter()
                    .flatten()
                    .filter(|b| b.image == swapchain.handle)
                    .filter(|b| b.new_layout == vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
                    .count();
                assert_eq!(writes, 1, "enabled = {enabled:?}");
                assert_eq!(swapchain.layout(), vk::ImageLayout::PRESENT_SRC_KHR);
            }
        }
    }

    #[test]
    fn test_post_steps_sample_what_was_just_written() {
        let mut targets = ScreenTargets::unbacked();
        let mut swapchain = swapchain_image();
        let enabled = [true, false, true, true];
        let batches = replay_frame(&mut targets, &enabled, &mut swapchain);

        // prepass, gbuffer, lighting, one batch per step, present.
        let steps = &batches[3..batches.len() - 1];
        assert_eq!(steps.len(), 3);
        for batch in steps {
            let input = &batch[0];
            assert_eq!(input.old_layout, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
            assert_eq!(input.new_layout, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
            assert_eq!(input.src_access_mask, vk::AccessFlags2::COLOR_ATTACHMENT_WRITE);
        }
        assert_eq!(steps.last().map(|b| b[1].image), Some(swapchain.handle));
    }

    #[test]
    fn test_minimum_query_pool_fits_every_pass() {
        let mut book = LabelBook::new(2 * TIMED_PASS_COUNT);
        for label in PASS_LABELS {
            book.begin(label);
            book.end(label);
        }
        assert_eq!(book.pairs().count(), PASS_LABELS.len());
        assert_eq!(book.used(), 2 * TIMED_PASS_COUNT);
    }
}
