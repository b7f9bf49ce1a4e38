//! Frame slots: the per-frame-in-flight resources and their reuse rules.

use ash::vk;

use super::timing::TimingQueryPool;
use super::uniforms::CameraUniform;
use crate::error::{RenderError, Result, VkResultExt};
use crate::scene::Light;
use crate::vulkan::descriptors::{gbuffer, per_frame, DescriptorManager};
use crate::vulkan::{Buffer, MemoryManager, VulkanContext};

/// Where a slot is in its submit cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// Fence observed signalled; command buffer and buffers may be touched.
    Ready,
    Recording,
    /// Recorded, not yet submitted.
    Executable,
    /// Owned by the GPU until the fence signals.
    Submitted,
}

/// State machine guarding a slot's command buffer against reuse while the
/// GPU may still read it.
#[derive(Debug, Clone)]
pub struct SlotTracker {
    slot: usize,
    state: SlotState,
}

impl SlotTracker {
    pub fn new(slot: usize) -> Self {
        Self {
            slot,
            state: SlotState::Ready,
        }
    }

    pub fn state(&self) -> SlotState {
        self.state
    }

    fn expect(&self, expected: SlotState, reason: &'static str) -> Result<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(RenderError::FrameSlot {
                slot: self.slot,
                reason,
            })
        }
    }

    /// The slot's fence was waited on and found signalled.
    pub fn fence_signaled(&mut self) {
        if self.state == SlotState::Submitted {
            self.state = SlotState::Ready;
        }
    }

    pub fn begin_recording(&mut self) -> Result<()> {
        self.expect(SlotState::Ready, "recording before the previous submission completed")?;
        self.state = SlotState::Recording;
        Ok(())
    }

    pub fn finish_recording(&mut self) -> Result<()> {
        self.expect(SlotState::Recording, "finishing a buffer that is not recording")?;
        self.state = SlotState::Executable;
        Ok(())
    }

    pub fn submitted(&mut self) -> Result<()> {
        self.expect(SlotState::Executable, "submitting a buffer that was not recorded")?;
        self.state = SlotState::Submitted;
        Ok(())
    }

    /// Drop a frame that failed before reaching the queue. A buffer already
    /// owned by the GPU stays submitted.
    pub fn abandon(&mut self) {
        if matches!(self.state, SlotState::Recording | SlotState::Executable) {
            self.state = SlotState::Ready;
        }
    }

    /// Whether the slot has work on the GPU whose results are not yet
    /// collected (e.g. timestamps).
    pub fn is_submitted(&self) -> bool {
        self.state == SlotState::Submitted
    }
}

/// Round-robin slot selection.
pub fn slot_for_frame(frame_counter: u64, slot_count: usize) -> usize {
    (frame_counter % slot_count as u64) as usize
}

/// Everything one frame in flight owns exclusively.
pub struct FrameSlot {
    pub image_available: vk::Semaphore,
    pub render_finished: vk::Semaphore,
    pub in_flight: vk::Fence,
    pub camera: Buffer,
    pub lights: Buffer,
    pub light_matrices: Buffer,
    pub per_frame_set: vk::DescriptorSet,
    pub gbuffer_set: vk::DescriptorSet,
    pub timing: TimingQueryPool,
    pub tracker: SlotTracker,
    /// The last submission recorded timestamps that are not yet read.
    pub timing_pending: bool,
}

impl FrameSlot {
    /// Create sync objects, per-frame buffers sized for `light_capacity`
    /// lights and `matrix_capacity` matrices, and point the slot's
    /// per-frame set at them. The fence starts signalled.
    #[allow(clippy::too_many_arguments)]
    pub unsafe fn new(
        ctx: &VulkanContext,
        memory: &MemoryManager,
        descriptors: &DescriptorManager,
        per_frame_set: vk::DescriptorSet,
        gbuffer_set: vk::DescriptorSet,
        index: usize,
        light_capacity: usize,
        matrix_capacity: usize,
        timing_queries: u32,
    ) -> Result<Self> {
        let image_available = create_semaphore(ctx)?;
        let render_finished = create_semaphore(ctx)?;
        let in_flight = create_signaled_fence(ctx)?;

        let camera = memory.create_uniform_buffer(
            std::mem::size_of::<CameraUniform>() as vk::DeviceSize,
            &format!("Camera[{index}]"),
        )?;
        let lights = memory.create_storage_buffer(
            (light_capacity.max(1) * std::mem::size_of::<Light>()) as vk::DeviceSize,
            &format!("Lights[{index}]"),
        )?;
        let light_matrices = memory.create_storage_buffer(
            (matrix_capacity.max(1) * std::mem::size_of::<glam::Mat4>()) as vk::DeviceSize,
            &format!("LightMatrices[{index}]"),
        )?;

        descriptors.write_buffer(per_frame_set, per_frame::CAMERA, vk::DescriptorType::UNIFORM_BUFFER, camera.handle);
        descriptors.write_buffer(per_frame_set, per_frame::LIGHTS, vk::DescriptorType::STORAGE_BUFFER, lights.handle);
        descriptors.write_buffer(
            per_frame_set,
            per_frame::LIGHT_MATRICES,
            vk::DescriptorType::STORAGE_BUFFER,
            light_matrices.handle,
        );

        let timing = TimingQueryPool::new(ctx, timing_queries)?;

        ctx.debug.name_object(in_flight, &format!("InFlight[{index}]"));

        Ok(Self {
            image_available,
            render_finished,
            in_flight,
            camera,
            lights,
            light_matrices,
            per_frame_set,
            gbuffer_set,
            timing,
            tracker: SlotTracker::new(index),
            timing_pending: false,
        })
    }

    /// Block until the slot's last submission is done.
    pub unsafe fn wait(&mut self, ctx: &VulkanContext) -> Result<()> {
        ctx.device
            .wait_for_fences(&[self.in_flight], true, u64::MAX)
            .vk("wait for in-flight fence")?;
        self.tracker.fence_signaled();
        Ok(())
    }

    pub unsafe fn reset_fence(&self, ctx: &VulkanContext) -> Result<()> {
        ctx.device.reset_fences(&[self.in_flight]).vk("reset in-flight fence")
    }

    /// Swap in a fresh signalled fence after a failed submit left the old
    /// one reset with nothing to signal it.
    pub unsafe fn restore_fence(&mut self, ctx: &VulkanContext) -> Result<()> {
        let fresh = create_signaled_fence(ctx)?;
        ctx.device.destroy_fence(self.in_flight, None);
        self.in_flight = fresh;
        Ok(())
    }

    /// Point the G-buffer set at the current screen targets.
    pub unsafe fn write_gbuffer_set(
        &self,
        descriptors: &DescriptorManager,
        albedo: vk::ImageView,
        material: vk::ImageView,
        depth: vk::ImageView,
        hdr: [vk::ImageView; 2],
    ) {
        descriptors.write_sampled_images(self.gbuffer_set, gbuffer::ALBEDO, &[albedo]);
        descriptors.write_sampled_images(self.gbuffer_set, gbuffer::MATERIAL, &[material]);
        descriptors.write_sampled_images(self.gbuffer_set, gbuffer::DEPTH, &[depth]);
        descriptors.write_sampled_images(self.gbuffer_set, gbuffer::HDR, &hdr);
    }

    /// Replace the image-available semaphore, which a stale acquire may
    /// have left signalled.
    pub unsafe fn recreate_image_available(&mut self, ctx: &VulkanContext) -> Result<()> {
        let fresh = create_semaphore(ctx)?;
        ctx.device.destroy_semaphore(self.image_available, None);
        self.image_available = fresh;
        Ok(())
    }

    /// Destroy everything the slot owns. The GPU must be idle.
    pub unsafe fn destroy(self, ctx: &VulkanContext, memory: &MemoryManager) {
        ctx.device.destroy_semaphore(self.image_available, None);
        ctx.device.destroy_semaphore(self.render_finished, None);
        ctx.device.destroy_fence(self.in_flight, None);
        memory.destroy_buffer(self.camera);
        memory.destroy_buffer(self.lights);
        memory.destroy_buffer(self.light_matrices);
        self.timing.destroy(&ctx.device);
    }
}

unsafe fn create_semaphore(ctx: &VulkanContext) -> Result<vk::Semaphore> {
    ctx.device
        .create_semaphore(&vk::SemaphoreCreateInfo::default(), None)
        .vk("create semaphore")
}

unsafe fn create_signaled_fence(ctx: &VulkanContext) -> Result<vk::Fence> {
    ctx.device
        .create_fence(
            &vk::FenceCreateInfo::default().flags(vk::FenceCreateFlags::SIGNALED),
            None,
        )
        .vk("create in-flight fence")
}

#[cfg(test)]
mod tests {
    use super::*;

    /// GPU that completes submissions `latency` frames after they were made.
    struct FakeQueue {
        latency: u64,
        in_flight: Vec<(usize, u64)>,
    }

    impl FakeQueue {
        fn complete_up_to(&mut self, frame: u64, trackers: &mut [SlotTracker]) {
            self.in_flight.retain(|&(slot, submitted_at)| {
                if submitted_at + self.latency <= frame {
                    trackers[slot].fence_signaled();
                    false
                } else {
                    true
                }
            });
        }
    }

    // ============================================================
    // SlotTracker
    // ============================================================

    #[test]
    fn test_slot_cycle() {
        let mut tracker = SlotTracker::new(0);
        tracker.begin_recording().unwrap();
        tracker.finish_recording().unwrap();
        tracker.submitted().unwrap();
        assert!(tracker.is_submitted());
        tracker.fence_signaled();
        assert_eq!(tracker.state(), SlotState::Ready);
    }

    #[test]
    fn test_rerecord_before_fence_is_rejected() {
        let mut tracker = SlotTracker::new(2);
        tracker.begin_recording().unwrap();
        tracker.finish_recording().unwrap();
        tracker.submitted().unwrap();

        let err = tracker.begin_recording().unwrap_err();
        assert!(matches!(err, RenderError::FrameSlot { slot: 2, .. }));
    }

    #[test]
    fn test_submit_requires_recorded_buffer() {
        let mut tracker = SlotTracker::new(0);
        assert!(tracker.submitted().is_err());
        tracker.begin_recording().unwrap();
        assert!(tracker.submitted().is_err());
    }

    #[test]
    fn test_abandoned_frame_keeps_slot_ready() {
        // An acquire that reports a stale swapchain returns before recording.
        let mut tracker = SlotTracker::new(0);
        tracker.fence_signaled();
        assert_eq!(tracker.state(), SlotState::Ready);
        tracker.begin_recording().unwrap();
    }

    #[test]
    fn test_failed_recording_returns_slot_to_ready() {
        let mut tracker = SlotTracker::new(1);
        tracker.begin_recording().unwrap();
        tracker.abandon();
        assert_eq!(tracker.state(), SlotState::Ready);

        tracker.begin_recording().unwrap();
        tracker.finish_recording().unwrap();
        // Submit failed: nothing reached the queue.
        tracker.abandon();
        assert_eq!(tracker.state(), SlotState::Ready);
        tracker.begin_recording().unwrap();
    }

    #[test]
    fn test_abandon_keeps_gpu_owned_slot() {
        let mut tracker = SlotTracker::new(0);
        tracker.begin_recording().unwrap();
        tracker.finish_recording().unwrap();
        tracker.submitted().unwrap();
        tracker.abandon();
        assert!(tracker.is_submitted());
        assert!(tracker.begin_recording().is_err());
    }

    #[test]
    fn test_round_robin_never_reenters_busy_slot() {
        // Waiting on the fence before recording is what the renderer does;
        // with any latency below the slot count the wait never blocks, and
        // the tracker never sees a re-entry.
        for slot_count in 2..=3usize {
            for latency in 1..=slot_count as u64 {
                let mut trackers: Vec<SlotTracker> = (0..slot_count).map(SlotTracker::new).collect();
                let mut queue = FakeQueue {
                    latency,
                    in_flight: Vec::new(),
                };

                for frame in 0..50u64 {
                    let slot = slot_for_frame(frame, slot_count);
                    queue.complete_up_to(frame, &mut trackers);
                    if trackers[slot].is_submitted() {
                        // The fence wait blocks until the GPU catches up.
                        let blocked_until = frame + latency;
                        queue.complete_up_to(blocked_until, &mut trackers);
                    }
                    trackers[slot].begin_recording().unwrap();
                    trackers[slot].finish_recording().unwrap();
                    trackers[slot].submitted().unwrap();
                    queue.in_flight.push((slot, frame));
                }
            }
        }
    }

    #[test]
    fn test_skipping_fence_wait_is_detected() {
        let mut trackers: Vec<SlotTracker> = (0..2).map(SlotTracker::new).collect();
        for frame in 0..2u64 {
            let slot = slot_for_frame(frame, 2);
            trackers[slot].begin_recording().unwrap();
            trackers[slot].finish_recording().unwrap();
            trackers[slot].submitted().unwrap();
        }
        // Frame 2 reuses slot 0 without observing its fence.
        assert!(trackers[slot_for_frame(2, 2)].begin_recording().is_err());
    }

    #[test]
    fn test_slot_for_frame() {
        let slots: Vec<usize> = (0..7).map(|f| slot_for_frame(f, 3)).collect();
        assert_eq!(slots, vec![0, 1, 2, 0, 1, 2, 0]);
    }
}
