//! Command pools, per-slot command buffers and one-shot submissions.

use ash::vk;

use super::VulkanContext;
use crate::error::{Result, VkResultExt};

/// Command pool and primary buffer owned by one frame slot.
struct SlotCommands {
    pool: vk::CommandPool,
    primary: vk::CommandBuffer,
}

/// Command buffer manager with one pool per frame slot.
pub struct CommandManager {
    slots: Vec<SlotCommands>,
    transient_pool: vk::CommandPool,
    device: ash::Device,
}

impl CommandManager {
    /// Create pools for `slot_count` frame slots plus a transient pool.
    pub unsafe fn new(ctx: &VulkanContext, slot_count: usize) -> Result<Self> {
        let graphics_family = ctx.graphics_family();

        let mut slots = Vec::with_capacity(slot_count);
        for _ in 0..slot_count {
            let pool_info = vk::CommandPoolCreateInfo::default()
                .queue_family_index(graphics_family)
                .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);

            let pool = ctx.device.create_command_pool(&pool_info, None).vk("create command pool")?;

            let alloc_info = vk::CommandBufferAllocateInfo::default()
                .command_pool(pool)
                .level(vk::CommandBufferLevel::PRIMARY)
                .command_buffer_count(1);

            let primary = ctx
                .device
                .allocate_command_buffers(&alloc_info)
                .vk("allocate command buffer")?[0];

            slots.push(SlotCommands { pool, primary });
        }

        let transient_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(graphics_family)
            .flags(vk::CommandPoolCreateFlags::TRANSIENT);

        let transient_pool = ctx
            .device
            .create_command_pool(&transient_info, None)
            .vk("create transient pool")?;

        Ok(Self {
            slots,
            transient_pool,
            device: ctx.device.clone(),
        })
    }

    /// Reset and begin the slot's primary buffer. The slot's fence must
    /// have signalled.
    pub unsafe fn begin_frame(&self, slot: usize) -> Result<vk::CommandBuffer> {
        let primary = self.slots[slot].primary;

        self.device
            .reset_command_buffer(primary, vk::CommandBufferResetFlags::empty())
            .vk("reset command buffer")?;

        let begin_info = vk::CommandBufferBeginInfo::default().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        self.device
            .begin_command_buffer(primary, &begin_info)
            .vk("begin command buffer")?;

        Ok(primary)
    }

    pub unsafe fn end_frame(&self, slot: usize) -> Result<()> {
        self.device
            .end_command_buffer(self.slots[slot].primary)
            .vk("end command buffer")
    }

    /// Submit the slot's buffer: wait for the acquired image before color
    /// output, signal `render_finished` and `fence` on completion.
    pub unsafe fn submit_frame(
        &self,
        ctx: &VulkanContext,
        slot: usize,
        image_available: vk::Semaphore,
        render_finished: vk::Semaphore,
        fence: vk::Fence,
    ) -> Result<()> {
        let waits = [vk::SemaphoreSubmitInfo::default()
            .semaphore(image_available)
            .stage_mask(vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT)];
        let signals = [vk::SemaphoreSubmitInfo::default()
            .semaphore(render_finished)
            .stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS)];
        let buffers = [vk::CommandBufferSubmitInfo::default().command_buffer(self.slots[slot].primary)];

        let submit = vk::SubmitInfo2::default()
            .wait_semaphore_infos(&waits)
            .command_buffer_infos(&buffers)
            .signal_semaphore_infos(&signals);

        ctx.device
            .queue_submit2(ctx.graphics_queue, &[submit], fence)
            .vk("submit frame")
    }

    /// Begin a single-use command buffer.
    pub unsafe fn begin_single_time(&self) -> Result<vk::CommandBuffer> {
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.transient_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);

        let cmd = self
            .device
            .allocate_command_buffers(&alloc_info)
            .vk("allocate command buffer")?[0];

        let begin_info = vk::CommandBufferBeginInfo::default().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        self.device
            .begin_command_buffer(cmd, &begin_info)
            .vk("begin command buffer")?;

        Ok(cmd)
    }

    /// End and submit a single-use command buffer, blocking on a dedicated
    /// fence until the GPU is done with it.
    pub unsafe fn end_single_time(&self, ctx: &VulkanContext, cmd: vk::CommandBuffer) -> Result<()> {
        self.device.end_command_buffer(cmd).vk("end command buffer")?;

        let fence = self
            .device
            .create_fence(&vk::FenceCreateInfo::default(), None)
            .vk("create one-shot fence")?;

        let buffers = [vk::CommandBufferSubmitInfo::default().command_buffer(cmd)];
        let submit = vk::SubmitInfo2::default().command_buffer_infos(&buffers);

        let result = ctx
            .device
            .queue_submit2(ctx.graphics_queue, &[submit], fence)
            .vk("submit one-shot commands")
            .and_then(|()| {
                ctx.device
                    .wait_for_fences(&[fence], true, u64::MAX)
                    .vk("wait for one-shot fence")
            });

        self.device.destroy_fence(fence, None);
        self.device.free_command_buffers(self.transient_pool, &[cmd]);
        result
    }

    /// Destroy all command pools.
    pub unsafe fn destroy(&mut self) {
        for slot in self.slots.drain(..) {
            self.device.destroy_command_pool(slot.pool, None);
        }
        self.device.destroy_command_pool(self.transient_pool, None);
        self.transient_pool = vk::CommandPool::null();
    }
}
