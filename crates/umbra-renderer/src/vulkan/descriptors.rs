//! Descriptor set layouts for the per-frame and G-buffer sets, and the
//! pool they are allocated from.
//!
//! Set numbering shared with every shader:
//! - set 0: global (samplers + bindless textures), see [`super::bindless`]
//! - set 1: per-frame (camera uniform, lights, light-space matrices)
//! - set 2: G-buffer (albedo, material, depth, HDR ping-pong pair)

use ash::vk;

use super::VulkanContext;
use crate::error::{Result, VkResultExt};

pub const GLOBAL_SET: u32 = 0;
pub const PER_FRAME_SET: u32 = 1;
pub const GBUFFER_SET: u32 = 2;

/// Bindings inside the per-frame set.
pub mod per_frame {
    pub const CAMERA: u32 = 0;
    pub const LIGHTS: u32 = 1;
    pub const LIGHT_MATRICES: u32 = 2;
}

/// Bindings inside the G-buffer set.
pub mod gbuffer {
    pub const ALBEDO: u32 = 0;
    pub const MATERIAL: u32 = 1;
    pub const DEPTH: u32 = 2;
    /// `texture2D hdr[2]`, indexed by the ping-pong read index.
    pub const HDR: u32 = 3;
}

/// Manages the descriptor pool and the layouts of sets 1 and 2.
pub struct DescriptorManager {
    pool: vk::DescriptorPool,
    pub per_frame_layout: vk::DescriptorSetLayout,
    pub gbuffer_layout: vk::DescriptorSetLayout,
    device: ash::Device,
}

impl DescriptorManager {
    /// Create layouts and a pool sized for `slot_count` frame slots.
    pub unsafe fn new(ctx: &VulkanContext, slot_count: u32) -> Result<Self> {
        let pool_sizes = [
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::UNIFORM_BUFFER,
                descriptor_count: slot_count,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::STORAGE_BUFFER,
                descriptor_count: 2 * slot_count,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::SAMPLED_IMAGE,
                descriptor_count: 5 * slot_count,
            },
        ];

        let pool_info = vk::DescriptorPoolCreateInfo::default()
            .pool_sizes(&pool_sizes)
            .max_sets(2 * slot_count);

        let pool = ctx
            .device
            .create_descriptor_pool(&pool_info, None)
            .vk("create descriptor pool")?;

        let per_frame_bindings = [
            vk::DescriptorSetLayoutBinding::default()
                .binding(per_frame::CAMERA)
                .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                .descriptor_count(1)
                .stage_flags(vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT),
            vk::DescriptorSetLayoutBinding::default()
                .binding(per_frame::LIGHTS)
                .descriptor_type(vk::DescriptorType::STORAGE_BUFFER)
                .descriptor_count(1)
                .stage_flags(vk::ShaderStageFlags::FRAGMENT),
            vk::DescriptorSetLayoutBinding::default()
                .binding(per_frame::LIGHT_MATRICES)
                .descriptor_type(vk::DescriptorType::STORAGE_BUFFER)
                .descriptor_count(1)
                .stage_flags(vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT),
        ];
        let per_frame_layout = create_layout(ctx, &per_frame_bindings)?;

        let sampled = |binding: u32, count: u32| {
            vk::DescriptorSetLayoutBinding::default()
                .binding(binding)
                .descriptor_type(vk::DescriptorType::SAMPLED_IMAGE)
                .descriptor_count(count)
                .stage_flags(vk::ShaderStageFlags::FRAGMENT)
        };
        let gbuffer_bindings = [
            sampled(gbuffer::ALBEDO, 1),
            sampled(gbuffer::MATERIAL, 1),
            sampled(gbuffer::DEPTH, 1),
            sampled(gbuffer::HDR, 2),
        ];
        let gbuffer_layout = create_layout(ctx, &gbuffer_bindings)?;

        Ok(Self {
            pool,
            per_frame_layout,
            gbuffer_layout,
            device: ctx.device.clone(),
        })
    }

    /// Allocate `count` sets of one layout.
    pub unsafe fn allocate_sets(&self, layout: vk::DescriptorSetLayout, count: usize) -> Result<Vec<vk::DescriptorSet>> {
        let layouts = vec![layout; count];
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(self.pool)
            .set_layouts(&layouts);

        self.device
            .allocate_descriptor_sets(&alloc_info)
            .vk("allocate descriptor sets")
    }

    /// Point a uniform or storage buffer binding at a whole buffer.
    pub unsafe fn write_buffer(
        &self,
        set: vk::DescriptorSet,
        binding: u32,
        ty: vk::DescriptorType,
        buffer: vk::Buffer,
    ) {
        let buffer_info = [vk::DescriptorBufferInfo {
            buffer,
            offset: 0,
            range: vk::WHOLE_SIZE,
        }];

        let write = vk::WriteDescriptorSet::default()
            .dst_set(set)
            .dst_binding(binding)
            .dst_array_element(0)
            .descriptor_type(ty)
            .buffer_info(&buffer_info);

        self.device.update_descriptor_sets(&[write], &[]);
    }

    /// Write consecutive sampled-image elements of one binding.
    pub unsafe fn write_sampled_images(
        &self,
        set: vk::DescriptorSet,
        binding: u32,
        views: &[vk::ImageView],
    ) {
        let image_infos: Vec<vk::DescriptorImageInfo> = views
            .iter()
            .map(|&view| {
                vk::DescriptorImageInfo::default()
                    .image_view(view)
                    .image_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
            })
            .collect();

        let write = vk::WriteDescriptorSet::default()
            .dst_set(set)
            .dst_binding(binding)
            .dst_array_element(0)
            .descriptor_type(vk::DescriptorType::SAMPLED_IMAGE)
            .image_info(&image_infos);

        self.device.update_descriptor_sets(&[write], &[]);
    }

    /// Destroy all resources. Sets allocated from the pool go with it.
    pub unsafe fn destroy(&mut self) {
        self.device.destroy_descriptor_set_layout(self.per_frame_layout, None);
        self.device.destroy_descriptor_set_layout(self.gbuffer_layout, None);
        self.device.destroy_descriptor_pool(self.pool, None);
    }
}

/// Create a descriptor set layout from bindings.
pub unsafe fn create_layout(
    ctx: &VulkanContext,
    bindings: &[vk::DescriptorSetLayoutBinding],
) -> Result<vk::DescriptorSetLayout> {
    let layout_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(bindings);
    ctx.device
        .create_descriptor_set_layout(&layout_info, None)
        .vk("create descriptor set layout")
}

/// Create a pipeline layout over `set_layouts` with optional push constants.
pub unsafe fn create_pipeline_layout(
    device: &ash::Device,
    set_layouts: &[vk::DescriptorSetLayout],
    push_constant_ranges: &[vk::PushConstantRange],
) -> Result<vk::PipelineLayout> {
    let layout_info = vk::PipelineLayoutCreateInfo::default()
        .set_layouts(set_layouts)
        .push_constant_ranges(push_constant_ranges);

    device
        .create_pipeline_layout(&layout_info, None)
        .vk("create pipeline layout")
}
