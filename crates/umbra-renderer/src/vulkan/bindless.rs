//! Global descriptor set: samplers and the bindless texture array.
//!
//! Binding 1 is `PARTIALLY_BOUND | VARIABLE_DESCRIPTOR_COUNT |
//! UPDATE_AFTER_BIND`, so the array can grow while earlier elements stay
//! bound. Only elements registered since the last flush are written.
//!
//! Shaders alias binding 1 as both `texture2D textures[]` and
//! `textureCube cubeTextures[]`; point-light shadow maps live in the same
//! array as material textures.

use ash::vk;
use std::ops::Range;

use super::{Samplers, VulkanContext};
use crate::error::{RenderError, Result, VkResultExt};

/// Capacity of the texture array.
pub const MAX_BINDLESS_TEXTURES: u32 = 1024;

pub const SAMPLERS_BINDING: u32 = 0;
pub const TEXTURES_BINDING: u32 = 1;
pub const SAMPLER_COUNT: u32 = 2;

/// CPU-side view of the texture array: which elements exist and which
/// still need writing.
#[derive(Debug, Default)]
pub struct TextureSlots {
    views: Vec<vk::ImageView>,
    written: usize,
}

impl TextureSlots {
    /// Append a view and return its array index.
    pub fn register(&mut self, view: vk::ImageView) -> Option<u32> {
        if self.views.len() >= MAX_BINDLESS_TEXTURES as usize {
            return None;
        }
        self.views.push(view);
        Some((self.views.len() - 1) as u32)
    }

    pub fn len(&self) -> usize {
        self.views.len()
    }

    pub fn is_empty(&self) -> bool {
        self.views.is_empty()
    }

    /// Elements appended since the last [`Self::mark_written`].
    pub fn pending(&self) -> Range<usize> {
        self.written..self.views.len()
    }

    pub fn pending_views(&self) -> &[vk::ImageView] {
        &self.views[self.pending()]
    }

    pub fn mark_written(&mut self) {
        self.written = self.views.len();
    }
}

pub struct BindlessTextures {
    pub layout: vk::DescriptorSetLayout,
    pool: vk::DescriptorPool,
    pub set: vk::DescriptorSet,
    slots: TextureSlots,
}

impl BindlessTextures {
    pub unsafe fn new(ctx: &VulkanContext, samplers: &Samplers) -> Result<Self> {
        let bindings = [
            vk::DescriptorSetLayoutBinding::default()
                .binding(SAMPLERS_BINDING)
                .descriptor_type(vk::DescriptorType::SAMPLER)
                .descriptor_count(SAMPLER_COUNT)
                .stage_flags(vk::ShaderStageFlags::FRAGMENT),
            vk::DescriptorSetLayoutBinding::default()
                .binding(TEXTURES_BINDING)
                .descriptor_type(vk::DescriptorType::SAMPLED_IMAGE)
                .descriptor_count(MAX_BINDLESS_TEXTURES)
                .stage_flags(vk::ShaderStageFlags::FRAGMENT),
        ];

        // Variable count must be on the highest binding
        let binding_flags = [
            vk::DescriptorBindingFlags::empty(),
            vk::DescriptorBindingFlags::PARTIALLY_BOUND
                | vk::DescriptorBindingFlags::VARIABLE_DESCRIPTOR_COUNT
                | vk::DescriptorBindingFlags::UPDATE_AFTER_BIND,
        ];

        let mut binding_flags_info =
            vk::DescriptorSetLayoutBindingFlagsCreateInfo::default().binding_flags(&binding_flags);

        let layout_info = vk::DescriptorSetLayoutCreateInfo::default()
            .bindings(&bindings)
            .flags(vk::DescriptorSetLayoutCreateFlags::UPDATE_AFTER_BIND_POOL)
            .push_next(&mut binding_flags_info);

        let layout = ctx
            .device
            .create_descriptor_set_layout(&layout_info, None)
            .vk("create bindless layout")?;

        let pool_sizes = [
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::SAMPLER,
                descriptor_count: SAMPLER_COUNT,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::SAMPLED_IMAGE,
                descriptor_count: MAX_BINDLESS_TEXTURES,
            },
        ];

        let pool_info = vk::DescriptorPoolCreateInfo::default()
            .pool_sizes(&pool_sizes)
            .max_sets(1)
            .flags(vk::DescriptorPoolCreateFlags::UPDATE_AFTER_BIND);

        let pool = ctx
            .device
            .create_descriptor_pool(&pool_info, None)
            .vk("create bindless pool")?;

        let layouts = [layout];
        let counts = [MAX_BINDLESS_TEXTURES];
        let mut variable_count =
            vk::DescriptorSetVariableDescriptorCountAllocateInfo::default().descriptor_counts(&counts);
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(pool)
            .set_layouts(&layouts)
            .push_next(&mut variable_count);

        let set = ctx
            .device
            .allocate_descriptor_sets(&alloc_info)
            .vk("allocate bindless set")?[0];

        let sampler_infos: Vec<_> = samplers
            .as_array()
            .iter()
            .map(|&sampler| vk::DescriptorImageInfo::default().sampler(sampler))
            .collect();
        let write = vk::WriteDescriptorSet::default()
            .dst_set(set)
            .dst_binding(SAMPLERS_BINDING)
            .dst_array_element(0)
            .descriptor_type(vk::DescriptorType::SAMPLER)
            .image_info(&sampler_infos);
        ctx.device.update_descriptor_sets(&[write], &[]);

        Ok(Self {
            layout,
            pool,
            set,
            slots: TextureSlots::default(),
        })
    }

    /// Register a view (in `SHADER_READ_ONLY_OPTIMAL` when sampled) and
    /// return its index. Visible to shaders after [`Self::flush`].
    pub fn register(&mut self, view: vk::ImageView) -> Result<u32> {
        self.slots.register(view).ok_or_else(|| {
            RenderError::Unsupported(format!("more than {MAX_BINDLESS_TEXTURES} bindless textures"))
        })
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Write the elements registered since the last flush.
    pub unsafe fn flush(&mut self, device: &ash::Device) {
        let pending = self.slots.pending();
        if pending.is_empty() {
            return;
        }

        let image_infos: Vec<vk::DescriptorImageInfo> = self
            .slots
            .pending_views()
            .iter()
            .map(|&view| {
                vk::DescriptorImageInfo::default()
                    .image_view(view)
                    .image_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
            })
            .collect();

        let write = vk::WriteDescriptorSet::default()
            .dst_set(self.set)
            .dst_binding(TEXTURES_BINDING)
            .dst_array_element(pending.start as u32)
            .descriptor_type(vk::DescriptorType::SAMPLED_IMAGE)
            .image_info(&image_infos);

        device.update_descriptor_sets(&[write], &[]);
        log::debug!("bindless textures {}..{} written", pending.start, pending.end);
        self.slots.mark_written();
    }

    pub unsafe fn destroy(&mut self, device: &ash::Device) {
        device.destroy_descriptor_pool(self.pool, None);
        device.destroy_descriptor_set_layout(self.layout, None);
    }
}
