//! The two samplers every shader indexes from set 0, binding 0.

use ash::vk;

use super::VulkanContext;
use crate::error::{Result, VkResultExt};

/// Index of the trilinear, repeating sampler (material textures).
pub const LINEAR_REPEAT: u32 = 0;
/// Index of the linear, edge-clamped sampler (screen targets, shadow maps).
pub const LINEAR_CLAMP: u32 = 1;

pub struct Samplers {
    pub linear_repeat: vk::Sampler,
    pub linear_clamp: vk::Sampler,
}

impl Samplers {
    pub unsafe fn new(ctx: &VulkanContext) -> Result<Self> {
        let max_anisotropy = ctx.device_properties.limits.max_sampler_anisotropy.min(16.0);

        let repeat_info = vk::SamplerCreateInfo::default()
            .mag_filter(vk::Filter::LINEAR)
            .min_filter(vk::Filter::LINEAR)
            .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
            .address_mode_u(vk::SamplerAddressMode::REPEAT)
            .address_mode_v(vk::SamplerAddressMode::REPEAT)
            .address_mode_w(vk::SamplerAddressMode::REPEAT)
            .anisotropy_enable(max_anisotropy > 1.0)
            .max_anisotropy(max_anisotropy)
            .max_lod(vk::LOD_CLAMP_NONE);

        let clamp_info = vk::SamplerCreateInfo::default()
            .mag_filter(vk::Filter::LINEAR)
            .min_filter(vk::Filter::LINEAR)
            .mipmap_mode(vk::SamplerMipmapMode::NEAREST)
            .address_mode_u(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .address_mode_v(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .address_mode_w(vk::SamplerAddressMode::CLAMP_TO_EDGE);

        let linear_repeat = ctx.device.create_sampler(&repeat_info, None).vk("create sampler")?;
        let linear_clamp = ctx.device.create_sampler(&clamp_info, None).vk("create sampler")?;

        ctx.debug.name_object(linear_repeat, "LinearRepeatSampler");
        ctx.debug.name_object(linear_clamp, "LinearClampSampler");

        Ok(Self {
            linear_repeat,
            linear_clamp,
        })
    }

    /// Samplers in binding order.
    pub fn as_array(&self) -> [vk::Sampler; 2] {
        [self.linear_repeat, self.linear_clamp]
    }

    pub unsafe fn destroy(&self, device: &ash::Device) {
        device.destroy_sampler(self.linear_repeat, None);
        device.destroy_sampler(self.linear_clamp, None);
    }
}
