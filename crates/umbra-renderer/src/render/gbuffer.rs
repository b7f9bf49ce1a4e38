//! Screen-sized geometry targets: depth plus the two G-buffer colors.

use ash::vk;

use crate::error::Result;
use crate::vulkan::memory::ImageDesc;
use crate::vulkan::{MemoryManager, TrackedImage, VulkanContext};

pub const ALBEDO_FORMAT: vk::Format = vk::Format::R8G8B8A8_UNORM;
/// Normal (xy, octahedral), roughness, metalness.
pub const MATERIAL_FORMAT: vk::Format = vk::Format::R16G16B16A16_SFLOAT;

pub struct GBuffer {
    pub depth: TrackedImage,
    pub albedo: TrackedImage,
    pub material: TrackedImage,
}

impl GBuffer {
    pub unsafe fn new(ctx: &VulkanContext, memory: &MemoryManager, extent: vk::Extent2D) -> Result<Self> {
        let depth = memory.create_image(&ImageDesc::depth_target("DepthBuffer", extent, ctx.depth_format))?;
        let albedo = match memory.create_image(&ImageDesc::color_target("GBufferAlbedo", extent, ALBEDO_FORMAT)) {
            Ok(image) => image,
            Err(e) => {
                memory.destroy_image(depth);
                return Err(e);
            }
        };
        let material = match memory.create_image(&ImageDesc::color_target("GBufferMaterial", extent, MATERIAL_FORMAT)) {
            Ok(image) => image,
            Err(e) => {
                memory.destroy_image(depth);
                memory.destroy_image(albedo);
                return Err(e);
            }
        };

        for image in [&depth, &albedo, &material] {
            ctx.debug.name_object(image.handle, &image.name);
        }

        Ok(Self { depth, albedo, material })
    }

    pub fn color_formats() -> [vk::Format; 2] {
        [ALBEDO_FORMAT, MATERIAL_FORMAT]
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.depth.extent
    }

    pub unsafe fn destroy(self, memory: &MemoryManager) {
        memory.destroy_image(self.depth);
        memory.destroy_image(self.albedo);
        memory.destroy_image(self.material);
    }
}
