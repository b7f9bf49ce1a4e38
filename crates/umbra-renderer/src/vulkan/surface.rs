//! Presentation surface: format, present mode and extent selection.

use ash::vk;

use super::VulkanContext;
use crate::error::{Result, VkResultExt};

/// Wrapper around a Vulkan surface.
pub struct VulkanSurface {
    pub handle: vk::SurfaceKHR,
    pub format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub capabilities: vk::SurfaceCapabilitiesKHR,
}

impl VulkanSurface {
    /// Wrap a surface created alongside the context.
    ///
    /// # Safety
    /// `handle` must belong to `ctx.instance` and outlive this wrapper.
    pub unsafe fn new(ctx: &VulkanContext, handle: vk::SurfaceKHR, vsync: bool) -> Result<Self> {
        let capabilities = ctx
            .surface_loader
            .get_physical_device_surface_capabilities(ctx.physical_device, handle)
            .vk("get surface capabilities")?;

        let formats = ctx
            .surface_loader
            .get_physical_device_surface_formats(ctx.physical_device, handle)
            .vk("get surface formats")?;
        let format = choose_surface_format(&formats);

        let present_modes = ctx
            .surface_loader
            .get_physical_device_surface_present_modes(ctx.physical_device, handle)
            .vk("get present modes")?;
        let present_mode = choose_present_mode(&present_modes, vsync);

        log::info!("surface format {:?}, present mode {:?}", format.format, present_mode);

        Ok(Self {
            handle,
            format,
            present_mode,
            capabilities,
        })
    }

    /// Refresh surface capabilities (e.g., after window resize).
    pub unsafe fn refresh_capabilities(&mut self, ctx: &VulkanContext) -> Result<()> {
        self.capabilities = ctx
            .surface_loader
            .get_physical_device_surface_capabilities(ctx.physical_device, self.handle)
            .vk("refresh surface capabilities")?;
        Ok(())
    }

    /// Get the current extent, clamped to surface capabilities.
    pub fn extent(&self, desired_width: u32, desired_height: u32) -> vk::Extent2D {
        clamp_extent(&self.capabilities, desired_width, desired_height)
    }

    /// Destroy the surface.
    pub unsafe fn destroy(&mut self, ctx: &VulkanContext) {
        ctx.surface_loader.destroy_surface(self.handle, None);
        self.handle = vk::SurfaceKHR::null();
    }
}

/// Prefer B8G8R8A8_SRGB/SRGB_NONLINEAR, then B8G8R8A8_UNORM, then the first offered.
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> vk::SurfaceFormatKHR {
    formats
        .iter()
        .find(|f| {
            f.format == vk::Format::B8G8R8A8_SRGB && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .or_else(|| formats.iter().find(|f| f.format == vk::Format::B8G8R8A8_UNORM))
        .or_else(|| formats.first())
        .copied()
        .unwrap_or(vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_UNORM,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        })
}

pub fn choose_present_mode(modes: &[vk::PresentModeKHR], vsync: bool) -> vk::PresentModeKHR {
    if vsync {
        // FIFO is guaranteed to be available
        return vk::PresentModeKHR::FIFO;
    }

    [vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::IMMEDIATE]
        .into_iter()
        .find(|mode| modes.contains(mode))
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

/// The surface's fixed extent, or the window size clamped to its limits.
pub fn clamp_extent(caps: &vk::SurfaceCapabilitiesKHR, width: u32, height: u32) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        return caps.current_extent;
    }
    vk::Extent2D {
        width: width.clamp(caps.min_image_extent.width, caps.max_image_extent.width),
        height: height.clamp(caps.min_image_extent.height, caps.max_image_extent.height),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn format(format: vk::Format) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }
    }

    #[test]
    fn test_surface_format_prefers_srgb() {
        let offered = [format(vk::Format::B8G8R8A8_UNORM), format(vk::Format::B8G8R8A8_SRGB)];
        assert_eq!(choose_surface_format(&offered).format, vk::Format::B8G8R8A8_SRGB);

        let offered = [format(vk::Format::R8G8B8A8_UNORM), format(vk::Format::B8G8R8A8_UNORM)];
        assert_eq!(choose_surface_format(&offered).format, vk::Format::B8G8R8A8_UNORM);

        let offered = [format(vk::Format::R16G16B16A16_SFLOAT)];
        assert_eq!(choose_surface_format(&offered).format, vk::Format::R16G16B16A16_SFLOAT);
    }

    #[test]
    fn test_present_mode() {
        let all = [
            vk::PresentModeKHR::FIFO,
            vk::PresentModeKHR::IMMEDIATE,
            vk::PresentModeKHR::MAILBOX,
        ];
        assert_eq!(choose_present_mode(&all, true), vk::PresentModeKHR::FIFO);
        assert_eq!(choose_present_mode(&all, false), vk::PresentModeKHR::MAILBOX);
        assert_eq!(
            choose_present_mode(&[vk::PresentModeKHR::FIFO], false),
            vk::PresentModeKHR::FIFO
        );
    }

    #[test]
    fn test_extent_clamped_when_undefined() {
        let caps = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D { width: u32::MAX, height: u32::MAX },
            min_image_extent: vk::Extent2D { width: 1, height: 1 },
            max_image_extent: vk::Extent2D { width: 4096, height: 4096 },
            ..Default::default()
        };
        let extent = clamp_extent(&caps, 8000, 600);
        assert_eq!((extent.width, extent.height), (4096, 600));

        let fixed = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D { width: 800, height: 600 },
            ..caps
        };
        let extent = clamp_extent(&fixed, 1024, 768);
        assert_eq!((extent.width, extent.height), (800, 600));
    }
}
