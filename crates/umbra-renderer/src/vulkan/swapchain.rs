//! Swapchain images and the acquire/present handshake.

use ash::vk;

use super::image::{SubresourceStates, TrackedImage};
use super::{VulkanContext, VulkanSurface};
use crate::error::{RenderError, Result, VkResultExt};

/// Result of asking the presentation engine for an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    Acquired(u32),
    /// Out of date or suboptimal; the frame must be abandoned and the
    /// swapchain recreated.
    Stale,
}

/// Vulkan swapchain.
///
/// Images are owned by the presentation engine; only their views are
/// destroyed here. Layouts are tracked like any other image so the frame
/// can move them between attachment and present.
pub struct Swapchain {
    pub handle: vk::SwapchainKHR,
    pub images: Vec<TrackedImage>,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
}

impl Swapchain {
    /// Create a new swapchain, retiring `old_swapchain` if given.
    pub unsafe fn new(
        ctx: &VulkanContext,
        surface: &VulkanSurface,
        width: u32,
        height: u32,
        old_swapchain: Option<vk::SwapchainKHR>,
    ) -> Result<Self> {
        let extent = surface.extent(width, height);
        let image_count = preferred_image_count(&surface.capabilities);

        let graphics = ctx.queue_families.graphics.unwrap_or_default();
        let present = ctx.queue_families.present.unwrap_or_default();
        let family_indices = [graphics, present];

        let mut create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(surface.handle)
            .min_image_count(image_count)
            .image_format(surface.format.format)
            .image_color_space(surface.format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(surface.capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(surface.present_mode)
            .clipped(true)
            .old_swapchain(old_swapchain.unwrap_or(vk::SwapchainKHR::null()));

        if graphics != present {
            create_info = create_info
                .image_sharing_mode(vk::SharingMode::CONCURRENT)
                .queue_family_indices(&family_indices);
        }

        let handle = ctx
            .swapchain_loader
            .create_swapchain(&create_info, None)
            .vk("create swapchain")?;

        // The old swapchain stays alive until the new one is complete, so a
        // failure leaves the caller holding a valid handle.
        let images = finish_replacement(
            Self::tracked_images(ctx, handle, surface.format.format, extent),
            || ctx.swapchain_loader.destroy_swapchain(handle, None),
            || {
                if let Some(old) = old_swapchain {
                    ctx.swapchain_loader.destroy_swapchain(old, None);
                }
            },
        )?;

        log::info!(
            "swapchain {}x{} with {} images",
            extent.width,
            extent.height,
            images.len()
        );

        Ok(Self {
            handle,
            images,
            format: surface.format.format,
            extent,
        })
    }

    unsafe fn tracked_images(
        ctx: &VulkanContext,
        handle: vk::SwapchainKHR,
        format: vk::Format,
        extent: vk::Extent2D,
    ) -> Result<Vec<TrackedImage>> {
        let handles = ctx
            .swapchain_loader
            .get_swapchain_images(handle)
            .vk("get swapchain images")?;

        let mut images: Vec<TrackedImage> = Vec::with_capacity(handles.len());
        for (i, image) in handles.into_iter().enumerate() {
            let view = match Self::create_image_view(ctx, image, format) {
                Ok(view) => view,
                Err(e) => {
                    for image in images.drain(..) {
                        ctx.device.destroy_image_view(image.view, None);
                    }
                    return Err(e);
                }
            };
            let name = format!("Swapchain[{i}]");
            ctx.debug.name_object(image, &name);
            images.push(TrackedImage {
                handle: image,
                view,
                allocation: None,
                format,
                extent,
                aspect: vk::ImageAspectFlags::COLOR,
                states: SubresourceStates::new(1, 1),
                name,
            });
        }
        Ok(images)
    }

    unsafe fn create_image_view(ctx: &VulkanContext, image: vk::Image, format: vk::Format) -> Result<vk::ImageView> {
        let create_info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .components(vk::ComponentMapping::default())
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            });

        ctx.device
            .create_image_view(&create_info, None)
            .vk("create swapchain image view")
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    /// Acquire the next image, signalling `image_available` when it is ready.
    pub unsafe fn acquire_next_image(
        &self,
        ctx: &VulkanContext,
        image_available: vk::Semaphore,
    ) -> Result<AcquireOutcome> {
        let result = ctx.swapchain_loader.acquire_next_image(
            self.handle,
            u64::MAX,
            image_available,
            vk::Fence::null(),
        );

        match result {
            Ok((index, false)) => Ok(AcquireOutcome::Acquired(index)),
            // The semaphore is signalled on suboptimal; recreation replaces it.
            Ok((_, true)) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireOutcome::Stale),
            Err(result) => Err(RenderError::Vulkan {
                what: "acquire swapchain image",
                result,
            }),
        }
    }

    /// Present `image_index` once `render_finished` signals.
    ///
    /// Returns `Ok(false)` if the swapchain needs recreation.
    pub unsafe fn present(
        &self,
        ctx: &VulkanContext,
        image_index: u32,
        render_finished: vk::Semaphore,
    ) -> Result<bool> {
        let swapchains = [self.handle];
        let image_indices = [image_index];
        let wait_semaphores = [render_finished];

        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        match ctx.swapchain_loader.queue_present(ctx.present_queue, &present_info) {
            Ok(false) => Ok(true),
            Ok(true) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(false),
            Err(result) => Err(RenderError::Vulkan {
                what: "present",
                result,
            }),
        }
    }

    /// Recreate the swapchain at a new size. The device must be idle.
    pub unsafe fn recreate(
        &mut self,
        ctx: &VulkanContext,
        surface: &VulkanSurface,
        width: u32,
        height: u32,
    ) -> Result<()> {
        for image in self.images.drain(..) {
            ctx.device.destroy_image_view(image.view, None);
        }

        let new = Self::new(ctx, surface, width, height, Some(self.handle))?;
        *self = new;
        Ok(())
    }

    /// Destroy the swapchain and its views. The device must be idle.
    pub unsafe fn destroy(&mut self, ctx: &VulkanContext) {
        for image in self.images.drain(..) {
            ctx.device.destroy_image_view(image.view, None);
        }
        ctx.swapchain_loader.destroy_swapchain(self.handle, None);
        self.handle = vk::SwapchainKHR::null();
    }
}

/// Keep a freshly built object and retire its predecessor, or discard the
/// half-built one and leave the predecessor untouched.
fn finish_replacement<T>(built: Result<T>, discard_new: impl FnOnce(), retire_old: impl FnOnce()) -> Result<T> {
    match built {
        Ok(value) => {
            retire_old();
            Ok(value)
        }
        Err(e) => {
            discard_new();
            Err(e)
        }
    }
}

/// One more than the minimum, capped at the maximum (0 means unbounded).
pub fn preferred_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let desired = caps.min_image_count + 1;
    if caps.max_image_count == 0 {
        desired
    } else {
        desired.min(caps.max_image_count)
    }
}
