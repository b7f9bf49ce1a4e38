//! GPU memory management using gpu-allocator.

use ash::vk;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme, Allocator, AllocatorCreateDesc};
use gpu_allocator::MemoryLocation;
use parking_lot::Mutex;
use std::sync::Arc;

use super::image::{aspect_for_format, SubresourceStates, TrackedImage};
use super::VulkanContext;
use crate::error::{RenderError, Result, VkResultExt};

/// GPU buffer with associated memory.
pub struct Buffer {
    pub handle: vk::Buffer,
    pub allocation: Option<Allocation>,
    pub size: vk::DeviceSize,
    pub name: String,
}

impl Buffer {
    /// Copy plain data into a host-visible buffer at `offset` bytes.
    pub fn write<T: bytemuck::Pod>(&mut self, offset: usize, data: &[T]) -> Result<()> {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        let name = &self.name;
        let slice = self
            .allocation
            .as_mut()
            .and_then(|a| a.mapped_slice_mut())
            .ok_or_else(|| RenderError::Unsupported(format!("buffer {name} is not host visible")))?;

        let end = offset + bytes.len();
        if end > slice.len() {
            return Err(RenderError::Unsupported(format!(
                "write of {} bytes at {offset} overflows buffer {name} ({} bytes)",
                bytes.len(),
                slice.len()
            )));
        }
        slice[offset..end].copy_from_slice(bytes);
        Ok(())
    }
}

/// Everything needed to create an image; passed by value to
/// [`MemoryManager::create_image`].
#[derive(Debug, Clone, Copy)]
pub struct ImageDesc<'a> {
    pub name: &'a str,
    pub extent: vk::Extent2D,
    pub format: vk::Format,
    pub usage: vk::ImageUsageFlags,
    pub mip_levels: u32,
    pub array_layers: u32,
    /// Six layers viewed as a cube.
    pub cube: bool,
}

impl<'a> ImageDesc<'a> {
    pub fn color_target(name: &'a str, extent: vk::Extent2D, format: vk::Format) -> Self {
        Self {
            name,
            extent,
            format,
            usage: vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::SAMPLED,
            mip_levels: 1,
            array_layers: 1,
            cube: false,
        }
    }

    pub fn depth_target(name: &'a str, extent: vk::Extent2D, format: vk::Format) -> Self {
        Self {
            usage: vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT | vk::ImageUsageFlags::SAMPLED,
            ..Self::color_target(name, extent, format)
        }
    }

    pub fn texture(name: &'a str, extent: vk::Extent2D, format: vk::Format) -> Self {
        Self {
            usage: vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_DST,
            ..Self::color_target(name, extent, format)
        }
    }

    pub fn view_type(&self) -> vk::ImageViewType {
        if self.cube {
            vk::ImageViewType::CUBE
        } else if self.array_layers > 1 {
            vk::ImageViewType::TYPE_2D_ARRAY
        } else {
            vk::ImageViewType::TYPE_2D
        }
    }
}

/// Memory manager wrapping gpu-allocator.
pub struct MemoryManager {
    allocator: Arc<Mutex<Allocator>>,
    device: ash::Device,
}

impl MemoryManager {
    /// Create a new memory manager.
    pub fn new(ctx: &VulkanContext) -> Result<Self> {
        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: ctx.instance.clone(),
            device: ctx.device.clone(),
            physical_device: ctx.physical_device,
            debug_settings: debug_settings(),
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        })
        .map_err(|source| RenderError::Allocation {
            name: "allocator".to_string(),
            source,
        })?;

        Ok(Self {
            allocator: Arc::new(Mutex::new(allocator)),
            device: ctx.device.clone(),
        })
    }

    fn allocate(
        &self,
        name: &str,
        requirements: vk::MemoryRequirements,
        location: MemoryLocation,
        linear: bool,
    ) -> Result<Allocation> {
        self.allocator
            .lock()
            .allocate(&AllocationCreateDesc {
                name,
                requirements,
                location,
                linear,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })
            .map_err(|source| RenderError::Allocation {
                name: name.to_string(),
                source,
            })
    }

    /// Create a buffer with the specified usage and memory location.
    pub unsafe fn create_buffer(
        &self,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        location: MemoryLocation,
        name: &str,
    ) -> Result<Buffer> {
        let buffer_info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let handle = self.device.create_buffer(&buffer_info, None).vk("create buffer")?;
        let requirements = self.device.get_buffer_memory_requirements(handle);

        let allocation = match self.allocate(name, requirements, location, true) {
            Ok(allocation) => allocation,
            Err(e) => {
                self.device.destroy_buffer(handle, None);
                return Err(e);
            }
        };

        self.device
            .bind_buffer_memory(handle, allocation.memory(), allocation.offset())
            .vk("bind buffer memory")?;

        Ok(Buffer {
            handle,
            allocation: Some(allocation),
            size,
            name: name.to_string(),
        })
    }

    /// Create a staging buffer (CPU-visible, transfer source).
    pub unsafe fn create_staging_buffer(&self, size: vk::DeviceSize, name: &str) -> Result<Buffer> {
        self.create_buffer(size, vk::BufferUsageFlags::TRANSFER_SRC, MemoryLocation::CpuToGpu, name)
    }

    /// Create a uniform buffer (CPU-visible for frequent updates).
    pub unsafe fn create_uniform_buffer(&self, size: vk::DeviceSize, name: &str) -> Result<Buffer> {
        self.create_buffer(size, vk::BufferUsageFlags::UNIFORM_BUFFER, MemoryLocation::CpuToGpu, name)
    }

    /// Create a host-written storage buffer.
    pub unsafe fn create_storage_buffer(&self, size: vk::DeviceSize, name: &str) -> Result<Buffer> {
        self.create_buffer(size, vk::BufferUsageFlags::STORAGE_BUFFER, MemoryLocation::CpuToGpu, name)
    }

    /// Create a GPU-only buffer filled later by a transfer.
    pub unsafe fn create_device_buffer(
        &self,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        name: &str,
    ) -> Result<Buffer> {
        self.create_buffer(
            size,
            usage | vk::BufferUsageFlags::TRANSFER_DST,
            MemoryLocation::GpuOnly,
            name,
        )
    }

    /// Create an image and its default view. Every subresource starts
    /// tracked as `UNDEFINED`.
    pub unsafe fn create_image(&self, desc: &ImageDesc) -> Result<TrackedImage> {
        let extent = vk::Extent3D {
            width: desc.extent.width,
            height: desc.extent.height,
            depth: 1,
        };

        let flags = if desc.cube {
            vk::ImageCreateFlags::CUBE_COMPATIBLE
        } else {
            vk::ImageCreateFlags::empty()
        };

        let image_info = vk::ImageCreateInfo::default()
            .flags(flags)
            .image_type(vk::ImageType::TYPE_2D)
            .format(desc.format)
            .extent(extent)
            .mip_levels(desc.mip_levels)
            .array_layers(desc.array_layers)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(desc.usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let handle = self.device.create_image(&image_info, None).vk("create image")?;
        let requirements = self.device.get_image_memory_requirements(handle);

        let allocation = match self.allocate(desc.name, requirements, MemoryLocation::GpuOnly, false) {
            Ok(allocation) => allocation,
            Err(e) => {
                self.device.destroy_image(handle, None);
                return Err(e);
            }
        };

        self.device
            .bind_image_memory(handle, allocation.memory(), allocation.offset())
            .vk("bind image memory")?;

        let aspect = aspect_for_format(desc.format);
        // Sampling a depth/stencil view reads depth only
        let view_aspect = if aspect.contains(vk::ImageAspectFlags::DEPTH) {
            vk::ImageAspectFlags::DEPTH
        } else {
            aspect
        };
        let view_info = vk::ImageViewCreateInfo::default()
            .image(handle)
            .view_type(desc.view_type())
            .format(desc.format)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: view_aspect,
                base_mip_level: 0,
                level_count: desc.mip_levels,
                base_array_layer: 0,
                layer_count: desc.array_layers,
            });

        let view = self.device.create_image_view(&view_info, None).vk("create image view")?;

        Ok(TrackedImage {
            handle,
            view,
            allocation: Some(allocation),
            format: desc.format,
            extent: desc.extent,
            aspect,
            states: SubresourceStates::new(desc.mip_levels, desc.array_layers),
            name: desc.name.to_string(),
        })
    }

    /// Destroy a buffer.
    pub unsafe fn destroy_buffer(&self, buffer: Buffer) {
        self.device.destroy_buffer(buffer.handle, None);
        if let Some(allocation) = buffer.allocation {
            if let Err(e) = self.allocator.lock().free(allocation) {
                log::warn!("freeing {} failed: {e}", buffer.name);
            }
        }
    }

    /// Destroy an image and its default view.
    pub unsafe fn destroy_image(&self, image: TrackedImage) {
        self.device.destroy_image_view(image.view, None);
        self.device.destroy_image(image.handle, None);
        if let Some(allocation) = image.allocation {
            if let Err(e) = self.allocator.lock().free(allocation) {
                log::warn!("freeing {} failed: {e}", image.name);
            }
        }
    }
}

fn debug_settings() -> gpu_allocator::AllocatorDebugSettings {
    let mut settings = gpu_allocator::AllocatorDebugSettings::default();
    settings.log_memory_information = cfg!(debug_assertions);
    settings.log_leaks_on_shutdown = true;
    settings
}
