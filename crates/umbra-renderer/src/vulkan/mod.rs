//! Vulkan 1.3 backend: dynamic rendering, synchronization2, bindless textures.

pub mod bindless;
pub mod commands;
pub mod context;
pub mod debug;
pub mod deletion;
pub mod descriptors;
pub mod image;
pub mod memory;
pub mod pipeline;
pub mod rendering;
pub mod samplers;
pub mod shader;
pub mod surface;
pub mod swapchain;

pub use bindless::BindlessTextures;
pub use commands::CommandManager;
pub use context::VulkanContext;
pub use deletion::DeletionQueue;
pub use image::{SubresourceStates, TrackedImage};
pub use memory::{Buffer, MemoryManager};
pub use pipeline::{GraphicsPipelineDesc, PipelineCache};
pub use samplers::Samplers;
pub use surface::VulkanSurface;
pub use swapchain::{AcquireOutcome, Swapchain};

use ash::vk;
use std::ffi::CStr;

/// Minimum instance and device API version.
pub const REQUIRED_VK_VERSION: u32 = vk::make_api_version(0, 1, 3, 0);

/// Application name for Vulkan instance.
pub const APP_NAME: &CStr = c"Umbra";

/// Engine name for Vulkan instance.
pub const ENGINE_NAME: &CStr = c"Umbra Deferred";

/// Engine version.
pub const ENGINE_VERSION: u32 = vk::make_api_version(0, 0, 1, 0);
