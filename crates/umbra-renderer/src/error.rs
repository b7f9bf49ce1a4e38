//! Renderer error type.

use std::path::PathBuf;

use ash::vk;
use thiserror::Error;

/// Errors surfaced by the renderer.
///
/// Everything here is fatal to the caller except where noted; swapchain
/// out-of-date/suboptimal is control flow and never becomes an error.
#[derive(Debug, Error)]
pub enum RenderError {
    /// The Vulkan loader library could not be opened.
    #[error("can't load Vulkan: {0}")]
    Loader(#[source] ash::LoadingError),

    /// A Vulkan call returned a failure code.
    #[error("{what} failed: {result:?}")]
    Vulkan { what: &'static str, result: vk::Result },

    /// gpu-allocator could not satisfy a request.
    #[error("allocation for {name} failed: {source}")]
    Allocation {
        name: String,
        #[source]
        source: gpu_allocator::AllocationError,
    },

    /// A required file (shader binary, effect config) is missing or unreadable.
    #[error("can't read {path}: {source}")]
    FileNotFound {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// SPIR-V reflection failed or found an unsupported layout.
    #[error("reflection of {shader}: {reason}")]
    Reflection { shader: String, reason: String },

    /// An effect config file is malformed.
    #[error("{path}:{line}: {reason}")]
    EffectConfig {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    /// Device or surface does not meet the renderer's requirements.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// A frame slot was reused before the GPU released it.
    #[error("frame slot {slot}: {reason}")]
    FrameSlot { slot: usize, reason: &'static str },

    /// Window system handle could not be obtained.
    #[error("window handle: {0}")]
    WindowHandle(#[from] raw_window_handle::HandleError),

    /// A command named an effect that is not in the chain.
    #[error("unknown effect: {0}")]
    UnknownEffect(String),

    /// A command named a parameter the effect's shader does not declare.
    #[error("unknown parameter: {0}")]
    UnknownParameter(String),

    /// A renderer setting is out of range.
    #[error("config: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, RenderError>;

/// Attach a description to a raw `vk::Result`.
pub(crate) trait VkResultExt<T> {
    fn vk(self, what: &'static str) -> Result<T>;
}

impl<T> VkResultExt<T> for std::result::Result<T, vk::Result> {
    fn vk(self, what: &'static str) -> Result<T> {
        self.map_err(|result| RenderError::Vulkan { what, result })
    }
}
