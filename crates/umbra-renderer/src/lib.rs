#![allow(clippy::missing_safety_doc)]
//! Vulkan 1.3 deferred renderer.
//!
//! Frames run depth prepass, G-buffer, lighting and a chain of
//! reflected post-processing effects over an HDR ping-pong pair. Shadow
//! maps are rendered once when a scene is loaded.

pub mod config;
pub mod error;
pub mod post;
pub mod render;
pub mod scene;
pub mod vulkan;

pub use config::RendererConfig;
pub use error::{RenderError, Result};
pub use post::{EffectCommand, ParamValue};
pub use render::{CameraMatrices, FrameOutcome, Renderer};
pub use scene::{Light, SceneBuilder, TextureIndices, Vertex};
