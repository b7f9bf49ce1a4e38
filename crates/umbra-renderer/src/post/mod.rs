//! Post-processing: reflected full-screen effects over the HDR ping-pong
//! target, ending on the swapchain image.

pub mod chain;
pub mod effect;
pub mod ini;
pub mod params;
pub mod reflect;

pub use chain::{EffectCommand, PostChain};
pub use effect::PostEffect;
pub use ini::EffectConfig;
pub use params::{ParamKind, ParamValue, PushConstantBlock, PushConstantLayout};
