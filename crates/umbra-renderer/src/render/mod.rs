//! Deferred frame: screen targets, frame slots, passes and the
//! orchestrator that sequences them.

pub mod frame;
pub mod gbuffer;
pub mod passes;
pub mod pingpong;
pub mod renderer;
pub mod shadow;
pub mod targets;
pub mod timing;
pub mod uniforms;

pub use pingpong::{PingPongCursor, PingPongTarget};
pub use renderer::{FrameOutcome, Renderer};
pub use uniforms::CameraMatrices;
