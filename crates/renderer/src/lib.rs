//! Low-resolution rendering pipeline.
//!
//! This crate orchestrates the rendering process:
//! - Two-pass render graph (offscreen target, upscaled final pass)
//! - Frame scheduling over a ring of frame slots
//! - Per-frame uniforms and statistics
//! - Debug overlay injection

mod error;
mod frame;

pub mod graph;
pub mod overlay;
pub mod renderer;
pub mod scheduler;
pub mod stats;
pub mod ubo;
pub mod viewport;

pub use error::{RendererError, RendererResult};
pub use overlay::{DebugOverlay, OverlayContext, OverlayError, OverlayInitInfo};
pub use renderer::Renderer;
pub use scheduler::{FrameScheduler, FrameStatus};
pub use stats::FrameStats;
pub use viewport::Upscale;
