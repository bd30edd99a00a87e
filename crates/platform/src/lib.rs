//! Platform abstraction layer for the Vulkan renderer.
//!
//! This crate provides platform-specific functionality:
//! - Window management via winit
//! - Keyboard and cursor tracking
//! - Vulkan surface creation from raw window handles

mod input;
mod window;

pub use input::{InputState, KeyCode};
pub use window::{Surface, Window, required_surface_extensions};

// Re-export winit types that users might need
pub use winit::event::WindowEvent;
pub use winit::event_loop::EventLoop;
