//! Injection point for a debug overlay drawn on top of the final pass.
//!
//! The renderer does not know any UI library. An overlay receives the handles
//! it needs to create its own pipeline against the final render pass, and
//! records its draw commands inside that pass after the upscaled image.
//!
//! Handles are passed raw. An overlay that needs function tables builds them
//! with `ash::Instance::load` and `ash::Device::load`.

use ash::vk;

use crate::error::{RendererError, RendererResult};
use crate::stats::FrameStats;

/// Error returned by overlay implementations.
pub type OverlayError = Box<dyn std::error::Error + Send + Sync>;

/// Handles an overlay needs to (re)build its GPU state.
///
/// `render_pass` changes whenever the swapchain is rebuilt.
#[derive(Clone, Copy, Debug)]
pub struct OverlayInitInfo {
    pub instance: vk::Instance,
    pub physical_device: vk::PhysicalDevice,
    pub device: vk::Device,
    pub queue_family: u32,
    pub queue: vk::Queue,
    pub render_pass: vk::RenderPass,
    pub subpass: u32,
    pub min_image_count: u32,
    pub image_count: u32,
}

/// What an overlay sees while the final pass is open.
#[derive(Clone, Copy, Debug)]
pub struct OverlayContext<'a> {
    /// Recording command buffer, inside the final render pass.
    pub command_buffer: vk::CommandBuffer,
    pub image_index: u32,
    pub framebuffer_extent: vk::Extent2D,
    pub stats: &'a FrameStats,
}

/// A UI layer drawn last inside the final pass.
pub trait DebugOverlay {
    /// Called when the overlay is installed and again after every swapchain rebuild.
    fn on_swapchain_rebuilt(&mut self, info: &OverlayInitInfo) -> Result<(), OverlayError>;

    /// Records draw commands into the open final pass.
    ///
    /// The pipeline, descriptor sets and buffers bound by the renderer may be
    /// replaced freely; nothing is drawn after the overlay.
    fn record(&mut self, ctx: &OverlayContext<'_>) -> Result<(), OverlayError>;
}

/// Hands the new final pass to `overlay`, if one is installed.
pub(crate) fn notify_rebuilt(
    overlay: Option<&mut dyn DebugOverlay>,
    info: &OverlayInitInfo,
) -> RendererResult<()> {
    match overlay {
        Some(overlay) => overlay
            .on_swapchain_rebuilt(info)
            .map_err(|source| RendererError::Overlay {
                stage: "swapchain rebuild",
                source,
            }),
        None => Ok(()),
    }
}

/// Lets `overlay`, if one is installed, record into the open final pass.
pub(crate) fn record_overlay(
    overlay: Option<&mut dyn DebugOverlay>,
    ctx: &OverlayContext<'_>,
) -> RendererResult<()> {
    match overlay {
        Some(overlay) => overlay.record(ctx).map_err(|source| RendererError::Overlay {
            stage: "recording",
            source,
        }),
        None => Ok(()),
    }
}
