//! Per-frame statistics handed to the debug overlay.

use std::time::Duration;

use ash::vk;
use renderer_core::FpsCounter;

use crate::viewport::Upscale;

/// Snapshot of frame timing and the current upscaling setup.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FrameStats {
    pub fps: f32,
    pub frame_time_ms: f32,
    pub offscreen_extent: vk::Extent2D,
    pub upscaled_extent: vk::Extent2D,
    pub scale: u32,
    pub framebuffer_extent: vk::Extent2D,
    /// Frames presented since start-up.
    pub frame_count: u64,
}

impl FrameStats {
    pub fn new(upscale: &Upscale) -> Self {
        Self {
            fps: 0.0,
            frame_time_ms: 0.0,
            offscreen_extent: upscale.source,
            upscaled_extent: upscale.extent,
            scale: upscale.scale,
            framebuffer_extent: upscale.target,
            frame_count: 0,
        }
    }

    /// Refreshes the upscaling fields after a swapchain rebuild.
    pub fn set_upscale(&mut self, upscale: &Upscale) {
        self.offscreen_extent = upscale.source;
        self.upscaled_extent = upscale.extent;
        self.scale = upscale.scale;
        self.framebuffer_extent = upscale.target;
    }
}

/// Feeds frame times into an [`FpsCounter`] and keeps [`FrameStats`] current.
#[derive(Debug)]
pub struct StatsTracker {
    counter: FpsCounter,
    stats: FrameStats,
}

impl StatsTracker {
    pub fn new(upscale: &Upscale) -> Self {
        Self {
            counter: FpsCounter::new(Duration::from_millis(500)),
            stats: FrameStats::new(upscale),
        }
    }

    /// Records one presented frame. Returns true when the averages were refreshed.
    pub fn record_frame(&mut self, frame_time: Duration) -> bool {
        self.stats.frame_count += 1;
        let refreshed = self.counter.record(frame_time);
        if refreshed {
            self.stats.fps = self.counter.fps();
            self.stats.frame_time_ms = self.counter.frame_time_ms();
        }
        refreshed
    }

    pub fn set_upscale(&mut self, upscale: &Upscale) {
        self.stats.set_upscale(upscale);
    }

    pub fn stats(&self) -> &FrameStats {
        &self.stats
    }
}
