//! Integer upscaling of the offscreen image into the framebuffer.
//!
//! The final pass draws the offscreen image at the largest whole-number
//! scale that fits, never below 1, centred in the framebuffer. When the
//! framebuffer is smaller than the source the scaled image overhangs and
//! the offset goes negative; the scissor keeps drawing inside the target.

use ash::vk;
use glam::Vec2;

/// Largest integer factor at which `source` still fits in `target`, at least 1.
pub fn scaling_factor(source: vk::Extent2D, target: vk::Extent2D) -> u32 {
    if source.width == 0 || source.height == 0 {
        return 1;
    }
    let fit_x = target.width / source.width;
    let fit_y = target.height / source.height;
    fit_x.min(fit_y).max(1)
}

/// Size of the scaled source image.
pub fn viewport_extent(source: vk::Extent2D, scale: u32) -> vk::Extent2D {
    vk::Extent2D {
        width: source.width.saturating_mul(scale),
        height: source.height.saturating_mul(scale),
    }
}

/// Top-left corner that centres `extent` in `target`.
pub fn viewport_offset(extent: vk::Extent2D, target: vk::Extent2D) -> vk::Offset2D {
    vk::Offset2D {
        x: (i64::from(target.width) - i64::from(extent.width)).div_euclid(2) as i32,
        y: (i64::from(target.height) - i64::from(extent.height)).div_euclid(2) as i32,
    }
}

/// Placement of the upscaled offscreen image for one framebuffer size.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Upscale {
    pub source: vk::Extent2D,
    pub target: vk::Extent2D,
    pub scale: u32,
    pub extent: vk::Extent2D,
    pub offset: vk::Offset2D,
}

impl Upscale {
    pub fn compute(source: vk::Extent2D, target: vk::Extent2D) -> Self {
        let scale = scaling_factor(source, target);
        let extent = viewport_extent(source, scale);
        let offset = viewport_offset(extent, target);
        Self {
            source,
            target,
            scale,
            extent,
            offset,
        }
    }

    /// Source size as floats, for the uniform block.
    pub fn source_size(&self) -> Vec2 {
        Vec2::new(self.source.width as f32, self.source.height as f32)
    }

    /// Maps a window-space position into source pixels.
    ///
    /// Positions outside the drawn rectangle map outside `0..source`; they are
    /// not clamped.
    pub fn window_to_source(&self, position: Vec2) -> Vec2 {
        let offset = Vec2::new(self.offset.x as f32, self.offset.y as f32);
        let extent = Vec2::new(self.extent.width as f32, self.extent.height as f32);
        (position - offset) / extent * self.source_size()
    }

    /// Scissor covering the whole framebuffer.
    pub fn scissor(&self) -> vk::Rect2D {
        vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent: self.target,
        }
    }
}
