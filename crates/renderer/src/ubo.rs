//! Per-frame uniform block.
//!
//! [`FrameUniforms`] mirrors the shader-side block bound at binding 0 in
//! both passes:
//!
//! ```glsl
//! layout(binding = 0) uniform FrameData {
//!     vec2 resolution;
//!     vec2 mouse;
//!     float time;
//! };
//! ```
//!
//! The trailing padding rounds the block up to 32 bytes.

use bytemuck::{Pod, Zeroable};
use glam::Vec2;

use crate::viewport::Upscale;

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct FrameUniforms {
    /// Offscreen resolution in pixels.
    pub resolution: Vec2,
    /// Cursor position in offscreen pixels.
    pub mouse: Vec2,
    /// Seconds since engine start.
    pub time: f32,
    pub _padding: [f32; 3],
}

impl FrameUniforms {
    /// Size of the struct in bytes.
    pub const SIZE: usize = std::mem::size_of::<Self>();

    pub fn new(resolution: Vec2, mouse: Vec2, time: f32) -> Self {
        Self {
            resolution,
            mouse,
            time,
            _padding: [0.0; 3],
        }
    }

    /// Uniforms for one frame, with the window-space `cursor` mapped into
    /// offscreen pixels through `upscale`.
    pub fn for_frame(upscale: &Upscale, cursor: Vec2, time: f32) -> Self {
        Self::new(upscale.source_size(), upscale.window_to_source(cursor), time)
    }

    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk;

    #[test]
    fn test_frame_uniforms_size() {
        assert_eq!(FrameUniforms::SIZE, 32);
        assert_eq!(FrameUniforms::default().as_bytes().len(), 32);
    }

    #[test]
    fn test_frame_uniforms_field_offsets() {
        assert_eq!(std::mem::offset_of!(FrameUniforms, resolution), 0);
        assert_eq!(std::mem::offset_of!(FrameUniforms, mouse), 8);
        assert_eq!(std::mem::offset_of!(FrameUniforms, time), 16);
    }

    #[test]
    fn test_frame_uniforms_bytes() {
        let uniforms = FrameUniforms::new(Vec2::new(160.0, 90.0), Vec2::new(1.0, 2.0), 0.5);
        let floats: &[f32] = bytemuck::cast_slice(uniforms.as_bytes());
        assert_eq!(&floats[..5], &[160.0, 90.0, 1.0, 2.0, 0.5]);
        assert_eq!(&floats[5..], &[0.0; 3]);
    }

    #[test]
    fn test_for_frame_remaps_cursor() {
        let upscale = Upscale::compute(
            vk::Extent2D {
                width: 160,
                height: 90,
            },
            vk::Extent2D {
                width: 1280,
                height: 720,
            },
        );
        let uniforms = FrameUniforms::for_frame(&upscale, Vec2::new(640.0, 360.0), 2.0);
        assert_eq!(uniforms.resolution, Vec2::new(160.0, 90.0));
        assert_eq!(uniforms.mouse, Vec2::new(80.0, 45.0));
        assert_eq!(uniforms.time, 2.0);
    }
}
