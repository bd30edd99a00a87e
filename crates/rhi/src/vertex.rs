//! Vertex format and quad geometry.
//!
//! Every draw in the renderer is an indexed set of textured quads. A
//! [`QuadVertex`] carries a clip-space position and a texture coordinate;
//! [`QuadBatch`] accumulates quads with the `[0, 1, 2, 2, 3, 0]` winding.

use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::{Vec2, Vec3};

/// Vertex with position and texture coordinate.
///
/// # Memory Layout
///
/// - Offset 0: position (12 bytes)
/// - Offset 12: tex_coord (8 bytes)
/// - Total size: 20 bytes
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct QuadVertex {
    pub position: Vec3,
    pub tex_coord: Vec2,
}

impl QuadVertex {
    #[inline]
    pub const fn new(position: Vec3, tex_coord: Vec2) -> Self {
        Self {
            position,
            tex_coord,
        }
    }

    /// Get the vertex input binding description.
    pub fn binding_description() -> vk::VertexInputBindingDescription {
        vk::VertexInputBindingDescription {
            binding: 0,
            stride: std::mem::size_of::<Self>() as u32,
            input_rate: vk::VertexInputRate::VERTEX,
        }
    }

    /// Get the vertex attribute descriptions.
    pub fn attribute_descriptions() -> [vk::VertexInputAttributeDescription; 2] {
        [
            vk::VertexInputAttributeDescription {
                binding: 0,
                location: 0,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: std::mem::offset_of!(QuadVertex, position) as u32,
            },
            vk::VertexInputAttributeDescription {
                binding: 0,
                location: 1,
                format: vk::Format::R32G32_SFLOAT,
                offset: std::mem::offset_of!(QuadVertex, tex_coord) as u32,
            },
        ]
    }
}

/// Index pattern of one quad, relative to its first vertex.
pub const QUAD_INDICES: [u16; 6] = [0, 1, 2, 2, 3, 0];

/// The quad covering the whole of clip space.
pub const FULLSCREEN_QUAD: [QuadVertex; 4] = [
    QuadVertex::new(Vec3::new(-1.0, -1.0, 0.0), Vec2::new(0.0, 0.0)),
    QuadVertex::new(Vec3::new(-1.0, 1.0, 0.0), Vec2::new(0.0, 1.0)),
    QuadVertex::new(Vec3::new(1.0, 1.0, 0.0), Vec2::new(1.0, 1.0)),
    QuadVertex::new(Vec3::new(1.0, -1.0, 0.0), Vec2::new(1.0, 0.0)),
];

/// CPU-side vertex and index lists for a set of quads.
#[derive(Clone, Debug, Default)]
pub struct QuadBatch {
    vertices: Vec<QuadVertex>,
    indices: Vec<u16>,
}

impl QuadBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// A batch holding only [`FULLSCREEN_QUAD`].
    pub fn fullscreen() -> Self {
        let mut batch = Self::new();
        batch.push_vertices(&FULLSCREEN_QUAD);
        batch
    }

    /// Appends an axis-aligned quad.
    ///
    /// `origin` is the corner with the smallest coordinates and `size` the
    /// extent, both in clip space. `uv_min` maps to `origin` and `uv_max` to
    /// the opposite corner.
    pub fn push_quad(&mut self, origin: Vec2, size: Vec2, uv_min: Vec2, uv_max: Vec2) {
        let far = origin + size;

        self.push_vertices(&[
            QuadVertex::new(origin.extend(0.0), uv_min),
            QuadVertex::new(Vec3::new(origin.x, far.y, 0.0), Vec2::new(uv_min.x, uv_max.y)),
            QuadVertex::new(far.extend(0.0), uv_max),
            QuadVertex::new(Vec3::new(far.x, origin.y, 0.0), Vec2::new(uv_max.x, uv_min.y)),
        ]);
    }

    fn push_vertices(&mut self, quad: &[QuadVertex; 4]) {
        let base = self.vertices.len() as u16;
        self.vertices.extend_from_slice(quad);
        self.indices.extend(QUAD_INDICES.iter().map(|i| base + i));
    }

    #[inline]
    pub fn vertices(&self) -> &[QuadVertex] {
        &self.vertices
    }

    #[inline]
    pub fn indices(&self) -> &[u16] {
        &self.indices
    }

    /// Number of indices, as passed to an indexed draw.
    #[inline]
    pub fn index_count(&self) -> u32 {
        self.indices.len() as u32
    }

    /// Vertex data as raw bytes for upload.
    pub fn vertex_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.vertices)
    }

    /// Index data as raw bytes for upload.
    pub fn index_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.indices)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quad_vertex_layout() {
        assert_eq!(std::mem::size_of::<QuadVertex>(), 20);
        assert_eq!(QuadVertex::binding_description().stride, 20);

        let attrs = QuadVertex::attribute_descriptions();
        assert_eq!(attrs[0].location, 0);
        assert_eq!(attrs[0].offset, 0);
        assert_eq!(attrs[0].format, vk::Format::R32G32B32_SFLOAT);
        assert_eq!(attrs[1].location, 1);
        assert_eq!(attrs[1].offset, 12);
        assert_eq!(attrs[1].format, vk::Format::R32G32_SFLOAT);
    }

    #[test]
    fn test_fullscreen_batch() {
        let batch = QuadBatch::fullscreen();
        assert_eq!(batch.vertices(), &FULLSCREEN_QUAD);
        assert_eq!(batch.indices(), &QUAD_INDICES);
        assert_eq!(batch.index_count(), 6);
        assert_eq!(batch.vertex_bytes().len(), 80);
        assert_eq!(batch.index_bytes().len(), 12);
    }

    #[test]
    fn test_push_quad_matches_fullscreen_quad() {
        let mut batch = QuadBatch::new();
        batch.push_quad(Vec2::splat(-1.0), Vec2::splat(2.0), Vec2::ZERO, Vec2::ONE);
        assert_eq!(batch.vertices(), QuadBatch::fullscreen().vertices());
    }

    #[test]
    fn test_push_quad_corners_and_uvs() {
        let mut batch = QuadBatch::new();
        batch.push_quad(
            Vec2::new(0.0, 0.0),
            Vec2::new(0.5, 0.5),
            Vec2::new(0.1, 0.1),
            Vec2::new(0.2, 0.2),
        );

        let v = batch.vertices();
        assert_eq!(v[0].position, Vec3::new(0.0, 0.0, 0.0));
        assert_eq!(v[1].position, Vec3::new(0.0, 0.5, 0.0));
        assert_eq!(v[2].position, Vec3::new(0.5, 0.5, 0.0));
        assert_eq!(v[3].position, Vec3::new(0.5, 0.0, 0.0));

        assert_eq!(v[0].tex_coord, Vec2::new(0.1, 0.1));
        assert_eq!(v[1].tex_coord, Vec2::new(0.1, 0.2));
        assert_eq!(v[2].tex_coord, Vec2::new(0.2, 0.2));
        assert_eq!(v[3].tex_coord, Vec2::new(0.2, 0.1));
    }

    #[test]
    fn test_indices_offset_per_quad() {
        let mut batch = QuadBatch::fullscreen();
        batch.push_quad(Vec2::ZERO, Vec2::ONE, Vec2::ZERO, Vec2::ONE);
        assert_eq!(batch.indices(), &[0, 1, 2, 2, 3, 0, 4, 5, 6, 6, 7, 4]);
        assert_eq!(batch.vertices().len(), 8);
    }
}
