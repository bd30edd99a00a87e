//! Per-slot GPU resources.
//!
//! Each frame slot owns everything one in-flight frame writes to, so the CPU
//! can prepare slot *n + 1* while the GPU still reads slot *n*.

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use renderer_rhi::RhiResult;
use renderer_rhi::buffer::{Buffer, BufferUsage};
use renderer_rhi::command::{CommandBuffer, CommandPool};
use renderer_rhi::descriptor::{DescriptorPool, DescriptorSetLayout, write_uniform_and_sampler};
use renderer_rhi::device::Device;
use renderer_rhi::image::Sampler;
use renderer_rhi::sync::SlotSync;

use crate::ubo::FrameUniforms;

/// Images sampled by the two passes.
#[derive(Clone, Copy)]
pub struct SampledImages {
    /// Source texture, read by the offscreen pass.
    pub texture: vk::ImageView,
    /// Offscreen colour target, read by the final pass.
    pub offscreen: vk::ImageView,
}

pub struct FrameSlot {
    pub command_buffer: CommandBuffer,
    pub sync: SlotSync,
    /// Host-visible [`FrameUniforms`], shared by both passes of this slot.
    pub uniforms: Buffer,
    /// Uniforms plus the source texture.
    pub offscreen_set: vk::DescriptorSet,
    /// Uniforms plus the offscreen target.
    pub final_set: vk::DescriptorSet,
}

impl FrameSlot {
    /// Creates `count` slots, allocating two descriptor sets per slot from `pool`.
    pub fn create_all(
        device: &Arc<Device>,
        count: usize,
        command_pool: &CommandPool,
        pool: &DescriptorPool,
        layout: &DescriptorSetLayout,
        sampler: &Sampler,
        images: SampledImages,
    ) -> RhiResult<Vec<Self>> {
        let layouts = vec![layout.handle(); count * 2];
        let sets = pool.allocate(&layouts)?;

        let mut slots = Vec::with_capacity(count);
        for (index, pair) in sets.chunks_exact(2).enumerate() {
            let uniforms = Buffer::with_usage(
                device.clone(),
                BufferUsage::Uniform,
                FrameUniforms::SIZE as vk::DeviceSize,
            )?;
            let range = FrameUniforms::SIZE as vk::DeviceSize;

            write_uniform_and_sampler(
                device,
                pair[0],
                uniforms.handle(),
                range,
                sampler.handle(),
                images.texture,
            );
            write_uniform_and_sampler(
                device,
                pair[1],
                uniforms.handle(),
                range,
                sampler.handle(),
                images.offscreen,
            );

            slots.push(Self {
                command_buffer: CommandBuffer::new(device.clone(), command_pool)?,
                sync: SlotSync::new(device.clone())?,
                uniforms,
                offscreen_set: pair[0],
                final_set: pair[1],
            });
            debug!("Created frame slot {}", index);
        }

        Ok(slots)
    }

    pub fn write_uniforms(&self, uniforms: &FrameUniforms) -> RhiResult<()> {
        self.uniforms.write(0, uniforms.as_bytes())
    }
}
