//! The two-pass render graph.
//!
//! 1. **Offscreen pass**: draws the textured quads into a fixed low-resolution
//!    colour image, which ends the pass in `SHADER_READ_ONLY_OPTIMAL`.
//! 2. **Final pass**: samples that image onto a full-screen quad in the
//!    swapchain image, using an integer-scaled, centred viewport, then hands
//!    the open pass to the debug overlay.
//!
//! The passes are ordered by their subpass dependencies; no explicit barrier
//! sits between them. Everything sized by the swapchain lives in
//! [`PresentPass`] and is rebuilt with it. The offscreen side never changes.

use std::sync::Arc;

use ash::vk;
use glam::Vec2;
use tracing::{debug, info};

use renderer_resources::ImageData;
use renderer_rhi::RhiResult;
use renderer_rhi::buffer::Buffer;
use renderer_rhi::command::{CommandBuffer, CommandPool};
use renderer_rhi::descriptor::{DescriptorPool, DescriptorSetLayout, uniform_and_sampler_bindings};
use renderer_rhi::device::Device;
use renderer_rhi::image::{Image, Sampler};
use renderer_rhi::instance::Instance;
use renderer_rhi::pipeline::{
    CullMode, FrontFace, GraphicsPipelineBuilder, Pipeline, PipelineLayout, PrimitiveTopology,
};
use renderer_rhi::render_pass::{Framebuffer, PassKind, RenderPass};
use renderer_rhi::shader::{Shader, ShaderStage};
use renderer_rhi::swapchain::{AcquireOutcome, PresentOutcome, Swapchain};
use renderer_rhi::sync::SlotSync;
use renderer_rhi::upload::Uploader;
use renderer_rhi::vertex::{QuadBatch, QuadVertex};

use crate::error::RendererResult;
use crate::frame::{FrameSlot, SampledImages};
use crate::overlay::{DebugOverlay, OverlayContext, record_overlay};
use crate::stats::FrameStats;
use crate::ubo::FrameUniforms;
use crate::viewport::Upscale;

/// Format of the offscreen colour target.
pub const OFFSCREEN_FORMAT: vk::Format = vk::Format::R8G8B8A8_UNORM;

/// Format the source texture is uploaded in.
pub const TEXTURE_FORMAT: vk::Format = vk::Format::R8G8B8A8_SRGB;

/// SPIR-V for both passes.
pub struct ShaderBlobs {
    pub offscreen_vertex: Vec<u8>,
    pub offscreen_fragment: Vec<u8>,
    pub final_vertex: Vec<u8>,
    pub final_fragment: Vec<u8>,
}

/// Sizing and behaviour of the graph.
#[derive(Clone, Copy, Debug)]
pub struct GraphSettings {
    pub offscreen_extent: vk::Extent2D,
    pub framebuffer_extent: vk::Extent2D,
    pub frames_in_flight: usize,
    pub clear_color: [f32; 4],
    /// Prefer MAILBOX presentation.
    pub fastest: bool,
}

/// Geometry drawn by the offscreen pass: the full-screen quad plus an inset
/// quad showing part of the texture.
pub fn offscreen_batch() -> QuadBatch {
    let mut batch = QuadBatch::fullscreen();
    batch.push_quad(
        Vec2::new(0.0, 0.0),
        Vec2::new(0.5, 0.5),
        Vec2::new(0.1, 0.1),
        Vec2::new(0.2, 0.2),
    );
    batch
}

/// Device-local vertex and index buffers for a [`QuadBatch`].
struct QuadMesh {
    vertices: Buffer,
    indices: Buffer,
    index_count: u32,
}

impl QuadMesh {
    fn upload(uploader: &Uploader, batch: &QuadBatch) -> RhiResult<Self> {
        let vertices =
            uploader.staged_upload_buffer(batch.vertex_bytes(), vk::BufferUsageFlags::VERTEX_BUFFER)?;
        let indices =
            uploader.staged_upload_buffer(batch.index_bytes(), vk::BufferUsageFlags::INDEX_BUFFER)?;
        Ok(Self {
            vertices,
            indices,
            index_count: batch.index_count(),
        })
    }

    fn draw(&self, cmd: &CommandBuffer) {
        cmd.bind_vertex_buffers(0, &[self.vertices.handle()], &[0]);
        cmd.bind_index_buffer(self.indices.handle(), 0, vk::IndexType::UINT16);
        cmd.draw_indexed(self.index_count, 0, 0);
    }
}

fn quad_pipeline(
    device: &Arc<Device>,
    layout: &PipelineLayout,
    render_pass: &RenderPass,
    shaders: (&Shader, &Shader),
    offset: vk::Offset2D,
    extent: vk::Extent2D,
    scissor: vk::Rect2D,
) -> RhiResult<Pipeline> {
    GraphicsPipelineBuilder::new()
        .vertex_shader(shaders.0)
        .fragment_shader(shaders.1)
        .vertex_binding(QuadVertex::binding_description())
        .vertex_attributes(&QuadVertex::attribute_descriptions())
        .topology(PrimitiveTopology::TriangleList)
        .cull_mode(CullMode::Back)
        .front_face(FrontFace::CounterClockwise)
        .viewport(offset, extent)
        .scissor(scissor)
        .render_pass(render_pass.handle(), 0)
        .build(device.clone(), layout)
}

/// Commands of the final pass that surround the overlay.
pub(crate) trait FinalPassCommands {
    fn begin(&self);
    /// Draws the offscreen image into the upscaled viewport.
    fn draw_upscaled(&self);
    fn end(&self);
}

/// Records the final pass: the upscaled image, then the overlay, then the end
/// of the pass. The pass is closed even if the overlay fails.
pub(crate) fn record_final_pass<C: FinalPassCommands + ?Sized>(
    pass: &C,
    overlay: Option<&mut dyn DebugOverlay>,
    ctx: &OverlayContext<'_>,
) -> RendererResult<()> {
    pass.begin();
    pass.draw_upscaled();
    let drawn = record_overlay(overlay, ctx);
    pass.end();
    drawn
}

// Fields are declared in destruction order.
struct OffscreenPass {
    pipeline: Pipeline,
    framebuffer: Framebuffer,
    target: Image,
    render_pass: RenderPass,
    mesh: QuadMesh,
}

impl OffscreenPass {
    fn new(
        device: &Arc<Device>,
        uploader: &Uploader,
        layout: &PipelineLayout,
        shaders: (&Shader, &Shader),
        extent: vk::Extent2D,
    ) -> RhiResult<Self> {
        let render_pass = RenderPass::new(device.clone(), PassKind::Offscreen, OFFSCREEN_FORMAT)?;
        let target = Image::new(
            device.clone(),
            extent.width,
            extent.height,
            OFFSCREEN_FORMAT,
            vk::ImageUsageFlags::COLOR_ATTACHMENT
                | vk::ImageUsageFlags::SAMPLED
                | vk::ImageUsageFlags::TRANSFER_SRC,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )?;
        let framebuffer = Framebuffer::new(device.clone(), &render_pass, target.view(), extent)?;

        let full = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent,
        };
        let pipeline = quad_pipeline(
            device,
            layout,
            &render_pass,
            shaders,
            full.offset,
            extent,
            full,
        )?;
        let mesh = QuadMesh::upload(uploader, &offscreen_batch())?;

        info!("Offscreen pass created at {}x{}", extent.width, extent.height);

        Ok(Self {
            pipeline,
            framebuffer,
            target,
            render_pass,
            mesh,
        })
    }
}

// Fields are declared in destruction order.
struct PresentPass {
    framebuffers: Vec<Framebuffer>,
    pipeline: Pipeline,
    render_pass: RenderPass,
    upscale: Upscale,
}

impl PresentPass {
    fn new(
        device: &Arc<Device>,
        swapchain: &Swapchain,
        layout: &PipelineLayout,
        shaders: (&Shader, &Shader),
        offscreen_extent: vk::Extent2D,
    ) -> RhiResult<Self> {
        let extent = swapchain.extent();
        let upscale = Upscale::compute(offscreen_extent, extent);

        let render_pass = RenderPass::new(device.clone(), PassKind::Present, swapchain.format())?;
        let framebuffers = swapchain
            .image_views()
            .iter()
            .map(|&view| Framebuffer::new(device.clone(), &render_pass, view, extent))
            .collect::<RhiResult<Vec<_>>>()?;
        let pipeline = quad_pipeline(
            device,
            layout,
            &render_pass,
            shaders,
            upscale.offset,
            upscale.extent,
            upscale.scissor(),
        )?;

        debug!(
            "Final pass: {}x{} framebuffer, scale {}, viewport {}x{} at ({}, {})",
            extent.width,
            extent.height,
            upscale.scale,
            upscale.extent.width,
            upscale.extent.height,
            upscale.offset.x,
            upscale.offset.y
        );

        Ok(Self {
            framebuffers,
            pipeline,
            render_pass,
            upscale,
        })
    }
}

/// GPU state for both passes and all frame slots.
// Fields are declared in destruction order.
pub struct RenderGraph {
    slots: Vec<FrameSlot>,
    present: PresentPass,
    offscreen: OffscreenPass,
    final_vertex: Shader,
    final_fragment: Shader,
    screen_quad: QuadMesh,
    // Referenced by the frame slots' descriptor sets.
    _texture: Image,
    _sampler: Sampler,
    _descriptor_pool: DescriptorPool,
    pipeline_layout: PipelineLayout,
    _set_layout: DescriptorSetLayout,
    swapchain: Swapchain,
    uploader: Uploader,
    _command_pool: CommandPool,
    device: Arc<Device>,
    clear_color: [f32; 4],
}

impl RenderGraph {
    /// Builds the swapchain, both passes, their pipelines and `frames_in_flight` slots.
    pub fn new(
        instance: &Instance,
        device: Arc<Device>,
        surface: vk::SurfaceKHR,
        shaders: &ShaderBlobs,
        texture: &ImageData,
        settings: &GraphSettings,
    ) -> RhiResult<Self> {
        let swapchain = Swapchain::new(
            instance,
            device.clone(),
            surface,
            settings.framebuffer_extent.width,
            settings.framebuffer_extent.height,
            settings.fastest,
        )?;

        let command_pool = CommandPool::new(device.clone(), device.queue_families().graphics)?;
        let uploader = Uploader::new(device.clone())?;

        let set_layout = DescriptorSetLayout::new(device.clone(), &uniform_and_sampler_bindings())?;
        let pipeline_layout = PipelineLayout::new(device.clone(), &[set_layout.handle()])?;
        let descriptor_pool = DescriptorPool::for_uniform_and_sampler_sets(
            device.clone(),
            (settings.frames_in_flight * 2) as u32,
        )?;

        let sampler = Sampler::nearest(device.clone())?;
        let texture_image = uploader.staged_upload_image(
            texture.width,
            texture.height,
            TEXTURE_FORMAT,
            &texture.pixels,
        )?;

        let offscreen_vertex = Shader::from_spirv_bytes(
            device.clone(),
            "offscreen.vert",
            &shaders.offscreen_vertex,
            ShaderStage::Vertex,
        )?;
        let offscreen_fragment = Shader::from_spirv_bytes(
            device.clone(),
            "offscreen.frag",
            &shaders.offscreen_fragment,
            ShaderStage::Fragment,
        )?;
        let final_vertex = Shader::from_spirv_bytes(
            device.clone(),
            "final.vert",
            &shaders.final_vertex,
            ShaderStage::Vertex,
        )?;
        let final_fragment = Shader::from_spirv_bytes(
            device.clone(),
            "final.frag",
            &shaders.final_fragment,
            ShaderStage::Fragment,
        )?;

        // The offscreen shader modules are only needed to build its pipeline.
        let offscreen = OffscreenPass::new(
            &device,
            &uploader,
            &pipeline_layout,
            (&offscreen_vertex, &offscreen_fragment),
            settings.offscreen_extent,
        )?;
        let present = PresentPass::new(
            &device,
            &swapchain,
            &pipeline_layout,
            (&final_vertex, &final_fragment),
            settings.offscreen_extent,
        )?;
        let screen_quad = QuadMesh::upload(&uploader, &QuadBatch::fullscreen())?;

        let slots = FrameSlot::create_all(
            &device,
            settings.frames_in_flight,
            &command_pool,
            &descriptor_pool,
            &set_layout,
            &sampler,
            SampledImages {
                texture: texture_image.view(),
                offscreen: offscreen.target.view(),
            },
        )?;

        info!(
            "Render graph ready: {} frame slots, {} swapchain images",
            slots.len(),
            swapchain.image_count()
        );

        Ok(Self {
            slots,
            present,
            offscreen,
            final_vertex,
            final_fragment,
            screen_quad,
            _texture: texture_image,
            _sampler: sampler,
            _descriptor_pool: descriptor_pool,
            pipeline_layout,
            _set_layout: set_layout,
            swapchain,
            uploader,
            _command_pool: command_pool,
            device,
            clear_color: settings.clear_color,
        })
    }

    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    pub fn upscale(&self) -> &Upscale {
        &self.present.upscale
    }

    pub fn swapchain(&self) -> &Swapchain {
        &self.swapchain
    }

    pub fn final_render_pass(&self) -> vk::RenderPass {
        self.present.render_pass.handle()
    }

    pub fn offscreen_extent(&self) -> vk::Extent2D {
        self.offscreen.target.extent()
    }

    /// Replaces the slot's fence and semaphores after a failed frame.
    ///
    /// Waits for the device to go idle first, so the old objects are unused.
    /// The new fence starts signalled.
    pub fn recover_slot(&mut self, slot: usize) -> RhiResult<()> {
        self.device.wait_idle()?;
        self.slots[slot].sync = SlotSync::new(self.device.clone())?;
        debug!("Frame slot {} synchronisation recreated", slot);
        Ok(())
    }

    pub fn wait_for_slot(&self, slot: usize) -> RhiResult<()> {
        self.slots[slot].sync.in_flight.wait()
    }

    pub fn reset_fence(&self, slot: usize) -> RhiResult<()> {
        self.slots[slot].sync.in_flight.reset()
    }

    pub fn acquire(&self, slot: usize) -> RhiResult<AcquireOutcome> {
        self.swapchain
            .acquire_next_image(self.slots[slot].sync.image_available.handle())
    }

    pub fn write_uniforms(&self, slot: usize, uniforms: &FrameUniforms) -> RhiResult<()> {
        self.slots[slot].write_uniforms(uniforms)
    }

    /// Resets the slot's command buffer and records both passes.
    pub fn record(
        &self,
        slot: usize,
        image_index: u32,
        overlay: Option<&mut dyn DebugOverlay>,
        stats: &FrameStats,
    ) -> RendererResult<()> {
        let frame = &self.slots[slot];
        let cmd = &frame.command_buffer;
        cmd.reset()?;
        cmd.begin()?;

        cmd.begin_render_pass(
            self.offscreen.render_pass.handle(),
            self.offscreen.framebuffer.handle(),
            self.offscreen.framebuffer.extent(),
            self.clear_color,
        );
        cmd.bind_descriptor_sets(self.pipeline_layout.handle(), &[frame.offscreen_set]);
        cmd.bind_graphics_pipeline(self.offscreen.pipeline.handle());
        self.offscreen.mesh.draw(cmd);
        cmd.end_render_pass();

        let framebuffer = &self.present.framebuffers[image_index as usize];
        let final_pass = FinalPassRecording {
            graph: self,
            cmd,
            framebuffer,
            set: frame.final_set,
        };
        record_final_pass(
            &final_pass,
            overlay,
            &OverlayContext {
                command_buffer: cmd.handle(),
                image_index,
                framebuffer_extent: framebuffer.extent(),
                stats,
            },
        )?;

        cmd.end()?;
        Ok(())
    }

    /// Submits the slot's command buffer, waiting on its acquire semaphore and
    /// signalling its render-finished semaphore and fence.
    pub fn submit(&self, slot: usize) -> RhiResult<()> {
        let frame = &self.slots[slot];
        let wait_semaphores = [frame.sync.image_available.handle()];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let signal_semaphores = [frame.sync.render_finished.handle()];
        let command_buffers = [frame.command_buffer.handle()];

        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        // SAFETY: the command buffer was recorded by `record` and the fence was
        // reset by `reset_fence` after the previous submission completed.
        unsafe {
            self.device
                .submit_graphics(&[submit_info], frame.sync.in_flight.handle())
        }
    }

    pub fn present(&self, slot: usize, image_index: u32) -> RhiResult<PresentOutcome> {
        self.swapchain.present(
            self.device.present_queue(),
            image_index,
            self.slots[slot].sync.render_finished.handle(),
        )
    }

    /// Replaces the swapchain and everything sized by it.
    ///
    /// Waits for the device to go idle first. The offscreen pass and the
    /// frame slots are kept.
    pub fn rebuild(
        &mut self,
        instance: &Instance,
        surface: vk::SurfaceKHR,
        extent: vk::Extent2D,
    ) -> RhiResult<()> {
        self.device.wait_idle()?;

        let swapchain = self
            .swapchain
            .rebuild(instance, surface, extent.width, extent.height)?;
        let present = PresentPass::new(
            &self.device,
            &swapchain,
            &self.pipeline_layout,
            (&self.final_vertex, &self.final_fragment),
            self.offscreen.target.extent(),
        )?;

        // Old framebuffers go before the swapchain whose views they reference.
        self.present = present;
        self.swapchain = swapchain;

        info!(
            "Swapchain rebuilt: {}x{}, {} images",
            self.swapchain.extent().width,
            self.swapchain.extent().height,
            self.swapchain.image_count()
        );
        Ok(())
    }

    /// Reads the offscreen target back as RGBA8.
    ///
    /// Only valid once at least one frame has been rendered, so the image is
    /// in `SHADER_READ_ONLY_OPTIMAL`. Waits for the device to go idle.
    pub fn read_offscreen(&self) -> RhiResult<Vec<u8>> {
        self.device.wait_idle()?;
        self.uploader.download_image(&self.offscreen.target)
    }
}

/// The final pass of one slot, targeting one swapchain framebuffer.
struct FinalPassRecording<'a> {
    graph: &'a RenderGraph,
    cmd: &'a CommandBuffer,
    framebuffer: &'a Framebuffer,
    set: vk::DescriptorSet,
}

impl FinalPassCommands for FinalPassRecording<'_> {
    fn begin(&self) {
        self.cmd.begin_render_pass(
            self.graph.present.render_pass.handle(),
            self.framebuffer.handle(),
            self.framebuffer.extent(),
            self.graph.clear_color,
        );
    }

    fn draw_upscaled(&self) {
        self.cmd
            .bind_descriptor_sets(self.graph.pipeline_layout.handle(), &[self.set]);
        self.cmd
            .bind_graphics_pipeline(self.graph.present.pipeline.handle());
        self.graph.screen_quad.draw(self.cmd);
    }

    fn end(&self) {
        self.cmd.end_render_pass();
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;
    use crate::error::RendererError;
    use crate::overlay::OverlayError;

    type Log = Rc<RefCell<Vec<&'static str>>>;

    struct LoggedPass(Log);

    impl FinalPassCommands for LoggedPass {
        fn begin(&self) {
            self.0.borrow_mut().push("begin");
        }

        fn draw_upscaled(&self) {
            self.0.borrow_mut().push("draw");
        }

        fn end(&self) {
            self.0.borrow_mut().push("end");
        }
    }

    struct LoggedOverlay {
        log: Log,
        fail: bool,
    }

    impl DebugOverlay for LoggedOverlay {
        fn on_swapchain_rebuilt(
            &mut self,
            _info: &crate::overlay::OverlayInitInfo,
        ) -> Result<(), OverlayError> {
            Ok(())
        }

        fn record(&mut self, _ctx: &OverlayContext<'_>) -> Result<(), OverlayError> {
            self.log.borrow_mut().push("overlay");
            if self.fail {
                return Err("overlay pipeline missing".into());
            }
            Ok(())
        }
    }

    fn record_with(overlay: Option<&mut dyn DebugOverlay>, log: &Log) -> RendererResult<()> {
        let extent = vk::Extent2D {
            width: 1280,
            height: 720,
        };
        let stats = FrameStats::new(&Upscale::compute(
            vk::Extent2D {
                width: 160,
                height: 90,
            },
            extent,
        ));
        let ctx = OverlayContext {
            command_buffer: vk::CommandBuffer::null(),
            image_index: 0,
            framebuffer_extent: extent,
            stats: &stats,
        };
        record_final_pass(&LoggedPass(log.clone()), overlay, &ctx)
    }

    #[test]
    fn test_overlay_draws_after_image_inside_pass() {
        let log = Log::default();
        let mut overlay = LoggedOverlay {
            log: log.clone(),
            fail: false,
        };

        record_with(Some(&mut overlay), &log).unwrap();

        assert_eq!(*log.borrow(), vec!["begin", "draw", "overlay", "end"]);
    }

    #[test]
    fn test_final_pass_without_overlay() {
        let log = Log::default();
        record_with(None, &log).unwrap();
        assert_eq!(*log.borrow(), vec!["begin", "draw", "end"]);
    }

    #[test]
    fn test_overlay_failure_still_closes_pass() {
        let log = Log::default();
        let mut overlay = LoggedOverlay {
            log: log.clone(),
            fail: true,
        };

        let err = record_with(Some(&mut overlay), &log).unwrap_err();

        assert!(matches!(err, RendererError::Overlay { stage: "recording", .. }));
        assert_eq!(*log.borrow(), vec!["begin", "draw", "overlay", "end"]);
    }

    #[test]
    fn test_offscreen_batch_has_two_quads() {
        let batch = offscreen_batch();
        assert_eq!(batch.vertices().len(), 8);
        assert_eq!(batch.index_count(), 12);
        assert_eq!(&batch.indices()[6..], &[4, 5, 6, 6, 7, 4]);
    }

    #[test]
    fn test_offscreen_target_format_has_rgba_order() {
        // Captures are written as PNG without swizzling.
        assert_eq!(
            renderer_rhi::upload::texel_size(OFFSCREEN_FORMAT),
            Some(4)
        );
        assert_eq!(OFFSCREEN_FORMAT, vk::Format::R8G8B8A8_UNORM);
    }
}
