//! Render passes and framebuffers.
//!
//! The engine uses two single-subpass render passes with one colour
//! attachment each:
//!
//! - the **offscreen** pass clears and stores into a sampled image and leaves
//!   it in `SHADER_READ_ONLY_OPTIMAL`; its subpass dependencies order the
//!   previous frame's sampling before the write, and the write before the
//!   next fragment-shader read, so no explicit barrier is needed
//! - the **present** pass clears the swapchain image and leaves it in
//!   `PRESENT_SRC_KHR`

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use crate::device::Device;
use crate::error::RhiResult;

/// Which of the two pass shapes to build.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PassKind {
    Offscreen,
    Present,
}

impl PassKind {
    pub fn final_layout(self) -> vk::ImageLayout {
        match self {
            PassKind::Offscreen => vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            PassKind::Present => vk::ImageLayout::PRESENT_SRC_KHR,
        }
    }

    /// Colour attachment description for `format`.
    pub fn attachment(self, format: vk::Format) -> vk::AttachmentDescription {
        vk::AttachmentDescription::default()
            .format(format)
            .samples(vk::SampleCountFlags::TYPE_1)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .final_layout(self.final_layout())
    }

    /// Subpass dependencies for the pass.
    pub fn dependencies(self) -> Vec<vk::SubpassDependency> {
        match self {
            PassKind::Offscreen => vec![
                vk::SubpassDependency::default()
                    .src_subpass(vk::SUBPASS_EXTERNAL)
                    .dst_subpass(0)
                    .src_stage_mask(vk::PipelineStageFlags::FRAGMENT_SHADER)
                    .dst_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
                    .src_access_mask(vk::AccessFlags::SHADER_READ)
                    .dst_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE)
                    .dependency_flags(vk::DependencyFlags::BY_REGION),
                vk::SubpassDependency::default()
                    .src_subpass(0)
                    .dst_subpass(vk::SUBPASS_EXTERNAL)
                    .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
                    .dst_stage_mask(vk::PipelineStageFlags::FRAGMENT_SHADER)
                    .src_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE)
                    .dst_access_mask(vk::AccessFlags::SHADER_READ)
                    .dependency_flags(vk::DependencyFlags::BY_REGION),
            ],
            PassKind::Present => vec![
                // Waits for the acquire semaphore's stage before the clear writes.
                vk::SubpassDependency::default()
                    .src_subpass(vk::SUBPASS_EXTERNAL)
                    .dst_subpass(0)
                    .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
                    .dst_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
                    .src_access_mask(vk::AccessFlags::empty())
                    .dst_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE),
            ],
        }
    }
}

/// Single-subpass render pass with one colour attachment.
pub struct RenderPass {
    device: Arc<Device>,
    render_pass: vk::RenderPass,
    kind: PassKind,
    format: vk::Format,
}

impl RenderPass {
    pub fn new(device: Arc<Device>, kind: PassKind, format: vk::Format) -> RhiResult<Self> {
        let attachments = [kind.attachment(format)];
        let color_refs = [vk::AttachmentReference::default()
            .attachment(0)
            .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)];
        let subpasses = [vk::SubpassDescription::default()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&color_refs)];
        let dependencies = kind.dependencies();

        let create_info = vk::RenderPassCreateInfo::default()
            .attachments(&attachments)
            .subpasses(&subpasses)
            .dependencies(&dependencies);

        let render_pass = unsafe { device.handle().create_render_pass(&create_info, None)? };

        debug!("Created {:?} render pass ({:?})", kind, format);

        Ok(Self {
            device,
            render_pass,
            kind,
            format,
        })
    }

    #[inline]
    pub fn handle(&self) -> vk::RenderPass {
        self.render_pass
    }

    #[inline]
    pub fn kind(&self) -> PassKind {
        self.kind
    }

    #[inline]
    pub fn format(&self) -> vk::Format {
        self.format
    }
}

impl Drop for RenderPass {
    fn drop(&mut self) {
        unsafe {
            self.device
                .handle()
                .destroy_render_pass(self.render_pass, None);
        }
    }
}

/// Framebuffer over a single colour view.
pub struct Framebuffer {
    device: Arc<Device>,
    framebuffer: vk::Framebuffer,
    extent: vk::Extent2D,
}

impl Framebuffer {
    pub fn new(
        device: Arc<Device>,
        render_pass: &RenderPass,
        view: vk::ImageView,
        extent: vk::Extent2D,
    ) -> RhiResult<Self> {
        let attachments = [view];
        let create_info = vk::FramebufferCreateInfo::default()
            .render_pass(render_pass.handle())
            .attachments(&attachments)
            .width(extent.width)
            .height(extent.height)
            .layers(1);

        let framebuffer = unsafe { device.handle().create_framebuffer(&create_info, None)? };

        Ok(Self {
            device,
            framebuffer,
            extent,
        })
    }

    #[inline]
    pub fn handle(&self) -> vk::Framebuffer {
        self.framebuffer
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }
}

impl Drop for Framebuffer {
    fn drop(&mut self) {
        unsafe {
            self.device
                .handle()
                .destroy_framebuffer(self.framebuffer, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offscreen_attachment_ends_sampleable() {
        let attachment = PassKind::Offscreen.attachment(vk::Format::R8G8B8A8_SRGB);
        assert_eq!(attachment.load_op, vk::AttachmentLoadOp::CLEAR);
        assert_eq!(attachment.store_op, vk::AttachmentStoreOp::STORE);
        assert_eq!(attachment.initial_layout, vk::ImageLayout::UNDEFINED);
        assert_eq!(
            attachment.final_layout,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
        );
    }

    #[test]
    fn test_present_attachment_ends_presentable() {
        let attachment = PassKind::Present.attachment(vk::Format::B8G8R8A8_SRGB);
        assert_eq!(attachment.format, vk::Format::B8G8R8A8_SRGB);
        assert_eq!(attachment.final_layout, vk::ImageLayout::PRESENT_SRC_KHR);
    }

    #[test]
    fn test_offscreen_dependencies_bracket_the_write() {
        let deps = PassKind::Offscreen.dependencies();
        assert_eq!(deps.len(), 2);

        let before = &deps[0];
        assert_eq!(before.src_subpass, vk::SUBPASS_EXTERNAL);
        assert_eq!(before.src_access_mask, vk::AccessFlags::SHADER_READ);
        assert_eq!(
            before.dst_access_mask,
            vk::AccessFlags::COLOR_ATTACHMENT_WRITE
        );

        let after = &deps[1];
        assert_eq!(after.dst_subpass, vk::SUBPASS_EXTERNAL);
        assert_eq!(after.src_access_mask, vk::AccessFlags::COLOR_ATTACHMENT_WRITE);
        assert_eq!(after.dst_stage_mask, vk::PipelineStageFlags::FRAGMENT_SHADER);
        assert_eq!(after.dst_access_mask, vk::AccessFlags::SHADER_READ);
    }

    #[test]
    fn test_present_dependency_waits_on_color_output() {
        let deps = PassKind::Present.dependencies();
        assert_eq!(deps.len(), 1);
        assert_eq!(
            deps[0].src_stage_mask,
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
        );
        assert_eq!(
            deps[0].dst_access_mask,
            vk::AccessFlags::COLOR_ATTACHMENT_WRITE
        );
    }
}
