//! One-shot transfer commands and the staged upload protocol.
//!
//! Everything here blocks on `vkQueueWaitIdle`. It is meant for setup-time
//! resources (geometry, textures) and for diagnostics such as screenshots,
//! never for the per-frame path.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use renderer_rhi::device::Device;
//! use renderer_rhi::upload::Uploader;
//! use renderer_rhi::vk;
//!
//! # fn example(device: Arc<Device>) -> Result<(), renderer_rhi::RhiError> {
//! let uploader = Uploader::new(device)?;
//! let indices: [u16; 6] = [0, 1, 2, 2, 3, 0];
//! let buffer = uploader.staged_upload_buffer(
//!     bytemuck::cast_slice(&indices),
//!     vk::BufferUsageFlags::INDEX_BUFFER,
//! )?;
//! assert_eq!(uploader.download_buffer(&buffer)?, bytemuck::cast_slice::<u16, u8>(&indices));
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use crate::buffer::{Buffer, BufferUsage};
use crate::command::{CommandBuffer, CommandPool};
use crate::device::Device;
use crate::error::{RhiError, RhiResult};
use crate::image::{self, Image, color_subresource_layers};

/// Bytes per texel for the colour formats the engine copies to and from buffers.
pub fn texel_size(format: vk::Format) -> Option<u32> {
    match format {
        vk::Format::R8G8B8A8_SRGB
        | vk::Format::R8G8B8A8_UNORM
        | vk::Format::B8G8R8A8_SRGB
        | vk::Format::B8G8R8A8_UNORM => Some(4),
        _ => None,
    }
}

fn image_byte_len(extent: vk::Extent2D, format: vk::Format) -> RhiResult<usize> {
    let texel = texel_size(format).ok_or_else(|| {
        RhiError::InvalidArgument(format!("no buffer copy layout for format {:?}", format))
    })?;
    Ok(extent.width as usize * extent.height as usize * texel as usize)
}

/// A primary command buffer recorded once, submitted, and waited on.
pub struct OneShot<'a> {
    pool: &'a CommandPool,
    cmd: CommandBuffer,
}

impl<'a> OneShot<'a> {
    /// Allocates a command buffer from `pool` and begins recording.
    pub fn begin(pool: &'a CommandPool) -> RhiResult<Self> {
        let handle = pool.allocate_command_buffer()?;
        let cmd = CommandBuffer::from_handle(pool.device().clone(), handle);
        let one_shot = Self { pool, cmd };
        one_shot.cmd.begin()?;
        Ok(one_shot)
    }

    #[inline]
    pub fn cmd(&self) -> &CommandBuffer {
        &self.cmd
    }

    /// Ends recording, submits to the graphics queue and waits for it to drain.
    pub fn submit_and_wait(self) -> RhiResult<()> {
        self.cmd.end()?;

        let device = self.pool.device();
        let command_buffers = [self.cmd.handle()];
        let submit_info = vk::SubmitInfo::default().command_buffers(&command_buffers);
        unsafe {
            device.submit_graphics(&[submit_info], vk::Fence::null())?;
        }
        device.wait_graphics_idle()
    }
}

impl Drop for OneShot<'_> {
    fn drop(&mut self) {
        self.pool.free(&[self.cmd.handle()]);
    }
}

/// Owner of the transient command pool used for blocking transfers.
pub struct Uploader {
    pool: CommandPool,
}

impl Uploader {
    pub fn new(device: Arc<Device>) -> RhiResult<Self> {
        let family = device.queue_families().graphics;
        Ok(Self {
            pool: CommandPool::new_transient(device, family)?,
        })
    }

    #[inline]
    pub fn device(&self) -> &Arc<Device> {
        self.pool.device()
    }

    /// Runs `record` inside a one-shot command buffer and waits for it.
    pub fn run<F>(&self, record: F) -> RhiResult<()>
    where
        F: FnOnce(&CommandBuffer) -> RhiResult<()>,
    {
        let one_shot = OneShot::begin(&self.pool)?;
        record(one_shot.cmd())?;
        one_shot.submit_and_wait()
    }

    /// Copies `data` into a new device-local buffer through a staging buffer.
    ///
    /// `usage` is extended with `TRANSFER_DST` (the copy target) and
    /// `TRANSFER_SRC` (so the contents can be read back).
    pub fn staged_upload_buffer(
        &self,
        data: &[u8],
        usage: vk::BufferUsageFlags,
    ) -> RhiResult<Buffer> {
        let size = data.len() as vk::DeviceSize;
        let staging = Buffer::new_with_data(self.device().clone(), BufferUsage::Staging, data)?;

        let destination = Buffer::new(
            self.device().clone(),
            size,
            usage | vk::BufferUsageFlags::TRANSFER_DST | vk::BufferUsageFlags::TRANSFER_SRC,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )?;

        if size > 0 {
            self.run(|cmd| {
                let region = vk::BufferCopy::default().size(size);
                cmd.copy_buffer(staging.handle(), destination.handle(), &[region]);
                Ok(())
            })?;
        }

        debug!("Staged upload of {} bytes into device-local buffer", size);
        Ok(destination)
    }

    /// Creates a device-local sampled image from tightly packed `pixels`.
    ///
    /// The image ends in `SHADER_READ_ONLY_OPTIMAL`.
    pub fn staged_upload_image(
        &self,
        width: u32,
        height: u32,
        format: vk::Format,
        pixels: &[u8],
    ) -> RhiResult<Image> {
        let extent = vk::Extent2D { width, height };
        let expected = image_byte_len(extent, format)?;
        if pixels.len() != expected {
            return Err(RhiError::InvalidArgument(format!(
                "{}x{} {:?} image needs {} bytes, got {}",
                width,
                height,
                format,
                expected,
                pixels.len()
            )));
        }

        let staging = Buffer::new_with_data(self.device().clone(), BufferUsage::Staging, pixels)?;

        let image = Image::new(
            self.device().clone(),
            width,
            height,
            format,
            vk::ImageUsageFlags::TRANSFER_DST
                | vk::ImageUsageFlags::TRANSFER_SRC
                | vk::ImageUsageFlags::SAMPLED,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )?;

        self.run(|cmd| {
            image::record_layout_transition(
                cmd,
                image.handle(),
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            )?;
            cmd.copy_buffer_to_image(
                staging.handle(),
                image.handle(),
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[buffer_image_copy(extent)],
            );
            image::record_layout_transition(
                cmd,
                image.handle(),
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            )
        })?;

        debug!("Staged upload of {}x{} image ({:?})", width, height, format);
        Ok(image)
    }

    /// Reads a buffer's contents back through a host-visible buffer.
    ///
    /// The source must have been created with `TRANSFER_SRC`.
    pub fn download_buffer(&self, source: &Buffer) -> RhiResult<Vec<u8>> {
        let size = source.size();
        if size == 0 {
            return Ok(Vec::new());
        }

        let readback = Buffer::with_usage(self.device().clone(), BufferUsage::Readback, size)?;
        self.run(|cmd| {
            let region = vk::BufferCopy::default().size(size);
            cmd.copy_buffer(source.handle(), readback.handle(), &[region]);
            Ok(())
        })?;

        readback.read(0, size as usize)
    }

    /// Reads a colour image that currently sits in `SHADER_READ_ONLY_OPTIMAL`
    /// back as tightly packed texels, leaving it in the same layout.
    pub fn download_image(&self, source: &Image) -> RhiResult<Vec<u8>> {
        let extent = source.extent();
        let len = image_byte_len(extent, source.format())?;
        let readback = Buffer::with_usage(
            self.device().clone(),
            BufferUsage::Readback,
            len as vk::DeviceSize,
        )?;

        self.run(|cmd| {
            image::record_layout_transition(
                cmd,
                source.handle(),
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            )?;
            cmd.copy_image_to_buffer(
                source.handle(),
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                readback.handle(),
                &[buffer_image_copy(extent)],
            );
            image::record_layout_transition(
                cmd,
                source.handle(),
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            )
        })?;

        readback.read(0, len)
    }
}

fn buffer_image_copy(extent: vk::Extent2D) -> vk::BufferImageCopy {
    vk::BufferImageCopy::default()
        .buffer_offset(0)
        .buffer_row_length(0)
        .buffer_image_height(0)
        .image_subresource(color_subresource_layers())
        .image_offset(vk::Offset3D { x: 0, y: 0, z: 0 })
        .image_extent(vk::Extent3D {
            width: extent.width,
            height: extent.height,
            depth: 1,
        })
}
