//! GPU buffer management.
//!
//! - [`BufferUsage`] names the roles buffers play in the engine and maps each
//!   to Vulkan usage and memory property flags
//! - [`Buffer`] wraps a `VkBuffer` and its dedicated [`DeviceMemory`]
//!
//! Device-local buffers are filled through
//! [`staged_upload_buffer`](crate::upload::staged_upload_buffer); host-visible
//! ones are written directly.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use renderer_rhi::device::Device;
//! use renderer_rhi::buffer::{Buffer, BufferUsage};
//!
//! # fn example(device: Arc<Device>) -> Result<(), renderer_rhi::RhiError> {
//! let uniforms = Buffer::with_usage(device, BufferUsage::Uniform, 32)?;
//! uniforms.write(0, &[0u8; 32])?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use crate::device::Device;
use crate::error::{RhiError, RhiResult};
use crate::memory::{DeviceMemory, HOST_VISIBLE_COHERENT};

/// Buffer role.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufferUsage {
    /// Device-local vertex data, filled by a staged upload.
    Vertex,
    /// Device-local index data, filled by a staged upload.
    Index,
    /// Per-frame uniform block, written by the CPU every frame.
    Uniform,
    /// Host-visible source of a transfer.
    Staging,
    /// Host-visible destination of a transfer.
    Readback,
}

impl BufferUsage {
    /// Converts to Vulkan buffer usage flags.
    pub fn to_vk_usage(self) -> vk::BufferUsageFlags {
        match self {
            // TRANSFER_SRC lets device-local buffers be read back for inspection.
            BufferUsage::Vertex => {
                vk::BufferUsageFlags::VERTEX_BUFFER
                    | vk::BufferUsageFlags::TRANSFER_DST
                    | vk::BufferUsageFlags::TRANSFER_SRC
            }
            BufferUsage::Index => {
                vk::BufferUsageFlags::INDEX_BUFFER
                    | vk::BufferUsageFlags::TRANSFER_DST
                    | vk::BufferUsageFlags::TRANSFER_SRC
            }
            BufferUsage::Uniform => vk::BufferUsageFlags::UNIFORM_BUFFER,
            BufferUsage::Staging => vk::BufferUsageFlags::TRANSFER_SRC,
            BufferUsage::Readback => vk::BufferUsageFlags::TRANSFER_DST,
        }
    }

    /// Memory properties requested for this role.
    pub fn memory_properties(self) -> vk::MemoryPropertyFlags {
        match self {
            BufferUsage::Vertex | BufferUsage::Index => vk::MemoryPropertyFlags::DEVICE_LOCAL,
            BufferUsage::Uniform | BufferUsage::Staging | BufferUsage::Readback => {
                HOST_VISIBLE_COHERENT
            }
        }
    }

    /// Returns a human-readable name for the buffer type.
    pub fn name(self) -> &'static str {
        match self {
            BufferUsage::Vertex => "vertex",
            BufferUsage::Index => "index",
            BufferUsage::Uniform => "uniform",
            BufferUsage::Staging => "staging",
            BufferUsage::Readback => "readback",
        }
    }
}

/// GPU buffer with a dedicated memory allocation.
pub struct Buffer {
    buffer: vk::Buffer,
    memory: DeviceMemory,
    device: Arc<Device>,
    /// Requested size in bytes. Zero is allowed; see [`Buffer::new`].
    size: vk::DeviceSize,
    usage: vk::BufferUsageFlags,
}

impl Buffer {
    /// Creates a buffer of `size` bytes backed by memory with at least
    /// `properties`.
    ///
    /// Vulkan forbids zero-sized buffers, so a zero `size` is backed by a
    /// one-byte buffer while [`size`](Self::size) still reports zero.
    ///
    /// # Errors
    ///
    /// [`RhiError::NoSuitableMemoryType`] if the device has no matching
    /// memory type, or a Vulkan error from creation or binding.
    pub fn new(
        device: Arc<Device>,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        properties: vk::MemoryPropertyFlags,
    ) -> RhiResult<Self> {
        let buffer_info = vk::BufferCreateInfo::default()
            .size(size.max(1))
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe { device.handle().create_buffer(&buffer_info, None)? };
        let requirements = unsafe { device.handle().get_buffer_memory_requirements(buffer) };

        let bound = DeviceMemory::allocate(device.clone(), requirements, properties).and_then(
            |memory| {
                unsafe {
                    device
                        .handle()
                        .bind_buffer_memory(buffer, memory.handle(), 0)?;
                }
                Ok(memory)
            },
        );
        let memory = match bound {
            Ok(memory) => memory,
            Err(e) => {
                unsafe { device.handle().destroy_buffer(buffer, None) };
                return Err(e);
            }
        };

        debug!("Created buffer: {} bytes, usage {:?}", size, usage);

        Ok(Self {
            buffer,
            memory,
            device,
            size,
            usage,
        })
    }

    /// Creates a buffer for one of the engine's [`BufferUsage`] roles.
    pub fn with_usage(
        device: Arc<Device>,
        usage: BufferUsage,
        size: vk::DeviceSize,
    ) -> RhiResult<Self> {
        Self::new(device, size, usage.to_vk_usage(), usage.memory_properties())
    }

    /// Creates a host-visible buffer initialised with `data`.
    pub fn new_with_data(device: Arc<Device>, usage: BufferUsage, data: &[u8]) -> RhiResult<Self> {
        let buffer = Self::with_usage(device, usage, data.len() as vk::DeviceSize)?;
        buffer.write(0, data)?;
        Ok(buffer)
    }

    /// Writes `data` at `offset` through a temporary mapping.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::InvalidArgument`] if the buffer is not
    /// host-visible or the write exceeds its size.
    pub fn write(&self, offset: vk::DeviceSize, data: &[u8]) -> RhiResult<()> {
        self.check_range(offset, data.len())?;
        self.memory.write(offset, data)
    }

    /// Reads `len` bytes at `offset` through a temporary mapping.
    pub fn read(&self, offset: vk::DeviceSize, len: usize) -> RhiResult<Vec<u8>> {
        self.check_range(offset, len)?;
        self.memory.read(offset, len)
    }

    fn check_range(&self, offset: vk::DeviceSize, len: usize) -> RhiResult<()> {
        let end = offset.checked_add(len as vk::DeviceSize);
        if end.is_none_or(|end| end > self.size) {
            return Err(RhiError::InvalidArgument(format!(
                "access exceeds buffer size: offset {} + {} > buffer {}",
                offset, len, self.size
            )));
        }
        Ok(())
    }

    /// Returns the Vulkan buffer handle.
    #[inline]
    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    /// Returns the buffer size in bytes.
    #[inline]
    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    #[inline]
    pub fn usage(&self) -> vk::BufferUsageFlags {
        self.usage
    }

    #[inline]
    pub fn is_host_visible(&self) -> bool {
        self.memory.is_host_visible()
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        // The memory field is freed after this body runs.
        unsafe {
            self.device.handle().destroy_buffer(self.buffer, None);
        }
        debug!("Destroyed buffer ({} bytes)", self.size);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_usage_to_vk_usage() {
        assert!(
            BufferUsage::Vertex
                .to_vk_usage()
                .contains(vk::BufferUsageFlags::VERTEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST)
        );
        assert!(
            BufferUsage::Index
                .to_vk_usage()
                .contains(vk::BufferUsageFlags::INDEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST)
        );
        assert_eq!(
            BufferUsage::Uniform.to_vk_usage(),
            vk::BufferUsageFlags::UNIFORM_BUFFER
        );
        assert_eq!(
            BufferUsage::Staging.to_vk_usage(),
            vk::BufferUsageFlags::TRANSFER_SRC
        );
        assert_eq!(
            BufferUsage::Readback.to_vk_usage(),
            vk::BufferUsageFlags::TRANSFER_DST
        );
    }

    #[test]
    fn test_buffer_usage_memory_properties() {
        assert_eq!(
            BufferUsage::Vertex.memory_properties(),
            vk::MemoryPropertyFlags::DEVICE_LOCAL
        );
        assert_eq!(
            BufferUsage::Index.memory_properties(),
            vk::MemoryPropertyFlags::DEVICE_LOCAL
        );
        for usage in [BufferUsage::Uniform, BufferUsage::Staging, BufferUsage::Readback] {
            let props = usage.memory_properties();
            assert!(props.contains(vk::MemoryPropertyFlags::HOST_VISIBLE));
            assert!(props.contains(vk::MemoryPropertyFlags::HOST_COHERENT));
        }
    }

    #[test]
    fn test_buffer_usage_name() {
        assert_eq!(BufferUsage::Vertex.name(), "vertex");
        assert_eq!(BufferUsage::Index.name(), "index");
        assert_eq!(BufferUsage::Uniform.name(), "uniform");
        assert_eq!(BufferUsage::Staging.name(), "staging");
        assert_eq!(BufferUsage::Readback.name(), "readback");
    }
}
