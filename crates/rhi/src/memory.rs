//! Device memory allocation.
//!
//! Every buffer and image owns a dedicated `VkDeviceMemory` block whose
//! memory type is chosen by [`find_memory_type`]. There is no suballocation:
//! the engine creates a handful of long-lived objects at startup and a few
//! per frame slot, so one allocation per object stays far below
//! `maxMemoryAllocationCount`.

use std::sync::Arc;

use ash::vk;
use tracing::{debug, trace};

use crate::device::Device;
use crate::error::{RhiError, RhiResult};

/// Host-visible memory that never needs explicit flushes.
pub const HOST_VISIBLE_COHERENT: vk::MemoryPropertyFlags = vk::MemoryPropertyFlags::from_raw(
    vk::MemoryPropertyFlags::HOST_VISIBLE.as_raw() | vk::MemoryPropertyFlags::HOST_COHERENT.as_raw(),
);

/// Returns the first memory type allowed by `type_filter` whose property
/// flags contain every flag in `required`.
///
/// # Errors
///
/// [`RhiError::NoSuitableMemoryType`] when nothing matches. Requested
/// properties are never weakened.
pub fn find_memory_type(
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    type_filter: u32,
    required: vk::MemoryPropertyFlags,
) -> RhiResult<u32> {
    let count = (memory_properties.memory_type_count as usize).min(vk::MAX_MEMORY_TYPES);

    memory_properties.memory_types[..count]
        .iter()
        .enumerate()
        .find(|(index, memory_type)| {
            type_filter & (1 << index) != 0 && memory_type.property_flags.contains(required)
        })
        .map(|(index, _)| index as u32)
        .ok_or(RhiError::NoSuitableMemoryType {
            type_filter,
            properties: required,
        })
}

/// A dedicated `VkDeviceMemory` allocation.
pub struct DeviceMemory {
    device: Arc<Device>,
    memory: vk::DeviceMemory,
    size: vk::DeviceSize,
    properties: vk::MemoryPropertyFlags,
}

impl DeviceMemory {
    /// Allocates memory satisfying `requirements` with at least `properties`.
    pub fn allocate(
        device: Arc<Device>,
        requirements: vk::MemoryRequirements,
        properties: vk::MemoryPropertyFlags,
    ) -> RhiResult<Self> {
        let memory_type_index = find_memory_type(
            device.memory_properties(),
            requirements.memory_type_bits,
            properties,
        )?;

        let allocate_info = vk::MemoryAllocateInfo::default()
            .allocation_size(requirements.size)
            .memory_type_index(memory_type_index);

        let memory = unsafe { device.handle().allocate_memory(&allocate_info, None)? };

        trace!(
            "Allocated {} bytes from memory type {} ({:?})",
            requirements.size, memory_type_index, properties
        );

        Ok(Self {
            device,
            memory,
            size: requirements.size,
            properties,
        })
    }

    #[inline]
    pub fn handle(&self) -> vk::DeviceMemory {
        self.memory
    }

    /// Size of the allocation, which may exceed the size of the bound object.
    #[inline]
    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    #[inline]
    pub fn is_host_visible(&self) -> bool {
        self.properties
            .contains(vk::MemoryPropertyFlags::HOST_VISIBLE)
    }

    /// Maps, copies `data` to `offset`, and unmaps.
    ///
    /// The memory must be host-visible. Coherent memory needs no flush.
    pub fn write(&self, offset: vk::DeviceSize, data: &[u8]) -> RhiResult<()> {
        if data.is_empty() {
            return Ok(());
        }
        self.check_host_range(offset, data.len())?;

        unsafe {
            let ptr = self.device.handle().map_memory(
                self.memory,
                offset,
                data.len() as vk::DeviceSize,
                vk::MemoryMapFlags::empty(),
            )?;
            std::ptr::copy_nonoverlapping(data.as_ptr(), ptr.cast::<u8>(), data.len());
            self.device.handle().unmap_memory(self.memory);
        }
        Ok(())
    }

    /// Maps, copies `len` bytes starting at `offset` out, and unmaps.
    pub fn read(&self, offset: vk::DeviceSize, len: usize) -> RhiResult<Vec<u8>> {
        if len == 0 {
            return Ok(Vec::new());
        }
        self.check_host_range(offset, len)?;

        let mut out = vec![0u8; len];
        unsafe {
            let ptr = self.device.handle().map_memory(
                self.memory,
                offset,
                len as vk::DeviceSize,
                vk::MemoryMapFlags::empty(),
            )?;
            std::ptr::copy_nonoverlapping(ptr.cast::<u8>(), out.as_mut_ptr(), len);
            self.device.handle().unmap_memory(self.memory);
        }
        Ok(out)
    }

    fn check_host_range(&self, offset: vk::DeviceSize, len: usize) -> RhiResult<()> {
        if !self.is_host_visible() {
            return Err(RhiError::InvalidArgument(
                "memory is not host-visible".to_string(),
            ));
        }
        let end = offset.checked_add(len as vk::DeviceSize);
        if end.is_none_or(|end| end > self.size) {
            return Err(RhiError::InvalidArgument(format!(
                "range {}+{} exceeds allocation of {} bytes",
                offset, len, self.size
            )));
        }
        Ok(())
    }
}

impl Drop for DeviceMemory {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().free_memory(self.memory, None);
        }
        debug!("Freed {} bytes of device memory", self.size);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn properties(types: &[vk::MemoryPropertyFlags]) -> vk::PhysicalDeviceMemoryProperties {
        let mut props = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: types.len() as u32,
            memory_heap_count: 1,
            ..Default::default()
        };
        for (slot, flags) in props.memory_types.iter_mut().zip(types) {
            slot.property_flags = *flags;
            slot.heap_index = 0;
        }
        props
    }

    fn typical() -> vk::PhysicalDeviceMemoryProperties {
        properties(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::HOST_VISIBLE,
            HOST_VISIBLE_COHERENT,
            HOST_VISIBLE_COHERENT | vk::MemoryPropertyFlags::HOST_CACHED,
        ])
    }

    #[test]
    fn test_first_superset_match_wins() {
        let props = typical();
        let index = find_memory_type(&props, 0b1111, HOST_VISIBLE_COHERENT).unwrap();
        assert_eq!(index, 2);
    }

    #[test]
    fn test_filter_excludes_types() {
        let props = typical();
        let index = find_memory_type(&props, 0b1000, HOST_VISIBLE_COHERENT).unwrap();
        assert_eq!(index, 3);
    }

    #[test]
    fn test_empty_request_matches_first_allowed() {
        let props = typical();
        let index = find_memory_type(&props, 0b0110, vk::MemoryPropertyFlags::empty()).unwrap();
        assert_eq!(index, 1);
    }

    #[test]
    fn test_no_match_is_an_error() {
        let props = typical();
        let err = find_memory_type(&props, 0b0001, HOST_VISIBLE_COHERENT).unwrap_err();
        assert!(matches!(
            err,
            RhiError::NoSuitableMemoryType { type_filter: 0b0001, .. }
        ));

        let err = find_memory_type(&props, 0, vk::MemoryPropertyFlags::empty()).unwrap_err();
        assert!(matches!(err, RhiError::NoSuitableMemoryType { .. }));
    }

    #[test]
    fn test_bits_beyond_type_count_are_ignored() {
        let props = properties(&[vk::MemoryPropertyFlags::DEVICE_LOCAL]);
        let result = find_memory_type(&props, 0b10, vk::MemoryPropertyFlags::empty());
        assert!(result.is_err());
    }

    #[test]
    fn test_result_always_satisfies_request() {
        let props = typical();
        let requests = [
            vk::MemoryPropertyFlags::empty(),
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::HOST_VISIBLE,
            HOST_VISIBLE_COHERENT,
            vk::MemoryPropertyFlags::HOST_CACHED,
        ];
        for filter in 0u32..16 {
            for &request in &requests {
                match find_memory_type(&props, filter, request) {
                    Ok(index) => {
                        assert_ne!(filter & (1 << index), 0);
                        assert!(props.memory_types[index as usize]
                            .property_flags
                            .contains(request));
                    }
                    Err(_) => {
                        let any = (0..4).any(|i| {
                            filter & (1 << i) != 0
                                && props.memory_types[i].property_flags.contains(request)
                        });
                        assert!(!any, "filter {filter:#b} request {request:?} had a match");
                    }
                }
            }
        }
    }
}
