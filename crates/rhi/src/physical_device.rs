//! Physical device (GPU) selection.
//!
//! Selection runs in two steps. Each enumerated GPU is first summarised as a
//! [`DeviceCandidate`] (device type, surface support, queue families), then
//! [`choose_device`] picks among the summaries: the first suitable discrete
//! GPU, otherwise the first suitable device, in enumeration order.
//!
//! # Example
//!
//! ```no_run
//! use renderer_rhi::instance::Instance;
//! use renderer_rhi::physical_device::select_physical_device;
//! use ash::vk;
//!
//! let instance = Instance::new(false, &[]).expect("Failed to create instance");
//! let surface: vk::SurfaceKHR = vk::SurfaceKHR::null(); // placeholder
//! let surface_loader = ash::khr::surface::Instance::new(instance.entry(), instance.handle());
//!
//! let device_info = select_physical_device(instance.handle(), surface, &surface_loader)
//!     .expect("Failed to select physical device");
//! println!("Selected GPU: {:?}", device_info.device_name());
//! ```

use ash::vk;
use tracing::{debug, info, warn};

use crate::error::{RhiError, RhiResult};

/// Graphics and presentation queue families.
///
/// Both are resolved together; a device that lacks either never gets an
/// instance of this type. They may name the same family.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    /// Family used for command submission.
    pub graphics: u32,
    /// Family used for presentation.
    pub present: u32,
}

impl QueueFamilyIndices {
    /// Returns true if one family serves both roles.
    #[inline]
    pub fn is_shared(&self) -> bool {
        self.graphics == self.present
    }

    /// Distinct family indices, graphics first.
    pub fn unique_families(&self) -> Vec<u32> {
        if self.is_shared() {
            vec![self.graphics]
        } else {
            vec![self.graphics, self.present]
        }
    }
}

/// Scans queue families once and resolves graphics and presentation.
///
/// A family supporting both roles wins as soon as it is seen. Otherwise the
/// first graphics family and the first presenting family are paired.
pub fn derive_queue_family_indices(
    families: &[vk::QueueFamilyProperties],
    mut supports_present: impl FnMut(u32) -> bool,
) -> Option<QueueFamilyIndices> {
    let mut graphics = None;
    let mut present = None;

    for (index, family) in families.iter().enumerate() {
        let index = index as u32;
        if family.queue_count == 0 {
            continue;
        }

        let has_graphics = family.queue_flags.contains(vk::QueueFlags::GRAPHICS);
        let has_present = supports_present(index);

        if has_graphics && has_present {
            return Some(QueueFamilyIndices {
                graphics: index,
                present: index,
            });
        }
        if has_graphics && graphics.is_none() {
            graphics = Some(index);
        }
        if has_present && present.is_none() {
            present = Some(index);
        }
    }

    Some(QueueFamilyIndices {
        graphics: graphics?,
        present: present?,
    })
}

/// What a device offers for a particular surface.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SurfaceSupport {
    /// Device exposes `VK_KHR_swapchain`.
    pub has_swapchain_extension: bool,
    /// Number of surface formats reported.
    pub format_count: usize,
    /// Number of present modes reported.
    pub present_mode_count: usize,
}

impl SurfaceSupport {
    /// True when a swapchain can be built for the surface.
    pub fn is_adequate(&self) -> bool {
        self.has_swapchain_extension && self.format_count > 0 && self.present_mode_count > 0
    }
}

/// Summary of one enumerated GPU, enough to decide whether to use it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeviceCandidate {
    pub device_type: vk::PhysicalDeviceType,
    /// `None` for headless selection, where no surface is involved.
    pub surface_support: Option<SurfaceSupport>,
    pub queue_families: Option<QueueFamilyIndices>,
}

impl DeviceCandidate {
    /// A device whose surface queries failed. It is never chosen.
    pub fn unusable(device_type: vk::PhysicalDeviceType) -> Self {
        Self {
            device_type,
            surface_support: Some(SurfaceSupport {
                has_swapchain_extension: false,
                format_count: 0,
                present_mode_count: 0,
            }),
            queue_families: None,
        }
    }

    pub fn is_suitable(&self) -> bool {
        self.queue_families.is_some() && self.surface_support.is_none_or(|s| s.is_adequate())
    }
}

/// Picks the first suitable discrete GPU, else the first suitable device.
///
/// Returns the index into `candidates`, or `None` when nothing is suitable.
pub fn choose_device(candidates: &[DeviceCandidate]) -> Option<usize> {
    let suitable = || {
        candidates
            .iter()
            .enumerate()
            .filter(|(_, candidate)| candidate.is_suitable())
    };

    suitable()
        .find(|(_, candidate)| candidate.device_type == vk::PhysicalDeviceType::DISCRETE_GPU)
        .or_else(|| suitable().next())
        .map(|(index, _)| index)
}

/// Information about the selected physical device.
#[derive(Clone)]
pub struct PhysicalDeviceInfo {
    /// Vulkan physical device handle.
    pub device: vk::PhysicalDevice,
    /// Device properties (name, limits, API version, etc.).
    pub properties: vk::PhysicalDeviceProperties,
    /// Memory types and heaps, used by `find_memory_type`.
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
    /// Resolved queue families.
    pub queue_families: QueueFamilyIndices,
    /// Whether the device was selected against a surface (swapchain extension required).
    pub presentable: bool,
}

impl PhysicalDeviceInfo {
    /// Returns the device name as a string.
    pub fn device_name(&self) -> &str {
        self.properties
            .device_name_as_c_str()
            .ok()
            .and_then(|name| name.to_str().ok())
            .unwrap_or("Unknown Device")
    }

    /// Returns a human-readable string for the device type.
    pub fn device_type_name(&self) -> &'static str {
        device_type_name(self.properties.device_type)
    }

    /// Returns the Vulkan API version supported by the device.
    pub fn api_version(&self) -> (u32, u32, u32) {
        let version = self.properties.api_version;
        (
            vk::api_version_major(version),
            vk::api_version_minor(version),
            vk::api_version_patch(version),
        )
    }
}

impl std::fmt::Debug for PhysicalDeviceInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (major, minor, patch) = self.api_version();
        f.debug_struct("PhysicalDeviceInfo")
            .field("name", &self.device_name())
            .field("type", &self.device_type_name())
            .field("api_version", &format!("{}.{}.{}", major, minor, patch))
            .field("queue_families", &self.queue_families)
            .field("presentable", &self.presentable)
            .finish()
    }
}

fn device_type_name(device_type: vk::PhysicalDeviceType) -> &'static str {
    match device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => "Discrete GPU",
        vk::PhysicalDeviceType::INTEGRATED_GPU => "Integrated GPU",
        vk::PhysicalDeviceType::VIRTUAL_GPU => "Virtual GPU",
        vk::PhysicalDeviceType::CPU => "CPU",
        _ => "Other",
    }
}

/// Selects a GPU able to render to and present on `surface`.
///
/// # Errors
///
/// Returns [`RhiError::NoSuitableGpu`] if no device exposes the swapchain
/// extension, at least one surface format and present mode, and queue
/// families for both graphics and presentation. A device whose queries fail
/// is logged and skipped.
pub fn select_physical_device(
    instance: &ash::Instance,
    surface: vk::SurfaceKHR,
    surface_loader: &ash::khr::surface::Instance,
) -> RhiResult<PhysicalDeviceInfo> {
    let devices = unsafe { instance.enumerate_physical_devices()? };
    info!("Found {} GPU(s)", devices.len());

    let candidates: Vec<DeviceCandidate> = devices
        .iter()
        .map(|&device| {
            let properties = unsafe { instance.get_physical_device_properties(device) };
            let queried = query_candidate(instance, device, &properties, surface, surface_loader);
            candidate_or_unusable(&properties, queried)
        })
        .collect();

    pick(instance, &devices, &candidates, true)
}

/// Selects a GPU with a graphics queue, ignoring presentation.
///
/// Used for offline work such as resource round trips in tests.
pub fn select_headless_device(instance: &ash::Instance) -> RhiResult<PhysicalDeviceInfo> {
    let devices = unsafe { instance.enumerate_physical_devices()? };

    let candidates: Vec<DeviceCandidate> = devices
        .iter()
        .map(|&device| {
            let properties = unsafe { instance.get_physical_device_properties(device) };
            let families =
                unsafe { instance.get_physical_device_queue_family_properties(device) };
            // Graphics doubles as the "present" family so the indices stay complete.
            let queue_families = derive_queue_family_indices(&families, |index| {
                families[index as usize]
                    .queue_flags
                    .contains(vk::QueueFlags::GRAPHICS)
            });
            DeviceCandidate {
                device_type: properties.device_type,
                surface_support: None,
                queue_families,
            }
        })
        .collect();

    pick(instance, &devices, &candidates, false)
}

fn pick(
    instance: &ash::Instance,
    devices: &[vk::PhysicalDevice],
    candidates: &[DeviceCandidate],
    presentable: bool,
) -> RhiResult<PhysicalDeviceInfo> {
    let Some(index) = choose_device(candidates) else {
        warn!("No suitable GPU found among {} device(s)", devices.len());
        return Err(RhiError::NoSuitableGpu);
    };

    let device = devices[index];
    let queue_families = candidates[index]
        .queue_families
        .ok_or(RhiError::NoSuitableGpu)?;

    let info = PhysicalDeviceInfo {
        device,
        properties: unsafe { instance.get_physical_device_properties(device) },
        memory_properties: unsafe { instance.get_physical_device_memory_properties(device) },
        queue_families,
        presentable,
    };

    let (major, minor, patch) = info.api_version();
    info!(
        "Selected GPU: '{}' ({}) - Vulkan {}.{}.{}, graphics family {}, present family {}",
        info.device_name(),
        info.device_type_name(),
        major,
        minor,
        patch,
        queue_families.graphics,
        queue_families.present
    );

    Ok(info)
}

/// Keeps a queried candidate, or logs the failure and marks the device unusable.
fn candidate_or_unusable(
    properties: &vk::PhysicalDeviceProperties,
    queried: RhiResult<DeviceCandidate>,
) -> DeviceCandidate {
    queried.unwrap_or_else(|e| {
        warn!("Skipping GPU '{}': {}", device_label(properties), e);
        DeviceCandidate::unusable(properties.device_type)
    })
}

fn device_label(properties: &vk::PhysicalDeviceProperties) -> String {
    properties
        .device_name_as_c_str()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn query_candidate(
    instance: &ash::Instance,
    device: vk::PhysicalDevice,
    properties: &vk::PhysicalDeviceProperties,
    surface: vk::SurfaceKHR,
    surface_loader: &ash::khr::surface::Instance,
) -> RhiResult<DeviceCandidate> {
    let extensions = unsafe { instance.enumerate_device_extension_properties(device)? };
    let has_swapchain_extension = extensions.iter().any(|ext| {
        ext.extension_name_as_c_str()
            .is_ok_and(|name| name == ash::khr::swapchain::NAME)
    });

    let (format_count, present_mode_count) = if has_swapchain_extension {
        let formats = unsafe { surface_loader.get_physical_device_surface_formats(device, surface) }
            .map_err(|e| RhiError::surface_query("formats", e))?;
        let present_modes =
            unsafe { surface_loader.get_physical_device_surface_present_modes(device, surface) }
                .map_err(|e| RhiError::surface_query("present modes", e))?;
        (formats.len(), present_modes.len())
    } else {
        (0, 0)
    };

    let families = unsafe { instance.get_physical_device_queue_family_properties(device) };
    let mut support_error = None;
    let queue_families = derive_queue_family_indices(&families, |index| {
        match unsafe { surface_loader.get_physical_device_surface_support(device, index, surface) } {
            Ok(supported) => supported,
            Err(e) => {
                support_error.get_or_insert(e);
                false
            }
        }
    });
    if let Some(e) = support_error {
        return Err(RhiError::surface_query("present support", e));
    }

    let candidate = DeviceCandidate {
        device_type: properties.device_type,
        surface_support: Some(SurfaceSupport {
            has_swapchain_extension,
            format_count,
            present_mode_count,
        }),
        queue_families,
    };

    debug!(
        "GPU '{}' ({}): suitable={}, {:?}",
        device_label(properties),
        device_type_name(properties.device_type),
        candidate.is_suitable(),
        candidate
    );

    Ok(candidate)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: 1,
            ..Default::default()
        }
    }

    fn adequate_surface() -> Option<SurfaceSupport> {
        Some(SurfaceSupport {
            has_swapchain_extension: true,
            format_count: 2,
            present_mode_count: 1,
        })
    }

    fn candidate(device_type: vk::PhysicalDeviceType, suitable: bool) -> DeviceCandidate {
        DeviceCandidate {
            device_type,
            surface_support: adequate_surface(),
            queue_families: suitable.then_some(QueueFamilyIndices {
                graphics: 0,
                present: 0,
            }),
        }
    }

    #[test]
    fn test_prefers_discrete_over_integrated() {
        let candidates = [
            candidate(vk::PhysicalDeviceType::INTEGRATED_GPU, true),
            candidate(vk::PhysicalDeviceType::DISCRETE_GPU, true),
            candidate(vk::PhysicalDeviceType::DISCRETE_GPU, false),
        ];
        assert_eq!(choose_device(&candidates), Some(1));
    }

    #[test]
    fn test_unsuitable_discrete_is_skipped() {
        let candidates = [
            candidate(vk::PhysicalDeviceType::DISCRETE_GPU, false),
            candidate(vk::PhysicalDeviceType::INTEGRATED_GPU, true),
        ];
        assert_eq!(choose_device(&candidates), Some(1));
    }

    #[test]
    fn test_first_suitable_when_no_discrete() {
        let candidates = [
            candidate(vk::PhysicalDeviceType::CPU, false),
            candidate(vk::PhysicalDeviceType::VIRTUAL_GPU, true),
            candidate(vk::PhysicalDeviceType::INTEGRATED_GPU, true),
        ];
        assert_eq!(choose_device(&candidates), Some(1));
    }

    #[test]
    fn test_no_candidates() {
        assert_eq!(choose_device(&[]), None);
        let candidates = [candidate(vk::PhysicalDeviceType::DISCRETE_GPU, false)];
        assert_eq!(choose_device(&candidates), None);
    }

    #[test]
    fn test_surface_support_requirements() {
        let mut c = candidate(vk::PhysicalDeviceType::DISCRETE_GPU, true);
        assert!(c.is_suitable());

        c.surface_support = Some(SurfaceSupport {
            has_swapchain_extension: false,
            format_count: 1,
            present_mode_count: 1,
        });
        assert!(!c.is_suitable());

        c.surface_support = Some(SurfaceSupport {
            has_swapchain_extension: true,
            format_count: 0,
            present_mode_count: 1,
        });
        assert!(!c.is_suitable());

        c.surface_support = Some(SurfaceSupport {
            has_swapchain_extension: true,
            format_count: 1,
            present_mode_count: 0,
        });
        assert!(!c.is_suitable());

        c.surface_support = None;
        assert!(c.is_suitable());
    }

    #[test]
    fn test_single_family_serves_both_roles() {
        let families = [family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::TRANSFER)];
        let indices = derive_queue_family_indices(&families, |_| true).unwrap();
        assert_eq!(indices.graphics, 0);
        assert_eq!(indices.present, 0);
        assert!(indices.is_shared());
        assert_eq!(indices.unique_families(), vec![0]);
    }

    #[test]
    fn test_split_families() {
        let families = [
            family(vk::QueueFlags::GRAPHICS),
            family(vk::QueueFlags::TRANSFER),
        ];
        let indices = derive_queue_family_indices(&families, |i| i == 1).unwrap();
        assert_eq!(indices.graphics, 0);
        assert_eq!(indices.present, 1);
        assert_eq!(indices.unique_families(), vec![0, 1]);
    }

    #[test]
    fn test_combined_family_preferred_over_split() {
        let families = [
            family(vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::GRAPHICS),
            family(vk::QueueFlags::GRAPHICS),
        ];
        let indices = derive_queue_family_indices(&families, |i| i != 1).unwrap();
        assert_eq!(indices.graphics, 2);
        assert_eq!(indices.present, 2);
    }

    #[test]
    fn test_missing_role_fails() {
        let families = [family(vk::QueueFlags::COMPUTE)];
        assert!(derive_queue_family_indices(&families, |_| true).is_none());

        let families = [family(vk::QueueFlags::GRAPHICS)];
        assert!(derive_queue_family_indices(&families, |_| false).is_none());
    }

    #[test]
    fn test_empty_family_is_ignored() {
        let mut empty = family(vk::QueueFlags::GRAPHICS);
        empty.queue_count = 0;
        let families = [empty, family(vk::QueueFlags::GRAPHICS)];
        let indices = derive_queue_family_indices(&families, |_| true).unwrap();
        assert_eq!(indices.graphics, 1);
    }

    #[test]
    fn test_failed_surface_query_skips_device() {
        let properties = vk::PhysicalDeviceProperties {
            device_type: vk::PhysicalDeviceType::DISCRETE_GPU,
            ..Default::default()
        };
        let failed = candidate_or_unusable(
            &properties,
            Err(RhiError::surface_query(
                "present support",
                vk::Result::ERROR_SURFACE_LOST_KHR,
            )),
        );
        assert_eq!(failed.device_type, vk::PhysicalDeviceType::DISCRETE_GPU);
        assert!(!failed.is_suitable());

        let candidates = [
            failed,
            candidate(vk::PhysicalDeviceType::INTEGRATED_GPU, true),
        ];
        assert_eq!(choose_device(&candidates), Some(1));
    }

    #[test]
    fn test_queried_candidate_is_kept() {
        let properties = vk::PhysicalDeviceProperties::default();
        let queried = candidate(vk::PhysicalDeviceType::INTEGRATED_GPU, true);
        assert_eq!(candidate_or_unusable(&properties, Ok(queried)), queried);
    }

    #[test]
    fn test_surface_query_error_names_query() {
        let err = RhiError::surface_query("formats", vk::Result::ERROR_SURFACE_LOST_KHR);
        assert!(matches!(&err, RhiError::SurfaceError(msg) if msg.starts_with("formats query failed")));
    }
}
