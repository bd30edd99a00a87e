//! RHI-specific error types.

use ash::vk;
use thiserror::Error;

/// RHI-specific error type.
///
/// Out-of-date and suboptimal swapchain results are not represented here;
/// see [`AcquireOutcome`](crate::swapchain::AcquireOutcome) and
/// [`PresentOutcome`](crate::swapchain::PresentOutcome).
#[derive(Error, Debug)]
pub enum RhiError {
    /// Vulkan API error
    #[error("Vulkan error: {0}")]
    VulkanError(#[from] vk::Result),

    /// Failed to load Vulkan
    #[error("Failed to load Vulkan: {0}")]
    LoadingError(#[from] ash::LoadingError),

    /// No physical device supports the swapchain, the surface and both queue roles
    #[error("No suitable GPU found")]
    NoSuitableGpu,

    /// No memory type matches both the filter and the requested properties
    #[error("No suitable memory type (filter {type_filter:#b}, properties {properties:?})")]
    NoSuitableMemoryType {
        /// Memory-type bitmask reported by the resource.
        type_filter: u32,
        /// Requested property flags.
        properties: vk::MemoryPropertyFlags,
    },

    /// Shader bytecode was empty, which means the loader could not find or read it
    #[error("Shader bytecode is empty or missing: {0}")]
    EmptyShader(String),

    /// Shader bytecode length is not a multiple of four
    #[error("Shader bytecode '{name}' has invalid length {len}")]
    MisalignedShader {
        /// Name of the shader blob.
        name: String,
        /// Byte length.
        len: usize,
    },

    /// Image layout transition outside the supported set
    #[error("Unsupported image layout transition: {old:?} -> {new:?}")]
    UnsupportedLayoutTransition {
        /// Current layout.
        old: vk::ImageLayout,
        /// Requested layout.
        new: vk::ImageLayout,
    },

    /// A surface capability or support query failed
    #[error("Surface error: {0}")]
    SurfaceError(String),

    /// Swapchain error
    #[error("Swapchain error: {0}")]
    SwapchainError(String),

    /// Pipeline creation error
    #[error("Pipeline error: {0}")]
    PipelineError(String),

    /// Invalid argument passed to an RHI call
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl RhiError {
    /// Wraps a failed surface query, naming what was asked.
    pub fn surface_query(what: &str, result: vk::Result) -> Self {
        RhiError::SurfaceError(format!("{what} query failed: {result}"))
    }
}

/// Result type alias for RHI operations.
pub type RhiResult<T> = std::result::Result<T, RhiError>;
