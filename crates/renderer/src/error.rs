//! Error type for the renderer.

use thiserror::Error;

use renderer_resources::ResourceError;
use renderer_rhi::RhiError;

use crate::overlay::OverlayError;

/// Errors raised while building or driving the frame loop.
#[derive(Error, Debug)]
pub enum RendererError {
    /// GPU-side failure, including frame-fatal Vulkan results.
    #[error(transparent)]
    Rhi(#[from] RhiError),

    /// A shader blob or texture could not be loaded.
    #[error("Asset '{name}' could not be loaded: {source}")]
    Asset {
        /// Which asset was being loaded.
        name: String,
        #[source]
        source: ResourceError,
    },

    /// Screenshot encoding failed.
    #[error("Capture failed: {0}")]
    Capture(#[source] ResourceError),

    /// Window or surface setup failed.
    #[error("Platform error: {0}")]
    Platform(#[from] renderer_core::Error),

    /// The debug overlay reported a failure.
    #[error("Debug overlay failed during {stage}: {source}")]
    Overlay {
        /// Which overlay callback failed.
        stage: &'static str,
        #[source]
        source: OverlayError,
    },

    /// An operation was requested in a state that cannot serve it.
    #[error("Invalid renderer state: {0}")]
    InvalidState(String),
}

/// Result alias for renderer operations.
pub type RendererResult<T> = Result<T, RendererError>;
