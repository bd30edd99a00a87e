//! Error types for asset loading.

use std::path::PathBuf;
use thiserror::Error;

/// Error type for asset loading operations.
#[derive(Error, Debug)]
pub enum ResourceError {
    /// The file does not exist.
    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    /// The file exists but could not be read or written.
    #[error("IO error on '{path}': {source}")]
    Io {
        /// Path of the file.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },

    /// The image could not be decoded or encoded.
    #[error("Image error on '{path}': {source}")]
    Image {
        /// Path of the image.
        path: PathBuf,
        /// Underlying error.
        source: image::ImageError,
    },

    /// Pixel data does not match the stated dimensions.
    #[error("Pixel buffer of {len} bytes does not match {width}x{height} RGBA8")]
    PixelLength {
        width: u32,
        height: u32,
        len: usize,
    },
}

/// Result type alias for asset operations.
pub type ResourceResult<T> = Result<T, ResourceError>;
