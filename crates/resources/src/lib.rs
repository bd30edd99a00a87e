//! Asset loading.
//!
//! This crate is the renderer's asset collaborator:
//! - Raw binary blobs such as SPIR-V bytecode ([`load_binary_blob`])
//! - Images decoded to tightly packed RGBA8 ([`load_image`])
//! - PNG output for captured frames ([`store_png`])

mod error;

pub mod blob;
pub mod image_data;

pub use blob::load_binary_blob;
pub use error::{ResourceError, ResourceResult};
pub use image_data::{ImageData, load_image, store_png};
