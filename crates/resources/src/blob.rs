//! Binary blob loading.

use std::path::Path;

use tracing::debug;

use crate::error::{ResourceError, ResourceResult};

/// Reads a whole file into memory.
///
/// An existing but empty file is returned as an empty vector; callers that
/// need content (shader creation, for example) decide whether that is fatal.
///
/// # Errors
///
/// Returns [`ResourceError::FileNotFound`] if `path` does not exist and
/// [`ResourceError::Io`] for any other read failure.
pub fn load_binary_blob(path: impl AsRef<Path>) -> ResourceResult<Vec<u8>> {
    let path = path.as_ref();
    match std::fs::read(path) {
        Ok(bytes) => {
            debug!("Loaded {} bytes from {:?}", bytes.len(), path);
            Ok(bytes)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(ResourceError::FileNotFound(path.to_path_buf()))
        }
        Err(source) => Err(ResourceError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}
