//! Image decoding and encoding.

use std::path::Path;

use image::{ImageFormat, ImageReader, RgbaImage};
use tracing::{debug, info};

use crate::error::{ResourceError, ResourceResult};

/// A decoded image in tightly packed RGBA8.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImageData {
    pub width: u32,
    pub height: u32,
    /// Channels in the source file before expansion to RGBA.
    pub channels: u8,
    /// `width * height * 4` bytes, row-major, top row first.
    pub pixels: Vec<u8>,
}

impl ImageData {
    /// Wraps existing RGBA8 pixels.
    ///
    /// # Errors
    ///
    /// Returns [`ResourceError::PixelLength`] if `pixels` is not exactly
    /// `width * height * 4` bytes.
    pub fn from_rgba8(width: u32, height: u32, pixels: Vec<u8>) -> ResourceResult<Self> {
        if pixels.len() != rgba_len(width, height) {
            return Err(ResourceError::PixelLength {
                width,
                height,
                len: pixels.len(),
            });
        }
        Ok(Self {
            width,
            height,
            channels: 4,
            pixels,
        })
    }
}

fn rgba_len(width: u32, height: u32) -> usize {
    width as usize * height as usize * 4
}

/// Decodes an image file into RGBA8.
///
/// The format is guessed from the file contents, falling back to the
/// extension when the contents are not recognised. Grey, RGB and 16-bit
/// sources are converted; `channels` records what the file held.
///
/// # Errors
///
/// Returns [`ResourceError::FileNotFound`] if the file is missing,
/// [`ResourceError::Io`] if it cannot be read, or [`ResourceError::Image`]
/// if it cannot be decoded.
pub fn load_image(path: impl AsRef<Path>) -> ResourceResult<ImageData> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(ResourceError::FileNotFound(path.to_path_buf()));
    }

    let io_error = |source| ResourceError::Io {
        path: path.to_path_buf(),
        source,
    };
    let decoded = ImageReader::open(path)
        .and_then(|reader| reader.with_guessed_format())
        .map_err(io_error)?
        .decode()
        .map_err(|source| ResourceError::Image {
            path: path.to_path_buf(),
            source,
        })?;
    let channels = decoded.color().channel_count();
    let rgba = decoded.into_rgba8();

    debug!(
        "Decoded {:?}: {}x{}, {} channel(s)",
        path,
        rgba.width(),
        rgba.height(),
        channels
    );

    Ok(ImageData {
        width: rgba.width(),
        height: rgba.height(),
        channels,
        pixels: rgba.into_raw(),
    })
}

/// Writes RGBA8 pixels to `path` as PNG.
///
/// # Errors
///
/// Returns [`ResourceError::PixelLength`] if the buffer does not match the
/// dimensions, or [`ResourceError::Image`] if encoding or writing fails.
pub fn store_png(
    path: impl AsRef<Path>,
    width: u32,
    height: u32,
    pixels: &[u8],
) -> ResourceResult<()> {
    let path = path.as_ref();
    let buffer = RgbaImage::from_raw(width, height, pixels.to_vec()).ok_or(
        ResourceError::PixelLength {
            width,
            height,
            len: pixels.len(),
        },
    )?;

    buffer
        .save_with_format(path, ImageFormat::Png)
        .map_err(|source| ResourceError::Image {
            path: path.to_path_buf(),
            source,
        })?;

    info!("Wrote {}x{} PNG to {:?}", width, height, path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_rgba8_checks_length() {
        assert!(ImageData::from_rgba8(2, 2, vec![0; 16]).is_ok());
        assert!(matches!(
            ImageData::from_rgba8(2, 2, vec![0; 12]),
            Err(ResourceError::PixelLength { len: 12, .. })
        ));
    }

    #[test]
    fn test_load_image_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = load_image(dir.path().join("nope.png"));
        assert!(matches!(result, Err(ResourceError::FileNotFound(_))));
    }

    #[test]
    fn test_load_image_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("garbage.png");
        std::fs::write(&path, b"definitely not an image").unwrap();

        assert!(matches!(load_image(&path), Err(ResourceError::Image { .. })));
    }

    #[test]
    fn test_store_png_rejects_short_buffer() {
        let dir = tempfile::tempdir().unwrap();
        let result = store_png(dir.path().join("out.png"), 4, 4, &[0; 8]);
        assert!(matches!(result, Err(ResourceError::PixelLength { .. })));
    }
}
