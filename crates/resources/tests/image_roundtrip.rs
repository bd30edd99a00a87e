//! Integration tests for image loading and PNG output.

use renderer_resources::{ImageData, load_image, store_png};

#[test]
fn test_png_roundtrip_preserves_pixels() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("capture.png");

    let (width, height) = (5u32, 3u32);
    let pixels: Vec<u8> = (0..width * height * 4).map(|i| (i * 7) as u8).collect();

    store_png(&path, width, height, &pixels).expect("Failed to write PNG");
    let loaded = load_image(&path).expect("Failed to read PNG back");

    assert_eq!(
        loaded,
        ImageData {
            width,
            height,
            channels: 4,
            pixels,
        }
    );
}

#[test]
fn test_rgb_source_is_expanded_to_rgba() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("rgb.png");

    let rgb = image::RgbImage::from_raw(2, 1, vec![10, 20, 30, 40, 50, 60]).unwrap();
    rgb.save(&path).unwrap();

    let loaded = load_image(&path).unwrap();
    assert_eq!(loaded.channels, 3);
    assert_eq!(loaded.pixels, vec![10, 20, 30, 255, 40, 50, 60, 255]);
}

#[test]
fn test_format_follows_contents_not_extension() {
    let dir = tempfile::tempdir().unwrap();
    let png_path = dir.path().join("texture.png");
    let misnamed = dir.path().join("texture.jpg");

    let pixels = vec![200, 100, 50, 255, 1, 2, 3, 4];
    store_png(&png_path, 2, 1, &pixels).unwrap();
    std::fs::rename(&png_path, &misnamed).unwrap();

    let loaded = load_image(&misnamed).expect("PNG bytes behind a .jpg name");
    assert_eq!((loaded.width, loaded.height), (2, 1));
    assert_eq!(loaded.pixels, pixels);
}
