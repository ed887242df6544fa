//! Image decoding into 3-channel [`PixelMatrix`] buffers.

use crate::types::{ImageError, PixelMatrix};
use image::{DynamicImage, ImageReader};
use std::io::Cursor;
use std::path::Path;

/// Decode an in-memory encoded image (JPEG, PNG, BMP, ...).
pub fn decode(bytes: &[u8]) -> Result<PixelMatrix, ImageError> {
    if bytes.is_empty() {
        return Err(ImageError::InvalidImage("empty payload".into()));
    }
    let img = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| ImageError::InvalidImage(format!("format detection: {e}")))?
        .decode()
        .map_err(|e| ImageError::InvalidImage(e.to_string()))?;
    into_color_matrix(img)
}

/// Decode an image file. The format is sniffed from content, not the extension.
pub fn decode_file(path: &Path) -> Result<PixelMatrix, ImageError> {
    let img = ImageReader::open(path)
        .map_err(|e| ImageError::InvalidImage(format!("{}: {e}", path.display())))?
        .with_guessed_format()
        .map_err(|e| ImageError::InvalidImage(format!("{}: {e}", path.display())))?
        .decode()
        .map_err(|e| ImageError::InvalidImage(format!("{}: {e}", path.display())))?;
    into_color_matrix(img)
}

fn into_color_matrix(img: DynamicImage) -> Result<PixelMatrix, ImageError> {
    let rgb = img.into_rgb8();
    let (width, height) = rgb.dimensions();
    if width == 0 || height == 0 {
        return Err(ImageError::InvalidImage(format!(
            "decoded image is degenerate ({width}x{height})"
        )));
    }
    tracing::trace!(width, height, "decoded image");
    PixelMatrix::new(rgb.into_raw(), width, height, 3)
}
