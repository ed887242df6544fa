//! Face crop, canonical resize and intensity stretch.

use crate::types::{FaceRegion, ImageError, NormalizedFace, PixelMatrix, CANONICAL_FACE_SIZE};

/// Crop `image` to `region`, resize to 256x256 and min-max stretch to 0–255.
pub fn normalize(image: &PixelMatrix, region: &FaceRegion) -> Result<NormalizedFace, ImageError> {
    let face = crop(image, region)?;
    let resized = resize_bilinear(&face, CANONICAL_FACE_SIZE, CANONICAL_FACE_SIZE);
    drop(face);
    NormalizedFace::try_from(min_max_stretch(&resized))
}

/// Copy the single-channel samples inside `region`.
pub fn crop(image: &PixelMatrix, region: &FaceRegion) -> Result<PixelMatrix, ImageError> {
    if !image.is_gray() {
        return Err(ImageError::InvalidImage(format!(
            "crop expects a single-channel image, got {} channels",
            image.channels()
        )));
    }
    if !region.fits_within(image.width(), image.height()) {
        return Err(ImageError::InvalidRegion {
            region: *region,
            width: image.width(),
            height: image.height(),
        });
    }

    let stride = image.width() as usize;
    let (x0, y0) = (region.x as usize, region.y as usize);
    let (w, h) = (region.width as usize, region.height as usize);
    let src = image.data();
    let mut out = Vec::with_capacity(w * h);
    for y in y0..y0 + h {
        out.extend_from_slice(&src[y * stride + x0..y * stride + x0 + w]);
    }
    PixelMatrix::gray(out, region.width, region.height)
}

/// Resize a single-channel matrix with bilinear interpolation on pixel centres.
pub fn resize_bilinear(image: &PixelMatrix, new_w: u32, new_h: u32) -> PixelMatrix {
    let width = image.width() as usize;
    let height = image.height() as usize;
    let (new_w, new_h) = (new_w as usize, new_h as usize);
    if width == 0 || height == 0 || new_w == 0 || new_h == 0 {
        return PixelMatrix::filled(new_w as u32, new_h as u32, 0);
    }
    if width == new_w && height == new_h {
        return image.clone();
    }

    let frame = image.data();
    let inv_scale_x = width as f32 / new_w as f32;
    let inv_scale_y = height as f32 / new_h as f32;
    let mut resized = vec![0u8; new_w * new_h];
    for y in 0..new_h {
        let src_y = (y as f32 + 0.5) * inv_scale_y - 0.5;
        let y0 = (src_y.floor() as i32).clamp(0, height as i32 - 1) as usize;
        let y1 = (y0 + 1).min(height - 1);
        let fy = (src_y - src_y.floor()).clamp(0.0, 1.0);
        let fy = if src_y < 0.0 { 0.0 } else { fy };

        for x in 0..new_w {
            let src_x = (x as f32 + 0.5) * inv_scale_x - 0.5;
            let x0 = (src_x.floor() as i32).clamp(0, width as i32 - 1) as usize;
            let x1 = (x0 + 1).min(width - 1);
            let fx = (src_x - src_x.floor()).clamp(0.0, 1.0);
            let fx = if src_x < 0.0 { 0.0 } else { fx };

            let tl = frame[y0 * width + x0] as f32;
            let tr = frame[y0 * width + x1] as f32;
            let bl = frame[y1 * width + x0] as f32;
            let br = frame[y1 * width + x1] as f32;

            let val = tl * (1.0 - fx) * (1.0 - fy)
                + tr * fx * (1.0 - fy)
                + bl * (1.0 - fx) * fy
                + br * fx * fy;

            resized[y * new_w + x] = val.round().clamp(0.0, 255.0) as u8;
        }
    }

    PixelMatrix::gray(resized, new_w as u32, new_h as u32)
        .unwrap_or_else(|_| PixelMatrix::filled(new_w as u32, new_h as u32, 0))
}

/// Linearly map the sample range `[min, max]` onto `[0, 255]`.
///
/// A constant matrix maps to all zeros.
pub fn min_max_stretch(image: &PixelMatrix) -> PixelMatrix {
    let data = image.data();
    let (min, max) = data
        .iter()
        .fold((u8::MAX, u8::MIN), |(lo, hi), &p| (lo.min(p), hi.max(p)));
    let range = max.saturating_sub(min) as f64;

    let out = data
        .iter()
        .map(|&p| {
            if range > 0.0 {
                ((p - min) as f64 * 255.0 / range).round().clamp(0.0, 255.0) as u8
            } else {
                0
            }
        })
        .collect();
    PixelMatrix::new(out, image.width(), image.height(), image.channels())
        .unwrap_or_else(|_| image.clone())
}
