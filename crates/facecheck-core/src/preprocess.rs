//! Illumination and noise normalisation ahead of face detection.
//!
//! Grayscale conversion, global histogram equalization and an
//! edge-preserving bilateral filter, always applied in that order.

use crate::types::{ImageError, PixelMatrix};

/// Bilateral filter parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PreprocessParams {
    /// Diameter of the filter neighbourhood in pixels (radius = diameter / 2).
    pub bilateral_diameter: u32,
    pub sigma_color: f32,
    pub sigma_space: f32,
}

impl Default for PreprocessParams {
    fn default() -> Self {
        Self {
            bilateral_diameter: 9,
            sigma_color: 75.0,
            sigma_space: 75.0,
        }
    }
}

/// Run the full preprocessing chain with default parameters.
///
/// Consumes the decoded matrix; the result has the same spatial size and
/// a single channel.
pub fn preprocess(image: PixelMatrix) -> Result<PixelMatrix, ImageError> {
    preprocess_with(image, &PreprocessParams::default())
}

pub fn preprocess_with(image: PixelMatrix, params: &PreprocessParams) -> Result<PixelMatrix, ImageError> {
    if image.is_empty() {
        return Err(ImageError::InvalidImage("cannot preprocess an empty image".into()));
    }
    let gray = if image.is_gray() {
        image
    } else {
        let converted = to_grayscale(&image);
        drop(image);
        converted
    };
    let equalized = equalize_histogram(&gray);
    drop(gray);
    Ok(bilateral_filter(
        &equalized,
        params.bilateral_diameter,
        params.sigma_color,
        params.sigma_space,
    ))
}

/// Convert RGB(A) or gray+alpha samples to luma.
///
/// Uses the 14-bit fixed-point BT.601 weights (0.299, 0.587, 0.114).
pub fn to_grayscale(image: &PixelMatrix) -> PixelMatrix {
    const R: u32 = 4899;
    const G: u32 = 9617;
    const B: u32 = 1868;
    const SHIFT: u32 = 14;

    let channels = image.channels() as usize;
    if channels == 1 {
        return image.clone();
    }
    let data: Vec<u8> = image
        .data()
        .chunks_exact(channels)
        .map(|px| {
            if channels < 3 {
                px[0]
            } else {
                let y = px[0] as u32 * R + px[1] as u32 * G + px[2] as u32 * B + (1 << (SHIFT - 1));
                (y >> SHIFT) as u8
            }
        })
        .collect();
    gray_from(data, image.width(), image.height())
}

/// Global histogram equalization of a single-channel matrix.
///
/// A constant image is returned unchanged.
pub fn equalize_histogram(gray: &PixelMatrix) -> PixelMatrix {
    let pixels = gray.data();
    let total = pixels.len() as u32;
    if total == 0 {
        return gray.clone();
    }

    let mut hist = [0u32; 256];
    for &p in pixels {
        hist[p as usize] += 1;
    }

    let first = hist.iter().position(|&c| c > 0).unwrap_or(0);
    if hist[first] == total {
        return gray.clone();
    }

    let scale = 255.0f32 / (total - hist[first]) as f32;
    let mut lut = [0u8; 256];
    let mut sum = 0u32;
    for i in (first + 1)..256 {
        sum += hist[i];
        lut[i] = (sum as f32 * scale).round().clamp(0.0, 255.0) as u8;
    }

    let data = pixels.iter().map(|&p| lut[p as usize]).collect();
    gray_from(data, gray.width(), gray.height())
}

/// Edge-preserving smoothing of a single-channel matrix.
///
/// Each output sample is the average of its circular neighbourhood,
/// weighted by spatial distance and by intensity difference. Borders are
/// mirrored without repeating the edge sample.
pub fn bilateral_filter(gray: &PixelMatrix, diameter: u32, sigma_color: f32, sigma_space: f32) -> PixelMatrix {
    let w = gray.width() as i64;
    let h = gray.height() as i64;
    if w == 0 || h == 0 {
        return gray.clone();
    }
    let radius = (diameter / 2).max(1) as i64;
    let sigma_color = if sigma_color <= 0.0 { 1.0 } else { sigma_color };
    let sigma_space = if sigma_space <= 0.0 { 1.0 } else { sigma_space };
    let color_coeff = -0.5 / (sigma_color * sigma_color);
    let space_coeff = -0.5 / (sigma_space * sigma_space);

    let mut color_weight = [0f32; 256];
    for (i, cw) in color_weight.iter_mut().enumerate() {
        let d = i as f32;
        *cw = (d * d * color_coeff).exp();
    }

    let mut kernel: Vec<(i64, i64, f32)> = Vec::new();
    for dy in -radius..=radius {
        for dx in -radius..=radius {
            let r = ((dx * dx + dy * dy) as f32).sqrt();
            if r > radius as f32 {
                continue;
            }
            kernel.push((dx, dy, (r * r * space_coeff).exp()));
        }
    }

    let src = gray.data();
    let mut out = vec![0u8; src.len()];
    for y in 0..h {
        for x in 0..w {
            let center = src[(y * w + x) as usize];
            let mut sum = 0f32;
            let mut wsum = 0f32;
            for &(dx, dy, sw) in &kernel {
                let sx = reflect_101(x + dx, w);
                let sy = reflect_101(y + dy, h);
                let v = src[(sy * w + sx) as usize];
                let weight = sw * color_weight[v.abs_diff(center) as usize];
                sum += v as f32 * weight;
                wsum += weight;
            }
            out[(y * w + x) as usize] = (sum / wsum).round().clamp(0.0, 255.0) as u8;
        }
    }

    gray_from(out, gray.width(), gray.height())
}

/// Mirror an out-of-range index back into `0..len` (`dcb|abcd|cba`).
fn reflect_101(i: i64, len: i64) -> i64 {
    if len == 1 {
        return 0;
    }
    let mut i = i;
    while i < 0 || i >= len {
        if i < 0 {
            i = -i;
        } else {
            i = 2 * len - 2 - i;
        }
    }
    i
}

fn gray_from(data: Vec<u8>, width: u32, height: u32) -> PixelMatrix {
    // Sizes come from an existing matrix, so the length always matches.
    PixelMatrix::gray(data, width, height).unwrap_or_else(|_| PixelMatrix::filled(width, height, 0))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(w: u32, h: u32) -> PixelMatrix {
        let data = (0..w * h).map(|i| (100 + (i % 11)) as u8).collect();
        PixelMatrix::gray(data, w, h).unwrap()
    }

    fn stddev(data: &[u8]) -> f32 {
        let n = data.len() as f32;
        let mean = data.iter().map(|&b| b as f32).sum::<f32>() / n;
        let variance = data.iter().map(|&b| (b as f32 - mean).powi(2)).sum::<f32>() / n;
        variance.sqrt()
    }

    #[test]
    fn test_grayscale_weights() {
        let rgb = PixelMatrix::new(vec![255, 0, 0, 0, 255, 0, 0, 0, 255, 255, 255, 255], 4, 1, 3).unwrap();
        let gray = to_grayscale(&rgb);
        assert_eq!(gray.channels(), 1);
        assert_eq!(gray.data(), &[76, 150, 29, 255]);
    }

    #[test]
    fn test_grayscale_passthrough() {
        let g = ramp(4, 4);
        assert_eq!(to_grayscale(&g), g);
    }

    #[test]
    fn test_equalize_stretches_low_contrast() {
        let g = ramp(16, 16);
        let eq = equalize_histogram(&g);
        assert!(stddev(eq.data()) > stddev(g.data()));
        assert_eq!(*eq.data().iter().min().unwrap(), 0);
        assert_eq!(*eq.data().iter().max().unwrap(), 255);
    }

    #[test]
    fn test_equalize_constant_image_unchanged() {
        let g = PixelMatrix::filled(8, 8, 77);
        assert_eq!(equalize_histogram(&g), g);
    }

    #[test]
    fn test_equalize_two_levels() {
        let mut data = vec![40u8; 32];
        data.extend(vec![200u8; 32]);
        let eq = equalize_histogram(&PixelMatrix::gray(data, 8, 8).unwrap());
        assert!(eq.data()[..32].iter().all(|&p| p == 0));
        assert!(eq.data()[32..].iter().all(|&p| p == 255));
    }

    #[test]
    fn test_bilateral_uniform_stays_uniform() {
        let g = PixelMatrix::filled(12, 9, 128);
        let out = bilateral_filter(&g, 9, 75.0, 75.0);
        assert!(out.data().iter().all(|&p| p == 128));
    }

    #[test]
    fn test_bilateral_preserves_strong_edge() {
        let (w, h) = (20u32, 10u32);
        let data = (0..w * h).map(|i| if i % w < w / 2 { 0 } else { 255 }).collect();
        let out = bilateral_filter(&PixelMatrix::gray(data, w, h).unwrap(), 9, 75.0, 75.0);
        // Pixels adjacent to the edge keep their side's intensity.
        assert!(out.at(w / 2 - 1, 5) < 5, "left of edge: {}", out.at(w / 2 - 1, 5));
        assert!(out.at(w / 2, 5) > 250, "right of edge: {}", out.at(w / 2, 5));
    }

    #[test]
    fn test_bilateral_smooths_noise() {
        let (w, h) = (16u32, 16u32);
        let data = (0..w * h).map(|i| if i % 2 == 0 { 120 } else { 130 }).collect();
        let noisy = PixelMatrix::gray(data, w, h).unwrap();
        let out = bilateral_filter(&noisy, 9, 75.0, 75.0);
        assert!(stddev(out.data()) < stddev(noisy.data()));
    }

    #[test]
    fn test_reflect_101() {
        assert_eq!(reflect_101(-1, 5), 1);
        assert_eq!(reflect_101(-2, 5), 2);
        assert_eq!(reflect_101(5, 5), 3);
        assert_eq!(reflect_101(6, 5), 2);
        assert_eq!(reflect_101(3, 1), 0);
    }

    #[test]
    fn test_preprocess_keeps_size_single_channel() {
        let rgb = PixelMatrix::new(vec![90; 10 * 7 * 3], 10, 7, 3).unwrap();
        let out = preprocess(rgb).unwrap();
        assert_eq!((out.width(), out.height(), out.channels()), (10, 7, 1));
    }

    #[test]
    fn test_preprocess_rejects_empty() {
        let empty = PixelMatrix::new(Vec::new(), 0, 0, 3).unwrap();
        assert!(matches!(preprocess(empty), Err(ImageError::InvalidImage(_))));
    }
}
