//! Local binary pattern histogram (LBPH) face recognizer.
//!
//! Each face is described by the concatenated, per-cell normalised
//! histograms of its circular LBP codes. Prediction is nearest neighbour
//! under the symmetric chi-square distance.

use crate::types::{ImageError, PixelMatrix};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LbphParams {
    pub radius: u32,
    /// Sampling points on the circle. Codes span `2^neighbors` bins.
    pub neighbors: u32,
    pub grid_x: u32,
    pub grid_y: u32,
    /// Predictions at or above this distance carry no label.
    pub threshold: f64,
}

impl Default for LbphParams {
    fn default() -> Self {
        Self {
            radius: 1,
            neighbors: 8,
            grid_x: 8,
            grid_y: 8,
            threshold: 100.0,
        }
    }
}

/// Nearest training sample for a query face.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prediction {
    /// `None` when the nearest distance is not below the rejection threshold.
    pub label: Option<i32>,
    /// Chi-square distance to the nearest sample; infinite for an untrained model.
    pub distance: f64,
}

pub struct LbphRecognizer {
    params: LbphParams,
    histograms: Vec<Vec<f32>>,
    labels: Vec<i32>,
}

impl LbphRecognizer {
    pub fn new(params: LbphParams) -> Self {
        Self {
            params,
            histograms: Vec::new(),
            labels: Vec::new(),
        }
    }

    pub fn params(&self) -> &LbphParams {
        &self.params
    }

    pub fn sample_count(&self) -> usize {
        self.histograms.len()
    }

    /// Add labelled single-channel faces to the model.
    pub fn train<'a, I>(&mut self, samples: I) -> Result<(), ImageError>
    where
        I: IntoIterator<Item = (&'a PixelMatrix, i32)>,
    {
        for (face, label) in samples {
            let histogram = self.describe(face)?;
            self.histograms.push(histogram);
            self.labels.push(label);
        }
        Ok(())
    }

    pub fn predict(&self, face: &PixelMatrix) -> Result<Prediction, ImageError> {
        let query = self.describe(face)?;

        let mut best: Option<(f64, i32)> = None;
        for (histogram, &label) in self.histograms.iter().zip(&self.labels) {
            let distance = chi_square_alt(histogram, &query);
            if best.map_or(true, |(d, _)| distance < d) {
                best = Some((distance, label));
            }
        }

        Ok(match best {
            Some((distance, label)) if distance < self.params.threshold => Prediction {
                label: Some(label),
                distance,
            },
            Some((distance, _)) => Prediction { label: None, distance },
            None => Prediction {
                label: None,
                distance: f64::INFINITY,
            },
        })
    }

    fn describe(&self, face: &PixelMatrix) -> Result<Vec<f32>, ImageError> {
        let p = &self.params;
        if p.grid_x == 0 || p.grid_y == 0 || p.neighbors == 0 || p.neighbors > 16 {
            return Err(ImageError::InvalidImage(format!("unusable LBPH parameters {p:?}")));
        }
        if !face.is_gray() {
            return Err(ImageError::InvalidImage(format!(
                "LBPH expects a single-channel face, got {} channels",
                face.channels()
            )));
        }
        let border = 2 * p.radius;
        if face.width() <= border + p.grid_x || face.height() <= border + p.grid_y {
            return Err(ImageError::InvalidImage(format!(
                "face {}x{} is too small for radius {} and a {}x{} grid",
                face.width(),
                face.height(),
                p.radius,
                p.grid_x,
                p.grid_y
            )));
        }
        let codes = lbp_image(face, p.radius, p.neighbors);
        Ok(spatial_histogram(&codes, 1usize << p.neighbors, p.grid_x, p.grid_y))
    }
}

/// Grid of LBP codes, `2 * radius` smaller than the source in each dimension.
pub struct LbpCodes {
    pub width: usize,
    pub height: usize,
    pub codes: Vec<u32>,
}

/// Circular LBP with bilinearly interpolated sample points.
///
/// Bit `n` is set when the sample at angle `2πn/neighbors` is brighter than
/// (or within float epsilon of) the centre.
pub fn lbp_image(src: &PixelMatrix, radius: u32, neighbors: u32) -> LbpCodes {
    let w = src.width() as usize;
    let h = src.height() as usize;
    let r = radius as usize;
    let out_w = w.saturating_sub(2 * r);
    let out_h = h.saturating_sub(2 * r);
    let mut codes = vec![0u32; out_w * out_h];
    let data = src.data();

    for n in 0..neighbors {
        let angle = 2.0 * std::f64::consts::PI * n as f64 / neighbors as f64;
        let x = (radius as f64 * angle.cos()) as f32;
        let y = (-(radius as f64) * angle.sin()) as f32;
        let (fx, fy) = (x.floor() as isize, y.floor() as isize);
        let (cx, cy) = (x.ceil() as isize, y.ceil() as isize);
        let (tx, ty) = (x - fx as f32, y - fy as f32);
        let w1 = (1.0 - tx) * (1.0 - ty);
        let w2 = tx * (1.0 - ty);
        let w3 = (1.0 - tx) * ty;
        let w4 = tx * ty;

        let at = |row: usize, dy: isize, col: usize, dx: isize| -> f32 {
            let yy = (row as isize + dy) as usize;
            let xx = (col as isize + dx) as usize;
            data[yy * w + xx] as f32
        };

        for i in r..h.saturating_sub(r) {
            for j in r..w.saturating_sub(r) {
                let t = w1 * at(i, fy, j, fx) + w2 * at(i, fy, j, cx) + w3 * at(i, cy, j, fx) + w4 * at(i, cy, j, cx);
                let c = data[i * w + j] as f32;
                if t > c || (t - c).abs() < f32::EPSILON {
                    codes[(i - r) * out_w + (j - r)] |= 1 << n;
                }
            }
        }
    }

    LbpCodes {
        width: out_w,
        height: out_h,
        codes,
    }
}

/// Concatenated per-cell histograms, each normalised by its cell's pixel count.
///
/// Cells are `width / grid_x` by `height / grid_y`; leftover columns and rows
/// are ignored.
pub fn spatial_histogram(codes: &LbpCodes, bins: usize, grid_x: u32, grid_y: u32) -> Vec<f32> {
    let (gx, gy) = (grid_x as usize, grid_y as usize);
    let cell_w = codes.width / gx;
    let cell_h = codes.height / gy;
    let cell_total = (cell_w * cell_h) as f32;
    let mut out = vec![0f32; gx * gy * bins];

    for row in 0..gy {
        for col in 0..gx {
            let hist = &mut out[(row * gx + col) * bins..(row * gx + col + 1) * bins];
            for y in row * cell_h..(row + 1) * cell_h {
                for x in col * cell_w..(col + 1) * cell_w {
                    let code = codes.codes[y * codes.width + x] as usize;
                    if code < bins {
                        hist[code] += 1.0;
                    }
                }
            }
            if cell_total > 0.0 {
                for v in hist.iter_mut() {
                    *v /= cell_total;
                }
            }
        }
    }
    out
}

/// Symmetric chi-square: `2 * Σ (a - b)² / (a + b)`, skipping empty bins.
pub fn chi_square_alt(a: &[f32], b: &[f32]) -> f64 {
    let sum: f64 = a
        .iter()
        .zip(b)
        .map(|(&x, &y)| {
            let (x, y) = (x as f64, y as f64);
            let denom = x + y;
            if denom.abs() > f64::EPSILON {
                (x - y) * (x - y) / denom
            } else {
                0.0
            }
        })
        .sum();
    2.0 * sum
}
