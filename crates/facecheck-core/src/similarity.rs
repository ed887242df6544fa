//! Three-method similarity ensemble with majority-vote fusion.
//!
//! Every call computes all three signals, one learned (LBPH one-shot
//! distance), one global (intensity histogram correlation) and one spatial
//! (normalised template correlation), then reports each score alongside
//! the fused verdict.

use crate::lbph::{LbphParams, LbphRecognizer, Prediction};
use crate::types::{Method, MethodScore, NormalizedFace, PixelMatrix, VerificationResult};

const REFERENCE_LABEL: i32 = 0;
const HISTOGRAM_BINS: usize = 256;

/// Per-method pass thresholds and the vote quorum.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnsembleThresholds {
    /// Learned method passes below this LBPH distance.
    ///
    /// It also needs a label, which [`LbphParams::threshold`] withholds at
    /// or above its own cut-off. With unit-mass cell histograms the distance
    /// never exceeds `4 * grid_x * grid_y` (256 on the default grid), so
    /// the default of 1000 leaves the LBPH threshold as the deciding gate.
    pub learned_max_distance: f64,
    /// Histogram method passes above this correlation.
    pub histogram_min_correlation: f64,
    /// Template method passes above this peak score.
    pub template_min_score: f64,
    pub min_votes: usize,
}

impl Default for EnsembleThresholds {
    fn default() -> Self {
        Self {
            learned_max_distance: 1000.0,
            histogram_min_correlation: 0.7,
            template_min_score: 0.6,
            min_votes: 2,
        }
    }
}

/// Raw per-method outputs before thresholding.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawScores {
    pub learned: Prediction,
    pub histogram_correlation: f64,
    pub template_peak: f64,
}

impl EnsembleThresholds {
    /// Turn raw scores into per-method verdicts, in [`Method`] order.
    pub fn judge(&self, raw: &RawScores) -> Vec<MethodScore> {
        vec![
            MethodScore {
                method: Method::Learned,
                value: raw.learned.distance,
                passed: raw.learned.label.is_some() && raw.learned.distance < self.learned_max_distance,
            },
            MethodScore {
                method: Method::HistogramCorrelation,
                value: raw.histogram_correlation,
                passed: raw.histogram_correlation > self.histogram_min_correlation,
            },
            MethodScore {
                method: Method::TemplateMatch,
                value: raw.template_peak,
                passed: raw.template_peak > self.template_min_score,
            },
        ]
    }

    pub fn fuse(&self, scores: &[MethodScore]) -> bool {
        scores.iter().filter(|s| s.passed).count() >= self.min_votes
    }
}

/// Strategy for deciding whether two normalised faces show the same person.
///
/// The returned result has an empty `subject_id`; callers fill it in.
pub trait FaceComparator: Send + Sync {
    fn compare(&self, probe: &NormalizedFace, reference: &NormalizedFace) -> VerificationResult;
}

/// LBPH + histogram correlation + template match, majority vote.
#[derive(Debug, Clone, Default)]
pub struct SimilarityEnsemble {
    thresholds: EnsembleThresholds,
    lbph: LbphParams,
}

impl SimilarityEnsemble {
    pub fn new(thresholds: EnsembleThresholds) -> Self {
        Self {
            thresholds,
            lbph: LbphParams::default(),
        }
    }

    pub fn with_lbph(mut self, lbph: LbphParams) -> Self {
        self.lbph = lbph;
        self
    }

    pub fn thresholds(&self) -> &EnsembleThresholds {
        &self.thresholds
    }

    pub fn lbph(&self) -> &LbphParams {
        &self.lbph
    }

    /// Compute all three raw scores.
    pub fn raw_scores(&self, probe: &NormalizedFace, reference: &NormalizedFace) -> RawScores {
        RawScores {
            learned: self.one_shot_distance(probe, reference),
            histogram_correlation: histogram_correlation(
                &intensity_histogram(probe.matrix()),
                &intensity_histogram(reference.matrix()),
            ),
            template_peak: match_template_peak(probe.matrix(), reference.matrix()),
        }
    }

    /// Train a throwaway model on the reference alone and classify the probe.
    fn one_shot_distance(&self, probe: &NormalizedFace, reference: &NormalizedFace) -> Prediction {
        let mut model = LbphRecognizer::new(self.lbph);
        let prediction = model
            .train([(reference.matrix(), REFERENCE_LABEL)])
            .and_then(|()| model.predict(probe.matrix()));
        match prediction {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(error = %e, "learned comparison failed; counting it as a miss");
                Prediction {
                    label: None,
                    distance: f64::INFINITY,
                }
            }
        }
    }
}

impl FaceComparator for SimilarityEnsemble {
    fn compare(&self, probe: &NormalizedFace, reference: &NormalizedFace) -> VerificationResult {
        let raw = self.raw_scores(probe, reference);
        let scores = self.thresholds.judge(&raw);
        let is_match = self.thresholds.fuse(&scores);

        tracing::debug!(
            learned_distance = raw.learned.distance,
            learned_label = ?raw.learned.label,
            histogram_correlation = raw.histogram_correlation,
            template_peak = raw.template_peak,
            is_match,
            "ensemble scores"
        );

        VerificationResult {
            subject_id: String::new(),
            is_match,
            scores,
        }
    }
}

/// 256-bin intensity histogram of a single-channel matrix.
pub fn intensity_histogram(image: &PixelMatrix) -> [f64; HISTOGRAM_BINS] {
    let mut hist = [0f64; HISTOGRAM_BINS];
    for &p in image.data() {
        hist[p as usize] += 1.0;
    }
    hist
}

/// Pearson correlation between two histograms.
///
/// Degenerate (zero-variance) inputs score 1.
pub fn histogram_correlation(a: &[f64], b: &[f64]) -> f64 {
    let n = a.len().min(b.len()) as f64;
    if n == 0.0 {
        return 1.0;
    }
    let (mut s1, mut s2, mut s11, mut s22, mut s12) = (0.0, 0.0, 0.0, 0.0, 0.0);
    for (&x, &y) in a.iter().zip(b) {
        s1 += x;
        s2 += y;
        s11 += x * x;
        s22 += y * y;
        s12 += x * y;
    }
    let num = s12 - s1 * s2 / n;
    let denom2 = (s11 - s1 * s1 / n) * (s22 - s2 * s2 / n);
    if denom2.abs() > f64::EPSILON {
        num / denom2.sqrt()
    } else {
        1.0
    }
}

/// Peak normalised correlation coefficient of `template` slid over `image`.
///
/// A constant template scores 1 everywhere. Returns `f64::NEG_INFINITY` if
/// the template is larger than the image or either input is multi-channel.
pub fn match_template_peak(image: &PixelMatrix, template: &PixelMatrix) -> f64 {
    if !image.is_gray() || !template.is_gray() || template.is_empty() {
        return f64::NEG_INFINITY;
    }
    let (iw, ih) = (image.width() as usize, image.height() as usize);
    let (tw, th) = (template.width() as usize, template.height() as usize);
    if tw > iw || th > ih {
        return f64::NEG_INFINITY;
    }

    let area = (tw * th) as f64;
    let tdata = template.data();
    let t_sum: f64 = tdata.iter().map(|&v| v as f64).sum();
    let t_mean = t_sum / area;
    let t_var = tdata.iter().map(|&v| (v as f64 - t_mean).powi(2)).sum::<f64>() / area;
    if t_var < f64::EPSILON {
        return 1.0;
    }
    let t_norm = t_var.sqrt() * area.sqrt();

    let idata = image.data();
    let mut peak = f64::NEG_INFINITY;
    for oy in 0..=ih - th {
        for ox in 0..=iw - tw {
            let (mut cross, mut w_sum, mut w_sq) = (0.0f64, 0.0f64, 0.0f64);
            for ty in 0..th {
                let row = &idata[(oy + ty) * iw + ox..(oy + ty) * iw + ox + tw];
                let trow = &tdata[ty * tw..(ty + 1) * tw];
                for (&p, &t) in row.iter().zip(trow) {
                    let p = p as f64;
                    cross += p * t as f64;
                    w_sum += p;
                    w_sq += p * p;
                }
            }
            let num = cross - w_sum * t_mean;
            let t = (w_sq - w_sum * w_sum / area).max(0.0).sqrt() * t_norm;
            let score = if num.abs() < t {
                num / t
            } else if num.abs() < t * 1.125 {
                num.signum()
            } else {
                0.0
            };
            peak = peak.max(score);
        }
    }
    peak
}
