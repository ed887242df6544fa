//! Viola-Jones Haar cascade detector.
//!
//! Evaluates boosted Haar cascades in the OpenCV XML layout
//! (`stageType` BOOST, `featureType` HAAR) over an image pyramid, then
//! merges overlapping raw hits into candidate faces.

use crate::locator::{DetectParams, FaceDetector};
use crate::normalizer::resize_bilinear;
use crate::types::{FaceRegion, PixelMatrix};
use once_cell::sync::OnceCell;
use quick_xml::events::Event;
use quick_xml::Reader;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Similarity tolerance used when grouping raw hits.
pub const GROUP_EPS: f64 = 0.2;
const STAGE_THRESHOLD_EPS: f32 = 1e-5;

static GLOBAL_CASCADE: OnceCell<HaarCascade> = OnceCell::new();

#[derive(Error, Debug)]
pub enum CascadeError {
    #[error("cascade file not found: {0} (set FACECHECK_CASCADE_FILE to an OpenCV Haar cascade)")]
    NotFound(String),
    #[error("failed to read cascade {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed cascade: {0}")]
    Malformed(String),
    #[error("unsupported cascade: {0}")]
    Unsupported(String),
    #[error("xml: {0}")]
    Xml(#[from] quick_xml::Error),
}

#[derive(Debug, Clone, Copy)]
struct WeightedRect {
    x: u32,
    y: u32,
    width: u32,
    height: u32,
    weight: f32,
}

#[derive(Debug, Clone, Default)]
struct HaarFeature {
    rects: Vec<WeightedRect>,
}

/// Internal tree node. Child indices `<= 0` address leaf `-index`.
#[derive(Debug, Clone, Copy)]
struct TreeNode {
    left: i32,
    right: i32,
    feature: usize,
    threshold: f32,
}

#[derive(Debug, Clone, Default)]
struct WeakClassifier {
    nodes: Vec<TreeNode>,
    leaves: Vec<f32>,
}

#[derive(Debug, Clone, Default)]
struct Stage {
    threshold: f32,
    classifiers: Vec<WeakClassifier>,
}

/// A loaded, immutable Haar cascade. Safe to share across threads.
#[derive(Debug, Clone)]
pub struct HaarCascade {
    window_width: u32,
    window_height: u32,
    stages: Vec<Stage>,
    features: Vec<HaarFeature>,
    source: Option<PathBuf>,
}

impl HaarCascade {
    /// Load a cascade definition from an XML file.
    pub fn load(path: &Path) -> Result<Self, CascadeError> {
        if !path.exists() {
            return Err(CascadeError::NotFound(path.display().to_string()));
        }
        let xml = std::fs::read_to_string(path).map_err(|source| CascadeError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let mut cascade = Self::from_xml(&xml)?;
        cascade.source = Some(path.to_path_buf());

        tracing::info!(
            path = %path.display(),
            window_width = cascade.window_width,
            window_height = cascade.window_height,
            stages = cascade.stages.len(),
            features = cascade.features.len(),
            "loaded Haar cascade"
        );
        Ok(cascade)
    }

    /// Process-wide cascade, loaded from `path` on first use only.
    ///
    /// Concurrent first calls block until the single load finishes. Later
    /// calls with a different path get the already-loaded cascade.
    pub fn global(path: &Path) -> Result<&'static HaarCascade, CascadeError> {
        let cascade = GLOBAL_CASCADE.get_or_try_init(|| Self::load(path))?;
        if cascade.source.as_deref() != Some(path) {
            tracing::warn!(
                requested = %path.display(),
                loaded = ?cascade.source,
                "cascade already initialised from another path; reusing it"
            );
        }
        Ok(cascade)
    }

    /// Parse a cascade from OpenCV's XML serialisation.
    pub fn from_xml(xml: &str) -> Result<Self, CascadeError> {
        let mut reader = Reader::from_str(xml);
        reader.trim_text(true);
        let mut buf = Vec::new();
        let mut path: Vec<String> = Vec::new();
        let mut builder = CascadeBuilder::default();

        loop {
            match reader.read_event_into(&mut buf)? {
                Event::Start(e) => {
                    path.push(String::from_utf8_lossy(e.name().as_ref()).into_owned());
                    builder.open(&path)?;
                }
                Event::End(_) => {
                    path.pop();
                }
                Event::Text(t) => {
                    let text = t.unescape()?;
                    builder.text(&path, &text)?;
                }
                Event::Eof => break,
                _ => {}
            }
            buf.clear();
        }

        builder.finish()
    }

    /// Detection window size (width, height) at scale 1.
    pub fn window_size(&self) -> (u32, u32) {
        (self.window_width, self.window_height)
    }

    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Scan the image pyramid and return grouped candidate regions.
    pub fn detect_multi_scale(&self, image: &PixelMatrix, params: &DetectParams) -> Vec<FaceRegion> {
        if image.is_empty() || !image.is_gray() {
            tracing::warn!(
                width = image.width(),
                height = image.height(),
                channels = image.channels(),
                "cascade needs a non-empty single-channel image"
            );
            return Vec::new();
        }
        if params.scale_factor.is_nan() || params.scale_factor <= 1.0 {
            tracing::warn!(scale_factor = params.scale_factor, "scale factor must exceed 1.0");
            return Vec::new();
        }

        let raw = self.raw_hits(image, params);
        let grouped = group_rectangles(&raw, params.min_neighbors, GROUP_EPS);
        tracing::trace!(raw = raw.len(), grouped = grouped.len(), "cascade scan");

        grouped
            .into_iter()
            .filter_map(|r| FaceRegion::clamped(r.x, r.y, r.width, r.height, image.width(), image.height()))
            .collect()
    }

    fn raw_hits(&self, image: &PixelMatrix, params: &DetectParams) -> Vec<Rect> {
        let (img_w, img_h) = (image.width() as f64, image.height() as f64);
        let (win_w0, win_h0) = (self.window_width, self.window_height);
        let mut hits = Vec::new();

        let mut factor = 1.0f64;
        loop {
            let win_w = (win_w0 as f64 * factor).round() as u32;
            let win_h = (win_h0 as f64 * factor).round() as u32;
            let scaled_w = (img_w / factor).round() as u32;
            let scaled_h = (img_h / factor).round() as u32;

            if scaled_w < win_w0 || scaled_h < win_h0 {
                break;
            }
            if let Some((max_w, max_h)) = params.max_size {
                if win_w > max_w || win_h > max_h {
                    break;
                }
            }
            if win_w < params.min_size.0 || win_h < params.min_size.1 {
                factor *= params.scale_factor;
                continue;
            }

            let scaled = resize_bilinear(image, scaled_w, scaled_h);
            let integral = IntegralImage::new(&scaled);
            let step = if factor > 2.0 { 1 } else { 2 };

            for y in (0..=scaled_h - win_h0).step_by(step) {
                for x in (0..=scaled_w - win_w0).step_by(step) {
                    if self.evaluate_window(&integral, x, y) {
                        hits.push(Rect {
                            x: (x as f64 * factor).round() as i64,
                            y: (y as f64 * factor).round() as i64,
                            width: win_w as i64,
                            height: win_h as i64,
                        });
                    }
                }
            }

            factor *= params.scale_factor;
        }

        hits
    }

    /// Run every stage on the window whose top-left corner is `(x, y)`.
    fn evaluate_window(&self, integral: &IntegralImage, x: u32, y: u32) -> bool {
        // Variance normalisation over the window inset by one pixel.
        let (nw, nh) = (self.window_width - 2, self.window_height - 2);
        let area = (nw * nh) as f64;
        let sum = integral.sum(x + 1, y + 1, nw, nh) as f64;
        let sq_sum = integral.sq_sum(x + 1, y + 1, nw, nh) as f64;
        let nf = area * sq_sum - sum * sum;
        let inv_norm = if nf > 0.0 { 1.0 / nf.sqrt() } else { 1.0 };

        for stage in &self.stages {
            let mut stage_sum = 0.0f32;
            for classifier in &stage.classifiers {
                let mut idx = 0i32;
                let leaf = loop {
                    let node = &classifier.nodes[idx as usize];
                    let value = (self.feature_value(node.feature, integral, x, y) * inv_norm) as f32;
                    idx = if value < node.threshold { node.left } else { node.right };
                    if idx <= 0 {
                        break classifier.leaves[(-idx) as usize];
                    }
                };
                stage_sum += leaf;
            }
            if stage_sum < stage.threshold - STAGE_THRESHOLD_EPS {
                return false;
            }
        }
        true
    }

    fn feature_value(&self, feature: usize, integral: &IntegralImage, x: u32, y: u32) -> f64 {
        self.features[feature]
            .rects
            .iter()
            .map(|r| r.weight as f64 * integral.sum(x + r.x, y + r.y, r.width, r.height) as f64)
            .sum()
    }
}

impl FaceDetector for HaarCascade {
    fn detect(&self, image: &PixelMatrix, params: &DetectParams) -> Vec<FaceRegion> {
        self.detect_multi_scale(image, params)
    }
}

/// Summed-area tables for sums and squared sums.
struct IntegralImage {
    stride: usize,
    sum: Vec<u64>,
    sq_sum: Vec<u64>,
}

impl IntegralImage {
    fn new(image: &PixelMatrix) -> Self {
        let w = image.width() as usize;
        let h = image.height() as usize;
        let stride = w + 1;
        let mut sum = vec![0u64; stride * (h + 1)];
        let mut sq_sum = vec![0u64; stride * (h + 1)];
        let src = image.data();

        for y in 0..h {
            let mut row = 0u64;
            let mut row_sq = 0u64;
            for x in 0..w {
                let v = src[y * w + x] as u64;
                row += v;
                row_sq += v * v;
                let idx = (y + 1) * stride + x + 1;
                sum[idx] = sum[idx - stride] + row;
                sq_sum[idx] = sq_sum[idx - stride] + row_sq;
            }
        }

        Self { stride, sum, sq_sum }
    }

    fn sum(&self, x: u32, y: u32, w: u32, h: u32) -> u64 {
        Self::rect(&self.sum, self.stride, x, y, w, h)
    }

    fn sq_sum(&self, x: u32, y: u32, w: u32, h: u32) -> u64 {
        Self::rect(&self.sq_sum, self.stride, x, y, w, h)
    }

    fn rect(table: &[u64], stride: usize, x: u32, y: u32, w: u32, h: u32) -> u64 {
        let (x0, y0) = (x as usize, y as usize);
        let (x1, y1) = (x0 + w as usize, y0 + h as usize);
        table[y1 * stride + x1] + table[y0 * stride + x0] - table[y1 * stride + x0] - table[y0 * stride + x1]
    }
}

/// Raw detection rectangle in source-image coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Rect {
    x: i64,
    y: i64,
    width: i64,
    height: i64,
}

fn similar(a: &Rect, b: &Rect, eps: f64) -> bool {
    let delta = eps * (a.width.min(b.width) + a.height.min(b.height)) as f64 * 0.5;
    (a.x - b.x).abs() as f64 <= delta
        && (a.y - b.y).abs() as f64 <= delta
        && (a.x + a.width - b.x - b.width).abs() as f64 <= delta
        && (a.y + a.height - b.y - b.height).abs() as f64 <= delta
}

fn find_root(parent: &mut [usize], mut i: usize) -> usize {
    while parent[i] != i {
        parent[i] = parent[parent[i]];
        i = parent[i];
    }
    i
}

/// Cluster similar rectangles and average each cluster.
///
/// Clusters with `group_threshold` members or fewer are dropped, as are
/// clusters nested inside a better-supported one. A threshold of zero
/// returns the input unchanged.
fn group_rectangles(rects: &[Rect], group_threshold: u32, eps: f64) -> Vec<Rect> {
    if group_threshold == 0 || rects.is_empty() {
        return rects.to_vec();
    }

    let n = rects.len();
    let mut parent: Vec<usize> = (0..n).collect();
    for i in 0..n {
        for j in (i + 1)..n {
            if similar(&rects[i], &rects[j], eps) {
                let (ri, rj) = (find_root(&mut parent, i), find_root(&mut parent, j));
                if ri != rj {
                    parent[rj] = ri;
                }
            }
        }
    }

    // Label clusters in order of first appearance.
    let mut label_of_root = vec![usize::MAX; n];
    let mut sums: Vec<(i64, i64, i64, i64)> = Vec::new();
    let mut counts: Vec<u32> = Vec::new();
    for (i, r) in rects.iter().enumerate() {
        let root = find_root(&mut parent, i);
        if label_of_root[root] == usize::MAX {
            label_of_root[root] = sums.len();
            sums.push((0, 0, 0, 0));
            counts.push(0);
        }
        let label = label_of_root[root];
        let s = &mut sums[label];
        s.0 += r.x;
        s.1 += r.y;
        s.2 += r.width;
        s.3 += r.height;
        counts[label] += 1;
    }

    let averaged: Vec<Rect> = sums
        .iter()
        .zip(&counts)
        .map(|(s, &c)| {
            let c = c as f64;
            Rect {
                x: (s.0 as f64 / c).round() as i64,
                y: (s.1 as f64 / c).round() as i64,
                width: (s.2 as f64 / c).round() as i64,
                height: (s.3 as f64 / c).round() as i64,
            }
        })
        .collect();

    let mut out = Vec::new();
    for (i, r1) in averaged.iter().enumerate() {
        let n1 = counts[i];
        if n1 <= group_threshold {
            continue;
        }
        let nested = averaged.iter().enumerate().any(|(j, r2)| {
            let n2 = counts[j];
            if j == i || n2 <= group_threshold {
                return false;
            }
            let dx = (r2.width as f64 * eps).round() as i64;
            let dy = (r2.height as f64 * eps).round() as i64;
            r1.x >= r2.x - dx
                && r1.y >= r2.y - dy
                && r1.x + r1.width <= r2.x + r2.width + dx
                && r1.y + r1.height <= r2.y + r2.height + dy
                && (n2 > n1.max(3) || n1 < 3)
        });
        if !nested {
            out.push(*r1);
        }
    }
    out
}

/// Accumulates cascade parts while walking the XML tree.
#[derive(Default)]
struct CascadeBuilder {
    stage_type: Option<String>,
    feature_type: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    stages: Vec<Stage>,
    features: Vec<HaarFeature>,
}

fn ends_with(path: &[String], suffix: &[&str]) -> bool {
    path.len() >= suffix.len()
        && path[path.len() - suffix.len()..]
            .iter()
            .zip(suffix)
            .all(|(a, b)| a == b)
}

fn parse_numbers<T: std::str::FromStr>(text: &str, what: &str) -> Result<Vec<T>, CascadeError> {
    text.split_whitespace()
        .map(|tok| {
            tok.parse::<T>()
                .map_err(|_| CascadeError::Malformed(format!("bad number {tok:?} in {what}")))
        })
        .collect()
}

impl CascadeBuilder {
    fn open(&mut self, path: &[String]) -> Result<(), CascadeError> {
        if ends_with(path, &["cascade", "stages", "_"]) {
            self.stages.push(Stage::default());
        } else if ends_with(path, &["stages", "_", "weakClassifiers", "_"]) {
            self.current_stage()?.classifiers.push(WeakClassifier::default());
        } else if ends_with(path, &["cascade", "features", "_"]) {
            self.features.push(HaarFeature::default());
        }
        Ok(())
    }

    fn current_stage(&mut self) -> Result<&mut Stage, CascadeError> {
        self.stages
            .last_mut()
            .ok_or_else(|| CascadeError::Malformed("classifier outside of a stage".into()))
    }

    fn current_classifier(&mut self) -> Result<&mut WeakClassifier, CascadeError> {
        self.current_stage()?
            .classifiers
            .last_mut()
            .ok_or_else(|| CascadeError::Malformed("tree data outside of a classifier".into()))
    }

    fn text(&mut self, path: &[String], text: &str) -> Result<(), CascadeError> {
        if ends_with(path, &["cascade", "stageType"]) {
            self.stage_type = Some(text.trim().to_string());
        } else if ends_with(path, &["cascade", "featureType"]) {
            self.feature_type = Some(text.trim().to_string());
        } else if ends_with(path, &["cascade", "width"]) {
            self.width = parse_numbers::<u32>(text, "width")?.first().copied();
        } else if ends_with(path, &["cascade", "height"]) {
            self.height = parse_numbers::<u32>(text, "height")?.first().copied();
        } else if ends_with(path, &["stages", "_", "stageThreshold"]) {
            let v = parse_numbers::<f32>(text, "stageThreshold")?;
            self.current_stage()?.threshold = *v
                .first()
                .ok_or_else(|| CascadeError::Malformed("empty stageThreshold".into()))?;
        } else if ends_with(path, &["weakClassifiers", "_", "internalNodes"]) {
            let values = parse_numbers::<f64>(text, "internalNodes")?;
            if values.is_empty() || values.len() % 4 != 0 {
                return Err(CascadeError::Unsupported(format!(
                    "internalNodes with {} values (only ordered HAAR nodes of 4 values are supported)",
                    values.len()
                )));
            }
            let nodes = values
                .chunks_exact(4)
                .map(|c| TreeNode {
                    left: c[0] as i32,
                    right: c[1] as i32,
                    feature: c[2] as usize,
                    threshold: c[3] as f32,
                })
                .collect();
            self.current_classifier()?.nodes = nodes;
        } else if ends_with(path, &["weakClassifiers", "_", "leafValues"]) {
            self.current_classifier()?.leaves = parse_numbers::<f32>(text, "leafValues")?;
        } else if ends_with(path, &["features", "_", "rects", "_"]) {
            let v = parse_numbers::<f32>(text, "rect")?;
            if v.len() != 5 || v[..4].iter().any(|&c| c < 0.0) {
                return Err(CascadeError::Malformed(format!("rect needs x y w h weight, got {text:?}")));
            }
            let feature = self
                .features
                .last_mut()
                .ok_or_else(|| CascadeError::Malformed("rect outside of a feature".into()))?;
            feature.rects.push(WeightedRect {
                x: v[0] as u32,
                y: v[1] as u32,
                width: v[2] as u32,
                height: v[3] as u32,
                weight: v[4],
            });
        } else if ends_with(path, &["features", "_", "tilted"]) && text.trim() != "0" {
            return Err(CascadeError::Unsupported("tilted Haar features".into()));
        }
        Ok(())
    }

    fn finish(self) -> Result<HaarCascade, CascadeError> {
        if let Some(stage_type) = &self.stage_type {
            if stage_type != "BOOST" {
                return Err(CascadeError::Unsupported(format!("stageType {stage_type}")));
            }
        }
        match self.feature_type.as_deref() {
            Some("HAAR") => {}
            Some(other) => return Err(CascadeError::Unsupported(format!("featureType {other}"))),
            None => {
                return Err(CascadeError::Unsupported(
                    "missing featureType (legacy opencv-haar-classifier files are not supported)".into(),
                ))
            }
        }
        let (width, height) = match (self.width, self.height) {
            (Some(w), Some(h)) if w > 2 && h > 2 => (w, h),
            _ => return Err(CascadeError::Malformed("window width/height missing or too small".into())),
        };
        if self.stages.is_empty() {
            return Err(CascadeError::Malformed("no stages".into()));
        }

        for (fi, feature) in self.features.iter().enumerate() {
            if feature.rects.is_empty() {
                return Err(CascadeError::Malformed(format!("feature {fi} has no rects")));
            }
            for r in &feature.rects {
                if r.x + r.width > width || r.y + r.height > height {
                    return Err(CascadeError::Malformed(format!(
                        "feature {fi} rect exceeds the {width}x{height} window"
                    )));
                }
            }
        }
        for (si, stage) in self.stages.iter().enumerate() {
            if stage.classifiers.is_empty() {
                return Err(CascadeError::Malformed(format!("stage {si} has no classifiers")));
            }
            for classifier in &stage.classifiers {
                validate_tree(classifier, self.features.len())
                    .map_err(|msg| CascadeError::Malformed(format!("stage {si}: {msg}")))?;
            }
        }

        Ok(HaarCascade {
            window_width: width,
            window_height: height,
            stages: self.stages,
            features: self.features,
            source: None,
        })
    }
}

fn validate_tree(classifier: &WeakClassifier, feature_count: usize) -> Result<(), String> {
    if classifier.nodes.is_empty() {
        return Err("classifier has no nodes".into());
    }
    let nodes = classifier.nodes.len() as i32;
    let leaves = classifier.leaves.len() as i32;
    for node in &classifier.nodes {
        if node.feature >= feature_count {
            return Err(format!("feature index {} out of range", node.feature));
        }
        for child in [node.left, node.right] {
            let ok = if child > 0 { child < nodes } else { -child < leaves };
            if !ok {
                return Err(format!("child index {child} out of range"));
            }
        }
    }
    // Positive children must point forward so evaluation terminates.
    for (i, node) in classifier.nodes.iter().enumerate() {
        for child in [node.left, node.right] {
            if child > 0 && child as usize <= i {
                return Err(format!("node {i} points backwards to {child}"));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const BLOCK_CASCADE: &str = include_str!("../tests/fixtures/block_cascade.xml");

    fn block_scene(size: u32, block_at: u32, block: u32) -> PixelMatrix {
        let mut data = vec![255u8; (size * size) as usize];
        for y in block_at..block_at + block {
            for x in block_at..block_at + block {
                data[(y * size + x) as usize] = 0;
            }
        }
        PixelMatrix::gray(data, size, size).unwrap()
    }

    fn rect(x: i64, y: i64, w: i64, h: i64) -> Rect {
        Rect { x, y, width: w, height: h }
    }

    #[test]
    fn test_parse_block_cascade() {
        let cascade = HaarCascade::from_xml(BLOCK_CASCADE).unwrap();
        assert_eq!(cascade.window_size(), (24, 24));
        assert_eq!(cascade.stage_count(), 1);
        assert_eq!(cascade.features.len(), 1);
        assert_eq!(cascade.features[0].rects.len(), 2);
        let node = cascade.stages[0].classifiers[0].nodes[0];
        assert_eq!((node.left, node.right, node.feature), (0, -1, 0));
        assert!((node.threshold + 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_rejects_tilted_features() {
        let xml = BLOCK_CASCADE.replace("</rects>", "</rects><tilted>1</tilted>");
        assert!(matches!(HaarCascade::from_xml(&xml), Err(CascadeError::Unsupported(_))));
    }

    #[test]
    fn test_rejects_lbp_cascades() {
        let xml = BLOCK_CASCADE.replace("<featureType>HAAR</featureType>", "<featureType>LBP</featureType>");
        assert!(matches!(HaarCascade::from_xml(&xml), Err(CascadeError::Unsupported(_))));
    }

    #[test]
    fn test_rejects_feature_index_out_of_range() {
        let xml = BLOCK_CASCADE.replace("0 -1 0 -0.5", "0 -1 7 -0.5");
        assert!(matches!(HaarCascade::from_xml(&xml), Err(CascadeError::Malformed(_))));
    }

    #[test]
    fn test_rejects_rect_outside_window() {
        let xml = BLOCK_CASCADE.replace("6 6 12 12 4.", "20 20 12 12 4.");
        assert!(matches!(HaarCascade::from_xml(&xml), Err(CascadeError::Malformed(_))));
    }

    #[test]
    fn test_load_missing_file() {
        let err = HaarCascade::load(Path::new("/nonexistent/cascade.xml")).unwrap_err();
        assert!(matches!(err, CascadeError::NotFound(_)));
    }

    #[test]
    fn test_integral_image_sums() {
        let image = PixelMatrix::gray((1..=12).collect(), 4, 3).unwrap();
        let ii = IntegralImage::new(&image);
        assert_eq!(ii.sum(0, 0, 4, 3), 78);
        assert_eq!(ii.sum(1, 1, 2, 2), 6 + 7 + 10 + 11);
        assert_eq!(ii.sq_sum(0, 0, 1, 2), 1 + 25);
    }

    #[test]
    fn test_uniform_field_has_no_candidates() {
        let cascade = HaarCascade::from_xml(BLOCK_CASCADE).unwrap();
        let image = PixelMatrix::filled(96, 96, 180);
        assert!(cascade.detect_multi_scale(&image, &DetectParams::default()).is_empty());
    }

    #[test]
    fn test_detects_dark_block() {
        let cascade = HaarCascade::from_xml(BLOCK_CASCADE).unwrap();
        let image = block_scene(96, 32, 32);
        let found = cascade.detect_multi_scale(&image, &DetectParams::default());
        assert!(!found.is_empty());
        for r in &found {
            assert!(r.fits_within(96, 96));
            assert!(r.width >= 30 && r.height >= 30);
        }
        assert!(
            found.iter().any(|r| r.x <= 48 && r.y <= 48 && r.x + r.width >= 48 && r.y + r.height >= 48),
            "no candidate covers the block centre: {found:?}"
        );
    }

    #[test]
    fn test_min_size_excludes_small_windows() {
        let cascade = HaarCascade::from_xml(BLOCK_CASCADE).unwrap();
        let image = block_scene(96, 32, 32);
        let params = DetectParams { min_size: (200, 200), ..DetectParams::default() };
        assert!(cascade.detect_multi_scale(&image, &params).is_empty());
    }

    #[test]
    fn test_invalid_scale_factor_returns_nothing() {
        let cascade = HaarCascade::from_xml(BLOCK_CASCADE).unwrap();
        let image = block_scene(96, 32, 32);
        let params = DetectParams { scale_factor: 1.0, ..DetectParams::default() };
        assert!(cascade.detect_multi_scale(&image, &params).is_empty());
    }

    #[test]
    fn test_group_rectangles_requires_neighbors() {
        let rects = vec![rect(10, 10, 40, 40), rect(11, 10, 40, 40), rect(10, 11, 41, 40)];
        assert_eq!(group_rectangles(&rects, 3, GROUP_EPS), Vec::<Rect>::new());
        let grouped = group_rectangles(&rects, 2, GROUP_EPS);
        assert_eq!(grouped, vec![rect(10, 10, 40, 40)]);
    }

    #[test]
    fn test_group_rectangles_separates_distant_clusters() {
        let mut rects = Vec::new();
        for d in 0..4 {
            rects.push(rect(10 + d, 10, 40, 40));
            rects.push(rect(200 + d, 200, 60, 60));
        }
        let grouped = group_rectangles(&rects, 3, GROUP_EPS);
        assert_eq!(grouped.len(), 2);
        assert!(grouped.contains(&rect(12, 10, 40, 40)) || grouped.contains(&rect(11, 10, 40, 40)));
    }

    #[test]
    fn test_group_rectangles_drops_nested_weaker_cluster() {
        let mut rects = Vec::new();
        for _ in 0..10 {
            rects.push(rect(0, 0, 100, 100));
        }
        for _ in 0..4 {
            rects.push(rect(30, 30, 30, 30));
        }
        let grouped = group_rectangles(&rects, 3, GROUP_EPS);
        assert_eq!(grouped, vec![rect(0, 0, 100, 100)]);
    }

    #[test]
    fn test_group_rectangles_zero_threshold_passthrough() {
        let rects = vec![rect(1, 2, 3, 4)];
        assert_eq!(group_rectangles(&rects, 0, GROUP_EPS), rects);
    }

    #[test]
    fn test_cascade_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<HaarCascade>();
    }
}
