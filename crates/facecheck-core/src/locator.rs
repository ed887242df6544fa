//! Face location by grid search over detector sensitivity parameters.
//!
//! A single (scale factor, min neighbours) pair is brittle against pose and
//! lighting changes, so the locator walks a small ordered grid and stops at
//! the first combination that yields any candidate.

use crate::types::{FaceRegion, PixelMatrix};

/// Minimum face size, in pixels, for every grid attempt.
pub const MIN_FACE_SIZE: u32 = 30;

/// Sensitivity parameters for one detector invocation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectParams {
    /// Pyramid step between successive window scales (> 1.0).
    pub scale_factor: f64,
    /// A candidate survives grouping only with more than this many raw hits.
    pub min_neighbors: u32,
    /// Smallest window (width, height) considered.
    pub min_size: (u32, u32),
    /// Largest window considered; `None` = unbounded.
    pub max_size: Option<(u32, u32)>,
}

impl Default for DetectParams {
    fn default() -> Self {
        Self {
            scale_factor: 1.1,
            min_neighbors: 3,
            min_size: (MIN_FACE_SIZE, MIN_FACE_SIZE),
            max_size: None,
        }
    }
}

/// Candidate face proposer run by the locator.
///
/// Implementations must not retain state between calls; the locator may be
/// shared across worker threads.
pub trait FaceDetector: Send + Sync {
    /// Return every candidate region found in a single-channel image.
    fn detect(&self, image: &PixelMatrix, params: &DetectParams) -> Vec<FaceRegion>;
}

impl<D: FaceDetector + ?Sized> FaceDetector for &D {
    fn detect(&self, image: &PixelMatrix, params: &DetectParams) -> Vec<FaceRegion> {
        (**self).detect(image, params)
    }
}

impl<D: FaceDetector + ?Sized> FaceDetector for std::sync::Arc<D> {
    fn detect(&self, image: &PixelMatrix, params: &DetectParams) -> Vec<FaceRegion> {
        (**self).detect(image, params)
    }
}

/// Result of a location attempt. A miss is a normal outcome, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Detection {
    Found(FaceRegion),
    NotFound,
}

impl Detection {
    pub fn region(&self) -> Option<FaceRegion> {
        match self {
            Detection::Found(r) => Some(*r),
            Detection::NotFound => None,
        }
    }
}

/// Ordered sensitivity grid. Scale factors form the outer loop.
#[derive(Debug, Clone, PartialEq)]
pub struct LocatorGrid {
    pub scale_factors: Vec<f64>,
    pub min_neighbors: Vec<u32>,
    pub min_size: (u32, u32),
}

impl Default for LocatorGrid {
    fn default() -> Self {
        Self {
            scale_factors: vec![1.1, 1.2, 1.3],
            min_neighbors: vec![3, 4, 5],
            min_size: (MIN_FACE_SIZE, MIN_FACE_SIZE),
        }
    }
}

impl LocatorGrid {
    /// Parameter combinations in the order they are tried.
    pub fn combinations(&self) -> impl Iterator<Item = DetectParams> + '_ {
        self.scale_factors.iter().flat_map(move |&scale_factor| {
            self.min_neighbors.iter().map(move |&min_neighbors| DetectParams {
                scale_factor,
                min_neighbors,
                min_size: self.min_size,
                max_size: None,
            })
        })
    }
}

/// Grid-search face locator over any [`FaceDetector`].
pub struct FaceLocator<D> {
    detector: D,
    grid: LocatorGrid,
}

impl<D: FaceDetector> FaceLocator<D> {
    pub fn new(detector: D) -> Self {
        Self::with_grid(detector, LocatorGrid::default())
    }

    pub fn with_grid(detector: D, grid: LocatorGrid) -> Self {
        Self { detector, grid }
    }

    pub fn detector(&self) -> &D {
        &self.detector
    }

    /// Locate the largest face of the first productive grid combination.
    pub fn locate(&self, image: &PixelMatrix) -> Detection {
        for (attempt, params) in self.grid.combinations().enumerate() {
            let candidates: Vec<FaceRegion> = self
                .detector
                .detect(image, &params)
                .into_iter()
                .filter(|r| r.fits_within(image.width(), image.height()))
                .collect();

            tracing::debug!(
                attempt,
                scale_factor = params.scale_factor,
                min_neighbors = params.min_neighbors,
                candidates = candidates.len(),
                "face locator attempt"
            );

            if let Some(region) = largest_region(&candidates) {
                return Detection::Found(region);
            }
        }
        Detection::NotFound
    }
}

/// Largest-area region; ties keep the first encountered.
pub fn largest_region(regions: &[FaceRegion]) -> Option<FaceRegion> {
    let mut best: Option<FaceRegion> = None;
    for r in regions {
        match best {
            Some(b) if r.area() <= b.area() => {}
            _ => best = Some(*r),
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Succeeds only from the `succeed_at`-th call (1-based) onwards.
    struct CountingDetector {
        calls: AtomicUsize,
        succeed_at: usize,
        regions: Vec<FaceRegion>,
        seen: Mutex<Vec<(f64, u32)>>,
    }

    impl CountingDetector {
        fn new(succeed_at: usize, regions: Vec<FaceRegion>) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                succeed_at,
                regions,
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    impl FaceDetector for CountingDetector {
        fn detect(&self, _image: &PixelMatrix, params: &DetectParams) -> Vec<FaceRegion> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            self.seen.lock().unwrap().push((params.scale_factor, params.min_neighbors));
            if n >= self.succeed_at {
                self.regions.clone()
            } else {
                Vec::new()
            }
        }
    }

    fn region(x: u32, y: u32, w: u32, h: u32) -> FaceRegion {
        FaceRegion { x, y, width: w, height: h }
    }

    #[test]
    fn test_grid_order() {
        let combos: Vec<(f64, u32)> = LocatorGrid::default()
            .combinations()
            .map(|p| (p.scale_factor, p.min_neighbors))
            .collect();
        assert_eq!(
            combos,
            vec![
                (1.1, 3), (1.1, 4), (1.1, 5),
                (1.2, 3), (1.2, 4), (1.2, 5),
                (1.3, 3), (1.3, 4), (1.3, 5),
            ]
        );
        assert!(LocatorGrid::default().combinations().all(|p| p.min_size == (30, 30)));
    }

    #[test]
    fn test_stops_at_first_productive_combination() {
        let detector = CountingDetector::new(3, vec![region(0, 0, 40, 40)]);
        let locator = FaceLocator::new(&detector);
        let image = PixelMatrix::filled(100, 100, 0);

        let found = locator.locate(&image);

        assert_eq!(found, Detection::Found(region(0, 0, 40, 40)));
        assert_eq!(detector.calls.load(Ordering::SeqCst), 3);
        assert_eq!(*detector.seen.lock().unwrap(), vec![(1.1, 3), (1.1, 4), (1.1, 5)]);
    }

    #[test]
    fn test_exhausts_grid_when_nothing_found() {
        let detector = CountingDetector::new(usize::MAX, Vec::new());
        let locator = FaceLocator::new(&detector);
        let image = PixelMatrix::filled(100, 100, 0);

        assert_eq!(locator.locate(&image), Detection::NotFound);
        assert_eq!(detector.calls.load(Ordering::SeqCst), 9);
    }

    #[test]
    fn test_selects_largest_candidate() {
        let detector = CountingDetector::new(1, vec![
            region(0, 0, 30, 30),
            region(10, 10, 50, 50),
            region(5, 5, 40, 40),
        ]);
        let locator = FaceLocator::new(&detector);
        let found = locator.locate(&PixelMatrix::filled(100, 100, 0));
        assert_eq!(found.region(), Some(region(10, 10, 50, 50)));
    }

    #[test]
    fn test_out_of_bounds_candidates_ignored() {
        let detector = CountingDetector::new(1, vec![region(90, 90, 40, 40)]);
        let locator = FaceLocator::new(&detector);
        assert_eq!(locator.locate(&PixelMatrix::filled(100, 100, 0)), Detection::NotFound);
    }

    #[test]
    fn test_largest_region_tie_keeps_first() {
        let a = region(0, 0, 40, 10);
        let b = region(5, 5, 20, 20);
        assert_eq!(largest_region(&[a, b]), Some(a));
        assert_eq!(largest_region(&[b, a]), Some(b));
        assert_eq!(largest_region(&[]), None);
    }
}
