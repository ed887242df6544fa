//! End-to-end verification of a probe image against a subject's reference.

use crate::codec;
use crate::locator::{Detection, FaceDetector, FaceLocator};
use crate::normalizer;
use crate::preprocess::{self, PreprocessParams};
use crate::similarity::{FaceComparator, SimilarityEnsemble};
use crate::store::{ReferenceStore, StoreError};
use crate::types::{ImageError, VerificationResult};
use std::time::Instant;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum VerifyError {
    #[error("no reference enrolled for subject {0:?}")]
    ReferenceNotFound(String),
    #[error(transparent)]
    InvalidImage(#[from] ImageError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Runs the full pipeline: resolve, decode, preprocess, locate, normalise, compare.
///
/// Holds no per-call state, so one instance can serve concurrent callers.
pub struct Verifier<D, S, C = SimilarityEnsemble> {
    locator: FaceLocator<D>,
    store: S,
    comparator: C,
    preprocess: PreprocessParams,
}

impl<D: FaceDetector, S: ReferenceStore> Verifier<D, S> {
    pub fn new(locator: FaceLocator<D>, store: S) -> Self {
        Self::with_comparator(locator, store, SimilarityEnsemble::default())
    }
}

impl<D: FaceDetector, S: ReferenceStore, C: FaceComparator> Verifier<D, S, C> {
    pub fn with_comparator(locator: FaceLocator<D>, store: S, comparator: C) -> Self {
        Self {
            locator,
            store,
            comparator,
            preprocess: PreprocessParams::default(),
        }
    }

    pub fn with_preprocess(mut self, params: PreprocessParams) -> Self {
        self.preprocess = params;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn locator(&self) -> &FaceLocator<D> {
        &self.locator
    }

    /// Verify `probe` against the enrolled reference of `subject`.
    ///
    /// A face missing from either image is a non-match with no scores, not
    /// an error. Unknown subjects and undecodable images are errors.
    pub fn verify(&self, subject: &str, probe: &[u8]) -> Result<VerificationResult, VerifyError> {
        let started = Instant::now();
        let reference_path = self
            .store
            .resolve(subject)?
            .ok_or_else(|| VerifyError::ReferenceNotFound(subject.to_string()))?;

        let probe_image = codec::decode(probe)?;
        let reference_image = codec::decode_file(&reference_path)?;

        let probe_gray = preprocess::preprocess_with(probe_image, &self.preprocess)?;
        let reference_gray = preprocess::preprocess_with(reference_image, &self.preprocess)?;

        let (probe_region, reference_region) =
            match (self.locator.locate(&probe_gray), self.locator.locate(&reference_gray)) {
                (Detection::Found(p), Detection::Found(r)) => (p, r),
                (probe_hit, reference_hit) => {
                    tracing::info!(
                        subject,
                        probe_face = probe_hit.region().is_some(),
                        reference_face = reference_hit.region().is_some(),
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "no face located; reporting non-match"
                    );
                    return Ok(VerificationResult::no_face(subject));
                }
            };

        let probe_face = normalizer::normalize(&probe_gray, &probe_region)?;
        drop(probe_gray);
        let reference_face = normalizer::normalize(&reference_gray, &reference_region)?;
        drop(reference_gray);

        let mut result = self.comparator.compare(&probe_face, &reference_face);
        result.subject_id = subject.to_string();

        tracing::info!(
            subject,
            reference = %reference_path.display(),
            is_match = result.is_match,
            passed = result.passed_count(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "verification complete"
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::locator::DetectParams;
    use crate::store::FsReferenceStore;
    use crate::types::{FaceRegion, PixelMatrix};
    use image::{GrayImage, ImageFormat, Luma};
    use std::io::Cursor;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Reports the whole image as a face unless it is uniform.
    struct WholeImageDetector {
        calls: AtomicUsize,
    }

    impl FaceDetector for WholeImageDetector {
        fn detect(&self, image: &PixelMatrix, _params: &DetectParams) -> Vec<FaceRegion> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let first = image.data().first().copied();
            if image.data().iter().all(|&p| Some(p) == first) {
                return Vec::new();
            }
            vec![FaceRegion { x: 0, y: 0, width: image.width(), height: image.height() }]
        }
    }

    fn detector() -> WholeImageDetector {
        WholeImageDetector { calls: AtomicUsize::new(0) }
    }

    fn encode(img: &GrayImage, format: ImageFormat) -> Vec<u8> {
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, format).unwrap();
        out.into_inner()
    }

    fn textured(w: u32, h: u32) -> GrayImage {
        GrayImage::from_fn(w, h, |x, y| Luma([((x * 5 + y * 11) % 200 + (x / 8 % 2) * 40) as u8]))
    }

    #[test]
    fn test_unknown_subject_fails_before_decoding() {
        let dir = tempfile::tempdir().unwrap();
        let verifier = Verifier::new(FaceLocator::new(detector()), FsReferenceStore::new(dir.path()));
        let err = verifier.verify("u2", b"garbage").unwrap_err();
        assert!(matches!(err, VerifyError::ReferenceNotFound(ref s) if s == "u2"));
        assert_eq!(verifier.locator().detector().calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_invalid_probe_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("u1.png"), encode(&textured(64, 64), ImageFormat::Png)).unwrap();
        let verifier = Verifier::new(FaceLocator::new(detector()), FsReferenceStore::new(dir.path()));
        let err = verifier.verify("u1", &[7u8; 12]).unwrap_err();
        assert!(matches!(err, VerifyError::InvalidImage(_)));
        assert_eq!(verifier.locator().detector().calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_same_image_matches() {
        let dir = tempfile::tempdir().unwrap();
        let img = textured(80, 64);
        std::fs::write(dir.path().join("u1.bmp"), encode(&img, ImageFormat::Bmp)).unwrap();
        let verifier = Verifier::new(FaceLocator::new(detector()), FsReferenceStore::new(dir.path()));

        let result = verifier.verify("u1", &encode(&img, ImageFormat::Png)).unwrap();

        assert_eq!(result.subject_id, "u1");
        assert!(result.is_match);
        assert_eq!(result.scores.len(), 3);
        assert_eq!(result.passed_count(), 3);
    }

    #[test]
    fn test_faceless_probe_is_non_match() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("u1.png"), encode(&textured(64, 64), ImageFormat::Png)).unwrap();
        let verifier = Verifier::new(FaceLocator::new(detector()), FsReferenceStore::new(dir.path()));

        let blank = GrayImage::from_pixel(64, 64, Luma([128]));
        let result = verifier.verify("u1", &encode(&blank, ImageFormat::Png)).unwrap();

        assert_eq!(result, VerificationResult::no_face("u1"));
    }

    #[test]
    fn test_invalid_subject_surfaces_store_error() {
        let dir = tempfile::tempdir().unwrap();
        let verifier = Verifier::new(FaceLocator::new(detector()), FsReferenceStore::new(dir.path()));
        assert!(matches!(verifier.verify("../x", b"x"), Err(VerifyError::Store(StoreError::InvalidSubject(_)))));
    }
}
