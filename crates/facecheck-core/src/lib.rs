//! facecheck-core: face verification against an enrolled reference photo.
//!
//! The pipeline decodes both images, normalises illumination, locates the
//! largest face with a Haar cascade, crops it to a canonical 256x256 patch
//! and fuses three similarity signals by majority vote.

pub mod cascade;
pub mod codec;
pub mod lbph;
pub mod locator;
pub mod normalizer;
pub mod preprocess;
pub mod similarity;
pub mod store;
pub mod types;
pub mod verifier;

use std::path::PathBuf;

pub use cascade::{CascadeError, HaarCascade};
pub use lbph::LbphParams;
pub use locator::{DetectParams, Detection, FaceDetector, FaceLocator, LocatorGrid};
pub use similarity::{EnsembleThresholds, FaceComparator, SimilarityEnsemble};
pub use store::{FsReferenceStore, ReferenceStore, StoreError};
pub use types::{FaceRegion, ImageError, Method, MethodScore, NormalizedFace, PixelMatrix, VerificationResult};
pub use verifier::{Verifier, VerifyError};

/// File name of the bundled OpenCV frontal-face cascade.
pub const DEFAULT_CASCADE_FILE: &str = "haarcascade_frontalface_default.xml";

/// Per-user data directory: `$XDG_DATA_HOME/facecheck` or `~/.local/share/facecheck`.
pub fn default_data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("facecheck")
}

/// Directory searched for cascade definitions.
///
/// Prefers the system-wide install location when present.
pub fn default_model_dir() -> PathBuf {
    let system = PathBuf::from("/usr/share/facecheck/models");
    if system.is_dir() {
        system
    } else {
        default_data_dir().join("models")
    }
}

pub fn default_reference_dir() -> PathBuf {
    default_data_dir().join("references")
}
