//! Enrolled reference images, one file per subject.
//!
//! References live flat in a single directory as `<subject><ext>`.
//! Resolution probes [`REFERENCE_EXTENSIONS`] in order and the first
//! existing file wins.

use crate::codec;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Probe order for reference files.
pub const REFERENCE_EXTENSIONS: [&str; 4] = [".jpg", ".jpeg", ".png", ".bmp"];
const DEFAULT_EXTENSION: &str = ".jpg";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("invalid subject id {0:?}")]
    InvalidSubject(String),
    #[error("reference payload is not a decodable image: {0}")]
    InvalidImage(#[from] crate::types::ImageError),
    #[error("reference store I/O at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Lookup of a subject's enrolled reference image.
pub trait ReferenceStore: Send + Sync {
    /// Path of the subject's reference, or `None` when nothing is enrolled.
    fn resolve(&self, subject: &str) -> Result<Option<PathBuf>, StoreError>;
}

impl<S: ReferenceStore + ?Sized> ReferenceStore for &S {
    fn resolve(&self, subject: &str) -> Result<Option<PathBuf>, StoreError> {
        (**self).resolve(subject)
    }
}

impl<S: ReferenceStore + ?Sized> ReferenceStore for std::sync::Arc<S> {
    fn resolve(&self, subject: &str) -> Result<Option<PathBuf>, StoreError> {
        (**self).resolve(subject)
    }
}

/// Reference store backed by a directory on the local filesystem.
#[derive(Debug, Clone)]
pub struct FsReferenceStore {
    root: PathBuf,
}

impl FsReferenceStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Store `bytes` as the subject's reference and return its path.
    ///
    /// Existing references under the other extensions are removed once the
    /// new file is in place, so it is the one resolution finds. A failed
    /// write leaves the previous reference untouched.
    pub fn enroll(&self, subject: &str, bytes: &[u8], extension: Option<&str>) -> Result<PathBuf, StoreError> {
        validate_subject(subject)?;
        let decoded = codec::decode(bytes)?;
        tracing::debug!(subject, width = decoded.width(), height = decoded.height(), "enrolling reference");
        drop(decoded);

        let ext = normalize_extension(extension);
        std::fs::create_dir_all(&self.root).map_err(|source| StoreError::Io {
            path: self.root.clone(),
            source,
        })?;

        // Staged in the same directory so the rename is atomic.
        let path = self.candidate(subject, ext);
        let mut staged = tempfile::NamedTempFile::new_in(&self.root).map_err(|source| StoreError::Io {
            path: self.root.clone(),
            source,
        })?;
        staged.write_all(bytes).map_err(|source| StoreError::Io {
            path: staged.path().to_path_buf(),
            source,
        })?;
        staged.persist(&path).map_err(|e| StoreError::Io {
            path: path.clone(),
            source: e.error,
        })?;

        for other in REFERENCE_EXTENSIONS.iter().filter(|e| **e != ext) {
            let stale = self.candidate(subject, other);
            match std::fs::remove_file(&stale) {
                Ok(()) => tracing::info!(path = %stale.display(), "removed stale reference"),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(source) => return Err(StoreError::Io { path: stale, source }),
            }
        }

        tracing::info!(subject, path = %path.display(), bytes = bytes.len(), "reference enrolled");
        Ok(path)
    }

    fn candidate(&self, subject: &str, ext: &str) -> PathBuf {
        self.root.join(format!("{subject}{ext}"))
    }
}

impl ReferenceStore for FsReferenceStore {
    fn resolve(&self, subject: &str) -> Result<Option<PathBuf>, StoreError> {
        validate_subject(subject)?;
        for ext in REFERENCE_EXTENSIONS {
            let path = self.candidate(subject, ext);
            if path.is_file() {
                tracing::trace!(subject, path = %path.display(), "resolved reference");
                return Ok(Some(path));
            }
        }
        Ok(None)
    }
}

/// Reject ids that could escape the store directory.
pub fn validate_subject(subject: &str) -> Result<(), StoreError> {
    let bad = subject.is_empty()
        || subject == "."
        || subject == ".."
        || subject.contains('/')
        || subject.contains('\\')
        || subject.contains('\0');
    if bad {
        return Err(StoreError::InvalidSubject(subject.to_string()));
    }
    Ok(())
}

/// Map a user-supplied extension onto a supported one, defaulting to `.jpg`.
fn normalize_extension(extension: Option<&str>) -> &'static str {
    let Some(raw) = extension else {
        return DEFAULT_EXTENSION;
    };
    let lowered = format!(".{}", raw.trim().trim_start_matches('.').to_ascii_lowercase());
    REFERENCE_EXTENSIONS
        .iter()
        .copied()
        .find(|e| *e == lowered)
        .unwrap_or(DEFAULT_EXTENSION)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgb, RgbImage};
    use std::io::Cursor;

    fn png_bytes() -> Vec<u8> {
        let mut out = Cursor::new(Vec::new());
        RgbImage::from_pixel(4, 4, Rgb([1, 2, 3]))
            .write_to(&mut out, ImageFormat::Png)
            .unwrap();
        out.into_inner()
    }

    #[test]
    fn test_resolve_missing_subject() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsReferenceStore::new(dir.path());
        assert_eq!(store.resolve("u2").unwrap(), None);
    }

    #[test]
    fn test_resolve_probe_order() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("alice.png"), b"x").unwrap();
        std::fs::write(dir.path().join("alice.bmp"), b"x").unwrap();
        let store = FsReferenceStore::new(dir.path());
        assert_eq!(store.resolve("alice").unwrap(), Some(dir.path().join("alice.png")));

        std::fs::write(dir.path().join("alice.jpeg"), b"x").unwrap();
        assert_eq!(store.resolve("alice").unwrap(), Some(dir.path().join("alice.jpeg")));
    }

    #[test]
    fn test_resolve_ignores_directories() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("bob.jpg")).unwrap();
        std::fs::write(dir.path().join("bob.bmp"), b"x").unwrap();
        let store = FsReferenceStore::new(dir.path());
        assert_eq!(store.resolve("bob").unwrap(), Some(dir.path().join("bob.bmp")));
    }

    #[test]
    fn test_invalid_subjects_rejected() {
        let store = FsReferenceStore::new("/nonexistent");
        for subject in ["", ".", "..", "../etc/passwd", "a/b", "a\\b"] {
            assert!(
                matches!(store.resolve(subject), Err(StoreError::InvalidSubject(_))),
                "{subject:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_enroll_writes_and_replaces() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("refs");
        let store = FsReferenceStore::new(&root);

        let first = store.enroll("carol", &png_bytes(), Some("PNG")).unwrap();
        assert_eq!(first, root.join("carol.png"));
        assert_eq!(store.resolve("carol").unwrap(), Some(first.clone()));

        let second = store.enroll("carol", &png_bytes(), None).unwrap();
        assert_eq!(second, root.join("carol.jpg"));
        assert!(!first.exists());
        assert_eq!(store.resolve("carol").unwrap(), Some(second));
    }

    #[test]
    fn test_failed_enroll_keeps_previous_reference() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsReferenceStore::new(dir.path());
        let previous = store.enroll("carol", &png_bytes(), Some("png")).unwrap();

        // A directory squatting on the target name makes the rename fail.
        std::fs::create_dir(dir.path().join("carol.jpg")).unwrap();
        let err = store.enroll("carol", &png_bytes(), None).unwrap_err();

        assert!(matches!(err, StoreError::Io { .. }));
        assert!(previous.is_file());
        assert_eq!(store.resolve("carol").unwrap(), Some(previous));
        let leftovers = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(leftovers, 2, "temporary file should be cleaned up");
    }

    #[test]
    fn test_enroll_rejects_undecodable_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsReferenceStore::new(dir.path());
        let err = store.enroll("dave", b"definitely not an image", None).unwrap_err();
        assert!(matches!(err, StoreError::InvalidImage(_)));
        assert_eq!(store.resolve("dave").unwrap(), None);
    }

    #[test]
    fn test_normalize_extension() {
        assert_eq!(normalize_extension(None), ".jpg");
        assert_eq!(normalize_extension(Some("bmp")), ".bmp");
        assert_eq!(normalize_extension(Some(".JPEG")), ".jpeg");
        assert_eq!(normalize_extension(Some("tiff")), ".jpg");
    }
}
