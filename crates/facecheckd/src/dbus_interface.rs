use crate::engine::{EngineError, EngineHandle};
use facecheck_core::{FsReferenceStore, StoreError, VerifyError};
use std::path::PathBuf;
use std::time::Duration;
use zbus::interface;

/// D-Bus interface for the facecheck daemon.
///
/// Bus name: org.facecheck.FaceCheck1
/// Object path: /org/facecheck/FaceCheck1
pub struct FaceCheckService {
    pub engine: EngineHandle,
    pub store: FsReferenceStore,
    pub cascade_path: PathBuf,
    pub verify_timeout: Duration,
}

#[interface(name = "org.facecheck.FaceCheck1")]
impl FaceCheckService {
    /// Verify an encoded probe image against the subject's enrolled reference.
    ///
    /// Returns the verification result as JSON.
    async fn verify(&self, subject: &str, image: Vec<u8>) -> zbus::fdo::Result<String> {
        tracing::info!(subject, bytes = image.len(), "verify requested");

        let result = self
            .engine
            .verify(subject.to_string(), image, self.verify_timeout)
            .await
            .map_err(engine_error)?;

        serde_json::to_string(&result).map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
    }

    /// Store an encoded image as the subject's reference. Returns the stored path.
    async fn enroll(&self, subject: &str, image: Vec<u8>, extension: &str) -> zbus::fdo::Result<String> {
        tracing::info!(subject, bytes = image.len(), extension, "enroll requested");

        let store = self.store.clone();
        let subject = subject.to_string();
        let extension = (!extension.is_empty()).then(|| extension.to_string());
        let path = tokio::task::spawn_blocking(move || store.enroll(&subject, &image, extension.as_deref()))
            .await
            .map_err(|e| zbus::fdo::Error::Failed(format!("enroll task failed: {e}")))?
            .map_err(store_error)?;

        Ok(path.display().to_string())
    }

    /// Return daemon status information.
    async fn status(&self) -> zbus::fdo::Result<String> {
        Ok(serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "reference_dir": self.store.root().display().to_string(),
            "cascade": self.cascade_path.display().to_string(),
            "workers": self.engine.workers(),
            "verify_timeout_secs": self.verify_timeout.as_secs(),
        })
        .to_string())
    }
}

fn engine_error(e: EngineError) -> zbus::fdo::Error {
    match e {
        EngineError::Verify(VerifyError::ReferenceNotFound(_))
        | EngineError::Verify(VerifyError::InvalidImage(_))
        | EngineError::Verify(VerifyError::Store(StoreError::InvalidSubject(_))) => {
            tracing::info!(error = %e, "verify rejected");
            zbus::fdo::Error::InvalidArgs(e.to_string())
        }
        other => {
            tracing::warn!(error = %other, "verify failed");
            zbus::fdo::Error::Failed(other.to_string())
        }
    }
}

fn store_error(e: StoreError) -> zbus::fdo::Error {
    match e {
        StoreError::InvalidSubject(_) | StoreError::InvalidImage(_) => zbus::fdo::Error::InvalidArgs(e.to_string()),
        StoreError::Io { .. } => {
            tracing::warn!(error = %e, "enroll failed");
            zbus::fdo::Error::Failed(e.to_string())
        }
    }
}
