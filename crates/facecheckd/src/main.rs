use anyhow::{Context, Result};
use facecheck_core::{FaceLocator, FsReferenceStore, HaarCascade, SimilarityEnsemble, Verifier};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;
mod engine;

const BUS_NAME: &str = "org.facecheck.FaceCheck1";
const OBJECT_PATH: &str = "/org/facecheck/FaceCheck1";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("facecheckd starting");

    let config = config::Config::from_env();
    let cascade_path = config.cascade_path();

    // Loaded once for the whole process; workers share it read-only.
    let cascade = HaarCascade::global(&cascade_path)
        .with_context(|| format!("loading cascade {}", cascade_path.display()))?;

    let store = FsReferenceStore::new(&config.reference_dir);
    let verifier = Verifier::with_comparator(
        FaceLocator::new(cascade),
        store.clone(),
        SimilarityEnsemble::new(config.thresholds).with_lbph(config.lbph),
    );
    let engine = engine::spawn_engine(config.workers, Arc::new(verifier))?;

    let service = dbus_interface::FaceCheckService {
        engine,
        store,
        cascade_path,
        verify_timeout: Duration::from_secs(config.verify_timeout_secs),
    };

    let builder = if config.session_bus {
        zbus::connection::Builder::session()?
    } else {
        zbus::connection::Builder::system()?
    };
    let _conn = builder
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, service)?
        .build()
        .await
        .with_context(|| format!("registering {BUS_NAME} on the D-Bus"))?;

    tracing::info!(
        bus = if config.session_bus { "session" } else { "system" },
        name = BUS_NAME,
        references = %config.reference_dir.display(),
        workers = config.workers,
        "facecheckd ready"
    );

    // Keep running until signaled
    tokio::signal::ctrl_c().await?;
    tracing::info!("facecheckd shutting down");

    Ok(())
}
