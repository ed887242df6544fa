use facecheck_core::{EnsembleThresholds, LbphParams};
use std::path::PathBuf;

/// Daemon configuration, loaded from environment variables.
pub struct Config {
    /// Directory holding one `<subject>.<ext>` reference image per subject.
    pub reference_dir: PathBuf,
    /// Directory containing cascade definitions.
    pub model_dir: PathBuf,
    /// Cascade file name, resolved against `model_dir` unless absolute.
    pub cascade_file: String,
    /// Per-method pass thresholds for the similarity ensemble.
    pub thresholds: EnsembleThresholds,
    /// LBPH model parameters. `threshold` is the effective gate for the
    /// learned method, since its distance is bounded well below
    /// `thresholds.learned_max_distance`.
    pub lbph: LbphParams,
    /// Timeout in seconds for a verify operation.
    pub verify_timeout_secs: u64,
    /// Number of engine worker threads.
    pub workers: usize,
    /// Register on the session bus instead of the system bus.
    pub session_bus: bool,
}

impl Config {
    /// Load configuration from `FACECHECK_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let model_dir = std::env::var("FACECHECK_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| facecheck_core::default_model_dir());

        let reference_dir = std::env::var("FACECHECK_REFERENCE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| facecheck_core::default_reference_dir());

        let defaults = EnsembleThresholds::default();
        let lbph_defaults = LbphParams::default();

        Self {
            reference_dir,
            model_dir,
            cascade_file: std::env::var("FACECHECK_CASCADE_FILE")
                .unwrap_or_else(|_| facecheck_core::DEFAULT_CASCADE_FILE.to_string()),
            thresholds: EnsembleThresholds {
                learned_max_distance: env_f64("FACECHECK_LEARNED_MAX_DISTANCE", defaults.learned_max_distance),
                histogram_min_correlation: env_f64(
                    "FACECHECK_HISTOGRAM_MIN_CORRELATION",
                    defaults.histogram_min_correlation,
                ),
                template_min_score: env_f64("FACECHECK_TEMPLATE_MIN_SCORE", defaults.template_min_score),
                ..defaults
            },
            lbph: LbphParams {
                threshold: env_f64("FACECHECK_LBPH_THRESHOLD", lbph_defaults.threshold),
                ..lbph_defaults
            },
            verify_timeout_secs: env_u64("FACECHECK_VERIFY_TIMEOUT_SECS", 10),
            workers: env_usize("FACECHECK_WORKERS", 2).max(1),
            session_bus: std::env::var("FACECHECK_SESSION_BUS")
                .map(|v| v == "1")
                .unwrap_or(false),
        }
    }

    /// Full path to the Haar cascade XML.
    pub fn cascade_path(&self) -> PathBuf {
        self.model_dir.join(&self.cascade_file)
    }
}

fn env_f64(key: &str, default: f64) -> f64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
