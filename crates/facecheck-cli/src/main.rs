use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use facecheck_core::{codec, preprocess, Detection, FaceLocator, FsReferenceStore, HaarCascade, Verifier};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "facecheck", about = "Face verification against enrolled reference photos")]
struct Cli {
    /// Reference image directory
    #[arg(long, global = true, env = "FACECHECK_REFERENCE_DIR")]
    references: Option<PathBuf>,

    /// Haar cascade XML
    #[arg(long, global = true, env = "FACECHECK_CASCADE_PATH")]
    cascade: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Verify a probe image against a subject's reference (exit 1 on non-match, 2 on error)
    Verify {
        #[arg(short, long)]
        subject: String,
        /// Probe image file
        #[arg(short, long)]
        probe: PathBuf,
    },
    /// Store an image as a subject's reference
    Enroll {
        #[arg(short, long)]
        subject: String,
        /// Reference image file
        #[arg(short, long)]
        image: PathBuf,
    },
    /// Locate the face in an image (cascade diagnostics)
    Detect {
        #[arg(short, long)]
        image: PathBuf,
    },
}

/// Exit status for a completed verification that did not match, or a
/// detection that found no face.
const EXIT_NO_MATCH: u8 = 1;
/// Exit status when the command could not run to a verdict.
const EXIT_ERROR: u8 = 2;

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    match run(Cli::parse()) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::from(EXIT_ERROR)
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    let references = cli.references.unwrap_or_else(facecheck_core::default_reference_dir);
    let cascade_path = cli
        .cascade
        .unwrap_or_else(|| facecheck_core::default_model_dir().join(facecheck_core::DEFAULT_CASCADE_FILE));

    match cli.command {
        Commands::Verify { subject, probe } => {
            let cascade = load_cascade(&cascade_path)?;
            let bytes = std::fs::read(&probe).with_context(|| format!("reading {}", probe.display()))?;
            tracing::debug!(subject, probe = %probe.display(), bytes = bytes.len(), "verifying");
            let verifier = Verifier::new(FaceLocator::new(cascade), FsReferenceStore::new(&references));

            let result = verifier.verify(&subject, &bytes)?;
            tracing::debug!(subject, is_match = result.is_match, votes = result.passed_count(), "verified");
            println!("{}", serde_json::to_string_pretty(&result)?);

            Ok(ExitCode::from(verdict(result.is_match)))
        }
        Commands::Enroll { subject, image } => {
            let bytes = std::fs::read(&image).with_context(|| format!("reading {}", image.display()))?;
            let extension = image.extension().and_then(|e| e.to_str());
            tracing::debug!(subject, image = %image.display(), bytes = bytes.len(), "enrolling");
            let path = FsReferenceStore::new(&references).enroll(&subject, &bytes, extension)?;
            println!("Enrolled {subject}: {}", path.display());
            Ok(ExitCode::SUCCESS)
        }
        Commands::Detect { image } => {
            let cascade = load_cascade(&cascade_path)?;
            let decoded = codec::decode_file(&image)?;
            let (width, height) = (decoded.width(), decoded.height());
            tracing::debug!(image = %image.display(), width, height, stages = cascade.stage_count(), "detecting");
            let gray = preprocess::preprocess(decoded)?;

            let detection = FaceLocator::new(cascade).locate(&gray);
            tracing::debug!(found = matches!(detection, Detection::Found(_)), "detection finished");
            match detection {
                Detection::Found(region) => {
                    println!(
                        "{}",
                        serde_json::json!({ "width": width, "height": height, "face": region })
                    );
                    Ok(ExitCode::from(verdict(true)))
                }
                Detection::NotFound => {
                    println!("no face");
                    Ok(ExitCode::from(verdict(false)))
                }
            }
        }
    }
}

fn verdict(positive: bool) -> u8 {
    if positive {
        0
    } else {
        EXIT_NO_MATCH
    }
}

fn load_cascade(path: &Path) -> Result<HaarCascade> {
    HaarCascade::load(path).with_context(|| format!("loading cascade {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("facecheck").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_verdict_codes() {
        assert_eq!(verdict(true), 0);
        assert_eq!(verdict(false), EXIT_NO_MATCH);
        assert_ne!(EXIT_NO_MATCH, EXIT_ERROR);
    }

    #[test]
    fn test_missing_cascade_is_an_error_not_a_non_match() {
        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("face.png");
        std::fs::write(&image, b"not read").unwrap();
        let cascade = dir.path().join("missing.xml");

        let parsed = cli(&[
            "--references",
            dir.path().to_str().unwrap(),
            "--cascade",
            cascade.to_str().unwrap(),
            "verify",
            "--subject",
            "u1",
            "--probe",
            image.to_str().unwrap(),
        ]);

        assert!(run(parsed).is_err());
    }

    #[test]
    fn test_invalid_enroll_subject_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("face.png");
        std::fs::write(&image, b"irrelevant").unwrap();

        let parsed = cli(&[
            "--references",
            dir.path().to_str().unwrap(),
            "enroll",
            "--subject",
            "../x",
            "--image",
            image.to_str().unwrap(),
        ]);

        assert!(run(parsed).is_err());
    }
}
