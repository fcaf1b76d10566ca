use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use starface_core::{ArtifactStore, LabelDictionary, PipelineConfig, WaveletSource};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "starface", about = "Starface celebrity face recognition CLI")]
struct Cli {
    /// Directory containing the classifier model and class dictionary
    #[arg(long, global = true)]
    artifacts_dir: Option<PathBuf>,

    /// Haar cascade for frontal faces
    #[arg(long, global = true)]
    face_cascade: Option<PathBuf>,

    /// Haar cascade for eyes
    #[arg(long, global = true)]
    eye_cascade: Option<PathBuf>,

    /// Crop the wavelet detail image is computed from (original|resized)
    #[arg(long, global = true)]
    wavelet_source: Option<WaveletSource>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Classify every face in an image file
    Classify {
        /// Image file (PNG, JPEG, ...)
        image: PathBuf,
    },
    /// Show detected face regions and the eye-gate outcome
    Detect {
        /// Image file (PNG, JPEG, ...)
        image: PathBuf,
    },
    /// List known classes in id order
    Classes,
}

impl Cli {
    fn pipeline_config(&self) -> PipelineConfig {
        let mut config = PipelineConfig::default();
        if let Some(dir) = &self.artifacts_dir {
            config.artifacts_dir = dir.clone();
        }
        if let Some(path) = &self.face_cascade {
            config.face_cascade_path = path.clone();
        }
        if let Some(path) = &self.eye_cascade {
            config.eye_cascade_path = path.clone();
        }
        if let Some(source) = self.wavelet_source {
            config.wavelet_source = source;
        }
        config
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = cli.pipeline_config();
    tracing::debug!(
        artifacts_dir = %config.artifacts_dir.display(),
        face_cascade = %config.face_cascade_path.display(),
        eye_cascade = %config.eye_cascade_path.display(),
        wavelet_source = ?config.wavelet_source,
        "resolved pipeline config"
    );

    match &cli.command {
        Commands::Classify { image } => {
            let artifacts = ArtifactStore::load(&config).context("loading artifacts")?;
            tracing::info!(image = %image.display(), classes = artifacts.context.labels().len(), "classifying");
            let results = artifacts
                .pipeline
                .classify_file(&artifacts.context, image)
                .with_context(|| format!("classifying {}", image.display()))?;

            let body = if results.is_empty() {
                json!({
                    "success": true,
                    "faces_detected": 0,
                    "results": [],
                    "message": "No faces with two visible eyes were detected",
                })
            } else {
                json!({
                    "success": true,
                    "faces_detected": results.len(),
                    "results": results,
                })
            };
            println!("{}", serde_json::to_string_pretty(&body)?);
        }
        Commands::Detect { image } => {
            let detector = ArtifactStore::load_detector(&config).context("loading cascades")?;
            let raster = starface_core::ImageDecoder::new(config.max_image_bytes)
                .decode_file(image)
                .with_context(|| format!("reading {}", image.display()))?;
            let candidates = detector.candidates(&raster)?;
            tracing::debug!(width = raster.width(), height = raster.height(), regions = candidates.len(), "face search done");

            println!("{}: {}x{}", image.display(), raster.width(), raster.height());
            if candidates.is_empty() {
                println!("  no face regions found");
            }
            for (i, c) in candidates.iter().enumerate() {
                let r = c.region;
                println!(
                    "  [{i}] x={} y={} {}x{}  eyes={}  {}",
                    r.x,
                    r.y,
                    r.width,
                    r.height,
                    c.eyes,
                    if c.passes_gate() { "PASS" } else { "rejected" }
                );
            }
            let passed = candidates.iter().filter(|c| c.passes_gate()).count();
            println!("{passed} of {} regions pass the eye gate", candidates.len());
        }
        Commands::Classes => {
            let labels = LabelDictionary::load(&config.class_dictionary_path())
                .context("loading class dictionary")?;
            for (id, name) in labels.names().iter().enumerate() {
                println!("{id:>3}  {name}");
            }
            println!("{} classes", labels.len());
        }
    }

    Ok(())
}
