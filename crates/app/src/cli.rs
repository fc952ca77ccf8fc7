use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use image::imageops::FilterType;
use ml_core::ClassificationEngine;
use tracing::info;

use crate::controller::{self, RoverConfig, ServeArgs, TelemetryOptions};

#[derive(Debug, Parser)]
#[command(name = "rover", version, about = "Onboard controller for the crop-survey rover")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the controller: camera loop, classifier, drive, and HTTP surface.
    Serve(ServeArgs),
    /// Classify still images with a model and print one label per file.
    Classify(ClassifyArgs),
}

#[derive(Debug, Args)]
pub struct ClassifyArgs {
    /// Classifier model (`.onnx`, or `.pt` with the `with-tch` feature).
    #[arg(long = "model", value_name = "PATH")]
    pub model: PathBuf,
    /// Comma-separated labels in model output order.
    #[arg(long = "labels", value_name = "LIST", value_delimiter = ',')]
    pub labels: Option<Vec<String>>,
    /// Square model input side in pixels.
    #[arg(long = "model-input", value_name = "PX", default_value_t = 150)]
    pub model_input: u32,
    /// Images to classify.
    #[arg(value_name = "IMAGE", required = true)]
    pub images: Vec<PathBuf>,
}

pub fn dispatch(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Serve(args) => controller::run(RoverConfig::try_from(args)?),
        Command::Classify(args) => classify(args),
    }
}

/// Images are resized to the model input up front, so the engine runs with a
/// square capture size and skips its own resize.
fn classify(args: ClassifyArgs) -> Result<()> {
    let _telemetry_guard = controller::enter_runtime(&TelemetryOptions::default(), false);
    let labels = controller::parse_labels(args.labels)?;
    let side = args.model_input;
    let backend = ml_core::load_backend(&args.model, side)
        .with_context(|| format!("Failed to load model {}", args.model.display()))?;
    let mut engine = ClassificationEngine::new(backend, labels, side, (side, side))
        .context("Model does not fit the configured labels and input size")?;
    info!(backend = engine.backend_name(), images = args.images.len(), "Classifying");

    for path in &args.images {
        let image = image::open(path)
            .with_context(|| format!("Failed to read image {}", path.display()))?
            .resize_exact(side, side, FilterType::Triangle)
            .to_rgb8();
        let label = engine
            .classify(image.as_raw(), side, side)
            .with_context(|| format!("Failed to classify {}", path.display()))?;
        println!("{}: {label}", path.display());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serve_and_classify_parse() {
        let cli = Cli::try_parse_from([
            "rover", "serve", "--model", "crop.onnx", "--source", "test-pattern", "--dry-run",
        ])
        .unwrap();
        match cli.command {
            Command::Serve(args) => {
                assert_eq!(args.source, "test-pattern");
                assert!(args.dry_run);
            }
            other => panic!("unexpected {other:?}"),
        }

        let cli = Cli::try_parse_from(["rover", "classify", "--model", "m.onnx", "a.jpg", "b.png"])
            .unwrap();
        match cli.command {
            Command::Classify(args) => assert_eq!(args.images.len(), 2),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn model_is_required() {
        assert!(Cli::try_parse_from(["rover", "serve"]).is_err());
        assert!(Cli::try_parse_from(["rover", "classify", "a.jpg"]).is_err());
    }
}
