//! Image classification for the rover camera feed.
//!
//! [`ClassificationEngine`] owns one [`InferenceBackend`] plus the label set and
//! turns raw frames into a single label: resize to the model's square input,
//! scale to `0.0..=1.0`, one forward pass, argmax.
//!
//! Backends are feature-gated: `onnx` (tract, default) and `with-tch`
//! (TorchScript through libtorch).

mod engine;
#[cfg(feature = "onnx")]
pub mod onnx;
pub mod preprocess;
#[cfg(feature = "with-tch")]
pub mod torch;

use std::path::Path;

use thiserror::Error;

pub use engine::ClassificationEngine;

#[cfg(feature = "with-tch")]
pub use tch;

/// A loaded model that maps one preprocessed input to per-class scores.
pub trait InferenceBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run one forward pass over an NHWC buffer of `side * side * 3` floats.
    fn forward(&mut self, input: &[f32], side: u32) -> anyhow::Result<Vec<f32>>;
}

#[derive(Debug, Error)]
pub enum ClassifyError {
    #[error("invalid classifier configuration: {0}")]
    Config(String),
    #[error("frame of {got} bytes is not a packed RGB {width}x{height} image")]
    FrameSize { got: usize, width: u32, height: u32 },
    #[error("frame is {}x{}, classifier was configured for {}x{}", got.0, got.1, expected.0, expected.1)]
    Resolution { got: (u32, u32), expected: (u32, u32) },
    #[error("model produced {outputs} scores for {labels} labels")]
    LabelMismatch { outputs: usize, labels: usize },
    #[error("model produced no usable scores")]
    EmptyOutput,
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

/// Model file flavour, inferred from the extension.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModelKind {
    Onnx,
    TorchScript,
}

impl ModelKind {
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()?.to_ascii_lowercase().as_str() {
            "onnx" => Some(ModelKind::Onnx),
            "pt" | "ts" | "torchscript" => Some(ModelKind::TorchScript),
            _ => None,
        }
    }
}

/// Load the model at `path` with whichever backend this build supports for it.
pub fn load_backend(path: &Path, side: u32) -> anyhow::Result<Box<dyn InferenceBackend>> {
    let kind = ModelKind::from_path(path).ok_or_else(|| {
        anyhow::anyhow!(
            "cannot infer model format from {} (expected .onnx or .pt)",
            path.display()
        )
    })?;
    match kind {
        #[cfg(feature = "onnx")]
        ModelKind::Onnx => Ok(Box::new(onnx::OnnxBackend::load(path, side)?)),
        #[cfg(feature = "with-tch")]
        ModelKind::TorchScript => Ok(Box::new(torch::TorchBackend::load(
            path,
            tch::Device::cuda_if_available(),
        )?)),
        #[allow(unreachable_patterns)]
        other => {
            let _ = side;
            anyhow::bail!("{other:?} models are not supported by this build; enable the matching feature")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_kind_from_extension() {
        assert_eq!(ModelKind::from_path(Path::new("crop.onnx")), Some(ModelKind::Onnx));
        assert_eq!(ModelKind::from_path(Path::new("crop.PT")), Some(ModelKind::TorchScript));
        assert_eq!(ModelKind::from_path(Path::new("crop.tflite")), None);
    }
}
