//! tract-based ONNX backend.

use std::path::Path;

use anyhow::{Context, Result, anyhow};
use tract_onnx::prelude::*;

use crate::InferenceBackend;

/// ONNX classifier with an NHWC `1 x side x side x 3` float input, the layout
/// Keras exports keep.
pub struct OnnxBackend {
    model: TypedRunnableModel<TypedModel>,
    side: u32,
}

impl OnnxBackend {
    /// Load and optimise the model for a fixed input side.
    pub fn load<P: AsRef<Path>>(model_path: P, side: u32) -> Result<Self> {
        let model_path = model_path.as_ref();
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(
                    f32::datum_type(),
                    tvec!(1, side as usize, side as usize, 3),
                ),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;
        Ok(Self { model, side })
    }
}

impl InferenceBackend for OnnxBackend {
    fn name(&self) -> &'static str {
        "tract-onnx"
    }

    fn forward(&mut self, input: &[f32], side: u32) -> Result<Vec<f32>> {
        if side != self.side {
            return Err(anyhow!(
                "input side {side} does not match the loaded model ({})",
                self.side
            ));
        }
        let side = side as usize;
        let tensor: Tensor =
            tract_ndarray::Array4::from_shape_vec((1, side, side, 3), input.to_vec())
                .context("input buffer does not match model shape")?
                .into();
        let outputs = self
            .model
            .run(tvec!(tensor.into()))
            .context("ONNX inference failed")?;
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let scores = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;
        Ok(scores.iter().copied().collect())
    }
}
