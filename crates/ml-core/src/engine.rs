use tracing::debug;

use crate::{ClassifyError, InferenceBackend, preprocess};

/// Single-label classifier over fixed-resolution camera frames.
///
/// The capture resolution and the model's square input side are fixed at
/// construction, where one warm-up pass proves the backend's output matches
/// the label set. After that, frames of the declared resolution always
/// classify.
pub struct ClassificationEngine {
    backend: Box<dyn InferenceBackend>,
    labels: Vec<String>,
    input_side: u32,
    capture: (u32, u32),
}

impl ClassificationEngine {
    pub fn new(
        backend: Box<dyn InferenceBackend>,
        labels: Vec<String>,
        input_side: u32,
        capture: (u32, u32),
    ) -> Result<Self, ClassifyError> {
        if labels.is_empty() {
            return Err(ClassifyError::Config("label set is empty".into()));
        }
        if input_side == 0 {
            return Err(ClassifyError::Config("model input side must be positive".into()));
        }
        if capture.0 == 0 || capture.1 == 0 {
            return Err(ClassifyError::Config(format!(
                "capture resolution {}x{} is not usable",
                capture.0, capture.1
            )));
        }

        let mut engine = Self {
            backend,
            labels,
            input_side,
            capture,
        };
        let blank = vec![0u8; (capture.0 as usize) * (capture.1 as usize) * 3];
        let warm = engine.scores(&blank, capture.0, capture.1)?;
        debug!(
            backend = engine.backend.name(),
            outputs = warm.len(),
            side = input_side,
            "classifier warm-up complete"
        );
        Ok(engine)
    }

    /// Classify one packed RGB frame, returning its label.
    pub fn classify(&mut self, rgb: &[u8], width: u32, height: u32) -> Result<&str, ClassifyError> {
        let scores = self.scores(rgb, width, height)?;
        let best = preprocess::argmax(&scores).ok_or(ClassifyError::EmptyOutput)?;
        Ok(&self.labels[best])
    }

    fn scores(&mut self, rgb: &[u8], width: u32, height: u32) -> Result<Vec<f32>, ClassifyError> {
        if (width, height) != self.capture {
            return Err(ClassifyError::Resolution {
                got: (width, height),
                expected: self.capture,
            });
        }
        let input = preprocess::prepare_input(rgb, width, height, self.input_side)?;
        let scores = self.backend.forward(&input, self.input_side)?;
        if scores.len() != self.labels.len() {
            return Err(ClassifyError::LabelMismatch {
                outputs: scores.len(),
                labels: self.labels.len(),
            });
        }
        Ok(scores)
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn input_side(&self) -> u32 {
        self.input_side
    }

    /// Frame resolution this engine accepts.
    pub fn capture(&self) -> (u32, u32) {
        self.capture
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Scores each label by how close the mean intensity is to its bucket.
    struct BrightnessBackend {
        classes: usize,
    }

    impl InferenceBackend for BrightnessBackend {
        fn name(&self) -> &'static str {
            "brightness"
        }

        fn forward(&mut self, input: &[f32], side: u32) -> anyhow::Result<Vec<f32>> {
            assert_eq!(input.len(), (side * side * 3) as usize);
            let mean = input.iter().sum::<f32>() / input.len() as f32;
            let bucket = ((mean * self.classes as f32) as usize).min(self.classes - 1);
            Ok((0..self.classes)
                .map(|i| if i == bucket { 1.0 } else { 0.0 })
                .collect())
        }
    }

    fn labels() -> Vec<String> {
        ["jute", "maize", "rice", "sugarcane", "wheat"]
            .into_iter()
            .map(String::from)
            .collect()
    }

    fn engine() -> ClassificationEngine {
        ClassificationEngine::new(Box::new(BrightnessBackend { classes: 5 }), labels(), 8, (32, 24))
            .unwrap()
    }

    #[test]
    fn identical_frames_classify_identically() {
        let mut engine = engine();
        let frame = vec![130u8; 32 * 24 * 3];
        let first = engine.classify(&frame, 32, 24).unwrap().to_string();
        let second = engine.classify(&frame, 32, 24).unwrap().to_string();
        assert_eq!(first, "rice");
        assert_eq!(first, second);
    }

    #[test]
    fn darkest_and_brightest_frames_hit_the_end_labels() {
        let mut engine = engine();
        assert_eq!(engine.classify(&vec![0u8; 32 * 24 * 3], 32, 24).unwrap(), "jute");
        assert_eq!(engine.classify(&vec![255u8; 32 * 24 * 3], 32, 24).unwrap(), "wheat");
    }

    #[test]
    fn undeclared_resolution_is_rejected() {
        let mut engine = engine();
        let err = engine.classify(&vec![0u8; 16 * 16 * 3], 16, 16).unwrap_err();
        assert!(matches!(err, ClassifyError::Resolution { .. }));
    }

    #[test]
    fn label_count_must_match_model_outputs() {
        let err = ClassificationEngine::new(
            Box::new(BrightnessBackend { classes: 3 }),
            labels(),
            8,
            (32, 24),
        )
        .err()
        .unwrap();
        assert!(matches!(
            err,
            ClassifyError::LabelMismatch {
                outputs: 3,
                labels: 5
            }
        ));
    }
}
