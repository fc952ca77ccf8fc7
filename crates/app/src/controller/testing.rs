//! Stand-ins for the camera and model used across the controller tests.

use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use chrono::Utc;
use ml_core::{ClassificationEngine, InferenceBackend};
use video_ingest::{CaptureError, Frame, FrameSource};

use crate::controller::config::DEFAULT_CROP_LABELS;

/// Uniform frames of one colour; counts every capture.
pub(crate) struct UniformSource {
    size: (u32, u32),
    pixel: [u8; 3],
    captures: Arc<AtomicUsize>,
    fail_after: Option<usize>,
}

impl UniformSource {
    pub(crate) fn new(size: (u32, u32), pixel: [u8; 3]) -> Self {
        Self {
            size,
            pixel,
            captures: Arc::new(AtomicUsize::new(0)),
            fail_after: None,
        }
    }

    /// Start returning capture errors once `frames` frames were delivered.
    pub(crate) fn failing_after(mut self, frames: usize) -> Self {
        self.fail_after = Some(frames);
        self
    }

    pub(crate) fn counter(&self) -> Arc<AtomicUsize> {
        self.captures.clone()
    }
}

impl FrameSource for UniformSource {
    fn name(&self) -> &str {
        "uniform"
    }

    fn resolution(&self) -> (u32, u32) {
        self.size
    }

    fn capture(&mut self) -> Result<Frame, CaptureError> {
        let delivered = self.captures.load(Ordering::SeqCst);
        if self.fail_after.is_some_and(|limit| delivered >= limit) {
            return Err(CaptureError::Open {
                uri: "uniform".into(),
            });
        }
        self.captures.fetch_add(1, Ordering::SeqCst);
        let (width, height) = self.size;
        let data = self
            .pixel
            .iter()
            .copied()
            .cycle()
            .take(Frame::expected_len(width, height))
            .collect();
        Ok(Frame {
            data,
            width,
            height,
            timestamp_ms: Utc::now().timestamp_millis(),
        })
    }
}

/// Always scores `winner` highest.
pub(crate) struct FixedBackend {
    classes: usize,
    winner: usize,
}

impl InferenceBackend for FixedBackend {
    fn name(&self) -> &'static str {
        "fixed"
    }

    fn forward(&mut self, input: &[f32], side: u32) -> anyhow::Result<Vec<f32>> {
        anyhow::ensure!(input.len() == (side * side * 3) as usize, "bad input length");
        let mut scores = vec![0.0; self.classes];
        scores[self.winner] = 1.0;
        Ok(scores)
    }
}

/// Engine over the five crops that always answers `winner`.
pub(crate) fn fixed_engine(winner: &str, capture: (u32, u32)) -> ClassificationEngine {
    let labels: Vec<String> = DEFAULT_CROP_LABELS.iter().map(|c| c.to_string()).collect();
    let winner = labels
        .iter()
        .position(|label| label == winner)
        .expect("winner must be one of the crops");
    let backend = FixedBackend {
        classes: labels.len(),
        winner,
    };
    ClassificationEngine::new(Box::new(backend), labels, 32, capture).expect("engine builds")
}
