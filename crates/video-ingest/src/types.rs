use anyhow::Error;
use thiserror::Error;

/// Raw RGB frame captured from a video source.
///
/// Rows are tightly packed, three bytes per pixel.
pub struct Frame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Wall-clock capture time, milliseconds since the Unix epoch.
    pub timestamp_ms: i64,
}

impl Frame {
    /// Number of bytes a packed RGB frame of `width`x`height` occupies.
    pub fn expected_len(width: u32, height: u32) -> usize {
        (width as usize) * (height as usize) * 3
    }

    pub fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("failed to open video source {uri:?}")]
    Open { uri: String },
    #[error("source delivered {got} bytes, expected {expected} for {width}x{height}")]
    Size {
        got: usize,
        expected: usize,
        width: u32,
        height: u32,
    },
    #[error("video source {uri:?} is not supported by this build")]
    Unsupported { uri: String },
    #[error(transparent)]
    Other(#[from] Error),
}

/// A camera, or anything standing in for one.
///
/// `capture` blocks until the next frame is available. Implementations never
/// buffer ahead: one call is one acquisition.
pub trait FrameSource: Send {
    /// Identifier used in logs.
    fn name(&self) -> &str;

    /// Resolution every returned frame is guaranteed to have.
    fn resolution(&self) -> (u32, u32);

    fn capture(&mut self) -> Result<Frame, CaptureError>;
}
