//! Camera stand-in that renders a moving test pattern.

use std::{
    thread,
    time::{Duration, Instant},
};

use chrono::Utc;

use crate::types::{CaptureError, Frame, FrameSource};

/// Deterministic colour-bar pattern with a sweeping column, useful for bench
/// runs without a camera attached.
pub struct SyntheticSource {
    size: (u32, u32),
    interval: Option<Duration>,
    last: Option<Instant>,
    tick: u64,
}

impl SyntheticSource {
    pub fn new(size: (u32, u32)) -> Self {
        Self {
            size,
            interval: None,
            last: None,
            tick: 0,
        }
    }

    /// Pace capture to roughly one frame per `interval`, like a real sensor.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = Some(interval);
        self
    }

    fn render(&self) -> Vec<u8> {
        let (width, height) = self.size;
        let mut data = Vec::with_capacity(Frame::expected_len(width, height));
        let sweep = if width == 0 {
            0
        } else {
            (self.tick % width as u64) as u32
        };
        for y in 0..height {
            for x in 0..width {
                if x == sweep {
                    data.extend_from_slice(&[255, 255, 255]);
                    continue;
                }
                let band = (x * 6 / width.max(1)) as u8;
                let shade = (y * 255 / height.max(1)) as u8;
                let pixel = match band {
                    0 => [shade, 40, 40],
                    1 => [40, shade, 40],
                    2 => [40, 40, shade],
                    3 => [shade, shade, 40],
                    4 => [40, shade, shade],
                    _ => [shade, 40, shade],
                };
                data.extend_from_slice(&pixel);
            }
        }
        data
    }
}

impl FrameSource for SyntheticSource {
    fn name(&self) -> &str {
        "test-pattern"
    }

    fn resolution(&self) -> (u32, u32) {
        self.size
    }

    fn capture(&mut self) -> Result<Frame, CaptureError> {
        if let (Some(interval), Some(last)) = (self.interval, self.last) {
            let elapsed = last.elapsed();
            if elapsed < interval {
                thread::sleep(interval - elapsed);
            }
        }
        self.last = Some(Instant::now());

        let data = self.render();
        self.tick = self.tick.wrapping_add(1);
        Ok(Frame {
            data,
            width: self.size.0,
            height: self.size.1,
            timestamp_ms: Utc::now().timestamp_millis(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_match_declared_resolution() {
        let mut source = SyntheticSource::new((64, 48));
        let frame = source.capture().unwrap();
        assert_eq!(frame.resolution(), (64, 48));
        assert_eq!(frame.data.len(), Frame::expected_len(64, 48));
    }

    #[test]
    fn sweep_moves_between_captures() {
        let mut source = SyntheticSource::new((32, 8));
        let first = source.capture().unwrap();
        let second = source.capture().unwrap();
        assert_ne!(first.data, second.data);
    }
}
