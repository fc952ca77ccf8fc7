//! Frame acquisition for the rover.
//!
//! Every source hands out packed RGB frames of a fixed, declared resolution.
//! Sources are pulled synchronously by their single owner; nothing here spawns
//! threads or queues frames.

#[cfg(feature = "opencv")]
mod camera;
mod synthetic;
mod types;

use std::time::Duration;

use tracing::info;

#[cfg(feature = "opencv")]
pub use camera::OpenCvCamera;
pub use synthetic::SyntheticSource;
pub use types::{CaptureError, Frame, FrameSource};

/// URI selecting the built-in test pattern instead of a camera.
pub const TEST_PATTERN_URI: &str = "test-pattern";

const TEST_PATTERN_INTERVAL: Duration = Duration::from_millis(66);

/// Open the source named by `uri` at `size`.
///
/// `test-pattern` selects [`SyntheticSource`]; anything else is handed to the
/// OpenCV backend when the `opencv` feature is enabled.
pub fn open_source(uri: &str, size: (u32, u32)) -> Result<Box<dyn FrameSource>, CaptureError> {
    if uri == TEST_PATTERN_URI {
        info!("using synthetic test pattern at {}x{}", size.0, size.1);
        return Ok(Box::new(
            SyntheticSource::new(size).with_interval(TEST_PATTERN_INTERVAL),
        ));
    }
    open_camera(uri, size)
}

#[cfg(feature = "opencv")]
fn open_camera(uri: &str, size: (u32, u32)) -> Result<Box<dyn FrameSource>, CaptureError> {
    Ok(Box::new(OpenCvCamera::open(uri, size)?))
}

#[cfg(not(feature = "opencv"))]
fn open_camera(uri: &str, _size: (u32, u32)) -> Result<Box<dyn FrameSource>, CaptureError> {
    Err(CaptureError::Unsupported {
        uri: uri.to_string(),
    })
}

/// Parse a `/dev/videoX` style URI (or a bare index) into a device index.
pub fn parse_device_index(uri: &str) -> Option<i32> {
    if let Ok(index) = uri.parse::<i32>() {
        return Some(index);
    }
    let stripped = uri.strip_prefix("/dev/video")?;
    if !stripped.is_empty() && stripped.chars().all(|c| c.is_ascii_digit()) {
        return stripped.parse::<i32>().ok();
    }
    None
}
