//! OpenCV-backed camera capture.

use anyhow::anyhow;
use chrono::Utc;
use opencv::{
    core::{self, MatTraitConstManual},
    imgproc,
    prelude::*,
    videoio::{self, VideoCapture, VideoCaptureTrait},
};
use tracing::{debug, warn};

use crate::types::{CaptureError, Frame, FrameSource};

/// Exclusive handle on one V4L/OpenCV capture device.
///
/// Frames are resized to the configured resolution when the driver ignores the
/// requested size, and converted from OpenCV's BGR order to RGB.
pub struct OpenCvCamera {
    uri: String,
    cap: VideoCapture,
    target_size: (u32, u32),
    raw: Mat,
    resized: Mat,
    rgb: Mat,
}

impl OpenCvCamera {
    /// Open and configure the device named by `uri`.
    pub fn open(uri: &str, target_size: (u32, u32)) -> Result<Self, CaptureError> {
        let mut cap = open_video_capture(uri)?;
        configure_camera(&mut cap, target_size);
        debug!(uri, width = target_size.0, height = target_size.1, "camera opened");
        Ok(Self {
            uri: uri.to_string(),
            cap,
            target_size,
            raw: Mat::default(),
            resized: Mat::default(),
            rgb: Mat::default(),
        })
    }
}

impl FrameSource for OpenCvCamera {
    fn name(&self) -> &str {
        &self.uri
    }

    fn resolution(&self) -> (u32, u32) {
        self.target_size
    }

    fn capture(&mut self) -> Result<Frame, CaptureError> {
        let grabbed = self
            .cap
            .read(&mut self.raw)
            .map_err(|e| CaptureError::Other(e.into()))?;
        let size = self.raw.size().map_err(|e| CaptureError::Other(e.into()))?;
        if !grabbed || size.width <= 0 {
            return Err(CaptureError::Other(anyhow!(
                "camera {} returned an empty frame",
                self.uri
            )));
        }

        let (target_w, target_h) = self.target_size;
        let working = if size.width != target_w as i32 || size.height != target_h as i32 {
            imgproc::resize(
                &self.raw,
                &mut self.resized,
                core::Size {
                    width: target_w as i32,
                    height: target_h as i32,
                },
                0.0,
                0.0,
                imgproc::INTER_LINEAR,
            )
            .map_err(|e| CaptureError::Other(e.into()))?;
            &self.resized
        } else {
            &self.raw
        };

        imgproc::cvt_color(working, &mut self.rgb, imgproc::COLOR_BGR2RGB, 0)
            .map_err(|e| CaptureError::Other(e.into()))?;

        let data = self
            .rgb
            .data_bytes()
            .map_err(|e| CaptureError::Other(e.into()))?
            .to_vec();
        let expected = Frame::expected_len(target_w, target_h);
        if data.len() != expected {
            return Err(CaptureError::Size {
                got: data.len(),
                expected,
                width: target_w,
                height: target_h,
            });
        }

        Ok(Frame {
            data,
            width: target_w,
            height: target_h,
            timestamp_ms: Utc::now().timestamp_millis(),
        })
    }
}

/// Attempt to open a camera input either by index or URI.
fn open_video_capture(uri: &str) -> Result<VideoCapture, CaptureError> {
    if let Some(index) = crate::parse_device_index(uri) {
        for backend in [videoio::CAP_V4L, videoio::CAP_ANY] {
            match VideoCapture::new(index, backend) {
                Ok(cap) => {
                    if cap.is_opened().map_err(|e| CaptureError::Other(e.into()))? {
                        return Ok(cap);
                    }
                }
                Err(err) => {
                    warn!("failed to open device #{index} with backend {backend}: {err}");
                }
            }
        }
    }

    for backend in [videoio::CAP_V4L, videoio::CAP_ANY] {
        match VideoCapture::from_file(uri, backend) {
            Ok(cap) => {
                if cap.is_opened().map_err(|e| CaptureError::Other(e.into()))? {
                    return Ok(cap);
                }
            }
            Err(err) => {
                warn!("failed to open {uri} with backend {backend}: {err}");
            }
        }
    }

    Err(CaptureError::Open {
        uri: uri.to_string(),
    })
}

/// Apply resolution and preferred pixel format (MJPG, falling back to YUYV).
fn configure_camera(cap: &mut VideoCapture, target_size: (u32, u32)) {
    let mut fourcc_set = false;
    if let Ok(mjpg) = videoio::VideoWriter::fourcc('M', 'J', 'P', 'G') {
        if matches!(cap.set(videoio::CAP_PROP_FOURCC, mjpg as f64), Ok(true)) {
            fourcc_set = true;
        }
    }
    if !fourcc_set {
        if let Ok(yuyv) = videoio::VideoWriter::fourcc('Y', 'U', 'Y', 'V') {
            let _ = cap.set(videoio::CAP_PROP_FOURCC, yuyv as f64);
        }
    }
    let _ = cap.set(videoio::CAP_PROP_FRAME_WIDTH, target_size.0 as f64);
    let _ = cap.set(videoio::CAP_PROP_FRAME_HEIGHT, target_size.1 as f64);
}
