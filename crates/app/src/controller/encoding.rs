//! JPEG encoding and multipart framing for the MJPEG stream.

use actix_web::web::Bytes;
use anyhow::{Context, Result};
use image::{RgbImage, codecs::jpeg::JpegEncoder};

pub(crate) const BOUNDARY: &str = "frame";
pub(crate) const STREAM_CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=frame";

pub(crate) fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>> {
    let mut buffer = Vec::with_capacity(image.as_raw().len() / 8);
    JpegEncoder::new_with_quality(&mut buffer, quality.clamp(1, 100))
        .encode_image(image)
        .context("JPEG encode failed")?;
    Ok(buffer)
}

/// Wrap one JPEG in a multipart part delimited by [`BOUNDARY`].
pub(crate) fn multipart_part(jpeg: &[u8], sequence: u64) -> Bytes {
    let mut payload = Vec::with_capacity(jpeg.len() + 80);
    payload.extend_from_slice(b"--");
    payload.extend_from_slice(BOUNDARY.as_bytes());
    payload.extend_from_slice(b"\r\n");
    payload.extend_from_slice(format!("X-Sequence: {sequence}\r\n").as_bytes());
    payload.extend_from_slice(b"Content-Type: image/jpeg\r\n\r\n");
    payload.extend_from_slice(jpeg);
    payload.extend_from_slice(b"\r\n");
    Bytes::from(payload)
}

/// Split a multipart part back into its sequence number and JPEG body.
#[cfg(test)]
pub(crate) fn split_part(part: &[u8]) -> Option<(u64, &[u8])> {
    let header_end = part.windows(4).position(|w| w == b"\r\n\r\n")?;
    let headers = std::str::from_utf8(&part[..header_end]).ok()?;
    let mut lines = headers.split("\r\n");
    if lines.next()? != "--frame" {
        return None;
    }
    let sequence = lines
        .find_map(|line| line.strip_prefix("X-Sequence: "))?
        .parse()
        .ok()?;
    let body = part[header_end + 4..].strip_suffix(b"\r\n")?;
    Some((sequence, body))
}

#[cfg(test)]
mod tests {
    use image::Rgb;

    use super::*;

    #[test]
    fn part_layout_matches_mjpeg_framing() {
        let part = multipart_part(b"JPEGDATA", 42);
        assert_eq!(
            &part[..],
            b"--frame\r\nX-Sequence: 42\r\nContent-Type: image/jpeg\r\n\r\nJPEGDATA\r\n"
        );
        assert_eq!(split_part(&part), Some((42, &b"JPEGDATA"[..])));
    }

    #[test]
    fn encoded_frame_decodes_at_source_resolution() {
        let image = RgbImage::from_pixel(64, 48, Rgb([10, 200, 30]));
        let jpeg = encode_jpeg(&image, 90).unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
        let decoded = image::load_from_memory(&jpeg).unwrap().to_rgb8();
        assert_eq!(decoded.dimensions(), (64, 48));
    }
}
