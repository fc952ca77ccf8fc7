//! Frame → model input conversion.

use image::{ImageBuffer, Rgb, imageops::FilterType};

use crate::ClassifyError;

/// Resize a packed RGB frame to `side`x`side` and scale channels into
/// `0.0..=1.0`, returning an NHWC float buffer of `side * side * 3` values.
pub fn prepare_input(rgb: &[u8], width: u32, height: u32, side: u32) -> Result<Vec<f32>, ClassifyError> {
    let expected = (width as usize) * (height as usize) * 3;
    if rgb.len() != expected || width == 0 || height == 0 {
        return Err(ClassifyError::FrameSize {
            got: rgb.len(),
            width,
            height,
        });
    }
    let view = ImageBuffer::<Rgb<u8>, &[u8]>::from_raw(width, height, rgb).ok_or(
        ClassifyError::FrameSize {
            got: rgb.len(),
            width,
            height,
        },
    )?;

    let normalise = |bytes: &[u8]| bytes.iter().map(|&v| v as f32 / 255.0).collect::<Vec<_>>();
    if width == side && height == side {
        return Ok(normalise(rgb));
    }
    let resized = image::imageops::resize(&view, side, side, FilterType::Triangle);
    Ok(normalise(resized.as_raw()))
}

/// Index of the highest score. NaN never wins.
pub fn argmax(scores: &[f32]) -> Option<usize> {
    scores
        .iter()
        .enumerate()
        .filter(|(_, score)| !score.is_nan())
        .fold(None, |best: Option<(usize, f32)>, (idx, &score)| match best {
            Some((_, top)) if top >= score => best,
            _ => Some((idx, score)),
        })
        .map(|(idx, _)| idx)
}
