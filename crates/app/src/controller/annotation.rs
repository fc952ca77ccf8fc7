//! Text overlays burned into outgoing frames.
//!
//! Uses a tiny 5x7 bitmap font scaled up so the labels stay legible after
//! JPEG compression. Glyphs cover upper-case letters, digits and the
//! punctuation that shows up in crop labels and command strings; anything
//! else renders as `?`.

use image::{Rgb, RgbImage};

const GLYPH_WIDTH: i32 = 5;
const GLYPH_HEIGHT: i32 = 7;
const SCALE: i32 = 3;
const ADVANCE: i32 = (GLYPH_WIDTH + 1) * SCALE;
const PADDING: i32 = 4;

pub(crate) const CROP_ORIGIN: (i32, i32) = (50, 50);
pub(crate) const COMMAND_ORIGIN: (i32, i32) = (50, 100);
pub(crate) const CROP_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
pub(crate) const COMMAND_COLOR: Rgb<u8> = Rgb([255, 0, 0]);

/// Pixel rectangle `(left, top, right, bottom)`, inclusive.
pub(crate) type TextBox = (i32, i32, i32, i32);

/// Draw the crop label and, when one has been received, the last command.
pub(crate) fn burn_in(image: &mut RgbImage, crop: &str, command: Option<&str>) {
    draw_label(image, CROP_ORIGIN, &format!("Crop: {crop}"), CROP_COLOR);
    if let Some(command) = command.filter(|c| !c.is_empty()) {
        draw_label(
            image,
            COMMAND_ORIGIN,
            &format!("Command: {command}"),
            COMMAND_COLOR,
        );
    }
}

/// Area covered by `text` drawn at `origin`, including its backing box.
pub(crate) fn text_box(origin: (i32, i32), text: &str) -> TextBox {
    let chars = rendered(text).count() as i32;
    (
        origin.0 - PADDING,
        origin.1 - PADDING,
        origin.0 + chars * ADVANCE + PADDING,
        origin.1 + GLYPH_HEIGHT * SCALE + PADDING,
    )
}

fn draw_label(image: &mut RgbImage, origin: (i32, i32), text: &str, color: Rgb<u8>) {
    darken_rect(image, text_box(origin, text));
    let mut x = origin.0;
    for ch in rendered(text) {
        let glyph = glyph_bits(ch).unwrap_or(UNKNOWN);
        for (row, pattern) in glyph.iter().enumerate() {
            for col in 0..GLYPH_WIDTH {
                if (pattern >> (GLYPH_WIDTH - 1 - col)) & 1 == 1 {
                    fill_rect(
                        image,
                        (
                            x + col * SCALE,
                            origin.1 + row as i32 * SCALE,
                            x + (col + 1) * SCALE - 1,
                            origin.1 + (row as i32 + 1) * SCALE - 1,
                        ),
                        color,
                    );
                }
            }
        }
        x += ADVANCE;
    }
}

/// Characters as drawn. Upper-casing can expand one char into several.
fn rendered(text: &str) -> impl Iterator<Item = char> + '_ {
    text.chars().flat_map(char::to_uppercase)
}

fn clamp_box(image: &RgbImage, (left, top, right, bottom): TextBox) -> Option<TextBox> {
    let width = image.width() as i32;
    let height = image.height() as i32;
    if right < 0 || bottom < 0 || left >= width || top >= height {
        return None;
    }
    Some((
        left.max(0),
        top.max(0),
        right.min(width - 1),
        bottom.min(height - 1),
    ))
}

fn fill_rect(image: &mut RgbImage, rect: TextBox, color: Rgb<u8>) {
    let Some((left, top, right, bottom)) = clamp_box(image, rect) else {
        return;
    };
    for y in top..=bottom {
        for x in left..=right {
            image.put_pixel(x as u32, y as u32, color);
        }
    }
}

fn darken_rect(image: &mut RgbImage, rect: TextBox) {
    let Some((left, top, right, bottom)) = clamp_box(image, rect) else {
        return;
    };
    for y in top..=bottom {
        for x in left..=right {
            let pixel = image.get_pixel_mut(x as u32, y as u32);
            for channel in pixel.0.iter_mut() {
                *channel /= 4;
            }
        }
    }
}

const UNKNOWN: [u8; 7] = [
    0b01110, 0b10001, 0b00001, 0b00010, 0b00100, 0b00000, 0b00100,
];

fn glyph_bits(ch: char) -> Option<[u8; 7]> {
    let bits = match ch {
        'A' => [0b01110, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001],
        'B' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10001, 0b10001, 0b11110],
        'C' => [0b01110, 0b10001, 0b10000, 0b10000, 0b10000, 0b10001, 0b01110],
        'D' => [0b11100, 0b10010, 0b10001, 0b10001, 0b10001, 0b10010, 0b11100],
        'E' => [0b11111, 0b10000, 0b11110, 0b10000, 0b10000, 0b10000, 0b11111],
        'F' => [0b11111, 0b10000, 0b11110, 0b10000, 0b10000, 0b10000, 0b10000],
        'G' => [0b01110, 0b10001, 0b10000, 0b10111, 0b10001, 0b10001, 0b01111],
        'H' => [0b10001, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001],
        'I' => [0b01110, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110],
        'J' => [0b00111, 0b00010, 0b00010, 0b00010, 0b00010, 0b10010, 0b01100],
        'K' => [0b10001, 0b10010, 0b10100, 0b11000, 0b10100, 0b10010, 0b10001],
        'L' => [0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b11111],
        'M' => [0b10001, 0b11011, 0b10101, 0b10101, 0b10001, 0b10001, 0b10001],
        'N' => [0b10001, 0b11001, 0b10101, 0b10101, 0b10011, 0b10001, 0b10001],
        'O' => [0b01110, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110],
        'P' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10000, 0b10000, 0b10000],
        'Q' => [0b01110, 0b10001, 0b10001, 0b10001, 0b10101, 0b10010, 0b01101],
        'R' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10100, 0b10010, 0b10001],
        'S' => [0b01111, 0b10000, 0b01110, 0b00001, 0b00001, 0b10001, 0b01110],
        'T' => [0b11111, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100],
        'U' => [0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110],
        'V' => [0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01010, 0b00100],
        'W' => [0b10001, 0b10001, 0b10001, 0b10101, 0b10101, 0b11011, 0b10001],
        'X' => [0b10001, 0b10001, 0b01010, 0b00100, 0b01010, 0b10001, 0b10001],
        'Y' => [0b10001, 0b10001, 0b01010, 0b00100, 0b00100, 0b00100, 0b00100],
        'Z' => [0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b10000, 0b11111],
        '0' => [0b01110, 0b10001, 0b10011, 0b10101, 0b11001, 0b10001, 0b01110],
        '1' => [0b00100, 0b01100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110],
        '2' => [0b01110, 0b10001, 0b00001, 0b00010, 0b00100, 0b01000, 0b11111],
        '3' => [0b11110, 0b00001, 0b00001, 0b01110, 0b00001, 0b00001, 0b11110],
        '4' => [0b00010, 0b00110, 0b01010, 0b10010, 0b11111, 0b00010, 0b00010],
        '5' => [0b11111, 0b10000, 0b11110, 0b00001, 0b00001, 0b10001, 0b01110],
        '6' => [0b00110, 0b01000, 0b10000, 0b11110, 0b10001, 0b10001, 0b01110],
        '7' => [0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b01000, 0b01000],
        '8' => [0b01110, 0b10001, 0b10001, 0b01110, 0b10001, 0b10001, 0b01110],
        '9' => [0b01110, 0b10001, 0b10001, 0b01111, 0b00001, 0b00010, 0b01100],
        ':' => [0, 0b00110, 0b00110, 0, 0b00110, 0b00110, 0],
        '-' => [0, 0, 0, 0b11111, 0, 0, 0],
        '_' => [0, 0, 0, 0, 0, 0, 0b11111],
        '/' => [0b00001, 0b00001, 0b00010, 0b00100, 0b01000, 0b10000, 0b10000],
        '\'' => [0b00100, 0b00100, 0b01000, 0, 0, 0, 0],
        '(' => [0b00010, 0b00100, 0b01000, 0b01000, 0b01000, 0b00100, 0b00010],
        ')' => [0b01000, 0b00100, 0b00010, 0b00010, 0b00010, 0b00100, 0b01000],
        '%' => [0b10001, 0b10010, 0b00100, 0b01000, 0b10010, 0b10001, 0],
        '.' => [0, 0, 0, 0, 0, 0b00110, 0b00110],
        '?' => UNKNOWN,
        ' ' => [0; 7],
        _ => return None,
    };
    Some(bits)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lit_pixels(image: &RgbImage, (left, top, right, bottom): TextBox, color: Rgb<u8>) -> usize {
        (top.max(0)..=bottom)
            .flat_map(|y| (left.max(0)..=right).map(move |x| (x as u32, y as u32)))
            .filter(|&(x, y)| *image.get_pixel(x, y) == color)
            .count()
    }

    #[test]
    fn crop_and_command_land_in_separate_boxes() {
        let mut image = RgbImage::from_pixel(640, 480, Rgb([40, 40, 40]));
        burn_in(&mut image, "rice", Some("Turning Left"));

        let crop = text_box(CROP_ORIGIN, "Crop: rice");
        let command = text_box(COMMAND_ORIGIN, "Command: Turning Left");
        assert!(crop.3 < command.1, "overlay boxes overlap");
        assert!(lit_pixels(&image, crop, CROP_COLOR) > 100);
        assert!(lit_pixels(&image, command, COMMAND_COLOR) > 100);
        assert_eq!(lit_pixels(&image, crop, COMMAND_COLOR), 0);
    }

    #[test]
    fn empty_command_draws_nothing_in_command_box() {
        let background = Rgb([40, 40, 40]);
        let mut image = RgbImage::from_pixel(640, 480, background);
        burn_in(&mut image, "none", Some(""));
        let (left, top, right, bottom) = text_box(COMMAND_ORIGIN, "Command: x");
        for y in top..=bottom {
            for x in left..=right {
                assert_eq!(*image.get_pixel(x as u32, y as u32), background);
            }
        }
    }

    #[test]
    fn expanding_upper_case_stays_inside_its_box() {
        let mut image = RgbImage::from_pixel(640, 480, Rgb([40, 40, 40]));
        burn_in(&mut image, "rice", Some("Straße"));

        let command = text_box(COMMAND_ORIGIN, "Command: Straße");
        assert_eq!(command, text_box(COMMAND_ORIGIN, "COMMAND: STRASSE"));
        let total = image.pixels().filter(|p| **p == COMMAND_COLOR).count();
        assert!(total > 0);
        assert_eq!(lit_pixels(&image, command, COMMAND_COLOR), total);
    }

    #[test]
    fn tiny_frames_clip_instead_of_panicking() {
        let mut image = RgbImage::new(32, 24);
        burn_in(&mut image, "sugarcane", Some("lowering sensor {}"));
        let mut off_frame = RgbImage::new(8, 8);
        burn_in(&mut off_frame, "wheat", None);
    }

    #[test]
    fn every_known_glyph_has_ink() {
        for ch in ('A'..='Z').chain('0'..='9').chain(":-_/'()%.?".chars()) {
            let bits = glyph_bits(ch).unwrap();
            assert!(bits.iter().any(|row| *row != 0), "{ch} is blank");
            assert!(bits.iter().all(|row| *row < 32), "{ch} is wider than 5");
        }
        assert!(glyph_bits('{').is_none());
    }
}
