use std::fmt::Display;
use std::io::Cursor;

use image::{ImageError, ImageFormat, Rgba, RgbaImage};
use logging_timer::time;

pub const WHITE: Rgba<u8> = Rgba([u8::MAX, u8::MAX, u8::MAX, u8::MAX]);
pub const BLACK: Rgba<u8> = Rgba([u8::MIN, u8::MIN, u8::MIN, u8::MAX]);

pub const GREEN: Rgba<u8> = Rgba([0, 255, 0, 255]);
pub const RED: Rgba<u8> = Rgba([255, 0, 0, 255]);
pub const ORANGE: Rgba<u8> = Rgba([255, 165, 0, 255]);

/// Default luminance cutoff for binarization. Empirically chosen;
/// override via `Options::binarize_cutoff` (`--binarize-cutoff`) when
/// calibrating for a scanner.
pub const DEFAULT_BINARIZE_CUTOFF: u8 = 150;

#[derive(Debug)]
pub struct DecodeError(pub ImageError);

impl Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "could not decode image: {}", self.0)
    }
}

#[derive(Debug)]
pub struct RenderError(pub ImageError);

impl Display for RenderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "could not re-encode processed image: {}", self.0)
    }
}

/// Decodes raw image bytes into an RGBA pixel buffer.
#[time]
pub fn decode_image(bytes: &[u8]) -> Result<RgbaImage, DecodeError> {
    let img = image::load_from_memory(bytes).map_err(DecodeError)?;
    Ok(img.into_rgba8())
}

/// Replaces each pixel's R, G, and B with their unweighted integer mean.
/// Alpha is untouched. Idempotent: a grayscale image maps to itself.
#[time]
pub fn grayscale_in_place(img: &mut RgbaImage) {
    for pixel in img.pixels_mut() {
        let Rgba([r, g, b, _]) = *pixel;
        let avg = ((r as u16 + g as u16 + b as u16) / 3) as u8;
        pixel.0[0] = avg;
        pixel.0[1] = avg;
        pixel.0[2] = avg;
    }
}

/// Binarizes a grayscale buffer: channels become 0 where the luminance
/// (red channel) is strictly below `cutoff`, 255 otherwise.
#[time]
pub fn threshold_in_place(img: &mut RgbaImage, cutoff: u8) {
    for pixel in img.pixels_mut() {
        let value = if pixel.0[0] < cutoff { u8::MIN } else { u8::MAX };
        pixel.0[0] = value;
        pixel.0[1] = value;
        pixel.0[2] = value;
    }
}

/// Re-encodes a pixel buffer as a PNG for display alongside results.
#[time]
pub fn encode_png(img: &RgbaImage) -> Result<Vec<u8>, RenderError> {
    let mut bytes = Cursor::new(Vec::new());
    img.write_to(&mut bytes, ImageFormat::Png)
        .map_err(RenderError)?;
    Ok(bytes.into_inner())
}

/// Determines the number of pixels in an image that match the given color.
pub fn count_pixels(img: &RgbaImage, color: &Rgba<u8>) -> u32 {
    img.pixels().filter(|p| *p == color).count() as u32
}
