use image::RgbaImage;
use imageproc::rect::Rect;
use logging_timer::time;

use crate::grid::Bubble;
use crate::sheet::{GeometryError, OptionLabel};

/// Tunable fill-detection parameters. The defaults are empirically chosen
/// and sensitive to scan resolution and contrast; calibrate per scanner.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectOptions {
    /// A sampled pixel counts as dark when its red channel is below this.
    /// Distinct from the binarization cutoff applied during preprocessing.
    pub dark_cutoff: u8,
    /// A bubble counts as filled when its dark-pixel ratio exceeds this.
    pub min_fill_ratio: f32,
}

impl Default for DetectOptions {
    fn default() -> Self {
        Self {
            dark_cutoff: 128,
            min_fill_ratio: 0.30,
        }
    }
}

/// Dark and total pixel counts for the in-bounds part of a rectangle.
fn sample_rect(img: &RgbaImage, bounds: &Rect, dark_cutoff: u8) -> (u32, u32) {
    let (width, height) = (img.width() as i64, img.height() as i64);
    let mut dark = 0;
    let mut sampled = 0;

    for y in bounds.top() as i64..bounds.top() as i64 + bounds.height() as i64 {
        for x in bounds.left() as i64..bounds.left() as i64 + bounds.width() as i64 {
            if x >= 0 && x < width && y >= 0 && y < height {
                if img.get_pixel(x as u32, y as u32).0[0] < dark_cutoff {
                    dark += 1;
                }
                sampled += 1;
            }
        }
    }

    (dark, sampled)
}

/// The fraction of in-bounds pixels within `bounds` that are dark. A
/// rectangle with no in-bounds pixels has ratio 0.
pub fn dark_ratio(img: &RgbaImage, bounds: &Rect, dark_cutoff: u8) -> f32 {
    let (dark, sampled) = sample_rect(img, bounds, dark_cutoff);
    if sampled == 0 {
        0.0
    } else {
        dark as f32 / sampled as f32
    }
}

/// Classifies each bubble as filled or not by measuring dark-pixel density
/// in the binarized buffer. Fails if no cell overlaps the image at all,
/// since that means the grid config does not describe this sheet.
#[time]
pub fn detect_filled(
    img: &RgbaImage,
    bubbles: &mut [Bubble],
    options: &DetectOptions,
) -> Result<(), GeometryError> {
    let mut any_sampled = false;

    for bubble in bubbles.iter_mut() {
        let (dark, sampled) = sample_rect(img, &bubble.bounds, options.dark_cutoff);
        if sampled > 0 {
            any_sampled = true;
            bubble.is_filled = dark as f32 / sampled as f32 > options.min_fill_ratio;
        } else {
            bubble.is_filled = false;
        }
    }

    if any_sampled {
        Ok(())
    } else {
        Err(GeometryError::GridOutsideImage)
    }
}

/// The outcome of reading one question's bubbles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DetectedMark {
    /// No bubble filled.
    Unanswered,
    /// Exactly one bubble filled.
    Single(OptionLabel),
    /// More than one bubble filled; options listed in column order.
    Ambiguous(Vec<OptionLabel>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuestionMark {
    pub question: u32,
    pub mark: DetectedMark,
}

/// Reduces per-bubble fill flags to one mark per question, ascending by
/// question number. Multi-filled questions are reported as `Ambiguous`
/// rather than silently picking one option.
#[time]
pub fn extract_marks(bubbles: &[Bubble], questions: u32) -> Vec<QuestionMark> {
    (1..=questions)
        .map(|question| {
            let filled = bubbles
                .iter()
                .filter(|b| b.question == question && b.is_filled)
                .map(|b| b.option.clone())
                .collect::<Vec<OptionLabel>>();

            let mark = match filled.len() {
                0 => DetectedMark::Unanswered,
                1 => DetectedMark::Single(filled.into_iter().next().expect("one option")),
                _ => DetectedMark::Ambiguous(filled),
            };

            QuestionMark { question, mark }
        })
        .collect()
}
