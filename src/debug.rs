use std::collections::HashSet;
use std::path::{Path, PathBuf};

use image::RgbaImage;
use imageproc::drawing::draw_hollow_rect_mut;

use crate::detect::{DetectedMark, QuestionMark};
use crate::grid::Bubble;
use crate::image_utils::{GREEN, ORANGE, RED};

/// Creates a path for a debug image.
pub fn debug_image_path(base: &Path, label: &str) -> PathBuf {
    let mut result = PathBuf::from(base);
    result.set_file_name(format!(
        "{}_debug_{}.png",
        base.file_stem().unwrap_or_default().to_string_lossy(),
        label
    ));
    result
}

/// Writes annotated debug images next to the input file. The disabled
/// writer does nothing, so callers never need to branch.
pub struct ImageDebugWriter {
    input_path: PathBuf,
    base: Option<RgbaImage>,
}

impl ImageDebugWriter {
    pub fn new(input_path: PathBuf, base: RgbaImage) -> Self {
        Self {
            input_path,
            base: Some(base),
        }
    }

    pub fn disabled() -> Self {
        Self {
            input_path: PathBuf::new(),
            base: None,
        }
    }

    pub fn write(&self, label: &str, draw: impl FnOnce(&mut RgbaImage)) -> Option<PathBuf> {
        let base = self.base.as_ref()?;
        let mut canvas = base.clone();
        draw(&mut canvas);

        let path = debug_image_path(&self.input_path, label);
        match canvas.save(&path) {
            Ok(()) => {
                log::debug!("wrote debug image {}", path.display());
                Some(path)
            }
            Err(e) => {
                log::error!("could not write debug image {}: {}", path.display(), e);
                None
            }
        }
    }
}

/// Outlines every bubble by outcome: filled bubbles green, filled bubbles
/// belonging to an ambiguous question orange, empty bubbles red.
pub fn draw_scored_bubbles_debug_image_mut(
    canvas: &mut RgbaImage,
    bubbles: &[Bubble],
    marks: &[QuestionMark],
) {
    let ambiguous = marks
        .iter()
        .filter(|m| matches!(m.mark, DetectedMark::Ambiguous(_)))
        .map(|m| m.question)
        .collect::<HashSet<u32>>();

    for bubble in bubbles {
        let color = if !bubble.is_filled {
            RED
        } else if ambiguous.contains(&bubble.question) {
            ORANGE
        } else {
            GREEN
        };
        draw_hollow_rect_mut(canvas, bubble.bounds, color);
    }
}
