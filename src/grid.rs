use imageproc::rect::Rect;
use logging_timer::time;

use crate::sheet::{GridConfig, OptionLabel};

/// A rectangular sampling region for one (question, option) choice.
/// Identity is the (question, option) pair; `is_filled` starts false and
/// is set once by the fill detector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bubble {
    pub question: u32,
    pub option: OptionLabel,
    pub bounds: Rect,
    pub is_filled: bool,
}

/// Computes the sampling rectangle for every grid cell. Pure geometry:
/// no pixel access, deterministic for a given config, row-major ordering
/// (question ascending, then option in label order).
#[time]
pub fn sample_grid(config: &GridConfig, labels: &[OptionLabel]) -> Vec<Bubble> {
    let mut bubbles = Vec::with_capacity((config.rows * config.cols) as usize);

    for row in 0..config.rows {
        for col in 0..config.cols {
            let x = config.left_margin + col * config.col_spacing;
            let y = config.top_margin + row * config.row_spacing;

            bubbles.push(Bubble {
                question: row + 1,
                option: labels[col as usize].clone(),
                bounds: Rect::at(x as i32, y as i32)
                    .of_size(config.bubble_width, config.bubble_height),
                is_filled: false,
            });
        }
    }

    bubbles
}
