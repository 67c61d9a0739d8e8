use image::RgbaImage;
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_circle_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;
use logging_timer::time;
use rusttype::{Font, Scale};

use crate::image_utils::{BLACK, WHITE};
use crate::sheet::{default_option_labels, GridConfig, OptionLabel};

/// Declarative description of a printable answer sheet. The rendered grid
/// uses the same proportional geometry the scanner derives for a sheet of
/// these dimensions, so printed sheets are machine-readable as-is.
#[derive(Debug, Clone)]
pub struct TemplateConfig {
    pub question_count: u32,
    pub option_labels: Vec<OptionLabel>,
    pub title: String,
    pub subtitle: String,
    /// Instruction line printed at the bottom of the sheet.
    pub footer: String,
    pub show_question_numbers: bool,
    pub width: u32,
    pub height: u32,
}

impl Default for TemplateConfig {
    fn default() -> Self {
        Self {
            question_count: 15,
            option_labels: default_option_labels(),
            title: "Answer Sheet".to_string(),
            subtitle: "Fill in one bubble completely for each question".to_string(),
            footer: "Avoid stray marks or folds so the sheet stays machine-readable".to_string(),
            show_question_numbers: true,
            width: 850,
            height: 1100,
        }
    }
}

impl TemplateConfig {
    /// The grid a scanner should use to read sheets printed from this
    /// template. Matches `GridConfig::derive` for the page dimensions.
    pub fn grid_config(&self) -> GridConfig {
        GridConfig::derive(
            self.width,
            self.height,
            self.question_count,
            self.option_labels.len() as u32,
        )
    }
}

/// Renders the template as an image. Text (title, labels, question
/// numbers, footer) is only drawn when a font is supplied; the alignment
/// markers and bubble outlines never depend on one.
#[time]
pub fn render_template(config: &TemplateConfig, font: Option<&Font>) -> RgbaImage {
    let mut canvas = RgbaImage::from_pixel(config.width, config.height, WHITE);
    let grid = config.grid_config();

    draw_alignment_markers(&mut canvas, config);

    for row in 0..grid.rows {
        for col in 0..grid.cols {
            let x = (grid.left_margin + col * grid.col_spacing) as i32;
            let y = (grid.top_margin + row * grid.row_spacing) as i32;
            let radius = (grid.bubble_width.min(grid.bubble_height) / 2) as i32;
            draw_hollow_circle_mut(
                &mut canvas,
                (
                    x + grid.bubble_width as i32 / 2,
                    y + grid.bubble_height as i32 / 2,
                ),
                radius,
                BLACK,
            );
        }
    }

    if let Some(font) = font {
        draw_labels(&mut canvas, config, &grid, font);
    }

    canvas
}

fn draw_alignment_markers(canvas: &mut RgbaImage, config: &TemplateConfig) {
    let marker = (config.width / 40).max(4);
    let margin = marker as i32;
    let right = config.width as i32 - margin - marker as i32;
    let bottom = config.height as i32 - margin - marker as i32;

    for (x, y) in [(margin, margin), (right, margin), (margin, bottom), (right, bottom)] {
        draw_filled_rect_mut(canvas, Rect::at(x, y).of_size(marker, marker), BLACK);
    }
}

fn draw_labels(canvas: &mut RgbaImage, config: &TemplateConfig, grid: &GridConfig, font: &Font) {
    let heading_scale = Scale::uniform(config.height as f32 / 40.0);
    let body_scale = Scale::uniform(grid.bubble_height as f32);

    let (title_width, _) = text_size(heading_scale, font, &config.title);
    draw_text_mut(
        canvas,
        BLACK,
        (config.width as i32 - title_width) / 2,
        (config.height / 25) as i32,
        heading_scale,
        font,
        &config.title,
    );

    let subtitle_scale = Scale::uniform(config.height as f32 / 70.0);
    let (subtitle_width, _) = text_size(subtitle_scale, font, &config.subtitle);
    draw_text_mut(
        canvas,
        BLACK,
        (config.width as i32 - subtitle_width) / 2,
        (config.height / 12) as i32,
        subtitle_scale,
        font,
        &config.subtitle,
    );

    // header row of option labels above the first bubble row
    for (col, label) in config.option_labels.iter().take(grid.cols as usize).enumerate() {
        let x = (grid.left_margin + col as u32 * grid.col_spacing) as i32;
        draw_text_mut(
            canvas,
            BLACK,
            x,
            grid.top_margin as i32 - grid.row_spacing as i32 / 2,
            body_scale,
            font,
            label.as_str(),
        );
    }

    if config.show_question_numbers {
        for row in 0..grid.rows {
            let y = (grid.top_margin + row * grid.row_spacing) as i32;
            draw_text_mut(
                canvas,
                BLACK,
                grid.left_margin as i32 - grid.col_spacing as i32,
                y,
                body_scale,
                font,
                &(row + 1).to_string(),
            );
        }
    }

    let (footer_width, footer_height) = text_size(subtitle_scale, font, &config.footer);
    draw_text_mut(
        canvas,
        BLACK,
        (config.width as i32 - footer_width) / 2,
        config.height as i32 - footer_height * 2,
        subtitle_scale,
        font,
        &config.footer,
    );
}
