use std::fmt::Display;

use serde::{Deserialize, Serialize};

/// A single answer option label, e.g. "A" or "B".
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OptionLabel(String);

impl OptionLabel {
    pub fn from(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for OptionLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The standard four-option label set.
pub fn default_option_labels() -> Vec<OptionLabel> {
    ["A", "B", "C", "D"].into_iter().map(OptionLabel::from).collect()
}

/// Parses a comma-separated list of option labels, e.g. "A,B,C,D".
pub fn parse_option_labels(s: &str) -> Vec<OptionLabel> {
    s.split(',')
        .map(str::trim)
        .filter(|label| !label.is_empty())
        .map(OptionLabel::from)
        .collect()
}

/// Geometric parameters defining bubble placement on an answer sheet.
/// All values are in pixel units of the scanned image. The grid is
/// axis-aligned and uniformly spaced; row 0/column 0 anchors at
/// (`left_margin`, `top_margin`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GridConfig {
    pub rows: u32,
    pub cols: u32,
    pub top_margin: u32,
    pub left_margin: u32,
    pub row_spacing: u32,
    pub col_spacing: u32,
    pub bubble_width: u32,
    pub bubble_height: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GeometryError {
    NoQuestions,
    NoOptions,
    ZeroSpacing,
    ZeroAreaBubble,
    TooFewLabels { cols: u32, labels: usize },
    GridTooLarge,
    GridOutsideImage,
}

impl Display for GeometryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoQuestions => write!(f, "grid has no question rows"),
            Self::NoOptions => write!(f, "grid has no option columns"),
            Self::ZeroSpacing => write!(f, "grid row/column spacing must be positive"),
            Self::ZeroAreaBubble => write!(f, "bubble width and height must be positive"),
            Self::TooFewLabels { cols, labels } => write!(
                f,
                "grid has {} option columns but only {} labels",
                cols, labels
            ),
            Self::GridTooLarge => {
                write!(f, "grid extends beyond the addressable pixel range")
            }
            Self::GridOutsideImage => write!(f, "no grid cell overlaps the image"),
        }
    }
}

impl GridConfig {
    /// Derives a grid for a sheet of the given pixel dimensions using the
    /// default proportions: answer block starting 20% down and 10% in,
    /// cells every 5% of the sheet, bubbles 3% of the sheet.
    pub fn derive(width: u32, height: u32, rows: u32, cols: u32) -> Self {
        Self {
            rows,
            cols,
            top_margin: height / 5,
            left_margin: width / 10,
            row_spacing: height / 20,
            col_spacing: width / 20,
            bubble_width: width * 3 / 100,
            bubble_height: height * 3 / 100,
        }
    }

    pub fn validate(&self, labels: &[OptionLabel]) -> Result<(), GeometryError> {
        if self.rows < 1 {
            return Err(GeometryError::NoQuestions);
        }
        if self.cols < 1 {
            return Err(GeometryError::NoOptions);
        }
        if self.row_spacing == 0 || self.col_spacing == 0 {
            return Err(GeometryError::ZeroSpacing);
        }
        if self.bubble_width == 0 || self.bubble_height == 0 {
            return Err(GeometryError::ZeroAreaBubble);
        }
        if (self.cols as usize) > labels.len() {
            return Err(GeometryError::TooFewLabels {
                cols: self.cols,
                labels: labels.len(),
            });
        }
        // the far corner of the last cell must stay addressable; this also
        // keeps sample_grid's u32 anchor arithmetic from overflowing
        let max_x = self.left_margin as u64
            + (self.cols as u64 - 1) * self.col_spacing as u64
            + self.bubble_width as u64;
        let max_y = self.top_margin as u64
            + (self.rows as u64 - 1) * self.row_spacing as u64
            + self.bubble_height as u64;
        if max_x > i32::MAX as u64 || max_y > i32::MAX as u64 {
            return Err(GeometryError::GridTooLarge);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> GridConfig {
        GridConfig {
            rows: 15,
            cols: 4,
            top_margin: 200,
            left_margin: 100,
            row_spacing: 50,
            col_spacing: 50,
            bubble_width: 30,
            bubble_height: 30,
        }
    }

    #[test]
    fn validate_accepts_default_shape() {
        assert_eq!(base_config().validate(&default_option_labels()), Ok(()));
    }

    #[test]
    fn validate_rejects_degenerate_grids() {
        let labels = default_option_labels();

        let mut config = base_config();
        config.rows = 0;
        assert_eq!(config.validate(&labels), Err(GeometryError::NoQuestions));

        let mut config = base_config();
        config.cols = 0;
        assert_eq!(config.validate(&labels), Err(GeometryError::NoOptions));

        let mut config = base_config();
        config.row_spacing = 0;
        assert_eq!(config.validate(&labels), Err(GeometryError::ZeroSpacing));

        let mut config = base_config();
        config.bubble_height = 0;
        assert_eq!(config.validate(&labels), Err(GeometryError::ZeroAreaBubble));
    }

    #[test]
    fn validate_rejects_grids_past_the_addressable_range() {
        // margin at u32::MAX with a second column would overflow the
        // anchor arithmetic; validate must reject it, not panic later
        let mut config = base_config();
        config.left_margin = u32::MAX;
        config.cols = 2;
        config.col_spacing = 1;
        assert_eq!(
            config.validate(&default_option_labels()),
            Err(GeometryError::GridTooLarge)
        );

        let mut config = base_config();
        config.top_margin = u32::MAX;
        assert_eq!(
            config.validate(&default_option_labels()),
            Err(GeometryError::GridTooLarge)
        );

        // just inside the range is fine
        let mut config = base_config();
        config.left_margin = i32::MAX as u32 - 200;
        assert_eq!(config.validate(&default_option_labels()), Ok(()));
    }

    #[test]
    fn validate_rejects_more_columns_than_labels() {
        let mut config = base_config();
        config.cols = 5;
        assert_eq!(
            config.validate(&default_option_labels()),
            Err(GeometryError::TooFewLabels { cols: 5, labels: 4 })
        );
    }

    #[test]
    fn derive_uses_sheet_proportions() {
        let config = GridConfig::derive(1000, 2000, 15, 4);
        assert_eq!(config.top_margin, 400);
        assert_eq!(config.left_margin, 100);
        assert_eq!(config.row_spacing, 100);
        assert_eq!(config.col_spacing, 50);
        assert_eq!(config.bubble_width, 30);
        assert_eq!(config.bubble_height, 60);
    }

    #[test]
    fn parse_option_labels_trims_and_skips_empty() {
        assert_eq!(
            parse_option_labels("A, B,,C , D"),
            default_option_labels()
        );
    }

    #[test]
    fn grid_config_deserializes_camel_case() {
        let config: GridConfig = serde_json::from_str(
            r#"{
                "rows": 15, "cols": 4,
                "topMargin": 200, "leftMargin": 100,
                "rowSpacing": 50, "colSpacing": 50,
                "bubbleWidth": 30, "bubbleHeight": 30
            }"#,
        )
        .expect("grid config parses");
        assert_eq!(config, base_config());
    }
}
