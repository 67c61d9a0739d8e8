use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use logging_timer::time;
use rand::Rng;
use rayon::prelude::*;
use serde::Serialize;

use crate::debug::{draw_scored_bubbles_debug_image_mut, ImageDebugWriter};
use crate::detect::{detect_filled, extract_marks, DetectOptions, DetectedMark};
use crate::grid::sample_grid;
use crate::image_utils::{
    decode_image, encode_png, grayscale_in_place, threshold_in_place, DecodeError, RenderError,
    DEFAULT_BINARIZE_CUTOFF,
};
use crate::score::{evaluate, tally, AnswerKey, EvaluatedAnswer, Score, ScoreError};
use crate::sheet::{default_option_labels, GeometryError, GridConfig, OptionLabel};

/// Upload-surface limits: at most this many sheets per batch.
pub const MAX_BATCH_IMAGES: usize = 50;
/// Upload-surface limits: at most this many bytes per batch in total.
pub const MAX_BATCH_BYTES: u64 = 20 * 1024 * 1024;

/// Pipeline stages for one sheet, in order. Transitions are reported via
/// the stage hook and the log; a failed sheet stops at `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Pending,
    Preprocessing,
    Sampling,
    Detecting,
    Scoring,
    Done,
    Failed,
}

impl Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::Preprocessing => "preprocessing",
            Self::Sampling => "sampling",
            Self::Detecting => "detecting",
            Self::Scoring => "scoring",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        write!(f, "{}", name)
    }
}

/// Observes stage transitions. Must not block: it runs inline on the
/// pipeline's thread.
pub type StageHook = Arc<dyn Fn(&str, Stage) + Send + Sync>;

#[derive(Clone)]
pub struct Options {
    /// Grid override; derived from image dimensions when absent.
    pub grid: Option<GridConfig>,
    pub labels: Vec<OptionLabel>,
    pub questions: u32,
    /// Answer key; the deterministic demo key is used when absent.
    pub key: Option<AnswerKey>,
    pub binarize_cutoff: u8,
    pub detect: DetectOptions,
    /// Substitute a clearly-tagged simulated result when a sheet fails.
    pub simulate_on_failure: bool,
    /// Write annotated debug images next to the input file.
    pub debug: bool,
    pub stage_hook: Option<StageHook>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            grid: None,
            labels: default_option_labels(),
            questions: 15,
            key: None,
            binarize_cutoff: DEFAULT_BINARIZE_CUTOFF,
            detect: DetectOptions::default(),
            simulate_on_failure: false,
            debug: false,
            stage_hook: None,
        }
    }
}

#[derive(Debug)]
pub enum InterpretSheetError {
    Read(std::io::Error),
    Decode(DecodeError),
    Render(RenderError),
    Geometry(GeometryError),
    Score(ScoreError),
}

impl InterpretSheetError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Read(_) => "read",
            Self::Decode(_) => "decode",
            Self::Render(_) => "render",
            Self::Geometry(_) => "geometry",
            Self::Score(_) => "score",
        }
    }
}

impl Display for InterpretSheetError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Read(e) => write!(f, "could not read image file: {}", e),
            Self::Decode(e) => write!(f, "{}", e),
            Self::Render(e) => write!(f, "{}", e),
            Self::Geometry(e) => write!(f, "invalid grid geometry: {}", e),
            Self::Score(e) => write!(f, "{}", e),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum BatchError {
    EmptyBatch,
    TooManyImages { count: usize, limit: usize },
    BatchTooLarge { bytes: u64, limit: u64 },
}

impl Display for BatchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyBatch => write!(f, "no images supplied"),
            Self::TooManyImages { count, limit } => {
                write!(f, "batch has {} images; the limit is {}", count, limit)
            }
            Self::BatchTooLarge { bytes, limit } => {
                write!(f, "batch totals {} bytes; the limit is {}", bytes, limit)
            }
        }
    }
}

/// The terminal artifact for one successfully processed sheet.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessedSheet {
    pub source_image: String,
    pub original_path: PathBuf,
    /// Where the re-encoded binarized image was written, once it has been.
    pub processed_path: Option<PathBuf>,
    pub answers: Vec<EvaluatedAnswer>,
    pub score: Score,
    #[serde(skip)]
    pub processed_png: Vec<u8>,
}

/// A processed sheet, tagged by whether its answers were measured from the
/// image or substituted by the simulated fallback. Callers must be able to
/// tell the two apart.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "provenance", content = "sheet", rename_all = "camelCase")]
pub enum Interpretation {
    Measured(ProcessedSheet),
    Simulated(ProcessedSheet),
}

impl Interpretation {
    pub fn sheet(&self) -> &ProcessedSheet {
        match self {
            Self::Measured(sheet) | Self::Simulated(sheet) => sheet,
        }
    }

    pub fn sheet_mut(&mut self) -> &mut ProcessedSheet {
        match self {
            Self::Measured(sheet) | Self::Simulated(sheet) => sheet,
        }
    }

    pub fn is_simulated(&self) -> bool {
        matches!(self, Self::Simulated(_))
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SheetFailure {
    pub source_image: String,
    pub kind: &'static str,
    pub message: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchReport {
    pub results: Vec<Interpretation>,
    pub failures: Vec<SheetFailure>,
}

fn transition(source: &str, stage: Stage, hook: &Option<StageHook>) {
    log::debug!("{}: stage {}", source, stage);
    if let Some(hook) = hook {
        hook(source, stage);
    }
}

/// Runs the full pipeline for one sheet: decode, preprocess, sample the
/// grid, detect fills, extract marks, and score. All-or-nothing: an error
/// at any stage yields no partial result.
#[time]
pub fn interpret_sheet(
    source: &str,
    original_path: &Path,
    bytes: &[u8],
    options: &Options,
) -> Result<ProcessedSheet, InterpretSheetError> {
    let hook = &options.stage_hook;
    transition(source, Stage::Pending, hook);

    let result = interpret_sheet_stages(source, original_path, bytes, options);
    match &result {
        Ok(_) => transition(source, Stage::Done, hook),
        Err(_) => transition(source, Stage::Failed, hook),
    }
    result
}

fn interpret_sheet_stages(
    source: &str,
    original_path: &Path,
    bytes: &[u8],
    options: &Options,
) -> Result<ProcessedSheet, InterpretSheetError> {
    let hook = &options.stage_hook;

    transition(source, Stage::Preprocessing, hook);
    let mut img = decode_image(bytes).map_err(InterpretSheetError::Decode)?;
    grayscale_in_place(&mut img);
    threshold_in_place(&mut img, options.binarize_cutoff);
    let processed_png = encode_png(&img).map_err(InterpretSheetError::Render)?;

    transition(source, Stage::Sampling, hook);
    let grid = options.grid.unwrap_or_else(|| {
        GridConfig::derive(
            img.width(),
            img.height(),
            options.questions,
            options.labels.len() as u32,
        )
    });
    grid.validate(&options.labels)
        .map_err(InterpretSheetError::Geometry)?;
    let mut bubbles = sample_grid(&grid, &options.labels);

    transition(source, Stage::Detecting, hook);
    detect_filled(&img, &mut bubbles, &options.detect)
        .map_err(InterpretSheetError::Geometry)?;
    let marks = extract_marks(&bubbles, grid.rows);
    let debug = if options.debug {
        ImageDebugWriter::new(original_path.to_path_buf(), img.clone())
    } else {
        ImageDebugWriter::disabled()
    };
    debug.write("bubbles", |canvas| {
        draw_scored_bubbles_debug_image_mut(canvas, &bubbles, &marks);
    });
    for mark in &marks {
        if let DetectedMark::Ambiguous(filled) = &mark.mark {
            log::warn!(
                "{}: question {} has {} filled bubbles; treating as unanswered",
                source,
                mark.question,
                filled.len()
            );
        }
    }

    transition(source, Stage::Scoring, hook);
    let key = options
        .key
        .clone()
        .unwrap_or_else(|| AnswerKey::default_for(grid.rows, &options.labels));
    let answers = evaluate(&marks, &key, grid.rows).map_err(InterpretSheetError::Score)?;
    let score = tally(&answers);

    Ok(ProcessedSheet {
        source_image: source.to_string(),
        original_path: original_path.to_path_buf(),
        processed_path: None,
        answers,
        score,
        processed_png,
    })
}

/// The row count a result will have: a grid override wins over the
/// requested question count, matching the measured path.
fn effective_rows(options: &Options) -> u32 {
    options.grid.map_or(options.questions, |grid| grid.rows)
}

/// Builds a well-formed placeholder result with random answers. Only used
/// by the fallback path and always tagged `Simulated`.
fn simulate_sheet(source: &str, original_path: &Path, options: &Options) -> ProcessedSheet {
    let questions = effective_rows(options);
    let mut rng = rand::thread_rng();
    let mut answers = Vec::with_capacity(questions as usize);
    let mut correct = 0;

    for question in 1..=questions {
        let option = options.labels[rng.gen_range(0..options.labels.len())].clone();
        let is_correct = rng.gen_bool(0.7);
        if is_correct {
            correct += 1;
        }
        answers.push(EvaluatedAnswer {
            question_number: question,
            marked_option: Some(option),
            is_correct,
        });
    }

    let total = questions;
    let percentage = if total > 0 {
        correct as f32 / total as f32 * 100.0
    } else {
        0.0
    };

    ProcessedSheet {
        source_image: source.to_string(),
        original_path: original_path.to_path_buf(),
        processed_path: None,
        answers,
        score: Score {
            correct,
            total,
            percentage,
        },
        processed_png: Vec::new(),
    }
}

/// Interprets one sheet, substituting a tagged simulated result on failure
/// when the options ask for graceful degradation.
pub fn interpret_sheet_or_fallback(
    source: &str,
    original_path: &Path,
    bytes: &[u8],
    options: &Options,
) -> Result<Interpretation, InterpretSheetError> {
    match interpret_sheet(source, original_path, bytes, options) {
        Ok(sheet) => Ok(Interpretation::Measured(sheet)),
        Err(e) if options.simulate_on_failure => {
            log::warn!("{}: detection failed ({}); substituting simulated result", source, e);
            Ok(Interpretation::Simulated(simulate_sheet(
                source,
                original_path,
                options,
            )))
        }
        Err(e) => Err(e),
    }
}

fn source_id(path: &Path) -> String {
    path.file_name()
        .map_or_else(|| path.display().to_string(), |name| {
            name.to_string_lossy().into_owned()
        })
}

/// Interprets a batch of independent sheets in parallel. A failed sheet is
/// reported and never aborts its siblings.
#[time]
pub fn interpret_batch(paths: &[PathBuf], options: &Options) -> Result<BatchReport, BatchError> {
    if paths.is_empty() {
        return Err(BatchError::EmptyBatch);
    }
    if paths.len() > MAX_BATCH_IMAGES {
        return Err(BatchError::TooManyImages {
            count: paths.len(),
            limit: MAX_BATCH_IMAGES,
        });
    }
    let total_bytes = paths
        .iter()
        .filter_map(|path| std::fs::metadata(path).ok())
        .map(|metadata| metadata.len())
        .sum::<u64>();
    if total_bytes > MAX_BATCH_BYTES {
        return Err(BatchError::BatchTooLarge {
            bytes: total_bytes,
            limit: MAX_BATCH_BYTES,
        });
    }

    let completed = AtomicUsize::new(0);
    let outcomes = paths
        .par_iter()
        .map(|path| {
            let source = source_id(path);
            let outcome = std::fs::read(path)
                .map_err(InterpretSheetError::Read)
                .and_then(|bytes| interpret_sheet_or_fallback(&source, path, &bytes, options));
            let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
            log::info!("processed {} ({} of {})", source, done, paths.len());
            outcome.map_err(|error| SheetFailure {
                source_image: source,
                kind: error.kind(),
                message: error.to_string(),
            })
        })
        .collect::<Vec<Result<Interpretation, SheetFailure>>>();

    let mut results = Vec::new();
    let mut failures = Vec::new();
    for outcome in outcomes {
        match outcome {
            Ok(interpretation) => results.push(interpretation),
            Err(failure) => failures.push(failure),
        }
    }

    Ok(BatchReport { results, failures })
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use image::RgbaImage;
    use imageproc::rect::Rect;

    use super::*;
    use crate::image_utils::{BLACK, WHITE};

    fn synthetic_grid() -> GridConfig {
        GridConfig {
            rows: 15,
            cols: 4,
            top_margin: 20,
            left_margin: 10,
            row_spacing: 12,
            col_spacing: 12,
            bubble_width: 8,
            bubble_height: 8,
        }
    }

    /// A white 15x4 sheet with exactly one fully-dark bubble.
    fn synthetic_sheet_png(question: u32, col: u32) -> Vec<u8> {
        let grid = synthetic_grid();
        let mut img = RgbaImage::from_pixel(80, 220, WHITE);
        let bounds = Rect::at(
            (grid.left_margin + col * grid.col_spacing) as i32,
            (grid.top_margin + (question - 1) * grid.row_spacing) as i32,
        )
        .of_size(grid.bubble_width, grid.bubble_height);
        for y in bounds.top()..=bounds.bottom() {
            for x in bounds.left()..=bounds.right() {
                img.put_pixel(x as u32, y as u32, BLACK);
            }
        }
        encode_png(&img).expect("png encodes")
    }

    fn options() -> Options {
        Options {
            grid: Some(synthetic_grid()),
            ..Options::default()
        }
    }

    #[test]
    fn end_to_end_reads_the_one_marked_bubble() {
        let png = synthetic_sheet_png(3, 2);
        let sheet = interpret_sheet("sheet.png", Path::new("sheet.png"), &png, &options())
            .expect("sheet interprets");

        assert_eq!(sheet.answers.len(), 15);
        for answer in &sheet.answers {
            if answer.question_number == 3 {
                assert_eq!(answer.marked_option, Some(OptionLabel::from("C")));
            } else {
                assert_eq!(answer.marked_option, None);
            }
        }
        // default key: question 3 -> C, so the one mark is correct
        assert_eq!(sheet.score.correct, 1);
        assert_eq!(sheet.score.total, 15);
        assert!(!sheet.processed_png.is_empty());
    }

    #[test]
    fn stage_hook_sees_the_full_sequence() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let hook_seen = Arc::clone(&seen);
        let mut options = options();
        options.stage_hook = Some(Arc::new(move |_, stage| {
            hook_seen.lock().expect("hook lock").push(stage);
        }));

        let png = synthetic_sheet_png(1, 0);
        interpret_sheet("sheet.png", Path::new("sheet.png"), &png, &options)
            .expect("sheet interprets");

        assert_eq!(
            *seen.lock().expect("hook lock"),
            vec![
                Stage::Pending,
                Stage::Preprocessing,
                Stage::Sampling,
                Stage::Detecting,
                Stage::Scoring,
                Stage::Done,
            ]
        );
    }

    #[test]
    fn undecodable_bytes_fail_without_fallback() {
        let error = interpret_sheet("bad.png", Path::new("bad.png"), b"garbage", &options())
            .expect_err("garbage cannot decode");
        assert_eq!(error.kind(), "decode");
    }

    #[test]
    fn fallback_result_is_tagged_simulated() {
        let mut options = options();
        options.simulate_on_failure = true;

        let interpretation =
            interpret_sheet_or_fallback("bad.png", Path::new("bad.png"), b"garbage", &options)
                .expect("fallback produces a result");
        assert!(interpretation.is_simulated());

        let sheet = interpretation.sheet();
        assert_eq!(sheet.answers.len(), 15);
        assert_eq!(sheet.score.total, 15);
    }

    #[test]
    fn fallback_matches_the_grid_override_row_count() {
        let mut grid = synthetic_grid();
        grid.rows = 20;
        let options = Options {
            grid: Some(grid),
            questions: 15,
            simulate_on_failure: true,
            ..Options::default()
        };

        let interpretation =
            interpret_sheet_or_fallback("bad.png", Path::new("bad.png"), b"garbage", &options)
                .expect("fallback produces a result");
        assert!(interpretation.is_simulated());
        assert_eq!(interpretation.sheet().answers.len(), 20);
        assert_eq!(interpretation.sheet().score.total, 20);
    }

    #[test]
    fn measured_result_is_tagged_measured() {
        let png = synthetic_sheet_png(1, 0);
        let interpretation =
            interpret_sheet_or_fallback("sheet.png", Path::new("sheet.png"), &png, &options())
                .expect("sheet interprets");
        assert!(!interpretation.is_simulated());

        let json = serde_json::to_value(&interpretation).expect("serializes");
        assert_eq!(json["provenance"], "measured");
    }

    #[test]
    fn empty_batch_is_rejected() {
        assert_eq!(
            interpret_batch(&[], &options()).expect_err("empty batch"),
            BatchError::EmptyBatch
        );
    }

    #[test]
    fn oversized_batch_is_rejected() {
        let paths = (0..MAX_BATCH_IMAGES + 1)
            .map(|i| PathBuf::from(format!("sheet-{}.png", i)))
            .collect::<Vec<PathBuf>>();
        assert_eq!(
            interpret_batch(&paths, &options()).expect_err("too many images"),
            BatchError::TooManyImages {
                count: MAX_BATCH_IMAGES + 1,
                limit: MAX_BATCH_IMAGES,
            }
        );
    }

    #[test]
    fn over_byte_limit_batch_is_rejected() {
        let dir = tempfile::tempdir().expect("temp dir");
        let big = dir.path().join("big.png");
        std::fs::write(&big, vec![0u8; MAX_BATCH_BYTES as usize + 1]).expect("write big");

        assert_eq!(
            interpret_batch(&[big], &options()).expect_err("batch is too large"),
            BatchError::BatchTooLarge {
                bytes: MAX_BATCH_BYTES + 1,
                limit: MAX_BATCH_BYTES,
            }
        );
    }

    #[test]
    fn one_bad_sheet_does_not_abort_the_batch() {
        let dir = tempfile::tempdir().expect("temp dir");
        let good = dir.path().join("good.png");
        let bad = dir.path().join("bad.png");
        std::fs::write(&good, synthetic_sheet_png(3, 2)).expect("write good");
        std::fs::write(&bad, b"garbage").expect("write bad");

        let report =
            interpret_batch(&[good, bad], &options()).expect("batch runs");
        assert_eq!(report.results.len(), 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].source_image, "bad.png");
        assert_eq!(report.failures[0].kind, "decode");
    }
}
