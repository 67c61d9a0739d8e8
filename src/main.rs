extern crate log;
extern crate pretty_env_logger;

use std::path::{Path, PathBuf};
use std::process::exit;

use clap::{arg, command, value_parser, ArgMatches, Command};
use rusttype::Font;

use crate::interpret::{interpret_batch, Interpretation, Options};
use crate::score::AnswerKey;
use crate::sheet::{parse_option_labels, GridConfig};
use crate::template::{render_template, TemplateConfig};

mod debug;
mod detect;
mod grid;
mod image_utils;
mod interpret;
mod score;
mod sheet;
mod template;

fn main() {
    pretty_env_logger::init_custom_env("LOG");

    let matches = cli().get_matches();
    match matches.subcommand() {
        Some(("template", matches)) => run_template(matches),
        _ => run_scan(&matches),
    }
}

fn cli() -> Command {
    command!()
        .subcommand_negates_reqs(true)
        .arg(arg!(images: <IMAGE>... "Paths to scanned answer sheet images").required(true))
        .arg(arg!(-q --questions <COUNT> "Number of questions on each sheet")
            .value_parser(value_parser!(u32))
            .default_value("15"))
        .arg(arg!(--labels <LABELS> "Comma-separated option labels").default_value("A,B,C,D"))
        .arg(arg!(-k --key <PATH> "Path to answer key JSON (question number to option)"))
        .arg(arg!(--grid <PATH> "Path to grid config JSON overriding the derived grid"))
        .arg(arg!(--"binarize-cutoff" <VALUE> "Luminance cutoff for binarization (0-255)")
            .value_parser(value_parser!(u8))
            .default_value("150"))
        .arg(arg!(--"dark-cutoff" <VALUE> "Darkness cutoff for fill detection (0-255)")
            .value_parser(value_parser!(u8))
            .default_value("128"))
        .arg(arg!(--"min-fill-ratio" <RATIO> "Dark-pixel ratio above which a bubble is filled")
            .value_parser(value_parser!(f32))
            .default_value("0.3"))
        .arg(arg!(--"simulate-on-failure" "Substitute a tagged simulated result when a sheet fails"))
        .arg(arg!(-d --debug "Write annotated debug images next to each input"))
        .arg(arg!(-o --out <PATH> "Write the JSON report to a file instead of stdout"))
        .subcommand(
            Command::new("template")
                .about("Render a printable answer sheet template")
                .arg(arg!(-q --questions <COUNT> "Number of questions")
                    .value_parser(value_parser!(u32))
                    .default_value("15"))
                .arg(arg!(--labels <LABELS> "Comma-separated option labels")
                    .default_value("A,B,C,D"))
                .arg(arg!(--title <TITLE> "Sheet title").default_value("Answer Sheet"))
                .arg(arg!(--subtitle <SUBTITLE> "Sheet subtitle")
                    .default_value("Fill in one bubble completely for each question"))
                .arg(arg!(--footer <FOOTER> "Instruction line at the bottom of the sheet")
                    .default_value("Avoid stray marks or folds so the sheet stays machine-readable"))
                .arg(arg!(--width <PIXELS> "Page width in pixels")
                    .value_parser(value_parser!(u32))
                    .default_value("850"))
                .arg(arg!(--height <PIXELS> "Page height in pixels")
                    .value_parser(value_parser!(u32))
                    .default_value("1100"))
                .arg(arg!(--"no-numbers" "Omit question numbers"))
                .arg(arg!(--font <PATH> "TTF font for title and labels"))
                .arg(arg!(--"grid-out" <PATH> "Also write the matching grid config JSON"))
                .arg(arg!(-o --out <PATH> "Output image path").default_value("answer-sheet.png")),
        )
}

fn run_scan(matches: &ArgMatches) {
    let paths = matches
        .get_many::<String>("images")
        .expect("image paths are required")
        .map(PathBuf::from)
        .collect::<Vec<PathBuf>>();

    let labels = parse_option_labels(matches.get_one::<String>("labels").expect("has default"));
    if labels.is_empty() {
        eprintln!("Error: no option labels given");
        exit(1);
    }

    let key = matches.get_one::<String>("key").map(|path| {
        let json = match std::fs::read_to_string(path) {
            Ok(json) => json,
            Err(e) => {
                eprintln!("Error reading answer key: {}", e);
                exit(1);
            }
        };
        match serde_json::from_str::<AnswerKey>(&json) {
            Ok(key) => key,
            Err(e) => {
                eprintln!("Error parsing answer key: {}", e);
                exit(1);
            }
        }
    });

    let grid = matches.get_one::<String>("grid").map(|path| {
        let json = match std::fs::read_to_string(path) {
            Ok(json) => json,
            Err(e) => {
                eprintln!("Error reading grid config: {}", e);
                exit(1);
            }
        };
        match serde_json::from_str::<GridConfig>(&json) {
            Ok(grid) => grid,
            Err(e) => {
                eprintln!("Error parsing grid config: {}", e);
                exit(1);
            }
        }
    });

    let options = Options {
        grid,
        labels,
        questions: *matches.get_one::<u32>("questions").expect("has default"),
        key,
        binarize_cutoff: *matches.get_one::<u8>("binarize-cutoff").expect("has default"),
        detect: detect::DetectOptions {
            dark_cutoff: *matches.get_one::<u8>("dark-cutoff").expect("has default"),
            min_fill_ratio: *matches.get_one::<f32>("min-fill-ratio").expect("has default"),
        },
        simulate_on_failure: matches.get_flag("simulate-on-failure"),
        debug: matches.get_flag("debug"),
        stage_hook: None,
    };

    let mut report = match interpret_batch(&paths, &options) {
        Ok(report) => report,
        Err(e) => {
            eprintln!("Error: {}", e);
            exit(1);
        }
    };

    for interpretation in report.results.iter_mut() {
        write_processed_image(interpretation);
    }

    for failure in &report.failures {
        eprintln!(
            "Error processing {}: {}",
            failure.source_image, failure.message
        );
    }
    eprintln!(
        "{} of {} sheets processed successfully",
        report.results.len(),
        paths.len()
    );

    let json = match serde_json::to_string_pretty(&report) {
        Ok(json) => json,
        Err(e) => {
            eprintln!("Error serializing report: {}", e);
            exit(1);
        }
    };
    match matches.get_one::<String>("out") {
        Some(path) => {
            if let Err(e) = std::fs::write(path, json) {
                eprintln!("Error writing report to {}: {}", path, e);
                exit(1);
            }
        }
        None => println!("{}", json),
    }

    if !report.failures.is_empty() {
        exit(1);
    }
}

/// Writes the re-encoded binarized image next to the input so the report
/// can reference it. Simulated results have no processed image.
fn write_processed_image(interpretation: &mut Interpretation) {
    let sheet = interpretation.sheet_mut();
    if sheet.processed_png.is_empty() {
        return;
    }

    let mut path = sheet.original_path.clone();
    path.set_file_name(format!(
        "{}_processed.png",
        sheet
            .original_path
            .file_stem()
            .unwrap_or_default()
            .to_string_lossy()
    ));

    match std::fs::write(&path, &sheet.processed_png) {
        Ok(()) => sheet.processed_path = Some(path),
        Err(e) => log::error!(
            "could not write processed image for {}: {}",
            sheet.source_image,
            e
        ),
    }
}

fn run_template(matches: &ArgMatches) {
    let labels = parse_option_labels(matches.get_one::<String>("labels").expect("has default"));
    if labels.is_empty() {
        eprintln!("Error: no option labels given");
        exit(1);
    }

    let config = TemplateConfig {
        question_count: *matches.get_one::<u32>("questions").expect("has default"),
        option_labels: labels,
        title: matches.get_one::<String>("title").expect("has default").clone(),
        subtitle: matches
            .get_one::<String>("subtitle")
            .expect("has default")
            .clone(),
        footer: matches
            .get_one::<String>("footer")
            .expect("has default")
            .clone(),
        show_question_numbers: !matches.get_flag("no-numbers"),
        width: *matches.get_one::<u32>("width").expect("has default"),
        height: *matches.get_one::<u32>("height").expect("has default"),
    };

    let font = match matches.get_one::<String>("font") {
        Some(path) => {
            let bytes = match std::fs::read(path) {
                Ok(bytes) => bytes,
                Err(e) => {
                    eprintln!("Error reading font: {}", e);
                    exit(1);
                }
            };
            match Font::try_from_vec(bytes) {
                Some(font) => Some(font),
                None => {
                    eprintln!("Error: font file is not a valid TTF");
                    exit(1);
                }
            }
        }
        None => None,
    };

    let canvas = render_template(&config, font.as_ref());
    let out = matches.get_one::<String>("out").expect("has default");
    if let Err(e) = canvas.save(Path::new(out)) {
        eprintln!("Error writing template to {}: {}", out, e);
        exit(1);
    }

    if let Some(path) = matches.get_one::<String>("grid-out") {
        let json = serde_json::to_string_pretty(&config.grid_config())
            .expect("grid config serializes");
        if let Err(e) = std::fs::write(path, json) {
            eprintln!("Error writing grid config to {}: {}", path, e);
            exit(1);
        }
    }

    eprintln!("wrote template for {} questions to {}", config.question_count, out);
}
