//! mina: mitochondrial network analysis from the command line.
//!
//! Two subcommands:
//!
//! - `analyze` runs one analysis per image in a single session, collecting
//!   every row in the "Mito Morphology" results table, and optionally
//!   writes overlays and per-stage diagnostics.
//! - `batch` runs a JSON manifest of images with one parameter set, each
//!   in a fresh session, and writes the batch results table.
//!
//! # Usage
//!
//! ```text
//! mina analyze [OPTIONS] <IMAGES>...
//! mina batch --on-error <abort|continue> [OPTIONS] <MANIFEST>
//! ```
//!
//! Logging goes to stderr through `env_logger`; set `RUST_LOG` to change
//! the level (default `info`).

#![allow(clippy::print_stdout, clippy::print_stderr)]

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::{Duration, Instant};

use clap::{Args, Parser, Subcommand, ValueEnum};
use mina_io::{FsImageSource, ProcessScriptRunner, load_image};
use mina_pipeline::{
    AnalysisContext, AnalysisParams, BatchError, BatchManifest, Calibration, Clock,
    Collaborators, FailurePolicy, RESULTS_TABLE_NAME, RidgeParams, ThresholdMethod,
};

/// Quantify the morphology of mitochondrial networks in microscopy images.
#[derive(Parser)]
#[command(name = "mina", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze one or more images in a single session.
    Analyze(AnalyzeArgs),

    /// Analyze every image of a JSON manifest with the same parameters.
    Batch(BatchArgs),
}

#[derive(Args)]
struct AnalyzeArgs {
    /// Image files, or directories of slices loaded as one stack each.
    #[arg(required = true)]
    images: Vec<PathBuf>,

    #[command(flatten)]
    params: ParamArgs,

    #[command(flatten)]
    calibration: CalibrationArgs,

    #[command(flatten)]
    scripts: ScriptArgs,

    /// Channel to analyze (1-based).
    #[arg(
        long,
        default_value_t = 1,
        value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(1..)
    )]
    channel: usize,

    /// Write the results table as CSV to this file instead of stdout.
    #[arg(long)]
    results: Option<PathBuf>,

    /// Write a PNG of each 2D image's overlay into this directory.
    #[arg(long)]
    overlay_dir: Option<PathBuf>,

    /// Print per-stage diagnostics for each image to stderr.
    #[arg(long)]
    diagnostics: bool,

    /// Print diagnostics as JSON instead of a human-readable report.
    #[arg(long, requires = "diagnostics")]
    json: bool,
}

/// Analysis parameters, one flag per field.
#[derive(Args)]
struct ParamArgs {
    /// Script run before segmentation. Skipped if the file does not exist.
    #[arg(long)]
    preprocessor: Option<PathBuf>,

    /// Script run after the row is stored. Skipped if the file does not
    /// exist.
    #[arg(long)]
    postprocessor: Option<PathBuf>,

    /// Threshold method (huang, ij1, intermodes, isoData, li, maxEntropy,
    /// maxLikelihood, mean, minError, minimum, moments, otsu, percentile,
    /// renyiEntropy, rosin, shanbhag, triangle, yen).
    #[arg(long, default_value_t = AnalysisParams::DEFAULT_THRESHOLD_METHOD)]
    threshold_method: ThresholdMethod,

    /// Build the skeleton from ridge detection (2D images only).
    #[arg(long)]
    use_ridge_detection: bool,

    /// Ridge detection high contrast.
    #[arg(long, default_value_t = RidgeParams::DEFAULT_HIGH_CONTRAST, allow_negative_numbers = true)]
    high_contrast: i64,

    /// Ridge detection low contrast.
    #[arg(long, default_value_t = RidgeParams::DEFAULT_LOW_CONTRAST, allow_negative_numbers = true)]
    low_contrast: i64,

    /// Ridge detection line width in pixels.
    #[arg(long, default_value_t = RidgeParams::DEFAULT_LINE_WIDTH, allow_negative_numbers = true)]
    line_width: i64,

    /// Ridge detection minimum line length in pixels.
    #[arg(long, default_value_t = RidgeParams::DEFAULT_MIN_LINE_LENGTH, allow_negative_numbers = true)]
    min_line_length: i64,

    /// Free-text annotation; `key=value` pairs separated by commas become
    /// their own columns.
    #[arg(long, default_value = "")]
    comment: String,

    /// Full analysis parameters as a JSON string.
    ///
    /// When provided, all other parameter flags are ignored.
    /// The JSON must be a valid `AnalysisParams` serialization.
    #[arg(long)]
    params_json: Option<String>,
}

/// Physical voxel size, applied to every loaded image.
#[derive(Args)]
struct CalibrationArgs {
    /// Pixel width in calibration units.
    #[arg(long, default_value_t = 1.0)]
    pixel_width: f64,

    /// Pixel height in calibration units.
    #[arg(long, default_value_t = 1.0)]
    pixel_height: f64,

    /// Slice thickness in calibration units.
    #[arg(long, default_value_t = 1.0)]
    pixel_depth: f64,

    /// Name of the calibration unit.
    #[arg(long, default_value = "pixel")]
    unit: String,
}

#[derive(Args)]
struct ScriptArgs {
    /// Run scripts through this interpreter (e.g. `sh`, `python3`)
    /// instead of executing them directly.
    #[arg(long)]
    interpreter: Option<PathBuf>,
}

#[derive(Args)]
struct BatchArgs {
    /// JSON manifest: `{"params": {...}, "images": ["a.tif", ...]}`.
    manifest: PathBuf,

    /// What to do when a job fails.
    #[arg(long, value_enum)]
    on_error: OnError,

    /// Write the batch table as CSV to this file instead of stdout.
    #[arg(long)]
    output: Option<PathBuf>,

    #[command(flatten)]
    calibration: CalibrationArgs,

    #[command(flatten)]
    scripts: ScriptArgs,
}

/// Batch failure policy selection.
#[derive(Clone, Copy, ValueEnum)]
enum OnError {
    /// Stop at the first failing job.
    Abort,
    /// Skip failing jobs and keep going.
    Continue,
}

impl From<OnError> for FailurePolicy {
    fn from(value: OnError) -> Self {
        match value {
            OnError::Abort => Self::Abort,
            OnError::Continue => Self::Continue,
        }
    }
}

/// Build [`AnalysisParams`] from CLI arguments.
///
/// If `--params-json` is provided, the JSON is parsed directly and all
/// individual parameter flags are ignored.
fn params_from_cli(args: &ParamArgs) -> Result<AnalysisParams, String> {
    if let Some(ref json) = args.params_json {
        return serde_json::from_str(json).map_err(|e| format!("Error parsing --params-json: {e}"));
    }

    Ok(AnalysisParams {
        preprocessor: args.preprocessor.clone(),
        postprocessor: args.postprocessor.clone(),
        threshold_method: args.threshold_method,
        use_ridge_detection: args.use_ridge_detection,
        ridge: RidgeParams {
            high_contrast: args.high_contrast,
            low_contrast: args.low_contrast,
            line_width: args.line_width,
            min_line_length: args.min_line_length,
        },
        comment: args.comment.clone(),
    })
}

impl CalibrationArgs {
    fn to_calibration(&self) -> Calibration {
        Calibration {
            pixel_width: self.pixel_width,
            pixel_height: self.pixel_height,
            pixel_depth: self.pixel_depth,
            unit: self.unit.clone(),
        }
    }
}

impl ScriptArgs {
    fn runner(&self) -> ProcessScriptRunner {
        self.interpreter
            .as_ref()
            .map_or_else(ProcessScriptRunner::new, ProcessScriptRunner::with_interpreter)
    }
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Analyze(ref args) => analyze(args),
        Commands::Batch(ref args) => batch(args),
    };
    match result {
        Ok(code) => code,
        Err(msg) => {
            eprintln!("{msg}");
            ExitCode::FAILURE
        }
    }
}

fn analyze(args: &AnalyzeArgs) -> Result<ExitCode, String> {
    let params = params_from_cli(&args.params)?;
    let calibration = args.calibration.to_calibration();
    let runner = args.scripts.runner();
    let collaborators = Collaborators::builtin().with_scripts(&runner);

    if let Some(ref dir) = args.overlay_dir {
        std::fs::create_dir_all(dir)
            .map_err(|e| format!("Error creating {}: {e}", dir.display()))?;
    }

    let mut context = AnalysisContext::new();
    let mut failed = 0;

    for path in &args.images {
        let mut image = match load_image(path, &calibration) {
            Ok(image) => image,
            Err(e) => {
                eprintln!("Error loading {e}");
                failed += 1;
                continue;
            }
        };
        if let Err(e) = image.set_current_channel(args.channel - 1) {
            eprintln!("{}: {e}", path.display());
            failed += 1;
            continue;
        }
        context.set_active(image);

        let outcome = if args.diagnostics {
            mina_pipeline::analyze_with_diagnostics(&mut context, &params, collaborators, &StdClock)
                .map(|(outcome, diagnostics)| {
                    if args.json {
                        match serde_json::to_string_pretty(&diagnostics) {
                            Ok(json) => eprintln!("{json}"),
                            Err(e) => eprintln!("Error serializing diagnostics: {e}"),
                        }
                    } else {
                        eprintln!("{}", diagnostics.report());
                    }
                    outcome
                })
        } else {
            mina_pipeline::analyze(&mut context, &params, collaborators)
        };

        match outcome {
            Ok(outcome) => {
                if let Some(ref dir) = args.overlay_dir
                    && outcome.overlay.is_some()
                {
                    write_overlay(&context, path, dir);
                }
            }
            Err(e) => {
                eprintln!("Analysis of {} failed: {e}", path.display());
                failed += 1;
            }
        }
    }

    if let Some(table) = context.table(RESULTS_TABLE_NAME) {
        write_output(args.results.as_deref(), &mina_export::results_csv(table))?;
    }

    if failed > 0 {
        eprintln!("{failed} of {} image(s) failed", args.images.len());
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}

/// Save the active image's overlay as `<stem>_overlay.png` in `dir`.
fn write_overlay(context: &AnalysisContext, source: &Path, dir: &Path) {
    let Some(rgba) = context.active().and_then(mina_export::render_overlay) else {
        return;
    };
    let stem = source
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("image");
    let out = dir.join(format!("{stem}_overlay.png"));
    match rgba.save(&out) {
        Ok(()) => log::info!("Overlay written to {}", out.display()),
        Err(e) => eprintln!("Error writing overlay to {}: {e}", out.display()),
    }
}

fn batch(args: &BatchArgs) -> Result<ExitCode, String> {
    let text = std::fs::read_to_string(&args.manifest)
        .map_err(|e| format!("Error reading {}: {e}", args.manifest.display()))?;
    let manifest: BatchManifest = serde_json::from_str(&text)
        .map_err(|e| format!("Error parsing {}: {e}", args.manifest.display()))?;

    let source = FsImageSource::new(args.calibration.to_calibration());
    let runner = args.scripts.runner();
    let collaborators = Collaborators::builtin().with_scripts(&runner);

    match mina_pipeline::run_batch(&manifest.jobs(), &source, collaborators, args.on_error.into())
    {
        Ok(report) => {
            write_output(args.output.as_deref(), &mina_export::batch_csv(&report.table))?;
            for failure in &report.failures {
                eprintln!(
                    "Job {} ({}) failed: {}",
                    failure.index + 1,
                    failure.path.display(),
                    failure.error,
                );
            }
            if report.failures.is_empty() {
                Ok(ExitCode::SUCCESS)
            } else {
                Ok(ExitCode::FAILURE)
            }
        }
        Err(BatchError::JobFailed {
            index,
            path,
            source,
            report,
        }) => {
            write_output(args.output.as_deref(), &mina_export::batch_csv(&report.table))?;
            Err(format!(
                "Batch aborted at job {} ({}): {source}",
                index + 1,
                path.display()
            ))
        }
    }
}

/// Write `text` to `path`, or to stdout when no path is given.
fn write_output(path: Option<&Path>, text: &str) -> Result<(), String> {
    match path {
        Some(path) => {
            std::fs::write(path, text)
                .map_err(|e| format!("Error writing {}: {e}", path.display()))?;
            log::info!("Results written to {}", path.display());
        }
        None => print!("{text}"),
    }
    Ok(())
}

/// [`Clock`] implementation backed by [`std::time::Instant`].
struct StdClock;

impl Clock for StdClock {
    type Instant = Instant;

    fn now(&self) -> Instant {
        Instant::now()
    }

    fn elapsed(&self, since: &Instant) -> Duration {
        since.elapsed()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn flag_defaults_match_params_defaults() {
        let cli = Cli::try_parse_from(["mina", "analyze", "cells.tif"]).unwrap();
        let Commands::Analyze(args) = cli.command else {
            unreachable!("analyze subcommand expected");
        };
        assert_eq!(params_from_cli(&args.params).unwrap(), AnalysisParams::default());
        assert_eq!(args.calibration.to_calibration(), Calibration::default());
    }

    #[test]
    fn params_json_overrides_flags() {
        let cli = Cli::try_parse_from([
            "mina",
            "analyze",
            "cells.tif",
            "--threshold-method",
            "li",
            "--params-json",
            r#"{"threshold_method": "yen", "comment": "cond=ctrl"}"#,
        ])
        .unwrap();
        let Commands::Analyze(args) = cli.command else {
            unreachable!("analyze subcommand expected");
        };
        let params = params_from_cli(&args.params).unwrap();
        assert_eq!(params.threshold_method, ThresholdMethod::Yen);
        assert_eq!(params.comment, "cond=ctrl");
    }

    #[test]
    fn threshold_method_flag_uses_method_names() {
        let cli = Cli::try_parse_from([
            "mina",
            "analyze",
            "cells.tif",
            "--threshold-method",
            "maxEntropy",
        ])
        .unwrap();
        let Commands::Analyze(args) = cli.command else {
            unreachable!("analyze subcommand expected");
        };
        assert_eq!(args.params.threshold_method, ThresholdMethod::MaxEntropy);
        let unknown = ["mina", "analyze", "x.tif", "--threshold-method", "magic"];
        assert!(Cli::try_parse_from(unknown).is_err());
    }

    #[test]
    fn batch_requires_a_failure_policy() {
        assert!(Cli::try_parse_from(["mina", "batch", "jobs.json"]).is_err());
        let args = ["mina", "batch", "jobs.json", "--on-error", "continue"];
        assert!(Cli::try_parse_from(args).is_ok());
    }
}
