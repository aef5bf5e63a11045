//! tfm: traction force microscopy from the command line.
//!
//! `tfm analyze` runs one frame from explicit image and mask files.
//! `tfm batch` groups the files of a folder into frames by name and
//! runs every complete frame, skipping frames whose masks are missing.
//!
//! Both print the headline results (strain energy, contractility, mean
//! normal stress and its coefficient of variation, average line tension
//! and its normal component) and, with `--out`, write JSON, CSV and SVG
//! files per frame.
//!
//! Logging goes to stderr and is filtered by the `TFM_LOG` environment
//! variable (default `tfm=info,tfm_pipeline=info`).
//!
//! # Usage
//!
//! ```text
//! tfm analyze --reference 04after.tif --deformed 04before.tif \
//!     --force-mask force_measurement.png --fem-mask FEM_area.png \
//!     --border-mask cell_borders.png --out results
//! tfm batch data/ --out results
//! ```

#![allow(clippy::print_stdout)]

mod config;
mod error;
mod frames;
mod load;
mod output;

use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use tfm_pipeline::{AnalysisMode, GridShape, MaskRole, MaskSet, PipelineError, TfmConfig, TfmResult};
use tracing_subscriber::EnvFilter;

use crate::config::ConfigArgs;
use crate::error::CliError;
use crate::frames::{FrameKeys, Patterns};

/// Traction forces, monolayer stress and line tension from bead images.
#[derive(Parser)]
#[command(name = "tfm", version)]
struct Cli {
    /// Log at debug level (overridden by `TFM_LOG`).
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Analyze one frame.
    Analyze(AnalyzeArgs),
    /// Analyze every frame found in a folder.
    Batch(BatchArgs),
}

#[derive(Args)]
struct AnalyzeArgs {
    /// Bead image after the cells were removed.
    #[arg(long)]
    reference: PathBuf,

    /// Bead image with the cells present.
    #[arg(long)]
    deformed: PathBuf,

    /// Force measurement area mask.
    #[arg(long)]
    force_mask: Option<PathBuf>,

    /// FEM area mask.
    #[arg(long)]
    fem_mask: Option<PathBuf>,

    /// Cell area mask.
    #[arg(long)]
    cell_mask: Option<PathBuf>,

    /// Cell border mask.
    #[arg(long)]
    border_mask: Option<PathBuf>,

    /// Directory for JSON, CSV and SVG output.
    #[arg(long)]
    out: Option<PathBuf>,

    /// Name used for the output files.
    #[arg(long, default_value = "frame")]
    name: String,

    /// Print the per-stage diagnostics report.
    #[arg(long)]
    report: bool,

    #[command(flatten)]
    config: ConfigArgs,
}

#[derive(Args)]
struct BatchArgs {
    /// Folder with the images and masks of every frame.
    folder: PathBuf,

    /// Directory for JSON, CSV and SVG output.
    #[arg(long)]
    out: Option<PathBuf>,

    #[command(flatten)]
    patterns: Patterns,

    #[command(flatten)]
    config: ConfigArgs,
}

/// Install the stderr subscriber.
fn init_tracing(verbose: bool) {
    let default = if verbose {
        "tfm=debug,tfm_pipeline=debug"
    } else {
        "tfm=info,tfm_pipeline=info"
    };
    let filter = EnvFilter::try_from_env("TFM_LOG").unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(std::io::stderr().is_terminal())
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let outcome = match &cli.command {
        Command::Analyze(args) => analyze(args),
        Command::Batch(args) => batch(args),
    };
    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e}");
            ExitCode::FAILURE
        }
    }
}

/// The mode for a frame: the configured one when `--mode` was given,
/// otherwise a guess from the masks with the configured mode as
/// fallback.
fn resolve_mode(config: &TfmConfig, explicit: bool, masks: &MaskSet, frame: &str) -> AnalysisMode {
    if explicit {
        return config.mode;
    }
    let (mode, warning) = AnalysisMode::guess(&masks.roles(), config.mode);
    if let Some(warning) = warning {
        tracing::warn!(frame, "{warning}");
    }
    mode
}

/// Load and run one frame.
fn run_frame(
    frame: &str,
    reference: &Path,
    deformed: &Path,
    mask_files: Vec<(MaskRole, &Path)>,
    config: &TfmConfig,
    explicit_mode: bool,
) -> Result<TfmResult, CliError> {
    let reference = load::load_image(reference)?;
    let deformed = load::load_image(deformed)?;
    let masks = load::load_masks(mask_files, GridShape::of(&reference))?;
    let mode = resolve_mode(config, explicit_mode, &masks, frame);
    tracing::info!(frame, %mode, masks = ?masks.roles(), "analyzing");

    let config = TfmConfig {
        mode,
        ..config.clone()
    };
    let result = tfm_pipeline::process(reference, deformed, masks, config)?;
    for warning in &result.warnings {
        tracing::debug!(frame, "{warning}");
    }
    tracing::info!(
        frame,
        seconds = result.diagnostics.total_duration.as_secs_f64(),
        warnings = result.warnings.len(),
        "done"
    );
    Ok(result)
}

fn analyze(args: &AnalyzeArgs) -> Result<(), CliError> {
    let config = args.config.resolve()?;
    let mask_files: Vec<(MaskRole, &Path)> = [
        (MaskRole::ForceMeasurement, &args.force_mask),
        (MaskRole::FemDomain, &args.fem_mask),
        (MaskRole::CellArea, &args.cell_mask),
        (MaskRole::Borders, &args.border_mask),
    ]
    .into_iter()
    .filter_map(|(role, path)| path.as_deref().map(|p| (role, p)))
    .collect();

    let result = run_frame(
        &args.name,
        &args.reference,
        &args.deformed,
        mask_files,
        &config,
        args.config.mode_is_explicit(),
    )?;

    println!("{}", output::format_summary(&result.summary()));
    if args.report {
        println!("\n{}", result.diagnostics.report());
    }
    if let Some(dir) = &args.out {
        output::ensure_dir(dir)?;
        let written = output::write_frame(dir, &args.name, &result)?;
        tracing::info!(dir = %dir.display(), files = written, "results written");
    }
    Ok(())
}

fn batch(args: &BatchArgs) -> Result<(), CliError> {
    let config = args.config.resolve()?;
    let keys = FrameKeys::new(&args.patterns)?;
    let (frames, warnings) = frames::scan(&args.folder, &keys)?;
    for warning in &warnings {
        tracing::warn!("{warning}");
    }
    if frames.is_empty() {
        return Err(CliError::NoFrames(args.folder.clone()));
    }
    if let Some(dir) = &args.out {
        output::ensure_dir(dir)?;
    }

    let mut results = Vec::new();
    for frame in &frames {
        let Some((reference, deformed)) = frame.bead_images() else {
            tracing::warn!(frame = %frame.id, "skipped: reference or deformed image missing");
            continue;
        };
        let outcome = run_frame(
            &frame.id,
            reference,
            deformed,
            frame.mask_files().collect(),
            &config,
            args.config.mode_is_explicit(),
        );
        let result = match outcome {
            Ok(result) => result,
            Err(CliError::Pipeline(PipelineError::MissingInput { role })) => {
                tracing::warn!(frame = %frame.id, "skipped: no {role} mask");
                continue;
            }
            Err(e) => return Err(e),
        };

        println!("frame {}\n{}\n", frame.id, output::format_summary(&result.summary()));
        if let Some(dir) = &args.out {
            output::write_frame(dir, &frame.id, &result)?;
        }
        results.push((frame.id.as_str(), result));
    }

    tracing::info!(analyzed = results.len(), frames = frames.len(), "batch finished");
    if let Some(dir) = &args.out {
        let summaries: Vec<tfm_export::FrameSummary<'_>> = results
            .iter()
            .map(|(id, result)| tfm_export::FrameSummary::new(id, result))
            .collect();
        output::write_batch(dir, &tfm_export::to_batch_json(&summaries, &config)?)?;
    }
    if results.is_empty() {
        return Err(CliError::NoFrames(args.folder.clone()));
    }
    Ok(())
}
