//! Writing frame results to disk and the terminal.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use tfm_export::{QuiverStyle, SvgMetadata};
use tfm_pipeline::{TfmResult, TfmSummary};

use crate::error::CliError;

fn write(path: PathBuf, contents: &str) -> Result<(), CliError> {
    std::fs::write(&path, contents).map_err(|source| CliError::Write {
        path: path.clone(),
        source,
    })?;
    tracing::debug!(path = %path.display(), bytes = contents.len(), "written");
    Ok(())
}

/// Create `dir` if needed.
pub fn ensure_dir(dir: &Path) -> Result<(), CliError> {
    std::fs::create_dir_all(dir).map_err(|source| CliError::Write {
        path: dir.to_path_buf(),
        source,
    })
}

/// Write every artifact of frame `frame` into `dir`, prefixed with the
/// frame id. Returns the number of files written.
pub fn write_frame(dir: &Path, frame: &str, result: &TfmResult) -> Result<usize, CliError> {
    let ps = result.traction.pixel_size();
    let config_json = serde_json::to_string(&result.config).map_err(tfm_export::ExportError::from)?;
    let description = format!(
        "{} analysis, E = {} Pa, nu = {}, pixel size {} um",
        result.mode, result.config.youngs_modulus, result.config.poisson_ratio, result.config.pixel_size
    );
    let title = |what: &str| format!("frame {frame}: {what}");
    let traction_title = title("traction");
    let tension_title = title("line tension");

    let files = [
        (
            "summary.json",
            tfm_export::to_summary_json(frame, result)?,
        ),
        (
            "deformation.csv",
            tfm_export::vector_field_csv(&result.deformation.field),
        ),
        ("traction.csv", tfm_export::vector_field_csv(&result.traction)),
        (
            "mean_normal_stress.csv",
            tfm_export::scalar_field_csv(&result.mean_normal_stress, ps, "mean_normal_stress"),
        ),
        (
            "line_tension.csv",
            tfm_export::line_tension_csv(&result.line_tension, ps),
        ),
        (
            "traction.svg",
            tfm_export::to_quiver_svg(
                &result.traction,
                Some(&result.force_mask),
                &QuiverStyle::default(),
                &SvgMetadata {
                    title: Some(&traction_title),
                    description: Some(&description),
                    config_json: Some(&config_json),
                },
            )?,
        ),
        (
            "line_tension.svg",
            tfm_export::to_line_tension_svg(
                &result.line_tension,
                result.traction.shape(),
                &SvgMetadata {
                    title: Some(&tension_title),
                    description: Some(&description),
                    config_json: Some(&config_json),
                },
            )?,
        ),
    ];
    let count = files.len();
    for (name, contents) in files {
        write(dir.join(format!("{frame}_{name}")), &contents)?;
    }
    Ok(count)
}

/// Write the combined summary of a batch run.
pub fn write_batch(dir: &Path, json: &str) -> Result<(), CliError> {
    write(dir.join("summary.json"), json)
}

/// The six headline scalars as aligned text lines.
pub fn format_summary(summary: &TfmSummary) -> String {
    let optional = |v: Option<f64>| v.map_or_else(|| "n/a".to_string(), |v| format!("{v:.4e}"));
    let mut out = String::new();
    let _ = writeln!(out, "strain energy                {:.4e} J", summary.strain_energy);
    let _ = writeln!(out, "contractility                {:.4e} N", summary.contractility);
    let _ = writeln!(
        out,
        "mean normal stress           {:.4e} N/m",
        summary.mean_normal_stress
    );
    let _ = writeln!(
        out,
        "cv of mean normal stress     {:.4}",
        summary.cv_mean_normal_stress
    );
    let _ = writeln!(
        out,
        "average line tension         {} N/m",
        optional(summary.average_line_tension)
    );
    let _ = write!(
        out,
        "average normal line tension  {} N/m",
        optional(summary.average_normal_line_tension)
    );
    out
}
