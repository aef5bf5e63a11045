//! JSON export of run summaries and full results.
//!
//! The summary carries the six headline scalars of a frame together
//! with the configuration that produced them, so a summary file is
//! enough to reproduce the run.

use serde::Serialize;
use tfm_pipeline::{AnalysisMode, TfmConfig, TfmResult, TfmSummary};

use crate::ExportError;

/// Headline results of one frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrameSummary<'a> {
    /// Frame identifier, usually the frame number from the file names.
    pub frame: &'a str,
    /// Analysis mode the frame was run in.
    pub mode: AnalysisMode,
    /// The six headline scalars.
    #[serde(flatten)]
    pub summary: TfmSummary,
    /// Number of cells enclosed by the borders.
    pub n_cells: usize,
    /// Warnings raised while processing the frame, as text.
    pub warnings: Vec<String>,
}

impl<'a> FrameSummary<'a> {
    /// Collect the summary of `result` under the name `frame`.
    #[must_use]
    pub fn new(frame: &'a str, result: &TfmResult) -> Self {
        Self {
            frame,
            mode: result.mode,
            summary: result.summary(),
            n_cells: result.line_tension.n_cells,
            warnings: result.warnings.iter().map(ToString::to_string).collect(),
        }
    }
}

#[derive(Serialize)]
struct SummaryDocument<'a> {
    #[serde(flatten)]
    frame: &'a FrameSummary<'a>,
    config: &'a TfmConfig,
}

#[derive(Serialize)]
struct BatchDocument<'a> {
    config: &'a TfmConfig,
    frames: &'a [FrameSummary<'a>],
}

/// Serialize the summary of one frame with its configuration as
/// pretty-printed JSON.
///
/// # Errors
///
/// Returns [`ExportError::Json`] if serialization fails.
pub fn to_summary_json(frame: &str, result: &TfmResult) -> Result<String, ExportError> {
    let summary = FrameSummary::new(frame, result);
    Ok(serde_json::to_string_pretty(&SummaryDocument {
        frame: &summary,
        config: &result.config,
    })?)
}

/// Serialize the summaries of several frames that share `config`.
///
/// # Errors
///
/// Returns [`ExportError::Json`] if serialization fails.
pub fn to_batch_json(frames: &[FrameSummary<'_>], config: &TfmConfig) -> Result<String, ExportError> {
    Ok(serde_json::to_string_pretty(&BatchDocument { config, frames })?)
}

/// Serialize everything the run computed, including all fields, the
/// mesh and the border graph.
///
/// # Errors
///
/// Returns [`ExportError::Json`] if serialization fails.
pub fn to_result_json(result: &TfmResult) -> Result<String, ExportError> {
    Ok(serde_json::to_string(result)?)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn frame(name: &str) -> FrameSummary<'_> {
        FrameSummary {
            frame: name,
            mode: AnalysisMode::Colony,
            summary: TfmSummary {
                strain_energy: 1.92e-13,
                contractility: 2.01e-6,
                mean_normal_stress: 0.0046,
                cv_mean_normal_stress: 0.37,
                average_line_tension: Some(0.005_95),
                average_normal_line_tension: None,
            },
            n_cells: 3,
            warnings: vec!["2 outlier vectors were replaced".to_string()],
        }
    }

    #[test]
    fn summary_scalars_are_top_level() {
        let value = serde_json::to_value(frame("07")).unwrap();
        assert_eq!(value["frame"], "07");
        assert_eq!(value["mode"], "Colony");
        assert_eq!(value["n_cells"], 3);
        assert!((value["strain_energy"].as_f64().unwrap() - 1.92e-13).abs() < 1e-25);
        assert!((value["cv_mean_normal_stress"].as_f64().unwrap() - 0.37).abs() < 1e-12);
        assert!(value["average_normal_line_tension"].is_null());
        assert_eq!(value["warnings"][0], "2 outlier vectors were replaced");
    }

    #[test]
    fn batch_lists_frames_in_order() {
        let frames = [frame("01"), frame("02")];
        let json = to_batch_json(&frames, &TfmConfig::default()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["frames"].as_array().unwrap().len(), 2);
        assert_eq!(value["frames"][1]["frame"], "02");
        assert!((value["config"]["pixel_size"].as_f64().unwrap() - 0.201).abs() < 1e-12);
    }
}
