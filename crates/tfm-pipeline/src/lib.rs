//! tfm-pipeline: traction force microscopy on in-memory grids (sans-IO).
//!
//! Turns a pair of bead images and a set of annotation masks into
//! cell-generated forces and stresses through:
//! correlation -> traction -> energy -> FEM mesh -> FEM solve ->
//! borders -> line tension.
//!
//! This crate has **no I/O dependencies**: images arrive as
//! `ndarray::Array2<f64>` intensities and masks as boolean grids. Image
//! decoding and file handling live in the `tfm` binary.

pub mod blur;
pub mod borders;
pub mod correlation;
pub mod diagnostics;
pub mod energy;
pub mod fem;
mod fft;
pub mod line_tension;
pub mod mask;
pub mod mode;
pub mod pipeline;
pub mod spline;
pub mod traction;
pub mod types;

pub use borders::{Border, BorderConfig, BorderGraph, BorderId};
pub use correlation::{CorrelationConfig, Deformation};
pub use diagnostics::{PipelineDiagnostics, StageDiagnostics, StageMetrics};
pub use fem::solver::{FemSolution, LinearSolverKind, SolverConfig};
pub use fem::{Mesh, StressField, StressStatistics};
pub use line_tension::{BorderTension, LineTension, LineTensionConfig};
pub use mask::{Mask, MaskSet, ResampleMethod};
pub use mode::{AnalysisMode, MaskRole};
pub use pipeline::{Pipeline, TfmResult, TfmSummary};
pub use traction::{SpatialFilter, SubstrateHeight};
pub use types::{
    GridShape, PipelineError, PipelineWarning, Point, Stage, TfmConfig, VectorField,
};

/// Run the full analysis on one frame.
///
/// `reference` is the bead image after the cells were removed and
/// `deformed` the one with cells present; both must have the same
/// shape. Masks are given at image resolution and resampled onto the
/// deformation grid as needed.
///
/// # Pipeline steps
///
/// 1. PIV deformation field with vector validation
/// 2. Fourier transform traction cytometry
/// 3. Strain energy and contractility over the force measurement area
/// 4. Balanced nodal loads and a quadrilateral mesh of the FEM domain
/// 5. Sparse FEM solve and stress recovery
/// 6. Border segmentation into borders, junctions and cells
/// 7. Line tension along smoothed border splines
///
/// # Errors
///
/// Returns the first [`PipelineError`] raised by any step. Non-fatal
/// findings are collected in [`TfmResult::warnings`].
pub fn process(
    reference: ndarray::Array2<f64>,
    deformed: ndarray::Array2<f64>,
    masks: MaskSet,
    config: TfmConfig,
) -> Result<TfmResult, PipelineError> {
    Ok(Pipeline::new(reference, deformed, masks, config)
        .correlate()?
        .solve_tractions()?
        .measure_energy()?
        .build_mesh()?
        .solve_stress()?
        .extract_borders()?
        .compute_line_tension()?
        .into_result())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::correlation::tests::{bead_positions, render_beads};
    use crate::pipeline::tests::{COLS, ROWS, colony_masks, config};

    #[test]
    fn process_runs_every_stage() {
        let image = render_beads(ROWS, COLS, &bead_positions(ROWS, COLS, 8));
        let result = process(image.clone(), image, colony_masks(), config()).unwrap();
        let stages: Vec<Stage> = result.diagnostics.stages.iter().map(|d| d.stage).collect();
        assert_eq!(
            stages,
            [
                Stage::Correlation,
                Stage::Traction,
                Stage::Energy,
                Stage::FemDomain,
                Stage::FemSolve,
                Stage::Borders,
                Stage::LineTension,
            ]
        );
        assert_eq!(result.line_tension.n_cells, 3);
    }

    #[test]
    fn process_rejects_mismatched_images() {
        let reference = render_beads(ROWS, COLS, &bead_positions(ROWS, COLS, 8));
        let deformed = render_beads(ROWS, COLS - 16, &bead_positions(ROWS, COLS - 16, 8));
        assert!(matches!(
            process(reference, deformed, colony_masks(), config()),
            Err(PipelineError::ShapeMismatch {
                stage: Stage::Correlation,
                ..
            })
        ));
    }

    #[test]
    fn result_serializes_to_json() {
        let image = render_beads(ROWS, COLS, &bead_positions(ROWS, COLS, 2));
        let result = process(image.clone(), image, colony_masks(), config()).unwrap();
        let json = serde_json::to_value(result.summary()).unwrap();
        assert!(json.get("strain_energy").is_some());
        assert!(json.get("average_normal_line_tension").is_some());
        let full = serde_json::to_string(&result).unwrap();
        assert!(full.contains("\"diagnostics\""));
    }
}
