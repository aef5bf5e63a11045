//! Incremental pipeline: advance stage-by-stage, inspecting each
//! intermediate result before continuing.
//!
//! Unlike [`crate::process`] which runs the entire analysis in one call,
//! [`Pipeline`] lets the caller drive execution one step at a time:
//!
//! ```rust
//! # use ndarray::Array2;
//! # use tfm_pipeline::{MaskSet, Pipeline, PipelineError, TfmConfig};
//! # fn run(reference: Array2<f64>, deformed: Array2<f64>, masks: MaskSet) -> Result<(), PipelineError> {
//! let result = Pipeline::new(reference, deformed, masks, TfmConfig::default())
//!     .correlate()?
//!     .solve_tractions()?
//!     .measure_energy()?
//!     .build_mesh()?
//!     .solve_stress()?
//!     .extract_borders()?
//!     .compute_line_tension()?
//!     .into_result();
//! println!("{:.3e} J", result.strain_energy);
//! # Ok(())
//! # }
//! ```
//!
//! Each stage method consumes `self` and returns the next pipeline state,
//! carrying every previously computed intermediate along with the
//! warnings and per-stage diagnostics collected so far. The bead images
//! are dropped once the deformation field exists.

use std::time::{Duration, Instant};

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::borders::{BorderGraph, find_borders};
use crate::correlation::Deformation;
use crate::diagnostics::{PipelineDiagnostics, PipelineSummary, StageDiagnostics, StageMetrics};
use crate::energy::Contractility;
use crate::fem::domain::{MeshConfig, prepare_forces};
use crate::fem::solver::FemSolution;
use crate::fem::{Mesh, StressStatistics, mean_normal_stress_map};
use crate::line_tension::LineTension;
use crate::mask::{Mask, MaskSet, ResampleMethod, fill_patches_for_cell_layer};
use crate::mode::{AnalysisMode, MaskRole};
use crate::traction::SpatialFilter;
use crate::types::{GridShape, PipelineError, PipelineWarning, Stage, TfmConfig, VectorField};

/// Configuration, masks and bookkeeping shared by every stage after
/// [`Pending`].
struct Run {
    config: TfmConfig,
    masks: MaskSet,
    image_shape: GridShape,
    warnings: Vec<PipelineWarning>,
    stages: Vec<StageDiagnostics>,
    elapsed: Duration,
}

impl Run {
    fn warn(&mut self, warning: PipelineWarning) {
        tracing::warn!(%warning, "pipeline warning");
        self.warnings.push(warning);
    }

    fn record(&mut self, stage: Stage, started: Instant, metrics: StageMetrics) {
        let duration = started.elapsed();
        self.elapsed += duration;
        tracing::debug!(%stage, ?duration, "stage complete");
        self.stages.push(StageDiagnostics {
            stage,
            duration,
            metrics,
        });
    }

    const fn mode(&self) -> AnalysisMode {
        self.config.mode
    }

    /// A supplied mask brought onto the field grid.
    fn field_mask(&self, role: MaskRole, shape: GridShape) -> Result<Mask, PipelineError> {
        Ok(self
            .masks
            .require(role)?
            .resample(shape, ResampleMethod::Nearest))
    }

    /// Like [`field_mask`](Self::field_mask), with holes filled at image
    /// resolution before resampling.
    fn filled_field_mask(&self, role: MaskRole, shape: GridShape) -> Result<Mask, PipelineError> {
        Ok(self
            .masks
            .require(role)?
            .fill_holes()
            .resample(shape, ResampleMethod::Nearest))
    }
}

// ───────────────────────── Stage 0: Pending ──────────────────────────

/// Pipeline state before any processing has occurred.
///
/// Call [`correlate`](Self::correlate) to advance to the next stage.
#[must_use = "pipeline stages are consumed by advancing, call .correlate() to continue"]
pub struct Pending {
    reference: Array2<f64>,
    deformed: Array2<f64>,
    masks: MaskSet,
    config: TfmConfig,
}

impl Pending {
    /// Bead image without cells.
    #[must_use]
    pub const fn reference(&self) -> &Array2<f64> {
        &self.reference
    }

    /// Bead image with cells present.
    #[must_use]
    pub const fn deformed(&self) -> &Array2<f64> {
        &self.deformed
    }

    /// Masks supplied for this frame.
    #[must_use]
    pub const fn masks(&self) -> &MaskSet {
        &self.masks
    }

    /// Configuration of this run.
    #[must_use]
    pub const fn config(&self) -> &TfmConfig {
        &self.config
    }

    /// Validate the inputs and estimate the deformation field.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfig`] for invalid settings,
    /// [`PipelineError::MissingInput`] if the analysis mode needs a mask
    /// that was not supplied, and any error of
    /// [`correlate`](crate::correlation::correlate).
    pub fn correlate(self) -> Result<Correlated, PipelineError> {
        let started = Instant::now();
        self.config.validate()?;
        self.masks.require_all(self.config.mode.required_roles())?;

        let correlation = &self.config.correlation;
        let mut deformation = crate::correlation::correlate(
            &self.reference,
            &self.deformed,
            self.config.pixel_size,
            correlation,
        )?;
        if let Some(field_pixel_size) = self.config.field_pixel_size {
            let (u, v, _) = deformation.field.into_parts();
            deformation.field = VectorField::new(u, v, field_pixel_size)?;
        }

        let mut run = Run {
            image_shape: GridShape::of(&self.reference),
            warnings: Vec::new(),
            stages: Vec::new(),
            elapsed: Duration::ZERO,
            config: self.config,
            masks: self.masks,
        };
        for warning in deformation.warnings() {
            run.warn(warning);
        }
        let shape = deformation.field.shape();
        run.record(
            Stage::Correlation,
            started,
            StageMetrics::Correlation {
                window_size: run.config.correlation.window_size,
                overlap: run.config.correlation.overlap,
                field_rows: shape.rows,
                field_cols: shape.cols,
                field_pixel_size: deformation.field.pixel_size(),
                low_signal_vectors: deformation.invalid.count(),
                outlier_vectors: deformation.outliers.count(),
            },
        );
        Ok(Correlated { run, deformation })
    }
}

// ───────────────────────── Stage 1: Correlated ───────────────────────

/// Pipeline state after estimating the deformation field.
///
/// Call [`solve_tractions`](Self::solve_tractions) to advance to the
/// next stage.
#[must_use = "pipeline stages are consumed by advancing, call .solve_tractions() to continue"]
pub struct Correlated {
    run: Run,
    deformation: Deformation,
}

impl Correlated {
    /// The deformation field and its quality flags.
    #[must_use]
    pub const fn deformation(&self) -> &Deformation {
        &self.deformation
    }

    /// Reconstruct the traction field.
    ///
    /// # Errors
    ///
    /// Returns any error of [`tractions`](crate::traction::tractions).
    pub fn solve_tractions(mut self) -> Result<TractionsSolved, PipelineError> {
        let started = Instant::now();
        let traction =
            crate::traction::tractions(&self.deformation.field, &self.run.config.traction_config())?;

        let magnitude = traction.magnitude();
        let max_traction = magnitude.iter().copied().fold(0.0, f64::max);
        let mean_traction = magnitude.mean().unwrap_or(0.0);
        let filter_sigma = match self.run.config.traction_filter {
            SpatialFilter::Gaussian { sigma } => Some(sigma),
            SpatialFilter::None => None,
        };
        self.run.record(
            Stage::Traction,
            started,
            StageMetrics::Traction {
                filter_sigma,
                max_traction,
                mean_traction,
            },
        );
        Ok(TractionsSolved {
            run: self.run,
            deformation: self.deformation,
            traction,
        })
    }
}

// ───────────────────────── Stage 2: TractionsSolved ──────────────────

/// Pipeline state after reconstructing the traction field.
///
/// Call [`measure_energy`](Self::measure_energy) to advance to the next
/// stage.
#[must_use = "pipeline stages are consumed by advancing, call .measure_energy() to continue"]
pub struct TractionsSolved {
    run: Run,
    deformation: Deformation,
    traction: VectorField,
}

impl TractionsSolved {
    /// Traction field in Pa.
    #[must_use]
    pub const fn traction(&self) -> &VectorField {
        &self.traction
    }

    /// Sum strain energy and contractility over the force measurement
    /// area.
    ///
    /// A colony uses its force measurement mask. A cell layer uses its
    /// cell area with the patches at the field edge filled in.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::EmptyMask`] or
    /// [`PipelineError::FragmentedMask`] for an unusable mask.
    pub fn measure_energy(mut self) -> Result<EnergyMeasured, PipelineError> {
        let started = Instant::now();
        let shape = self.traction.shape();
        let force_mask = match self.run.mode() {
            AnalysisMode::Colony => self
                .run
                .field_mask(MaskRole::ForceMeasurement, shape)?
                .validate(MaskRole::ForceMeasurement)?,
            AnalysisMode::CellLayer => {
                fill_patches_for_cell_layer(&self.run.field_mask(MaskRole::CellArea, shape)?)
            }
        };

        let energy_points = crate::energy::strain_energy_points(
            &self.deformation.field,
            &self.traction,
            self.run.config.pixel_size,
        )?;
        let strain_energy = crate::energy::strain_energy(&energy_points, &force_mask)?;
        let contractility = crate::energy::contractility(&self.traction, &force_mask)?;
        tracing::info!(
            strain_energy,
            contractility = contractility.force,
            "energy measured"
        );

        self.run.record(
            Stage::Energy,
            started,
            StageMetrics::Energy {
                mask_points: force_mask.count(),
                strain_energy,
                contractility: contractility.force,
            },
        );
        Ok(EnergyMeasured {
            run: self.run,
            deformation: self.deformation,
            traction: self.traction,
            energy_points,
            force_mask,
            strain_energy,
            contractility,
        })
    }
}

// ───────────────────────── Stage 3: EnergyMeasured ───────────────────

/// Pipeline state after measuring strain energy and contractility.
///
/// Call [`build_mesh`](Self::build_mesh) to advance to the next stage.
#[must_use = "pipeline stages are consumed by advancing, call .build_mesh() to continue"]
pub struct EnergyMeasured {
    run: Run,
    deformation: Deformation,
    traction: VectorField,
    energy_points: Array2<f64>,
    force_mask: Mask,
    strain_energy: f64,
    contractility: Contractility,
}

impl EnergyMeasured {
    /// Strain energy in J under every grid point.
    #[must_use]
    pub const fn energy_points(&self) -> &Array2<f64> {
        &self.energy_points
    }

    /// Total strain energy in J.
    #[must_use]
    pub const fn strain_energy(&self) -> f64 {
        self.strain_energy
    }

    /// Contractility of the tractions.
    #[must_use]
    pub const fn contractility(&self) -> &Contractility {
        &self.contractility
    }

    /// Load the cell sheet with the reaction of the traction forces and
    /// mesh the FEM domain.
    ///
    /// A colony uses its FEM domain mask. A cell layer uses the whole
    /// field minus the mode's margin.
    ///
    /// # Errors
    ///
    /// Returns any error of [`prepare_forces`] or
    /// [`build_mesh`](crate::fem::domain::build_mesh).
    pub fn build_mesh(mut self) -> Result<MeshBuilt, PipelineError> {
        let started = Instant::now();
        let shape = self.traction.shape();
        let mode = self.run.mode();
        let domain = match mode {
            AnalysisMode::Colony => self.run.filled_field_mask(MaskRole::FemDomain, shape)?,
            AnalysisMode::CellLayer => Mask::full_with_margin(shape, mode.defaults().fem_margin),
        };

        let forces = prepare_forces(&self.traction, &domain)?;
        let mesh = crate::fem::domain::build_mesh(
            &domain,
            &-&forces.fx,
            &-&forces.fy,
            &MeshConfig::with_poisson_ratio(self.run.config.resolved_fem_poisson_ratio()),
        )?;

        let [lx, ly] = mesh.net_load();
        self.run.record(
            Stage::FemDomain,
            started,
            StageMetrics::Mesh {
                domain_points: domain.count(),
                nodes: mesh.nodes.len(),
                elements: mesh.elements.len(),
                net_load: lx.hypot(ly),
            },
        );
        Ok(MeshBuilt {
            run: self.run,
            deformation: self.deformation,
            traction: self.traction,
            energy_points: self.energy_points,
            force_mask: self.force_mask,
            strain_energy: self.strain_energy,
            contractility: self.contractility,
            mesh,
        })
    }
}

// ───────────────────────── Stage 4: MeshBuilt ────────────────────────

/// Pipeline state after building the FEM mesh.
///
/// Call [`solve_stress`](Self::solve_stress) to advance to the next
/// stage.
#[must_use = "pipeline stages are consumed by advancing, call .solve_stress() to continue"]
pub struct MeshBuilt {
    run: Run,
    deformation: Deformation,
    traction: VectorField,
    energy_points: Array2<f64>,
    force_mask: Mask,
    strain_energy: f64,
    contractility: Contractility,
    mesh: Mesh,
}

impl MeshBuilt {
    /// The loaded mesh.
    #[must_use]
    pub const fn mesh(&self) -> &Mesh {
        &self.mesh
    }

    /// Solve the FEM system and average the mean normal stress over the
    /// cell area.
    ///
    /// The cell area is the supplied cell area mask, or the filled border
    /// mask if none was supplied, restricted to the FEM domain.
    ///
    /// # Errors
    ///
    /// Returns any error of [`solve`](crate::fem::solver::solve), and
    /// [`PipelineError::EmptyMask`] if the cell area holds no stress.
    pub fn solve_stress(mut self) -> Result<StressSolved, PipelineError> {
        let started = Instant::now();
        let solution = crate::fem::solver::solve(&self.mesh, &self.run.config.solver)?;
        if solution.residual > self.run.config.solver.residual_warning {
            self.run.warn(PipelineWarning::ResidualImbalance {
                relative_residual: solution.residual,
            });
        }

        let shape = self.traction.shape();
        let mean_normal_stress =
            mean_normal_stress_map(&solution.stress, self.traction.pixel_size());
        let area = match self.run.masks.get(MaskRole::CellArea) {
            Some(mask) => mask.resample(shape, ResampleMethod::Nearest),
            None => self
                .run
                .masks
                .require(MaskRole::Borders)?
                .fill_holes()
                .resample(shape, ResampleMethod::Nearest),
        };
        let stress_area = area.intersection(&solution.stress.domain)?;
        let statistics = StressStatistics::over(&mean_normal_stress, &stress_area)?;
        tracing::info!(
            mean_normal_stress = statistics.mean,
            cv = statistics.cv,
            "monolayer stress solved"
        );

        self.run.record(
            Stage::FemSolve,
            started,
            StageMetrics::Stress {
                pinned: solution.pinned.len(),
                residual: solution.residual,
                mean_normal_stress: statistics.mean,
                cv: statistics.cv,
            },
        );
        Ok(StressSolved {
            run: self.run,
            deformation: self.deformation,
            traction: self.traction,
            energy_points: self.energy_points,
            force_mask: self.force_mask,
            strain_energy: self.strain_energy,
            contractility: self.contractility,
            mesh: self.mesh,
            solution,
            mean_normal_stress,
            stress_area,
            statistics,
        })
    }
}

// ───────────────────────── Stage 5: StressSolved ─────────────────────

/// Pipeline state after the FEM solve.
///
/// Call [`extract_borders`](Self::extract_borders) to advance to the
/// next stage.
#[must_use = "pipeline stages are consumed by advancing, call .extract_borders() to continue"]
pub struct StressSolved {
    run: Run,
    deformation: Deformation,
    traction: VectorField,
    energy_points: Array2<f64>,
    force_mask: Mask,
    strain_energy: f64,
    contractility: Contractility,
    mesh: Mesh,
    solution: FemSolution,
    mean_normal_stress: Array2<f64>,
    stress_area: Mask,
    statistics: StressStatistics,
}

impl StressSolved {
    /// Nodal displacements and the recovered stress field.
    #[must_use]
    pub const fn solution(&self) -> &FemSolution {
        &self.solution
    }

    /// Mean normal stress in N/m on the field grid.
    #[must_use]
    pub const fn mean_normal_stress(&self) -> &Array2<f64> {
        &self.mean_normal_stress
    }

    /// Mean normal stress statistics over the cell area.
    #[must_use]
    pub const fn statistics(&self) -> &StressStatistics {
        &self.statistics
    }

    /// Segment the border mask into borders, junctions and cells.
    ///
    /// # Errors
    ///
    /// Returns any error of [`find_borders`].
    pub fn extract_borders(mut self) -> Result<BordersExtracted, PipelineError> {
        let started = Instant::now();
        let graph = find_borders(
            self.run.masks.require(MaskRole::Borders)?,
            self.traction.shape(),
            &self.run.config.borders,
        )?;
        for warning in graph.warnings() {
            self.run.warn(warning);
        }

        self.run.record(
            Stage::Borders,
            started,
            StageMetrics::Borders {
                borders: graph.borders.len(),
                edge_borders: graph.edge_borders.len(),
                cells: graph.n_cells,
                networks: graph.networks,
            },
        );
        Ok(BordersExtracted {
            run: self.run,
            deformation: self.deformation,
            traction: self.traction,
            energy_points: self.energy_points,
            force_mask: self.force_mask,
            strain_energy: self.strain_energy,
            contractility: self.contractility,
            mesh: self.mesh,
            solution: self.solution,
            mean_normal_stress: self.mean_normal_stress,
            stress_area: self.stress_area,
            statistics: self.statistics,
            graph,
        })
    }
}

// ───────────────────────── Stage 6: BordersExtracted ─────────────────

/// Pipeline state after border extraction.
///
/// Call [`compute_line_tension`](Self::compute_line_tension) to advance
/// to the final stage.
#[must_use = "pipeline stages are consumed by advancing, call .compute_line_tension() to continue"]
pub struct BordersExtracted {
    run: Run,
    deformation: Deformation,
    traction: VectorField,
    energy_points: Array2<f64>,
    force_mask: Mask,
    strain_energy: f64,
    contractility: Contractility,
    mesh: Mesh,
    solution: FemSolution,
    mean_normal_stress: Array2<f64>,
    stress_area: Mask,
    statistics: StressStatistics,
    graph: BorderGraph,
}

impl BordersExtracted {
    /// Borders, junctions and cells.
    #[must_use]
    pub const fn borders(&self) -> &BorderGraph {
        &self.graph
    }

    /// Sample the stress along every border.
    ///
    /// # Errors
    ///
    /// Returns any error of
    /// [`line_tension`](crate::line_tension::line_tension).
    pub fn compute_line_tension(mut self) -> Result<Complete, PipelineError> {
        let started = Instant::now();
        let line_tension = crate::line_tension::line_tension(
            &self.graph,
            &self.solution.stress,
            self.traction.pixel_size(),
            &self.run.config.line_tension,
        )?;
        tracing::info!(
            average = ?line_tension.average_magnitude(),
            average_normal = ?line_tension.average_normal(),
            "line tension computed"
        );

        self.run.record(
            Stage::LineTension,
            started,
            StageMetrics::LineTension {
                samples: line_tension.borders.values().map(|b| b.points.len()).sum(),
                min_magnitude: line_tension.min_magnitude,
                max_magnitude: line_tension.max_magnitude,
            },
        );
        Ok(Complete {
            run: self.run,
            deformation: self.deformation,
            traction: self.traction,
            energy_points: self.energy_points,
            force_mask: self.force_mask,
            strain_energy: self.strain_energy,
            contractility: self.contractility,
            mesh: self.mesh,
            solution: self.solution,
            mean_normal_stress: self.mean_normal_stress,
            stress_area: self.stress_area,
            statistics: self.statistics,
            graph: self.graph,
            line_tension,
        })
    }
}

// ───────────────────────── Stage 7: Complete ─────────────────────────

/// Pipeline state after computing line tension, the final stage.
///
/// Call [`into_result`](Self::into_result) to extract the [`TfmResult`].
#[must_use = "call .into_result() to extract the TfmResult"]
pub struct Complete {
    run: Run,
    deformation: Deformation,
    traction: VectorField,
    energy_points: Array2<f64>,
    force_mask: Mask,
    strain_energy: f64,
    contractility: Contractility,
    mesh: Mesh,
    solution: FemSolution,
    mean_normal_stress: Array2<f64>,
    stress_area: Mask,
    statistics: StressStatistics,
    graph: BorderGraph,
    line_tension: LineTension,
}

impl Complete {
    /// Line tension along every border.
    #[must_use]
    pub const fn line_tension(&self) -> &LineTension {
        &self.line_tension
    }

    /// Consume the pipeline and return every result.
    pub fn into_result(self) -> TfmResult {
        let field_shape = self.traction.shape();
        let diagnostics = PipelineDiagnostics {
            total_duration: self.run.elapsed,
            summary: PipelineSummary {
                image_rows: self.run.image_shape.rows,
                image_cols: self.run.image_shape.cols,
                field_rows: field_shape.rows,
                field_cols: field_shape.cols,
                warning_count: self.run.warnings.len(),
            },
            stages: self.run.stages,
        };
        TfmResult {
            mode: self.run.config.mode,
            config: self.run.config,
            deformation: self.deformation,
            traction: self.traction,
            energy_points: self.energy_points,
            force_mask: self.force_mask,
            strain_energy: self.strain_energy,
            contractility: self.contractility,
            mesh: self.mesh,
            fem: self.solution,
            mean_normal_stress: self.mean_normal_stress,
            stress_area: self.stress_area,
            stress_statistics: self.statistics,
            borders: self.graph,
            line_tension: self.line_tension,
            warnings: self.run.warnings,
            diagnostics,
        }
    }
}

// ───────────────────────── Results ───────────────────────────────────

/// Everything a pipeline run computed.
#[derive(Debug, Clone, Serialize)]
pub struct TfmResult {
    /// Analysis mode the run used.
    pub mode: AnalysisMode,
    /// Configuration the run used.
    pub config: TfmConfig,
    /// Deformation field in bead image pixels.
    pub deformation: Deformation,
    /// Traction field in Pa.
    pub traction: VectorField,
    /// Strain energy in J under every grid point.
    pub energy_points: Array2<f64>,
    /// Force measurement area on the field grid.
    pub force_mask: Mask,
    /// Strain energy in J over the force measurement area.
    pub strain_energy: f64,
    /// Contractility over the force measurement area.
    pub contractility: Contractility,
    /// FEM model of the cell sheet.
    pub mesh: Mesh,
    /// FEM displacements and stresses.
    pub fem: FemSolution,
    /// Mean normal stress in N/m on the field grid.
    pub mean_normal_stress: Array2<f64>,
    /// Area the stress statistics were taken over.
    pub stress_area: Mask,
    /// Mean normal stress statistics.
    pub stress_statistics: StressStatistics,
    /// Cell borders.
    pub borders: BorderGraph,
    /// Line tension along every border.
    pub line_tension: LineTension,
    /// Non-fatal findings, in the order they were raised.
    pub warnings: Vec<PipelineWarning>,
    /// Timing and metrics of every stage.
    pub diagnostics: PipelineDiagnostics,
}

impl TfmResult {
    /// The headline scalars of the run.
    #[must_use]
    pub fn summary(&self) -> TfmSummary {
        TfmSummary {
            strain_energy: self.strain_energy,
            contractility: self.contractility.force,
            mean_normal_stress: self.stress_statistics.mean,
            cv_mean_normal_stress: self.stress_statistics.cv,
            average_line_tension: self.line_tension.average_magnitude(),
            average_normal_line_tension: self.line_tension.average_normal(),
        }
    }
}

/// Headline scalars of a run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TfmSummary {
    /// Strain energy in J.
    pub strain_energy: f64,
    /// Contractility in N.
    pub contractility: f64,
    /// Mean of the mean normal stress over the cell area, in N/m.
    pub mean_normal_stress: f64,
    /// Coefficient of variation of the mean normal stress.
    pub cv_mean_normal_stress: f64,
    /// Mean line tension magnitude over interior borders, in N/m.
    pub average_line_tension: Option<f64>,
    /// Mean normal line tension over interior borders, in N/m.
    pub average_normal_line_tension: Option<f64>,
}

// ───────────────────── Pipeline entry point ──────────────────────────

/// Incremental traction force microscopy pipeline.
///
/// Created via [`Pipeline::new`], which stores the inputs without doing
/// any processing. Each stage method consumes the current state and
/// returns the next, making it a compile-time error to skip stages or
/// call them out of order.
pub struct Pipeline;

impl Pipeline {
    /// Create a new pipeline from a bead image pair, the frame's masks
    /// (at image resolution) and a config.
    #[allow(clippy::new_ret_no_self)]
    pub const fn new(
        reference: Array2<f64>,
        deformed: Array2<f64>,
        masks: MaskSet,
        config: TfmConfig,
    ) -> Pending {
        Pending {
            reference,
            deformed,
            masks,
            config,
        }
    }
}
