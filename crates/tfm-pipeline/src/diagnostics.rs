//! Pipeline diagnostics: timing and metrics for each stage.
//!
//! Every completed [`Pipeline`](crate::Pipeline) run carries a
//! [`PipelineDiagnostics`] alongside its results. Durations are
//! measured with [`std::time::Instant`] and serialized as fractional
//! seconds, since `std::time::Duration` does not implement serde
//! traits.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::Stage;

/// Serde support for `std::time::Duration` as fractional seconds.
mod duration_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    /// Serialize a `Duration` as fractional seconds (`f64`).
    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        duration.as_secs_f64().serialize(serializer)
    }

    /// Deserialize a `Duration` from fractional seconds (`f64`).
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(|_| {
            serde::de::Error::custom(
                "duration seconds must be finite, non-negative, and representable as a Duration",
            )
        })
    }
}

/// Diagnostics collected from a single pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineDiagnostics {
    /// One entry per executed stage, in execution order.
    pub stages: Vec<StageDiagnostics>,
    /// Total wall-clock duration of the run (seconds).
    #[serde(with = "duration_serde")]
    pub total_duration: Duration,
    /// Grid sizes and warning count.
    pub summary: PipelineSummary,
}

/// Diagnostics for a single pipeline stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageDiagnostics {
    /// Which stage ran.
    pub stage: Stage,
    /// Wall-clock duration of this stage (seconds).
    #[serde(with = "duration_serde")]
    pub duration: Duration,
    /// Stage-specific metrics.
    pub metrics: StageMetrics,
}

/// Stage-specific metrics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StageMetrics {
    /// Deformation field estimation.
    Correlation {
        /// Window edge length in pixels.
        window_size: usize,
        /// Window overlap in pixels.
        overlap: usize,
        /// Field grid rows.
        field_rows: usize,
        /// Field grid columns.
        field_cols: usize,
        /// Field grid spacing in µm.
        field_pixel_size: f64,
        /// Vectors replaced for a weak correlation peak.
        low_signal_vectors: usize,
        /// Vectors replaced as magnitude outliers.
        outlier_vectors: usize,
    },
    /// Traction reconstruction.
    Traction {
        /// Gaussian filter width in grid units, if filtered.
        filter_sigma: Option<f64>,
        /// Largest traction magnitude in Pa.
        max_traction: f64,
        /// Mean traction magnitude in Pa.
        mean_traction: f64,
    },
    /// Strain energy and contractility.
    Energy {
        /// Grid points inside the force measurement area.
        mask_points: usize,
        /// Strain energy in J.
        strain_energy: f64,
        /// Contractility in N.
        contractility: f64,
    },
    /// Nodal forces and mesh construction.
    Mesh {
        /// Grid points inside the FEM domain.
        domain_points: usize,
        /// Mesh nodes.
        nodes: usize,
        /// Mesh elements.
        elements: usize,
        /// Magnitude of the net load after balancing, in N.
        net_load: f64,
    },
    /// Stiffness assembly, solve and stress recovery.
    Stress {
        /// Nodes pinned to remove rigid body motion.
        pinned: usize,
        /// Relative residual of the solve.
        residual: f64,
        /// Mean normal stress in N/m.
        mean_normal_stress: f64,
        /// Coefficient of variation of the mean normal stress.
        cv: f64,
    },
    /// Border extraction.
    Borders {
        /// Border segments.
        borders: usize,
        /// Borders at the edge of the cell sheet.
        edge_borders: usize,
        /// Cells enclosed by the borders.
        cells: usize,
        /// Unconnected border networks.
        networks: usize,
    },
    /// Line tension sampling.
    LineTension {
        /// Sample points over all borders.
        samples: usize,
        /// Smallest tension magnitude in N/m.
        min_magnitude: f64,
        /// Largest tension magnitude in N/m.
        max_magnitude: f64,
    },
}

/// High-level summary of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineSummary {
    /// Bead image rows.
    pub image_rows: usize,
    /// Bead image columns.
    pub image_cols: usize,
    /// Field grid rows.
    pub field_rows: usize,
    /// Field grid columns.
    pub field_cols: usize,
    /// Number of warnings raised.
    pub warning_count: usize,
}

impl PipelineDiagnostics {
    /// Diagnostics of `stage`, if it ran.
    #[must_use]
    pub fn stage(&self, stage: Stage) -> Option<&StageDiagnostics> {
        self.stages.iter().find(|d| d.stage == stage)
    }

    /// Format diagnostics as a human-readable report.
    #[must_use]
    pub fn report(&self) -> String {
        let mut lines = Vec::new();

        lines.push(format!("Pipeline Diagnostics Report\n{}", "=".repeat(60)));
        lines.push(format!(
            "Image: {}x{}  |  Field: {}x{}",
            self.summary.image_rows,
            self.summary.image_cols,
            self.summary.field_rows,
            self.summary.field_cols,
        ));
        lines.push(format!(
            "Total duration: {:.3}ms",
            duration_ms(self.total_duration),
        ));
        lines.push(String::new());

        lines.push(format!(
            "{:<24} {:>10} {:>10}  {}",
            "Stage", "Duration", "% Total", "Details"
        ));
        lines.push("-".repeat(80));

        let total_ms = duration_ms(self.total_duration);
        for diag in &self.stages {
            let ms = duration_ms(diag.duration);
            let pct = if total_ms > 0.0 {
                ms / total_ms * 100.0
            } else {
                0.0
            };
            let details = format_metrics(&diag.metrics);
            let name = diag.stage.to_string();
            lines.push(format!("{name:<24} {ms:>8.3}ms {pct:>9.1}%  {details}"));
        }

        lines.push(String::new());
        lines.push(format!("Warnings: {}", self.summary.warning_count));

        lines.join("\n")
    }
}

/// Convert a `Duration` to milliseconds as `f64`.
fn duration_ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

/// Format stage metrics into a compact detail string.
fn format_metrics(metrics: &StageMetrics) -> String {
    match metrics {
        StageMetrics::Correlation {
            window_size,
            overlap,
            field_rows,
            field_cols,
            field_pixel_size,
            low_signal_vectors,
            outlier_vectors,
        } => format!(
            "window={window_size} overlap={overlap} grid={field_rows}x{field_cols} ps={field_pixel_size:.3}um weak={low_signal_vectors} outliers={outlier_vectors}",
        ),
        StageMetrics::Traction {
            filter_sigma,
            max_traction,
            mean_traction,
        } => {
            let filter = filter_sigma.map_or_else(|| "none".to_string(), |s| format!("{s:.2}"));
            format!("filter={filter} max={max_traction:.1}Pa mean={mean_traction:.1}Pa")
        }
        StageMetrics::Energy {
            mask_points,
            strain_energy,
            contractility,
        } => format!("{mask_points} pts, energy={strain_energy:.3e}J contractility={contractility:.3e}N"),
        StageMetrics::Mesh {
            domain_points,
            nodes,
            elements,
            net_load,
        } => format!("{domain_points} pts -> {nodes} nodes {elements} elements, net load={net_load:.1e}N"),
        StageMetrics::Stress {
            pinned,
            residual,
            mean_normal_stress,
            cv,
        } => format!(
            "pinned={pinned} residual={residual:.1e} mean={mean_normal_stress:.3e}N/m cv={cv:.2}",
        ),
        StageMetrics::Borders {
            borders,
            edge_borders,
            cells,
            networks,
        } => format!("{borders} borders ({edge_borders} edge), {cells} cells, {networks} networks"),
        StageMetrics::LineTension {
            samples,
            min_magnitude,
            max_magnitude,
        } => format!("{samples} samples, |t| in [{min_magnitude:.3e}, {max_magnitude:.3e}]N/m"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_ms_converts_correctly() {
        let d = Duration::from_millis(1234);
        let ms = duration_ms(d);
        assert!((ms - 1234.0).abs() < 0.01);
    }

    #[test]
    fn traction_metrics_without_filter() {
        let text = format_metrics(&StageMetrics::Traction {
            filter_sigma: None,
            max_traction: 120.0,
            mean_traction: 40.0,
        });
        assert_eq!(text, "filter=none max=120.0Pa mean=40.0Pa");
    }

    #[test]
    fn report_lists_every_stage() {
        let diag = PipelineDiagnostics {
            stages: vec![
                StageDiagnostics {
                    stage: Stage::Correlation,
                    duration: Duration::from_millis(40),
                    metrics: StageMetrics::Correlation {
                        window_size: 100,
                        overlap: 60,
                        field_rows: 20,
                        field_cols: 24,
                        field_pixel_size: 8.04,
                        low_signal_vectors: 3,
                        outlier_vectors: 0,
                    },
                },
                StageDiagnostics {
                    stage: Stage::FemSolve,
                    duration: Duration::from_millis(60),
                    metrics: StageMetrics::Stress {
                        pinned: 2,
                        residual: 1e-12,
                        mean_normal_stress: 4.6e-3,
                        cv: 0.37,
                    },
                },
            ],
            total_duration: Duration::from_millis(100),
            summary: PipelineSummary {
                image_rows: 860,
                image_cols: 1000,
                field_rows: 20,
                field_cols: 24,
                warning_count: 1,
            },
        };

        let report = diag.report();
        assert!(report.contains("Pipeline Diagnostics Report"));
        assert!(report.contains("correlation"));
        assert!(report.contains("FEM solve"));
        assert!(report.contains("weak=3"));
        assert!(report.contains("pinned=2"));
        assert!(report.contains("Warnings: 1"));
        assert!(diag.stage(Stage::FemSolve).is_some());
        assert!(diag.stage(Stage::Borders).is_none());
    }
}
