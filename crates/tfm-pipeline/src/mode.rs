//! Analysis modes and the mask roles each of them requires.
//!
//! A colony experiment is annotated with a force-measurement area, an
//! FEM area enclosing all forces, and the cell borders. A cell-layer
//! experiment covers the whole field of view, so it only needs the cell
//! area and the borders; the other areas are derived from the field.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::PipelineWarning;

/// The purpose a binary mask serves in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum MaskRole {
    /// Area over which strain energy and contractility are summed.
    ForceMeasurement,
    /// Area of the FEM model; should enclose every cell-generated force.
    FemDomain,
    /// Area of the cells, used for stress averages.
    CellArea,
    /// Thin lines along the cell-cell and colony borders.
    Borders,
}

impl MaskRole {
    /// All roles, in pipeline order.
    pub const ALL: [Self; 4] = [
        Self::ForceMeasurement,
        Self::FemDomain,
        Self::CellArea,
        Self::Borders,
    ];
}

impl fmt::Display for MaskRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::ForceMeasurement => "force measurement",
            Self::FemDomain => "FEM domain",
            Self::CellArea => "cell area",
            Self::Borders => "cell border",
        })
    }
}

/// Fixed parameters that differ between analysis modes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModeDefaults {
    /// Poisson ratio of the cell sheet in the FEM model.
    pub fem_poisson_ratio: f64,
    /// Grid points removed from each side of the field when the FEM
    /// domain is the whole field.
    pub fem_margin: usize,
}

/// Which kind of experiment is analysed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AnalysisMode {
    /// An isolated colony: explicit force-measurement and FEM areas.
    #[default]
    Colony,
    /// A confluent cell layer filling the field of view.
    CellLayer,
}

impl AnalysisMode {
    /// Mask roles that must be supplied for this mode.
    #[must_use]
    pub const fn required_roles(self) -> &'static [MaskRole] {
        match self {
            Self::Colony => &[
                MaskRole::ForceMeasurement,
                MaskRole::FemDomain,
                MaskRole::Borders,
            ],
            Self::CellLayer => &[MaskRole::CellArea, MaskRole::Borders],
        }
    }

    /// Mode-specific parameter defaults.
    #[must_use]
    pub const fn defaults(self) -> ModeDefaults {
        match self {
            Self::Colony => ModeDefaults {
                fem_poisson_ratio: 0.5,
                fem_margin: 0,
            },
            Self::CellLayer => ModeDefaults {
                fem_poisson_ratio: 0.5,
                fem_margin: 2,
            },
        }
    }

    /// Infer the mode from the roles of the masks that are available.
    ///
    /// Returns `fallback` when no masks exist yet. When the roles fit
    /// neither mode, `fallback` is returned together with an
    /// [`PipelineWarning::UndeterminedMode`] warning.
    #[must_use]
    pub fn guess(roles: &[MaskRole], fallback: Self) -> (Self, Option<PipelineWarning>) {
        if roles.is_empty() {
            return (fallback, None);
        }
        let has = |role| roles.contains(&role);
        let colony_area = has(MaskRole::ForceMeasurement) || has(MaskRole::FemDomain);

        if has(MaskRole::CellArea) && !colony_area {
            (Self::CellLayer, None)
        } else if colony_area {
            (Self::Colony, None)
        } else {
            tracing::warn!(?roles, %fallback, "failed to guess analysis mode");
            (fallback, Some(PipelineWarning::UndeterminedMode { fallback }))
        }
    }
}

impl fmt::Display for AnalysisMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Colony => "colony",
            Self::CellLayer => "cell layer",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn colony_requires_force_fem_and_border_masks() {
        let roles = AnalysisMode::Colony.required_roles();
        assert!(roles.contains(&MaskRole::ForceMeasurement));
        assert!(roles.contains(&MaskRole::FemDomain));
        assert!(roles.contains(&MaskRole::Borders));
        assert!(!roles.contains(&MaskRole::CellArea));
    }

    #[test]
    fn cell_layer_requires_cell_area() {
        let roles = AnalysisMode::CellLayer.required_roles();
        assert_eq!(roles, &[MaskRole::CellArea, MaskRole::Borders]);
        assert!(AnalysisMode::CellLayer.defaults().fem_margin > 0);
    }

    #[test]
    fn guess_cell_layer() {
        let (mode, warning) =
            AnalysisMode::guess(&[MaskRole::CellArea, MaskRole::Borders], AnalysisMode::Colony);
        assert_eq!(mode, AnalysisMode::CellLayer);
        assert!(warning.is_none());
    }

    #[test]
    fn guess_colony() {
        let (mode, warning) = AnalysisMode::guess(
            &[MaskRole::Borders, MaskRole::ForceMeasurement],
            AnalysisMode::CellLayer,
        );
        assert_eq!(mode, AnalysisMode::Colony);
        assert!(warning.is_none());
    }

    #[test]
    fn guess_without_masks_uses_fallback_silently() {
        let (mode, warning) = AnalysisMode::guess(&[], AnalysisMode::CellLayer);
        assert_eq!(mode, AnalysisMode::CellLayer);
        assert!(warning.is_none());
    }

    #[test]
    fn guess_borders_only_is_undetermined() {
        let (mode, warning) = AnalysisMode::guess(&[MaskRole::Borders], AnalysisMode::Colony);
        assert_eq!(mode, AnalysisMode::Colony);
        assert_eq!(
            warning,
            Some(PipelineWarning::UndeterminedMode {
                fallback: AnalysisMode::Colony
            })
        );
    }

    #[test]
    fn role_display() {
        assert_eq!(MaskRole::FemDomain.to_string(), "FEM domain");
        assert_eq!(AnalysisMode::CellLayer.to_string(), "cell layer");
    }
}
