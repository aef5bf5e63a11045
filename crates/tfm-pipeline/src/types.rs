//! Shared types for the traction force microscopy pipeline.
//!
//! Every 2D array in the pipeline is an [`ndarray::Array2`] indexed
//! `[row, col]`. Geometric coordinates use `x = col` and `y = row`
//! (y points down, as in the source images), and the vector components
//! `(u, v)` of displacement and traction fields follow the same axes.

use std::fmt;

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::borders::BorderConfig;
use crate::correlation::CorrelationConfig;
use crate::fem::solver::SolverConfig;
use crate::line_tension::LineTensionConfig;
use crate::mode::{AnalysisMode, MaskRole};
use crate::traction::{SpatialFilter, SubstrateHeight, TractionConfig};

/// A 2D point in grid coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    /// Horizontal position (columns from the left edge).
    pub x: f64,
    /// Vertical position (rows from the top edge).
    pub y: f64,
}

impl Point {
    /// Create a new point.
    #[must_use]
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Squared Euclidean distance to another point.
    #[must_use]
    pub fn distance_squared(self, other: Self) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        dx.mul_add(dx, dy * dy)
    }

    /// Euclidean distance to another point.
    #[must_use]
    pub fn distance(self, other: Self) -> f64 {
        self.distance_squared(other).sqrt()
    }
}

/// An ordered sequence of points, e.g. the pixels of a cell border.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Polyline(Vec<Point>);

impl Polyline {
    /// Create a new polyline from a vector of points.
    #[must_use]
    pub const fn new(points: Vec<Point>) -> Self {
        Self(points)
    }

    /// Returns `true` if the polyline has no points.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the number of points in the polyline.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns a slice of all points.
    #[must_use]
    pub fn points(&self) -> &[Point] {
        &self.0
    }

    /// Sum of the straight segment lengths.
    #[must_use]
    pub fn length(&self) -> f64 {
        self.0.windows(2).map(|w| w[0].distance(w[1])).sum()
    }

    /// Consumes the polyline and returns the underlying vector of points.
    #[must_use]
    pub fn into_points(self) -> Vec<Point> {
        self.0
    }
}

/// Shape of a 2D grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GridShape {
    /// Number of rows (y extent).
    pub rows: usize,
    /// Number of columns (x extent).
    pub cols: usize,
}

impl GridShape {
    /// Create a new shape.
    #[must_use]
    pub const fn new(rows: usize, cols: usize) -> Self {
        Self { rows, cols }
    }

    /// Shape of an existing array.
    #[must_use]
    pub fn of<T>(array: &Array2<T>) -> Self {
        let (rows, cols) = array.dim();
        Self { rows, cols }
    }

    /// The `(rows, cols)` tuple used by `ndarray` constructors.
    #[must_use]
    pub const fn dim(self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    /// Total number of grid cells.
    #[must_use]
    pub const fn len(self) -> usize {
        self.rows * self.cols
    }

    /// Returns `true` if either extent is zero.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.rows == 0 || self.cols == 0
    }
}

impl fmt::Display for GridShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.rows, self.cols)
    }
}

/// A 2D vector field sampled on a regular grid.
///
/// Used for both deformation (pixels of the bead image) and traction
/// (Pa) fields. `pixel_size` is the grid spacing in µm, which differs
/// from the bead image pixel size because every vector summarises one
/// correlation window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorField {
    u: Array2<f64>,
    v: Array2<f64>,
    pixel_size: f64,
}

impl VectorField {
    /// Create a field from its two components.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::ShapeMismatch`] if `u` and `v` differ in
    /// shape.
    pub fn new(u: Array2<f64>, v: Array2<f64>, pixel_size: f64) -> Result<Self, PipelineError> {
        if u.dim() != v.dim() {
            return Err(PipelineError::ShapeMismatch {
                stage: Stage::Input,
                what: "vector field components",
                expected: GridShape::of(&u),
                found: GridShape::of(&v),
            });
        }
        Ok(Self { u, v, pixel_size })
    }

    /// A field of zero vectors.
    #[must_use]
    pub fn zeros(shape: GridShape, pixel_size: f64) -> Self {
        Self {
            u: Array2::zeros(shape.dim()),
            v: Array2::zeros(shape.dim()),
            pixel_size,
        }
    }

    /// The x component.
    #[must_use]
    pub const fn u(&self) -> &Array2<f64> {
        &self.u
    }

    /// The y component.
    #[must_use]
    pub const fn v(&self) -> &Array2<f64> {
        &self.v
    }

    /// Grid spacing in µm.
    #[must_use]
    pub const fn pixel_size(&self) -> f64 {
        self.pixel_size
    }

    /// Grid shape shared by both components.
    #[must_use]
    pub fn shape(&self) -> GridShape {
        GridShape::of(&self.u)
    }

    /// Per-point vector length.
    #[must_use]
    pub fn magnitude(&self) -> Array2<f64> {
        let mut out = self.u.clone();
        out.zip_mut_with(&self.v, |a, &b| *a = a.hypot(b));
        out
    }

    /// A copy with both components multiplied by `factor`.
    #[must_use]
    pub fn scaled(&self, factor: f64) -> Self {
        Self {
            u: &self.u * factor,
            v: &self.v * factor,
            pixel_size: self.pixel_size,
        }
    }

    /// Returns `true` if every component is finite.
    #[must_use]
    pub fn is_finite(&self) -> bool {
        self.u.iter().chain(self.v.iter()).all(|x| x.is_finite())
    }

    /// Consumes the field and returns `(u, v, pixel_size)`.
    #[must_use]
    pub fn into_parts(self) -> (Array2<f64>, Array2<f64>, f64) {
        (self.u, self.v, self.pixel_size)
    }
}

/// Pipeline stage, used to locate errors and warnings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stage {
    /// Input validation before any stage runs.
    Input,
    /// Deformation field estimation.
    Correlation,
    /// Fourier-transform traction cytometry.
    Traction,
    /// Strain energy and contractility.
    Energy,
    /// Nodal forces and mesh construction.
    FemDomain,
    /// Stiffness assembly and solve.
    FemSolve,
    /// Border segmentation and spline fitting.
    Borders,
    /// Stress integration along borders.
    LineTension,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Input => "input",
            Self::Correlation => "correlation",
            Self::Traction => "traction",
            Self::Energy => "energy",
            Self::FemDomain => "FEM domain",
            Self::FemSolve => "FEM solve",
            Self::Borders => "borders",
            Self::LineTension => "line tension",
        })
    }
}

/// Configuration for a full pipeline run.
///
/// Defaults reproduce the reference colony experiment: 100 px windows
/// with 60 px overlap, 0.201 µm/px, a 300 µm thick substrate with
/// E = 49 kPa and ν = 0.49.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TfmConfig {
    /// Which set of masks the run expects.
    pub mode: AnalysisMode,

    /// Bead image pixel size in µm.
    pub pixel_size: f64,

    /// Deformation field grid spacing in µm. Derived from the image and
    /// field shapes when `None`.
    pub field_pixel_size: Option<f64>,

    /// Substrate Young's modulus in Pa.
    pub youngs_modulus: f64,

    /// Substrate Poisson ratio.
    pub poisson_ratio: f64,

    /// Substrate thickness.
    pub height: SubstrateHeight,

    /// Spatial filter applied to the traction field.
    pub traction_filter: SpatialFilter,

    /// PIV window parameters and vector validation thresholds.
    pub correlation: CorrelationConfig,

    /// Poisson ratio of the cell sheet in the FEM model. Falls back to
    /// the mode default when `None`.
    pub fem_poisson_ratio: Option<f64>,

    /// Linear solver settings for the FEM stage.
    pub solver: SolverConfig,

    /// Border extraction settings.
    pub borders: BorderConfig,

    /// Line tension sampling settings.
    pub line_tension: LineTensionConfig,
}

impl TfmConfig {
    /// Default bead image pixel size (µm).
    pub const DEFAULT_PIXEL_SIZE: f64 = 0.201;
    /// Default substrate Young's modulus (Pa).
    pub const DEFAULT_YOUNGS_MODULUS: f64 = 49_000.0;
    /// Default substrate Poisson ratio.
    pub const DEFAULT_POISSON_RATIO: f64 = 0.49;
    /// Default substrate height (µm).
    pub const DEFAULT_HEIGHT: f64 = 300.0;

    /// Check every physical parameter.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfig`] naming the first
    /// offending parameter.
    pub fn validate(&self) -> Result<(), PipelineError> {
        positive("pixel_size", self.pixel_size)?;
        if let Some(ps) = self.field_pixel_size {
            positive("field_pixel_size", ps)?;
        }
        positive("youngs_modulus", self.youngs_modulus)?;
        poisson("poisson_ratio", self.poisson_ratio)?;
        if let Some(nu) = self.fem_poisson_ratio {
            poisson("fem_poisson_ratio", nu)?;
        }
        if let SubstrateHeight::Finite(h) = self.height {
            positive("height", h)?;
        }
        if let SpatialFilter::Gaussian { sigma } = self.traction_filter {
            positive("traction_filter.sigma", sigma)?;
        }
        self.correlation.validate()?;
        self.solver.validate()?;
        self.borders.validate()?;
        self.line_tension.validate()?;
        Ok(())
    }

    /// Poisson ratio used for the FEM cell sheet.
    #[must_use]
    pub fn resolved_fem_poisson_ratio(&self) -> f64 {
        self.fem_poisson_ratio
            .unwrap_or_else(|| self.mode.defaults().fem_poisson_ratio)
    }

    /// Traction solver parameters for a field with the given grid spacing.
    #[must_use]
    pub const fn traction_config(&self) -> TractionConfig {
        TractionConfig {
            image_pixel_size: self.pixel_size,
            youngs_modulus: self.youngs_modulus,
            poisson_ratio: self.poisson_ratio,
            height: self.height,
            filter: self.traction_filter,
        }
    }
}

impl Default for TfmConfig {
    fn default() -> Self {
        Self {
            mode: AnalysisMode::default(),
            pixel_size: Self::DEFAULT_PIXEL_SIZE,
            field_pixel_size: None,
            youngs_modulus: Self::DEFAULT_YOUNGS_MODULUS,
            poisson_ratio: Self::DEFAULT_POISSON_RATIO,
            height: SubstrateHeight::Finite(Self::DEFAULT_HEIGHT),
            traction_filter: SpatialFilter::default(),
            correlation: CorrelationConfig::default(),
            fem_poisson_ratio: None,
            solver: SolverConfig::default(),
            borders: BorderConfig::default(),
            line_tension: LineTensionConfig::default(),
        }
    }
}

fn positive(name: &str, value: f64) -> Result<(), PipelineError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(PipelineError::InvalidConfig(format!(
            "{name} must be a positive finite number, got {value}"
        )))
    }
}

fn poisson(name: &str, value: f64) -> Result<(), PipelineError> {
    if (0.0..=0.5).contains(&value) {
        Ok(())
    } else {
        Err(PipelineError::InvalidConfig(format!(
            "{name} must be within [0, 0.5], got {value}"
        )))
    }
}

/// Errors that can occur during pipeline processing.
#[derive(Debug, Clone, PartialEq, thiserror::Error, Serialize)]
pub enum PipelineError {
    /// Two inputs that must share a grid do not.
    #[error("{stage}: {what} has shape {found}, expected {expected}")]
    ShapeMismatch {
        /// Stage that detected the mismatch.
        stage: Stage,
        /// Which input was checked.
        what: &'static str,
        /// Required shape.
        expected: GridShape,
        /// Actual shape.
        found: GridShape,
    },

    /// A mask contains no pixels.
    #[error("the {role} mask is empty")]
    EmptyMask {
        /// Role of the offending mask.
        role: MaskRole,
    },

    /// A mask consists of more than one connected region.
    #[error("the {role} mask has {regions} separate regions, expected one")]
    FragmentedMask {
        /// Role of the offending mask.
        role: MaskRole,
        /// Number of 8-connected regions found.
        regions: usize,
    },

    /// A mask required by the analysis mode was not supplied.
    #[error("no {role} mask was supplied")]
    MissingInput {
        /// Role of the missing mask.
        role: MaskRole,
    },

    /// Pipeline configuration is invalid.
    #[error("invalid pipeline configuration: {0}")]
    InvalidConfig(String),

    /// The FEM stiffness matrix could not be factorized.
    #[error("singular stiffness matrix: {0}")]
    SingularStiffness(String),

    /// A numerical step produced non-finite or inaccurate values.
    #[error("{stage}: numerical instability: {detail}")]
    NumericalInstability {
        /// Stage that failed.
        stage: Stage,
        /// What went wrong.
        detail: String,
    },

    /// The border mask contains no usable border segments.
    #[error("no cell borders found in the border mask")]
    NoBorders,
}

/// Non-fatal conditions collected while the pipeline runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PipelineWarning {
    /// Vectors whose correlation peak was too weak and were replaced.
    LowSignalVectors {
        /// Number of replaced vectors.
        count: usize,
    },
    /// Vectors flagged as statistical outliers and replaced.
    OutlierVectors {
        /// Number of replaced vectors.
        count: usize,
    },
    /// Relative residual of the FEM solve was larger than expected.
    ResidualImbalance {
        /// `|K u - f| / |f|` after the solve.
        relative_residual: f64,
    },
    /// The cell borders form several unconnected networks.
    SeparateBorderNetworks {
        /// Number of networks.
        count: usize,
    },
    /// The available masks matched neither analysis mode.
    UndeterminedMode {
        /// Mode that was used instead.
        fallback: AnalysisMode,
    },
    /// A frame had an unexpected number of input files.
    UnexpectedFileCount {
        /// Frame identifier.
        frame: String,
        /// Files found.
        found: usize,
        /// Files expected.
        expected: usize,
    },
}

impl fmt::Display for PipelineWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LowSignalVectors { count } => {
                write!(f, "{count} vectors with weak correlation peaks were replaced")
            }
            Self::OutlierVectors { count } => {
                write!(f, "{count} outlier vectors were replaced")
            }
            Self::ResidualImbalance { relative_residual } => {
                write!(f, "FEM relative residual is {relative_residual:.3e}")
            }
            Self::SeparateBorderNetworks { count } => {
                write!(f, "cell borders form {count} separate networks")
            }
            Self::UndeterminedMode { fallback } => {
                write!(f, "failed to guess analysis mode, using {fallback}")
            }
            Self::UnexpectedFileCount {
                frame,
                found,
                expected,
            } => write!(
                f,
                "found {found} files for frame {frame}, expected {expected}"
            ),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use ndarray::array;

    use super::*;

    #[test]
    fn point_distance() {
        let a = Point::new(0.0, 0.0);
        let b = Point::new(3.0, 4.0);
        assert!((a.distance(b) - 5.0).abs() < f64::EPSILON);
        assert!((a.distance_squared(b) - 25.0).abs() < f64::EPSILON);
    }

    #[test]
    fn polyline_length_sums_segments() {
        let pl = Polyline::new(vec![
            Point::new(0.0, 0.0),
            Point::new(3.0, 4.0),
            Point::new(3.0, 6.0),
        ]);
        assert_eq!(pl.len(), 3);
        assert!((pl.length() - 7.0).abs() < 1e-12);
    }

    #[test]
    fn vector_field_rejects_mismatched_components() {
        let err = VectorField::new(Array2::zeros((3, 4)), Array2::zeros((4, 3)), 1.0).unwrap_err();
        assert!(matches!(err, PipelineError::ShapeMismatch { .. }));
    }

    #[test]
    fn vector_field_magnitude_and_scaling() {
        let field = VectorField::new(array![[3.0, 0.0]], array![[4.0, -2.0]], 0.5).unwrap();
        let mag = field.magnitude();
        assert!((mag[[0, 0]] - 5.0).abs() < 1e-12);
        assert!((mag[[0, 1]] - 2.0).abs() < 1e-12);
        let doubled = field.scaled(2.0);
        assert!((doubled.v()[[0, 1]] + 4.0).abs() < 1e-12);
        assert!((doubled.pixel_size() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn config_defaults_match_reference_experiment() {
        let config = TfmConfig::default();
        assert!((config.pixel_size - 0.201).abs() < f64::EPSILON);
        assert!((config.youngs_modulus - 49_000.0).abs() < f64::EPSILON);
        assert!((config.poisson_ratio - 0.49).abs() < f64::EPSILON);
        assert_eq!(config.height, SubstrateHeight::Finite(300.0));
        assert_eq!(config.correlation.window_size, 100);
        assert_eq!(config.correlation.overlap, 60);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn config_rejects_bad_poisson_ratio() {
        let config = TfmConfig {
            poisson_ratio: 0.7,
            ..TfmConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(PipelineError::InvalidConfig(msg)) if msg.contains("poisson_ratio")
        ));
    }

    #[test]
    fn config_rejects_non_positive_height() {
        let config = TfmConfig {
            height: SubstrateHeight::Finite(0.0),
            ..TfmConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn config_serde_round_trip() {
        let config = TfmConfig {
            height: SubstrateHeight::Infinite,
            fem_poisson_ratio: Some(0.3),
            ..TfmConfig::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        let back: TfmConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config, back);
    }

    #[test]
    fn error_display_names_stage_and_role() {
        let err = PipelineError::FragmentedMask {
            role: MaskRole::FemDomain,
            regions: 3,
        };
        assert_eq!(
            err.to_string(),
            "the FEM domain mask has 3 separate regions, expected one"
        );
        let err = PipelineError::NumericalInstability {
            stage: Stage::Traction,
            detail: "NaN".to_string(),
        };
        assert_eq!(err.to_string(), "traction: numerical instability: NaN");
    }

    #[test]
    fn warning_display() {
        let w = PipelineWarning::UnexpectedFileCount {
            frame: "04".to_string(),
            found: 2,
            expected: 3,
        };
        assert_eq!(w.to_string(), "found 2 files for frame 04, expected 3");
    }
}
