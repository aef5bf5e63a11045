//! Monolayer stress microscopy: a 2D finite element model of the cell
//! sheet, loaded with the reaction of the traction forces.
//!
//! [`domain`] turns a traction field and an FEM area mask into a mesh of
//! bilinear quadrilaterals with balanced nodal loads. [`solver`]
//! assembles the sparse stiffness matrix, solves for nodal
//! displacements and recovers the stress tensor on the field grid.

pub mod domain;
pub mod solver;

use ndarray::{Array2, Zip};
use serde::{Deserialize, Serialize};

use crate::mask::Mask;
use crate::types::{GridShape, PipelineError, Point, Stage};

/// A mesh node, placed on a grid point of the field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Position in grid units (`x = col`, `y = row`).
    pub position: Point,
    /// Grid point `(row, col)` the node sits on.
    pub grid: (usize, usize),
    /// Applied force `[fx, fy]` in N.
    pub load: [f64; 2],
    /// Whether the x and y displacement are held at zero.
    pub fixed: [bool; 2],
}

/// A 4-node bilinear quadrilateral.
///
/// Node order is `(r, c)`, `(r, c+1)`, `(r+1, c+1)`, `(r+1, c)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Element {
    /// Indices into [`Mesh::nodes`].
    pub nodes: [usize; 4],
    /// Index into [`Mesh::materials`].
    pub material: usize,
}

/// Linear elastic material of the cell sheet.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Material {
    /// Young's modulus (arbitrary units; stresses do not depend on it).
    pub youngs_modulus: f64,
    /// Poisson ratio.
    pub poisson_ratio: f64,
}

/// Finite element model of the cell sheet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mesh {
    /// Nodes, each on a distinct grid point.
    pub nodes: Vec<Node>,
    /// Elements referencing `nodes` and `materials`.
    pub elements: Vec<Element>,
    /// Materials referenced by `elements`.
    pub materials: Vec<Material>,
    /// Shape of the grid the nodes live on.
    pub shape: GridShape,
}

impl Mesh {
    /// Sum of all nodal loads.
    #[must_use]
    pub fn net_load(&self) -> [f64; 2] {
        self.nodes.iter().fold([0.0, 0.0], |acc, n| {
            [acc[0] + n.load[0], acc[1] + n.load[1]]
        })
    }

    /// Torque of the nodal loads about the node centroid.
    #[must_use]
    pub fn net_torque(&self) -> f64 {
        let positions: Vec<Point> = self.nodes.iter().map(|n| n.position).collect();
        let loads: Vec<[f64; 2]> = self.nodes.iter().map(|n| n.load).collect();
        domain::net_torque(&positions, &loads)
    }

    /// Returns `true` if any displacement component is constrained.
    #[must_use]
    pub fn has_fixed_dofs(&self) -> bool {
        self.nodes.iter().any(|n| n.fixed[0] || n.fixed[1])
    }
}

/// Cauchy stress tensor on the field grid, in N per grid unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StressField {
    /// Normal stress along x.
    pub sxx: Array2<f64>,
    /// Normal stress along y.
    pub syy: Array2<f64>,
    /// Shear stress.
    pub sxy: Array2<f64>,
    /// Grid points covered by the mesh; stresses are zero elsewhere.
    pub domain: Mask,
}

impl StressField {
    /// Grid shape.
    #[must_use]
    pub fn shape(&self) -> GridShape {
        GridShape::of(&self.sxx)
    }

    /// Stress tensor `[[sxx, sxy], [sxy, syy]]` at grid position
    /// `(x, y)` by bilinear interpolation. Positions outside the grid
    /// are clamped to its edge.
    #[must_use]
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    pub fn tensor_at(&self, x: f64, y: f64) -> [[f64; 2]; 2] {
        let shape = self.shape();
        if shape.is_empty() {
            return [[0.0; 2]; 2];
        }
        let x = x.clamp(0.0, (shape.cols - 1) as f64);
        let y = y.clamp(0.0, (shape.rows - 1) as f64);
        let (c0, r0) = (x.floor() as usize, y.floor() as usize);
        let (c1, r1) = ((c0 + 1).min(shape.cols - 1), (r0 + 1).min(shape.rows - 1));
        let (fx, fy) = (x - c0 as f64, y - r0 as f64);
        let sample = |a: &Array2<f64>| {
            let top = a[[r0, c0]].mul_add(1.0 - fx, a[[r0, c1]] * fx);
            let bottom = a[[r1, c0]].mul_add(1.0 - fx, a[[r1, c1]] * fx);
            top.mul_add(1.0 - fy, bottom * fy)
        };
        let (sxx, syy, sxy) = (sample(&self.sxx), sample(&self.syy), sample(&self.sxy));
        [[sxx, sxy], [sxy, syy]]
    }
}

/// Mean normal stress `(σxx + σyy) / 2` in N/m.
///
/// FEM stresses are in N per grid unit; dividing by the grid spacing in
/// m converts them.
#[must_use]
pub fn mean_normal_stress_map(stress: &StressField, field_pixel_size: f64) -> Array2<f64> {
    let scale = 0.5 / (field_pixel_size * crate::energy::MICRONS);
    let mut out = Array2::zeros(stress.sxx.dim());
    Zip::from(&mut out)
        .and(&stress.sxx)
        .and(&stress.syy)
        .for_each(|o, &a, &b| *o = (a + b) * scale);
    out
}

/// Summary statistics of a scalar map over a mask.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StressStatistics {
    /// Mean value.
    pub mean: f64,
    /// Population standard deviation.
    pub std: f64,
    /// Coefficient of variation `std / |mean|`.
    pub cv: f64,
}

impl StressStatistics {
    /// Statistics of the finite values of `map` inside `mask`.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::ShapeMismatch`] if the mask is not on
    /// the map grid and [`PipelineError::EmptyMask`] if no finite value
    /// lies inside it.
    pub fn over(map: &Array2<f64>, mask: &Mask) -> Result<Self, PipelineError> {
        mask.expect_shape(GridShape::of(map), Stage::FemSolve, "cell area mask")?;
        let values: Vec<f64> = map
            .iter()
            .zip(mask.data())
            .filter(|&(v, &m)| m && v.is_finite())
            .map(|(&v, _)| v)
            .collect();
        if values.is_empty() {
            return Err(PipelineError::EmptyMask {
                role: crate::mode::MaskRole::CellArea,
            });
        }
        #[allow(clippy::cast_precision_loss)]
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let std = (values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n).sqrt();
        Ok(Self {
            mean,
            std,
            cv: std / mean.abs(),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn field(f: impl Fn(usize, usize) -> f64) -> Array2<f64> {
        Array2::from_shape_fn((3, 4), |(r, c)| f(r, c))
    }

    #[test]
    fn tensor_interpolates_bilinearly() {
        let stress = StressField {
            sxx: field(|_, c| c as f64),
            syy: field(|r, _| 2.0 * r as f64),
            sxy: field(|r, c| (r * c) as f64),
            domain: Mask::full(GridShape::new(3, 4)),
        };
        let t = stress.tensor_at(1.5, 0.5);
        assert!((t[0][0] - 1.5).abs() < 1e-12);
        assert!((t[1][1] - 1.0).abs() < 1e-12);
        assert!((t[0][1] - 0.75).abs() < 1e-12);
        assert!((t[0][1] - t[1][0]).abs() < f64::EPSILON);
        let clamped = stress.tensor_at(10.0, -3.0);
        assert!((clamped[0][0] - 3.0).abs() < 1e-12);
        assert!(clamped[1][1].abs() < 1e-12);
    }

    #[test]
    fn mean_normal_stress_units() {
        let stress = StressField {
            sxx: field(|_, _| 2e-9),
            syy: field(|_, _| 4e-9),
            sxy: field(|_, _| 0.0),
            domain: Mask::full(GridShape::new(3, 4)),
        };
        let map = mean_normal_stress_map(&stress, 2.0);
        // 3e-9 N per 2 µm grid unit.
        for &v in &map {
            assert!((v - 1.5e-3).abs() < 1e-15);
        }
    }

    #[test]
    fn statistics_over_mask() {
        let map = field(|r, c| if r == 0 { c as f64 } else { 100.0 });
        let mask = Mask::new(Array2::from_shape_fn((3, 4), |(r, _)| r == 0));
        let stats = StressStatistics::over(&map, &mask).unwrap();
        assert!((stats.mean - 1.5).abs() < 1e-12);
        assert!((stats.std - 1.25f64.sqrt()).abs() < 1e-12);
        assert!((stats.cv - 1.25f64.sqrt() / 1.5).abs() < 1e-12);
    }

    #[test]
    fn statistics_reject_empty_mask() {
        let map = field(|_, _| 1.0);
        let mask = Mask::new(Array2::from_elem((3, 4), false));
        assert!(StressStatistics::over(&map, &mask).is_err());
    }
}
