//! Strain energy and contractility of a traction field.
//!
//! Lengths arrive in µm (pixel sizes) and pixels (displacements), and
//! tractions in Pa; results are in J and N.

use ndarray::{Array2, Zip};
use serde::{Deserialize, Serialize};

use crate::mask::Mask;
use crate::types::{GridShape, PipelineError, Point, Stage, VectorField};

/// µm → m.
pub(crate) const MICRONS: f64 = 1e-6;

/// Area of one grid cell of the field in m².
#[must_use]
pub fn cell_area(field_pixel_size: f64) -> f64 {
    (field_pixel_size * MICRONS).powi(2)
}

fn same_shape(
    expected: GridShape,
    found: GridShape,
    what: &'static str,
) -> Result<(), PipelineError> {
    if expected == found {
        Ok(())
    } else {
        Err(PipelineError::ShapeMismatch {
            stage: Stage::Energy,
            what,
            expected,
            found,
        })
    }
}

/// Strain energy in J stored under every grid point:
/// `½ · A · (tx·u + ty·v) · ps1`, with `A` the grid cell area in m² and
/// the displacement converted from bead image pixels to m.
///
/// # Errors
///
/// Returns [`PipelineError::ShapeMismatch`] if the fields differ in shape.
pub fn strain_energy_points(
    deformation: &VectorField,
    traction: &VectorField,
    image_pixel_size: f64,
) -> Result<Array2<f64>, PipelineError> {
    same_shape(deformation.shape(), traction.shape(), "traction field")?;
    let factor = 0.5 * cell_area(traction.pixel_size()) * image_pixel_size * MICRONS;
    let mut energy = Array2::zeros(deformation.shape().dim());
    Zip::from(&mut energy)
        .and(deformation.u())
        .and(deformation.v())
        .and(traction.u())
        .and(traction.v())
        .for_each(|e, &u, &v, &tx, &ty| *e = factor * tx.mul_add(u, ty * v));
    Ok(energy)
}

/// Total strain energy in J over the set cells of `mask`.
///
/// # Errors
///
/// Returns [`PipelineError::ShapeMismatch`] if the mask is not on the
/// field grid.
pub fn strain_energy(points: &Array2<f64>, mask: &Mask) -> Result<f64, PipelineError> {
    same_shape(GridShape::of(points), mask.shape(), "force measurement mask")?;
    Ok(points
        .iter()
        .zip(mask.data())
        .filter(|&(_, &m)| m)
        .map(|(e, _)| e)
        .sum())
}

/// Net contractile force of a traction field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contractility {
    /// Sum of the force components pointing at `center`, in N.
    pub force: f64,
    /// x component of the unit vectors from each grid point to `center`.
    pub projection_x: Array2<f64>,
    /// y component of the unit vectors from each grid point to `center`.
    pub projection_y: Array2<f64>,
    /// Traction-magnitude-weighted centroid of the masked area.
    pub center: Point,
}

/// Contractility of the tractions inside `mask`.
///
/// Forces are `traction · A` with `A` the grid cell area in m². Every
/// force is projected onto the unit vector pointing from its grid point
/// to the force center; the projections are summed.
///
/// # Errors
///
/// Returns [`PipelineError::ShapeMismatch`] if the mask is not on the
/// field grid and [`PipelineError::EmptyMask`] if it is empty.
#[allow(clippy::cast_precision_loss)]
pub fn contractility(traction: &VectorField, mask: &Mask) -> Result<Contractility, PipelineError> {
    same_shape(traction.shape(), mask.shape(), "force measurement mask")?;
    if mask.is_empty() {
        return Err(PipelineError::EmptyMask {
            role: crate::mode::MaskRole::ForceMeasurement,
        });
    }
    let area = cell_area(traction.pixel_size());
    let (tx, ty) = (traction.u(), traction.v());

    let mut weight = 0.0;
    let mut sum_x = 0.0;
    let mut sum_y = 0.0;
    let mut cells = 0.0;
    let mut plain_x = 0.0;
    let mut plain_y = 0.0;
    for ((r, c), _) in mask.data().indexed_iter().filter(|&(_, &m)| m) {
        let w = tx[[r, c]].hypot(ty[[r, c]]) * area;
        weight += w;
        sum_x += w * c as f64;
        sum_y += w * r as f64;
        cells += 1.0;
        plain_x += c as f64;
        plain_y += r as f64;
    }
    let center = if weight > 0.0 {
        Point::new(sum_x / weight, sum_y / weight)
    } else {
        Point::new(plain_x / cells, plain_y / cells)
    };

    let dim = traction.shape().dim();
    let mut projection_x = Array2::zeros(dim);
    let mut projection_y = Array2::zeros(dim);
    for ((r, c), px) in projection_x.indexed_iter_mut() {
        let dx = center.x - c as f64;
        let dy = center.y - r as f64;
        let d = dx.hypot(dy);
        if d > 0.0 {
            *px = dx / d;
            projection_y[[r, c]] = dy / d;
        }
    }

    let mut force = 0.0;
    for ((r, c), _) in mask.data().indexed_iter().filter(|&(_, &m)| m) {
        force += projection_x[[r, c]].mul_add(tx[[r, c]], projection_y[[r, c]] * ty[[r, c]]) * area;
    }

    tracing::debug!(force, center_x = center.x, center_y = center.y, "contractility");
    Ok(Contractility {
        force,
        projection_x,
        projection_y,
        center,
    })
}
