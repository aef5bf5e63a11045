//! Nodal forces and mesh construction for the FEM stage.

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use super::{Element, Material, Mesh, Node};
use crate::energy::cell_area;
use crate::mask::Mask;
use crate::mode::MaskRole;
use crate::types::{GridShape, PipelineError, Point, Stage, VectorField};

/// Force per grid point in N, zero outside the FEM domain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodalForces {
    /// x component.
    pub fx: Array2<f64>,
    /// y component.
    pub fy: Array2<f64>,
}

/// Convert tractions inside `mask` to forces and remove their net force
/// and torque.
///
/// # Errors
///
/// Returns [`PipelineError::ShapeMismatch`] if the mask is not on the
/// traction grid and [`PipelineError::EmptyMask`] if it is empty.
pub fn prepare_forces(traction: &VectorField, mask: &Mask) -> Result<NodalForces, PipelineError> {
    mask.expect_shape(traction.shape(), Stage::FemDomain, "FEM domain mask")?;
    if mask.is_empty() {
        return Err(PipelineError::EmptyMask {
            role: MaskRole::FemDomain,
        });
    }
    let area = cell_area(traction.pixel_size());
    let cells: Vec<(usize, usize)> = mask
        .data()
        .indexed_iter()
        .filter(|&(_, &m)| m)
        .map(|(ix, _)| ix)
        .collect();
    let positions = grid_points(&cells);
    let mut loads: Vec<[f64; 2]> = cells
        .iter()
        .map(|&ix| [traction.u()[ix] * area, traction.v()[ix] * area])
        .collect();
    correct_forces(&positions, &mut loads);

    let dim = traction.shape().dim();
    let mut fx = Array2::zeros(dim);
    let mut fy = Array2::zeros(dim);
    for (&ix, load) in cells.iter().zip(&loads) {
        fx[ix] = load[0];
        fy[ix] = load[1];
    }
    Ok(NodalForces { fx, fy })
}

#[allow(clippy::cast_precision_loss)]
fn grid_points(cells: &[(usize, usize)]) -> Vec<Point> {
    cells
        .iter()
        .map(|&(r, c)| Point::new(c as f64, r as f64))
        .collect()
}

#[allow(clippy::cast_precision_loss)]
fn centroid(positions: &[Point]) -> Point {
    let n = positions.len().max(1) as f64;
    let (sx, sy) = positions
        .iter()
        .fold((0.0, 0.0), |(sx, sy), p| (sx + p.x, sy + p.y));
    Point::new(sx / n, sy / n)
}

/// Sum of a set of forces.
#[must_use]
pub fn net_force(loads: &[[f64; 2]]) -> [f64; 2] {
    loads
        .iter()
        .fold([0.0, 0.0], |acc, f| [acc[0] + f[0], acc[1] + f[1]])
}

/// Torque `Σ (rx fy − ry fx)` about the centroid of `positions`.
#[must_use]
pub fn net_torque(positions: &[Point], loads: &[[f64; 2]]) -> f64 {
    let center = centroid(positions);
    positions
        .iter()
        .zip(loads)
        .map(|(p, f)| (p.x - center.x).mul_add(f[1], -(p.y - center.y) * f[0]))
        .sum()
}

/// Remove the net force and torque of point forces.
///
/// The mean force is subtracted from every point. The torque `M` about
/// the centroid is then cancelled by adding the rigid rotation field
/// `α (−ry, rx)` with `α = −M / Σ r²`, which has no net force.
pub fn correct_forces(positions: &[Point], loads: &mut [[f64; 2]]) {
    if loads.is_empty() {
        return;
    }
    #[allow(clippy::cast_precision_loss)]
    let n = loads.len() as f64;
    let [sx, sy] = net_force(loads);
    for f in loads.iter_mut() {
        f[0] -= sx / n;
        f[1] -= sy / n;
    }

    let center = centroid(positions);
    let torque = net_torque(positions, loads);
    let r2: f64 = positions
        .iter()
        .map(|p| (p.x - center.x).powi(2) + (p.y - center.y).powi(2))
        .sum();
    if r2 == 0.0 {
        return;
    }
    let alpha = -torque / r2;
    for (p, f) in positions.iter().zip(loads.iter_mut()) {
        f[0] -= alpha * (p.y - center.y);
        f[1] += alpha * (p.x - center.x);
    }
}

/// Material of the cell sheet.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MeshConfig {
    /// Young's modulus; stresses are independent of it.
    pub youngs_modulus: f64,
    /// Poisson ratio of the sheet.
    pub poisson_ratio: f64,
}

impl MeshConfig {
    /// Default sheet Young's modulus.
    pub const DEFAULT_YOUNGS_MODULUS: f64 = 1.0;

    /// A sheet with unit modulus and the given Poisson ratio.
    #[must_use]
    pub const fn with_poisson_ratio(poisson_ratio: f64) -> Self {
        Self {
            youngs_modulus: Self::DEFAULT_YOUNGS_MODULUS,
            poisson_ratio,
        }
    }
}

/// Build a mesh over `domain` loaded with `(fx, fy)`.
///
/// Every set grid point becomes a node and every fully set 2×2 block an
/// element. Nodes not used by any element are dropped, and the loads of
/// the remaining nodes are balanced again.
///
/// # Errors
///
/// Returns [`PipelineError::ShapeMismatch`] if the inputs differ in
/// shape, [`PipelineError::EmptyMask`] if the domain is empty or holds no
/// element, and [`PipelineError::FragmentedMask`] if it has several
/// regions.
pub fn build_mesh(
    domain: &Mask,
    fx: &Array2<f64>,
    fy: &Array2<f64>,
    config: &MeshConfig,
) -> Result<Mesh, PipelineError> {
    let shape = domain.shape();
    for (what, load) in [("x forces", fx), ("y forces", fy)] {
        let found = GridShape::of(load);
        if found != shape {
            return Err(PipelineError::ShapeMismatch {
                stage: Stage::FemDomain,
                what,
                expected: shape,
                found,
            });
        }
    }
    let domain = domain.validate(MaskRole::FemDomain)?;
    let data = domain.data();

    let (rows, cols) = shape.dim();
    let mut corners: Vec<[(usize, usize); 4]> = Vec::new();
    for r in 0..rows.saturating_sub(1) {
        for c in 0..cols.saturating_sub(1) {
            let block = [(r, c), (r, c + 1), (r + 1, c + 1), (r + 1, c)];
            if block.iter().all(|&ix| data[ix]) {
                corners.push(block);
            }
        }
    }
    if corners.is_empty() {
        return Err(PipelineError::EmptyMask {
            role: MaskRole::FemDomain,
        });
    }

    let mut index: Array2<Option<usize>> = Array2::from_elem(shape.dim(), None);
    let mut nodes = Vec::new();
    let mut elements = Vec::with_capacity(corners.len());
    for block in &corners {
        let ids = block.map(|ix| {
            *index[ix].get_or_insert_with(|| {
                nodes.push(ix);
                nodes.len() - 1
            })
        });
        elements.push(Element {
            nodes: ids,
            material: 0,
        });
    }

    let positions = grid_points(&nodes);
    let mut loads: Vec<[f64; 2]> = nodes.iter().map(|&ix| [fx[ix], fy[ix]]).collect();
    let dropped = domain.count() - nodes.len();
    correct_forces(&positions, &mut loads);

    let nodes: Vec<Node> = nodes
        .iter()
        .zip(positions)
        .zip(loads)
        .map(|((&grid, position), load)| Node {
            position,
            grid,
            load,
            fixed: [false, false],
        })
        .collect();

    tracing::debug!(
        nodes = nodes.len(),
        elements = elements.len(),
        dropped,
        "FEM mesh built"
    );
    Ok(Mesh {
        nodes,
        elements,
        materials: vec![Material {
            youngs_modulus: config.youngs_modulus,
            poisson_ratio: config.poisson_ratio,
        }],
        shape,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn mask_from(rows: &[&str]) -> Mask {
        Mask::new(Array2::from_shape_fn(
            (rows.len(), rows[0].len()),
            |(r, c)| rows[r].as_bytes()[c] == b'#',
        ))
    }

    #[test]
    fn corrected_forces_are_balanced() {
        let positions: Vec<Point> = (0..12)
            .map(|i| Point::new(f64::from(i % 4), f64::from(i / 4)))
            .collect();
        let mut loads: Vec<[f64; 2]> = (0..12)
            .map(|i| [f64::from(i).sin(), f64::from(i * 3).cos() + 0.5])
            .collect();
        correct_forces(&positions, &mut loads);
        let [sx, sy] = net_force(&loads);
        assert!(sx.abs() < 1e-12 && sy.abs() < 1e-12);
        assert!(net_torque(&positions, &loads).abs() < 1e-12);
    }

    #[test]
    fn balanced_forces_are_unchanged() {
        let positions = vec![Point::new(0.0, 0.0), Point::new(2.0, 0.0)];
        let mut loads = vec![[-1.0, 0.0], [1.0, 0.0]];
        correct_forces(&positions, &mut loads);
        assert_eq!(loads, vec![[-1.0, 0.0], [1.0, 0.0]]);
    }

    #[test]
    fn prepare_forces_scales_by_cell_area() {
        let traction = VectorField::new(
            Array2::from_shape_fn((3, 3), |(_, c)| c as f64 - 1.0),
            Array2::zeros((3, 3)),
            2.0,
        )
        .unwrap();
        let mask = Mask::full(GridShape::new(3, 3));
        let forces = prepare_forces(&traction, &mask).unwrap();
        // The field is already balanced, so only the unit changes.
        assert!((forces.fx[[1, 2]] - 4e-12).abs() < 1e-24);
        assert!((forces.fx[[1, 0]] + 4e-12).abs() < 1e-24);
    }

    #[test]
    fn prepare_forces_zeroes_outside_mask() {
        let traction = VectorField::new(
            Array2::from_elem((3, 3), 5.0),
            Array2::from_elem((3, 3), 1.0),
            1.0,
        )
        .unwrap();
        let mask = mask_from(&["##.", "##.", "..."]);
        let forces = prepare_forces(&traction, &mask).unwrap();
        assert!(forces.fx[[2, 2]].abs() < f64::EPSILON);
        // Uniform forces are removed entirely.
        assert!(forces.fx.iter().all(|f| f.abs() < 1e-20));
    }

    #[test]
    fn mesh_has_one_element_per_full_block() {
        let mask = mask_from(&[
            "###.", //
            "###.", //
            "##..",
        ]);
        let zeros = Array2::zeros((3, 4));
        let mesh = build_mesh(&mask, &zeros, &zeros, &MeshConfig::with_poisson_ratio(0.5)).unwrap();
        assert_eq!(mesh.elements.len(), 3);
        assert_eq!(mesh.nodes.len(), 8);
        let first = mesh.elements[0];
        let grids: Vec<(usize, usize)> = first.nodes.iter().map(|&i| mesh.nodes[i].grid).collect();
        assert_eq!(grids, vec![(0, 0), (0, 1), (1, 1), (1, 0)]);
        assert!((mesh.materials[0].poisson_ratio - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn mesh_drops_nodes_without_elements_and_rebalances() {
        let mask = mask_from(&[
            "###", //
            "###", //
            "#..",
        ]);
        let mut fx = Array2::zeros((3, 3));
        fx[[2, 0]] = 1.0;
        fx[[0, 0]] = -1.0;
        let fy = Array2::zeros((3, 3));
        let mesh = build_mesh(&mask, &fx, &fy, &MeshConfig::with_poisson_ratio(0.3)).unwrap();
        assert_eq!(mesh.nodes.len(), 6);
        assert!(mesh.nodes.iter().all(|n| n.grid != (2, 0)));
        let [sx, sy] = mesh.net_load();
        assert!(sx.abs() < 1e-12 && sy.abs() < 1e-12);
        assert!(mesh.net_torque().abs() < 1e-12);
    }

    #[test]
    fn mesh_rejects_bad_domains() {
        let zeros = Array2::zeros((3, 3));
        let config = MeshConfig::with_poisson_ratio(0.5);
        let line = mask_from(&["###", "...", "..."]);
        assert_eq!(
            build_mesh(&line, &zeros, &zeros, &config),
            Err(PipelineError::EmptyMask {
                role: MaskRole::FemDomain
            })
        );
        let split = mask_from(&["#.#", "#.#", "..."]);
        assert!(matches!(
            build_mesh(&split, &zeros, &zeros, &config),
            Err(PipelineError::FragmentedMask { regions: 2, .. })
        ));
        assert!(matches!(
            build_mesh(&line, &Array2::zeros((2, 3)), &zeros, &config),
            Err(PipelineError::ShapeMismatch { .. })
        ));
    }
}
