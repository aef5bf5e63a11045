//! Stiffness assembly, linear solve and stress recovery.
//!
//! Elements are 4-node bilinear quadrilaterals in plane stress with unit
//! thickness, integrated with 2×2 Gauss quadrature. The global stiffness
//! matrix is assembled in triplet form and converted to compressed
//! columns before solving.

use std::collections::BTreeMap;

use nalgebra::{DMatrix, DVector, Matrix2, SMatrix, Vector2, matrix};
use nalgebra_sparse::factorization::CscCholesky;
use nalgebra_sparse::{CooMatrix, CscMatrix};
use ndarray::Array2;
use petgraph::unionfind::UnionFind;
use serde::{Deserialize, Serialize};

use super::{Element, Material, Mesh, Node, StressField};
use crate::mask::Mask;
use crate::types::{PipelineError, Point, Stage};

/// Degrees of freedom per node.
pub const DOF: usize = 2;

/// Natural coordinates of the element corners, in node order.
const CORNERS: [(f64, f64); 4] = [(-1.0, -1.0), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)];

/// Linear solver used for the reduced stiffness system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LinearSolverKind {
    /// Sparse Cholesky factorization.
    #[default]
    Cholesky,
    /// Jacobi-preconditioned conjugate gradient.
    ConjugateGradient,
}

/// Linear solver settings and residual thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    /// Which linear solver to use.
    pub kind: LinearSolverKind,
    /// Relative residual at which conjugate gradient stops.
    pub tolerance: f64,
    /// Iteration cap for conjugate gradient.
    pub max_iterations: usize,
    /// Relative residual above which a warning is reported.
    pub residual_warning: f64,
    /// Relative residual above which the solve fails.
    pub residual_limit: f64,
}

impl SolverConfig {
    /// Default conjugate gradient tolerance.
    pub const DEFAULT_TOLERANCE: f64 = 1e-10;
    /// Default conjugate gradient iteration cap.
    pub const DEFAULT_MAX_ITERATIONS: usize = 20_000;
    /// Default residual warning threshold.
    pub const DEFAULT_RESIDUAL_WARNING: f64 = 1e-6;
    /// Default residual failure threshold.
    pub const DEFAULT_RESIDUAL_LIMIT: f64 = 1e-2;

    /// Check the thresholds.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfig`] for non-positive
    /// thresholds or a zero iteration cap.
    pub fn validate(&self) -> Result<(), PipelineError> {
        for (name, value) in [
            ("solver.tolerance", self.tolerance),
            ("solver.residual_warning", self.residual_warning),
            ("solver.residual_limit", self.residual_limit),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return Err(PipelineError::InvalidConfig(format!(
                    "{name} must be positive, got {value}"
                )));
            }
        }
        if self.max_iterations == 0 {
            return Err(PipelineError::InvalidConfig(
                "solver.max_iterations must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            kind: LinearSolverKind::default(),
            tolerance: Self::DEFAULT_TOLERANCE,
            max_iterations: Self::DEFAULT_MAX_ITERATIONS,
            residual_warning: Self::DEFAULT_RESIDUAL_WARNING,
            residual_limit: Self::DEFAULT_RESIDUAL_LIMIT,
        }
    }
}

/// Result of a FEM solve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FemSolution {
    /// Displacement `[ux, uy]` of every mesh node.
    pub displacements: Vec<[f64; 2]>,
    /// Stress tensor on the field grid.
    pub stress: StressField,
    /// Relative residual `|K u − f| / |f|` of the reduced system.
    pub residual: f64,
    /// Nodes whose displacement was constrained to remove rigid body
    /// motion, empty when the mesh carried its own constraints.
    pub pinned: Vec<usize>,
}

/// Plane stress constitutive matrix.
#[must_use]
pub fn compute_stress_strain_matrix(poisson_ratio: f64, youngs_modulus: f64) -> SMatrix<f64, 3, 3> {
    let mut stress_strain_mat: SMatrix<f64, 3, 3> = matrix![
        1.0, poisson_ratio, 0.0;
        poisson_ratio, 1.0, 0.0;
        0.0, 0.0, (1.0 - poisson_ratio) / 2.0;
    ];
    stress_strain_mat *= youngs_modulus / (1.0 - poisson_ratio.powi(2));
    stress_strain_mat
}

/// Strain-displacement matrix and Jacobian determinant at natural
/// coordinates `(xi, eta)`.
fn strain_displacement_matrix(
    coords: &[Point; 4],
    xi: f64,
    eta: f64,
) -> Option<(SMatrix<f64, 3, 8>, f64)> {
    let mut d_xi = [0.0; 4];
    let mut d_eta = [0.0; 4];
    for (i, &(xi_i, eta_i)) in CORNERS.iter().enumerate() {
        d_xi[i] = 0.25 * xi_i * eta.mul_add(eta_i, 1.0);
        d_eta[i] = 0.25 * eta_i * xi.mul_add(xi_i, 1.0);
    }
    let mut jacobian = Matrix2::zeros();
    for i in 0..4 {
        jacobian[(0, 0)] += d_xi[i] * coords[i].x;
        jacobian[(0, 1)] += d_xi[i] * coords[i].y;
        jacobian[(1, 0)] += d_eta[i] * coords[i].x;
        jacobian[(1, 1)] += d_eta[i] * coords[i].y;
    }
    let det = jacobian.determinant();
    let inverse = jacobian.try_inverse()?;

    let mut b = SMatrix::<f64, 3, 8>::zeros();
    for i in 0..4 {
        let grad = inverse * Vector2::new(d_xi[i], d_eta[i]);
        b[(0, 2 * i)] = grad.x;
        b[(1, 2 * i + 1)] = grad.y;
        b[(2, 2 * i)] = grad.y;
        b[(2, 2 * i + 1)] = grad.x;
    }
    Some((b, det))
}

/// Stiffness matrix of one element.
fn compute_element_stiffness_matrix(
    coords: &[Point; 4],
    material: &Material,
) -> Result<SMatrix<f64, 8, 8>, PipelineError> {
    let d = compute_stress_strain_matrix(material.poisson_ratio, material.youngs_modulus);
    let g = 1.0 / 3.0f64.sqrt();
    let mut stiffness = SMatrix::<f64, 8, 8>::zeros();
    for (xi, eta) in [(-g, -g), (g, -g), (g, g), (-g, g)] {
        let (b, det) = strain_displacement_matrix(coords, xi, eta)
            .filter(|&(_, det)| det > 0.0)
            .ok_or_else(|| PipelineError::NumericalInstability {
                stage: Stage::FemSolve,
                detail: "degenerate element geometry".to_string(),
            })?;
        stiffness += b.transpose() * d * b * det;
    }
    Ok(stiffness)
}

fn element_coords(element: &Element, nodes: &[Node]) -> [Point; 4] {
    element.nodes.map(|i| nodes[i].position)
}

/// Number of groups of elements connected through shared edges.
fn edge_connected_parts(mesh: &Mesh) -> usize {
    let mut parts = UnionFind::<usize>::new(mesh.elements.len());
    let mut edges: BTreeMap<(usize, usize), usize> = BTreeMap::new();
    for (e, element) in mesh.elements.iter().enumerate() {
        for k in 0..4 {
            let (a, b) = (element.nodes[k], element.nodes[(k + 1) % 4]);
            let key = (a.min(b), a.max(b));
            if let Some(&other) = edges.get(&key) {
                parts.union(e, other);
            } else {
                edges.insert(key, e);
            }
        }
    }
    let mut roots: Vec<usize> = (0..mesh.elements.len()).map(|e| parts.find(e)).collect();
    roots.sort_unstable();
    roots.dedup();
    roots.len()
}

/// Constrain the node closest to the centroid in both directions and
/// the node farthest from it in the direction most perpendicular to the
/// line joining them.
fn pin_rigid_body(nodes: &[Node]) -> (Vec<[bool; 2]>, Vec<usize>) {
    let mut fixed = vec![[false, false]; nodes.len()];
    #[allow(clippy::cast_precision_loss)]
    let n = nodes.len() as f64;
    let center = Point::new(
        nodes.iter().map(|node| node.position.x).sum::<f64>() / n,
        nodes.iter().map(|node| node.position.y).sum::<f64>() / n,
    );
    let by_distance = |from: Point| {
        move |a: &(usize, &Node), b: &(usize, &Node)| {
            a.1.position
                .distance_squared(from)
                .total_cmp(&b.1.position.distance_squared(from))
        }
    };
    let Some((anchor, anchor_node)) = nodes.iter().enumerate().min_by(by_distance(center)) else {
        return (fixed, Vec::new());
    };
    fixed[anchor] = [true, true];
    let Some((far, far_node)) = nodes
        .iter()
        .enumerate()
        .max_by(by_distance(anchor_node.position))
    else {
        return (fixed, vec![anchor]);
    };
    if far == anchor {
        return (fixed, vec![anchor]);
    }
    let dx = (far_node.position.x - anchor_node.position.x).abs();
    let dy = (far_node.position.y - anchor_node.position.y).abs();
    fixed[far][usize::from(dx >= dy)] = true;
    tracing::debug!(anchor, far, "pinned rigid body motion");
    (fixed, vec![anchor, far])
}

/// `K x` for a compressed-column matrix.
fn multiply(k: &CscMatrix<f64>, x: &DVector<f64>) -> DVector<f64> {
    let mut y = DVector::zeros(k.nrows());
    for (j, col) in k.col_iter().enumerate() {
        let xj = x[j];
        for (&i, &v) in col.row_indices().iter().zip(col.values()) {
            y[i] += v * xj;
        }
    }
    y
}

fn run_cholesky(k: &CscMatrix<f64>, f: &DVector<f64>) -> Result<DVector<f64>, PipelineError> {
    let factor = CscCholesky::factor(k)
        .map_err(|err| PipelineError::SingularStiffness(format!("{err:?}")))?;
    let rhs = DMatrix::from_column_slice(f.len(), 1, f.as_slice());
    let solution = factor.solve(&rhs);
    Ok(DVector::from_column_slice(solution.as_slice()))
}

/// Solves `K x = f` with Jacobi-preconditioned conjugate gradient.
fn run_conjugate_gradient(
    k: &CscMatrix<f64>,
    f: &DVector<f64>,
    tolerance: f64,
    max_iterations: usize,
) -> Result<DVector<f64>, PipelineError> {
    let n = f.len();
    let mut inverse_diagonal = DVector::zeros(n);
    for (j, col) in k.col_iter().enumerate() {
        for (&i, &v) in col.row_indices().iter().zip(col.values()) {
            if i == j && v > 0.0 {
                inverse_diagonal[j] = 1.0 / v;
            }
        }
    }
    if inverse_diagonal.iter().any(|&d| d == 0.0) {
        return Err(PipelineError::SingularStiffness(
            "stiffness matrix has a non-positive diagonal entry".to_string(),
        ));
    }

    let target = tolerance * f.norm();
    let mut x = DVector::zeros(n);
    if target == 0.0 {
        return Ok(x);
    }
    let mut r = f.clone();
    let mut z = r.component_mul(&inverse_diagonal);
    let mut p = z.clone();
    let mut rz = r.dot(&z);

    for iteration in 0..max_iterations {
        let kp = multiply(k, &p);
        let curvature = p.dot(&kp);
        if curvature <= 0.0 {
            return Err(PipelineError::SingularStiffness(
                "stiffness matrix is not positive definite".to_string(),
            ));
        }
        let alpha = rz / curvature;
        x.axpy(alpha, &p, 1.0);
        r.axpy(-alpha, &kp, 1.0);
        if r.norm() <= target {
            tracing::debug!(iterations = iteration + 1, "conjugate gradient converged");
            return Ok(x);
        }
        z = r.component_mul(&inverse_diagonal);
        let rz_next = r.dot(&z);
        p = &z + &p * (rz_next / rz);
        rz = rz_next;
    }
    Err(PipelineError::NumericalInstability {
        stage: Stage::FemSolve,
        detail: format!("conjugate gradient did not converge in {max_iterations} iterations"),
    })
}

/// Assemble and solve the mesh, then recover nodal stresses.
///
/// When no node is constrained, rigid body motion is removed by pinning
/// two nodes; the loads must then be balanced.
///
/// # Errors
///
/// Returns [`PipelineError::SingularStiffness`] if the mesh falls apart
/// into pieces or the matrix is not positive definite, and
/// [`PipelineError::NumericalInstability`] for degenerate elements,
/// non-convergence, non-finite results or a residual above
/// `config.residual_limit`.
pub fn solve(mesh: &Mesh, config: &SolverConfig) -> Result<FemSolution, PipelineError> {
    config.validate()?;
    if mesh.elements.is_empty() {
        return Err(PipelineError::SingularStiffness(
            "mesh has no elements".to_string(),
        ));
    }
    let parts = edge_connected_parts(mesh);
    if parts > 1 {
        return Err(PipelineError::SingularStiffness(format!(
            "mesh consists of {parts} parts that do not share an element edge"
        )));
    }

    let (fixed, pinned) = if mesh.has_fixed_dofs() {
        (mesh.nodes.iter().map(|n| n.fixed).collect(), Vec::new())
    } else {
        pin_rigid_body(&mesh.nodes)
    };

    // Map every free DOF to a row of the reduced system.
    let mut equation: Vec<Option<usize>> = Vec::with_capacity(DOF * mesh.nodes.len());
    let mut free = 0;
    for flags in &fixed {
        for &is_fixed in flags {
            equation.push((!is_fixed).then(|| {
                free += 1;
                free - 1
            }));
        }
    }

    let mut coo = CooMatrix::new(free, free);
    for element in &mesh.elements {
        let material = mesh.materials.get(element.material).ok_or_else(|| {
            PipelineError::InvalidConfig(format!(
                "element references missing material {}",
                element.material
            ))
        })?;
        let stiffness = compute_element_stiffness_matrix(&element_coords(element, &mesh.nodes), material)?;
        let dofs: Vec<Option<usize>> = element
            .nodes
            .iter()
            .flat_map(|&n| [equation[DOF * n], equation[DOF * n + 1]])
            .collect();
        for (local_row, row) in dofs.iter().enumerate() {
            let Some(row) = *row else { continue };
            for (local_col, col) in dofs.iter().enumerate() {
                if let Some(col) = *col {
                    coo.push(row, col, stiffness[(local_row, local_col)]);
                }
            }
        }
    }
    let k = CscMatrix::from(&coo);

    let mut f = DVector::zeros(free);
    for (n, node) in mesh.nodes.iter().enumerate() {
        for axis in 0..DOF {
            if let Some(eq) = equation[DOF * n + axis] {
                f[eq] = node.load[axis];
            }
        }
    }

    let x = match config.kind {
        LinearSolverKind::Cholesky => run_cholesky(&k, &f)?,
        LinearSolverKind::ConjugateGradient => {
            run_conjugate_gradient(&k, &f, config.tolerance, config.max_iterations)?
        }
    };
    if x.iter().any(|v| !v.is_finite()) {
        return Err(PipelineError::NumericalInstability {
            stage: Stage::FemSolve,
            detail: "non-finite nodal displacements".to_string(),
        });
    }

    let load_norm = f.norm();
    let residual = if load_norm > 0.0 {
        (multiply(&k, &x) - &f).norm() / load_norm
    } else {
        0.0
    };
    tracing::debug!(
        dofs = free,
        nonzeros = k.nnz(),
        residual,
        solver = ?config.kind,
        "FEM system solved"
    );
    if residual > config.residual_limit {
        return Err(PipelineError::NumericalInstability {
            stage: Stage::FemSolve,
            detail: format!("relative residual {residual:.3e} exceeds {:.3e}", config.residual_limit),
        });
    }

    let displacements: Vec<[f64; 2]> = (0..mesh.nodes.len())
        .map(|n| {
            let at = |axis: usize| equation[DOF * n + axis].map_or(0.0, |eq| x[eq]);
            [at(0), at(1)]
        })
        .collect();
    let stress = recover_stress(mesh, &displacements)?;

    Ok(FemSolution {
        displacements,
        stress,
        residual,
        pinned,
    })
}

/// Stresses at element corners averaged over the elements sharing each
/// node.
fn recover_stress(mesh: &Mesh, displacements: &[[f64; 2]]) -> Result<StressField, PipelineError> {
    let mut sums = vec![[0.0f64; 3]; mesh.nodes.len()];
    let mut counts = vec![0usize; mesh.nodes.len()];

    for element in &mesh.elements {
        let material = &mesh.materials[element.material];
        let d = compute_stress_strain_matrix(material.poisson_ratio, material.youngs_modulus);
        let coords = element_coords(element, &mesh.nodes);
        let mut u = SMatrix::<f64, 8, 1>::zeros();
        for (i, &n) in element.nodes.iter().enumerate() {
            u[2 * i] = displacements[n][0];
            u[2 * i + 1] = displacements[n][1];
        }
        for (corner, &(xi, eta)) in CORNERS.iter().enumerate() {
            let (b, _) = strain_displacement_matrix(&coords, xi, eta).ok_or_else(|| {
                PipelineError::NumericalInstability {
                    stage: Stage::FemSolve,
                    detail: "degenerate element geometry".to_string(),
                }
            })?;
            let sigma = d * (b * u);
            let node = element.nodes[corner];
            for (sum, value) in sums[node].iter_mut().zip(sigma.iter()) {
                *sum += value;
            }
            counts[node] += 1;
        }
    }

    let dim = mesh.shape.dim();
    let mut sxx = Array2::zeros(dim);
    let mut syy = Array2::zeros(dim);
    let mut sxy = Array2::zeros(dim);
    let mut domain = Array2::from_elem(dim, false);
    for ((node, sum), &count) in mesh.nodes.iter().zip(&sums).zip(&counts) {
        if count == 0 {
            continue;
        }
        #[allow(clippy::cast_precision_loss)]
        let n = count as f64;
        sxx[node.grid] = sum[0] / n;
        syy[node.grid] = sum[1] / n;
        sxy[node.grid] = sum[2] / n;
        domain[node.grid] = true;
    }
    Ok(StressField {
        sxx,
        syy,
        sxy,
        domain: Mask::new(domain),
    })
}
