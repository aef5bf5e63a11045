//! Line tension along cell borders from the monolayer stress tensor.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::borders::{BorderGraph, BorderId};
use crate::energy::MICRONS;
use crate::fem::StressField;
use crate::types::{PipelineError, Point, Stage};

/// Line tension sampling settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LineTensionConfig {
    /// Sample points per field grid unit of border length.
    pub samples_per_unit: f64,
}

impl LineTensionConfig {
    /// Default sampling density.
    pub const DEFAULT_SAMPLES_PER_UNIT: f64 = 6.0;

    /// Largest accepted sampling density.
    pub const MAX_SAMPLES_PER_UNIT: f64 = 1000.0;

    /// Check the sampling density.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfig`] unless the density is in
    /// `(0, MAX_SAMPLES_PER_UNIT]`.
    pub fn validate(&self) -> Result<(), PipelineError> {
        let value = self.samples_per_unit;
        if value.is_finite() && value > 0.0 && value <= Self::MAX_SAMPLES_PER_UNIT {
            Ok(())
        } else {
            Err(PipelineError::InvalidConfig(format!(
                "line_tension.samples_per_unit must be in (0, {}], got {value}",
                Self::MAX_SAMPLES_PER_UNIT
            )))
        }
    }
}

impl Default for LineTensionConfig {
    fn default() -> Self {
        Self {
            samples_per_unit: Self::DEFAULT_SAMPLES_PER_UNIT,
        }
    }
}

/// Tension sampled along one border.
///
/// Samples run along the border in a canonical direction: open borders
/// start at the end with the smaller `(y, x)`, closed loops run with a
/// positive shoelace sum. Normals are that direction rotated by +90°,
/// so they do not depend on how the border was traced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BorderTension {
    /// Sample positions in field grid coordinates.
    pub points: Vec<Point>,
    /// Tension vector `σ·n` in N/m.
    pub tension: Vec<[f64; 2]>,
    /// Component of the tension along the normal, in N/m.
    pub normal_component: Vec<f64>,
    /// Component of the tension along the border, in N/m.
    pub shear_component: Vec<f64>,
    /// Unit normals.
    pub normals: Vec<[f64; 2]>,
}

impl BorderTension {
    /// Magnitude of every tension vector.
    pub fn magnitudes(&self) -> impl Iterator<Item = f64> + '_ {
        self.tension.iter().map(|t| t[0].hypot(t[1]))
    }
}

/// Line tension on every border of a [`BorderGraph`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineTension {
    /// Per-border samples.
    pub borders: BTreeMap<BorderId, BorderTension>,
    /// Smallest tension magnitude over all borders.
    pub min_magnitude: f64,
    /// Largest tension magnitude over all borders.
    pub max_magnitude: f64,
    /// Borders at the edge of the cell sheet.
    pub edge_borders: BTreeSet<BorderId>,
    /// Number of cells.
    pub n_cells: usize,
}

impl LineTension {
    fn interior(&self) -> impl Iterator<Item = &BorderTension> {
        self.borders
            .iter()
            .filter(|(id, _)| !self.edge_borders.contains(id))
            .map(|(_, t)| t)
    }

    /// Mean tension magnitude over all samples of non-edge borders, or
    /// `None` without any.
    #[must_use]
    pub fn average_magnitude(&self) -> Option<f64> {
        mean(self.interior().flat_map(BorderTension::magnitudes))
    }

    /// Mean absolute normal component over all samples of non-edge
    /// borders, or `None` without any.
    #[must_use]
    pub fn average_normal(&self) -> Option<f64> {
        mean(
            self.interior()
                .flat_map(|t| t.normal_component.iter().map(|v| v.abs())),
        )
    }
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, n) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    #[allow(clippy::cast_precision_loss)]
    let mean = (n > 0).then(|| sum / n as f64);
    mean
}

/// Sample the stress tensor along every border spline and compute the
/// tension `σ·n` acting across it.
///
/// Each border is sampled at `ceil(length · samples_per_unit)` points,
/// at least two, spaced evenly in arclength. The normal is the unit
/// tangent, in the canonical direction of [`BorderTension`], rotated by
/// +90°.
///
/// # Errors
///
/// Returns [`PipelineError::InvalidConfig`] for an out-of-range sampling
/// density or a non-positive pixel size and [`PipelineError::NumericalInstability`] if
/// the stress field yields non-finite tensions.
pub fn line_tension(
    graph: &BorderGraph,
    stress: &StressField,
    field_pixel_size: f64,
    config: &LineTensionConfig,
) -> Result<LineTension, PipelineError> {
    config.validate()?;
    if !(field_pixel_size.is_finite() && field_pixel_size > 0.0) {
        return Err(PipelineError::InvalidConfig(format!(
            "field_pixel_size must be positive, got {field_pixel_size}"
        )));
    }
    let scale = 1.0 / (field_pixel_size * MICRONS);

    let mut borders = BTreeMap::new();
    let mut min_magnitude = f64::INFINITY;
    let mut max_magnitude = 0.0f64;
    for (&id, border) in &graph.borders {
        #[allow(
            clippy::cast_possible_truncation,
            clippy::cast_sign_loss
        )]
        let count = (border.length * config.samples_per_unit).ceil().max(2.0) as usize;
        let samples = border.spline.sample_uniform(count);
        let direction = orientation(&border.points, border.closed);

        let mut result = BorderTension {
            points: Vec::with_capacity(count),
            tension: Vec::with_capacity(count),
            normal_component: Vec::with_capacity(count),
            shear_component: Vec::with_capacity(count),
            normals: Vec::with_capacity(count),
        };
        for sample in samples {
            let [tx, ty] = sample.tangent.map(|c| c * direction);
            let normal = [-ty, tx];
            let s = stress.tensor_at(sample.point.x, sample.point.y);
            let t = [
                s[0][0].mul_add(normal[0], s[0][1] * normal[1]) * scale,
                s[1][0].mul_add(normal[0], s[1][1] * normal[1]) * scale,
            ];
            if !(t[0].is_finite() && t[1].is_finite()) {
                return Err(PipelineError::NumericalInstability {
                    stage: Stage::LineTension,
                    detail: format!("non-finite tension on border {id}"),
                });
            }
            let magnitude = t[0].hypot(t[1]);
            min_magnitude = min_magnitude.min(magnitude);
            max_magnitude = max_magnitude.max(magnitude);

            result.points.push(sample.point);
            result.tension.push(t);
            result.normal_component.push(t[0].mul_add(normal[0], t[1] * normal[1]));
            result.shear_component.push(t[0].mul_add(tx, t[1] * ty));
            result.normals.push(normal);
        }
        borders.insert(id, result);
    }
    if borders.is_empty() {
        min_magnitude = 0.0;
    }

    tracing::debug!(
        borders = borders.len(),
        min_magnitude,
        max_magnitude,
        "line tension sampled"
    );
    Ok(LineTension {
        borders,
        min_magnitude,
        max_magnitude,
        edge_borders: graph.edge_borders.clone(),
        n_cells: graph.n_cells,
    })
}

/// `1.0` if `points` already run in the canonical direction, else `-1.0`.
fn orientation(points: &[Point], closed: bool) -> f64 {
    let reversed = if closed {
        let n = points.len();
        let twice_area: f64 = (0..n)
            .map(|i| {
                let (a, b) = (points[i], points[(i + 1) % n]);
                a.x.mul_add(b.y, -(b.x * a.y))
            })
            .sum();
        twice_area < 0.0
    } else {
        match (points.first(), points.last()) {
            (Some(first), Some(last)) => (last.y, last.x) < (first.y, first.x),
            _ => false,
        }
    };
    if reversed { -1.0 } else { 1.0 }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use ndarray::Array2;

    use super::*;
    use crate::borders::{BorderConfig, find_borders};
    use crate::mask::Mask;
    use crate::spline::BorderSpline;
    use crate::types::GridShape;

    fn graph() -> BorderGraph {
        let mask = crate::borders::tests::three_cells();
        find_borders(&mask, GridShape::new(30, 40), &BorderConfig::default()).unwrap()
    }

    fn uniform(sxx: f64, syy: f64, sxy: f64) -> StressField {
        let dim = (30, 40);
        StressField {
            sxx: Array2::from_elem(dim, sxx),
            syy: Array2::from_elem(dim, syy),
            sxy: Array2::from_elem(dim, sxy),
            domain: Mask::full(GridShape::new(30, 40)),
        }
    }

    #[test]
    fn isotropic_stress_pulls_along_the_normal() {
        let graph = graph();
        // 1e-8 N per 2 µm grid unit is 5e-3 N/m.
        let result = line_tension(&graph, &uniform(1e-8, 1e-8, 0.0), 2.0, &LineTensionConfig::default())
            .unwrap();
        for tension in result.borders.values() {
            for ((t, n), (&normal, &shear)) in tension
                .tension
                .iter()
                .zip(&tension.normals)
                .zip(tension.normal_component.iter().zip(&tension.shear_component))
            {
                assert!(shear.abs() < 1e-12);
                assert!((normal - 5e-3).abs() < 1e-12);
                // Parallel to the normal.
                assert!(t[0].mul_add(n[1], -t[1] * n[0]).abs() < 1e-12);
            }
        }
        assert!((result.min_magnitude - 5e-3).abs() < 1e-12);
        assert!((result.max_magnitude - 5e-3).abs() < 1e-12);
        assert!((result.average_magnitude().unwrap() - 5e-3).abs() < 1e-12);
        assert!((result.average_normal().unwrap() - 5e-3).abs() < 1e-12);
        assert_eq!(result.n_cells, 3);
        assert_eq!(result.edge_borders.len(), 4);
    }

    #[test]
    fn uniaxial_stress_loads_only_perpendicular_borders() {
        let graph = graph();
        let result = line_tension(&graph, &uniform(2e-6, 0.0, 0.0), 1.0, &LineTensionConfig::default())
            .unwrap();
        // Interior borders are vertical, so their normal is along x.
        assert!((result.average_normal().unwrap() - 2.0).abs() < 1e-6);
        let top = &result.borders[&0];
        for &normal in &top.normal_component {
            assert!(normal.abs() < 1e-6);
        }
    }

    #[test]
    fn sample_count_follows_length() {
        let graph = graph();
        let config = LineTensionConfig {
            samples_per_unit: 2.0,
        };
        let result = line_tension(&graph, &uniform(0.0, 0.0, 0.0), 1.0, &config).unwrap();
        for (id, border) in &graph.borders {
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let expected = (border.length * 2.0).ceil().max(2.0) as usize;
            assert_eq!(result.borders[id].points.len(), expected);
        }
        assert!(result.min_magnitude.abs() < f64::EPSILON);
    }

    #[test]
    fn averages_need_interior_borders() {
        let mut graph = graph();
        graph.edge_borders = graph.borders.keys().copied().collect();
        let result = line_tension(&graph, &uniform(1.0, 1.0, 0.0), 1.0, &LineTensionConfig::default())
            .unwrap();
        assert_eq!(result.average_magnitude(), None);
        assert_eq!(result.average_normal(), None);
    }

    #[test]
    fn invalid_parameters_are_rejected() {
        let graph = graph();
        let stress = uniform(1.0, 1.0, 0.0);
        assert!(line_tension(&graph, &stress, 0.0, &LineTensionConfig::default()).is_err());
        for samples_per_unit in [-1.0, f64::NAN, 1e15] {
            let config = LineTensionConfig { samples_per_unit };
            assert!(matches!(
                line_tension(&graph, &stress, 1.0, &config),
                Err(PipelineError::InvalidConfig(_))
            ));
        }
        let densest = LineTensionConfig {
            samples_per_unit: LineTensionConfig::MAX_SAMPLES_PER_UNIT,
        };
        assert!(densest.validate().is_ok());
        let nan = uniform(f64::NAN, 0.0, 0.0);
        assert!(matches!(
            line_tension(&graph, &nan, 1.0, &LineTensionConfig::default()),
            Err(PipelineError::NumericalInstability {
                stage: Stage::LineTension,
                ..
            })
        ));
    }

    #[test]
    fn orientation_flips_with_tracing_direction() {
        let p = |x, y| Point { x, y };
        let open = [p(3.0, 1.0), p(3.0, 2.0), p(4.0, 5.0)];
        let mut back = open;
        back.reverse();
        assert!((orientation(&open, false) - 1.0).abs() < f64::EPSILON);
        assert!((orientation(&back, false) + 1.0).abs() < f64::EPSILON);

        let square = [p(0.0, 0.0), p(2.0, 0.0), p(2.0, 2.0), p(0.0, 2.0)];
        let mut back = square;
        back.reverse();
        assert!((orientation(&square, true) * orientation(&back, true) + 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn normals_do_not_depend_on_tracing_direction() {
        let graph = graph();
        let (id, _) = graph.interior_borders().next().unwrap();
        let mut reversed = graph.clone();
        let border = reversed.borders.get_mut(&id).unwrap();
        border.points.reverse();
        border.spline = BorderSpline::fit(&border.points, BorderConfig::default().smoothing_sigma).unwrap();

        let stress = uniform(1e-8, 3e-9, 2e-9);
        let config = LineTensionConfig::default();
        let forward = &line_tension(&graph, &stress, 1.0, &config).unwrap().borders[&id];
        let backward = &line_tension(&reversed, &stress, 1.0, &config).unwrap().borders[&id];

        #[allow(clippy::cast_precision_loss)]
        let mean = |values: &[[f64; 2]]| {
            let n = values.len() as f64;
            let sum = values.iter().fold([0.0, 0.0], |acc, v| [acc[0] + v[0], acc[1] + v[1]]);
            [sum[0] / n, sum[1] / n]
        };
        let (a, b) = (mean(&forward.normals), mean(&backward.normals));
        assert!(a[0].abs() > 0.9);
        assert!((a[0] - b[0]).hypot(a[1] - b[1]) < 1e-6);
        let (a, b) = (mean(&forward.tension), mean(&backward.tension));
        assert!((a[0] - b[0]).hypot(a[1] - b[1]) < 1e-9);
    }
}
