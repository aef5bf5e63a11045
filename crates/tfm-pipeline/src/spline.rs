//! Smoothing parametric splines through ordered border pixels.
//!
//! Points are Gaussian-smoothed along the curve (end points held), then
//! parameterized by chord length and interpolated with a natural cubic
//! spline per coordinate.

use serde::{Deserialize, Serialize};

use crate::blur::gaussian_filter_1d;
use crate::types::Point;

/// Parameter sub-steps per knot interval in the arclength table.
const ARCLENGTH_STEPS: usize = 16;

/// Natural cubic spline of one coordinate over shared knots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct NaturalCubic {
    values: Vec<f64>,
    /// Second derivatives at the knots; zero at both ends.
    moments: Vec<f64>,
}

impl NaturalCubic {
    fn fit(knots: &[f64], values: &[f64]) -> Self {
        let n = values.len();
        let mut moments = vec![0.0; n];
        if n < 3 {
            return Self {
                values: values.to_vec(),
                moments,
            };
        }
        // Tridiagonal system for the interior moments, solved with the
        // Thomas algorithm.
        let m = n - 2;
        let mut diag = vec![0.0; m];
        let mut upper = vec![0.0; m];
        let mut rhs = vec![0.0; m];
        for i in 1..=m {
            let h0 = knots[i] - knots[i - 1];
            let h1 = knots[i + 1] - knots[i];
            diag[i - 1] = 2.0 * (h0 + h1);
            upper[i - 1] = h1;
            rhs[i - 1] =
                6.0 * ((values[i + 1] - values[i]) / h1 - (values[i] - values[i - 1]) / h0);
        }
        for i in 1..m {
            let h = knots[i + 1] - knots[i];
            let w = h / diag[i - 1];
            diag[i] -= w * upper[i - 1];
            rhs[i] -= w * rhs[i - 1];
        }
        moments[m] = rhs[m - 1] / diag[m - 1];
        for i in (0..m - 1).rev() {
            moments[i + 1] = upper[i].mul_add(-moments[i + 2], rhs[i]) / diag[i];
        }
        Self {
            values: values.to_vec(),
            moments,
        }
    }

    /// Value and first derivative on knot interval `i` at weight `b` in
    /// `[0, 1]` with interval width `h`.
    fn eval(&self, i: usize, b: f64, h: f64) -> (f64, f64) {
        let a = 1.0 - b;
        let (y0, y1) = (self.values[i], self.values[i + 1]);
        let (m0, m1) = (self.moments[i], self.moments[i + 1]);
        let value = a * y0
            + b * y1
            + (a.powi(3) - a).mul_add(m0, (b.powi(3) - b) * m1) * h * h / 6.0;
        let slope = (y1 - y0) / h - (3.0 * a).mul_add(a, -1.0) / 6.0 * h * m0
            + (3.0 * b).mul_add(b, -1.0) / 6.0 * h * m1;
        (value, slope)
    }
}

/// One arclength-uniform sample of a spline.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SplineSample {
    /// Position on the curve.
    pub point: Point,
    /// Unit tangent in the direction of increasing arclength.
    pub tangent: [f64; 2],
}

/// Parametric cubic spline `(x(t), y(t))` with chord-length knots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BorderSpline {
    knots: Vec<f64>,
    x: NaturalCubic,
    y: NaturalCubic,
    /// `(parameter, arclength)` pairs, increasing in both.
    arclength: Vec<(f64, f64)>,
}

impl BorderSpline {
    /// Fit a spline through `points` after smoothing them along the curve
    /// with a Gaussian of `sigma` points.
    ///
    /// Returns `None` if fewer than two distinct points remain.
    #[must_use]
    pub fn fit(points: &[Point], sigma: f64) -> Option<Self> {
        let mut xs: Vec<f64> = points.iter().map(|p| p.x).collect();
        let mut ys: Vec<f64> = points.iter().map(|p| p.y).collect();
        if points.len() > 2 && sigma > 0.0 {
            let (first, last) = (points[0], points[points.len() - 1]);
            xs = gaussian_filter_1d(&xs, sigma);
            ys = gaussian_filter_1d(&ys, sigma);
            let end = xs.len() - 1;
            (xs[0], ys[0]) = (first.x, first.y);
            (xs[end], ys[end]) = (last.x, last.y);
        }

        let mut knots = Vec::with_capacity(xs.len());
        let mut kept_x = Vec::with_capacity(xs.len());
        let mut kept_y = Vec::with_capacity(xs.len());
        for (&x, &y) in xs.iter().zip(&ys) {
            match (kept_x.last(), kept_y.last(), knots.last()) {
                (Some(&px), Some(&py), Some(&t)) => {
                    let chord = Point::new(x, y).distance(Point::new(px, py));
                    if chord > 1e-9 {
                        knots.push(t + chord);
                        kept_x.push(x);
                        kept_y.push(y);
                    }
                }
                _ => {
                    knots.push(0.0);
                    kept_x.push(x);
                    kept_y.push(y);
                }
            }
        }
        if knots.len() < 2 {
            return None;
        }

        let mut spline = Self {
            x: NaturalCubic::fit(&knots, &kept_x),
            y: NaturalCubic::fit(&knots, &kept_y),
            knots,
            arclength: Vec::new(),
        };
        spline.arclength = spline.arclength_table();
        Some(spline)
    }

    /// Arclength of the curve.
    #[must_use]
    pub fn length(&self) -> f64 {
        self.arclength.last().map_or(0.0, |&(_, s)| s)
    }

    /// Knot interval containing parameter `t`, and the weight within it.
    fn locate(&self, t: f64) -> (usize, f64, f64) {
        let last = self.knots.len() - 2;
        let i = self.knots[1..=last].partition_point(|&k| k <= t);
        let h = self.knots[i + 1] - self.knots[i];
        let b = ((t - self.knots[i]) / h).clamp(0.0, 1.0);
        (i, b, h)
    }

    /// Position and derivative at parameter `t`.
    fn eval(&self, t: f64) -> (Point, [f64; 2]) {
        let (i, b, h) = self.locate(t);
        let (x, dx) = self.x.eval(i, b, h);
        let (y, dy) = self.y.eval(i, b, h);
        (Point::new(x, y), [dx, dy])
    }

    /// Speed integrated with Simpson's rule over fine parameter steps.
    fn arclength_table(&self) -> Vec<(f64, f64)> {
        let speed = |t: f64| {
            let (_, [dx, dy]) = self.eval(t);
            dx.hypot(dy)
        };
        let mut table = vec![(self.knots[0], 0.0)];
        let mut total = 0.0;
        for pair in self.knots.windows(2) {
            #[allow(clippy::cast_precision_loss)]
            let step = (pair[1] - pair[0]) / ARCLENGTH_STEPS as f64;
            for j in 0..ARCLENGTH_STEPS {
                #[allow(clippy::cast_precision_loss)]
                let t0 = (j as f64).mul_add(step, pair[0]);
                let t1 = t0 + step;
                total += step / 6.0
                    * (4.0f64.mul_add(speed(f64::midpoint(t0, t1)), speed(t0)) + speed(t1));
                table.push((t1, total));
            }
        }
        table
    }

    /// Parameter at arclength `s` by interpolating the arclength table.
    fn parameter_at(&self, s: f64) -> f64 {
        let i = self
            .arclength
            .partition_point(|&(_, length)| length < s)
            .clamp(1, self.arclength.len() - 1);
        let (t0, s0) = self.arclength[i - 1];
        let (t1, s1) = self.arclength[i];
        if s1 > s0 {
            t0 + (t1 - t0) * ((s - s0) / (s1 - s0)).clamp(0.0, 1.0)
        } else {
            t0
        }
    }

    /// Position at arclength `s` from the start.
    #[must_use]
    pub fn point_at(&self, s: f64) -> Point {
        self.eval(self.parameter_at(s)).0
    }

    /// `count` samples equally spaced in arclength, including both ends.
    #[must_use]
    pub fn sample_uniform(&self, count: usize) -> Vec<SplineSample> {
        let count = count.max(2);
        let length = self.length();
        (0..count)
            .map(|j| {
                #[allow(clippy::cast_precision_loss)]
                let s = length * j as f64 / (count - 1) as f64;
                let (point, [dx, dy]) = self.eval(self.parameter_at(s));
                let norm = dx.hypot(dy);
                let tangent = if norm > 0.0 {
                    [dx / norm, dy / norm]
                } else {
                    [0.0, 0.0]
                };
                SplineSample { point, tangent }
            })
            .collect()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn line(n: usize, dx: f64, dy: f64) -> Vec<Point> {
        (0..n)
            .map(|i| {
                #[allow(clippy::cast_precision_loss)]
                let t = i as f64;
                Point::new(1.0 + t * dx, 2.0 + t * dy)
            })
            .collect()
    }

    #[test]
    fn straight_line_is_reproduced() {
        let spline = BorderSpline::fit(&line(10, 3.0, 4.0), 1.0).unwrap();
        assert!((spline.length() - 45.0).abs() < 1e-9);
        for sample in spline.sample_uniform(7) {
            assert!((sample.tangent[0] - 0.6).abs() < 1e-9);
            assert!((sample.tangent[1] - 0.8).abs() < 1e-9);
            // On the line y - 2 = 4/3 (x - 1).
            let p = sample.point;
            assert!((3.0 * (p.y - 2.0) - 4.0 * (p.x - 1.0)).abs() < 1e-9);
        }
        let mid = spline.point_at(22.5);
        assert!((mid.x - 14.5).abs() < 1e-9);
        assert!((mid.y - 20.0).abs() < 1e-9);
    }

    #[test]
    fn two_points_give_a_segment() {
        let spline = BorderSpline::fit(&[Point::new(0.0, 0.0), Point::new(0.0, 2.0)], 2.0).unwrap();
        assert!((spline.length() - 2.0).abs() < 1e-12);
        let samples = spline.sample_uniform(3);
        assert_eq!(samples.len(), 3);
        assert!((samples[1].point.y - 1.0).abs() < 1e-12);
        assert!((samples[1].tangent[1] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn degenerate_input_has_no_spline() {
        assert!(BorderSpline::fit(&[], 1.0).is_none());
        assert!(BorderSpline::fit(&[Point::new(1.0, 1.0); 4], 1.0).is_none());
    }

    #[test]
    fn endpoints_survive_smoothing() {
        let zigzag: Vec<Point> = (0..12)
            .map(|i| {
                #[allow(clippy::cast_precision_loss)]
                let x = i as f64;
                Point::new(x, if i % 2 == 0 { 0.0 } else { 1.0 })
            })
            .collect();
        let spline = BorderSpline::fit(&zigzag, 2.0).unwrap();
        let samples = spline.sample_uniform(5);
        assert!(samples[0].point.distance(zigzag[0]) < 1e-9);
        assert!(samples[4].point.distance(zigzag[11]) < 1e-9);
        // Smoothing removes most of the zigzag length.
        assert!(spline.length() < 14.0);
        assert!(spline.length() > 11.0);
    }

    #[test]
    fn circle_arclength() {
        let n = 64;
        let points: Vec<Point> = (0..=n)
            .map(|i| {
                #[allow(clippy::cast_precision_loss)]
                let a = std::f64::consts::PI * i as f64 / n as f64;
                Point::new(10.0 * a.cos(), 10.0 * a.sin())
            })
            .collect();
        let spline = BorderSpline::fit(&points, 0.0).unwrap();
        let expected = 10.0 * std::f64::consts::PI;
        assert!((spline.length() - expected).abs() < 1e-3 * expected);
        let samples = spline.sample_uniform(9);
        for pair in samples.windows(2) {
            let chord = pair[0].point.distance(pair[1].point);
            assert!((chord - samples[0].point.distance(samples[1].point)).abs() < 1e-3);
        }
    }
}
