//! Gaussian smoothing of floating-point grids and point sequences.
//!
//! [`gaussian_filter`] smooths traction fields after the Fourier
//! inversion. [`gaussian_filter_1d`] smooths the ordered pixel
//! coordinates of a cell border before a spline is fitted to them.
//!
//! Borders are handled by mirror reflection (`d c b a | a b c d`), so a
//! constant input stays constant.

use ndarray::{Array2, Axis};

/// Kernel half-width in standard deviations.
const TRUNCATE: f64 = 4.0;

/// Normalized 1D Gaussian kernel of radius `ceil(TRUNCATE * sigma)`.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
fn kernel(sigma: f64) -> Vec<f64> {
    let radius = (TRUNCATE * sigma).ceil().max(1.0) as usize;
    let two_sigma_sq = 2.0 * sigma * sigma;
    let mut weights: Vec<f64> = (0..=2 * radius)
        .map(|i| {
            let d = i as f64 - radius as f64;
            (-d * d / two_sigma_sq).exp()
        })
        .collect();
    let sum: f64 = weights.iter().sum();
    for w in &mut weights {
        *w /= sum;
    }
    weights
}

/// Mirror an out-of-range index back into `0..len`.
#[allow(clippy::cast_possible_wrap, clippy::cast_sign_loss)]
fn reflect(index: isize, len: usize) -> usize {
    let n = len as isize;
    let period = 2 * n;
    let mut i = index.rem_euclid(period);
    if i >= n {
        i = period - 1 - i;
    }
    i as usize
}

/// Convolve a sequence with a normalized kernel.
#[allow(clippy::cast_possible_wrap)]
fn convolve(values: &[f64], weights: &[f64]) -> Vec<f64> {
    let radius = (weights.len() / 2) as isize;
    (0..values.len())
        .map(|i| {
            weights
                .iter()
                .enumerate()
                .map(|(k, w)| {
                    let j = reflect(i as isize + k as isize - radius, values.len());
                    w * values[j]
                })
                .sum()
        })
        .collect()
}

/// Smooth a 1D sequence with a Gaussian of standard deviation `sigma`.
///
/// Non-positive sigma values return the input unchanged.
#[must_use = "returns the smoothed sequence"]
pub fn gaussian_filter_1d(values: &[f64], sigma: f64) -> Vec<f64> {
    if sigma <= 0.0 || values.is_empty() {
        return values.to_vec();
    }
    convolve(values, &kernel(sigma))
}

/// Smooth a 2D grid with an isotropic Gaussian of standard deviation
/// `sigma` (grid units), applied separably along rows and columns.
///
/// Non-positive sigma values return the grid unchanged.
#[must_use = "returns the smoothed grid"]
pub fn gaussian_filter(grid: &Array2<f64>, sigma: f64) -> Array2<f64> {
    if sigma <= 0.0 || grid.is_empty() {
        return grid.clone();
    }
    let weights = kernel(sigma);
    let mut out = grid.clone();
    for axis in [Axis(0), Axis(1)] {
        for mut lane in out.lanes_mut(axis) {
            let smoothed = convolve(&lane.to_vec(), &weights);
            for (dst, src) in lane.iter_mut().zip(smoothed) {
                *dst = src;
            }
        }
    }
    out
}
