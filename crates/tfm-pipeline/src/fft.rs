//! Two-dimensional FFTs over `ndarray` grids, built from 1D `rustfft`
//! plans applied along rows and then columns.

use std::sync::Arc;

use ndarray::{Array2, Axis};
use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};

/// Forward and inverse plans for one grid shape.
pub(crate) struct Fft2 {
    rows: usize,
    cols: usize,
    row_forward: Arc<dyn Fft<f64>>,
    col_forward: Arc<dyn Fft<f64>>,
    row_inverse: Arc<dyn Fft<f64>>,
    col_inverse: Arc<dyn Fft<f64>>,
}

impl Fft2 {
    /// Plan transforms for a `rows × cols` grid.
    pub(crate) fn new(rows: usize, cols: usize) -> Self {
        let mut planner = FftPlanner::new();
        Self {
            rows,
            cols,
            row_forward: planner.plan_fft_forward(cols),
            col_forward: planner.plan_fft_forward(rows),
            row_inverse: planner.plan_fft_inverse(cols),
            col_inverse: planner.plan_fft_inverse(rows),
        }
    }

    /// Unnormalized forward transform, in place.
    pub(crate) fn forward(&self, data: &mut Array2<Complex<f64>>) {
        debug_assert_eq!(data.dim(), (self.rows, self.cols));
        transform(data, &*self.row_forward, &*self.col_forward);
    }

    /// Inverse transform scaled by `1 / (rows · cols)`, in place.
    #[allow(clippy::cast_precision_loss)]
    pub(crate) fn inverse(&self, data: &mut Array2<Complex<f64>>) {
        debug_assert_eq!(data.dim(), (self.rows, self.cols));
        transform(data, &*self.row_inverse, &*self.col_inverse);
        let scale = 1.0 / (self.rows * self.cols) as f64;
        data.mapv_inplace(|z| z * scale);
    }

    /// Zero-pad a real grid into the planned shape and transform it.
    pub(crate) fn forward_real(&self, values: &Array2<f64>) -> Array2<Complex<f64>> {
        let mut data = Array2::from_elem((self.rows, self.cols), Complex::new(0.0, 0.0));
        for ((r, c), &v) in values.indexed_iter() {
            data[[r, c]] = Complex::new(v, 0.0);
        }
        self.forward(&mut data);
        data
    }
}

fn transform(data: &mut Array2<Complex<f64>>, along_rows: &dyn Fft<f64>, along_cols: &dyn Fft<f64>) {
    let mut buffer = Vec::new();
    for (axis, fft) in [(Axis(1), along_rows), (Axis(0), along_cols)] {
        for mut lane in data.lanes_mut(axis) {
            buffer.clear();
            buffer.extend(lane.iter().copied());
            fft.process(&mut buffer);
            for (dst, src) in lane.iter_mut().zip(&buffer) {
                *dst = *src;
            }
        }
    }
}

/// Signed frequency index of FFT bin `i` out of `n` (numpy `fftfreq`
/// ordering multiplied by `n`).
#[allow(clippy::cast_possible_wrap)]
pub(crate) const fn signed_index(i: usize, n: usize) -> isize {
    if i < n.div_ceil(2) {
        i as isize
    } else {
        i as isize - n as isize
    }
}
