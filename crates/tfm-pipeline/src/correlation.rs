//! Deformation field estimation by windowed cross-correlation (PIV).
//!
//! The reference and deformed bead images are cut into overlapping
//! square windows. For every window pair the normalized cross-correlation
//! is computed with FFTs on a zero-padded grid, the correlation peak is
//! located within half a window of zero shift and refined to sub-pixel
//! precision. Vectors with a weak peak or an outlying magnitude are
//! replaced by the mean of their valid neighbours, so the grid shape is
//! preserved.

use ndarray::{Array2, ArrayView2, Zip, s};
use rustfft::num_complex::Complex;
use serde::{Deserialize, Serialize};

use crate::fft::Fft2;
use crate::mask::Mask;
use crate::types::{GridShape, PipelineError, PipelineWarning, Stage, VectorField};

/// Correlation peaks below this value count as no signal.
const MIN_PEAK: f64 = 1e-3;

/// Half-width of the area around the first peak that is ignored when
/// searching for the second peak.
const PEAK_EXCLUSION: isize = 2;

/// Window geometry and vector validation thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrelationConfig {
    /// Side length of the square interrogation window in pixels.
    pub window_size: usize,

    /// Overlap of neighbouring windows in pixels (less than
    /// `window_size`).
    pub overlap: usize,

    /// Vectors whose peak-to-peak ratio is below this value are replaced.
    pub sig2noise_threshold: f64,

    /// Vectors whose magnitude deviates from the field mean by more than
    /// this many standard deviations are replaced.
    pub std_factor: f64,

    /// Neighbourhood radius used when replacing flagged vectors.
    pub replace_kernel_radius: usize,

    /// Maximum number of local-mean replacement sweeps.
    pub replace_max_iterations: usize,
}

impl CorrelationConfig {
    /// Default window size (pixels).
    pub const DEFAULT_WINDOW_SIZE: usize = 100;
    /// Default window overlap (pixels).
    pub const DEFAULT_OVERLAP: usize = 60;
    /// Default signal-to-noise threshold.
    pub const DEFAULT_SIG2NOISE_THRESHOLD: f64 = 1.05;
    /// Default outlier threshold in standard deviations.
    pub const DEFAULT_STD_FACTOR: f64 = 15.0;
    /// Default replacement kernel radius.
    pub const DEFAULT_REPLACE_KERNEL_RADIUS: usize = 2;
    /// Default number of replacement sweeps.
    pub const DEFAULT_REPLACE_MAX_ITERATIONS: usize = 10;

    /// Distance between neighbouring window origins.
    #[must_use]
    pub const fn step(&self) -> usize {
        self.window_size.saturating_sub(self.overlap)
    }

    /// Number of windows along an image axis of `len` pixels.
    #[must_use]
    pub const fn grid_len(&self, len: usize) -> Option<usize> {
        if len < self.window_size || self.step() == 0 {
            None
        } else {
            Some((len - self.window_size) / self.step() + 1)
        }
    }

    /// Check the window geometry and thresholds.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfig`] describing the problem.
    pub fn validate(&self) -> Result<(), PipelineError> {
        // The peak search needs at least one shift on each side of zero.
        if self.window_size < 4 {
            return Err(PipelineError::InvalidConfig(format!(
                "correlation.window_size must be at least 4, got {}",
                self.window_size
            )));
        }
        if self.overlap >= self.window_size {
            return Err(PipelineError::InvalidConfig(format!(
                "correlation.overlap ({}) must be smaller than window_size ({})",
                self.overlap, self.window_size
            )));
        }
        if !(self.sig2noise_threshold.is_finite() && self.sig2noise_threshold >= 0.0) {
            return Err(PipelineError::InvalidConfig(format!(
                "correlation.sig2noise_threshold must be non-negative, got {}",
                self.sig2noise_threshold
            )));
        }
        if !(self.std_factor.is_finite() && self.std_factor > 0.0) {
            return Err(PipelineError::InvalidConfig(format!(
                "correlation.std_factor must be positive, got {}",
                self.std_factor
            )));
        }
        Ok(())
    }
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self {
            window_size: Self::DEFAULT_WINDOW_SIZE,
            overlap: Self::DEFAULT_OVERLAP,
            sig2noise_threshold: Self::DEFAULT_SIG2NOISE_THRESHOLD,
            std_factor: Self::DEFAULT_STD_FACTOR,
            replace_kernel_radius: Self::DEFAULT_REPLACE_KERNEL_RADIUS,
            replace_max_iterations: Self::DEFAULT_REPLACE_MAX_ITERATIONS,
        }
    }
}

/// Output of [`correlate`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deformation {
    /// Displacement in pixels of the bead image, on the window grid.
    pub field: VectorField,
    /// Vectors whose correlation peak was below the threshold.
    pub invalid: Mask,
    /// Vectors rejected by the magnitude outlier test.
    pub outliers: Mask,
    /// Peak-to-peak signal-to-noise ratio of every window.
    pub sig2noise: Array2<f64>,
}

impl Deformation {
    /// Warnings for replaced vectors.
    #[must_use]
    pub fn warnings(&self) -> Vec<PipelineWarning> {
        let mut out = Vec::new();
        let invalid = self.invalid.count();
        if invalid > 0 {
            out.push(PipelineWarning::LowSignalVectors { count: invalid });
        }
        let outliers = self.outliers.count();
        if outliers > 0 {
            out.push(PipelineWarning::OutlierVectors { count: outliers });
        }
        out
    }
}

/// Estimate the displacement of `deformed` relative to `reference`.
///
/// `pixel_size` is the bead image pixel size in µm; the returned field
/// carries the grid spacing `pixel_size · mean(image shape / grid shape)`.
///
/// # Errors
///
/// Returns [`PipelineError::ShapeMismatch`] if the images differ in
/// shape and [`PipelineError::InvalidConfig`] if the configuration is
/// invalid or an image is smaller than one window.
pub fn correlate(
    reference: &Array2<f64>,
    deformed: &Array2<f64>,
    pixel_size: f64,
    config: &CorrelationConfig,
) -> Result<Deformation, PipelineError> {
    config.validate()?;
    let image_shape = GridShape::of(reference);
    let found = GridShape::of(deformed);
    if image_shape != found {
        return Err(PipelineError::ShapeMismatch {
            stage: Stage::Correlation,
            what: "deformed image",
            expected: image_shape,
            found,
        });
    }
    let (Some(rows), Some(cols)) = (
        config.grid_len(image_shape.rows),
        config.grid_len(image_shape.cols),
    ) else {
        return Err(PipelineError::InvalidConfig(format!(
            "images of shape {image_shape} are smaller than one {0}x{0} window",
            config.window_size
        )));
    };

    let window = config.window_size;
    let step = config.step();
    let correlator = WindowCorrelator::new(window);
    let mut u = Array2::zeros((rows, cols));
    let mut v = Array2::zeros((rows, cols));
    let mut sig2noise = Array2::zeros((rows, cols));

    for r in 0..rows {
        for c in 0..cols {
            let (top, left) = (r * step, c * step);
            let area = s![top..top + window, left..left + window];
            let peak = correlator.correlate(reference.slice(area), deformed.slice(area));
            u[[r, c]] = peak.dx;
            v[[r, c]] = peak.dy;
            sig2noise[[r, c]] = peak.sig2noise;
        }
    }

    let invalid = sig2noise.mapv(|s| s < config.sig2noise_threshold);
    let outliers = flag_outliers(&u, &v, &invalid, config.std_factor);
    let mut flagged = invalid.clone();
    flagged.zip_mut_with(&outliers, |a, &b| *a = *a || b);

    replace_flagged(
        &mut u,
        &flagged,
        config.replace_kernel_radius,
        config.replace_max_iterations,
    );
    replace_flagged(
        &mut v,
        &flagged,
        config.replace_kernel_radius,
        config.replace_max_iterations,
    );

    #[allow(clippy::cast_precision_loss)]
    let field_pixel_size = pixel_size
        * f64::midpoint(
            image_shape.rows as f64 / rows as f64,
            image_shape.cols as f64 / cols as f64,
        );

    let deformation = Deformation {
        field: VectorField::new(u, v, field_pixel_size)?,
        invalid: Mask::new(invalid),
        outliers: Mask::new(outliers),
        sig2noise,
    };
    tracing::debug!(
        grid = %deformation.field.shape(),
        field_pixel_size,
        invalid = deformation.invalid.count(),
        outliers = deformation.outliers.count(),
        "deformation field computed"
    );
    Ok(deformation)
}

/// Displacement and quality of one window pair.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Peak {
    dx: f64,
    dy: f64,
    sig2noise: f64,
}

impl Peak {
    const NONE: Self = Self {
        dx: 0.0,
        dy: 0.0,
        sig2noise: 0.0,
    };
}

/// FFT plans shared by all window pairs of one image.
struct WindowCorrelator {
    window: usize,
    padded: usize,
    fft: Fft2,
}

impl WindowCorrelator {
    fn new(window: usize) -> Self {
        let padded = 2 * window;
        Self {
            window,
            padded,
            fft: Fft2::new(padded, padded),
        }
    }

    /// Normalized cross-correlation `c(s) = Σ a(x) b(x + s)` at the
    /// shift `s`, read from the padded result with wrap-around indices.
    #[allow(clippy::cast_possible_wrap, clippy::cast_sign_loss)]
    fn at(&self, corr: &Array2<f64>, dy: isize, dx: isize) -> f64 {
        let n = self.padded as isize;
        corr[[dy.rem_euclid(n) as usize, dx.rem_euclid(n) as usize]]
    }

    fn correlate(&self, a: ArrayView2<'_, f64>, b: ArrayView2<'_, f64>) -> Peak {
        let (a, energy_a) = centered(a);
        let (b, energy_b) = centered(b);
        let norm = (energy_a * energy_b).sqrt();
        if !(norm.is_finite() && norm > 0.0) {
            return Peak::NONE;
        }

        let fa = self.fft.forward_real(&a);
        let mut product = self.fft.forward_real(&b);
        Zip::from(&mut product)
            .and(&fa)
            .for_each(|pb, pa| *pb *= pa.conj());
        self.fft.inverse(&mut product);
        let corr = product.mapv(|z: Complex<f64>| z.re / norm);

        #[allow(clippy::cast_possible_wrap)]
        let reach = ((self.window - 1) / 2) as isize;
        let mut best = (f64::NEG_INFINITY, 0isize, 0isize);
        for dy in -reach..=reach {
            for dx in -reach..=reach {
                let value = self.at(&corr, dy, dx);
                if value > best.0 {
                    best = (value, dy, dx);
                }
            }
        }
        let (first, py, px) = best;

        let mut second = f64::NEG_INFINITY;
        for dy in -reach..=reach {
            for dx in -reach..=reach {
                if (dy - py).abs() <= PEAK_EXCLUSION && (dx - px).abs() <= PEAK_EXCLUSION {
                    continue;
                }
                second = second.max(self.at(&corr, dy, dx));
            }
        }
        let sig2noise = if first < MIN_PEAK {
            0.0
        } else {
            first / second.max(MIN_PEAK)
        };

        let oy = subpixel_offset(
            self.at(&corr, py - 1, px),
            first,
            self.at(&corr, py + 1, px),
        );
        let ox = subpixel_offset(
            self.at(&corr, py, px - 1),
            first,
            self.at(&corr, py, px + 1),
        );

        #[allow(clippy::cast_precision_loss)]
        let (dx, dy) = (px as f64 + ox, py as f64 + oy);
        Peak { dx, dy, sig2noise }
    }
}

/// Subtract the mean and return the window with its energy `Σ x²`.
fn centered(window: ArrayView2<'_, f64>) -> (Array2<f64>, f64) {
    let mean = window.mean().unwrap_or(0.0);
    let centered = window.mapv(|x| x - mean);
    let energy = centered.iter().map(|x| x * x).sum();
    (centered, energy)
}

/// Offset of the true peak from the center sample, from a three-point
/// fit through the samples at -1, 0 and +1.
///
/// A Gaussian is fitted when all samples are positive, a parabola
/// otherwise. Degenerate fits yield 0.
fn subpixel_offset(minus: f64, center: f64, plus: f64) -> f64 {
    let offset = if minus > 0.0 && center > 0.0 && plus > 0.0 {
        let (lm, lc, lp) = (minus.ln(), center.ln(), plus.ln());
        (lm - lp) / (2.0 * (lm - 2.0 * lc + lp))
    } else {
        (minus - plus) / (2.0 * (minus - 2.0 * center + plus))
    };
    if offset.is_finite() && offset.abs() < 1.0 {
        offset
    } else {
        0.0
    }
}

/// Flag valid vectors whose magnitude exceeds the mean magnitude of all
/// valid vectors by more than `std_factor` standard deviations.
fn flag_outliers(
    u: &Array2<f64>,
    v: &Array2<f64>,
    invalid: &Array2<bool>,
    std_factor: f64,
) -> Array2<bool> {
    let mut magnitude = u.clone();
    magnitude.zip_mut_with(v, |a, &b| *a = a.hypot(b));

    let valid: Vec<f64> = magnitude
        .iter()
        .zip(invalid)
        .filter(|&(_, &bad)| !bad)
        .map(|(&m, _)| m)
        .collect();
    if valid.is_empty() {
        return Array2::from_elem(u.dim(), false);
    }
    #[allow(clippy::cast_precision_loss)]
    let n = valid.len() as f64;
    let mean = valid.iter().sum::<f64>() / n;
    let std = (valid.iter().map(|m| (m - mean).powi(2)).sum::<f64>() / n).sqrt();

    let mut outliers = Array2::from_elem(u.dim(), false);
    Zip::from(&mut outliers)
        .and(&magnitude)
        .and(invalid)
        .for_each(|out, &m, &bad| *out = !bad && m > std_factor.mul_add(std, mean));
    outliers
}

/// Replace flagged cells by the mean of the known cells within
/// `radius`, sweeping at most `max_iterations` times. Cells filled in one
/// sweep serve as neighbours in the next; cells that never see a known
/// neighbour are set to zero.
fn replace_flagged(
    values: &mut Array2<f64>,
    flagged: &Array2<bool>,
    radius: usize,
    max_iterations: usize,
) {
    const TOLERANCE: f64 = 1e-3;

    let (rows, cols) = values.dim();
    let targets: Vec<(usize, usize)> = flagged
        .indexed_iter()
        .filter(|&(_, &f)| f)
        .map(|(ix, _)| ix)
        .collect();
    if targets.is_empty() {
        return;
    }
    let mut known = flagged.mapv(|f| !f);

    for _ in 0..max_iterations {
        let snapshot = values.clone();
        let known_before = known.clone();
        let mut change: f64 = 0.0;
        for &(r, c) in &targets {
            let (r0, r1) = (r.saturating_sub(radius), (r + radius + 1).min(rows));
            let (c0, c1) = (c.saturating_sub(radius), (c + radius + 1).min(cols));
            let mut sum = 0.0;
            let mut n = 0usize;
            for rr in r0..r1 {
                for cc in c0..c1 {
                    if (rr, cc) != (r, c) && known_before[[rr, cc]] {
                        sum += snapshot[[rr, cc]];
                        n += 1;
                    }
                }
            }
            if n > 0 {
                #[allow(clippy::cast_precision_loss)]
                let mean = sum / n as f64;
                if known_before[[r, c]] {
                    change = change.max((mean - snapshot[[r, c]]).abs());
                } else {
                    change = f64::INFINITY;
                }
                values[[r, c]] = mean;
                known[[r, c]] = true;
            }
        }
        if change < TOLERANCE {
            break;
        }
    }

    for &(r, c) in &targets {
        if !known[[r, c]] {
            values[[r, c]] = 0.0;
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
pub(crate) mod tests {
    use super::*;

    /// Deterministic pseudo-random numbers in `[0, 1)`.
    pub(crate) struct Lcg(u64);

    impl Lcg {
        pub(crate) const fn new(seed: u64) -> Self {
            Self(seed)
        }

        #[allow(clippy::cast_precision_loss)]
        pub(crate) fn next_f64(&mut self) -> f64 {
            self.0 = self
                .0
                .wrapping_mul(6_364_136_223_846_793_005)
                .wrapping_add(1_442_695_040_888_963_407);
            (self.0 >> 11) as f64 / (1u64 << 53) as f64
        }
    }

    /// Random bead positions covering a `rows × cols` image plus a margin.
    pub(crate) fn bead_positions(rows: usize, cols: usize, seed: u64) -> Vec<(f64, f64)> {
        let mut rng = Lcg::new(seed);
        let margin = 10.0;
        let count = rows * cols / 30;
        (0..count)
            .map(|_| {
                (
                    rng.next_f64().mul_add(rows as f64 + 2.0 * margin, -margin),
                    rng.next_f64().mul_add(cols as f64 + 2.0 * margin, -margin),
                )
            })
            .collect()
    }

    /// Render Gaussian beads of width 1.5 px at `(row, col)` positions.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub(crate) fn render_beads(rows: usize, cols: usize, beads: &[(f64, f64)]) -> Array2<f64> {
        let sigma2 = 2.0 * 1.5 * 1.5;
        let reach = 6.0;
        let mut image = Array2::zeros((rows, cols));
        for &(by, bx) in beads {
            let r0 = (by - reach).floor().max(0.0) as usize;
            let r1 = ((by + reach).ceil().max(0.0) as usize).min(rows);
            let c0 = (bx - reach).floor().max(0.0) as usize;
            let c1 = ((bx + reach).ceil().max(0.0) as usize).min(cols);
            for r in r0..r1 {
                for c in c0..c1 {
                    let d2 = (r as f64 - by).powi(2) + (c as f64 - bx).powi(2);
                    image[[r, c]] += (-d2 / sigma2).exp();
                }
            }
        }
        image
    }

    fn small_config() -> CorrelationConfig {
        CorrelationConfig {
            window_size: 32,
            overlap: 16,
            ..CorrelationConfig::default()
        }
    }

    #[test]
    fn grid_size_follows_window_and_overlap() {
        let config = small_config();
        assert_eq!(config.grid_len(200), Some(11));
        assert_eq!(config.grid_len(160), Some(9));
        assert_eq!(config.grid_len(31), None);
        let reference = config_image(200, 160);
        let deformation = correlate(&reference, &reference, 0.2, &config).unwrap();
        assert_eq!(deformation.field.shape(), GridShape::new(11, 9));
        let expected_ps = 0.2 * f64::midpoint(200.0 / 11.0, 160.0 / 9.0);
        assert!((deformation.field.pixel_size() - expected_ps).abs() < 1e-12);
    }

    fn config_image(rows: usize, cols: usize) -> Array2<f64> {
        render_beads(rows, cols, &bead_positions(rows, cols, 7))
    }

    #[test]
    fn identical_images_give_zero_displacement() {
        let image = config_image(96, 96);
        let deformation = correlate(&image, &image, 0.2, &small_config()).unwrap();
        for (&u, &v) in deformation.field.u().iter().zip(deformation.field.v()) {
            assert!(u.abs() < 1e-6, "u = {u}");
            assert!(v.abs() < 1e-6, "v = {v}");
        }
        assert_eq!(deformation.invalid.count(), 0);
        assert!(deformation.warnings().is_empty());
    }

    #[test]
    fn uniform_shift_is_recovered() {
        let beads = bead_positions(96, 96, 11);
        let shifted: Vec<(f64, f64)> = beads.iter().map(|&(y, x)| (y + 2.0, x + 3.0)).collect();
        let reference = render_beads(96, 96, &beads);
        let deformed = render_beads(96, 96, &shifted);
        let deformation = correlate(&reference, &deformed, 0.2, &small_config()).unwrap();
        for (&u, &v) in deformation.field.u().iter().zip(deformation.field.v()) {
            assert!((u - 3.0).abs() < 0.25, "u = {u}");
            assert!((v - 2.0).abs() < 0.25, "v = {v}");
        }
    }

    #[test]
    fn subpixel_shift_is_resolved() {
        let beads = bead_positions(96, 96, 5);
        let shifted: Vec<(f64, f64)> = beads.iter().map(|&(y, x)| (y - 1.5, x + 0.5)).collect();
        let reference = render_beads(96, 96, &beads);
        let deformed = render_beads(96, 96, &shifted);
        let deformation = correlate(&reference, &deformed, 0.2, &small_config()).unwrap();
        let mean_u = deformation.field.u().mean().unwrap();
        let mean_v = deformation.field.v().mean().unwrap();
        assert!((mean_u - 0.5).abs() < 0.15, "mean u = {mean_u}");
        assert!((mean_v + 1.5).abs() < 0.15, "mean v = {mean_v}");
    }

    #[test]
    fn rejects_mismatched_images() {
        let a = Array2::zeros((64, 64));
        let b = Array2::zeros((64, 65));
        assert!(matches!(
            correlate(&a, &b, 0.2, &small_config()),
            Err(PipelineError::ShapeMismatch {
                stage: Stage::Correlation,
                ..
            })
        ));
    }

    #[test]
    fn rejects_images_smaller_than_a_window() {
        let a = Array2::zeros((20, 64));
        assert!(matches!(
            correlate(&a, &a, 0.2, &small_config()),
            Err(PipelineError::InvalidConfig(_))
        ));
    }

    #[test]
    fn rejects_overlap_not_below_window() {
        let config = CorrelationConfig {
            window_size: 16,
            overlap: 16,
            ..CorrelationConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn featureless_windows_are_flagged_and_replaced() {
        let image = Array2::from_elem((64, 64), 1.0);
        let deformation = correlate(&image, &image, 0.2, &small_config()).unwrap();
        assert_eq!(deformation.invalid.count(), 9);
        assert!(deformation.field.u().iter().all(|&u| u == 0.0));
        assert_eq!(
            deformation.warnings(),
            vec![PipelineWarning::LowSignalVectors { count: 9 }]
        );
    }

    #[test]
    fn gaussian_fit_is_exact_for_gaussian_peak() {
        let f = |x: f64| (-(x - 0.3_f64).powi(2)).exp();
        let offset = subpixel_offset(f(-1.0), f(0.0), f(1.0));
        assert!((offset - 0.3).abs() < 1e-12);
    }

    #[test]
    fn parabolic_fallback_and_degenerate_fit() {
        let offset = subpixel_offset(-0.5, 1.0, 0.0);
        assert!(offset > 0.0 && offset < 0.5);
        assert!(subpixel_offset(1.0, 1.0, 1.0).abs() < f64::EPSILON);
        assert!(subpixel_offset(0.5, 1.0, 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn single_spike_is_an_outlier() {
        let mut u = Array2::zeros((20, 20));
        u[[4, 7]] = 50.0;
        let v = Array2::zeros((20, 20));
        let invalid = Array2::from_elem((20, 20), false);
        let outliers = flag_outliers(&u, &v, &invalid, 15.0);
        assert!(outliers[[4, 7]]);
        assert_eq!(outliers.iter().filter(|&&o| o).count(), 1);
    }

    #[test]
    fn small_vectors_are_not_outliers() {
        let mut u = Array2::from_elem((20, 20), 50.0);
        u[[4, 7]] = 0.0;
        let v = Array2::zeros((20, 20));
        let invalid = Array2::from_elem((20, 20), false);
        let outliers = flag_outliers(&u, &v, &invalid, 3.0);
        assert!(outliers.iter().all(|&o| !o));

        u[[12, 3]] = 500.0;
        let outliers = flag_outliers(&u, &v, &invalid, 3.0);
        assert!(outliers[[12, 3]]);
        assert!(!outliers[[4, 7]]);
        assert_eq!(outliers.iter().filter(|&&o| o).count(), 1);
    }

    #[test]
    fn replacement_uses_local_mean() {
        let mut values = Array2::from_shape_fn((5, 5), |(r, _)| r as f64);
        values[[2, 2]] = 100.0;
        let mut flagged = Array2::from_elem((5, 5), false);
        flagged[[2, 2]] = true;
        replace_flagged(&mut values, &flagged, 1, 10);
        assert!((values[[2, 2]] - 2.0).abs() < 1e-12);
    }

    #[test]
    fn replacement_propagates_into_large_gaps() {
        let mut values = Array2::from_elem((9, 9), 4.0);
        let mut flagged = Array2::from_elem((9, 9), false);
        for r in 1..8 {
            for c in 1..8 {
                flagged[[r, c]] = true;
                values[[r, c]] = f64::NAN;
            }
        }
        replace_flagged(&mut values, &flagged, 2, 10);
        assert!(values.iter().all(|v| (v - 4.0).abs() < 1e-9));
    }
}
