//! Fourier-transform traction cytometry (FTTC).
//!
//! In Fourier space the surface displacement of an elastic substrate is
//! the product of a 2×2 Green's tensor and the surface traction. The
//! tensor is diagonal in the basis of the unit wave vector `k̂`:
//!
//! ```text
//! G(k) = 1/(μ k) · [ (1 − ν) ρ_L(kh) k̂k̂ᵀ + ρ_T(kh) (I − k̂k̂ᵀ) ]
//! ```
//!
//! with `μ = E / (2 (1 + ν))`. For a semi-infinite substrate (Boussinesq)
//! `ρ_L = ρ_T = 1`. A layer of thickness `h` bonded to a rigid base has
//! `ρ_T = tanh(kh)` and
//! `ρ_L = (κ sinh cosh + kh) / (κ cosh² + (1 − 2ν)² + (kh)²)`, `κ = 3 − 4ν`.
//!
//! Tractions are recovered by inverting `G` for every wave vector. The
//! zero-frequency term is dropped, so the net force over the field is
//! zero.

use ndarray::{Array2, s};
use rustfft::num_complex::Complex;
use serde::{Deserialize, Serialize};

use crate::blur::gaussian_filter;
use crate::fft::{Fft2, signed_index};
use crate::types::{GridShape, PipelineError, Stage, VectorField};

/// Thickness of the elastic substrate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum SubstrateHeight {
    /// Layer thickness in µm on a rigid base.
    Finite(f64),
    /// Semi-infinite half space.
    Infinite,
}

impl SubstrateHeight {
    /// Longitudinal and transverse thickness factors `(ρ_L, ρ_T)` at
    /// wave number `k` (rad/µm).
    #[must_use]
    pub fn factors(self, k: f64, poisson_ratio: f64) -> (f64, f64) {
        match self {
            Self::Infinite => (1.0, 1.0),
            Self::Finite(h) => {
                let kh = k * h;
                let kappa = 4.0f64.mul_add(-poisson_ratio, 3.0);
                let sech = 1.0 / kh.cosh();
                let sech2 = sech * sech;
                let tanh = kh.tanh();
                let c = 2.0f64.mul_add(-poisson_ratio, 1.0).powi(2);
                let rho_l = kappa.mul_add(tanh, kh * sech2) / (c + kh * kh).mul_add(sech2, kappa);
                (rho_l, tanh)
            }
        }
    }
}

/// Smoothing applied to the recovered traction field.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum SpatialFilter {
    /// No smoothing.
    None,
    /// Gaussian filter with standard deviation `sigma` in grid units.
    Gaussian {
        /// Standard deviation in grid units.
        sigma: f64,
    },
}

impl SpatialFilter {
    /// Default Gaussian filter width (grid units).
    pub const DEFAULT_SIGMA: f64 = 3.0;
}

impl Default for SpatialFilter {
    fn default() -> Self {
        Self::Gaussian {
            sigma: Self::DEFAULT_SIGMA,
        }
    }
}

/// Substrate properties and unit conversion for the traction solver.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TractionConfig {
    /// Bead image pixel size in µm; converts pixel displacements to µm.
    pub image_pixel_size: f64,
    /// Young's modulus in Pa.
    pub youngs_modulus: f64,
    /// Poisson ratio.
    pub poisson_ratio: f64,
    /// Substrate thickness.
    pub height: SubstrateHeight,
    /// Smoothing of the traction field.
    pub filter: SpatialFilter,
}

impl TractionConfig {
    /// Shear modulus `μ = E / (2 (1 + ν))` in Pa.
    #[must_use]
    pub fn shear_modulus(&self) -> f64 {
        self.youngs_modulus / (2.0 * (1.0 + self.poisson_ratio))
    }

    fn validate(&self) -> Result<(), PipelineError> {
        let positive = |v: f64| v.is_finite() && v > 0.0;
        if !positive(self.image_pixel_size) || !positive(self.youngs_modulus) {
            return Err(PipelineError::InvalidConfig(
                "traction: pixel size and Young's modulus must be positive".to_string(),
            ));
        }
        if !(0.0..=0.5).contains(&self.poisson_ratio) {
            return Err(PipelineError::InvalidConfig(format!(
                "traction: Poisson ratio {} outside [0, 0.5]",
                self.poisson_ratio
            )));
        }
        if let SubstrateHeight::Finite(h) = self.height
            && !positive(h)
        {
            return Err(PipelineError::InvalidConfig(format!(
                "traction: substrate height {h} must be positive"
            )));
        }
        Ok(())
    }
}

/// A symmetric 2×2 tensor.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Sym2 {
    xx: f64,
    yy: f64,
    xy: f64,
}

impl Sym2 {
    fn inverse(self) -> Option<Self> {
        let det = self.xx.mul_add(self.yy, -self.xy * self.xy);
        (det.is_finite() && det != 0.0).then(|| Self {
            xx: self.yy / det,
            yy: self.xx / det,
            xy: -self.xy / det,
        })
    }

    fn apply(self, x: Complex<f64>, y: Complex<f64>) -> (Complex<f64>, Complex<f64>) {
        (x * self.xx + y * self.xy, x * self.xy + y * self.yy)
    }
}

/// Green's tensors on the padded square Fourier grid.
struct Spectrum {
    size: usize,
    grid_spacing: f64,
    shear_modulus: f64,
    poisson_ratio: f64,
    height: SubstrateHeight,
}

impl Spectrum {
    /// Pad `shape` to the smallest even square that contains it.
    fn new(shape: GridShape, grid_spacing: f64, config: &TractionConfig) -> Self {
        let side = shape.rows.max(shape.cols);
        Self {
            size: side + side % 2,
            grid_spacing,
            shear_modulus: config.shear_modulus(),
            poisson_ratio: config.poisson_ratio,
            height: config.height,
        }
    }

    /// Green's tensor at FFT bin `(r, c)`, `None` at zero frequency.
    #[allow(clippy::cast_precision_loss)]
    fn compliance(&self, r: usize, c: usize) -> Option<Sym2> {
        let scale = std::f64::consts::TAU / (self.size as f64 * self.grid_spacing);
        let ky = signed_index(r, self.size) as f64 * scale;
        let kx = signed_index(c, self.size) as f64 * scale;
        let k = kx.hypot(ky);
        if k == 0.0 {
            return None;
        }
        let (rho_l, rho_t) = self.height.factors(k, self.poisson_ratio);
        let longitudinal = (1.0 - self.poisson_ratio) * rho_l / (self.shear_modulus * k);
        let transverse = rho_t / (self.shear_modulus * k);
        let (nx, ny) = (kx / k, ky / k);
        let nyquist = self.size / 2;
        let xy = if r == nyquist || c == nyquist {
            0.0
        } else {
            (longitudinal - transverse) * nx * ny
        };
        Some(Sym2 {
            xx: longitudinal.mul_add(nx * nx, transverse * ny * ny),
            yy: longitudinal.mul_add(ny * ny, transverse * nx * nx),
            xy,
        })
    }

    /// Transform `(x, y)`, multiply every bin by `tensor(r, c)` and
    /// transform back, cropping to the input shape.
    fn convolve(
        &self,
        x: &Array2<f64>,
        y: &Array2<f64>,
        tensor: impl Fn(Sym2) -> Option<Sym2>,
    ) -> (Array2<f64>, Array2<f64>) {
        let (rows, cols) = x.dim();
        let fft = Fft2::new(self.size, self.size);
        let mut fx = fft.forward_real(x);
        let mut fy = fft.forward_real(y);
        let zero = Complex::new(0.0, 0.0);
        for r in 0..self.size {
            for c in 0..self.size {
                let (ox, oy) = match self.compliance(r, c).and_then(&tensor) {
                    Some(t) => t.apply(fx[[r, c]], fy[[r, c]]),
                    None => (zero, zero),
                };
                fx[[r, c]] = ox;
                fy[[r, c]] = oy;
            }
        }
        fft.inverse(&mut fx);
        fft.inverse(&mut fy);
        let crop = s![..rows, ..cols];
        (
            fx.slice(crop).mapv(|z| z.re),
            fy.slice(crop).mapv(|z| z.re),
        )
    }
}

/// Compute the traction field (Pa) from a displacement field given in
/// bead image pixels.
///
/// # Errors
///
/// Returns [`PipelineError::InvalidConfig`] for non-physical parameters
/// and [`PipelineError::NumericalInstability`] if the result is not
/// finite.
pub fn tractions(
    displacement: &VectorField,
    config: &TractionConfig,
) -> Result<VectorField, PipelineError> {
    config.validate()?;
    let spectrum = Spectrum::new(
        displacement.shape(),
        displacement.pixel_size(),
        config,
    );
    let u = displacement.u() * config.image_pixel_size;
    let v = displacement.v() * config.image_pixel_size;
    let (mut tx, mut ty) = spectrum.convolve(&u, &v, Sym2::inverse);

    if let SpatialFilter::Gaussian { sigma } = config.filter {
        tx = gaussian_filter(&tx, sigma);
        ty = gaussian_filter(&ty, sigma);
    }

    let traction = VectorField::new(tx, ty, displacement.pixel_size())?;
    if !traction.is_finite() {
        return Err(PipelineError::NumericalInstability {
            stage: Stage::Traction,
            detail: "traction field contains non-finite values".to_string(),
        });
    }
    tracing::debug!(
        grid = %traction.shape(),
        padded = spectrum.size,
        height = ?config.height,
        "traction field computed"
    );
    Ok(traction)
}

/// Forward model: the displacement field (bead image pixels) produced by
/// a traction field (Pa). The zero-frequency component is dropped and no
/// filter is applied.
///
/// # Errors
///
/// Returns [`PipelineError::InvalidConfig`] for non-physical parameters
/// and [`PipelineError::NumericalInstability`] if the result is not
/// finite.
pub fn displacements_from_tractions(
    traction: &VectorField,
    config: &TractionConfig,
) -> Result<VectorField, PipelineError> {
    config.validate()?;
    let spectrum = Spectrum::new(traction.shape(), traction.pixel_size(), config);
    let (u, v) = spectrum.convolve(traction.u(), traction.v(), Some);
    let field = VectorField::new(u, v, traction.pixel_size())?.scaled(1.0 / config.image_pixel_size);
    if !field.is_finite() {
        return Err(PipelineError::NumericalInstability {
            stage: Stage::Traction,
            detail: "displacement field contains non-finite values".to_string(),
        });
    }
    Ok(field)
}
