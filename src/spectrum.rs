//! Frequency-domain buffers for phase correlation.
//!
//! `Spectrum` keeps the complex bins private; callers only combine spectra and read back
//! real-valued correlation surfaces, so the Fourier-domain algebra stays in this module.

use ndarray::parallel::prelude::*;
use ndarray::{Array1, Array2, Axis, Zip};
use rustfft::num_complex::Complex64;
use rustfft::{Fft, FftPlanner};
use std::f64::consts::TAU;
use std::sync::Arc;

/// Bins whose magnitude falls below this fraction of the strongest bin are whitened to zero.
const WHITEN_RELATIVE_EPSILON: f64 = 1e-15;

/// 2D discrete Fourier transform of a real grid, or a product of such transforms.
#[derive(Debug, Clone)]
pub struct Spectrum {
    bins: Array2<Complex64>,
}

/// Signed frequency index of bin `k` in an `n`-point transform (numpy `fftfreq * n`).
fn frequency(k: usize, n: usize) -> f64 {
    if k < (n + 1) / 2 {
        k as f64
    } else {
        k as f64 - n as f64
    }
}

fn transform_lanes(bins: &mut Array2<Complex64>, fft: &Arc<dyn Fft<f64>>, axis: Axis) {
    bins.axis_iter_mut(axis).into_par_iter().for_each(|mut lane| {
        let mut buffer = lane.to_vec();
        fft.process(&mut buffer);
        lane.iter_mut().zip(buffer).for_each(|(dst, src)| *dst = src);
    });
}

/// `(n, size)` matrix evaluating the inverse DFT at `size` positions spaced `1/upsample`
/// apart and centred on `center`.
fn dft_kernel(n: usize, size: usize, center: f64, upsample: f64) -> Array2<Complex64> {
    let half = (size / 2) as f64;
    Array2::from_shape_fn((n, size), |(k, j)| {
        let position = center + (j as f64 - half) / upsample;
        Complex64::from_polar(1.0, TAU * frequency(k, n) * position / n as f64)
    })
}

impl Spectrum {
    pub fn forward(grid: &Array2<f64>) -> Self {
        let (height, width) = grid.dim();
        let mut bins = grid.mapv(|v| Complex64::new(v, 0.0));

        let mut planner = FftPlanner::new();
        let row_fft = planner.plan_fft_forward(width);
        let col_fft = planner.plan_fft_forward(height);

        // Each item of Axis(0) is a row, each item of Axis(1) a column
        transform_lanes(&mut bins, &row_fft, Axis(0));
        transform_lanes(&mut bins, &col_fft, Axis(1));

        Self { bins }
    }

    /// (height, width) of the spatial grid this spectrum describes.
    pub fn dim(&self) -> (usize, usize) {
        self.bins.dim()
    }

    fn len(&self) -> f64 {
        self.bins.len() as f64
    }

    /// Inverse transform, normalised by 1/N.
    fn inverse(&self) -> Array2<Complex64> {
        let (height, width) = self.dim();
        let mut bins = self.bins.clone();

        let mut planner = FftPlanner::new();
        let row_fft = planner.plan_fft_inverse(width);
        let col_fft = planner.plan_fft_inverse(height);

        transform_lanes(&mut bins, &col_fft, Axis(1));
        transform_lanes(&mut bins, &row_fft, Axis(0));

        let scale = 1.0 / self.len();
        bins.mapv_inplace(|c| c * scale);
        bins
    }

    /// Sum of squares of the spatial grid (Parseval).
    pub fn energy(&self) -> f64 {
        self.bins.iter().map(|c| c.norm_sqr()).sum::<f64>() / self.len()
    }

    /// Cross-power spectrum `self * conj(other)`.
    pub fn cross_power(&self, other: &Spectrum) -> Spectrum {
        let bins = Zip::from(&self.bins)
            .and(&other.bins)
            .map_collect(|&a, &b| a * b.conj());
        Spectrum { bins }
    }

    /// Every bin scaled to unit magnitude.
    ///
    /// The divisor is clamped to a small fraction of the strongest bin, so empty bins become
    /// zero instead of NaN.
    pub fn whitened(&self) -> Spectrum {
        let peak = self.bins.iter().map(|c| c.norm()).fold(0.0, f64::max);
        let epsilon = (peak * WHITEN_RELATIVE_EPSILON).max(f64::MIN_POSITIVE);
        Spectrum {
            bins: self.bins.mapv(|c| c / c.norm().max(epsilon)),
        }
    }

    /// Magnitude of the inverse transform.
    pub fn correlation_surface(&self) -> Array2<f64> {
        self.inverse().mapv(|c| c.norm())
    }

    /// Inverse transform evaluated at the fractional position (dy, dx).
    pub fn correlation_at(&self, dy: f64, dx: f64) -> Complex64 {
        let (height, width) = self.dim();
        let col_phase = Array1::from_shape_fn(width, |k| {
            Complex64::from_polar(1.0, TAU * frequency(k, width) * dx / width as f64)
        });
        let row_phase = Array1::from_shape_fn(height, |k| {
            Complex64::from_polar(1.0, TAU * frequency(k, height) * dy / height as f64)
        });
        row_phase.dot(&self.bins.dot(&col_phase)) / self.len()
    }

    /// Inverse transform on a `size` x `size` patch of positions spaced `1/upsample` apart,
    /// centred on `center` = (row, col). Entry `[size/2, size/2]` is `center` itself.
    pub fn upsampled_correlation(&self, center: (f64, f64), upsample: f64, size: usize) -> Array2<Complex64> {
        let (height, width) = self.dim();
        let row_kernel = dft_kernel(height, size, center.0, upsample);
        let col_kernel = dft_kernel(width, size, center.1, upsample);

        let partial = self.bins.dot(&col_kernel);
        let scale = 1.0 / self.len();
        row_kernel.t().dot(&partial).mapv(|c| c * scale)
    }
}
