//! Sub-pixel translation estimate by phase correlation, and its application to a raster.
//!
//! 1. 2D FFT of both grids
//! 2. Whitened cross-power spectrum `A * conj(B) / |A * conj(B)|`
//! 3. Inverse FFT; the magnitude peak gives the integer shift (indices past the half size
//!    wrap to negative shifts)
//! 4. Matrix-multiply DFT on a 1.5 x 1.5 pixel patch around the peak, upsampled by
//!    `upsample_factor`, refines the shift to 1/`upsample_factor` pixel

use crate::error::{AlignError, Result};
use crate::geo::GeoTransform;
use crate::raster::{Pixel, Raster};
use crate::resample::{resample, ResampleConfig, TargetGrid};
use crate::spectrum::Spectrum;
use log::{debug, info, warn};
use ndarray::Array2;
use rustfft::num_complex::Complex64;
use std::fmt;

/// Upsampled patch side, in input pixels.
const REFINE_WINDOW: f64 = 1.5;

#[derive(Debug, Clone)]
pub struct PhaseCorrelationConfig {
    /// Sub-pixel precision is 1/upsample_factor pixel; 1 keeps the integer peak.
    pub upsample_factor: usize,
    /// 1-based band the shift is estimated from; it is applied to all bands.
    pub reference_band: usize,
    /// Registration errors above this are reported as untrustworthy.
    pub max_registration_error: Option<f64>,
}

impl Default for PhaseCorrelationConfig {
    fn default() -> Self {
        Self {
            upsample_factor: 100,
            reference_band: 1,
            max_registration_error: None,
        }
    }
}

/// Translation in pixels: moving the second grid by (dy, dx) aligns it with the first.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Shift {
    pub dy: f64,
    pub dx: f64,
}

impl Shift {
    pub fn new(dy: f64, dx: f64) -> Self {
        Self { dy, dx }
    }

    /// Re-express a shift measured on grid `from` in pixels of grid `to`.
    pub fn rescaled(&self, from: &GeoTransform, to: &GeoTransform) -> Result<Shift> {
        let (gx, gy) = from.pixel_offset_to_geo(self.dx, self.dy);
        let (dx, dy) = to.geo_offset_to_pixel(gx, gy)?;
        Ok(Shift { dy, dx })
    }

    pub fn magnitude(&self) -> f64 {
        self.dy.hypot(self.dx)
    }
}

impl fmt::Display for Shift {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(dy={:.3}, dx={:.3})", self.dy, self.dx)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CorrelationResult {
    pub shift: Shift,
    /// Normalised RMS registration error in [0, 1]; 0 is a perfect match.
    pub error: f64,
    /// Global phase offset between the grids, in radians.
    pub phase_difference: f64,
}

impl CorrelationResult {
    pub fn is_trustworthy(&self, max_error: Option<f64>) -> bool {
        max_error.map_or(true, |limit| self.error <= limit)
    }
}

fn check_signal(grid: &Array2<f64>, label: &str) -> Result<()> {
    if grid.is_empty() {
        return Err(AlignError::DegenerateInput(format!("{} grid is empty", label)));
    }
    if grid.iter().any(|v| !v.is_finite()) {
        return Err(AlignError::DegenerateInput(format!("{} grid contains non-finite values", label)));
    }
    let n = grid.len() as f64;
    let mean = grid.sum() / n;
    let variance = grid.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    if variance <= 1e-12 * (1.0 + mean * mean) {
        return Err(AlignError::DegenerateInput(format!(
            "{} grid is flat (mean {}, variance {:e})",
            label, mean, variance
        )));
    }
    Ok(())
}

/// Index of the largest value; the first in row-major order wins ties.
fn find_peak<A, F>(surface: &Array2<A>, magnitude: F) -> (usize, usize)
where
    F: Fn(&A) -> f64,
{
    let mut best = (0, 0);
    let mut best_val = f64::NEG_INFINITY;
    for ((r, c), v) in surface.indexed_iter() {
        let val = magnitude(v);
        if val > best_val {
            best_val = val;
            best = (r, c);
        }
    }
    best
}

/// Wrap a peak index on a periodic axis of length `n` to a signed shift.
fn signed_shift(index: usize, n: usize) -> f64 {
    if index > n / 2 {
        index as f64 - n as f64
    } else {
        index as f64
    }
}

fn registration_error(peak: Complex64, reference_energy: f64, moving_energy: f64) -> f64 {
    let denom = reference_energy * moving_energy;
    if denom <= 0.0 {
        return 1.0;
    }
    (1.0 - peak.norm_sqr() / denom).abs().sqrt()
}

/// Estimate the translation that registers `moving` onto `reference`.
///
/// If `moving[r, c] == reference[r + dy, c + dx]`, the result is `(dy, dx)`.
pub fn estimate_shift(
    reference: &Array2<f64>,
    moving: &Array2<f64>,
    config: &PhaseCorrelationConfig,
) -> Result<CorrelationResult> {
    if reference.dim() != moving.dim() {
        let (h, w) = moving.dim();
        return Err(AlignError::InvalidDimensions(w, h));
    }
    if config.upsample_factor == 0 {
        return Err(AlignError::InvalidUpsampleFactor(config.upsample_factor));
    }
    check_signal(reference, "reference")?;
    check_signal(moving, "moving")?;

    let (height, width) = reference.dim();
    let reference_spectrum = Spectrum::forward(reference);
    let moving_spectrum = Spectrum::forward(moving);
    let product = reference_spectrum.cross_power(&moving_spectrum);
    let whitened = product.whitened();

    let surface = whitened.correlation_surface();
    let (peak_row, peak_col) = find_peak(&surface, |v| *v);
    let mut dy = signed_shift(peak_row, height);
    let mut dx = signed_shift(peak_col, width);
    debug!(
        "Integer correlation peak at ({}, {}) -> shift ({}, {}), value {:.4}",
        peak_row, peak_col, dy, dx, surface[[peak_row, peak_col]]
    );

    if config.upsample_factor > 1 {
        let upsample = config.upsample_factor as f64;
        let size = (REFINE_WINDOW * upsample).ceil() as usize;
        let half = (size / 2) as f64;
        let patch = whitened.upsampled_correlation((dy, dx), upsample, size);
        let (row, col) = find_peak(&patch, |v| v.norm());
        dy += (row as f64 - half) / upsample;
        dx += (col as f64 - half) / upsample;
        debug!("Refined shift on {}x{} patch: ({:.4}, {:.4})", size, size, dy, dx);
    }

    let peak = product.correlation_at(dy, dx);
    let error = registration_error(peak, reference_spectrum.energy(), moving_spectrum.energy());

    let result = CorrelationResult {
        shift: Shift { dy, dx },
        error,
        phase_difference: peak.im.atan2(peak.re),
    };

    info!("Estimated shift {} with registration error {:.4}", result.shift, result.error);
    if !result.is_trustworthy(config.max_registration_error) {
        warn!(
            "Registration error {:.4} exceeds the configured maximum {:.4}",
            result.error,
            config.max_registration_error.unwrap_or_default()
        );
    }
    Ok(result)
}

/// One band as a real grid for correlation; nodata pixels take the mean of the valid ones.
pub fn correlation_grid<T: Pixel>(raster: &Raster<T>, band: usize) -> Result<Array2<f64>> {
    let values = raster.band(band)?;
    let mut grid = values.mapv(T::to_f64_lossy);

    let (sum, count) = values
        .iter()
        .filter(|&&v| !raster.is_nodata(v))
        .fold((0.0, 0usize), |(s, n), v| (s + v.to_f64_lossy(), n + 1));
    if count == 0 {
        return Err(AlignError::DegenerateInput(format!("band {} has no valid pixels", band)));
    }
    let mean = sum / count as f64;

    let mut replaced = 0usize;
    grid.zip_mut_with(values, |g, &v| {
        if raster.is_nodata(v) {
            *g = mean;
            replaced += 1;
        }
    });
    if replaced > 0 {
        debug!("Replaced {} nodata pixels with the band mean {:.4}", replaced, mean);
    }
    Ok(grid)
}

/// Move the content of `raster` by `shift` pixels, keeping its grid.
///
/// The raster's georeference is translated by the shift and the relabelled raster is
/// resampled back onto its own grid, so the output has the input's shape, pixel size
/// and transform.
pub fn apply_shift<T: Pixel>(raster: &Raster<T>, shift: &Shift, config: &ResampleConfig) -> Result<Raster<T>> {
    let grid = TargetGrid::of(raster);
    let corrected = raster.transform().translated_pixels(shift.dx, shift.dy);
    debug!("Re-registered geotransform: {}", corrected);

    let relabelled = raster.clone().with_transform(corrected);
    resample(&relabelled, &grid, config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crs::Crs;
    use approx::assert_abs_diff_eq;

    /// Smooth scene of Gaussian blobs, sampled at (r + dy, c + dx).
    fn blobs(height: usize, width: usize, dy: f64, dx: f64) -> Array2<f64> {
        const BLOBS: [(f64, f64, f64, f64); 7] = [
            // (row, col, sigma, amplitude)
            (22.0, 25.0, 2.5, 100.0),
            (30.5, 40.0, 2.0, 60.0),
            (40.0, 22.5, 3.0, 80.0),
            (27.0, 33.0, 2.2, 45.0),
            (41.5, 41.0, 2.8, 70.0),
            (33.0, 27.5, 2.0, 30.0),
            (24.0, 44.0, 2.4, 55.0),
        ];
        Array2::from_shape_fn((height, width), |(r, c)| {
            let (y, x) = (r as f64 + dy, c as f64 + dx);
            BLOBS
                .iter()
                .map(|&(by, bx, sigma, amp)| {
                    amp * (-((y - by).powi(2) + (x - bx).powi(2)) / (2.0 * sigma * sigma)).exp()
                })
                .sum()
        })
    }

    #[test]
    fn test_zero_shift() {
        let grid = blobs(64, 64, 0.0, 0.0);
        let result = estimate_shift(&grid, &grid, &PhaseCorrelationConfig::default()).unwrap();
        assert_abs_diff_eq!(result.shift.dy, 0.0, epsilon = 1e-6);
        assert_abs_diff_eq!(result.shift.dx, 0.0, epsilon = 1e-6);
        assert!(result.error < 1e-6, "error {}", result.error);
        assert_abs_diff_eq!(result.phase_difference, 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_recovers_fractional_shifts() {
        let reference = blobs(64, 64, 0.0, 0.0);
        for (dy, dx) in [(2.3, -1.7), (-4.6, 3.25), (0.5, 0.0), (-0.2, 4.9), (5.0, -5.0), (-3.85, -2.45)] {
            let moving = blobs(64, 64, dy, dx);
            let result = estimate_shift(&reference, &moving, &PhaseCorrelationConfig::default()).unwrap();
            assert!(
                (result.shift.dy - dy).abs() < 0.1 && (result.shift.dx - dx).abs() < 0.1,
                "expected ({}, {}), got {}",
                dy,
                dx,
                result.shift
            );
            assert!(result.error < 0.2, "error {} for ({}, {})", result.error, dy, dx);
        }
    }

    #[test]
    fn test_non_square_grid() {
        let reference = blobs(60, 72, 0.0, 0.0);
        let moving = blobs(60, 72, -1.4, 2.6);
        let result = estimate_shift(&reference, &moving, &PhaseCorrelationConfig::default()).unwrap();
        assert_abs_diff_eq!(result.shift.dy, -1.4, epsilon = 0.1);
        assert_abs_diff_eq!(result.shift.dx, 2.6, epsilon = 0.1);
    }

    #[test]
    fn test_integer_only_without_upsampling() {
        let reference = blobs(64, 64, 0.0, 0.0);
        let moving = blobs(64, 64, 3.0, -2.0);
        let config = PhaseCorrelationConfig {
            upsample_factor: 1,
            ..Default::default()
        };
        let result = estimate_shift(&reference, &moving, &config).unwrap();
        assert_eq!(result.shift, Shift::new(3.0, -2.0));
    }

    #[test]
    fn test_flat_grid_is_degenerate() {
        let flat = Array2::from_elem((16, 16), 42.0);
        let textured = blobs(16, 16, 0.0, 0.0);
        let config = PhaseCorrelationConfig::default();
        assert!(matches!(
            estimate_shift(&flat, &textured, &config),
            Err(AlignError::DegenerateInput(_))
        ));
        assert!(matches!(
            estimate_shift(&textured, &flat, &config),
            Err(AlignError::DegenerateInput(_))
        ));
    }

    #[test]
    fn test_shape_mismatch() {
        let a = blobs(16, 16, 0.0, 0.0);
        let b = blobs(16, 17, 0.0, 0.0);
        assert!(matches!(
            estimate_shift(&a, &b, &PhaseCorrelationConfig::default()),
            Err(AlignError::InvalidDimensions(17, 16))
        ));
    }

    #[test]
    fn test_invalid_upsample_factor() {
        let a = blobs(16, 16, 0.0, 0.0);
        let config = PhaseCorrelationConfig {
            upsample_factor: 0,
            ..Default::default()
        };
        assert!(matches!(
            estimate_shift(&a, &a, &config),
            Err(AlignError::InvalidUpsampleFactor(0))
        ));
    }

    #[test]
    fn test_peak_ties_pick_lowest_index() {
        let surface = ndarray::arr2(&[[0.0, 2.0], [2.0, 1.0]]);
        assert_eq!(find_peak(&surface, |v| *v), (0, 1));
    }

    #[test]
    fn test_signed_shift_wraps() {
        assert_eq!(signed_shift(0, 10), 0.0);
        assert_eq!(signed_shift(5, 10), 5.0);
        assert_eq!(signed_shift(6, 10), -4.0);
        assert_eq!(signed_shift(5, 9), -4.0);
    }

    #[test]
    fn test_rescaled_shift() {
        let fine = GeoTransform::north_up(0.0, 0.0, 1.0, -1.0).unwrap();
        let coarse = GeoTransform::north_up(5.0, 5.0, 2.0, -2.0).unwrap();
        let shift = Shift::new(2.0, -4.0).rescaled(&fine, &coarse).unwrap();
        assert_abs_diff_eq!(shift.dy, 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(shift.dx, -2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_apply_integer_shift() {
        let band = Array2::from_shape_fn((8, 10), |(r, c)| (r * 10 + c) as u16);
        let transform = GeoTransform::north_up(500.0, 800.0, 30.0, -30.0).unwrap();
        let raster = Raster::new(vec![band.clone()], transform, Crs::default(), Some(9999.0)).unwrap();

        let shifted = apply_shift(&raster, &Shift::new(2.0, -3.0), &ResampleConfig::default()).unwrap();
        assert_eq!(shifted.shape(), raster.shape());
        assert_eq!(shifted.transform(), raster.transform());

        let out = shifted.band(1).unwrap();
        // Content moves 2 rows down and 3 columns left
        assert_eq!(out[[2, 0]], band[[0, 3]]);
        assert_eq!(out[[7, 6]], band[[5, 9]]);
        assert!(out.row(0).iter().all(|&v| v == 9999));
        assert!(out.column(9).iter().all(|&v| v == 9999));
    }

    #[test]
    fn test_estimate_then_apply_aligns_content() {
        let (dy, dx) = (1.6, -2.3);
        let transform = GeoTransform::north_up(0.0, 0.0, 1.0, -1.0).unwrap();
        let reference = blobs(64, 64, 0.0, 0.0);
        let moving = Raster::new(
            vec![blobs(64, 64, dy, dx).mapv(|v| v as f32)],
            transform,
            Crs::default(),
            None,
        )
        .unwrap();

        let result = estimate_shift(&reference, &correlation_grid(&moving, 1).unwrap(), &PhaseCorrelationConfig::default()).unwrap();
        let aligned = apply_shift(&moving, &result.shift, &ResampleConfig::default()).unwrap();
        let aligned = aligned.band(1).unwrap();

        let mut total = 0.0;
        let mut count = 0;
        for r in 8..56 {
            for c in 8..56 {
                total += (aligned[[r, c]] as f64 - reference[[r, c]]).abs();
                count += 1;
            }
        }
        let mean_abs = total / count as f64;
        assert!(mean_abs < 1.0, "mean abs difference {}", mean_abs);
    }

    #[test]
    fn test_correlation_grid_fills_nodata_with_mean() {
        let band = ndarray::arr2(&[[1u8, 255], [3, 5]]);
        let transform = GeoTransform::north_up(0.0, 0.0, 1.0, -1.0).unwrap();
        let raster = Raster::new(vec![band], transform, Crs::default(), Some(255.0)).unwrap();
        let grid = correlation_grid(&raster, 1).unwrap();
        assert_eq!(grid, ndarray::arr2(&[[1.0, 3.0], [3.0, 5.0]]));
        assert!(matches!(correlation_grid(&raster, 2), Err(AlignError::InvalidBand(2, 1))));
    }
}
