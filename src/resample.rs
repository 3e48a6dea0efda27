//! Affine resampling of a raster onto another pixel grid in the same CRS.
//!
//! Every destination pixel centre is mapped to geographic space through the target
//! transform, then back into the source grid, and sampled there. Positions outside the
//! source footprint become nodata.

use crate::crs::Crs;
use crate::error::{AlignError, Result};
use crate::geo::GeoTransform;
use crate::raster::{is_nodata, Pixel, Raster};
use log::{debug, info};
use ndarray::Array2;
use rayon::prelude::*;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Source coordinates closer than this to an integer are snapped onto it.
const SNAP_TOLERANCE: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Resampling {
    /// Nearest source pixel; never mixes values, suited to masks and categories.
    Nearest,
    /// Distance-weighted mean of the four surrounding source pixels.
    #[default]
    Bilinear,
}

impl FromStr for Resampling {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "nearest" => Ok(Resampling::Nearest),
            "bilinear" => Ok(Resampling::Bilinear),
            other => Err(format!("unknown resampling method '{}'", other)),
        }
    }
}

impl fmt::Display for Resampling {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resampling::Nearest => f.write_str("nearest"),
            Resampling::Bilinear => f.write_str("bilinear"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResampleConfig {
    pub method: Resampling,
    /// Fill for pixels without source data when the source declares no nodata value.
    pub default_nodata: f64,
}

impl Default for ResampleConfig {
    fn default() -> Self {
        Self {
            method: Resampling::Bilinear,
            default_nodata: 0.0,
        }
    }
}

/// Destination grid geometry.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetGrid {
    pub transform: GeoTransform,
    pub height: usize,
    pub width: usize,
    pub crs: Crs,
}

impl TargetGrid {
    pub fn new(transform: GeoTransform, height: usize, width: usize, crs: Crs) -> Self {
        Self {
            transform,
            height,
            width,
            crs,
        }
    }

    /// The grid `raster` currently sits on.
    pub fn of<T: Pixel>(raster: &Raster<T>) -> Self {
        let (height, width) = raster.shape();
        Self::new(*raster.transform(), height, width, raster.crs().clone())
    }
}

/// Affine map from destination pixel indices to fractional source pixel indices
/// (both measured at pixel centres).
#[derive(Debug, Clone, Copy)]
struct PixelMapping {
    origin: (f64, f64),
    step_col: (f64, f64),
    step_row: (f64, f64),
}

impl PixelMapping {
    fn between(source: &GeoTransform, target: &GeoTransform) -> Result<Self> {
        let (x, y) = target.pixel_to_geo(0.5, 0.5);
        let (c, r) = source.geo_to_pixel(x, y)?;
        let (gx, gy) = target.pixel_offset_to_geo(1.0, 0.0);
        let step_col = source.geo_offset_to_pixel(gx, gy)?;
        let (gx, gy) = target.pixel_offset_to_geo(0.0, 1.0);
        let step_row = source.geo_offset_to_pixel(gx, gy)?;
        Ok(Self {
            origin: (c - 0.5, r - 0.5),
            step_col,
            step_row,
        })
    }

    fn source_position(&self, col: usize, row: usize) -> (f64, f64) {
        let (c, r) = (col as f64, row as f64);
        let x = self.origin.0 + c * self.step_col.0 + r * self.step_row.0;
        let y = self.origin.1 + c * self.step_col.1 + r * self.step_row.1;
        (snap(x), snap(y))
    }
}

fn snap(v: f64) -> f64 {
    let rounded = v.round();
    if (v - rounded).abs() < SNAP_TOLERANCE {
        rounded
    } else {
        v
    }
}

/// Inside the source footprint, in pixel-centre coordinates.
fn in_footprint(x: f64, y: f64, width: usize, height: usize) -> bool {
    x >= -0.5 && y >= -0.5 && x < width as f64 - 0.5 && y < height as f64 - 0.5
}

fn sample_nearest(band: &Array2<f64>, x: f64, y: f64, nodata: Option<f64>) -> Option<f64> {
    let (height, width) = band.dim();
    if !in_footprint(x, y, width, height) {
        return None;
    }
    let col = ((x + 0.5).floor() as usize).min(width - 1);
    let row = ((y + 0.5).floor() as usize).min(height - 1);
    let value = band[[row, col]];
    (!is_nodata(value, nodata)).then_some(value)
}

/// Bilinear sample; nodata neighbours drop out and the remaining weights are renormalised.
fn sample_bilinear(band: &Array2<f64>, x: f64, y: f64, nodata: Option<f64>) -> Option<f64> {
    let (height, width) = band.dim();
    if !in_footprint(x, y, width, height) {
        return None;
    }

    let x0 = x.floor().clamp(0.0, (width - 1) as f64);
    let y0 = y.floor().clamp(0.0, (height - 1) as f64);
    let fx = (x - x0).clamp(0.0, 1.0);
    let fy = (y - y0).clamp(0.0, 1.0);
    let (x0, y0) = (x0 as usize, y0 as usize);
    let x1 = (x0 + 1).min(width - 1);
    let y1 = (y0 + 1).min(height - 1);

    let taps = [
        (y0, x0, (1.0 - fx) * (1.0 - fy)),
        (y0, x1, fx * (1.0 - fy)),
        (y1, x0, (1.0 - fx) * fy),
        (y1, x1, fx * fy),
    ];

    let mut sum = 0.0;
    let mut weight = 0.0;
    for (r, c, w) in taps {
        if w <= 0.0 {
            continue;
        }
        let value = band[[r, c]];
        if is_nodata(value, nodata) {
            continue;
        }
        sum += w * value;
        weight += w;
    }

    (weight > 0.0).then(|| sum / weight)
}

/// Resample `source` onto `grid`.
///
/// Fails with `IncompatibleCrs` when the grid uses a different CRS; no cartographic
/// reprojection is attempted. Resampling onto the source's own grid returns its pixels
/// unchanged.
pub fn resample<T: Pixel>(source: &Raster<T>, grid: &TargetGrid, config: &ResampleConfig) -> Result<Raster<T>> {
    if grid.width == 0 || grid.height == 0 {
        return Err(AlignError::InvalidDimensions(grid.width, grid.height));
    }
    source.crs().ensure_same(&grid.crs)?;

    if source.shape() == (grid.height, grid.width) && source.transform().same_grid(&grid.transform, SNAP_TOLERANCE) {
        debug!("Target grid matches the source grid, copying pixels");
        return Ok(source.clone().with_transform(grid.transform));
    }

    let mapping = PixelMapping::between(source.transform(), &grid.transform)?;
    debug!("Source position of target pixel (0, 0): {:?}", mapping.origin);
    info!(
        "Resampling {}x{} -> {}x{} ({})",
        source.width(),
        source.height(),
        grid.width,
        grid.height,
        config.method
    );

    let nodata = source.nodata();
    let fill = source.fill_value(config.default_nodata);
    let sample: fn(&Array2<f64>, f64, f64, Option<f64>) -> Option<f64> = match config.method {
        Resampling::Nearest => sample_nearest,
        Resampling::Bilinear => sample_bilinear,
    };

    let filled = AtomicUsize::new(0);
    let bands = source
        .bands()
        .par_iter()
        .map(|band| {
            let values = band.mapv(T::to_f64_lossy);
            let rows: Vec<Vec<T>> = (0..grid.height)
                .into_par_iter()
                .map(|row| {
                    (0..grid.width)
                        .map(|col| {
                            let (x, y) = mapping.source_position(col, row);
                            let value = sample(&values, x, y, nodata).unwrap_or_else(|| {
                                filled.fetch_add(1, Ordering::Relaxed);
                                fill
                            });
                            T::from_f64_saturating(value)
                        })
                        .collect()
                })
                .collect();

            let flat: Vec<T> = rows.into_iter().flatten().collect();
            Array2::from_shape_vec((grid.height, grid.width), flat)
        })
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let filled = filled.into_inner();
    if filled > 0 {
        debug!("{} target pixel(s) set to fill value {}", filled, fill);
    }
    let nodata = source.derived_nodata(config.default_nodata, filled > 0);
    Raster::new(bands, grid.transform, source.crs().clone(), nodata)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::arr2;

    fn raster_f32(band: Array2<f32>, nodata: Option<f64>) -> Raster<f32> {
        let transform = GeoTransform::north_up(0.0, 0.0, 1.0, -1.0).unwrap();
        Raster::new(vec![band], transform, Crs::from_wkt("LOCAL_CS[\"grid\"]"), nodata).unwrap()
    }

    #[test]
    fn test_identity_is_exact() {
        let band = Array2::from_shape_fn((7, 9), |(r, c)| ((r * 31 + c * 17) % 23) as f32 * 0.37);
        let raster = raster_f32(band, None);
        let out = resample(&raster, &TargetGrid::of(&raster), &ResampleConfig::default()).unwrap();
        assert_eq!(out, raster);
    }

    #[test]
    fn test_whole_pixel_offset_copies_values() {
        let band = Array2::from_shape_fn((6, 5), |(r, c)| (r * 40 + c * 3) as u8);
        let transform = GeoTransform::north_up(10.0, 20.0, 2.0, -2.0).unwrap();
        let raster = Raster::new(vec![band.clone(), band.mapv(|v| v / 2)], transform, Crs::default(), None).unwrap();

        let target = TargetGrid::new(transform.translated_pixels(1.0, 0.0), 6, 4, Crs::default());
        let out = resample(&raster, &target, &ResampleConfig::default()).unwrap();
        let expected = band.slice(ndarray::s![.., 1..]).to_owned();
        assert_eq!(out.band(1).unwrap(), &expected);
        assert_eq!(out.band(2).unwrap(), &expected.mapv(|v| v / 2));
    }

    #[test]
    fn test_bilinear_half_pixel() {
        let raster = raster_f32(arr2(&[[0.0, 10.0], [20.0, 30.0]]), None);
        // A single target pixel whose centre lies midway between all four source centres
        let target = TargetGrid::new(
            GeoTransform::north_up(0.5, -0.5, 1.0, -1.0).unwrap(),
            1,
            1,
            raster.crs().clone(),
        );
        let out = resample(&raster, &target, &ResampleConfig::default()).unwrap();
        assert_abs_diff_eq!(out.band(1).unwrap()[[0, 0]], 15.0, epsilon = 1e-6);
    }

    #[test]
    fn test_nearest_picks_closest() {
        let raster = raster_f32(arr2(&[[1.0, 2.0], [3.0, 4.0]]), None);
        let target = TargetGrid::new(
            GeoTransform::north_up(0.3, -0.6, 1.0, -1.0).unwrap(),
            1,
            1,
            raster.crs().clone(),
        );
        let config = ResampleConfig {
            method: Resampling::Nearest,
            ..Default::default()
        };
        let out = resample(&raster, &target, &config).unwrap();
        // Centre falls at (0.3, 0.6) in source pixel-centre coordinates -> row 1, col 0
        assert_eq!(out.band(1).unwrap()[[0, 0]], 3.0);
    }

    #[test]
    fn test_outside_footprint_is_nodata() {
        let raster = raster_f32(Array2::from_elem((3, 3), 5.0), Some(-1.0));
        let target = TargetGrid::new(
            GeoTransform::north_up(2.0, 0.0, 1.0, -1.0).unwrap(),
            3,
            3,
            raster.crs().clone(),
        );
        let out = resample(&raster, &target, &ResampleConfig::default()).unwrap();
        let band = out.band(1).unwrap();
        assert_eq!(band.column(0).to_vec(), vec![5.0, 5.0, 5.0]);
        assert_eq!(band.column(1).to_vec(), vec![-1.0, -1.0, -1.0]);
        assert_eq!(out.nodata(), Some(-1.0));
    }

    #[test]
    fn test_nodata_neighbours_are_excluded() {
        let raster = raster_f32(arr2(&[[-9999.0, 10.0], [20.0, 30.0]]), Some(-9999.0));
        let target = TargetGrid::new(
            GeoTransform::north_up(0.5, -0.5, 1.0, -1.0).unwrap(),
            1,
            1,
            raster.crs().clone(),
        );
        let out = resample(&raster, &target, &ResampleConfig::default()).unwrap();
        assert_abs_diff_eq!(out.band(1).unwrap()[[0, 0]], 20.0, epsilon = 1e-6);
    }

    #[test]
    fn test_downsample_averages_blocks() {
        let band = arr2(&[[1.0f32, 3.0, 5.0, 7.0], [1.0, 3.0, 5.0, 7.0]]);
        let raster = raster_f32(band, None);
        let target = TargetGrid::new(
            GeoTransform::north_up(0.0, 0.0, 2.0, -2.0).unwrap(),
            1,
            2,
            raster.crs().clone(),
        );
        let out = resample(&raster, &target, &ResampleConfig::default()).unwrap();
        let band = out.band(1).unwrap();
        assert_abs_diff_eq!(band[[0, 0]], 2.0, epsilon = 1e-6);
        assert_abs_diff_eq!(band[[0, 1]], 6.0, epsilon = 1e-6);
    }

    #[test]
    fn test_fill_saturates_to_pixel_type() {
        let transform = GeoTransform::north_up(0.0, 0.0, 1.0, -1.0).unwrap();
        let raster = Raster::new(vec![Array2::from_elem((2, 2), 200u8)], transform, Crs::default(), None).unwrap();
        let target = TargetGrid::new(transform.translated_pixels(5.0, 5.0), 2, 2, Crs::default());
        let config = ResampleConfig {
            default_nodata: -1.0,
            ..Default::default()
        };
        let out = resample(&raster, &target, &config).unwrap();
        assert!(out.band(1).unwrap().iter().all(|&v| v == 0));
        assert_eq!(out.nodata(), Some(0.0));
    }

    #[test]
    fn test_covered_target_keeps_missing_nodata() {
        let band = arr2(&[[1.0f32, 3.0, 5.0, 7.0], [1.0, 3.0, 5.0, 7.0]]);
        let raster = raster_f32(band, None);
        let target = TargetGrid::new(
            GeoTransform::north_up(0.0, 0.0, 2.0, -2.0).unwrap(),
            1,
            2,
            raster.crs().clone(),
        );
        let out = resample(&raster, &target, &ResampleConfig::default()).unwrap();
        assert_eq!(out.nodata(), None);
    }

    #[test]
    fn test_partial_cover_tags_fill_as_nodata() {
        let raster = raster_f32(Array2::from_elem((3, 3), 0.0), None);
        let target = TargetGrid::new(
            GeoTransform::north_up(2.0, 0.0, 1.0, -1.0).unwrap(),
            3,
            3,
            raster.crs().clone(),
        );
        let out = resample(&raster, &target, &ResampleConfig::default()).unwrap();
        let band = out.band(1).unwrap();
        // Column 0 holds real zeros, the rest is fill with the same value
        assert_eq!(out.nodata(), Some(0.0));
        assert!(out.is_nodata(band[[0, 1]]));
    }

    #[test]
    fn test_crs_mismatch() {
        let raster = raster_f32(Array2::zeros((2, 2)), None);
        let mut target = TargetGrid::of(&raster);
        target.crs = Crs::from_wkt("LOCAL_CS[\"other\"]");
        let err = resample(&raster, &target, &ResampleConfig::default()).unwrap_err();
        assert!(matches!(err, AlignError::IncompatibleCrs(_, _)));
    }

    #[test]
    fn test_parse_method() {
        assert_eq!("Bilinear".parse::<Resampling>().unwrap(), Resampling::Bilinear);
        assert_eq!("nearest".parse::<Resampling>().unwrap(), Resampling::Nearest);
        assert!("cubic".parse::<Resampling>().is_err());
    }
}
