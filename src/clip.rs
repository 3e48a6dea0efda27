use crate::error::{AlignError, Result};
use crate::geo::Aoi;
use crate::raster::{Pixel, Raster};
use crate::window::PixelWindow;
use log::{debug, info};
use ndarray::{s, Array2};
use rayon::prelude::*;

/// Fractional-pixel tolerance when rounding the AOI outward onto the pixel grid.
const GRID_SNAP: f64 = 1e-6;

/// AOI corners further than this many pixels from the raster origin are rejected.
const MAX_PIXEL_OFFSET: f64 = 1e15;

/// A clipped raster may hold at most this many times the source's pixel count.
const MAX_WINDOW_GROWTH: usize = 64;

/// Pixel window of `raster` that covers `aoi`, rounded outward.
pub fn aoi_window<T: Pixel>(raster: &Raster<T>, aoi: &Aoi) -> Result<PixelWindow> {
    let transform = raster.transform();

    let mut col_min = f64::INFINITY;
    let mut row_min = f64::INFINITY;
    let mut col_max = f64::NEG_INFINITY;
    let mut row_max = f64::NEG_INFINITY;
    for (x, y) in aoi.corners() {
        let (col, row) = transform.geo_to_pixel(x, y)?;
        if col.abs() > MAX_PIXEL_OFFSET || row.abs() > MAX_PIXEL_OFFSET {
            return Err(AlignError::InvalidAoi(format!(
                "corner ({}, {}) lies {:.0} pixels from the raster origin",
                x,
                y,
                col.abs().max(row.abs())
            )));
        }
        col_min = col_min.min(col);
        row_min = row_min.min(row);
        col_max = col_max.max(col);
        row_max = row_max.max(row);
    }
    debug!(
        "AOI in pixel space: cols [{:.3}, {:.3}], rows [{:.3}, {:.3}]",
        col_min, col_max, row_min, row_max
    );

    PixelWindow::covering(col_min, row_min, col_max, row_max, GRID_SNAP)
        .ok_or_else(|| AlignError::EmptyIntersection(format!("AOI {} covers no whole pixel", aoi)))
}

/// Crop every band of `raster` to the pixel window covering `aoi`.
///
/// Pixel size is kept; the new origin is the window's top-left pixel corner. Parts of the
/// window beyond the raster are filled with its nodata value, or `default_nodata` when it
/// declares none.
pub fn clip<T: Pixel>(raster: &Raster<T>, aoi: &Aoi, default_nodata: f64) -> Result<Raster<T>> {
    let window = aoi_window(raster, aoi)?;
    let (height, width) = raster.shape();

    let bounds = window.bounds_within(width, height).ok_or_else(|| {
        AlignError::EmptyIntersection(format!(
            "AOI {} lies outside the {}x{} raster (window at col {}, row {})",
            aoi, width, height, window.col_off, window.row_off
        ))
    })?;

    let window_pixels = window.width.checked_mul(window.height);
    let limit = (width * height).saturating_mul(MAX_WINDOW_GROWTH);
    if window_pixels.map_or(true, |n| n > limit) {
        return Err(AlignError::InvalidDimensions(window.width, window.height));
    }

    info!(
        "Clipping {}x{} raster to {}x{} window at ({}, {})",
        width, height, window.width, window.height, window.col_off, window.row_off
    );

    let fill = T::from_f64_saturating(raster.fill_value(default_nodata));
    if bounds.is_padded() {
        debug!("Window overhangs the raster, padding with {:?}", fill);
    }

    let bands: Vec<Array2<T>> = raster
        .bands()
        .par_iter()
        .map(|band| {
            let mut out = Array2::from_elem((window.height, window.width), fill);
            let src = band.slice(s![
                bounds.read_y_min..bounds.read_y_max,
                bounds.read_x_min..bounds.read_x_max
            ]);
            out.slice_mut(s![
                bounds.pad_top..bounds.pad_top + bounds.read_height(),
                bounds.pad_left..bounds.pad_left + bounds.read_width()
            ])
            .assign(&src);
            out
        })
        .collect();

    let transform = raster
        .transform()
        .translated_pixels(window.col_off as f64, window.row_off as f64);
    debug!("Clipped geotransform: {}", transform);

    let nodata = raster.derived_nodata(default_nodata, bounds.is_padded());
    Raster::new(bands, transform, raster.crs().clone(), nodata)
}
