//! In-memory multi-band rasters.

use crate::crs::Crs;
use crate::error::{AlignError, Result};
use crate::geo::{Bounds, GeoTransform};
use ndarray::Array2;
use num_traits::{Bounded, NumCast, ToPrimitive};
use std::fmt::Debug;

/// Numeric pixel type stored in a raster band.
///
/// Interpolation happens in `f64`; results come back through
/// [`from_f64_saturating`](Pixel::from_f64_saturating), which clamps instead of wrapping.
pub trait Pixel: Copy + Default + PartialEq + Debug + Send + Sync + Bounded + NumCast + ToPrimitive + 'static {
    const IS_INTEGER: bool;

    fn to_f64_lossy(self) -> f64 {
        self.to_f64().unwrap_or(f64::NAN)
    }

    fn from_f64_saturating(value: f64) -> Self {
        if value.is_nan() {
            return if Self::IS_INTEGER {
                Self::default()
            } else {
                <Self as NumCast>::from(f64::NAN).unwrap_or_default()
            };
        }
        let value = if Self::IS_INTEGER { value.round() } else { value };
        let lo = Self::min_value().to_f64_lossy();
        let hi = Self::max_value().to_f64_lossy();
        if value <= lo {
            Self::min_value()
        } else if value >= hi {
            Self::max_value()
        } else {
            <Self as NumCast>::from(value).unwrap_or_default()
        }
    }
}

macro_rules! impl_pixel {
    ($($t:ty => $int:expr),* $(,)?) => {
        $(impl Pixel for $t {
            const IS_INTEGER: bool = $int;
        })*
    };
}

impl_pixel!(
    u8 => true,
    u16 => true,
    i16 => true,
    u32 => true,
    i32 => true,
    f32 => false,
    f64 => false,
);

/// A georeferenced stack of equally shaped bands.
#[derive(Debug, Clone, PartialEq)]
pub struct Raster<T> {
    bands: Vec<Array2<T>>,
    transform: GeoTransform,
    crs: Crs,
    nodata: Option<f64>,
}

impl<T: Pixel> Raster<T> {
    pub fn new(bands: Vec<Array2<T>>, transform: GeoTransform, crs: Crs, nodata: Option<f64>) -> Result<Self> {
        let first = bands.first().ok_or(AlignError::InvalidDimensions(0, 0))?;
        let (height, width) = first.dim();
        if width == 0 || height == 0 {
            return Err(AlignError::InvalidDimensions(width, height));
        }
        if let Some(band) = bands.iter().find(|b| b.dim() != (height, width)) {
            let (h, w) = band.dim();
            return Err(AlignError::InvalidDimensions(w, h));
        }
        Ok(Self {
            bands,
            transform,
            crs,
            nodata,
        })
    }

    pub fn band_count(&self) -> usize {
        self.bands.len()
    }

    pub fn width(&self) -> usize {
        self.bands[0].ncols()
    }

    pub fn height(&self) -> usize {
        self.bands[0].nrows()
    }

    /// (height, width), the same order as `Array2::dim`.
    pub fn shape(&self) -> (usize, usize) {
        self.bands[0].dim()
    }

    pub fn bands(&self) -> &[Array2<T>] {
        &self.bands
    }

    pub fn into_bands(self) -> Vec<Array2<T>> {
        self.bands
    }

    /// 1-based band access, as in GDAL.
    pub fn band(&self, index: usize) -> Result<&Array2<T>> {
        index
            .checked_sub(1)
            .and_then(|i| self.bands.get(i))
            .ok_or(AlignError::InvalidBand(index, self.bands.len()))
    }

    pub fn transform(&self) -> &GeoTransform {
        &self.transform
    }

    pub fn crs(&self) -> &Crs {
        &self.crs
    }

    pub fn nodata(&self) -> Option<f64> {
        self.nodata
    }

    /// Value used for pixels with no source data: the declared nodata, else `default`.
    pub fn fill_value(&self, default: f64) -> f64 {
        self.nodata.unwrap_or(default)
    }

    /// Nodata for a raster derived from this one: the declared value, or the fill value
    /// (as stored in `T`) once fill pixels have been written.
    pub fn derived_nodata(&self, default: f64, filled: bool) -> Option<f64> {
        self.nodata
            .or_else(|| filled.then(|| T::from_f64_saturating(default).to_f64_lossy()))
    }

    pub fn is_nodata(&self, value: T) -> bool {
        is_nodata(value.to_f64_lossy(), self.nodata)
    }

    pub fn footprint(&self) -> Bounds {
        self.transform.footprint(self.width(), self.height())
    }

    /// Same pixels under a different georeference.
    pub fn with_transform(self, transform: GeoTransform) -> Self {
        Self { transform, ..self }
    }
}

/// NaN counts as nodata for float rasters regardless of the declared sentinel.
pub(crate) fn is_nodata(value: f64, nodata: Option<f64>) -> bool {
    value.is_nan() || nodata.is_some_and(|nd| value == nd)
}
