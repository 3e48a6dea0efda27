//! Affine georeferencing and the geographic area of interest.
//!
//! `GeoTransform` uses the GDAL coefficient order:
//!
//! ```text
//! x = gt[0] + col * gt[1] + row * gt[2]
//! y = gt[3] + col * gt[4] + row * gt[5]
//! ```
//!
//! where (col, row) address pixel corners; the centre of pixel (c, r) is at (c + 0.5, r + 0.5).

use crate::error::{AlignError, Result};
use serde::Deserialize;
use std::fmt;
use std::str::FromStr;

/// Relative determinant below which a transform is treated as singular.
const SINGULAR_TOLERANCE: f64 = 1e-12;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoTransform {
    gt: [f64; 6],
}

impl GeoTransform {
    /// Build from GDAL-ordered coefficients, rejecting non-invertible transforms.
    pub fn from_gdal(gt: [f64; 6]) -> Result<Self> {
        let transform = Self { gt };
        transform.check_invertible()?;
        Ok(transform)
    }

    /// North-up transform with no rotation terms.
    pub fn north_up(origin_x: f64, origin_y: f64, pixel_width: f64, pixel_height: f64) -> Result<Self> {
        Self::from_gdal([origin_x, pixel_width, 0.0, origin_y, 0.0, pixel_height])
    }

    pub fn to_gdal(&self) -> [f64; 6] {
        self.gt
    }

    pub fn origin(&self) -> (f64, f64) {
        (self.gt[0], self.gt[3])
    }

    pub fn pixel_width(&self) -> f64 {
        self.gt[1]
    }

    /// Signed; negative for north-up imagery.
    pub fn pixel_height(&self) -> f64 {
        self.gt[5]
    }

    pub fn determinant(&self) -> f64 {
        self.gt[1] * self.gt[5] - self.gt[2] * self.gt[4]
    }

    fn check_invertible(&self) -> Result<()> {
        let det = self.determinant();
        let scale = self.gt[1].abs().max(self.gt[2].abs()) * self.gt[4].abs().max(self.gt[5].abs());
        if !det.is_finite() || det == 0.0 || det.abs() <= SINGULAR_TOLERANCE * scale {
            return Err(AlignError::SingularTransform(det));
        }
        Ok(())
    }

    /// Pixel (col, row) to geographic (x, y).
    pub fn pixel_to_geo(&self, col: f64, row: f64) -> (f64, f64) {
        let gt = &self.gt;
        (
            gt[0] + col * gt[1] + row * gt[2],
            gt[3] + col * gt[4] + row * gt[5],
        )
    }

    /// Geographic (x, y) to fractional pixel (col, row).
    pub fn geo_to_pixel(&self, x: f64, y: f64) -> Result<(f64, f64)> {
        let (dx, dy) = (x - self.gt[0], y - self.gt[3]);
        self.geo_offset_to_pixel(dx, dy)
    }

    /// Linear part only: a displacement in pixels expressed in geographic units.
    pub fn pixel_offset_to_geo(&self, d_col: f64, d_row: f64) -> (f64, f64) {
        let gt = &self.gt;
        (d_col * gt[1] + d_row * gt[2], d_col * gt[4] + d_row * gt[5])
    }

    /// Inverse of [`pixel_offset_to_geo`](Self::pixel_offset_to_geo).
    pub fn geo_offset_to_pixel(&self, dx: f64, dy: f64) -> Result<(f64, f64)> {
        self.check_invertible()?;
        let gt = &self.gt;
        let det = self.determinant();
        let col = (gt[5] * dx - gt[2] * dy) / det;
        let row = (gt[1] * dy - gt[4] * dx) / det;
        Ok((col, row))
    }

    /// Same transform with its origin moved by (dx, dy) geographic units.
    pub fn translated(&self, dx: f64, dy: f64) -> GeoTransform {
        let mut gt = self.gt;
        gt[0] += dx;
        gt[3] += dy;
        GeoTransform { gt }
    }

    /// Same transform with its origin moved to what is currently pixel (d_col, d_row).
    ///
    /// For north-up grids this equals `translated(d_col * pixel_width, d_row * pixel_height)`.
    pub fn translated_pixels(&self, d_col: f64, d_row: f64) -> GeoTransform {
        let (dx, dy) = self.pixel_offset_to_geo(d_col, d_row);
        self.translated(dx, dy)
    }

    /// Geographic bounds of a `width` x `height` grid on this transform.
    pub fn footprint(&self, width: usize, height: usize) -> Bounds {
        let (w, h) = (width as f64, height as f64);
        Bounds::enclosing(&[
            self.pixel_to_geo(0.0, 0.0),
            self.pixel_to_geo(w, 0.0),
            self.pixel_to_geo(0.0, h),
            self.pixel_to_geo(w, h),
        ])
    }

    /// True when both transforms address the same grid to within `tolerance` pixels.
    pub fn same_grid(&self, other: &GeoTransform, tolerance: f64) -> bool {
        let size = self.gt[1].abs().max(self.gt[5].abs()).max(f64::MIN_POSITIVE);
        let linear = [1, 2, 4, 5]
            .iter()
            .all(|&i| (self.gt[i] - other.gt[i]).abs() <= tolerance * size);
        linear
            && (self.gt[0] - other.gt[0]).abs() <= tolerance * size
            && (self.gt[3] - other.gt[3]).abs() <= tolerance * size
    }
}

impl fmt::Display for GeoTransform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let gt = &self.gt;
        write!(
            f,
            "[{}, {}, {}, {}, {}, {}]",
            gt[0], gt[1], gt[2], gt[3], gt[4], gt[5]
        )
    }
}

/// Axis-aligned geographic rectangle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl Bounds {
    pub fn enclosing(points: &[(f64, f64)]) -> Bounds {
        let mut bounds = Bounds {
            min_x: f64::INFINITY,
            min_y: f64::INFINITY,
            max_x: f64::NEG_INFINITY,
            max_y: f64::NEG_INFINITY,
        };
        for &(x, y) in points {
            bounds.min_x = bounds.min_x.min(x);
            bounds.min_y = bounds.min_y.min(y);
            bounds.max_x = bounds.max_x.max(x);
            bounds.max_y = bounds.max_y.max(y);
        }
        bounds
    }

    /// Positive-area overlap test; touching edges do not count.
    pub fn intersects(&self, other: &Bounds) -> bool {
        self.min_x < other.max_x
            && other.min_x < self.max_x
            && self.min_y < other.max_y
            && other.min_y < self.max_y
    }
}

/// Geographic area of interest, validated so that north > south and east > west.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aoi {
    north: f64,
    south: f64,
    east: f64,
    west: f64,
}

impl Aoi {
    pub fn new(north: f64, south: f64, east: f64, west: f64) -> Result<Self> {
        for (name, value) in [("north", north), ("south", south), ("east", east), ("west", west)] {
            if !value.is_finite() {
                return Err(AlignError::InvalidAoi(format!("{} is not finite: {}", name, value)));
            }
        }
        if north <= south {
            return Err(AlignError::InvalidAoi(format!(
                "north ({}) must be greater than south ({})",
                north, south
            )));
        }
        if east <= west {
            return Err(AlignError::InvalidAoi(format!(
                "east ({}) must be greater than west ({})",
                east, west
            )));
        }
        Ok(Self {
            north,
            south,
            east,
            west,
        })
    }

    pub fn north(&self) -> f64 {
        self.north
    }

    pub fn south(&self) -> f64 {
        self.south
    }

    pub fn east(&self) -> f64 {
        self.east
    }

    pub fn west(&self) -> f64 {
        self.west
    }

    /// Corners as (x, y) = (lon, lat), clockwise from the north-west corner.
    pub fn corners(&self) -> [(f64, f64); 4] {
        [
            (self.west, self.north),
            (self.east, self.north),
            (self.east, self.south),
            (self.west, self.south),
        ]
    }

    pub fn bounds(&self) -> Bounds {
        Bounds {
            min_x: self.west,
            min_y: self.south,
            max_x: self.east,
            max_y: self.north,
        }
    }
}

/// JSON form of an AOI: `{"north": .., "south": .., "east": .., "west": ..}`.
#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct AoiJson {
    north: f64,
    south: f64,
    east: f64,
    west: f64,
}

impl FromStr for Aoi {
    type Err = AlignError;

    /// Parse `north=<lat>;south=<lat>;east=<lon>;west=<lon>` (any key order), or the
    /// same four keys as a JSON object.
    fn from_str(s: &str) -> Result<Self> {
        if s.trim_start().starts_with('{') {
            let json: AoiJson =
                serde_json::from_str(s).map_err(|e| AlignError::InvalidAoi(format!("bad JSON AOI: {}", e)))?;
            return Aoi::new(json.north, json.south, json.east, json.west);
        }

        let mut north = None;
        let mut south = None;
        let mut east = None;
        let mut west = None;

        for part in s.split(';').map(str::trim).filter(|p| !p.is_empty()) {
            let (key, value) = part
                .split_once('=')
                .ok_or_else(|| AlignError::InvalidAoi(format!("expected key=value, got '{}'", part)))?;
            let key = key.trim().to_ascii_lowercase();
            let value: f64 = value
                .trim()
                .parse()
                .map_err(|_| AlignError::InvalidAoi(format!("{} is not a number: '{}'", key, value.trim())))?;

            let slot = match key.as_str() {
                "north" => &mut north,
                "south" => &mut south,
                "east" => &mut east,
                "west" => &mut west,
                other => return Err(AlignError::InvalidAoi(format!("unknown key '{}'", other))),
            };
            if slot.replace(value).is_some() {
                return Err(AlignError::InvalidAoi(format!("duplicate key '{}'", key)));
            }
        }

        let missing = |name: &str| AlignError::InvalidAoi(format!("missing key '{}'", name));
        Aoi::new(
            north.ok_or_else(|| missing("north"))?,
            south.ok_or_else(|| missing("south"))?,
            east.ok_or_else(|| missing("east"))?,
            west.ok_or_else(|| missing("west"))?,
        )
    }
}

impl fmt::Display for Aoi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "north={};south={};east={};west={}",
            self.north, self.south, self.east, self.west
        )
    }
}
