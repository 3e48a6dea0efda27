use crate::error::{AlignError, Result};
use log::{debug, warn};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrsKind {
    Geographic, // lat/lon in degrees
    Projected,  // planar map units
    Unknown,
}

/// Coordinate reference system carried by a raster, stored as WKT.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Crs {
    wkt: String,
}

impl Crs {
    pub fn from_wkt(wkt: impl Into<String>) -> Self {
        Self { wkt: wkt.into() }
    }

    /// Parse through GDAL and re-export, so equivalent definitions compare equal.
    #[cfg(feature = "gdal")]
    pub fn canonical(wkt: &str) -> Self {
        use gdal::spatial_ref::SpatialRef;

        if wkt.trim().is_empty() {
            return Self::default();
        }
        match SpatialRef::from_wkt(wkt).and_then(|sr| sr.to_wkt()) {
            Ok(canonical) => Self::from_wkt(canonical),
            Err(e) => {
                warn!("Failed to parse projection WKT, comparing it verbatim: {}", e);
                Self::from_wkt(wkt)
            }
        }
    }

    pub fn wkt(&self) -> &str {
        &self.wkt
    }

    pub fn is_empty(&self) -> bool {
        self.wkt.trim().is_empty()
    }

    /// Classify from the root WKT keyword.
    pub fn kind(&self) -> CrsKind {
        let root = self.wkt.trim_start().to_ascii_uppercase();
        if root.starts_with("PROJCS") || root.starts_with("PROJCRS") {
            CrsKind::Projected
        } else if root.starts_with("GEOGCS") || root.starts_with("GEOGCRS") {
            CrsKind::Geographic
        } else {
            CrsKind::Unknown
        }
    }

    /// Equality ignoring whitespace outside quoted names.
    pub fn is_same(&self, other: &Crs) -> bool {
        normalized(&self.wkt).eq(normalized(&other.wkt))
    }

    pub fn ensure_same(&self, other: &Crs) -> Result<()> {
        if self.is_same(other) {
            debug!("CRS match: {}", self);
            Ok(())
        } else {
            Err(AlignError::IncompatibleCrs(self.to_string(), other.to_string()))
        }
    }
}

impl fmt::Display for Crs {
    /// Short label: the root keyword and its name, e.g. `PROJCS["WGS 84 / UTM zone 33N"`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("<no CRS>");
        }
        let label = self.wkt.trim().split(',').next().unwrap_or_default();
        f.write_str(label)
    }
}

fn normalized(wkt: &str) -> impl Iterator<Item = char> + '_ {
    let mut quoted = false;
    wkt.chars().filter(move |&c| {
        if c == '"' {
            quoted = !quoted;
        }
        quoted || !c.is_whitespace()
    })
}

/// Warn when the AOI (degrees) is about to be applied to a projected raster.
pub fn check_aoi_units(crs: &Crs, label: &str) {
    match crs.kind() {
        CrsKind::Geographic => debug!("{}: geographic CRS, AOI used as lat/lon", label),
        CrsKind::Projected => warn!(
            "{}: projected CRS {}, AOI values are interpreted in its map units",
            label, crs
        ),
        CrsKind::Unknown => debug!("{}: unrecognised CRS type, AOI used in raster units", label),
    }
}
