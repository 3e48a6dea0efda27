use std::fmt;
use thiserror::Error;

/// Pipeline stage an error surfaced in, used for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Read,
    Clip,
    Resample,
    Align,
    Write,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Read => "read",
            Stage::Clip => "clip",
            Stage::Resample => "resample",
            Stage::Align => "align",
            Stage::Write => "write",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum AlignError {
    #[cfg(feature = "gdal")]
    #[error("GDAL error: {0}")]
    Gdal(#[from] gdal::errors::GdalError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Array shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),

    #[error("Invalid AOI: {0}")]
    InvalidAoi(String),

    #[error("AOI does not intersect the raster footprint: {0}")]
    EmptyIntersection(String),

    #[error("Geotransform is not invertible (determinant {0:e})")]
    SingularTransform(f64),

    #[error("Coordinate reference systems differ: {0} vs {1}")]
    IncompatibleCrs(String, String),

    #[error("Correlation input has no usable signal: {0}")]
    DegenerateInput(String),

    #[error("Raster has invalid dimensions: {0}x{1}")]
    InvalidDimensions(usize, usize),

    #[error("Band {0} does not exist (raster has {1} bands)")]
    InvalidBand(usize, usize),

    #[error("Invalid upsample factor: {0} (must be at least 1)")]
    InvalidUpsampleFactor(usize),

    #[error("Invalid compression type: {0}")]
    InvalidCompression(String),

    #[error("Invalid tile size: {0} (must be multiple of 16)")]
    InvalidTileSize(usize),

    #[error("{stage} failed for {raster}: {source}")]
    Stage {
        stage: Stage,
        raster: String,
        #[source]
        source: Box<AlignError>,
    },
}

impl AlignError {
    /// The underlying error kind, looking through any stage context.
    pub fn root(&self) -> &AlignError {
        match self {
            AlignError::Stage { source, .. } => source.root(),
            other => other,
        }
    }
}

pub type Result<T> = std::result::Result<T, AlignError>;

/// Attach stage/raster context to a fallible pipeline step.
pub trait StageContext<T> {
    fn in_stage(self, stage: Stage, raster: &str) -> Result<T>;
}

impl<T> StageContext<T> for Result<T> {
    fn in_stage(self, stage: Stage, raster: &str) -> Result<T> {
        self.map_err(|e| AlignError::Stage {
            stage,
            raster: raster.to_string(),
            source: Box::new(e),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_context_message() {
        let err: Result<()> = Err(AlignError::EmptyIntersection("window 0x0".to_string()));
        let err = err.in_stage(Stage::Clip, "image_b").unwrap_err();
        let msg = err.to_string();
        assert!(msg.starts_with("clip failed for image_b"));
        assert!(matches!(err.root(), AlignError::EmptyIntersection(_)));
    }
}
