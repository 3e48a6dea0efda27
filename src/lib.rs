// Library exports for testing and reuse

pub mod align;
pub mod cli;
pub mod clip;
pub mod crs;
pub mod error;
pub mod geo;
#[cfg(feature = "gdal")]
pub mod io;
pub mod output;
pub mod pipeline;
pub mod raster;
pub mod resample;
pub mod spectrum;
pub mod window;

// Re-export commonly used types
pub use align::{apply_shift, estimate_shift, CorrelationResult, PhaseCorrelationConfig, Shift};
pub use clip::clip;
pub use error::{AlignError, Result};
pub use geo::{Aoi, GeoTransform};
pub use pipeline::{run, PipelineConfig, PipelineOutputs, RasterStore};
pub use raster::{Pixel, Raster};
pub use resample::{resample, ResampleConfig, Resampling, TargetGrid};
