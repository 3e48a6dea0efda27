use crate::align::PhaseCorrelationConfig;
use crate::error::Result;
use crate::output::WriteOptions;
use crate::pipeline::PipelineConfig;
use crate::resample::{ResampleConfig, Resampling};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResamplingArg {
    Bilinear,
    Nearest,
}

impl From<ResamplingArg> for Resampling {
    fn from(arg: ResamplingArg) -> Self {
        match arg {
            ResamplingArg::Bilinear => Resampling::Bilinear,
            ResamplingArg::Nearest => Resampling::Nearest,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "aoi-align")]
#[command(about = "Clip two GeoTIFFs to an AOI and align the second onto the first with sub-pixel phase correlation")]
#[command(version)]
pub struct Args {
    /// Reference GeoTIFF path
    #[arg(long = "image-a", alias = "image_a", value_name = "FILE")]
    pub image_a: PathBuf,

    /// GeoTIFF to align onto the reference
    #[arg(long = "image-b", alias = "image_b", value_name = "FILE")]
    pub image_b: PathBuf,

    /// Area of interest: "north=<lat>;south=<lat>;east=<lon>;west=<lon>" or {"north":..,"south":..,"east":..,"west":..}
    #[arg(long, value_name = "BOUNDS", allow_hyphen_values = true)]
    pub aoi: String,

    /// Output directory (created if absent)
    #[arg(short, long = "out-dir", alias = "out_dir", value_name = "DIR")]
    pub out_dir: PathBuf,

    /// Interpolation used when resampling
    #[arg(long, value_enum, default_value = "bilinear")]
    pub resampling: ResamplingArg,

    /// Sub-pixel precision is 1/N pixel
    #[arg(long, value_name = "N", default_value_t = 100)]
    pub upsample_factor: usize,

    /// Band used to estimate the shift (1-based)
    #[arg(short, long, value_name = "N", default_value_t = 1)]
    pub band: usize,

    /// Fill value for pixels without data when the input declares no nodata
    #[arg(long, value_name = "VALUE", default_value_t = 0.0, allow_hyphen_values = true)]
    pub nodata: f64,

    /// Warn when the registration error exceeds this (0..1)
    #[arg(long, value_name = "ERROR")]
    pub max_error: Option<f64>,

    /// Output compression (DEFLATE, LZW, ZSTD, NONE)
    #[arg(long, value_name = "TYPE", default_value = "DEFLATE")]
    pub compress: String,

    /// Output tile size in pixels (multiple of 16)
    #[arg(long, value_name = "PIXELS", default_value_t = 256)]
    pub tile_size: usize,

    /// Number of threads (default: all available)
    #[arg(short, long, value_name = "N")]
    pub threads: Option<usize>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

impl Args {
    /// Pipeline and output settings, validated without touching any file.
    pub fn validated(&self) -> Result<(PipelineConfig, WriteOptions)> {
        let config = self.pipeline_config();
        config.validate()?;
        let options = WriteOptions::new(&self.compress, self.tile_size)?;
        Ok((config, options))
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            image_a: self.image_a.clone(),
            image_b: self.image_b.clone(),
            aoi: self.aoi.clone(),
            out_dir: self.out_dir.clone(),
            resample: ResampleConfig {
                method: self.resampling.into(),
                default_nodata: self.nodata,
            },
            correlation: PhaseCorrelationConfig {
                upsample_factor: self.upsample_factor,
                reference_band: self.band,
                max_registration_error: self.max_error,
            },
        }
    }
}
