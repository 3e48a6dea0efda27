//! End-to-end run: clip both images to the AOI, register B onto A, write the results.

use crate::align::{apply_shift, correlation_grid, estimate_shift, CorrelationResult, PhaseCorrelationConfig, Shift};
use crate::clip::clip;
use crate::crs::check_aoi_units;
use crate::error::{AlignError, Result, Stage, StageContext};
use crate::geo::Aoi;
use crate::raster::{Pixel, Raster};
use crate::resample::{resample, ResampleConfig, TargetGrid};
use log::{debug, info};
use std::fs;
use std::path::{Path, PathBuf};

pub const A_CLIPPED: &str = "A_clipped.tif";
pub const B_CLIPPED: &str = "B_clipped.tif";
pub const B_ALIGNED: &str = "B_clipped_aligned.tif";

/// Where rasters come from and go to. The pipeline itself does no raster decoding.
pub trait RasterStore<T: Pixel> {
    fn read(&self, path: &Path) -> Result<Raster<T>>;
    fn write(&self, path: &Path, raster: &Raster<T>) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub image_a: PathBuf,
    pub image_b: PathBuf,
    /// `north=<lat>;south=<lat>;east=<lon>;west=<lon>` or a JSON object with those keys
    pub aoi: String,
    pub out_dir: PathBuf,
    pub resample: ResampleConfig,
    pub correlation: PhaseCorrelationConfig,
}

impl PipelineConfig {
    /// Check the settings that need no raster, returning the parsed AOI.
    pub fn validate(&self) -> Result<Aoi> {
        let aoi: Aoi = self.aoi.parse()?;
        if self.correlation.upsample_factor == 0 {
            return Err(AlignError::InvalidUpsampleFactor(0));
        }
        Ok(aoi)
    }

    pub fn new(image_a: impl Into<PathBuf>, image_b: impl Into<PathBuf>, aoi: impl Into<String>, out_dir: impl Into<PathBuf>) -> Self {
        Self {
            image_a: image_a.into(),
            image_b: image_b.into(),
            aoi: aoi.into(),
            out_dir: out_dir.into(),
            resample: ResampleConfig::default(),
            correlation: PhaseCorrelationConfig::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineOutputs {
    pub a_clipped: PathBuf,
    pub b_clipped: PathBuf,
    pub b_aligned: PathBuf,
    /// Measured on the coarser of the two clipped grids, in its pixels.
    pub correlation: CorrelationResult,
    /// Correction applied to B', in B' pixels.
    pub applied_shift: Shift,
    /// (height, width) of A'
    pub a_shape: (usize, usize),
    /// (height, width) of B' and of the aligned output
    pub b_shape: (usize, usize),
}

fn write_output<T: Pixel, S: RasterStore<T>>(store: &S, path: &Path, raster: &Raster<T>) -> Result<()> {
    info!("Writing {}x{} raster: {}", raster.width(), raster.height(), path.display());
    store.write(path, raster).in_stage(Stage::Write, &path.display().to_string())
}

/// The raster with the larger pixel area; `a` on ties.
fn coarser<'r, T: Pixel>(a: &'r Raster<T>, b: &'r Raster<T>) -> &'r Raster<T> {
    let a_area = a.transform().determinant().abs();
    let b_area = b.transform().determinant().abs();
    if b_area > a_area * (1.0 + 1e-9) {
        b
    } else {
        a
    }
}

/// Run the clip / align pipeline, reading and writing through `store`.
pub fn run<T: Pixel, S: RasterStore<T>>(config: &PipelineConfig, store: &S) -> Result<PipelineOutputs> {
    let aoi = config.validate()?;
    info!("AOI: {}", aoi);

    let a_path = config.out_dir.join(A_CLIPPED);
    let b_path = config.out_dir.join(B_CLIPPED);
    let aligned_path = config.out_dir.join(B_ALIGNED);

    info!("Reading image A: {}", config.image_a.display());
    let image_a = store.read(&config.image_a).in_stage(Stage::Read, "image_a")?;
    info!("Reading image B: {}", config.image_b.display());
    let image_b = store.read(&config.image_b).in_stage(Stage::Read, "image_b")?;
    debug!("Image A: {}x{}, {}", image_a.width(), image_a.height(), image_a.transform());
    debug!("Image B: {}x{}, {}", image_b.width(), image_b.height(), image_b.transform());

    image_a.crs().ensure_same(image_b.crs()).in_stage(Stage::Read, "image_b")?;
    check_aoi_units(image_a.crs(), "image_a");

    let default_nodata = config.resample.default_nodata;
    let a_clipped = clip(&image_a, &aoi, default_nodata).in_stage(Stage::Clip, "image_a")?;
    drop(image_a);
    let b_clipped = clip(&image_b, &aoi, default_nodata).in_stage(Stage::Clip, "image_b")?;
    drop(image_b);

    fs::create_dir_all(&config.out_dir)?;
    write_output(store, &a_path, &a_clipped)?;
    write_output(store, &b_path, &b_clipped)?;

    // Correlate on the coarser grid.
    // The raster already on that grid passes through the resampler untouched.
    let grid = TargetGrid::of(coarser(&a_clipped, &b_clipped));
    let a_on_grid = resample(&a_clipped, &grid, &config.resample).in_stage(Stage::Resample, "image_a")?;
    let b_on_grid = resample(&b_clipped, &grid, &config.resample).in_stage(Stage::Resample, "image_b")?;

    let band = config.correlation.reference_band;
    info!("Estimating shift on band {} ({}x{})", band, grid.width, grid.height);
    let reference = correlation_grid(&a_on_grid, band).in_stage(Stage::Align, "image_a")?;
    let moving = correlation_grid(&b_on_grid, band).in_stage(Stage::Align, "image_b")?;
    drop(a_on_grid);
    drop(b_on_grid);
    let correlation = estimate_shift(&reference, &moving, &config.correlation).in_stage(Stage::Align, "image_b")?;

    let applied_shift = correlation
        .shift
        .rescaled(&grid.transform, b_clipped.transform())
        .in_stage(Stage::Align, "image_b")?;
    if applied_shift != correlation.shift {
        debug!("Shift {} on the correlation grid is {} on B's grid", correlation.shift, applied_shift);
    }

    info!("Applying shift {} to all {} band(s) of B", applied_shift, b_clipped.band_count());
    let aligned = apply_shift(&b_clipped, &applied_shift, &config.resample).in_stage(Stage::Align, "image_b")?;
    write_output(store, &aligned_path, &aligned)?;

    Ok(PipelineOutputs {
        a_clipped: a_path,
        b_clipped: b_path,
        b_aligned: aligned_path,
        correlation,
        applied_shift,
        a_shape: a_clipped.shape(),
        b_shape: aligned.shape(),
    })
}
