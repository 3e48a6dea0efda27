use clap::Parser;
use env_logger::Env;
use gdal::raster::GdalDataType;
use geotiff_aoi_align::cli::Args;
use geotiff_aoi_align::io::{band_type, GdalStore};
use geotiff_aoi_align::pipeline::{self, PipelineConfig, PipelineOutputs};
use geotiff_aoi_align::Result;
use log::{error, info};
use std::process;

fn run(args: &Args) -> Result<PipelineOutputs> {
    // Settings are checked before any input is opened
    let (config, options): (PipelineConfig, _) = args.validated()?;
    let store = GdalStore::new(options);

    // Work in image A's pixel type; B is converted on read
    let data_type = band_type(&config.image_a)?;
    info!("Input data type: {:?}", data_type);
    match data_type {
        GdalDataType::UInt8 => pipeline::run::<u8, _>(&config, &store),
        GdalDataType::UInt16 => pipeline::run::<u16, _>(&config, &store),
        GdalDataType::Int16 => pipeline::run::<i16, _>(&config, &store),
        GdalDataType::UInt32 => pipeline::run::<u32, _>(&config, &store),
        GdalDataType::Int32 => pipeline::run::<i32, _>(&config, &store),
        GdalDataType::Float32 => pipeline::run::<f32, _>(&config, &store),
        _ => pipeline::run::<f64, _>(&config, &store),
    }
}

fn main() {
    let args = Args::parse();

    // Initialize logger
    let log_level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level)).init();

    info!("=== GeoTIFF AOI Clip & Align ===");

    // Set thread pool size if specified
    if let Some(n_threads) = args.threads {
        if let Err(e) = rayon::ThreadPoolBuilder::new().num_threads(n_threads).build_global() {
            error!("Failed to build thread pool: {}", e);
            process::exit(1);
        }
        info!("Using {} threads", n_threads);
    } else {
        info!("Using all available threads");
    }

    match run(&args) {
        Ok(outputs) => {
            info!(
                "Shift {} (registration error {:.4}); applied to B as {}",
                outputs.correlation.shift, outputs.correlation.error, outputs.applied_shift
            );
            info!("A_clipped: {}x{}, B_clipped: {}x{}", outputs.a_shape.1, outputs.a_shape.0, outputs.b_shape.1, outputs.b_shape.0);
            info!("=== Done! Outputs written to {} ===", args.out_dir.display());
        }
        Err(e) => {
            error!("{}", e);
            process::exit(1);
        }
    }
}
