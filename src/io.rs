use crate::crs::Crs;
use crate::error::{AlignError, Result};
use crate::geo::GeoTransform;
use crate::output::WriteOptions;
use crate::pipeline::RasterStore;
use crate::raster::{Pixel, Raster};
use gdal::cpl::CslStringList;
use gdal::raster::{Buffer, GdalDataType, GdalType, RasterBand};
use gdal::{Dataset, DriverManager};
use log::{debug, info};
use ndarray::Array2;
use std::path::Path;

/// Data type of the first band, used to pick the pixel type a run works in.
pub fn band_type(path: &Path) -> Result<GdalDataType> {
    let dataset = Dataset::open(path)?;
    let rasterband: RasterBand = dataset.rasterband(1)?;
    Ok(rasterband.band_type())
}

/// GeoTIFF reading and writing through GDAL.
#[derive(Debug, Clone, Default)]
pub struct GdalStore {
    options: WriteOptions,
}

impl GdalStore {
    pub fn new(options: WriteOptions) -> Self {
        Self { options }
    }
}

fn read_band<T: Pixel + GdalType>(dataset: &Dataset, index: usize, width: usize, height: usize) -> Result<Array2<T>> {
    let rasterband = dataset.rasterband(index)?;
    let buffer = rasterband.read_as::<T>((0, 0), (width, height), (width, height), None)?;
    let data: Vec<T> = buffer.into_iter().collect();
    Ok(Array2::from_shape_vec((height, width), data)?)
}

impl<T: Pixel + GdalType> RasterStore<T> for GdalStore {
    fn read(&self, path: &Path) -> Result<Raster<T>> {
        info!("Opening raster: {}", path.display());
        let dataset = Dataset::open(path)?;

        let (width, height) = dataset.raster_size();
        let band_count = dataset.raster_count() as usize;
        if width == 0 || height == 0 || band_count == 0 {
            return Err(AlignError::InvalidDimensions(width, height));
        }

        let transform = GeoTransform::from_gdal(dataset.geo_transform()?)?;
        let crs = Crs::canonical(&dataset.projection());
        let nodata = dataset.rasterband(1)?.no_data_value();

        debug!("Raster dimensions: {}x{}, {} band(s)", width, height, band_count);
        debug!("Geotransform: {}", transform);
        debug!("CRS: {}, nodata: {:?}", crs, nodata);

        let bands = (1..=band_count)
            .map(|index| read_band::<T>(&dataset, index, width, height))
            .collect::<Result<Vec<_>>>()?;

        Raster::new(bands, transform, crs, nodata)
    }

    fn write(&self, path: &Path, raster: &Raster<T>) -> Result<()> {
        let (height, width) = raster.shape();
        let driver = DriverManager::get_driver_by_name("GTiff")?;

        let mut gdal_options = CslStringList::new();
        for opt in self.options.dataset_options(width, height) {
            gdal_options.add_string(&opt)?;
        }

        let mut dataset = driver.create_with_band_type_with_options::<T, _>(
            path,
            width,
            height,
            raster.band_count(),
            &gdal_options,
        )?;

        dataset.set_geo_transform(&raster.transform().to_gdal())?;
        if !raster.crs().is_empty() {
            dataset.set_projection(raster.crs().wkt())?;
        }

        for (i, band) in raster.bands().iter().enumerate() {
            let band_index = i + 1;
            debug!("Writing band {} of {}", band_index, raster.band_count());

            let mut raster_band = dataset.rasterband(band_index)?;
            // Row-major order, which is what GDAL expects
            let mut buffer = Buffer::new((width, height), band.iter().copied().collect::<Vec<T>>());
            raster_band.write((0, 0), (width, height), &mut buffer)?;

            if let Some(nodata) = raster.nodata() {
                raster_band.set_no_data_value(Some(nodata))?;
            }
        }

        debug!("Wrote {} band(s) to {}", raster.band_count(), path.display());
        Ok(())
    }
}
