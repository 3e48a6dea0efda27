use crate::error::{AlignError, Result};

/// GTiff codecs accepted for the outputs.
const COMPRESSION_CODECS: [&str; 4] = ["DEFLATE", "LZW", "ZSTD", "NONE"];

/// GTiff creation settings shared by every output raster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteOptions {
    compression: String,
    tile_size: usize,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            compression: "DEFLATE".to_string(),
            tile_size: 256,
        }
    }
}

impl WriteOptions {
    /// Compression names are case-insensitive.
    pub fn new(compression: &str, tile_size: usize) -> Result<Self> {
        let compression = compression.to_uppercase();
        if !COMPRESSION_CODECS.contains(&compression.as_str()) {
            return Err(AlignError::InvalidCompression(compression));
        }
        // GTiff block dimensions must be multiples of 16
        if tile_size == 0 || tile_size % 16 != 0 {
            return Err(AlignError::InvalidTileSize(tile_size));
        }
        Ok(Self { compression, tile_size })
    }

    pub fn compression(&self) -> &str {
        &self.compression
    }

    pub fn tile_size(&self) -> usize {
        self.tile_size
    }

    /// Creation options for a raster of the given size; rasters smaller than a tile are striped.
    pub fn dataset_options(&self, width: usize, height: usize) -> Vec<String> {
        let mut options = vec![format!("COMPRESS={}", self.compression)];
        if width >= self.tile_size && height >= self.tile_size {
            options.push("TILED=YES".to_string());
            options.push(format!("BLOCKXSIZE={}", self.tile_size));
            options.push(format!("BLOCKYSIZE={}", self.tile_size));
        }
        options.push("BIGTIFF=IF_SAFER".to_string());
        options
    }
}
