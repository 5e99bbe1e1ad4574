use crate::rasterizer::TileRaster;
use crate::tiles::TileCoord;
use crate::types::ShadeError;
use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use image::{ExtendedColorType, ImageEncoder};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

pub const TILE_EXTENSION: &str = "png";

pub struct RasterIO;

impl RasterIO {
    /// `{output_root}/{time_bucket}/{z}/{x}/{y}.png`
    pub fn tile_path(output_root: &Path, time_bucket: &str, tile: &TileCoord) -> PathBuf {
        output_root
            .join(time_bucket)
            .join(tile.z.to_string())
            .join(tile.x.to_string())
            .join(format!("{}.{}", tile.y, TILE_EXTENSION))
    }

    /// Encode `raster` as an RGBA PNG, creating parent directories first.
    /// An existing file at `path` is replaced.
    pub fn write_png(path: &Path, raster: TileRaster) -> Result<(), ShadeError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let size = raster.size();
        let side = u32::try_from(size)
            .map_err(|_| ShadeError::Raster(format!("Tile size {} too large for PNG", size)))?;
        let pixels = raster.into_raw();
        if pixels.len() != size * size * 4 {
            return Err(ShadeError::Raster(format!(
                "Expected {} bytes of RGBA data, got {}",
                size * size * 4,
                pixels.len()
            )));
        }

        let writer = BufWriter::new(File::create(path)?);
        let encoder =
            PngEncoder::new_with_quality(writer, CompressionType::Best, FilterType::Adaptive);
        encoder.write_image(&pixels, side, side, ExtendedColorType::Rgba8)?;
        Ok(())
    }
}
