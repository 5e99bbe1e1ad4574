use crate::raster_io::RasterIO;
use crate::rasterizer::{TileRaster, TileRasterizer};
use crate::shadow_engine::ShadowSetResolver;
use crate::sun_position::SunPositionProvider;
use crate::tiles::{tiles_covering, TileCoord};
use crate::types::{BoundingBox, Building, ShadeError};
use chrono::{DateTime, Utc};
use log::{debug, info};
use rayon::prelude::*;
use std::path::{Path, PathBuf};

/// Renders and writes every tile of a bounding box for one instant.
///
/// The sun is resolved at each tile's own centre, so shadow timing is
/// evaluated per tile rather than once per bucket.
pub struct TileSetGenerator<'a> {
    sun: &'a dyn SunPositionProvider,
    rasterizer: TileRasterizer,
}

impl<'a> TileSetGenerator<'a> {
    pub fn new(sun: &'a dyn SunPositionProvider, rasterizer: TileRasterizer) -> Self {
        Self { sun, rasterizer }
    }

    /// Returns the written paths in enumeration order. The first tile that
    /// fails (sun position or write) aborts the whole set.
    pub fn generate(
        &self,
        bbox: &BoundingBox,
        zoom_levels: &[u8],
        buildings: &[Building],
        instant: &DateTime<Utc>,
        output_root: &Path,
        time_bucket: &str,
    ) -> Result<Vec<PathBuf>, ShadeError> {
        let reference_latitude = bbox.reference_latitude();
        let mut generated = Vec::new();

        for &zoom in zoom_levels {
            let tiles = tiles_covering(bbox, zoom);
            info!("Generating {} tiles for zoom level {}...", tiles.len(), zoom);

            let paths = tiles
                .par_iter()
                .map(|tile| -> Result<PathBuf, ShadeError> {
                    let raster = self.render_tile(tile, buildings, instant, reference_latitude)?;
                    let path = RasterIO::tile_path(output_root, time_bucket, tile);
                    let shaded = raster.opaque_pixel_count();
                    RasterIO::write_png(&path, raster)?;
                    debug!("Wrote tile {} ({} shaded px) -> {}", tile, shaded, path.display());
                    Ok(path)
                })
                .collect::<Result<Vec<_>, _>>()?;

            info!("  Completed zoom level {}: {} tiles", zoom, paths.len());
            generated.extend(paths);
        }

        Ok(generated)
    }

    pub fn render_tile(
        &self,
        tile: &TileCoord,
        buildings: &[Building],
        instant: &DateTime<Utc>,
        reference_latitude: f64,
    ) -> Result<TileRaster, ShadeError> {
        let bounds = tile.bounds();
        let (center_lon, center_lat) = bounds.center();
        let sun = self.sun.resolve(instant, center_lat, center_lon)?;

        let region = ShadowSetResolver::resolve_within(
            buildings,
            &sun,
            reference_latitude,
            Some(&bounds.to_rect()),
        );
        Ok(self.rasterizer.rasterize(tile, region.as_ref()))
    }
}
