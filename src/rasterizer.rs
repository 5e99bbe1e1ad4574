use crate::shadow_engine::ShadowRegion;
use crate::tiles::TileCoord;
use ndarray::{aview1, s, Array3, Axis};

/// Edge length of every output tile in pixels.
pub const TILE_SIZE: usize = 256;

/// Translucent black used for every shaded pixel.
pub const SHADE_COLOR: [u8; 4] = [0, 0, 0, 150];

/// Square RGBA tile, stored as (row, column, channel) with row 0 at the
/// northern edge.
#[derive(Debug, Clone, PartialEq)]
pub struct TileRaster {
    data: Array3<u8>,
}

impl TileRaster {
    pub fn transparent(size: usize) -> Self {
        Self {
            data: Array3::<u8>::zeros((size, size, 4)),
        }
    }

    pub fn size(&self) -> usize {
        self.data.dim().0
    }

    #[cfg(test)]
    pub fn pixel(&self, x: usize, y: usize) -> [u8; 4] {
        let px = self.data.slice(s![y, x, ..]);
        [px[0], px[1], px[2], px[3]]
    }

    /// Number of pixels with any opacity.
    pub fn opaque_pixel_count(&self) -> usize {
        self.data
            .lanes(Axis(2))
            .into_iter()
            .filter(|px| px[3] > 0)
            .count()
    }

    /// Row-major RGBA bytes.
    pub fn into_raw(self) -> Vec<u8> {
        if self.data.is_standard_layout() {
            self.data.into_raw_vec()
        } else {
            self.data.iter().copied().collect()
        }
    }

    fn paint_block(&mut self, x: usize, y: usize, stride: usize) {
        let size = self.size();
        let x_end = (x + stride).min(size);
        let y_end = (y + stride).min(size);
        let color = aview1(&SHADE_COLOR);

        let mut block = self.data.slice_mut(s![y..y_end, x..x_end, ..]);
        for mut px in block.lanes_mut(Axis(2)) {
            px.assign(&color);
        }
    }
}

/// Paints a tile by sampling the shadow region on a coarse grid.
///
/// One point per `stride x stride` block (its top-left pixel) is tested and
/// the whole block takes the result. Output depends only on the tile, the
/// region and the sampling rate.
#[derive(Debug, Clone, Copy)]
pub struct TileRasterizer {
    tile_size: usize,
    stride: usize,
}

impl TileRasterizer {
    pub fn new(sampling_rate: usize) -> Self {
        Self::with_tile_size(sampling_rate, TILE_SIZE)
    }

    pub fn with_tile_size(sampling_rate: usize, tile_size: usize) -> Self {
        let tile_size = tile_size.max(1);
        let samples_per_edge = (tile_size / sampling_rate.max(1)).max(1);
        Self {
            tile_size,
            stride: (tile_size / samples_per_edge).max(1),
        }
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn rasterize(&self, tile: &TileCoord, region: Option<&ShadowRegion>) -> TileRaster {
        let mut raster = TileRaster::transparent(self.tile_size);
        let bounds = tile.bounds();

        let region = match region {
            Some(region) if region.intersects_rect(&bounds.to_rect()) => region,
            _ => return raster,
        };

        for pixel_y in (0..self.tile_size).step_by(self.stride) {
            for pixel_x in (0..self.tile_size).step_by(self.stride) {
                let (lon, lat) = bounds.pixel_to_lon_lat(pixel_x, pixel_y, self.tile_size);
                if region.contains(lon, lat) {
                    raster.paint_block(pixel_x, pixel_y, self.stride);
                }
            }
        }

        raster
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shadow_engine::{ShadowSetResolver, METERS_PER_DEGREE};
    use crate::types::{Building, SunPosition};
    use geo_types::{LineString, MultiPolygon, Polygon};

    const CENTER: (f64, f64) = (139.7671, 35.6812);

    fn tower() -> Building {
        let h = 0.00025;
        Building::new(
            "tower",
            vec![
                (CENTER.0 - h, CENTER.1 - h),
                (CENTER.0 + h, CENTER.1 - h),
                (CENTER.0 + h, CENTER.1 + h),
                (CENTER.0 - h, CENTER.1 + h),
            ],
            100.0,
        )
        .unwrap()
    }

    fn region_covering(tile: &TileCoord) -> ShadowRegion {
        let b = tile.bounds();
        let pad = 1.0;
        let ring = LineString::from(vec![
            (b.west - pad, b.south - pad),
            (b.east + pad, b.south - pad),
            (b.east + pad, b.north + pad),
            (b.west - pad, b.north + pad),
            (b.west - pad, b.south - pad),
        ]);
        ShadowRegion::from_shape(MultiPolygon::new(vec![Polygon::new(ring, vec![])])).unwrap()
    }

    fn pixel_of(tile: &TileCoord, lon: f64, lat: f64) -> (usize, usize) {
        let b = tile.bounds();
        let x = ((lon - b.west) / (b.east - b.west) * TILE_SIZE as f64) as usize;
        let y = ((b.north - lat) / (b.north - b.south) * TILE_SIZE as f64) as usize;
        (x.min(TILE_SIZE - 1), y.min(TILE_SIZE - 1))
    }

    #[test]
    fn test_stride_from_sampling_rate() {
        assert_eq!(TileRasterizer::new(1).stride(), 1);
        assert_eq!(TileRasterizer::new(4).stride(), 4);
        assert_eq!(TileRasterizer::new(3).stride(), 3);
        assert_eq!(TileRasterizer::new(0).stride(), 1);
        // Coarse rates snap to the nearest even split of the tile.
        assert_eq!(TileRasterizer::new(100).stride(), 128);
        assert_eq!(TileRasterizer::new(1000).stride(), 256);
    }

    #[test]
    fn test_no_region_is_fully_transparent() {
        let tile = TileCoord::from_lon_lat(CENTER.0, CENTER.1, 17);
        let raster = TileRasterizer::new(4).rasterize(&tile, None);
        assert_eq!(raster.size(), TILE_SIZE);
        assert_eq!(raster.opaque_pixel_count(), 0);
    }

    #[test]
    fn test_region_elsewhere_is_fully_transparent() {
        let far = TileCoord::new(17, 10, 10);
        let tile = TileCoord::from_lon_lat(CENTER.0, CENTER.1, 17);
        let raster = TileRasterizer::new(4).rasterize(&tile, Some(&region_covering(&far)));
        assert_eq!(raster.opaque_pixel_count(), 0);
    }

    #[test]
    fn test_covering_region_shades_every_pixel() {
        let tile = TileCoord::new(15, 29105, 12903);
        let raster = TileRasterizer::new(4).rasterize(&tile, Some(&region_covering(&tile)));
        assert_eq!(raster.opaque_pixel_count(), TILE_SIZE * TILE_SIZE);
        assert_eq!(raster.pixel(0, 0), SHADE_COLOR);
        assert_eq!(raster.pixel(255, 255), SHADE_COLOR);
    }

    #[test]
    fn test_uneven_stride_is_clipped_at_edge() {
        let tile = TileCoord::new(15, 29105, 12903);
        let raster = TileRasterizer::new(3).rasterize(&tile, Some(&region_covering(&tile)));
        assert_eq!(raster.size(), TILE_SIZE);
        assert_eq!(raster.opaque_pixel_count(), TILE_SIZE * TILE_SIZE);
    }

    #[test]
    fn test_tower_shadow_lands_north() {
        let sun = SunPosition::from_altitude_azimuth(45.0, 180.0);
        let buildings = [tower()];
        let region = ShadowSetResolver::resolve(&buildings, &sun, CENTER.1).unwrap();
        let rasterizer = TileRasterizer::new(4);

        let north = (CENTER.0, CENTER.1 + 80.0 / METERS_PER_DEGREE);
        let tile = TileCoord::from_lon_lat(north.0, north.1, 18);
        let raster = rasterizer.rasterize(&tile, Some(&region));
        let (x, y) = pixel_of(&tile, north.0, north.1);
        assert_eq!(raster.pixel(x, y), SHADE_COLOR);

        let south = (CENTER.0, CENTER.1 - 80.0 / METERS_PER_DEGREE);
        let tile = TileCoord::from_lon_lat(south.0, south.1, 18);
        let raster = rasterizer.rasterize(&tile, Some(&region));
        let (x, y) = pixel_of(&tile, south.0, south.1);
        assert_eq!(raster.pixel(x, y), [0, 0, 0, 0]);
    }

    #[test]
    fn test_rasterize_is_deterministic() {
        let sun = SunPosition::from_altitude_azimuth(30.0, 135.0);
        let buildings = [tower()];
        let region = ShadowSetResolver::resolve(&buildings, &sun, CENTER.1).unwrap();
        let tile = TileCoord::from_lon_lat(CENTER.0, CENTER.1, 17);

        let rasterizer = TileRasterizer::new(2);
        let first = rasterizer.rasterize(&tile, Some(&region));
        let second = rasterizer.rasterize(&tile, Some(&region));
        assert!(first.opaque_pixel_count() > 0);
        assert_eq!(first, second);
    }

    #[test]
    fn test_into_raw_is_row_major_rgba() {
        let tile = TileCoord::new(15, 29105, 12903);
        let raster = TileRasterizer::new(4).rasterize(&tile, Some(&region_covering(&tile)));
        let raw = raster.into_raw();
        assert_eq!(raw.len(), TILE_SIZE * TILE_SIZE * 4);
        assert_eq!(&raw[0..4], &SHADE_COLOR);
    }
}
