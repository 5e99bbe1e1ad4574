//! Slippy-map tile coordinates.
//!
//! - `z` is the zoom level
//! - `x` is the column (0 to 2^z - 1, from west to east)
//! - `y` is the row (0 to 2^z - 1, from north to south)

use crate::types::BoundingBox;
use geo_types::{Coord, Rect};
use std::collections::HashSet;
use std::f64::consts::PI;
use std::fmt;

/// Web Mercator latitude limit, arctan(sinh(π)).
pub const MAX_LATITUDE: f64 = 85.051129;

const EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileCoord {
    pub z: u8,
    pub x: u32,
    pub y: u32,
}

/// Geographic bounds of a tile in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TileBounds {
    pub west: f64,
    pub south: f64,
    pub east: f64,
    pub north: f64,
}

impl TileBounds {
    pub fn center(&self) -> (f64, f64) {
        ((self.west + self.east) / 2.0, (self.south + self.north) / 2.0)
    }

    pub fn to_rect(&self) -> Rect<f64> {
        Rect::new(
            Coord {
                x: self.west,
                y: self.south,
            },
            Coord {
                x: self.east,
                y: self.north,
            },
        )
    }

    /// Geographic position of a pixel's top-left corner, interpolated
    /// linearly inside the bounds. Row 0 is the northern edge.
    pub fn pixel_to_lon_lat(&self, pixel_x: usize, pixel_y: usize, tile_size: usize) -> (f64, f64) {
        let u = pixel_x as f64 / tile_size as f64;
        let v = pixel_y as f64 / tile_size as f64;

        let lon = self.west + u * (self.east - self.west);
        let lat = self.north - v * (self.north - self.south);
        (lon, lat)
    }
}

impl TileCoord {
    pub fn new(z: u8, x: u32, y: u32) -> Self {
        Self { z, x, y }
    }

    /// Tile containing a point.
    ///
    /// - x = floor((lon + 180) / 360 * 2^z)
    /// - y = floor((1 - ln(tan(lat) + sec(lat)) / π) / 2 * 2^z)
    pub fn from_lon_lat(lon: f64, lat: f64, z: u8) -> Self {
        let lat = lat.clamp(-MAX_LATITUDE, MAX_LATITUDE);
        let n = (1u64 << z) as f64;

        let x = ((lon + 180.0) / 360.0 * n).floor();

        let lat_rad = lat.to_radians();
        let y = ((1.0 - (lat_rad.tan() + 1.0 / lat_rad.cos()).ln() / PI) / 2.0 * n).floor();

        // Clamp to valid range (handles edge cases at exactly ±180°)
        let max_coord = n - 1.0;
        Self {
            z,
            x: x.clamp(0.0, max_coord) as u32,
            y: y.clamp(0.0, max_coord) as u32,
        }
    }

    pub fn bounds(&self) -> TileBounds {
        let n = (1u64 << self.z) as f64;

        let west = self.x as f64 / n * 360.0 - 180.0;
        let east = (self.x as f64 + 1.0) / n * 360.0 - 180.0;

        // Latitude bounds (inverse of Slippy Map formula)
        let north = (PI * (1.0 - 2.0 * self.y as f64 / n)).sinh().atan().to_degrees();
        let south = (PI * (1.0 - 2.0 * (self.y as f64 + 1.0) / n))
            .sinh()
            .atan()
            .to_degrees();

        TileBounds {
            west,
            south,
            east,
            north,
        }
    }
}

impl fmt::Display for TileCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.z, self.x, self.y)
    }
}

/// Every tile at `zoom` that intersects `bbox`, x-major then y.
///
/// A box whose west edge lies east of its east edge crosses the
/// antimeridian and is split in two. At low zooms both halves can share
/// tiles; each tile is listed once.
pub fn tiles_covering(bbox: &BoundingBox, zoom: u8) -> Vec<TileCoord> {
    if bbox.west > bbox.east {
        let mut tiles = tiles_covering(
            &BoundingBox {
                east: 180.0,
                ..*bbox
            },
            zoom,
        );
        tiles.extend(tiles_covering(
            &BoundingBox {
                west: -180.0,
                ..*bbox
            },
            zoom,
        ));
        let mut seen = HashSet::with_capacity(tiles.len());
        tiles.retain(|tile| seen.insert(*tile));
        return tiles;
    }

    let west = bbox.west.max(-180.0);
    let east = bbox.east.min(180.0);
    let north = bbox.north.min(MAX_LATITUDE);
    let south = bbox.south.max(-MAX_LATITUDE);

    // Nudge edges inward so boxes aligned to tile edges do not pick up
    // neighbours through rounding.
    let upper_left = TileCoord::from_lon_lat(
        (west + EPSILON).min(east),
        (north - EPSILON).max(south),
        zoom,
    );
    let lower_right = TileCoord::from_lon_lat(
        (east - EPSILON).max(west),
        (south + EPSILON).min(north),
        zoom,
    );

    let mut tiles = Vec::new();
    for x in upper_left.x..=lower_right.x {
        for y in upper_left.y..=lower_right.y {
            tiles.push(TileCoord::new(zoom, x, y));
        }
    }
    tiles
}
