use crate::types::{Building, SunPosition};
use geo::{Area, BooleanOps, BoundingRect, Contains, ConvexHull, Intersects};
use geo_types::{Coord, MultiPoint, MultiPolygon, Point, Polygon, Rect};
use log::{debug, warn};
use std::panic::{catch_unwind, AssertUnwindSafe};

/// Meters per degree of latitude (and of longitude at the equator).
pub const METERS_PER_DEGREE: f64 = 111_320.0;

/// Ground shadow of one building at one instant.
///
/// The shadow is the convex hull of the footprint and the footprint moved
/// by the shadow vector. That covers the base, the tip and the swept area in
/// between, but over-approximates concave or rotated footprints; it is not
/// exact ray casting.
pub struct ShadowProjector;

impl ShadowProjector {
    pub fn project(
        building: &Building,
        sun: &SunPosition,
        reference_latitude: f64,
    ) -> Option<Polygon<f64>> {
        let (dx_lon, dx_lat) = Self::shadow_offset(building.height(), sun, reference_latitude)?;

        let footprint: Vec<Coord<f64>> = building.footprint().exterior().coords().copied().collect();
        let shifted = footprint.iter().map(|c| Coord {
            x: c.x + dx_lon,
            y: c.y + dx_lat,
        });
        let points: Vec<Point<f64>> = footprint
            .iter()
            .copied()
            .chain(shifted)
            .map(Point::from)
            .collect();

        let hull = MultiPoint::new(points).convex_hull();
        if !is_usable(&hull) {
            warn!(
                "Degenerate shadow polygon for building {:?}, treating as no shadow",
                building.id()
            );
            return None;
        }
        Some(hull)
    }

    /// Shadow displacement (Δlon, Δlat) in degrees for a vertical edge of
    /// `height` meters.
    ///
    /// Uses a flat-earth scale around `reference_latitude`, so it only holds
    /// for short shadows near that latitude.
    pub fn shadow_offset(
        height: f64,
        sun: &SunPosition,
        reference_latitude: f64,
    ) -> Option<(f64, f64)> {
        if !sun.is_above_horizon() {
            return None;
        }

        let shadow_length = height / sun.altitude.to_radians().tan();
        if !(shadow_length > 0.0) {
            return None;
        }

        // The shadow points away from the sun.
        let shadow_azimuth = (sun.azimuth + 180.0).to_radians();
        let meters_per_degree_lon = METERS_PER_DEGREE * reference_latitude.to_radians().cos();

        let dx_lon = shadow_length * shadow_azimuth.sin() / meters_per_degree_lon;
        let dx_lat = shadow_length * shadow_azimuth.cos() / METERS_PER_DEGREE;

        if dx_lon.is_finite() && dx_lat.is_finite() {
            Some((dx_lon, dx_lat))
        } else {
            None
        }
    }
}

fn is_usable(polygon: &Polygon<f64>) -> bool {
    let ring = polygon.exterior();
    ring.0.len() >= 4
        && ring.coords().all(|c| c.x.is_finite() && c.y.is_finite())
        && polygon.unsigned_area() > 0.0
}

/// Union of every building shadow at one instant.
#[derive(Debug, Clone)]
pub struct ShadowRegion {
    shape: MultiPolygon<f64>,
    bounds: Rect<f64>,
}

impl ShadowRegion {
    /// `None` for an empty shape.
    pub fn from_shape(shape: MultiPolygon<f64>) -> Option<Self> {
        let bounds = shape.bounding_rect()?;
        Some(Self { shape, bounds })
    }

    /// Strict interior test; points on an edge are not shaded.
    pub fn contains(&self, lon: f64, lat: f64) -> bool {
        let point = Point::new(lon, lat);
        point.intersects(&self.bounds) && self.shape.contains(&point)
    }

    pub fn intersects_rect(&self, rect: &Rect<f64>) -> bool {
        self.bounds.intersects(rect)
    }

    #[cfg(test)]
    pub fn shape(&self) -> &MultiPolygon<f64> {
        &self.shape
    }
}

pub struct ShadowSetResolver;

impl ShadowSetResolver {
    #[cfg(test)]
    pub fn resolve(
        buildings: &[Building],
        sun: &SunPosition,
        reference_latitude: f64,
    ) -> Option<ShadowRegion> {
        Self::resolve_within(buildings, sun, reference_latitude, None)
    }

    /// Union of every building's shadow. With an `area`, only shadows whose
    /// bounding box touches it take part in the union. Containment answers for points
    /// inside `area` are unchanged.
    pub fn resolve_within(
        buildings: &[Building],
        sun: &SunPosition,
        reference_latitude: f64,
        area: Option<&Rect<f64>>,
    ) -> Option<ShadowRegion> {
        if !sun.is_above_horizon() {
            return None;
        }

        let shadows: Vec<MultiPolygon<f64>> = buildings
            .iter()
            .filter_map(|b| ShadowProjector::project(b, sun, reference_latitude))
            .filter(|shadow| match (area, shadow.bounding_rect()) {
                (Some(area), Some(rect)) => rect.intersects(area),
                (Some(_), None) => false,
                (None, _) => true,
            })
            .map(|shadow| MultiPolygon::new(vec![shadow]))
            .collect();

        if shadows.is_empty() {
            return None;
        }

        debug!("Unifying {} shadow polygons", shadows.len());
        let unified = cascade_union(shadows);
        if unified.0.is_empty() {
            return None;
        }
        ShadowRegion::from_shape(unified)
    }
}

/// Pairwise union, halving the number of operands on every round.
fn cascade_union(mut parts: Vec<MultiPolygon<f64>>) -> MultiPolygon<f64> {
    while parts.len() > 1 {
        let mut next = Vec::with_capacity((parts.len() + 1) / 2);
        let mut iter = parts.into_iter();
        while let Some(a) = iter.next() {
            match iter.next() {
                Some(b) => next.push(union_pair(a, b)),
                None => next.push(a),
            }
        }
        parts = next;
    }
    parts.pop().unwrap_or_else(|| MultiPolygon::new(vec![]))
}

fn union_pair(a: MultiPolygon<f64>, b: MultiPolygon<f64>) -> MultiPolygon<f64> {
    union_or_keep(a, b, |a, b| a.union(b))
}

/// Runs `union`; if it panics, both operands are kept side by side
/// undissolved, which leaves containment answers unchanged.
fn union_or_keep<F>(a: MultiPolygon<f64>, b: MultiPolygon<f64>, union: F) -> MultiPolygon<f64>
where
    F: FnOnce(&MultiPolygon<f64>, &MultiPolygon<f64>) -> MultiPolygon<f64>,
{
    match catch_unwind(AssertUnwindSafe(|| union(&a, &b))) {
        Ok(merged) => merged,
        Err(_) => {
            warn!(
                "Shadow union failed on degenerate input ({} + {} polygons), keeping operands separate",
                a.0.len(),
                b.0.len()
            );
            let mut polygons = a.0;
            polygons.extend(b.0);
            MultiPolygon::new(polygons)
        }
    }
}
