//! Building collection input: a GeoJSON FeatureCollection of Polygon or
//! MultiPolygon footprints with optional height properties.

use crate::types::{Building, ShadeError};
use log::{info, warn};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::path::Path;

/// Height used when a feature carries none (about five storeys).
pub const DEFAULT_BUILDING_HEIGHT: f64 = 15.0;

/// Checked in this order; the first non-zero numeric value wins.
const HEIGHT_KEYS: [&str; 3] = ["height", "building_height", "measuredHeight"];

#[derive(Debug, Deserialize)]
struct FeatureCollection {
    features: Vec<Feature>,
}

#[derive(Debug, Deserialize)]
struct Feature {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    properties: Option<Map<String, Value>>,
    geometry: Option<Geometry>,
}

type Ring = Vec<Vec<f64>>;

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum Geometry {
    Polygon { coordinates: Vec<Ring> },
    MultiPolygon { coordinates: Vec<Vec<Ring>> },
    #[serde(other)]
    Unsupported,
}

pub fn load_buildings(path: &Path) -> Result<Vec<Building>, ShadeError> {
    info!("Loading buildings from {}...", path.display());
    let text = std::fs::read_to_string(path)?;
    let buildings = parse_buildings(&text)?;
    info!("Loaded {} buildings", buildings.len());
    Ok(buildings)
}

/// A MultiPolygon feature becomes one building per member polygon, all
/// sharing the feature's id. Holes are ignored.
pub fn parse_buildings(text: &str) -> Result<Vec<Building>, ShadeError> {
    let collection: FeatureCollection = serde_json::from_str(text)?;
    let mut buildings = Vec::with_capacity(collection.features.len());

    for (index, feature) in collection.features.iter().enumerate() {
        let id = feature_id(feature);
        let height = feature_height(feature.properties.as_ref());

        let outer_rings: Vec<&Ring> = match &feature.geometry {
            Some(Geometry::Polygon { coordinates }) => coordinates.first().into_iter().collect(),
            Some(Geometry::MultiPolygon { coordinates }) => {
                coordinates.iter().filter_map(|polygon| polygon.first()).collect()
            }
            Some(Geometry::Unsupported) | None => {
                warn!("Feature #{} ({:?}) has no polygon geometry, skipping", index, id);
                continue;
            }
        };

        for ring in outer_rings {
            let vertices = match ring_vertices(ring) {
                Some(vertices) => vertices,
                None => {
                    warn!("Feature #{} ({:?}) has a malformed ring, skipping", index, id);
                    continue;
                }
            };
            match Building::new(id.clone(), vertices, height) {
                Ok(building) => buildings.push(building),
                Err(e) => warn!("Skipping feature #{}: {}", index, e),
            }
        }
    }

    Ok(buildings)
}

fn ring_vertices(ring: &Ring) -> Option<Vec<(f64, f64)>> {
    ring.iter()
        .map(|position| match position.as_slice() {
            [lon, lat, ..] => Some((*lon, *lat)),
            _ => None,
        })
        .collect()
}

fn feature_id(feature: &Feature) -> String {
    let from_properties = feature.properties.as_ref().and_then(|p| p.get("id"));
    match from_properties.or(feature.id.as_ref()) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

fn feature_height(properties: Option<&Map<String, Value>>) -> f64 {
    properties
        .and_then(|props| {
            HEIGHT_KEYS
                .iter()
                .filter_map(|key| props.get(*key).and_then(numeric))
                .find(|&h| h != 0.0)
        })
        .unwrap_or(DEFAULT_BUILDING_HEIGHT)
}

fn numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
