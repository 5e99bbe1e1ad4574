use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use geo_types::{Coord, LineString, Polygon};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_STEP_MINUTES: i64 = 10;
pub const DEFAULT_ZOOMS: [u8; 3] = [15, 16, 17];
pub const MAX_ZOOM: u8 = 24;

/// Geographic bounding box in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub north: f64,
    pub south: f64,
    pub east: f64,
    pub west: f64,
}

impl BoundingBox {
    /// Latitude used for the meter/degree linearization of every shadow in a job.
    pub fn reference_latitude(&self) -> f64 {
        (self.north + self.south) / 2.0
    }

    fn validate(&self) -> Result<(), ShadeError> {
        let values = [self.north, self.south, self.east, self.west];
        if values.iter().any(|v| !v.is_finite()) {
            return Err(ShadeError::Config(format!(
                "Bounds must be finite numbers: {:?}",
                self
            )));
        }
        if self.north < self.south {
            return Err(ShadeError::Config(format!(
                "Bounds north ({}) is below south ({})",
                self.north, self.south
            )));
        }
        if self.north > 90.0 || self.south < -90.0 {
            return Err(ShadeError::Config(format!(
                "Bounds latitude out of range: south={}, north={}",
                self.south, self.north
            )));
        }
        if self.east.abs() > 180.0 || self.west.abs() > 180.0 {
            return Err(ShadeError::Config(format!(
                "Bounds longitude out of range: west={}, east={}",
                self.west, self.east
            )));
        }
        Ok(())
    }
}

/// Sampling preset for the tile rasterizer. Coarser strides trade edge
/// fidelity for speed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShadowQuality {
    Fast,
    #[default]
    Normal,
    High,
    Scientific,
}

impl ShadowQuality {
    pub fn sampling_rate(self) -> usize {
        match self {
            ShadowQuality::Fast => 8,
            ShadowQuality::Normal => 4,
            ShadowQuality::High => 2,
            ShadowQuality::Scientific => 1,
        }
    }
}

fn default_step_minutes() -> i64 {
    DEFAULT_STEP_MINUTES
}

fn default_zooms() -> Vec<u8> {
    DEFAULT_ZOOMS.to_vec()
}

/// Job file as handed over by the submission front end.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobConfig {
    pub bounds: BoundingBox,
    pub start_time: String,
    pub end_time: String,
    #[serde(default = "default_step_minutes")]
    pub step_minutes: i64,
    #[serde(default = "default_zooms")]
    pub zooms: Vec<u8>,
    pub buildings_geojson: PathBuf,
    pub output_dir: PathBuf,
    #[serde(default)]
    pub shadow_quality: ShadowQuality,
    #[serde(default)]
    pub sampling_rate: Option<usize>,
    #[serde(default)]
    pub angle_precision: Option<f64>,
    #[serde(default)]
    pub cpu_cores: Option<usize>,
}

impl JobConfig {
    pub fn from_file(path: &Path) -> Result<Self, ShadeError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn from_json_str(text: &str) -> Result<Self, ShadeError> {
        serde_json::from_str(text).map_err(|e| ShadeError::Config(format!("Invalid job file: {}", e)))
    }

    /// Explicit `samplingRate` wins over the quality preset.
    pub fn sampling_rate(&self) -> usize {
        self.sampling_rate
            .unwrap_or_else(|| self.shadow_quality.sampling_rate())
    }

    pub fn get_cpu_cores(&self) -> usize {
        self.cpu_cores
            .filter(|&n| n > 0)
            .unwrap_or_else(num_cpus::get)
    }

    /// Validate every field and resolve the instants. Nothing is rendered
    /// before this succeeds.
    pub fn into_job(self) -> Result<Job, ShadeError> {
        self.bounds.validate()?;

        if self.step_minutes <= 0 {
            return Err(ShadeError::Config(format!(
                "stepMinutes must be positive, got {}",
                self.step_minutes
            )));
        }
        if self.zooms.is_empty() {
            return Err(ShadeError::Config("zooms must not be empty".to_string()));
        }
        if let Some(&zoom) = self.zooms.iter().find(|&&z| z > MAX_ZOOM) {
            return Err(ShadeError::Config(format!(
                "Zoom level {} exceeds maximum {}",
                zoom, MAX_ZOOM
            )));
        }
        if let Some(precision) = self.angle_precision {
            if !(precision.is_finite() && precision > 0.0) {
                return Err(ShadeError::Config(format!(
                    "anglePrecision must be positive, got {}",
                    precision
                )));
            }
        }

        let sampling_rate = self.sampling_rate();
        if sampling_rate == 0 {
            return Err(ShadeError::Config("samplingRate must be at least 1".to_string()));
        }

        let step = Duration::try_minutes(self.step_minutes).ok_or_else(|| {
            ShadeError::Config(format!(
                "stepMinutes {} is out of range",
                self.step_minutes
            ))
        })?;
        let start = parse_instant(&self.start_time)?;
        let end = parse_instant(&self.end_time)?;

        Ok(Job {
            bounds: self.bounds,
            start,
            end,
            step,
            zooms: self.zooms,
            buildings_path: self.buildings_geojson,
            output_dir: self.output_dir,
            sampling_rate,
        })
    }
}

/// Parse an ISO-8601 instant. `Z` and explicit offsets are honoured; a
/// timestamp without an offset is taken as UTC.
pub fn parse_instant(text: &str) -> Result<DateTime<Utc>, ShadeError> {
    let text = text.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Ok(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return Ok(naive.and_utc());
        }
    }
    Err(ShadeError::Config(format!("Invalid ISO-8601 instant: {:?}", text)))
}

/// A validated job, consumed once by the orchestrator.
#[derive(Debug, Clone)]
pub struct Job {
    pub bounds: BoundingBox,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub step: Duration,
    pub zooms: Vec<u8>,
    pub buildings_path: PathBuf,
    pub output_dir: PathBuf,
    pub sampling_rate: usize,
}

/// A building footprint extruded to a flat roof.
#[derive(Debug, Clone)]
pub struct Building {
    id: String,
    footprint: Polygon<f64>,
    height: f64,
}

impl Building {
    /// `vertices` are (longitude, latitude); the ring is closed if needed.
    pub fn new(
        id: impl Into<String>,
        vertices: Vec<(f64, f64)>,
        height: f64,
    ) -> Result<Self, ShadeError> {
        let id = id.into();
        if !(height.is_finite() && height > 0.0) {
            return Err(ShadeError::Geometry(format!(
                "Building {:?} has invalid height {}",
                id, height
            )));
        }
        if vertices.iter().any(|(x, y)| !x.is_finite() || !y.is_finite()) {
            return Err(ShadeError::Geometry(format!(
                "Building {:?} has non-finite coordinates",
                id
            )));
        }

        let mut distinct: Vec<(f64, f64)> = vertices.clone();
        if distinct.len() > 1 && distinct.first() == distinct.last() {
            distinct.pop();
        }
        if distinct.len() < 3 {
            return Err(ShadeError::Geometry(format!(
                "Building {:?} footprint needs at least 3 vertices, got {}",
                id,
                distinct.len()
            )));
        }

        let ring: Vec<Coord<f64>> = vertices.into_iter().map(Coord::from).collect();
        Ok(Self {
            id,
            footprint: Polygon::new(LineString::from(ring), vec![]),
            height,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn footprint(&self) -> &Polygon<f64> {
        &self.footprint
    }

    pub fn height(&self) -> f64 {
        self.height
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SunPosition {
    /// Degrees above the horizon, negative at night.
    pub altitude: f64,
    /// Degrees clockwise from north in [0, 360).
    pub azimuth: f64,
    /// Degrees from vertical.
    pub zenith: f64,
}

impl SunPosition {
    pub fn from_altitude_azimuth(altitude: f64, azimuth: f64) -> Self {
        Self {
            altitude,
            azimuth: azimuth.rem_euclid(360.0),
            zenith: 90.0 - altitude,
        }
    }

    pub fn is_above_horizon(&self) -> bool {
        self.altitude > 0.0
    }
}

/// Outcome reported back to the job submitter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    pub success: bool,
    pub tiles_generated: usize,
    pub time_buckets: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JobResult {
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(message.into()),
            ..Self::default()
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ShadeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid configuration: {0}")]
    Config(String),
    #[error("Sun position unavailable: {0}")]
    Oracle(String),
    #[error("Geometry error: {0}")]
    Geometry(String),
    #[error("Raster error: {0}")]
    Raster(String),
}
