use crate::types::{ShadeError, SunPosition};
use chrono::{DateTime, Datelike, Timelike, Utc};

/// Source of solar angles for a UTC instant at a ground location.
///
/// The pipeline only ever talks to this trait, so any ephemeris can be
/// plugged in (and tests use a fixed stub).
pub trait SunPositionProvider: Send + Sync {
    fn resolve(
        &self,
        instant: &DateTime<Utc>,
        latitude: f64,
        longitude: f64,
    ) -> Result<SunPosition, ShadeError>;
}

/// Low-precision solar ephemeris, good to a fraction of a degree for
/// dates within a few decades of J2000.
pub struct SunCalculator {
    angle_precision: Option<f64>,
}

impl SunCalculator {
    pub fn new(angle_precision: Option<f64>) -> Self {
        Self { angle_precision }
    }

    fn calculate_position(&self, datetime: &DateTime<Utc>, latitude: f64, longitude: f64) -> (f64, f64) {
        let n = self.days_since_j2000(datetime);
        let (declination, equation_of_time) = self.solar_coordinates(n);

        let solar_time = self.solar_time(datetime, equation_of_time, longitude);
        let hour_angle = 15.0 * (solar_time - 12.0);

        let lat_rad = latitude.to_radians();
        let dec_rad = declination.to_radians();
        let hour_rad = hour_angle.to_radians();

        // Solar elevation
        let elevation = (lat_rad.sin() * dec_rad.sin()
            + lat_rad.cos() * dec_rad.cos() * hour_rad.cos())
        .asin();

        // Solar azimuth, clockwise from north
        let cos_azimuth = (dec_rad.sin() * lat_rad.cos()
            - dec_rad.cos() * lat_rad.sin() * hour_rad.cos())
            / elevation.cos();
        let azimuth = cos_azimuth.clamp(-1.0, 1.0).acos().to_degrees();

        let azimuth_deg = if hour_rad.sin() > 0.0 {
            360.0 - azimuth
        } else {
            azimuth
        };

        (azimuth_deg, elevation.to_degrees())
    }

    fn round_angles(&self, azimuth: f64, elevation: f64) -> (f64, f64) {
        match self.angle_precision {
            Some(precision) => {
                let inv_precision = 1.0 / precision;
                (
                    (azimuth * inv_precision).round() * precision,
                    (elevation * inv_precision).round() * precision,
                )
            }
            None => (azimuth, elevation),
        }
    }

    fn julian_day(&self, datetime: &DateTime<Utc>) -> f64 {
        let a = (14 - datetime.month() as i32) / 12;
        let y = datetime.year() + 4800 - a;
        let m = datetime.month() as i32 + 12 * a - 3;

        datetime.day() as f64 + ((153 * m + 2) / 5) as f64 + 365.0 * y as f64 + (y / 4) as f64
            - (y / 100) as f64
            + (y / 400) as f64
            - 32045.0
    }

    fn days_since_j2000(&self, datetime: &DateTime<Utc>) -> f64 {
        // Julian day numbers start at noon.
        self.julian_day(datetime) - 2451545.0 + self.hours_of_day(datetime) / 24.0 - 0.5
    }

    /// Declination (degrees) and equation of time (minutes).
    fn solar_coordinates(&self, n: f64) -> (f64, f64) {
        let l = (280.460 + 0.9856474 * n).rem_euclid(360.0);
        let g = (357.528 + 0.9856003 * n).rem_euclid(360.0).to_radians();
        let lambda = (l + 1.915 * g.sin() + 0.020 * (2.0 * g).sin()).to_radians();
        let obliquity = (23.439 - 0.0000004 * n).to_radians();

        let right_ascension = (obliquity.cos() * lambda.sin())
            .atan2(lambda.cos())
            .to_degrees()
            .rem_euclid(360.0);
        let delta = (l - right_ascension + 180.0).rem_euclid(360.0) - 180.0;

        let declination = (obliquity.sin() * lambda.sin()).asin().to_degrees();
        (declination, 4.0 * delta)
    }

    fn hours_of_day(&self, datetime: &DateTime<Utc>) -> f64 {
        datetime.hour() as f64 + datetime.minute() as f64 / 60.0 + datetime.second() as f64 / 3600.0
    }

    fn solar_time(&self, datetime: &DateTime<Utc>, equation_of_time: f64, longitude: f64) -> f64 {
        self.hours_of_day(datetime) + equation_of_time / 60.0 + longitude / 15.0
    }
}

impl SunPositionProvider for SunCalculator {
    fn resolve(
        &self,
        instant: &DateTime<Utc>,
        latitude: f64,
        longitude: f64,
    ) -> Result<SunPosition, ShadeError> {
        if !latitude.is_finite() || !longitude.is_finite() || latitude.abs() > 90.0 {
            return Err(ShadeError::Oracle(format!(
                "Invalid location lat={}, lon={}",
                latitude, longitude
            )));
        }

        let (azimuth, elevation) = self.calculate_position(instant, latitude, longitude);
        let (azimuth, elevation) = self.round_angles(azimuth, elevation);
        if !azimuth.is_finite() || !elevation.is_finite() {
            return Err(ShadeError::Oracle(format!(
                "Ephemeris produced no position for {} at ({}, {})",
                instant, latitude, longitude
            )));
        }

        Ok(SunPosition::from_altitude_azimuth(elevation, azimuth))
    }
}
