use crate::tile_generator::TileSetGenerator;
use crate::types::{Building, Job, JobResult, ShadeError};
use chrono::{DateTime, Duration, Utc};
use indicatif::{ProgressBar, ProgressStyle};
use log::{error, info, warn};
use std::path::PathBuf;

/// Width of one time bucket.
pub const BUCKET_MINUTES: i64 = 10;

/// Start of the 10-minute window containing `instant`.
pub fn bucket_start(instant: &DateTime<Utc>) -> DateTime<Utc> {
    let width = BUCKET_MINUTES * 60;
    let floored = instant.timestamp().div_euclid(width) * width;
    // chrono's earliest instant is a midnight, so the floor is always representable.
    DateTime::from_timestamp(floored, 0).unwrap_or(*instant)
}

/// Bucket label such as `20260110_1530`. Fixed width, so lexicographic
/// order follows time order.
pub fn time_bucket(instant: &DateTime<Utc>) -> String {
    bucket_start(instant).format("%Y%m%d_%H%M").to_string()
}

/// Walks the job's time axis and renders one tile set per instant.
pub struct ShadeJobOrchestrator<'a> {
    generator: TileSetGenerator<'a>,
}

impl<'a> ShadeJobOrchestrator<'a> {
    pub fn new(generator: TileSetGenerator<'a>) -> Self {
        Self { generator }
    }

    pub fn run(&self, job: &Job, buildings: &[Building]) -> Result<JobResult, ShadeError> {
        info!(
            "Running shade job: {} buildings, zooms {:?}, {} -> {} every {} min",
            buildings.len(),
            job.zooms,
            job.start.to_rfc3339(),
            job.end.to_rfc3339(),
            job.step.num_minutes()
        );

        drive_time_range(job, |instant, bucket| {
            self.generator.generate(
                &job.bounds,
                &job.zooms,
                buildings,
                instant,
                &job.output_dir,
                bucket,
            )
        })
    }
}

fn instant_count(job: &Job) -> u64 {
    let step = job.step.num_seconds();
    if job.start > job.end || step <= 0 {
        return 0;
    }
    ((job.end - job.start).num_seconds() / step) as u64 + 1
}

/// Time-axis state machine. `generate` is called once per instant in
/// `[start, end]` with that instant's bucket label.
///
/// Instants closer than a bucket width share a label and write into the
/// same output directory; the later instant's tiles replace the earlier
/// ones. The label list keeps every occurrence.
pub fn drive_time_range<F>(job: &Job, mut generate: F) -> Result<JobResult, ShadeError>
where
    F: FnMut(&DateTime<Utc>, &str) -> Result<Vec<PathBuf>, ShadeError>,
{
    if job.step <= Duration::zero() {
        return Err(ShadeError::Config(format!(
            "Time step must be positive, got {} min",
            job.step.num_minutes()
        )));
    }

    let pb = ProgressBar::new(instant_count(job));
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );

    let mut current = job.start;
    let mut time_buckets: Vec<String> = Vec::new();
    let mut tiles_generated = 0;

    while current <= job.end {
        let bucket = time_bucket(&current);
        if time_buckets.last() == Some(&bucket) {
            warn!(
                "Instant {} falls in bucket {} again; its tiles overwrite the previous ones",
                current.to_rfc3339(),
                bucket
            );
        }

        info!("Generating tiles for {} ({})...", bucket, current.to_rfc3339());
        let tiles = generate(&current, &bucket).map_err(|e| {
            error!("Tile generation failed for {}: {}", bucket, e);
            e
        })?;
        info!("  Generated {} tiles", tiles.len());

        tiles_generated += tiles.len();
        time_buckets.push(bucket);
        pb.inc(1);

        current = match current.checked_add_signed(job.step) {
            Some(next) => next,
            None => break,
        };
    }

    pb.finish_with_message("Shade tiles complete");

    Ok(JobResult {
        success: true,
        tiles_generated,
        time_buckets,
        error: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rasterizer::TileRasterizer;
    use crate::sun_position::testing::FixedSun;
    use crate::types::{parse_instant, BoundingBox};
    use chrono::TimeZone;

    fn job(start: &str, end: &str, step_minutes: i64) -> Job {
        Job {
            bounds: BoundingBox {
                north: 35.682,
                south: 35.680,
                east: 139.768,
                west: 139.766,
            },
            start: parse_instant(start).unwrap(),
            end: parse_instant(end).unwrap(),
            step: Duration::minutes(step_minutes),
            zooms: vec![15],
            buildings_path: PathBuf::from("buildings.geojson"),
            output_dir: PathBuf::from("out"),
            sampling_rate: 4,
        }
    }

    #[test]
    fn test_time_bucket_truncates_to_ten_minutes() {
        let dt = Utc.with_ymd_and_hms(2026, 1, 10, 15, 37, 59).unwrap();
        assert_eq!(time_bucket(&dt), "20260110_1530");
        assert_eq!(
            bucket_start(&dt),
            Utc.with_ymd_and_hms(2026, 1, 10, 15, 30, 0).unwrap()
        );
    }

    #[test]
    fn test_time_bucket_is_idempotent() {
        let dt = Utc.with_ymd_and_hms(2026, 3, 1, 23, 59, 1).unwrap();
        let start = bucket_start(&dt);
        assert_eq!(bucket_start(&start), start);
        assert_eq!(time_bucket(&start), time_bucket(&dt));
    }

    #[test]
    fn test_time_bucket_is_monotonic() {
        let t1 = Utc.with_ymd_and_hms(2026, 1, 10, 9, 50, 0).unwrap();
        let t2 = Utc.with_ymd_and_hms(2026, 1, 10, 9, 59, 59).unwrap();
        let t3 = Utc.with_ymd_and_hms(2026, 1, 10, 10, 0, 0).unwrap();
        assert_eq!(time_bucket(&t1), time_bucket(&t2));
        assert!(time_bucket(&t3) > time_bucket(&t2));

        // Across a day boundary too.
        let t4 = Utc.with_ymd_and_hms(2026, 1, 10, 23, 55, 0).unwrap();
        let t5 = Utc.with_ymd_and_hms(2026, 1, 11, 0, 5, 0).unwrap();
        assert!(time_bucket(&t5) > time_bucket(&t4));
    }

    #[test]
    fn test_time_bucket_outside_nanosecond_range() {
        let late_a = parse_instant("2300-01-10T15:37:00Z").unwrap();
        let late_b = parse_instant("2300-01-10T15:33:00Z").unwrap();
        assert_eq!(time_bucket(&late_a), "23000110_1530");
        assert_eq!(time_bucket(&late_b), "23000110_1530");

        let early = parse_instant("1600-05-01T08:09:59Z").unwrap();
        assert_eq!(time_bucket(&early), "16000501_0800");
        assert_eq!(bucket_start(&bucket_start(&early)), bucket_start(&early));
    }

    #[test]
    fn test_time_bucket_before_epoch_floors_down() {
        let dt = Utc.with_ymd_and_hms(1969, 12, 31, 23, 55, 30).unwrap();
        assert_eq!(time_bucket(&dt), "19691231_2350");
    }

    #[test]
    fn test_step_past_calendar_end_stops_cleanly() {
        let mut job = job("2026-01-10T00:00:00Z", "2026-01-10T00:00:00Z", 10);
        job.step = Duration::minutes(200_000_000_000);
        let mut calls = 0;
        let result = drive_time_range(&job, |_, _| {
            calls += 1;
            Ok(vec![PathBuf::from("a.png")])
        })
        .unwrap();

        assert_eq!(calls, 1);
        assert_eq!(result.time_buckets, vec!["20260110_0000"]);
    }

    #[test]
    fn test_short_range_yields_single_bucket() {
        let job = job("2026-01-10T00:00:00Z", "2026-01-10T00:09:00Z", 10);
        let mut calls = 0;
        let result = drive_time_range(&job, |_, _| {
            calls += 1;
            Ok(vec![PathBuf::from("a.png")])
        })
        .unwrap();

        assert_eq!(calls, 1);
        assert!(result.success);
        assert_eq!(result.tiles_generated, 1);
        assert_eq!(result.time_buckets, vec!["20260110_0000".to_string()]);
    }

    #[test]
    fn test_small_step_repeats_bucket_labels() {
        let job = job("2026-01-10T00:00:00Z", "2026-01-10T00:15:00Z", 5);
        let mut seen = Vec::new();
        let result = drive_time_range(&job, |instant, bucket| {
            seen.push((*instant, bucket.to_string()));
            Ok(vec![])
        })
        .unwrap();

        assert_eq!(seen.len(), 4);
        assert_eq!(
            result.time_buckets,
            vec!["20260110_0000", "20260110_0000", "20260110_0010", "20260110_0010"]
        );
    }

    #[test]
    fn test_inclusive_end() {
        let job = job("2026-01-10T00:00:00Z", "2026-01-10T01:00:00Z", 20);
        let result = drive_time_range(&job, |_, _| Ok(vec![PathBuf::new(), PathBuf::new()])).unwrap();
        assert_eq!(
            result.time_buckets,
            vec!["20260110_0000", "20260110_0020", "20260110_0040", "20260110_0100"]
        );
        assert_eq!(result.tiles_generated, 8);
    }

    #[test]
    fn test_reversed_range_runs_nothing() {
        let job = job("2026-01-10T01:00:00Z", "2026-01-10T00:00:00Z", 10);
        let result = drive_time_range(&job, |_, _| panic!("must not be called")).unwrap();
        assert!(result.success);
        assert_eq!(result.tiles_generated, 0);
        assert!(result.time_buckets.is_empty());
    }

    #[test]
    fn test_generation_error_stops_job() {
        let job = job("2026-01-10T00:00:00Z", "2026-01-10T01:00:00Z", 10);
        let mut calls = 0;
        let result = drive_time_range(&job, |_, _| {
            calls += 1;
            if calls == 2 {
                Err(ShadeError::Oracle("no ephemeris".to_string()))
            } else {
                Ok(vec![])
            }
        });
        assert!(matches!(result, Err(ShadeError::Oracle(_))));
        assert_eq!(calls, 2);
    }

    #[test]
    fn test_run_writes_tiles_per_bucket() {
        let dir = tempfile::tempdir().unwrap();
        let mut job = job("2026-01-10T03:00:00Z", "2026-01-10T03:10:00Z", 10);
        job.output_dir = dir.path().to_path_buf();

        let buildings = vec![Building::new(
            "tower",
            vec![
                (139.7665, 35.6805),
                (139.7675, 35.6805),
                (139.7675, 35.6815),
                (139.7665, 35.6815),
            ],
            100.0,
        )
        .unwrap()];

        let sun = FixedSun::new(45.0, 180.0);
        let orchestrator =
            ShadeJobOrchestrator::new(TileSetGenerator::new(&sun, TileRasterizer::new(8)));
        let result = orchestrator.run(&job, &buildings).unwrap();

        assert!(result.success);
        assert_eq!(result.time_buckets, vec!["20260110_0300", "20260110_0310"]);
        let per_bucket = crate::tiles::tiles_covering(&job.bounds, 15).len();
        assert_eq!(result.tiles_generated, 2 * per_bucket);
        for bucket in &result.time_buckets {
            assert!(dir.path().join(bucket).join("15").is_dir());
        }
    }
}
