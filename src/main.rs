mod buildings;
mod orchestrator;
mod raster_io;
mod rasterizer;
mod shadow_engine;
mod sun_position;
mod tile_generator;
mod tiles;
mod types;

use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info, warn};
use orchestrator::ShadeJobOrchestrator;
use rasterizer::TileRasterizer;
use std::path::PathBuf;
use std::process::ExitCode;
use sun_position::SunCalculator;
use tile_generator::TileSetGenerator;
use types::{JobConfig, JobResult};

/// Render translucent building-shadow tiles for a time range.
#[derive(Debug, Parser)]
#[command(name = "shade-tiler", version, about)]
struct Args {
    /// Job description (JSON)
    #[arg(short, long)]
    config: PathBuf,

    /// Worker threads; overrides `cpuCores` from the job file
    #[arg(long)]
    cpu_cores: Option<usize>,
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let result = match run(&args) {
        Ok(result) => result,
        Err(e) => {
            error!("Shade job failed: {:#}", e);
            JobResult::failed(format!("{:#}", e))
        }
    };

    match serde_json::to_string_pretty(&result) {
        Ok(json) => println!("{}", json),
        Err(e) => error!("Failed to serialize job result: {}", e),
    }

    if result.success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn run(args: &Args) -> Result<JobResult> {
    let mut config = JobConfig::from_file(&args.config)
        .with_context(|| format!("Failed to load job file {}", args.config.display()))?;
    if let Some(cores) = args.cpu_cores {
        config.cpu_cores = Some(cores);
    }

    let cpu_cores = config.get_cpu_cores();
    let angle_precision = config.angle_precision;
    let job = config.into_job().context("Invalid job configuration")?;

    info!("Using {} CPU cores for tile rendering", cpu_cores);
    if let Err(e) = rayon::ThreadPoolBuilder::new()
        .num_threads(cpu_cores)
        .build_global()
    {
        warn!("Failed to configure Rayon thread pool: {}", e);
        info!("Using default thread pool configuration");
    }

    let buildings = buildings::load_buildings(&job.buildings_path)
        .with_context(|| format!("Failed to load buildings from {}", job.buildings_path.display()))?;

    let rasterizer = TileRasterizer::new(job.sampling_rate);
    info!(
        "Sampling rate {} (stride {} px), output under {}",
        job.sampling_rate,
        rasterizer.stride(),
        job.output_dir.display()
    );

    let sun = SunCalculator::new(angle_precision);
    let orchestrator = ShadeJobOrchestrator::new(TileSetGenerator::new(&sun, rasterizer));
    let result = orchestrator
        .run(&job, &buildings)
        .context("Tile generation aborted")?;

    info!(
        "Job completed: {} tiles across {} time buckets",
        result.tiles_generated,
        result.time_buckets.len()
    );
    Ok(result)
}
