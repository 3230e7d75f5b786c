use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use env_logger::Env;
use log::{error, info};

use ortho_vegetation_lib::config::{ClassificationMethod, Config};
use ortho_vegetation_lib::object_extraction::Connectivity;
use ortho_vegetation_lib::output::{write_summary_json, SUMMARY_JSON};
use ortho_vegetation_lib::{run_from_config, RunSummary};

/// Command-line arguments
#[derive(Parser, Debug)]
#[clap(author, version, about = "Tiled vegetation object extraction from orthophotos")]
struct Args {
    /// Path to configuration file
    #[clap(short, long, default_value = "config.toml")]
    config: String,

    /// Raster to process (overwrites config)
    #[clap(short, long)]
    raster: Option<String>,

    /// GeoJSON polygons; one task per polygon instead of the tile grid
    #[clap(short, long)]
    polygons: Option<String>,

    /// Output directory (overwrites config)
    #[clap(short, long)]
    output: Option<String>,

    /// Worker threads (default: all cores)
    #[clap(short, long)]
    workers: Option<usize>,

    #[clap(long)]
    min_area: Option<usize>,

    #[clap(long)]
    max_area: Option<usize>,

    /// Tile edge length in pixels
    #[clap(short, long)]
    tile_size: Option<u32>,

    /// Classification policy
    #[clap(short, long)]
    method: Option<MethodArg>,

    #[clap(long)]
    connectivity: Option<ConnectivityArg>,

    /// Save every task's cleaned mask as a PNG
    #[clap(long)]
    save_masks: bool,

    /// Debug logging
    #[clap(short, long)]
    verbose: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum MethodArg {
    Fixed,
    Combined,
    Adaptive,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ConnectivityArg {
    Four,
    Eight,
}

fn apply_overrides(config: &mut Config, args: &Args) {
    if let Some(raster) = &args.raster {
        config.raster_path = raster.clone();
    }
    if let Some(polygons) = &args.polygons {
        config.polygon_path = Some(polygons.clone());
    }
    if let Some(output) = &args.output {
        config.output_dir = output.clone();
    }
    if args.workers.is_some() {
        config.workers = args.workers;
    }
    if let Some(min_area) = args.min_area {
        config.min_area = min_area;
    }
    if let Some(max_area) = args.max_area {
        config.max_area = max_area;
    }
    if let Some(tile_size) = args.tile_size {
        config.tile_size = tile_size;
    }
    if let Some(method) = args.method {
        config.classification.method = match method {
            MethodArg::Fixed => ClassificationMethod::Fixed,
            MethodArg::Combined => ClassificationMethod::Combined,
            MethodArg::Adaptive => ClassificationMethod::Adaptive,
        };
    }
    if let Some(connectivity) = args.connectivity {
        config.connectivity = match connectivity {
            ConnectivityArg::Four => Connectivity::Four,
            ConnectivityArg::Eight => Connectivity::Eight,
        };
    }
    if args.save_masks {
        config.save_masks = true;
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(Env::default().default_filter_or(level)).init();

    let mut config = Config::from_file_or_default(&args.config)
        .with_context(|| format!("Failed to load configuration from {}", args.config))?;
    apply_overrides(&mut config, &args);

    match run_from_config(&config) {
        Ok(summary) => {
            info!(
                "{} object(s) from {} task(s), {} failed",
                summary.total_objects,
                summary.total_tasks,
                summary.failed_tasks()
            );
            Ok(())
        }
        Err(e) => {
            error!("Run aborted: {}", e);
            // Best effort: leave a report behind when the output directory exists
            let output_dir = PathBuf::from(&config.output_dir);
            if output_dir.is_dir() {
                let aborted = RunSummary::aborted(e.to_string());
                if let Err(write_err) = write_summary_json(&aborted, output_dir.join(SUMMARY_JSON)) {
                    error!("Could not write summary report: {}", write_err);
                }
            }
            Err(e).context("Fatal error")
        }
    }
}
