// src/runner.rs - One complete run: validate, open, plan, schedule, export

use std::fs;
use std::path::Path;
use std::time::Instant;

use log::{info, warn};

use crate::aggregate::{RunSummary, StitchSettings};
use crate::config::Config;
use crate::errors::{OrthoError, Result};
use crate::geometry::GeoTransform;
use crate::output::export_run;
use crate::pipeline::TilePipeline;
use crate::plan::{plan_grid, plan_polygons, PlanKind, TaskPlan};
use crate::polygon_io::load_polygons;
use crate::raster::{ImageRaster, RasterSource};
use crate::scheduler::{CancelToken, TileScheduler};

/// Create the output directory; failure is fatal for the run
pub fn prepare_output_dir<P: AsRef<Path>>(dir: P) -> Result<()> {
    let dir = dir.as_ref();
    fs::create_dir_all(dir).map_err(|source| OrthoError::OutputDir {
        path: dir.to_path_buf(),
        source,
    })
}

/// Georeferencing from the config, else from a world file beside the raster, else identity
pub fn resolve_transform(config: &Config, raster_path: &Path) -> Result<GeoTransform> {
    if let Some(coefficients) = config.geo_transform {
        return GeoTransform::from_gdal(coefficients);
    }
    match GeoTransform::find_world_file(raster_path) {
        Some(world_file) => {
            info!("Using world file {}", world_file.display());
            GeoTransform::from_world_file(world_file)
        }
        None => Ok(GeoTransform::identity()),
    }
}

/// Execute a full run from a configuration and write the exports.
///
/// Returns `Err` only for fatal errors (invalid configuration, unopenable
/// raster, unreadable polygon source, output directory or export failures).
/// Failed tiles are recorded in the summary.
pub fn run_from_config(config: &Config) -> Result<RunSummary> {
    let started = Instant::now();
    config.validate()?;
    prepare_output_dir(&config.output_dir)?;

    let raster_path = Path::new(&config.raster_path);
    let raster = ImageRaster::open(raster_path)?;
    let transform = resolve_transform(config, raster_path)?;

    let info = raster.info();
    info!("Raster: {}", info);
    info!("Geotransform: {:?}", transform.coefficients());

    let (summary, crs) = run_on_raster(config, &raster, &transform, CancelToken::new())?;
    export_run(&summary, &config.output_dir, &transform, crs.as_deref())?;

    info!(
        "Run finished in {:.2?}: {} object(s), {}/{} task(s) completed",
        started.elapsed(),
        summary.total_objects,
        summary.completed_tasks(),
        summary.total_tasks
    );
    Ok(summary)
}

/// Plan and schedule a run against an already opened raster, without exporting.
///
/// Also returns the CRS name to tag vector exports with: the configured one,
/// else the one carried by the polygon source.
pub fn run_on_raster(
    config: &Config,
    raster: &dyn RasterSource,
    transform: &GeoTransform,
    cancel: CancelToken,
) -> Result<(RunSummary, Option<String>)> {
    let (height, width, _) = raster.dimensions();
    let mut crs = config.crs.clone();

    let plan: TaskPlan = match &config.polygon_path {
        Some(polygon_path) => {
            let polygons = load_polygons(polygon_path)?;
            if crs.is_none() {
                crs = polygons.iter().find_map(|p| p.crs.clone());
            }
            plan_polygons(
                &polygons,
                transform,
                config.buffer_distance,
                height,
                width,
                config.min_area,
                config.max_area,
            )
        }
        None => plan_grid(height, width, config.tile_size, config.min_area, config.max_area)?,
    };

    if plan.total_tasks() == 0 {
        warn!("Nothing to process: the plan has no tasks");
    }

    let stitch = (plan.kind == PlanKind::Grid && config.stitch_tiles).then_some(StitchSettings {
        connectivity: config.connectivity,
        min_area: config.min_area,
        max_area: config.max_area,
        min_circularity: config.min_circularity,
    });

    let mut pipeline = TilePipeline::from_config(config)?;
    pipeline.defer_filters = stitch.is_some();
    info!(
        "Classifier: {}, opening radius {}, closing radius {}",
        pipeline.classifier.name(),
        pipeline.morphology.opening_radius,
        pipeline.morphology.closing_radius
    );

    let scheduler = TileScheduler::new(config.scheduler_config()).with_cancel_token(cancel);
    let summary = scheduler.run(raster, &pipeline, plan, stitch)?;
    Ok((summary, crs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use std::path::PathBuf;

    fn temp_dir(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("ortho_runner_{}_{}", name, std::process::id()))
    }

    #[test]
    fn transform_prefers_config_over_world_file() {
        let dir = temp_dir("transform");
        fs::create_dir_all(&dir).unwrap();
        let raster = dir.join("scene.png");
        fs::write(dir.join("scene.pgw"), "0.5\n0\n0\n-0.5\n100.25\n200.25\n").unwrap();

        let from_world = resolve_transform(&Config::default(), &raster).unwrap();
        assert_eq!(from_world.coefficients(), [100.0, 0.5, 0.0, 200.5, 0.0, -0.5]);

        let config = Config {
            geo_transform: Some([1.0, 2.0, 0.0, 3.0, 0.0, -2.0]),
            ..Config::default()
        };
        assert_eq!(resolve_transform(&config, &raster).unwrap().coefficients(), [1.0, 2.0, 0.0, 3.0, 0.0, -2.0]);

        let bare = dir.join("other.png");
        assert_eq!(resolve_transform(&Config::default(), &bare).unwrap(), GeoTransform::identity());
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn missing_raster_is_fatal() {
        let config = Config {
            raster_path: "/definitely/not/here.png".to_string(),
            output_dir: temp_dir("missing").to_string_lossy().into_owned(),
            ..Config::default()
        };
        let err = run_from_config(&config).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn unreadable_polygon_source_is_fatal() {
        let raster = ImageRaster::from_image(RgbImage::new(20, 20));
        let config = Config {
            polygon_path: Some("/definitely/not/here.geojson".to_string()),
            ..Config::default()
        };
        let err = run_on_raster(&config, &raster, &GeoTransform::identity(), CancelToken::new()).unwrap_err();
        assert!(matches!(err, OrthoError::PolygonSource { .. }));
        assert!(err.is_fatal());
    }

    #[test]
    fn uncreatable_output_dir_is_fatal() {
        let blocker = temp_dir("blocker");
        fs::write(&blocker, b"not a directory").unwrap();
        let err = prepare_output_dir(blocker.join("out")).unwrap_err();
        assert!(matches!(err, OrthoError::OutputDir { .. }));
        fs::remove_file(&blocker).ok();
    }

    #[test]
    fn grid_run_on_memory_raster() {
        let image = RgbImage::from_fn(64, 64, |x, y| {
            if (8..24).contains(&x) && (8..24).contains(&y) {
                Rgb([40, 180, 40])
            } else {
                Rgb([10, 10, 10])
            }
        });
        let raster = ImageRaster::from_image(image);
        let config = Config {
            tile_size: 32,
            workers: Some(2),
            ..Config::default()
        };
        let (summary, crs) = run_on_raster(&config, &raster, &GeoTransform::identity(), CancelToken::new()).unwrap();
        assert!(crs.is_none());
        assert_eq!(summary.total_tasks, 4);
        assert_eq!(summary.total_objects, 1);
        assert!(summary.success);
    }
}
