use std::fs;
use std::path::PathBuf;

use image::{Rgb, RgbImage};
use serde_json::Value;

use ortho_vegetation_lib::{
    run_from_config, run_on_raster, BoundingBox, CancelToken, Config, CoordinateSpace, GeoTransform, ImageRaster,
};

fn workspace(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("ortho_e2e_{}_{}", name, std::process::id()));
    fs::create_dir_all(&dir).unwrap();
    dir
}

/// 100x100 black image with a green square over rows/cols 20..80
fn green_square_image() -> RgbImage {
    RgbImage::from_fn(100, 100, |x, y| {
        if (20..80).contains(&x) && (20..80).contains(&y) {
            Rgb([50, 200, 50])
        } else {
            Rgb([0, 0, 0])
        }
    })
}

fn config_for(dir: &PathBuf, raster: &str) -> Config {
    Config {
        raster_path: dir.join(raster).to_string_lossy().into_owned(),
        output_dir: dir.join("out").to_string_lossy().into_owned(),
        tile_size: 50,
        min_area: 100,
        max_area: 10000,
        workers: Some(4),
        ..Config::default()
    }
}

#[test]
fn green_square_across_four_tiles_is_one_object() {
    let dir = workspace("square");
    green_square_image().save(dir.join("scene.png")).unwrap();
    let config = config_for(&dir, "scene.png");

    let summary = run_from_config(&config).unwrap();

    assert!(summary.success);
    assert_eq!(summary.total_tasks, 4);
    assert_eq!(summary.completed_tasks(), 4);
    assert_eq!(summary.total_objects, 1);

    let object = &summary.objects[0];
    assert!((3500..=3600).contains(&object.area), "area {}", object.area);
    assert_eq!(object.bbox, BoundingBox { min_row: 20, min_col: 20, max_row: 80, max_col: 80 });
    assert_eq!(object.space, CoordinateSpace::Global);
    assert!((object.centroid.0 - 49.5).abs() < 0.5);
    assert!((object.centroid.1 - 49.5).abs() < 0.5);

    // Each tile saw one fragment
    let counts: Vec<usize> = summary.per_task_results.iter().map(|o| o.result.count).collect();
    assert_eq!(counts, vec![1, 1, 1, 1]);

    let out = dir.join("out");
    let report: Value = serde_json::from_str(&fs::read_to_string(out.join("summary.json")).unwrap()).unwrap();
    assert_eq!(report["total_objects"], 1);
    assert_eq!(report["success"], true);
    let csv = fs::read_to_string(out.join("objects.csv")).unwrap();
    assert_eq!(csv.lines().count(), 2);
    assert!(out.join("objects.geojson").is_file());

    fs::remove_dir_all(&dir).ok();
}

#[test]
fn unstitched_run_counts_fragments() {
    let raster = ImageRaster::from_image(green_square_image());
    let config = Config {
        tile_size: 50,
        stitch_tiles: false,
        ..Config::default()
    };
    let (summary, _) = run_on_raster(&config, &raster, &GeoTransform::identity(), CancelToken::new()).unwrap();

    let counted: usize = summary.per_task_results.iter().map(|o| o.result.count).sum();
    assert_eq!(summary.total_objects, 4);
    assert_eq!(summary.total_objects, counted);
}

/// 100x100 black image with a green rectangle over `rows` x `cols`
fn green_rectangle_image(rows: std::ops::Range<u32>, cols: std::ops::Range<u32>) -> RgbImage {
    RgbImage::from_fn(100, 100, |x, y| {
        if cols.contains(&x) && rows.contains(&y) {
            Rgb([50, 200, 50])
        } else {
            Rgb([0, 0, 0])
        }
    })
}

#[test]
fn seam_object_made_of_small_fragments_survives_min_area() {
    // Four ~300 px fragments, one 1200 px object
    let raster = ImageRaster::from_image(green_rectangle_image(20..80, 40..60));
    let config = Config {
        tile_size: 50,
        min_area: 400,
        ..Config::default()
    };
    let (summary, _) = run_on_raster(&config, &raster, &GeoTransform::identity(), CancelToken::new()).unwrap();

    assert_eq!(summary.total_objects, 1);
    let object = &summary.objects[0];
    assert!((1100..=1200).contains(&object.area), "area {}", object.area);
    assert_eq!(object.bbox, BoundingBox { min_row: 20, min_col: 40, max_row: 80, max_col: 60 });
}

#[test]
fn oversized_seam_object_leaves_no_fragment_behind() {
    // ~2400 px left of the seam, ~500 px right of it
    let raster = ImageRaster::from_image(green_rectangle_image(0..50, 2..60));
    let config = Config {
        tile_size: 50,
        max_area: 2400,
        ..Config::default()
    };
    let (summary, _) = run_on_raster(&config, &raster, &GeoTransform::identity(), CancelToken::new()).unwrap();

    assert!(summary.success);
    assert_eq!(summary.total_objects, 0);
    assert!(summary.objects.is_empty());
}

#[test]
fn all_zero_image_has_no_objects() {
    let dir = workspace("zero");
    RgbImage::new(50, 50).save(dir.join("zero.png")).unwrap();
    let config = config_for(&dir, "zero.png");

    let summary = run_from_config(&config).unwrap();
    assert!(summary.success);
    assert_eq!(summary.total_objects, 0);
    assert_eq!(summary.total_tasks, 1);
    assert_eq!(summary.failed_tasks(), 0);

    fs::remove_dir_all(&dir).ok();
}

#[test]
fn repeated_runs_are_identical() {
    let raster = ImageRaster::from_image(green_square_image());
    let config = Config {
        tile_size: 30,
        gaussian_sigma: 0.8,
        ..Config::default()
    };
    let run = || {
        run_on_raster(&config, &raster, &GeoTransform::identity(), CancelToken::new())
            .unwrap()
            .0
    };

    let first = run();
    let second = run();
    assert_eq!(first.per_task_results, second.per_task_results);
    assert_eq!(first.objects, second.objects);
}

#[test]
fn polygon_tasks_with_one_outside_raster() {
    let dir = workspace("polygons");
    green_square_image().save(dir.join("scene.png")).unwrap();
    fs::write(
        dir.join("fields.geojson"),
        r#"{
            "type": "FeatureCollection",
            "crs": { "type": "name", "properties": { "name": "LOCAL:PIXEL" } },
            "features": [
                { "type": "Feature", "properties": {},
                  "geometry": { "type": "Polygon",
                                "coordinates": [[[10, 10], [90, 10], [90, 90], [10, 90], [10, 10]]] } },
                { "type": "Feature", "properties": {},
                  "geometry": { "type": "Polygon",
                                "coordinates": [[[500, 500], [600, 500], [600, 600], [500, 500]]] } }
            ]
        }"#,
    )
    .unwrap();

    let config = Config {
        polygon_path: Some(dir.join("fields.geojson").to_string_lossy().into_owned()),
        ..config_for(&dir, "scene.png")
    };
    let summary = run_from_config(&config).unwrap();

    assert!(summary.success);
    assert_eq!(summary.total_tasks, 2);
    assert!(summary.per_task_results[0].result.success);
    assert!(!summary.per_task_results[1].result.success);
    assert_eq!(summary.total_objects, 1);
    assert_eq!(
        summary.objects[0].bbox,
        BoundingBox { min_row: 20, min_col: 20, max_row: 80, max_col: 80 }
    );

    let geojson: Value =
        serde_json::from_str(&fs::read_to_string(dir.join("out").join("objects.geojson")).unwrap()).unwrap();
    assert_eq!(geojson["crs"]["properties"]["name"], "LOCAL:PIXEL");

    fs::remove_dir_all(&dir).ok();
}

#[test]
fn unopenable_raster_aborts() {
    let dir = workspace("corrupt");
    fs::write(dir.join("broken.png"), b"definitely not a png").unwrap();
    let config = config_for(&dir, "broken.png");

    let err = run_from_config(&config).unwrap_err();
    assert!(err.is_fatal());

    fs::remove_dir_all(&dir).ok();
}
