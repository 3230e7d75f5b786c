use std::fs;
use std::path::{Path, PathBuf};

use csv::Writer;
use geojson::{Feature, FeatureCollection, GeoJson, Geometry, JsonObject};
use log::info;
use serde::Serialize;
use serde_json::json;

use crate::aggregate::RunSummary;
use crate::errors::{OrthoError, Result};
use crate::geometry::GeoTransform;
use crate::image_utils::BinaryMask;
use crate::object_extraction::ObjectDescriptor;
use crate::raster::RasterWindow;

pub const OBJECTS_CSV: &str = "objects.csv";
pub const OBJECTS_GEOJSON: &str = "objects.geojson";
pub const SUMMARY_JSON: &str = "summary.json";

/// Files written by one export
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportPaths {
    pub objects_csv: PathBuf,
    pub objects_geojson: PathBuf,
    pub summary_json: PathBuf,
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

/// Write the object catalogue to CSV, one row per object
pub fn write_objects_csv<P: AsRef<Path>>(
    objects: &[ObjectDescriptor],
    transform: &GeoTransform,
    path: P,
) -> Result<()> {
    let path = path.as_ref();
    ensure_parent(path)?;

    let mut writer = Writer::from_path(path)?;
    writer.write_record([
        "Object_ID",
        "Area",
        "Perimeter",
        "Circularity",
        "Min_Row",
        "Min_Col",
        "Max_Row",
        "Max_Col",
        "Centroid_Row",
        "Centroid_Col",
        "Centroid_X",
        "Centroid_Y",
    ])?;

    for (id, object) in objects.iter().enumerate() {
        // Pixel centres sit at +0.5
        let (x, y) = transform.to_world(object.centroid.1 + 0.5, object.centroid.0 + 0.5);
        writer.write_record(&[
            id.to_string(),
            object.area.to_string(),
            format!("{:.6}", object.perimeter),
            format!("{:.6}", object.circularity),
            object.bbox.min_row.to_string(),
            object.bbox.min_col.to_string(),
            object.bbox.max_row.to_string(),
            object.bbox.max_col.to_string(),
            format!("{:.6}", object.centroid.0),
            format!("{:.6}", object.centroid.1),
            format!("{:.6}", x),
            format!("{:.6}", y),
        ])?;
    }

    writer.flush().map_err(|e| OrthoError::CsvOutput(csv::Error::from(e)))?;
    Ok(())
}

/// Objects as a GeoJSON FeatureCollection of bounding-box polygons in world
/// coordinates. The CRS name goes into a legacy `crs` member.
pub fn objects_to_geojson(
    objects: &[ObjectDescriptor],
    transform: &GeoTransform,
    crs: Option<&str>,
) -> FeatureCollection {
    let features: Vec<Feature> = objects
        .iter()
        .enumerate()
        .map(|(id, object)| {
            let b = &object.bbox;
            let ring: Vec<Vec<f64>> = [
                (b.min_col, b.min_row),
                (b.max_col, b.min_row),
                (b.max_col, b.max_row),
                (b.min_col, b.max_row),
                (b.min_col, b.min_row),
            ]
            .iter()
            .map(|&(col, row)| {
                let (x, y) = transform.to_world(col as f64, row as f64);
                vec![x, y]
            })
            .collect();

            let mut properties = JsonObject::new();
            properties.insert("id".to_string(), json!(id));
            properties.insert("area".to_string(), json!(object.area));
            properties.insert("perimeter".to_string(), json!(object.perimeter));
            properties.insert("circularity".to_string(), json!(object.circularity));
            properties.insert("centroid_row".to_string(), json!(object.centroid.0));
            properties.insert("centroid_col".to_string(), json!(object.centroid.1));

            Feature {
                bbox: None,
                geometry: Some(Geometry::new(geojson::Value::Polygon(vec![ring]))),
                id: None,
                properties: Some(properties),
                foreign_members: None,
            }
        })
        .collect();

    let foreign_members = crs.map(|name| {
        let mut members = JsonObject::new();
        members.insert("crs".to_string(), json!({ "type": "name", "properties": { "name": name } }));
        members
    });

    FeatureCollection {
        bbox: None,
        features,
        foreign_members,
    }
}

pub fn write_objects_geojson<P: AsRef<Path>>(
    objects: &[ObjectDescriptor],
    transform: &GeoTransform,
    crs: Option<&str>,
    path: P,
) -> Result<()> {
    let path = path.as_ref();
    ensure_parent(path)?;
    let document = GeoJson::FeatureCollection(objects_to_geojson(objects, transform, crs));
    fs::write(path, serde_json::to_string_pretty(&document)?)?;
    Ok(())
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TaskReport {
    pub task_id: usize,
    pub window: Option<RasterWindow>,
    pub success: bool,
    pub count: usize,
    pub error: Option<String>,
}

/// Run statistics written to `summary.json`
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RunReport {
    pub success: bool,
    pub first_fatal_error: Option<String>,
    pub total_tasks: usize,
    pub completed_tasks: usize,
    pub failed_tasks: usize,
    pub cancelled: bool,
    pub pending_tasks: Vec<usize>,
    pub total_objects: usize,
    pub total_area: usize,
    pub average_area: f64,
    pub min_area: usize,
    pub max_area: usize,
    pub average_circularity: f64,
    pub tasks: Vec<TaskReport>,
}

impl RunReport {
    pub fn from_summary(summary: &RunSummary) -> Self {
        let objects = &summary.objects;
        let total_area: usize = objects.iter().map(|o| o.area).sum();
        let (average_area, average_circularity) = if objects.is_empty() {
            (0.0, 0.0)
        } else {
            let n = objects.len() as f64;
            (
                total_area as f64 / n,
                objects.iter().map(|o| o.circularity).sum::<f64>() / n,
            )
        };

        Self {
            success: summary.success,
            first_fatal_error: summary.first_fatal_error.clone(),
            total_tasks: summary.total_tasks,
            completed_tasks: summary.completed_tasks(),
            failed_tasks: summary.failed_tasks(),
            cancelled: summary.cancelled,
            pending_tasks: summary.pending_tasks.clone(),
            total_objects: summary.total_objects,
            total_area,
            average_area,
            min_area: objects.iter().map(|o| o.area).min().unwrap_or(0),
            max_area: objects.iter().map(|o| o.area).max().unwrap_or(0),
            average_circularity,
            tasks: summary
                .per_task_results
                .iter()
                .map(|o| TaskReport {
                    task_id: o.task_id,
                    window: o.window,
                    success: o.result.success,
                    count: o.result.count,
                    error: o.result.error.clone(),
                })
                .collect(),
        }
    }
}

pub fn write_summary_json<P: AsRef<Path>>(summary: &RunSummary, path: P) -> Result<()> {
    let path = path.as_ref();
    ensure_parent(path)?;
    let report = RunReport::from_summary(summary);
    fs::write(path, serde_json::to_string_pretty(&report)?)?;
    Ok(())
}

/// Save one task's mask as a 255/0 PNG named after the task id
pub fn save_mask<P: AsRef<Path>>(mask: &BinaryMask, dir: P, task_id: usize) -> Result<PathBuf> {
    let dir = dir.as_ref();
    fs::create_dir_all(dir)?;
    let path = dir.join(format!("task_{:05}.png", task_id));
    mask.to_luma().save(&path)?;
    Ok(path)
}

/// Write the CSV, GeoJSON and summary report into `output_dir`
pub fn export_run<P: AsRef<Path>>(
    summary: &RunSummary,
    output_dir: P,
    transform: &GeoTransform,
    crs: Option<&str>,
) -> Result<ExportPaths> {
    let dir = output_dir.as_ref();
    let paths = ExportPaths {
        objects_csv: dir.join(OBJECTS_CSV),
        objects_geojson: dir.join(OBJECTS_GEOJSON),
        summary_json: dir.join(SUMMARY_JSON),
    };

    write_objects_csv(&summary.objects, transform, &paths.objects_csv)?;
    write_objects_geojson(&summary.objects, transform, crs, &paths.objects_geojson)?;
    write_summary_json(summary, &paths.summary_json)?;

    info!("Results written to {}", dir.display());
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::{ResultAggregator, TaskOutcome, TileResult};
    use crate::object_extraction::{BorderProfile, BoundingBox, CoordinateSpace};
    use assert_approx_eq::assert_approx_eq;
    use serde_json::Value;

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("ortho_output_{}_{}", name, std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn object(area: usize, circularity: f64) -> ObjectDescriptor {
        ObjectDescriptor {
            area,
            perimeter: 12.0,
            bbox: BoundingBox { min_row: 2, min_col: 4, max_row: 6, max_col: 10 },
            centroid: (3.5, 6.5),
            circularity,
            space: CoordinateSpace::Global,
            border: BorderProfile::default(),
        }
    }

    fn summary(objects: Vec<ObjectDescriptor>) -> RunSummary {
        let mut aggregator = ResultAggregator::new(2);
        aggregator.push(TaskOutcome {
            task_id: 0,
            window: Some(RasterWindow::new(0, 0, 10, 10)),
            result: TileResult::completed(objects),
        });
        aggregator.push(TaskOutcome {
            task_id: 1,
            window: Some(RasterWindow::new(0, 10, 10, 10)),
            result: TileResult::failed("read error"),
        });
        aggregator.finish(None)
    }

    #[test]
    fn report_statistics() {
        let report = RunReport::from_summary(&summary(vec![object(10, 0.5), object(30, 0.7)]));
        assert_eq!(report.total_objects, 2);
        assert_eq!(report.total_area, 40);
        assert_approx_eq!(report.average_area, 20.0);
        assert_eq!(report.min_area, 10);
        assert_eq!(report.max_area, 30);
        assert_approx_eq!(report.average_circularity, 0.6);
        assert_eq!(report.completed_tasks, 1);
        assert_eq!(report.failed_tasks, 1);
        assert_eq!(report.tasks[1].error.as_deref(), Some("read error"));
    }

    #[test]
    fn empty_report_has_zero_statistics() {
        let report = RunReport::from_summary(&summary(Vec::new()));
        assert_eq!(report.total_objects, 0);
        assert_eq!(report.min_area, 0);
        assert_approx_eq!(report.average_area, 0.0);
    }

    #[test]
    fn geojson_uses_world_coordinates() {
        let transform = GeoTransform::from_gdal([1000.0, 2.0, 0.0, 5000.0, 0.0, -2.0]).unwrap();
        let collection = objects_to_geojson(&[object(24, 0.5)], &transform, Some("EPSG:32633"));

        let members = collection.foreign_members.as_ref().unwrap();
        assert_eq!(members["crs"]["properties"]["name"], "EPSG:32633");
        assert_eq!(collection.features.len(), 1);

        let feature = &collection.features[0];
        let Some(geojson::Value::Polygon(rings)) = feature.geometry.as_ref().map(|g| &g.value) else {
            panic!("expected a polygon geometry");
        };
        let ring = &rings[0];
        assert_eq!(ring.len(), 5);
        assert_approx_eq!(ring[0][0], 1008.0);
        assert_approx_eq!(ring[0][1], 4996.0);
        assert_approx_eq!(ring[2][0], 1020.0);
        assert_approx_eq!(ring[2][1], 4988.0);
        assert_eq!(feature.properties.as_ref().unwrap()["area"], 24);

        // The written document reads back as a FeatureCollection
        let text = serde_json::to_string(&GeoJson::FeatureCollection(collection)).unwrap();
        assert!(matches!(text.parse::<GeoJson>().unwrap(), GeoJson::FeatureCollection(_)));
    }

    #[test]
    fn export_writes_all_files() {
        let dir = temp_dir("export");
        let paths = export_run(&summary(vec![object(24, 0.5)]), &dir, &GeoTransform::identity(), None).unwrap();

        let csv = fs::read_to_string(&paths.objects_csv).unwrap();
        let mut lines = csv.lines();
        assert!(lines.next().unwrap().starts_with("Object_ID,Area,Perimeter"));
        assert!(lines.next().unwrap().starts_with("0,24,12.000000"));
        assert!(lines.next().is_none());

        let report: Value = serde_json::from_str(&fs::read_to_string(&paths.summary_json).unwrap()).unwrap();
        assert_eq!(report["total_objects"], 1);
        assert_eq!(report["failed_tasks"], 1);

        let geojson: Value = serde_json::from_str(&fs::read_to_string(&paths.objects_geojson).unwrap()).unwrap();
        assert!(geojson.get("crs").is_none());

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn mask_png_round_trips() {
        let dir = temp_dir("mask");
        let mask = BinaryMask::from_fn(6, 4, |r, c| r == 1 && c > 2);
        let path = save_mask(&mask, &dir, 7).unwrap();
        assert!(path.ends_with("task_00007.png"));

        let loaded = image::open(&path).unwrap().to_luma8();
        assert_eq!(loaded.get_pixel(3, 1)[0], 255);
        assert_eq!(loaded.get_pixel(0, 0)[0], 0);
        assert_eq!(BinaryMask::from_luma(&loaded), mask);

        fs::remove_dir_all(&dir).ok();
    }
}
