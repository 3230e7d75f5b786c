// src/polygon_io.rs - Region-of-interest polygon source (GeoJSON)

use std::fs;
use std::path::Path;

use geojson::{GeoJson, Geometry, PolygonType, Value};
use log::{info, warn};

use crate::errors::{OrthoError, Result};
use crate::geometry::Polygon;

/// Load every polygon from a GeoJSON file.
///
/// Accepts a `FeatureCollection`, a single `Feature`, or a bare `Polygon` /
/// `MultiPolygon` geometry. Features with null or non-polygonal geometry are
/// skipped. Any failure to read or parse the file is fatal for the run.
pub fn load_polygons<P: AsRef<Path>>(path: P) -> Result<Vec<Polygon>> {
    let path = path.as_ref();
    let fatal = |reason: String| OrthoError::PolygonSource {
        path: path.to_path_buf(),
        reason,
    };

    let content = fs::read_to_string(path).map_err(|e| fatal(e.to_string()))?;
    let document = content.parse::<GeoJson>().map_err(|e| fatal(e.to_string()))?;
    let polygons = parse_geojson(&document).map_err(fatal)?;

    info!("Loaded {} polygon(s) from {}", polygons.len(), path.display());
    Ok(polygons)
}

/// Extract polygons from a parsed GeoJSON document. A legacy `crs` member on
/// the collection names the CRS of every polygon.
pub fn parse_geojson(document: &GeoJson) -> std::result::Result<Vec<Polygon>, String> {
    let mut polygons = Vec::new();
    let mut crs = None;

    match document {
        GeoJson::FeatureCollection(fc) => {
            crs = fc
                .foreign_members
                .as_ref()
                .and_then(|members| members.get("crs"))
                .and_then(|crs| crs.pointer("/properties/name"))
                .and_then(|name| name.as_str())
                .map(str::to_string);
            for (idx, feature) in fc.features.iter().enumerate() {
                match &feature.geometry {
                    Some(geometry) => collect_geometry(geometry, &mut polygons)?,
                    None => warn!("Feature {} has no geometry, skipped", idx),
                }
            }
        }
        GeoJson::Feature(feature) => {
            if let Some(geometry) = &feature.geometry {
                collect_geometry(geometry, &mut polygons)?;
            }
        }
        GeoJson::Geometry(geometry) => collect_geometry(geometry, &mut polygons)?,
    }

    Ok(polygons.into_iter().map(|p| p.with_crs(crs.clone())).collect())
}

fn collect_geometry(geometry: &Geometry, out: &mut Vec<Polygon>) -> std::result::Result<(), String> {
    match &geometry.value {
        Value::Polygon(rings) => out.push(parse_polygon(rings)?),
        Value::MultiPolygon(parts) => {
            for rings in parts {
                out.push(parse_polygon(rings)?);
            }
        }
        Value::GeometryCollection(members) => {
            for member in members {
                collect_geometry(member, out)?;
            }
        }
        _ => warn!("Skipping non-polygonal geometry"),
    }
    Ok(())
}

fn parse_polygon(rings: &PolygonType) -> std::result::Result<Polygon, String> {
    let mut parsed = rings.iter().map(|ring| parse_ring(ring));
    let exterior = parsed.next().ok_or_else(|| "polygon without an exterior ring".to_string())??;
    let holes = parsed.collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(Polygon { exterior, holes, crs: None })
}

fn parse_ring(ring: &[Vec<f64>]) -> std::result::Result<Vec<(f64, f64)>, String> {
    ring.iter()
        .map(|position| match position.as_slice() {
            [x, y, ..] => Ok((*x, *y)),
            _ => Err(format!("position {:?} has fewer than two coordinates", position)),
        })
        .collect()
}
