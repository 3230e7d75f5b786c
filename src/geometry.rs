// src/geometry.rs - Planar polygons, affine georeferencing and polygon-to-window mapping

use std::fs;
use std::path::{Path, PathBuf};

use log::debug;
use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};

use crate::errors::{OrthoError, Result};
use crate::raster::RasterWindow;

/// Affine pixel -> world transform in GDAL coefficient order:
/// `x = c0 + col*c1 + row*c2`, `y = c3 + col*c4 + row*c5`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    coefficients: [f64; 6],
}

impl Default for GeoTransform {
    /// Identity: world coordinates are pixel (col, row) coordinates
    fn default() -> Self {
        Self::identity()
    }
}

impl GeoTransform {
    pub fn identity() -> Self {
        Self { coefficients: [0.0, 1.0, 0.0, 0.0, 0.0, 1.0] }
    }

    pub fn from_gdal(coefficients: [f64; 6]) -> Result<Self> {
        let transform = Self { coefficients };
        if transform.matrix().try_inverse().is_none() {
            return Err(OrthoError::Config(format!(
                "geotransform {:?} is not invertible",
                coefficients
            )));
        }
        Ok(transform)
    }

    pub fn coefficients(&self) -> [f64; 6] {
        self.coefficients
    }

    /// Parse an ESRI world file (A, D, B, E, C, F; C/F give the centre of the upper-left pixel)
    pub fn from_world_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        let values = content
            .split_whitespace()
            .map(|token| token.parse::<f64>())
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| OrthoError::Config(format!("Invalid world file '{}': {}", path.display(), e)))?;

        if values.len() != 6 {
            return Err(OrthoError::Config(format!(
                "World file '{}' has {} values, expected 6",
                path.display(),
                values.len()
            )));
        }

        let (a, d, b, e, c, f) = (values[0], values[1], values[2], values[3], values[4], values[5]);
        Self::from_gdal([c - a / 2.0 - b / 2.0, a, b, f - d / 2.0 - e / 2.0, d, e])
    }

    /// Locate a world file next to a raster (`.tfw`, `.pgw`, `.jgw`, `.wld`)
    pub fn find_world_file(raster_path: &Path) -> Option<PathBuf> {
        let ext = raster_path.extension()?.to_str()?.to_ascii_lowercase();
        let mut candidates = Vec::new();
        if ext.len() >= 2 {
            let first = &ext[..1];
            let last = &ext[ext.len() - 1..];
            candidates.push(format!("{}{}w", first, last));
        }
        candidates.push("wld".to_string());

        candidates
            .into_iter()
            .map(|ext| raster_path.with_extension(ext))
            .find(|p| p.is_file())
    }

    fn matrix(&self) -> Matrix3<f64> {
        let c = &self.coefficients;
        Matrix3::new(
            c[1], c[2], c[0],
            c[4], c[5], c[3],
            0.0, 0.0, 1.0,
        )
    }

    /// Pixel (col, row) -> world (x, y)
    pub fn to_world(&self, col: f64, row: f64) -> (f64, f64) {
        let v = self.matrix() * Vector3::new(col, row, 1.0);
        (v.x, v.y)
    }

    /// World (x, y) -> pixel (col, row)
    pub fn to_pixel(&self, x: f64, y: f64) -> Result<(f64, f64)> {
        let inverse = self
            .matrix()
            .try_inverse()
            .ok_or_else(|| OrthoError::Config("geotransform is not invertible".to_string()))?;
        let v = inverse * Vector3::new(x, y, 1.0);
        Ok((v.x, v.y))
    }
}

/// Axis-aligned extent in world units
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl Bounds {
    /// Bounds of the polygon buffered by `distance` (a disk buffer grows the extent by `distance` per side)
    pub fn expand(&self, distance: f64) -> Self {
        Self {
            min_x: self.min_x - distance,
            min_y: self.min_y - distance,
            max_x: self.max_x + distance,
            max_y: self.max_y + distance,
        }
    }

    pub fn corners(&self) -> [(f64, f64); 4] {
        [
            (self.min_x, self.min_y),
            (self.max_x, self.min_y),
            (self.max_x, self.max_y),
            (self.min_x, self.max_y),
        ]
    }
}

/// Region-of-interest polygon. Rings are `(x, y)` vertex lists; closing vertex optional.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Polygon {
    pub exterior: Vec<(f64, f64)>,
    #[serde(default)]
    pub holes: Vec<Vec<(f64, f64)>>,
    #[serde(default)]
    pub crs: Option<String>,
}

impl Polygon {
    pub fn new(exterior: Vec<(f64, f64)>) -> Self {
        Self { exterior, holes: Vec::new(), crs: None }
    }

    pub fn with_crs(mut self, crs: Option<String>) -> Self {
        self.crs = crs;
        self
    }

    pub fn bounds(&self) -> Option<Bounds> {
        let mut points = self.exterior.iter();
        let &(x0, y0) = points.next()?;
        let mut bounds = Bounds { min_x: x0, min_y: y0, max_x: x0, max_y: y0 };
        for &(x, y) in points {
            bounds.min_x = bounds.min_x.min(x);
            bounds.min_y = bounds.min_y.min(y);
            bounds.max_x = bounds.max_x.max(x);
            bounds.max_y = bounds.max_y.max(y);
        }
        Some(bounds)
    }

    /// Even-odd containment test against the exterior minus holes
    pub fn contains(&self, x: f64, y: f64) -> bool {
        ring_contains(&self.exterior, x, y) && !self.holes.iter().any(|hole| ring_contains(hole, x, y))
    }

    /// Shortest distance from a point to any ring edge
    pub fn distance_to_boundary(&self, x: f64, y: f64) -> f64 {
        std::iter::once(&self.exterior)
            .chain(self.holes.iter())
            .flat_map(|ring| ring_edges(ring))
            .map(|(a, b)| segment_distance((x, y), a, b))
            .fold(f64::INFINITY, f64::min)
    }

    /// Membership in the polygon buffered outward by `distance`
    pub fn covers(&self, x: f64, y: f64, distance: f64) -> bool {
        self.contains(x, y) || (distance > 0.0 && self.distance_to_boundary(x, y) <= distance)
    }
}

fn ring_edges(ring: &[(f64, f64)]) -> impl Iterator<Item = ((f64, f64), (f64, f64))> + '_ {
    let n = ring.len();
    (0..n).map(move |i| (ring[i], ring[(i + 1) % n]))
}

fn ring_contains(ring: &[(f64, f64)], x: f64, y: f64) -> bool {
    let mut inside = false;
    for ((xi, yi), (xj, yj)) in ring_edges(ring) {
        if (yi > y) != (yj > y) && x < (xj - xi) * (y - yi) / (yj - yi) + xi {
            inside = !inside;
        }
    }
    inside
}

fn segment_distance(p: (f64, f64), a: (f64, f64), b: (f64, f64)) -> f64 {
    let (dx, dy) = (b.0 - a.0, b.1 - a.1);
    let len_sq = dx * dx + dy * dy;
    let t = if len_sq > 0.0 {
        (((p.0 - a.0) * dx + (p.1 - a.1) * dy) / len_sq).clamp(0.0, 1.0)
    } else {
        0.0
    };
    let (cx, cy) = (a.0 + t * dx, a.1 + t * dy);
    ((p.0 - cx).powi(2) + (p.1 - cy).powi(2)).sqrt()
}

/// Clip geometry attached to a polygon-derived task
#[derive(Debug, Clone, PartialEq)]
pub struct ClipRegion {
    pub polygon: Polygon,
    pub buffer: f64,
    pub transform: GeoTransform,
}

impl ClipRegion {
    /// Whether the centre of a raster-global pixel lies in the buffered polygon
    pub fn keeps_pixel(&self, row: u32, col: u32) -> bool {
        let (x, y) = self.transform.to_world(col as f64 + 0.5, row as f64 + 0.5);
        self.polygon.covers(x, y, self.buffer)
    }
}

/// Map a polygon onto the smallest whole-pixel window that contains its (buffered) extent.
pub fn polygon_window(
    polygon: &Polygon,
    transform: &GeoTransform,
    buffer: f64,
    raster_height: u32,
    raster_width: u32,
) -> Result<RasterWindow> {
    let bounds = polygon
        .bounds()
        .ok_or_else(|| OrthoError::GeometryOutOfBounds("polygon has no vertices".to_string()))?;
    let bounds = if buffer > 0.0 { bounds.expand(buffer) } else { bounds };

    let mut min_col = f64::INFINITY;
    let mut min_row = f64::INFINITY;
    let mut max_col = f64::NEG_INFINITY;
    let mut max_row = f64::NEG_INFINITY;
    for (x, y) in bounds.corners() {
        let (col, row) = transform.to_pixel(x, y)?;
        min_col = min_col.min(col);
        min_row = min_row.min(row);
        max_col = max_col.max(col);
        max_row = max_row.max(row);
    }

    if !(min_col.is_finite() && min_row.is_finite() && max_col.is_finite() && max_row.is_finite()) {
        return Err(OrthoError::GeometryOutOfBounds("polygon extent is not finite".to_string()));
    }

    // Round outward, then clamp to the raster
    let row_start = min_row.floor().clamp(0.0, raster_height as f64) as u32;
    let row_end = max_row.ceil().clamp(0.0, raster_height as f64) as u32;
    let col_start = min_col.floor().clamp(0.0, raster_width as f64) as u32;
    let col_end = max_col.ceil().clamp(0.0, raster_width as f64) as u32;

    if row_end <= row_start || col_end <= col_start {
        return Err(OrthoError::GeometryOutOfBounds(format!(
            "polygon extent ({:.3}, {:.3})-({:.3}, {:.3}) does not overlap the {}x{} raster",
            bounds.min_x, bounds.min_y, bounds.max_x, bounds.max_y, raster_width, raster_height
        )));
    }

    let window = RasterWindow::new(row_start, col_start, row_end - row_start, col_end - col_start);
    debug!("Polygon mapped to window {}", window);
    Ok(window)
}
