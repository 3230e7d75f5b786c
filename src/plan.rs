// src/plan.rs - Turning a raster extent or a polygon set into schedulable tasks

use log::{info, warn};

use crate::errors::Result;
use crate::geometry::{polygon_window, ClipRegion, GeoTransform, Polygon};
use crate::raster::RasterWindow;
use crate::tiling::generate_tiles;

/// One unit of work: a window plus the parameters it is processed with
#[derive(Debug, Clone, PartialEq)]
pub struct TileTask {
    pub id: usize,
    pub window: RasterWindow,
    pub clip: Option<ClipRegion>,
    pub min_area: usize,
    pub max_area: usize,
}

/// A task that failed while being planned (e.g. a polygon outside the raster)
#[derive(Debug, Clone, PartialEq)]
pub struct RejectedTask {
    pub id: usize,
    pub error: String,
}

/// How the task windows were produced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanKind {
    /// Disjoint grid covering the raster
    Grid,
    /// One window per polygon; windows may overlap
    Polygons,
}

/// Every task of a run; ids are unique across `ready` and `rejected`
#[derive(Debug, Clone)]
pub struct TaskPlan {
    pub kind: PlanKind,
    pub ready: Vec<TileTask>,
    pub rejected: Vec<RejectedTask>,
}

impl TaskPlan {
    pub fn total_tasks(&self) -> usize {
        self.ready.len() + self.rejected.len()
    }
}

/// Tile the whole raster
pub fn plan_grid(
    raster_height: u32,
    raster_width: u32,
    tile_size: u32,
    min_area: usize,
    max_area: usize,
) -> Result<TaskPlan> {
    let ready: Vec<TileTask> = generate_tiles(raster_height, raster_width, tile_size)?
        .into_iter()
        .enumerate()
        .map(|(id, window)| TileTask { id, window, clip: None, min_area, max_area })
        .collect();

    info!("Raster split into {} tile(s) of up to {} px", ready.len(), tile_size);
    Ok(TaskPlan { kind: PlanKind::Grid, ready, rejected: Vec::new() })
}

/// One task per polygon. Polygons that miss the raster are rejected individually.
pub fn plan_polygons(
    polygons: &[Polygon],
    transform: &GeoTransform,
    buffer: f64,
    raster_height: u32,
    raster_width: u32,
    min_area: usize,
    max_area: usize,
) -> TaskPlan {
    let mut ready = Vec::new();
    let mut rejected = Vec::new();

    for (id, polygon) in polygons.iter().enumerate() {
        match polygon_window(polygon, transform, buffer, raster_height, raster_width) {
            Ok(window) => ready.push(TileTask {
                id,
                window,
                clip: Some(ClipRegion {
                    polygon: polygon.clone(),
                    buffer,
                    transform: *transform,
                }),
                min_area,
                max_area,
            }),
            Err(e) => {
                warn!("Polygon {} rejected: {}", id, e);
                rejected.push(RejectedTask { id, error: e.to_string() });
            }
        }
    }

    info!("{} polygon task(s) planned, {} rejected", ready.len(), rejected.len());
    TaskPlan { kind: PlanKind::Polygons, ready, rejected }
}
