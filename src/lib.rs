// src/lib.rs - Library interface for the orthophoto vegetation engine

pub mod aggregate;
pub mod config;
pub mod coordinates;
pub mod errors;
pub mod geometry;
pub mod image_utils;
pub mod morphology;
pub mod object_extraction;
pub mod output;
pub mod pipeline;
pub mod plan;
pub mod polygon_io;
pub mod raster;
pub mod runner;
pub mod scheduler;
pub mod spectral;
pub mod tiling;

// Re-export commonly used types and functions
pub use aggregate::{ResultAggregator, RunSummary, StitchSettings, TaskOutcome, TileResult};
pub use config::{ClassificationConfig, ClassificationMethod, Config};
pub use errors::{OrthoError, Result};
pub use geometry::{polygon_window, ClipRegion, GeoTransform, Polygon};
pub use image_utils::BinaryMask;
pub use morphology::{apply_closing, apply_opening, MorphologyStage};
pub use object_extraction::{
    extract_objects, BoundingBox, Connectivity, CoordinateSpace, ExtractionParams, ObjectDescriptor,
};
pub use pipeline::{TilePipeline, TileProcessor};
pub use plan::{plan_grid, plan_polygons, TaskPlan, TileTask};
pub use raster::{ImageRaster, PixelBlock, RasterInfo, RasterSource, RasterWindow};
pub use runner::{run_from_config, run_on_raster};
pub use scheduler::{CancelToken, SchedulerConfig, TaskState, TileScheduler};
pub use spectral::{Classifier, SpectralIndices, Thresholds};
pub use tiling::generate_tiles;
