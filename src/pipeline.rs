// src/pipeline.rs - Per-tile processing: read, clip, smooth, classify, clean, extract, translate

use std::path::PathBuf;

use imageproc::filter::gaussian_blur_f32;
use log::{debug, warn};

use crate::aggregate::TileResult;
use crate::config::Config;
use crate::coordinates::translate_to_global;
use crate::errors::Result;
use crate::geometry::ClipRegion;
use crate::morphology::MorphologyStage;
use crate::object_extraction::{extract_objects, ExtractionParams, ObjectDescriptor};
use crate::output::save_mask;
use crate::plan::TileTask;
use crate::raster::{PixelBlock, RasterSource};
use crate::spectral::Classifier;

/// Work run inside one worker for one task
pub trait TileProcessor: Sync {
    fn process(&self, raster: &dyn RasterSource, task: &TileTask) -> Result<Vec<ObjectDescriptor>>;

    /// Errors become a failed result; an empty object list is still a success
    fn run_task(&self, raster: &dyn RasterSource, task: &TileTask) -> TileResult {
        match self.process(raster, task) {
            Ok(objects) => TileResult::completed(objects),
            Err(e) => TileResult::failed(e.to_string()),
        }
    }
}

/// Run-wide processing settings, fixed before the first task is dispatched
#[derive(Debug, Clone)]
pub struct TilePipeline {
    pub classifier: Classifier,
    pub morphology: MorphologyStage,
    pub extraction: ExtractionParams,
    pub gaussian_sigma: f32,
    pub clip_to_polygon: bool,
    pub mask_dir: Option<PathBuf>,
    /// Keep every fragment; area and shape limits are applied after stitching
    pub defer_filters: bool,
}

impl Default for TilePipeline {
    fn default() -> Self {
        Self {
            classifier: Classifier::default(),
            morphology: MorphologyStage::default(),
            extraction: ExtractionParams::default(),
            gaussian_sigma: 0.0,
            clip_to_polygon: false,
            mask_dir: None,
            defer_filters: false,
        }
    }
}

impl TilePipeline {
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            classifier: config.classification.classifier()?,
            morphology: config.morphology(),
            extraction: config.extraction_params(),
            gaussian_sigma: config.gaussian_sigma,
            clip_to_polygon: config.clip_to_polygon,
            mask_dir: config
                .save_masks
                .then(|| PathBuf::from(&config.output_dir).join("masks")),
            defer_filters: false,
        })
    }
}

impl TileProcessor for TilePipeline {
    fn process(&self, raster: &dyn RasterSource, task: &TileTask) -> Result<Vec<ObjectDescriptor>> {
        let mut block = raster.read_window(&task.window)?;

        if self.clip_to_polygon {
            if let Some(region) = &task.clip {
                clip_block(&mut block, region);
            }
        }

        if self.gaussian_sigma > 0.0 {
            block.pixels = gaussian_blur_f32(&block.pixels, self.gaussian_sigma);
        }

        let mask = self.classifier.classify(&block);
        drop(block);
        let cleaned = self.morphology.apply(&mask);

        if let Some(dir) = &self.mask_dir {
            if let Err(e) = save_mask(&cleaned, dir, task.id) {
                warn!("Task {}: could not save mask: {}", task.id, e);
            }
        }

        let params = if self.defer_filters {
            ExtractionParams {
                min_area: 0,
                max_area: usize::MAX,
                min_circularity: None,
                ..self.extraction
            }
        } else {
            ExtractionParams {
                min_area: task.min_area,
                max_area: task.max_area,
                ..self.extraction
            }
        };
        let mut objects = extract_objects(&cleaned, &params);
        translate_to_global(&mut objects, &task.window)?;

        debug!(
            "Task {} ({}): {} candidate px, {} object(s)",
            task.id,
            task.window,
            cleaned.count(),
            objects.len()
        );
        Ok(objects)
    }
}

/// Zero every pixel whose centre falls outside the clip region
fn clip_block(block: &mut PixelBlock, region: &ClipRegion) {
    let window = block.window;
    for (col, row, pixel) in block.pixels.enumerate_pixels_mut() {
        if !region.keeps_pixel(window.offset_row + row, window.offset_col + col) {
            pixel.0 = [0, 0, 0];
        }
    }
}
