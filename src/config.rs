use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::errors::{OrthoError, Result};
use crate::morphology::MorphologyStage;
use crate::object_extraction::{Connectivity, ExtractionParams};
use crate::scheduler::SchedulerConfig;
use crate::spectral::{Classifier, Thresholds, DEFAULT_ADAPTIVE_WINDOW};

/// Run configuration
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub raster_path: String,

    /// GeoJSON polygons; when set, each polygon becomes one task instead of the tile grid
    #[serde(default)]
    pub polygon_path: Option<String>,

    #[serde(default = "default_output_dir")]
    pub output_dir: String,

    /// Worker count; `None` uses every available core
    #[serde(default)]
    pub workers: Option<usize>,

    #[serde(default = "default_min_area")]
    pub min_area: usize,

    #[serde(default = "default_max_area")]
    pub max_area: usize,

    #[serde(default = "default_tile_size")]
    pub tile_size: u32,

    #[serde(default = "default_morphology_radius")]
    pub opening_radius: u32,

    #[serde(default = "default_morphology_radius")]
    pub closing_radius: u32,

    #[serde(default)]
    pub connectivity: Connectivity,

    /// Optional shape filter on `4π·area/perimeter²`
    #[serde(default)]
    pub min_circularity: Option<f64>,

    /// Polygon buffer in ground units
    #[serde(default)]
    pub buffer_distance: f64,

    /// Zero pixels outside the (buffered) polygon before classification
    #[serde(default)]
    pub clip_to_polygon: bool,

    /// Pixel -> world affine transform, GDAL coefficient order. Falls back to a
    /// world file beside the raster, then to identity.
    #[serde(default)]
    pub geo_transform: Option<[f64; 6]>,

    /// Coordinate reference name written to vector exports
    #[serde(default)]
    pub crs: Option<String>,

    /// Gaussian pre-smoothing sigma; 0 disables it
    #[serde(default)]
    pub gaussian_sigma: f32,

    /// Merge object fragments that touch across tile seams (grid runs only)
    #[serde(default = "default_stitch_tiles")]
    pub stitch_tiles: bool,

    #[serde(default)]
    pub run_timeout_secs: Option<u64>,

    /// Write every task's cleaned mask as a PNG
    #[serde(default)]
    pub save_masks: bool,

    // Kept last: TOML tables must follow plain keys
    #[serde(default)]
    pub classification: ClassificationConfig,
}

/// Classification policy name
#[derive(Debug, Deserialize, Serialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ClassificationMethod {
    #[default]
    Fixed,
    Combined,
    Adaptive,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ClassificationConfig {
    #[serde(default)]
    pub method: ClassificationMethod,

    /// Named thresholds for the combined policy
    #[serde(default)]
    pub thresholds: BTreeMap<String, f64>,

    #[serde(default = "default_adaptive_window")]
    pub adaptive_window: usize,
}

impl Default for ClassificationConfig {
    fn default() -> Self {
        Self {
            method: ClassificationMethod::Fixed,
            thresholds: BTreeMap::new(),
            adaptive_window: DEFAULT_ADAPTIVE_WINDOW,
        }
    }
}

impl ClassificationConfig {
    pub fn classifier(&self) -> Result<Classifier> {
        match self.method {
            ClassificationMethod::Fixed => Ok(Classifier::Fixed(Thresholds::default())),
            ClassificationMethod::Combined => Classifier::combined(&self.thresholds),
            ClassificationMethod::Adaptive => Classifier::adaptive(self.adaptive_window),
        }
    }
}

fn default_output_dir() -> String {
    "./output".to_string()
}

fn default_min_area() -> usize {
    100
}

fn default_max_area() -> usize {
    10000
}

fn default_tile_size() -> u32 {
    4096
}

fn default_morphology_radius() -> u32 {
    3
}

fn default_adaptive_window() -> usize {
    DEFAULT_ADAPTIVE_WINDOW
}

fn default_stitch_tiles() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            raster_path: String::new(),
            polygon_path: None,
            output_dir: default_output_dir(),
            workers: None,
            min_area: default_min_area(),
            max_area: default_max_area(),
            tile_size: default_tile_size(),
            opening_radius: default_morphology_radius(),
            closing_radius: default_morphology_radius(),
            connectivity: Connectivity::Eight,
            min_circularity: None,
            buffer_distance: 0.0,
            clip_to_polygon: false,
            geo_transform: None,
            crs: None,
            gaussian_sigma: 0.0,
            stitch_tiles: true,
            run_timeout_secs: None,
            save_masks: false,
            classification: ClassificationConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            OrthoError::Config(format!("Failed to read config file '{}': {}", path.display(), e))
        })?;

        toml::from_str(&content).map_err(|source| OrthoError::ConfigLoad {
            source,
            path: path.to_path_buf(),
        })
    }

    /// Load the file when it exists, otherwise start from defaults
    pub fn from_file_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        if path.as_ref().exists() {
            Self::from_file(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| OrthoError::Config(format!("Failed to serialize config: {}", e)))?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Validate value ranges and input paths
    pub fn validate(&self) -> Result<()> {
        if self.raster_path.is_empty() {
            return Err(OrthoError::Config("raster_path is required".to_string()));
        }
        let raster = PathBuf::from(&self.raster_path);
        if !raster.exists() {
            return Err(OrthoError::InvalidPath(raster));
        }

        if self.tile_size == 0 {
            return Err(OrthoError::Config("tile_size must be > 0".to_string()));
        }

        if self.workers == Some(0) {
            return Err(OrthoError::Config("workers must be > 0".to_string()));
        }

        if self.min_area > self.max_area {
            return Err(OrthoError::Config(format!(
                "min_area ({}) must not exceed max_area ({})",
                self.min_area, self.max_area
            )));
        }

        if let Some(min) = self.min_circularity {
            if !(min.is_finite() && min >= 0.0) {
                return Err(OrthoError::Config("min_circularity must be >= 0.0".to_string()));
            }
        }

        if !(self.buffer_distance.is_finite() && self.buffer_distance >= 0.0) {
            return Err(OrthoError::Config("buffer_distance must be >= 0.0".to_string()));
        }

        if !(self.gaussian_sigma.is_finite() && self.gaussian_sigma >= 0.0) {
            return Err(OrthoError::Config("gaussian_sigma must be >= 0.0".to_string()));
        }

        if self.run_timeout_secs == Some(0) {
            return Err(OrthoError::Config("run_timeout_secs must be > 0".to_string()));
        }

        self.classification.classifier()?;
        Ok(())
    }

    pub fn extraction_params(&self) -> ExtractionParams {
        ExtractionParams {
            min_area: self.min_area,
            max_area: self.max_area,
            connectivity: self.connectivity,
            min_circularity: self.min_circularity,
        }
    }

    pub fn morphology(&self) -> MorphologyStage {
        MorphologyStage::new(self.opening_radius, self.closing_radius)
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        let mut scheduler = SchedulerConfig::default();
        if let Some(workers) = self.workers {
            scheduler.workers = workers;
        }
        scheduler.run_timeout = self.run_timeout_secs.map(Duration::from_secs);
        scheduler
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.min_area, 100);
        assert_eq!(config.max_area, 10000);
        assert_eq!(config.tile_size, 4096);
        assert_eq!(config.opening_radius, 3);
        assert_eq!(config.closing_radius, 3);
        assert_eq!(config.connectivity, Connectivity::Eight);
        assert_eq!(config.classification.adaptive_window, 15);
        assert!(config.stitch_tiles);
        assert!(config.scheduler_config().workers >= 1);
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            raster_path = "scene.tif"
            tile_size = 512
            connectivity = "four"

            [classification]
            method = "combined"
            thresholds = { green_index = 0.3 }
            "#,
        )
        .unwrap();

        assert_eq!(config.tile_size, 512);
        assert_eq!(config.min_area, 100);
        assert_eq!(config.connectivity, Connectivity::Four);
        match config.classification.classifier().unwrap() {
            Classifier::Combined(t) => {
                assert!((t.green_index - 0.3).abs() < 1e-6);
                assert!((t.green_red_ratio - 1.0).abs() < 1e-6);
            }
            other => panic!("unexpected classifier {:?}", other),
        }
    }

    #[test]
    fn validation_rejects_bad_values() {
        let raster = std::env::temp_dir().join(format!("ortho_cfg_{}.png", std::process::id()));
        fs::write(&raster, b"").unwrap();

        let mut config = Config {
            raster_path: raster.to_string_lossy().into_owned(),
            ..Config::default()
        };
        assert!(config.validate().is_ok());

        config.min_area = 20000;
        assert!(config.validate().is_err());
        config.min_area = 100;

        config.classification.method = ClassificationMethod::Adaptive;
        config.classification.adaptive_window = 4;
        assert!(config.validate().is_err());
        config.classification.adaptive_window = 5;
        assert!(config.validate().is_ok());

        config.workers = Some(0);
        assert!(config.validate().is_err());

        config.workers = None;
        config.raster_path = "/missing/raster.tif".to_string();
        assert!(matches!(config.validate(), Err(OrthoError::InvalidPath(_))));

        fs::remove_file(&raster).ok();
    }

    #[test]
    fn save_and_reload() {
        let path = std::env::temp_dir().join(format!("ortho_cfg_{}.toml", std::process::id()));
        let config = Config {
            raster_path: "a.tif".to_string(),
            min_circularity: Some(0.4),
            geo_transform: Some([10.0, 0.5, 0.0, 20.0, 0.0, -0.5]),
            ..Config::default()
        };
        config.save_to_file(&path).unwrap();
        assert_eq!(Config::from_file(&path).unwrap(), config);
        fs::remove_file(&path).ok();
    }
}
