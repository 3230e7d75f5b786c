// src/spectral.rs - Color ratio indices and the vegetation classification policies

use std::collections::BTreeMap;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::errors::{OrthoError, Result};
use crate::image_utils::BinaryMask;
use crate::raster::PixelBlock;

/// Added to every denominator to avoid division by zero
pub const EPSILON: f32 = 0.001;

/// Fraction of the local mean a ratio must reach under adaptive classification
pub const ADAPTIVE_MEAN_FACTOR: f32 = 0.8;

pub const DEFAULT_ADAPTIVE_WINDOW: usize = 15;

/// Per-pixel color indices of a block, row-major
#[derive(Debug, Clone)]
pub struct SpectralIndices {
    pub width: u32,
    pub height: u32,
    pub green_red_ratio: Vec<f32>,
    pub green_blue_ratio: Vec<f32>,
    pub green_index: Vec<f32>,
}

impl SpectralIndices {
    pub fn compute(block: &PixelBlock) -> Self {
        let (width, height) = (block.width(), block.height());
        let n = width as usize * height as usize;
        let mut green_red_ratio = vec![0.0f32; n];
        let mut green_blue_ratio = vec![0.0f32; n];
        let mut green_index = vec![0.0f32; n];

        for (i, pixel) in block.pixels.pixels().enumerate() {
            let r = pixel[0] as f32;
            let g = pixel[1] as f32;
            let b = pixel[2] as f32;
            green_red_ratio[i] = g / (r + EPSILON);
            green_blue_ratio[i] = g / (b + EPSILON);
            green_index[i] = (g - r) / (g + r + EPSILON);
        }

        Self { width, height, green_red_ratio, green_blue_ratio, green_index }
    }
}

/// Named lower bounds for the three indices
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    pub green_red_ratio: f32,
    pub green_blue_ratio: f32,
    pub green_index: f32,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            green_red_ratio: 1.0,
            green_blue_ratio: 1.0,
            green_index: 0.2,
        }
    }
}

impl Thresholds {
    /// Build from a name -> value map; missing names keep their defaults.
    pub fn from_named(values: &BTreeMap<String, f64>) -> Result<Self> {
        let mut thresholds = Self::default();
        for (name, &value) in values {
            let slot = match name.as_str() {
                "green_red_ratio" => &mut thresholds.green_red_ratio,
                "green_blue_ratio" => &mut thresholds.green_blue_ratio,
                "green_index" => &mut thresholds.green_index,
                other => {
                    return Err(OrthoError::Config(format!(
                        "Unknown threshold '{}' (expected green_red_ratio, green_blue_ratio or green_index)",
                        other
                    )))
                }
            };
            *slot = value as f32;
        }
        Ok(thresholds)
    }

    #[inline]
    fn accepts(&self, gr: f32, gb: f32, gi: f32) -> bool {
        gr >= self.green_red_ratio && gb >= self.green_blue_ratio && gi >= self.green_index
    }
}

/// Classification policy, chosen once per run
#[derive(Debug, Clone, PartialEq)]
pub enum Classifier {
    /// Built-in thresholds
    Fixed(Thresholds),
    /// Externally supplied thresholds
    Combined(Thresholds),
    /// Ratios compared against their local mean over an odd square window
    Adaptive { window: usize },
}

impl Default for Classifier {
    fn default() -> Self {
        Classifier::Fixed(Thresholds::default())
    }
}

impl Classifier {
    pub fn combined(values: &BTreeMap<String, f64>) -> Result<Self> {
        Ok(Classifier::Combined(Thresholds::from_named(values)?))
    }

    pub fn adaptive(window: usize) -> Result<Self> {
        if window == 0 || window % 2 == 0 {
            return Err(OrthoError::Config(format!(
                "adaptive window must be a positive odd number, got {}",
                window
            )));
        }
        Ok(Classifier::Adaptive { window })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Classifier::Fixed(_) => "fixed",
            Classifier::Combined(_) => "combined",
            Classifier::Adaptive { .. } => "adaptive",
        }
    }

    pub fn classify(&self, block: &PixelBlock) -> BinaryMask {
        self.classify_indices(&SpectralIndices::compute(block))
    }

    pub fn classify_indices(&self, indices: &SpectralIndices) -> BinaryMask {
        let bits = match self {
            Classifier::Fixed(t) | Classifier::Combined(t) => indices
                .green_red_ratio
                .iter()
                .zip(&indices.green_blue_ratio)
                .zip(&indices.green_index)
                .map(|((&gr, &gb), &gi)| t.accepts(gr, gb, gi))
                .collect(),
            Classifier::Adaptive { window } => {
                let (w, h) = (indices.width as usize, indices.height as usize);
                let gr_mean = box_mean(&indices.green_red_ratio, w, h, *window);
                let gb_mean = box_mean(&indices.green_blue_ratio, w, h, *window);
                (0..w * h)
                    .map(|i| {
                        indices.green_red_ratio[i] >= gr_mean[i] * ADAPTIVE_MEAN_FACTOR
                            && indices.green_blue_ratio[i] >= gb_mean[i] * ADAPTIVE_MEAN_FACTOR
                    })
                    .collect()
            }
        };
        BinaryMask::from_bits(indices.width, indices.height, bits)
    }
}

/// Mirror an out-of-range index back into `0..n` (edge sample repeated)
#[inline]
fn reflect(mut i: i64, n: i64) -> usize {
    loop {
        if i < 0 {
            i = -i - 1;
        } else if i >= n {
            i = 2 * n - i - 1;
        } else {
            return i as usize;
        }
    }
}

/// Separable mean filter over a `size` x `size` window centred on each sample
fn box_mean(values: &[f32], width: usize, height: usize, size: usize) -> Vec<f32> {
    if width == 0 || height == 0 {
        return Vec::new();
    }
    let half = (size / 2) as i64;
    let norm = size as f64;

    let mut horizontal = vec![0.0f32; values.len()];
    horizontal
        .par_chunks_mut(width)
        .enumerate()
        .for_each(|(row, out)| {
            let line = &values[row * width..(row + 1) * width];
            for (col, slot) in out.iter_mut().enumerate() {
                let sum: f64 = (-half..=half)
                    .map(|d| line[reflect(col as i64 + d, width as i64)] as f64)
                    .sum();
                *slot = (sum / norm) as f32;
            }
        });

    let mut result = vec![0.0f32; values.len()];
    result
        .par_chunks_mut(width)
        .enumerate()
        .for_each(|(row, out)| {
            for (col, slot) in out.iter_mut().enumerate() {
                let sum: f64 = (-half..=half)
                    .map(|d| horizontal[reflect(row as i64 + d, height as i64) * width + col] as f64)
                    .sum();
                *slot = (sum / norm) as f32;
            }
        });

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::RasterWindow;
    use assert_approx_eq::assert_approx_eq;
    use image::{Rgb, RgbImage};

    fn block(image: RgbImage) -> PixelBlock {
        let window = RasterWindow::new(0, 0, image.height(), image.width());
        PixelBlock::new(window, image)
    }

    fn green_square(size: u32) -> PixelBlock {
        block(RgbImage::from_fn(size, size, |x, y| {
            if (2..6).contains(&x) && (2..6).contains(&y) {
                Rgb([50, 200, 50])
            } else {
                Rgb([0, 0, 0])
            }
        }))
    }

    #[test]
    fn indices_follow_ratio_formulas() {
        let indices = SpectralIndices::compute(&block(RgbImage::from_pixel(1, 1, Rgb([50, 200, 100]))));
        assert_approx_eq!(indices.green_red_ratio[0], 200.0 / 50.001, 1e-4);
        assert_approx_eq!(indices.green_blue_ratio[0], 200.0 / 100.001, 1e-4);
        assert_approx_eq!(indices.green_index[0], 150.0 / 250.001, 1e-4);
    }

    #[test]
    fn zero_pixels_do_not_divide_by_zero() {
        let indices = SpectralIndices::compute(&block(RgbImage::new(2, 2)));
        assert!(indices.green_red_ratio.iter().all(|v| v.is_finite() && *v == 0.0));
        assert!(indices.green_index.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn fixed_policy_marks_green_square() {
        let mask = Classifier::default().classify(&green_square(8));
        assert_eq!(mask.count(), 16);
        assert!(mask.get(2, 2));
        assert!(!mask.get(0, 0));
    }

    #[test]
    fn combined_falls_back_to_defaults() {
        let mut values = BTreeMap::new();
        values.insert("green_index".to_string(), 0.9);
        let classifier = Classifier::combined(&values).unwrap();
        match &classifier {
            Classifier::Combined(t) => {
                assert_approx_eq!(t.green_red_ratio, 1.0);
                assert_approx_eq!(t.green_index, 0.9);
            }
            other => panic!("unexpected policy {:?}", other),
        }
        // green index of the square is 0.6, below 0.9
        assert_eq!(classifier.classify(&green_square(8)).count(), 0);
    }

    #[test]
    fn combined_rejects_unknown_names() {
        let mut values = BTreeMap::new();
        values.insert("ndvi".to_string(), 0.3);
        assert!(Classifier::combined(&values).is_err());
    }

    #[test]
    fn adaptive_window_must_be_odd() {
        assert!(Classifier::adaptive(14).is_err());
        assert!(Classifier::adaptive(0).is_err());
        assert_eq!(Classifier::adaptive(15).unwrap(), Classifier::Adaptive { window: 15 });
    }

    #[test]
    fn adaptive_policy_follows_local_mean() {
        // Uniform image: every ratio equals its local mean, so everything passes
        let uniform = block(RgbImage::from_pixel(5, 5, Rgb([10, 20, 30])));
        assert_eq!(Classifier::adaptive(3).unwrap().classify(&uniform).count(), 25);

        // A single dark pixel in a bright green field falls below 0.8x its neighbourhood
        let mut image = RgbImage::from_pixel(7, 7, Rgb([50, 200, 50]));
        image.put_pixel(3, 3, Rgb([50, 60, 50]));
        let mask = Classifier::adaptive(3).unwrap().classify(&block(image));
        assert!(!mask.get(3, 3));
        assert!(mask.get(0, 0));
    }

    #[test]
    fn box_mean_reflects_edges() {
        let values = vec![1.0, 2.0, 3.0];
        let mean = box_mean(&values, 3, 1, 3);
        // rows reflect onto themselves; columns: [1,1,2], [1,2,3], [2,3,3]
        assert_approx_eq!(mean[0], 4.0 / 3.0, 1e-6);
        assert_approx_eq!(mean[1], 2.0, 1e-6);
        assert_approx_eq!(mean[2], 8.0 / 3.0, 1e-6);
    }
}
