// src/raster.rs - Raster windows, pixel blocks and the window-read accessor

use std::fmt;
use std::path::{Path, PathBuf};

use image::{imageops, RgbImage};
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::errors::{OrthoError, Result};

/// Rectangular pixel-space sub-region of a raster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RasterWindow {
    pub offset_row: u32,
    pub offset_col: u32,
    pub height: u32,
    pub width: u32,
}

impl RasterWindow {
    pub fn new(offset_row: u32, offset_col: u32, height: u32, width: u32) -> Self {
        Self { offset_row, offset_col, height, width }
    }

    /// Exclusive end row
    #[inline]
    pub fn end_row(&self) -> u32 {
        self.offset_row + self.height
    }

    /// Exclusive end column
    #[inline]
    pub fn end_col(&self) -> u32 {
        self.offset_col + self.width
    }

    #[inline]
    pub fn area(&self) -> u64 {
        self.height as u64 * self.width as u64
    }

    /// True when the window is non-empty and lies inside a raster of the given size
    pub fn fits_within(&self, raster_height: u32, raster_width: u32) -> bool {
        self.height > 0
            && self.width > 0
            && (self.offset_row as u64 + self.height as u64) <= raster_height as u64
            && (self.offset_col as u64 + self.width as u64) <= raster_width as u64
    }

    #[inline]
    pub fn contains(&self, row: u32, col: u32) -> bool {
        row >= self.offset_row && row < self.end_row() && col >= self.offset_col && col < self.end_col()
    }
}

impl fmt::Display for RasterWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "rows {}..{} cols {}..{}",
            self.offset_row,
            self.end_row(),
            self.offset_col,
            self.end_col()
        )
    }
}

/// Pixels read for one window. Channel 0/1/2 are red/green/blue.
#[derive(Debug, Clone)]
pub struct PixelBlock {
    pub window: RasterWindow,
    pub pixels: RgbImage,
}

impl PixelBlock {
    pub fn new(window: RasterWindow, pixels: RgbImage) -> Self {
        Self { window, pixels }
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    #[inline]
    pub fn channels(&self) -> usize {
        3
    }

    /// Red, green, blue samples at a block-local position
    #[inline]
    pub fn rgb(&self, row: u32, col: u32) -> [u8; 3] {
        self.pixels.get_pixel(col, row).0
    }
}

/// Size and band count of an opened raster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RasterInfo {
    pub height: u32,
    pub width: u32,
    pub channels: u8,
}

impl fmt::Display for RasterInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{} px, {} channels", self.width, self.height, self.channels)
    }
}

/// Window-read access to an opened raster.
///
/// Implementations are shared by every worker of a run, so reads take `&self`
/// and must not keep a cursor or any other per-read state.
pub trait RasterSource: Send + Sync {
    fn info(&self) -> RasterInfo;

    fn read_window(&self, window: &RasterWindow) -> Result<PixelBlock>;

    fn dimensions(&self) -> (u32, u32, u8) {
        let info = self.info();
        (info.height, info.width, info.channels)
    }
}

/// Raster decoded through the `image` crate and held as 8-bit RGB
pub struct ImageRaster {
    path: Option<PathBuf>,
    image: RgbImage,
    channels: u8,
}

impl ImageRaster {
    /// Open a raster file. Every failure here is fatal for the run.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(OrthoError::RasterOpen {
                path: path.to_path_buf(),
                reason: "file does not exist".to_string(),
            });
        }

        let decoded = image::open(path).map_err(|e| OrthoError::RasterOpen {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let channels = decoded.color().channel_count();
        if channels < 3 {
            return Err(OrthoError::RasterOpen {
                path: path.to_path_buf(),
                reason: format!("raster has {} channel(s), at least 3 (RGB) are required", channels),
            });
        }

        let image = decoded.to_rgb8();
        info!(
            "Opened raster {} ({}x{} px, {} channels)",
            path.display(),
            image.width(),
            image.height(),
            channels
        );

        Ok(Self {
            path: Some(path.to_path_buf()),
            image,
            channels,
        })
    }

    /// Wrap an already decoded image
    pub fn from_image(image: RgbImage) -> Self {
        Self {
            path: None,
            image,
            channels: 3,
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

impl RasterSource for ImageRaster {
    fn info(&self) -> RasterInfo {
        RasterInfo {
            height: self.image.height(),
            width: self.image.width(),
            channels: self.channels,
        }
    }

    fn read_window(&self, window: &RasterWindow) -> Result<PixelBlock> {
        if !window.fits_within(self.image.height(), self.image.width()) {
            return Err(OrthoError::Read(format!(
                "window {} outside raster of {}x{} px",
                window,
                self.image.width(),
                self.image.height()
            )));
        }

        let pixels = imageops::crop_imm(
            &self.image,
            window.offset_col,
            window.offset_row,
            window.width,
            window.height,
        )
        .to_image();

        debug!("Read window {}", window);
        Ok(PixelBlock::new(*window, pixels))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn gradient(width: u32, height: u32) -> RgbImage {
        RgbImage::from_fn(width, height, |x, y| Rgb([x as u8, y as u8, 7]))
    }

    #[test]
    fn window_bounds() {
        let w = RasterWindow::new(10, 20, 5, 6);
        assert_eq!(w.end_row(), 15);
        assert_eq!(w.end_col(), 26);
        assert_eq!(w.area(), 30);
        assert!(w.fits_within(15, 26));
        assert!(!w.fits_within(14, 26));
        assert!(!RasterWindow::new(0, 0, 0, 4).fits_within(10, 10));
        assert!(w.contains(10, 20));
        assert!(!w.contains(15, 20));
    }

    #[test]
    fn read_window_returns_offset_pixels() {
        let raster = ImageRaster::from_image(gradient(40, 30));
        assert_eq!(raster.dimensions(), (30, 40, 3));

        let block = raster.read_window(&RasterWindow::new(5, 12, 4, 3)).unwrap();
        assert_eq!(block.height(), 4);
        assert_eq!(block.width(), 3);
        assert_eq!(block.rgb(0, 0), [12, 5, 7]);
        assert_eq!(block.rgb(3, 2), [14, 8, 7]);
    }

    #[test]
    fn read_outside_raster_is_read_error() {
        let raster = ImageRaster::from_image(gradient(10, 10));
        let err = raster.read_window(&RasterWindow::new(8, 0, 5, 5)).unwrap_err();
        assert!(matches!(err, OrthoError::Read(_)));
    }

    #[test]
    fn open_missing_file_is_fatal() {
        let err = ImageRaster::open("/definitely/not/here.tif").err().unwrap();
        assert!(err.is_fatal());
    }
}
