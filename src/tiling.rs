// src/tiling.rs - Regular grid partitioning of the raster extent

use crate::errors::{OrthoError, Result};
use crate::raster::RasterWindow;

/// Partition a `height` x `width` raster into row-major square tiles of edge `tile_size`.
///
/// Tiles on the bottom and right edges are shorter/narrower; windows never
/// overlap and never leave the raster.
pub fn generate_tiles(height: u32, width: u32, tile_size: u32) -> Result<Vec<RasterWindow>> {
    if height == 0 || width == 0 || tile_size == 0 {
        return Err(OrthoError::InvalidDimension(format!(
            "height={}, width={}, tile_size={} (all must be > 0)",
            height, width, tile_size
        )));
    }

    let rows = height.div_ceil(tile_size) as usize;
    let cols = width.div_ceil(tile_size) as usize;
    let mut windows = Vec::with_capacity(rows * cols);

    for r in (0..height).step_by(tile_size as usize) {
        for c in (0..width).step_by(tile_size as usize) {
            windows.push(RasterWindow::new(
                r,
                c,
                tile_size.min(height - r),
                tile_size.min(width - c),
            ));
        }
    }

    Ok(windows)
}
