use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::image_utils::{in_bounds, BinaryMask};

/// Offsets `(dy, dx)` of a disk structuring element: every offset with `dy² + dx² ≤ r²`
pub fn disk_offsets(radius: u32) -> Vec<(i64, i64)> {
    let r = radius as i64;
    let mut offsets = Vec::new();
    for dy in -r..=r {
        for dx in -r..=r {
            if dy * dy + dx * dx <= r * r {
                offsets.push((dy, dx));
            }
        }
    }
    offsets
}

/// Binary erosion. Pixels outside the mask count as foreground, so objects
/// touching the window edge are not eroded by it.
pub fn erode(mask: &BinaryMask, radius: u32) -> BinaryMask {
    let offsets = disk_offsets(radius);
    apply(mask, |row, col| {
        offsets.iter().all(|&(dy, dx)| {
            let (r, c) = (row + dy, col + dx);
            !in_bounds(r, c, mask.height(), mask.width()) || mask.get(r as u32, c as u32)
        })
    })
}

/// Binary dilation. Pixels outside the mask count as background.
pub fn dilate(mask: &BinaryMask, radius: u32) -> BinaryMask {
    let offsets = disk_offsets(radius);
    apply(mask, |row, col| {
        offsets.iter().any(|&(dy, dx)| {
            let (r, c) = (row + dy, col + dx);
            in_bounds(r, c, mask.height(), mask.width()) && mask.get(r as u32, c as u32)
        })
    })
}

fn apply<F>(mask: &BinaryMask, probe: F) -> BinaryMask
where
    F: Fn(i64, i64) -> bool + Sync,
{
    let width = mask.width() as usize;
    let mut bits = vec![false; mask.bits().len()];
    if width > 0 {
        bits.par_chunks_mut(width).enumerate().for_each(|(row, out)| {
            for (col, slot) in out.iter_mut().enumerate() {
                *slot = probe(row as i64, col as i64);
            }
        });
    }
    BinaryMask::from_bits(mask.width(), mask.height(), bits)
}

/// Apply morphological opening (erosion followed by dilation). Radius 0 is a no-op.
pub fn apply_opening(mask: &BinaryMask, radius: u32) -> BinaryMask {
    if radius == 0 {
        return mask.clone();
    }
    dilate(&erode(mask, radius), radius)
}

/// Apply morphological closing (dilation followed by erosion). Radius 0 is a no-op.
pub fn apply_closing(mask: &BinaryMask, radius: u32) -> BinaryMask {
    if radius == 0 {
        return mask.clone();
    }
    erode(&dilate(mask, radius), radius)
}

/// Speckle removal then gap filling, with independent disk radii
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MorphologyStage {
    pub opening_radius: u32,
    pub closing_radius: u32,
}

impl Default for MorphologyStage {
    fn default() -> Self {
        Self {
            opening_radius: 3,
            closing_radius: 3,
        }
    }
}

impl MorphologyStage {
    pub fn new(opening_radius: u32, closing_radius: u32) -> Self {
        Self { opening_radius, closing_radius }
    }

    pub fn apply(&self, mask: &BinaryMask) -> BinaryMask {
        let opened = apply_opening(mask, self.opening_radius);
        apply_closing(&opened, self.closing_radius)
    }
}
