use image::{GrayImage, Luma};

/// Mask value written for vegetation pixels on export
pub const MASK_FOREGROUND: u8 = 255;
/// Mask value written for background pixels on export
pub const MASK_BACKGROUND: u8 = 0;

/// Boolean per-pixel grid, row-major. `true` marks a vegetation candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryMask {
    width: u32,
    height: u32,
    bits: Vec<bool>,
}

impl BinaryMask {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            bits: vec![false; width as usize * height as usize],
        }
    }

    pub fn from_fn<F: FnMut(u32, u32) -> bool>(width: u32, height: u32, mut f: F) -> Self {
        let mut bits = Vec::with_capacity(width as usize * height as usize);
        for row in 0..height {
            for col in 0..width {
                bits.push(f(row, col));
            }
        }
        Self { width, height, bits }
    }

    pub(crate) fn from_bits(width: u32, height: u32, bits: Vec<bool>) -> Self {
        debug_assert_eq!(bits.len(), width as usize * height as usize);
        Self { width, height, bits }
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }

    #[inline]
    pub fn get(&self, row: u32, col: u32) -> bool {
        self.bits[self.index(row, col)]
    }

    #[inline]
    pub fn set(&mut self, row: u32, col: u32, value: bool) {
        let idx = self.index(row, col);
        self.bits[idx] = value;
    }

    #[inline]
    fn index(&self, row: u32, col: u32) -> usize {
        row as usize * self.width as usize + col as usize
    }

    pub fn bits(&self) -> &[bool] {
        &self.bits
    }

    pub fn count(&self) -> usize {
        self.bits.iter().filter(|&&b| b).count()
    }

    /// 255/0 grayscale rendering for export and for the labelling routines
    pub fn to_luma(&self) -> GrayImage {
        GrayImage::from_fn(self.width, self.height, |x, y| {
            Luma([if self.get(y, x) { MASK_FOREGROUND } else { MASK_BACKGROUND }])
        })
    }

    /// Read a 255/0 grayscale mask back (any non-zero value is foreground)
    pub fn from_luma(image: &GrayImage) -> Self {
        Self::from_fn(image.width(), image.height(), |row, col| image.get_pixel(col, row)[0] > 0)
    }
}

/// Check if a signed (row, col) lies inside a `height` x `width` grid
#[inline]
pub fn in_bounds(row: i64, col: i64, height: u32, width: u32) -> bool {
    row >= 0 && col >= 0 && row < height as i64 && col < width as i64
}
