// src/object_extraction.rs - Connected-component labelling and per-object shape descriptors

use std::collections::BTreeMap;
use std::f64::consts::{PI, SQRT_2};

use image::{ImageBuffer, Luma};
use imageproc::region_labelling::{connected_components, Connectivity as LabelConnectivity};
use serde::{Deserialize, Serialize};

use crate::image_utils::BinaryMask;

/// Pixel coordinate frame a descriptor is expressed in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CoordinateSpace {
    /// Relative to the originating window's origin
    Local,
    /// Relative to the full raster's origin
    Global,
}

/// Half-open pixel box: `min_*` inclusive, `max_*` exclusive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_row: u32,
    pub min_col: u32,
    pub max_row: u32,
    pub max_col: u32,
}

impl BoundingBox {
    pub fn height(&self) -> u32 {
        self.max_row - self.min_row
    }

    pub fn width(&self) -> u32 {
        self.max_col - self.min_col
    }

    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        BoundingBox {
            min_row: self.min_row.min(other.min_row),
            min_col: self.min_col.min(other.min_col),
            max_row: self.max_row.max(other.max_row),
            max_col: self.max_col.max(other.max_col),
        }
    }
}

/// Where an object touches the edges of the window it was extracted from.
///
/// `top`/`bottom` list the columns of object pixels on the window's first/last
/// row; `left`/`right` list the rows of object pixels on its first/last column.
/// All lists are ascending.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BorderProfile {
    pub top: Vec<u32>,
    pub bottom: Vec<u32>,
    pub left: Vec<u32>,
    pub right: Vec<u32>,
}

impl BorderProfile {
    pub fn is_empty(&self) -> bool {
        self.top.is_empty() && self.bottom.is_empty() && self.left.is_empty() && self.right.is_empty()
    }
}

/// Geometric description of one connected vegetation region
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ObjectDescriptor {
    pub area: usize,
    pub perimeter: f64,
    pub bbox: BoundingBox,
    /// Mean (row, col) of the member pixels
    pub centroid: (f64, f64),
    pub circularity: f64,
    pub space: CoordinateSpace,
    #[serde(skip)]
    pub border: BorderProfile,
}

/// Pixel adjacency used when labelling
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Connectivity {
    Four,
    #[default]
    Eight,
}

impl Connectivity {
    fn labelling(self) -> LabelConnectivity {
        match self {
            Connectivity::Four => LabelConnectivity::Four,
            Connectivity::Eight => LabelConnectivity::Eight,
        }
    }

    /// Largest row/col difference at which two pixels on facing seam edges still touch
    pub fn seam_tolerance(self) -> u32 {
        match self {
            Connectivity::Four => 0,
            Connectivity::Eight => 1,
        }
    }
}

/// Area and shape limits for kept objects
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExtractionParams {
    pub min_area: usize,
    pub max_area: usize,
    pub connectivity: Connectivity,
    pub min_circularity: Option<f64>,
}

impl Default for ExtractionParams {
    fn default() -> Self {
        Self {
            min_area: 100,
            max_area: 10000,
            connectivity: Connectivity::Eight,
            min_circularity: None,
        }
    }
}

/// `4π·area / perimeter²`, reported as 0.0 when the perimeter is 0
pub fn calculate_circularity(area: usize, perimeter: f64) -> f64 {
    if perimeter > 0.0 {
        4.0 * PI * area as f64 / (perimeter * perimeter)
    } else {
        0.0
    }
}

/// Shape filter. A zero perimeter always passes.
pub fn passes_shape_filter(object: &ObjectDescriptor, min_circularity: Option<f64>) -> bool {
    match min_circularity {
        None => true,
        Some(_) if object.perimeter == 0.0 => true,
        Some(min) => object.circularity >= min,
    }
}

#[derive(Debug)]
struct Accumulator {
    area: usize,
    sum_row: f64,
    sum_col: f64,
    bbox: BoundingBox,
    border: BorderProfile,
}

impl Accumulator {
    fn new(row: u32, col: u32) -> Self {
        Self {
            area: 0,
            sum_row: 0.0,
            sum_col: 0.0,
            bbox: BoundingBox { min_row: row, min_col: col, max_row: row + 1, max_col: col + 1 },
            border: BorderProfile::default(),
        }
    }
}

/// Label the mask and describe every component that passes the area and shape filters.
///
/// Output is ordered by label, i.e. by the raster-scan position of each
/// component's first pixel. Descriptors are tagged `Local`.
pub fn extract_objects(mask: &BinaryMask, params: &ExtractionParams) -> Vec<ObjectDescriptor> {
    let (width, height) = (mask.width(), mask.height());
    if width == 0 || height == 0 {
        return Vec::new();
    }

    let labels = connected_components(&mask.to_luma(), params.connectivity.labelling(), Luma([0u8]));

    let mut components: BTreeMap<u32, Accumulator> = BTreeMap::new();
    for (col, row, label) in labels.enumerate_pixels() {
        let label = label[0];
        if label == 0 {
            continue;
        }
        let acc = components.entry(label).or_insert_with(|| Accumulator::new(row, col));
        acc.area += 1;
        acc.sum_row += row as f64;
        acc.sum_col += col as f64;
        acc.bbox.min_row = acc.bbox.min_row.min(row);
        acc.bbox.min_col = acc.bbox.min_col.min(col);
        acc.bbox.max_row = acc.bbox.max_row.max(row + 1);
        acc.bbox.max_col = acc.bbox.max_col.max(col + 1);

        if row == 0 {
            acc.border.top.push(col);
        }
        if row == height - 1 {
            acc.border.bottom.push(col);
        }
        if col == 0 {
            acc.border.left.push(row);
        }
        if col == width - 1 {
            acc.border.right.push(row);
        }
    }

    components
        .into_iter()
        .filter(|(_, acc)| params.min_area <= acc.area && acc.area <= params.max_area)
        .map(|(label, acc)| {
            let perimeter = component_perimeter(&labels, label, &acc.bbox);
            ObjectDescriptor {
                area: acc.area,
                perimeter,
                bbox: acc.bbox,
                centroid: (acc.sum_row / acc.area as f64, acc.sum_col / acc.area as f64),
                circularity: calculate_circularity(acc.area, perimeter),
                space: CoordinateSpace::Local,
                border: acc.border,
            }
        })
        .filter(|object| passes_shape_filter(object, params.min_circularity))
        .collect()
}

/// Weight of a boundary pixel given its neighbourhood code
/// (1 + 2 per 4-adjacent boundary pixel + 10 per diagonal boundary pixel)
fn boundary_weight(code: u32) -> f64 {
    match code {
        5 | 7 | 15 | 17 | 25 | 27 => 1.0,
        21 | 33 => SQRT_2,
        13 | 23 => (1.0 + SQRT_2) / 2.0,
        _ => 0.0,
    }
}

/// Boundary length estimate of one labelled component.
///
/// Boundary pixels are members with at least one 4-adjacent non-member (the
/// outside of the window counts as non-member). Each boundary pixel is
/// weighted by how its boundary neighbours run through it.
fn component_perimeter(labels: &ImageBuffer<Luma<u32>, Vec<u32>>, label: u32, bbox: &BoundingBox) -> f64 {
    let (width, height) = labels.dimensions();
    let member = |row: i64, col: i64| -> bool {
        row >= 0
            && col >= 0
            && row < height as i64
            && col < width as i64
            && labels.get_pixel(col as u32, row as u32)[0] == label
    };
    let is_boundary = |row: i64, col: i64| -> bool {
        member(row, col)
            && (!member(row - 1, col) || !member(row + 1, col) || !member(row, col - 1) || !member(row, col + 1))
    };

    let mut perimeter = 0.0;
    for row in bbox.min_row as i64..bbox.max_row as i64 {
        for col in bbox.min_col as i64..bbox.max_col as i64 {
            if !is_boundary(row, col) {
                continue;
            }
            let edge_neighbours = [(-1, 0), (1, 0), (0, -1), (0, 1)]
                .iter()
                .filter(|(dr, dc)| is_boundary(row + dr, col + dc))
                .count() as u32;
            let diagonal_neighbours = [(-1, -1), (-1, 1), (1, -1), (1, 1)]
                .iter()
                .filter(|(dr, dc)| is_boundary(row + dr, col + dc))
                .count() as u32;
            perimeter += boundary_weight(1 + 2 * edge_neighbours + 10 * diagonal_neighbours);
        }
    }
    perimeter
}
