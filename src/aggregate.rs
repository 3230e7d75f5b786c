// src/aggregate.rs - Folding per-task results into a run summary, with tile-seam stitching

use std::collections::{BTreeMap, HashMap};

use log::{debug, info};
use serde::Serialize;

use crate::object_extraction::{
    calculate_circularity, passes_shape_filter, BorderProfile, Connectivity, ObjectDescriptor,
};
use crate::raster::RasterWindow;

/// Outcome of one task
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TileResult {
    pub success: bool,
    pub error: Option<String>,
    pub objects: Vec<ObjectDescriptor>,
    pub count: usize,
}

impl TileResult {
    pub fn completed(objects: Vec<ObjectDescriptor>) -> Self {
        Self {
            success: true,
            error: None,
            count: objects.len(),
            objects,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            objects: Vec::new(),
            count: 0,
        }
    }
}

/// A result tagged with the task that produced it. Tasks rejected during
/// planning have no window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskOutcome {
    pub task_id: usize,
    pub window: Option<RasterWindow>,
    pub result: TileResult,
}

/// Seam-merge parameters for grid runs. The area and shape limits apply to
/// stitched objects, so tiles must report unfiltered fragments.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StitchSettings {
    pub connectivity: Connectivity,
    pub min_area: usize,
    pub max_area: usize,
    pub min_circularity: Option<f64>,
}

impl StitchSettings {
    fn keeps(&self, object: &ObjectDescriptor) -> bool {
        (self.min_area..=self.max_area).contains(&object.area)
            && passes_shape_filter(object, self.min_circularity)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub total_tasks: usize,
    pub total_objects: usize,
    pub per_task_results: Vec<TaskOutcome>,
    pub success: bool,
    pub first_fatal_error: Option<String>,
    /// Global object catalogue of the run
    pub objects: Vec<ObjectDescriptor>,
    pub cancelled: bool,
    /// Tasks that were never dispatched
    pub pending_tasks: Vec<usize>,
}

impl RunSummary {
    /// Summary of a run that stopped on a fatal error before any task ran
    pub fn aborted(error: impl Into<String>) -> Self {
        Self {
            total_tasks: 0,
            total_objects: 0,
            per_task_results: Vec::new(),
            success: false,
            first_fatal_error: Some(error.into()),
            objects: Vec::new(),
            cancelled: false,
            pending_tasks: Vec::new(),
        }
    }

    pub fn completed_tasks(&self) -> usize {
        self.per_task_results.iter().filter(|o| o.result.success).count()
    }

    pub fn failed_tasks(&self) -> usize {
        self.per_task_results.iter().filter(|o| !o.result.success).count()
    }
}

/// Collects outcomes in any arrival order
#[derive(Debug, Default)]
pub struct ResultAggregator {
    total_tasks: usize,
    outcomes: BTreeMap<usize, TaskOutcome>,
}

impl ResultAggregator {
    pub fn new(total_tasks: usize) -> Self {
        Self {
            total_tasks,
            outcomes: BTreeMap::new(),
        }
    }

    pub fn push(&mut self, outcome: TaskOutcome) {
        self.outcomes.insert(outcome.task_id, outcome);
    }

    /// Fold another partial aggregation into this one
    pub fn merge(&mut self, other: ResultAggregator) {
        self.total_tasks = self.total_tasks.max(other.total_tasks);
        self.outcomes.extend(other.outcomes);
    }

    pub fn received(&self) -> usize {
        self.outcomes.len()
    }

    pub fn finish(self, stitch: Option<StitchSettings>) -> RunSummary {
        let per_task_results: Vec<TaskOutcome> = self.outcomes.into_values().collect();

        let objects = match stitch {
            Some(settings) => stitch_fragments(&per_task_results, settings),
            None => per_task_results
                .iter()
                .flat_map(|o| o.result.objects.iter().cloned())
                .collect(),
        };

        info!(
            "Aggregated {} task result(s) into {} object(s)",
            per_task_results.len(),
            objects.len()
        );

        RunSummary {
            total_tasks: self.total_tasks,
            total_objects: objects.len(),
            per_task_results,
            success: true,
            first_fatal_error: None,
            objects,
            cancelled: false,
            pending_tasks: Vec::new(),
        }
    }
}

struct DisjointSet {
    parent: Vec<usize>,
}

impl DisjointSet {
    fn new(size: usize) -> Self {
        Self { parent: (0..size).collect() }
    }

    fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    /// The smaller root wins so merged objects keep their earliest fragment's position
    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra != rb {
            let (keep, drop) = if ra < rb { (ra, rb) } else { (rb, ra) };
            self.parent[drop] = keep;
        }
    }
}

/// Entries of `a` that have a partner in `b` within `tolerance`. Both ascending.
fn touching(a: &[u32], b: &[u32], tolerance: u32) -> usize {
    a.iter()
        .filter(|&&x| {
            let i = b.partition_point(|&v| v.saturating_add(tolerance) < x);
            i < b.len() && b[i] <= x.saturating_add(tolerance)
        })
        .count()
}

struct Fragment<'a> {
    task_id: usize,
    object: &'a ObjectDescriptor,
}

/// Merge fragments that touch across a shared edge (or, for 8-connectivity,
/// a shared corner) of neighbouring windows.
fn stitch_fragments(outcomes: &[TaskOutcome], settings: StitchSettings) -> Vec<ObjectDescriptor> {
    let placed: Vec<(&TaskOutcome, RasterWindow)> =
        outcomes.iter().filter_map(|o| o.window.map(|w| (o, w))).collect();
    let windows: Vec<RasterWindow> = placed.iter().map(|(_, w)| *w).collect();

    // Fragments of each placed window, in window order then extraction order
    let mut fragments: Vec<Fragment> = Vec::new();
    let mut by_task: Vec<Vec<usize>> = vec![Vec::new(); windows.len()];
    for (slot, (outcome, _)) in placed.iter().enumerate() {
        if !outcome.result.success {
            continue;
        }
        for object in &outcome.result.objects {
            by_task[slot].push(fragments.len());
            fragments.push(Fragment { task_id: outcome.task_id, object });
        }
    }

    let by_origin: HashMap<(u32, u32), usize> = windows
        .iter()
        .enumerate()
        .map(|(i, w)| ((w.offset_row, w.offset_col), i))
        .collect();
    let by_top_right: HashMap<(u32, u32), usize> = windows
        .iter()
        .enumerate()
        .map(|(i, w)| ((w.offset_row, w.end_col()), i))
        .collect();

    let tolerance = settings.connectivity.seam_tolerance();
    let diagonal = settings.connectivity == Connectivity::Eight;
    let mut sets = DisjointSet::new(fragments.len());
    let mut seam_contacts = vec![0usize; fragments.len()];

    for (task, window) in windows.iter().enumerate() {
        let right = by_origin.get(&(window.offset_row, window.end_col())).copied();
        let below = by_origin.get(&(window.end_row(), window.offset_col)).copied();
        let below_right = by_origin.get(&(window.end_row(), window.end_col())).copied();
        let below_left = by_top_right.get(&(window.end_row(), window.offset_col)).copied();

        for &a in &by_task[task] {
            let border_a: &BorderProfile = &fragments[a].object.border;

            if let Some(neighbour) = right {
                for &b in &by_task[neighbour] {
                    let border_b = &fragments[b].object.border;
                    let contacts = touching(&border_a.right, &border_b.left, tolerance);
                    if contacts > 0 {
                        sets.union(a, b);
                        seam_contacts[a] += contacts;
                        seam_contacts[b] += touching(&border_b.left, &border_a.right, tolerance);
                    }
                }
            }

            if let Some(neighbour) = below {
                for &b in &by_task[neighbour] {
                    let border_b = &fragments[b].object.border;
                    let contacts = touching(&border_a.bottom, &border_b.top, tolerance);
                    if contacts > 0 {
                        sets.union(a, b);
                        seam_contacts[a] += contacts;
                        seam_contacts[b] += touching(&border_b.top, &border_a.bottom, tolerance);
                    }
                }
            }

            if !diagonal {
                continue;
            }

            // Corner pixel of `a` against the facing corner pixel of the diagonal neighbour
            if let Some(neighbour) = below_right {
                let corner = window.end_col() - 1;
                if border_a.bottom.last() == Some(&corner) {
                    let start = windows[neighbour].offset_col;
                    for &b in &by_task[neighbour] {
                        if fragments[b].object.border.top.first() == Some(&start) {
                            sets.union(a, b);
                        }
                    }
                }
            }

            if let Some(neighbour) = below_left {
                if border_a.bottom.first() == Some(&window.offset_col) {
                    let corner = windows[neighbour].end_col() - 1;
                    for &b in &by_task[neighbour] {
                        if fragments[b].object.border.top.last() == Some(&corner) {
                            sets.union(a, b);
                        }
                    }
                }
            }
        }
    }

    let mut groups: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for i in 0..fragments.len() {
        let root = sets.find(i);
        groups.entry(root).or_default().push(i);
    }

    let mut objects = Vec::with_capacity(groups.len());
    for members in groups.values() {
        let object = if members.len() == 1 {
            fragments[members[0]].object.clone()
        } else {
            let parts: Vec<(&ObjectDescriptor, usize)> =
                members.iter().map(|&i| (fragments[i].object, seam_contacts[i])).collect();
            let Some(merged) = merge_fragments(&parts) else {
                continue;
            };
            debug!(
                "Stitched {} fragment(s) from task(s) {:?} into one object of {} px",
                members.len(),
                members.iter().map(|&i| fragments[i].task_id).collect::<Vec<_>>(),
                merged.area
            );
            merged
        };

        if settings.keeps(&object) {
            objects.push(object);
        }
    }
    objects
}

/// Combine fragments; each part carries its count of seam-contact pixels
fn merge_fragments(parts: &[(&ObjectDescriptor, usize)]) -> Option<ObjectDescriptor> {
    let (first, _) = parts.first()?;
    let mut merged = (*first).clone();

    merged.area = parts.iter().map(|(o, _)| o.area).sum();
    merged.bbox = parts.iter().fold(first.bbox, |acc, (o, _)| acc.union(&o.bbox));

    let area = merged.area as f64;
    let row: f64 = parts.iter().map(|(o, _)| o.centroid.0 * o.area as f64).sum();
    let col: f64 = parts.iter().map(|(o, _)| o.centroid.1 * o.area as f64).sum();
    merged.centroid = (row / area, col / area);

    let perimeter: f64 = parts.iter().map(|(o, contacts)| o.perimeter - *contacts as f64).sum();
    merged.perimeter = perimeter.max(0.0);
    merged.circularity = calculate_circularity(merged.area, merged.perimeter);
    merged.border = BorderProfile::default();
    Some(merged)
}
