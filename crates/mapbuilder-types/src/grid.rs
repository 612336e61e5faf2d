//! Sparse traversability grid.
//!
//! A [`TraversabilityGrid`] stores only the cells that have received at least
//! one point.  Cells are keyed by their integer world-frame coordinates at a
//! fixed resolution (`floor(x / resolution)`, `floor(y / resolution)`), so
//! grids built at the same resolution can be compared cell-by-cell without
//! any alignment step.
//!
//! Each cell keeps height statistics ([`CellStats`]) and a traversability
//! value in `[0, 1]` that is filled in by a traversability model once all
//! points have been accumulated.

use std::collections::{BTreeMap, BTreeSet};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::geometry::{Bounds2D, Point2, Vec3};

/// Integer coordinates of a grid cell.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
pub struct CellKey {
    pub i: i32,
    pub j: i32,
}

impl CellKey {
    pub fn new(i: i32, j: i32) -> Self {
        Self { i, j }
    }

    /// Key of the cell containing `(x, y)` at `resolution`.
    ///
    /// Indices outside the `i32` range saturate; use
    /// [`try_containing`](Self::try_containing) when that matters.
    pub fn containing(x: f32, y: f32, resolution: f32) -> Self {
        Self::new((x / resolution).floor() as i32, (y / resolution).floor() as i32)
    }

    /// Like [`containing`](Self::containing), but `None` when either index
    /// is not finite or does not fit strictly inside the `i32` range.
    pub fn try_containing(x: f32, y: f32, resolution: f32) -> Option<Self> {
        Some(Self::new(
            cell_index(x, resolution)?,
            cell_index(y, resolution)?,
        ))
    }
}

fn cell_index(v: f32, resolution: f32) -> Option<i32> {
    let f = (v / resolution).floor();
    // Both ends are kept strictly inside so that saturated keys never
    // collide with stored ones and `i + 1` cannot overflow.
    if f.is_finite() && f > i32::MIN as f32 && f < i32::MAX as f32 {
        Some(f as i32)
    } else {
        None
    }
}

/// Height statistics of the points that fell into one cell.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CellStats {
    pub hits: u32,
    pub min_z: f32,
    pub max_z: f32,
    pub mean_z: f32,
}

impl CellStats {
    fn first(z: f32) -> Self {
        Self {
            hits: 1,
            min_z: z,
            max_z: z,
            mean_z: z,
        }
    }

    /// Fold one more height sample in.  Re-adding a sample already seen
    /// leaves min, max and (for a constant sample) mean unchanged.
    fn add(&mut self, z: f32) {
        self.hits = self.hits.saturating_add(1);
        self.min_z = self.min_z.min(z);
        self.max_z = self.max_z.max(z);
        self.mean_z += (z - self.mean_z) / self.hits as f32;
    }

    /// Vertical extent of the samples.
    pub fn height_span(&self) -> f32 {
        self.max_z - self.min_z
    }
}

/// One occupied cell.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct GridCell {
    pub stats: CellStats,
    /// 1.0 is freely traversable, 0.0 is an obstacle.
    pub traversability: f32,
}

/// Sparse grid of [`GridCell`]s at a fixed resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraversabilityGrid {
    resolution: f32,
    #[serde(with = "cell_entries")]
    cells: BTreeMap<CellKey, GridCell>,
}

impl TraversabilityGrid {
    /// Create an empty grid.  `resolution` is in world units per cell.
    pub fn new(resolution: f32) -> Self {
        Self {
            resolution,
            cells: BTreeMap::new(),
        }
    }

    pub fn resolution(&self) -> f32 {
        self.resolution
    }

    /// Number of occupied cells.
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Accumulate one world-frame point.
    ///
    /// Non-finite points and points too far out to get a cell index are
    /// rejected and `false` is returned.
    pub fn record(&mut self, point: Vec3) -> bool {
        if !point.is_finite() {
            return false;
        }
        let Some(key) = CellKey::try_containing(point.x, point.y, self.resolution) else {
            return false;
        };
        self.cells
            .entry(key)
            .and_modify(|c| c.stats.add(point.z))
            .or_insert_with(|| GridCell {
                stats: CellStats::first(point.z),
                traversability: 0.0,
            });
        true
    }

    pub fn key_for(&self, x: f32, y: f32) -> CellKey {
        CellKey::containing(x, y, self.resolution)
    }

    /// World coordinates of the centre of `key`.
    pub fn centre_of(&self, key: CellKey) -> Point2 {
        Point2::new(
            (key.i as f32 + 0.5) * self.resolution,
            (key.j as f32 + 0.5) * self.resolution,
        )
    }

    pub fn get(&self, key: CellKey) -> Option<&GridCell> {
        self.cells.get(&key)
    }

    /// Overwrite the traversability of every cell using `f`.
    pub fn assign_traversability(&mut self, mut f: impl FnMut(&CellStats) -> f32) {
        for cell in self.cells.values_mut() {
            cell.traversability = f(&cell.stats);
        }
    }

    /// Number of cells whose traversability is at least `threshold`.
    pub fn traversable_count(&self, threshold: f32) -> usize {
        self.cells
            .values()
            .filter(|c| c.traversability >= threshold)
            .count()
    }

    /// Keys of the occupied cells expressed at `resolution`.
    ///
    /// When `resolution` equals the grid's own the keys are returned as-is;
    /// otherwise each cell centre is re-bucketed at the requested resolution
    /// and centres with no cell index there are left out.
    pub fn occupied_keys_at(&self, resolution: f32) -> BTreeSet<CellKey> {
        if resolution == self.resolution {
            return self.cells.keys().copied().collect();
        }
        self.cells
            .keys()
            .filter_map(|&k| {
                let c = self.centre_of(k);
                CellKey::try_containing(c.x, c.y, resolution)
            })
            .collect()
    }

    /// World-frame extent of the occupied cells, or `None` for an empty grid.
    pub fn bounds(&self) -> Option<Bounds2D> {
        let mut keys = self.cells.keys();
        let first = keys.next()?;
        let (mut min_i, mut max_i, mut min_j, mut max_j) = (first.i, first.i, first.j, first.j);
        for k in keys {
            min_i = min_i.min(k.i);
            max_i = max_i.max(k.i);
            min_j = min_j.min(k.j);
            max_j = max_j.max(k.j);
        }
        let r = self.resolution;
        Some(Bounds2D::new(
            Point2::new(min_i as f32 * r, min_j as f32 * r),
            Point2::new((max_i as f32 + 1.0) * r, (max_j as f32 + 1.0) * r),
        ))
    }
}

/// JSON object keys must be strings, so the cell map is written as a list of
/// `[key, cell]` pairs.
mod cell_entries {
    use std::collections::BTreeMap;

    use serde::{Deserialize, Deserializer, Serializer};

    use super::{CellKey, GridCell};

    pub fn serialize<S>(cells: &BTreeMap<CellKey, GridCell>, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        s.collect_seq(cells.iter())
    }

    pub fn deserialize<'de, D>(d: D) -> Result<BTreeMap<CellKey, GridCell>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let entries: Vec<(CellKey, GridCell)> = Vec::deserialize(d)?;
        Ok(entries.into_iter().collect())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cell_key_floors_negative_coordinates() {
        assert_eq!(CellKey::containing(-0.25, 0.75, 0.5), CellKey::new(-1, 1));
        assert_eq!(CellKey::containing(0.0, 0.0, 0.5), CellKey::new(0, 0));
    }

    #[test]
    fn record_tracks_height_statistics() {
        let mut g = TraversabilityGrid::new(0.5);
        g.record(Vec3::new(0.25, 0.25, 0.0));
        g.record(Vec3::new(0.3, 0.2, 0.2));
        assert_eq!(g.len(), 1);
        let cell = g.get(CellKey::new(0, 0)).expect("cell");
        assert_eq!(cell.stats.hits, 2);
        assert!((cell.stats.height_span() - 0.2).abs() < 1e-6);
        assert!((cell.stats.mean_z - 0.1).abs() < 1e-6);
    }

    #[test]
    fn repeated_point_keeps_statistics_stable() {
        let mut g = TraversabilityGrid::new(0.1);
        for _ in 0..100 {
            g.record(Vec3::new(1.05, 2.05, 0.3));
        }
        let cell = g.get(g.key_for(1.05, 2.05)).expect("cell");
        assert_eq!(cell.stats.hits, 100);
        assert_eq!(cell.stats.min_z, 0.3);
        assert_eq!(cell.stats.max_z, 0.3);
        assert!((cell.stats.mean_z - 0.3).abs() < 1e-6);
    }

    #[test]
    fn non_finite_points_are_rejected() {
        let mut g = TraversabilityGrid::new(0.1);
        assert!(!g.record(Vec3::new(f32::NAN, 0.0, 0.0)));
        assert!(!g.record(Vec3::new(0.0, f32::INFINITY, 0.0)));
        assert!(g.is_empty());
    }

    #[test]
    fn rebucketing_to_coarser_resolution_merges_cells() {
        let mut g = TraversabilityGrid::new(0.5);
        g.record(Vec3::new(0.25, 0.25, 0.0));
        g.record(Vec3::new(0.75, 0.25, 0.0));
        g.record(Vec3::new(1.25, 0.25, 0.0));
        assert_eq!(g.occupied_keys_at(0.5).len(), 3);
        let coarse = g.occupied_keys_at(1.0);
        assert_eq!(coarse.len(), 2);
        assert!(coarse.contains(&CellKey::new(0, 0)));
        assert!(coarse.contains(&CellKey::new(1, 0)));
    }

    #[test]
    fn bounds_cover_occupied_cells() {
        let mut g = TraversabilityGrid::new(0.5);
        assert!(g.bounds().is_none());
        g.record(Vec3::new(0.25, 0.25, 0.0));
        g.record(Vec3::new(1.25, -0.25, 0.0));
        let b = g.bounds().expect("bounds");
        assert_eq!(b.min, Point2::new(0.0, -0.5));
        assert_eq!(b.max, Point2::new(1.5, 0.5));
    }

    // ── far outliers ─────────────────────────────────────────────────────────

    #[test]
    fn far_outlier_is_rejected_instead_of_saturating() {
        let mut g = TraversabilityGrid::new(0.025);
        assert!(!g.record(Vec3::new(1.0e12, 0.0, 0.0)));
        assert!(!g.record(Vec3::new(5.0e12, 0.0, 0.0)));
        assert!(!g.record(Vec3::new(0.0, -1.0e12, 0.0)));
        assert!(g.is_empty());
        assert!(g.bounds().is_none());
        assert!(CellKey::try_containing(1.0e12, 0.0, 0.025).is_none());
    }

    #[test]
    fn bounds_near_the_index_limit_do_not_overflow() {
        let mut g = TraversabilityGrid::new(1.0);
        // Largest f32 below 2^31 is 2^31 - 128.
        let x = 2_147_483_520.0_f32;
        assert!(g.record(Vec3::new(x + 0.5, 0.5, 0.0)));
        let b = g.bounds().expect("bounds");
        assert!(b.max.x.is_finite());
        assert!(b.max.x >= b.min.x);
        assert!(b.min.x > 0.0);
    }

    #[test]
    fn rebucketing_drops_centres_without_an_index() {
        let mut g = TraversabilityGrid::new(1.0);
        g.record(Vec3::new(2.0e9, 0.5, 0.0));
        g.record(Vec3::new(0.5, 0.5, 0.0));
        assert_eq!(g.len(), 2);
        let fine = g.occupied_keys_at(0.01);
        assert_eq!(fine.len(), 1);
        assert!(fine.contains(&CellKey::new(50, 50)));
    }

    #[test]
    fn traversable_count_respects_threshold() {
        let mut g = TraversabilityGrid::new(0.5);
        g.record(Vec3::new(0.25, 0.25, 0.0));
        g.record(Vec3::new(0.75, 0.25, 0.0));
        g.assign_traversability(|s| if s.mean_z > 0.0 { 0.0 } else { 1.0 });
        assert_eq!(g.traversable_count(0.5), 2);
    }

    #[test]
    fn grid_serializes_cells_as_entry_list() {
        let mut g = TraversabilityGrid::new(0.5);
        g.record(Vec3::new(0.25, 0.25, 0.1));
        let json = serde_json::to_string(&g).expect("serialize");
        assert!(json.contains("\"cells\":[["));
        let back: TraversabilityGrid = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, g);
    }
}
