//! Per-cell traversability estimation.
//!
//! The Merger accumulates every member point of a cluster into a
//! [`TraversabilityGrid`] and then asks a [`TraversabilityModel`] to turn
//! each cell's height statistics into a value in `[0, 1]`.  The model is a
//! plug-in: implement the trait and hand a boxed instance to
//! [`Merger::with_model`][crate::merger::Merger::with_model].
//!
//! One model ships with the crate:
//! - [`StepHeightModel`] – scores a cell by how far its vertical extent is
//!   from the largest step the robot can climb.

use mapbuilder_types::{CellStats, LocalMap, TraversabilityGrid};

// ────────────────────────────────────────────────────────────────────────────
// Model trait
// ────────────────────────────────────────────────────────────────────────────

/// Maps one cell's statistics to a traversability value.
///
/// Implementations must only depend on the statistics they are given, so
/// that re-inserting points already seen does not change the result beyond
/// what the statistics themselves change.
pub trait TraversabilityModel: Send + Sync {
    /// Short name used in log lines.
    fn name(&self) -> &str;

    /// Return a value in `[0, 1]`; 1.0 means freely traversable.
    fn evaluate(&self, stats: &CellStats) -> f32;
}

/// Linear fall-off on the height span of a cell.
///
/// A flat cell scores 1.0, a cell whose points span `max_step` or more
/// scores 0.0.  Cells with fewer than `min_hits` samples score
/// `unknown_value`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepHeightModel {
    pub max_step: f32,
    pub min_hits: u32,
    pub unknown_value: f32,
}

impl Default for StepHeightModel {
    fn default() -> Self {
        Self {
            max_step: 0.05,
            min_hits: 1,
            unknown_value: 0.5,
        }
    }
}

impl TraversabilityModel for StepHeightModel {
    fn name(&self) -> &str {
        "step_height"
    }

    fn evaluate(&self, stats: &CellStats) -> f32 {
        if stats.hits < self.min_hits {
            return self.unknown_value;
        }
        if self.max_step <= 0.0 {
            return if stats.height_span() > 0.0 { 0.0 } else { 1.0 };
        }
        (1.0 - stats.height_span() / self.max_step).clamp(0.0, 1.0)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Accumulation
// ────────────────────────────────────────────────────────────────────────────

/// Transform every point of `map` into the world frame and record it in
/// `grid`.
///
/// Returns the number of points rejected because they, or their transformed
/// position, were not finite or had no cell index at the grid resolution.
pub fn accumulate(grid: &mut TraversabilityGrid, map: &LocalMap) -> usize {
    map.cloud
        .iter()
        .filter(|&&p| !grid.record(map.pose.transform_point(p)))
        .count()
}

/// Fill in the traversability of every cell of `grid` using `model`.
pub fn annotate(grid: &mut TraversabilityGrid, model: &dyn TraversabilityModel) {
    grid.assign_traversability(|stats| model.evaluate(stats));
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
