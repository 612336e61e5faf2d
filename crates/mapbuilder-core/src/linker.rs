//! [`Linker`] – infers connectivity edges between consolidated nodes.
//!
//! Two nodes are linked when
//! - their planar pose distance is at most `distance_threshold`, and
//! - the overlap ratio of their occupied grid cells is at least
//!   `connectivity_threshold`.
//!
//! Both bounds are inclusive.  The overlap ratio is the number of shared
//! occupied cells divided by the occupied-cell count of the *smaller* grid,
//! with both grids expressed at the Linker's `resolution`.  A node with an
//! empty grid has overlap 0 with everything and is never linked.
//!
//! Candidate pairs are found with a sort-and-sweep along x, so pairs further
//! apart than `distance_threshold` on x never reach the overlap computation.

use std::collections::BTreeSet;

use mapbuilder_types::{
    BinaryNodeRelation, BinaryNodeRelationSet, CellKey, LocalMapWithTraversability,
    MapBuilderError, MapNodeList,
};
use tracing::{debug, info, instrument, warn};

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Parameters of the linking stage.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinkerConfig {
    pub distance_threshold: f32,
    pub connectivity_threshold: f32,
    pub resolution: f32,
}

impl Default for LinkerConfig {
    fn default() -> Self {
        Self {
            distance_threshold: 5.0,
            connectivity_threshold: 0.01,
            resolution: 0.025,
        }
    }
}

impl LinkerConfig {
    /// Reject out-of-range parameters; nothing is clamped.
    pub fn validate(&self) -> Result<(), MapBuilderError> {
        for (field, value) in [
            ("distance_threshold", self.distance_threshold),
            ("connectivity_threshold", self.connectivity_threshold),
            ("resolution", self.resolution),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return Err(MapBuilderError::config(
                    field,
                    format!("must be a positive number, got {value}"),
                ));
            }
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Linker
// ─────────────────────────────────────────────────────────────────────────────

/// Builds the connectivity graph over a [`MapNodeList`].
///
/// # Example
///
/// ```rust
/// use mapbuilder_core::linker::Linker;
/// use mapbuilder_types::MapNodeList;
///
/// let nodes = MapNodeList::new();
/// let mut linker = Linker::new(5.0, 0.01, 0.025).unwrap();
/// linker.set_input(&nodes);
/// assert!(linker.execute().unwrap().is_empty());
/// ```
#[derive(Debug)]
pub struct Linker<'a> {
    config: LinkerConfig,
    nodes: Option<&'a MapNodeList>,
}

impl<'a> Linker<'a> {
    /// # Errors
    ///
    /// Returns [`MapBuilderError::Config`] when a parameter is not a
    /// positive finite number.
    pub fn new(
        distance_threshold: f32,
        connectivity_threshold: f32,
        resolution: f32,
    ) -> Result<Self, MapBuilderError> {
        Self::from_config(LinkerConfig {
            distance_threshold,
            connectivity_threshold,
            resolution,
        })
    }

    pub fn from_config(config: LinkerConfig) -> Result<Self, MapBuilderError> {
        config.validate()?;
        if config.connectivity_threshold > 1.0 {
            warn!(
                connectivity_threshold = config.connectivity_threshold,
                "connectivity threshold above 1 can never be met; no edges will be produced"
            );
        }
        Ok(Self {
            config,
            nodes: None,
        })
    }

    pub fn config(&self) -> &LinkerConfig {
        &self.config
    }

    pub fn set_input(&mut self, nodes: &'a MapNodeList) {
        self.nodes = Some(nodes);
    }

    /// Compute the relation set.
    ///
    /// # Errors
    ///
    /// Returns [`MapBuilderError::Stage`] when no input was set.
    #[instrument(skip_all, fields(distance_threshold = self.config.distance_threshold))]
    pub fn execute(&self) -> Result<BinaryNodeRelationSet, MapBuilderError> {
        let nodes = self
            .nodes
            .ok_or_else(|| MapBuilderError::Stage("execute called before set_input".to_string()))?;

        let cells: Vec<BTreeSet<CellKey>> = nodes
            .iter()
            .map(|n| n.grid.occupied_keys_at(self.config.resolution))
            .collect();

        let candidates = self.candidate_pairs(nodes.as_slice());
        let mut relations = BinaryNodeRelationSet::new();
        for &(i, j) in &candidates {
            let (a, b) = (&nodes.as_slice()[i], &nodes.as_slice()[j]);
            let ratio = overlap_ratio(&cells[i], &cells[j]);
            if ratio >= self.config.connectivity_threshold {
                if let Some(edge) = BinaryNodeRelation::new(a.id, b.id, ratio) {
                    debug!(from = %edge.from(), to = %edge.to(), ratio, "nodes linked");
                    relations.insert(edge);
                }
            } else {
                debug!(a = %a.id, b = %b.id, ratio, "overlap below threshold");
            }
        }

        info!(
            nodes = nodes.len(),
            candidates = candidates.len(),
            edges = relations.len(),
            "connectivity computed"
        );
        Ok(relations)
    }

    /// Index pairs `(i, j)`, `i < j`, whose planar distance is within the
    /// threshold.  Returned in ascending order.
    fn candidate_pairs(&self, nodes: &[LocalMapWithTraversability]) -> Vec<(usize, usize)> {
        let dth = self.config.distance_threshold;
        let dth2 = dth * dth;

        let mut order: Vec<usize> = (0..nodes.len()).collect();
        order.sort_by(|&a, &b| {
            nodes[a]
                .pose
                .translation
                .x
                .total_cmp(&nodes[b].pose.translation.x)
                .then(a.cmp(&b))
        });

        let mut pairs = Vec::new();
        for (k, &i) in order.iter().enumerate() {
            let pi = nodes[i].pose.planar();
            for &j in &order[k + 1..] {
                let pj = nodes[j].pose.planar();
                if pj.x - pi.x > dth {
                    break;
                }
                if nodes[i].id != nodes[j].id && pi.distance_squared(&pj) <= dth2 {
                    pairs.push((i.min(j), i.max(j)));
                }
            }
        }
        pairs.sort_unstable();
        pairs
    }
}

/// Shared occupied cells over the smaller grid's occupied-cell count.
///
/// Symmetric in its arguments; 0 when either set is empty.
pub fn overlap_ratio(a: &BTreeSet<CellKey>, b: &BTreeSet<CellKey>) -> f32 {
    let smaller = a.len().min(b.len());
    if smaller == 0 {
        return 0.0;
    }
    let (small, large) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    let shared = small.iter().filter(|k| large.contains(k)).count();
    shared as f32 / smaller as f32
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use mapbuilder_types::{Bounds2D, NodeId, Point2, Pose3D, TraversabilityGrid, Vec3};

    /// A node at `(x, y)` whose grid occupies the given 0.5 m cells.
    fn node(id: u64, x: f32, y: f32, cells: &[(i32, i32)]) -> LocalMapWithTraversability {
        let mut grid = TraversabilityGrid::new(0.5);
        for &(i, j) in cells {
            grid.record(Vec3::new(i as f32 * 0.5 + 0.25, j as f32 * 0.5 + 0.25, 0.0));
        }
        LocalMapWithTraversability {
            id: NodeId(id),
            pose: Pose3D::from_xy(x, y),
            bounds: Bounds2D::from_point(Point2::new(x, y)),
            grid,
            absorbed: [NodeId(id + 100)].into_iter().collect(),
            parent: None,
        }
    }

    const SQUARE: [(i32, i32); 4] = [(0, 0), (1, 0), (0, 1), (1, 1)];

    fn link(nodes: &MapNodeList, dth: f32, cth: f32) -> BinaryNodeRelationSet {
        let mut linker = Linker::new(dth, cth, 0.5).expect("config");
        linker.set_input(nodes);
        linker.execute().expect("execute")
    }

    // ── configuration ────────────────────────────────────────────────────────

    #[test]
    fn rejects_non_positive_parameters() {
        assert!(Linker::new(0.0, 0.1, 0.1).is_err());
        assert!(Linker::new(5.0, -0.1, 0.1).is_err());
        assert!(Linker::new(5.0, 0.1, f32::NAN).is_err());
        assert!(Linker::new(5.0, 5.0, 0.1).is_ok());
    }

    #[test]
    fn execute_without_input_is_a_stage_error() {
        let linker = Linker::new(5.0, 0.1, 0.1).unwrap();
        assert!(matches!(linker.execute(), Err(MapBuilderError::Stage(_))));
    }

    // ── overlap ──────────────────────────────────────────────────────────────

    #[test]
    fn overlap_normalises_by_smaller_set() {
        let a: BTreeSet<CellKey> = SQUARE.iter().map(|&(i, j)| CellKey::new(i, j)).collect();
        let b: BTreeSet<CellKey> = [CellKey::new(0, 0), CellKey::new(5, 5)].into_iter().collect();
        assert_eq!(overlap_ratio(&a, &b), 0.5);
        assert_eq!(overlap_ratio(&b, &a), 0.5);
    }

    #[test]
    fn overlap_with_empty_set_is_zero() {
        let a: BTreeSet<CellKey> = SQUARE.iter().map(|&(i, j)| CellKey::new(i, j)).collect();
        assert_eq!(overlap_ratio(&a, &BTreeSet::new()), 0.0);
    }

    // ── linking ──────────────────────────────────────────────────────────────

    #[test]
    fn identical_grids_link_with_full_weight() {
        let nodes: MapNodeList = [node(1, 0.0, 0.0, &SQUARE), node(2, 1.0, 0.0, &SQUARE)]
            .into_iter()
            .collect();
        let edges = link(&nodes, 5.0, 0.01);
        assert_eq!(edges.len(), 1);
        let e = edges.get(NodeId(1), NodeId(2)).expect("edge");
        assert_eq!(e.weight, 1.0);
        assert_eq!((e.from(), e.to()), (NodeId(1), NodeId(2)));
    }

    #[test]
    fn distance_bound_is_inclusive() {
        let nodes: MapNodeList = [node(1, 0.0, 0.0, &SQUARE), node(2, 5.0, 0.0, &SQUARE)]
            .into_iter()
            .collect();
        assert_eq!(link(&nodes, 5.0, 0.5).len(), 1);
        assert_eq!(link(&nodes, 4.99, 0.5).len(), 0);
    }

    #[test]
    fn diagonal_distance_is_checked_after_sweep() {
        // |dx| = 3 passes the sweep, but the planar distance is 5.
        let nodes: MapNodeList = [node(1, 0.0, 0.0, &SQUARE), node(2, 3.0, 4.0, &SQUARE)]
            .into_iter()
            .collect();
        assert_eq!(link(&nodes, 5.0, 0.5).len(), 1);
        assert_eq!(link(&nodes, 4.5, 0.5).len(), 0);
    }

    #[test]
    fn connectivity_bound_is_inclusive() {
        // One of four cells shared: ratio exactly 0.25.
        let nodes: MapNodeList = [
            node(1, 0.0, 0.0, &SQUARE),
            node(2, 1.0, 0.0, &[(1, 1), (2, 1), (1, 2), (2, 2)]),
        ]
        .into_iter()
        .collect();
        let edges = link(&nodes, 5.0, 0.25);
        assert_eq!(edges.len(), 1);
        assert_eq!(edges.iter().next().unwrap().weight, 0.25);
        assert!(link(&nodes, 5.0, 0.26).is_empty());
    }

    #[test]
    fn empty_grids_never_link() {
        let nodes: MapNodeList = [node(1, 0.0, 0.0, &[]), node(2, 0.0, 0.0, &[])]
            .into_iter()
            .collect();
        assert!(link(&nodes, 5.0, 0.01).is_empty());
    }

    #[test]
    fn threshold_above_one_links_nothing() {
        let nodes: MapNodeList = [node(1, 0.0, 0.0, &SQUARE), node(2, 0.0, 0.0, &SQUARE)]
            .into_iter()
            .collect();
        assert!(link(&nodes, 5.0, 5.0).is_empty());
    }

    #[test]
    fn edges_are_unique_and_order_independent() {
        let forward: MapNodeList = [
            node(9, 0.0, 0.0, &SQUARE),
            node(3, 0.5, 0.0, &[(0, 0), (1, 0)]),
            node(5, 1.0, 0.0, &[(1, 1)]),
        ]
        .into_iter()
        .collect();
        let reversed: MapNodeList = forward.iter().rev().cloned().collect();

        let a = link(&forward, 5.0, 0.01);
        let b = link(&reversed, 5.0, 0.01);
        assert_eq!(a, b);
        assert_eq!(a.len(), 2);
        let e = a.get(NodeId(9), NodeId(3)).expect("edge");
        assert_eq!((e.from(), e.to()), (NodeId(3), NodeId(9)));
        assert_eq!(e.weight, 1.0);
        // 3 and 5 share nothing.
        assert!(a.get(NodeId(3), NodeId(5)).is_none());
        for r in a.iter() {
            assert_ne!(r.from(), r.to());
        }
    }

    #[test]
    fn far_nodes_are_pruned_before_overlap() {
        let nodes: MapNodeList = (0..10)
            .map(|i| node(i, i as f32 * 10.0, 0.0, &SQUARE))
            .collect();
        let mut linker = Linker::new(5.0, 0.01, 0.5).unwrap();
        linker.set_input(&nodes);
        assert!(linker.candidate_pairs(nodes.as_slice()).is_empty());
        assert!(linker.execute().unwrap().is_empty());
    }

    #[test]
    fn coarser_linker_resolution_rebuckets_grids() {
        // Adjacent but disjoint 0.5 m cells fall into the same 1 m cell.
        let nodes: MapNodeList = [node(1, 0.0, 0.0, &[(0, 0)]), node(2, 0.0, 0.0, &[(1, 1)])]
            .into_iter()
            .collect();
        assert!(link(&nodes, 5.0, 0.5).is_empty());

        let mut linker = Linker::new(5.0, 0.5, 1.0).unwrap();
        linker.set_input(&nodes);
        assert_eq!(linker.execute().unwrap().len(), 1);
    }
}
