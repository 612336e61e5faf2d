//! Spatial index over local maps.
//!
//! Partitions the ground plane using a recursive **Quadtree** so that local
//! maps taken close to each other end up in the same leaf bucket.  The
//! Merger turns every non-empty leaf into one consolidated node.
//!
//! # Key types
//!
//! | Type | Role |
//! |------|------|
//! | [`Quadtree`] | Spatial index; insert local maps, walk the leaves.      |
//! | [`QuadLeaf`] | Read-only view of one leaf: box, depth and its bucket.  |
//!
//! The tree only borrows the maps it indexes.
//!
//! # Example
//!
//! ```rust
//! use mapbuilder_core::quadtree::Quadtree;
//! use mapbuilder_types::{Bounds2D, LocalMap, NodeId, Point2, Pose3D};
//!
//! let maps = vec![
//!     LocalMap::new(NodeId(0), Pose3D::from_xy(1.0, 1.0), vec![]),
//!     LocalMap::new(NodeId(1), Pose3D::from_xy(9.0, 9.0), vec![]),
//! ];
//! let bounds = Bounds2D::new(Point2::new(0.0, 0.0), Point2::new(10.0, 10.0));
//! let mut tree = Quadtree::new(bounds, 2);
//! for m in &maps {
//!     assert!(tree.insert(m));
//! }
//!
//! // The two maps are separated by the first split.
//! let occupied: Vec<_> = tree.leaves().into_iter().filter(|l| !l.maps.is_empty()).collect();
//! assert_eq!(occupied.len(), 2);
//! ```

use std::fmt::Write as _;

use mapbuilder_types::{Bounds2D, LocalMap, Point2};

/// Deepest tree the builder accepts; 4^16 leaves is far past any useful map.
pub const MAX_QUADTREE_DEPTH: usize = 16;

/// A leaf holding this many maps is split (depth budget permitting).
const SPLIT_THRESHOLD: usize = 2;

// ────────────────────────────────────────────────────────────────────────────
// Quadtree
// ────────────────────────────────────────────────────────────────────────────

/// A recursive spatial index that subdivides a planar box into four
/// quadrants.
///
/// A map is bucketed by the planar projection of its pose into exactly one
/// leaf.  A leaf is split when it holds two or more maps and `max_depth`
/// levels have not been created yet, so every leaf either sits at
/// `max_depth` or holds at most one map.
///
/// Quadrants are ordered lower-left, lower-right, upper-left, upper-right.
/// A pose lying exactly on a split line goes to the lower/left side.
#[derive(Debug)]
pub struct Quadtree<'a> {
    root: QuadNode<'a>,
    max_depth: usize,
}

/// Read-only view of one leaf.
#[derive(Debug, Clone, Copy)]
pub struct QuadLeaf<'t, 'a> {
    pub bounds: Bounds2D,
    pub depth: usize,
    /// Maps bucketed here, in insertion order.
    pub maps: &'t [&'a LocalMap],
}

impl<'a> Quadtree<'a> {
    /// Create an empty quadtree covering `bounds`.
    ///
    /// `max_depth = 0` keeps the root as the single leaf.
    pub fn new(bounds: Bounds2D, max_depth: usize) -> Self {
        Self {
            root: QuadNode::new(bounds, 0),
            max_depth: max_depth.min(MAX_QUADTREE_DEPTH),
        }
    }

    pub fn bounds(&self) -> Bounds2D {
        self.root.bounds
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Bucket `map` into its leaf.
    ///
    /// Returns `false` and ignores the map when its planar position lies
    /// outside the root box or is not finite.
    pub fn insert(&mut self, map: &'a LocalMap) -> bool {
        let p = map.pose.planar();
        if !self.root.bounds.contains_point(p) {
            return false;
        }
        self.root.insert(map, p, self.max_depth);
        true
    }

    /// Total number of maps stored in the tree.
    pub fn len(&self) -> usize {
        self.root.count()
    }

    /// True when the tree contains no maps.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All leaves, depth-first in quadrant order, including empty ones.
    pub fn leaves(&self) -> Vec<QuadLeaf<'_, 'a>> {
        let mut out = Vec::new();
        self.root.collect_leaves(&mut out);
        out
    }

    /// Depth of the deepest leaf.
    pub fn height(&self) -> usize {
        self.root.height()
    }

    /// Indented text outline of the partition, one line per node.
    pub fn describe(&self) -> String {
        let mut out = String::new();
        self.root.describe(&mut out);
        out
    }
}

// ────────────────────────────────────────────────────────────────────────────
// QuadNode – internal implementation
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug)]
struct QuadNode<'a> {
    bounds: Bounds2D,
    depth: usize,
    /// Maps stored at this node (only non-empty when the node is a leaf).
    maps: Vec<&'a LocalMap>,
    /// Four children; `None` while this node is a leaf.
    children: Option<Box<[QuadNode<'a>; 4]>>,
}

impl<'a> QuadNode<'a> {
    fn new(bounds: Bounds2D, depth: usize) -> Self {
        Self {
            bounds,
            depth,
            maps: Vec::new(),
            children: None,
        }
    }

    fn is_leaf(&self) -> bool {
        self.children.is_none()
    }

    fn count(&self) -> usize {
        match &self.children {
            None => self.maps.len(),
            Some(children) => children.iter().map(|c| c.count()).sum(),
        }
    }

    fn height(&self) -> usize {
        match &self.children {
            None => self.depth,
            Some(children) => children.iter().map(|c| c.height()).max().unwrap_or(self.depth),
        }
    }

    /// Index of the quadrant containing `p`; ties go lower/left.
    fn quadrant_of(&self, p: Point2) -> usize {
        let c = self.bounds.centre();
        let right = usize::from(p.x > c.x);
        let upper = usize::from(p.y > c.y);
        right + 2 * upper
    }

    fn insert(&mut self, map: &'a LocalMap, p: Point2, max_depth: usize) {
        if self.is_leaf() {
            self.maps.push(map);
            if self.maps.len() >= SPLIT_THRESHOLD && self.depth < max_depth {
                self.subdivide(max_depth);
            }
        } else {
            let q = self.quadrant_of(p);
            if let Some(children) = self.children.as_mut() {
                children[q].insert(map, p, max_depth);
            }
        }
    }

    /// Split this leaf into four children and redistribute existing maps.
    fn subdivide(&mut self, max_depth: usize) {
        let c = self.bounds.centre();
        let min = self.bounds.min;
        let max = self.bounds.max;
        let depth = self.depth + 1;

        let quadrants = [
            Bounds2D::new(min, c),
            Bounds2D::new(Point2::new(c.x, min.y), Point2::new(max.x, c.y)),
            Bounds2D::new(Point2::new(min.x, c.y), Point2::new(c.x, max.y)),
            Bounds2D::new(c, max),
        ];
        self.children = Some(Box::new(quadrants.map(|b| QuadNode::new(b, depth))));

        let maps = std::mem::take(&mut self.maps);
        for map in maps {
            let p = map.pose.planar();
            let q = self.quadrant_of(p);
            if let Some(children) = self.children.as_mut() {
                children[q].insert(map, p, max_depth);
            }
        }
    }

    fn collect_leaves<'t>(&'t self, out: &mut Vec<QuadLeaf<'t, 'a>>) {
        match &self.children {
            None => out.push(QuadLeaf {
                bounds: self.bounds,
                depth: self.depth,
                maps: &self.maps,
            }),
            Some(children) => {
                for child in children.iter() {
                    child.collect_leaves(out);
                }
            }
        }
    }

    fn describe(&self, out: &mut String) {
        let b = &self.bounds;
        let _ = write!(
            out,
            "{:indent$}[{:.3}, {:.3}] – [{:.3}, {:.3}]",
            "",
            b.min.x,
            b.min.y,
            b.max.x,
            b.max.y,
            indent = self.depth * 2
        );
        if self.is_leaf() {
            let ids: Vec<String> = self.maps.iter().map(|m| m.id.to_string()).collect();
            let _ = writeln!(out, " leaf: {} map(s) {}", self.maps.len(), ids.join(" "));
        } else {
            let _ = writeln!(out);
            if let Some(children) = &self.children {
                for child in children.iter() {
                    child.describe(out);
                }
            }
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use mapbuilder_types::{NodeId, Pose3D};

    fn map_at(id: u64, x: f32, y: f32) -> LocalMap {
        LocalMap::new(NodeId(id), Pose3D::from_xy(x, y), vec![])
    }

    fn unit_bounds() -> Bounds2D {
        Bounds2D::new(Point2::new(0.0, 0.0), Point2::new(1.0, 1.0))
    }

    fn leaf_of(tree: &Quadtree<'_>, id: u64) -> Vec<Bounds2D> {
        tree.leaves()
            .into_iter()
            .filter(|l| l.maps.iter().any(|m| m.id == NodeId(id)))
            .map(|l| l.bounds)
            .collect()
    }

    /// Walk every internal node and check that its children tile it.
    fn assert_partition(node: &QuadNode<'_>) {
        if let Some(children) = &node.children {
            let parent_area = node.bounds.area();
            let child_area: f32 = children.iter().map(|c| c.bounds.area()).sum();
            let tol = 1e-6 * parent_area.max(1.0);
            assert!(
                (parent_area - child_area).abs() <= tol,
                "children area {child_area} != parent area {parent_area}"
            );
            for (i, a) in children.iter().enumerate() {
                assert!(node.bounds.contains_bounds(&a.bounds, tol));
                assert_eq!(a.depth, node.depth + 1);
                for b in children.iter().skip(i + 1) {
                    let ix = (a.bounds.max.x.min(b.bounds.max.x) - a.bounds.min.x.max(b.bounds.min.x)).max(0.0);
                    let iy = (a.bounds.max.y.min(b.bounds.max.y) - a.bounds.min.y.max(b.bounds.min.y)).max(0.0);
                    assert!(ix * iy <= tol, "sibling quadrants overlap");
                }
                assert_partition(a);
            }
        }
    }

    // ── insertion ───────────────────────────────────────────────────────────

    #[test]
    fn empty_tree_has_single_empty_leaf() {
        let tree = Quadtree::new(unit_bounds(), 3);
        assert!(tree.is_empty());
        let leaves = tree.leaves();
        assert_eq!(leaves.len(), 1);
        assert!(leaves[0].maps.is_empty());
    }

    #[test]
    fn insert_outside_bounds_is_rejected() {
        let m = map_at(0, 5.0, 5.0);
        let mut tree = Quadtree::new(unit_bounds(), 3);
        assert!(!tree.insert(&m));
        assert!(tree.is_empty());
    }

    #[test]
    fn nan_pose_is_rejected() {
        let m = map_at(0, f32::NAN, 0.5);
        let mut tree = Quadtree::new(unit_bounds(), 3);
        assert!(!tree.insert(&m));
    }

    #[test]
    fn single_map_never_splits() {
        let m = map_at(0, 0.3, 0.3);
        let mut tree = Quadtree::new(unit_bounds(), 4);
        tree.insert(&m);
        assert_eq!(tree.leaves().len(), 1);
        assert_eq!(tree.height(), 0);
    }

    #[test]
    fn depth_zero_keeps_everything_in_root() {
        let maps: Vec<LocalMap> = (0..4).map(|i| map_at(i, 0.2 * i as f32, 0.1)).collect();
        let mut tree = Quadtree::new(unit_bounds(), 0);
        for m in &maps {
            tree.insert(m);
        }
        let leaves = tree.leaves();
        assert_eq!(leaves.len(), 1);
        assert_eq!(leaves[0].maps.len(), 4);
    }

    #[test]
    fn every_map_lands_in_exactly_one_leaf() {
        let maps: Vec<LocalMap> = (0..50)
            .map(|i| map_at(i, (i % 7) as f32 / 7.0, (i % 11) as f32 / 11.0))
            .collect();
        let mut tree = Quadtree::new(unit_bounds(), 3);
        for m in &maps {
            assert!(tree.insert(m));
        }
        assert_eq!(tree.len(), maps.len());
        for m in &maps {
            assert_eq!(leaf_of(&tree, m.id.0).len(), 1, "map {} bucketed twice", m.id);
        }
    }

    #[test]
    fn leaves_respect_max_depth() {
        let maps: Vec<LocalMap> = (0..10).map(|i| map_at(i, 0.1, 0.1)).collect();
        let mut tree = Quadtree::new(unit_bounds(), 2);
        for m in &maps {
            tree.insert(m);
        }
        assert_eq!(tree.height(), 2);
        for leaf in tree.leaves() {
            assert!(leaf.depth <= 2);
            assert!(leaf.depth == 2 || leaf.maps.len() < SPLIT_THRESHOLD);
        }
    }

    #[test]
    fn depth_is_capped() {
        let tree = Quadtree::new(unit_bounds(), 1_000);
        assert_eq!(tree.max_depth(), MAX_QUADTREE_DEPTH);
    }

    // ── tie-breaking ────────────────────────────────────────────────────────

    #[test]
    fn boundary_ties_go_lower_left() {
        let a = map_at(0, 0.5, 0.5);
        let b = map_at(1, 0.9, 0.9);
        let mut tree = Quadtree::new(unit_bounds(), 1);
        tree.insert(&a);
        tree.insert(&b);
        let leaf = leaf_of(&tree, 0);
        assert_eq!(leaf, vec![Bounds2D::new(Point2::new(0.0, 0.0), Point2::new(0.5, 0.5))]);
    }

    #[test]
    fn vertical_split_line_goes_left() {
        let a = map_at(0, 0.5, 0.8);
        let b = map_at(1, 0.9, 0.1);
        let mut tree = Quadtree::new(unit_bounds(), 1);
        tree.insert(&a);
        tree.insert(&b);
        let leaf = leaf_of(&tree, 0);
        assert_eq!(leaf, vec![Bounds2D::new(Point2::new(0.0, 0.5), Point2::new(0.5, 1.0))]);
    }

    // ── partition invariant ─────────────────────────────────────────────────

    #[test]
    fn children_partition_parent() {
        let bounds = Bounds2D::new(Point2::new(-1.0, -1.0), Point2::new(11.5, 1.0));
        let maps: Vec<LocalMap> = (0..40)
            .map(|i| map_at(i, -1.0 + 12.5 * (i as f32 / 40.0), -1.0 + 2.0 * ((i * 7 % 40) as f32 / 40.0)))
            .collect();
        let mut tree = Quadtree::new(bounds, 4);
        for m in &maps {
            tree.insert(m);
        }
        assert_partition(&tree.root);
    }

    #[test]
    fn leaf_buckets_keep_insertion_order() {
        let maps: Vec<LocalMap> = (0..3).map(|i| map_at(i, 0.1, 0.1)).collect();
        let mut tree = Quadtree::new(unit_bounds(), 1);
        for m in &maps {
            tree.insert(m);
        }
        let leaf = tree.leaves().into_iter().find(|l| !l.maps.is_empty()).expect("leaf");
        let ids: Vec<u64> = leaf.maps.iter().map(|m| m.id.0).collect();
        assert_eq!(ids, vec![0, 1, 2]);
    }

    #[test]
    fn describe_lists_leaves() {
        let a = map_at(7, 0.2, 0.2);
        let b = map_at(8, 0.8, 0.8);
        let mut tree = Quadtree::new(unit_bounds(), 1);
        tree.insert(&a);
        tree.insert(&b);
        let text = tree.describe();
        assert_eq!(text.lines().count(), 5);
        assert!(text.contains("leaf: 1 map(s) #7"));
        assert!(text.contains("leaf: 1 map(s) #8"));
    }
}
