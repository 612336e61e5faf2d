//! Map graph objects: raw local maps, consolidated nodes and the relations
//! between them.
//!
//! Every object is identified by a [`NodeId`].  Graph structure is expressed
//! through ids only: a parent reference is an `Option<NodeId>` resolved
//! through a lookup, never an owning pointer, so the graph cannot form
//! ownership cycles.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::geometry::{Bounds2D, Pose3D, Vec3};
use crate::grid::TraversabilityGrid;

// ────────────────────────────────────────────────────────────────────────────
// Identifiers
// ────────────────────────────────────────────────────────────────────────────

/// Stable identifier of a map node or relation endpoint.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    JsonSchema,
)]
#[serde(transparent)]
pub struct NodeId(pub u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Hands out fresh, strictly increasing [`NodeId`]s.
#[derive(Debug, Clone)]
pub struct IdAllocator {
    next: u64,
}

impl IdAllocator {
    /// Start allocating at `first`.
    pub fn starting_at(first: u64) -> Self {
        Self { next: first }
    }

    /// Start allocating just past the largest id in `ids` (or at 0).
    pub fn after<'a>(ids: impl IntoIterator<Item = &'a NodeId>) -> Self {
        let next = ids
            .into_iter()
            .map(|id| id.0.saturating_add(1))
            .max()
            .unwrap_or(0);
        Self { next }
    }

    pub fn allocate(&mut self) -> NodeId {
        let id = NodeId(self.next);
        self.next = self.next.saturating_add(1);
        id
    }
}

// ────────────────────────────────────────────────────────────────────────────
// LocalMap
// ────────────────────────────────────────────────────────────────────────────

/// Points of a local map, expressed in the map's own frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct PointCloud(pub Vec<Vec3>);

impl PointCloud {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Vec3> {
        self.0.iter()
    }
}

impl From<Vec<Vec3>> for PointCloud {
    fn from(points: Vec<Vec3>) -> Self {
        Self(points)
    }
}

/// A raw input unit: one sensor snapshot taken at a known robot pose.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct LocalMap {
    pub id: NodeId,
    /// Transform from the map frame into the world frame.
    pub pose: Pose3D,
    #[serde(default)]
    pub cloud: PointCloud,
    /// Owning local map, if this one is part of a coarser grouping.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<NodeId>,
}

impl LocalMap {
    pub fn new(id: NodeId, pose: Pose3D, cloud: impl Into<PointCloud>) -> Self {
        Self {
            id,
            pose,
            cloud: cloud.into(),
            parent: None,
        }
    }

    pub fn with_parent(mut self, parent: NodeId) -> Self {
        self.parent = Some(parent);
        self
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Parent lookup
// ────────────────────────────────────────────────────────────────────────────

/// Id → parent-id lookup over a set of nodes.
#[derive(Debug, Clone, Default)]
pub struct ParentIndex {
    parents: HashMap<NodeId, Option<NodeId>>,
}

impl ParentIndex {
    /// Build the index from `(id, parent)` pairs.
    pub fn from_pairs(pairs: impl IntoIterator<Item = (NodeId, Option<NodeId>)>) -> Self {
        Self {
            parents: pairs.into_iter().collect(),
        }
    }

    /// Parent of `id` when that parent is itself part of the index.
    pub fn parent_of(&self, id: NodeId) -> Option<NodeId> {
        self.parents
            .get(&id)
            .copied()
            .flatten()
            .filter(|p| self.parents.contains_key(p))
    }

    /// Follow parent links up to the top-most ancestor present in the index.
    ///
    /// Returns `None` when the chain loops back on itself.
    pub fn root_of(&self, id: NodeId) -> Option<NodeId> {
        let mut seen = HashSet::new();
        let mut current = id;
        while let Some(parent) = self.parent_of(current) {
            if !seen.insert(current) {
                return None;
            }
            current = parent;
        }
        Some(current)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Consolidated nodes
// ────────────────────────────────────────────────────────────────────────────

/// A consolidated map node produced by clustering one or more local maps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalMapWithTraversability {
    pub id: NodeId,
    /// Aggregate pose of the absorbed maps.
    pub pose: Pose3D,
    /// World-frame planar extent of the grid (or of the member poses when
    /// the grid is empty).
    pub bounds: Bounds2D,
    pub grid: TraversabilityGrid,
    /// Ids of the local maps merged into this node.
    pub absorbed: BTreeSet<NodeId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<NodeId>,
}

/// Ordered collection of consolidated nodes with id lookup.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MapNodeList {
    nodes: Vec<LocalMapWithTraversability>,
}

impl MapNodeList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a node.  Returns `false` (and drops `node`) when a node with
    /// the same id is already present.
    pub fn add_element(&mut self, node: LocalMapWithTraversability) -> bool {
        if self.contains(node.id) {
            return false;
        }
        self.nodes.push(node);
        true
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, LocalMapWithTraversability> {
        self.nodes.iter()
    }

    pub fn as_slice(&self) -> &[LocalMapWithTraversability] {
        &self.nodes
    }

    pub fn get(&self, id: NodeId) -> Option<&LocalMapWithTraversability> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.get(id).is_some()
    }
}

impl IntoIterator for MapNodeList {
    type Item = LocalMapWithTraversability;
    type IntoIter = std::vec::IntoIter<LocalMapWithTraversability>;

    fn into_iter(self) -> Self::IntoIter {
        self.nodes.into_iter()
    }
}

impl<'a> IntoIterator for &'a MapNodeList {
    type Item = &'a LocalMapWithTraversability;
    type IntoIter = std::slice::Iter<'a, LocalMapWithTraversability>;

    fn into_iter(self) -> Self::IntoIter {
        self.nodes.iter()
    }
}

impl FromIterator<LocalMapWithTraversability> for MapNodeList {
    fn from_iter<I: IntoIterator<Item = LocalMapWithTraversability>>(iter: I) -> Self {
        let mut list = Self::new();
        for node in iter {
            list.add_element(node);
        }
        list
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Relations
// ────────────────────────────────────────────────────────────────────────────

/// An undirected connectivity edge between two consolidated nodes, stored
/// with `from < to`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BinaryNodeRelation {
    from: NodeId,
    to: NodeId,
    /// Overlap ratio between the two nodes' grids.
    pub weight: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<NodeId>,
}

impl BinaryNodeRelation {
    /// Create a relation; endpoints are reordered so that `from < to`.
    ///
    /// Returns `None` for a self edge.
    pub fn new(a: NodeId, b: NodeId, weight: f32) -> Option<Self> {
        if a == b {
            return None;
        }
        let (from, to) = if a < b { (a, b) } else { (b, a) };
        Some(Self {
            from,
            to,
            weight,
            parent: None,
        })
    }

    pub fn with_parent(mut self, parent: NodeId) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn from(&self) -> NodeId {
        self.from
    }

    pub fn to(&self) -> NodeId {
        self.to
    }

    pub fn key(&self) -> (NodeId, NodeId) {
        (self.from, self.to)
    }
}

/// Set of relations, unique per endpoint pair and iterated in
/// `(from, to)` order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BinaryNodeRelationSet {
    relations: BTreeMap<(NodeId, NodeId), BinaryNodeRelation>,
}

impl BinaryNodeRelationSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `relation`.  Returns `false` and keeps the existing edge when
    /// the pair is already linked.
    pub fn insert(&mut self, relation: BinaryNodeRelation) -> bool {
        match self.relations.entry(relation.key()) {
            std::collections::btree_map::Entry::Occupied(_) => false,
            std::collections::btree_map::Entry::Vacant(slot) => {
                slot.insert(relation);
                true
            }
        }
    }

    /// Look up the edge between `a` and `b`, in either order.
    pub fn get(&self, a: NodeId, b: NodeId) -> Option<&BinaryNodeRelation> {
        let key = if a < b { (a, b) } else { (b, a) };
        self.relations.get(&key)
    }

    pub fn len(&self) -> usize {
        self.relations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.relations.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &BinaryNodeRelation> {
        self.relations.values()
    }
}

impl IntoIterator for BinaryNodeRelationSet {
    type Item = BinaryNodeRelation;
    type IntoIter = std::collections::btree_map::IntoValues<(NodeId, NodeId), BinaryNodeRelation>;

    fn into_iter(self) -> Self::IntoIter {
        self.relations.into_values()
    }
}

impl FromIterator<BinaryNodeRelation> for BinaryNodeRelationSet {
    fn from_iter<I: IntoIterator<Item = BinaryNodeRelation>>(iter: I) -> Self {
        let mut set = Self::new();
        for r in iter {
            set.insert(r);
        }
        set
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Point2;

    fn node(id: u64, parent: Option<u64>) -> LocalMapWithTraversability {
        LocalMapWithTraversability {
            id: NodeId(id),
            pose: Pose3D::identity(),
            bounds: Bounds2D::from_point(Point2::new(0.0, 0.0)),
            grid: TraversabilityGrid::new(0.1),
            absorbed: BTreeSet::new(),
            parent: parent.map(NodeId),
        }
    }

    // ── IdAllocator ─────────────────────────────────────────────────────────

    #[test]
    fn allocator_starts_after_largest_id() {
        let ids = [NodeId(4), NodeId(11), NodeId(2)];
        let mut alloc = IdAllocator::after(ids.iter());
        assert_eq!(alloc.allocate(), NodeId(12));
        assert_eq!(alloc.allocate(), NodeId(13));
    }

    #[test]
    fn allocator_on_empty_input_starts_at_zero() {
        let mut alloc = IdAllocator::after(std::iter::empty());
        assert_eq!(alloc.allocate(), NodeId(0));
    }

    // ── ParentIndex ─────────────────────────────────────────────────────────

    #[test]
    fn root_of_follows_chain() {
        let idx = ParentIndex::from_pairs([
            (NodeId(1), None),
            (NodeId(2), Some(NodeId(1))),
            (NodeId(3), Some(NodeId(2))),
        ]);
        assert_eq!(idx.root_of(NodeId(3)), Some(NodeId(1)));
        assert_eq!(idx.parent_of(NodeId(1)), None);
        assert_eq!(idx.parent_of(NodeId(3)), Some(NodeId(2)));
    }

    #[test]
    fn parent_outside_index_counts_as_top_level() {
        let idx = ParentIndex::from_pairs([(NodeId(5), Some(NodeId(99)))]);
        assert_eq!(idx.parent_of(NodeId(5)), None);
        assert_eq!(idx.root_of(NodeId(5)), Some(NodeId(5)));
    }

    #[test]
    fn root_of_detects_cycles() {
        let idx = ParentIndex::from_pairs([
            (NodeId(1), Some(NodeId(2))),
            (NodeId(2), Some(NodeId(1))),
        ]);
        assert_eq!(idx.root_of(NodeId(1)), None);
    }

    // ── MapNodeList ─────────────────────────────────────────────────────────

    #[test]
    fn node_list_rejects_duplicate_ids() {
        let mut list = MapNodeList::new();
        assert!(list.add_element(node(1, None)));
        assert!(!list.add_element(node(1, None)));
        assert_eq!(list.len(), 1);
    }

    // ── BinaryNodeRelation(Set) ─────────────────────────────────────────────

    #[test]
    fn relation_orders_endpoints() {
        let r = BinaryNodeRelation::new(NodeId(7), NodeId(3), 0.5).expect("edge");
        assert_eq!(r.from(), NodeId(3));
        assert_eq!(r.to(), NodeId(7));
    }

    #[test]
    fn self_relation_is_refused() {
        assert!(BinaryNodeRelation::new(NodeId(1), NodeId(1), 1.0).is_none());
    }

    #[test]
    fn relation_set_is_unique_per_pair() {
        let mut set = BinaryNodeRelationSet::new();
        assert!(set.insert(BinaryNodeRelation::new(NodeId(1), NodeId(2), 0.3).unwrap()));
        assert!(!set.insert(BinaryNodeRelation::new(NodeId(2), NodeId(1), 0.9).unwrap()));
        assert_eq!(set.len(), 1);
        let r = set.get(NodeId(2), NodeId(1)).expect("edge");
        assert!((r.weight - 0.3).abs() < f32::EPSILON);
    }

    #[test]
    fn relation_set_iterates_in_key_order() {
        let set: BinaryNodeRelationSet = [
            BinaryNodeRelation::new(NodeId(5), NodeId(9), 0.1).unwrap(),
            BinaryNodeRelation::new(NodeId(1), NodeId(4), 0.1).unwrap(),
            BinaryNodeRelation::new(NodeId(4), NodeId(2), 0.1).unwrap(),
        ]
        .into_iter()
        .collect();
        let keys: Vec<(u64, u64)> = set.iter().map(|r| (r.from().0, r.to().0)).collect();
        assert_eq!(keys, vec![(1, 4), (2, 4), (5, 9)]);
    }

    #[test]
    fn local_map_deserializes_without_cloud_or_parent() {
        let json = r#"{"id":3,"pose":{"translation":{"x":1.0,"y":2.0,"z":0.0},
                       "rotation":{"w":1.0,"x":0.0,"y":0.0,"z":0.0}}}"#;
        let map: LocalMap = serde_json::from_str(json).expect("parse");
        assert_eq!(map.id, NodeId(3));
        assert!(map.cloud.is_empty());
        assert!(map.parent.is_none());
    }
}
