//! [`Merger`] – clusters co-located local maps into consolidated nodes.
//!
//! The Merger runs in three explicit stages, each of which must follow the
//! previous one:
//!
//! 1. [`Merger::compute_bounding_box`] – validates the input maps, skips
//!    degenerate poses and computes the planar box enclosing every valid pose,
//!    enlarged by `range` on each side.
//! 2. [`Merger::build_quadtree`] – buckets the top-level maps into a quadtree
//!    of at most `depth` levels.
//! 3. [`Merger::execute`] – turns every non-empty leaf into one
//!    [`LocalMapWithTraversability`] and drops the quadtree.
//!
//! # Ownership
//!
//! A map whose `parent` is another valid map of the same input is owned by
//! that parent: it is never bucketed on its own and instead joins the
//! cluster of its top-most ancestor.
//!
//! # Example
//!
//! ```rust
//! use mapbuilder_core::merger::{Merger, MergerConfig};
//! use mapbuilder_types::{LocalMap, NodeId, Pose3D, Vec3};
//!
//! let cloud = vec![Vec3::new(0.0, 0.0, 0.0), Vec3::new(0.1, 0.0, 0.0)];
//! let maps = vec![
//!     LocalMap::new(NodeId(0), Pose3D::from_xy(0.0, 0.0), cloud.clone()),
//!     LocalMap::new(NodeId(1), Pose3D::from_xy(0.5, 0.0), cloud.clone()),
//!     LocalMap::new(NodeId(2), Pose3D::from_xy(10.0, 0.0), cloud.clone()),
//!     LocalMap::new(NodeId(3), Pose3D::from_xy(10.5, 0.0), cloud),
//! ];
//!
//! let mut merger = Merger::new(MergerConfig { depth: 2, resolution: 0.02, range: 1.0 }).unwrap();
//! merger.compute_bounding_box(&maps).unwrap();
//! merger.build_quadtree().unwrap();
//! let nodes = merger.execute().unwrap();
//! assert_eq!(nodes.len(), 2);
//! ```

use std::collections::{BTreeSet, HashMap, HashSet};

use mapbuilder_types::{
    Bounds2D, IdAllocator, LocalMap, LocalMapWithTraversability, MapBuilderError, MapNodeList,
    NodeId, ParentIndex, PipelineWarning, Pose3D, TraversabilityGrid, Vec3,
};
use tracing::{debug, info, instrument, warn};

use crate::quadtree::{MAX_QUADTREE_DEPTH, Quadtree};
use crate::traversability::{self, StepHeightModel, TraversabilityModel};

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Parameters of the clustering stage.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MergerConfig {
    /// Maximum quadtree depth; 0 keeps every map in one cluster.
    pub depth: usize,
    /// Grid resolution in world units per cell.
    pub resolution: f32,
    /// Margin added on every side of the bounding box.
    pub range: f32,
}

impl Default for MergerConfig {
    fn default() -> Self {
        Self {
            depth: 2,
            resolution: 0.025,
            range: 1.0,
        }
    }
}

impl MergerConfig {
    /// Reject out-of-range parameters; nothing is clamped.
    pub fn validate(&self) -> Result<(), MapBuilderError> {
        if self.depth > MAX_QUADTREE_DEPTH {
            return Err(MapBuilderError::config(
                "depth",
                format!("must be at most {MAX_QUADTREE_DEPTH}, got {}", self.depth),
            ));
        }
        if !(self.resolution.is_finite() && self.resolution > 0.0) {
            return Err(MapBuilderError::config(
                "resolution",
                format!("must be a positive number, got {}", self.resolution),
            ));
        }
        if !(self.range.is_finite() && self.range >= 0.0) {
            return Err(MapBuilderError::config(
                "range",
                format!("must be a non-negative number, got {}", self.range),
            ));
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Merger
// ─────────────────────────────────────────────────────────────────────────────

/// Staged clustering of local maps into traversability-annotated nodes.
pub struct Merger<'a> {
    config: MergerConfig,
    model: Box<dyn TraversabilityModel>,
    /// Valid top-level maps, in input order.
    roots: Vec<&'a LocalMap>,
    /// Owned maps grouped under their top-most ancestor, in input order.
    owned: HashMap<NodeId, Vec<&'a LocalMap>>,
    bounds: Option<Bounds2D>,
    tree: Option<Quadtree<'a>>,
    /// Ids already taken outside the local map set.
    reserved: Vec<NodeId>,
    ids: IdAllocator,
    skipped: Vec<NodeId>,
    warnings: Vec<PipelineWarning>,
}

impl<'a> Merger<'a> {
    /// Create a Merger using the default [`StepHeightModel`].
    ///
    /// # Errors
    ///
    /// Returns [`MapBuilderError::Config`] when `config` is out of range.
    pub fn new(config: MergerConfig) -> Result<Self, MapBuilderError> {
        config.validate()?;
        Ok(Self {
            config,
            model: Box::new(StepHeightModel::default()),
            roots: Vec::new(),
            owned: HashMap::new(),
            bounds: None,
            tree: None,
            reserved: Vec::new(),
            ids: IdAllocator::starting_at(0),
            skipped: Vec::new(),
            warnings: Vec::new(),
        })
    }

    /// Replace the per-cell traversability model.
    pub fn with_model(mut self, model: Box<dyn TraversabilityModel>) -> Self {
        self.model = model;
        self
    }

    /// Keep new node ids clear of `ids` as well as of the input map ids.
    pub fn with_reserved_ids(mut self, ids: impl IntoIterator<Item = NodeId>) -> Self {
        self.reserved.extend(ids);
        self
    }

    pub fn config(&self) -> &MergerConfig {
        &self.config
    }

    /// Bounding box computed by the first stage, if it has run.
    pub fn bounds(&self) -> Option<Bounds2D> {
        self.bounds
    }

    /// Ids of the input maps that were skipped because of degenerate poses.
    pub fn skipped(&self) -> &[NodeId] {
        &self.skipped
    }

    /// Non-fatal anomalies recorded so far.
    pub fn warnings(&self) -> &[PipelineWarning] {
        &self.warnings
    }

    /// Drain the recorded warnings.
    pub fn take_warnings(&mut self) -> Vec<PipelineWarning> {
        std::mem::take(&mut self.warnings)
    }

    // ── stage 1 ──────────────────────────────────────────────────────────────

    /// Validate `maps` and compute the enclosing planar box, enlarged by
    /// `range` on each side.
    ///
    /// Maps with a non-finite pose or a zero rotation are skipped with a
    /// [`PipelineWarning::DegenerateGeometry`].
    ///
    /// # Errors
    ///
    /// - [`MapBuilderError::Input`] when `maps` is empty, when no map has a
    ///   usable pose, or when two maps share an id.
    #[instrument(skip_all, fields(maps = maps.len()))]
    pub fn compute_bounding_box(
        &mut self,
        maps: &'a [LocalMap],
    ) -> Result<Bounds2D, MapBuilderError> {
        if maps.is_empty() {
            return Err(MapBuilderError::Input(
                "cannot build a bounding box over an empty local map set".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for m in maps {
            if !seen.insert(m.id) {
                return Err(MapBuilderError::Input(format!(
                    "duplicate local map id {}",
                    m.id
                )));
            }
        }

        self.roots.clear();
        self.owned.clear();
        self.skipped.clear();
        self.tree = None;

        let mut valid = Vec::with_capacity(maps.len());
        for m in maps {
            if m.pose.is_valid() {
                valid.push(m);
            } else {
                let reason = degenerate_reason(&m.pose);
                warn!(map = %m.id, %reason, "skipping local map with degenerate pose");
                self.skipped.push(m.id);
                self.warnings.push(PipelineWarning::DegenerateGeometry {
                    map: m.id,
                    reason,
                });
            }
        }

        let Some(first) = valid.first() else {
            return Err(MapBuilderError::Input(
                "no local map has a usable pose".to_string(),
            ));
        };

        let parents = ParentIndex::from_pairs(valid.iter().map(|m| (m.id, m.parent)));
        let mut bounds = Bounds2D::from_point(first.pose.planar());
        for &m in &valid {
            bounds.include(m.pose.planar());
            match parents.root_of(m.id) {
                Some(root) if root == m.id => self.roots.push(m),
                Some(root) => self.owned.entry(root).or_default().push(m),
                None => {
                    warn!(map = %m.id, "parent chain loops; clustering map on its own");
                    self.warnings.push(PipelineWarning::ParentCycle { map: m.id });
                    self.roots.push(m);
                }
            }
        }
        let bounds = bounds.expanded(self.config.range);

        self.ids = IdAllocator::after(maps.iter().map(|m| &m.id).chain(&self.reserved));
        self.bounds = Some(bounds);
        info!(
            valid = valid.len(),
            top_level = self.roots.len(),
            skipped = self.skipped.len(),
            min_x = bounds.min.x,
            min_y = bounds.min.y,
            max_x = bounds.max.x,
            max_y = bounds.max.y,
            "bounding box computed"
        );
        Ok(bounds)
    }

    // ── stage 2 ──────────────────────────────────────────────────────────────

    /// Bucket the top-level maps into a quadtree over the bounding box.
    ///
    /// # Errors
    ///
    /// Returns [`MapBuilderError::Stage`] when called before
    /// [`compute_bounding_box`][Self::compute_bounding_box].
    #[instrument(skip_all, fields(depth = self.config.depth))]
    pub fn build_quadtree(&mut self) -> Result<&Quadtree<'a>, MapBuilderError> {
        let bounds = self.bounds.ok_or_else(|| {
            MapBuilderError::Stage("build_quadtree called before compute_bounding_box".to_string())
        })?;

        let mut tree = Quadtree::new(bounds, self.config.depth);
        for &m in &self.roots {
            if !tree.insert(m) {
                // Only reachable if a pose moved outside its own bounding box.
                warn!(map = %m.id, "local map outside quadtree bounds; skipped");
                self.skipped.push(m.id);
                self.warnings.push(PipelineWarning::DegenerateGeometry {
                    map: m.id,
                    reason: "pose outside the quadtree bounds".to_string(),
                });
            }
        }
        info!(
            maps = tree.len(),
            leaves = tree.leaves().len(),
            height = tree.height(),
            "quadtree built"
        );
        Ok(self.tree.insert(tree))
    }

    /// Text rendering of the current partition, for debugging.
    ///
    /// Read-only: it never changes the clustering.
    ///
    /// # Errors
    ///
    /// Returns [`MapBuilderError::Stage`] when no quadtree has been built.
    pub fn visualize_quadtree(&self) -> Result<String, MapBuilderError> {
        self.tree
            .as_ref()
            .map(Quadtree::describe)
            .ok_or_else(|| MapBuilderError::Stage("no quadtree to visualize".to_string()))
    }

    // ── stage 3 ──────────────────────────────────────────────────────────────

    /// Produce one consolidated node per non-empty quadtree leaf.
    ///
    /// Nodes are emitted in leaf order (depth-first, quadrant order) and get
    /// fresh ids allocated after the largest input or reserved id.  The quadtree is
    /// consumed.
    ///
    /// # Errors
    ///
    /// Returns [`MapBuilderError::Stage`] when called before
    /// [`build_quadtree`][Self::build_quadtree], or a second time.
    #[instrument(skip_all, fields(resolution = self.config.resolution))]
    pub fn execute(&mut self) -> Result<MapNodeList, MapBuilderError> {
        let tree = self.tree.take().ok_or_else(|| {
            MapBuilderError::Stage("execute called before build_quadtree".to_string())
        })?;

        let mut nodes = MapNodeList::new();
        for leaf in tree.leaves() {
            if leaf.maps.is_empty() {
                debug!(depth = leaf.depth, "empty quadtree leaf; no node produced");
                self.warnings.push(PipelineWarning::EmptyCluster {
                    depth: leaf.depth,
                    bounds: leaf.bounds,
                });
                continue;
            }

            let mut members: Vec<&LocalMap> = Vec::new();
            for &m in leaf.maps {
                members.push(m);
                if let Some(children) = self.owned.get(&m.id) {
                    members.extend(children.iter().copied());
                }
            }

            let node = self.consolidate(&members);
            debug!(
                node = %node.id,
                members = node.absorbed.len(),
                cells = node.grid.len(),
                "cluster consolidated"
            );
            nodes.add_element(node);
        }

        info!(nodes = nodes.len(), "clustering finished");
        Ok(nodes)
    }

    /// Merge `members` (never empty) into one node.
    fn consolidate(&mut self, members: &[&LocalMap]) -> LocalMapWithTraversability {
        let pose = aggregate_pose(members);

        let mut grid = TraversabilityGrid::new(self.config.resolution);
        for &m in members {
            let dropped = traversability::accumulate(&mut grid, m);
            if dropped > 0 {
                warn!(map = %m.id, dropped, "dropped unusable cloud points");
                self.warnings.push(PipelineWarning::DroppedPoints {
                    map: m.id,
                    count: dropped,
                });
            }
        }
        traversability::annotate(&mut grid, self.model.as_ref());

        let bounds = grid.bounds().unwrap_or_else(|| {
            let mut b = Bounds2D::from_point(members[0].pose.planar());
            for m in members {
                b.include(m.pose.planar());
            }
            b
        });

        LocalMapWithTraversability {
            id: self.ids.allocate(),
            pose,
            bounds,
            grid,
            absorbed: members.iter().map(|m| m.id).collect::<BTreeSet<_>>(),
            parent: None,
        }
    }
}

/// Centroid of the member translations, oriented like the first member.
///
/// Summed in `f64`: the mean of finite `f32` values is always finite, their
/// `f32` sum is not.
fn aggregate_pose(members: &[&LocalMap]) -> Pose3D {
    let (x, y, z) = members.iter().fold((0.0_f64, 0.0_f64, 0.0_f64), |(x, y, z), m| {
        let t = m.pose.translation;
        (x + f64::from(t.x), y + f64::from(t.y), z + f64::from(t.z))
    });
    let n = members.len() as f64;
    let centroid = Vec3::new((x / n) as f32, (y / n) as f32, (z / n) as f32);
    Pose3D::new(centroid, members[0].pose.rotation)
}

fn degenerate_reason(pose: &Pose3D) -> String {
    if !pose.translation.is_finite() {
        "non-finite translation".to_string()
    } else {
        "non-finite or zero rotation".to_string()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
