//! `mapbuilder-core` – clustering and connectivity inference.
//!
//! Turns a batch of raw local maps into consolidated, traversability-annotated
//! nodes and the connectivity graph between them.
//!
//! # Modules
//!
//! - [`quadtree`] – [`Quadtree`][quadtree::Quadtree]: depth-bounded planar
//!   index that buckets local maps into leaf cells.
//! - [`traversability`] – [`TraversabilityModel`][traversability::TraversabilityModel]:
//!   the pluggable per-cell estimator, and the accumulation of clouds into a
//!   sparse grid.
//! - [`merger`] – [`Merger`][merger::Merger]: bounding box, quadtree and one
//!   consolidated node per non-empty leaf.
//! - [`linker`] – [`Linker`][linker::Linker]: distance-pruned pairwise overlap
//!   test producing the relation set.

pub mod linker;
pub mod merger;
pub mod quadtree;
pub mod traversability;

pub use linker::{Linker, LinkerConfig};
pub use merger::{Merger, MergerConfig};
pub use quadtree::{MAX_QUADTREE_DEPTH, QuadLeaf, Quadtree};
pub use traversability::{StepHeightModel, TraversabilityModel};
