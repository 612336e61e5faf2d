//! `mapbuilder-types` – shared data model of the map builder.
//!
//! # Modules
//!
//! - [`geometry`] – poses, vectors and planar bounding boxes.
//! - [`grid`] – [`TraversabilityGrid`][grid::TraversabilityGrid]: the sparse
//!   per-cell traversability raster carried by consolidated nodes.
//! - [`map`] – raw [`LocalMap`][map::LocalMap]s, consolidated
//!   [`LocalMapWithTraversability`][map::LocalMapWithTraversability] nodes and
//!   the [`BinaryNodeRelation`][map::BinaryNodeRelation]s between them.
//!
//! This root module holds the record envelopes exchanged with the I/O
//! collaborators, the non-fatal [`PipelineWarning`]s and the global
//! [`MapBuilderError`].

pub mod geometry;
pub mod grid;
pub mod map;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use geometry::{Bounds2D, Point2, Pose3D, Quaternion, Vec3};
pub use grid::{CellKey, CellStats, GridCell, TraversabilityGrid};
pub use map::{
    BinaryNodeRelation, BinaryNodeRelationSet, IdAllocator, LocalMap,
    LocalMapWithTraversability, MapNodeList, NodeId, ParentIndex, PointCloud,
};

// ────────────────────────────────────────────────────────────────────────────
// Records
// ────────────────────────────────────────────────────────────────────────────

/// Any object read from the input container that is not a local map.
///
/// The pipeline routes these through untouched; `kind` and `body` are only
/// meaningful to the serialization layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpaqueRecord {
    pub kind: String,
    pub body: serde_json::Value,
}

/// A tagged record produced by an input provider.
#[derive(Debug, Clone, PartialEq)]
pub enum InputRecord {
    LocalMap(LocalMap),
    Other(OpaqueRecord),
}

/// A record handed to an output consumer.
#[derive(Debug, Clone, PartialEq)]
pub enum OutputRecord {
    Node(LocalMapWithTraversability),
    Relation(BinaryNodeRelation),
    Other(OpaqueRecord),
}

// ────────────────────────────────────────────────────────────────────────────
// Warnings
// ────────────────────────────────────────────────────────────────────────────

/// Recoverable anomalies met during a run.  They are logged when raised and
/// collected in the run report; none of them aborts the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "warning", rename_all = "snake_case")]
pub enum PipelineWarning {
    /// A local map with an unusable pose was skipped.
    DegenerateGeometry { map: NodeId, reason: String },
    /// Some points of a local map's cloud were not finite, or too far out to
    /// fall in a grid cell, and were dropped.
    DroppedPoints { map: NodeId, count: usize },
    /// A quadtree leaf ended up without members and produced no node.
    EmptyCluster { depth: usize, bounds: Bounds2D },
    /// A child map's parent chain loops; the map was clustered on its own.
    ParentCycle { map: NodeId },
}

// ────────────────────────────────────────────────────────────────────────────
// Errors
// ────────────────────────────────────────────────────────────────────────────

/// Fatal errors: the run stops and produces no output.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MapBuilderError {
    #[error("Input Error: {0}")]
    Input(String),

    #[error("Config Error: invalid {field}: {reason}")]
    Config { field: String, reason: String },

    #[error("Stage Error: {0}")]
    Stage(String),

    #[error("I/O Error: {0}")]
    Io(String),

    #[error("Format Error: {0}")]
    Format(String),
}

impl MapBuilderError {
    /// Shorthand for a [`MapBuilderError::Config`] error.
    pub fn config(field: &str, reason: impl Into<String>) -> Self {
        Self::Config {
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<std::io::Error> for MapBuilderError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

impl From<serde_json::Error> for MapBuilderError {
    fn from(e: serde_json::Error) -> Self {
        Self::Format(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn warning_serializes_with_tag() {
        let w = PipelineWarning::DegenerateGeometry {
            map: NodeId(4),
            reason: "NaN translation".to_string(),
        };
        let json = serde_json::to_string(&w).unwrap();
        assert!(json.contains("\"warning\":\"degenerate_geometry\""));
        let back: PipelineWarning = serde_json::from_str(&json).unwrap();
        assert_eq!(back, w);
    }

    #[test]
    fn error_display() {
        let err = MapBuilderError::config("resolution", "must be positive, got 0");
        assert_eq!(
            err.to_string(),
            "Config Error: invalid resolution: must be positive, got 0"
        );
        let err2 = MapBuilderError::Input("no local maps".to_string());
        assert!(err2.to_string().contains("Input Error"));
    }

    #[test]
    fn io_error_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing.jsonl");
        let err: MapBuilderError = io.into();
        assert!(matches!(err, MapBuilderError::Io(ref m) if m.contains("missing.jsonl")));
    }
}
