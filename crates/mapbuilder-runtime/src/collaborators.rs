//! Contracts with the collaborators around the pipeline.
//!
//! The pipeline never reads or writes files and never draws anything.  It
//! talks to the outside world through three traits:
//!
//! - [`RecordSource`] – the input provider.  Yields tagged
//!   [`InputRecord`]s; anything that is not a local map arrives as
//!   [`InputRecord::Other`] and is routed through untouched.
//! - [`RecordSink`] – the output consumer.  Receives nodes, relations and
//!   pass-through records as an unordered bag.
//! - [`MapViewer`] – the visualization consumer.  Receives a
//!   [`ViewerScene`] holding only consolidated nodes and the edges between
//!   them.
//!
//! In-memory implementations ([`VecSource`], [`VecSink`]) are provided for
//! tests and embedding.

use std::collections::VecDeque;

use mapbuilder_types::{
    BinaryNodeRelation, BinaryNodeRelationSet, InputRecord, LocalMapWithTraversability,
    MapBuilderError, MapNodeList, NodeId, OutputRecord,
};

// ─────────────────────────────────────────────────────────────────────────────
// Input
// ─────────────────────────────────────────────────────────────────────────────

/// Input provider.
pub trait RecordSource {
    /// Return the next record, or `Ok(None)` once the input is exhausted.
    fn next_record(&mut self) -> Result<Option<InputRecord>, MapBuilderError>;

    /// Drain the source.
    fn read_all(&mut self) -> Result<Vec<InputRecord>, MapBuilderError> {
        let mut out = Vec::new();
        while let Some(r) = self.next_record()? {
            out.push(r);
        }
        Ok(out)
    }

    /// Ids already taken by the records read so far that are not local
    /// maps.  New node ids are allocated clear of them.
    fn reserved_ids(&self) -> Vec<NodeId> {
        Vec::new()
    }
}

/// A [`RecordSource`] over records already in memory.
#[derive(Debug, Default)]
pub struct VecSource {
    records: VecDeque<InputRecord>,
}

impl VecSource {
    pub fn new(records: impl IntoIterator<Item = InputRecord>) -> Self {
        Self {
            records: records.into_iter().collect(),
        }
    }
}

impl RecordSource for VecSource {
    fn next_record(&mut self) -> Result<Option<InputRecord>, MapBuilderError> {
        Ok(self.records.pop_front())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Output
// ─────────────────────────────────────────────────────────────────────────────

/// Output consumer.  It alone decides the on-disk layout.
pub trait RecordSink {
    fn write_record(&mut self, record: &OutputRecord) -> Result<(), MapBuilderError>;

    /// Called once after the last record.
    fn finish(&mut self) -> Result<(), MapBuilderError> {
        Ok(())
    }
}

/// A [`RecordSink`] that keeps everything in memory.
#[derive(Debug, Default)]
pub struct VecSink {
    pub records: Vec<OutputRecord>,
    pub finished: bool,
}

impl RecordSink for VecSink {
    fn write_record(&mut self, record: &OutputRecord) -> Result<(), MapBuilderError> {
        self.records.push(record.clone());
        Ok(())
    }

    fn finish(&mut self) -> Result<(), MapBuilderError> {
        self.finished = true;
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Visualization
// ─────────────────────────────────────────────────────────────────────────────

/// What the viewer gets to see: every consolidated node, and exactly the
/// edges whose two endpoints are among those nodes.
#[derive(Debug, Clone)]
pub struct ViewerScene<'a> {
    pub nodes: Vec<&'a LocalMapWithTraversability>,
    pub edges: Vec<&'a BinaryNodeRelation>,
}

impl<'a> ViewerScene<'a> {
    pub fn new(nodes: &'a MapNodeList, edges: &'a BinaryNodeRelationSet) -> Self {
        let edges = edges
            .iter()
            .filter(|e| nodes.contains(e.from()) && nodes.contains(e.to()))
            .collect();
        Self {
            nodes: nodes.iter().collect(),
            edges,
        }
    }
}

/// Visualization consumer.
pub trait MapViewer {
    fn show(&mut self, scene: &ViewerScene<'_>) -> Result<(), MapBuilderError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use mapbuilder_types::{
        Bounds2D, LocalMap, NodeId, OpaqueRecord, Point2, Pose3D, TraversabilityGrid,
    };

    fn node(id: u64) -> LocalMapWithTraversability {
        LocalMapWithTraversability {
            id: NodeId(id),
            pose: Pose3D::identity(),
            bounds: Bounds2D::from_point(Point2::new(0.0, 0.0)),
            grid: TraversabilityGrid::new(0.1),
            absorbed: Default::default(),
            parent: None,
        }
    }

    #[test]
    fn vec_source_yields_in_order_then_none() {
        let mut src = VecSource::new([
            InputRecord::LocalMap(LocalMap::new(NodeId(1), Pose3D::identity(), vec![])),
            InputRecord::Other(OpaqueRecord {
                kind: "trajectory".to_string(),
                body: serde_json::json!({"len": 3}),
            }),
        ]);
        let all = src.read_all().unwrap();
        assert_eq!(all.len(), 2);
        assert!(matches!(all[0], InputRecord::LocalMap(_)));
        assert!(src.next_record().unwrap().is_none());
    }

    #[test]
    fn scene_drops_edges_to_foreign_nodes() {
        let nodes: MapNodeList = [node(1), node(2)].into_iter().collect();
        let edges: BinaryNodeRelationSet = [
            BinaryNodeRelation::new(NodeId(1), NodeId(2), 0.5).unwrap(),
            BinaryNodeRelation::new(NodeId(2), NodeId(40), 0.5).unwrap(),
        ]
        .into_iter()
        .collect();
        let scene = ViewerScene::new(&nodes, &edges);
        assert_eq!(scene.nodes.len(), 2);
        assert_eq!(scene.edges.len(), 1);
        assert_eq!(scene.edges[0].key(), (NodeId(1), NodeId(2)));
    }

    #[test]
    fn vec_sink_collects_and_finishes() {
        let mut sink = VecSink::default();
        sink.write_record(&OutputRecord::Node(node(3))).unwrap();
        sink.finish().unwrap();
        assert_eq!(sink.records.len(), 1);
        assert!(sink.finished);
    }
}
