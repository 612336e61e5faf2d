//! [`Pipeline`] – the batch driver.
//!
//! One call to [`Pipeline::run`] takes a finite stream of input records to
//! completion:
//!
//! 1. **Partition** – local maps are separated from every other record by
//!    matching on the [`InputRecord`] tag.  Other records are kept aside
//!    untouched.
//! 2. **Cluster** – [`Merger`] computes the bounding box, builds the
//!    quadtree and emits one consolidated node per non-empty leaf.
//! 3. **Link** – [`Linker`] connects consolidated nodes that are close and
//!    overlap enough.
//! 4. **Report** – the nodes, edges, pass-through records and a
//!    [`RunReport`] are returned as a [`PipelineOutput`], ready to be handed
//!    to a [`RecordSink`] and a [`MapViewer`].
//!
//! Structural problems (bad configuration, no local maps) fail the run with
//! no output.  Per-map problems are recovered, logged and listed in the
//! report.
//!
//! # Example
//!
//! ```rust
//! use mapbuilder_runtime::pipeline::{Pipeline, PipelineConfig};
//! use mapbuilder_types::{InputRecord, LocalMap, NodeId, Pose3D, Vec3};
//!
//! let records = (0..4).map(|i| {
//!     let x = if i < 2 { i as f32 * 0.5 } else { 10.0 + (i - 2) as f32 * 0.5 };
//!     InputRecord::LocalMap(LocalMap::new(
//!         NodeId(i),
//!         Pose3D::from_xy(x, 0.0),
//!         vec![Vec3::new(0.01, 0.01, 0.0)],
//!     ))
//! });
//!
//! let output = Pipeline::new(PipelineConfig::default()).unwrap().run(records).unwrap();
//! assert_eq!(output.nodes.len(), 2);
//! assert!(output.edges.is_empty());
//! ```

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use mapbuilder_core::{
    Linker, LinkerConfig, Merger, MergerConfig, StepHeightModel, TraversabilityModel,
};
use mapbuilder_types::{
    BinaryNodeRelationSet, InputRecord, LocalMap, MapBuilderError, MapNodeList, NodeId,
    OpaqueRecord, OutputRecord, PipelineWarning,
};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::collaborators::{MapViewer, RecordSink, RecordSource, ViewerScene};

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Every tunable of a run, accepted verbatim from whatever front-end filled
/// it in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Maximum quadtree depth (0 = a single cluster).
    pub depth: usize,
    /// Margin added around the bounding box of all poses.
    pub range: f32,
    /// Traversability grid resolution, world units per cell.
    pub resolution: f32,
    /// Maximum planar distance between two linked nodes.
    pub distance_threshold: f32,
    /// Minimum overlap ratio between two linked nodes.
    pub connectivity_threshold: f32,
    /// Where the output consumer should write, when overridden.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_path: Option<PathBuf>,
    /// Keep a text rendering of the quadtree in the output.
    #[serde(default)]
    pub show_quadtree: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            depth: 2,
            range: 1.0,
            resolution: 0.025,
            distance_threshold: 5.0,
            connectivity_threshold: 0.01,
            output_path: None,
            show_quadtree: false,
        }
    }
}

impl PipelineConfig {
    pub fn merger_config(&self) -> MergerConfig {
        MergerConfig {
            depth: self.depth,
            resolution: self.resolution,
            range: self.range,
        }
    }

    pub fn linker_config(&self) -> LinkerConfig {
        LinkerConfig {
            distance_threshold: self.distance_threshold,
            connectivity_threshold: self.connectivity_threshold,
            resolution: self.resolution,
        }
    }

    /// Check every parameter before any work starts.
    ///
    /// # Errors
    ///
    /// Returns the first [`MapBuilderError::Config`] found.
    pub fn validate(&self) -> Result<(), MapBuilderError> {
        self.merger_config().validate()?;
        self.linker_config().validate()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Output
// ─────────────────────────────────────────────────────────────────────────────

/// Summary of one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub config: PipelineConfig,
    pub input_maps: usize,
    pub passthrough: usize,
    /// Input maps left out because of degenerate geometry.
    pub skipped: Vec<NodeId>,
    pub nodes: usize,
    pub edges: usize,
    pub warnings: Vec<PipelineWarning>,
}

/// Everything a run produced.
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub nodes: MapNodeList,
    pub edges: BinaryNodeRelationSet,
    /// Non-map input records, in input order, untouched.
    pub passthrough: Vec<OpaqueRecord>,
    /// Quadtree outline, when [`PipelineConfig::show_quadtree`] was set.
    pub quadtree: Option<String>,
    pub report: RunReport,
}

impl PipelineOutput {
    /// All objects to persist: pass-through records, then nodes, then edges.
    pub fn records(&self) -> impl Iterator<Item = OutputRecord> + '_ {
        self.passthrough
            .iter()
            .cloned()
            .map(OutputRecord::Other)
            .chain(self.nodes.iter().cloned().map(OutputRecord::Node))
            .chain(self.edges.iter().cloned().map(OutputRecord::Relation))
    }

    /// Nodes and edges for the viewer.
    pub fn scene(&self) -> ViewerScene<'_> {
        ViewerScene::new(&self.nodes, &self.edges)
    }

    /// Hand every output record to `sink`.  Returns the number of records
    /// written.
    pub fn write_to(&self, sink: &mut dyn RecordSink) -> Result<usize, MapBuilderError> {
        let mut written = 0;
        for record in self.records() {
            sink.write_record(&record)?;
            written += 1;
        }
        sink.finish()?;
        info!(objects = written, "output written");
        Ok(written)
    }

    pub fn show(&self, viewer: &mut dyn MapViewer) -> Result<(), MapBuilderError> {
        viewer.show(&self.scene())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Pipeline
// ─────────────────────────────────────────────────────────────────────────────

/// Batch driver for the clustering and linking stages.
pub struct Pipeline {
    config: PipelineConfig,
    model: Box<dyn TraversabilityModel>,
    reserved: Vec<NodeId>,
}

impl Pipeline {
    /// # Errors
    ///
    /// Returns [`MapBuilderError::Config`] when `config` is out of range.
    pub fn new(config: PipelineConfig) -> Result<Self, MapBuilderError> {
        config.validate()?;
        Ok(Self {
            config,
            model: Box::new(StepHeightModel::default()),
            reserved: Vec::new(),
        })
    }

    /// Replace the per-cell traversability model used by the Merger.
    pub fn with_model(mut self, model: Box<dyn TraversabilityModel>) -> Self {
        self.model = model;
        self
    }

    /// Keep new node ids clear of `ids`, which belong to records the
    /// pipeline passes through without reading.
    pub fn with_reserved_ids(mut self, ids: impl IntoIterator<Item = NodeId>) -> Self {
        self.reserved.extend(ids);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Drain `source` and run, honouring the ids it reports as taken.
    pub fn run_source(self, source: &mut dyn RecordSource) -> Result<PipelineOutput, MapBuilderError> {
        let records = source.read_all()?;
        self.with_reserved_ids(source.reserved_ids()).run(records)
    }

    /// Run all stages over `records`.
    ///
    /// # Errors
    ///
    /// - [`MapBuilderError::Input`] when `records` holds no local map with a
    ///   usable pose.
    /// - Any error raised by a stage.
    #[instrument(skip_all, fields(depth = self.config.depth, resolution = self.config.resolution))]
    pub fn run(
        self,
        records: impl IntoIterator<Item = InputRecord>,
    ) -> Result<PipelineOutput, MapBuilderError> {
        let started_at = Utc::now();

        let mut maps: Vec<LocalMap> = Vec::new();
        let mut passthrough: Vec<OpaqueRecord> = Vec::new();
        for record in records {
            match record {
                InputRecord::LocalMap(m) => maps.push(m),
                InputRecord::Other(o) => passthrough.push(o),
            }
        }
        if maps.is_empty() {
            return Err(MapBuilderError::Input(
                "input contains no local maps".to_string(),
            ));
        }

        info!(
            maps = maps.len(),
            passthrough = passthrough.len(),
            depth = self.config.depth,
            resolution = self.config.resolution,
            "running clustering"
        );
        let mut merger = Merger::new(self.config.merger_config())?
            .with_model(self.model)
            .with_reserved_ids(self.reserved);
        merger.compute_bounding_box(&maps)?;
        merger.build_quadtree()?;
        let quadtree = if self.config.show_quadtree {
            Some(merger.visualize_quadtree()?)
        } else {
            None
        };
        let nodes = merger.execute()?;
        let skipped = merger.skipped().to_vec();
        let warnings = merger.take_warnings();

        info!(
            nodes = nodes.len(),
            distance_threshold = self.config.distance_threshold,
            connectivity_threshold = self.config.connectivity_threshold,
            "running connectivity refinement"
        );
        let mut linker = Linker::from_config(self.config.linker_config())?;
        linker.set_input(&nodes);
        let edges = linker.execute()?;

        let report = RunReport {
            run_id: Uuid::new_v4(),
            started_at,
            finished_at: Utc::now(),
            config: self.config.clone(),
            input_maps: maps.len(),
            passthrough: passthrough.len(),
            skipped,
            nodes: nodes.len(),
            edges: edges.len(),
            warnings,
        };
        info!(
            run_id = %report.run_id,
            nodes = report.nodes,
            edges = report.edges,
            skipped = report.skipped.len(),
            warnings = report.warnings.len(),
            "pipeline finished"
        );

        Ok(PipelineOutput {
            nodes,
            edges,
            passthrough,
            quadtree,
            report,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
