//! `mapbuilder-runtime` – batch driver and collaborator contracts.
//!
//! # Modules
//!
//! - [`pipeline`] – [`Pipeline`][pipeline::Pipeline]: runs the Merger and
//!   the Linker over one finite input, routes every non-map record through
//!   untouched and summarises the run in a
//!   [`RunReport`][pipeline::RunReport].
//! - [`collaborators`] – the [`RecordSource`], [`RecordSink`] and
//!   [`MapViewer`] traits the pipeline talks to, plus in-memory
//!   implementations.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]:
//!   initialises the global `tracing` subscriber with an optional OTLP span
//!   exporter.  Set `OTEL_EXPORTER_OTLP_ENDPOINT` to export the stage spans
//!   to any OTLP-compatible collector.

pub mod collaborators;
pub mod pipeline;
pub mod telemetry;

pub use collaborators::{MapViewer, RecordSink, RecordSource, VecSink, VecSource, ViewerScene};
pub use pipeline::{Pipeline, PipelineConfig, PipelineOutput, RunReport};
pub use telemetry::{init_tracing, TracerProviderGuard};
