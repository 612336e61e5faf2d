//! JSON-lines container for input and output records.
//!
//! Every line is one JSON object.  Records are told apart by their `"type"`
//! field:
//!
//! | `"type"` | Direction | Payload |
//! |---|---|---|
//! | `local_map` | in | a [`LocalMap`] |
//! | `run_header` | out | the [`RunReport`] of the run, first line of the file |
//! | `map_node` | out | a [`LocalMapWithTraversability`][mapbuilder_types::LocalMapWithTraversability] |
//! | `relation` | out | a [`BinaryNodeRelation`][mapbuilder_types::BinaryNodeRelation] |
//! | anything else | in → out | copied verbatim |
//!
//! Blank lines are ignored.  A numeric `"id"` on a copied record is
//! reported as reserved so that new nodes never reuse it.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use mapbuilder_runtime::{RecordSink, RecordSource, RunReport};
use mapbuilder_types::{
    InputRecord, LocalMap, MapBuilderError, NodeId, OpaqueRecord, OutputRecord,
};
use serde::Serialize;
use serde_json::Value;

pub const LOCAL_MAP_TAG: &str = "local_map";
pub const RUN_HEADER_TAG: &str = "run_header";
pub const MAP_NODE_TAG: &str = "map_node";
pub const RELATION_TAG: &str = "relation";

/// `<dir>/<stem>_filtered.jsonl` next to the input file.
pub fn default_output_path(input: &Path) -> PathBuf {
    let mut name = input
        .file_stem()
        .map(|s| s.to_os_string())
        .unwrap_or_else(|| "output".into());
    name.push("_filtered.jsonl");
    input.with_file_name(name)
}

// ─────────────────────────────────────────────────────────────────────────────
// Reading
// ─────────────────────────────────────────────────────────────────────────────

/// Reads [`InputRecord`]s from a JSON-lines stream.
pub struct JsonLinesSource<R> {
    reader: R,
    line_no: usize,
    buf: String,
    /// Largest `"id"` seen on a pass-through line.
    max_foreign_id: Option<NodeId>,
}

impl JsonLinesSource<BufReader<File>> {
    pub fn open(path: &Path) -> Result<Self, MapBuilderError> {
        let file = File::open(path)
            .map_err(|e| MapBuilderError::Io(format!("cannot open {}: {e}", path.display())))?;
        Ok(Self::from_reader(BufReader::new(file)))
    }
}

impl<R: BufRead> JsonLinesSource<R> {
    pub fn from_reader(reader: R) -> Self {
        Self {
            reader,
            line_no: 0,
            buf: String::new(),
            max_foreign_id: None,
        }
    }
}

impl<R: BufRead> RecordSource for JsonLinesSource<R> {
    fn next_record(&mut self) -> Result<Option<InputRecord>, MapBuilderError> {
        loop {
            self.buf.clear();
            if self.reader.read_line(&mut self.buf)? == 0 {
                return Ok(None);
            }
            self.line_no += 1;
            let line = self.buf.trim();
            if line.is_empty() {
                continue;
            }
            let record = parse_line(line)
                .map_err(|e| MapBuilderError::Format(format!("line {}: {e}", self.line_no)))?;
            if let InputRecord::Other(o) = &record {
                if let Some(id) = o.body.get("id").and_then(Value::as_u64) {
                    self.max_foreign_id = self.max_foreign_id.max(Some(NodeId(id)));
                }
            }
            return Ok(Some(record));
        }
    }

    fn reserved_ids(&self) -> Vec<NodeId> {
        self.max_foreign_id.into_iter().collect()
    }
}

fn parse_line(line: &str) -> Result<InputRecord, serde_json::Error> {
    let value: Value = serde_json::from_str(line)?;
    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    if kind == LOCAL_MAP_TAG {
        let map: LocalMap = serde_json::from_value(value)?;
        return Ok(InputRecord::LocalMap(map));
    }
    Ok(InputRecord::Other(OpaqueRecord { kind, body: value }))
}

// ─────────────────────────────────────────────────────────────────────────────
// Writing
// ─────────────────────────────────────────────────────────────────────────────

/// Writes [`OutputRecord`]s as JSON lines.
pub struct JsonLinesSink<W: Write> {
    out: W,
}

impl JsonLinesSink<BufWriter<File>> {
    /// Create (or truncate) the file at `path`.
    pub fn create(path: &Path) -> Result<Self, MapBuilderError> {
        let file = File::create(path)
            .map_err(|e| MapBuilderError::Io(format!("cannot create {}: {e}", path.display())))?;
        Ok(Self::new(BufWriter::new(file)))
    }
}

impl<W: Write> JsonLinesSink<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    /// Write the run header; call once, before any record.
    pub fn write_header(&mut self, report: &RunReport) -> Result<(), MapBuilderError> {
        let value = tagged(RUN_HEADER_TAG, report)?;
        self.write_value(&value)
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn write_value(&mut self, value: &Value) -> Result<(), MapBuilderError> {
        serde_json::to_writer(&mut self.out, value)?;
        self.out.write_all(b"\n")?;
        Ok(())
    }
}

impl<W: Write> RecordSink for JsonLinesSink<W> {
    fn write_record(&mut self, record: &OutputRecord) -> Result<(), MapBuilderError> {
        let value = match record {
            OutputRecord::Node(node) => tagged(MAP_NODE_TAG, node)?,
            OutputRecord::Relation(rel) => tagged(RELATION_TAG, rel)?,
            OutputRecord::Other(opaque) => opaque.body.clone(),
        };
        self.write_value(&value)
    }

    fn finish(&mut self) -> Result<(), MapBuilderError> {
        self.out.flush()?;
        Ok(())
    }
}

/// Serialize `payload` and add a `"type"` field to it.
fn tagged<T: Serialize>(kind: &str, payload: &T) -> Result<Value, MapBuilderError> {
    let mut value = serde_json::to_value(payload)?;
    match value {
        Value::Object(ref mut fields) => {
            fields.insert("type".to_string(), Value::String(kind.to_string()));
            Ok(value)
        }
        _ => Err(MapBuilderError::Format(format!(
            "{kind} record does not serialize to a JSON object"
        ))),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
