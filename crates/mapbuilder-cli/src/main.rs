//! `mapbuilder` – offline map builder.
//!
//! Turns a recorded session of local maps into a compact set of navigable
//! maps.  It:
//!
//! 1. Resolves the parameters: built-in defaults, `~/.mapbuilder/config.toml`,
//!    `MAPBUILDER_*` environment variables, then command-line flags.
//! 2. Reads the JSON-lines input, clusters co-located local maps into
//!    traversability-annotated nodes and links nodes that overlap.
//! 3. Writes the run header, the untouched pass-through records, the nodes
//!    and the edges to `<input stem>_filtered.jsonl` (or `-o <path>`).
//! 4. Prints the result in the console viewer unless `--no-view` is given.

mod config;
mod jsonl;
mod viewer;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;
use colored::Colorize;
use mapbuilder_runtime::{MapViewer, Pipeline, PipelineOutput, init_tracing};
use mapbuilder_types::{LocalMap, MapBuilderError};
use tracing::info;

use crate::jsonl::{JsonLinesSink, JsonLinesSource, default_output_path};
use crate::viewer::ConsoleViewer;

/// Offline map builder: converts chunks of trajectory into a set of
/// navigable maps.
#[derive(Parser, Debug)]
#[command(name = "mapbuilder", version, about, long_about = None)]
struct Args {
    /// JSON-lines file holding the local maps (and any other records).
    #[arg(required_unless_present_any = ["print_schema", "save_config"])]
    input: Option<PathBuf>,

    /// Quadtree depth; 0 keeps everything in one cluster [default: 2]
    #[arg(short = 'd', long, allow_negative_numbers = true)]
    depth: Option<i64>,

    /// Margin in meters added around the quadtree bounding box [default: 1]
    #[arg(long, allow_negative_numbers = true)]
    range: Option<f32>,

    /// Traversability grid resolution in meters/cell [default: 0.025]
    #[arg(short = 'r', long, allow_negative_numbers = true)]
    resolution: Option<f32>,

    /// Distance threshold in meters for connecting two maps [default: 5]
    #[arg(long = "dth", allow_negative_numbers = true)]
    distance_threshold: Option<f32>,

    /// Minimum overlap ratio for two maps to be connected [default: 0.01]
    #[arg(long = "cth", allow_negative_numbers = true)]
    connectivity_threshold: Option<f32>,

    /// Output file [default: <input stem>_filtered.jsonl]
    #[arg(short = 'o', long)]
    output: Option<PathBuf>,

    /// Read parameters from this TOML file instead of ~/.mapbuilder/config.toml
    #[arg(long)]
    config: Option<PathBuf>,

    /// Persist the effective parameters to the config file
    #[arg(long)]
    save_config: bool,

    /// Do not hand the result to the console viewer
    #[arg(long)]
    no_view: bool,

    /// Print the quadtree partition before clustering
    #[arg(long)]
    show_quadtree: bool,

    /// Print the JSON schema of a local_map input record and exit
    #[arg(long)]
    print_schema: bool,
}

impl Args {
    /// Command-line flags win over every other source.
    fn apply_to(&self, cfg: &mut config::Config) {
        if let Some(v) = self.depth {
            cfg.depth = v;
        }
        if let Some(v) = self.range {
            cfg.range = v;
        }
        if let Some(v) = self.resolution {
            cfg.resolution = v;
        }
        if let Some(v) = self.distance_threshold {
            cfg.distance_threshold = v;
        }
        if let Some(v) = self.connectivity_threshold {
            cfg.connectivity_threshold = v;
        }
        if self.no_view {
            cfg.view = false;
        }
    }
}

fn main() -> ExitCode {
    let args = Args::parse();

    if args.print_schema {
        return match print_schema() {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => report_error(&e),
        };
    }

    let _guard = init_tracing("mapbuilder");
    print_banner();

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => report_error(&e),
    }
}

fn run(args: &Args) -> Result<(), MapBuilderError> {
    let mut cfg = config::resolve(args.config.as_deref())?;
    args.apply_to(&mut cfg);

    if args.save_config {
        let path = match &args.config {
            Some(p) => {
                config::save_to(&cfg, p)?;
                p.clone()
            }
            None => {
                config::save(&cfg)?;
                config::config_path()
            }
        };
        println!(
            "  {} Parameters saved to {}",
            "✓".green().bold(),
            path.display().to_string().bold()
        );
    }

    let Some(input) = args.input.as_deref() else {
        return Ok(());
    };
    let output_path = args
        .output
        .clone()
        .unwrap_or_else(|| default_output_path(input));
    let pipeline_cfg = cfg.to_pipeline_config(Some(output_path.clone()), args.show_quadtree)?;
    let pipeline = Pipeline::new(pipeline_cfg)?;

    info!(input = %input.display(), output = %output_path.display(), "reading input");
    let mut source = JsonLinesSource::open(input)?;
    let output = pipeline.run_source(&mut source)?;

    if let Some(outline) = &output.quadtree {
        println!("\n  {}", "Quadtree".bold().cyan());
        for line in outline.lines() {
            println!("  {line}");
        }
    }

    let written = write_output(&output, &output_path)?;
    print_summary(&output, written, &output_path);

    if cfg.view {
        ConsoleViewer::stdout().show(&output.scene())?;
    }
    Ok(())
}

fn write_output(output: &PipelineOutput, path: &Path) -> Result<usize, MapBuilderError> {
    let mut sink = JsonLinesSink::create(path)?;
    sink.write_header(&output.report)?;
    output.write_to(&mut sink)
}

fn print_schema() -> Result<(), MapBuilderError> {
    let schema = schemars::schema_for!(LocalMap);
    println!("{}", serde_json::to_string_pretty(&schema)?);
    Ok(())
}

fn report_error(e: &MapBuilderError) -> ExitCode {
    eprintln!("{}: {e}", "error".red().bold());
    ExitCode::FAILURE
}

// ─────────────────────────────────────────────────────────────────────────────
// Console output
// ─────────────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!("  {} {}",
        "mapbuilder".bold().cyan(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Offline map builder: chunks of trajectory in, navigable maps out");
    println!();
}

fn print_summary(output: &PipelineOutput, written: usize, path: &Path) {
    let r = &output.report;
    let cfg = &r.config;
    println!();
    println!(
        "  {} Clustered {} local maps into {} nodes (depth {}, resolution {} m/cell)",
        "✓".green().bold(),
        r.input_maps,
        r.nodes,
        cfg.depth,
        cfg.resolution
    );
    println!(
        "  {} Linked {} node pairs (distance ≤ {} m, overlap ≥ {})",
        "✓".green().bold(),
        r.edges,
        cfg.distance_threshold,
        cfg.connectivity_threshold
    );
    println!(
        "  {} Wrote {} objects to {}",
        "✓".green().bold(),
        written,
        path.display().to_string().bold()
    );
    if !r.skipped.is_empty() || !r.warnings.is_empty() {
        println!(
            "  {} {} maps skipped, {} warnings (see log)",
            "!".yellow().bold(),
            r.skipped.len(),
            r.warnings.len()
        );
    }
}
