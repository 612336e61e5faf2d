//! Headless console viewer.
//!
//! Prints a table of the consolidated nodes followed by the top-level edges
//! (those without a parent).  The traversability column is the share of
//! occupied cells scoring at least [`TRAVERSABLE_THRESHOLD`].

use std::io::Write;

use colored::Colorize;
use mapbuilder_runtime::{MapViewer, ViewerScene};
use mapbuilder_types::MapBuilderError;

pub const TRAVERSABLE_THRESHOLD: f32 = 0.5;

pub struct ConsoleViewer<W: Write> {
    out: W,
}

impl ConsoleViewer<std::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl<W: Write> ConsoleViewer<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> MapViewer for ConsoleViewer<W> {
    fn show(&mut self, scene: &ViewerScene<'_>) -> Result<(), MapBuilderError> {
        let out = &mut self.out;
        writeln!(out)?;
        writeln!(out, "  {} ({})", "Map nodes".bold().cyan(), scene.nodes.len())?;
        writeln!(
            out,
            "  {:>8}  {:>10}  {:>10}  {:>7}  {:>7}  {:>6}",
            "id", "x", "y", "members", "cells", "trav%"
        )?;
        for node in &scene.nodes {
            let cells = node.grid.len();
            let share = if cells == 0 {
                0.0
            } else {
                100.0 * node.grid.traversable_count(TRAVERSABLE_THRESHOLD) as f32 / cells as f32
            };
            writeln!(
                out,
                "  {:>8}  {:>10.3}  {:>10.3}  {:>7}  {:>7}  {:>6.1}",
                node.id.to_string(),
                node.pose.translation.x,
                node.pose.translation.y,
                node.absorbed.len(),
                cells,
                share
            )?;
        }

        let edges: Vec<_> = scene.edges.iter().filter(|e| e.parent.is_none()).collect();
        writeln!(out)?;
        writeln!(out, "  {} ({})", "Edges".bold().cyan(), edges.len())?;
        if edges.is_empty() {
            writeln!(out, "  {}", "none".dimmed())?;
        }
        for edge in edges {
            writeln!(
                out,
                "  {} ↔ {}  weight {:.3}",
                edge.from(),
                edge.to(),
                edge.weight
            )?;
        }
        out.flush()?;
        Ok(())
    }
}
