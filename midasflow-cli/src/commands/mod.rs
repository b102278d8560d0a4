//! CLI subcommands.

pub mod common;
pub mod config;
pub mod mefa;
pub mod melfp;
pub mod meshed;

use midasflow::ops::{AccumulationReport, LongestFlowPathReport, MeshReport};
use serde::Serialize;

/// A run report the CLI logs, prints and optionally saves.
pub trait RunReport: Serialize {
    fn log(&self);

    /// Short human-readable summary on stdout.
    fn print_summary(&self);
}

impl RunReport for AccumulationReport {
    fn log(&self) {
        AccumulationReport::log(self);
    }

    fn print_summary(&self) {
        println!();
        println!("Flow accumulation complete");
        println!("  Network:    {} ({} nodes)", self.network, self.nodes);
        println!("  Headwaters: {}", self.headwaters);
        if self.orphans > 0 {
            println!("  Orphans:    {}", self.orphans);
        }
        if let Some(max) = self.max_accumulation {
            println!("  Maximum:    {}", max);
        }
        print_outputs(&self.outputs, self.elapsed_ms);
    }
}

impl RunReport for MeshReport {
    fn log(&self) {
        MeshReport::log(self);
    }

    fn print_summary(&self) {
        println!();
        println!("Basin mesh complete");
        println!("  Network:    {} ({} nodes)", self.network, self.nodes);
        println!(
            "  Basins:     {} from {} outlets ({} roots)",
            self.basins, self.outlets_read, self.roots
        );
        if self.unassigned > 0 {
            println!("  Unassigned: {} nodes", self.unassigned);
        }
        print_outputs(&self.outputs, self.elapsed_ms);
    }
}

impl RunReport for LongestFlowPathReport {
    fn log(&self) {
        LongestFlowPathReport::log(self);
    }

    fn print_summary(&self) {
        println!();
        println!("Longest flow paths complete");
        println!("  Network:    {} ({} nodes)", self.network, self.nodes);
        println!("  Paths:      {} ({} flagged)", self.paths, self.flagged);
        if let Some(max) = self.max_length {
            println!("  Longest:    {:.3}", max);
        }
        print_outputs(&self.outputs, self.elapsed_ms);
    }
}

fn print_outputs(outputs: &[std::path::PathBuf], elapsed_ms: u64) {
    for output in outputs {
        println!("  Output:     {}", output.display());
    }
    println!("  Elapsed:    {:.2}s", elapsed_ms as f64 / 1000.0);
}
