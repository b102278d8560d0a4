//! MIDASFlow - drainage network analysis at scale
//!
//! This library computes three products over drainage networks that are
//! too large to walk with native recursion:
//!
//! - flow accumulation ([`ops::mefa`])
//! - hierarchical basins anchored at outlet points ([`ops::meshed`])
//! - the longest flow path reaching each outlet ([`ops::melfp`])
//!
//! # Architecture
//!
//! ```text
//!   dataset ──► network ──► { accumulation | mesh | lfp } ──► staged outputs
//!                 │                    │
//!                 │                    └── scheduler (bounded trace stacks
//!                 │                        on a rayon worker pool)
//!                 └── tile cache (less-memory mode)
//! ```
//!
//! # Example
//!
//! ```ignore
//! use midasflow::config::EngineConfig;
//! use midasflow::ops::{run_mefa, MefaOptions};
//!
//! let options = MefaOptions::new("fdr").with_accum_path("fac");
//! let report = run_mefa(&options, &EngineConfig::default())?;
//! println!("{} nodes", report.nodes);
//! ```

pub mod accumulation;
pub mod cache;
pub mod config;
pub mod coord;
pub mod dataset;
pub mod diagnostics;
pub mod encoding;
pub mod error;
pub mod lfp;
pub mod logging;
pub mod mesh;
pub mod network;
pub mod ops;
pub mod outlets;
pub mod scheduler;

pub use error::{MidasError, Result, Status};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
