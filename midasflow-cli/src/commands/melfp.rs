//! Melfp command - longest flow paths to outlet points.

use std::path::PathBuf;

use clap::Args;
use midasflow::config::ConfigFile;
use midasflow::ops::{run_melfp, MelfpOptions, DEFAULT_LFP_NAME, DEFAULT_LFP_OUTPUT};
use midasflow::Status;

use super::common::{expand_home, resolve_threads, NetworkArgs, OutletArgs};
use crate::error::CliError;
use crate::runner::CliRunner;

/// Arguments for the melfp command.
#[derive(Debug, Args)]
pub struct MelfpArgs {
    #[command(flatten)]
    pub network: NetworkArgs,

    #[command(flatten)]
    pub outlets: OutletArgs,

    /// Output directory
    #[arg(short, long, default_value = DEFAULT_LFP_OUTPUT)]
    pub output: PathBuf,

    /// Property grouping outlets into objects; one path per object
    #[arg(long)]
    pub oid_col: Option<String>,

    /// Name of the path layer
    #[arg(long, default_value = DEFAULT_LFP_NAME)]
    pub lfp_name: String,

    /// Name of the head point layer; not written when omitted
    #[arg(long)]
    pub heads_name: Option<String>,

    /// CSV of path lengths and head/outlet coordinates
    #[arg(long)]
    pub coords: Option<PathBuf>,

    /// Rebuild full path geometry, not only lengths
    #[arg(long)]
    pub full: bool,
}

impl MelfpArgs {
    /// Engine options with config fallbacks applied.
    pub fn options(&self, config: &ConfigFile) -> MelfpOptions {
        MelfpOptions {
            input_dir: expand_home(self.network.input_dir.clone()),
            dir_opts: self.network.dir_opts.clone(),
            encoding: self.network.encoding.clone(),
            outlets_path: self.outlets.outlets.clone().map(expand_home),
            outlets_layer: self.outlets.outlets_layer.clone(),
            outlets_opts: self.outlets.outlets_opts.clone(),
            id_col: self.outlets.id_col.clone(),
            output_path: Some(expand_home(self.output.clone())),
            oid_col: self.oid_col.clone(),
            lfp_name: Some(self.lfp_name.clone()),
            heads_name: self.heads_name.clone(),
            coors_path: self.coords.clone().map(expand_home),
            find_full: self.full,
            use_lessmem: self.network.lessmem,
            save_outlets: self.outlets.save_outlets,
            num_threads: resolve_threads(self.network.threads, config),
            tracing_stack_size: self.outlets.stack_size,
        }
    }
}

/// Run the melfp command.
pub fn run(args: MelfpArgs) -> Result<Status, CliError> {
    let runner = CliRunner::new()?;
    runner.log_startup("melfp");
    let options = args.options(runner.config());
    let engine = runner.engine()?;

    println!("MIDASFlow Longest Flow Path v{}", midasflow::VERSION);
    println!("================================");
    println!("Input:     {}", options.input_dir.display());
    println!(
        "Geometry:  {}",
        if options.find_full {
            "full paths"
        } else {
            "lengths and heads only"
        }
    );

    Ok(runner.complete(
        "melfp",
        run_melfp(&options, &engine),
        args.network.report.as_deref(),
    ))
}
