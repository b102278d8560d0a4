//! Meshed command - hierarchical basins from outlet points.

use std::path::PathBuf;

use clap::Args;
use midasflow::config::ConfigFile;
use midasflow::ops::{run_meshed, MeshedOptions, DEFAULT_BASINS_OUTPUT};
use midasflow::Status;

use super::common::{expand_home, resolve_compress, resolve_threads, NetworkArgs, OutletArgs};
use crate::error::CliError;
use crate::runner::CliRunner;

/// Arguments for the meshed command.
#[derive(Debug, Args)]
pub struct MeshedArgs {
    #[command(flatten)]
    pub network: NetworkArgs,

    #[command(flatten)]
    pub outlets: OutletArgs,

    /// Output basin directory
    #[arg(short, long, default_value = DEFAULT_BASINS_OUTPUT)]
    pub output: PathBuf,

    /// Hierarchy CSV (default: hierarchy.csv in the output directory)
    #[arg(long)]
    pub hier: Option<PathBuf>,

    /// Gzip the output tiles
    #[arg(long)]
    pub compress: bool,
}

impl MeshedArgs {
    /// Engine options with config fallbacks applied.
    pub fn options(&self, config: &ConfigFile) -> MeshedOptions {
        MeshedOptions {
            input_dir: expand_home(self.network.input_dir.clone()),
            dir_opts: self.network.dir_opts.clone(),
            encoding: self.network.encoding.clone(),
            outlets_path: self.outlets.outlets.clone().map(expand_home),
            outlets_layer: self.outlets.outlets_layer.clone(),
            outlets_opts: self.outlets.outlets_opts.clone(),
            id_col: self.outlets.id_col.clone(),
            output_path: Some(expand_home(self.output.clone())),
            hier_path: self.hier.clone().map(expand_home),
            use_lessmem: self.network.lessmem,
            compress_output: resolve_compress(self.compress, config),
            save_outlets: self.outlets.save_outlets,
            num_threads: resolve_threads(self.network.threads, config),
            tracing_stack_size: self.outlets.stack_size,
        }
    }
}

/// Run the meshed command.
pub fn run(args: MeshedArgs) -> Result<Status, CliError> {
    let runner = CliRunner::new()?;
    runner.log_startup("meshed");
    let options = args.options(runner.config());
    let engine = runner.engine()?;

    println!("MIDASFlow Basin Mesh v{}", midasflow::VERSION);
    println!("=========================");
    println!("Input:   {}", options.input_dir.display());
    println!(
        "Outlets: {}",
        options
            .outlets_path
            .as_ref()
            .unwrap_or(&options.input_dir)
            .display()
    );

    Ok(runner.complete(
        "meshed",
        run_meshed(&options, &engine),
        args.network.report.as_deref(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Harness {
        #[command(flatten)]
        args: MeshedArgs,
    }

    #[test]
    fn test_defaults() {
        let harness = Harness::try_parse_from(["meshed", "fdr"]).unwrap();
        let options = harness.args.options(&ConfigFile::default());
        assert_eq!(options.output_path, Some(PathBuf::from(DEFAULT_BASINS_OUTPUT)));
        assert_eq!(options.outlets_path, None);
        assert_eq!(options.hier_path, None);
        assert_eq!(options.tracing_stack_size, None);
        assert!(!options.save_outlets);
    }

    #[test]
    fn test_outlet_arguments() {
        let harness = Harness::try_parse_from([
            "meshed",
            "fdr",
            "--outlets",
            "gauges.geojson",
            "--outlets-opts",
            "snap=30",
            "--id-col",
            "gauge",
            "--hier",
            "tree.csv",
            "--save-outlets",
            "--stack-size",
            "64",
        ])
        .unwrap();
        let options = harness.args.options(&ConfigFile::default());
        assert_eq!(options.outlets_path, Some(PathBuf::from("gauges.geojson")));
        assert_eq!(options.outlets_opts.as_deref(), Some("snap=30"));
        assert_eq!(options.id_col.as_deref(), Some("gauge"));
        assert_eq!(options.hier_path, Some(PathBuf::from("tree.csv")));
        assert!(options.save_outlets);
        assert_eq!(options.tracing_stack_size, Some(64));
    }
}
