//! Mefa command - flow accumulation.

use std::path::PathBuf;

use clap::Args;
use midasflow::config::ConfigFile;
use midasflow::ops::{run_mefa, MefaOptions, DEFAULT_ACCUM_PATH};
use midasflow::Status;

use super::common::{expand_home, resolve_compress, resolve_threads, NetworkArgs};
use crate::error::CliError;
use crate::runner::CliRunner;

/// Arguments for the mefa command.
#[derive(Debug, Args)]
pub struct MefaArgs {
    #[command(flatten)]
    pub network: NetworkArgs,

    /// Output accumulation dataset
    #[arg(short, long, default_value = DEFAULT_ACCUM_PATH)]
    pub output: PathBuf,

    /// Gzip the output tiles
    #[arg(long)]
    pub compress: bool,
}

impl MefaArgs {
    /// Engine options with config fallbacks applied.
    pub fn options(&self, config: &ConfigFile) -> MefaOptions {
        MefaOptions {
            input_dir: expand_home(self.network.input_dir.clone()),
            dir_opts: self.network.dir_opts.clone(),
            encoding: self.network.encoding.clone(),
            accum_path: Some(expand_home(self.output.clone())),
            use_lessmem: self.network.lessmem,
            compress_output: resolve_compress(self.compress, config),
            num_threads: resolve_threads(self.network.threads, config),
        }
    }
}

/// Run the mefa command.
pub fn run(args: MefaArgs) -> Result<Status, CliError> {
    let runner = CliRunner::new()?;
    runner.log_startup("mefa");
    let options = args.options(runner.config());
    let engine = runner.engine()?;

    println!("MIDASFlow Flow Accumulation v{}", midasflow::VERSION);
    println!("================================");
    println!("Input:  {}", options.input_dir.display());
    if let Some(output) = &options.accum_path {
        println!("Output: {}", output.display());
    }

    Ok(runner.complete(
        "mefa",
        run_mefa(&options, &engine),
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
        args: MefaArgs,
    }

    #[test]
    fn test_options_from_args() {
        let harness =
            Harness::try_parse_from(["mefa", "fdr", "-o", "fac", "--lessmem", "-t", "3"]).unwrap();
        let options = harness.args.options(&ConfigFile::default());
        assert_eq!(options.input_dir, PathBuf::from("fdr"));
        assert_eq!(options.accum_path, Some(PathBuf::from("fac")));
        assert!(options.use_lessmem);
        assert!(!options.compress_output);
        assert_eq!(options.num_threads, 3);
    }

    #[test]
    fn test_runs_against_a_dataset() {
        let tmp = tempfile::tempdir().unwrap();
        let input = tmp.path().join("net");
        std::fs::create_dir_all(&input).unwrap();
        std::fs::write(input.join("dataset.json"), r#"{"kind":"table"}"#).unwrap();
        std::fs::write(
            input.join("nodes.json"),
            r#"[{"id":1,"down_id":0,"x":0,"y":0},{"id":2,"down_id":1,"x":1,"y":0}]"#,
        )
        .unwrap();
        let out = tmp.path().join("fac");

        let harness = Harness::try_parse_from([
            "mefa",
            input.to_str().unwrap(),
            "--output",
            out.to_str().unwrap(),
            "--compress",
        ])
        .unwrap();
        let options = harness.args.options(&ConfigFile::default());
        let report = run_mefa(&options, &midasflow::config::EngineConfig::new()).unwrap();
        assert_eq!(report.nodes, 2);
        assert_eq!(report.max_accumulation, Some(2.0));
        assert!(out.join("dataset.json").exists());
    }
}
