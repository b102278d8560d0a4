//! Arguments and helpers shared across the operation commands.

use std::path::{Component, PathBuf};

use clap::Args;
use midasflow::config::ConfigFile;

/// Input network arguments.
#[derive(Debug, Args)]
pub struct NetworkArgs {
    /// Input dataset directory
    pub input_dir: PathBuf,

    /// Directory-read options (e.g. nodata=255,weights=../wts,layer=fdr)
    #[arg(long)]
    pub dir_opts: Option<String>,

    /// Flow direction encoding: power2, taudem, 45degccw, degccw or eight
    /// comma-separated codes E,SE,S,SW,W,NW,N,NE
    #[arg(long)]
    pub encoding: Option<String>,

    /// Page grid tiles through a bounded cache instead of loading them all
    #[arg(long)]
    pub lessmem: bool,

    /// Worker threads, 0 for all logical CPUs (default from config.ini)
    #[arg(short = 't', long)]
    pub threads: Option<usize>,

    /// Write the run report as JSON to this file
    #[arg(long)]
    pub report: Option<PathBuf>,
}

/// Outlet layer arguments.
#[derive(Debug, Args)]
pub struct OutletArgs {
    /// Outlets GeoJSON file or directory (default: the input directory)
    #[arg(long)]
    pub outlets: Option<PathBuf>,

    /// Outlets layer name
    #[arg(long)]
    pub outlets_layer: Option<String>,

    /// Outlet read options (e.g. snap=30,x=lon,y=lat)
    #[arg(long)]
    pub outlets_opts: Option<String>,

    /// Property holding the outlet id (default: feature order)
    #[arg(long)]
    pub id_col: Option<String>,

    /// Also write the snapped outlets to the output directory
    #[arg(long)]
    pub save_outlets: bool,

    /// Trace stack capacity per task (default from config.ini)
    #[arg(long)]
    pub stack_size: Option<usize>,
}

/// Resolve the worker thread count from CLI args and config.
pub fn resolve_threads(cli_threads: Option<usize>, config: &ConfigFile) -> usize {
    cli_threads.unwrap_or(config.engine.num_threads)
}

/// Resolve output compression from CLI args and config.
///
/// The flag can only switch compression on.
pub fn resolve_compress(cli_compress: bool, config: &ConfigFile) -> bool {
    cli_compress || config.output.compress
}

/// Expands a leading `~` to the home directory.
pub fn expand_home(path: PathBuf) -> PathBuf {
    let mut components = path.components();
    match components.next() {
        Some(Component::Normal(first)) if first == "~" => match dirs::home_dir() {
            Some(home) => home.join(components.as_path()),
            None => path,
        },
        _ => path,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_overrides_config() {
        let mut config = ConfigFile::default();
        config.engine.num_threads = 6;
        assert_eq!(resolve_threads(None, &config), 6);
        assert_eq!(resolve_threads(Some(2), &config), 2);

        assert!(!resolve_compress(false, &config));
        config.output.compress = true;
        assert!(resolve_compress(false, &config));
    }

    #[test]
    fn test_expand_home() {
        assert_eq!(expand_home(PathBuf::from("data/fdr")), PathBuf::from("data/fdr"));
        assert_eq!(expand_home(PathBuf::from("/abs/~")), PathBuf::from("/abs/~"));
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_home(PathBuf::from("~/fdr")), home.join("fdr"));
        }
    }
}
