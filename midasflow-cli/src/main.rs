//! MIDASFlow CLI - Command-line interface
//!
//! Runs the drainage operations of the MIDASFlow library and manages its
//! configuration file. The process exit code is the operation status code:
//!
//! | Code | Meaning |
//! |------|---------|
//! | 0 | success |
//! | 1 | input error |
//! | 2 | structural integrity error |
//! | 3 | resource error |
//! | 4 | internal error |
//! | 5 | cancelled |

mod commands;
mod error;
mod runner;

use clap::{Parser, Subcommand};
use midasflow::Status;

use commands::config::ConfigCommands;
use commands::mefa::MefaArgs;
use commands::melfp::MelfpArgs;
use commands::meshed::MeshedArgs;

#[derive(Debug, Parser)]
#[command(name = "midasflow")]
#[command(version, about = "Drainage network analysis: flow accumulation, basins and longest flow paths")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Compute flow accumulation over a drainage network
    Mefa(MefaArgs),

    /// Delineate hierarchical basins upstream of outlet points
    Meshed(MeshedArgs),

    /// Extract the longest flow path reaching each outlet point
    Melfp(MelfpArgs),

    /// View and change configuration settings
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Mefa(args) => commands::mefa::run(args),
        Commands::Meshed(args) => commands::meshed::run(args),
        Commands::Melfp(args) => commands::melfp::run(args),
        Commands::Config { command } => commands::config::run(command).map(|()| Status::Success),
    };

    let status = match result {
        Ok(status) => status,
        Err(e) => {
            eprintln!("Error: {}", e);
            e.status()
        }
    };
    std::process::exit(status.code());
}
