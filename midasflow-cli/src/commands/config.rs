//! `midasflow config`: read and edit `config.ini`.
//!
//! Keys are addressed as `section.key`; `midasflow config list` prints every
//! key with its current value.

use clap::Subcommand;
use midasflow::config::{config_file_path, ConfigFile, ConfigKey};

use crate::error::CliError;

/// Config subcommands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommands {
    /// Print the value of one key
    Get {
        /// Key as section.key, e.g. engine.num_threads
        key: String,
    },

    /// Change one key and save the file
    Set {
        /// Key as section.key, e.g. lessmem.max_local_tiles
        key: String,

        /// New value
        value: String,
    },

    /// Print every key with its value
    List,

    /// Print where the configuration file lives
    Path,
}

/// Run a config subcommand.
pub fn run(command: ConfigCommands) -> Result<(), CliError> {
    match command {
        ConfigCommands::Get { key } => {
            let key = parse_key(&key)?;
            println!("{}", key.display_value(&ConfigFile::load()?));
        }
        ConfigCommands::Set { key, value } => {
            let key = parse_key(&key)?;
            let mut config = ConfigFile::load()?;
            key.set(&mut config, &value)?;
            config.save()?;
            println!("{} = {}", key.name(), key.display_value(&config));
        }
        ConfigCommands::List => print!("{}", listing(&ConfigFile::load()?)),
        ConfigCommands::Path => println!("{}", config_file_path().display()),
    }
    Ok(())
}

fn parse_key(key: &str) -> Result<ConfigKey, CliError> {
    key.parse().map_err(|_| {
        CliError::Config(format!(
            "Unknown configuration key '{}'. Use 'midasflow config list' to see available keys.",
            key
        ))
    })
}

/// INI-style listing with each key's description as a trailing comment.
fn listing(config: &ConfigFile) -> String {
    let mut out = format!("# {}\n", config_file_path().display());
    for (section, keys) in ConfigKey::by_section() {
        out.push_str(&format!("\n[{}]\n", section));
        for key in keys {
            out.push_str(&format!(
                "{:<20} = {:<12} # {}\n",
                key.key_name(),
                key.display_value(config),
                key.help()
            ));
        }
    }
    out
}
