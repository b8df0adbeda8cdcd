use std::path::{Path, PathBuf};

use clap::Subcommand;
use timerboard_core::Config;

use crate::common::CliResult;

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Get a config value
    Get {
        /// Config key (e.g. "check_interval_seconds", "channels.timerboard")
        key: String,
    },
    /// Set a config value
    Set {
        /// Config key
        key: String,
        /// New value
        value: String,
    },
    /// List all config values
    List,
    /// Print the config file location
    Path,
    /// Reset config to defaults
    Reset,
}

pub(crate) fn config_file(path: Option<&Path>) -> Result<PathBuf, timerboard_core::ConfigError> {
    match path {
        Some(path) => Ok(path.to_path_buf()),
        None => Config::default_path(),
    }
}

pub fn run(config_path: Option<&Path>, action: ConfigAction) -> CliResult {
    let path = config_file(config_path)?;
    match action {
        ConfigAction::Get { key } => {
            let config = Config::load_from(&path)?;
            match config.get(&key) {
                Some(value) => println!("{value}"),
                None => return Err(format!("unknown key: {key}").into()),
            }
        }
        ConfigAction::Set { key, value } => {
            let mut config = Config::load_from(&path)?;
            config.set(&key, &value)?;
            config.save_to(&path)?;
            println!("ok");
        }
        ConfigAction::List => {
            let config = Config::load_from(&path)?;
            let json = serde_json::to_string_pretty(&config)?;
            println!("{json}");
        }
        ConfigAction::Path => println!("{}", path.display()),
        ConfigAction::Reset => {
            Config::default().save_to(&path)?;
            println!("config reset to defaults");
        }
    }
    Ok(())
}
