//! Universe table maintenance.
//!
//! `universe fetch` downloads the map from ESI and writes the JSON table the
//! bot loads for jump distances. When no `universe_path` is configured yet,
//! the table lands next to the config file and the config is pointed at it.

use std::path::{Path, PathBuf};

use clap::Subcommand;
use timerboard_core::universe::{DEFAULT_CONCURRENCY, DEFAULT_ESI_BASE};
use timerboard_core::{logging, EsiClient, LocationGraph};

use crate::commands::config::config_file;
use crate::common::{load_config, runtime, CliResult};

const DEFAULT_TABLE_FILE: &str = "universe.json";

#[derive(Subcommand)]
pub enum UniverseAction {
    /// Download systems and stargates from ESI into the universe table
    Fetch {
        /// Where to write the table (defaults to the configured universe_path)
        #[arg(long)]
        output: Option<PathBuf>,
        /// ESI root URL
        #[arg(long, default_value = DEFAULT_ESI_BASE)]
        esi_base: String,
        /// Requests in flight at once
        #[arg(long, default_value_t = DEFAULT_CONCURRENCY)]
        concurrency: usize,
    },
    /// Summarize the configured universe table
    Info,
}

pub fn run(config_path: Option<&Path>, action: UniverseAction) -> CliResult {
    let mut config = load_config(config_path)?;
    logging::init(&config.logging);

    match action {
        UniverseAction::Fetch {
            output,
            esi_base,
            concurrency,
        } => {
            let esi = EsiClient::new(&esi_base, concurrency)?;
            let table = runtime()?.block_on(esi.fetch_table())?;

            let target = match (output, config.universe_path()) {
                (Some(path), _) => path,
                (None, Some(path)) => path,
                (None, None) => {
                    config.universe_path = Some(PathBuf::from(DEFAULT_TABLE_FILE));
                    config.save_to(&config_file(config_path)?)?;
                    config
                        .universe_path()
                        .unwrap_or_else(|| PathBuf::from(DEFAULT_TABLE_FILE))
                }
            };
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&target, serde_json::to_string(&table)?)?;
            tracing::info!(path = %target.display(), systems = table.systems.len(), "universe table written");
            println!("Wrote {} systems to {}", table.systems.len(), target.display());
        }
        UniverseAction::Info => {
            let path = config
                .universe_path()
                .ok_or("no universe_path configured; run `timerboard universe fetch`")?;
            let graph = LocationGraph::load(&path)?;
            println!("{}: {} systems", path.display(), graph.len());
        }
    }
    Ok(())
}
