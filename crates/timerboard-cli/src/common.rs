//! Shared setup for the subcommands.

use std::path::Path;
use std::sync::Arc;

use timerboard_core::{
    Config, ConsoleMessenger, CoreError, DiscordMessenger, LocationGraph, Messenger,
    ReconciliationEngine, SqliteSnapshotStore, StorageError,
};

pub type CliResult = Result<(), Box<dyn std::error::Error>>;

/// Load the config from `path`, or from the data directory.
pub fn load_config(path: Option<&Path>) -> Result<Config, CoreError> {
    let config = match path {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    Ok(config)
}

/// The jump graph, or an empty one when no universe table is configured.
pub fn load_graph(config: &Config) -> Result<Arc<LocationGraph>, CoreError> {
    match config.universe_path() {
        Some(path) => Ok(Arc::new(LocationGraph::load(&path)?)),
        None => {
            tracing::warn!("no universe_path configured, distances will be unknown");
            Ok(Arc::new(LocationGraph::empty()))
        }
    }
}

/// Discord when a token is available, otherwise the board goes to stderr.
pub fn one_shot_messenger(config: &Config) -> Arc<dyn Messenger> {
    match DiscordMessenger::from_config(&config.discord) {
        Ok(discord) => Arc::new(discord),
        Err(err) => {
            tracing::debug!(error = %err, "Discord not configured, printing board to stderr");
            Arc::new(ConsoleMessenger::new(std::io::stderr()))
        }
    }
}

/// Who the engine shares the snapshot database with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbAccess {
    /// One command, then exit. Refused while a bot holds the file.
    OneShot,
    /// The long-running bot; locks the file until it exits.
    Exclusive,
}

pub fn open_engine(
    config: Config,
    messenger: Arc<dyn Messenger>,
    access: DbAccess,
) -> Result<ReconciliationEngine, Box<dyn std::error::Error>> {
    let graph = load_graph(&config)?;
    let path = config.database_path();
    let opened = match access {
        DbAccess::OneShot => SqliteSnapshotStore::open(&path),
        DbAccess::Exclusive => SqliteSnapshotStore::open_exclusive(&path),
    };
    let db = match opened {
        Ok(db) => db,
        Err(StorageError::Locked) => {
            return Err(format!(
                "{} is in use by a running `timerboard run`; send the command in chat instead",
                path.display()
            )
            .into())
        }
        Err(err) => return Err(CoreError::from(err).into()),
    };
    Ok(ReconciliationEngine::restore(
        Arc::new(config),
        graph,
        Box::new(db),
        messenger,
    )?)
}

pub fn runtime() -> std::io::Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
}

