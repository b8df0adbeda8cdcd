mod config;
pub mod snapshot_db;

pub use config::{ChannelsConfig, Config, DiscordConfig, LoggingConfig};
pub use snapshot_db::{SnapshotStore, SqliteSnapshotStore};

use std::path::PathBuf;

/// Returns the directory holding config, database and logs.
///
/// `TIMERBOARD_HOME` overrides the location outright. Otherwise this is
/// `~/.config/timerboard[-dev]/`, with `TIMERBOARD_ENV=dev` selecting the
/// development directory.
///
/// # Errors
/// Returns an error if creating the directory fails.
pub fn data_dir() -> Result<PathBuf, std::io::Error> {
    let dir = match std::env::var_os("TIMERBOARD_HOME") {
        Some(home) if !home.is_empty() => PathBuf::from(home),
        _ => {
            let base_dir = dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".config");
            let env = std::env::var("TIMERBOARD_ENV").unwrap_or_else(|_| "production".to_string());
            if env == "dev" {
                base_dir.join("timerboard-dev")
            } else {
                base_dir.join("timerboard")
            }
        }
    };

    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}
