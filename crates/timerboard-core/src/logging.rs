//! Tracing subscriber bootstrap.
//!
//! `RUST_LOG` wins over the configured level. When a log file is configured
//! events go there without ANSI colors, otherwise to stderr. Initializing
//! twice is harmless: the second call leaves the first subscriber in place.

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;

use tracing_subscriber::EnvFilter;

use crate::storage::LoggingConfig;

fn normalize_level(level: &str) -> &'static str {
    match level.trim().to_ascii_lowercase().as_str() {
        "trace" => "trace",
        "debug" => "debug",
        "info" => "info",
        "warn" | "warning" => "warn",
        "error" => "error",
        _ => "info",
    }
}

/// Install the global subscriber. Returns `false` if one was already set.
pub fn init(config: &LoggingConfig) -> bool {
    let fallback = normalize_level(&config.level);
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(fallback))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let file = config.file.as_deref().and_then(open_log_file);
    let installed = match file {
        Some(file) => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_ansi(false)
            .with_writer(Mutex::new(file))
            .try_init()
            .is_ok(),
        None => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_writer(std::io::stderr)
            .try_init()
            .is_ok(),
    };

    if installed {
        tracing::info!(level = fallback, file = ?config.file, "logging initialized");
    }
    installed
}

fn open_log_file(path: &Path) -> Option<std::fs::File> {
    if let Some(parent) = path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    match OpenOptions::new().create(true).append(true).open(path) {
        Ok(file) => Some(file),
        Err(err) => {
            eprintln!("warning: cannot open log file {}: {err}", path.display());
            None
        }
    }
}
