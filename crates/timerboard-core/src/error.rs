//! Core error types for timerboard-core.
//!
//! Parse and store errors are expected outcomes of user commands and are
//! reported back to whoever issued the command. Storage and delivery errors
//! are transient: the engine logs them and retries on the next tick.
//! Only configuration errors are fatal, and only at startup.

use std::path::PathBuf;
use thiserror::Error;

use crate::timer::{TimerId, TimerState};

/// Core error type for timerboard-core.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Snapshot persistence errors
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Messaging collaborator failures
    #[error("Delivery error: {0}")]
    Delivery(#[from] DeliveryError),

    /// Timer command text could not be parsed
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    /// Timer collection errors
    #[error("{0}")]
    Store(#[from] StoreError),

    /// Universe table could not be loaded
    #[error("Universe error: {0}")]
    Universe(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Rejections produced by the timer parser.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// The date/time tokens have the right position but an invalid shape or value.
    #[error("bad timestamp '{input}': expected YYYY-MM-DD HH:MM:SS or YYYY.MM.DD HH:MM:SS")]
    BadTimestamp { input: String },

    /// Neither accepted grammar matches the token sequence.
    #[error(
        "unrecognized format: use 'YYYY-MM-DD HH:MM:SS <system> - <structure> [tags]' \
         or '<system> <structure> Reinforced until YYYY.MM.DD HH:MM:SS [tags]'"
    )]
    UnrecognizedFormat,

    /// `sov` arguments are missing or out of order.
    #[error("usage: sov YYYY.MM.DD HH:MM <system> <owner> <adm>")]
    SovUsage,

    /// `sov` timestamp has the wrong shape or an impossible value.
    #[error("bad timestamp '{input}': expected YYYY.MM.DD HH:MM")]
    BadSovTimestamp { input: String },

    /// Activity defense multiplier outside 1..=6.
    #[error("ADM must be a number between 1 and 6, got '{input}'")]
    BadAdm { input: String },
}

/// Timer collection errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// No live timer carries this id
    #[error("No timer found with ID {0}")]
    NotFound(TimerId),

    /// Timer states only move forward
    #[error("Timer {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: TimerId,
        from: TimerState,
        to: TimerState,
    },
}

/// Configuration-specific errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to load configuration
    #[error("Failed to load configuration from {path}: {message}")]
    LoadFailed { path: PathBuf, message: String },

    /// Failed to save configuration
    #[error("Failed to save configuration to {path}: {message}")]
    SaveFailed { path: PathBuf, message: String },

    /// Invalid configuration value
    #[error("Invalid configuration value for '{key}': {message}")]
    InvalidValue { key: String, message: String },

    /// Missing required configuration key
    #[error("Missing required configuration key: {0}")]
    MissingKey(String),

    /// Failed to parse configuration
    #[error("Failed to parse configuration: {0}")]
    ParseFailed(String),
}

/// Snapshot persistence errors.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Failed to open database connection
    #[error("Failed to open database at {path}: {source}")]
    OpenFailed {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    /// Query execution failed
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Another connection (usually a running `timerboard run`) holds the database
    #[error("Database is locked by another timerboard process")]
    Locked,

    /// A stored row could not be decoded
    #[error("Corrupt row for timer {id}: {message}")]
    Corrupt { id: i64, message: String },
}

/// Messaging collaborator failures.
#[derive(Error, Debug)]
pub enum DeliveryError {
    /// Transport-level failure
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-success response from the chat platform
    #[error("Unexpected response (HTTP {status}): {body}")]
    Status { status: u16, body: String },

    /// Messenger is missing credentials or a target
    #[error("Messenger not configured: {0}")]
    NotConfigured(String),

    /// Local sink failure (console transport)
    #[error("Write failed: {0}")]
    Io(#[from] std::io::Error),
}

impl From<rusqlite::Error> for StorageError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(code, _msg) => {
                if matches!(
                    code.code,
                    rusqlite::ErrorCode::DatabaseLocked | rusqlite::ErrorCode::DatabaseBusy
                ) {
                    StorageError::Locked
                } else {
                    StorageError::QueryFailed(err.to_string())
                }
            }
            _ => StorageError::QueryFailed(err.to_string()),
        }
    }
}

/// Result type alias for CoreError
pub type Result<T, E = CoreError> = std::result::Result<T, E>;
