//! # Timerboard Core Library
//!
//! Core logic for Timerboard, a live countdown board of structure timers
//! kept up to date inside a chat channel. The `timerboard` binary is a thin
//! layer over this crate.
//!
//! ## Architecture
//!
//! - **Universe**: static jump graph of named systems, with BFS distances
//!   from the current staging point (loaded from JSON, or fetched from ESI)
//! - **Timer parsing**: three input grammars (`YYYY-MM-DD HH:MM:SS SYS - NAME`,
//!   the in-game `Reinforced until` paste and `sov` timers) producing one UTC deadline
//! - **Store**: the authoritative timer collection and staging point
//! - **Engine**: periodic reconciliation of timer lifecycles, notifications
//!   and board re-rendering, serialized against incoming commands
//! - **Storage**: TOML configuration and SQLite snapshots
//! - **Integrations**: chat transports (Discord REST, console)
//!
//! ## Key Components
//!
//! - [`ReconciliationEngine`]: tick loop and command handling
//! - [`TimerParser`]: command text to [`TimerDraft`]
//! - [`TimerStore`]: timer collection with distance annotations
//! - [`LocationGraph`]: jump distance lookup
//! - [`Messenger`]: trait for chat transports

pub mod engine;
pub mod error;
pub mod events;
pub mod integrations;
pub mod logging;
pub mod storage;
pub mod store;
pub mod timer;
pub mod universe;

pub use engine::{AddOutcome, Command, CommandEvent, ReconciliationEngine, TickReport};
pub use error::{ConfigError, CoreError, DeliveryError, ParseError, StorageError, StoreError};
pub use events::Event;
pub use integrations::{ChannelId, ConsoleMessenger, DiscordMessenger, MemoryMessenger, Messenger};
pub use storage::{Config, SnapshotStore, SqliteSnapshotStore};
pub use store::{StoreSnapshot, TimerStore, TimerView};
pub use timer::{Timer, TimerDraft, TimerId, TimerParser, TimerState};
pub use universe::{Distance, EsiClient, LocationGraph, UniverseTable};
