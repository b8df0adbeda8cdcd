//! Reconciliation engine, chat commands and board rendering.

pub mod board;
mod command;
mod reconciliation;

pub use board::{format_countdown, render_board, MAX_BOARD_CHARS};
pub use command::{Command, CommandError, CommandEvent, COMMAND_PREFIX};
pub use reconciliation::{AddOutcome, ReconciliationEngine, TickReport};
