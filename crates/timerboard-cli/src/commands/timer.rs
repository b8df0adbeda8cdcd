//! One-shot timer commands.
//!
//! Each invocation restores the saved snapshot, applies one operation
//! through the same engine the bot uses, and saves again. While
//! `timerboard run` holds the database these commands are refused; use the
//! chat commands instead.

use std::path::Path;

use chrono::{DateTime, Utc};
use clap::Subcommand;
use serde::Serialize;
use timerboard_core::{logging, ReconciliationEngine, TimerId, TimerView};

use crate::common::{load_config, one_shot_messenger, open_engine, runtime, CliResult, DbAccess};

#[derive(Subcommand)]
pub enum TimerAction {
    /// Add a timer ("2025-03-05 10:56:50 9PX2-F - WWW [TAG]" or a Reinforced paste)
    Add {
        #[arg(required = true, num_args = 1.., allow_hyphen_values = true)]
        text: Vec<String>,
    },
    /// Add a sovereignty timer ("2025.03.05 18:30 OJOS-T OWNER 4.5")
    Sov {
        #[arg(required = true, num_args = 1..)]
        text: Vec<String>,
    },
    /// Remove a timer by ID
    Rm { id: TimerId },
    /// Set the staging system distances are measured from
    Staging {
        #[arg(required = true, num_args = 1..)]
        location: Vec<String>,
    },
    /// List tracked timers
    List {
        /// Print JSON instead of the board
        #[arg(long)]
        json: bool,
    },
    /// Re-post the board without changing anything
    Refresh,
    /// Run one reconciliation pass now
    Tick {
        #[arg(long)]
        json: bool,
    },
    /// Remove every timer; IDs start over at 1000
    Reset,
}

#[derive(Serialize)]
struct ListOutput {
    staging: Option<String>,
    timers: Vec<TimerView>,
}

pub fn run(config_path: Option<&Path>, action: TimerAction) -> CliResult {
    let config = load_config(config_path)?;
    logging::init(&config.logging);
    let messenger = one_shot_messenger(&config);
    let engine = open_engine(config, messenger, DbAccess::OneShot)?;
    runtime()?.block_on(execute(&engine, action, Utc::now()))
}

async fn execute(engine: &ReconciliationEngine, action: TimerAction, now: DateTime<Utc>) -> CliResult {
    match action {
        TimerAction::Add { text } => match engine.add(&text.join(" "), now).await {
            Ok(outcome) => println!("{}", outcome.reply()),
            Err(err) => return Err(format!("could not add timer: {err}").into()),
        },
        TimerAction::Sov { text } => match engine.add_sov(&text.join(" "), now).await {
            Ok(outcome) => println!("{}", outcome.reply()),
            Err(err) => return Err(format!("could not add SOV timer: {err}").into()),
        },
        TimerAction::Rm { id } => {
            let event = engine.remove(id, now).await?;
            println!("{}", event.describe());
        }
        TimerAction::Staging { location } => {
            let event = engine.set_staging(&location.join(" "), now).await;
            println!("{}", event.describe());
        }
        TimerAction::List { json } => {
            if json {
                let output = ListOutput {
                    staging: engine.staging().await,
                    timers: engine.list().await,
                };
                println!("{}", serde_json::to_string_pretty(&output)?);
            } else {
                println!("{}", engine.board_text(now).await);
            }
        }
        TimerAction::Refresh => {
            if !engine.refresh(now).await {
                return Err("board delivery failed".into());
            }
            println!("Board refreshed");
        }
        TimerAction::Tick { json } => {
            let report = engine.tick_at(now).await;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                for event in &report.events {
                    println!("{}", event.describe());
                }
                println!(
                    "{} transitions, {} notices sent, {} pending",
                    report.events.len(),
                    report.notices_sent,
                    report.notices_pending
                );
            }
        }
        TimerAction::Reset => {
            let event = engine.reset(now).await;
            println!("{}", event.describe());
        }
    }

    if !engine.shutdown().await {
        return Err("failed to save timers".into());
    }
    Ok(())
}
