//! Long-running bot: periodic reconciliation plus chat commands, polled from
//! the Discord commands channel or, in console mode, read from stdin.
//!
//! The bot locks the snapshot database for as long as it runs, so every
//! mutation goes through this one process.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::oneshot;
use timerboard_core::{
    logging, ChannelId, CommandEvent, ConsoleMessenger, DiscordMessenger, Messenger,
    ReconciliationEngine,
};

use crate::common::{load_config, open_engine, runtime, CliResult, DbAccess};

const CONSOLE_AUTHOR: &str = "console";

pub fn run(config_path: Option<&Path>, console: bool) -> CliResult {
    let mut config = load_config(config_path)?;
    logging::init(&config.logging);
    if console {
        // Any nonzero ids will do for stdout.
        if config.channels.timerboard == 0 {
            config.channels.timerboard = 1;
        }
        if config.channels.commands == 0 {
            config.channels.commands = 2;
        }
    }
    config.validate()?;

    let messenger: Arc<dyn Messenger> = if console {
        Arc::new(ConsoleMessenger::stdout())
    } else {
        Arc::new(DiscordMessenger::from_config(&config.discord)?)
    };
    let commands_channel = ChannelId(config.channels.commands);
    let engine = Arc::new(open_engine(config, messenger, DbAccess::Exclusive)?);

    let rt = runtime()?;
    rt.block_on(async move {
        let eof = if console {
            let (tx, rx) = oneshot::channel();
            tokio::spawn(read_console(Arc::clone(&engine), commands_channel, tx));
            Some(rx)
        } else {
            None
        };
        engine.run(wait_for_shutdown(eof)).await;
    });
    // A pending stdin read must not hold the process open.
    rt.shutdown_timeout(Duration::from_secs(1));
    Ok(())
}

async fn wait_for_shutdown(eof: Option<oneshot::Receiver<()>>) {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "cannot listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };
    match eof {
        Some(eof) => {
            tokio::select! {
                _ = ctrl_c => {}
                _ = eof => {}
            }
        }
        None => ctrl_c.await,
    }
    tracing::info!("shutting down");
}

/// Feed `!command` lines from stdin to the engine until EOF.
async fn read_console(
    engine: Arc<ReconciliationEngine>,
    channel: ChannelId,
    eof: oneshot::Sender<()>,
) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if let Some(event) = CommandEvent::from_line(channel, CONSOLE_AUTHOR, &line) {
                    engine.respond(&event).await;
                }
            }
            Ok(None) => break,
            Err(err) => {
                tracing::warn!(error = %err, "stdin read failed");
                break;
            }
        }
    }
    let _ = eof.send(());
}
