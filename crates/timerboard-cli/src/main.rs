use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;
mod common;

#[derive(Parser)]
#[command(name = "timerboard", version, about = "Structure timer board for chat channels")]
struct Cli {
    /// Config file (defaults to $TIMERBOARD_HOME/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the bot: tick periodically and answer chat commands
    Run {
        /// Read commands from stdin and print to stdout instead of Discord
        #[arg(long)]
        console: bool,
    },
    #[command(flatten)]
    Timer(commands::timer::TimerAction),
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: commands::config::ConfigAction,
    },
    /// Universe table (jump graph) management
    Universe {
        #[command(subcommand)]
        action: commands::universe::UniverseAction,
    },
}

fn main() {
    dotenv::dotenv().ok();
    let cli = Cli::parse();
    let config_path = cli.config.as_deref();

    let result = match cli.command {
        Commands::Run { console } => commands::run::run(config_path, console),
        Commands::Timer(action) => commands::timer::run(config_path, action),
        Commands::Config { action } => commands::config::run(config_path, action),
        Commands::Universe { action } => commands::universe::run(config_path, action),
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
