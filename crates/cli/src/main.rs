//! Settle CLI - settle command

use clap::{Parser, Subcommand};
use anyhow::Result;
use settle_core::ArrivalContext;

mod cmd;
mod data_access;
mod system_config;
mod util;

/// Settle - Collect message bursts and hand each one off exactly once
#[derive(Parser)]
#[command(name = "settle")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Record an arrival and start a detached watcher for it
    Arrive {
        /// Conversation key (e.g. chat id)
        key: String,
        /// Message text
        text: String,
        /// Recent group chat history passed to the gateway
        #[arg(long)]
        group_history: Option<String>,
        /// Agent profile passed to the gateway
        #[arg(long)]
        profile: Option<String>,
    },
    /// Wait out the quiet interval for a key, then dispatch if settled
    #[command(hide = true)]
    Watch {
        /// Conversation key
        key: String,
    },
    /// Read arrivals as JSON lines from stdin and debounce them in-process
    Serve,
    /// Show pending batches
    Status,
    /// View or edit configuration
    Config {
        /// List all values
        #[arg(long)]
        list: bool,
        /// Get a single value
        #[arg(long, value_name = "KEY")]
        get: Option<String>,
        /// Set a value
        #[arg(long, num_args = 2, value_names = ["KEY", "VALUE"])]
        set: Option<Vec<String>>,
        /// Show the config file path
        #[arg(long)]
        path: bool,
        /// Create the config file if missing (with --path)
        #[arg(long)]
        create: bool,
        /// Print an example configuration
        #[arg(long)]
        example: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let verbose = cli.verbose;

    // Detached watchers have no stderr; `watch` sets up file logging itself
    if !matches!(cli.command, Commands::Watch { .. }) {
        util::init_stderr_logging(verbose);
    }

    match cli.command {
        Commands::Arrive { key, text, group_history, profile } => {
            let context = ArrivalContext { group_history, profile };
            cmd::arrive::run(&key, &text, context, verbose).await
        }
        Commands::Watch { key } => cmd::watch::run(&key, verbose).await,
        Commands::Serve => {
            let config = system_config::load()?;
            cmd::serve::run(&config).await
        }
        Commands::Status => cmd::status::run().await,
        Commands::Config { list: _, get, set, path, create, example } => {
            if let Some(key) = get {
                cmd::config::run_get(&key).await
            } else if let Some(pair) = set {
                cmd::config::run_set(&pair[0], &pair[1]).await
            } else if path || create {
                cmd::config::run_path(create).await
            } else if example {
                cmd::config::run_example().await
            } else {
                cmd::config::run_list().await
            }
        }
    }
}
