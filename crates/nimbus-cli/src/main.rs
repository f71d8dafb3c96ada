//! Nimbus command line.
//!
//! Drives the offline cache manager against the configured scope and store,
//! and runs the connectivity router against a simulated page.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use nimbus_common::{init_logging, LogConfig, LogFormat, NimbusConfig, NimbusError};
use tracing::error;
use url::Url;

mod commands;

#[derive(Debug, Parser)]
#[command(name = "nimbus", version, about = "Offline cache and connectivity routing")]
struct Cli {
    /// JSON configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// More logging (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Restore the configured generation, or install and activate it
    Sync,

    /// Route one request through the offline cache manager
    Fetch {
        /// Absolute URL, or a path relative to the scope
        url: String,

        /// Also write the body to this file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// List cache buckets and their entries
    Status,

    /// Reconcile a page location against a connectivity state once
    Route {
        /// Current page URL
        #[arg(long)]
        location: Url,

        /// Treat the page as online
        #[arg(long, conflicts_with = "offline", required_unless_present = "offline")]
        online: bool,

        /// Treat the page as offline
        #[arg(long)]
        offline: bool,
    },

    /// Probe connectivity and keep a simulated page routed until Ctrl-C
    Watch {
        /// Starting page URL
        #[arg(long)]
        location: Url,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let format = if cli.json_logs {
        LogFormat::Json
    } else {
        LogFormat::Pretty
    };
    init_logging(LogConfig::from_verbosity(cli.verbose).with_format(format));

    if let Err(err) = run(cli).await {
        let category = err
            .downcast_ref::<NimbusError>()
            .map_or("command", NimbusError::category);
        error!(error = %err, category, "Command failed");
        eprintln!("error: {:#}", err);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = NimbusConfig::load(cli.config.as_deref())?;

    match cli.command {
        Command::Sync => commands::sync(&config).await,
        Command::Fetch { url, output } => commands::fetch(&config, &url, output.as_deref()).await,
        Command::Status => commands::status(&config).await,
        Command::Route {
            location, online, ..
        } => commands::route(&config, location, online),
        Command::Watch { location } => commands::watch(&config, location).await,
    }
}
