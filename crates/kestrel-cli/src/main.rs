//! Kestrel CLI - Headless Playback Driver
//!
//! Features:
//! - Scripted host method calls against simulated engines
//! - Caching-proxy URL rewriting
//! - HLS pre-caching through the proxy cache
//! - Configuration dump

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;
mod output;

use output::OutputFormat;

/// Kestrel CLI - Playback session toolkit
#[derive(Parser)]
#[command(name = "kestrel")]
#[command(author = "Kestrel Contributors")]
#[command(version)]
#[command(about = "Drive Kestrel playback sessions without a UI", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Output format (text, json, table)
    #[arg(short, long, default_value = "text")]
    format: OutputFormat,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,

    /// Host configuration file (JSON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a JSON script of host calls and simulated engine actions
    Run {
        /// Path to the script
        script: PathBuf,

        /// Extra time to let sessions settle after the last step (ms)
        #[arg(long, default_value = "50")]
        settle_ms: u64,
    },

    /// Print the caching-proxy URL for an origin URL
    Rewrite {
        /// Origin URL
        url: String,
    },

    /// Resolve a proxied URL back to its origin
    Origin {
        /// Proxied URL
        url: String,
    },

    /// Fetch a playlist and its first variant's segments into the cache
    Precache {
        /// Origin or proxied URL
        url: String,

        /// Limit the number of segments fetched
        #[arg(short, long)]
        segments: Option<usize>,
    },

    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    if cli.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
    kestrel_core::init();

    let config = commands::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Run { script, settle_ms } => {
            commands::run(config, &script, settle_ms, cli.format).await?;
        }
        Commands::Rewrite { url } => {
            commands::rewrite(config, &url, cli.format)?;
        }
        Commands::Origin { url } => {
            commands::origin(config, &url, cli.format)?;
        }
        Commands::Precache { url, segments } => {
            commands::precache(config, &url, segments, cli.format).await?;
        }
        Commands::Config => {
            commands::show_config(&config, cli.format)?;
        }
    }

    Ok(())
}
