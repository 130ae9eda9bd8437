//! Tunescope CLI: compare fine-tuning sessions and pick checkpoints from the terminal.

mod commands;
mod render;

use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Tunescope: training-run metrics and checkpoint selection
#[derive(Parser, Debug)]
#[command(name = "tunescope", version, about, long_about = None)]
struct Cli {
    /// Workspace directory
    #[arg(short, long, default_value = ".")]
    workspace: PathBuf,

    /// Read sessions from a training service instead of the local session roots
    #[arg(long)]
    service_url: Option<String>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long)]
    quiet: bool,

    /// Subcommand
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// List discovered training sessions
    Sessions,
    /// Compare one or more sessions side by side
    Compare {
        /// Session ids to compare, in selection order
        #[arg(required = true)]
        ids: Vec<String>,
        /// Trailing window for the rolling stability metric
        #[arg(long)]
        window: Option<usize>,
        /// How many ranked checkpoints to keep per session
        #[arg(long)]
        top: Option<usize>,
        /// Print the full dataset as JSON instead of a table
        #[arg(long)]
        json: bool,
        /// Write the full dataset as JSON to this file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Show the best checkpoints of a single session
    Best {
        /// Session id
        id: String,
        /// Number of checkpoints to show
        #[arg(long, default_value_t = 3)]
        top: usize,
    },
    /// List checkpoints recorded in a session log and the adapter files on disk
    Checkpoints {
        /// Session id
        id: String,
    },
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(clap::Subcommand, Debug)]
enum ConfigAction {
    /// Create default configuration file
    Init,
    /// Show current configuration
    Show,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    // Resolve workspace
    let workspace = cli
        .workspace
        .canonicalize()
        .unwrap_or_else(|_| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

    let mut config = tunescope_core::load_config(Some(&workspace), None)
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;
    if let Some(url) = &cli.service_url {
        config.sources.service_url = Some(url.clone());
    }
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;

    // Set up tracing: human-readable stderr + optional JSON file logging
    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(EnvFilter::new(filter));

    let (json_layer, _guard) = if config.logging.json_file {
        let log_dir = config.log_directory(&workspace);
        let _ = std::fs::create_dir_all(&log_dir);
        let file_appender = tracing_appender::rolling::daily(&log_dir, "tunescope.log");
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        let layer = tracing_subscriber::fmt::layer()
            .json()
            .with_writer(non_blocking)
            .with_filter(EnvFilter::new("debug"));
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    commands::handle_command(cli.command, &workspace, config).await
}
