use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use roundsmith::config::Config;

mod commands;

#[derive(Parser)]
#[command(
    name = "roundsmith",
    version,
    about = "Virtual sports round synthesis: categorize matches and allocate rounds",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// TOML configuration file (defaults to environment variables)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log format (text, json)
    #[arg(long, global = true)]
    log_format: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scheduler and the result feed until interrupted
    Serve,

    /// Ingest provider files once
    Ingest {
        /// Input directory (overrides configuration)
        #[arg(short, long)]
        dir: Option<PathBuf>,
    },

    /// Run one categorization pass
    Categorize {
        /// Region prefix (defaults to every configured region)
        #[arg(short, long)]
        region: Option<String>,
    },

    /// Allocate and publish one round
    Allocate {
        /// Region prefix
        #[arg(short, long)]
        region: String,

        /// Competition id
        #[arg(short, long)]
        competition: u32,

        /// Round slot (defaults to the next slot in the cursor)
        #[arg(short, long)]
        slot: Option<u32>,

        /// Print the full selection as JSON
        #[arg(long, default_value = "false")]
        json: bool,
    },

    /// Show bin populations
    Stats {
        /// Region prefix (defaults to every configured region)
        #[arg(short, long)]
        region: Option<String>,

        /// Output as JSON
        #[arg(long, default_value = "false")]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::from_env()?,
    };
    config.validate()?;

    let log_format = cli
        .log_format
        .clone()
        .unwrap_or_else(|| config.logging.format.clone());
    setup_tracing(&log_format, &config.logging.level, cli.verbose)?;

    tracing::info!("roundsmith starting");

    if let Err(e) = roundsmith::metrics::init_metrics() {
        tracing::warn!(error = %e, "Failed to register metrics");
    }

    let services = commands::Services::connect(config).await?;

    match cli.command {
        Commands::Serve => {
            tracing::info!("Starting serve command");
            commands::serve(services).await?;
        }

        Commands::Ingest { dir } => {
            tracing::info!(dir = ?dir, "Starting ingest command");
            commands::ingest(&services, dir).await?;
        }

        Commands::Categorize { region } => {
            tracing::info!(region = ?region, "Starting categorize command");
            commands::categorize(&services, region).await?;
        }

        Commands::Allocate {
            region,
            competition,
            slot,
            json,
        } => {
            tracing::info!(
                region = %region,
                competition = %competition,
                slot = ?slot,
                "Starting allocate command"
            );
            commands::allocate(&services, region, competition, slot, json).await?;
        }

        Commands::Stats { region, json } => {
            commands::stats(&services, region, json).await?;
        }
    }

    tracing::info!("roundsmith completed successfully");
    Ok(())
}

fn setup_tracing(format: &str, level: &str, verbose: bool) -> Result<()> {
    let env_filter = if verbose {
        tracing_subscriber::EnvFilter::new("roundsmith=debug,info")
    } else {
        tracing_subscriber::EnvFilter::try_new(format!("roundsmith={level},warn"))
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("roundsmith=info,warn"))
    };

    match format {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
    }

    Ok(())
}
