use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use serde_json::{Map, Value};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use fare_advisor::{
    config::{Config, LogFormat},
    tools::rows_from_json,
    AnalysisRequest, FareAgent,
};

/// Decide between a bike-share membership and pay-per-use from trip history.
#[derive(Debug, Parser)]
#[command(name = "fare-advisor", version, about)]
struct Cli {
    /// JSON file holding an array of trip objects
    #[arg(long)]
    trips: PathBuf,

    /// URL of the operator's pricing policy page
    #[arg(long)]
    policy_url: String,

    /// Passages kept per policy sub-query
    #[arg(long)]
    top_k: Option<usize>,

    /// Issue policy sub-queries concurrently
    #[arg(long)]
    concurrent: bool,

    /// Pretty-print the result JSON
    #[arg(long)]
    pretty: bool,
}

/// Exit status when a run ends with `stopReason = "error"`.
const EXIT_RUN_ERROR: u8 = 2;

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };
    if let Some(k) = cli.top_k {
        config.retrieval.top_k = k;
    }
    config.retrieval.concurrent |= cli.concurrent;

    // Initialize logging
    init_logging(&config);

    info!(version = env!("CARGO_PKG_VERSION"), "Fare advisor starting...");

    let trips = read_trips(&cli.trips)?;
    info!(path = %cli.trips.display(), rows = trips.len(), "Trips loaded");

    let agent = FareAgent::new(config).context("failed to create agent")?;
    let request = AnalysisRequest::new(trips, cli.policy_url);

    let result = match agent.analyze(&request).await {
        Ok(r) => r,
        Err(e) => {
            error!(error = %e, "Invalid analysis request");
            return Err(e.into());
        }
    };

    let output = if cli.pretty {
        serde_json::to_string_pretty(&result)?
    } else {
        serde_json::to_string(&result)?
    };
    println!("{}", output);

    if result.is_completed() {
        info!(decision = %result.decision, "Analysis complete");
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::from(EXIT_RUN_ERROR))
    }
}

fn read_trips(path: &Path) -> anyhow::Result<Vec<fare_advisor::tools::TripRow>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let objects: Vec<Map<String, Value>> = serde_json::from_str(&raw)
        .with_context(|| format!("{} is not a JSON array of objects", path.display()))?;
    Ok(rows_from_json(objects))
}

/// Initialize tracing/logging
fn init_logging(config: &Config) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    match config.logging.format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}
