use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::info;

mod config;
mod engine;
mod error;
mod geo;
mod models;
mod store;
mod utils;

use engine::ScoringPipeline;
use geo::{ResolvedLocation, StaticGeoResolver};
use models::UseCase;
use store::InMemoryProfileStore;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Score a telemetry payload and print the risk assessment
    Score {
        /// Path to a JSON payload file (SDK-nested or flat schema)
        #[arg(long)]
        payload: PathBuf,

        /// Client IP address the payload arrived from
        #[arg(long)]
        ip: String,

        /// Use case: score|login|checkout|registration|password_reset|account_change
        #[arg(long, default_value = "score")]
        use_case: String,
    },

    /// Validate a payload against the canonical request schema
    Validate {
        /// Path to a JSON payload file
        #[arg(long)]
        payload: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    utils::logging::init_logger();

    // Parse command line arguments
    let cli = Cli::parse();

    // Load configuration
    let settings = config::load_config()?;

    match cli.command {
        Command::Score {
            payload,
            ip,
            use_case,
        } => {
            let use_case: UseCase = use_case
                .parse()
                .map_err(|e: String| anyhow::anyhow!(e))?;
            let raw = read_payload(&payload)?;

            let store = Arc::new(InMemoryProfileStore::new());
            // Without a GeoIP database the harness resolves every IP to a
            // neutral default; the pipeline degrades gracefully either way
            let resolver = Arc::new(StaticGeoResolver::with_default(ResolvedLocation {
                lat: 0.0,
                lon: 0.0,
                asn: None,
                vpn_likely: false,
            }));
            let pipeline = ScoringPipeline::new(settings, store, resolver);

            info!("Scoring payload {} as {}", payload.display(), use_case);
            let assessment = pipeline.score(&raw, &ip, use_case).await?;
            println!("{}", serde_json::to_string_pretty(&assessment)?);
        }

        Command::Validate { payload } => {
            let raw = read_payload(&payload)?;
            match engine::normalizer::normalize(&raw, UseCase::Score) {
                Ok(request) => {
                    info!("Payload {} is valid", payload.display());
                    println!("{}", serde_json::to_string_pretty(&request)?);
                }
                Err(e) => {
                    eprintln!("Validation failed: {}", e);
                    std::process::exit(1);
                }
            }
        }
    }

    Ok(())
}

fn read_payload(path: &PathBuf) -> Result<serde_json::Value> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read payload file {}", path.display()))?;
    serde_json::from_str(&contents)
        .with_context(|| format!("Payload file {} is not valid JSON", path.display()))
}
