use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::info;

use zinseszins::api::{Cli, Command, run_http_server};
use zinseszins::core::{
    CancellationToken, MonteCarloRequest, ProjectionRequest, run_monte_carlo, run_projection,
};

fn init_tracing() {
    let json_logging = std::env::var("RUST_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    let filter = || {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
    };
    if json_logging {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter())
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter())
            .with_writer(std::io::stderr)
            .init();
    }
}

fn read_request<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("failed to parse {}", path.display()))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    match Cli::parse().command {
        Command::Serve { port } => run_http_server(port)
            .await
            .with_context(|| format!("server on port {port} failed")),
        Command::Project { config } => {
            let request: ProjectionRequest = read_request(&config)?;
            let result = run_projection(&request)?;
            info!(
                accumulated = result.accumulation.final_capital,
                terminal = result.withdrawal.final_capital,
                "projection finished"
            );
            print_json(&result)
        }
        Command::MonteCarlo {
            config,
            trials,
            seed,
        } => {
            let projection: ProjectionRequest = read_request(&config)?;
            let request = MonteCarloRequest {
                projection,
                trials: trials.unwrap_or(1_000),
                seed: seed.unwrap_or(0),
            };
            let summary = tokio::task::spawn_blocking(move || {
                run_monte_carlo(&request, &CancellationToken::new())
            })
            .await??;
            print_json(&summary)
        }
    }
}
