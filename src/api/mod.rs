use std::net::SocketAddr;
use std::path::PathBuf;

use axum::{
    Router,
    extract::{Json, rejection::JsonRejection},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::core::{
    AccumulationRequest, CancellationToken, HistoricalLibrary, MonteCarloRequest,
    ProjectionRequest, SimulationError, SimulationResult, WithdrawalRequest, run_accumulation,
    run_monte_carlo, run_projection, run_withdrawal,
};

/// Largest batch a single HTTP request may ask for.
pub const MAX_API_TRIALS: u32 = 100_000;

#[derive(Debug, Parser)]
#[command(
    name = "zinseszins",
    about = "Long-horizon savings and drawdown projections under German fund taxation"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Serve the JSON API.
    Serve {
        #[arg(long, default_value_t = 8080)]
        port: u16,
    },
    /// Run one projection from a JSON request file and print the result.
    Project {
        #[arg(long)]
        config: PathBuf,
    },
    /// Run a seeded Monte Carlo batch from a JSON projection request file.
    MonteCarlo {
        #[arg(long)]
        config: PathBuf,
        #[arg(long)]
        trials: Option<u32>,
        #[arg(long)]
        seed: Option<u64>,
    },
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: &'static str,
    historical_indices: Vec<&'static str>,
}

pub fn router() -> Router {
    Router::new()
        .route("/api/health", get(health_handler))
        .route("/api/accumulation", post(accumulation_handler))
        .route("/api/withdrawal", post(withdrawal_handler))
        .route("/api/projection", post(projection_handler))
        .route("/api/monte-carlo", post(monte_carlo_handler))
        .fallback(not_found_handler)
}

pub async fn run_http_server(port: u16) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "projection API listening");

    axum::serve(listener, router()).await
}

async fn health_handler() -> Response {
    json_response(
        StatusCode::OK,
        HealthResponse {
            status: "ok",
            historical_indices: HistoricalLibrary::builtin().indices(),
        },
    )
}

async fn not_found_handler() -> Response {
    error_response(StatusCode::NOT_FOUND, "Not found")
}

async fn accumulation_handler(
    payload: Result<Json<AccumulationRequest>, JsonRejection>,
) -> Response {
    match payload {
        Ok(Json(request)) => simulation_response(run_accumulation(&request)),
        Err(rejection) => rejected_payload(rejection),
    }
}

async fn withdrawal_handler(payload: Result<Json<WithdrawalRequest>, JsonRejection>) -> Response {
    match payload {
        Ok(Json(request)) => simulation_response(run_withdrawal(&request)),
        Err(rejection) => rejected_payload(rejection),
    }
}

async fn projection_handler(payload: Result<Json<ProjectionRequest>, JsonRejection>) -> Response {
    match payload {
        Ok(Json(request)) => simulation_response(run_projection(&request)),
        Err(rejection) => rejected_payload(rejection),
    }
}

/// Cancels the batch if the handler future is dropped, e.g. on client disconnect.
struct CancelOnDrop(CancellationToken);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

async fn monte_carlo_handler(payload: Result<Json<MonteCarloRequest>, JsonRejection>) -> Response {
    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => return rejected_payload(rejection),
    };
    if request.trials > MAX_API_TRIALS {
        warn!(trials = request.trials, "monte carlo request too large");
        return error_response(
            StatusCode::BAD_REQUEST,
            &format!("trials must be <= {MAX_API_TRIALS}"),
        );
    }

    let token = CancellationToken::new();
    let _guard = CancelOnDrop(token.clone());
    let batch = tokio::task::spawn_blocking(move || run_monte_carlo(&request, &token)).await;
    match batch {
        Ok(result) => simulation_response(result),
        Err(e) => {
            warn!(error = %e, "monte carlo worker failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "simulation worker failed")
        }
    }
}

fn rejected_payload(rejection: JsonRejection) -> Response {
    let msg = format!("Invalid JSON payload: {}", rejection.body_text());
    warn!(%msg, "rejected request");
    error_response(StatusCode::BAD_REQUEST, &msg)
}

fn simulation_response<T: Serialize>(result: SimulationResult<T>) -> Response {
    match result {
        Ok(body) => json_response(StatusCode::OK, body),
        Err(err) => {
            warn!(error = %err, "simulation failed");
            error_response(status_for(&err), &err.to_string())
        }
    }
}

fn status_for(err: &SimulationError) -> StatusCode {
    match err {
        SimulationError::InvalidConfiguration { .. } => StatusCode::BAD_REQUEST,
        SimulationError::MissingYearRate { .. }
        | SimulationError::MissingHistoricalData { .. }
        | SimulationError::MissingReferenceRate { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        SimulationError::Cancelled { .. } => StatusCode::SERVICE_UNAVAILABLE,
    }
}

fn json_response<T: Serialize>(status: StatusCode, body: T) -> Response {
    let mut response = (status, Json(body)).into_response();
    response
        .headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    response
}

fn error_response(status: StatusCode, msg: &str) -> Response {
    json_response(
        status,
        ErrorResponse {
            error: msg.to_string(),
        },
    )
}
