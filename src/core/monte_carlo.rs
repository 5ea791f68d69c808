//! Many seeded projections of the same plan, run in parallel and summarised.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::error::{SimulationError, SimulationResult};
use super::history::HistoricalLibrary;
use super::projection::run_projection_with;
use super::types::{ProjectionRequest, TerminalState};

fn default_trials() -> u32 {
    1_000
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonteCarloRequest {
    pub projection: ProjectionRequest,
    #[serde(default = "default_trials")]
    pub trials: u32,
    #[serde(default)]
    pub seed: u64,
}

/// Shared flag a caller flips to abandon a batch. Checked between trials.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrialOutcome {
    pub trial: u32,
    pub accumulated_capital: f64,
    pub terminal_capital: f64,
    pub depletion_year: Option<u32>,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize)]
pub struct Percentiles {
    pub p10: f64,
    pub p50: f64,
    pub p90: f64,
}

impl Percentiles {
    fn of(mut values: Vec<f64>) -> Self {
        Self {
            p10: percentile(&mut values, 10.0),
            p50: percentile(&mut values, 50.0),
            p90: percentile(&mut values, 90.0),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonteCarloSummary {
    pub trials: u32,
    pub base_seed: u64,
    pub success_rate: f64,
    pub depleted_trials: u32,
    pub accumulated_capital: Percentiles,
    pub terminal_capital: Percentiles,
    pub median_depletion_year: Option<u32>,
}

pub fn run_monte_carlo(
    request: &MonteCarloRequest,
    cancel: &CancellationToken,
) -> SimulationResult<MonteCarloSummary> {
    run_monte_carlo_with(request, cancel, HistoricalLibrary::builtin())
}

pub fn run_monte_carlo_with(
    request: &MonteCarloRequest,
    cancel: &CancellationToken,
    library: &HistoricalLibrary,
) -> SimulationResult<MonteCarloSummary> {
    if request.trials == 0 {
        return Err(SimulationError::invalid("trials", "must be > 0"));
    }
    info!(trials = request.trials, seed = request.seed, "starting monte carlo batch");
    let projection = &request.projection;
    if !projection.accumulation.returns.is_stochastic()
        && !projection.withdrawal.returns.is_stochastic()
    {
        warn!("no random return source configured, every trial will be identical");
    }

    let results = (0..request.trials)
        .into_par_iter()
        .map(|trial| {
            if cancel.is_cancelled() {
                return None;
            }
            Some(run_trial(&request.projection, request.seed, trial, library))
        })
        .collect::<Vec<_>>();

    if cancel.is_cancelled() {
        let completed_trials = results.iter().filter(|r| r.is_some()).count() as u32;
        warn!(completed_trials, "monte carlo batch cancelled");
        return Err(SimulationError::Cancelled { completed_trials });
    }

    let outcomes = results
        .into_iter()
        .flatten()
        .collect::<SimulationResult<Vec<_>>>()?;
    Ok(summarize(&outcomes, request.seed))
}

fn run_trial(
    projection: &ProjectionRequest,
    base_seed: u64,
    trial: u32,
    library: &HistoricalLibrary,
) -> SimulationResult<TrialOutcome> {
    let mut seeded = projection.clone();
    seeded.accumulation.returns = projection
        .accumulation
        .returns
        .with_seed(derive_seed(base_seed, trial, 0));
    seeded.withdrawal.returns = projection
        .withdrawal
        .returns
        .with_seed(derive_seed(base_seed, trial, 1));

    let result = run_projection_with(&seeded, library)?;
    let depletion_year = match result.withdrawal.terminal_state {
        TerminalState::Depleted => result.withdrawal.ledger.last().map(|row| row.year),
        TerminalState::HorizonReached => None,
    };
    Ok(TrialOutcome {
        trial,
        accumulated_capital: result.accumulation.final_capital,
        terminal_capital: result.withdrawal.final_capital,
        depletion_year,
    })
}

fn summarize(outcomes: &[TrialOutcome], base_seed: u64) -> MonteCarloSummary {
    let trials = outcomes.len() as u32;
    let mut depletion_years = outcomes
        .iter()
        .filter_map(|o| o.depletion_year)
        .collect::<Vec<_>>();
    depletion_years.sort_unstable();
    let depleted_trials = depletion_years.len() as u32;

    MonteCarloSummary {
        trials,
        base_seed,
        success_rate: if trials == 0 {
            0.0
        } else {
            f64::from(trials - depleted_trials) / f64::from(trials)
        },
        depleted_trials,
        accumulated_capital: Percentiles::of(
            outcomes.iter().map(|o| o.accumulated_capital).collect(),
        ),
        terminal_capital: Percentiles::of(outcomes.iter().map(|o| o.terminal_capital).collect()),
        median_depletion_year: depletion_years
            .get(depletion_years.len().saturating_sub(1) / 2)
            .copied(),
    }
}

/// Seed for one return stream of one trial; independent of thread scheduling.
pub fn derive_seed(base_seed: u64, trial: u32, stream: u32) -> u64 {
    let mixed = base_seed ^ ((trial as u64) << 32) ^ stream as u64;
    splitmix64(mixed)
}

fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E3779B97F4A7C15);
    let mut z = x;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
    z ^ (z >> 31)
}

fn percentile(values: &mut [f64], p: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }

    values.sort_by(|a, b| a.total_cmp(b));
    if values.len() == 1 {
        return values[0];
    }

    let rank = (p / 100.0) * (values.len() as f64 - 1.0);
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    let w = rank - lower as f64;
    values[lower] * (1.0 - w) + values[upper] * w
}
