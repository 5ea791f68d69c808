use tracing::debug;

use super::accumulation::run_accumulation_with;
use super::error::SimulationResult;
use super::history::HistoricalLibrary;
use super::types::{ProjectionRequest, ProjectionResult, WithdrawalRequest};
use super::withdrawal::run_withdrawal_with;

pub fn run_projection(request: &ProjectionRequest) -> SimulationResult<ProjectionResult> {
    run_projection_with(request, HistoricalLibrary::builtin())
}

/// Savings phase followed by the drawdown phase, with the final savings
/// capital handed over as the starting capital unless one is given.
pub fn run_projection_with(
    request: &ProjectionRequest,
    library: &HistoricalLibrary,
) -> SimulationResult<ProjectionResult> {
    let accumulation = run_accumulation_with(&request.accumulation, library)?;

    let phase = &request.withdrawal;
    let starting_capital = phase
        .starting_capital
        .unwrap_or(accumulation.final_capital)
        .max(0.0);
    debug!(starting_capital, "handing over to withdrawal phase");

    let withdrawal = run_withdrawal_with(
        &WithdrawalRequest {
            starting_capital,
            config: phase.config.clone(),
            returns: phase.returns.clone(),
            tax: phase
                .tax
                .clone()
                .unwrap_or_else(|| request.accumulation.tax.clone()),
            income: phase.income.clone(),
        },
        library,
    )?;

    Ok(ProjectionResult {
        accumulation,
        withdrawal,
    })
}
