mod accumulation;
mod error;
mod history;
mod income;
mod monte_carlo;
mod portfolio;
mod projection;
mod returns;
mod tax;
mod types;
mod validate;
mod withdrawal;

pub use accumulation::{run_accumulation, run_accumulation_with};
pub use error::{SimulationError, SimulationResult};
pub use history::{HistoricalLibrary, builtin_reference_rates};
pub use income::{
    IncomeBreakdown, PensionYear, aggregate_income, other_income_for_year, pension_for_year,
    pension_taxable_share,
};
pub use monte_carlo::{
    CancellationToken, MonteCarloRequest, MonteCarloSummary, Percentiles, run_monte_carlo,
    run_monte_carlo_with,
};
pub use portfolio::{CorrelationFactor, RebalanceStep, Rebalancer};
pub use projection::{run_projection, run_projection_with};
pub use returns::{PeriodReturn, ReturnGenerator, ReturnSchedule, ScheduledYear};
pub use tax::{
    AllowanceLedger, TaxInput, TaxOutcome, advance_taxable_amount, compute_tax,
    favorable_assessment, personal_income_tax,
};
pub use types::*;
pub use validate::{validate_accumulation, validate_withdrawal};
pub use withdrawal::{MAX_WITHDRAWAL_YEARS, guardrail_rate, run_withdrawal, run_withdrawal_with};
