//! Structural checks run before any simulation work, so a rejected request
//! never produces a partial ledger.

use std::collections::BTreeSet;

use super::accumulation::MAX_ACCUMULATION_YEARS;
use super::error::{SimulationError, SimulationResult};
use super::history::HistoricalLibrary;
use super::types::{
    AccumulationRequest, Contribution, CostModel, Horizon, IncomeSources, Rebalancing,
    ReturnConfig, TaxContext, WithdrawalConfig, WithdrawalRequest, WithdrawalStrategy, YearRange,
};
use super::withdrawal::MAX_WITHDRAWAL_YEARS;

fn ensure(condition: bool, field: &str, reason: &str) -> SimulationResult<()> {
    if condition {
        Ok(())
    } else {
        Err(SimulationError::invalid(field, reason))
    }
}

fn non_negative(value: f64) -> bool {
    value.is_finite() && value >= 0.0
}

fn fraction(value: f64) -> bool {
    value.is_finite() && (0.0..=1.0).contains(&value)
}

/// Growth rates may be negative but not at or below -100%.
fn growth_rate(value: f64) -> bool {
    value.is_finite() && value > -1.0
}

pub fn validate_year_range(years: YearRange) -> SimulationResult<()> {
    ensure(
        years.start <= years.end,
        "years",
        "start year must not be after end year",
    )?;
    ensure(
        years.end - years.start < MAX_ACCUMULATION_YEARS,
        "years",
        "range must not span more than 150 years",
    )
}

pub fn validate_tax(tax: &TaxContext) -> SimulationResult<()> {
    ensure(fraction(tax.flat_rate), "tax.flatRate", "must be between 0 and 1")?;
    ensure(
        fraction(tax.exemption_ratio),
        "tax.exemptionRatio",
        "must be between 0 and 1",
    )?;
    ensure(
        non_negative(tax.default_allowance),
        "tax.defaultAllowance",
        "must be >= 0",
    )?;
    ensure(
        tax.allowances.values().all(|a| non_negative(*a)),
        "tax.allowances",
        "every allowance must be >= 0",
    )?;
    ensure(
        tax.reference_rates.values().all(|r| r.is_finite())
            && tax.default_reference_rate.is_none_or(f64::is_finite),
        "tax.referenceRates",
        "reference rates must be finite",
    )
}

pub fn validate_returns(
    returns: &ReturnConfig,
    library: &HistoricalLibrary,
) -> SimulationResult<()> {
    match returns {
        ReturnConfig::Fixed { rate } => ensure(growth_rate(*rate), "returns.rate", "must be > -1"),
        ReturnConfig::Random { mean, std_dev, .. } => {
            ensure(growth_rate(*mean), "returns.mean", "must be > -1")?;
            ensure(non_negative(*std_dev), "returns.stdDev", "must be >= 0")
        }
        // Per-year rates may describe leveraged positions and go below -100%.
        ReturnConfig::Variable { rates } => ensure(
            rates.values().all(|r| r.is_finite()),
            "returns.rates",
            "every rate must be finite",
        ),
        ReturnConfig::Historical { index } => ensure(
            library.contains(index),
            "returns.index",
            "unknown historical index",
        ),
        ReturnConfig::MultiAsset(multi) => {
            ensure(
                !multi.classes.is_empty(),
                "returns.classes",
                "at least one asset class is required",
            )?;
            let mut seen = BTreeSet::new();
            for class in &multi.classes {
                ensure(
                    seen.insert(class.class),
                    "returns.classes",
                    "each asset class may appear only once",
                )?;
                ensure(
                    non_negative(class.target_allocation),
                    "returns.classes.targetAllocation",
                    "must be >= 0",
                )?;
                ensure(
                    growth_rate(class.expected_return),
                    "returns.classes.expectedReturn",
                    "must be > -1",
                )?;
                ensure(
                    non_negative(class.volatility),
                    "returns.classes.volatility",
                    "must be >= 0",
                )?;
            }
            let total = multi.classes.iter().map(|c| c.target_allocation).sum::<f64>();
            ensure(
                total > 0.0,
                "returns.classes.targetAllocation",
                "allocations must sum to more than zero",
            )?;
            if let Rebalancing::Threshold { max_drift } = multi.rebalancing {
                ensure(
                    max_drift.is_finite() && max_drift > 0.0 && max_drift < 1.0,
                    "returns.rebalancing.maxDrift",
                    "must be between 0 and 1 (exclusive)",
                )?;
            }
            Ok(())
        }
    }
}

fn validate_costs(costs: &CostModel, field: &str) -> SimulationResult<()> {
    ensure(
        costs.ongoing_cost_ratio.is_finite() && (0.0..1.0).contains(&costs.ongoing_cost_ratio),
        field,
        "ongoingCostRatio must be in [0, 1)",
    )?;
    ensure(
        fraction(costs.transaction_cost_ratio),
        field,
        "transactionCostRatio must be between 0 and 1",
    )?;
    ensure(
        non_negative(costs.transaction_cost_fixed),
        field,
        "transactionCostFixed must be >= 0",
    )
}

fn validate_month(month: u32, field: &str) -> SimulationResult<()> {
    ensure((1..=12).contains(&month), field, "month must be between 1 and 12")
}

pub fn validate_contributions(contributions: &[Contribution]) -> SimulationResult<()> {
    for contribution in contributions {
        match contribution {
            Contribution::SavingsPlan(plan) => {
                ensure(
                    non_negative(plan.annual_amount),
                    "contributions.annualAmount",
                    "must be >= 0",
                )?;
                validate_month(plan.start_month, "contributions.startMonth")?;
                ensure(
                    growth_rate(plan.annual_increase),
                    "contributions.annualIncrease",
                    "must be > -1",
                )?;
                if let Some(end) = plan.end_year {
                    ensure(
                        end >= plan.start_year,
                        "contributions.endYear",
                        "must not be before startYear",
                    )?;
                }
                validate_costs(&plan.costs, "contributions.costs")?;
            }
            Contribution::LumpSum(lump) => {
                ensure(non_negative(lump.amount), "contributions.amount", "must be >= 0")?;
                validate_month(lump.month, "contributions.month")?;
                validate_costs(&lump.costs, "contributions.costs")?;
            }
        }
    }
    Ok(())
}

pub fn validate_accumulation(
    request: &AccumulationRequest,
    library: &HistoricalLibrary,
) -> SimulationResult<()> {
    validate_year_range(request.years)?;
    validate_contributions(&request.contributions)?;
    validate_returns(&request.returns, library)?;
    validate_tax(&request.tax)?;
    ensure(
        growth_rate(request.inflation_rate),
        "inflationRate",
        "must be > -1",
    )
}

pub fn validate_withdrawal_config(config: &WithdrawalConfig) -> SimulationResult<()> {
    match config.strategy {
        WithdrawalStrategy::FixedPercentOfInitial { rate }
        | WithdrawalStrategy::PercentOfCurrent { rate } => {
            ensure(fraction(rate), "strategy.rate", "must be between 0 and 1")?
        }
        WithdrawalStrategy::FixedMonthlyReal { monthly_amount } => ensure(
            non_negative(monthly_amount),
            "strategy.monthlyAmount",
            "must be >= 0",
        )?,
        WithdrawalStrategy::DynamicGuardrails(g) => {
            ensure(fraction(g.base_rate), "strategy.baseRate", "must be between 0 and 1")?;
            ensure(
                non_negative(g.upper_adjustment) && non_negative(g.lower_adjustment),
                "strategy.adjustments",
                "adjustments must be >= 0",
            )?;
            ensure(
                non_negative(g.lower_threshold)
                    && g.upper_threshold.is_finite()
                    && g.lower_threshold < g.upper_threshold,
                "strategy.thresholds",
                "lowerThreshold must be >= 0 and below upperThreshold",
            )?;
        }
    }

    ensure(
        growth_rate(config.inflation.rate),
        "inflation.rate",
        "must be > -1",
    )?;
    ensure(
        config.start_year.checked_add(MAX_WITHDRAWAL_YEARS - 1).is_some(),
        "startYear",
        "leaves no room for the withdrawal horizon",
    )?;
    if let Horizon::EndYear { year } = config.horizon {
        ensure(
            year >= config.start_year,
            "horizon.year",
            "must not be before startYear",
        )?;
        ensure(
            year - config.start_year < MAX_WITHDRAWAL_YEARS,
            "horizon.year",
            "must not be more than 150 years after startYear",
        )?;
    }
    ensure(
        fraction(config.income_tax.personal_rate),
        "incomeTax.personalRate",
        "must be between 0 and 1",
    )?;
    ensure(
        non_negative(config.income_tax.basic_allowance),
        "incomeTax.basicAllowance",
        "must be >= 0",
    )?;
    ensure(
        growth_rate(config.income_tax.basic_allowance_increase),
        "incomeTax.basicAllowanceIncrease",
        "must be > -1",
    )?;
    if let Some(insurance) = &config.health_insurance {
        ensure(
            non_negative(insurance.annual_amount),
            "healthInsurance.annualAmount",
            "must be >= 0",
        )?;
        ensure(
            growth_rate(insurance.annual_increase),
            "healthInsurance.annualIncrease",
            "must be > -1",
        )?;
    }
    Ok(())
}

pub fn validate_income(income: &IncomeSources) -> SimulationResult<()> {
    if let Some(pension) = &income.pension {
        ensure(
            non_negative(pension.gross_monthly),
            "income.pension.grossMonthly",
            "must be >= 0",
        )?;
        ensure(
            growth_rate(pension.annual_increase),
            "income.pension.annualIncrease",
            "must be > -1",
        )?;
        ensure(
            pension.taxable_share.is_none_or(fraction),
            "income.pension.taxableShare",
            "must be between 0 and 1",
        )?;
    }
    for entry in &income.other {
        ensure(
            non_negative(entry.monthly_amount),
            "income.other.monthlyAmount",
            "must be >= 0",
        )?;
        ensure(
            entry.tax_rate.is_finite() && (0.0..1.0).contains(&entry.tax_rate),
            "income.other.taxRate",
            "must be in [0, 1)",
        )?;
        ensure(
            growth_rate(entry.inflation_rate),
            "income.other.inflationRate",
            "must be > -1",
        )?;
        if let Some(end) = entry.end_year {
            ensure(
                end >= entry.start_year,
                "income.other.endYear",
                "must not be before startYear",
            )?;
        }
    }
    Ok(())
}

pub fn validate_withdrawal(
    request: &WithdrawalRequest,
    library: &HistoricalLibrary,
) -> SimulationResult<()> {
    ensure(
        non_negative(request.starting_capital),
        "startingCapital",
        "must be >= 0",
    )?;
    validate_withdrawal_config(&request.config)?;
    validate_returns(&request.returns, library)?;
    validate_tax(&request.tax)?;
    validate_income(&request.income)
}
