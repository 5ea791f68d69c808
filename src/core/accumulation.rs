use tracing::{debug, warn};

use super::error::SimulationResult;
use super::history::HistoricalLibrary;
use super::returns::{ReturnSchedule, fractional_growth};
use super::tax::{AllowanceLedger, TaxInput};
use super::types::{
    AccumulationRequest, AccumulationResult, Contribution, CostModel, ElementKind,
    NegativeCapitalPolicy, PeriodFrequency, PhaseYear, SimulationElement, YearResult,
};
use super::validate::validate_accumulation;

/// Longest savings phase a single request may simulate.
pub const MAX_ACCUMULATION_YEARS: u32 = 150;

pub fn run_accumulation(request: &AccumulationRequest) -> SimulationResult<AccumulationResult> {
    run_accumulation_with(request, HistoricalLibrary::builtin())
}

pub fn run_accumulation_with(
    request: &AccumulationRequest,
    library: &HistoricalLibrary,
) -> SimulationResult<AccumulationResult> {
    validate_accumulation(request, library)?;

    let mut elements = materialize_elements(request);
    let mut schedule = ReturnSchedule::new(&request.returns, request.years.start, library)?;
    let mut allowances = AllowanceLedger::new(&request.tax);
    debug!(
        elements = elements.len(),
        start = request.years.start,
        end = request.years.end,
        "running accumulation phase"
    );

    let mut ledger = Vec::with_capacity((request.years.end - request.years.start) as usize + 1);
    for year in request.years.years() {
        let rate = schedule.rate(year)?;
        let mut row = PhaseYear {
            year,
            rate,
            allowance_available: request.tax.allowance_for(year).max(0.0),
            ..PhaseYear::default()
        };

        // Ascending id order decides who gets the shared allowance first.
        for element in elements.iter_mut().filter(|e| e.start_year <= year) {
            let result = advance_element(element, year, rate, request, &mut allowances)?;
            row.start_capital += result.start_capital;
            row.contributions += result.contribution;
            row.investment_gain += result.investment_gain;
            row.costs += result.costs;
            row.tax_paid += result.tax_paid;
            row.allowance_used += result.allowance_used;
            row.advance_taxable_amount += result.advance_taxable_amount;
            row.end_capital += result.end_capital;
            element.years.insert(year, result);
        }

        let elapsed = (year - request.years.start + 1) as i32;
        row.end_capital_real = row.end_capital / (1.0 + request.inflation_rate).powi(elapsed);
        ledger.push(row);
    }

    let final_capital = ledger.last().map(|row| row.end_capital).unwrap_or(0.0);
    Ok(AccumulationResult {
        elements,
        ledger,
        final_capital,
    })
}

/// Share of the first calendar year a position invested in `month` is held.
fn held_fraction(month: u32) -> f64 {
    f64::from(13 - month.clamp(1, 12)) / 12.0
}

fn advance_element(
    element: &SimulationElement,
    year: u32,
    rate: f64,
    request: &AccumulationRequest,
    allowances: &mut AllowanceLedger<'_>,
) -> SimulationResult<YearResult> {
    let previous = element.years.values().next_back().copied();
    let start_capital = previous.map_or(0.0, |p| p.end_capital);

    let (contribution, transaction_cost, held) = match previous {
        None => {
            let cost = element.costs.transaction_cost(element.principal);
            (element.principal - cost, cost, held_fraction(element.start_month))
        }
        Some(_) => (0.0, 0.0, 1.0),
    };

    let invested = start_capital + contribution;
    let gross_gain = invested * fractional_growth(rate, held);
    let ongoing_cost = (invested + gross_gain).max(0.0) * element.costs.ongoing_cost_ratio * held;
    let investment_gain = gross_gain - ongoing_cost;

    let outcome = allowances.charge(
        TaxInput {
            gain: investment_gain,
            basis_capital: invested,
            held_fraction: held,
        },
        year,
    )?;

    let mut end_capital = invested + investment_gain;
    if request.tax.tax_paid_from_capital {
        end_capital -= outcome.tax_paid;
    }
    if end_capital < 0.0 && request.negative_capital == NegativeCapitalPolicy::Clamp {
        warn!(element = element.id, year, end_capital, "clamping negative capital to zero");
        end_capital = 0.0;
    }

    Ok(YearResult {
        start_capital,
        contribution,
        investment_gain,
        costs: transaction_cost + ongoing_cost,
        tax_paid: outcome.tax_paid,
        allowance_used: outcome.allowance_used,
        advance_taxable_amount: outcome.advance_taxable_amount,
        advance_taxable_amount_accumulated: previous
            .map_or(0.0, |p| p.advance_taxable_amount_accumulated)
            + outcome.advance_taxable_amount,
        end_capital,
    })
}

struct Installment {
    kind: ElementKind,
    year: u32,
    month: u32,
    amount: f64,
    costs: CostModel,
}

/// Expands the contribution plan into positions, numbered in creation order.
fn materialize_elements(request: &AccumulationRequest) -> Vec<SimulationElement> {
    let range = request.years;
    let mut installments = Vec::new();

    for contribution in &request.contributions {
        match contribution {
            Contribution::SavingsPlan(plan) => {
                let last = plan.end_year.unwrap_or(range.end).min(range.end);
                for year in plan.start_year.max(range.start)..=last {
                    let annual = plan.annual_amount
                        * (1.0 + plan.annual_increase).powi((year - plan.start_year) as i32);
                    let first_month = if year == plan.start_year {
                        plan.start_month.clamp(1, 12)
                    } else {
                        1
                    };
                    match request.frequency {
                        PeriodFrequency::Yearly => installments.push(Installment {
                            kind: ElementKind::SavingsPlanInstallment,
                            year,
                            month: first_month,
                            amount: annual * held_fraction(first_month),
                            costs: plan.costs,
                        }),
                        PeriodFrequency::Monthly => {
                            installments.extend((first_month..=12).map(|month| Installment {
                                kind: ElementKind::SavingsPlanInstallment,
                                year,
                                month,
                                amount: annual / 12.0,
                                costs: plan.costs,
                            }))
                        }
                    }
                }
            }
            Contribution::LumpSum(lump) => {
                if range.contains(lump.year) {
                    installments.push(Installment {
                        kind: ElementKind::LumpSum,
                        year: lump.year,
                        month: lump.month,
                        amount: lump.amount,
                        costs: lump.costs,
                    });
                } else {
                    warn!(year = lump.year, "lump sum outside the simulated years is ignored");
                }
            }
        }
    }

    installments
        .into_iter()
        .enumerate()
        .map(|(id, installment)| SimulationElement {
            id: id as u32,
            kind: installment.kind,
            start_year: installment.year,
            start_month: installment.month,
            principal: installment.amount,
            costs: installment.costs,
            years: Default::default(),
        })
        .collect()
}
