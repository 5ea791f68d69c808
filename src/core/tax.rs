use std::collections::BTreeMap;

use serde::Serialize;

use super::error::SimulationResult;
use super::types::{Assessment, IncomeTaxConfig, TaxContext};

/// Share of the base-rate yield that counts as deemed income.
pub const ADVANCE_LEVY_FACTOR: f64 = 0.7;

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct TaxInput {
    pub gain: f64,
    /// Value of the position at the start of the period (after any contribution).
    pub basis_capital: f64,
    /// Share of the calendar year the position was held, in (0, 1].
    pub held_fraction: f64,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaxOutcome {
    pub tax_paid: f64,
    pub allowance_used: f64,
    pub advance_taxable_amount: f64,
    pub remaining_allowance: f64,
}

pub fn advance_taxable_amount(
    gain: f64,
    basis_capital: f64,
    reference_rate: f64,
    held_fraction: f64,
) -> f64 {
    if gain <= 0.0 || basis_capital <= 0.0 || reference_rate <= 0.0 {
        return 0.0;
    }
    let notional_yield =
        basis_capital * reference_rate * ADVANCE_LEVY_FACTOR * held_fraction.clamp(0.0, 1.0);
    gain.min(notional_yield)
}

/// Tax owed on one position for one year. Pure: the caller threads the
/// remaining allowance through successive calls.
pub fn compute_tax(
    input: TaxInput,
    context: &TaxContext,
    year: u32,
    remaining_allowance: f64,
) -> SimulationResult<TaxOutcome> {
    let reference_rate = context.reference_rate_for(year)?;
    let remaining_allowance = remaining_allowance.max(0.0);

    let advance_taxable = advance_taxable_amount(
        input.gain,
        input.basis_capital,
        reference_rate,
        input.held_fraction,
    );
    let taxable_base = advance_taxable * (1.0 - context.exemption_ratio.clamp(0.0, 1.0));
    let gross_tax = taxable_base * context.flat_rate.max(0.0);

    let allowance_used = gross_tax.min(remaining_allowance);
    Ok(TaxOutcome {
        tax_paid: gross_tax - allowance_used,
        allowance_used,
        advance_taxable_amount: advance_taxable,
        remaining_allowance: remaining_allowance - allowance_used,
    })
}

/// Per-run record of how much of each year's allowance is still unused.
#[derive(Debug, Clone)]
pub struct AllowanceLedger<'a> {
    context: &'a TaxContext,
    remaining: BTreeMap<u32, f64>,
}

impl<'a> AllowanceLedger<'a> {
    pub fn new(context: &'a TaxContext) -> Self {
        Self {
            context,
            remaining: BTreeMap::new(),
        }
    }

    pub fn remaining(&self, year: u32) -> f64 {
        self.remaining
            .get(&year)
            .copied()
            .unwrap_or_else(|| self.context.allowance_for(year).max(0.0))
    }

    pub fn used(&self, year: u32) -> f64 {
        self.context.allowance_for(year).max(0.0) - self.remaining(year)
    }

    pub fn charge(&mut self, input: TaxInput, year: u32) -> SimulationResult<TaxOutcome> {
        let outcome = compute_tax(input, self.context, year, self.remaining(year))?;
        self.remaining.insert(year, outcome.remaining_allowance);
        Ok(outcome)
    }
}

pub fn basic_allowance(config: &IncomeTaxConfig, years_elapsed: u32) -> f64 {
    (config.basic_allowance * (1.0 + config.basic_allowance_increase).powi(years_elapsed as i32))
        .max(0.0)
}

pub fn personal_income_tax(taxable_income: f64, basic_allowance: f64, personal_rate: f64) -> f64 {
    (taxable_income - basic_allowance.max(0.0)).max(0.0) * personal_rate.clamp(0.0, 1.0)
}

/// Flat-rate tax on a withdrawal, with the fund's partial exemption applied.
pub fn flat_withdrawal_tax(withdrawal: f64, context: &TaxContext) -> f64 {
    let taxable_share = 1.0 - context.exemption_ratio.clamp(0.0, 1.0);
    withdrawal.max(0.0) * context.flat_rate.max(0.0) * taxable_share
}

pub fn favorable_assessment(flat: f64, personal: f64) -> f64 {
    flat.min(personal)
}

/// Same comparison as [`favorable_assessment`], also naming the winner.
/// Ties go to the flat rate.
pub fn assess(flat: f64, personal: f64) -> (f64, Assessment) {
    if personal < flat {
        (personal, Assessment::PersonalRate)
    } else {
        (flat, Assessment::FlatRate)
    }
}
