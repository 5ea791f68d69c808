//! Auxiliary retirement income. Everything here is re-derived per year from
//! the static configuration; nothing is carried between calls.

use serde::Serialize;

use super::types::{AmountKind, HealthInsurance, IncomeSources, OtherIncome, StatutoryPension};

/// Taxable share of a statutory pension by the year retirement began.
pub fn pension_taxable_share(cohort_year: u32) -> f64 {
    match cohort_year {
        0..=2005 => 0.50,
        2006..=2020 => 0.50 + 0.02 * f64::from(cohort_year - 2005),
        2021..=2040 => 0.80 + 0.01 * f64::from(cohort_year - 2020),
        _ => 1.0,
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PensionYear {
    pub gross: f64,
    pub taxable: f64,
}

pub fn pension_for_year(pension: &StatutoryPension, year: u32, cohort_year: u32) -> PensionYear {
    if year < pension.start_year {
        return PensionYear::default();
    }
    let elapsed = (year - pension.start_year) as i32;
    let growth = (1.0 + pension.annual_increase).powi(elapsed);
    let gross = (pension.gross_monthly * 12.0 * growth).max(0.0);
    let share = pension
        .taxable_share
        .unwrap_or_else(|| pension_taxable_share(cohort_year))
        .clamp(0.0, 1.0);
    PensionYear {
        gross,
        taxable: gross * share,
    }
}

/// Gross amount of one entry for `year`, zero outside its active range. The
/// entry's tax rate only converts a net amount to gross; the gross amount is
/// taxed with everything else under the personal rules.
pub fn other_income_for_year(entry: &OtherIncome, year: u32) -> f64 {
    let active = year >= entry.start_year && entry.end_year.is_none_or(|end| year <= end);
    if !active {
        return 0.0;
    }

    let elapsed = (year - entry.start_year) as i32;
    let growth = (1.0 + entry.inflation_rate).powi(elapsed);
    let amount = (entry.monthly_amount * 12.0 * growth).max(0.0);
    let rate = entry.tax_rate.clamp(0.0, 1.0);
    match entry.amount_kind {
        AmountKind::Gross => amount,
        AmountKind::Net if rate < 1.0 => amount / (1.0 - rate),
        AmountKind::Net => amount,
    }
}

pub fn health_insurance_for_year(insurance: &HealthInsurance, years_elapsed: u32) -> f64 {
    let growth = (1.0 + insurance.annual_increase).powi(years_elapsed as i32);
    (insurance.annual_amount * growth).max(0.0)
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomeBreakdown {
    pub pension_gross: f64,
    pub pension_taxable: f64,
    pub other_gross: f64,
}

pub fn aggregate_income(
    sources: &IncomeSources,
    year: u32,
    retirement_start_year: u32,
) -> IncomeBreakdown {
    let pension = sources
        .pension
        .as_ref()
        .map(|p| pension_for_year(p, year, retirement_start_year))
        .unwrap_or_default();

    IncomeBreakdown {
        pension_gross: pension.gross,
        pension_taxable: pension.taxable,
        other_gross: sources
            .other
            .iter()
            .map(|entry| other_income_for_year(entry, year))
            .sum(),
    }
}
