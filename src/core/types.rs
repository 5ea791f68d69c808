use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::error::{SimulationError, SimulationResult};
use super::history;

fn default_true() -> bool {
    true
}

fn default_month() -> u32 {
    1
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PeriodFrequency {
    #[default]
    #[serde(alias = "annual")]
    Yearly,
    Monthly,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct YearRange {
    pub start: u32,
    pub end: u32,
}

impl YearRange {
    pub fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }

    pub fn years(self) -> std::ops::RangeInclusive<u32> {
        self.start..=self.end
    }

    pub fn contains(self, year: u32) -> bool {
        (self.start..=self.end).contains(&year)
    }
}

/// What happens to a balance that drops below zero before the next period.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NegativeCapitalPolicy {
    #[default]
    Clamp,
    #[serde(alias = "debt", alias = "carryAsDebt")]
    CarryAsDebt,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FundType {
    EquityFund,
    MixedFund,
    RealEstateFund,
    ForeignRealEstateFund,
    Other,
}

impl FundType {
    pub fn exemption_ratio(self) -> f64 {
        match self {
            FundType::EquityFund => 0.30,
            FundType::MixedFund => 0.15,
            FundType::RealEstateFund => 0.60,
            FundType::ForeignRealEstateFund => 0.80,
            FundType::Other => 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaxContext {
    pub flat_rate: f64,
    pub exemption_ratio: f64,
    #[serde(default)]
    pub allowances: BTreeMap<u32, f64>,
    pub default_allowance: f64,
    #[serde(default)]
    pub reference_rates: BTreeMap<u32, f64>,
    #[serde(default)]
    pub default_reference_rate: Option<f64>,
    /// When false the tax is reported but the portfolio keeps compounding on
    /// the untaxed balance.
    #[serde(default = "default_true")]
    pub tax_paid_from_capital: bool,
}

impl TaxContext {
    pub fn german(fund_type: FundType) -> Self {
        Self {
            flat_rate: 0.26375,
            exemption_ratio: fund_type.exemption_ratio(),
            allowances: BTreeMap::new(),
            default_allowance: 1_000.0,
            reference_rates: history::builtin_reference_rates().clone(),
            default_reference_rate: Some(0.0255),
            tax_paid_from_capital: true,
        }
    }

    /// A context under which nothing is ever taxed.
    pub fn tax_free() -> Self {
        Self {
            flat_rate: 0.0,
            exemption_ratio: 0.0,
            allowances: BTreeMap::new(),
            default_allowance: 0.0,
            reference_rates: BTreeMap::new(),
            default_reference_rate: Some(0.0),
            tax_paid_from_capital: true,
        }
    }

    pub fn allowance_for(&self, year: u32) -> f64 {
        self.allowances
            .get(&year)
            .copied()
            .unwrap_or(self.default_allowance)
    }

    pub fn reference_rate_for(&self, year: u32) -> SimulationResult<f64> {
        self.reference_rates
            .get(&year)
            .copied()
            .or(self.default_reference_rate)
            .ok_or(SimulationError::MissingReferenceRate { year })
    }
}

impl Default for TaxContext {
    fn default() -> Self {
        Self::german(FundType::EquityFund)
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AssetClass {
    GermanEquities,
    InternationalEquities,
    Bonds,
    RealEstate,
    Commodities,
    Cash,
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetClassConfig {
    pub class: AssetClass,
    pub target_allocation: f64,
    pub expected_return: f64,
    pub volatility: f64,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum Rebalancing {
    #[default]
    #[serde(alias = "annually", alias = "yearly")]
    Annual,
    Threshold {
        max_drift: f64,
    },
    Never,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MultiAssetConfig {
    pub classes: Vec<AssetClassConfig>,
    #[serde(default = "default_true")]
    pub use_correlation: bool,
    #[serde(default)]
    pub rebalancing: Rebalancing,
    #[serde(default)]
    pub seed: Option<u64>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ReturnConfig {
    Fixed {
        rate: f64,
    },
    Random {
        mean: f64,
        std_dev: f64,
        #[serde(default)]
        seed: Option<u64>,
    },
    Variable {
        rates: BTreeMap<u32, f64>,
    },
    Historical {
        index: String,
    },
    #[serde(alias = "multiAsset")]
    MultiAsset(MultiAssetConfig),
}

impl ReturnConfig {
    pub fn is_stochastic(&self) -> bool {
        matches!(
            self,
            ReturnConfig::Random { .. } | ReturnConfig::MultiAsset(_)
        )
    }

    /// Copy of this configuration with the generator seed replaced. Variants
    /// without randomness are returned unchanged.
    pub fn with_seed(&self, seed: u64) -> Self {
        match self {
            ReturnConfig::Random { mean, std_dev, .. } => ReturnConfig::Random {
                mean: *mean,
                std_dev: *std_dev,
                seed: Some(seed),
            },
            ReturnConfig::MultiAsset(config) => ReturnConfig::MultiAsset(MultiAssetConfig {
                seed: Some(seed),
                ..config.clone()
            }),
            other => other.clone(),
        }
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CostModel {
    /// Ongoing expense ratio (TER) charged on the invested balance.
    pub ongoing_cost_ratio: f64,
    pub transaction_cost_ratio: f64,
    pub transaction_cost_fixed: f64,
}

impl CostModel {
    pub fn transaction_cost(&self, amount: f64) -> f64 {
        if amount <= 0.0 {
            return 0.0;
        }
        (amount * self.transaction_cost_ratio + self.transaction_cost_fixed).min(amount)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavingsPlan {
    pub annual_amount: f64,
    pub start_year: u32,
    #[serde(default = "default_month")]
    pub start_month: u32,
    #[serde(default)]
    pub end_year: Option<u32>,
    #[serde(default)]
    pub annual_increase: f64,
    #[serde(default)]
    pub costs: CostModel,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LumpSum {
    pub amount: f64,
    pub year: u32,
    #[serde(default = "default_month")]
    pub month: u32,
    #[serde(default)]
    pub costs: CostModel,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Contribution {
    #[serde(alias = "savingsPlan")]
    SavingsPlan(SavingsPlan),
    #[serde(alias = "lumpSum")]
    LumpSum(LumpSum),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccumulationRequest {
    pub contributions: Vec<Contribution>,
    pub returns: ReturnConfig,
    #[serde(default)]
    pub tax: TaxContext,
    #[serde(default)]
    pub frequency: PeriodFrequency,
    pub years: YearRange,
    #[serde(default)]
    pub negative_capital: NegativeCapitalPolicy,
    /// Only used to deflate reported balances into today's money.
    #[serde(default)]
    pub inflation_rate: f64,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ElementKind {
    SavingsPlanInstallment,
    LumpSum,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct YearResult {
    pub start_capital: f64,
    pub contribution: f64,
    pub investment_gain: f64,
    pub costs: f64,
    pub tax_paid: f64,
    pub allowance_used: f64,
    pub advance_taxable_amount: f64,
    pub advance_taxable_amount_accumulated: f64,
    pub end_capital: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationElement {
    pub id: u32,
    pub kind: ElementKind,
    pub start_year: u32,
    pub start_month: u32,
    pub principal: f64,
    pub costs: CostModel,
    pub years: BTreeMap<u32, YearResult>,
}

impl SimulationElement {
    pub fn final_capital(&self) -> f64 {
        self.years
            .values()
            .next_back()
            .map(|y| y.end_capital)
            .unwrap_or(0.0)
    }
}

/// Aggregate over every element for one year of the savings phase.
#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseYear {
    pub year: u32,
    pub rate: f64,
    pub start_capital: f64,
    pub contributions: f64,
    pub investment_gain: f64,
    pub costs: f64,
    pub tax_paid: f64,
    pub allowance_used: f64,
    pub allowance_available: f64,
    pub advance_taxable_amount: f64,
    pub end_capital: f64,
    pub end_capital_real: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccumulationResult {
    pub elements: Vec<SimulationElement>,
    pub ledger: Vec<PhaseYear>,
    pub final_capital: f64,
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuardrailsConfig {
    pub base_rate: f64,
    pub upper_threshold: f64,
    pub upper_adjustment: f64,
    pub lower_threshold: f64,
    pub lower_adjustment: f64,
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum WithdrawalStrategy {
    #[serde(alias = "4-percent", alias = "fixedPercentOfInitial")]
    FixedPercentOfInitial { rate: f64 },
    #[serde(alias = "monthly-fixed", alias = "fixedMonthlyReal")]
    FixedMonthlyReal { monthly_amount: f64 },
    #[serde(alias = "variable-percent", alias = "percentOfCurrent")]
    PercentOfCurrent { rate: f64 },
    #[serde(alias = "dynamic", alias = "dynamicGuardrails")]
    DynamicGuardrails(GuardrailsConfig),
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct InflationIndexing {
    pub enabled: bool,
    pub rate: f64,
}

impl Default for InflationIndexing {
    fn default() -> Self {
        Self {
            enabled: false,
            rate: 0.02,
        }
    }
}

impl InflationIndexing {
    pub fn factor(&self, years_elapsed: u32) -> f64 {
        if self.enabled {
            (1.0 + self.rate).powi(years_elapsed as i32)
        } else {
            1.0
        }
    }
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Horizon {
    EndYear {
        year: u32,
    },
    #[default]
    #[serde(alias = "untilDepleted")]
    UntilDepleted,
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct IncomeTaxConfig {
    pub personal_rate: f64,
    pub basic_allowance: f64,
    pub basic_allowance_increase: f64,
    pub favorable_assessment: bool,
}

impl Default for IncomeTaxConfig {
    fn default() -> Self {
        Self {
            personal_rate: 0.18,
            basic_allowance: 11_604.0,
            basic_allowance_increase: 0.0,
            favorable_assessment: false,
        }
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HealthInsurance {
    pub annual_amount: f64,
    pub annual_increase: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawalConfig {
    pub strategy: WithdrawalStrategy,
    #[serde(default)]
    pub inflation: InflationIndexing,
    #[serde(default)]
    pub frequency: PeriodFrequency,
    pub start_year: u32,
    #[serde(default)]
    pub horizon: Horizon,
    #[serde(default)]
    pub income_tax: IncomeTaxConfig,
    #[serde(default)]
    pub health_insurance: Option<HealthInsurance>,
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatutoryPension {
    pub gross_monthly: f64,
    pub start_year: u32,
    #[serde(default)]
    pub annual_increase: f64,
    /// Overrides the cohort-based taxable share when set.
    #[serde(default)]
    pub taxable_share: Option<f64>,
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AmountKind {
    #[default]
    Gross,
    Net,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OtherIncome {
    pub name: String,
    pub monthly_amount: f64,
    #[serde(default)]
    pub amount_kind: AmountKind,
    #[serde(default)]
    pub tax_rate: f64,
    #[serde(default)]
    pub inflation_rate: f64,
    pub start_year: u32,
    #[serde(default)]
    pub end_year: Option<u32>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct IncomeSources {
    pub pension: Option<StatutoryPension>,
    pub other: Vec<OtherIncome>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawalRequest {
    pub starting_capital: f64,
    pub config: WithdrawalConfig,
    pub returns: ReturnConfig,
    #[serde(default)]
    pub tax: TaxContext,
    #[serde(default)]
    pub income: IncomeSources,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum TerminalState {
    Depleted,
    HorizonReached,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum WithdrawalDuration {
    Years(u32),
    Unlimited,
}

/// Which of the two candidate assessments was applied to the withdrawal.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Assessment {
    FlatRate,
    PersonalRate,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawalYear {
    pub year: u32,
    pub start_capital: f64,
    pub withdrawal: f64,
    pub withdrawal_rate: f64,
    pub investment_gain: f64,
    pub investment_tax: f64,
    pub allowance_used: f64,
    pub advance_taxable_amount: f64,
    pub advance_taxable_amount_accumulated: f64,
    pub end_capital: f64,
    pub end_capital_real: f64,
    pub pension_gross: f64,
    pub pension_taxable: f64,
    pub other_income_gross: f64,
    pub health_insurance: f64,
    pub taxable_income: f64,
    pub income_tax: f64,
    pub withdrawal_tax: f64,
    pub assessment: Option<Assessment>,
    pub net_income: f64,
    pub depleted: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawalResult {
    pub initial_capital: f64,
    pub final_capital: f64,
    pub ledger: Vec<WithdrawalYear>,
    pub terminal_state: TerminalState,
    pub duration: WithdrawalDuration,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawalPhase {
    /// Overrides the accumulated capital when set.
    #[serde(default)]
    pub starting_capital: Option<f64>,
    pub config: WithdrawalConfig,
    pub returns: ReturnConfig,
    /// Falls back to the savings-phase tax context.
    #[serde(default)]
    pub tax: Option<TaxContext>,
    #[serde(default)]
    pub income: IncomeSources,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectionRequest {
    pub accumulation: AccumulationRequest,
    pub withdrawal: WithdrawalPhase,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectionResult {
    pub accumulation: AccumulationResult,
    pub withdrawal: WithdrawalResult,
}
