use std::collections::BTreeMap;

use rand::SeedableRng;
use rand::distributions::Distribution;
use rand::rngs::StdRng;
use serde::Serialize;
use statrs::distribution::Normal;

use super::error::{SimulationError, SimulationResult};
use super::history::HistoricalLibrary;
use super::portfolio::{CorrelationFactor, Rebalancer};
use super::types::ReturnConfig;

#[derive(Debug, Clone, PartialEq)]
pub enum PeriodReturn {
    Single(f64),
    /// One rate per configured asset class, in configuration order.
    PerAsset(Vec<f64>),
}

/// A single price path cannot lose more than everything.
fn floor_return(rate: f64) -> f64 {
    rate.max(-1.0)
}

/// Growth over a fraction of a year at a compounding annual rate.
pub fn fractional_growth(annual_rate: f64, fraction: f64) -> f64 {
    if fraction >= 1.0 {
        return annual_rate;
    }
    (1.0 + annual_rate).max(0.0).powf(fraction.max(0.0)) - 1.0
}

/// Produces the raw rate(s) for a year. One instance per run; the random
/// generator inside it is seeded once and never recreated.
pub struct ReturnGenerator<'a> {
    config: &'a ReturnConfig,
    library: &'a HistoricalLibrary,
    rng: StdRng,
    standard_normal: Normal,
    factor: Option<CorrelationFactor>,
}

impl<'a> ReturnGenerator<'a> {
    pub fn new(config: &'a ReturnConfig, library: &'a HistoricalLibrary) -> SimulationResult<Self> {
        let seed = match config {
            ReturnConfig::Random { seed, .. } => *seed,
            ReturnConfig::MultiAsset(multi) => multi.seed,
            _ => None,
        };
        let rng = match seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };

        let standard_normal = Normal::new(0.0, 1.0)
            .map_err(|e| SimulationError::invalid("returns", e.to_string()))?;

        let factor = match config {
            ReturnConfig::MultiAsset(multi) if multi.use_correlation => {
                let classes = multi.classes.iter().map(|c| c.class).collect::<Vec<_>>();
                Some(CorrelationFactor::for_classes(&classes)?)
            }
            _ => None,
        };

        if let ReturnConfig::Historical { index } = config {
            if !library.contains(index) {
                return Err(SimulationError::invalid(
                    "returns.index",
                    format!("unknown historical index '{index}'"),
                ));
            }
        }

        Ok(Self {
            config,
            library,
            rng,
            standard_normal,
            factor,
        })
    }

    pub fn next_return(&mut self, year: u32) -> SimulationResult<PeriodReturn> {
        let config = self.config;
        match config {
            ReturnConfig::Fixed { rate } => Ok(PeriodReturn::Single(*rate)),
            ReturnConfig::Random { mean, std_dev, .. } => {
                let z = self.standard_normal.sample(&mut self.rng);
                Ok(PeriodReturn::Single(floor_return(mean + std_dev * z)))
            }
            ReturnConfig::Variable { rates } => rates
                .get(&year)
                .copied()
                .map(PeriodReturn::Single)
                .ok_or(SimulationError::MissingYearRate { year }),
            ReturnConfig::Historical { index } => self
                .library
                .rate(index, year)
                .map(|rate| PeriodReturn::Single(floor_return(rate))),
            ReturnConfig::MultiAsset(multi) => {
                let independent = multi
                    .classes
                    .iter()
                    .map(|_| self.standard_normal.sample(&mut self.rng))
                    .collect::<Vec<_>>();
                let shocks = match &self.factor {
                    Some(factor) => factor.correlate(&independent),
                    None => independent,
                };
                let rates = multi
                    .classes
                    .iter()
                    .zip(shocks)
                    .map(|(class, z)| floor_return(class.expected_return + class.volatility * z))
                    .collect();
                Ok(PeriodReturn::PerAsset(rates))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledYear {
    pub year: u32,
    pub rate: f64,
    pub asset_returns: Option<Vec<f64>>,
    pub rebalanced: Option<bool>,
}

/// Per-run portfolio rates by calendar year. Years are drawn lazily, strictly
/// in ascending order and exactly once, so every element of a run sees the
/// same rate for the same year.
pub struct ReturnSchedule<'a> {
    generator: ReturnGenerator<'a>,
    rebalancer: Option<Rebalancer>,
    first_year: u32,
    next_year: u32,
    drawn: BTreeMap<u32, ScheduledYear>,
}

impl<'a> ReturnSchedule<'a> {
    pub fn new(
        config: &'a ReturnConfig,
        first_year: u32,
        library: &'a HistoricalLibrary,
    ) -> SimulationResult<Self> {
        let rebalancer = match config {
            ReturnConfig::MultiAsset(multi) => {
                let targets = multi
                    .classes
                    .iter()
                    .map(|c| c.target_allocation)
                    .collect::<Vec<_>>();
                Some(Rebalancer::new(&targets, multi.rebalancing))
            }
            _ => None,
        };

        Ok(Self {
            generator: ReturnGenerator::new(config, library)?,
            rebalancer,
            first_year,
            next_year: first_year,
            drawn: BTreeMap::new(),
        })
    }

    pub fn rate(&mut self, year: u32) -> SimulationResult<f64> {
        if year < self.first_year {
            return Err(SimulationError::MissingYearRate { year });
        }
        while self.next_year <= year && !self.drawn.contains_key(&self.next_year) {
            let entry = self.draw(self.next_year)?;
            self.drawn.insert(entry.year, entry);
            self.next_year = self.next_year.saturating_add(1);
        }
        self.drawn
            .get(&year)
            .map(|entry| entry.rate)
            .ok_or(SimulationError::MissingYearRate { year })
    }

    pub fn drawn(&self) -> impl Iterator<Item = &ScheduledYear> {
        self.drawn.values()
    }

    fn draw(&mut self, year: u32) -> SimulationResult<ScheduledYear> {
        match self.generator.next_return(year)? {
            PeriodReturn::Single(rate) => Ok(ScheduledYear {
                year,
                rate,
                asset_returns: None,
                rebalanced: None,
            }),
            PeriodReturn::PerAsset(returns) => {
                let rebalancer = self.rebalancer.as_mut().ok_or_else(|| {
                    SimulationError::invalid("returns", "per-asset returns without a portfolio")
                })?;
                let step = rebalancer.apply(&returns);
                Ok(ScheduledYear {
                    year,
                    rate: step.portfolio_return,
                    asset_returns: Some(returns),
                    rebalanced: Some(step.rebalanced),
                })
            }
        }
    }
}
