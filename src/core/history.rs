//! Read-only reference tables: annual index returns for historical replay and
//! the published base rate used for the advance levy. The built-in tables are
//! built once per process and never mutated afterwards.

use std::collections::{BTreeMap, HashMap};
use std::sync::OnceLock;

use super::error::{SimulationError, SimulationResult};

const DAX_ANNUAL_RETURNS: &[(u32, f64)] = &[
    (2000, -0.0754),
    (2001, -0.1979),
    (2002, -0.4394),
    (2003, 0.3708),
    (2004, 0.0734),
    (2005, 0.2707),
    (2006, 0.2198),
    (2007, 0.2229),
    (2008, -0.4037),
    (2009, 0.2385),
    (2010, 0.1606),
    (2011, -0.1469),
    (2012, 0.2906),
    (2013, 0.2548),
    (2014, 0.0265),
    (2015, 0.0956),
    (2016, 0.0687),
    (2017, 0.1251),
    (2018, -0.1826),
    (2019, 0.2548),
    (2020, 0.0355),
    (2021, 0.1579),
    (2022, -0.1235),
    (2023, 0.2031),
    (2024, 0.1885),
];

const MSCI_WORLD_ANNUAL_RETURNS: &[(u32, f64)] = &[
    (2000, -0.1320),
    (2001, -0.1680),
    (2002, -0.1990),
    (2003, 0.3310),
    (2004, 0.1470),
    (2005, 0.0950),
    (2006, 0.2010),
    (2007, 0.0900),
    (2008, -0.4070),
    (2009, 0.3000),
    (2010, 0.1180),
    (2011, -0.0550),
    (2012, 0.1580),
    (2013, 0.2670),
    (2014, 0.0490),
    (2015, -0.0090),
    (2016, 0.0750),
    (2017, 0.2240),
    (2018, -0.0870),
    (2019, 0.2770),
    (2020, 0.1590),
    (2021, 0.2180),
    (2022, -0.1810),
    (2023, 0.2380),
    (2024, 0.1870),
];

// Basiszins published by the Bundesbank for the advance levy.
const BASE_RATES: &[(u32, f64)] = &[
    (2018, 0.0087),
    (2019, 0.0052),
    (2020, 0.0007),
    (2021, -0.0045),
    (2022, -0.0005),
    (2023, 0.0255),
    (2024, 0.0229),
    (2025, 0.0253),
];

#[derive(Debug, Clone, Default, PartialEq)]
pub struct HistoricalLibrary {
    series: HashMap<String, BTreeMap<u32, f64>>,
}

impl HistoricalLibrary {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn builtin() -> &'static HistoricalLibrary {
        static BUILTIN: OnceLock<HistoricalLibrary> = OnceLock::new();
        BUILTIN.get_or_init(|| {
            HistoricalLibrary::empty()
                .with_series("dax", DAX_ANNUAL_RETURNS.iter().copied().collect())
                .with_series(
                    "msci-world",
                    MSCI_WORLD_ANNUAL_RETURNS.iter().copied().collect(),
                )
        })
    }

    pub fn with_series(mut self, index: &str, returns: BTreeMap<u32, f64>) -> Self {
        self.series.insert(normalize(index), returns);
        self
    }

    pub fn contains(&self, index: &str) -> bool {
        self.series.contains_key(&normalize(index))
    }

    pub fn series(&self, index: &str) -> Option<&BTreeMap<u32, f64>> {
        self.series.get(&normalize(index))
    }

    pub fn year_range(&self, index: &str) -> Option<(u32, u32)> {
        let series = self.series(index)?;
        let first = *series.keys().next()?;
        let last = *series.keys().next_back()?;
        Some((first, last))
    }

    pub fn indices(&self) -> Vec<&str> {
        let mut ids = self.series.keys().map(String::as_str).collect::<Vec<_>>();
        ids.sort_unstable();
        ids
    }

    pub fn rate(&self, index: &str, year: u32) -> SimulationResult<f64> {
        self.series(index)
            .and_then(|series| series.get(&year).copied())
            .ok_or_else(|| SimulationError::MissingHistoricalData {
                index: index.to_string(),
                year,
            })
    }
}

pub fn builtin_reference_rates() -> &'static BTreeMap<u32, f64> {
    static RATES: OnceLock<BTreeMap<u32, f64>> = OnceLock::new();
    RATES.get_or_init(|| BASE_RATES.iter().copied().collect())
}

fn normalize(index: &str) -> String {
    index.trim().to_ascii_lowercase().replace(['_', ' '], "-")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_library_exposes_both_indices() {
        let lib = HistoricalLibrary::builtin();
        assert_eq!(lib.indices(), vec!["dax", "msci-world"]);
        assert_eq!(lib.year_range("DAX"), Some((2000, 2024)));
        assert_eq!(lib.year_range("msci_world"), Some((2000, 2024)));
    }

    #[test]
    fn rate_outside_series_fails_instead_of_wrapping() {
        let lib = HistoricalLibrary::builtin();
        assert!((lib.rate("dax", 2008).unwrap() + 0.4037).abs() < 1e-12);
        assert_eq!(
            lib.rate("dax", 1999),
            Err(SimulationError::MissingHistoricalData {
                index: "dax".to_string(),
                year: 1999,
            })
        );
        assert!(lib.rate("nikkei", 2010).is_err());
    }

    #[test]
    fn custom_series_do_not_touch_the_builtin_table() {
        let custom = HistoricalLibrary::builtin()
            .clone()
            .with_series("bonds", BTreeMap::from([(2020, 0.01)]));
        assert!(custom.contains("bonds"));
        assert!(!HistoricalLibrary::builtin().contains("bonds"));
    }

    #[test]
    fn reference_rates_cover_recent_years() {
        let rates = builtin_reference_rates();
        assert_eq!(rates.get(&2023), Some(&0.0255));
        assert!(rates.get(&2021).copied().unwrap() < 0.0);
    }
}
