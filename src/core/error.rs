use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SimulationError {
    #[error("invalid configuration: {field} - {reason}")]
    InvalidConfiguration { field: String, reason: String },

    #[error("no return rate configured for year {year}")]
    MissingYearRate { year: u32 },

    #[error("historical index '{index}' has no data for year {year}")]
    MissingHistoricalData { index: String, year: u32 },

    #[error("no reference rate configured for year {year}")]
    MissingReferenceRate { year: u32 },

    #[error("monte carlo batch cancelled after {completed_trials} trials")]
    Cancelled { completed_trials: u32 },
}

impl SimulationError {
    pub fn invalid(field: &str, reason: impl Into<String>) -> Self {
        SimulationError::InvalidConfiguration {
            field: field.to_string(),
            reason: reason.into(),
        }
    }

    /// Whether the failure was detected before any simulation work began.
    pub fn is_configuration_error(&self) -> bool {
        matches!(self, SimulationError::InvalidConfiguration { .. })
    }
}

pub type SimulationResult<T> = Result<T, SimulationError>;
