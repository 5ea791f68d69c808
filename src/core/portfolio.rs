use nalgebra::{DMatrix, DVector};
use serde::Serialize;

use super::error::{SimulationError, SimulationResult};
use super::types::{AssetClass, Rebalancing};

const CLASS_ORDER: [AssetClass; 6] = [
    AssetClass::GermanEquities,
    AssetClass::InternationalEquities,
    AssetClass::Bonds,
    AssetClass::RealEstate,
    AssetClass::Commodities,
    AssetClass::Cash,
];

#[rustfmt::skip]
const CORRELATION: [[f64; 6]; 6] = [
    [ 1.0,  0.8, -0.2, 0.5,  0.3, 0.0],
    [ 0.8,  1.0, -0.1, 0.6,  0.3, 0.0],
    [-0.2, -0.1,  1.0, 0.2, -0.1, 0.3],
    [ 0.5,  0.6,  0.2, 1.0,  0.2, 0.0],
    [ 0.3,  0.3, -0.1, 0.2,  1.0, 0.0],
    [ 0.0,  0.0,  0.3, 0.0,  0.0, 1.0],
];

fn matrix_index(class: AssetClass) -> usize {
    CLASS_ORDER
        .iter()
        .position(|c| *c == class)
        .unwrap_or_default()
}

pub fn correlation(a: AssetClass, b: AssetClass) -> f64 {
    CORRELATION[matrix_index(a)][matrix_index(b)]
}

/// Lower Cholesky factor of the correlation matrix restricted to the
/// configured classes, in configuration order.
#[derive(Debug, Clone)]
pub struct CorrelationFactor {
    lower: DMatrix<f64>,
}

impl CorrelationFactor {
    pub fn for_classes(classes: &[AssetClass]) -> SimulationResult<Self> {
        let n = classes.len();
        let matrix = DMatrix::from_fn(n, n, |i, j| correlation(classes[i], classes[j]));
        let cholesky = matrix.cholesky().ok_or_else(|| {
            SimulationError::invalid(
                "returns.classes",
                "correlation matrix of the selected classes is not positive definite",
            )
        })?;
        Ok(Self {
            lower: cholesky.l(),
        })
    }

    pub fn correlate(&self, independent: &[f64]) -> Vec<f64> {
        let z = DVector::from_column_slice(independent);
        (&self.lower * z).iter().copied().collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RebalanceStep {
    pub portfolio_return: f64,
    pub rebalanced: bool,
    pub weights: Vec<f64>,
}

/// Tracks actual class weights across years and resets them to target when
/// the configured policy asks for it.
#[derive(Debug, Clone)]
pub struct Rebalancer {
    targets: Vec<f64>,
    weights: Vec<f64>,
    policy: Rebalancing,
}

impl Rebalancer {
    pub fn new(targets: &[f64], policy: Rebalancing) -> Self {
        let total = targets.iter().sum::<f64>();
        let targets = if total > 0.0 {
            targets.iter().map(|t| t / total).collect::<Vec<_>>()
        } else {
            vec![1.0 / targets.len().max(1) as f64; targets.len()]
        };
        Self {
            weights: targets.clone(),
            targets,
            policy,
        }
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    pub fn max_drift(&self) -> f64 {
        self.weights
            .iter()
            .zip(&self.targets)
            .map(|(w, t)| (w - t).abs())
            .fold(0.0, f64::max)
    }

    pub fn apply(&mut self, class_returns: &[f64]) -> RebalanceStep {
        let portfolio_return = self
            .weights
            .iter()
            .zip(class_returns)
            .map(|(w, r)| w * r)
            .sum::<f64>();

        let growth = 1.0 + portfolio_return;
        if growth > 1e-12 {
            for (w, r) in self.weights.iter_mut().zip(class_returns) {
                *w = (*w * (1.0 + r)).max(0.0) / growth;
            }
        }

        let rebalanced = match self.policy {
            Rebalancing::Annual => true,
            Rebalancing::Threshold { max_drift } => self.max_drift() > max_drift,
            Rebalancing::Never => false,
        };
        if rebalanced {
            self.weights.clone_from(&self.targets);
        }

        RebalanceStep {
            portfolio_return,
            rebalanced,
            weights: self.weights.clone(),
        }
    }
}
