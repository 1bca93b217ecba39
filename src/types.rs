//! # Portfolio Types
//!
//! $$
//! \mathbf{w}^\*=\arg\min_{\mathbf{w} \in \mathcal W} f(\mathbf w)
//! $$
//!
//! Result containers shared by the engine, the frontier sweep and the backtest.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::NaiveDate;
use impl_new_derive::ImplNew;
use nalgebra::DMatrix;
use nalgebra::DVector;

use crate::constraints::SectorExposure;
use crate::metrics::PortfolioMetrics;
use crate::metrics::RiskDecomposition;

/// What the solver reports about a run; non-convergence is not an error.
#[derive(Clone, Debug, PartialEq)]
pub struct SolverDiagnostics {
  /// `true` when the solver met its convergence test.
  pub converged: bool,
  /// Termination reason or failure description.
  pub message: String,
  /// Completed solver iterations, also when the run aborted.
  pub iterations: u64,
  pub elapsed: Duration,
  /// Norm of the objective gradient projected onto the feasible directions.
  pub kkt_residual: f64,
  /// Configured sector limits that the solution violates.
  pub sector_breaches: Vec<SectorExposure>,
}

/// Output of one solve. Never mutated after creation.
#[derive(Clone, Debug)]
pub struct OptimizationResult {
  /// Objective that produced the weights.
  pub objective: &'static str,
  pub assets: Vec<String>,
  pub weights: DVector<f64>,
  pub metrics: PortfolioMetrics,
  pub risk: RiskDecomposition,
  pub diagnostics: SolverDiagnostics,
  /// Covariance the solve used.
  pub covariance: DMatrix<f64>,
}

impl OptimizationResult {
  pub fn weight(&self, asset: &str) -> Option<f64> {
    self
      .assets
      .iter()
      .position(|a| a == asset)
      .map(|i| self.weights[i])
  }

  pub fn weights_by_asset(&self) -> BTreeMap<String, f64> {
    self
      .assets
      .iter()
      .cloned()
      .zip(self.weights.iter().copied())
      .collect()
  }

  pub fn max_weight(&self) -> f64 {
    self.weights.iter().copied().fold(f64::NEG_INFINITY, f64::max)
  }

  /// Number of weights strictly above `threshold`.
  pub fn positions_above(&self, threshold: f64) -> usize {
    self.weights.iter().filter(|&&w| w > threshold).count()
  }
}

/// One point of the efficient frontier.
#[derive(ImplNew, Clone, Debug, PartialEq)]
pub struct FrontierRow {
  pub risk_aversion: f64,
  pub expected_return: f64,
  pub volatility: f64,
  pub sharpe: f64,
  pub max_weight: f64,
  pub n_positions: usize,
}

/// One rebalance of the walk-forward backtest.
#[derive(Clone, Debug, PartialEq)]
pub struct BacktestRow {
  pub date: NaiveDate,
  /// Compounded return of the held weights over the following period.
  pub realized_return: f64,
  pub turnover: f64,
  pub max_weight: f64,
  pub n_positions: usize,
  pub concentration: f64,
  /// Weights in asset order.
  pub weights: Vec<f64>,
}
