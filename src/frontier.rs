//! # Efficient Frontier
//!
//! $$
//! \delta_j = 10^{\,a + (b-a)\,j/(m-1)},\qquad
//! \mathbf w^\*(\delta_j) = \arg\max_{\mathbf w \in \mathcal W}\ \mathbf w^\top\mu - \tfrac{\delta_j}{2}\mathbf w^\top\Sigma\mathbf w
//! $$
//!

use nalgebra::DVector;
use tracing::info;

use crate::data::ReturnsMatrix;
use crate::engine::OptimizationEngine;
use crate::error::PortfolioError;
use crate::error::Result;
use crate::numeric::log_space;
use crate::objective::MeanVariance;
use crate::risk::RiskModel;
use crate::types::FrontierRow;

#[derive(Clone, Debug, PartialEq)]
pub struct FrontierConfig {
  pub n_points: usize,
  pub min_risk_aversion: f64,
  pub max_risk_aversion: f64,
  /// Weights above this count as positions.
  pub position_threshold: f64,
}

impl Default for FrontierConfig {
  fn default() -> Self {
    Self {
      n_points: 20,
      min_risk_aversion: 1e-2,
      max_risk_aversion: 1e2,
      position_threshold: 0.01,
    }
  }
}

impl FrontierConfig {
  pub fn risk_aversions(&self) -> Result<Vec<f64>> {
    if !(self.min_risk_aversion > 0.0 && self.max_risk_aversion >= self.min_risk_aversion) {
      return Err(PortfolioError::InvalidParameter(format!(
        "risk aversion grid [{}, {}] must be positive and ordered",
        self.min_risk_aversion, self.max_risk_aversion
      )));
    }
    Ok(log_space(self.min_risk_aversion, self.max_risk_aversion, self.n_points))
  }
}

/// Sweep mean-variance risk aversion, one fresh objective per grid point.
///
/// The covariance is estimated once; `expected_returns` overrides the sample mean
/// (e.g. with Black-Litterman posterior returns).
pub fn efficient_frontier<R: RiskModel>(
  engine: &mut OptimizationEngine<R>,
  returns: &ReturnsMatrix,
  config: &FrontierConfig,
  expected_returns: Option<&DVector<f64>>,
) -> Result<Vec<FrontierRow>> {
  let grid = config.risk_aversions()?;
  let cov = engine.estimate_covariance(returns)?;
  info!(points = grid.len(), assets = returns.n_assets(), "sweeping efficient frontier");

  let mut rows = Vec::with_capacity(grid.len());
  for delta in grid {
    let objective = match expected_returns {
      Some(mu) => MeanVariance::new(delta).with_expected_returns(mu.clone()),
      None => MeanVariance::new(delta),
    };
    let res = engine.optimize_with_covariance(returns, &cov, &objective, None)?;

    rows.push(FrontierRow::new(
      delta,
      res.metrics.expected_return,
      res.metrics.volatility,
      res.metrics.sharpe,
      res.max_weight(),
      res.positions_above(config.position_threshold),
    ));
  }

  info!(points = rows.len(), "efficient frontier complete");
  Ok(rows)
}
