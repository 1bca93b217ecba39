//! # Portfolio Metrics
//!
//! $$
//! \mathrm{MRC}_i = (\Sigma\mathbf w)_i, \qquad
//! \mathrm{CRC}_i = w_i (\Sigma\mathbf w)_i, \qquad
//! \sum_i \mathrm{CRC}_i = \mathbf w^\top\Sigma\mathbf w
//! $$
//!
//! Performance statistics and risk attribution for a solved weight vector.

use nalgebra::DMatrix;
use nalgebra::DVector;

use crate::data::ReturnsMatrix;
use crate::numeric::historical_var_cvar;
use crate::numeric::max_drawdown;
use crate::numeric::sample_mean;
use crate::numeric::sample_std;

/// Tail probability of the reported VaR/CVaR.
pub const TAIL_ALPHA: f64 = 0.05;

/// Annualised performance and concentration statistics.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PortfolioMetrics {
  /// Mean periodic portfolio return times periods per year.
  pub expected_return: f64,
  /// `sqrt(w' Sigma w * periods_per_year)`.
  pub volatility: f64,
  pub sharpe: f64,
  pub sortino: f64,
  /// Worst peak-to-trough loss of the compounded path (non-positive).
  pub max_drawdown: f64,
  /// 5th-percentile periodic return scaled by `sqrt(periods_per_year)`.
  pub var_95: f64,
  pub cvar_95: f64,
  /// `sum(w_i^2)`.
  pub concentration: f64,
  pub effective_positions: f64,
  /// Gross exposure `sum(|w_i|)`.
  pub turnover: f64,
}

impl PortfolioMetrics {
  pub fn compute(
    weights: &DVector<f64>,
    returns: &ReturnsMatrix,
    cov: &DMatrix<f64>,
    risk_free: f64,
    periods_per_year: f64,
  ) -> Self {
    let realized = returns.portfolio_returns(weights);
    let expected_return = sample_mean(&realized) * periods_per_year;
    let variance = weights.dot(&(cov * weights)).max(0.0);
    let volatility = (variance * periods_per_year).sqrt();
    let excess = expected_return - risk_free;

    let sharpe = if volatility > 0.0 { excess / volatility } else { 0.0 };

    let downside: Vec<f64> = realized.iter().copied().filter(|&r| r < 0.0).collect();
    let downside_dev = sample_std(&downside) * periods_per_year.sqrt();
    let sortino = if downside.is_empty() || downside_dev <= 0.0 {
      0.0
    } else {
      excess / downside_dev
    };

    let (var, cvar) = historical_var_cvar(&realized, TAIL_ALPHA);
    let concentration = weights.iter().map(|w| w * w).sum::<f64>();

    Self {
      expected_return,
      volatility,
      sharpe,
      sortino,
      max_drawdown: max_drawdown(&realized),
      var_95: var * periods_per_year.sqrt(),
      cvar_95: cvar * periods_per_year.sqrt(),
      concentration,
      effective_positions: if concentration > 0.0 { 1.0 / concentration } else { 0.0 },
      turnover: weights.iter().map(|w| w.abs()).sum(),
    }
  }

  /// Named view for reporting layers.
  pub fn pairs(&self) -> [(&'static str, f64); 10] {
    [
      ("expected_return", self.expected_return),
      ("volatility", self.volatility),
      ("sharpe_ratio", self.sharpe),
      ("sortino_ratio", self.sortino),
      ("max_drawdown", self.max_drawdown),
      ("var_95", self.var_95),
      ("cvar_95", self.cvar_95),
      ("concentration", self.concentration),
      ("effective_n_assets", self.effective_positions),
      ("turnover", self.turnover),
    ]
  }
}

/// Per-asset attribution of portfolio variance.
#[derive(Clone, Debug, PartialEq)]
pub struct RiskDecomposition {
  pub portfolio_variance: f64,
  /// `(Sigma w)_i`.
  pub marginal: DVector<f64>,
  /// `w_i (Sigma w)_i`; sums to the portfolio variance.
  pub component: DVector<f64>,
  /// Component share of variance in percent; sums to 100.
  pub percentage: DVector<f64>,
}

impl RiskDecomposition {
  pub fn compute(weights: &DVector<f64>, cov: &DMatrix<f64>) -> Self {
    let marginal = cov * weights;
    let component = weights.component_mul(&marginal);
    let portfolio_variance = component.sum();
    let percentage = if portfolio_variance.abs() > 0.0 {
      &component * (100.0 / portfolio_variance)
    } else {
      DVector::zeros(weights.len())
    };

    Self {
      portfolio_variance,
      marginal,
      component,
      percentage,
    }
  }
}
