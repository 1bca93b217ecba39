//! # Conditional Value-at-Risk
//!
//! $$
//! \operatorname{CVaR}_\alpha = \mathbb E\left[ r_p \mid r_p \le \operatorname{VaR}_\alpha \right],
//! \qquad f(\mathbf w) = -\operatorname{CVaR}_\alpha
//! $$
//!
//! Historical estimator over the trailing `lookback` observations.

use impl_new_derive::ImplNew;
use nalgebra::DMatrix;
use nalgebra::DVector;

use crate::data::ReturnsMatrix;
use crate::error::PortfolioError;
use crate::error::Result;
use crate::numeric::historical_var_cvar;
use crate::objective::gradient::central_difference;
use crate::objective::Differentiation;
use crate::objective::Objective;

#[derive(ImplNew, Clone, Debug, PartialEq)]
pub struct ConditionalValueAtRisk {
  /// Tail probability.
  pub alpha: f64,
  /// Trailing observations used.
  pub lookback: usize,
  /// Fewer observations than this make the window unusable.
  pub min_samples: usize,
  /// Central-difference step.
  pub step: f64,
}

impl Default for ConditionalValueAtRisk {
  fn default() -> Self {
    Self {
      alpha: 0.05,
      lookback: 252,
      min_samples: 50,
      step: 1e-6,
    }
  }
}

impl ConditionalValueAtRisk {
  /// Historical portfolio returns over the trailing window.
  fn window_returns(&self, weights: &DVector<f64>, returns: &ReturnsMatrix) -> Vec<f64> {
    let values = returns.values();
    let len = self.lookback.min(values.nrows());
    let window = values.rows(values.nrows() - len, len);
    (window * weights).iter().copied().collect()
  }

  /// CVaR (a signed return, typically negative) of the trailing window.
  pub fn cvar(&self, weights: &DVector<f64>, returns: &ReturnsMatrix) -> f64 {
    historical_var_cvar(&self.window_returns(weights, returns), self.alpha).1
  }
}

impl Objective for ConditionalValueAtRisk {
  fn name(&self) -> &'static str {
    "cvar"
  }

  fn value(&self, weights: &DVector<f64>, returns: &ReturnsMatrix, _cov: &DMatrix<f64>) -> f64 {
    -self.cvar(weights, returns)
  }

  fn gradient(&self, weights: &DVector<f64>, returns: &ReturnsMatrix, _cov: &DMatrix<f64>) -> DVector<f64> {
    central_difference(|w| -self.cvar(w, returns), weights, self.step)
  }

  fn differentiation(&self) -> Differentiation {
    Differentiation::CentralDifference { step: self.step }
  }

  fn validate(&self, returns: &ReturnsMatrix, _cov: &DMatrix<f64>) -> Result<()> {
    if !(self.alpha > 0.0 && self.alpha < 1.0) {
      return Err(PortfolioError::InvalidParameter(format!(
        "cvar tail probability must lie in (0, 1), got {}",
        self.alpha
      )));
    }

    let available = self.lookback.min(returns.n_obs());
    if available < self.min_samples {
      return Err(PortfolioError::insufficient("cvar window", self.min_samples, available));
    }
    Ok(())
  }
}
