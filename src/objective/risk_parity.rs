//! # Risk Parity
//!
//! $$
//! f(\mathbf w) = \sum_i \left(\frac{w_i (\Sigma \mathbf w)_i}{\mathbf w^\top \Sigma \mathbf w} - \frac1n\right)^2
//! $$
//!

use nalgebra::DMatrix;
use nalgebra::DVector;

use crate::data::ReturnsMatrix;
use crate::objective::gradient::forward_difference;
use crate::objective::Differentiation;
use crate::objective::Objective;

/// Value returned when the portfolio has no variance to apportion.
const DEGENERATE_PENALTY: f64 = 1e10;

/// Equal risk contribution target.
#[derive(Clone, Debug, PartialEq)]
pub struct RiskParity {
  step: f64,
}

impl Default for RiskParity {
  fn default() -> Self {
    Self { step: 1e-8 }
  }
}

impl RiskParity {
  pub fn with_step(step: f64) -> Self {
    Self { step }
  }

  /// Fraction of portfolio variance attributable to each asset.
  pub fn risk_contributions(weights: &DVector<f64>, cov: &DMatrix<f64>) -> Option<DVector<f64>> {
    let sigma_w = cov * weights;
    let variance = weights.dot(&sigma_w);
    if variance.abs() < 1e-30 {
      return None;
    }
    Some(weights.component_mul(&sigma_w) / variance)
  }

  fn evaluate(weights: &DVector<f64>, cov: &DMatrix<f64>) -> f64 {
    let n = weights.len() as f64;
    match Self::risk_contributions(weights, cov) {
      Some(rc) => rc.iter().map(|c| (c - 1.0 / n).powi(2)).sum(),
      None => DEGENERATE_PENALTY,
    }
  }
}

impl Objective for RiskParity {
  fn name(&self) -> &'static str {
    "risk-parity"
  }

  fn value(&self, weights: &DVector<f64>, _returns: &ReturnsMatrix, cov: &DMatrix<f64>) -> f64 {
    Self::evaluate(weights, cov)
  }

  fn gradient(&self, weights: &DVector<f64>, _returns: &ReturnsMatrix, cov: &DMatrix<f64>) -> DVector<f64> {
    forward_difference(|w| Self::evaluate(w, cov), weights, self.step)
  }

  fn differentiation(&self) -> Differentiation {
    Differentiation::ForwardDifference { step: self.step }
  }
}
