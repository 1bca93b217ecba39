//! # Mean-Variance
//!
//! $$
//! f(\mathbf w) = -\left(\mathbf w^\top \mu - \tfrac{\delta}{2}\,\mathbf w^\top \Sigma \mathbf w\right),
//! \qquad \nabla f = -(\mu - \delta\,\Sigma \mathbf w)
//! $$
//!

use nalgebra::DMatrix;
use nalgebra::DVector;

use crate::data::ReturnsMatrix;
use crate::error::PortfolioError;
use crate::error::Result;
use crate::objective::Differentiation;
use crate::objective::Objective;

/// Quadratic utility with risk aversion `delta`.
///
/// Expected returns default to the sample mean of the supplied returns; an
/// explicit vector (e.g. Black-Litterman posterior returns) overrides it.
#[derive(Clone, Debug, PartialEq)]
pub struct MeanVariance {
  risk_aversion: f64,
  expected_returns: Option<DVector<f64>>,
}

impl Default for MeanVariance {
  fn default() -> Self {
    Self::new(1.0)
  }
}

impl MeanVariance {
  pub fn new(risk_aversion: f64) -> Self {
    Self {
      risk_aversion,
      expected_returns: None,
    }
  }

  pub fn with_expected_returns(mut self, mu: DVector<f64>) -> Self {
    self.expected_returns = Some(mu);
    self
  }

  pub fn risk_aversion(&self) -> f64 {
    self.risk_aversion
  }

  fn mu(&self, returns: &ReturnsMatrix) -> DVector<f64> {
    match &self.expected_returns {
      Some(mu) => mu.clone(),
      None => returns.mean_returns(),
    }
  }

  /// `w^T mu - delta/2 * w^T Sigma w`.
  pub fn utility(&self, weights: &DVector<f64>, returns: &ReturnsMatrix, cov: &DMatrix<f64>) -> f64 {
    let mu = self.mu(returns);
    let variance = weights.dot(&(cov * weights));
    weights.dot(&mu) - 0.5 * self.risk_aversion * variance
  }
}

impl Objective for MeanVariance {
  fn name(&self) -> &'static str {
    "mean-variance"
  }

  fn value(&self, weights: &DVector<f64>, returns: &ReturnsMatrix, cov: &DMatrix<f64>) -> f64 {
    -self.utility(weights, returns, cov)
  }

  fn gradient(&self, weights: &DVector<f64>, returns: &ReturnsMatrix, cov: &DMatrix<f64>) -> DVector<f64> {
    let mu = self.mu(returns);
    -(mu - cov * weights * self.risk_aversion)
  }

  fn differentiation(&self) -> Differentiation {
    Differentiation::Analytic
  }

  fn validate(&self, returns: &ReturnsMatrix, _cov: &DMatrix<f64>) -> Result<()> {
    if !(self.risk_aversion.is_finite() && self.risk_aversion >= 0.0) {
      return Err(PortfolioError::InvalidParameter(format!(
        "risk aversion must be finite and non-negative, got {}",
        self.risk_aversion
      )));
    }
    if let Some(mu) = &self.expected_returns {
      if mu.len() != returns.n_assets() {
        return Err(PortfolioError::mismatch("expected returns", returns.n_assets(), mu.len()));
      }
    }
    Ok(())
  }
}
