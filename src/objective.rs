//! # Objectives
//!
//! $$
//! \min_{\mathbf w \in \mathcal W} f(\mathbf w;\ R, \Sigma)
//! $$
//!
//! Scalar objectives to minimise over portfolio weights, each with a named
//! differentiation strategy.

use std::str::FromStr;

use nalgebra::DMatrix;
use nalgebra::DVector;

use crate::data::ReturnsMatrix;
use crate::error::PortfolioError;
use crate::error::Result;

pub mod cvar;
pub mod gradient;
pub mod mean_variance;
pub mod risk_parity;

pub use cvar::ConditionalValueAtRisk;
pub use gradient::Differentiation;
pub use mean_variance::MeanVariance;
pub use risk_parity::RiskParity;

/// A function of the weights (given returns and covariance) to be minimised.
pub trait Objective {
  fn name(&self) -> &'static str;

  fn value(&self, weights: &DVector<f64>, returns: &ReturnsMatrix, cov: &DMatrix<f64>) -> f64;

  fn gradient(&self, weights: &DVector<f64>, returns: &ReturnsMatrix, cov: &DMatrix<f64>) -> DVector<f64>;

  fn differentiation(&self) -> Differentiation;

  /// Checked once before a solve; rejects inputs the objective cannot use.
  fn validate(&self, _returns: &ReturnsMatrix, _cov: &DMatrix<f64>) -> Result<()> {
    Ok(())
  }
}

/// Closed set of built-in objectives.
#[derive(Clone, Debug, PartialEq)]
pub enum ObjectiveKind {
  MeanVariance(MeanVariance),
  RiskParity(RiskParity),
  CVaR(ConditionalValueAtRisk),
}

impl Default for ObjectiveKind {
  fn default() -> Self {
    Self::MeanVariance(MeanVariance::default())
  }
}

impl FromStr for ObjectiveKind {
  type Err = PortfolioError;

  fn from_str(s: &str) -> Result<Self> {
    match s.to_lowercase().as_str() {
      "mean-variance" | "meanvariance" | "mv" | "markowitz" => Ok(Self::MeanVariance(MeanVariance::default())),
      "risk-parity" | "riskparity" | "rp" => Ok(Self::RiskParity(RiskParity::default())),
      "cvar" | "mean-cvar" | "conditional-value-at-risk" => Ok(Self::CVaR(ConditionalValueAtRisk::default())),
      other => Err(PortfolioError::UnknownMethod(other.to_string())),
    }
  }
}

impl Objective for ObjectiveKind {
  fn name(&self) -> &'static str {
    match self {
      Self::MeanVariance(o) => o.name(),
      Self::RiskParity(o) => o.name(),
      Self::CVaR(o) => o.name(),
    }
  }

  fn value(&self, weights: &DVector<f64>, returns: &ReturnsMatrix, cov: &DMatrix<f64>) -> f64 {
    match self {
      Self::MeanVariance(o) => o.value(weights, returns, cov),
      Self::RiskParity(o) => o.value(weights, returns, cov),
      Self::CVaR(o) => o.value(weights, returns, cov),
    }
  }

  fn gradient(&self, weights: &DVector<f64>, returns: &ReturnsMatrix, cov: &DMatrix<f64>) -> DVector<f64> {
    match self {
      Self::MeanVariance(o) => o.gradient(weights, returns, cov),
      Self::RiskParity(o) => o.gradient(weights, returns, cov),
      Self::CVaR(o) => o.gradient(weights, returns, cov),
    }
  }

  fn differentiation(&self) -> Differentiation {
    match self {
      Self::MeanVariance(o) => o.differentiation(),
      Self::RiskParity(o) => o.differentiation(),
      Self::CVaR(o) => o.differentiation(),
    }
  }

  fn validate(&self, returns: &ReturnsMatrix, cov: &DMatrix<f64>) -> Result<()> {
    match self {
      Self::MeanVariance(o) => o.validate(returns, cov),
      Self::RiskParity(o) => o.validate(returns, cov),
      Self::CVaR(o) => o.validate(returns, cov),
    }
  }
}
