//! # Risk Models
//!
//! $$
//! \text{returns} \mapsto \Sigma \succeq 0
//! $$
//!
//! Covariance estimators behind a common [`RiskModel`] contract.

use std::str::FromStr;

use nalgebra::DMatrix;
use nalgebra::DVector;

use crate::data::ReturnsMatrix;
use crate::error::PortfolioError;
use crate::error::Result;

pub mod factor;
pub mod sample;

pub use factor::FactorModel;
pub use sample::SampleCovariance;

/// Latent factor decomposition of a returns history.
#[derive(Clone, Debug, PartialEq)]
pub struct RiskFactors {
  /// `N x k` eigenvectors scaled by the square root of their eigenvalue.
  pub loadings: DMatrix<f64>,
  /// `T x k` standardised returns projected on the selected eigenvectors.
  pub factor_returns: DMatrix<f64>,
  /// Selected eigenvalues, descending.
  pub eigenvalues: DVector<f64>,
  /// Share of total standardised variance explained by each selected factor.
  pub explained_variance: DVector<f64>,
  /// Idiosyncratic variance per asset in standardised units, floored.
  pub specific_variance: DVector<f64>,
}

/// Turns a returns history into a covariance matrix over the same assets.
pub trait RiskModel {
  fn name(&self) -> &'static str;

  fn estimate_covariance(&self, returns: &ReturnsMatrix) -> Result<DMatrix<f64>>;

  /// Factor decomposition, for models that have one.
  fn risk_factors(&self, _returns: &ReturnsMatrix) -> Result<Option<RiskFactors>> {
    Ok(None)
  }
}

impl<R: RiskModel + ?Sized> RiskModel for &R {
  fn name(&self) -> &'static str {
    (**self).name()
  }

  fn estimate_covariance(&self, returns: &ReturnsMatrix) -> Result<DMatrix<f64>> {
    (**self).estimate_covariance(returns)
  }

  fn risk_factors(&self, returns: &ReturnsMatrix) -> Result<Option<RiskFactors>> {
    (**self).risk_factors(returns)
  }
}

/// Closed set of built-in risk models.
#[derive(Clone, Debug, PartialEq)]
pub enum RiskModelKind {
  /// Sample covariance shrunk towards a scaled identity.
  Sample(SampleCovariance),
  /// PCA factor model with floored specific variance.
  Factor(FactorModel),
}

impl Default for RiskModelKind {
  fn default() -> Self {
    Self::Sample(SampleCovariance::default())
  }
}

impl FromStr for RiskModelKind {
  type Err = PortfolioError;

  fn from_str(s: &str) -> Result<Self> {
    match s.to_lowercase().as_str() {
      "sample" | "shrinkage" | "sample-covariance" => Ok(Self::Sample(SampleCovariance::default())),
      "factor" | "pca" | "factor-model" => Ok(Self::Factor(FactorModel::default())),
      other => Err(PortfolioError::UnknownMethod(other.to_string())),
    }
  }
}

impl RiskModel for RiskModelKind {
  fn name(&self) -> &'static str {
    match self {
      Self::Sample(m) => m.name(),
      Self::Factor(m) => m.name(),
    }
  }

  fn estimate_covariance(&self, returns: &ReturnsMatrix) -> Result<DMatrix<f64>> {
    match self {
      Self::Sample(m) => m.estimate_covariance(returns),
      Self::Factor(m) => m.estimate_covariance(returns),
    }
  }

  fn risk_factors(&self, returns: &ReturnsMatrix) -> Result<Option<RiskFactors>> {
    match self {
      Self::Sample(m) => m.risk_factors(returns),
      Self::Factor(m) => m.risk_factors(returns),
    }
  }
}
