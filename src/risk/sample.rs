//! # Shrunk Sample Covariance
//!
//! $$
//! \hat\Sigma_\lambda = (1-\lambda)\,S + \lambda\,\frac{\operatorname{tr} S}{N} I
//! $$
//!

use nalgebra::DMatrix;

use crate::data::ReturnsMatrix;
use crate::error::PortfolioError;
use crate::error::Result;
use crate::numeric::sample_covariance;
use crate::risk::RiskModel;

/// Sample covariance over a trailing window, shrunk towards the average-variance identity.
#[derive(Clone, Debug, PartialEq)]
pub struct SampleCovariance {
  lookback: usize,
  shrinkage: f64,
}

impl Default for SampleCovariance {
  fn default() -> Self {
    Self {
      lookback: 252,
      shrinkage: 0.1,
    }
  }
}

impl SampleCovariance {
  pub fn new(lookback: usize, shrinkage: f64) -> Result<Self> {
    if !(0.0..=1.0).contains(&shrinkage) {
      return Err(PortfolioError::InvalidParameter(format!(
        "shrinkage intensity must lie in [0, 1], got {shrinkage}"
      )));
    }
    if lookback < 2 {
      return Err(PortfolioError::InvalidParameter(format!(
        "lookback must be at least 2, got {lookback}"
      )));
    }

    Ok(Self {
      lookback,
      shrinkage,
    })
  }

  pub fn lookback(&self) -> usize {
    self.lookback
  }

  pub fn shrinkage(&self) -> f64 {
    self.shrinkage
  }

  /// Scaled identity `tr(S)/N * I`.
  pub fn target(sample: &DMatrix<f64>) -> DMatrix<f64> {
    let n = sample.nrows();
    if n == 0 {
      return DMatrix::zeros(0, 0);
    }
    DMatrix::identity(n, n) * (sample.trace() / n as f64)
  }
}

impl RiskModel for SampleCovariance {
  fn name(&self) -> &'static str {
    "sample-shrinkage"
  }

  fn estimate_covariance(&self, returns: &ReturnsMatrix) -> Result<DMatrix<f64>> {
    let window = returns.tail(self.lookback);
    if window.n_obs() < 2 {
      return Err(PortfolioError::insufficient("sample covariance", 2, window.n_obs()));
    }

    let sample = sample_covariance(window.values());
    let target = Self::target(&sample);

    Ok(sample * (1.0 - self.shrinkage) + target * self.shrinkage)
  }
}
