//! # Black-Litterman
//!
//! $$
//! \begin{aligned}
//! \pi &= \delta\,\Sigma\,\mathbf w_{mkt} \\
//! M &= (\tau\Sigma)^{-1} + P^\top \Omega^{-1} P \\
//! \mu_{BL} &= M^{-1}\left[(\tau\Sigma)^{-1}\pi + P^\top \Omega^{-1} Q\right],
//! \qquad \Sigma_{BL} = \Sigma + M^{-1}
//! \end{aligned}
//! $$
//!
//! Blends market-implied equilibrium returns with absolute and relative views.

use nalgebra::DMatrix;
use nalgebra::DVector;
use tracing::debug;

use crate::error::PortfolioError;
use crate::error::Result;

/// Declared shape of a view.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ViewType {
  /// Return of one asset.
  Absolute,
  /// Return of one asset in excess of another.
  Relative,
}

#[derive(Clone, Debug, PartialEq)]
enum ViewLegs {
  Absolute(String),
  Relative { long: String, short: String },
}

/// One belief about expected returns.
#[derive(Clone, Debug, PartialEq)]
pub struct MarketView {
  legs: ViewLegs,
  expected_return: f64,
  confidence: f64,
}

impl MarketView {
  pub fn absolute(asset: impl Into<String>, expected_return: f64, confidence: f64) -> Self {
    Self {
      legs: ViewLegs::Absolute(asset.into()),
      expected_return,
      confidence,
    }
  }

  /// `long` outperforms `short` by `expected_return`.
  pub fn relative(long: impl Into<String>, short: impl Into<String>, expected_return: f64, confidence: f64) -> Self {
    Self {
      legs: ViewLegs::Relative {
        long: long.into(),
        short: short.into(),
      },
      expected_return,
      confidence,
    }
  }

  /// Build from a declared type and an asset list, rejecting a wrong asset count.
  pub fn from_assets(kind: ViewType, assets: Vec<String>, expected_return: f64, confidence: f64) -> Result<Self> {
    let mut it = assets.into_iter();
    match (kind, it.next(), it.next(), it.next()) {
      (ViewType::Absolute, Some(a), None, None) => Ok(Self::absolute(a, expected_return, confidence)),
      (ViewType::Relative, Some(l), Some(s), None) => Ok(Self::relative(l, s, expected_return, confidence)),
      (kind, ..) => Err(PortfolioError::InvalidView(format!(
        "{kind:?} view needs {} asset(s)",
        if kind == ViewType::Absolute { 1 } else { 2 }
      ))),
    }
  }

  pub fn view_type(&self) -> ViewType {
    match self.legs {
      ViewLegs::Absolute(_) => ViewType::Absolute,
      ViewLegs::Relative { .. } => ViewType::Relative,
    }
  }

  pub fn assets(&self) -> Vec<&str> {
    match &self.legs {
      ViewLegs::Absolute(a) => vec![a.as_str()],
      ViewLegs::Relative { long, short } => vec![long.as_str(), short.as_str()],
    }
  }

  pub fn expected_return(&self) -> f64 {
    self.expected_return
  }

  pub fn confidence(&self) -> f64 {
    self.confidence
  }

  /// Row of the pick matrix over `assets`.
  fn pick_row(&self, assets: &[String]) -> Result<DVector<f64>> {
    let index = |name: &str| {
      assets
        .iter()
        .position(|a| a == name)
        .ok_or_else(|| PortfolioError::InvalidView(format!("unknown asset '{name}'")))
    };

    let mut row = DVector::zeros(assets.len());
    match &self.legs {
      ViewLegs::Absolute(a) => row[index(a)?] = 1.0,
      ViewLegs::Relative { long, short } => {
        let (i, j) = (index(long)?, index(short)?);
        if i == j {
          return Err(PortfolioError::InvalidView(format!(
            "relative view on '{long}' against itself"
          )));
        }
        row[i] = 1.0;
        row[j] = -1.0;
      }
    }
    Ok(row)
  }

  fn validate(&self) -> Result<()> {
    if !self.expected_return.is_finite() {
      return Err(PortfolioError::InvalidView("expected return is not finite".into()));
    }
    if !(0.0..=1.0).contains(&self.confidence) {
      return Err(PortfolioError::InvalidView(format!(
        "confidence {} outside [0, 1]",
        self.confidence
      )));
    }
    Ok(())
  }
}

#[derive(Clone, Debug, PartialEq)]
pub struct BlackLittermanConfig {
  /// Market risk aversion `delta`.
  pub risk_aversion: f64,
  /// Prior uncertainty scale `tau`.
  pub tau: f64,
}

impl Default for BlackLittermanConfig {
  fn default() -> Self {
    Self {
      risk_aversion: 2.5,
      tau: 0.05,
    }
  }
}

/// Prior and blended moments.
#[derive(Clone, Debug, PartialEq)]
pub struct BlackLittermanPosterior {
  pub market_weights: DVector<f64>,
  /// Equilibrium returns `pi`.
  pub implied_returns: DVector<f64>,
  pub expected_returns: DVector<f64>,
  pub covariance: DMatrix<f64>,
}

/// Normalise market capitalisations to weights.
pub fn market_weights(caps: &[f64]) -> Result<DVector<f64>> {
  let total: f64 = caps.iter().sum();
  if caps.iter().any(|c| !c.is_finite() || *c < 0.0) || total <= 0.0 {
    return Err(PortfolioError::InvalidParameter(
      "market capitalisations must be non-negative with a positive total".into(),
    ));
  }
  Ok(DVector::from_iterator(caps.len(), caps.iter().map(|c| c / total)))
}

fn spd_inverse(m: &DMatrix<f64>, what: &str) -> Result<DMatrix<f64>> {
  let inverse = match m.clone().cholesky() {
    Some(chol) => Some(chol.inverse()),
    None => m.clone().try_inverse(),
  };
  inverse
    .filter(|inv| inv.iter().all(|x| x.is_finite()))
    .ok_or_else(|| PortfolioError::SingularMatrix(format!("{what} is not invertible")))
}

#[derive(Clone, Debug, Default)]
pub struct BlackLitterman {
  config: BlackLittermanConfig,
}

impl BlackLitterman {
  pub fn new(config: BlackLittermanConfig) -> Self {
    Self { config }
  }

  pub fn config(&self) -> &BlackLittermanConfig {
    &self.config
  }

  /// `pi = delta * Sigma * w_mkt`.
  pub fn implied_returns(&self, cov: &DMatrix<f64>, market_weights: &DVector<f64>) -> DVector<f64> {
    cov * market_weights * self.config.risk_aversion
  }

  /// Blend the equilibrium prior over `assets` with `views`.
  ///
  /// With no views the prior returns and `cov` come back unchanged.
  pub fn posterior(
    &self,
    cov: &DMatrix<f64>,
    assets: &[String],
    market_weights: &DVector<f64>,
    views: &[MarketView],
  ) -> Result<BlackLittermanPosterior> {
    let n = assets.len();
    if cov.shape() != (n, n) {
      return Err(PortfolioError::mismatch("covariance", n, cov.nrows()));
    }
    if market_weights.len() != n {
      return Err(PortfolioError::mismatch("market weights", n, market_weights.len()));
    }
    if !(self.config.tau > 0.0 && self.config.tau.is_finite()) {
      return Err(PortfolioError::InvalidParameter(format!("tau must be positive, got {}", self.config.tau)));
    }

    let pi = self.implied_returns(cov, market_weights);
    if views.is_empty() {
      return Ok(BlackLittermanPosterior {
        market_weights: market_weights.clone(),
        implied_returns: pi.clone(),
        expected_returns: pi,
        covariance: cov.clone(),
      });
    }

    let k = views.len();
    let mut pick = DMatrix::zeros(k, n);
    let mut q = DVector::zeros(k);
    let mut omega_inv = DVector::zeros(k);
    for (r, view) in views.iter().enumerate() {
      view.validate()?;
      pick.set_row(r, &view.pick_row(assets)?.transpose());
      q[r] = view.expected_return;

      let omega = self.config.tau * view.confidence;
      if omega <= 0.0 {
        return Err(PortfolioError::SingularMatrix(format!(
          "view {r} has zero uncertainty (confidence {})",
          view.confidence
        )));
      }
      omega_inv[r] = 1.0 / omega;
    }

    let prior_precision = spd_inverse(&(cov * self.config.tau), "scaled prior covariance")?;
    let omega_inv = DMatrix::from_diagonal(&omega_inv);
    let pt_omega_inv = pick.transpose() * &omega_inv;

    let precision = &prior_precision + &pt_omega_inv * &pick;
    let posterior_cov_of_mean = spd_inverse(&precision, "posterior precision")?;
    let expected_returns = &posterior_cov_of_mean * (&prior_precision * &pi + &pt_omega_inv * &q);
    let covariance = cov + &posterior_cov_of_mean;
    let covariance = (&covariance + covariance.transpose()) * 0.5;

    debug!(views = k, assets = n, "black-litterman posterior computed");

    Ok(BlackLittermanPosterior {
      market_weights: market_weights.clone(),
      implied_returns: pi,
      expected_returns,
      covariance,
    })
  }
}
