//! # Returns Data
//!
//! $$
//! r_{t,i} = \frac{P_{t,i}}{P_{t-1,i}} - 1
//! $$
//!
//! Date-aligned matrix of simple periodic returns and the provider seam that
//! supplies it.

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use chrono::NaiveDate;
use nalgebra::DMatrix;
use nalgebra::DVector;
use tracing::warn;

use crate::error::PortfolioError;
use crate::error::Result;
use crate::numeric::column_means;

/// Convert close prices to simple return series.
pub fn simple_returns_series(closes: &[f64]) -> Vec<f64> {
  closes
    .windows(2)
    .map(|w| if w[0] != 0.0 { w[1] / w[0] - 1.0 } else { 0.0 })
    .collect()
}

/// Ordered-by-date matrix of simple returns, one column per asset, no gaps.
#[derive(Clone, Debug, PartialEq)]
pub struct ReturnsMatrix {
  dates: Vec<NaiveDate>,
  assets: Vec<String>,
  values: DMatrix<f64>,
}

impl ReturnsMatrix {
  /// Build from a `dates.len() x assets.len()` matrix of finite returns.
  pub fn new(dates: Vec<NaiveDate>, assets: Vec<String>, values: DMatrix<f64>) -> Result<Self> {
    if values.nrows() != dates.len() {
      return Err(PortfolioError::mismatch("returns rows", dates.len(), values.nrows()));
    }
    if values.ncols() != assets.len() {
      return Err(PortfolioError::mismatch("returns columns", assets.len(), values.ncols()));
    }
    if dates.windows(2).any(|w| w[0] >= w[1]) {
      return Err(PortfolioError::InvalidParameter(
        "return dates must be strictly increasing".into(),
      ));
    }
    if let Some(k) = values.iter().position(|v| !v.is_finite()) {
      let (t, j) = (k % values.nrows(), k / values.nrows());
      return Err(PortfolioError::InvalidParameter(format!(
        "non-finite return for {} on {}",
        assets[j], dates[t]
      )));
    }

    Ok(Self {
      dates,
      assets,
      values,
    })
  }

  /// Build from per-asset dated series.
  ///
  /// Assets with fewer than `min_history` observations are dropped with a warning,
  /// then any date missing for one of the remaining assets is dropped.
  pub fn from_series(series: Vec<(String, Vec<(NaiveDate, f64)>)>, min_history: usize) -> Result<Self> {
    let mut kept: Vec<(String, BTreeMap<NaiveDate, f64>)> = Vec::with_capacity(series.len());

    for (asset, points) in series {
      let obs: BTreeMap<NaiveDate, f64> = points.into_iter().filter(|(_, r)| r.is_finite()).collect();
      if obs.len() < min_history {
        warn!(
          asset = %asset,
          observations = obs.len(),
          required = min_history,
          "dropping asset with insufficient history"
        );
        continue;
      }
      kept.push((asset, obs));
    }

    if kept.is_empty() {
      return Err(PortfolioError::insufficient("returns universe", 1, 0));
    }

    let mut common: BTreeSet<NaiveDate> = kept[0].1.keys().copied().collect();
    for (_, obs) in kept.iter().skip(1) {
      common.retain(|d| obs.contains_key(d));
    }

    let dates: Vec<NaiveDate> = common.into_iter().collect();
    let values = DMatrix::from_fn(dates.len(), kept.len(), |t, j| kept[j].1[&dates[t]]);
    let assets = kept.into_iter().map(|(a, _)| a).collect();

    Self::new(dates, assets, values)
  }

  /// Build from aligned close-price columns; the first date is consumed by differencing.
  pub fn from_prices(dates: &[NaiveDate], assets: Vec<String>, closes: &[Vec<f64>]) -> Result<Self> {
    if closes.len() != assets.len() {
      return Err(PortfolioError::mismatch("price columns", assets.len(), closes.len()));
    }
    if let Some(bad) = closes.iter().find(|c| c.len() != dates.len()) {
      return Err(PortfolioError::mismatch("price rows", dates.len(), bad.len()));
    }

    let rets: Vec<Vec<f64>> = closes.iter().map(|c| simple_returns_series(c)).collect();
    let t = dates.len().saturating_sub(1);
    let values = DMatrix::from_fn(t, assets.len(), |i, j| rets[j][i]);

    Self::new(dates.iter().skip(1).copied().collect(), assets, values)
  }

  pub fn dates(&self) -> &[NaiveDate] {
    &self.dates
  }

  pub fn assets(&self) -> &[String] {
    &self.assets
  }

  pub fn values(&self) -> &DMatrix<f64> {
    &self.values
  }

  pub fn n_obs(&self) -> usize {
    self.values.nrows()
  }

  pub fn n_assets(&self) -> usize {
    self.values.ncols()
  }

  pub fn is_empty(&self) -> bool {
    self.values.is_empty()
  }

  pub fn asset_index(&self, asset: &str) -> Option<usize> {
    self.assets.iter().position(|a| a == asset)
  }

  pub fn column(&self, asset: &str) -> Option<Vec<f64>> {
    self
      .asset_index(asset)
      .map(|j| self.values.column(j).iter().copied().collect())
  }

  fn rows(&self, start: usize, len: usize) -> Self {
    Self {
      dates: self.dates[start..start + len].to_vec(),
      assets: self.assets.clone(),
      values: self.values.rows(start, len).into_owned(),
    }
  }

  /// The most recent `n` observations (all of them if fewer are available).
  pub fn tail(&self, n: usize) -> Self {
    let len = n.min(self.n_obs());
    self.rows(self.n_obs() - len, len)
  }

  /// Up to `n` observations ending at `date` inclusive.
  pub fn window_ending(&self, date: NaiveDate, n: usize) -> Self {
    let end = self.dates.partition_point(|d| *d <= date);
    let len = n.min(end);
    self.rows(end - len, len)
  }

  /// Observations with `start < date <= end`.
  pub fn between(&self, start: NaiveDate, end: NaiveDate) -> Self {
    let lo = self.dates.partition_point(|d| *d <= start);
    let hi = self.dates.partition_point(|d| *d <= end).max(lo);
    self.rows(lo, hi - lo)
  }

  /// Mean periodic return per asset.
  pub fn mean_returns(&self) -> DVector<f64> {
    column_means(&self.values)
  }

  /// Realised portfolio return per observation for fixed weights.
  pub fn portfolio_returns(&self, weights: &DVector<f64>) -> Vec<f64> {
    (&self.values * weights).iter().copied().collect()
  }
}

/// External collaborator that supplies a date-aligned returns matrix.
pub trait ReturnsProvider {
  fn fetch(&self, assets: &[String], start: NaiveDate, end: NaiveDate) -> anyhow::Result<ReturnsMatrix>;
}

/// Provider over a returns matrix already held in memory.
#[derive(Clone, Debug)]
pub struct InMemoryProvider {
  returns: ReturnsMatrix,
  min_history: usize,
}

impl InMemoryProvider {
  pub fn new(returns: ReturnsMatrix, min_history: usize) -> Self {
    Self {
      returns,
      min_history,
    }
  }
}

impl ReturnsProvider for InMemoryProvider {
  fn fetch(&self, assets: &[String], start: NaiveDate, end: NaiveDate) -> anyhow::Result<ReturnsMatrix> {
    let lo = self.returns.dates.partition_point(|d| *d < start);
    let hi = self.returns.dates.partition_point(|d| *d <= end).max(lo);

    let series = assets
      .iter()
      .map(|asset| {
        let points = match self.returns.asset_index(asset) {
          Some(j) => (lo..hi)
            .map(|t| (self.returns.dates[t], self.returns.values[(t, j)]))
            .collect(),
          None => {
            warn!(asset = %asset, "asset not available from provider");
            Vec::new()
          }
        };
        (asset.clone(), points)
      })
      .collect();

    Ok(ReturnsMatrix::from_series(series, self.min_history)?)
  }
}
