//! # Walk-forward Backtest
//!
//! $$
//! r_{p,k} = \prod_{t \in (d_k, d_{k+1}]} \left(1 + \mathbf w_k^\top \mathbf r_t\right) - 1,
//! \qquad \mathrm{TO}_k = \lVert \mathbf w_k - \mathbf w_{k-1} \rVert_1,\ \mathbf w_{-1} = \mathbf 0
//! $$
//!
//! Re-optimises on a trailing window at each rebalance date and holds the weights
//! until the next one.

use std::str::FromStr;

use chrono::Datelike;
use chrono::NaiveDate;
use nalgebra::DVector;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::data::ReturnsMatrix;
use crate::engine::OptimizationEngine;
use crate::error::PortfolioError;
use crate::error::Result;
use crate::numeric::max_drawdown;
use crate::numeric::sample_mean;
use crate::numeric::sample_std;
use crate::objective::Objective;
use crate::risk::RiskModel;
use crate::types::BacktestRow;

/// Calendar on which the portfolio is rebalanced.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RebalanceFrequency {
  /// Last trading day of each ISO week.
  Weekly,
  /// Last trading day of each month.
  #[default]
  Monthly,
  /// Last trading day of each calendar quarter.
  Quarterly,
}

impl RebalanceFrequency {
  fn bucket(self, date: NaiveDate) -> (i32, u32) {
    match self {
      Self::Weekly => {
        let week = date.iso_week();
        (week.year(), week.week())
      }
      Self::Monthly => (date.year(), date.month()),
      Self::Quarterly => (date.year(), date.month0() / 3),
    }
  }

  pub fn periods_per_year(self) -> f64 {
    match self {
      Self::Weekly => 52.0,
      Self::Monthly => 12.0,
      Self::Quarterly => 4.0,
    }
  }

  /// Indices of the last date in each calendar bucket.
  pub fn rebalance_indices(self, dates: &[NaiveDate]) -> Vec<usize> {
    (0..dates.len())
      .filter(|&i| i + 1 == dates.len() || self.bucket(dates[i]) != self.bucket(dates[i + 1]))
      .collect()
  }
}

impl FromStr for RebalanceFrequency {
  type Err = PortfolioError;

  fn from_str(s: &str) -> Result<Self> {
    match s.to_lowercase().as_str() {
      "w" | "weekly" => Ok(Self::Weekly),
      "m" | "me" | "monthly" => Ok(Self::Monthly),
      "q" | "qe" | "quarterly" => Ok(Self::Quarterly),
      other => Err(PortfolioError::UnknownMethod(format!("rebalance frequency '{other}'"))),
    }
  }
}

#[derive(Clone, Debug, PartialEq)]
pub struct BacktestConfig {
  /// Trailing observations used at each rebalance.
  pub lookback: usize,
  /// Windows shorter than this are skipped.
  pub min_samples: usize,
  pub frequency: RebalanceFrequency,
  /// Weights above this count as positions.
  pub position_threshold: f64,
}

impl Default for BacktestConfig {
  fn default() -> Self {
    Self {
      lookback: 252,
      min_samples: 50,
      frequency: RebalanceFrequency::Monthly,
      position_threshold: 0.01,
    }
  }
}

fn compounded(returns: &[f64]) -> f64 {
  returns.iter().fold(1.0, |acc, r| acc * (1.0 + r)) - 1.0
}

/// Walk forward through `returns`, re-solving `objective` at every rebalance date.
///
/// The first rebalance happens once `lookback` observations are available. Periods
/// without enough data are skipped with a warning; a rebalance with no later
/// observations to hold it over is not solved.
pub fn run_backtest<R: RiskModel, O: Objective + ?Sized>(
  engine: &mut OptimizationEngine<R>,
  returns: &ReturnsMatrix,
  objective: &O,
  config: &BacktestConfig,
) -> Result<Vec<BacktestRow>> {
  if config.lookback == 0 {
    return Err(PortfolioError::InvalidParameter("backtest lookback must be positive".into()));
  }

  let dates = returns.dates();
  let schedule: Vec<usize> = config
    .frequency
    .rebalance_indices(dates)
    .into_iter()
    .filter(|&i| i + 1 >= config.lookback)
    .collect();

  info!(
    rebalances = schedule.len(),
    objective = objective.name(),
    frequency = ?config.frequency,
    "starting backtest"
  );

  let mut rows = Vec::with_capacity(schedule.len());
  let mut previous: Option<DVector<f64>> = None;
  let mut skipped = 0usize;

  for (k, &i) in schedule.iter().enumerate() {
    let date = dates[i];
    let window = returns.window_ending(date, config.lookback);
    if window.n_obs() < config.min_samples {
      warn!(%date, available = window.n_obs(), required = config.min_samples, "not enough history, skipping rebalance");
      skipped += 1;
      continue;
    }

    let end = schedule.get(k + 1).map_or(dates[dates.len() - 1], |&j| dates[j]);
    let held = returns.between(date, end);
    if held.is_empty() {
      debug!(%date, "no observations after the last rebalance");
      continue;
    }

    let result = match engine.optimize(&window, objective, None) {
      Ok(result) => result,
      Err(err) if err.is_data_insufficiency() => {
        warn!(%date, error = %err, "skipping rebalance");
        skipped += 1;
        continue;
      }
      Err(err) => return Err(err),
    };

    let weights = result.weights;
    let turnover: f64 = match &previous {
      Some(prev) => weights.iter().zip(prev.iter()).map(|(a, b)| (a - b).abs()).sum(),
      None => weights.iter().map(|w| w.abs()).sum(),
    };

    rows.push(BacktestRow {
      date,
      realized_return: compounded(&held.portfolio_returns(&weights)),
      turnover,
      max_weight: weights.iter().copied().fold(f64::NEG_INFINITY, f64::max),
      n_positions: weights.iter().filter(|&&w| w > config.position_threshold).count(),
      concentration: weights.iter().map(|w| w * w).sum(),
      weights: weights.iter().copied().collect(),
    });
    previous = Some(weights);
  }

  info!(rows = rows.len(), skipped, "backtest complete");
  Ok(rows)
}

/// Aggregate performance of a backtest.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BacktestSummary {
  pub periods: usize,
  pub total_return: f64,
  pub annualized_return: f64,
  pub annualized_volatility: f64,
  pub sharpe: f64,
  pub max_drawdown: f64,
  pub average_turnover: f64,
}

impl BacktestSummary {
  /// `periods_per_year` is the number of rebalances per year, see [`RebalanceFrequency::periods_per_year`].
  pub fn from_rows(rows: &[BacktestRow], periods_per_year: f64) -> Self {
    if rows.is_empty() {
      return Self::default();
    }

    let realized: Vec<f64> = rows.iter().map(|r| r.realized_return).collect();
    let turnover: Vec<f64> = rows.iter().map(|r| r.turnover).collect();
    let total_return = compounded(&realized);
    let years = rows.len() as f64 / periods_per_year;
    let annualized_return = if total_return > -1.0 {
      (1.0 + total_return).powf(1.0 / years) - 1.0
    } else {
      -1.0
    };
    let annualized_volatility = sample_std(&realized) * periods_per_year.sqrt();

    Self {
      periods: rows.len(),
      total_return,
      annualized_return,
      annualized_volatility,
      sharpe: if annualized_volatility > 0.0 {
        sample_mean(&realized) * periods_per_year / annualized_volatility
      } else {
        0.0
      },
      max_drawdown: max_drawdown(&realized),
      average_turnover: sample_mean(&turnover),
    }
  }
}
