//! # Constraints
//!
//! $$
//! \mathcal W = \{ \mathbf w : \mathbf 1^\top \mathbf w = 1,\ l_i \le w_i \le \min(u_i, c) \},
//! \qquad \lVert \mathbf w \rVert_1 \le L
//! $$
//!
//! Declarative bounds and limits, plus the exact Euclidean projection onto the
//! budget, box and gross-exposure set that the solver composes with every objective.
//!
//! Sector bounds and the turnover cap are carried and reported but not imposed on
//! the solve.

use crate::error::PortfolioError;
use crate::error::Result;

const PROJECTION_ITERS: usize = 200;

/// Aggregate weight bounds for a named group of assets.
#[derive(Clone, Debug, PartialEq)]
pub struct SectorLimit {
  pub name: String,
  pub members: Vec<String>,
  pub min: f64,
  pub max: f64,
}

/// Realised exposure of one sector against its limit.
#[derive(Clone, Debug, PartialEq)]
pub struct SectorExposure {
  pub name: String,
  pub exposure: f64,
  pub breached: bool,
}

/// Immutable allocation constraints for an `n`-asset universe.
#[derive(Clone, Debug, PartialEq)]
pub struct Constraints {
  lower: Vec<f64>,
  upper: Vec<f64>,
  max_concentration: Option<f64>,
  max_leverage: Option<f64>,
  sectors: Vec<SectorLimit>,
  max_turnover: Option<f64>,
  long_only: bool,
  malformed: Option<String>,
}

impl Constraints {
  /// Weights in `[0, 1]` summing to one.
  pub fn long_only(n: usize) -> Self {
    Self {
      lower: vec![0.0; n],
      upper: vec![1.0; n],
      max_concentration: None,
      max_leverage: None,
      sectors: Vec::new(),
      max_turnover: None,
      long_only: true,
      malformed: None,
    }
  }

  /// Weights in `[-1, 1]` summing to one with gross exposure at most `max_leverage`.
  pub fn with_leverage(n: usize, max_leverage: f64) -> Self {
    Self {
      lower: vec![-1.0; n],
      upper: vec![1.0; n],
      max_leverage: Some(max_leverage),
      long_only: false,
      ..Self::long_only(n)
    }
  }

  /// Per-asset bounds; an out-of-range `asset` is reported by [`Self::validate`].
  pub fn bounds(mut self, asset: usize, min: f64, max: f64) -> Self {
    if asset < self.lower.len() {
      self.lower[asset] = min;
      self.upper[asset] = max;
    } else if self.malformed.is_none() {
      self.malformed = Some(format!(
        "bounds given for asset {asset} in a universe of {} assets",
        self.lower.len()
      ));
    }
    self
  }

  pub fn uniform_bounds(mut self, min: f64, max: f64) -> Self {
    self.lower.iter_mut().for_each(|l| *l = min);
    self.upper.iter_mut().for_each(|u| *u = max);
    self
  }

  pub fn max_concentration(mut self, limit: f64) -> Self {
    self.max_concentration = Some(limit);
    self
  }

  pub fn sector(mut self, limit: SectorLimit) -> Self {
    self.sectors.push(limit);
    self
  }

  pub fn max_turnover(mut self, limit: f64) -> Self {
    self.max_turnover = Some(limit);
    self
  }

  pub fn n_assets(&self) -> usize {
    self.lower.len()
  }

  pub fn lower(&self) -> &[f64] {
    &self.lower
  }

  pub fn upper(&self) -> &[f64] {
    &self.upper
  }

  pub fn is_long_only(&self) -> bool {
    self.long_only
  }

  pub fn leverage_limit(&self) -> Option<f64> {
    self.max_leverage
  }

  pub fn concentration_limit(&self) -> Option<f64> {
    self.max_concentration
  }

  pub fn turnover_limit(&self) -> Option<f64> {
    self.max_turnover
  }

  pub fn sectors(&self) -> &[SectorLimit] {
    &self.sectors
  }

  /// Upper bound after applying the single-position concentration cap.
  pub fn effective_upper(&self) -> Vec<f64> {
    match self.max_concentration {
      Some(c) => self.upper.iter().map(|&u| u.min(c)).collect(),
      None => self.upper.clone(),
    }
  }

  /// Reject bounds that are inconsistent or that leave no fully invested portfolio.
  pub fn validate(&self) -> Result<()> {
    if let Some(reason) = &self.malformed {
      return Err(PortfolioError::InvalidConstraints(reason.clone()));
    }

    for (i, (&lo, &hi)) in self.lower.iter().zip(self.upper.iter()).enumerate() {
      if !lo.is_finite() || !hi.is_finite() {
        return Err(PortfolioError::InvalidConstraints(format!(
          "non-finite bounds for asset {i}"
        )));
      }
      if lo > hi {
        return Err(PortfolioError::InvalidConstraints(format!(
          "asset {i}: min weight {lo} exceeds max weight {hi}"
        )));
      }
    }

    if let Some(c) = self.max_concentration {
      if c <= 0.0 {
        return Err(PortfolioError::InvalidConstraints(format!(
          "max concentration must be positive, got {c}"
        )));
      }
    }

    if let Some(l) = self.max_leverage {
      if !l.is_finite() || l < 1.0 {
        return Err(PortfolioError::InvalidConstraints(format!(
          "leverage limit {l} cannot hold a fully invested portfolio"
        )));
      }
      let forced_long: f64 = self.lower.iter().map(|&lo| lo.max(0.0)).sum();
      let forced_short: f64 = self.upper.iter().map(|&hi| (-hi).max(0.0)).sum();
      let min_gross = (1.0 + 2.0 * forced_short).max(2.0 * forced_long - 1.0);
      if !self.long_only && min_gross > l + 1e-12 {
        return Err(PortfolioError::InvalidConstraints(format!(
          "bounds force gross exposure {min_gross} above leverage limit {l}"
        )));
      }
    }

    for s in &self.sectors {
      if s.min > s.max {
        return Err(PortfolioError::InvalidConstraints(format!(
          "sector {}: min {} exceeds max {}",
          s.name, s.min, s.max
        )));
      }
    }

    let upper = self.effective_upper();
    if let Some(i) = (0..upper.len()).find(|&i| self.lower[i] > upper[i]) {
      return Err(PortfolioError::InvalidConstraints(format!(
        "asset {i}: min weight {} exceeds concentration cap {}",
        self.lower[i], upper[i]
      )));
    }

    let lo_sum: f64 = self.lower.iter().sum();
    let hi_sum: f64 = upper.iter().sum();
    if lo_sum > 1.0 + 1e-12 || hi_sum < 1.0 - 1e-12 {
      return Err(PortfolioError::InvalidConstraints(format!(
        "budget infeasible: bounds admit total weight in [{lo_sum}, {hi_sum}]"
      )));
    }

    Ok(())
  }

  /// Exposure of every configured sector for `weights` over `assets`.
  pub fn sector_exposures(&self, assets: &[String], weights: &[f64]) -> Vec<SectorExposure> {
    self
      .sectors
      .iter()
      .map(|s| {
        let exposure: f64 = assets
          .iter()
          .zip(weights.iter())
          .filter(|(a, _)| s.members.contains(a))
          .map(|(_, w)| w)
          .sum();
        SectorExposure {
          name: s.name.clone(),
          exposure,
          breached: exposure < s.min - 1e-9 || exposure > s.max + 1e-9,
        }
      })
      .collect()
  }

  pub(crate) fn feasible_set(&self) -> FeasibleSet {
    FeasibleSet {
      lower: self.lower.clone(),
      upper: self.effective_upper(),
      max_leverage: if self.long_only { None } else { self.max_leverage },
    }
  }
}

/// Budget-and-box polytope with an optional gross exposure cap.
#[derive(Clone, Debug)]
pub(crate) struct FeasibleSet {
  lower: Vec<f64>,
  upper: Vec<f64>,
  max_leverage: Option<f64>,
}

/// Projected point with the local structure of the projection.
#[derive(Clone, Debug)]
pub(crate) struct Projection {
  pub weights: Vec<f64>,
  /// Coordinates strictly inside their bounds and away from zero when the cap binds.
  pub free: Vec<bool>,
  /// Signs of the free coordinates when the gross exposure cap binds.
  pub signs: Option<Vec<f64>>,
}

fn soft_threshold(z: f64, mu: f64) -> f64 {
  z.signum() * (z.abs() - mu).max(0.0)
}

fn gross(w: &[f64]) -> f64 {
  w.iter().map(|x| x.abs()).sum()
}

fn budget_error(w: &[f64]) -> f64 {
  (w.iter().sum::<f64>() - 1.0).abs()
}

impl FeasibleSet {
  pub fn dim(&self) -> usize {
    self.lower.len()
  }

  pub fn max_leverage(&self) -> Option<f64> {
    self.max_leverage
  }

  /// `clamp(soft(x - nu, mu), l, u)` coordinatewise.
  fn shrink(&self, x: &[f64], nu: f64, mu: f64) -> Vec<f64> {
    x.iter()
      .enumerate()
      .map(|(i, &xi)| soft_threshold(xi - nu, mu).clamp(self.lower[i], self.upper[i]))
      .collect()
  }

  fn free_mask(&self, x: &[f64], nu: f64, mu: f64) -> Vec<bool> {
    (0..x.len())
      .map(|i| {
        let z = x[i] - nu;
        let shifted = soft_threshold(z, mu);
        z.abs() > mu && shifted > self.lower[i] && shifted < self.upper[i]
      })
      .collect()
  }

  /// Budget multiplier `nu` for a fixed exposure multiplier `mu`.
  ///
  /// `nu` is bracketed by bisection and then solved exactly on the free set.
  fn fit_budget(&self, x: &[f64], mu: f64) -> (f64, Vec<f64>) {
    let n = self.dim();
    let budget = |nu: f64| self.shrink(x, nu, mu).iter().sum::<f64>() - 1.0;

    let mut lo = (0..n).map(|i| x[i] - self.upper[i] - mu).fold(f64::INFINITY, f64::min);
    let mut hi = (0..n).map(|i| x[i] - self.lower[i] + mu).fold(f64::NEG_INFINITY, f64::max);

    for _ in 0..PROJECTION_ITERS {
      let mid = 0.5 * (lo + hi);
      if budget(mid) > 0.0 {
        lo = mid;
      } else {
        hi = mid;
      }
      if hi - lo <= f64::EPSILON * (1.0 + hi.abs()) {
        break;
      }
    }

    let nu = 0.5 * (lo + hi);
    let w = self.shrink(x, nu, mu);
    let free = self.free_mask(x, nu, mu);
    let n_free = free.iter().filter(|&&f| f).count();
    if n_free == 0 {
      return (nu, w);
    }

    let fixed: f64 = (0..n).filter(|&i| !free[i]).map(|i| w[i]).sum();
    let moving: f64 = (0..n)
      .filter(|&i| free[i])
      .map(|i| x[i] - mu * (x[i] - nu).signum())
      .sum();
    let exact = (moving + fixed - 1.0) / n_free as f64;
    let candidate = self.shrink(x, exact, mu);
    if budget_error(&candidate) <= budget_error(&w) {
      (exact, candidate)
    } else {
      (nu, w)
    }
  }

  /// Euclidean projection onto `{sum(w) = 1, l <= w <= u, sum(|w|) <= L}`.
  ///
  /// The solution is `clamp(soft(x - nu, mu), l, u)`: `nu` restores the budget and
  /// `mu >= 0` is the smallest exposure multiplier that brings gross exposure to `L`.
  /// Gross exposure is non-increasing in `mu`, so `mu` is found by bisection and then
  /// solved exactly together with `nu` on the free set.
  pub fn project(&self, x: &[f64]) -> Projection {
    let (nu, w) = self.fit_budget(x, 0.0);
    let limit = match self.max_leverage {
      Some(limit) if gross(&w) > limit => limit,
      _ => {
        return Projection {
          free: self.free_mask(x, nu, 0.0),
          weights: w,
          signs: None,
        }
      }
    };

    let mut lo = 0.0;
    let mut hi = 1.0;
    let mut best = self.fit_budget(x, hi);
    for _ in 0..PROJECTION_ITERS {
      if gross(&best.1) <= limit {
        break;
      }
      lo = hi;
      hi *= 2.0;
      best = self.fit_budget(x, hi);
    }

    for _ in 0..PROJECTION_ITERS {
      let mid = 0.5 * (lo + hi);
      let fit = self.fit_budget(x, mid);
      if gross(&fit.1) > limit {
        lo = mid;
      } else {
        hi = mid;
        best = fit;
      }
      if hi - lo <= f64::EPSILON * (1.0 + hi) {
        break;
      }
    }

    let mut mu = hi;
    let (mut nu, mut w) = best;

    // Both multipliers are linear on a fixed free set with fixed signs.
    let free = self.free_mask(x, nu, mu);
    let n_free = free.iter().filter(|&&f| f).count() as f64;
    if n_free > 0.0 {
      let signs: Vec<f64> = (0..x.len()).map(|i| (x[i] - nu).signum()).collect();
      let (mut s, mut xs, mut sx, mut fixed, mut fixed_abs) = (0.0, 0.0, 0.0, 0.0, 0.0);
      for i in 0..x.len() {
        if free[i] {
          s += signs[i];
          xs += x[i];
          sx += signs[i] * x[i];
        } else {
          fixed += w[i];
          fixed_abs += w[i].abs();
        }
      }
      let a = xs - (1.0 - fixed);
      let b = sx - (limit - fixed_abs);
      let det = n_free * n_free - s * s;
      if det > 1e-12 {
        let exact_nu = (n_free * a - s * b) / det;
        let exact_mu = (n_free * b - s * a) / det;
        if exact_mu >= 0.0 {
          let candidate = self.shrink(x, exact_nu, exact_mu);
          if budget_error(&candidate) <= budget_error(&w).max(1e-12)
            && gross(&candidate) <= limit + 1e-12
          {
            nu = exact_nu;
            mu = exact_mu;
            w = candidate;
          }
        }
      }
    }

    let free = self.free_mask(x, nu, mu);
    let signs = (0..x.len()).map(|i| if free[i] { w[i].signum() } else { 0.0 }).collect();
    Projection {
      weights: w,
      free,
      signs: Some(signs),
    }
  }
}

impl Projection {
  /// Product with the (symmetric) Jacobian of [`FeasibleSet::project`] at this point.
  ///
  /// On the free coordinates this removes the budget direction and, when the exposure
  /// cap binds, the direction of the free signs.
  pub fn tangent(&self, v: &[f64]) -> Vec<f64> {
    let n_free = self.free.iter().filter(|&&f| f).count();
    if n_free == 0 {
      return vec![0.0; v.len()];
    }

    let mut out: Vec<f64> = v
      .iter()
      .zip(self.free.iter())
      .map(|(&x, &f)| if f { x } else { 0.0 })
      .collect();

    let mean = out.iter().sum::<f64>() / n_free as f64;
    for (o, &f) in out.iter_mut().zip(self.free.iter()) {
      if f {
        *o -= mean;
      }
    }

    if let Some(signs) = &self.signs {
      let s_mean = signs.iter().sum::<f64>() / n_free as f64;
      let dir: Vec<f64> = signs
        .iter()
        .zip(self.free.iter())
        .map(|(&s, &f)| if f { s - s_mean } else { 0.0 })
        .collect();
      let norm2: f64 = dir.iter().map(|d| d * d).sum();
      if norm2 > 1e-12 {
        let dot: f64 = out.iter().zip(dir.iter()).map(|(o, d)| o * d).sum();
        for (o, d) in out.iter_mut().zip(dir.iter()) {
          *o -= dot / norm2 * d;
        }
      }
    }
    out
  }
}
