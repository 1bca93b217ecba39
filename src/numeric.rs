//! # Numeric helpers
//!
//! $$
//! \hat\Sigma = \frac{1}{T-1}(X-\bar X)^\top (X-\bar X)
//! $$
//!
//! Small statistics and linear-algebra routines shared by the risk models,
//! objectives and metrics.

use nalgebra::DMatrix;
use nalgebra::DVector;
use statrs::statistics::Statistics;

pub(crate) fn sample_mean(xs: &[f64]) -> f64 {
  if xs.is_empty() {
    0.0
  } else {
    xs.iter().mean()
  }
}

/// Unbiased sample variance, 0 for fewer than two observations.
pub(crate) fn sample_variance(xs: &[f64]) -> f64 {
  if xs.len() < 2 {
    0.0
  } else {
    xs.iter().variance()
  }
}

pub(crate) fn sample_std(xs: &[f64]) -> f64 {
  sample_variance(xs).max(0.0).sqrt()
}

/// Linear interpolation between closest ranks on an ascending slice.
pub(crate) fn quantile_sorted(sorted: &[f64], q: f64) -> f64 {
  match sorted.len() {
    0 => 0.0,
    1 => sorted[0],
    n => {
      let pos = q.clamp(0.0, 1.0) * (n - 1) as f64;
      let lo = pos.floor() as usize;
      let hi = (lo + 1).min(n - 1);
      let frac = pos - lo as f64;
      sorted[lo] + frac * (sorted[hi] - sorted[lo])
    }
  }
}

pub(crate) fn sorted_copy(xs: &[f64]) -> Vec<f64> {
  let mut out = xs.to_vec();
  out.sort_by(f64::total_cmp);
  out
}

/// Historical value-at-risk and conditional value-at-risk at tail probability `alpha`.
///
/// Both are returned as (signed) returns: the `alpha`-quantile and the mean of all
/// observations at or below it.
pub(crate) fn historical_var_cvar(xs: &[f64], alpha: f64) -> (f64, f64) {
  if xs.is_empty() {
    return (0.0, 0.0);
  }

  let sorted = sorted_copy(xs);
  let var = quantile_sorted(&sorted, alpha);
  let tail: Vec<f64> = sorted.iter().copied().filter(|&r| r <= var).collect();
  let cvar = if tail.is_empty() { var } else { sample_mean(&tail) };

  (var, cvar)
}

/// Column means of a `T x N` observation matrix.
pub(crate) fn column_means(data: &DMatrix<f64>) -> DVector<f64> {
  DVector::from_iterator(
    data.ncols(),
    data.column_iter().map(|c| sample_mean(c.as_slice())),
  )
}

/// Unbiased sample covariance of the columns of a `T x N` observation matrix.
pub(crate) fn sample_covariance(data: &DMatrix<f64>) -> DMatrix<f64> {
  let (t, n) = data.shape();
  if t < 2 {
    return DMatrix::zeros(n, n);
  }

  let means = column_means(data);
  let mut centered = data.clone();
  for (j, mut col) in centered.column_iter_mut().enumerate() {
    col.add_scalar_mut(-means[j]);
  }

  let cov = centered.transpose() * &centered / (t - 1) as f64;
  symmetrize(&cov)
}

pub(crate) fn symmetrize(m: &DMatrix<f64>) -> DMatrix<f64> {
  (m + m.transpose()) * 0.5
}

pub(crate) fn min_eigenvalue(m: &DMatrix<f64>) -> f64 {
  if m.is_empty() {
    return 0.0;
  }
  symmetrize(m).symmetric_eigenvalues().min()
}

/// Largest peak-to-trough loss of the compounded path `prod(1 + r_t)`, as a non-positive number.
pub(crate) fn max_drawdown(returns: &[f64]) -> f64 {
  let mut cumulative = 1.0;
  let mut running_max = f64::NEG_INFINITY;
  let mut worst = 0.0_f64;

  for &r in returns {
    cumulative *= 1.0 + r;
    running_max = running_max.max(cumulative);
    if running_max > 0.0 {
      worst = worst.min((cumulative - running_max) / running_max);
    }
  }

  worst
}

/// Log-spaced grid of `n` points between `lo` and `hi` inclusive.
pub(crate) fn log_space(lo: f64, hi: f64, n: usize) -> Vec<f64> {
  match n {
    0 => Vec::new(),
    1 => vec![lo],
    _ => {
      let (a, b) = (lo.log10(), hi.log10());
      (0..n)
        .map(|i| 10f64.powf(a + (b - a) * i as f64 / (n - 1) as f64))
        .collect()
    }
  }
}

#[cfg(test)]
mod tests {
  use approx::assert_abs_diff_eq;

  use super::*;

  #[test]
  fn quantile_interpolates_like_linear_percentile() {
    let xs = sorted_copy(&[4.0, 1.0, 3.0, 2.0, 5.0]);
    assert_abs_diff_eq!(quantile_sorted(&xs, 0.5), 3.0, epsilon = 1e-12);
    assert_abs_diff_eq!(quantile_sorted(&xs, 0.05), 1.2, epsilon = 1e-12);
    assert_abs_diff_eq!(quantile_sorted(&xs, 1.0), 5.0, epsilon = 1e-12);
  }

  #[test]
  fn cvar_averages_tail_at_or_below_var() {
    let xs: Vec<f64> = (1..=20).map(|i| i as f64 - 10.0).collect();
    let (var, cvar) = historical_var_cvar(&xs, 0.05);

    assert_abs_diff_eq!(var, -8.05, epsilon = 1e-12);
    assert_abs_diff_eq!(cvar, -9.0, epsilon = 1e-12);
  }

  #[test]
  fn sample_covariance_matches_hand_computation() {
    let data = DMatrix::from_row_slice(3, 2, &[1.0, 2.0, 2.0, 4.0, 3.0, 9.0]);
    let cov = sample_covariance(&data);

    assert_abs_diff_eq!(cov[(0, 0)], 1.0, epsilon = 1e-12);
    assert_abs_diff_eq!(cov[(0, 1)], 3.5, epsilon = 1e-12);
    assert_abs_diff_eq!(cov[(1, 0)], 3.5, epsilon = 1e-12);
    assert_abs_diff_eq!(cov[(1, 1)], 13.0, epsilon = 1e-12);
  }

  #[test]
  fn drawdown_tracks_running_peak() {
    let dd = max_drawdown(&[0.1, -0.5, 0.2]);
    assert_abs_diff_eq!(dd, -0.5, epsilon = 1e-12);
    assert_eq!(max_drawdown(&[0.01, 0.02]), 0.0);
  }

  #[test]
  fn log_space_hits_both_ends() {
    let grid = log_space(1e-2, 1e2, 5);
    assert_eq!(grid.len(), 5);
    assert_abs_diff_eq!(grid[0], 1e-2, epsilon = 1e-12);
    assert_abs_diff_eq!(grid[2], 1.0, epsilon = 1e-12);
    assert_abs_diff_eq!(grid[4], 1e2, epsilon = 1e-9);
  }
}
