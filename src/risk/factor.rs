//! # PCA Factor Model
//!
//! $$
//! \hat\Sigma = D\left(B\,\Phi\,B^\top + \operatorname{diag}(\psi)\right)D,
//! \qquad B = V_k \Lambda_k^{1/2}
//! $$
//!
//! Factors are the leading eigenvectors of the sample correlation matrix. `D` holds
//! the asset volatilities so the reconstruction is expressed in return units.

use impl_new_derive::ImplNew;
use nalgebra::DMatrix;
use nalgebra::DVector;
use tracing::debug;

use crate::data::ReturnsMatrix;
use crate::error::PortfolioError;
use crate::error::Result;
use crate::numeric::column_means;
use crate::numeric::sample_covariance;
use crate::numeric::sample_std;
use crate::numeric::sample_variance;
use crate::numeric::symmetrize;
use crate::risk::RiskFactors;
use crate::risk::RiskModel;

/// Floor on idiosyncratic variance (standardised units).
pub const SPECIFIC_VARIANCE_FLOOR: f64 = 0.01;

/// Principal-component factor model with `n_factors` latent factors.
#[derive(ImplNew, Clone, Debug, PartialEq)]
pub struct FactorModel {
  pub n_factors: usize,
}

impl Default for FactorModel {
  fn default() -> Self {
    Self { n_factors: 3 }
  }
}

/// Everything one fit produces; covariance and factors share it.
struct FactorFit {
  stds: DVector<f64>,
  eigvecs: DMatrix<f64>,
  factors: RiskFactors,
}

/// Eigenpairs ordered by eigenvalue, descending.
///
/// The sort is stable over the eigen-solver's output order, so exactly equal
/// eigenvalues keep that order. Each eigenvector is signed so that its
/// largest-magnitude component is positive.
fn sorted_eigenpairs(corr: &DMatrix<f64>) -> (Vec<f64>, DMatrix<f64>) {
  let eig = symmetrize(corr).symmetric_eigen();
  let n = eig.eigenvalues.len();

  let mut order: Vec<usize> = (0..n).collect();
  order.sort_by(|&a, &b| eig.eigenvalues[b].total_cmp(&eig.eigenvalues[a]));

  let values = order.iter().map(|&i| eig.eigenvalues[i]).collect();
  let mut vectors = DMatrix::zeros(n, n);
  for (dst, &src) in order.iter().enumerate() {
    let col = eig.eigenvectors.column(src);
    let pivot = col
      .iter()
      .copied()
      .fold(0.0_f64, |acc, v| if v.abs() > acc.abs() { v } else { acc });
    let sign = if pivot < 0.0 { -1.0 } else { 1.0 };
    vectors.set_column(dst, &(col * sign));
  }

  (values, vectors)
}

impl FactorModel {
  fn fit(&self, returns: &ReturnsMatrix) -> Result<FactorFit> {
    let (t, n) = returns.values().shape();
    if self.n_factors == 0 {
      return Err(PortfolioError::InvalidParameter(
        "factor model needs at least one factor".into(),
      ));
    }
    if t < 2 {
      return Err(PortfolioError::insufficient("factor model", 2, t));
    }

    let k = self.n_factors.min(n);
    if k < self.n_factors {
      debug!(requested = self.n_factors, assets = n, "capping factor count at asset count");
    }

    let means = column_means(returns.values());
    let stds = DVector::from_iterator(
      n,
      returns
        .values()
        .column_iter()
        .map(|c| sample_std(c.as_slice())),
    );

    // Zero-variance assets stay at zero after standardisation.
    let z = DMatrix::from_fn(t, n, |i, j| {
      if stds[j] > 0.0 {
        (returns.values()[(i, j)] - means[j]) / stds[j]
      } else {
        0.0
      }
    });

    let corr = &z.transpose() * &z / (t - 1) as f64;
    let (values, vectors) = sorted_eigenpairs(&corr);

    let eigvecs = vectors.columns(0, k).into_owned();
    let selected = DVector::from_iterator(k, values.iter().take(k).copied());
    let total: f64 = values.iter().map(|v| v.max(0.0)).sum();
    let explained = selected.map(|v| if total > 0.0 { v.max(0.0) / total } else { 0.0 });

    let loadings = DMatrix::from_fn(n, k, |i, j| eigvecs[(i, j)] * selected[j].max(0.0).sqrt());
    let factor_returns = &z * &eigvecs;

    let residuals = &z - &factor_returns * eigvecs.transpose();
    let specific = DVector::from_iterator(
      n,
      residuals
        .column_iter()
        .map(|c| sample_variance(c.as_slice()).max(SPECIFIC_VARIANCE_FLOOR)),
    );

    Ok(FactorFit {
      stds,
      eigvecs,
      factors: RiskFactors {
        loadings,
        factor_returns,
        eigenvalues: selected,
        explained_variance: explained,
        specific_variance: specific,
      },
    })
  }
}

impl RiskModel for FactorModel {
  fn name(&self) -> &'static str {
    "pca-factor"
  }

  fn estimate_covariance(&self, returns: &ReturnsMatrix) -> Result<DMatrix<f64>> {
    let fit = self.fit(returns)?;

    // B Phi B^T with Phi the covariance of unit-variance factors equals V Cov(F) V^T.
    let factor_cov = sample_covariance(&fit.factors.factor_returns);
    let common = &fit.eigvecs * factor_cov * fit.eigvecs.transpose();
    let corr = common + DMatrix::from_diagonal(&fit.factors.specific_variance);

    let d = DMatrix::from_diagonal(&fit.stds);
    Ok(symmetrize(&(&d * corr * &d)))
  }

  fn risk_factors(&self, returns: &ReturnsMatrix) -> Result<Option<RiskFactors>> {
    Ok(Some(self.fit(returns)?.factors))
  }
}

#[cfg(test)]
mod tests {
  use approx::assert_abs_diff_eq;
  use chrono::NaiveDate;

  use super::*;
  use crate::data::tests::business_days;
  use crate::data::tests::synthetic_returns;

  fn hadamard(i: usize, j: usize) -> f64 {
    if (i & j).count_ones() % 2 == 0 {
      1.0
    } else {
      -1.0
    }
  }

  /// Eight observations of four assets whose sample correlation has eigenvalues
  /// `spectrum` and Hadamard eigenvectors; every asset has volatility 1%.
  fn spectral_returns(spectrum: [f64; 4]) -> ReturnsMatrix {
    let t = 8;
    let values = DMatrix::from_fn(t, 4, |row, asset| {
      let z: f64 = (0..4)
        .map(|f| {
          let u = hadamard(row, f + 1) / (t as f64).sqrt();
          u * ((t - 1) as f64 * spectrum[f]).sqrt() * hadamard(asset, f) / 2.0
        })
        .sum();
      0.0005 + 0.01 * z
    });
    let dates: Vec<NaiveDate> = business_days(t);
    let assets = (0..4).map(|j| format!("F{j}")).collect();
    ReturnsMatrix::new(dates, assets, values).unwrap()
  }

  #[test]
  fn recovers_spectrum_in_descending_order() {
    let returns = spectral_returns([2.5, 1.0, 0.35, 0.15]);
    let factors = FactorModel::new(4).risk_factors(&returns).unwrap().unwrap();

    let expected = [2.5, 1.0, 0.35, 0.15];
    for (got, want) in factors.eigenvalues.iter().zip(expected) {
      assert_abs_diff_eq!(*got, want, epsilon = 1e-9);
    }
    assert_abs_diff_eq!(factors.explained_variance.sum(), 1.0, epsilon = 1e-9);
    assert_eq!(factors.loadings.shape(), (4, 4));
    assert_eq!(factors.factor_returns.shape(), (8, 4));
  }

  #[test]
  fn reconstruction_error_shrinks_with_more_factors() {
    let returns = spectral_returns([2.5, 1.0, 0.35, 0.15]);
    let raw = sample_covariance(returns.values());

    let errors: Vec<f64> = (1..=3)
      .map(|k| {
        let cov = FactorModel::new(k).estimate_covariance(&returns).unwrap();
        (cov - &raw).norm()
      })
      .collect();

    for pair in errors.windows(2) {
      assert!(pair[1] <= pair[0] + 1e-15, "errors not monotone: {errors:?}");
    }
  }

  #[test]
  fn full_rank_model_reproduces_sample_covariance() {
    let returns = synthetic_returns(200, &[0.0; 3], &[0.01, 0.02, 0.015], 13);
    let raw = sample_covariance(returns.values());
    let cov = FactorModel::new(3).estimate_covariance(&returns).unwrap();

    for i in 0..3 {
      for j in 0..3 {
        if i == j {
          assert_abs_diff_eq!(cov[(i, i)], raw[(i, i)] * (1.0 + SPECIFIC_VARIANCE_FLOOR), epsilon = 1e-12);
        } else {
          assert_abs_diff_eq!(cov[(i, j)], raw[(i, j)], epsilon = 1e-12);
        }
      }
    }
  }

  #[test]
  fn specific_variance_is_floored() {
    let returns = synthetic_returns(200, &[0.0; 3], &[0.01; 3], 9);
    let factors = FactorModel::new(3).risk_factors(&returns).unwrap().unwrap();

    assert!(factors
      .specific_variance
      .iter()
      .all(|&v| v >= SPECIFIC_VARIANCE_FLOOR));
  }

  #[test]
  fn loadings_are_sign_normalised() {
    let returns = synthetic_returns(150, &[0.0; 4], &[0.01, 0.02, 0.015, 0.01], 21);
    let factors = FactorModel::new(2).risk_factors(&returns).unwrap().unwrap();

    for col in factors.loadings.column_iter() {
      let pivot = col.iter().copied().fold(0.0_f64, |a, v| if v.abs() > a.abs() { v } else { a });
      assert!(pivot >= 0.0);
    }
  }

  #[test]
  fn zero_factors_is_rejected() {
    let returns = synthetic_returns(60, &[0.0; 2], &[0.01; 2], 1);
    assert!(matches!(
      FactorModel::new(0).estimate_covariance(&returns),
      Err(PortfolioError::InvalidParameter(_))
    ));
  }
}
