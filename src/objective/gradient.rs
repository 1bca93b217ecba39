//! # Finite-Difference Gradients
//!
//! $$
//! \partial_i f(\mathbf w) \approx \frac{f(\tilde{\mathbf w}^{+}_i) - f(\mathbf w)}{h},
//! \qquad \tilde{\mathbf w}^{+}_i = \frac{\mathbf w + h\,\mathbf e_i}{\mathbf 1^\top(\mathbf w + h\,\mathbf e_i)}
//! $$
//!
//! Perturbed points are rescaled back onto the budget before evaluation. This is
//! not the directional derivative along `e_i`: for a linear `f(w) = c^T w` on the
//! budget it yields `(c_i - c^T w) / (1 + h)`.

use nalgebra::DVector;

/// How an objective produces its gradient.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Differentiation {
  Analytic,
  ForwardDifference { step: f64 },
  CentralDifference { step: f64 },
}

/// `w + step * e_i`, rescaled to sum to one when its sum is not ~0.
pub fn renormalized_perturbation(weights: &DVector<f64>, i: usize, step: f64) -> DVector<f64> {
  let mut w = weights.clone();
  w[i] += step;
  let total = w.sum();
  if total.abs() > f64::EPSILON {
    w /= total;
  }
  w
}

/// Forward differences on renormalised perturbations.
pub fn forward_difference<F>(f: F, weights: &DVector<f64>, step: f64) -> DVector<f64>
where
  F: Fn(&DVector<f64>) -> f64,
{
  let f0 = f(weights);
  DVector::from_fn(weights.len(), |i, _| {
    (f(&renormalized_perturbation(weights, i, step)) - f0) / step
  })
}

/// Central differences on renormalised perturbations.
pub fn central_difference<F>(f: F, weights: &DVector<f64>, step: f64) -> DVector<f64>
where
  F: Fn(&DVector<f64>) -> f64,
{
  DVector::from_fn(weights.len(), |i, _| {
    let up = f(&renormalized_perturbation(weights, i, step));
    let down = f(&renormalized_perturbation(weights, i, -step));
    (up - down) / (2.0 * step)
  })
}
