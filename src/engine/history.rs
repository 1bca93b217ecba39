//! # History
//!
//! $$
//! H_{t+1} = \operatorname{evict}(H_t \,\Vert\, r_t)
//! $$
//!
//! Append-only log of solve results owned by one engine.

use std::collections::vec_deque;
use std::collections::VecDeque;

use crate::types::OptimizationResult;

/// Capacity rule for the result log.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HistoryPolicy {
  /// Keep every result.
  Unbounded,
  /// Keep the most recent `n` results, evicting the oldest first.
  Bounded(usize),
}

impl Default for HistoryPolicy {
  fn default() -> Self {
    Self::Bounded(1024)
  }
}

#[derive(Clone, Debug, Default)]
pub struct History {
  policy: HistoryPolicy,
  entries: VecDeque<OptimizationResult>,
}

impl History {
  pub fn new(policy: HistoryPolicy) -> Self {
    Self {
      policy,
      entries: VecDeque::new(),
    }
  }

  pub fn policy(&self) -> HistoryPolicy {
    self.policy
  }

  pub(crate) fn push(&mut self, result: OptimizationResult) {
    if let HistoryPolicy::Bounded(cap) = self.policy {
      if cap == 0 {
        return;
      }
      while self.entries.len() >= cap {
        self.entries.pop_front();
      }
    }
    self.entries.push_back(result);
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  /// Oldest first.
  pub fn iter(&self) -> vec_deque::Iter<'_, OptimizationResult> {
    self.entries.iter()
  }

  pub fn latest(&self) -> Option<&OptimizationResult> {
    self.entries.back()
  }

  pub fn clear(&mut self) {
    self.entries.clear();
  }
}

#[cfg(test)]
mod tests {
  use std::time::Duration;

  use nalgebra::DMatrix;
  use nalgebra::DVector;

  use super::*;
  use crate::metrics::PortfolioMetrics;
  use crate::metrics::RiskDecomposition;
  use crate::types::SolverDiagnostics;

  fn result(tag: f64) -> OptimizationResult {
    let w = DVector::from_vec(vec![tag, 1.0 - tag]);
    let cov = DMatrix::identity(2, 2);
    OptimizationResult {
      objective: "mean-variance",
      assets: vec!["A".into(), "B".into()],
      risk: RiskDecomposition::compute(&w, &cov),
      weights: w,
      metrics: PortfolioMetrics::default(),
      diagnostics: SolverDiagnostics {
        converged: true,
        message: String::new(),
        iterations: 0,
        elapsed: Duration::ZERO,
        kkt_residual: 0.0,
        sector_breaches: Vec::new(),
      },
      covariance: cov,
    }
  }

  #[test]
  fn bounded_log_evicts_oldest() {
    let mut h = History::new(HistoryPolicy::Bounded(2));
    for tag in [0.1, 0.2, 0.3] {
      h.push(result(tag));
    }

    assert_eq!(h.len(), 2);
    assert_eq!(h.iter().next().unwrap().weights[0], 0.2);
    assert_eq!(h.latest().unwrap().weights[0], 0.3);
  }

  #[test]
  fn unbounded_log_keeps_everything() {
    let mut h = History::new(HistoryPolicy::Unbounded);
    for i in 0..1500 {
      h.push(result(i as f64 / 1500.0));
    }
    assert_eq!(h.len(), 1500);
    h.clear();
    assert!(h.is_empty());
  }
}
