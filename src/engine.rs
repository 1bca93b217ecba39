//! # Optimization Engine
//!
//! $$
//! \begin{aligned}
//! \min_{\mathbf w}\ & f(\mathbf w) \\
//! \text{s.t. }\ & \mathbf 1^\top \mathbf w = 1,\quad l_i \le w_i \le \min(u_i, c),\quad \lVert \mathbf w \rVert_1 \le L
//! \end{aligned}
//! $$
//!
//! Estimates covariance with a [`RiskModel`], solves for weights against any
//! [`Objective`] passed per call, and attaches metrics and risk attribution.

use std::time::Instant;

use nalgebra::DMatrix;
use nalgebra::DVector;
use tracing::debug;
use tracing::warn;

use crate::constraints::Constraints;
use crate::data::ReturnsMatrix;
use crate::error::PortfolioError;
use crate::error::Result;
use crate::metrics::PortfolioMetrics;
use crate::metrics::RiskDecomposition;
use crate::objective::Objective;
use crate::risk::RiskModel;
use crate::types::OptimizationResult;
use crate::types::SolverDiagnostics;

pub mod history;
mod solver;

pub use history::History;
pub use history::HistoryPolicy;

/// Solver controls and reporting conventions.
#[derive(Clone, Debug, PartialEq)]
pub struct EngineConfig {
  pub max_iters: u64,
  /// Change in cost between iterations below which the solve counts as converged.
  pub ftol: f64,
  /// Gradient norm below which the solve counts as converged.
  pub gtol: f64,
  /// L-BFGS history length.
  pub lbfgs_memory: usize,
  /// Weight of the squared distance between an iterate and its projection.
  pub penalty: f64,
  /// Annual risk-free rate used by Sharpe and Sortino.
  pub risk_free: f64,
  pub periods_per_year: f64,
  pub history: HistoryPolicy,
}

impl Default for EngineConfig {
  fn default() -> Self {
    Self {
      max_iters: 1000,
      ftol: 1e-9,
      gtol: 1e-10,
      lbfgs_memory: 10,
      penalty: 1.0,
      risk_free: 0.0,
      periods_per_year: 252.0,
      history: HistoryPolicy::default(),
    }
  }
}

/// Owns a risk model, the constraints and the log of past results.
#[derive(Debug)]
pub struct OptimizationEngine<R: RiskModel> {
  risk_model: R,
  constraints: Constraints,
  config: EngineConfig,
  history: History,
}

impl<R: RiskModel> OptimizationEngine<R> {
  /// Fails fast on inconsistent constraints.
  pub fn new(risk_model: R, constraints: Constraints, config: EngineConfig) -> Result<Self> {
    constraints.validate()?;
    Ok(Self {
      risk_model,
      constraints,
      history: History::new(config.history),
      config,
    })
  }

  pub fn risk_model(&self) -> &R {
    &self.risk_model
  }

  pub fn constraints(&self) -> &Constraints {
    &self.constraints
  }

  pub fn config(&self) -> &EngineConfig {
    &self.config
  }

  pub fn history(&self) -> &History {
    &self.history
  }

  pub fn clear_history(&mut self) {
    self.history.clear();
  }

  /// Covariance of `returns` under the engine's risk model.
  pub fn estimate_covariance(&self, returns: &ReturnsMatrix) -> Result<DMatrix<f64>> {
    self.check_universe(returns)?;
    self.risk_model.estimate_covariance(returns)
  }

  /// Full pipeline: covariance estimate, solve, metrics, risk attribution.
  ///
  /// `initial` defaults to equal weights.
  pub fn optimize<O: Objective + ?Sized>(
    &mut self,
    returns: &ReturnsMatrix,
    objective: &O,
    initial: Option<&DVector<f64>>,
  ) -> Result<OptimizationResult> {
    let cov = self.estimate_covariance(returns)?;
    self.optimize_with_covariance(returns, &cov, objective, initial)
  }

  /// Solve against a covariance computed elsewhere, e.g. a Black-Litterman posterior.
  pub fn optimize_with_covariance<O: Objective + ?Sized>(
    &mut self,
    returns: &ReturnsMatrix,
    cov: &DMatrix<f64>,
    objective: &O,
    initial: Option<&DVector<f64>>,
  ) -> Result<OptimizationResult> {
    let n = self.check_universe(returns)?;
    if cov.shape() != (n, n) {
      return Err(PortfolioError::mismatch("covariance", n, cov.nrows()));
    }
    objective.validate(returns, cov)?;

    let start = match initial {
      Some(w) if w.len() != n => return Err(PortfolioError::mismatch("initial weights", n, w.len())),
      Some(w) => w.clone(),
      None => DVector::from_element(n, 1.0 / n as f64),
    };

    let timer = Instant::now();
    let outcome = solver::solve(objective, returns, cov, &self.constraints, &start, &self.config)?;
    let elapsed = timer.elapsed();

    debug!(
      objective = objective.name(),
      risk_model = self.risk_model.name(),
      iterations = outcome.iterations,
      converged = outcome.converged,
      elapsed_ms = elapsed.as_secs_f64() * 1e3,
      "solve finished"
    );
    if !outcome.converged {
      warn!(objective = objective.name(), reason = %outcome.message, "solver did not converge, keeping best iterate");
    }

    let weights = outcome.weights;
    let sector_breaches: Vec<_> = self
      .constraints
      .sector_exposures(returns.assets(), weights.as_slice())
      .into_iter()
      .filter(|s| s.breached)
      .collect();
    for s in &sector_breaches {
      warn!(sector = %s.name, exposure = s.exposure, "sector limit breached");
    }

    let result = OptimizationResult {
      objective: objective.name(),
      assets: returns.assets().to_vec(),
      metrics: PortfolioMetrics::compute(
        &weights,
        returns,
        cov,
        self.config.risk_free,
        self.config.periods_per_year,
      ),
      risk: RiskDecomposition::compute(&weights, cov),
      weights,
      diagnostics: SolverDiagnostics {
        converged: outcome.converged,
        message: outcome.message,
        iterations: outcome.iterations,
        elapsed,
        kkt_residual: outcome.kkt_residual,
        sector_breaches,
      },
      covariance: cov.clone(),
    };

    self.history.push(result.clone());
    Ok(result)
  }

  fn check_universe(&self, returns: &ReturnsMatrix) -> Result<usize> {
    let n = returns.n_assets();
    if n != self.constraints.n_assets() {
      return Err(PortfolioError::mismatch("asset universe", self.constraints.n_assets(), n));
    }
    if returns.is_empty() {
      return Err(PortfolioError::insufficient("optimization", 2, 0));
    }
    Ok(n)
  }
}

#[cfg(test)]
mod tests {
  use approx::assert_abs_diff_eq;
  use tracing_test::traced_test;

  use super::*;
  use crate::constraints::SectorLimit;
  use crate::data::tests::synthetic_returns;
  use crate::objective::MeanVariance;
  use crate::objective::ObjectiveKind;
  use crate::risk::FactorModel;
  use crate::risk::RiskModelKind;
  use crate::risk::SampleCovariance;

  /// Returns a fixed matrix regardless of the data.
  struct FixedCovariance(DMatrix<f64>);

  impl RiskModel for FixedCovariance {
    fn name(&self) -> &'static str {
      "fixed"
    }

    fn estimate_covariance(&self, _returns: &ReturnsMatrix) -> Result<DMatrix<f64>> {
      Ok(self.0.clone())
    }
  }

  fn universe() -> ReturnsMatrix {
    synthetic_returns(
      300,
      &[0.0008, 0.0004, 0.0002, 0.0006],
      &[0.012, 0.018, 0.008, 0.02],
      21,
    )
  }

  #[test]
  fn identical_assets_split_evenly() {
    let returns = synthetic_returns(60, &[0.0; 3], &[0.01; 3], 2);
    let mut engine = OptimizationEngine::new(
      FixedCovariance(DMatrix::identity(3, 3)),
      Constraints::long_only(3),
      EngineConfig::default(),
    )
    .unwrap();

    for delta in [0.1, 1.0, 25.0] {
      let objective = MeanVariance::new(delta).with_expected_returns(DVector::from_element(3, 0.001));
      let res = engine.optimize(&returns, &objective, None).unwrap();

      assert!(res.diagnostics.converged);
      for w in res.weights.iter() {
        assert_abs_diff_eq!(*w, 1.0 / 3.0, epsilon = 1e-9);
      }
    }
  }

  #[test]
  fn every_pairing_respects_budget_and_bounds() {
    let returns = universe();
    let constraints = Constraints::long_only(4).bounds(2, 0.05, 0.6);
    let models = [
      RiskModelKind::Sample(SampleCovariance::default()),
      RiskModelKind::Factor(FactorModel::new(2)),
    ];

    for model in models {
      let mut engine = OptimizationEngine::new(model, constraints.clone(), EngineConfig::default()).unwrap();
      for name in ["mean-variance", "risk-parity", "cvar"] {
        let objective: ObjectiveKind = name.parse().unwrap();
        let res = engine.optimize(&returns, &objective, None).unwrap();

        assert_abs_diff_eq!(res.weights.sum(), 1.0, epsilon = 1e-6);
        for (i, w) in res.weights.iter().enumerate() {
          assert!(*w >= constraints.lower()[i] - 1e-9, "{name}: w[{i}] = {w}");
          assert!(*w <= constraints.upper()[i] + 1e-9, "{name}: w[{i}] = {w}");
        }
        assert_abs_diff_eq!(res.risk.component.sum(), res.risk.portfolio_variance, epsilon = 1e-12);
        assert_abs_diff_eq!(res.risk.percentage.sum(), 100.0, epsilon = 1e-8);
      }
    }
  }

  #[test]
  fn concentration_cap_binds() {
    let returns = universe();
    let mut engine = OptimizationEngine::new(
      SampleCovariance::default(),
      Constraints::long_only(4).max_concentration(0.3),
      EngineConfig::default(),
    )
    .unwrap();

    let res = engine.optimize(&returns, &MeanVariance::new(0.01), None).unwrap();
    assert!(res.max_weight() <= 0.3 + 1e-9);
    assert_abs_diff_eq!(res.weights.sum(), 1.0, epsilon = 1e-6);
  }

  #[test]
  fn risk_parity_equalises_contributions() {
    let returns = universe();
    let mut engine = OptimizationEngine::new(
      FixedCovariance(DMatrix::from_diagonal(&DVector::from_vec(vec![0.01, 0.04, 0.09, 0.16]))),
      Constraints::long_only(4),
      EngineConfig::default(),
    )
    .unwrap();

    let res = engine.optimize(&returns, &ObjectiveKind::RiskParity(Default::default()), None).unwrap();
    for p in res.risk.percentage.iter() {
      assert_abs_diff_eq!(*p, 25.0, epsilon = 1.0);
    }
    assert!(res.weights[0] > res.weights[3]);
  }

  #[test]
  fn leverage_limit_is_respected() {
    let returns = synthetic_returns(300, &[0.003, -0.002, 0.001], &[0.01, 0.01, 0.01], 4);
    let mut engine = OptimizationEngine::new(
      SampleCovariance::default(),
      Constraints::with_leverage(3, 1.4),
      EngineConfig::default(),
    )
    .unwrap();

    let res = engine.optimize(&returns, &MeanVariance::new(0.01), None).unwrap();
    let gross: f64 = res.weights.iter().map(|w| w.abs()).sum();

    assert_abs_diff_eq!(res.weights.sum(), 1.0, epsilon = 1e-6);
    assert!(gross <= 1.4 + 1e-9, "gross exposure {gross}");
    assert!(res.weights[1] < 0.0);
  }

  #[test]
  fn leverage_limit_holds_at_a_vertex() {
    let returns = synthetic_returns(60, &[0.0; 3], &[0.01; 3], 3);
    let mut engine = OptimizationEngine::new(
      FixedCovariance(DMatrix::identity(3, 3) * 0.04),
      Constraints::with_leverage(3, 1.2),
      EngineConfig::default(),
    )
    .unwrap();

    let objective = MeanVariance::new(0.01).with_expected_returns(DVector::from_vec(vec![2.0, -2.0, 0.0]));
    let res = engine.optimize(&returns, &objective, None).unwrap();
    let gross: f64 = res.weights.iter().map(|w| w.abs()).sum();

    assert!(gross <= 1.2 + 1e-9, "gross exposure {gross}");
    assert_abs_diff_eq!(res.weights.sum(), 1.0, epsilon = 1e-9);
    assert_abs_diff_eq!(res.weights[0], 1.0, epsilon = 2e-3);
    assert_abs_diff_eq!(res.weights[1], -0.1, epsilon = 2e-3);
    assert_abs_diff_eq!(res.weights[2], 0.1, epsilon = 2e-3);
  }

  #[test]
  fn non_finite_covariance_is_a_soft_failure() {
    let returns = universe();
    let mut cov = DMatrix::identity(4, 4) * 0.01;
    cov[(2, 1)] = f64::NAN;
    let mut engine =
      OptimizationEngine::new(SampleCovariance::default(), Constraints::long_only(4), EngineConfig::default()).unwrap();

    let res = engine
      .optimize_with_covariance(&returns, &cov, &MeanVariance::new(1.0), None)
      .unwrap();

    assert!(!res.diagnostics.converged);
    assert_eq!(res.diagnostics.iterations, 0);
    assert_abs_diff_eq!(res.weights[0], 0.25, epsilon = 1e-12);
  }

  #[test]
  #[traced_test]
  fn iteration_cap_is_a_soft_failure() {
    let returns = universe();
    let config = EngineConfig {
      max_iters: 1,
      ..EngineConfig::default()
    };
    let mut engine = OptimizationEngine::new(SampleCovariance::default(), Constraints::long_only(4), config).unwrap();

    let res = engine.optimize(&returns, &MeanVariance::new(1.0), None).unwrap();
    assert!(!res.diagnostics.converged);
    assert!(!res.diagnostics.message.is_empty());
    assert_abs_diff_eq!(res.weights.sum(), 1.0, epsilon = 1e-6);
    assert!(logs_contain("solver did not converge"));
  }

  #[test]
  fn every_solve_is_logged() {
    let returns = universe();
    let mut engine = OptimizationEngine::new(
      SampleCovariance::default(),
      Constraints::long_only(4),
      EngineConfig {
        history: HistoryPolicy::Bounded(2),
        ..EngineConfig::default()
      },
    )
    .unwrap();

    for delta in [1.0, 2.0, 3.0] {
      engine.optimize(&returns, &MeanVariance::new(delta), None).unwrap();
    }
    assert_eq!(engine.history().len(), 2);
    assert_eq!(engine.history().latest().unwrap().objective, "mean-variance");
  }

  #[test]
  #[traced_test]
  fn sector_breaches_are_reported_not_enforced() {
    let returns = universe();
    let constraints = Constraints::long_only(4).sector(SectorLimit {
      name: "growth".into(),
      members: vec!["A0".into(), "A3".into()],
      min: 0.0,
      max: 0.1,
    });
    let mut engine = OptimizationEngine::new(SampleCovariance::default(), constraints, EngineConfig::default()).unwrap();

    let res = engine.optimize(&returns, &MeanVariance::new(1.0), None).unwrap();
    assert_eq!(res.diagnostics.sector_breaches.len(), 1);
    assert!(logs_contain("sector limit breached"));
  }

  #[test]
  fn mismatched_inputs_fail_fast() {
    let returns = universe();
    let mut engine = OptimizationEngine::new(SampleCovariance::default(), Constraints::long_only(3), EngineConfig::default()).unwrap();
    assert!(matches!(
      engine.optimize(&returns, &MeanVariance::default(), None),
      Err(PortfolioError::DimensionMismatch { .. })
    ));

    let mut engine = OptimizationEngine::new(SampleCovariance::default(), Constraints::long_only(4), EngineConfig::default()).unwrap();
    let bad = DVector::from_element(2, 0.5);
    assert!(engine.optimize(&returns, &MeanVariance::default(), Some(&bad)).is_err());
    assert!(OptimizationEngine::new(SampleCovariance::default(), Constraints::long_only(2).bounds(0, 0.7, 0.2), EngineConfig::default()).is_err());
  }
}
