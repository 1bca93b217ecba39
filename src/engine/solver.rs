//! # Projected L-BFGS
//!
//! $$
//! \phi(\mathbf x) = f(P(\mathbf x)) + \rho\,\lVert \mathbf x - P(\mathbf x) \rVert^2
//! $$
//!
//! `P` is the Euclidean projection onto the budget, box and gross-exposure set, so the
//! objective is only ever evaluated at fully invested weights inside their bounds and
//! under the leverage limit. The unprojected iterate `x` is pulled back towards the
//! set by the distance term.

use std::cell::RefCell;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use argmin::core::observers::Observe;
use argmin::core::observers::ObserverMode;
use argmin::core::CostFunction;
use argmin::core::Executor;
use argmin::core::Gradient;
use argmin::core::State;
use argmin::core::TerminationReason;
use argmin::core::KV;
use argmin::solver::linesearch::MoreThuenteLineSearch;
use argmin::solver::quasinewton::LBFGS;
use nalgebra::DMatrix;
use nalgebra::DVector;

use crate::constraints::Constraints;
use crate::constraints::FeasibleSet;
use crate::data::ReturnsMatrix;
use crate::engine::EngineConfig;
use crate::error::PortfolioError;
use crate::error::Result;
use crate::objective::Objective;

/// Best feasible point seen by any cost evaluation.
#[derive(Clone, Debug, Default)]
struct Tracker {
  best: Option<(Vec<f64>, f64)>,
}

/// Counts completed solver iterations, so the count survives an aborted run.
#[derive(Clone, Debug, Default)]
struct IterationCounter(Arc<AtomicU64>);

impl IterationCounter {
  fn get(&self) -> u64 {
    self.0.load(Ordering::Relaxed)
  }
}

impl<I: State> Observe<I> for IterationCounter {
  fn observe_iter(&mut self, _state: &I, _kv: &KV) -> std::result::Result<(), argmin::core::Error> {
    self.0.fetch_add(1, Ordering::Relaxed);
    Ok(())
  }
}

struct ProjectedProblem<'a, O: Objective + ?Sized> {
  objective: &'a O,
  returns: &'a ReturnsMatrix,
  cov: &'a DMatrix<f64>,
  set: &'a FeasibleSet,
  penalty: f64,
  tracker: &'a RefCell<Tracker>,
}

impl<O: Objective + ?Sized> ProjectedProblem<'_, O> {
  /// Objective at a point already on the feasible set.
  fn merit(&self, w: &[f64]) -> f64 {
    let weights = DVector::from_column_slice(w);
    self.objective.value(&weights, self.returns, self.cov)
  }

  fn merit_gradient(&self, w: &[f64]) -> Vec<f64> {
    let weights = DVector::from_column_slice(w);
    self
      .objective
      .gradient(&weights, self.returns, self.cov)
      .iter()
      .copied()
      .collect()
  }

  fn record(&self, w: &[f64], merit: f64) {
    if !merit.is_finite() {
      return;
    }
    let mut tracker = self.tracker.borrow_mut();
    if tracker.best.as_ref().map_or(true, |(_, m)| merit < *m) {
      tracker.best = Some((w.to_vec(), merit));
    }
  }

  /// Norm of the merit gradient restricted to the feasible directions at `w`.
  fn kkt_residual(&self, w: &[f64]) -> f64 {
    let p = self.set.project(w);
    let g = self.merit_gradient(&p.weights);
    p.tangent(&g)
      .iter()
      .map(|x| x * x)
      .sum::<f64>()
      .sqrt()
  }
}

impl<O: Objective + ?Sized> CostFunction for ProjectedProblem<'_, O> {
  type Param = Vec<f64>;
  type Output = f64;

  fn cost(&self, x: &Self::Param) -> std::result::Result<Self::Output, argmin::core::Error> {
    let p = self.set.project(x);
    let merit = self.merit(&p.weights);
    self.record(&p.weights, merit);

    let distance: f64 = x
      .iter()
      .zip(p.weights.iter())
      .map(|(a, b)| (a - b).powi(2))
      .sum();

    Ok(merit + self.penalty * distance)
  }
}

impl<O: Objective + ?Sized> Gradient for ProjectedProblem<'_, O> {
  type Param = Vec<f64>;
  type Gradient = Vec<f64>;

  fn gradient(&self, x: &Self::Param) -> std::result::Result<Self::Gradient, argmin::core::Error> {
    let p = self.set.project(x);
    let g = self.merit_gradient(&p.weights);
    let r: Vec<f64> = x.iter().zip(p.weights.iter()).map(|(a, b)| a - b).collect();

    let jg = p.tangent(&g);
    let jr = p.tangent(&r);

    Ok(
      (0..x.len())
        .map(|i| jg[i] + 2.0 * self.penalty * (r[i] - jr[i]))
        .collect(),
    )
  }
}

/// Raw solver output before metrics are attached.
#[derive(Clone, Debug)]
pub(crate) struct SolveOutcome {
  pub weights: DVector<f64>,
  pub converged: bool,
  pub message: String,
  pub iterations: u64,
  pub kkt_residual: f64,
}

fn within_leverage(set: &FeasibleSet, w: &[f64]) -> bool {
  set
    .max_leverage()
    .map_or(true, |limit| w.iter().map(|x| x.abs()).sum::<f64>() <= limit + 1e-9)
}

fn setup_error(err: argmin::core::Error) -> PortfolioError {
  PortfolioError::InvalidParameter(format!("solver configuration: {err}"))
}

/// Minimise `objective` over the feasible set of `constraints`, starting from `initial`.
///
/// Never fails on non-convergence: the best feasible point evaluated is returned
/// with `converged == false`.
pub(crate) fn solve<O: Objective + ?Sized>(
  objective: &O,
  returns: &ReturnsMatrix,
  cov: &DMatrix<f64>,
  constraints: &Constraints,
  initial: &DVector<f64>,
  config: &EngineConfig,
) -> Result<SolveOutcome> {
  let set = constraints.feasible_set();
  let tracker = RefCell::new(Tracker::default());
  let problem = || ProjectedProblem {
    objective,
    returns,
    cov,
    set: &set,
    penalty: config.penalty,
    tracker: &tracker,
  };

  let start = set.project(initial.as_slice()).weights;
  let probe = problem();
  let start_merit = probe.merit(&start);
  let initial_residual = probe.kkt_residual(&start);
  if !start_merit.is_finite() || !initial_residual.is_finite() {
    return Ok(SolveOutcome {
      weights: DVector::from_vec(start),
      converged: false,
      message: "objective is not finite at the starting point".to_string(),
      iterations: 0,
      kkt_residual: initial_residual,
    });
  }
  probe.record(&start, start_merit);

  if initial_residual <= config.gtol {
    return Ok(SolveOutcome {
      weights: DVector::from_vec(start),
      converged: true,
      message: "initial point is stationary".to_string(),
      iterations: 0,
      kkt_residual: initial_residual,
    });
  }

  let linesearch = MoreThuenteLineSearch::new()
    .with_c(1e-4, 0.9)
    .map_err(setup_error)?;
  let solver = LBFGS::new(linesearch, config.lbfgs_memory)
    .with_tolerance_grad(config.gtol)
    .map_err(setup_error)?
    .with_tolerance_cost(config.ftol)
    .map_err(setup_error)?;

  let counter = IterationCounter::default();
  let x0 = start.clone();
  let run = Executor::new(problem(), solver)
    .configure(|state| state.param(x0).max_iters(config.max_iters))
    .add_observer(counter.clone(), ObserverMode::Always)
    .run();

  let (converged, message, iterations) = match run {
    Ok(res) => {
      let state = res.state();
      let iterations = state.get_iter();
      match state.get_termination_reason() {
        Some(TerminationReason::SolverConverged) | Some(TerminationReason::TargetCostReached) => {
          (true, "optimization converged".to_string(), iterations)
        }
        Some(reason) => (false, format!("optimization stopped: {reason:?}"), iterations),
        None => (false, "optimization stopped without a reason".to_string(), iterations),
      }
    }
    Err(err) => (false, format!("optimization failed: {err}"), counter.get()),
  };

  let weights = tracker.take().best.map(|(w, _)| w).unwrap_or(start);
  let kkt_residual = probe.kkt_residual(&weights);
  let (converged, message) = if within_leverage(&set, &weights) {
    (converged, message)
  } else {
    (false, "best iterate exceeds the leverage limit".to_string())
  };

  Ok(SolveOutcome {
    weights: DVector::from_vec(weights),
    converged,
    message,
    iterations,
    kkt_residual,
  })
}

#[cfg(test)]
mod tests {
  use approx::assert_abs_diff_eq;

  use super::*;
  use crate::data::tests::synthetic_returns;
  use crate::objective::MeanVariance;

  #[test]
  fn penalised_gradient_matches_finite_differences_off_the_set() {
    let returns = synthetic_returns(60, &[0.001, 0.0, 0.0005], &[0.01, 0.02, 0.015], 9);
    let cov = crate::numeric::sample_covariance(returns.values());
    let objective = MeanVariance::new(2.0);
    let set = Constraints::long_only(3).feasible_set();
    let tracker = RefCell::new(Tracker::default());
    let problem = ProjectedProblem {
      objective: &objective,
      returns: &returns,
      cov: &cov,
      set: &set,
      penalty: 1.0,
      tracker: &tracker,
    };

    let x = vec![0.5, 0.4, 0.3];
    let g = problem.gradient(&x).unwrap();
    let h = 1e-7;
    for i in 0..3 {
      let mut up = x.clone();
      let mut down = x.clone();
      up[i] += h;
      down[i] -= h;
      let fd = (problem.cost(&up).unwrap() - problem.cost(&down).unwrap()) / (2.0 * h);
      assert_abs_diff_eq!(g[i], fd, epsilon = 1e-6);
    }
  }

  #[test]
  fn best_point_is_always_feasible() {
    let returns = synthetic_returns(120, &[0.002, -0.001, 0.0], &[0.01, 0.03, 0.02], 5);
    let cov = crate::numeric::sample_covariance(returns.values());
    let constraints = Constraints::long_only(3).max_concentration(0.5);
    let out = solve(
      &MeanVariance::new(0.5),
      &returns,
      &cov,
      &constraints,
      &DVector::from_element(3, 1.0 / 3.0),
      &EngineConfig::default(),
    )
    .unwrap();

    assert_abs_diff_eq!(out.weights.sum(), 1.0, epsilon = 1e-9);
    assert!(out.weights.iter().all(|&w| (-1e-12..=0.5 + 1e-12).contains(&w)));
  }

  #[test]
  fn penalised_gradient_matches_finite_differences_with_leverage_binding() {
    let returns = synthetic_returns(60, &[0.001, 0.0, 0.0005], &[0.01, 0.02, 0.015], 9);
    let cov = crate::numeric::sample_covariance(returns.values());
    let objective = MeanVariance::new(2.0);
    let set = Constraints::with_leverage(3, 1.2).feasible_set();
    let tracker = RefCell::new(Tracker::default());
    let problem = ProjectedProblem {
      objective: &objective,
      returns: &returns,
      cov: &cov,
      set: &set,
      penalty: 1.0,
      tracker: &tracker,
    };

    let x = vec![0.9, -0.5, 0.6];
    assert!(set.project(&x).signs.is_some());
    let g = problem.gradient(&x).unwrap();
    let h = 1e-7;
    for i in 0..3 {
      let mut up = x.clone();
      let mut down = x.clone();
      up[i] += h;
      down[i] -= h;
      let fd = (problem.cost(&up).unwrap() - problem.cost(&down).unwrap()) / (2.0 * h);
      assert_abs_diff_eq!(g[i], fd, epsilon = 1e-6);
    }
  }

  #[test]
  fn non_finite_objective_returns_without_iterating() {
    let returns = synthetic_returns(60, &[0.001, 0.0, 0.0005], &[0.01, 0.02, 0.015], 9);
    let mut cov = crate::numeric::sample_covariance(returns.values());
    cov[(1, 1)] = f64::NAN;
    let out = solve(
      &MeanVariance::new(1.0),
      &returns,
      &cov,
      &Constraints::long_only(3),
      &DVector::from_element(3, 1.0 / 3.0),
      &EngineConfig::default(),
    )
    .unwrap();

    assert!(!out.converged);
    assert_eq!(out.iterations, 0);
    assert!(out.message.contains("not finite"));
  }

  #[test]
  fn iteration_counter_tracks_executor_iterations() {
    let returns = synthetic_returns(120, &[0.002, -0.001, 0.0, 0.001], &[0.01, 0.03, 0.02, 0.015], 5);
    let cov = crate::numeric::sample_covariance(returns.values());
    let objective = MeanVariance::new(0.5);
    let set = Constraints::long_only(4).feasible_set();
    let tracker = RefCell::new(Tracker::default());
    let problem = ProjectedProblem {
      objective: &objective,
      returns: &returns,
      cov: &cov,
      set: &set,
      penalty: 1.0,
      tracker: &tracker,
    };

    let counter = IterationCounter::default();
    let solver = LBFGS::new(MoreThuenteLineSearch::new(), 5);
    let res = Executor::new(problem, solver)
      .configure(|state| state.param(vec![0.7, 0.1, 0.1, 0.1]).max_iters(3))
      .add_observer(counter.clone(), ObserverMode::Always)
      .run()
      .unwrap();

    assert!(counter.get() > 0);
    assert_eq!(counter.get(), res.state().get_iter());
  }
}
