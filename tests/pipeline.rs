use approx::assert_abs_diff_eq;
use chrono::Datelike;
use chrono::NaiveDate;
use nalgebra::DMatrix;
use portfolio_rs::backtest::run_backtest;
use portfolio_rs::backtest::BacktestConfig;
use portfolio_rs::black_litterman::market_weights;
use portfolio_rs::black_litterman::BlackLitterman;
use portfolio_rs::black_litterman::MarketView;
use portfolio_rs::constraints::Constraints;
use portfolio_rs::data::InMemoryProvider;
use portfolio_rs::data::ReturnsMatrix;
use portfolio_rs::data::ReturnsProvider;
use portfolio_rs::engine::EngineConfig;
use portfolio_rs::engine::OptimizationEngine;
use portfolio_rs::frontier::efficient_frontier;
use portfolio_rs::frontier::FrontierConfig;
use portfolio_rs::objective::MeanVariance;
use portfolio_rs::objective::ObjectiveKind;
use portfolio_rs::risk::RiskModel;
use portfolio_rs::risk::RiskModelKind;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::Distribution;
use rand_distr::Normal;

fn business_days(start: NaiveDate, n: usize) -> Vec<NaiveDate> {
  let mut out = Vec::with_capacity(n);
  let mut d = start;
  while out.len() < n {
    if d.weekday().number_from_monday() <= 5 {
      out.push(d);
    }
    d = d.succ_opt().unwrap();
  }
  out
}

fn market(n_obs: usize) -> ReturnsMatrix {
  let mut rng = StdRng::seed_from_u64(2024);
  let z = Normal::new(0.0, 1.0).unwrap();
  let drifts = [0.0005, 0.0003, 0.0001, 0.0004];
  let vols = [0.012, 0.010, 0.004, 0.015];

  let mut values = DMatrix::zeros(n_obs, drifts.len());
  for t in 0..n_obs {
    let m: f64 = 0.005 * z.sample(&mut rng);
    for j in 0..drifts.len() {
      values[(t, j)] = drifts[j] + 0.6 * m + vols[j] * z.sample(&mut rng);
    }
  }

  let dates = business_days(NaiveDate::from_ymd_opt(2021, 1, 4).unwrap(), n_obs);
  let assets = ["SPX", "SX5E", "AGG", "QQQ"].iter().map(|s| s.to_string()).collect();
  ReturnsMatrix::new(dates, assets, values).unwrap()
}

#[test]
fn provider_to_backtest() {
  let full = market(400);
  let provider = InMemoryProvider::new(full.clone(), 50);
  let start = full.dates()[0];
  let end = *full.dates().last().unwrap();

  let universe: Vec<String> = ["SPX", "SX5E", "AGG", "QQQ", "MISSING"].iter().map(|s| s.to_string()).collect();
  let returns = provider.fetch(&universe, start, end).unwrap();
  assert_eq!(returns.n_assets(), 4);
  assert_eq!(returns.n_obs(), 400);

  let model: RiskModelKind = "pca".parse().unwrap();
  let cov = model.estimate_covariance(&returns).unwrap();
  assert!(cov.clone().symmetric_eigen().eigenvalues.min() > -1e-8);

  let constraints = Constraints::long_only(4).max_concentration(0.5);
  let mut engine = OptimizationEngine::new(model, constraints, EngineConfig::default()).unwrap();

  let result = engine.optimize(&returns, &ObjectiveKind::default(), None).unwrap();
  assert_abs_diff_eq!(result.weights.sum(), 1.0, epsilon = 1e-6);
  assert!(result.max_weight() <= 0.5 + 1e-9);
  assert_eq!(result.weights_by_asset().len(), 4);

  let caps = market_weights(&[40.0, 20.0, 30.0, 10.0]).unwrap();
  let posterior = BlackLitterman::default()
    .posterior(&cov, returns.assets(), &caps, &[MarketView::relative("QQQ", "SPX", 0.0005, 0.2)])
    .unwrap();
  let blended = MeanVariance::new(2.5).with_expected_returns(posterior.expected_returns.clone());
  let bl = engine
    .optimize_with_covariance(&returns, &posterior.covariance, &blended, None)
    .unwrap();
  assert_abs_diff_eq!(bl.weights.sum(), 1.0, epsilon = 1e-6);

  let frontier = efficient_frontier(
    &mut engine,
    &returns,
    &FrontierConfig {
      n_points: 5,
      ..FrontierConfig::default()
    },
    Some(&posterior.expected_returns),
  )
  .unwrap();
  assert_eq!(frontier.len(), 5);

  let rows = run_backtest(
    &mut engine,
    &returns,
    &ObjectiveKind::RiskParity(Default::default()),
    &BacktestConfig {
      lookback: 120,
      ..BacktestConfig::default()
    },
  )
  .unwrap();
  assert!(!rows.is_empty());
  for row in &rows {
    assert_eq!(row.weights.len(), 4);
    assert_abs_diff_eq!(row.weights.iter().sum::<f64>(), 1.0, epsilon = 1e-6);
  }

  assert_eq!(engine.history().len(), 2 + 5 + rows.len());
}
