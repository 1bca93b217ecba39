use anyhow::Result;
use chrono::Datelike;
use chrono::NaiveDate;
use nalgebra::DMatrix;
use portfolio_rs::backtest::run_backtest;
use portfolio_rs::backtest::BacktestConfig;
use portfolio_rs::backtest::BacktestSummary;
use portfolio_rs::black_litterman::market_weights;
use portfolio_rs::black_litterman::BlackLitterman;
use portfolio_rs::black_litterman::MarketView;
use portfolio_rs::constraints::Constraints;
use portfolio_rs::data::ReturnsMatrix;
use portfolio_rs::engine::EngineConfig;
use portfolio_rs::engine::OptimizationEngine;
use portfolio_rs::frontier::efficient_frontier;
use portfolio_rs::frontier::FrontierConfig;
use portfolio_rs::objective::MeanVariance;
use portfolio_rs::objective::ObjectiveKind;
use portfolio_rs::risk::RiskModelKind;
use portfolio_rs::types::OptimizationResult;
use prettytable::row;
use prettytable::Table;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::Distribution;
use rand_distr::Normal;
use tracing::info;
use tracing_subscriber::EnvFilter;

const ASSETS: [(&str, f64, f64); 5] = [
  ("EQUITY_US", 0.00045, 0.011),
  ("EQUITY_EU", 0.00030, 0.012),
  ("BONDS", 0.00012, 0.003),
  ("GOLD", 0.00020, 0.009),
  ("REIT", 0.00035, 0.014),
];

/// Two years of business-day returns driven by one market factor.
fn synthetic_universe(n_obs: usize, seed: u64) -> Result<ReturnsMatrix> {
  let mut rng = StdRng::seed_from_u64(seed);
  let noise = Normal::new(0.0, 1.0)?;
  let market = Normal::new(0.0, 0.006)?;
  let betas = [1.0, 1.1, -0.1, 0.2, 1.2];

  let mut dates = Vec::with_capacity(n_obs);
  let mut day = NaiveDate::from_ymd_opt(2022, 1, 3).ok_or_else(|| anyhow::anyhow!("bad start date"))?;
  while dates.len() < n_obs {
    if day.weekday().number_from_monday() <= 5 {
      dates.push(day);
    }
    day = day.succ_opt().ok_or_else(|| anyhow::anyhow!("calendar overflow"))?;
  }

  let mut values = DMatrix::zeros(n_obs, ASSETS.len());
  for t in 0..n_obs {
    let m: f64 = market.sample(&mut rng);
    for (j, (_, drift, vol)) in ASSETS.iter().enumerate() {
      values[(t, j)] = drift + betas[j] * m + vol * noise.sample(&mut rng);
    }
  }

  let assets = ASSETS.iter().map(|(a, ..)| a.to_string()).collect();
  Ok(ReturnsMatrix::new(dates, assets, values)?)
}

fn print_result(result: &OptimizationResult) {
  let mut table = Table::new();
  table.set_titles(row!["asset", "weight", "marginal", "component", "% risk"]);
  for (i, asset) in result.assets.iter().enumerate() {
    table.add_row(row![
      asset,
      format!("{:.4}", result.weights[i]),
      format!("{:.6}", result.risk.marginal[i]),
      format!("{:.6}", result.risk.component[i]),
      format!("{:.2}", result.risk.percentage[i]),
    ]);
  }
  println!(
    "\n{} (converged: {}, {} iterations, {:?})",
    result.objective, result.diagnostics.converged, result.diagnostics.iterations, result.diagnostics.elapsed
  );
  table.printstd();

  let mut metrics = Table::new();
  for (name, value) in result.metrics.pairs() {
    metrics.add_row(row![name, format!("{value:.4}")]);
  }
  metrics.printstd();
}

fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .init();

  let returns = synthetic_universe(504, 7)?;
  info!(observations = returns.n_obs(), assets = returns.n_assets(), "generated synthetic universe");

  let n = returns.n_assets();
  let constraints = Constraints::long_only(n).max_concentration(0.4);
  let mut engine = OptimizationEngine::new(RiskModelKind::default(), constraints.clone(), EngineConfig::default())?;

  for name in ["mean-variance", "risk-parity", "cvar"] {
    let objective: ObjectiveKind = name.parse()?;
    let result = engine.optimize(&returns, &objective, None)?;
    print_result(&result);
  }

  let mut factor_engine = OptimizationEngine::new("factor".parse::<RiskModelKind>()?, constraints, EngineConfig::default())?;
  print_result(&factor_engine.optimize(&returns, &MeanVariance::new(2.0), None)?);

  let cov = engine.estimate_covariance(&returns)?;
  let caps = market_weights(&[45.0, 25.0, 15.0, 5.0, 10.0])?;
  let views = [
    MarketView::absolute("GOLD", 0.0004, 0.4),
    MarketView::relative("EQUITY_US", "EQUITY_EU", 0.0002, 0.25),
  ];
  let posterior = BlackLitterman::default().posterior(&cov, returns.assets(), &caps, &views)?;
  let bl_objective = MeanVariance::new(2.5).with_expected_returns(posterior.expected_returns.clone());
  print_result(&engine.optimize_with_covariance(&returns, &posterior.covariance, &bl_objective, None)?);

  let frontier = efficient_frontier(&mut engine, &returns, &FrontierConfig::default(), None)?;
  let mut table = Table::new();
  table.set_titles(row!["risk aversion", "return", "volatility", "sharpe", "max weight", "positions"]);
  for r in &frontier {
    table.add_row(row![
      format!("{:.3}", r.risk_aversion),
      format!("{:.4}", r.expected_return),
      format!("{:.4}", r.volatility),
      format!("{:.3}", r.sharpe),
      format!("{:.3}", r.max_weight),
      r.n_positions,
    ]);
  }
  println!("\nefficient frontier");
  table.printstd();

  let config = BacktestConfig {
    lookback: 126,
    ..BacktestConfig::default()
  };
  let rows = run_backtest(&mut engine, &returns, &ObjectiveKind::default(), &config)?;
  let mut table = Table::new();
  table.set_titles(row!["date", "return", "turnover", "max weight", "positions", "concentration"]);
  for r in &rows {
    table.add_row(row![
      r.date,
      format!("{:.4}", r.realized_return),
      format!("{:.4}", r.turnover),
      format!("{:.3}", r.max_weight),
      r.n_positions,
      format!("{:.3}", r.concentration),
    ]);
  }
  println!("\nbacktest");
  table.printstd();

  let summary = BacktestSummary::from_rows(&rows, config.frequency.periods_per_year());
  info!(
    total_return = summary.total_return,
    annualized_return = summary.annualized_return,
    sharpe = summary.sharpe,
    max_drawdown = summary.max_drawdown,
    average_turnover = summary.average_turnover,
    "backtest summary"
  );

  Ok(())
}
