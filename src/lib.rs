//! # portfolio-rs
//!
//! $$
//! \text{returns} \xrightarrow{\text{risk model}} \Sigma
//! \xrightarrow{\text{objective} + \text{constraints}} \mathbf w^\*
//! \xrightarrow{} \text{metrics}, \text{risk attribution}
//! $$
//!
//! Constrained portfolio construction over pluggable risk models and objectives,
//! with Black-Litterman blending, efficient frontier sweeps and walk-forward
//! backtests.

pub mod backtest;
pub mod black_litterman;
pub mod constraints;
pub mod data;
pub mod engine;
pub mod error;
pub mod frontier;
pub mod metrics;
pub mod objective;
pub mod risk;
pub mod types;

mod numeric;

pub use backtest::run_backtest;
pub use backtest::BacktestConfig;
pub use backtest::BacktestSummary;
pub use backtest::RebalanceFrequency;
pub use black_litterman::BlackLitterman;
pub use black_litterman::BlackLittermanConfig;
pub use black_litterman::MarketView;
pub use constraints::Constraints;
pub use data::ReturnsMatrix;
pub use data::ReturnsProvider;
pub use engine::EngineConfig;
pub use engine::OptimizationEngine;
pub use error::PortfolioError;
pub use frontier::efficient_frontier;
pub use frontier::FrontierConfig;
pub use objective::Objective;
pub use objective::ObjectiveKind;
pub use risk::RiskModel;
pub use risk::RiskModelKind;
pub use types::OptimizationResult;
