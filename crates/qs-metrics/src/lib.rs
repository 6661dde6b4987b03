//! qs-metrics
//!
//! Performance statistics for a finished run.
//!
//! - Returns: total, CAGR, annualized mean period return
//! - Risk-adjusted: volatility, Sharpe, Sortino, Calmar (sample std, 252 periods/year)
//! - Drawdown: running-max percentage and currency, average, duration in days
//! - Trade statistics over closed trades
//! - Monthly returns bucketed by UTC calendar month
//!
//! Degenerate inputs give `Metrics::empty()`, never a panic.

mod calculator;
mod types;

pub use calculator::PerformanceCalculator;
pub use types::{
    ClosedTrade, DrawdownMetrics, EquityPoint, Metrics, MonthlyMetrics, ReturnMetrics,
    RiskAdjustedMetrics, TradeMetrics,
};
