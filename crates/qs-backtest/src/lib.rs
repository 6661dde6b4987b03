//! qs-backtest
//!
//! Event-driven historical replay.
//!
//! Pipeline per timestamp:
//! BARS -> STRATEGY -> RISK -> EXECUTION -> PORTFOLIO, drained to quiescence,
//! then the equity point is recorded and risk state is refreshed.
//!
//! - bars for all symbols are merged and grouped by timestamp; no group sees a later bar
//! - daily loss tracking rebaselines on each new UTC date
//! - open positions are force-closed at the last seen price when the data ends
//! - results are summarised by `qs_metrics` and saved through `qs_storage`

mod engine;
mod types;

pub use engine::BacktestEngine;
pub use types::{BacktestConfig, BacktestError, BacktestResults};
