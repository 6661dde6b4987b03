//! qs-risk
//!
//! Pre-trade risk validation with sticky circuit breakers.
//!
//! - Circuit breakers: daily loss from day-start equity, drawdown from peak
//! - Position: size fraction cap, stop-loss distance band
//! - Symbol and portfolio exposure caps (entry notional of open positions)
//! - Rejections publish a RiskAlert and persist to the risk-event log
//!
//! Deterministic. Exposure reads go through the `Storage` collaborator.

mod manager;
mod types;

pub use manager::{RiskManager, SIGNAL_REJECTED};
pub use types::*;
