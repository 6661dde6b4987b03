//! qs-execution
//!
//! Simulated order execution.
//!
//! - Immediate, complete market fills against the latest bar per symbol
//! - Conservative pricing: BUY from the bar high, SELL from the bar low
//! - Slippage: base + volume impact + volatility impact, capped
//! - Commission schedule per asset class
//! - Orders persisted CREATED -> FILLED | REJECTED; fills recorded

mod commission;
mod engine;
mod slippage;

pub use commission::CommissionSchedule;
pub use engine::{ExecutionEngine, ExecutionStats, OrderRejection};
pub use slippage::SlippageModel;
