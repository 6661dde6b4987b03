//! qs-runtime
//!
//! Live-mode wiring: the same bus, risk manager and simulated execution as a
//! backtest, driven by an async market-data feed instead of a replay.
//!
//! - `LiveFeed`: bounded `tokio::sync::mpsc` sender of `MarketData`
//! - `LiveRunner`: single consumer; each bar is published and drained before the next
//! - `LivePortfolioManager` sizes orders, screens them through the risk manager
//!   and watches stop-loss/take-profit every bar
//! - stale or invalid bars are dropped with a warning, never applied

mod runner;

pub use runner::{feed, LiveFeed, LiveRunner, LiveSummary, RuntimeError};
