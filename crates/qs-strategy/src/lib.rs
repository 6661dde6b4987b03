//! qs-strategy
//!
//! Strategy capability and the host that runs it on the bus.
//!
//! - `Strategy`: `on_market_data(bar) -> Option<Signal>`, plus position feedback
//! - `StrategyHost`: tracked-symbol filter, one signal per bar per symbol
//! - Indicators: rolling window mean/std, z-score, Bollinger bands, Wilder RSI
//! - `MeanReversion`: reference strategy
//!
//! Strategies do no IO.

mod host;
mod indicators;
mod mean_reversion;
mod types;

pub use host::StrategyHost;
pub use indicators::{bollinger, zscore, Bands, RollingWindow, Rsi};
pub use mean_reversion::{MeanReversion, MeanReversionParams, MEAN_REVERSION};
pub use types::{HostDrop, HostStats, Strategy};
