//! qs-portfolio
//!
//! Position accounting and the fill-driven portfolio book.
//!
//! - `Position`: open/add/close lifecycle, realized and unrealized P&L
//!   (commission-inclusive), stop/target evaluation
//! - `PortfolioManager`: backtest book; consumes fills, owns cash and one
//!   open position per symbol, publishes `PositionUpdate`
//! - `LivePortfolioManager`: live variant; also sizes signals into orders and
//!   emits protective exits from market data
//!
//! No IO beyond the `Storage` collaborator.

mod live;
mod manager;
mod position;

pub use live::{LivePortfolioManager, SignalAction};
pub use manager::{FillOutcome, PortfolioManager};
pub use position::Position;
