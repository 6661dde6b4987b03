//! qs-events
//!
//! Event vocabulary and the synchronous event bus.
//!
//! - Closed tagged union of event kinds (MarketData, Signal, Order, Fill,
//!   PositionUpdate, RiskAlert); each carries a timestamp
//! - FIFO queue, re-entrant drain: events published by handlers resolve
//!   before `drain()` returns
//! - Fail-open dispatch: a handler error is logged and counted, never fatal
//! - Optional history capture (backtest mode) with type/time filters
//! - Deterministic id generation for orders/fills/positions
//! - `SignalGate`: pre-trade screen seam between sizing and risk
//!
//! No IO. Single logical thread of control per bus.

mod bus;
mod event;
mod gate;
mod ids;
mod types;

pub use bus::{
    BusMode, BusStats, DrainReport, EventBus, Handler, HandlerError, HandlerResult, Publisher,
    SubscriptionId,
};
pub use event::{Event, EventKind};
pub use gate::SignalGate;
pub use ids::IdGen;
pub use types::*;
