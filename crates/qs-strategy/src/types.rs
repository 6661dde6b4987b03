use std::fmt;

use qs_events::{MarketData, PositionUpdate, Signal};

/// Signal-generation capability. Strategies see one bar at a time and never
/// touch storage, the broker, or the bus directly.
pub trait Strategy {
    fn id(&self) -> &str;

    /// Symbols this strategy trades. Bars for anything else are not delivered.
    fn symbols(&self) -> &[String];

    fn on_market_data(&mut self, md: &MarketData) -> Option<Signal>;

    /// Position lifecycle feedback (OPEN / CLOSED). Default: ignored.
    fn on_position_update(&mut self, _update: &PositionUpdate) {}
}

/// Signals dropped by the host instead of being published.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HostDrop {
    /// Signal named a symbol other than the bar it was produced from.
    SymbolMismatch { bar: String, signal: String },
    /// A second signal for the same (timestamp, symbol).
    Duplicate { symbol: String },
}

impl fmt::Display for HostDrop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostDrop::SymbolMismatch { bar, signal } => {
                write!(f, "signal for {} produced from {} bar", signal, bar)
            }
            HostDrop::Duplicate { symbol } => write!(f, "duplicate signal for {} on one bar", symbol),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HostStats {
    pub bars_seen: u64,
    pub bars_ignored: u64,
    pub signals: u64,
    pub dropped: u64,
}
