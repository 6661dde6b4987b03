use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use chrono::{DateTime, Utc};
use qs_events::{Event, EventBus, EventKind, MarketData, PositionUpdate, Signal};
use tracing::{debug, info, warn};

use crate::types::{HostDrop, HostStats, Strategy};

/// Runs one strategy on the bus.
///
/// - delivers only bars for the strategy's symbols
/// - drops signals whose symbol differs from the bar
/// - at most one signal per (bar timestamp, symbol)
/// - stamps `strategy_id`, asset class and (when unset) the default size fraction
pub struct StrategyHost {
    strategy: Box<dyn Strategy>,
    default_size: f64,
    /// last bar timestamp a signal was admitted for, per symbol
    emitted: BTreeMap<String, DateTime<Utc>>,
    stats: HostStats,
}

impl StrategyHost {
    pub fn new(strategy: Box<dyn Strategy>) -> Self {
        info!(strategy = strategy.id(), symbols = ?strategy.symbols(), "strategy registered");
        Self {
            strategy,
            default_size: 0.0,
            emitted: BTreeMap::new(),
            stats: HostStats::default(),
        }
    }

    /// Size fraction applied to signals that leave it at zero.
    pub fn with_default_size(mut self, fraction: f64) -> Self {
        self.default_size = fraction;
        self
    }

    pub fn strategy_id(&self) -> &str {
        self.strategy.id()
    }

    pub fn stats(&self) -> HostStats {
        self.stats
    }

    /// Subscribe to MarketData (publishes Signal) and PositionUpdate.
    pub fn attach(this: &Rc<RefCell<Self>>, bus: &mut EventBus) {
        let host = Rc::clone(this);
        bus.subscribe(EventKind::MarketData, move |ev, out| {
            if let Event::MarketData(md) = ev {
                if let Some(signal) = host.borrow_mut().on_market_data(md) {
                    out.publish(signal);
                }
            }
            Ok(())
        });

        let host = Rc::clone(this);
        bus.subscribe(EventKind::PositionUpdate, move |ev, _out| {
            if let Event::PositionUpdate(u) = ev {
                host.borrow_mut().on_position_update(u);
            }
            Ok(())
        });
    }

    pub fn on_market_data(&mut self, md: &MarketData) -> Option<Signal> {
        if !self.strategy.symbols().iter().any(|s| *s == md.symbol) {
            self.stats.bars_ignored += 1;
            return None;
        }
        self.stats.bars_seen += 1;

        let signal = self.strategy.on_market_data(md)?;
        match self.admit(md, signal) {
            Ok(s) => {
                self.stats.signals += 1;
                debug!(symbol = %s.symbol, direction = s.direction.as_str(), price = s.price, "signal");
                Some(s)
            }
            Err(drop) => {
                self.stats.dropped += 1;
                warn!(strategy = self.strategy.id(), reason = %drop, "signal dropped");
                None
            }
        }
    }

    pub fn on_position_update(&mut self, update: &PositionUpdate) {
        if self.strategy.symbols().iter().any(|s| *s == update.symbol) {
            self.strategy.on_position_update(update);
        }
    }

    fn admit(&mut self, md: &MarketData, mut signal: Signal) -> Result<Signal, HostDrop> {
        if signal.symbol != md.symbol {
            return Err(HostDrop::SymbolMismatch {
                bar: md.symbol.clone(),
                signal: signal.symbol,
            });
        }
        if self.emitted.get(&md.symbol) == Some(&md.timestamp) {
            return Err(HostDrop::Duplicate { symbol: md.symbol.clone() });
        }
        self.emitted.insert(md.symbol.clone(), md.timestamp);

        signal.strategy_id = self.strategy.id().to_string();
        signal.asset_class = md.asset_class;
        if signal.size_fraction == 0.0 && !signal.direction.is_exit() {
            signal.size_fraction = self.default_size;
        }
        Ok(signal)
    }
}
