//! The host only feeds tracked symbols, drops off-symbol or repeated signals,
//! and stamps identity and default sizing.

use std::cell::RefCell;
use std::rc::Rc;

use chrono::{TimeZone, Utc};
use qs_events::{
    AssetClass, Bar, BusMode, Direction, Event, EventBus, EventKind, MarketData, Signal,
};
use qs_strategy::*;

/// Emits for every bar; optionally for the wrong symbol.
struct Chatty {
    symbols: Vec<String>,
    wrong_symbol: bool,
}

impl Strategy for Chatty {
    fn id(&self) -> &str {
        "chatty"
    }

    fn symbols(&self) -> &[String] {
        &self.symbols
    }

    fn on_market_data(&mut self, md: &MarketData) -> Option<Signal> {
        let sym = if self.wrong_symbol { "OTHER" } else { md.symbol.as_str() };
        Some(Signal::new(md.timestamp, sym, Direction::Long, md.close()).with_stop(md.close() * 0.98))
    }
}

fn md(symbol: &str, asset_class: AssetClass) -> MarketData {
    let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    MarketData::new(ts, symbol, asset_class, Bar::new(10.0, 10.0, 10.0, 10.0, 1.0))
}

#[test]
fn one_signal_per_bar_for_tracked_symbols_only() {
    // GIVEN
    let host = Rc::new(RefCell::new(
        StrategyHost::new(Box::new(Chatty {
            symbols: vec!["SPY".into()],
            wrong_symbol: false,
        }))
        .with_default_size(0.05),
    ));
    let mut bus = EventBus::new(BusMode::Backtest);
    StrategyHost::attach(&host, &mut bus);

    // WHEN: an untracked bar, then the same tracked bar twice
    bus.publish(md("QQQ", AssetClass::Etf));
    bus.publish(md("SPY", AssetClass::Etf));
    bus.publish(md("SPY", AssetClass::Etf));
    bus.drain();

    // THEN
    let signals: Vec<Signal> = bus
        .history(Some(EventKind::Signal), None, None)
        .into_iter()
        .filter_map(|e| match e {
            Event::Signal(s) => Some(s.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(signals.len(), 1);
    assert_eq!(signals[0].strategy_id, "chatty");
    assert_eq!(signals[0].asset_class, AssetClass::Etf);
    assert_eq!(signals[0].size_fraction, 0.05);

    let stats = host.borrow().stats();
    assert_eq!(stats.bars_ignored, 1);
    assert_eq!(stats.bars_seen, 2);
    assert_eq!(stats.dropped, 1);
}

#[test]
fn signal_for_another_symbol_is_dropped() {
    let mut host = StrategyHost::new(Box::new(Chatty {
        symbols: vec!["SPY".into()],
        wrong_symbol: true,
    }));
    assert!(host.on_market_data(&md("SPY", AssetClass::Etf)).is_none());
    assert_eq!(host.stats().dropped, 1);
}
