use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use qs_config::Settings;
use qs_events::{BusMode, Event, EventBus, EventKind, MarketData};
use qs_execution::ExecutionEngine;
use qs_md::{validate_bar, BarRecord};
use qs_portfolio::LivePortfolioManager;
use qs_risk::{RiskConfig, RiskManager, RiskState};
use qs_storage::Storage;
use qs_strategy::{Strategy, StrategyHost};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

pub type LiveFeed = mpsc::Sender<MarketData>;

/// Bounded feed. Producers block (await) when the runner falls behind.
pub fn feed(capacity: usize) -> (LiveFeed, mpsc::Receiver<MarketData>) {
    mpsc::channel(capacity.max(1))
}

#[derive(Clone, Debug, PartialEq)]
pub enum RuntimeError {
    /// Failed the bar quality gate.
    InvalidBar { symbol: String, reason: String },
    /// Not newer than the last bar applied for this symbol.
    StaleBar {
        symbol: String,
        timestamp: DateTime<Utc>,
        last: DateTime<Utc>,
    },
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeError::InvalidBar { symbol, reason } => {
                write!(f, "invalid bar for {symbol}: {reason}")
            }
            RuntimeError::StaleBar {
                symbol,
                timestamp,
                last,
            } => write!(f, "stale bar for {symbol}: {timestamp} <= last applied {last}"),
        }
    }
}

impl std::error::Error for RuntimeError {}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct LiveSummary {
    pub events_processed: u64,
    pub bars_applied: u64,
    pub bars_dropped: u64,
    pub fills: u64,
    pub risk_alerts: u64,
    pub open_positions: usize,
    pub final_value: f64,
}

#[derive(Default)]
struct Counters {
    fills: u64,
    alerts: u64,
}

/// Owns the bus and every component for one live session.
///
/// Single-threaded by construction: components are shared through
/// `Rc<RefCell<_>>`, so `run` must be awaited on the task that built the runner.
pub struct LiveRunner {
    bus: EventBus,
    portfolio: Rc<RefCell<LivePortfolioManager>>,
    risk: Rc<RefCell<RiskManager>>,
    execution: Rc<RefCell<ExecutionEngine>>,
    counters: Rc<RefCell<Counters>>,
    last_seen: BTreeMap<String, DateTime<Utc>>,
    last_day: Option<NaiveDate>,
    summary: LiveSummary,
}

impl LiveRunner {
    pub fn new(
        settings: &Settings,
        strategy: Box<dyn Strategy>,
        storage: Arc<dyn Storage>,
        initial_cash: f64,
        session_id: &str,
    ) -> Self {
        let mut bus = EventBus::new(BusMode::Live);

        let risk = Rc::new(RefCell::new(
            RiskManager::new(RiskConfig::from(&settings.risk), Arc::clone(&storage), initial_cash)
                .with_id_seed(session_id),
        ));
        let execution = Rc::new(RefCell::new(ExecutionEngine::new(
            &settings.execution,
            Arc::clone(&storage),
            session_id,
        )));
        // Risk screens here; it is not subscribed to Signal in live mode.
        let portfolio = Rc::new(RefCell::new(
            LivePortfolioManager::new(
                Arc::clone(&storage),
                initial_cash,
                settings.portfolio.default_position_size,
                session_id,
            )
            .with_gate(Box::new(Rc::clone(&risk))),
        ));
        let host = Rc::new(RefCell::new(
            StrategyHost::new(strategy).with_default_size(settings.portfolio.default_position_size),
        ));

        ExecutionEngine::attach(&execution, &mut bus);
        LivePortfolioManager::attach(&portfolio, &mut bus);
        StrategyHost::attach(&host, &mut bus);
        RiskManager::observe_fills(&risk, &mut bus);

        let counters = Rc::new(RefCell::new(Counters::default()));
        let c = Rc::clone(&counters);
        bus.subscribe(EventKind::Fill, move |_ev, _out| {
            c.borrow_mut().fills += 1;
            Ok(())
        });
        let c = Rc::clone(&counters);
        bus.subscribe(EventKind::RiskAlert, move |ev, _out| {
            if let Event::RiskAlert(a) = ev {
                debug!(alert_type = %a.alert_type, symbol = %a.symbol, "risk alert observed");
            }
            c.borrow_mut().alerts += 1;
            Ok(())
        });

        info!(session_id, initial_cash, "live runner ready");
        Self {
            bus,
            portfolio,
            risk,
            execution,
            counters,
            last_seen: BTreeMap::new(),
            last_day: None,
            summary: LiveSummary {
                final_value: initial_cash,
                ..LiveSummary::default()
            },
        }
    }

    /// Consume the feed until every sender is dropped.
    pub async fn run(&mut self, mut rx: mpsc::Receiver<MarketData>) -> LiveSummary {
        info!("live feed started");
        while let Some(md) = rx.recv().await {
            if let Err(e) = self.step(md) {
                self.summary.bars_dropped += 1;
                warn!(error = %e, "bar dropped");
            }
        }
        let summary = self.summary();
        info!(
            bars = summary.bars_applied,
            dropped = summary.bars_dropped,
            fills = summary.fills,
            final_value = summary.final_value,
            "live feed closed"
        );
        summary
    }

    /// Apply one bar: day rollover, publish, drain, refresh risk state.
    pub fn step(&mut self, md: MarketData) -> Result<(), RuntimeError> {
        self.admit(&md)?;

        let day = md.timestamp.date_naive();
        if self.last_day.map_or(true, |d| day > d) {
            self.last_day = Some(day);
            let value = self.portfolio.borrow().marked_value();
            self.risk.borrow_mut().reset_daily_tracking(value);
            info!(%day, start_equity = value, "new trading day");
        }

        self.last_seen.insert(md.symbol.clone(), md.timestamp);
        self.bus.publish(md);
        let report = self.bus.drain();
        self.risk.borrow_mut().release_reservations();
        for order in self.execution.borrow_mut().take_rejected() {
            self.portfolio.borrow_mut().on_order_rejected(&order);
        }
        self.summary.events_processed += report.dispatched;
        self.summary.bars_applied += 1;

        let value = self.portfolio.borrow().marked_value();
        self.risk.borrow_mut().update_portfolio_value(value);
        self.summary.final_value = value;
        Ok(())
    }

    fn admit(&self, md: &MarketData) -> Result<(), RuntimeError> {
        if let Some(&last) = self.last_seen.get(&md.symbol) {
            if md.timestamp <= last {
                return Err(RuntimeError::StaleBar {
                    symbol: md.symbol.clone(),
                    timestamp: md.timestamp,
                    last,
                });
            }
        }
        let record = BarRecord {
            timestamp: md.timestamp,
            symbol: md.symbol.clone(),
            open: md.bar.open,
            high: md.bar.high,
            low: md.bar.low,
            close: md.bar.close,
            volume: md.bar.volume,
        };
        validate_bar(&record).map_err(|e| RuntimeError::InvalidBar {
            symbol: md.symbol.clone(),
            reason: e.to_string(),
        })
    }

    pub fn summary(&self) -> LiveSummary {
        let counters = self.counters.borrow();
        let pm = self.portfolio.borrow();
        LiveSummary {
            fills: counters.fills,
            risk_alerts: counters.alerts,
            open_positions: pm.book().positions().len(),
            ..self.summary.clone()
        }
    }

    pub fn risk_state(&self) -> RiskState {
        self.risk.borrow().state().clone()
    }

    pub fn cash(&self) -> f64 {
        self.portfolio.borrow().cash()
    }

    pub fn execution_rejections(&self) -> u64 {
        self.execution.borrow().stats().rejected
    }

    /// Operator reset of a tripped breaker.
    pub fn reset_circuit_breaker(&mut self) {
        self.risk.borrow_mut().reset_circuit_breaker();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use qs_events::{AssetClass, Bar, Signal};
    use qs_storage::MemoryStorage;

    struct Quiet(Vec<String>);

    impl Strategy for Quiet {
        fn id(&self) -> &str {
            "quiet"
        }
        fn symbols(&self) -> &[String] {
            &self.0
        }
        fn on_market_data(&mut self, _md: &MarketData) -> Option<Signal> {
            None
        }
    }

    fn runner() -> LiveRunner {
        LiveRunner::new(
            &Settings::default(),
            Box::new(Quiet(vec!["BTC/USD".into()])),
            Arc::new(MemoryStorage::new()),
            10_000.0,
            "live-test",
        )
    }

    fn md(day: u32, h: u32, close: f64) -> MarketData {
        MarketData::new(
            Utc.with_ymd_and_hms(2024, 2, day, h, 0, 0).unwrap(),
            "BTC/USD",
            AssetClass::Crypto,
            Bar::new(close, close + 1.0, close - 1.0, close, 5.0),
        )
    }

    #[test]
    fn stale_and_invalid_bars_are_refused() {
        let mut r = runner();
        r.step(md(1, 1, 100.0)).unwrap();
        assert!(matches!(r.step(md(1, 1, 101.0)), Err(RuntimeError::StaleBar { .. })));
        assert!(matches!(r.step(md(1, 0, 101.0)), Err(RuntimeError::StaleBar { .. })));

        let mut bad = md(1, 2, 100.0);
        bad.bar.high = 50.0;
        assert!(matches!(r.step(bad), Err(RuntimeError::InvalidBar { .. })));
        assert_eq!(r.summary().bars_applied, 1);
    }

    #[test]
    fn day_rollover_rebaselines_daily_equity() {
        let mut r = runner();
        r.step(md(1, 10, 100.0)).unwrap();
        r.risk.borrow_mut().reset_daily_tracking(9_000.0);

        // same day: baseline untouched
        r.step(md(1, 23, 100.0)).unwrap();
        assert_eq!(r.risk_state().daily_start_equity, 9_000.0);

        // next day: rebased to the book's value
        r.step(md(2, 0, 100.0)).unwrap();
        assert_eq!(r.risk_state().daily_start_equity, 10_000.0);
    }
}
