use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use qs_config::Settings;
use qs_events::{BusMode, Event, EventBus, EventKind, Fill};
use qs_execution::ExecutionEngine;
use qs_md::{sort_bars, validate_bar, BarRecord, BarSource};
use qs_metrics::{ClosedTrade, EquityPoint, Metrics, PerformanceCalculator};
use qs_portfolio::PortfolioManager;
use qs_risk::{RiskConfig, RiskManager};
use qs_storage::{BacktestRecord, PositionRecord, Storage};
use qs_strategy::{Strategy, StrategyHost};
use tracing::{debug, error, info, warn};

use crate::types::{BacktestConfig, BacktestError, BacktestResults};

const PROGRESS_EVERY: usize = 100;

/// Components wired onto one bus for one run.
struct Wiring {
    bus: EventBus,
    portfolio: Rc<RefCell<PortfolioManager>>,
    risk: Rc<RefCell<RiskManager>>,
    execution: Rc<RefCell<ExecutionEngine>>,
    fills: Rc<RefCell<Vec<Fill>>>,
}

/// Single-use replay of historical bars through strategy, risk, execution and
/// portfolio. Build a new engine per run.
pub struct BacktestEngine {
    config: BacktestConfig,
    settings: Settings,
    source: Box<dyn BarSource>,
    storage: Arc<dyn Storage>,
    ran: bool,
}

impl BacktestEngine {
    pub fn new(
        config: BacktestConfig,
        settings: &Settings,
        source: Box<dyn BarSource>,
        storage: Arc<dyn Storage>,
    ) -> Self {
        info!(
            backtest_id = %config.backtest_id,
            symbols = ?config.symbols,
            start = ?config.start,
            end = ?config.end,
            initial_capital = config.initial_capital,
            "backtest engine initialised"
        );
        Self {
            config,
            settings: settings.clone(),
            source,
            storage,
            ran: false,
        }
    }

    pub fn config(&self) -> &BacktestConfig {
        &self.config
    }

    pub fn run(&mut self, strategy: Box<dyn Strategy>) -> Result<BacktestResults, BacktestError> {
        if self.ran {
            return Err(BacktestError::AlreadyRun);
        }
        self.ran = true;
        self.config.validate()?;

        let strategy_id = strategy.id().to_string();
        let symbols = if self.config.symbols.is_empty() {
            strategy.symbols().to_vec()
        } else {
            self.config.symbols.clone()
        };
        info!(backtest_id = %self.config.backtest_id, strategy = %strategy_id, "starting backtest");

        let bars = self.load_bars(&symbols);
        let (Some(first), Some(last)) = (bars.first(), bars.last()) else {
            error!(symbols = ?symbols, "no historical data found");
            let mut empty = BacktestResults::empty(&self.config, &strategy_id);
            empty.symbols = symbols;
            return Ok(empty);
        };
        let start = self.config.start.unwrap_or(first.timestamp);
        let end = self.config.end.unwrap_or(last.timestamp);
        let bars_processed = bars.len();
        info!(bars = bars_processed, "historical data loaded");

        let mut w = self.wire(strategy);
        let initial = self.config.initial_capital;
        let mut equity_curve: Vec<EquityPoint> = vec![(start, initial)];
        let mut closes: BTreeMap<String, f64> = BTreeMap::new();
        let mut last_day: Option<NaiveDate> = None;
        let mut handler_errors = 0u64;

        let groups = group_by_timestamp(bars);
        let total = groups.len();
        info!(timestamps = total, "processing timestamps");

        for (i, (ts, group)) in groups.into_iter().enumerate() {
            let n = i + 1;
            if n % PROGRESS_EVERY == 0 || n == total {
                info!(
                    "progress: {n}/{total} ({:.1}%)",
                    n as f64 / total as f64 * 100.0
                );
            }

            // Daily baseline uses prices from before this timestamp's bars.
            let day = ts.date_naive();
            if last_day.map_or(true, |d| day > d) {
                last_day = Some(day);
                let value = w.portfolio.borrow().portfolio_value(&closes);
                w.risk.borrow_mut().reset_daily_tracking(value);
            }

            for bar in &group {
                closes.insert(bar.symbol.clone(), bar.close);
                w.bus.publish(bar.to_market_data(self.config.asset_class));
            }
            handler_errors += w.bus.drain().handler_errors;
            w.risk.borrow_mut().release_reservations();
            for order in w.execution.borrow_mut().take_rejected() {
                w.portfolio.borrow_mut().on_order_rejected(&order);
            }

            let value = w.portfolio.borrow().portfolio_value(&closes);
            equity_curve.push((ts, value));
            w.risk.borrow_mut().update_portfolio_value(value);

            if !self.config.record_history {
                w.bus.clear_history();
            }
        }

        let risk_state = w.risk.borrow().state().clone();
        handler_errors += close_open_positions(&mut w, &closes, &equity_curve);

        let final_value = equity_curve.last().map_or(initial, |(_, v)| *v);
        let trades: Vec<PositionRecord> = w
            .portfolio
            .borrow()
            .closed_trades()
            .iter()
            .map(|p| p.to_record())
            .collect();
        let closed: Vec<ClosedTrade> = trades.iter().map(ClosedTrade::from).collect();

        info!("calculating performance metrics");
        let metrics = PerformanceCalculator::new(
            &equity_curve,
            &closed,
            initial,
            start,
            end,
            self.config.risk_free_rate,
        )
        .calculate();

        let exec_stats = w.execution.borrow().stats();
        if handler_errors > 0 || exec_stats.storage_errors > 0 {
            warn!(
                handler_errors,
                storage_errors = exec_stats.storage_errors,
                "backtest completed with component errors"
            );
        }

        let results = BacktestResults {
            backtest_id: self.config.backtest_id.clone(),
            strategy_id,
            symbols,
            start,
            end,
            initial_capital: initial,
            final_value,
            metrics,
            equity_curve,
            trades,
            fills: w.fills.borrow().clone(),
            bus_stats: Some(w.bus.stats()),
            risk_state: Some(risk_state),
            bars_processed,
        };

        self.save(&results);
        log_summary(&results.backtest_id, &results.metrics);
        Ok(results)
    }

    // ---- setup ----

    /// Per-symbol load; failures and invalid bars are logged and skipped.
    fn load_bars(&self, symbols: &[String]) -> Vec<BarRecord> {
        let mut all = Vec::new();
        for sym in symbols {
            match self.source.load(sym, self.config.start, self.config.end) {
                Ok(rows) => {
                    debug!(symbol = %sym, bars = rows.len(), "loaded");
                    for row in rows {
                        match validate_bar(&row) {
                            Ok(()) => all.push(row),
                            Err(e) => {
                                warn!(symbol = %sym, ts = %row.timestamp, error = %e, "invalid bar skipped")
                            }
                        }
                    }
                }
                Err(e) => warn!(symbol = %sym, error = %e, "market data unavailable; symbol skipped"),
            }
        }
        // chronological: no timestamp group may see a later bar
        sort_bars(&mut all);
        all
    }

    /// Subscription order matters for MarketData: execution caches the bar and
    /// the portfolio marks before the strategy's signal is queued.
    fn wire(&self, strategy: Box<dyn Strategy>) -> Wiring {
        let seed = self.config.backtest_id.as_str();
        let initial = self.config.initial_capital;
        let mut bus = EventBus::new(BusMode::Backtest);

        let execution = Rc::new(RefCell::new(ExecutionEngine::new(
            &self.settings.execution,
            Arc::clone(&self.storage),
            seed,
        )));
        let portfolio = Rc::new(RefCell::new(PortfolioManager::new(
            Arc::clone(&self.storage),
            initial,
            seed,
        )));
        let host = Rc::new(RefCell::new(
            StrategyHost::new(strategy).with_default_size(self.settings.portfolio.default_position_size),
        ));
        let risk = Rc::new(RefCell::new(
            RiskManager::new(
                RiskConfig::from(&self.settings.risk),
                Arc::clone(&self.storage),
                initial,
            )
            .with_id_seed(seed),
        ));

        ExecutionEngine::attach(&execution, &mut bus);
        PortfolioManager::attach(&portfolio, &mut bus);
        StrategyHost::attach(&host, &mut bus);
        RiskManager::attach(&risk, &mut bus);

        let fills = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&fills);
        bus.subscribe(EventKind::Fill, move |ev, _out| {
            if let Event::Fill(f) = ev {
                sink.borrow_mut().push(f.clone());
            }
            Ok(())
        });

        Wiring {
            bus,
            portfolio,
            risk,
            execution,
            fills,
        }
    }

    // ---- teardown ----

    fn save(&self, results: &BacktestResults) {
        let metrics = match serde_json::to_value(&results.metrics) {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "metrics not serialisable; saving null");
                serde_json::Value::Null
            }
        };
        let config = serde_json::to_value(&self.settings).unwrap_or(serde_json::Value::Null);

        let record = BacktestRecord {
            backtest_id: results.backtest_id.clone(),
            strategy_id: results.strategy_id.clone(),
            symbols: results.symbols.clone(),
            start: results.start,
            end: results.end,
            initial_capital: results.initial_capital,
            final_capital: results.final_value,
            metrics,
            config,
            equity_points: results.equity_curve.len(),
        };
        match self.storage.save_backtest_results(&record) {
            Ok(()) => info!(backtest_id = %record.backtest_id, "backtest results saved"),
            Err(e) => error!(backtest_id = %record.backtest_id, error = %e, "failed to save backtest results"),
        }
    }
}

/// Force-close at the last timestamp and let subscribers see the updates.
fn close_open_positions(
    w: &mut Wiring,
    closes: &BTreeMap<String, f64>,
    curve: &[EquityPoint],
) -> u64 {
    let Some(&(ts, _)) = curve.last() else {
        return 0;
    };
    let closed = w.portfolio.borrow_mut().force_close_all(closes, ts);
    if closed.is_empty() {
        return 0;
    }
    info!(positions = closed.len(), "closing open positions at end of data");
    for pos in &closed {
        w.bus.publish(pos.to_update(ts));
    }
    w.bus.drain().handler_errors
}

/// Bars must already be sorted by timestamp.
fn group_by_timestamp(bars: Vec<BarRecord>) -> Vec<(DateTime<Utc>, Vec<BarRecord>)> {
    let mut groups: Vec<(DateTime<Utc>, Vec<BarRecord>)> = Vec::new();
    for bar in bars {
        match groups.last_mut() {
            Some((ts, group)) if *ts == bar.timestamp => group.push(bar),
            _ => groups.push((bar.timestamp, vec![bar])),
        }
    }
    groups
}

fn log_summary(backtest_id: &str, m: &Metrics) {
    info!(backtest_id, "backtest complete");
    info!("total return: {:.2}%", m.returns.total_return_pct * 100.0);
    info!("sharpe ratio: {:.2}", m.risk_adjusted.sharpe_ratio);
    info!("max drawdown: {:.2}%", m.drawdown.max_drawdown_pct * 100.0);
    info!("total trades: {}", m.trades.total_trades);
}
