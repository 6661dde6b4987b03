use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use qs_events::{Event, EventBus, EventKind, Fill, IdGen, Order, RiskAlert, Signal, SignalGate};
use qs_storage::{RiskEventRecord, Storage};
use tracing::{debug, error, info, warn};

use crate::types::{ReasonCode, Rejection, RiskConfig, RiskOutcome, RiskState};

pub const SIGNAL_REJECTED: &str = "SIGNAL_REJECTED";

/// Layered pre-trade validator.
///
/// Check order, first failure wins:
/// 1. circuit breakers (sticky)
/// 2. position: size fraction and stop distance
/// 3. symbol exposure
/// 4. portfolio exposure
///
/// CLOSE/EXIT bypasses all checks.
///
/// Exposure counts persisted open positions plus entries approved but not yet
/// filled, so several signals in one drain share a single budget.
pub struct RiskManager {
    config: RiskConfig,
    state: RiskState,
    storage: Arc<dyn Storage>,
    ids: IdGen,
    reserved: Vec<Reservation>,
}

/// Entry notional approved but not yet visible in storage.
#[derive(Clone, Debug, PartialEq)]
struct Reservation {
    /// `None` when screened as a gate; the caller assigns the order id.
    order_id: Option<String>,
    symbol: String,
    notional: f64,
}

impl RiskManager {
    pub fn new(config: RiskConfig, storage: Arc<dyn Storage>, initial_capital: f64) -> Self {
        info!(
            max_position_pct = config.max_position_pct,
            max_symbol_exposure = config.max_symbol_exposure,
            max_portfolio_exposure = config.max_portfolio_exposure,
            daily_loss_limit = config.daily_loss_limit,
            max_drawdown = config.max_drawdown,
            "risk manager initialised"
        );
        Self {
            config,
            state: RiskState::new(initial_capital),
            storage,
            ids: IdGen::new("risk/orders"),
            reserved: Vec::new(),
        }
    }

    /// Seed for the order id sequence (one per run keeps ids reproducible).
    pub fn with_id_seed(mut self, seed: &str) -> Self {
        self.ids = IdGen::new(&format!("{seed}/orders"));
        self
    }

    /// Subscribe to Signal (publishes Order or RiskAlert) and Fill.
    pub fn attach(this: &Rc<RefCell<Self>>, bus: &mut EventBus) {
        Self::observe_fills(this, bus);
        let rm = Rc::clone(this);
        bus.subscribe(EventKind::Signal, move |ev, out| {
            if let Event::Signal(s) = ev {
                match rm.borrow_mut().evaluate(s) {
                    RiskOutcome::Approved(order) => out.publish(order),
                    RiskOutcome::Rejected(alert) => out.publish(alert),
                    RiskOutcome::Skipped => {}
                }
            }
            Ok(())
        });
    }

    /// Release reservations as their fills land. Subscribe after the
    /// portfolio so the position is persisted first.
    pub fn observe_fills(this: &Rc<RefCell<Self>>, bus: &mut EventBus) {
        let rm = Rc::clone(this);
        bus.subscribe(EventKind::Fill, move |ev, _out| {
            if let Event::Fill(f) = ev {
                rm.borrow_mut().on_fill(f);
            }
            Ok(())
        });
    }

    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    pub fn state(&self) -> &RiskState {
        &self.state
    }

    // ---- state maintenance ----

    /// Peak advances only while the breaker is inactive.
    pub fn update_portfolio_value(&mut self, value: f64) {
        self.state.portfolio_value = value;
        if !self.state.circuit_breaker_active && value > self.state.peak_equity {
            self.state.peak_equity = value;
        }
    }

    /// Day boundary: daily loss is measured from `value` from now on.
    pub fn reset_daily_tracking(&mut self, value: f64) {
        debug!(daily_start_equity = value, "daily tracking reset");
        self.state.daily_start_equity = value;
    }

    /// Operator action. Re-baselines daily start and peak to the current value
    /// so the same breach does not re-trip immediately.
    pub fn reset_circuit_breaker(&mut self) {
        warn!(portfolio_value = self.state.portfolio_value, "circuit breaker manually reset");
        self.state.circuit_breaker_active = false;
        self.state.daily_start_equity = self.state.portfolio_value;
        self.state.peak_equity = self.state.portfolio_value;
    }

    // ---- reservations ----

    /// Drop the reservation an entry fill settles. Exit fills carry a
    /// position id and never match a gate reservation.
    pub fn on_fill(&mut self, fill: &Fill) {
        let idx = self
            .reserved
            .iter()
            .position(|r| r.order_id.as_deref() == Some(fill.order_id.as_str()))
            .or_else(|| {
                if fill.position_id.is_some() {
                    return None;
                }
                self.reserved
                    .iter()
                    .position(|r| r.order_id.is_none() && r.symbol == fill.symbol)
            });
        if let Some(i) = idx {
            let r = self.reserved.remove(i);
            debug!(symbol = %r.symbol, notional = r.notional, "reservation settled");
        }
    }

    /// End of a drain: whatever was not filled by now never will be.
    pub fn release_reservations(&mut self) {
        if !self.reserved.is_empty() {
            debug!(count = self.reserved.len(), "unfilled reservations released");
            self.reserved.clear();
        }
    }

    pub fn reserved_notional(&self, symbol: Option<&str>) -> f64 {
        self.reserved
            .iter()
            .filter(|r| symbol.map_or(true, |s| r.symbol == s))
            .map(|r| r.notional)
            .sum()
    }

    fn reserve(&mut self, order_id: Option<String>, signal: &Signal) {
        self.reserved.push(Reservation {
            order_id,
            symbol: signal.symbol.clone(),
            notional: signal.size_fraction * self.state.portfolio_value,
        });
    }

    // ---- evaluation ----

    pub fn evaluate(&mut self, signal: &Signal) -> RiskOutcome {
        if signal.direction.is_exit() {
            return self.exit_order(signal);
        }

        if let Err(rej) = self.check(signal) {
            return RiskOutcome::Rejected(self.reject(signal, rej));
        }

        let Some(side) = signal.direction.opening_side() else {
            return RiskOutcome::Skipped;
        };
        let quantity = signal.size_fraction * self.state.portfolio_value / signal.price;
        let order = Order::market(
            self.ids.next_id("ORD"),
            signal.timestamp,
            signal.symbol.clone(),
            side,
            quantity,
        )
        .with_asset_class(signal.asset_class)
        .with_strategy(signal.strategy_id.clone())
        .with_protection(signal.stop_loss, signal.take_profit);
        self.reserve(Some(order.id.clone()), signal);

        info!(
            order_id = %order.id,
            symbol = %signal.symbol,
            side = %side,
            qty = quantity,
            size_fraction = signal.size_fraction,
            "signal approved"
        );
        RiskOutcome::Approved(order)
    }

    /// Run every check without emitting an order.
    pub fn check(&mut self, signal: &Signal) -> Result<(), Rejection> {
        self.check_circuit_breakers()?;
        check_price(signal)?;
        self.check_position(signal)?;

        let new_notional = signal.size_fraction * self.state.portfolio_value;
        self.check_symbol(&signal.symbol, new_notional)?;
        self.check_portfolio(new_notional)?;
        Ok(())
    }

    fn check_circuit_breakers(&mut self) -> Result<(), Rejection> {
        if self.state.circuit_breaker_active {
            return Err(Rejection::new(
                ReasonCode::BreakerActive,
                "circuit breaker active, trading halted",
            ));
        }

        let value = self.state.portfolio_value;

        if self.state.daily_start_equity > 0.0 {
            let daily_pnl_pct =
                (value - self.state.daily_start_equity) / self.state.daily_start_equity;
            if daily_pnl_pct < -self.config.daily_loss_limit {
                self.state.circuit_breaker_active = true;
                let detail = format!(
                    "daily loss {:.2}% exceeds limit {:.2}%",
                    daily_pnl_pct * 100.0,
                    -self.config.daily_loss_limit * 100.0
                );
                error!(%detail, "CIRCUIT BREAKER TRIPPED");
                return Err(Rejection::new(ReasonCode::DailyLossLimitBreached, detail));
            }
        }

        if self.state.peak_equity > 0.0 {
            let drawdown_pct = (self.state.peak_equity - value) / self.state.peak_equity;
            if drawdown_pct > self.config.max_drawdown {
                self.state.circuit_breaker_active = true;
                let detail = format!(
                    "drawdown {:.2}% exceeds limit {:.2}%",
                    drawdown_pct * 100.0,
                    self.config.max_drawdown * 100.0
                );
                error!(%detail, "CIRCUIT BREAKER TRIPPED");
                return Err(Rejection::new(ReasonCode::MaxDrawdownBreached, detail));
            }
        }

        if value > self.state.peak_equity {
            self.state.peak_equity = value;
            debug!(peak_equity = value, "new peak equity");
        }
        Ok(())
    }

    fn check_position(&self, signal: &Signal) -> Result<(), Rejection> {
        let fraction = signal.size_fraction;
        if !fraction.is_finite() || fraction < 0.0 {
            return Err(Rejection::new(
                ReasonCode::PositionSizeExceeded,
                format!("invalid size fraction {fraction}"),
            ));
        }
        if fraction > self.config.max_position_pct {
            return Err(Rejection::new(
                ReasonCode::PositionSizeExceeded,
                format!(
                    "position size {:.1}% exceeds limit {:.1}%",
                    fraction * 100.0,
                    self.config.max_position_pct * 100.0
                ),
            ));
        }

        let Some(stop) = signal.stop_loss else {
            return Err(Rejection::new(
                ReasonCode::StopLossMissing,
                "stop-loss required but not provided",
            ));
        };
        let dist = (signal.price - stop).abs() / signal.price;
        if !(dist >= self.config.min_stop_pct) {
            return Err(Rejection::new(
                ReasonCode::StopLossTooTight,
                format!(
                    "stop-loss too tight: {:.2}% < {:.2}%",
                    dist * 100.0,
                    self.config.min_stop_pct * 100.0
                ),
            ));
        }
        if dist > self.config.max_stop_pct {
            return Err(Rejection::new(
                ReasonCode::StopLossTooWide,
                format!(
                    "stop-loss too wide: {:.2}% > {:.2}%",
                    dist * 100.0,
                    self.config.max_stop_pct * 100.0
                ),
            ));
        }
        Ok(())
    }

    fn check_symbol(&self, symbol: &str, new_notional: f64) -> Result<(), Rejection> {
        let existing: f64 = self
            .storage
            .open_positions(Some(symbol))
            .map_err(storage_rejection)?
            .iter()
            .map(|p| p.entry_notional())
            .sum::<f64>()
            + self.reserved_notional(Some(symbol));

        let pct = exposure_pct(existing + new_notional, self.state.portfolio_value);
        if pct > self.config.max_symbol_exposure {
            return Err(Rejection::new(
                ReasonCode::SymbolExposureExceeded,
                format!(
                    "symbol exposure {:.1}% exceeds limit {:.1}% (existing {:.0}, new {:.0})",
                    pct * 100.0,
                    self.config.max_symbol_exposure * 100.0,
                    existing,
                    new_notional
                ),
            ));
        }
        debug!(symbol, exposure_pct = pct, "symbol exposure ok");
        Ok(())
    }

    fn check_portfolio(&self, new_notional: f64) -> Result<(), Rejection> {
        let invested: f64 = self
            .storage
            .open_positions(None)
            .map_err(storage_rejection)?
            .iter()
            .map(|p| p.entry_notional())
            .sum::<f64>()
            + self.reserved_notional(None);

        let total = invested + new_notional;
        let pct = exposure_pct(total, self.state.portfolio_value);
        if pct > self.config.max_portfolio_exposure {
            return Err(Rejection::new(
                ReasonCode::PortfolioExposureExceeded,
                format!(
                    "portfolio exposure {:.1}% exceeds limit {:.1}% (invested {:.0}, portfolio {:.0})",
                    pct * 100.0,
                    self.config.max_portfolio_exposure * 100.0,
                    total,
                    self.state.portfolio_value
                ),
            ));
        }
        debug!(exposure_pct = pct, "portfolio exposure ok");
        Ok(())
    }

    fn exit_order(&mut self, signal: &Signal) -> RiskOutcome {
        let open = match self.storage.open_positions(Some(&signal.symbol)) {
            Ok(v) => v,
            Err(e) => return RiskOutcome::Rejected(self.reject(signal, storage_rejection(e))),
        };
        let Some(pos) = open.into_iter().next() else {
            debug!(symbol = %signal.symbol, direction = signal.direction.as_str(), "exit skipped, nothing open");
            return RiskOutcome::Skipped;
        };

        let order = Order::market(
            self.ids.next_id("ORD"),
            signal.timestamp,
            signal.symbol.clone(),
            pos.side.closing_side(),
            pos.quantity,
        )
        .with_asset_class(pos.asset_class)
        .with_strategy(signal.strategy_id.clone())
        .with_position(pos.id.clone());

        info!(order_id = %order.id, position_id = %pos.id, symbol = %signal.symbol, "exit approved without validation");
        RiskOutcome::Approved(order)
    }

    fn reject(&self, signal: &Signal, rej: Rejection) -> RiskAlert {
        let level = rej.code.level();
        warn!(
            symbol = %signal.symbol,
            level = level.as_str(),
            reason = rej.code.as_str(),
            detail = %rej.detail,
            "signal rejected"
        );

        let alert = RiskAlert::new(signal.timestamp, SIGNAL_REJECTED, level.severity(), rej.detail)
            .for_signal(signal)
            .with_meta("reason_code", rej.code.as_str())
            .with_meta("level", level.as_str())
            .with_meta("direction", signal.direction.as_str())
            .with_meta("signal_price", signal.price)
            .with_meta("signal_confidence", signal.confidence)
            .with_meta("portfolio_value", self.state.portfolio_value)
            .with_meta("circuit_breaker_active", self.state.circuit_breaker_active);

        if let Err(e) = self.storage.log_risk_event(&RiskEventRecord::from(&alert)) {
            warn!(error = %e, "failed to persist risk event");
        }
        alert
    }
}

impl SignalGate for RiskManager {
    fn screen(&mut self, signal: &Signal) -> Result<(), RiskAlert> {
        if signal.direction.is_exit() {
            return Ok(());
        }
        self.check(signal).map_err(|rej| self.reject(signal, rej))?;
        self.reserve(None, signal);
        Ok(())
    }
}

fn check_price(signal: &Signal) -> Result<(), Rejection> {
    if signal.price.is_finite() && signal.price > 0.0 {
        Ok(())
    } else {
        Err(Rejection::new(
            ReasonCode::InvalidPrice,
            format!("processing error: invalid reference price {}", signal.price),
        ))
    }
}

fn storage_rejection(e: qs_storage::StorageError) -> Rejection {
    Rejection::new(ReasonCode::StorageError, format!("processing error: {e}"))
}

fn exposure_pct(notional: f64, portfolio_value: f64) -> f64 {
    if portfolio_value > 0.0 {
        notional / portfolio_value
    } else if notional > 0.0 {
        f64::INFINITY
    } else {
        0.0
    }
}
