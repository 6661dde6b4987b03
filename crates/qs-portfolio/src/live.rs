use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;
use std::sync::Arc;

use qs_events::{
    Direction, Event, EventBus, EventKind, Fill, IdGen, MarketData, Order, PositionSide,
    RiskAlert, Signal, SignalGate,
};
use qs_storage::Storage;
use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::manager::{FillOutcome, PortfolioManager};

/// Result of routing one signal through the live portfolio.
#[derive(Clone, Debug, PartialEq)]
pub enum SignalAction {
    Order(Order),
    Rejected(RiskAlert),
    Ignored(&'static str),
}

/// Live-mode portfolio. Owns the fill-driven book and additionally sizes
/// signals into orders and watches stops/targets on every bar.
pub struct LivePortfolioManager {
    book: PortfolioManager,
    order_ids: IdGen,
    default_position_size: f64,
    gate: Option<Box<dyn SignalGate>>,
    /// positions with an exit order in flight, cleared by its fill or rejection
    pending_exit: BTreeSet<String>,
}

impl LivePortfolioManager {
    pub fn new(
        storage: Arc<dyn Storage>,
        initial_cash: f64,
        default_position_size: f64,
        id_seed: &str,
    ) -> Self {
        Self {
            book: PortfolioManager::new(storage, initial_cash, id_seed),
            order_ids: IdGen::new(&format!("{id_seed}/live-orders")),
            default_position_size,
            gate: None,
            pending_exit: BTreeSet::new(),
        }
    }

    /// Screen opening signals through `gate` (typically the risk manager).
    pub fn with_gate(mut self, gate: Box<dyn SignalGate>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn book(&self) -> &PortfolioManager {
        &self.book
    }

    pub fn attach(this: &Rc<RefCell<Self>>, bus: &mut EventBus) {
        let pm = Rc::clone(this);
        bus.subscribe(EventKind::MarketData, move |ev, out| {
            if let Event::MarketData(md) = ev {
                for order in pm.borrow_mut().on_market_data(md) {
                    out.publish(order);
                }
            }
            Ok(())
        });

        let pm = Rc::clone(this);
        bus.subscribe(EventKind::Signal, move |ev, out| {
            if let Event::Signal(s) = ev {
                match pm.borrow_mut().on_signal(s) {
                    SignalAction::Order(o) => out.publish(o),
                    SignalAction::Rejected(alert) => out.publish(alert),
                    SignalAction::Ignored(_) => {}
                }
            }
            Ok(())
        });

        let pm = Rc::clone(this);
        bus.subscribe(EventKind::Order, move |ev, _out| {
            if let Event::Order(o) = ev {
                pm.borrow_mut().note_order(o);
            }
            Ok(())
        });

        let pm = Rc::clone(this);
        bus.subscribe(EventKind::Fill, move |ev, out| {
            if let Event::Fill(f) = ev {
                let outcome = pm.borrow_mut().on_fill(f);
                out.publish(outcome.into_update());
            }
            Ok(())
        });
    }

    // ---- signals ----

    pub fn on_signal(&mut self, signal: &Signal) -> SignalAction {
        let held = self.book.position(&signal.symbol).map(|p| (p.side, p.id.clone()));

        match (signal.direction, held) {
            (Direction::Exit | Direction::Close, None) => SignalAction::Ignored("no open position"),
            (Direction::Exit | Direction::Close, Some(_)) => self.exit_order(signal),
            (Direction::Long, Some((PositionSide::Long, _)))
            | (Direction::Short, Some((PositionSide::Short, _))) => {
                SignalAction::Ignored("already positioned")
            }
            // Opposite direction closes now; a later signal may open the other side.
            (Direction::Long | Direction::Short, Some(_)) => self.exit_order(signal),
            (Direction::Long | Direction::Short, None) => self.entry_order(signal),
        }
    }

    fn entry_order(&mut self, signal: &Signal) -> SignalAction {
        let Some(side) = signal.direction.opening_side() else {
            return SignalAction::Ignored("not an entry");
        };

        if let Some(gate) = self.gate.as_mut() {
            if let Err(alert) = gate.screen(signal) {
                return SignalAction::Rejected(alert);
            }
        }

        let fraction = if signal.size_fraction > 0.0 {
            signal.size_fraction
        } else {
            self.default_position_size
        };
        let pv = self.book.marked_value();
        if !(signal.price.is_finite() && signal.price > 0.0) {
            return SignalAction::Ignored("invalid reference price");
        }
        let quantity = fraction * pv / signal.price;
        if !(quantity.is_finite() && quantity > 0.0) {
            return SignalAction::Ignored("zero size");
        }

        let order = Order::market(
            self.order_ids.next_id("ORD"),
            signal.timestamp,
            signal.symbol.clone(),
            side,
            quantity,
        )
        .with_asset_class(signal.asset_class)
        .with_strategy(signal.strategy_id.clone())
        .with_protection(signal.stop_loss, signal.take_profit);

        info!(order_id = %order.id, symbol = %order.symbol, side = %order.side, qty = quantity, "live entry order");
        SignalAction::Order(order)
    }

    fn exit_order(&mut self, signal: &Signal) -> SignalAction {
        match self.close_order_for(&signal.symbol, signal.timestamp) {
            Some(o) => SignalAction::Order(o),
            None => SignalAction::Ignored("exit already pending"),
        }
    }

    /// Exit order for the open position on `symbol`, at most one in flight.
    fn close_order_for(&mut self, symbol: &str, ts: DateTime<Utc>) -> Option<Order> {
        let pos = self.book.position(symbol)?;
        if self.pending_exit.contains(&pos.id) {
            return None;
        }
        let order = Order::market(
            self.order_ids.next_id("ORD"),
            ts,
            symbol,
            pos.side.closing_side(),
            pos.quantity,
        )
        .with_asset_class(pos.asset_class)
        .with_strategy(pos.strategy_id.clone())
        .with_position(pos.id.clone());

        self.pending_exit.insert(pos.id.clone());
        Some(order)
    }

    // ---- market data / fills ----

    /// Mark, then check stop-loss before take-profit. Returns exit orders to publish.
    pub fn on_market_data(&mut self, md: &MarketData) -> Vec<Order> {
        self.book.on_market_data(md);
        let price = md.close();

        let trigger = match self.book.position(&md.symbol) {
            Some(p) if p.should_stop_loss(price) => Some("stop_loss"),
            Some(p) if p.should_take_profit(price) => Some("take_profit"),
            _ => None,
        };

        match trigger {
            Some(reason) => match self.close_order_for(&md.symbol, md.timestamp) {
                Some(order) => {
                    info!(symbol = %md.symbol, price, reason, order_id = %order.id, "protective exit");
                    vec![order]
                }
                None => Vec::new(),
            },
            None => Vec::new(),
        }
    }

    pub fn note_order(&mut self, order: &Order) {
        self.book.note_order(order);
    }

    /// Execution refused `order`: an exit may be retried on the next trigger.
    pub fn on_order_rejected(&mut self, order: &Order) {
        self.book.on_order_rejected(order);
        if let Some(id) = order.position_id.as_deref() {
            if self.pending_exit.remove(id) {
                debug!(position_id = id, order_id = %order.id, "exit rejected, guard released");
            }
        }
    }

    pub fn on_fill(&mut self, fill: &Fill) -> FillOutcome {
        let outcome = self.book.on_fill(fill);
        if let FillOutcome::Closed(u) = &outcome {
            self.pending_exit.remove(&u.position_id);
            debug!(position_id = %u.position_id, "exit settled");
        }
        outcome
    }

    pub fn pending_exits(&self) -> usize {
        self.pending_exit.len()
    }

    pub fn cash(&self) -> f64 {
        self.book.cash()
    }

    pub fn marked_value(&self) -> f64 {
        self.book.marked_value()
    }

    pub fn last_prices(&self) -> &BTreeMap<String, f64> {
        self.book.last_prices()
    }
}
