use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use qs_events::{
    Event, EventBus, EventKind, Fill, IdGen, MarketData, Order, OrderSide, PositionSide,
    PositionUpdate,
};
use qs_storage::Storage;
use tracing::{debug, info, warn};

use crate::position::Position;

/// What a fill did to the book.
#[derive(Clone, Debug, PartialEq)]
pub enum FillOutcome {
    Opened(PositionUpdate),
    Added(PositionUpdate),
    Closed(PositionUpdate),
}

impl FillOutcome {
    pub fn update(&self) -> &PositionUpdate {
        match self {
            FillOutcome::Opened(u) | FillOutcome::Added(u) | FillOutcome::Closed(u) => u,
        }
    }

    pub fn into_update(self) -> PositionUpdate {
        match self {
            FillOutcome::Opened(u) | FillOutcome::Added(u) | FillOutcome::Closed(u) => u,
        }
    }
}

/// Stop/target of an order awaiting its fill.
#[derive(Clone, Copy, Debug, PartialEq)]
struct Protection {
    stop_loss: Option<f64>,
    take_profit: Option<f64>,
}

/// Fill-driven book: cash, at most one open position per symbol, last prices.
///
/// The in-memory book is authoritative; storage writes are best effort.
pub struct PortfolioManager {
    storage: Arc<dyn Storage>,
    ids: IdGen,
    initial_cash: f64,
    cash: f64,
    positions: BTreeMap<String, Position>,
    closed: Vec<Position>,
    last_prices: BTreeMap<String, f64>,
    /// order id -> protection carried from the order onto the opened position
    protection: BTreeMap<String, Protection>,
}

impl PortfolioManager {
    pub fn new(storage: Arc<dyn Storage>, initial_cash: f64, id_seed: &str) -> Self {
        info!(initial_cash, "portfolio manager initialised");
        Self {
            storage,
            ids: IdGen::new(&format!("{id_seed}/positions")),
            initial_cash,
            cash: initial_cash,
            positions: BTreeMap::new(),
            closed: Vec::new(),
            last_prices: BTreeMap::new(),
            protection: BTreeMap::new(),
        }
    }

    /// Subscribe to MarketData (marks), Order (protection levels) and Fill.
    pub fn attach(this: &Rc<RefCell<Self>>, bus: &mut EventBus) {
        let pm = Rc::clone(this);
        bus.subscribe(EventKind::MarketData, move |ev, _out| {
            if let Event::MarketData(md) = ev {
                pm.borrow_mut().on_market_data(md);
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

    // ---- event handlers ----

    pub fn on_market_data(&mut self, md: &MarketData) {
        let price = md.close();
        self.last_prices.insert(md.symbol.clone(), price);
        if let Some(p) = self.positions.get_mut(&md.symbol) {
            p.update_market_price(price);
        }
    }

    /// Remember an order's stop/target so the position it opens carries them.
    pub fn note_order(&mut self, order: &Order) {
        if order.stop_loss.is_some() || order.take_profit.is_some() {
            self.protection.insert(
                order.id.clone(),
                Protection {
                    stop_loss: order.stop_loss,
                    take_profit: order.take_profit,
                },
            );
        }
    }

    /// Execution refused the order; it will never fill.
    pub fn on_order_rejected(&mut self, order: &Order) {
        if self.protection.remove(&order.id).is_some() {
            debug!(order_id = %order.id, "protection dropped for rejected order");
        }
    }

    /// Decision table: flat -> open; opposite side -> close; same side -> add.
    pub fn on_fill(&mut self, fill: &Fill) -> FillOutcome {
        let protection = self.protection.remove(&fill.order_id);
        self.last_prices.insert(fill.symbol.clone(), fill.price);

        let existing_side = self.positions.get(&fill.symbol).map(|p| p.side);
        match existing_side {
            None => self.open(fill, protection),
            Some(side) if side.is_closed_by(fill.side) => self.close(fill),
            Some(_) => self.add(fill),
        }
    }

    fn open(&mut self, fill: &Fill, protection: Option<Protection>) -> FillOutcome {
        self.cash += self.opening_cash_delta(fill);

        let id = self.ids.next_id("POS");
        let mut pos = Position::from_fill(id, fill);
        if let Some(p) = protection {
            pos = pos.with_stops(p.stop_loss, p.take_profit);
        }
        pos.update_market_price(fill.price);

        if let Err(e) = self.storage.create_position(&pos.to_record()) {
            warn!(position_id = %pos.id, error = %e, "failed to persist opened position");
        }
        info!(
            position_id = %pos.id,
            symbol = %pos.symbol,
            side = %pos.side,
            qty = pos.quantity,
            price = pos.entry_price,
            cash = self.cash,
            "position opened"
        );

        let update = pos.to_update(fill.timestamp);
        self.positions.insert(fill.symbol.clone(), pos);
        FillOutcome::Opened(update)
    }

    fn add(&mut self, fill: &Fill) -> FillOutcome {
        self.cash += self.opening_cash_delta(fill);

        let update = match self.positions.get_mut(&fill.symbol) {
            Some(pos) => {
                pos.add(fill.quantity, fill.price, fill.commission);
                pos.update_market_price(fill.price);
                if let Err(e) = self.storage.update_position(&pos.to_record()) {
                    warn!(position_id = %pos.id, error = %e, "failed to persist position add");
                }
                info!(
                    position_id = %pos.id,
                    symbol = %pos.symbol,
                    added = fill.quantity,
                    avg_entry = pos.entry_price,
                    "added to position"
                );
                pos.to_update(fill.timestamp)
            }
            None => return self.open(fill, None),
        };
        FillOutcome::Added(update)
    }

    fn close(&mut self, fill: &Fill) -> FillOutcome {
        let Some(mut pos) = self.positions.remove(&fill.symbol) else {
            return self.open(fill, None);
        };

        if let Some(linked) = fill.position_id.as_deref() {
            if linked != pos.id {
                warn!(linked, position_id = %pos.id, "fill linked to a different position");
            }
        }
        if (fill.quantity - pos.quantity).abs() > 1e-9 * pos.quantity.max(1.0) {
            warn!(
                position_id = %pos.id,
                fill_qty = fill.quantity,
                position_qty = pos.quantity,
                "closing fill quantity differs; settling the full position"
            );
        }

        // Settle on the position's quantity; the whole position closes.
        let notional = pos.quantity * fill.price;
        self.cash += match pos.side {
            PositionSide::Long => notional - fill.commission,
            PositionSide::Short => -(notional + fill.commission),
        };

        pos.close(fill.price, fill.timestamp, fill.commission);
        if let Err(e) = self.storage.update_position(&pos.to_record()) {
            warn!(position_id = %pos.id, error = %e, "failed to persist closed position");
        }

        let update = pos.to_update(fill.timestamp);
        self.closed.push(pos);
        FillOutcome::Closed(update)
    }

    fn opening_cash_delta(&self, fill: &Fill) -> f64 {
        let notional = fill.notional();
        match fill.side {
            OrderSide::Buy => -(notional + fill.commission),
            OrderSide::Sell => notional - fill.commission,
        }
    }

    // ---- queries ----

    pub fn initial_cash(&self) -> f64 {
        self.initial_cash
    }

    pub fn cash(&self) -> f64 {
        self.cash
    }

    pub fn positions(&self) -> &BTreeMap<String, Position> {
        &self.positions
    }

    pub fn position(&self, symbol: &str) -> Option<&Position> {
        self.positions.get(symbol)
    }

    pub fn position_mut(&mut self, symbol: &str) -> Option<&mut Position> {
        self.positions.get_mut(symbol)
    }

    pub fn last_prices(&self) -> &BTreeMap<String, f64> {
        &self.last_prices
    }

    /// Orders whose stop/target is still waiting for a fill.
    pub fn pending_protection(&self) -> usize {
        self.protection.len()
    }

    /// Closed positions in close order.
    pub fn closed_trades(&self) -> &[Position] {
        &self.closed
    }

    /// cash + mark-to-market of open positions. A missing price falls back to
    /// the entry price.
    pub fn portfolio_value(&self, prices: &BTreeMap<String, f64>) -> f64 {
        let mut total = self.cash;
        for (sym, pos) in &self.positions {
            let price = match prices.get(sym) {
                Some(p) => *p,
                None => {
                    warn!(symbol = %sym, "no current price, using entry price");
                    pos.entry_price
                }
            };
            total += pos.market_value(price);
        }
        total
    }

    /// Value at the last observed prices.
    pub fn marked_value(&self) -> f64 {
        self.portfolio_value(&self.last_prices)
    }

    /// Close every open position at `prices` (falling back to the last seen
    /// price, then entry). No exit commission.
    pub fn force_close_all(
        &mut self,
        prices: &BTreeMap<String, f64>,
        ts: DateTime<Utc>,
    ) -> Vec<Position> {
        let symbols: Vec<String> = self.positions.keys().cloned().collect();
        let mut out = Vec::with_capacity(symbols.len());

        for sym in symbols {
            let Some(mut pos) = self.positions.remove(&sym) else {
                continue;
            };
            let price = prices
                .get(&sym)
                .or_else(|| self.last_prices.get(&sym))
                .copied()
                .unwrap_or(pos.entry_price);

            self.cash += pos.market_value(price);
            pos.close(price, ts, 0.0);
            if let Err(e) = self.storage.update_position(&pos.to_record()) {
                warn!(position_id = %pos.id, error = %e, "failed to persist force-closed position");
            }
            debug!(position_id = %pos.id, price, "force-closed at horizon");

            self.closed.push(pos.clone());
            out.push(pos);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use qs_events::{AssetClass, PositionStatus};
    use qs_storage::MemoryStorage;

    fn t(h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, h, 0, 0).unwrap()
    }

    fn fill(order_id: &str, side: OrderSide, qty: f64, price: f64, commission: f64, h: u32) -> Fill {
        Fill {
            id: format!("FIL-{order_id}"),
            order_id: order_id.to_string(),
            timestamp: t(h),
            symbol: "BTC/USD".to_string(),
            asset_class: AssetClass::Crypto,
            side,
            quantity: qty,
            price,
            commission,
            strategy_id: "s".to_string(),
            position_id: None,
        }
    }

    #[test]
    fn short_round_trip_at_flat_price_costs_only_commission() {
        let storage = Arc::new(MemoryStorage::new());
        let mut pm = PortfolioManager::new(storage, 10_000.0, "t");

        pm.on_fill(&fill("O1", OrderSide::Sell, 2.0, 100.0, 1.0, 0));
        assert!((pm.cash() - 10_199.0).abs() < 1e-9);
        let prices = BTreeMap::from([("BTC/USD".to_string(), 100.0)]);
        assert!((pm.portfolio_value(&prices) - 9_999.0).abs() < 1e-9);

        let out = pm.on_fill(&fill("O2", OrderSide::Buy, 2.0, 100.0, 1.0, 1));
        assert!(matches!(out, FillOutcome::Closed(_)));
        assert!((pm.cash() - 9_998.0).abs() < 1e-9);
        assert!((pm.closed_trades()[0].pnl_realized + 2.0).abs() < 1e-9);
    }

    #[test]
    fn order_protection_lands_on_position() {
        let storage = Arc::new(MemoryStorage::new());
        let mut pm = PortfolioManager::new(storage, 10_000.0, "t");
        let o = Order::market("O1", t(0), "BTC/USD", OrderSide::Buy, 1.0)
            .with_protection(Some(95.0), Some(120.0));
        pm.note_order(&o);
        pm.on_fill(&fill("O1", OrderSide::Buy, 1.0, 100.0, 0.0, 0));

        let p = pm.position("BTC/USD").unwrap();
        assert_eq!(p.stop_loss, Some(95.0));
        assert_eq!(p.take_profit, Some(120.0));
    }

    #[test]
    fn rejected_order_drops_its_protection() {
        let storage = Arc::new(MemoryStorage::new());
        let mut pm = PortfolioManager::new(storage, 10_000.0, "t");
        let o1 = Order::market("O1", t(1), "BTC/USD", OrderSide::Buy, 1.0).with_protection(Some(95.0), None);
        let o2 = Order::market("O2", t(1), "ETH/USD", OrderSide::Buy, 1.0).with_protection(Some(95.0), None);
        pm.note_order(&o1);
        pm.note_order(&o2);
        assert_eq!(pm.pending_protection(), 2);

        pm.on_order_rejected(&o1);
        assert_eq!(pm.pending_protection(), 1);
        pm.on_fill(&Fill { symbol: "ETH/USD".into(), ..fill("O2", OrderSide::Buy, 1.0, 100.0, 0.0, 1) });
        assert_eq!(pm.pending_protection(), 0);
    }

    #[test]
    fn force_close_falls_back_to_entry_price() {
        let storage = Arc::new(MemoryStorage::new());
        let mut pm = PortfolioManager::new(storage.clone(), 10_000.0, "t");
        pm.on_fill(&fill("O1", OrderSide::Buy, 1.0, 100.0, 0.0, 0));
        pm.last_prices.clear();

        let closed = pm.force_close_all(&BTreeMap::new(), t(5));
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].exit_price, Some(100.0));
        assert_eq!(closed[0].exit_commission, 0.0);
        assert!((pm.cash() - 10_000.0).abs() < 1e-9);
        assert!(pm.positions().is_empty());

        let rec = storage.get_position(&closed[0].id).unwrap().unwrap();
        assert_eq!(rec.status, PositionStatus::Closed);
    }
}
