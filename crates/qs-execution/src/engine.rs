use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

use qs_config::ExecutionSettings;
use qs_events::{Event, EventBus, EventKind, Fill, IdGen, MarketData, Order, OrderStatus};
use qs_storage::{OrderRecord, Storage, StorageError};
use tracing::{debug, error, info, warn};

use crate::commission::CommissionSchedule;
use crate::slippage::SlippageModel;

/// Why an order could not be filled.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OrderRejection {
    MissingId,
    MissingSymbol,
    NonPositiveQuantity,
    NoMarketData { symbol: String },
}

impl fmt::Display for OrderRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderRejection::MissingId => write!(f, "order has no id"),
            OrderRejection::MissingSymbol => write!(f, "order has no symbol"),
            OrderRejection::NonPositiveQuantity => write!(f, "order quantity must be positive"),
            OrderRejection::NoMarketData { symbol } => {
                write!(f, "no market data for {}", symbol)
            }
        }
    }
}

impl std::error::Error for OrderRejection {}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ExecutionStats {
    pub filled: u64,
    pub rejected: u64,
    pub storage_errors: u64,
}

/// Simulated broker: fills every valid order immediately and completely on
/// the latest bar for its symbol.
///
/// Fill price is conservative (BUY from the bar high, SELL from the bar low)
/// with slippage applied against the trader.
pub struct ExecutionEngine {
    slippage: SlippageModel,
    commission: CommissionSchedule,
    storage: Arc<dyn Storage>,
    ids: IdGen,
    last_bar: BTreeMap<String, MarketData>,
    stats: ExecutionStats,
    /// refused since the last `take_rejected`
    rejected: Vec<Order>,
}

impl ExecutionEngine {
    pub fn new(settings: &ExecutionSettings, storage: Arc<dyn Storage>, id_seed: &str) -> Self {
        Self {
            slippage: SlippageModel::from(&settings.slippage),
            commission: CommissionSchedule::from(&settings.commission),
            storage,
            ids: IdGen::new(&format!("{id_seed}/fills")),
            last_bar: BTreeMap::new(),
            stats: ExecutionStats::default(),
            rejected: Vec::new(),
        }
    }

    /// Subscribe to MarketData (bar cache) and Order; publishes Fill.
    pub fn attach(this: &Rc<RefCell<Self>>, bus: &mut EventBus) {
        let ex = Rc::clone(this);
        bus.subscribe(EventKind::MarketData, move |ev, _out| {
            if let Event::MarketData(md) = ev {
                ex.borrow_mut().on_market_data(md);
            }
            Ok(())
        });

        let ex = Rc::clone(this);
        bus.subscribe(EventKind::Order, move |ev, out| {
            if let Event::Order(o) = ev {
                if let Ok(fill) = ex.borrow_mut().execute(o) {
                    out.publish(fill);
                }
            }
            Ok(())
        });
    }

    pub fn slippage_model(&self) -> &SlippageModel {
        &self.slippage
    }

    pub fn commission_schedule(&self) -> &CommissionSchedule {
        &self.commission
    }

    pub fn stats(&self) -> ExecutionStats {
        self.stats
    }

    /// Orders refused since the previous call. Rejections publish no event.
    pub fn take_rejected(&mut self) -> Vec<Order> {
        std::mem::take(&mut self.rejected)
    }

    pub fn on_market_data(&mut self, md: &MarketData) {
        self.last_bar.insert(md.symbol.clone(), md.clone());
    }

    pub fn last_bar(&self, symbol: &str) -> Option<&MarketData> {
        self.last_bar.get(symbol)
    }

    /// Validate, price and record one order.
    pub fn execute(&mut self, order: &Order) -> Result<Fill, OrderRejection> {
        if !order.id.is_empty() {
            self.persist(|s| match s.create_order(&OrderRecord::created(order)) {
                // same order routed twice; keep the first record
                Err(StorageError::Duplicate { .. }) => Ok(()),
                other => other,
            });
        }

        let validated = self.validate(order).map(MarketData::clone);
        let md = match validated {
            Ok(md) => md,
            Err(rejection) => {
                warn!(order_id = %order.id, symbol = %order.symbol, reason = %rejection, "order rejected");
                self.stats.rejected += 1;
                self.rejected.push(order.clone());
                if !order.id.is_empty() {
                    let reason = rejection.to_string();
                    self.persist(|s| {
                        s.update_order_status(&order.id, OrderStatus::Rejected, Some(&reason))
                    });
                }
                return Err(rejection);
            }
        };

        let bar = md.bar;
        let base = SlippageModel::base_price(order.side, &bar);
        let price = self.slippage.fill_price(order.side, order.quantity, &bar);
        let commission =
            self.commission
                .commission(order.side, order.quantity, price, order.asset_class);

        let fill = Fill {
            id: self.ids.next_id("FIL"),
            order_id: order.id.clone(),
            timestamp: md.timestamp,
            symbol: order.symbol.clone(),
            asset_class: order.asset_class,
            side: order.side,
            quantity: order.quantity,
            price,
            commission,
            strategy_id: order.strategy_id.clone(),
            position_id: order.position_id.clone(),
        };

        self.persist(|s| s.update_order_status(&order.id, OrderStatus::Filled, None));
        self.persist(|s| s.record_fill(&fill));
        self.stats.filled += 1;

        info!(
            fill_id = %fill.id,
            order_id = %fill.order_id,
            symbol = %fill.symbol,
            side = %fill.side,
            qty = fill.quantity,
            base_price = base,
            price = fill.price,
            commission = fill.commission,
            "order filled"
        );
        Ok(fill)
    }

    fn validate(&self, order: &Order) -> Result<&MarketData, OrderRejection> {
        if order.id.trim().is_empty() {
            return Err(OrderRejection::MissingId);
        }
        if order.symbol.trim().is_empty() {
            return Err(OrderRejection::MissingSymbol);
        }
        if !(order.quantity.is_finite() && order.quantity > 0.0) {
            return Err(OrderRejection::NonPositiveQuantity);
        }
        self.last_bar
            .get(&order.symbol)
            .ok_or_else(|| OrderRejection::NoMarketData {
                symbol: order.symbol.clone(),
            })
    }

    /// Storage failures are logged and counted; the simulated fill stands.
    fn persist<F>(&mut self, op: F)
    where
        F: FnOnce(&dyn Storage) -> Result<(), StorageError>,
    {
        if let Err(e) = op(self.storage.as_ref()) {
            self.stats.storage_errors += 1;
            error!(error = %e, "execution persistence failed");
        } else {
            debug!("execution record persisted");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use qs_events::{AssetClass, Bar, OrderSide};
    use qs_storage::MemoryStorage;

    fn engine() -> (ExecutionEngine, Arc<MemoryStorage>) {
        let storage = Arc::new(MemoryStorage::new());
        let ex = ExecutionEngine::new(&ExecutionSettings::default(), storage.clone(), "t");
        (ex, storage)
    }

    fn ts() -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn fill_uses_bar_timestamp_and_links_position() {
        let (mut ex, _) = engine();
        ex.on_market_data(&MarketData::new(
            ts(),
            "BTC/USD",
            AssetClass::Crypto,
            Bar::new(100.0, 101.0, 99.0, 100.0, 1_000.0),
        ));
        let order = Order::market("ORD-1", ts() + chrono::Duration::hours(1), "BTC/USD", OrderSide::Sell, 1.0)
            .with_position("POS-1")
            .with_strategy("s1");
        let fill = ex.execute(&order).unwrap();
        assert_eq!(fill.timestamp, ts());
        assert_eq!(fill.position_id.as_deref(), Some("POS-1"));
        assert_eq!(fill.strategy_id, "s1");
        assert!(fill.price <= 99.0);
    }

    #[test]
    fn rejection_is_persisted_with_reason() {
        let (mut ex, storage) = engine();
        let order = Order::market("ORD-9", ts(), "ETH/USD", OrderSide::Buy, 1.0);
        let err = ex.execute(&order).unwrap_err();
        assert_eq!(
            err,
            OrderRejection::NoMarketData {
                symbol: "ETH/USD".into()
            }
        );
        let rec = storage.get_order("ORD-9").unwrap().unwrap();
        assert_eq!(rec.status, OrderStatus::Rejected);
        assert_eq!(rec.reject_reason.as_deref(), Some("no market data for ETH/USD"));
        assert_eq!(ex.stats().rejected, 1);
        assert_eq!(ex.take_rejected(), vec![order]);
        assert!(ex.take_rejected().is_empty());
    }

    #[test]
    fn invalid_orders_rejected_before_pricing() {
        let (mut ex, _) = engine();
        ex.on_market_data(&MarketData::new(
            ts(),
            "X",
            AssetClass::Other,
            Bar::new(1.0, 1.0, 1.0, 1.0, 1.0),
        ));
        let no_id = Order::market("", ts(), "X", OrderSide::Buy, 1.0);
        let no_sym = Order::market("ORD-2", ts(), "", OrderSide::Buy, 1.0);
        let zero = Order::market("ORD-3", ts(), "X", OrderSide::Buy, 0.0);
        assert_eq!(ex.execute(&no_id), Err(OrderRejection::MissingId));
        assert_eq!(ex.execute(&no_sym), Err(OrderRejection::MissingSymbol));
        assert_eq!(ex.execute(&zero), Err(OrderRejection::NonPositiveQuantity));
    }
}
