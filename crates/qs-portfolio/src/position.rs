use chrono::{DateTime, Utc};
use qs_events::{AssetClass, Fill, PositionSide, PositionStatus, PositionUpdate};
use qs_storage::PositionRecord;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// One position lifecycle: OPEN -> (adds) -> CLOSED (terminal).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub id: String,
    pub symbol: String,
    pub asset_class: AssetClass,
    pub side: PositionSide,
    pub quantity: f64,
    /// Volume-weighted average entry price.
    pub entry_price: f64,
    pub entry_time: DateTime<Utc>,
    pub strategy_id: String,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    pub entry_commission: f64,
    pub exit_commission: f64,
    pub status: PositionStatus,
    pub exit_price: Option<f64>,
    pub exit_time: Option<DateTime<Utc>>,
    pub pnl_realized: f64,
    pub pnl_unrealized: f64,
}

impl Position {
    pub fn new(
        id: impl Into<String>,
        symbol: impl Into<String>,
        side: PositionSide,
        quantity: f64,
        entry_price: f64,
        entry_time: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            symbol: symbol.into(),
            asset_class: AssetClass::Crypto,
            side,
            quantity,
            entry_price,
            entry_time,
            strategy_id: "unknown".to_string(),
            stop_loss: None,
            take_profit: None,
            entry_commission: 0.0,
            exit_commission: 0.0,
            status: PositionStatus::Open,
            exit_price: None,
            exit_time: None,
            pnl_realized: 0.0,
            pnl_unrealized: 0.0,
        }
    }

    /// Position opened by `fill` (BUY -> LONG, SELL -> SHORT).
    pub fn from_fill(id: impl Into<String>, fill: &Fill) -> Self {
        Self::new(
            id,
            fill.symbol.clone(),
            PositionSide::from_opening(fill.side),
            fill.quantity,
            fill.price,
            fill.timestamp,
        )
        .with_asset_class(fill.asset_class)
        .with_strategy(fill.strategy_id.clone())
        .with_entry_commission(fill.commission)
    }

    pub fn with_asset_class(mut self, asset_class: AssetClass) -> Self {
        self.asset_class = asset_class;
        self
    }

    pub fn with_strategy(mut self, strategy_id: impl Into<String>) -> Self {
        self.strategy_id = strategy_id.into();
        self
    }

    pub fn with_entry_commission(mut self, commission: f64) -> Self {
        self.entry_commission = commission;
        self
    }

    pub fn with_stops(mut self, stop_loss: Option<f64>, take_profit: Option<f64>) -> Self {
        self.stop_loss = stop_loss;
        self.take_profit = take_profit;
        self
    }

    pub fn is_open(&self) -> bool {
        self.status == PositionStatus::Open
    }

    pub fn cost_basis(&self) -> f64 {
        self.entry_price * self.quantity
    }

    /// Mark to `price`. Returns unrealized P&L net of entry commission; 0 once closed.
    pub fn update_market_price(&mut self, price: f64) -> f64 {
        if !self.is_open() {
            return 0.0;
        }
        self.pnl_unrealized =
            self.side.sign() * (price - self.entry_price) * self.quantity - self.entry_commission;
        self.pnl_unrealized
    }

    /// Same-side fill: weighted-average entry, entry commission accumulates.
    pub fn add(&mut self, quantity: f64, price: f64, commission: f64) {
        if !self.is_open() {
            warn!(position_id = %self.id, "add ignored on closed position");
            return;
        }
        let total = self.quantity + quantity;
        if total <= 0.0 {
            return;
        }
        self.entry_price = (self.quantity * self.entry_price + quantity * price) / total;
        self.quantity = total;
        self.entry_commission += commission;
    }

    /// Close at `exit_price`. Idempotent: a second call returns the cached realized P&L.
    pub fn close(&mut self, exit_price: f64, exit_time: DateTime<Utc>, commission: f64) -> f64 {
        if !self.is_open() {
            warn!(position_id = %self.id, "position already closed");
            return self.pnl_realized;
        }

        self.exit_price = Some(exit_price);
        self.exit_time = Some(exit_time);
        self.exit_commission = commission;
        self.status = PositionStatus::Closed;
        self.pnl_realized = self.side.sign() * (exit_price - self.entry_price) * self.quantity
            - (self.entry_commission + self.exit_commission);
        self.pnl_unrealized = 0.0;

        info!(
            position_id = %self.id,
            symbol = %self.symbol,
            side = %self.side,
            qty = self.quantity,
            exit_price,
            pnl = self.pnl_realized,
            "position closed"
        );
        self.pnl_realized
    }

    /// P&L as a percent of cost basis (realized when closed, unrealized when open).
    pub fn get_return_pct(&self) -> f64 {
        let basis = self.cost_basis();
        if basis == 0.0 {
            return 0.0;
        }
        let pnl = if self.is_open() {
            self.pnl_unrealized
        } else {
            self.pnl_realized
        };
        pnl / basis * 100.0
    }

    pub fn should_stop_loss(&self, price: f64) -> bool {
        match (self.stop_loss, self.is_open()) {
            (Some(stop), true) => match self.side {
                PositionSide::Long => price <= stop,
                PositionSide::Short => price >= stop,
            },
            _ => false,
        }
    }

    pub fn should_take_profit(&self, price: f64) -> bool {
        match (self.take_profit, self.is_open()) {
            (Some(target), true) => match self.side {
                PositionSide::Long => price >= target,
                PositionSide::Short => price <= target,
            },
            _ => false,
        }
    }

    /// `None` leaves the current level unchanged.
    pub fn update_stops(&mut self, stop_loss: Option<f64>, take_profit: Option<f64>) {
        if let Some(s) = stop_loss {
            info!(position_id = %self.id, old = ?self.stop_loss, new = s, "stop-loss updated");
            self.stop_loss = Some(s);
        }
        if let Some(t) = take_profit {
            info!(position_id = %self.id, old = ?self.take_profit, new = t, "take-profit updated");
            self.take_profit = Some(t);
        }
    }

    /// LONG: quantity * price. SHORT: entry proceeds - current cost. 0 when closed.
    pub fn value(&self, price: f64) -> f64 {
        if !self.is_open() {
            return 0.0;
        }
        match self.side {
            PositionSide::Long => self.quantity * price,
            PositionSide::Short => self.quantity * self.entry_price - self.quantity * price,
        }
    }

    /// Contribution to portfolio value on top of cash. Short sale proceeds are
    /// already in cash, so a short marks as the liability to buy back.
    pub fn market_value(&self, price: f64) -> f64 {
        if !self.is_open() {
            return 0.0;
        }
        self.side.sign() * self.quantity * price
    }

    pub fn holding_hours(&self) -> Option<f64> {
        self.exit_time
            .map(|t| (t - self.entry_time).num_seconds() as f64 / 3600.0)
    }

    pub fn to_record(&self) -> PositionRecord {
        PositionRecord {
            id: self.id.clone(),
            symbol: self.symbol.clone(),
            asset_class: self.asset_class,
            side: self.side,
            quantity: self.quantity,
            entry_price: self.entry_price,
            entry_time: self.entry_time,
            exit_price: self.exit_price,
            exit_time: self.exit_time,
            stop_loss: self.stop_loss,
            take_profit: self.take_profit,
            entry_commission: self.entry_commission,
            exit_commission: self.exit_commission,
            pnl_realized: self.pnl_realized,
            status: self.status,
            strategy_id: self.strategy_id.clone(),
        }
    }

    pub fn to_update(&self, timestamp: DateTime<Utc>) -> PositionUpdate {
        PositionUpdate {
            timestamp,
            position_id: self.id.clone(),
            symbol: self.symbol.clone(),
            side: self.side,
            quantity: self.quantity,
            entry_price: self.entry_price,
            exit_price: self.exit_price,
            pnl_realized: self.pnl_realized,
            pnl_unrealized: self.pnl_unrealized,
            status: self.status,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, h, 0, 0).unwrap()
    }

    #[test]
    fn add_uses_weighted_average_entry() {
        let mut p = Position::new("P1", "ETH/USD", PositionSide::Long, 2.0, 100.0, t(0))
            .with_entry_commission(1.0);
        p.add(1.0, 130.0, 0.5);
        assert!((p.entry_price - 110.0).abs() < 1e-9);
        assert_eq!(p.quantity, 3.0);
        assert!((p.entry_commission - 1.5).abs() < 1e-12);
    }

    #[test]
    fn short_unrealized_and_value() {
        let mut p = Position::new("P1", "X", PositionSide::Short, 10.0, 50.0, t(0))
            .with_entry_commission(2.0);
        assert!((p.update_market_price(45.0) - 48.0).abs() < 1e-9);
        assert!((p.value(45.0) - 50.0).abs() < 1e-9);
        assert!((p.market_value(45.0) + 450.0).abs() < 1e-9);
    }

    #[test]
    fn close_is_idempotent() {
        let mut p = Position::new("P1", "X", PositionSide::Long, 1.0, 100.0, t(0));
        let first = p.close(110.0, t(2), 1.0);
        let second = p.close(90.0, t(3), 5.0);
        assert_eq!(first, second);
        assert_eq!(p.exit_price, Some(110.0));
        assert_eq!(p.exit_time, Some(t(2)));
        assert_eq!(p.update_market_price(500.0), 0.0);
        assert_eq!(p.holding_hours(), Some(2.0));
    }

    #[test]
    fn stop_and_target_depend_on_side() {
        let long = Position::new("L", "X", PositionSide::Long, 1.0, 100.0, t(0))
            .with_stops(Some(95.0), Some(110.0));
        assert!(long.should_stop_loss(95.0));
        assert!(!long.should_stop_loss(96.0));
        assert!(long.should_take_profit(111.0));

        let short = Position::new("S", "X", PositionSide::Short, 1.0, 100.0, t(0))
            .with_stops(Some(105.0), Some(90.0));
        assert!(short.should_stop_loss(105.5));
        assert!(!short.should_stop_loss(104.0));
        assert!(short.should_take_profit(90.0));
        assert!(!short.should_take_profit(91.0));
    }

    #[test]
    fn update_stops_none_keeps_level() {
        let mut p = Position::new("P", "X", PositionSide::Long, 1.0, 100.0, t(0))
            .with_stops(Some(95.0), Some(120.0));
        p.update_stops(None, Some(130.0));
        assert_eq!(p.stop_loss, Some(95.0));
        assert_eq!(p.take_profit, Some(130.0));
    }

    #[test]
    fn return_pct_open_and_closed() {
        let mut p = Position::new("P", "X", PositionSide::Long, 2.0, 100.0, t(0));
        p.update_market_price(105.0);
        assert!((p.get_return_pct() - 5.0).abs() < 1e-9);
        p.close(90.0, t(1), 0.0);
        assert!((p.get_return_pct() + 10.0).abs() < 1e-9);
    }
}
