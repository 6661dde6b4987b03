use chrono::{DateTime, Utc};
use qs_events::{
    AssetClass, Order, OrderStatus, PositionSide, PositionStatus, RiskAlert, Severity,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Persisted snapshot of a position.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PositionRecord {
    pub id: String,
    pub symbol: String,
    pub asset_class: AssetClass,
    pub side: PositionSide,
    pub quantity: f64,
    pub entry_price: f64,
    pub entry_time: DateTime<Utc>,
    pub exit_price: Option<f64>,
    pub exit_time: Option<DateTime<Utc>>,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    pub entry_commission: f64,
    pub exit_commission: f64,
    pub pnl_realized: f64,
    pub status: PositionStatus,
    pub strategy_id: String,
}

impl PositionRecord {
    /// Notional at entry price; the exposure basis used by risk checks.
    pub fn entry_notional(&self) -> f64 {
        self.quantity * self.entry_price
    }

    pub fn is_open(&self) -> bool {
        self.status == PositionStatus::Open
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OrderRecord {
    pub order: Order,
    pub status: OrderStatus,
    pub reject_reason: Option<String>,
}

impl OrderRecord {
    pub fn created(order: &Order) -> Self {
        Self {
            order: order.clone(),
            status: OrderStatus::Created,
            reject_reason: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RiskEventRecord {
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub severity: Severity,
    pub description: String,
    pub symbol: String,
    pub strategy_id: String,
    pub metadata: BTreeMap<String, String>,
}

impl From<&RiskAlert> for RiskEventRecord {
    fn from(a: &RiskAlert) -> Self {
        Self {
            timestamp: a.timestamp,
            event_type: a.alert_type.clone(),
            severity: a.severity,
            description: a.description.clone(),
            symbol: a.symbol.clone(),
            strategy_id: a.strategy_id.clone(),
            metadata: a.metadata.clone(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BacktestRecord {
    pub backtest_id: String,
    pub strategy_id: String,
    pub symbols: Vec<String>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub initial_capital: f64,
    pub final_capital: f64,
    pub metrics: Value,
    pub config: Value,
    pub equity_points: usize,
}
