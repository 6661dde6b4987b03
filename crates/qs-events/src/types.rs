use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Asset class drives the commission schedule.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AssetClass {
    Crypto,
    Stock,
    Etf,
    Other,
}

impl AssetClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetClass::Crypto => "CRYPTO",
            AssetClass::Stock => "STOCK",
            AssetClass::Etf => "ETF",
            AssetClass::Other => "OTHER",
        }
    }

    /// Case-insensitive parse. Unknown labels map to `Other` (zero commission).
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_uppercase().as_str() {
            "CRYPTO" => AssetClass::Crypto,
            "STOCK" | "EQUITY" => AssetClass::Stock,
            "ETF" => AssetClass::Etf,
            _ => AssetClass::Other,
        }
    }
}

impl fmt::Display for AssetClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Direction proposed by a strategy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Direction {
    Long,
    Short,
    Exit,
    Close,
}

impl Direction {
    /// EXIT and CLOSE only reduce risk.
    pub fn is_exit(&self) -> bool {
        matches!(self, Direction::Exit | Direction::Close)
    }

    /// Order side that opens exposure in this direction.
    pub fn opening_side(&self) -> Option<OrderSide> {
        match self {
            Direction::Long => Some(OrderSide::Buy),
            Direction::Short => Some(OrderSide::Sell),
            Direction::Exit | Direction::Close => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Long => "LONG",
            Direction::Short => "SHORT",
            Direction::Exit => "EXIT",
            Direction::Close => "CLOSE",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn opposite(&self) -> Self {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "BUY",
            OrderSide::Sell => "SELL",
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderType {
    Market,
    Limit,
}

/// Order lifecycle: CREATED -> FILLED | REJECTED.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Created,
    Filled,
    Rejected,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Created => "CREATED",
            OrderStatus::Filled => "FILLED",
            OrderStatus::Rejected => "REJECTED",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PositionSide {
    Long,
    Short,
}

impl PositionSide {
    /// Position side created by an opening fill on `side`.
    pub fn from_opening(side: OrderSide) -> Self {
        match side {
            OrderSide::Buy => PositionSide::Long,
            OrderSide::Sell => PositionSide::Short,
        }
    }

    /// +1 LONG, -1 SHORT.
    pub fn sign(&self) -> f64 {
        match self {
            PositionSide::Long => 1.0,
            PositionSide::Short => -1.0,
        }
    }

    /// Order side that closes a position on this side.
    pub fn closing_side(&self) -> OrderSide {
        match self {
            PositionSide::Long => OrderSide::Sell,
            PositionSide::Short => OrderSide::Buy,
        }
    }

    /// True when a fill on `side` reduces (closes) this position.
    pub fn is_closed_by(&self, side: OrderSide) -> bool {
        self.closing_side() == side
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PositionSide::Long => "LONG",
            PositionSide::Short => "SHORT",
        }
    }
}

impl fmt::Display for PositionSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PositionStatus {
    Open,
    Closed,
}

/// Risk alert severity. CRITICAL = circuit breaker, HIGH = position level,
/// MEDIUM = symbol/portfolio level.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "LOW",
            Severity::Medium => "MEDIUM",
            Severity::High => "HIGH",
            Severity::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

/// One OHLCV observation.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Bar {
    pub fn new(open: f64, high: f64, low: f64, close: f64, volume: f64) -> Self {
        Self {
            open,
            high,
            low,
            close,
            volume,
        }
    }
}

/// A bar for one symbol at one timestamp. The bar travels with the event, so
/// consumers never read a shared "current bar" table.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MarketData {
    pub timestamp: DateTime<Utc>,
    pub symbol: String,
    pub asset_class: AssetClass,
    pub bar: Bar,
    pub source: String,
}

impl MarketData {
    pub fn new(
        timestamp: DateTime<Utc>,
        symbol: impl Into<String>,
        asset_class: AssetClass,
        bar: Bar,
    ) -> Self {
        Self {
            timestamp,
            symbol: symbol.into(),
            asset_class,
            bar,
            source: "backtest".to_string(),
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    pub fn close(&self) -> f64 {
        self.bar.close
    }
}

/// A strategy's proposed trade, before any risk check.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub timestamp: DateTime<Utc>,
    pub symbol: String,
    pub asset_class: AssetClass,
    pub strategy_id: String,
    pub direction: Direction,
    /// Reference price the strategy observed.
    pub price: f64,
    /// 0.0 ..= 1.0
    pub confidence: f64,
    /// Requested position size as a fraction of portfolio value.
    pub size_fraction: f64,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
}

impl Signal {
    pub fn new(
        timestamp: DateTime<Utc>,
        symbol: impl Into<String>,
        direction: Direction,
        price: f64,
    ) -> Self {
        Self {
            timestamp,
            symbol: symbol.into(),
            asset_class: AssetClass::Crypto,
            strategy_id: "unknown".to_string(),
            direction,
            price,
            confidence: 1.0,
            size_fraction: 0.0,
            stop_loss: None,
            take_profit: None,
        }
    }

    pub fn with_asset_class(mut self, asset_class: AssetClass) -> Self {
        self.asset_class = asset_class;
        self
    }

    pub fn with_strategy(mut self, strategy_id: impl Into<String>) -> Self {
        self.strategy_id = strategy_id.into();
        self
    }

    pub fn with_size(mut self, size_fraction: f64) -> Self {
        self.size_fraction = size_fraction;
        self
    }

    /// Clamped into [0, 1]; NaN becomes 0.
    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = if confidence.is_nan() {
            0.0
        } else {
            confidence.clamp(0.0, 1.0)
        };
        self
    }

    pub fn with_stop(mut self, stop_loss: f64) -> Self {
        self.stop_loss = Some(stop_loss);
        self
    }

    pub fn with_target(mut self, take_profit: f64) -> Self {
        self.take_profit = Some(take_profit);
        self
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub symbol: String,
    pub asset_class: AssetClass,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub quantity: f64,
    pub limit_price: Option<f64>,
    pub strategy_id: String,
    /// Set when the order closes a specific position.
    pub position_id: Option<String>,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
}

impl Order {
    pub fn market(
        id: impl Into<String>,
        timestamp: DateTime<Utc>,
        symbol: impl Into<String>,
        side: OrderSide,
        quantity: f64,
    ) -> Self {
        Self {
            id: id.into(),
            timestamp,
            symbol: symbol.into(),
            asset_class: AssetClass::Crypto,
            side,
            order_type: OrderType::Market,
            quantity,
            limit_price: None,
            strategy_id: "unknown".to_string(),
            position_id: None,
            stop_loss: None,
            take_profit: None,
        }
    }

    pub fn with_asset_class(mut self, asset_class: AssetClass) -> Self {
        self.asset_class = asset_class;
        self
    }

    pub fn with_strategy(mut self, strategy_id: impl Into<String>) -> Self {
        self.strategy_id = strategy_id.into();
        self
    }

    pub fn with_position(mut self, position_id: impl Into<String>) -> Self {
        self.position_id = Some(position_id.into());
        self
    }

    pub fn with_protection(mut self, stop_loss: Option<f64>, take_profit: Option<f64>) -> Self {
        self.stop_loss = stop_loss;
        self.take_profit = take_profit;
        self
    }
}

/// An executed order. Immutable once created.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Fill {
    pub id: String,
    pub order_id: String,
    pub timestamp: DateTime<Utc>,
    pub symbol: String,
    pub asset_class: AssetClass,
    pub side: OrderSide,
    pub quantity: f64,
    pub price: f64,
    pub commission: f64,
    pub strategy_id: String,
    pub position_id: Option<String>,
}

impl Fill {
    pub fn notional(&self) -> f64 {
        self.quantity * self.price
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PositionUpdate {
    pub timestamp: DateTime<Utc>,
    pub position_id: String,
    pub symbol: String,
    pub side: PositionSide,
    pub quantity: f64,
    pub entry_price: f64,
    pub exit_price: Option<f64>,
    pub pnl_realized: f64,
    pub pnl_unrealized: f64,
    pub status: PositionStatus,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RiskAlert {
    pub timestamp: DateTime<Utc>,
    pub alert_type: String,
    pub severity: Severity,
    pub description: String,
    pub symbol: String,
    pub strategy_id: String,
    pub metadata: BTreeMap<String, String>,
}

impl RiskAlert {
    pub fn new(
        timestamp: DateTime<Utc>,
        alert_type: impl Into<String>,
        severity: Severity,
        description: impl Into<String>,
    ) -> Self {
        Self {
            timestamp,
            alert_type: alert_type.into(),
            severity,
            description: description.into(),
            symbol: String::new(),
            strategy_id: String::new(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn for_signal(mut self, signal: &Signal) -> Self {
        self.symbol = signal.symbol.clone();
        self.strategy_id = signal.strategy_id.clone();
        self
    }

    pub fn with_meta(mut self, k: impl Into<String>, v: impl ToString) -> Self {
        self.metadata.insert(k.into(), v.to_string());
        self
    }
}
