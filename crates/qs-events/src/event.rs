use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::{Fill, MarketData, Order, PositionUpdate, RiskAlert, Signal};

/// Discriminant used for subscription and history filtering.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    MarketData,
    Signal,
    Order,
    Fill,
    PositionUpdate,
    RiskAlert,
}

impl EventKind {
    pub const ALL: [EventKind; 6] = [
        EventKind::MarketData,
        EventKind::Signal,
        EventKind::Order,
        EventKind::Fill,
        EventKind::PositionUpdate,
        EventKind::RiskAlert,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::MarketData => "market_data",
            EventKind::Signal => "signal",
            EventKind::Order => "order",
            EventKind::Fill => "fill",
            EventKind::PositionUpdate => "position_update",
            EventKind::RiskAlert => "risk_alert",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Every message routed through the bus. Immutable once published.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    MarketData(MarketData),
    Signal(Signal),
    Order(Order),
    Fill(Fill),
    PositionUpdate(PositionUpdate),
    RiskAlert(RiskAlert),
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::MarketData(_) => EventKind::MarketData,
            Event::Signal(_) => EventKind::Signal,
            Event::Order(_) => EventKind::Order,
            Event::Fill(_) => EventKind::Fill,
            Event::PositionUpdate(_) => EventKind::PositionUpdate,
            Event::RiskAlert(_) => EventKind::RiskAlert,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Event::MarketData(e) => e.timestamp,
            Event::Signal(e) => e.timestamp,
            Event::Order(e) => e.timestamp,
            Event::Fill(e) => e.timestamp,
            Event::PositionUpdate(e) => e.timestamp,
            Event::RiskAlert(e) => e.timestamp,
        }
    }

    pub fn symbol(&self) -> &str {
        match self {
            Event::MarketData(e) => &e.symbol,
            Event::Signal(e) => &e.symbol,
            Event::Order(e) => &e.symbol,
            Event::Fill(e) => &e.symbol,
            Event::PositionUpdate(e) => &e.symbol,
            Event::RiskAlert(e) => &e.symbol,
        }
    }
}

impl From<MarketData> for Event {
    fn from(e: MarketData) -> Self {
        Event::MarketData(e)
    }
}

impl From<Signal> for Event {
    fn from(e: Signal) -> Self {
        Event::Signal(e)
    }
}

impl From<Order> for Event {
    fn from(e: Order) -> Self {
        Event::Order(e)
    }
}

impl From<Fill> for Event {
    fn from(e: Fill) -> Self {
        Event::Fill(e)
    }
}

impl From<PositionUpdate> for Event {
    fn from(e: PositionUpdate) -> Self {
        Event::PositionUpdate(e)
    }
}

impl From<RiskAlert> for Event {
    fn from(e: RiskAlert) -> Self {
        Event::RiskAlert(e)
    }
}
