use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use qs_events::{AssetClass, Bar, MarketData};
use serde::{Deserialize, Serialize};

/// One historical OHLCV row.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BarRecord {
    pub timestamp: DateTime<Utc>,
    pub symbol: String,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl BarRecord {
    pub fn bar(&self) -> Bar {
        Bar::new(self.open, self.high, self.low, self.close, self.volume)
    }

    pub fn to_market_data(&self, asset_class: AssetClass) -> MarketData {
        MarketData::new(self.timestamp, self.symbol.clone(), asset_class, self.bar())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum BarError {
    EmptySymbol,
    NonFinite { field: &'static str },
    NegativePrice { field: &'static str, value: f64 },
    NegativeVolume(f64),
    OhlcViolation(String),
}

impl fmt::Display for BarError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BarError::EmptySymbol => write!(f, "symbol is empty"),
            BarError::NonFinite { field } => write!(f, "field '{field}' is not finite"),
            BarError::NegativePrice { field, value } => {
                write!(f, "price field '{field}' is negative: {value}")
            }
            BarError::NegativeVolume(v) => write!(f, "volume must be >= 0, got {v}"),
            BarError::OhlcViolation(msg) => write!(f, "OHLC sanity violation: {msg}"),
        }
    }
}

impl std::error::Error for BarError {}

/// Data-quality gate for a single bar.
pub fn validate_bar(b: &BarRecord) -> Result<(), BarError> {
    if b.symbol.trim().is_empty() {
        return Err(BarError::EmptySymbol);
    }
    for (field, v) in [
        ("open", b.open),
        ("high", b.high),
        ("low", b.low),
        ("close", b.close),
        ("volume", b.volume),
    ] {
        if !v.is_finite() {
            return Err(BarError::NonFinite { field });
        }
    }
    for (field, v) in [("open", b.open), ("high", b.high), ("low", b.low), ("close", b.close)] {
        if v < 0.0 {
            return Err(BarError::NegativePrice { field, value: v });
        }
    }
    if b.volume < 0.0 {
        return Err(BarError::NegativeVolume(b.volume));
    }
    if b.high < b.open.max(b.close) {
        return Err(BarError::OhlcViolation(format!(
            "high ({}) < max(open, close) ({})",
            b.high,
            b.open.max(b.close)
        )));
    }
    if b.low > b.open.min(b.close) {
        return Err(BarError::OhlcViolation(format!(
            "low ({}) > min(open, close) ({})",
            b.low,
            b.open.min(b.close)
        )));
    }
    Ok(())
}

/// RFC 3339, `YYYY-MM-DD HH:MM:SS` (UTC) or `YYYY-MM-DD` (midnight UTC).
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Some(ndt.and_utc());
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|ndt| ndt.and_utc())
}

/// Chronological order; ties broken by symbol so replays are stable.
pub fn sort_bars(bars: &mut [BarRecord]) {
    bars.sort_by(|a, b| {
        a.timestamp
            .cmp(&b.timestamp)
            .then_with(|| a.symbol.cmp(&b.symbol))
    });
}
