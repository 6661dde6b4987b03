use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use qs_storage::PositionRecord;
use serde::{Deserialize, Deserializer, Serialize};

/// One (timestamp, portfolio value) observation.
pub type EquityPoint = (DateTime<Utc>, f64);

/// Minimal view of a closed trade for statistics.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClosedTrade {
    pub pnl_realized: f64,
    pub entry_time: DateTime<Utc>,
    pub exit_time: Option<DateTime<Utc>>,
}

impl From<&PositionRecord> for ClosedTrade {
    fn from(r: &PositionRecord) -> Self {
        Self {
            pnl_realized: r.pnl_realized,
            entry_time: r.entry_time,
            exit_time: r.exit_time,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ReturnMetrics {
    /// Currency.
    pub total_return: f64,
    /// Fraction of initial capital.
    pub total_return_pct: f64,
    pub cagr: f64,
    pub annualized_return: f64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RiskAdjustedMetrics {
    pub sharpe_ratio: f64,
    pub sortino_ratio: f64,
    pub calmar_ratio: f64,
    pub volatility: f64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DrawdownMetrics {
    /// Currency, <= 0.
    pub max_drawdown: f64,
    /// Fraction, <= 0.
    pub max_drawdown_pct: f64,
    pub avg_drawdown: f64,
    pub max_dd_duration_days: i64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TradeMetrics {
    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub win_rate: f64,
    /// +inf with winners and no losers; serialised as JSON null.
    #[serde(deserialize_with = "factor_or_infinite")]
    pub profit_factor: f64,
    pub expectancy: f64,
    pub avg_win: f64,
    pub avg_loss: f64,
    pub max_win: f64,
    pub max_loss: f64,
    pub avg_trade_duration_hours: f64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MonthlyMetrics {
    pub best_month: f64,
    pub worst_month: f64,
    pub avg_month: f64,
    pub positive_months_pct: f64,
    /// `YYYY-MM` -> return over the previous month's close.
    pub monthly_returns: BTreeMap<String, f64>,
}

/// Full report. Keys are stable: `returns`, `risk_adjusted`, `drawdown`,
/// `trades`, `monthly`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    pub returns: ReturnMetrics,
    pub risk_adjusted: RiskAdjustedMetrics,
    pub drawdown: DrawdownMetrics,
    pub trades: TradeMetrics,
    pub monthly: MonthlyMetrics,
}

impl Metrics {
    /// All-zero metrics for degenerate inputs.
    pub fn empty() -> Self {
        Self::default()
    }
}

fn factor_or_infinite<'de, D>(d: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let v: Option<f64> = Option::deserialize(d)?;
    Ok(v.unwrap_or(f64::INFINITY))
}
