use std::fmt;

use chrono::{DateTime, Utc};
use qs_config::Settings;
use qs_events::{AssetClass, BusStats, Fill};
use qs_md::parse_timestamp;
use qs_metrics::{EquityPoint, Metrics};
use qs_risk::RiskState;
use qs_storage::PositionRecord;
use serde::Serialize;

/// Backtest run parameters, resolved from `Settings.backtest`.
#[derive(Clone, Debug, PartialEq)]
pub struct BacktestConfig {
    pub backtest_id: String,
    /// Empty means "the strategy's symbols".
    pub symbols: Vec<String>,
    /// Inclusive bounds. `None` takes the first/last bar seen.
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub initial_capital: f64,
    pub risk_free_rate: f64,
    pub asset_class: AssetClass,
    /// Keep the bus history for the whole run (memory grows with the run).
    pub record_history: bool,
}

impl BacktestConfig {
    pub fn from_settings(settings: &Settings) -> Result<Self, BacktestError> {
        let bt = &settings.backtest;
        let start = parse_bound("backtest.start", bt.start.as_deref())?;
        let end = parse_bound("backtest.end", bt.end.as_deref())?;

        let cfg = Self {
            backtest_id: bt
                .backtest_id
                .clone()
                .unwrap_or_else(|| format!("bt_{}", Utc::now().format("%Y%m%d_%H%M%S"))),
            symbols: bt.symbols.clone(),
            start,
            end,
            initial_capital: bt.initial_capital,
            risk_free_rate: bt.risk_free_rate,
            asset_class: AssetClass::parse(&bt.asset_class),
            record_history: bt.record_history,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    /// Fixed id, 100k capital, no bounds. Intended for tests.
    pub fn test_defaults() -> Self {
        Self {
            backtest_id: "bt_test".to_string(),
            symbols: Vec::new(),
            start: None,
            end: None,
            initial_capital: 100_000.0,
            risk_free_rate: 0.03,
            asset_class: AssetClass::Crypto,
            record_history: true,
        }
    }

    pub fn validate(&self) -> Result<(), BacktestError> {
        if self.backtest_id.trim().is_empty() {
            return Err(BacktestError::InvalidConfig("backtest_id is empty".into()));
        }
        if !(self.initial_capital.is_finite() && self.initial_capital > 0.0) {
            return Err(BacktestError::InvalidConfig(format!(
                "initial_capital must be positive, got {}",
                self.initial_capital
            )));
        }
        if let (Some(s), Some(e)) = (self.start, self.end) {
            if s > e {
                return Err(BacktestError::InvalidConfig(format!(
                    "start {s} is after end {e}"
                )));
            }
        }
        Ok(())
    }
}

fn parse_bound(key: &str, raw: Option<&str>) -> Result<Option<DateTime<Utc>>, BacktestError> {
    match raw {
        None => Ok(None),
        Some(s) => parse_timestamp(s)
            .map(Some)
            .ok_or_else(|| BacktestError::InvalidConfig(format!("{key}: unparseable timestamp '{s}'"))),
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BacktestError {
    /// `run` was already called on this engine.
    AlreadyRun,
    InvalidConfig(String),
}

impl fmt::Display for BacktestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BacktestError::AlreadyRun => write!(f, "backtest engine already run; build a new one"),
            BacktestError::InvalidConfig(msg) => write!(f, "invalid backtest config: {msg}"),
        }
    }
}

impl std::error::Error for BacktestError {}

/// Everything a report needs from one run.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct BacktestResults {
    pub backtest_id: String,
    pub strategy_id: String,
    pub symbols: Vec<String>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub initial_capital: f64,
    pub final_value: f64,
    pub metrics: Metrics,
    pub equity_curve: Vec<EquityPoint>,
    /// Closed positions in exit order, force-closes included.
    pub trades: Vec<PositionRecord>,
    pub fills: Vec<Fill>,
    pub bus_stats: Option<BusStats>,
    /// Risk state after the last timestamp, before the horizon force-close.
    pub risk_state: Option<RiskState>,
    pub bars_processed: usize,
}

impl BacktestResults {
    /// No data: zero metrics, curve holding only the initial point.
    pub fn empty(config: &BacktestConfig, strategy_id: &str) -> Self {
        let start = config.start.unwrap_or_default();
        let end = config.end.unwrap_or(start);
        Self {
            backtest_id: config.backtest_id.clone(),
            strategy_id: strategy_id.to_string(),
            symbols: config.symbols.clone(),
            start,
            end,
            initial_capital: config.initial_capital,
            final_value: config.initial_capital,
            metrics: Metrics::empty(),
            equity_curve: vec![(start, config.initial_capital)],
            trades: Vec::new(),
            fills: Vec::new(),
            bus_stats: None,
            risk_state: None,
            bars_processed: 0,
        }
    }

    pub fn total_return_pct(&self) -> f64 {
        self.metrics.returns.total_return_pct
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn from_settings_parses_bounds_and_asset_class() {
        let mut s = Settings::default();
        s.backtest.backtest_id = Some("bt_1".into());
        s.backtest.start = Some("2024-01-01".into());
        s.backtest.end = Some("2024-03-31T00:00:00Z".into());
        s.backtest.asset_class = "stock".into();

        let cfg = BacktestConfig::from_settings(&s).unwrap();
        assert_eq!(cfg.backtest_id, "bt_1");
        assert_eq!(cfg.start, Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()));
        assert_eq!(cfg.end, Some(Utc.with_ymd_and_hms(2024, 3, 31, 0, 0, 0).unwrap()));
        assert_eq!(cfg.asset_class, AssetClass::Stock);
    }

    #[test]
    fn inverted_bounds_rejected() {
        let mut s = Settings::default();
        s.backtest.start = Some("2024-02-01".into());
        s.backtest.end = Some("2024-01-01".into());
        assert!(matches!(
            BacktestConfig::from_settings(&s),
            Err(BacktestError::InvalidConfig(_))
        ));
    }

    #[test]
    fn garbage_bound_rejected() {
        let mut s = Settings::default();
        s.backtest.start = Some("last tuesday".into());
        let err = BacktestConfig::from_settings(&s).unwrap_err();
        assert!(err.to_string().contains("backtest.start"));
    }

    #[test]
    fn generated_id_when_unset() {
        let cfg = BacktestConfig::from_settings(&Settings::default()).unwrap();
        assert!(cfg.backtest_id.starts_with("bt_"));
    }

    #[test]
    fn empty_results_hold_initial_point() {
        let mut cfg = BacktestConfig::test_defaults();
        cfg.start = Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        let r = BacktestResults::empty(&cfg, "mr");
        assert_eq!(r.equity_curve, vec![(cfg.start.unwrap(), 100_000.0)]);
        assert_eq!(r.final_value, 100_000.0);
        assert_eq!(r.metrics, Metrics::empty());
        assert_eq!(r.end, r.start);
    }
}
