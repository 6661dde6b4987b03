use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::layered::{load_layered_yaml, LoadedConfig};

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

/// Risk limits. All values are fractions of portfolio value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskSettings {
    pub max_position_pct: f64,
    pub min_stop_pct: f64,
    pub max_stop_pct: f64,
    pub max_symbol_exposure: f64,
    pub max_portfolio_exposure: f64,
    /// Daily loss that trips the circuit breaker.
    pub daily_loss_limit: f64,
    /// Drawdown from peak that trips the circuit breaker.
    pub max_drawdown: f64,
}

impl Default for RiskSettings {
    fn default() -> Self {
        Self {
            max_position_pct: 0.10,
            min_stop_pct: 0.005,
            max_stop_pct: 0.10,
            max_symbol_exposure: 0.15,
            max_portfolio_exposure: 0.80,
            daily_loss_limit: 0.05,
            max_drawdown: 0.20,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SlippageSettings {
    pub base_pct: f64,
    pub volume_impact_factor: f64,
    pub volatility_factor: f64,
    /// Cap on total slippage as a fraction of base price.
    pub max_pct: f64,
}

impl Default for SlippageSettings {
    fn default() -> Self {
        Self {
            base_pct: 0.001,
            volume_impact_factor: 0.00001,
            volatility_factor: 0.5,
            max_pct: 0.02,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommissionSettings {
    /// Fraction of notional.
    pub crypto_taker_fee: f64,
    /// Fraction of sell notional.
    pub stock_sec_fee: f64,
    /// Per unit sold.
    pub stock_finra_taf: f64,
}

impl Default for CommissionSettings {
    fn default() -> Self {
        Self {
            crypto_taker_fee: 0.006,
            stock_sec_fee: 0.0000278,
            stock_finra_taf: 0.000166,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionSettings {
    pub slippage: SlippageSettings,
    pub commission: CommissionSettings,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PortfolioSettings {
    /// Used by the live portfolio when a signal carries no size.
    pub default_position_size: f64,
}

impl Default for PortfolioSettings {
    fn default() -> Self {
        Self {
            default_position_size: 0.05,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BacktestSettings {
    pub backtest_id: Option<String>,
    pub symbols: Vec<String>,
    /// RFC 3339 or YYYY-MM-DD.
    pub start: Option<String>,
    pub end: Option<String>,
    pub initial_capital: f64,
    pub risk_free_rate: f64,
    pub record_history: bool,
    pub asset_class: String,
}

impl Default for BacktestSettings {
    fn default() -> Self {
        Self {
            backtest_id: None,
            symbols: Vec::new(),
            start: None,
            end: None,
            initial_capital: 100_000.0,
            risk_free_rate: 0.03,
            record_history: true,
            asset_class: "CRYPTO".to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategySettings {
    pub name: String,
    /// Strategy-specific parameters, decoded by the strategy itself.
    pub parameters: Value,
}

impl Default for StrategySettings {
    fn default() -> Self {
        Self {
            name: "mean_reversion".to_string(),
            parameters: Value::Object(serde_json::Map::new()),
        }
    }
}

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// Fully resolved settings. Build once, pass by reference.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub risk: RiskSettings,
    pub execution: ExecutionSettings,
    pub portfolio: PortfolioSettings,
    pub backtest: BacktestSettings,
    pub strategy: StrategySettings,
}

impl Settings {
    /// Decode a merged config document. Missing sections take defaults.
    pub fn from_json(v: &Value) -> Result<Self> {
        let s: Settings =
            serde_json::from_value(v.clone()).context("config does not match settings schema")?;
        s.validate()?;
        Ok(s)
    }

    /// Load layered YAML paths, returning the typed settings and the hashed source.
    pub fn load(paths: &[&str]) -> Result<(Self, LoadedConfig)> {
        let loaded = load_layered_yaml(paths)?;
        let s = Self::from_json(&loaded.config_json)?;
        Ok((s, loaded))
    }

    pub fn validate(&self) -> Result<()> {
        let r = &self.risk;
        let rates = [
            ("risk.max_position_pct", r.max_position_pct),
            ("risk.min_stop_pct", r.min_stop_pct),
            ("risk.max_stop_pct", r.max_stop_pct),
            ("risk.max_symbol_exposure", r.max_symbol_exposure),
            ("risk.max_portfolio_exposure", r.max_portfolio_exposure),
            ("risk.daily_loss_limit", r.daily_loss_limit),
            ("risk.max_drawdown", r.max_drawdown),
            ("execution.slippage.base_pct", self.execution.slippage.base_pct),
            (
                "execution.slippage.volume_impact_factor",
                self.execution.slippage.volume_impact_factor,
            ),
            (
                "execution.slippage.volatility_factor",
                self.execution.slippage.volatility_factor,
            ),
            ("execution.slippage.max_pct", self.execution.slippage.max_pct),
            (
                "execution.commission.crypto_taker_fee",
                self.execution.commission.crypto_taker_fee,
            ),
            (
                "execution.commission.stock_sec_fee",
                self.execution.commission.stock_sec_fee,
            ),
            (
                "execution.commission.stock_finra_taf",
                self.execution.commission.stock_finra_taf,
            ),
            (
                "portfolio.default_position_size",
                self.portfolio.default_position_size,
            ),
            ("backtest.risk_free_rate", self.backtest.risk_free_rate),
        ];
        for (name, v) in rates {
            if !v.is_finite() || v < 0.0 {
                bail!("CONFIG_INVALID {name}={v} (must be finite and >= 0)");
            }
        }

        if r.min_stop_pct > r.max_stop_pct {
            bail!(
                "CONFIG_INVALID risk.min_stop_pct={} > risk.max_stop_pct={}",
                r.min_stop_pct,
                r.max_stop_pct
            );
        }

        let cap = self.backtest.initial_capital;
        if !cap.is_finite() || cap <= 0.0 {
            bail!("CONFIG_INVALID backtest.initial_capital={cap} (must be > 0)");
        }
        Ok(())
    }
}
