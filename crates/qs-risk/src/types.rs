use qs_config::RiskSettings;
use qs_events::{Order, RiskAlert, Severity};
use serde::Serialize;

/// Risk thresholds, all fractions of portfolio value.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RiskConfig {
    pub max_position_pct: f64,
    pub min_stop_pct: f64,
    pub max_stop_pct: f64,
    pub max_symbol_exposure: f64,
    pub max_portfolio_exposure: f64,
    pub daily_loss_limit: f64,
    pub max_drawdown: f64,
}

impl RiskConfig {
    pub fn sane_defaults() -> Self {
        Self::from(&RiskSettings::default())
    }
}

impl From<&RiskSettings> for RiskConfig {
    fn from(s: &RiskSettings) -> Self {
        Self {
            max_position_pct: s.max_position_pct,
            min_stop_pct: s.min_stop_pct,
            max_stop_pct: s.max_stop_pct,
            max_symbol_exposure: s.max_symbol_exposure,
            max_portfolio_exposure: s.max_portfolio_exposure,
            daily_loss_limit: s.daily_loss_limit,
            max_drawdown: s.max_drawdown,
        }
    }
}

/// Mutable risk state. `circuit_breaker_active` is sticky until
/// `RiskManager::reset_circuit_breaker`.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RiskState {
    pub portfolio_value: f64,
    pub daily_start_equity: f64,
    pub peak_equity: f64,
    pub circuit_breaker_active: bool,
}

impl RiskState {
    pub fn new(initial_capital: f64) -> Self {
        Self {
            portfolio_value: initial_capital,
            daily_start_equity: initial_capital,
            peak_equity: initial_capital,
            circuit_breaker_active: false,
        }
    }
}

/// Which check layer rejected a signal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RejectionLevel {
    CircuitBreaker,
    Position,
    Symbol,
    Portfolio,
    /// Bad input or a storage fault during checks.
    Processing,
}

impl RejectionLevel {
    pub fn severity(&self) -> Severity {
        match self {
            RejectionLevel::CircuitBreaker => Severity::Critical,
            RejectionLevel::Position | RejectionLevel::Processing => Severity::High,
            RejectionLevel::Symbol | RejectionLevel::Portfolio => Severity::Medium,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RejectionLevel::CircuitBreaker => "CIRCUIT_BREAKER",
            RejectionLevel::Position => "POSITION",
            RejectionLevel::Symbol => "SYMBOL",
            RejectionLevel::Portfolio => "PORTFOLIO",
            RejectionLevel::Processing => "PROCESSING",
        }
    }
}

/// Stable reason codes carried in alert metadata (`reason_code`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReasonCode {
    BreakerActive,
    DailyLossLimitBreached,
    MaxDrawdownBreached,
    PositionSizeExceeded,
    StopLossMissing,
    StopLossTooTight,
    StopLossTooWide,
    SymbolExposureExceeded,
    PortfolioExposureExceeded,
    InvalidPrice,
    StorageError,
}

impl ReasonCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReasonCode::BreakerActive => "BREAKER_ACTIVE",
            ReasonCode::DailyLossLimitBreached => "DAILY_LOSS_LIMIT_BREACHED",
            ReasonCode::MaxDrawdownBreached => "MAX_DRAWDOWN_BREACHED",
            ReasonCode::PositionSizeExceeded => "POSITION_SIZE_EXCEEDED",
            ReasonCode::StopLossMissing => "STOP_LOSS_MISSING",
            ReasonCode::StopLossTooTight => "STOP_LOSS_TOO_TIGHT",
            ReasonCode::StopLossTooWide => "STOP_LOSS_TOO_WIDE",
            ReasonCode::SymbolExposureExceeded => "SYMBOL_EXPOSURE_EXCEEDED",
            ReasonCode::PortfolioExposureExceeded => "PORTFOLIO_EXPOSURE_EXCEEDED",
            ReasonCode::InvalidPrice => "INVALID_PRICE",
            ReasonCode::StorageError => "STORAGE_ERROR",
        }
    }

    pub fn level(&self) -> RejectionLevel {
        match self {
            ReasonCode::BreakerActive
            | ReasonCode::DailyLossLimitBreached
            | ReasonCode::MaxDrawdownBreached => RejectionLevel::CircuitBreaker,
            ReasonCode::PositionSizeExceeded
            | ReasonCode::StopLossMissing
            | ReasonCode::StopLossTooTight
            | ReasonCode::StopLossTooWide => RejectionLevel::Position,
            ReasonCode::SymbolExposureExceeded => RejectionLevel::Symbol,
            ReasonCode::PortfolioExposureExceeded => RejectionLevel::Portfolio,
            ReasonCode::InvalidPrice | ReasonCode::StorageError => RejectionLevel::Processing,
        }
    }
}

/// A failed check: code plus human-readable detail.
#[derive(Clone, Debug, PartialEq)]
pub struct Rejection {
    pub code: ReasonCode,
    pub detail: String,
}

impl Rejection {
    pub fn new(code: ReasonCode, detail: impl Into<String>) -> Self {
        Self {
            code,
            detail: detail.into(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum RiskOutcome {
    Approved(Order),
    Rejected(RiskAlert),
    /// CLOSE/EXIT with nothing to close.
    Skipped,
}
