//! qs-config
//!
//! Layered YAML configuration resolved once into a typed `Settings` object.
//!
//! - Docs merge in order: earlier = base, later = override (deep merge)
//! - Merged doc is canonical JSON; `config_hash` = sha256(canonical_json)
//! - Literal secrets are refused (CONFIG_SECRET_DETECTED)
//! - Every section has defaults; a minimal file only overrides what it needs
//!
//! The resolved `Settings` is passed by reference into constructors. There is
//! no global config.

mod layered;
mod settings;

pub use layered::{load_layered_yaml, load_layered_yaml_from_strings, LoadedConfig};
pub use settings::{
    BacktestSettings, CommissionSettings, ExecutionSettings, PortfolioSettings, RiskSettings,
    Settings, SlippageSettings, StrategySettings,
};
