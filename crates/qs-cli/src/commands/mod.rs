//! Command handler modules for qs-cli.
//!
//! Shared config/strategy/data helpers live here; command logic lives in the
//! submodules.

pub mod backtest;
pub mod paper;

use anyhow::{bail, Context, Result};
use qs_config::{LoadedConfig, Settings};
use qs_md::CsvBarSource;
use qs_strategy::{MeanReversion, Strategy, MEAN_REVERSION};

/// Layered config -> typed settings. `--strategy` overrides `strategy.name`.
pub fn load_settings(config_paths: &[String], strategy: Option<String>) -> Result<(Settings, LoadedConfig)> {
    let path_refs: Vec<&str> = config_paths.iter().map(|s| s.as_str()).collect();
    let (mut settings, loaded) = Settings::load(&path_refs)?;
    if let Some(name) = strategy {
        settings.strategy.name = name;
    }
    Ok((settings, loaded))
}

pub fn open_csv(path: &str) -> Result<CsvBarSource> {
    let source = CsvBarSource::open(path).with_context(|| format!("open market data failed: {path}"))?;
    if source.skipped() > 0 {
        tracing::warn!(path, skipped = source.skipped(), "invalid csv rows skipped");
    }
    Ok(source)
}

/// Configured symbols, or every symbol present in the data.
pub fn resolve_symbols(settings: &Settings, source: &CsvBarSource) -> Vec<String> {
    if settings.backtest.symbols.is_empty() {
        source.symbols()
    } else {
        settings.backtest.symbols.clone()
    }
}

pub fn build_strategy(settings: &Settings, symbols: Vec<String>) -> Result<Box<dyn Strategy>> {
    let name = settings.strategy.name.trim().to_ascii_lowercase();
    match name.as_str() {
        MEAN_REVERSION => {
            let s = MeanReversion::from_settings(&settings.strategy, symbols)
                .context("invalid strategy.parameters for mean_reversion")?;
            Ok(Box::new(s))
        }
        other => bail!("unknown strategy '{}'. supported: {}", other, MEAN_REVERSION),
    }
}
