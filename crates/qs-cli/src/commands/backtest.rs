//! `qs backtest`: replay CSV bars and optionally export run artifacts.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use qs_backtest::{BacktestConfig, BacktestEngine};
use qs_storage::{AuditLog, MemoryStorage, Storage};

use super::{build_strategy, load_settings, open_csv, resolve_symbols};

pub fn run_backtest(
    config_paths: &[String],
    data: &str,
    exports: Option<&str>,
    strategy: Option<String>,
) -> Result<()> {
    let (mut settings, loaded) = load_settings(config_paths, strategy)?;
    let source = open_csv(data)?;
    let symbols = resolve_symbols(&settings, &source);
    settings.backtest.symbols = symbols.clone();

    let config = BacktestConfig::from_settings(&settings)?;
    let strategy = build_strategy(&settings, symbols)?;

    // Risk events are mirrored to a hash-chained audit log next to the artifacts.
    let audit_path = exports.map(|root| Path::new(root).join(&config.backtest_id).join("audit.jsonl"));
    let storage: Arc<dyn Storage> = match &audit_path {
        Some(p) => Arc::new(MemoryStorage::new().with_audit_log(AuditLog::open(p, true)?)),
        None => Arc::new(MemoryStorage::new()),
    };

    let mut engine = BacktestEngine::new(config, &settings, Box::new(source), storage);
    let results = engine.run(strategy).context("backtest failed")?;

    println!("backtest_id={}", results.backtest_id);
    println!("config_hash={}", loaded.config_hash);
    println!("bars={} trades={} fills={}", results.bars_processed, results.trades.len(), results.fills.len());
    println!("final_value={:.2}", results.final_value);
    println!("total_return_pct={:.4}", results.total_return_pct() * 100.0);
    println!("max_drawdown_pct={:.4}", results.metrics.drawdown.max_drawdown_pct * 100.0);
    println!("sharpe_ratio={:.4}", results.metrics.risk_adjusted.sharpe_ratio);

    if let Some(root) = exports {
        let out = qs_artifacts::write_run_artifacts(Path::new(root), &results, &loaded.config_hash)?;
        println!("artifacts_dir={}", out.run_dir.display());
        if let Some(p) = audit_path {
            println!("audit_path={}", p.display());
        }
    }
    Ok(())
}
