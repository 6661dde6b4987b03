use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use qs_backtest::BacktestResults;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

pub const SCHEMA_VERSION: i32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunManifest {
    pub schema_version: i32,
    pub backtest_id: String,
    pub strategy_id: String,
    pub symbols: Vec<String>,
    pub config_hash: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub initial_capital: f64,
    pub final_value: f64,
    pub bars_processed: usize,
    pub created_at_utc: DateTime<Utc>,
    pub artifacts: ArtifactList,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactList {
    pub manifest_json: String,
    pub metrics_json: String,
    pub equity_curve_csv: String,
    pub trades_csv: String,
    pub fills_csv: String,
}

impl Default for ArtifactList {
    fn default() -> Self {
        Self {
            manifest_json: "manifest.json".to_string(),
            metrics_json: "metrics.json".to_string(),
            equity_curve_csv: "equity_curve.csv".to_string(),
            trades_csv: "trades.csv".to_string(),
            fills_csv: "fills.csv".to_string(),
        }
    }
}

pub struct RunArtifacts {
    pub run_dir: PathBuf,
    pub manifest_path: PathBuf,
}

// Column order must match the row structs below.
const EQUITY_HEADER: [&str; 2] = ["ts_utc", "equity"];
const TRADES_HEADER: [&str; 12] = [
    "position_id",
    "symbol",
    "side",
    "quantity",
    "entry_time",
    "entry_price",
    "exit_time",
    "exit_price",
    "pnl_realized",
    "entry_commission",
    "exit_commission",
    "strategy_id",
];
const FILLS_HEADER: [&str; 9] = [
    "ts_utc", "fill_id", "order_id", "symbol", "side", "qty", "price", "fee", "position_id",
];

#[derive(Serialize)]
struct EquityRow {
    ts_utc: String,
    equity: f64,
}

#[derive(Serialize)]
struct TradeRow<'a> {
    position_id: &'a str,
    symbol: &'a str,
    side: &'static str,
    quantity: f64,
    entry_time: String,
    entry_price: f64,
    exit_time: String,
    exit_price: Option<f64>,
    pnl_realized: f64,
    entry_commission: f64,
    exit_commission: f64,
    strategy_id: &'a str,
}

#[derive(Serialize)]
struct FillRow<'a> {
    ts_utc: String,
    fill_id: &'a str,
    order_id: &'a str,
    symbol: &'a str,
    side: &'static str,
    qty: f64,
    price: f64,
    fee: f64,
    position_id: &'a str,
}

/// Write `<root>/<backtest_id>/` with manifest, metrics and the three CSVs.
/// Existing files for the same id are overwritten.
pub fn write_run_artifacts(root: &Path, results: &BacktestResults, config_hash: &str) -> Result<RunArtifacts> {
    let run_dir = root.join(&results.backtest_id);
    fs::create_dir_all(&run_dir).with_context(|| format!("create exports dir failed: {}", run_dir.display()))?;
    let names = ArtifactList::default();

    // Non-finite metrics (profit_factor with no losers) serialise as null.
    let metrics = serde_json::to_string_pretty(&results.metrics).context("serialize metrics failed")?;
    write_text(&run_dir.join(&names.metrics_json), &metrics)?;

    write_csv(
        &run_dir.join(&names.equity_curve_csv),
        &EQUITY_HEADER,
        results.equity_curve.iter().map(|(ts, v)| EquityRow {
            ts_utc: ts.to_rfc3339(),
            equity: *v,
        }),
    )?;

    write_csv(
        &run_dir.join(&names.trades_csv),
        &TRADES_HEADER,
        results.trades.iter().map(|p| TradeRow {
            position_id: &p.id,
            symbol: &p.symbol,
            side: p.side.as_str(),
            quantity: p.quantity,
            entry_time: p.entry_time.to_rfc3339(),
            entry_price: p.entry_price,
            exit_time: p.exit_time.map(|t| t.to_rfc3339()).unwrap_or_default(),
            exit_price: p.exit_price,
            pnl_realized: p.pnl_realized,
            entry_commission: p.entry_commission,
            exit_commission: p.exit_commission,
            strategy_id: &p.strategy_id,
        }),
    )?;

    write_csv(
        &run_dir.join(&names.fills_csv),
        &FILLS_HEADER,
        results.fills.iter().map(|f| FillRow {
            ts_utc: f.timestamp.to_rfc3339(),
            fill_id: &f.id,
            order_id: &f.order_id,
            symbol: &f.symbol,
            side: f.side.as_str(),
            qty: f.quantity,
            price: f.price,
            fee: f.commission,
            position_id: f.position_id.as_deref().unwrap_or(""),
        }),
    )?;

    let manifest = RunManifest {
        schema_version: SCHEMA_VERSION,
        backtest_id: results.backtest_id.clone(),
        strategy_id: results.strategy_id.clone(),
        symbols: results.symbols.clone(),
        config_hash: config_hash.to_string(),
        start: results.start,
        end: results.end,
        initial_capital: results.initial_capital,
        final_value: results.final_value,
        bars_processed: results.bars_processed,
        created_at_utc: Utc::now(),
        artifacts: names,
    };
    let manifest_path = run_dir.join(&manifest.artifacts.manifest_json);
    let json = serde_json::to_string_pretty(&manifest).context("serialize manifest failed")?;
    write_text(&manifest_path, &json)?;

    info!(run_dir = %run_dir.display(), "run artifacts written");
    Ok(RunArtifacts { run_dir, manifest_path })
}

pub fn read_manifest(path: &Path) -> Result<RunManifest> {
    let raw = fs::read_to_string(path).with_context(|| format!("read manifest failed: {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parse manifest failed: {}", path.display()))
}

fn write_text(path: &Path, body: &str) -> Result<()> {
    fs::write(path, format!("{body}\n")).with_context(|| format!("write failed: {}", path.display()))
}

/// Header row is written even when there are no records.
fn write_csv<T: Serialize>(path: &Path, header: &[&str], rows: impl Iterator<Item = T>) -> Result<()> {
    let mut w = csv::WriterBuilder::new()
        .has_headers(false)
        .from_path(path)
        .with_context(|| format!("open csv failed: {}", path.display()))?;
    w.write_record(header)
        .with_context(|| format!("write csv header failed: {}", path.display()))?;
    for row in rows {
        w.serialize(row).with_context(|| format!("write csv row failed: {}", path.display()))?;
    }
    w.flush().with_context(|| format!("flush csv failed: {}", path.display()))?;
    Ok(())
}
