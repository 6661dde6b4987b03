//! `qs paper`: CSV bars through the live runtime, one at a time.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use qs_events::AssetClass;
use qs_md::{sort_bars, BarSource};
use qs_runtime::{feed, LiveRunner};
use qs_storage::MemoryStorage;

use super::{build_strategy, load_settings, open_csv, resolve_symbols};

const FEED_CAPACITY: usize = 256;

pub async fn run_paper(config_paths: &[String], data: &str, strategy: Option<String>, pace_ms: u64) -> Result<()> {
    let (settings, loaded) = load_settings(config_paths, strategy)?;
    let source = open_csv(data)?;
    let symbols = resolve_symbols(&settings, &source);
    let asset_class = AssetClass::parse(&settings.backtest.asset_class);

    let mut bars = Vec::new();
    for sym in &symbols {
        bars.extend(source.load(sym, None, None).with_context(|| format!("load bars for {sym}"))?);
    }
    sort_bars(&mut bars);

    let strategy = build_strategy(&settings, symbols)?;
    let mut runner = LiveRunner::new(
        &settings,
        strategy,
        Arc::new(MemoryStorage::new()),
        settings.backtest.initial_capital,
        "paper",
    );

    let (tx, rx) = feed(FEED_CAPACITY);
    let producer = tokio::spawn(async move {
        for bar in bars {
            if pace_ms > 0 {
                tokio::time::sleep(Duration::from_millis(pace_ms)).await;
            }
            if tx.send(bar.to_market_data(asset_class)).await.is_err() {
                break;
            }
        }
    });

    let summary = runner.run(rx).await;
    producer.await.context("feed task failed")?;

    println!("config_hash={}", loaded.config_hash);
    println!(
        "bars={} dropped={} fills={} risk_alerts={} open_positions={}",
        summary.bars_applied, summary.bars_dropped, summary.fills, summary.risk_alerts, summary.open_positions
    );
    println!("final_value={:.2}", summary.final_value);
    Ok(())
}
