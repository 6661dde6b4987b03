//! A messy CSV still yields a clean, chronological series per symbol.

use std::io::Write;

use chrono::{TimeZone, Utc};
use qs_md::*;

const CSV: &str = "\
timestamp,symbol,open,high,low,close,volume
2024-01-03,BTC/USD,102,104,101,103,10
2024-01-01,BTC/USD,100,101,99,100.5,12
2024-01-02,BTC/USD,100.5,103,100,102,11
2024-01-02,BTC/USD,1,1,1,1,1
2024-01-04,BTC/USD,103,102,101,103,10
not-a-date,BTC/USD,1,1,1,1,1
2024-01-05T00:00:00Z,BTC/USD,abc,1,1,1,1
2024-01-01,ETH/USD,2000,2010,1990,2005,50
";

#[test]
fn bad_rows_are_counted_and_series_is_sorted() {
    // GIVEN: a file with a duplicate, an OHLC violation, a bad timestamp and a bad price
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bars.csv");
    std::fs::File::create(&path)
        .unwrap()
        .write_all(CSV.as_bytes())
        .unwrap();

    // WHEN
    let src = CsvBarSource::open(&path).unwrap();
    let btc = src.load("BTC/USD", None, None).unwrap();

    // THEN
    assert_eq!(src.skipped(), 4);
    assert_eq!(src.symbols(), vec!["BTC/USD".to_string(), "ETH/USD".to_string()]);
    let closes: Vec<f64> = btc.iter().map(|b| b.close).collect();
    assert_eq!(closes, vec![100.5, 102.0, 103.0]);
    assert!(btc.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
}

#[test]
fn range_bounds_are_inclusive() {
    let src = CsvBarSource::from_reader(CSV.as_bytes()).unwrap();
    let start = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
    let end = Utc.with_ymd_and_hms(2024, 1, 3, 0, 0, 0).unwrap();
    let bars = src.load("BTC/USD", Some(start), Some(end)).unwrap();
    assert_eq!(bars.len(), 2);
    assert_eq!(bars[0].timestamp, start);
    assert_eq!(bars[1].timestamp, end);
}

#[test]
fn missing_file_is_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = CsvBarSource::open(dir.path().join("nope.csv")).unwrap_err();
    assert!(matches!(err, SourceError::Io(_)));
}

#[test]
fn memory_source_sorts_and_can_fail_per_symbol() {
    let t = |d| Utc.with_ymd_and_hms(2024, 1, d, 0, 0, 0).unwrap();
    let rec = |d, c| BarRecord {
        timestamp: t(d),
        symbol: "SPY".into(),
        open: c,
        high: c,
        low: c,
        close: c,
        volume: 1.0,
    };
    let src = MemoryBarSource::new(vec![rec(3, 3.0), rec(1, 1.0), rec(2, 2.0)]).with_failure("QQQ");
    let closes: Vec<f64> = src.load("SPY", None, None).unwrap().iter().map(|b| b.close).collect();
    assert_eq!(closes, vec![1.0, 2.0, 3.0]);
    assert!(matches!(src.load("QQQ", None, None), Err(SourceError::Unavailable { .. })));
}
