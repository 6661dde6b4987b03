//! Closed-trade statistics and the stable report keys.

use chrono::{DateTime, Duration, TimeZone, Utc};
use qs_events::{AssetClass, PositionSide, PositionStatus};
use qs_metrics::*;
use qs_storage::PositionRecord;

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

fn trade(pnl: f64, hours: i64) -> ClosedTrade {
    ClosedTrade {
        pnl_realized: pnl,
        entry_time: t0(),
        exit_time: Some(t0() + Duration::hours(hours)),
    }
}

fn curve() -> Vec<EquityPoint> {
    vec![(t0(), 100_000.0), (t0() + Duration::days(1), 100_500.0)]
}

#[test]
fn wins_losses_expectancy_and_duration() {
    // GIVEN: two winners, one loser
    let trades = vec![trade(300.0, 2), trade(100.0, 4), trade(-100.0, 6)];

    // WHEN
    let m = PerformanceCalculator::new(&curve(), &trades, 100_000.0, t0(), t0() + Duration::days(1), 0.0)
        .calculate()
        .trades;

    // THEN
    assert_eq!(m.total_trades, 3);
    assert_eq!(m.winning_trades, 2);
    assert_eq!(m.losing_trades, 1);
    assert!((m.win_rate - 2.0 / 3.0).abs() < 1e-12);
    assert!((m.profit_factor - 4.0).abs() < 1e-12);
    assert!((m.avg_win - 200.0).abs() < 1e-12);
    assert!((m.avg_loss + 100.0).abs() < 1e-12);
    assert_eq!(m.max_win, 300.0);
    assert_eq!(m.max_loss, -100.0);
    // 2/3 * 200 - 1/3 * 100
    assert!((m.expectancy - 100.0).abs() < 1e-9);
    assert!((m.avg_trade_duration_hours - 4.0).abs() < 1e-12);
}

#[test]
fn no_losers_gives_infinite_profit_factor_serialised_as_null() {
    let trades = vec![trade(10.0, 1)];
    let m = PerformanceCalculator::new(&curve(), &trades, 100_000.0, t0(), t0() + Duration::days(1), 0.0)
        .calculate();
    assert!(m.trades.profit_factor.is_infinite());

    let v = serde_json::to_value(&m).unwrap();
    for key in ["returns", "risk_adjusted", "drawdown", "trades", "monthly"] {
        assert!(v.get(key).is_some(), "missing {key}");
    }
    assert!(v["trades"]["profit_factor"].is_null());

    let back: Metrics = serde_json::from_value(v).unwrap();
    assert!(back.trades.profit_factor.is_infinite());
}

#[test]
fn closed_position_record_converts_to_trade() {
    let rec = PositionRecord {
        id: "POS-1".into(),
        symbol: "BTC/USD".into(),
        asset_class: AssetClass::Crypto,
        side: PositionSide::Long,
        quantity: 1.0,
        entry_price: 50_000.0,
        entry_time: t0(),
        exit_price: Some(52_000.0),
        exit_time: Some(t0() + Duration::hours(3)),
        stop_loss: None,
        take_profit: None,
        entry_commission: 300.0,
        exit_commission: 312.0,
        pnl_realized: 1_388.0,
        status: PositionStatus::Closed,
        strategy_id: "mr".into(),
    };
    let t = ClosedTrade::from(&rec);
    assert_eq!(t.pnl_realized, 1_388.0);
    assert_eq!(t.exit_time, rec.exit_time);
}
