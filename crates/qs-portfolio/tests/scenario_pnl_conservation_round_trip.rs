//! BUY 1.0 @ 50000 (commission 300) then SELL 1.0 @ 52000 (commission 312)
//! realizes exactly 1388.00 and each leg moves cash by its own notional and
//! commission.

use std::sync::Arc;

use chrono::{TimeZone, Utc};
use qs_events::{AssetClass, Fill, OrderSide, PositionStatus};
use qs_portfolio::{FillOutcome, PortfolioManager};
use qs_storage::{MemoryStorage, Storage};

fn fill(id: &str, side: OrderSide, price: f64, commission: f64, day: u32) -> Fill {
    Fill {
        id: format!("FIL-{id}"),
        order_id: format!("ORD-{id}"),
        timestamp: Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap(),
        symbol: "BTC/USD".to_string(),
        asset_class: AssetClass::Crypto,
        side,
        quantity: 1.0,
        price,
        commission,
        strategy_id: "mr".to_string(),
        position_id: None,
    }
}

#[test]
fn round_trip_realizes_1388() {
    // GIVEN: $100,000 cash
    let storage = Arc::new(MemoryStorage::new());
    let mut pm = PortfolioManager::new(storage.clone(), 100_000.0, "pnl");

    // BUY leg: cash -= 50000 + 300
    let opened = pm.on_fill(&fill("1", OrderSide::Buy, 50_000.0, 300.0, 1));
    assert!(matches!(opened, FillOutcome::Opened(_)));
    assert!((pm.cash() - 49_700.0).abs() < 1e-9);

    // SELL leg: cash += 52000 - 312
    let closed = pm.on_fill(&fill("2", OrderSide::Sell, 52_000.0, 312.0, 2));
    let FillOutcome::Closed(update) = closed else {
        panic!("expected the sell to close the long");
    };
    assert_eq!(update.status, PositionStatus::Closed);
    assert!((update.pnl_realized - 1388.0).abs() < 1e-9);
    assert!((pm.cash() - 101_388.0).abs() < 1e-9);

    // THEN: book flat, trade recorded, storage agrees
    assert!(pm.positions().is_empty());
    assert_eq!(pm.closed_trades().len(), 1);
    let rec = storage.get_position(&update.position_id).unwrap().unwrap();
    assert_eq!(rec.status, PositionStatus::Closed);
    assert!((rec.pnl_realized - 1388.0).abs() < 1e-9);
    assert!(storage.open_positions(None).unwrap().is_empty());
}
