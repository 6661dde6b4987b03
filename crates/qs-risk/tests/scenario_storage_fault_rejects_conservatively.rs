//! A storage fault during exposure checks rejects the signal HIGH instead of
//! approving blind; the manager keeps working afterwards.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{TimeZone, Utc};
use qs_events::{Direction, Fill, OrderStatus, Severity, Signal};
use qs_risk::*;
use qs_storage::*;

/// Wraps MemoryStorage; position reads fail while `broken` is set.
struct FlakyStorage {
    inner: MemoryStorage,
    broken: AtomicBool,
}

impl FlakyStorage {
    fn fail_if_broken(&self) -> StorageResult<()> {
        if self.broken.load(Ordering::SeqCst) {
            Err(StorageError::Backend("disk unavailable".to_string()))
        } else {
            Ok(())
        }
    }
}

impl Storage for FlakyStorage {
    fn create_position(&self, rec: &PositionRecord) -> StorageResult<()> {
        self.inner.create_position(rec)
    }
    fn update_position(&self, rec: &PositionRecord) -> StorageResult<()> {
        self.inner.update_position(rec)
    }
    fn get_position(&self, id: &str) -> StorageResult<Option<PositionRecord>> {
        self.inner.get_position(id)
    }
    fn open_positions(&self, symbol: Option<&str>) -> StorageResult<Vec<PositionRecord>> {
        self.fail_if_broken()?;
        self.inner.open_positions(symbol)
    }
    fn closed_positions(&self) -> StorageResult<Vec<PositionRecord>> {
        self.inner.closed_positions()
    }
    fn create_order(&self, rec: &OrderRecord) -> StorageResult<()> {
        self.inner.create_order(rec)
    }
    fn update_order_status(&self, id: &str, status: OrderStatus, reason: Option<&str>) -> StorageResult<()> {
        self.inner.update_order_status(id, status, reason)
    }
    fn get_order(&self, id: &str) -> StorageResult<Option<OrderRecord>> {
        self.inner.get_order(id)
    }
    fn orders_by_status(&self, status: OrderStatus) -> StorageResult<Vec<OrderRecord>> {
        self.inner.orders_by_status(status)
    }
    fn record_fill(&self, fill: &Fill) -> StorageResult<()> {
        self.inner.record_fill(fill)
    }
    fn fills(&self) -> StorageResult<Vec<Fill>> {
        self.inner.fills()
    }
    fn log_risk_event(&self, rec: &RiskEventRecord) -> StorageResult<()> {
        self.inner.log_risk_event(rec)
    }
    fn risk_events(&self) -> StorageResult<Vec<RiskEventRecord>> {
        self.inner.risk_events()
    }
    fn save_backtest_results(&self, rec: &BacktestRecord) -> StorageResult<()> {
        self.inner.save_backtest_results(rec)
    }
    fn get_backtest_results(&self, id: &str) -> StorageResult<Option<BacktestRecord>> {
        self.inner.get_backtest_results(id)
    }
}

#[test]
fn storage_fault_is_high_rejection() {
    let storage = Arc::new(FlakyStorage {
        inner: MemoryStorage::new(),
        broken: AtomicBool::new(true),
    });
    let mut rm = RiskManager::new(RiskConfig::sane_defaults(), storage.clone(), 100_000.0);
    let s = Signal::new(Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap(), "BTC/USD", Direction::Long, 100.0)
        .with_size(0.05)
        .with_stop(98.0);

    let RiskOutcome::Rejected(a) = rm.evaluate(&s) else {
        panic!("storage fault must reject");
    };
    assert_eq!(a.severity, Severity::High);
    assert_eq!(a.metadata["reason_code"], "STORAGE_ERROR");
    assert!(a.description.contains("processing error"));
    assert!(!rm.state().circuit_breaker_active);

    storage.broken.store(false, Ordering::SeqCst);
    assert!(matches!(rm.evaluate(&s), RiskOutcome::Approved(_)));
    assert_eq!(storage.risk_events().unwrap().len(), 1);
}
