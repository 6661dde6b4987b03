//! Once a circuit breaker trips, every later signal is rejected CRITICAL even
//! after equity recovers, until an operator resets it.

use std::sync::Arc;

use chrono::{TimeZone, Utc};
use qs_events::{Direction, Severity, Signal};
use qs_risk::*;
use qs_storage::{MemoryStorage, Storage};

fn long_signal(day: u32) -> Signal {
    Signal::new(Utc.with_ymd_and_hms(2024, 4, day, 0, 0, 0).unwrap(), "BTC/USD", Direction::Long, 100.0)
        .with_size(0.05)
        .with_stop(98.0)
        .with_strategy("mr")
}

#[test]
fn scenario_breaker_sticky_until_manual_reset() {
    let storage = Arc::new(MemoryStorage::new());
    let mut rm = RiskManager::new(RiskConfig::sane_defaults(), storage.clone(), 100_000.0);

    // GIVEN: a 6% intraday loss trips the daily breaker
    rm.update_portfolio_value(94_000.0);
    let RiskOutcome::Rejected(alert) = rm.evaluate(&long_signal(1)) else {
        panic!("daily loss must reject");
    };
    assert_eq!(alert.severity, Severity::Critical);
    assert_eq!(alert.alert_type, SIGNAL_REJECTED);
    assert_eq!(alert.metadata["reason_code"], "DAILY_LOSS_LIMIT_BREACHED");
    assert!(rm.state().circuit_breaker_active);

    // WHEN: the next day starts and equity recovers
    rm.reset_daily_tracking(94_000.0);
    rm.update_portfolio_value(101_000.0);

    // THEN: still halted
    for day in 2..5 {
        let RiskOutcome::Rejected(a) = rm.evaluate(&long_signal(day)) else {
            panic!("breaker must stay active");
        };
        assert_eq!(a.metadata["reason_code"], "BREAKER_ACTIVE");
        assert_eq!(a.severity, Severity::Critical);
    }

    // exits still flow while halted (nothing open -> skipped, not rejected)
    let exit = Signal::new(Utc.with_ymd_and_hms(2024, 4, 5, 0, 0, 0).unwrap(), "BTC/USD", Direction::Exit, 100.0);
    assert_eq!(rm.evaluate(&exit), RiskOutcome::Skipped);

    // manual reset resumes approvals
    rm.reset_circuit_breaker();
    assert!(!rm.state().circuit_breaker_active);
    assert!(matches!(rm.evaluate(&long_signal(6)), RiskOutcome::Approved(_)));

    // every rejection was persisted
    assert_eq!(storage.risk_events().unwrap().len(), 4);
}

#[test]
fn drawdown_from_peak_trips_breaker() {
    let mut rm = RiskManager::new(RiskConfig::sane_defaults(), Arc::new(MemoryStorage::new()), 100_000.0);

    rm.update_portfolio_value(125_000.0);
    rm.reset_daily_tracking(125_000.0);
    assert_eq!(rm.state().peak_equity, 125_000.0);

    // spread the fall over days so the daily limit never fires
    let mut value = 125_000.0;
    for _ in 0..6 {
        value *= 0.96;
        rm.update_portfolio_value(value);
        rm.reset_daily_tracking(value);
    }
    // 125k * 0.96^6 ~= 97.8k, a 21.7% drawdown
    let RiskOutcome::Rejected(a) = rm.evaluate(&long_signal(10)) else {
        panic!("drawdown must reject");
    };
    assert_eq!(a.metadata["reason_code"], "MAX_DRAWDOWN_BREACHED");
}
