use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use qs_events::{Fill, OrderStatus};
use serde_json::Value;
use tracing::debug;

use crate::audit::AuditLog;
use crate::records::{BacktestRecord, OrderRecord, PositionRecord, RiskEventRecord};
use crate::{Storage, StorageError, StorageResult};

#[derive(Default)]
struct Inner {
    positions: BTreeMap<String, PositionRecord>,
    orders: BTreeMap<String, OrderRecord>,
    fills: Vec<Fill>,
    risk_events: Vec<RiskEventRecord>,
    backtests: BTreeMap<String, BacktestRecord>,
}

/// In-process storage. Deterministic iteration (BTreeMap). Risk events can be
/// mirrored to an append-only `AuditLog`.
#[derive(Default)]
pub struct MemoryStorage {
    inner: Mutex<Inner>,
    audit: Option<Mutex<AuditLog>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mirror every logged risk event into `audit`.
    pub fn with_audit_log(mut self, audit: AuditLog) -> Self {
        self.audit = Some(Mutex::new(audit));
        self
    }

    fn lock(&self) -> StorageResult<MutexGuard<'_, Inner>> {
        self.inner.lock().map_err(|_| StorageError::Poisoned)
    }
}

impl Storage for MemoryStorage {
    fn create_position(&self, rec: &PositionRecord) -> StorageResult<()> {
        let mut g = self.lock()?;
        if g.positions.contains_key(&rec.id) {
            return Err(StorageError::Duplicate {
                kind: "position",
                id: rec.id.clone(),
            });
        }
        g.positions.insert(rec.id.clone(), rec.clone());
        Ok(())
    }

    fn update_position(&self, rec: &PositionRecord) -> StorageResult<()> {
        let mut g = self.lock()?;
        match g.positions.get_mut(&rec.id) {
            Some(slot) => {
                *slot = rec.clone();
                Ok(())
            }
            None => Err(StorageError::NotFound {
                kind: "position",
                id: rec.id.clone(),
            }),
        }
    }

    fn get_position(&self, id: &str) -> StorageResult<Option<PositionRecord>> {
        Ok(self.lock()?.positions.get(id).cloned())
    }

    fn open_positions(&self, symbol: Option<&str>) -> StorageResult<Vec<PositionRecord>> {
        let g = self.lock()?;
        Ok(g.positions
            .values()
            .filter(|p| p.is_open())
            .filter(|p| symbol.map_or(true, |s| p.symbol == s))
            .cloned()
            .collect())
    }

    fn closed_positions(&self) -> StorageResult<Vec<PositionRecord>> {
        let g = self.lock()?;
        let mut out: Vec<PositionRecord> =
            g.positions.values().filter(|p| !p.is_open()).cloned().collect();
        out.sort_by(|a, b| a.exit_time.cmp(&b.exit_time).then_with(|| a.id.cmp(&b.id)));
        Ok(out)
    }

    fn create_order(&self, rec: &OrderRecord) -> StorageResult<()> {
        let mut g = self.lock()?;
        if g.orders.contains_key(&rec.order.id) {
            return Err(StorageError::Duplicate {
                kind: "order",
                id: rec.order.id.clone(),
            });
        }
        g.orders.insert(rec.order.id.clone(), rec.clone());
        Ok(())
    }

    fn update_order_status(
        &self,
        id: &str,
        status: OrderStatus,
        reason: Option<&str>,
    ) -> StorageResult<()> {
        let mut g = self.lock()?;
        let rec = g.orders.get_mut(id).ok_or_else(|| StorageError::NotFound {
            kind: "order",
            id: id.to_string(),
        })?;
        rec.status = status;
        rec.reject_reason = reason.map(str::to_string);
        debug!(order_id = id, status = status.as_str(), "order status updated");
        Ok(())
    }

    fn get_order(&self, id: &str) -> StorageResult<Option<OrderRecord>> {
        Ok(self.lock()?.orders.get(id).cloned())
    }

    fn orders_by_status(&self, status: OrderStatus) -> StorageResult<Vec<OrderRecord>> {
        let g = self.lock()?;
        Ok(g.orders
            .values()
            .filter(|o| o.status == status)
            .cloned()
            .collect())
    }

    fn record_fill(&self, fill: &Fill) -> StorageResult<()> {
        self.lock()?.fills.push(fill.clone());
        Ok(())
    }

    fn fills(&self) -> StorageResult<Vec<Fill>> {
        Ok(self.lock()?.fills.clone())
    }

    fn log_risk_event(&self, rec: &RiskEventRecord) -> StorageResult<()> {
        self.lock()?.risk_events.push(rec.clone());

        if let Some(audit) = self.audit.as_ref() {
            let payload: Value = serde_json::to_value(rec)
                .map_err(|e| StorageError::Backend(e.to_string()))?;
            let mut log = audit.lock().map_err(|_| StorageError::Poisoned)?;
            log.append(rec.timestamp, "risk", &rec.event_type, payload)
                .map_err(|e| StorageError::Backend(format!("{e:#}")))?;
        }
        Ok(())
    }

    fn risk_events(&self) -> StorageResult<Vec<RiskEventRecord>> {
        Ok(self.lock()?.risk_events.clone())
    }

    fn save_backtest_results(&self, rec: &BacktestRecord) -> StorageResult<()> {
        self.lock()?
            .backtests
            .insert(rec.backtest_id.clone(), rec.clone());
        Ok(())
    }

    fn get_backtest_results(&self, backtest_id: &str) -> StorageResult<Option<BacktestRecord>> {
        Ok(self.lock()?.backtests.get(backtest_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use qs_events::{AssetClass, Order, OrderSide, PositionSide, PositionStatus};

    fn pos(id: &str, symbol: &str, status: PositionStatus, exit_hour: Option<u32>) -> PositionRecord {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        PositionRecord {
            id: id.to_string(),
            symbol: symbol.to_string(),
            asset_class: AssetClass::Crypto,
            side: PositionSide::Long,
            quantity: 1.0,
            entry_price: 100.0,
            entry_time: t0,
            exit_price: exit_hour.map(|_| 110.0),
            exit_time: exit_hour.map(|h| Utc.with_ymd_and_hms(2024, 1, 1, h, 0, 0).unwrap()),
            stop_loss: None,
            take_profit: None,
            entry_commission: 0.0,
            exit_commission: 0.0,
            pnl_realized: 0.0,
            status,
            strategy_id: "s".to_string(),
        }
    }

    #[test]
    fn open_positions_filter_by_symbol() {
        let st = MemoryStorage::new();
        st.create_position(&pos("P1", "AAA", PositionStatus::Open, None)).unwrap();
        st.create_position(&pos("P2", "BBB", PositionStatus::Open, None)).unwrap();
        st.create_position(&pos("P3", "AAA", PositionStatus::Closed, Some(3))).unwrap();

        assert_eq!(st.open_positions(None).unwrap().len(), 2);
        let aaa = st.open_positions(Some("AAA")).unwrap();
        assert_eq!(aaa.len(), 1);
        assert_eq!(aaa[0].id, "P1");
    }

    #[test]
    fn closed_positions_sorted_by_exit_time() {
        let st = MemoryStorage::new();
        st.create_position(&pos("A", "X", PositionStatus::Closed, Some(5))).unwrap();
        st.create_position(&pos("B", "X", PositionStatus::Closed, Some(2))).unwrap();
        let ids: Vec<String> = st.closed_positions().unwrap().into_iter().map(|p| p.id).collect();
        assert_eq!(ids, vec!["B", "A"]);
    }

    #[test]
    fn duplicate_and_missing_ids_are_errors() {
        let st = MemoryStorage::new();
        let p = pos("P1", "AAA", PositionStatus::Open, None);
        st.create_position(&p).unwrap();
        assert!(matches!(
            st.create_position(&p),
            Err(StorageError::Duplicate { kind: "position", .. })
        ));
        let ghost = pos("P9", "AAA", PositionStatus::Open, None);
        assert!(matches!(
            st.update_position(&ghost),
            Err(StorageError::NotFound { kind: "position", .. })
        ));
    }

    #[test]
    fn order_status_transitions() {
        let st = MemoryStorage::new();
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let o = Order::market("ORD-1", ts, "AAA", OrderSide::Buy, 2.0);
        st.create_order(&OrderRecord::created(&o)).unwrap();
        assert_eq!(st.orders_by_status(OrderStatus::Created).unwrap().len(), 1);

        st.update_order_status("ORD-1", OrderStatus::Rejected, Some("no bar")).unwrap();
        let rec = st.get_order("ORD-1").unwrap().unwrap();
        assert_eq!(rec.status, OrderStatus::Rejected);
        assert_eq!(rec.reject_reason.as_deref(), Some("no bar"));
        assert!(st.orders_by_status(OrderStatus::Created).unwrap().is_empty());
        assert!(st.update_order_status("nope", OrderStatus::Filled, None).is_err());
    }
}
