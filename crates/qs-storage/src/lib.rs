//! qs-storage
//!
//! Persistence collaborator for the trading pipeline.
//!
//! - `Storage` trait: positions/orders by id, status and symbol; fills;
//!   append-only risk-event log; backtest result records by id
//! - `MemoryStorage`: deterministic in-process implementation (BTreeMap)
//! - `AuditLog`: append-only JSON Lines with an optional SHA-256 hash chain,
//!   used to mirror risk events to disk for audit

mod audit;
mod memory;
mod records;

pub use audit::{compute_entry_hash, verify_hash_chain, verify_hash_chain_str, AuditEntry, AuditLog, VerifyResult};
pub use memory::MemoryStorage;
pub use records::{BacktestRecord, OrderRecord, PositionRecord, RiskEventRecord};

use qs_events::{Fill, OrderStatus};
use std::fmt;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StorageError {
    NotFound { kind: &'static str, id: String },
    Duplicate { kind: &'static str, id: String },
    /// A lock was poisoned by a panicking writer.
    Poisoned,
    /// Backing store failure (file, audit log).
    Backend(String),
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::NotFound { kind, id } => write!(f, "{} not found: {}", kind, id),
            StorageError::Duplicate { kind, id } => write!(f, "duplicate {}: {}", kind, id),
            StorageError::Poisoned => write!(f, "storage lock poisoned"),
            StorageError::Backend(e) => write!(f, "storage backend: {}", e),
        }
    }
}

impl std::error::Error for StorageError {}

pub type StorageResult<T> = Result<T, StorageError>;

/// CRUD surface used by the risk manager, execution engine, portfolio and
/// orchestrator. Implementations must be safe to share behind `Arc`.
pub trait Storage: Send + Sync {
    // ----- positions -----
    fn create_position(&self, rec: &PositionRecord) -> StorageResult<()>;
    /// Replace an existing record (matched by id).
    fn update_position(&self, rec: &PositionRecord) -> StorageResult<()>;
    fn get_position(&self, id: &str) -> StorageResult<Option<PositionRecord>>;
    /// Open positions, optionally for one symbol, ordered by id.
    fn open_positions(&self, symbol: Option<&str>) -> StorageResult<Vec<PositionRecord>>;
    /// Closed positions ordered by exit time.
    fn closed_positions(&self) -> StorageResult<Vec<PositionRecord>>;

    // ----- orders -----
    fn create_order(&self, rec: &OrderRecord) -> StorageResult<()>;
    fn update_order_status(
        &self,
        id: &str,
        status: OrderStatus,
        reason: Option<&str>,
    ) -> StorageResult<()>;
    fn get_order(&self, id: &str) -> StorageResult<Option<OrderRecord>>;
    fn orders_by_status(&self, status: OrderStatus) -> StorageResult<Vec<OrderRecord>>;

    // ----- fills -----
    fn record_fill(&self, fill: &Fill) -> StorageResult<()>;
    /// Fills in insertion order.
    fn fills(&self) -> StorageResult<Vec<Fill>>;

    // ----- risk events (append-only) -----
    fn log_risk_event(&self, rec: &RiskEventRecord) -> StorageResult<()>;
    fn risk_events(&self) -> StorageResult<Vec<RiskEventRecord>>;

    // ----- backtest results -----
    fn save_backtest_results(&self, rec: &BacktestRecord) -> StorageResult<()>;
    fn get_backtest_results(&self, backtest_id: &str) -> StorageResult<Option<BacktestRecord>>;
}
