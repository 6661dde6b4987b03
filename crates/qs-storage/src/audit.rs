use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Fixed namespace for entry ids. An id is a pure function of
/// (previous hash, sequence, payload), so replays produce identical logs.
const ENTRY_NAMESPACE: Uuid = Uuid::from_u128(0x5f0c_2a8e_91d4_4b7e_a3c6_7d12_e0b9_44a1);

/// One line of the audit log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub entry_id: Uuid,
    pub seq: u64,
    /// Event time (simulation time in backtests), not wall clock.
    pub ts_utc: DateTime<Utc>,
    pub topic: String,
    pub event_type: String,
    pub payload: Value,
    pub hash_prev: Option<String>,
    pub hash_self: Option<String>,
}

/// Append-only JSON Lines writer with an optional SHA-256 hash chain.
pub struct AuditLog {
    path: PathBuf,
    hash_chain: bool,
    last_hash: Option<String>,
    seq: u64,
}

impl AuditLog {
    /// Open (or create) a log. An existing file is resumed: the sequence
    /// counter and last hash are restored from its final entry.
    pub fn open(path: impl AsRef<Path>, hash_chain: bool) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| format!("create_dir_all {:?}", parent))?;
        }

        let mut log = Self {
            path,
            hash_chain,
            last_hash: None,
            seq: 0,
        };

        if log.path.exists() {
            let content = fs::read_to_string(&log.path)
                .with_context(|| format!("read audit log {:?}", log.path))?;
            if let Some(last) = content.lines().rev().find(|l| !l.trim().is_empty()) {
                let entry: AuditEntry =
                    serde_json::from_str(last.trim()).context("parse last audit entry")?;
                log.seq = entry.seq + 1;
                log.last_hash = entry.hash_self;
            }
        }

        Ok(log)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of entries written so far (including resumed ones).
    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn last_hash(&self) -> Option<&str> {
        self.last_hash.as_deref()
    }

    pub fn append(
        &mut self,
        ts_utc: DateTime<Utc>,
        topic: &str,
        event_type: &str,
        payload: Value,
    ) -> Result<AuditEntry> {
        let entry_id = derive_entry_id(self.last_hash.as_deref(), self.seq, &payload)?;

        let mut entry = AuditEntry {
            entry_id,
            seq: self.seq,
            ts_utc,
            topic: topic.to_string(),
            event_type: event_type.to_string(),
            payload,
            hash_prev: None,
            hash_self: None,
        };

        if self.hash_chain {
            entry.hash_prev = self.last_hash.clone();
            let h = compute_entry_hash(&entry)?;
            entry.hash_self = Some(h.clone());
            self.last_hash = Some(h);
        }

        let line = canonical_line(&entry)?;
        append_line(&self.path, &line)?;
        self.seq += 1;

        Ok(entry)
    }
}

fn derive_entry_id(prev: Option<&str>, seq: u64, payload: &Value) -> Result<Uuid> {
    let body = serde_json::to_string(&sort_keys(payload)).context("serialize payload failed")?;
    let name = format!("{}|{}|{}", prev.unwrap_or("genesis"), seq, body);
    Ok(Uuid::new_v5(&ENTRY_NAMESPACE, name.as_bytes()))
}

fn append_line(path: &Path, line: &str) -> Result<()> {
    let mut f = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open audit log {:?}", path))?;
    f.write_all(line.as_bytes())
        .context("write audit line failed")?;
    f.write_all(b"\n").context("write newline failed")?;
    Ok(())
}

fn canonical_line<T: Serialize>(v: &T) -> Result<String> {
    let raw = serde_json::to_value(v).context("serialize audit entry failed")?;
    serde_json::to_string(&sort_keys(&raw)).context("json stringify failed")
}

fn sort_keys(v: &Value) -> Value {
    match v {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut out = serde_json::Map::new();
            for k in keys {
                out.insert(k.clone(), sort_keys(&map[k]));
            }
            Value::Object(out)
        }
        Value::Array(arr) => Value::Array(arr.iter().map(sort_keys).collect()),
        _ => v.clone(),
    }
}

/// SHA-256 over the canonical line with `hash_self` cleared.
pub fn compute_entry_hash(entry: &AuditEntry) -> Result<String> {
    let mut e = entry.clone();
    e.hash_self = None;
    let canonical = canonical_line(&e)?;
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyResult {
    Valid { lines: usize },
    /// First broken line (1-based) and what failed.
    Broken { line: usize, reason: String },
}

pub fn verify_hash_chain(path: impl AsRef<Path>) -> Result<VerifyResult> {
    let content = fs::read_to_string(path.as_ref())
        .with_context(|| format!("read audit log {:?}", path.as_ref()))?;
    verify_hash_chain_str(&content)
}

pub fn verify_hash_chain_str(content: &str) -> Result<VerifyResult> {
    let mut prev_hash: Option<String> = None;
    let mut lines = 0usize;

    for (i, line) in content.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let entry: AuditEntry = serde_json::from_str(trimmed)
            .with_context(|| format!("parse audit entry at line {}", i + 1))?;
        lines += 1;

        if entry.hash_prev != prev_hash {
            return Ok(VerifyResult::Broken {
                line: i + 1,
                reason: format!(
                    "hash_prev mismatch: expected {:?}, got {:?}",
                    prev_hash, entry.hash_prev
                ),
            });
        }

        if let Some(claimed) = entry.hash_self.as_ref() {
            let recomputed = compute_entry_hash(&entry)?;
            if *claimed != recomputed {
                return Ok(VerifyResult::Broken {
                    line: i + 1,
                    reason: format!("hash_self mismatch: claimed {claimed}, recomputed {recomputed}"),
                });
            }
        }

        prev_hash = entry.hash_self;
    }

    Ok(VerifyResult::Valid { lines })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn entry_id_depends_on_chain_position() {
        let p = json!({"b": 1, "a": 2});
        let a = derive_entry_id(None, 0, &p).unwrap();
        let b = derive_entry_id(None, 0, &json!({"a": 2, "b": 1})).unwrap();
        let c = derive_entry_id(None, 1, &p).unwrap();
        assert_eq!(a, b, "key order must not matter");
        assert_ne!(a, c);
    }

    #[test]
    fn resumed_log_continues_chain() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();

        {
            let mut log = AuditLog::open(&path, true).unwrap();
            log.append(ts, "risk", "A", json!({"n": 1})).unwrap();
        }
        let mut log = AuditLog::open(&path, true).unwrap();
        assert_eq!(log.seq(), 1);
        let e = log.append(ts, "risk", "B", json!({"n": 2})).unwrap();
        assert_eq!(e.seq, 1);
        assert!(e.hash_prev.is_some());

        assert_eq!(
            verify_hash_chain(&path).unwrap(),
            VerifyResult::Valid { lines: 2 }
        );
    }
}
