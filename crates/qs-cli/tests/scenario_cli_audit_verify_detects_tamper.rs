use assert_cmd::prelude::*;
use chrono::{TimeZone, Utc};
use predicates::prelude::*;
use qs_storage::AuditLog;
use serde_json::json;
use std::fs;
use std::process::Command;

/// An intact chain verifies; editing one payload breaks it at that line.
#[allow(deprecated)]
#[test]
fn audit_verify_flags_edited_line() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("audit.jsonl");
    let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    {
        let mut log = AuditLog::open(&path, true)?;
        for n in 1..=3 {
            log.append(ts, "risk", "SIGNAL_REJECTED", json!({ "n": n }))?;
        }
    }

    Command::cargo_bin("qs")?
        .arg("audit-verify")
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("audit_ok=true lines=3"));

    // GIVEN: line 2 payload edited in place
    let raw = fs::read_to_string(&path)?;
    let tampered: Vec<String> = raw
        .lines()
        .enumerate()
        .map(|(i, l)| if i == 1 { l.replace("\"n\":2", "\"n\":7") } else { l.to_string() })
        .collect();
    fs::write(&path, tampered.join("\n") + "\n")?;

    Command::cargo_bin("qs")?
        .arg("audit-verify")
        .arg(&path)
        .assert()
        .failure()
        .stdout(predicate::str::contains("audit_ok=false line=2"))
        .stderr(predicate::str::contains("broken at line 2"));
    Ok(())
}
