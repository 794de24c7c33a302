#![cfg(feature = "storage-rocksdb")]

use assert_cmd::cargo_bin;
use std::process::Command;
use tempfile::tempdir;

const SANDBOX: &str = "tests/fixtures/sandbox.toml";

fn apply_interest(db_path: &std::path::Path) -> std::process::Output {
    Command::new(cargo_bin!("ledger-sync"))
        .args(["--config", SANDBOX, "--db-path"])
        .arg(db_path)
        .args(["apply-interest", "--user", "alice", "--account", "acc-alice"])
        .args(["--period", "2024-01", "--token", "alice-token"])
        .output()
        .expect("Failed to execute command")
}

#[test]
fn test_rocksdb_accruals_survive_restart() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("test_db");

    // 1. First run: the accrual is applied and stored.
    let first = apply_interest(&db_path);
    assert!(first.status.success());
    let stdout = String::from_utf8_lossy(&first.stdout);
    assert!(stdout.contains("INTEREST,5.00,APPLIED"));

    // 2. Second run against the same DB: the period is already taken.
    let second = apply_interest(&db_path);
    assert!(!second.status.success());
    let stderr = String::from_utf8_lossy(&second.stderr);
    assert!(stderr.contains("interest already calculated for period 2024-01"));
}

#[test]
fn test_rocksdb_sweep_sees_nothing_after_apply() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("test_db");
    assert!(apply_interest(&db_path).status.success());

    let output = Command::new(cargo_bin!("ledger-sync"))
        .args(["--config", SANDBOX, "--db-path"])
        .arg(&db_path)
        .args(["sweep", "--token", "admin-token"])
        .output()
        .expect("Failed to execute command");
    assert!(output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Swept 0 accruals"));
}
