use assert_cmd::Command;
use driftwatch_core::model::now_utc;
use driftwatch_core::storage::Store;
use predicates::str::contains;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

fn driftwatch(config: &Path) -> Command {
    let mut cmd = Command::cargo_bin("driftwatch").unwrap();
    cmd.env("DRIFTWATCH_LOG", "warn").arg("--config").arg(config);
    cmd
}

fn initialized() -> (TempDir, PathBuf) {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("driftwatch.yaml");
    driftwatch(&config).arg("init").assert().success();
    (dir, config)
}

#[test]
fn init_writes_config_and_database() {
    let (dir, config) = initialized();
    assert!(config.exists());
    assert!(dir.path().join(".driftwatch/driftwatch.db").exists());

    // A second init keeps the existing file.
    fs::write(&config, fs::read_to_string(&config).unwrap() + "# edited\n").unwrap();
    driftwatch(&config)
        .arg("init")
        .assert()
        .success()
        .stderr(contains("already exists"));
    assert!(fs::read_to_string(&config).unwrap().contains("# edited"));
}

#[test]
fn status_before_first_run_is_unknown() {
    let (_dir, config) = initialized();
    let out = driftwatch(&config)
        .args(["status", "--json"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let v: serde_json::Value = serde_json::from_slice(&out).unwrap();
    assert_eq!(v["status"], "UNKNOWN");
    assert!(v["lastRun"].is_null());
}

#[test]
fn settings_round_trip_through_the_store() {
    let (_dir, config) = initialized();
    driftwatch(&config)
        .args(["config", "set", "schedule_times", "21:00, 09:00"])
        .assert()
        .success()
        .stdout(contains("schedule_times = 09:00,21:00"));
    driftwatch(&config)
        .args(["config", "get", "schedule_times"])
        .assert()
        .success()
        .stdout(contains("09:00,21:00"));
    driftwatch(&config)
        .args(["config", "list"])
        .assert()
        .success()
        .stdout(contains("cache_busting"))
        .stdout(contains("timezone"));
}

#[test]
fn invalid_setting_is_rejected() {
    let (_dir, config) = initialized();
    driftwatch(&config)
        .args(["config", "set", "max_tokens", "0"])
        .assert()
        .code(2)
        .stderr(contains("max_tokens"));
    driftwatch(&config)
        .args(["config", "set", "colour", "blue"])
        .assert()
        .code(2)
        .stderr(contains("unknown setting"));
    driftwatch(&config)
        .args(["config", "get", "max_tokens"])
        .assert()
        .success()
        .stdout(contains("1024"));
}

#[test]
fn broken_config_exits_with_config_error() {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("driftwatch.yaml");
    fs::write(&config, "version: 1\nstorage:\n  backend: sqlite\n").unwrap();
    driftwatch(&config).args(["status"]).assert().code(2);

    let missing = dir.path().join("nope.yaml");
    driftwatch(&missing).args(["history"]).assert().code(2);
}

#[test]
fn dry_run_is_recorded_and_exportable() {
    let (dir, config) = initialized();
    let out = driftwatch(&config)
        .args(["run", "--dry-run", "--json"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let run: serde_json::Value = serde_json::from_slice(&out).unwrap();
    // Only the "reply with OK" prompt passes against the canned answer.
    assert_eq!(run["correctness_score"], 1);
    assert_eq!(run["correctness_total"], 4);
    assert_eq!(run["status"], "GREEN");
    assert_eq!(run["provider"], "fake");

    let out = driftwatch(&config)
        .args(["history", "--json"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let runs: Vec<serde_json::Value> = serde_json::from_slice(&out).unwrap();
    assert_eq!(runs.len(), 1);

    let id = run["id"].as_i64().unwrap().to_string();
    driftwatch(&config)
        .args(["show", &id])
        .assert()
        .success()
        .stderr(contains("GREEN"));

    let payload = dir.path().join("submission.json");
    driftwatch(&config)
        .args(["export-submission", &id, "--user-id", "tester"])
        .arg("--out")
        .arg(&payload)
        .assert()
        .success();
    let sub: serde_json::Value = serde_json::from_str(&fs::read_to_string(&payload).unwrap()).unwrap();
    assert_eq!(sub["test_score"], 25);
    assert_eq!(sub["anonymous_user_id"], "tester");
    assert_eq!(sub["test_details"].as_array().unwrap().len(), 8);

    let out = driftwatch(&config)
        .arg("submit")
        .arg("--file")
        .arg(&payload)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let resp: serde_json::Value = serde_json::from_slice(&out).unwrap();
    assert_eq!(resp["comparison"]["percentile"], 100);
    assert_eq!(resp["comparison"]["totalUsers"], 1);
    assert!(resp["share_url"].as_str().unwrap().ends_with(&format!("/r/{}", resp["run_id"])));
}

#[test]
fn invalid_submission_lists_every_problem() {
    let (dir, config) = initialized();
    let payload = dir.path().join("bad.json");
    fs::write(
        &payload,
        r#"{"anonymous_user_id":"","claude_version":"m","test_score":140,"total_tests":0,"error_rate":0.0}"#,
    )
    .unwrap();
    driftwatch(&config)
        .arg("submit")
        .arg("--file")
        .arg(&payload)
        .assert()
        .code(2)
        .stderr(contains("anonymous_user_id"))
        .stderr(contains("test_score"))
        .stderr(contains("total_tests"));
}

#[test]
fn show_unknown_run_fails() {
    let (_dir, config) = initialized();
    driftwatch(&config)
        .args(["show", "42"])
        .assert()
        .code(1)
        .stderr(contains("not found"));
}

#[test]
fn manual_run_refuses_while_another_process_runs() {
    let (dir, config) = initialized();
    let store = Store::open(&dir.path().join(".driftwatch/driftwatch.db")).unwrap();
    assert!(store.run_lock_acquire("daemon-elsewhere", now_utc()).unwrap());

    driftwatch(&config)
        .args(["run", "--dry-run", "--no-wait"])
        .assert()
        .code(3)
        .stderr(contains("in progress"));
    let out = driftwatch(&config)
        .args(["history", "--json"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let runs: Vec<serde_json::Value> = serde_json::from_slice(&out).unwrap();
    assert!(runs.is_empty());

    store.run_lock_release("daemon-elsewhere").unwrap();
    driftwatch(&config)
        .args(["run", "--dry-run", "--no-wait"])
        .assert()
        .success();
}
