//! End-to-end tests for the sprint-sync binary.

use assert_cmd::Command;
use predicates::prelude::*;
use std::path::Path;
use tempfile::tempdir;

fn sprint_sync(config: &Path) -> Command {
    let mut cmd = Command::cargo_bin("sprint-sync").unwrap();
    cmd.arg("--config").arg(config).env("RUST_LOG", "warn");
    cmd
}

const SHORT_SESSION: &str = r#"
[session]
plan = ["warmup", "sprint", "cooldown"]
warmup_secs = 5
cooldown_secs = 5
sprint_reps = 2
sprint_distance_m = 20.0
rest_secs = 5

[simulation]
runner_speed_mps = 10.0
time_scale = 50.0
"#;

// ===========================================
// init
// ===========================================

#[test]
fn init_creates_config() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("nested").join("sprint-sync.toml");

    sprint_sync(&path)
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("Config written to"));

    let content = std::fs::read_to_string(&path).unwrap();
    assert!(content.contains("[session]"));
    assert!(content.contains("sprint_reps = 4"));
}

#[test]
fn init_refuses_existing_config_without_force() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("sprint-sync.toml");
    std::fs::write(&path, SHORT_SESSION).unwrap();

    sprint_sync(&path)
        .arg("init")
        .assert()
        .failure()
        .stderr(predicate::str::contains("--force"));

    sprint_sync(&path).args(["init", "--force"]).assert().success();
    let content = std::fs::read_to_string(&path).unwrap();
    assert!(content.contains("sprint_reps = 4"));
}

// ===========================================
// plan
// ===========================================

#[test]
fn plan_prints_timeline() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("sprint-sync.toml");
    sprint_sync(&path).arg("init").assert().success();

    sprint_sync(&path)
        .arg("plan")
        .assert()
        .success()
        .stdout(predicate::str::contains("Warm-Up"))
        .stdout(predicate::str::contains("Drills     2 x 20 m"))
        .stdout(predicate::str::contains("Sprints    4 x 40 m, 2:00 rest"))
        .stdout(predicate::str::contains("Total reps:   9"));
}

#[test]
fn plan_json_is_session_config() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("sprint-sync.toml");
    std::fs::write(&path, SHORT_SESSION).unwrap();

    let output = sprint_sync(&path).args(["plan", "--json"]).output().unwrap();
    assert!(output.status.success());

    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json["plan"], serde_json::json!(["warmup", "sprint", "cooldown"]));
    assert_eq!(json["sprint"]["reps"], 2);
    assert_eq!(json["warmup_secs"], 5);
}

#[test]
fn plan_rejects_invalid_session() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("sprint-sync.toml");
    std::fs::write(&path, "[session]\nsprint_reps = 0\n").unwrap();

    sprint_sync(&path)
        .arg("plan")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid [session] configuration"));
}

#[test]
fn unreadable_toml_fails() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("sprint-sync.toml");
    std::fs::write(&path, "[session\n").unwrap();

    sprint_sync(&path)
        .arg("plan")
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to parse config file"));
}

// ===========================================
// simulate
// ===========================================

#[test]
fn simulate_runs_session_to_completion() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("sprint-sync.toml");
    std::fs::write(&path, SHORT_SESSION).unwrap();

    sprint_sync(&path)
        .arg("simulate")
        .assert()
        .success()
        .stdout(predicate::str::contains("Warm-Up -> Sprints (rep 1)"))
        .stdout(predicate::str::contains("rep 2 done"))
        .stdout(predicate::str::contains("session Completed"))
        .stdout(predicate::str::contains("replicas converged"));
}

#[test]
fn simulate_survives_link_drop() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("sprint-sync.toml");
    std::fs::write(&path, SHORT_SESSION).unwrap();

    sprint_sync(&path)
        .args(["simulate", "--drop-at", "3", "--drop-for", "6"])
        .assert()
        .success()
        .stdout(predicate::str::contains("link      down"))
        .stdout(predicate::str::contains("link      up"))
        .stdout(predicate::str::contains("replicas converged"));
}

#[test]
fn drop_for_requires_drop_at() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("sprint-sync.toml");

    sprint_sync(&path)
        .args(["simulate", "--drop-for", "5"])
        .assert()
        .failure();
}
