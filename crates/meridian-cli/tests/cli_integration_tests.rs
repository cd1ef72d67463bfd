//! CLI integration tests for meridian
//!
//! Runs the meridian binary end-to-end using assert_cmd, with the config
//! directory pointed at a temp dir.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

/// Command with an isolated config directory
#[allow(deprecated)]
fn meridian_cmd(config_dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("meridian").unwrap();
    cmd.env("MERIDIAN_CONFIG_DIR", config_dir.path());
    cmd.env("RUST_LOG", "off");
    cmd
}

#[test]
fn test_help_lists_commands() {
    let dir = TempDir::new().unwrap();
    meridian_cmd(&dir)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("simulate"))
        .stdout(predicate::str::contains("sync"))
        .stdout(predicate::str::contains("config"));
}

#[test]
fn test_config_set_get_reset() {
    let dir = TempDir::new().unwrap();

    meridian_cmd(&dir)
        .args(["config", "set", "meta.epsilon", "0.5"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Set meta.epsilon = 0.5"));
    assert!(dir.path().join("config.toml").exists());

    meridian_cmd(&dir)
        .args(["config", "get", "meta.epsilon"])
        .assert()
        .success()
        .stdout("0.5\n");

    meridian_cmd(&dir)
        .args(["config", "reset"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Configuration reset to defaults."));

    meridian_cmd(&dir)
        .args(["config", "get", "meta.epsilon"])
        .assert()
        .success()
        .stdout(predicate::str::contains("0.5").not());
}

#[test]
fn test_config_rejects_bad_values() {
    let dir = TempDir::new().unwrap();

    meridian_cmd(&dir)
        .args(["config", "get", "routing.nope"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unknown configuration key"));

    meridian_cmd(&dir)
        .args(["config", "set", "meta.epsilon", "-1"])
        .assert()
        .failure();
}

#[test]
fn test_config_list_and_path() {
    let dir = TempDir::new().unwrap();

    meridian_cmd(&dir)
        .args(["config", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("routing.health_threshold = "))
        .stdout(predicate::str::contains("store.database_path = (in-memory)"));

    let output = meridian_cmd(&dir)
        .args(["--format", "json", "config", "list"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let map: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert!(map.get("meta.sync_interval_secs").is_some());

    meridian_cmd(&dir)
        .args(["config", "path"])
        .assert()
        .success()
        .stdout(predicate::str::contains("config.toml"));
}

#[test]
fn test_simulate_text_summary() {
    let dir = TempDir::new().unwrap();
    meridian_cmd(&dir)
        .args(["simulate", "--tenants", "2", "--agents", "3", "--requests", "40"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Simulated 2 tenant(s), 40 request(s) each"))
        .stdout(predicate::str::contains("tenant-1: routed 40"))
        .stdout(predicate::str::contains("tenant-2: routed 40"));
}

#[test]
fn test_simulate_json_with_sync() {
    let dir = TempDir::new().unwrap();
    let output = meridian_cmd(&dir)
        .args([
            "--format", "json", "simulate", "--tenants", "2", "--agents", "2", "--requests",
            "30", "--seed", "7", "--sync",
        ])
        .output()
        .unwrap();
    assert!(output.status.success());

    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["seed"], 7);
    let tenants = report["tenants"].as_array().unwrap();
    assert_eq!(tenants.len(), 2);
    for tenant in tenants {
        assert_eq!(tenant["routed"], 30);
        assert_eq!(tenant["rejected"], 0);
    }
    assert_eq!(report["global"]["tenant_ids"].as_array().unwrap().len(), 2);
}

#[test]
fn test_simulate_requires_agents() {
    let dir = TempDir::new().unwrap();
    meridian_cmd(&dir)
        .args(["simulate", "--agents", "0"])
        .assert()
        .failure();
}

#[test]
fn test_sync_then_global_from_database() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("state.db");
    let db = db.to_str().unwrap();

    meridian_cmd(&dir)
        .args(["global", "--db", db])
        .assert()
        .success()
        .stdout(predicate::str::contains("No global parameters stored yet"));

    meridian_cmd(&dir)
        .args(["-q", "simulate", "--tenants", "3", "--requests", "25", "--db", db])
        .assert()
        .success();

    meridian_cmd(&dir)
        .args(["sync", "--db", db])
        .assert()
        .success()
        .stdout(predicate::str::contains("Global parameters: 3 tenant(s)"));

    meridian_cmd(&dir)
        .args(["global", "--db", db])
        .assert()
        .success()
        .stdout(predicate::str::contains("Context weights:"))
        .stdout(predicate::str::contains("Arm priors:"));

    let output = meridian_cmd(&dir)
        .args(["--format", "json", "global", "--db", db])
        .output()
        .unwrap();
    let global: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert!(global["arm_priors"].get("agent-1").is_some());
    assert!(global["arm_priors"].get("model-small").is_some());
}

#[test]
fn test_sync_uses_configured_database() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("configured.db");

    meridian_cmd(&dir)
        .args(["config", "set", "store.database_path", db.to_str().unwrap()])
        .assert()
        .success();

    meridian_cmd(&dir)
        .args(["-q", "simulate", "--tenants", "1", "--requests", "10"])
        .assert()
        .success();
    assert!(db.exists());

    meridian_cmd(&dir)
        .args(["sync"])
        .assert()
        .success()
        .stdout(predicate::str::contains("1 tenant(s)"));
}
