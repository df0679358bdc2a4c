mod common;

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

// Binary with the environment and config search paths isolated to `dir`.
fn sluice(dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("sluice").unwrap();
    for var in common::SLUICE_VARS {
        cmd.env_remove(var);
    }
    cmd.env_remove("RUST_LOG")
        .env("HOME", dir)
        .env("XDG_CONFIG_HOME", dir.join(".config"))
        .env("SLUICE_BACKOFF_STEP", "0")
        .env("SLUICE_MAX_BACKOFF", "0")
        .current_dir(dir);
    cmd
}

#[test]
fn test_plan_prints_budget() {
    let dir = TempDir::new().unwrap();
    sluice(dir.path())
        .args(["plan", "--jobs", "40", "--keys", "5", "--requests-per-day", "100"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Workers: 10"))
        .stdout(predicate::str::contains("Strategy: batch_parallel"))
        .stdout(predicate::str::contains("Batches: 4"));
}

#[test]
fn test_plan_fails_over_daily_limit() {
    let dir = TempDir::new().unwrap();
    sluice(dir.path())
        .args(["plan", "--jobs", "1000", "--keys", "1"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("Daily limit exceeded"))
        .stderr(predicate::str::contains("daily capacity of 50"));
}

#[test]
fn test_run_with_mock_keeps_input_order() {
    let dir = TempDir::new().unwrap();
    let inputs = dir.path().join("reports");
    fs::create_dir(&inputs).unwrap();
    for name in ["c.pdf", "a.pdf", "b-fail-fatal.pdf", "skip.txt"] {
        fs::write(inputs.join(name), b"%PDF").unwrap();
    }

    let output = sluice(dir.path())
        .args(["run", "--api", "mock", "--api-key", "key-one", "--api-key", "key-two"])
        .arg(&inputs)
        .output()
        .unwrap();
    assert!(output.status.success());

    let results: Value = serde_json::from_slice(&output.stdout).unwrap();
    let results = results.as_array().unwrap();
    let names: Vec<_> = results.iter().map(|r| r["name"].as_str().unwrap()).collect();
    assert_eq!(names, vec!["a.pdf", "b-fail-fatal.pdf", "c.pdf"]);
    assert_eq!(results[0]["result"]["file"], "a.pdf");
    assert_eq!(results[1]["error"], "invalid file format");
    assert!(results[1].get("result").is_none());
}

#[test]
fn test_run_reports_exhausted_retries() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("x-fail-retry.pdf");
    fs::write(&input, b"%PDF").unwrap();
    let out = dir.path().join("out.json");

    sluice(dir.path())
        .args(["run", "--api", "mock", "--api-key", "k", "--max-attempts", "2", "--output"])
        .arg(&out)
        .arg(&input)
        .assert()
        .success();

    let results: Value = serde_json::from_str(&fs::read_to_string(&out).unwrap()).unwrap();
    assert_eq!(results[0]["attempts"], 2);
    assert_eq!(
        results[0]["error"],
        "failed after 2 attempts: 503 service unavailable"
    );
}

#[test]
fn test_run_without_keys_fails() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("a.pdf");
    fs::write(&input, b"%PDF").unwrap();

    sluice(dir.path())
        .args(["run", "--api", "mock"])
        .arg(&input)
        .assert()
        .failure()
        .stderr(predicate::str::contains("at least one API key"));
}

#[test]
fn test_run_over_daily_limit_fails_before_dispatch() {
    let dir = TempDir::new().unwrap();
    let a = dir.path().join("a.pdf");
    let b = dir.path().join("b.pdf");
    fs::write(&a, b"%PDF").unwrap();
    fs::write(&b, b"%PDF").unwrap();

    sluice(dir.path())
        .args(["run", "--api", "mock", "--api-key", "k", "--requests-per-day", "1"])
        .arg(&a)
        .arg(&b)
        .assert()
        .failure()
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains("exceed the daily capacity"));
}

#[test]
fn test_config_file_is_picked_up_from_working_directory() {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join("sluice.toml"),
        "[limits]\nrequests_per_minute = 1\nrequests_per_day = 5\n",
    )
    .unwrap();

    sluice(dir.path())
        .args(["plan", "--jobs", "3", "--keys", "2"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Workers: 2"))
        .stdout(predicate::str::contains("Daily limit: 10 jobs"));
}

#[test]
fn test_unparsable_config_file_is_an_error() {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join("sluice.toml"),
        "[limits]\nrequests_per_day = \"lots\"\n",
    )
    .unwrap();

    sluice(dir.path())
        .args(["plan", "--jobs", "3", "--keys", "1"])
        .assert()
        .failure()
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains("failed to parse config file sluice.toml"));
}

#[test]
fn test_init_default_location_is_loaded_afterwards() {
    let dir = TempDir::new().unwrap();
    let output = sluice(dir.path())
        .args(["init", "--no-prompt"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let stdout = String::from_utf8(output.stdout).unwrap();
    let created = stdout
        .lines()
        .find_map(|line| line.strip_prefix("Configuration created at: "))
        .unwrap();
    let created = Path::new(created.trim());
    assert!(created.starts_with(dir.path()));

    let text = fs::read_to_string(created).unwrap();
    fs::write(created, text.replace("requests_per_day = 50", "requests_per_day = 1")).unwrap();

    sluice(dir.path())
        .args(["plan", "--jobs", "3", "--keys", "1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("daily capacity of 1 requests"));
}
