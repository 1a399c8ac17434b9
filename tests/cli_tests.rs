//! CLI integration tests
//!
//! Tests the command-line interface using assert_cmd

mod common;

use common::fanout_cmd;
use predicates::prelude::*;
use tempfile::TempDir;

/// `fanout run` against the in-memory mock backend
fn run_mock(args: &[&str]) -> assert_cmd::assert::Assert {
    fanout_cmd()
        .arg("--quiet")
        .arg("run")
        .args(args)
        .arg("--backend")
        .arg("mock")
        .assert()
}

// ─────────────────────────────────────────────────────────────────
// Help and Version Tests
// ─────────────────────────────────────────────────────────────────

#[test]
fn test_help_flag() {
    fanout_cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("fanout"))
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("handler"))
        .stdout(predicate::str::contains("version"))
        .stdout(predicate::str::contains("config"));
}

#[test]
fn test_version_command() {
    fanout_cmd()
        .arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains("fanout"))
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")))
        .stdout(predicate::str::contains("Target:"));
}

#[test]
fn test_version_json() {
    let output = fanout_cmd().arg("version").arg("--json").output().unwrap();
    assert!(output.status.success());

    let info: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(info["name"], "fanout");
    assert_eq!(info["version"], env!("CARGO_PKG_VERSION"));
}

#[test]
fn test_functions_lists_builtins() {
    fanout_cmd()
        .arg("functions")
        .assert()
        .success()
        .stdout(predicate::str::contains("square"))
        .stdout(predicate::str::contains("sum"))
        .stdout(predicate::str::contains("identity"));
}

// ─────────────────────────────────────────────────────────────────
// Config Command Tests
// ─────────────────────────────────────────────────────────────────

#[test]
fn test_config_show_default() {
    fanout_cmd()
        .arg("config")
        .arg("show")
        .arg("--config")
        .arg(common::valid_config_fixture())
        .assert()
        .success()
        .stdout(predicate::str::contains("[executor]"))
        .stdout(predicate::str::contains("[backend]"))
        .stdout(predicate::str::contains("[logging]"))
        .stdout(predicate::str::contains("max_in_flight = 8"));
}

#[test]
fn test_config_validate_valid_fixture() {
    fanout_cmd()
        .arg("config")
        .arg("validate")
        .arg("--config")
        .arg(common::valid_config_fixture())
        .assert()
        .success()
        .stdout(predicate::str::contains("valid"));
}

#[test]
fn test_config_validate_invalid_fixture() {
    fanout_cmd()
        .arg("config")
        .arg("validate")
        .arg("--config")
        .arg(common::invalid_config_fixture())
        .assert()
        .failure()
        .code(10)
        .stderr(predicate::str::contains("max_in_flight"));
}

#[test]
fn test_config_validate_nonexistent_file() {
    fanout_cmd()
        .arg("config")
        .arg("validate")
        .arg("--config")
        .arg("/nonexistent/path/config.toml")
        .assert()
        .failure()
        .code(10)
        .stderr(predicate::str::contains("not found"));
}

#[test]
fn test_config_init_creates_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("fanout.toml");

    fanout_cmd()
        .arg("config")
        .arg("init")
        .arg("--path")
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("Configuration file created"));
    assert!(path.exists());

    // The generated file is itself valid
    fanout_cmd()
        .arg("config")
        .arg("validate")
        .arg("--config")
        .arg(&path)
        .assert()
        .success();

    // Refuses to overwrite without --force
    fanout_cmd()
        .arg("config")
        .arg("init")
        .arg("--path")
        .arg(&path)
        .assert()
        .failure();
}

// ─────────────────────────────────────────────────────────────────
// Run Command Tests
// ─────────────────────────────────────────────────────────────────

#[test]
fn test_run_help() {
    fanout_cmd()
        .arg("run")
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--input"))
        .stdout(predicate::str::contains("--reduce"))
        .stdout(predicate::str::contains("--concurrency"));
}

#[test]
fn test_run_map_prints_ordered_results() {
    run_mock(&["square", "--input", "[1,2,3,4]"])
        .success()
        .stdout("[1,4,9,16]\n");
}

#[test]
fn test_run_map_reduce_prints_single_value() {
    run_mock(&["identity", "-i", "[1,2,3]", "-r", "sum"])
        .success()
        .stdout("6\n");
}

#[test]
fn test_run_chunked_map() {
    run_mock(&["sum", "-i", "[1,2,3,4,5]", "--chunk-size", "2"])
        .success()
        .stdout("[3,7,5]\n");
}

#[test]
fn test_run_reduce_every() {
    run_mock(&["identity", "-i", "[1,2,3,4,5]", "-r", "sum", "--reduce-every", "2"])
        .success()
        .stdout("[3,7,5]\n");
}

#[test]
fn test_run_call_async_on_scalar() {
    run_mock(&["square", "-i", "12"]).success().stdout("144\n");
}

#[test]
fn test_run_input_from_stdin() {
    fanout_cmd()
        .arg("--quiet")
        .arg("run")
        .arg("count")
        .arg("--input-file")
        .arg("-")
        .arg("--backend")
        .arg("mock")
        .write_stdin("[\"a\", \"bc\", \"def\"]")
        .assert()
        .success()
        .stdout("[1,2,3]\n");
}

#[test]
fn test_run_json_output_keeps_user_errors() {
    let output = fanout_cmd()
        .arg("--quiet")
        .arg("run")
        .arg("fail")
        .arg("-i")
        .arg("[1,2]")
        .arg("--json")
        .arg("--backend")
        .arg("mock")
        .output()
        .unwrap();
    assert!(output.status.success());

    let result: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(result["outcomes"].as_array().unwrap().len(), 2);
}

#[test]
fn test_run_user_error_fails_plain_output() {
    run_mock(&["fail", "-i", "[1]"])
        .failure()
        .code(50)
        .stderr(predicate::str::contains("fail called with 1"));
}

#[test]
fn test_run_unknown_function() {
    run_mock(&["no_such_function", "-i", "[1]"])
        .failure()
        .code(30)
        .stderr(predicate::str::contains("no_such_function"));
}

#[test]
fn test_run_reduce_needs_array() {
    run_mock(&["identity", "-i", "5", "-r", "sum"]).failure().code(30);
}

#[test]
fn test_run_invalid_input_json() {
    run_mock(&["square", "-i", "[1,2"]).failure();
}

#[test]
fn test_run_with_invalid_config() {
    fanout_cmd()
        .arg("run")
        .arg("square")
        .arg("--config")
        .arg("/nonexistent/config.toml")
        .assert()
        .failure()
        .code(10);
}

#[test]
fn test_run_zero_concurrency_rejected() {
    run_mock(&["square", "-i", "[1]", "-j", "0"]).failure().code(10);
}

#[test]
fn test_run_over_directory_objects() {
    let dir = TempDir::new().unwrap();
    std::fs::create_dir_all(dir.path().join("logs")).unwrap();
    std::fs::write(dir.path().join("logs/a.txt"), b"hello").unwrap();
    std::fs::write(dir.path().join("logs/b.txt"), b"abc").unwrap();
    std::fs::write(dir.path().join("notes.md"), b"skip").unwrap();

    let output = fanout_cmd()
        .arg("--quiet")
        .arg("run")
        .arg("identity")
        .arg("--objects")
        .arg(dir.path())
        .arg("--prefix")
        .arg("logs/")
        .arg("--backend")
        .arg("mock")
        .output()
        .unwrap();
    assert!(output.status.success());

    // Both small files are packed into one partition
    let partitions: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let partitions = partitions.as_array().unwrap();
    assert_eq!(partitions.len(), 1);
    let keys: Vec<_> = partitions[0]["source"]["slices"]
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s["key"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(keys, vec!["logs/a.txt", "logs/b.txt"]);
    assert_eq!(partitions[0]["estimated_size"], 8);
}

#[test]
fn test_run_object_chunks_with_reducer() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("data.bin"), vec![0u8; 100]).unwrap();

    fanout_cmd()
        .arg("--quiet")
        .arg("run")
        .arg("identity")
        .arg("--objects")
        .arg(dir.path())
        .arg("--object-chunks")
        .arg("4")
        .arg("-r")
        .arg("count")
        .arg("--backend")
        .arg("mock")
        .assert()
        .success()
        .stdout("4\n");
}

#[test]
fn test_run_objects_empty_directory() {
    let dir = TempDir::new().unwrap();
    run_mock(&["identity", "--objects", dir.path().to_str().unwrap()])
        .failure()
        .code(30);
}

// ─────────────────────────────────────────────────────────────────
// Handler Command Tests
// ─────────────────────────────────────────────────────────────────

#[test]
fn test_handler_executes_payload() {
    let payload = r#"{"job_id":"job-1","index":0,"kind":"map","function":"square","data":9}"#;
    let output = fanout_cmd()
        .arg("handler")
        .write_stdin(payload)
        .output()
        .unwrap();
    assert!(output.status.success());

    let result: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(result["status"], "ok");
    assert_eq!(result["value"], 81);
}

#[test]
fn test_handler_reports_user_error_as_data() {
    let payload = r#"{"job_id":"job-1","index":0,"kind":"map","function":"fail","data":1,"args":{"message":"boom"}}"#;
    let output = fanout_cmd()
        .arg("handler")
        .write_stdin(payload)
        .output()
        .unwrap();
    assert!(output.status.success());

    let result: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(result["status"], "error");
    assert_eq!(result["error"]["kind"], "user");
    assert_eq!(result["error"]["message"], "boom");
}

// ─────────────────────────────────────────────────────────────────
// Verbosity Flag Tests
// ─────────────────────────────────────────────────────────────────

#[test]
fn test_verbose_flag() {
    fanout_cmd().arg("-v").arg("version").assert().success();
}

#[test]
fn test_very_verbose_run_logs_to_stderr() {
    fanout_cmd()
        .arg("-vv")
        .arg("run")
        .arg("square")
        .arg("-i")
        .arg("[2]")
        .arg("--backend")
        .arg("mock")
        .assert()
        .success()
        .stdout("[4]\n");
}

// ─────────────────────────────────────────────────────────────────
// Error Handling Tests
// ─────────────────────────────────────────────────────────────────

#[test]
fn test_unknown_command() {
    fanout_cmd()
        .arg("unknown-command")
        .assert()
        .failure()
        .stderr(predicate::str::contains("error"));
}

#[test]
fn test_missing_subcommand() {
    fanout_cmd().assert().failure();
}
