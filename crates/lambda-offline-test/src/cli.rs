//! CLI regression tests for the `lambda-offline` binary.
//!
//! These run the binary as a subprocess to pin flag names, exit codes and
//! output formats.
//!
//! Requires the binary to be built first (`cargo build -p lambda-offline`).

use assert_cmd::Command;
use predicates::str::contains;

use crate::gateway::fixture;

fn lambda_offline() -> Command {
    #[allow(deprecated)]
    Command::cargo_bin("lambda-offline")
        .expect("lambda-offline binary not found; run `cargo build -p lambda-offline` first")
}

// ---------------------------------------------------------------------------
// lambda-offline validate
// ---------------------------------------------------------------------------

#[test]
fn validate_valid_config_exits_zero() {
    lambda_offline()
        .args(["validate", "--config"])
        .arg(fixture("minimal.yaml"))
        .assert()
        .success()
        .stderr(contains("is valid"))
        .stderr(contains("GET - /hello"));
}

#[test]
fn validate_parse_error_exits_one() {
    lambda_offline()
        .args(["validate", "--config"])
        .arg(fixture("invalid-parse-error.yaml"))
        .assert()
        .failure()
        .code(1)
        .stderr(contains("parse error"));
}

#[test]
fn validate_missing_file_exits_one() {
    lambda_offline()
        .args(["validate", "--config", "this-file-does-not-exist.yaml"])
        .assert()
        .failure()
        .code(1);
}

#[test]
fn validate_route_conflict_exits_one() {
    lambda_offline()
        .args(["validate", "--config"])
        .arg(fixture("invalid-route-conflict.yaml"))
        .assert()
        .failure()
        .code(1)
        .stderr(contains("routing conflict"))
        .stderr(contains("'first'"));
}

#[test]
fn validate_remote_authorizer_exits_one() {
    lambda_offline()
        .args(["validate", "--config"])
        .arg(fixture("invalid-remote-authorizer.yaml"))
        .assert()
        .failure()
        .code(1)
        .stderr(contains("remote authorizers cannot be emulated"));
}

#[test]
fn validate_json_format_outputs_valid_json() {
    let output = lambda_offline()
        .args(["validate", "--config"])
        .arg(fixture("minimal.yaml"))
        .args(["--format", "json"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let s = String::from_utf8(output).expect("stdout should be valid UTF-8");
    let v: serde_json::Value =
        serde_json::from_str(&s).expect("--format json output should be valid JSON");
    assert_eq!(v["valid"], true);
    assert_eq!(v["routes"].as_array().map(Vec::len), Some(5));
}

#[test]
fn validate_json_format_invalid_config_exits_one_with_json() {
    let output = lambda_offline()
        .args(["validate", "--config"])
        .arg(fixture("invalid-route-conflict.yaml"))
        .args(["--format", "json"])
        .assert()
        .failure()
        .code(1)
        .get_output()
        .stdout
        .clone();

    let s = String::from_utf8(output).expect("stdout should be valid UTF-8");
    let v: serde_json::Value =
        serde_json::from_str(&s).expect("--format json output should be valid JSON even on error");
    assert_eq!(v["valid"], false);
    assert!(v["error"].as_str().is_some_and(|e| e.contains("/items")));
}

// ---------------------------------------------------------------------------
// lambda-offline serve
// ---------------------------------------------------------------------------

#[test]
fn serve_invalid_config_exits_one() {
    lambda_offline()
        .args(["serve", "--port", "0", "--config"])
        .arg(fixture("invalid-remote-authorizer.yaml"))
        .assert()
        .failure()
        .code(1)
        .stderr(contains("remote authorizers cannot be emulated"));
}

#[test]
fn serve_missing_https_material_exits_one() {
    let dir = tempfile::tempdir().expect("temp dir");
    lambda_offline()
        .args(["serve", "--host", "127.0.0.1", "--port", "0", "--config"])
        .arg(fixture("minimal.yaml"))
        .arg("--https-dir")
        .arg(dir.path())
        .assert()
        .failure()
        .code(1)
        .stderr(contains("TLS setup failed"));
}

#[test]
fn serve_unknown_log_format_exits_two() {
    lambda_offline()
        .args(["serve", "--log-format", "xml", "--config"])
        .arg(fixture("minimal.yaml"))
        .assert()
        .failure()
        .code(2)
        .stderr(contains("unknown log format"));
}

#[test]
fn unknown_subcommand_exits_two() {
    lambda_offline().arg("deploy").assert().failure().code(2);
}

#[test]
fn version_flag_prints_version() {
    lambda_offline()
        .arg("--version")
        .assert()
        .success()
        .stdout(contains(env!("CARGO_PKG_VERSION")));
}
