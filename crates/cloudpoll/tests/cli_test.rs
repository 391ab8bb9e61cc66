//! Integration tests for the `cloudpoll` CLI binary.
//!
//! Argument parsing, config handling and error exit codes, plus one
//! discovery run against a wiremock vendor.
#![allow(clippy::unwrap_used)]

use std::io::Write as _;

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use serde_json::json;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

// ── Helpers ─────────────────────────────────────────────────────────

/// Build a [`Command`] for the `cloudpoll` binary with env isolation.
fn cloudpoll_cmd() -> assert_cmd::Command {
    let mut cmd = cargo_bin_cmd!("cloudpoll");
    cmd.env("HOME", "/tmp/cloudpoll-cli-test-nonexistent")
        .env("XDG_CONFIG_HOME", "/tmp/cloudpoll-cli-test-nonexistent")
        .env("NO_COLOR", "1")
        .env_remove("CLOUDPOLL_THING")
        .env_remove("CLOUDPOLL_CONFIG")
        .env_remove("RUST_LOG");
    cmd
}

fn config_file(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

fn combined_output(output: &std::process::Output) -> String {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    format!("{stdout}{stderr}")
}

// ── Basic invocation ────────────────────────────────────────────────

#[test]
fn test_no_args_shows_help() {
    let output = cloudpoll_cmd().output().unwrap();
    assert_eq!(output.status.code(), Some(2));
    assert!(combined_output(&output).contains("Usage"));
}

#[test]
fn test_help_lists_commands() {
    cloudpoll_cmd().arg("--help").assert().success().stdout(
        predicate::str::contains("vendors")
            .and(predicate::str::contains("poll"))
            .and(predicate::str::contains("discover")),
    );
}

#[test]
fn test_vendors_plain_lists_every_profile() {
    cloudpoll_cmd()
        .args(["vendors", "-o", "plain"])
        .assert()
        .success()
        .stdout(
            predicate::str::contains("efergy")
                .and(predicate::str::contains("goodwe"))
                .and(predicate::str::contains("jablotron"))
                .and(predicate::str::contains("mintos"))
                .and(predicate::str::contains("zonky")),
        );
}

// ── Configuration ───────────────────────────────────────────────────

#[test]
fn test_check_without_thing_is_a_usage_error() {
    let file = config_file("");
    let output = cloudpoll_cmd()
        .args(["--config", file.path().to_str().unwrap(), "check"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(2));
    assert!(combined_output(&output).contains("No thing selected"));
}

#[test]
fn test_unknown_thing_exits_not_found() {
    let file = config_file("[things.meter]\nvendor = \"efergy\"\ntoken = \"t\"\n");
    let output = cloudpoll_cmd()
        .args(["-c", file.path().to_str().unwrap(), "-t", "attic", "check"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(4));
    assert!(combined_output(&output).contains("meter"));
}

#[test]
fn test_missing_credentials_exit_auth() {
    let file = config_file("[things.plant]\nvendor = \"goodwe\"\nlogin = \"pv@example.com\"\n");
    let output = cloudpoll_cmd()
        .args(["-c", file.path().to_str().unwrap(), "check"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(3));
}

#[test]
fn test_config_show_hides_secrets() {
    let file = config_file(
        "[things.alarm]\nvendor = \"jablotron\"\nlogin = \"me\"\npassword = \"hunter2\"\n",
    );
    cloudpoll_cmd()
        .args(["-c", file.path().to_str().unwrap(), "config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("********").and(predicate::str::contains("hunter2").not()));
}

#[test]
fn test_things_marks_the_only_thing_as_default() {
    let file = config_file("[things.meter]\nvendor = \"efergy\"\ntoken = \"t\"\n");
    cloudpoll_cmd()
        .args(["-c", file.path().to_str().unwrap(), "things", "-o", "json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"default\": true"));
}

#[test]
fn test_send_to_channel_without_commands_exits_not_found() {
    let file = config_file("[things.meter]\nvendor = \"efergy\"\ntoken = \"t\"\n");
    let output = cloudpoll_cmd()
        .args(["-c", file.path().to_str().unwrap(), "send", "instant_1", "on"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(4));
}

// ── Against a mock vendor ───────────────────────────────────────────

#[tokio::test(flavor = "multi_thread")]
async fn test_discover_lists_power_sensors() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/getCurrentValuesSummary"))
        .and(query_param("token", "app-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"cid": "PWER", "sid": "728386", "units": "W", "data": [{"1": 5}], "age": 3},
            {"cid": "PWER_GAC", "sid": "999", "data": [{"1": 7}], "age": 3}
        ])))
        .mount(&server)
        .await;

    let file = config_file(&format!(
        "[things.meter]\nvendor = \"efergy\"\ntoken = \"app-token\"\nbase_url = \"{}\"\n",
        server.uri()
    ));
    let config = file.path().to_str().unwrap().to_owned();

    let output = tokio::task::spawn_blocking(move || {
        cloudpoll_cmd()
            .args(["-c", &config, "discover", "-o", "plain"])
            .output()
            .unwrap()
    })
    .await
    .unwrap();

    assert!(output.status.success(), "{}", combined_output(&output));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(stdout.trim(), "728386");
}
