//! CLI integration tests for mssql-frame-loader.
//!
//! These tests verify command-line argument parsing, help output,
//! and exit codes for error conditions that fail before connecting.

use assert_cmd::Command;
use predicates::prelude::*;
use std::io::Write;

/// Get a command for the mssql-frame-loader binary.
fn cmd() -> Command {
    let mut cmd = Command::cargo_bin("mssql-frame-loader").unwrap();
    for key in [
        "MSSQL_HOST",
        "MSSQL_DATABASE",
        "MSSQL_USER",
        "MSSQL_PASSWORD",
        "MSSQL_PORT",
        "MSSQL_AUTHENTICATION",
    ] {
        cmd.env_remove(key);
    }
    cmd
}

fn config_file(content: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, "{}", content).unwrap();
    file
}

// =============================================================================
// Help and Version Tests
// =============================================================================

#[test]
fn test_help_shows_all_commands() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("health-check"))
        .stdout(predicate::str::contains("export"))
        .stdout(predicate::str::contains("query"))
        .stdout(predicate::str::contains("create-schema"))
        .stdout(predicate::str::contains("table-exists"));
}

#[test]
fn test_export_subcommand_help() {
    cmd()
        .args(["export", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--input"))
        .stdout(predicate::str::contains("--if-exists"))
        .stdout(predicate::str::contains("--unique-constraint"))
        .stdout(predicate::str::contains("--unique-conflict-method"))
        .stdout(predicate::str::contains("--fast"))
        .stdout(predicate::str::contains("[default: replace]"));
}

#[test]
fn test_version_flag() {
    cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("mssql-frame-loader"));
}

#[test]
fn test_global_defaults() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("[default: io_config.yaml]"))
        .stdout(predicate::str::contains("[default: default]"))
        .stdout(predicate::str::contains("[default: text]"))
        .stdout(predicate::str::contains("[default: info]"));
}

#[test]
fn test_query_limit_default() {
    cmd()
        .args(["query", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[default: 10000000]"));
}

// =============================================================================
// Exit Code Tests
// =============================================================================

#[test]
fn test_missing_config_exits_with_code_7() {
    // Missing file is an IO error (code 7), not config error (code 1)
    cmd()
        .args(["--config", "nonexistent_io_config.yaml", "health-check"])
        .assert()
        .code(7);
}

#[test]
fn test_invalid_yaml_exits_with_code_1() {
    let file = config_file("invalid: yaml: content: [\n");

    cmd()
        .args(["--config", file.path().to_str().unwrap(), "health-check"])
        .assert()
        .code(1);
}

#[test]
fn test_empty_config_exits_with_code_1() {
    let file = config_file("");

    cmd()
        .args(["--config", file.path().to_str().unwrap(), "health-check"])
        .assert()
        .code(1);
}

#[test]
fn test_missing_profile_exits_with_code_1() {
    let file = config_file("default:\n  MSSQL_HOST: localhost\n");

    cmd()
        .args([
            "--config",
            file.path().to_str().unwrap(),
            "--profile",
            "staging",
            "health-check",
        ])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("profile 'staging' not found"));
}

#[test]
fn test_missing_required_keys_exits_with_code_1() {
    let file = config_file("default:\n  MSSQL_HOST: localhost\n");

    cmd()
        .args(["--config", file.path().to_str().unwrap(), "health-check"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("MSSQL_DATABASE is required"));
}

#[test]
fn test_env_settings_missing_exits_with_code_1() {
    cmd().args(["--env", "health-check"]).assert().code(1);
}

#[test]
fn test_invalid_if_exists_is_rejected() {
    cmd()
        .args(["export", "--table", "t", "--if-exists", "overwrite"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown write policy"));
}

#[test]
fn test_input_and_query_conflict() {
    cmd()
        .args(["export", "--table", "t", "--input", "a.json", "--query", "SELECT 1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("cannot be used with"));
}

#[test]
fn test_unsafe_column_type_exits_with_code_1() {
    let file = config_file(
        "default:\n  MSSQL_HOST: localhost\n  MSSQL_DATABASE: master\n  MSSQL_USER: sa\n  MSSQL_PASSWORD: secret\n",
    );

    cmd()
        .args([
            "--config",
            file.path().to_str().unwrap(),
            "export",
            "--table",
            "t",
            "--query",
            "SELECT 1 AS id",
            "--column-type",
            "id=int; DROP TABLE t",
        ])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("invalid column type"));
}

// =============================================================================
// Config Path Tests
// =============================================================================

#[test]
fn test_short_config_flag() {
    cmd()
        .args(["-c", "some_io_config.yaml", "--help"])
        .assert()
        .success();
}

#[test]
fn test_no_subcommand_shows_help() {
    cmd()
        .assert()
        .failure()
        .stderr(predicate::str::contains("Usage:"));
}
