//! End-to-end tests for the `hotpatch` binary.

use std::io::Write;
use std::process::{Command, Output};

use tempfile::NamedTempFile;

/// Write a config file with gating settings the tests rely on.
fn config_file(extra: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    write!(
        file,
        r#"
[server]
main_url = "http://127.0.0.1:1"
fallback_url = "http://127.0.0.1:1"
app_version = "v1.0.0"

[download]
max_concurrent = 2
retry_count = 1

[version]
fetch_policy = false
{}
"#,
        extra
    )
    .unwrap();
    file
}

fn hotpatch(config: &NamedTempFile, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_hotpatch"))
        .env("HOTPATCH_CONFIG", config.path())
        .env("RUST_LOG", "error")
        .args(args)
        .output()
        .expect("Failed to run hotpatch")
}

fn stdout_json(output: &Output) -> serde_json::Value {
    serde_json::from_slice(&output.stdout).expect("stdout is JSON")
}

// =============================================================================
// config
// =============================================================================

#[test]
fn test_config_prints_effective_values() {
    let config = config_file("");
    let output = hotpatch(&config, &["config"]);

    assert!(output.status.success());
    let json = stdout_json(&output);
    assert_eq!(json["server"]["app_version"], "v1.0.0");
    assert_eq!(json["download"]["max_concurrent"], 2);
    assert_eq!(json["cache"]["auto_clear"], true);
}

#[test]
fn test_invalid_config_is_rejected() {
    let mut file = NamedTempFile::new().unwrap();
    write!(file, "[download]\nmax_concurrent = 0\n").unwrap();

    let output = hotpatch(&file, &["config"]);

    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("validation"));
}

// =============================================================================
// check
// =============================================================================

#[test]
fn test_check_optional_update_passes() {
    let config = config_file("");
    let output = hotpatch(&config, &["check", "--server", "v1.0.1"]);

    assert!(output.status.success());
    let json = stdout_json(&output);
    assert_eq!(json["is_compatible"], true);
    assert_eq!(json["update_type"], "optional");
}

#[test]
fn test_check_major_update_is_blocked() {
    let config = config_file("");
    let output = hotpatch(&config, &["check", "--server", "v2.0.0", "--no-policy"]);

    assert_eq!(output.status.code(), Some(2));
    let json = stdout_json(&output);
    assert_eq!(json["update_type"], "force_update");
}

#[test]
fn test_check_explicit_local_version() {
    let config = config_file("");
    let output = hotpatch(
        &config,
        &["check", "--local", "v1.2.0", "--server", "v1.5.0"],
    );

    assert_eq!(output.status.code(), Some(2));
    let json = stdout_json(&output);
    assert_eq!(json["is_compatible"], false);
    assert!(json["reason"].as_str().unwrap().contains("minor"));
}

// =============================================================================
// simulate
// =============================================================================

#[test]
fn test_simulate_prints_events_and_report() {
    let config = config_file("");
    let output = hotpatch(&config, &["simulate", "--files", "2"]);

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains(r#""type":"stage_changed""#));
    assert!(stdout.contains(r#""type":"completed""#));
    assert!(stdout.contains(r#""final_stage": "completed""#));
}

#[test]
fn test_simulate_download_failure_exits_nonzero() {
    let config = config_file("");
    let output = hotpatch(
        &config,
        &["simulate", "--files", "1", "--fail", "bundle_000.bundle"],
    );

    assert_eq!(output.status.code(), Some(1));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains(r#""type":"error""#));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("download_package_files"));
}

#[test]
fn test_simulate_several_packages() {
    let config = config_file("");
    let output = hotpatch(
        &config,
        &["simulate", "--package", "Base", "--package", "Dlc", "--files", "1"],
    );

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains(r#""package":"Base""#));
    assert!(stdout.contains(r#""package":"Dlc""#));

    let events = stdout
        .lines()
        .filter(|line| line.starts_with('{') && line.contains(r#""type":"completed""#))
        .count();
    assert_eq!(events, 2);
    assert_eq!(stdout.matches(r#""final_stage": "completed""#).count(), 2);
}

#[test]
fn test_unknown_play_mode_is_usage_error() {
    let config = config_file("");
    let output = hotpatch(&config, &["simulate", "--mode", "cloud"]);

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("unknown play mode"));
}
