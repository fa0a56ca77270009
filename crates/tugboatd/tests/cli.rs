//! Runs the `tugboatd` binary against throwaway config files.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use serde_json::Value;

const CONFIG: &str = r#"
[infra]
backend = "mock"
poll_interval = "20ms"
poll_attempts = 50
mock_completion_delay = "50ms"

[pipeline]
readiness_interval = "100ms"
readiness_attempts = 50
"#;

const WORKLOAD: &str = r#"
project_id = "p1"
service_id = "9c1e4f2a-7b3d-4e5f-8a6b-1c2d3e4f5a6b"
name = "Web"
image = "placeholder"
public = true
"#;

fn write(dir: &Path, name: &str, content: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, content).unwrap();
    path
}

fn tugboatd(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_tugboatd"))
        .args(args)
        .env("RUST_LOG", "warn")
        .output()
        .unwrap()
}

fn stdout_json(output: &Output) -> Value {
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).unwrap()
}

#[test]
fn check_config_prints_effective_config() {
    let dir = tempfile::tempdir().unwrap();
    let config = write(dir.path(), "tugboat.toml", CONFIG);

    let out = tugboatd(&["check-config", "--config", config.to_str().unwrap()]);
    let json = stdout_json(&out);
    assert_eq!(json["infra"]["backend"], "mock");
    assert_eq!(json["cluster"]["namespace_prefix"], "proj-");
    assert_eq!(json["resilience"]["breaker"]["scope"], "shared");
}

#[test]
fn check_config_rejects_invalid_values() {
    let dir = tempfile::tempdir().unwrap();
    let config = write(
        dir.path(),
        "tugboat.toml",
        "[resilience.retry]\nmax_attempts = 0\n",
    );

    let out = tugboatd(&["check-config", "--config", config.to_str().unwrap()]);
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("max_attempts"));
}

#[test]
fn deploy_against_memory_cluster_succeeds() {
    let dir = tempfile::tempdir().unwrap();
    let config = write(dir.path(), "tugboat.toml", CONFIG);
    let workload = write(dir.path(), "web.toml", WORKLOAD);

    let out = tugboatd(&[
        "deploy",
        "--config",
        config.to_str().unwrap(),
        "--workload",
        workload.to_str().unwrap(),
        "--commit",
        "abcdef0123456789",
    ]);
    let run = stdout_json(&out);
    assert_eq!(run["status"], "success");
    assert_eq!(run["triggered_by"], "manual");
    assert_eq!(run["image_tag"], "registry.tugboat.local/web:abcdef012345");
    assert!(run["error_message"].is_null());
}

#[test]
fn provision_server_through_mock_backend() {
    let dir = tempfile::tempdir().unwrap();
    let config = write(dir.path(), "tugboat.toml", CONFIG);

    let out = tugboatd(&[
        "provision-server",
        "--config",
        config.to_str().unwrap(),
        "--name",
        "edge-7",
        "--dns-zone",
        "example.net",
    ]);
    let server = stdout_json(&out);
    assert_eq!(server["name"], "edge-7");
    assert_eq!(server["fqdn"], "edge-7.example.net");
    assert!(server["public_ip"].as_str().is_some_and(|ip| !ip.is_empty()));
}
