//! Integration test: run the `yolo` binary.
//!
//! Only flows that fail before any registry traffic are exercised here, so
//! the tests need neither network access nor credentials.

use std::process::{Command, Output};

fn yolo(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_yolo"))
        .args(args)
        .env_remove("REPLICATE_API_TOKEN")
        .env_remove("COG_TOKEN")
        .env_remove("RUST_LOG")
        .output()
        .expect("failed to run yolo binary")
}

#[test]
fn test_help_lists_commands() {
    let output = yolo(&["--help"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    for command in ["push", "clone", "deps", "fetch", "stream-layered-image"] {
        assert!(stdout.contains(command), "missing {command} in:\n{stdout}");
    }
}

#[test]
fn test_push_requires_base_and_dest() {
    let output = yolo(&["push", "predict.py"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("--base"), "{stderr}");
}

#[test]
fn test_fetch_refuses_existing_destination() {
    let tmp = tempfile::TempDir::new().unwrap();
    let dest = tmp.path().to_str().unwrap();

    let output = yolo(&["fetch", "-b", "owner/model", dest]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("already exists"), "{stderr}");
}

#[test]
fn test_stream_layered_image_missing_spec() {
    let tmp = tempfile::TempDir::new().unwrap();
    let spec = tmp.path().join("missing.json");

    let output = yolo(&["stream-layered-image", spec.to_str().unwrap()]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Invalid build spec"), "{stderr}");
}
