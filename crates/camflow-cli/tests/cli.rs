// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! End-to-end tests of the camflow binary.
//!
//! Each test spawns the real executable and asserts on its output and exit
//! code. Everything runs against the synthetic IPU3 pipeline, so no camera
//! hardware is needed.

use assert_cmd::Command;
use predicates::prelude::*;
use serial_test::serial;

/// The camflow binary under test.
fn camflow_cmd() -> Command {
    Command::cargo_bin("camflow").expect("camflow binary should build")
}

// -----------------------------------------------------------------------------
// Argument surface: help, version, rejection of unknown commands
// -----------------------------------------------------------------------------

#[test]
fn test_cli_help() {
    camflow_cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("CamFlow CLI"))
        .stdout(predicate::str::contains("devices"))
        .stdout(predicate::str::contains("capture"));
}

#[test]
fn test_cli_version() {
    camflow_cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("camflow"));
}

#[test]
fn test_devices_help() {
    camflow_cmd()
        .arg("devices")
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("List media devices"))
        .stdout(predicate::str::contains("--sim"))
        .stdout(predicate::str::contains("--verbose"));
}

#[test]
fn test_capture_help() {
    camflow_cmd()
        .arg("capture")
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Capture frames"))
        .stdout(predicate::str::contains("--frames"))
        .stdout(predicate::str::contains("--resolution"));
}

#[test]
fn test_unknown_subcommand_fails() {
    camflow_cmd().arg("transcode").assert().failure();
}

// -----------------------------------------------------------------------------
// Command behavior against the synthetic IPU3 pipeline
// -----------------------------------------------------------------------------

#[test]
#[serial]
fn test_devices_sim_lists_topology() {
    camflow_cmd()
        .args(["devices", "--sim", "--verbose"])
        .assert()
        .success()
        .stdout(predicate::str::contains("ipu3-cio2"))
        .stdout(predicate::str::contains("ipu3-imgu"))
        .stdout(predicate::str::contains("imx219"))
        .stdout(predicate::str::contains("camera sensor"));
}

#[test]
#[serial]
fn test_devices_sim_json() {
    let output = camflow_cmd()
        .args(["devices", "--sim", "--json"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let parsed: serde_json::Value =
        serde_json::from_slice(&output).expect("JSON output should parse");
    let devices = parsed["devices"].as_array().expect("devices array");
    assert_eq!(devices.len(), 2);
    assert_eq!(devices[0]["driver"], "ipu3-cio2");
    assert_eq!(devices[1]["driver"], "ipu3-imgu");
}

#[test]
#[serial]
fn test_capture_sim_runs() {
    camflow_cmd()
        .args(["capture", "--sim", "-n", "4"])
        .assert()
        .success()
        .stdout(predicate::str::contains("captured 4 frames"));
}

#[test]
#[serial]
fn test_capture_sim_json() {
    let output = camflow_cmd()
        .args(["capture", "--sim", "-n", "2", "--json", "--quiet"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let parsed: serde_json::Value =
        serde_json::from_slice(&output).expect("JSON output should parse");
    assert_eq!(parsed["camera"], "imx219 0");
    assert!(parsed["frames"].as_u64().unwrap() >= 2);
    assert_eq!(parsed["pixel_format"], "ip3G");
}

#[test]
#[serial]
fn test_capture_bad_resolution_is_invalid_args() {
    camflow_cmd()
        .args(["capture", "--sim", "--resolution", "wide"])
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("Invalid arguments"));
}

#[test]
#[serial]
fn test_capture_unknown_camera_not_found() {
    camflow_cmd()
        .args(["capture", "--sim", "--camera", "imx999 7"])
        .assert()
        .failure()
        .code(3)
        .stderr(predicate::str::contains("Camera not found"));
}
