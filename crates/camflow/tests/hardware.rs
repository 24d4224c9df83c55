// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Hardware integration tests.
//!
//! These require real Media Controller and V4L2 devices and are skipped by
//! default. Run them on hardware with:
//!
//!   cargo test --test hardware -- --ignored --nocapture

use camflow::camera::CameraManager;
use camflow::media::DeviceEnumerator;

#[test]
#[ignore = "requires /dev/media* devices (run with --ignored on hardware)"]
fn test_system_enumeration() {
    let _ = env_logger::builder().is_test(true).try_init();

    let enumerator = DeviceEnumerator::system().expect("enumeration should succeed");
    println!("Found {} media devices", enumerator.devices().len());

    for device in enumerator.devices() {
        println!("  {}: {} ({})", device.dev_node().display(), device.model(), device.driver());
        device.with_topology(|topo| {
            for entity in topo.entities() {
                println!("    {} ({} pads)", entity.name, entity.pads.len());
            }
        });
        assert!(!device.driver().is_empty());
    }
}

#[test]
#[ignore = "requires IPU3 hardware (run with --ignored on an IPU3 platform)"]
fn test_ipu3_cameras_register() {
    let _ = env_logger::builder().is_test(true).try_init();

    let mut manager = CameraManager::new();
    manager.start().expect("manager should start");

    println!("Registered {} cameras", manager.cameras().len());
    for camera in manager.cameras() {
        println!("  {}", camera.name());
    }

    assert!(
        !manager.cameras().is_empty(),
        "an IPU3 platform with a connected sensor should register a camera"
    );
}
