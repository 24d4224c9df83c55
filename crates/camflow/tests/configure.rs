// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Configuration boundary behavior and determinism tests.

use camflow::camera::{CameraConfiguration, CameraManager, CameraState};
use camflow::fourcc::FourCC;
use camflow::geometry::Size;
use camflow::pipeline::ipu3::{fourcc_to_mbus, mbus_to_fourcc};
use camflow::sim::{ipu3_enumerator, SimHub, SimSensor};
use camflow::stream::{StreamConfiguration, StreamRole};
use camflow::Error;
use std::sync::Arc;

fn sensor() -> SimSensor {
    SimSensor::bayer("ov5670", Size::new(2592, 1944))
}

fn start_manager() -> (CameraManager, Arc<SimHub>) {
    let _ = env_logger::builder().is_test(true).try_init();

    let (enumerator, hub) = ipu3_enumerator(&[sensor()]);
    let mut manager = CameraManager::new();
    manager.start_with(enumerator).unwrap();
    (manager, hub)
}

fn stream_config(width: u32, height: u32, buffer_count: u32) -> CameraConfiguration {
    CameraConfiguration {
        streams: vec![StreamConfiguration {
            width,
            height,
            pixel_format: FourCC::IPU3_SGRBG10,
            buffer_count,
        }],
    }
}

#[test]
fn test_misaligned_size_is_invalid_argument() {
    let (manager, _hub) = start_manager();
    let camera = manager.cameras()[0].clone();
    camera.acquire().unwrap();

    // Width must be a multiple of 8 and height a multiple of 4.
    let result = camera.configure(&stream_config(10, 4, 4));
    assert!(matches!(result, Err(Error::InvalidArgument(_))));
    assert_eq!(camera.state(), CameraState::Acquired);

    let result = camera.configure(&stream_config(1280, 722, 4));
    assert!(matches!(result, Err(Error::InvalidArgument(_))));
}

#[test]
fn test_oversize_is_invalid_argument() {
    let (manager, _hub) = start_manager();
    let camera = manager.cameras()[0].clone();
    camera.acquire().unwrap();

    let result = camera.configure(&stream_config(2592 + 8, 1944, 4));
    assert!(matches!(result, Err(Error::InvalidArgument(_))));
}

#[test]
fn test_zero_buffer_count_fails_allocation() {
    let (manager, _hub) = start_manager();
    let camera = manager.cameras()[0].clone();
    camera.acquire().unwrap();

    camera.configure(&stream_config(1280, 720, 0)).unwrap();
    assert!(matches!(camera.allocate_buffers(), Err(Error::InvalidArgument(_))));
}

#[test]
fn test_configure_is_idempotent() {
    let (manager, hub) = start_manager();
    let camera = manager.cameras()[0].clone();
    camera.acquire().unwrap();

    camera.configure(&stream_config(1280, 720, 4)).unwrap();
    let sensor_first = hub.sensor_format("ov5670");
    let cio2_first = hub.video_node_format("ipu3-cio2 0").unwrap();

    camera.configure(&stream_config(1280, 720, 4)).unwrap();
    let sensor_second = hub.sensor_format("ov5670");
    let cio2_second = hub.video_node_format("ipu3-cio2 0").unwrap();

    assert_eq!(sensor_first, sensor_second);
    assert_eq!(cio2_first, cio2_second);

    // The adjusted value is stable across successive reads.
    assert_eq!(hub.sensor_format("ov5670"), sensor_second);
}

#[test]
fn test_configure_propagates_to_all_stages() {
    let (manager, hub) = start_manager();
    let camera = manager.cameras()[0].clone();
    camera.acquire().unwrap();
    camera.configure(&stream_config(1280, 720, 4)).unwrap();

    // Sensor and CSI-2 carry the selected media-bus format; the CIO2 node
    // carries its fourcc; the ImgU outputs are NV12 at the stream size.
    let sensor_format = hub.sensor_format("ov5670");
    assert_eq!(sensor_format.size, Size::new(1280, 720));
    assert_eq!(hub.sensor_format("ipu3-csi2 0"), sensor_format);

    let cio2 = hub.video_node_format("ipu3-cio2 0").unwrap();
    assert_eq!(cio2.fourcc, mbus_to_fourcc(sensor_format.mbus_code).unwrap());
    assert_eq!(cio2.planes, 1);

    let output = hub.video_node_format("ipu3-imgu 0 output").unwrap();
    assert_eq!(output.size, Size::new(1280, 720));
    assert_eq!(output.fourcc, FourCC::NV12);
    assert_eq!(output.planes, 2);

    let viewfinder = hub.video_node_format("ipu3-imgu 0 viewfinder").unwrap();
    assert_eq!(viewfinder.fourcc, FourCC::NV12);

    // The stat output takes no video-node format.
    assert!(hub.video_node_format("ipu3-imgu 0 3a stat").is_none());
}

#[test]
fn test_cio2_never_upscales() {
    let (manager, hub) = start_manager();
    let camera = manager.cameras()[0].clone();
    camera.acquire().unwrap();

    // 1300x730 is aligned but not in the sensor ladder; the next size up
    // (1920x1080) must be selected, never a smaller one.
    camera.configure(&stream_config(1304, 732, 4)).unwrap();
    assert_eq!(hub.sensor_format("ov5670").size, Size::new(1920, 1080));
}

#[test]
fn test_fourcc_mbus_roundtrip_laws() {
    for fourcc in [
        FourCC::IPU3_SBGGR10,
        FourCC::IPU3_SGBRG10,
        FourCC::IPU3_SGRBG10,
        FourCC::IPU3_SRGGB10,
    ] {
        let code = fourcc_to_mbus(fourcc).unwrap();
        assert_eq!(mbus_to_fourcc(code), Some(fourcc));
    }
}

#[test]
fn test_match_is_deterministic_across_managers() {
    let _ = env_logger::builder().is_test(true).try_init();

    let (enumerator, _hub) = ipu3_enumerator(&[sensor()]);
    let mut first = CameraManager::new();
    first.start_with(enumerator).unwrap();
    let first_names: Vec<String> =
        first.cameras().iter().map(|cam| cam.name().to_owned()).collect();

    // Stopping the manager drops its handlers and releases the media
    // devices, so a fresh manager over the same topology re-matches.
    first.stop();

    let (enumerator, _hub) = ipu3_enumerator(&[sensor()]);
    let mut second = CameraManager::new();
    second.start_with(enumerator).unwrap();
    let second_names: Vec<String> =
        second.cameras().iter().map(|cam| cam.name().to_owned()).collect();

    assert_eq!(first_names, vec!["ov5670 0".to_owned()]);
    assert_eq!(first_names, second_names);
}
