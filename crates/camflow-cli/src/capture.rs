// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Frame capture smoke runs.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::CliError;
use camflow::camera::CameraManager;
use camflow::geometry::Size;
use camflow::request::RequestStatus;
use camflow::sim::{ipu3_enumerator, SimSensor};
use camflow::stream::StreamRole;
use clap::Args as ClapArgs;
use serde::Serialize;

#[derive(ClapArgs, Debug)]
pub struct Args {
    /// Capture from the synthetic IPU3 pipeline instead of real hardware
    #[arg(long)]
    sim: bool,

    /// Number of frames to capture
    #[arg(short = 'n', long, default_value_t = 8)]
    frames: usize,

    /// Capture resolution as WIDTHxHEIGHT
    #[arg(short, long, default_value = "1280x720")]
    resolution: String,

    /// Camera name (defaults to the first registered camera)
    #[arg(short, long)]
    camera: Option<String>,

    /// Give up if the capture takes longer than this many seconds
    #[arg(long, default_value_t = 10)]
    timeout: u64,
}

#[derive(Debug, Serialize)]
struct CaptureSummary {
    camera: String,
    width: u32,
    height: u32,
    pixel_format: String,
    frames: usize,
    elapsed_ms: u128,
    fps: f64,
}

pub fn execute(args: Args, json: bool) -> Result<(), CliError> {
    log::debug!("Executing capture command: {:?}", args);

    let size = parse_resolution(&args.resolution)?;

    let mut manager = CameraManager::new();
    if args.sim {
        let (enumerator, _hub) =
            ipu3_enumerator(&[SimSensor::bayer("imx219", Size::new(3280, 2464))]);
        manager.start_with(enumerator)?;
    } else {
        manager.start()?;
    }

    let camera = match &args.camera {
        Some(name) => manager
            .get(name)
            .ok_or_else(|| CliError::CameraNotFound(name.clone()))?,
        None => manager
            .cameras()
            .first()
            .cloned()
            .ok_or_else(|| CliError::CameraNotFound("no cameras registered".to_string()))?,
    };

    camera.acquire()?;

    let mut config = camera.generate_configuration(&[StreamRole::VideoRecording])?;
    config.streams[0].width = size.width;
    config.streams[0].height = size.height;
    camera.configure(&config)?;
    camera.allocate_buffers()?;

    let cfg = config.streams[0];
    log::info!("capturing {} frames at {} from '{}'", args.frames, cfg, camera.name());

    let completed = Arc::new(AtomicUsize::new(0));
    let counter = completed.clone();
    let recycler = camera.clone();
    camera.request_completed().connect(move |request| {
        if request.status() != RequestStatus::Complete {
            return;
        }
        counter.fetch_add(1, Ordering::SeqCst);

        // Keep the pipeline saturated by recycling the completed buffer.
        let index = request.buffer(0).map(|buffer| buffer.index()).unwrap_or(0);
        if let Ok(mut next) = recycler.create_request() {
            if let Ok(buffer) = recycler.create_buffer(index) {
                let _ = next.add_buffer(0, buffer);
                let _ = recycler.queue_request(next);
            }
        }
    });

    camera.start()?;
    for index in 0..cfg.buffer_count {
        let mut request = camera.create_request()?;
        request.add_buffer(0, camera.create_buffer(index)?)?;
        camera.queue_request(request)?;
    }

    let started = Instant::now();
    let deadline = started + Duration::from_secs(args.timeout);
    while completed.load(Ordering::SeqCst) < args.frames {
        if Instant::now() > deadline {
            let _ = camera.stop();
            return Err(CliError::Timeout(format!(
                "captured {} of {} frames",
                completed.load(Ordering::SeqCst),
                args.frames
            )));
        }
        manager.process_events(Some(Duration::from_millis(100)))?;
    }
    let elapsed = started.elapsed();

    camera.stop()?;
    camera.free_buffers()?;
    camera.release()?;

    let frames = completed.load(Ordering::SeqCst);
    let summary = CaptureSummary {
        camera: camera.name().to_string(),
        width: cfg.width,
        height: cfg.height,
        pixel_format: cfg.pixel_format.to_string(),
        frames,
        elapsed_ms: elapsed.as_millis(),
        fps: frames as f64 / elapsed.as_secs_f64().max(f64::EPSILON),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&summary).unwrap());
    } else {
        println!(
            "captured {} frames at {}x{}-{} in {} ms",
            summary.frames, summary.width, summary.height, summary.pixel_format,
            summary.elapsed_ms
        );
    }

    Ok(())
}

fn parse_resolution(value: &str) -> Result<Size, CliError> {
    let (width, height) = value
        .split_once('x')
        .ok_or_else(|| CliError::InvalidArgs(format!("resolution '{}' is not WIDTHxHEIGHT", value)))?;
    let width = width
        .parse()
        .map_err(|_| CliError::InvalidArgs(format!("invalid width '{}'", width)))?;
    let height = height
        .parse()
        .map_err(|_| CliError::InvalidArgs(format!("invalid height '{}'", height)))?;
    Ok(Size::new(width, height))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_resolution() {
        assert_eq!(parse_resolution("1280x720").unwrap(), Size::new(1280, 720));
        assert_eq!(parse_resolution("640x480").unwrap(), Size::new(640, 480));
        assert!(parse_resolution("1280").is_err());
        assert!(parse_resolution("axb").is_err());
    }
}
