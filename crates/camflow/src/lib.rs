// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! CamFlow Camera Framework
//!
//! CamFlow mediates between Linux kernel capture pipelines (Media Controller
//! and V4L2 devices) and camera-consuming applications. It discovers
//! multi-entity media graphs, negotiates per-stage format propagation,
//! orchestrates per-frame request and buffer lifecycles across asynchronous
//! kernel completions, and exposes a stable capture API together with a
//! V4L2-compatibility front-end.
//!
//! # Quick Start
//!
//! ```no_run
//! use camflow::camera::CameraManager;
//! use camflow::stream::StreamRole;
//!
//! let mut manager = CameraManager::new();
//! manager.start()?;
//!
//! let camera = manager.cameras().first().cloned().expect("no camera");
//! camera.acquire()?;
//!
//! let config = camera.generate_configuration(&[StreamRole::VideoRecording])?;
//! camera.configure(&config)?;
//! camera.allocate_buffers()?;
//!
//! let mut request = camera.create_request()?;
//! request.add_buffer(0, camera.create_buffer(0)?)?;
//!
//! camera.start()?;
//! camera.queue_request(request)?;
//! // Drive manager.dispatcher() to receive completions.
//! # Ok::<(), camflow::Error>(())
//! ```
//!
//! # Architecture
//!
//! - [`media`]: media device enumeration and graph matching
//! - [`v4l2`]: typed handles over kernel video nodes and subdevices
//! - [`buffer`]: frame buffer pools and per-frame metadata
//! - [`pipeline`]: pipeline handlers (IPU3-class) and the request engine
//! - [`camera`]: the per-camera state machine and the camera manager
//! - [`compat`]: V4L2 streaming-semantics front-end over one camera
//! - [`sim`]: synthetic IPU3-class backend for tests and demos

use std::{error, fmt, io};

/// Error type for CamFlow operations.
///
/// Errors surface either as these typed variants or numerically through
/// [`Error::errno`], following the kernel's negative-errno convention.
#[derive(Debug)]
pub enum Error {
    /// Required media device absent, or no sensor produces an acceptable format
    NoDevice,

    /// Media device already acquired, or buffer pool still in use
    Busy,

    /// Invalid parameter: misaligned stream size, size beyond the sensor
    /// maximum, zero buffer count, unknown stream
    InvalidArgument(String),

    /// Camera operation attempted in the wrong state
    InvalidState(String),

    /// Queued request lacks a buffer for a required stream
    NoEntry,

    /// I/O error from an underlying ioctl, open or close
    Io(io::Error),
}

impl Error {
    /// Helper for invalid-argument errors with a formatted reason.
    pub(crate) fn invalid(msg: impl Into<String>) -> Error {
        Error::InvalidArgument(msg.into())
    }

    /// The negative errno equivalent of this error.
    pub fn errno(&self) -> i32 {
        match self {
            Error::NoDevice => -libc::ENODEV,
            Error::Busy => -libc::EBUSY,
            Error::InvalidArgument(_) => -libc::EINVAL,
            Error::InvalidState(_) => -libc::EACCES,
            Error::NoEntry => -libc::ENOENT,
            Error::Io(err) => -err.raw_os_error().unwrap_or(libc::EIO),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::NoDevice => write!(f, "no such device"),
            Error::Busy => write!(f, "device or resource busy"),
            Error::InvalidArgument(msg) => write!(f, "invalid argument: {}", msg),
            Error::InvalidState(msg) => write!(f, "invalid state: {}", msg),
            Error::NoEntry => write!(f, "no such entry"),
            Error::Io(err) => write!(f, "I/O error: {}", err),
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<nix::errno::Errno> for Error {
    fn from(err: nix::errno::Errno) -> Self {
        Error::Io(io::Error::from_raw_os_error(err as i32))
    }
}

/// The buffer module provides frame buffer pools and per-frame metadata.
pub mod buffer;

/// The camera module provides the per-camera state machine and the manager.
pub mod camera;

/// The compat module re-exposes one camera with V4L2 streaming semantics.
pub mod compat;

/// The event module provides the event dispatcher and single-shot timers.
pub mod event;

/// The fourcc module provides portable handling of fourcc codes.
pub mod fourcc;

/// The geometry module provides sizes, size ranges and rectangles.
pub mod geometry;

/// The media module provides media device enumeration and graph matching.
pub mod media;

/// The pipeline module provides pipeline handlers and the request engine.
pub mod pipeline;

/// The request module provides the per-frame capture transaction type.
pub mod request;

/// The signal module provides typed publish-subscribe signals.
pub mod signal;

/// The sim module provides a synthetic IPU3-class backend.
pub mod sim;

/// The stream module provides stream configuration types.
pub mod stream;

/// The v4l2 module provides typed handles over kernel capture devices.
pub mod v4l2;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_errno_mapping() {
        assert_eq!(Error::NoDevice.errno(), -libc::ENODEV);
        assert_eq!(Error::Busy.errno(), -libc::EBUSY);
        assert_eq!(Error::invalid("width").errno(), -libc::EINVAL);
        assert_eq!(Error::NoEntry.errno(), -libc::ENOENT);

        let io_err = Error::Io(io::Error::from_raw_os_error(libc::EPIPE));
        assert_eq!(io_err.errno(), -libc::EPIPE);
    }

    #[test]
    fn test_display() {
        let err = Error::invalid("width not a multiple of 8");
        assert_eq!(format!("{}", err), "invalid argument: width not a multiple of 8");
    }
}
