// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Typed handles over kernel capture devices.
//!
//! Two handle variants cover the pipeline's needs:
//!
//! - [`VideoNode`] wraps a V4L2 video device: format negotiation, buffer
//!   export and queueing, stream control, and a `buffer_ready` notification
//!   fired from the completion path.
//! - [`Subdevice`] wraps a pad-addressable V4L2 subdevice: per-pad format,
//!   crop and compose rectangles, and format enumeration.
//!
//! Formats are exchanged by value and every setter is an atomic
//! negotiation: on failure the kernel-side format is unspecified and the
//! caller must reconfigure before streaming.

use std::ffi::CString;
use std::fmt;
use std::io;
use std::os::fd::{FromRawFd, OwnedFd};
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

use crate::fourcc::FourCC;
use crate::geometry::Size;

mod subdevice;
pub mod sys;
mod video_node;

pub use subdevice::Subdevice;
pub use video_node::VideoNode;

/// Media-bus pixel encoding carried on a hardware link
/// (`MEDIA_BUS_FMT_*` from `media-bus-format.h`).
pub const MEDIA_BUS_FMT_FIXED: u32 = 0x0001;
pub const MEDIA_BUS_FMT_SBGGR10_1X10: u32 = 0x3007;
pub const MEDIA_BUS_FMT_SGRBG10_1X10: u32 = 0x300a;
pub const MEDIA_BUS_FMT_SGBRG10_1X10: u32 = 0x300d;
pub const MEDIA_BUS_FMT_SRGGB10_1X10: u32 = 0x300f;

/// Image format of a video device node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceFormat {
    pub size: Size,
    pub fourcc: FourCC,
    pub planes: u32,
}

impl fmt::Display for DeviceFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{} ({} planes)", self.size, self.fourcc, self.planes)
    }
}

/// Image format on one pad of a subdevice.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubdeviceFormat {
    pub size: Size,
    pub mbus_code: u32,
}

impl fmt::Display for SubdeviceFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-0x{:04x}", self.size, self.mbus_code)
    }
}

/// Open a device node read-write, close-on-exec, non-blocking.
pub(crate) fn open_device_node(path: &Path) -> Result<OwnedFd, io::Error> {
    let cpath = CString::new(path.as_os_str().as_bytes())
        .map_err(|_| io::Error::from(io::ErrorKind::InvalidInput))?;
    let fd = unsafe {
        libc::open(cpath.as_ptr(), libc::O_RDWR | libc::O_NONBLOCK | libc::O_CLOEXEC)
    };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_format_display() {
        let fmt = DeviceFormat {
            size: Size::new(1920, 1080),
            fourcc: FourCC::NV12,
            planes: 2,
        };
        assert_eq!(format!("{}", fmt), "1920x1080-NV12 (2 planes)");
    }

    #[test]
    fn test_subdevice_format_display() {
        let fmt = SubdeviceFormat {
            size: Size::new(4224, 3136),
            mbus_code: MEDIA_BUS_FMT_SGRBG10_1X10,
        };
        assert_eq!(format!("{}", fmt), "4224x3136-0x300a");
    }

    #[test]
    fn test_open_missing_node_fails() {
        let err = open_device_node(Path::new("/dev/video-does-not-exist")).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }
}
