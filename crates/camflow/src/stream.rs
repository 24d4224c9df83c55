// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Stream configuration types.

use std::fmt;

use crate::buffer::BufferPool;
use crate::fourcc::FourCC;
use crate::geometry::Size;

/// Intended use of a stream, used to pick sensible configuration defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamRole {
    StillCapture,
    VideoRecording,
    Viewfinder,
}

/// Client-visible parameters of one stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamConfiguration {
    pub width: u32,
    pub height: u32,
    pub pixel_format: FourCC,
    pub buffer_count: u32,
}

impl StreamConfiguration {
    pub fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }
}

impl fmt::Display for StreamConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}x{}-{} ({} buffers)",
            self.width, self.height, self.pixel_format, self.buffer_count
        )
    }
}

/// A logical image-data channel exposed by a camera.
///
/// The stream owns its configuration and, once buffers are allocated, the
/// buffer pool backing it.
pub struct Stream {
    pub(crate) configuration: StreamConfiguration,
    pub(crate) pool: BufferPool,
}

impl Stream {
    pub(crate) fn new(configuration: StreamConfiguration) -> Stream {
        Stream { configuration, pool: BufferPool::new() }
    }

    pub fn configuration(&self) -> &StreamConfiguration {
        &self.configuration
    }

    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_display() {
        let cfg = StreamConfiguration {
            width: 1920,
            height: 1080,
            pixel_format: FourCC::IPU3_SGRBG10,
            buffer_count: 4,
        };
        assert_eq!(format!("{}", cfg), "1920x1080-ip3G (4 buffers)");
    }

    #[test]
    fn test_stream_starts_without_buffers() {
        let stream = Stream::new(StreamConfiguration {
            width: 640,
            height: 480,
            pixel_format: FourCC::NV12,
            buffer_count: 4,
        });
        assert!(stream.pool().is_empty());
        assert_eq!(stream.configuration().size(), Size::new(640, 480));
    }
}
