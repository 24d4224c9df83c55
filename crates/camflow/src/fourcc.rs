// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Portable handling of kernel fourcc pixel-format codes.

#![forbid(unsafe_code)]

use core::fmt;

/// A four-character pixel format code as used by the V4L2 API.
///
/// The kernel encodes fourcc codes as little-endian `u32` values
/// (`v4l2_fourcc()` in `videodev2.h`); the conversions here follow that
/// encoding regardless of host endianness.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct FourCC(pub [u8; 4]);

impl FourCC {
    /// YUV 4:2:0 semi-planar, two planes.
    pub const NV12: FourCC = FourCC(*b"NV12");

    /// IPU3 packed 10-bit Bayer, BGGR order.
    pub const IPU3_SBGGR10: FourCC = FourCC(*b"ip3b");

    /// IPU3 packed 10-bit Bayer, GBRG order.
    pub const IPU3_SGBRG10: FourCC = FourCC(*b"ip3g");

    /// IPU3 packed 10-bit Bayer, GRBG order.
    pub const IPU3_SGRBG10: FourCC = FourCC(*b"ip3G");

    /// IPU3 packed 10-bit Bayer, RGGB order.
    pub const IPU3_SRGGB10: FourCC = FourCC(*b"ip3r");

    /// Return the kernel `u32` encoding of this fourcc.
    pub const fn as_u32(self) -> u32 {
        u32::from_le_bytes(self.0)
    }
}

impl From<u32> for FourCC {
    fn from(val: u32) -> FourCC {
        FourCC(val.to_le_bytes())
    }
}

impl From<FourCC> for u32 {
    fn from(val: FourCC) -> u32 {
        val.as_u32()
    }
}

impl From<&[u8; 4]> for FourCC {
    fn from(buf: &[u8; 4]) -> FourCC {
        FourCC(*buf)
    }
}

impl fmt::Display for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match core::str::from_utf8(&self.0) {
            Ok(s) => f.write_str(s),
            Err(_) => {
                // Non-ASCII codes are printed escaped rather than failing the
                // formatter, which would make format!() panic.
                let b = &self.0;
                f.write_fmt(format_args!(
                    "{}{}{}{}",
                    core::ascii::escape_default(b[0]),
                    core::ascii::escape_default(b[1]),
                    core::ascii::escape_default(b[2]),
                    core::ascii::escape_default(b[3])
                ))
            }
        }
    }
}

impl fmt::Debug for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("FourCC").field(&format_args!("{}", self)).finish()
    }
}
