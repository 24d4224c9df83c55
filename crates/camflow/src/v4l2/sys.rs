// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Kernel ABI structs and ioctls for the V4L2 and Media Controller APIs.
//!
//! Layouts follow `videodev2.h`, `v4l2-subdev.h` and `media.h`. Only the
//! ioctls the framework consumes are declared; the multi-planar buffer API
//! is used exclusively.

pub const VIDEO_MAX_PLANES: usize = 8;

pub const V4L2_BUF_TYPE_VIDEO_CAPTURE_MPLANE: u32 = 9;
pub const V4L2_MEMORY_MMAP: u32 = 1;
pub const V4L2_FIELD_NONE: u32 = 1;
pub const V4L2_BUF_FLAG_ERROR: u32 = 0x0040;

pub const V4L2_CAP_VIDEO_CAPTURE_MPLANE: u32 = 0x0000_1000;
pub const V4L2_CAP_STREAMING: u32 = 0x0400_0000;

pub const V4L2_SUBDEV_FORMAT_ACTIVE: u32 = 1;
pub const V4L2_SEL_TGT_CROP: u32 = 0x0000;
pub const V4L2_SEL_TGT_COMPOSE: u32 = 0x0100;

pub const MEDIA_ENT_ID_FLAG_NEXT: u32 = 1 << 31;
pub const MEDIA_PAD_FL_SINK: u32 = 1;
pub const MEDIA_PAD_FL_SOURCE: u32 = 2;
pub const MEDIA_LNK_FL_ENABLED: u32 = 1;
pub const MEDIA_LNK_FL_IMMUTABLE: u32 = 2;

// -----------------------------------------------------------------------------
// videodev2.h
// -----------------------------------------------------------------------------

#[repr(C)]
#[derive(Clone, Copy)]
pub struct V4l2Capability {
    pub driver: [u8; 16],
    pub card: [u8; 32],
    pub bus_info: [u8; 32],
    pub version: u32,
    pub capabilities: u32,
    pub device_caps: u32,
    pub reserved: [u32; 3],
}

impl Default for V4l2Capability {
    fn default() -> Self {
        unsafe { std::mem::zeroed() }
    }
}

#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct V4l2PlanePixFormat {
    pub sizeimage: u32,
    pub bytesperline: u32,
    pub reserved: [u16; 6],
}

#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct V4l2PixFormatMplane {
    pub width: u32,
    pub height: u32,
    pub pixelformat: u32,
    pub field: u32,
    pub colorspace: u32,
    pub plane_fmt: [V4l2PlanePixFormat; VIDEO_MAX_PLANES],
    pub num_planes: u8,
    pub flags: u8,
    pub ycbcr_enc: u8,
    pub quantization: u8,
    pub xfer_func: u8,
    pub reserved: [u8; 7],
}

/// The kernel union holds pointer-bearing members (`v4l2_window`), so it is
/// 8-byte aligned on 64-bit; `raw` reproduces that alignment and the 200-byte
/// size.
#[repr(C)]
#[derive(Clone, Copy)]
pub union V4l2FormatUnion {
    pub pix_mp: V4l2PixFormatMplane,
    pub raw: [u64; 25],
}

#[repr(C)]
pub struct V4l2Format {
    pub type_: u32,
    pub fmt: V4l2FormatUnion,
}

impl V4l2Format {
    pub fn zeroed(type_: u32) -> V4l2Format {
        let mut fmt: V4l2Format = unsafe { std::mem::zeroed() };
        fmt.type_ = type_;
        fmt
    }
}

#[repr(C)]
#[derive(Clone, Copy, Default)]
pub struct V4l2RequestBuffers {
    pub count: u32,
    pub type_: u32,
    pub memory: u32,
    pub reserved: [u32; 2],
}

#[repr(C)]
#[derive(Clone, Copy)]
pub union V4l2PlaneM {
    pub mem_offset: u32,
    pub userptr: libc::c_ulong,
    pub fd: i32,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct V4l2Plane {
    pub bytesused: u32,
    pub length: u32,
    pub m: V4l2PlaneM,
    pub data_offset: u32,
    pub reserved: [u32; 11],
}

impl Default for V4l2Plane {
    fn default() -> Self {
        unsafe { std::mem::zeroed() }
    }
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct V4l2Timecode {
    pub type_: u32,
    pub flags: u32,
    pub frames: u8,
    pub seconds: u8,
    pub minutes: u8,
    pub hours: u8,
    pub userbits: [u8; 4],
}

#[repr(C)]
#[derive(Clone, Copy)]
pub union V4l2BufferM {
    pub offset: u32,
    pub userptr: libc::c_ulong,
    pub planes: *mut V4l2Plane,
    pub fd: i32,
}

#[repr(C)]
pub struct V4l2Buffer {
    pub index: u32,
    pub type_: u32,
    pub bytesused: u32,
    pub flags: u32,
    pub field: u32,
    pub timestamp: libc::timeval,
    pub timecode: V4l2Timecode,
    pub sequence: u32,
    pub memory: u32,
    pub m: V4l2BufferM,
    pub length: u32,
    pub reserved2: u32,
    pub request_fd: i32,
}

impl V4l2Buffer {
    pub fn zeroed() -> V4l2Buffer {
        unsafe { std::mem::zeroed() }
    }
}

// -----------------------------------------------------------------------------
// v4l2-subdev.h
// -----------------------------------------------------------------------------

#[repr(C)]
#[derive(Clone, Copy)]
pub struct V4l2MbusFramefmt {
    pub width: u32,
    pub height: u32,
    pub code: u32,
    pub field: u32,
    pub colorspace: u32,
    pub ycbcr_enc: u16,
    pub quantization: u16,
    pub xfer_func: u16,
    pub flags: u16,
    pub reserved: [u16; 10],
}

impl Default for V4l2MbusFramefmt {
    fn default() -> Self {
        unsafe { std::mem::zeroed() }
    }
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct V4l2SubdevFormat {
    pub which: u32,
    pub pad: u32,
    pub format: V4l2MbusFramefmt,
    pub stream: u32,
    pub reserved: [u32; 7],
}

impl Default for V4l2SubdevFormat {
    fn default() -> Self {
        unsafe { std::mem::zeroed() }
    }
}

#[repr(C)]
#[derive(Clone, Copy, Default)]
pub struct V4l2Rect {
    pub left: i32,
    pub top: i32,
    pub width: u32,
    pub height: u32,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct V4l2SubdevSelection {
    pub which: u32,
    pub pad: u32,
    pub target: u32,
    pub flags: u32,
    pub r: V4l2Rect,
    pub stream: u32,
    pub reserved: [u32; 7],
}

impl Default for V4l2SubdevSelection {
    fn default() -> Self {
        unsafe { std::mem::zeroed() }
    }
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct V4l2SubdevMbusCodeEnum {
    pub pad: u32,
    pub index: u32,
    pub code: u32,
    pub which: u32,
    pub flags: u32,
    pub stream: u32,
    pub reserved: [u32; 6],
}

impl Default for V4l2SubdevMbusCodeEnum {
    fn default() -> Self {
        unsafe { std::mem::zeroed() }
    }
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct V4l2SubdevFrameSizeEnum {
    pub index: u32,
    pub pad: u32,
    pub code: u32,
    pub min_width: u32,
    pub max_width: u32,
    pub min_height: u32,
    pub max_height: u32,
    pub which: u32,
    pub stream: u32,
    pub reserved: [u32; 7],
}

impl Default for V4l2SubdevFrameSizeEnum {
    fn default() -> Self {
        unsafe { std::mem::zeroed() }
    }
}

// -----------------------------------------------------------------------------
// media.h
// -----------------------------------------------------------------------------

#[repr(C)]
pub struct MediaDeviceInfo {
    pub driver: [u8; 16],
    pub model: [u8; 32],
    pub serial: [u8; 40],
    pub bus_info: [u8; 32],
    pub media_version: u32,
    pub hw_revision: u32,
    pub driver_version: u32,
    pub reserved: [u32; 31],
}

impl Default for MediaDeviceInfo {
    fn default() -> Self {
        unsafe { std::mem::zeroed() }
    }
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct MediaEntityDescDev {
    pub major: u32,
    pub minor: u32,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub union MediaEntityDescU {
    pub dev: MediaEntityDescDev,
    pub raw: [u8; 184],
}

#[repr(C)]
pub struct MediaEntityDesc {
    pub id: u32,
    pub name: [u8; 32],
    pub type_: u32,
    pub revision: u32,
    pub flags: u32,
    pub group_id: u32,
    pub pads: u16,
    pub links: u16,
    pub reserved: [u32; 4],
    pub u: MediaEntityDescU,
}

impl MediaEntityDesc {
    pub fn zeroed() -> MediaEntityDesc {
        unsafe { std::mem::zeroed() }
    }
}

#[repr(C)]
#[derive(Clone, Copy, Default)]
pub struct MediaPadDesc {
    pub entity: u32,
    pub index: u16,
    pub flags: u32,
    pub reserved: [u32; 2],
}

#[repr(C)]
#[derive(Clone, Copy, Default)]
pub struct MediaLinkDesc {
    pub source: MediaPadDesc,
    pub sink: MediaPadDesc,
    pub flags: u32,
    pub reserved: [u32; 2],
}

#[repr(C)]
pub struct MediaLinksEnum {
    pub entity: u32,
    pub pads: *mut MediaPadDesc,
    pub links: *mut MediaLinkDesc,
    pub reserved: [u32; 4],
}

// -----------------------------------------------------------------------------
// ioctl definitions
// -----------------------------------------------------------------------------

nix::ioctl_readwrite!(media_ioc_device_info, b'|', 0x00, MediaDeviceInfo);
nix::ioctl_readwrite!(media_ioc_enum_entities, b'|', 0x01, MediaEntityDesc);
nix::ioctl_readwrite!(media_ioc_enum_links, b'|', 0x02, MediaLinksEnum);
nix::ioctl_readwrite!(media_ioc_setup_link, b'|', 0x03, MediaLinkDesc);

nix::ioctl_read!(vidioc_querycap, b'V', 0, V4l2Capability);
nix::ioctl_readwrite!(vidioc_g_fmt, b'V', 4, V4l2Format);
nix::ioctl_readwrite!(vidioc_s_fmt, b'V', 5, V4l2Format);
nix::ioctl_readwrite!(vidioc_reqbufs, b'V', 8, V4l2RequestBuffers);
nix::ioctl_readwrite!(vidioc_querybuf, b'V', 9, V4l2Buffer);
nix::ioctl_readwrite!(vidioc_qbuf, b'V', 15, V4l2Buffer);
nix::ioctl_readwrite!(vidioc_dqbuf, b'V', 17, V4l2Buffer);
nix::ioctl_write_ptr!(vidioc_streamon, b'V', 18, libc::c_int);
nix::ioctl_write_ptr!(vidioc_streamoff, b'V', 19, libc::c_int);

nix::ioctl_readwrite!(vidioc_subdev_enum_mbus_code, b'V', 2, V4l2SubdevMbusCodeEnum);
nix::ioctl_readwrite!(vidioc_subdev_g_fmt, b'V', 4, V4l2SubdevFormat);
nix::ioctl_readwrite!(vidioc_subdev_s_fmt, b'V', 5, V4l2SubdevFormat);
nix::ioctl_readwrite!(vidioc_subdev_g_selection, b'V', 61, V4l2SubdevSelection);
nix::ioctl_readwrite!(vidioc_subdev_s_selection, b'V', 62, V4l2SubdevSelection);
nix::ioctl_readwrite!(vidioc_subdev_enum_frame_size, b'V', 74, V4l2SubdevFrameSizeEnum);

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::size_of;

    // Struct sizes pin the ABI; the ioctl numbers are derived from them.

    #[test]
    fn test_videodev2_layout() {
        assert_eq!(size_of::<V4l2Capability>(), 104);
        assert_eq!(size_of::<V4l2PixFormatMplane>(), 160);
        assert_eq!(size_of::<V4l2RequestBuffers>(), 20);
        assert_eq!(size_of::<V4l2Timecode>(), 16);
        assert_eq!(size_of::<V4l2MbusFramefmt>(), 48);
        assert_eq!(size_of::<V4l2SubdevFormat>(), 88);
        assert_eq!(size_of::<V4l2SubdevSelection>(), 64);
        assert_eq!(size_of::<V4l2SubdevMbusCodeEnum>(), 48);
        assert_eq!(size_of::<V4l2SubdevFrameSizeEnum>(), 64);
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn test_videodev2_layout_lp64() {
        assert_eq!(size_of::<V4l2Format>(), 208);
        assert_eq!(size_of::<V4l2Plane>(), 64);
        assert_eq!(size_of::<V4l2Buffer>(), 88);
        assert_eq!(size_of::<MediaLinksEnum>(), 40);
    }

    #[test]
    fn test_media_layout() {
        assert_eq!(size_of::<MediaDeviceInfo>(), 256);
        assert_eq!(size_of::<MediaEntityDesc>(), 256);
        assert_eq!(size_of::<MediaPadDesc>(), 20);
        assert_eq!(size_of::<MediaLinkDesc>(), 52);
    }
}
