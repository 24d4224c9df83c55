// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Pad-addressable subdevice handle.

use std::os::fd::{AsRawFd, OwnedFd};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use crate::geometry::{Rectangle, Size, SizeRange};
use crate::media::device::MediaBackend;
use crate::media::{EntityId, MediaDevice};
use crate::sim::SimSubdevice;
use crate::v4l2::{sys, SubdeviceFormat};
use crate::Error;

/// Typed handle over a V4L2 subdevice.
///
/// All operations address a pad by index. Format setters return the
/// driver-adjusted value; a failed setter leaves the kernel-side state
/// unspecified and the caller must reconfigure before streaming.
pub struct Subdevice {
    name: String,
    backend: SubdevBackend,
}

enum SubdevBackend {
    Kernel(KernelSubdev),
    Sim(Arc<SimSubdevice>),
}

impl Subdevice {
    /// Create a handle for the named subdevice entity of `media`.
    pub fn from_entity(media: &MediaDevice, name: &str) -> Result<Subdevice, Error> {
        let entity = media.entity_by_name(name).ok_or(Error::NoDevice)?;
        Subdevice::from_entity_id(media, entity)
    }

    /// Create a handle for a subdevice entity already resolved to an id.
    pub fn from_entity_id(media: &MediaDevice, entity: EntityId) -> Result<Subdevice, Error> {
        let name = media.with_topology(|topo| topo.entity(entity).name.clone());
        let backend = match media.backend() {
            MediaBackend::Sim(hub) => SubdevBackend::Sim(hub.subdevice(&name)),
            MediaBackend::Kernel => {
                let path = media.entity_dev_node(entity).ok_or(Error::NoDevice)?;
                SubdevBackend::Kernel(KernelSubdev::new(path))
            }
        };
        Ok(Subdevice { name, backend })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn open(&self) -> Result<(), Error> {
        match &self.backend {
            SubdevBackend::Sim(_) => Ok(()),
            SubdevBackend::Kernel(subdev) => subdev.open(),
        }
    }

    pub fn close(&self) {
        if let SubdevBackend::Kernel(subdev) = &self.backend {
            subdev.close();
        }
    }

    /// Enumerate `(media-bus code, size ranges)` supported on `pad`, in
    /// driver order.
    pub fn formats(&self, pad: u32) -> Result<Vec<(u32, Vec<SizeRange>)>, Error> {
        match &self.backend {
            SubdevBackend::Sim(subdev) => Ok(subdev.formats(pad)),
            SubdevBackend::Kernel(subdev) => subdev.formats(pad),
        }
    }

    /// Apply a format on `pad`; returns the driver-adjusted format.
    pub fn set_format(&self, pad: u32, format: SubdeviceFormat) -> Result<SubdeviceFormat, Error> {
        let applied = match &self.backend {
            SubdevBackend::Sim(subdev) => subdev.set_format(pad, format),
            SubdevBackend::Kernel(subdev) => subdev.set_format(pad, format)?,
        };
        log::debug!("{}: pad {} format set to {}", self.name, pad, applied);
        Ok(applied)
    }

    pub fn get_format(&self, pad: u32) -> Result<SubdeviceFormat, Error> {
        match &self.backend {
            SubdevBackend::Sim(subdev) => Ok(subdev.get_format(pad)),
            SubdevBackend::Kernel(subdev) => subdev.get_format(pad),
        }
    }

    /// Apply the crop rectangle on `pad`.
    pub fn set_crop(&self, pad: u32, rect: Rectangle) -> Result<Rectangle, Error> {
        self.set_selection(pad, sys::V4L2_SEL_TGT_CROP, rect)
    }

    /// Apply the compose rectangle on `pad`.
    pub fn set_compose(&self, pad: u32, rect: Rectangle) -> Result<Rectangle, Error> {
        self.set_selection(pad, sys::V4L2_SEL_TGT_COMPOSE, rect)
    }

    fn set_selection(&self, pad: u32, target: u32, rect: Rectangle) -> Result<Rectangle, Error> {
        match &self.backend {
            SubdevBackend::Sim(subdev) => Ok(subdev.set_selection(pad, target, rect)),
            SubdevBackend::Kernel(subdev) => subdev.set_selection(pad, target, rect),
        }
    }
}

// -----------------------------------------------------------------------------
// Kernel backend
// -----------------------------------------------------------------------------

struct KernelSubdev {
    path: PathBuf,
    fd: Mutex<Option<OwnedFd>>,
}

impl KernelSubdev {
    fn new(path: PathBuf) -> KernelSubdev {
        KernelSubdev { path, fd: Mutex::new(None) }
    }

    fn open(&self) -> Result<(), Error> {
        let fd = crate::v4l2::open_device_node(&self.path)?;
        *self.fd.lock().unwrap() = Some(fd);
        Ok(())
    }

    fn close(&self) {
        *self.fd.lock().unwrap() = None;
    }

    fn raw_fd(&self) -> Result<i32, Error> {
        self.fd
            .lock()
            .unwrap()
            .as_ref()
            .map(|fd| fd.as_raw_fd())
            .ok_or_else(|| Error::InvalidState("subdevice not open".into()))
    }

    fn formats(&self, pad: u32) -> Result<Vec<(u32, Vec<SizeRange>)>, Error> {
        let fd = self.raw_fd()?;
        let mut formats = Vec::new();

        for code_index in 0u32.. {
            let mut code_enum = sys::V4l2SubdevMbusCodeEnum {
                pad,
                index: code_index,
                which: sys::V4L2_SUBDEV_FORMAT_ACTIVE,
                ..Default::default()
            };
            match unsafe { sys::vidioc_subdev_enum_mbus_code(fd, &mut code_enum) } {
                Ok(_) => {}
                Err(nix::errno::Errno::EINVAL) => break,
                Err(err) => return Err(err.into()),
            }

            let mut ranges = Vec::new();
            for size_index in 0u32.. {
                let mut size_enum = sys::V4l2SubdevFrameSizeEnum {
                    index: size_index,
                    pad,
                    code: code_enum.code,
                    which: sys::V4L2_SUBDEV_FORMAT_ACTIVE,
                    ..Default::default()
                };
                match unsafe { sys::vidioc_subdev_enum_frame_size(fd, &mut size_enum) } {
                    Ok(_) => {}
                    Err(nix::errno::Errno::EINVAL) => break,
                    Err(err) => return Err(err.into()),
                }
                ranges.push(SizeRange::new(
                    Size::new(size_enum.min_width, size_enum.min_height),
                    Size::new(size_enum.max_width, size_enum.max_height),
                ));
            }

            formats.push((code_enum.code, ranges));
        }
        Ok(formats)
    }

    fn set_format(&self, pad: u32, format: SubdeviceFormat) -> Result<SubdeviceFormat, Error> {
        let fd = self.raw_fd()?;
        let mut raw = sys::V4l2SubdevFormat {
            which: sys::V4L2_SUBDEV_FORMAT_ACTIVE,
            pad,
            ..Default::default()
        };
        raw.format.width = format.size.width;
        raw.format.height = format.size.height;
        raw.format.code = format.mbus_code;
        raw.format.field = sys::V4L2_FIELD_NONE;
        unsafe { sys::vidioc_subdev_s_fmt(fd, &mut raw) }?;

        Ok(SubdeviceFormat {
            size: Size::new(raw.format.width, raw.format.height),
            mbus_code: raw.format.code,
        })
    }

    fn get_format(&self, pad: u32) -> Result<SubdeviceFormat, Error> {
        let fd = self.raw_fd()?;
        let mut raw = sys::V4l2SubdevFormat {
            which: sys::V4L2_SUBDEV_FORMAT_ACTIVE,
            pad,
            ..Default::default()
        };
        unsafe { sys::vidioc_subdev_g_fmt(fd, &mut raw) }?;

        Ok(SubdeviceFormat {
            size: Size::new(raw.format.width, raw.format.height),
            mbus_code: raw.format.code,
        })
    }

    fn set_selection(&self, pad: u32, target: u32, rect: Rectangle) -> Result<Rectangle, Error> {
        let fd = self.raw_fd()?;
        let mut raw = sys::V4l2SubdevSelection {
            which: sys::V4L2_SUBDEV_FORMAT_ACTIVE,
            pad,
            target,
            r: sys::V4l2Rect {
                left: rect.x,
                top: rect.y,
                width: rect.width,
                height: rect.height,
            },
            ..Default::default()
        };
        unsafe { sys::vidioc_subdev_s_selection(fd, &mut raw) }?;

        Ok(Rectangle::new(raw.r.left, raw.r.top, raw.r.width, raw.r.height))
    }
}
