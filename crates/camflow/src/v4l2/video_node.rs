// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Video device node handle.

use std::os::fd::{AsRawFd, OwnedFd};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use crate::buffer::{Buffer, BufferMemory, BufferPlane, BufferPool, BufferStatus, PoolTracker};
use crate::event::{EventDispatcher, NotifierId};
use crate::fourcc::FourCC;
use crate::geometry::Size;
use crate::media::device::MediaBackend;
use crate::media::MediaDevice;
use crate::signal::Signal;
use crate::sim::SimVideoNode;
use crate::v4l2::{sys, DeviceFormat};
use crate::Error;

/// One dequeued frame, normalized across backends.
struct Completion {
    index: u32,
    bytes_used: u32,
    timestamp: u64,
    sequence: u32,
    error: bool,
}

/// Typed handle over a V4L2 video capture node.
///
/// The handle is cheaply cloneable; clones share the underlying device and
/// the [`buffer_ready`](VideoNode::buffer_ready) signal. Completion
/// delivery is wired through the event dispatcher while streaming: the node
/// registers a readiness notifier on stream-on and drains completed buffers
/// when the dispatcher reports the device readable.
#[derive(Clone)]
pub struct VideoNode {
    inner: Arc<NodeInner>,
}

struct NodeInner {
    name: String,
    dispatcher: Arc<EventDispatcher>,
    backend: NodeBackend,
    shared: Mutex<NodeShared>,
    buffer_ready: Signal<Buffer>,
}

#[derive(Default)]
struct NodeShared {
    tracker: Option<Arc<PoolTracker>>,
    slots: Vec<Arc<BufferMemory>>,
    notifier: Option<NotifierId>,
}

enum NodeBackend {
    Kernel(KernelNode),
    Sim(Arc<SimVideoNode>),
}

impl VideoNode {
    /// Create a handle for the named video-node entity of `media`.
    ///
    /// The device is not opened; call [`open`](VideoNode::open) first.
    pub fn from_entity(
        media: &MediaDevice,
        name: &str,
        dispatcher: &Arc<EventDispatcher>,
    ) -> Result<VideoNode, Error> {
        let backend = match media.backend() {
            MediaBackend::Sim(hub) => NodeBackend::Sim(hub.video_node(name)?),
            MediaBackend::Kernel => {
                let entity = media.entity_by_name(name).ok_or(Error::NoDevice)?;
                let path = media.entity_dev_node(entity).ok_or(Error::NoDevice)?;
                NodeBackend::Kernel(KernelNode::new(path))
            }
        };

        Ok(VideoNode {
            inner: Arc::new(NodeInner {
                name: name.to_owned(),
                dispatcher: dispatcher.clone(),
                backend,
                shared: Mutex::new(NodeShared::default()),
                buffer_ready: Signal::new(),
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn open(&self) -> Result<(), Error> {
        match &self.inner.backend {
            NodeBackend::Sim(_) => Ok(()),
            NodeBackend::Kernel(node) => node.open(),
        }
    }

    pub fn close(&self) {
        if let NodeBackend::Kernel(node) = &self.inner.backend {
            node.close();
        }
    }

    /// Negotiate the node format; returns the driver-adjusted result.
    pub fn set_format(&self, format: DeviceFormat) -> Result<DeviceFormat, Error> {
        let applied = match &self.inner.backend {
            NodeBackend::Sim(node) => node.set_format(format),
            NodeBackend::Kernel(node) => node.set_format(format)?,
        };
        log::debug!("{}: format set to {}", self.inner.name, applied);
        Ok(applied)
    }

    pub fn get_format(&self) -> Result<DeviceFormat, Error> {
        match &self.inner.backend {
            NodeBackend::Sim(node) => node
                .get_format()
                .ok_or_else(|| Error::InvalidState("no format negotiated".into())),
            NodeBackend::Kernel(node) => node.get_format(),
        }
    }

    /// Export `count` driver buffers into `pool`.
    pub fn export_buffers(&self, pool: &mut BufferPool, count: u32) -> Result<(), Error> {
        let mems = match &self.inner.backend {
            NodeBackend::Sim(node) => node.export_buffers(count)?,
            NodeBackend::Kernel(node) => node.export_buffers(count)?,
        };
        let slots: Vec<Arc<BufferMemory>> = mems.into_iter().map(Arc::new).collect();

        let mut shared = self.inner.shared.lock().unwrap();
        shared.slots = slots.clone();
        shared.tracker = Some(pool.tracker());
        drop(shared);

        pool.install(slots);
        log::debug!("{}: exported {} buffers", self.inner.name, count);
        Ok(())
    }

    /// Release the driver buffers backing `pool`.
    ///
    /// Fails with [`Error::Busy`] while any buffer is queued in the kernel.
    pub fn release_buffers(&self, pool: &mut BufferPool) -> Result<(), Error> {
        pool.release()?;
        match &self.inner.backend {
            NodeBackend::Sim(node) => node.release_buffers()?,
            NodeBackend::Kernel(node) => node.release_buffers()?,
        }
        let mut shared = self.inner.shared.lock().unwrap();
        shared.slots.clear();
        shared.tracker = None;
        Ok(())
    }

    /// Queue a buffer to the kernel for capture.
    pub fn queue_buffer(&self, buffer: &Buffer) -> Result<(), Error> {
        match &self.inner.backend {
            NodeBackend::Sim(node) => node.queue(buffer.index())?,
            NodeBackend::Kernel(node) => node.queue(buffer.index())?,
        }
        if let Some(tracker) = self.inner.shared.lock().unwrap().tracker.as_ref() {
            tracker.mark_queued();
        }
        Ok(())
    }

    pub fn stream_on(&self) -> Result<(), Error> {
        match &self.inner.backend {
            NodeBackend::Sim(node) => node.stream_on()?,
            NodeBackend::Kernel(node) => node.stream_on()?,
        }

        let fd = match &self.inner.backend {
            NodeBackend::Sim(node) => node.event_fd(),
            NodeBackend::Kernel(node) => node.poll_fd()?,
        };

        let weak = Arc::downgrade(&self.inner);
        let notifier = self.inner.dispatcher.register_notifier(fd, move || {
            if let Some(inner) = weak.upgrade() {
                NodeInner::drain(&inner);
            }
        });
        self.inner.shared.lock().unwrap().notifier = Some(notifier);

        log::debug!("{}: stream on", self.inner.name);
        Ok(())
    }

    /// Stop streaming. All kernel-queued buffers are returned to the pool
    /// without completion events.
    pub fn stream_off(&self) -> Result<(), Error> {
        if let Some(notifier) = self.inner.shared.lock().unwrap().notifier.take() {
            self.inner.dispatcher.unregister_notifier(notifier);
        }

        match &self.inner.backend {
            NodeBackend::Sim(node) => node.stream_off()?,
            NodeBackend::Kernel(node) => node.stream_off()?,
        }

        if let Some(tracker) = self.inner.shared.lock().unwrap().tracker.as_ref() {
            tracker.reset();
        }
        log::debug!("{}: stream off", self.inner.name);
        Ok(())
    }

    /// Signal fired once per completed frame, from the dispatcher context.
    pub fn buffer_ready(&self) -> &Signal<Buffer> {
        &self.inner.buffer_ready
    }
}

impl NodeInner {
    fn drain(inner: &Arc<NodeInner>) {
        // Bound the drain to the completions present on entry: a slot may
        // requeue from within buffer_ready, and with an instantly-completing
        // backend an unbounded loop would never leave this callback.
        let limit = match &inner.backend {
            NodeBackend::Sim(node) => node.consume_ready(),
            NodeBackend::Kernel(_) => usize::MAX,
        };

        for _ in 0..limit {
            let completion = match &inner.backend {
                NodeBackend::Sim(node) => node.dequeue().map(|c| Completion {
                    index: c.index,
                    bytes_used: c.bytes_used,
                    timestamp: c.timestamp,
                    sequence: c.sequence,
                    error: c.error,
                }),
                NodeBackend::Kernel(node) => match node.dequeue() {
                    Ok(completion) => completion,
                    Err(err) => {
                        log::error!("{}: dequeue failed: {}", inner.name, err);
                        None
                    }
                },
            };
            let Some(completion) = completion else { break };

            let buffer = {
                let shared = inner.shared.lock().unwrap();
                let Some(mem) = shared.slots.get(completion.index as usize) else {
                    log::error!(
                        "{}: completion for unknown buffer {}",
                        inner.name,
                        completion.index
                    );
                    continue;
                };
                if let Some(tracker) = shared.tracker.as_ref() {
                    tracker.mark_done();
                }

                let mut buffer = Buffer::new(completion.index, mem.clone());
                buffer.set_result(
                    completion.bytes_used,
                    completion.timestamp,
                    completion.sequence,
                    if completion.error { BufferStatus::Error } else { BufferStatus::Success },
                );
                buffer
            };

            inner.buffer_ready.emit(&buffer);
        }
    }
}

// -----------------------------------------------------------------------------
// Kernel backend
// -----------------------------------------------------------------------------

struct KernelState {
    fd: Option<OwnedFd>,
    num_planes: u32,
}

struct KernelNode {
    path: PathBuf,
    state: Mutex<KernelState>,
}

impl KernelNode {
    fn new(path: PathBuf) -> KernelNode {
        KernelNode { path, state: Mutex::new(KernelState { fd: None, num_planes: 1 }) }
    }

    fn open(&self) -> Result<(), Error> {
        let fd = crate::v4l2::open_device_node(&self.path)?;

        let mut caps = sys::V4l2Capability::default();
        unsafe { sys::vidioc_querycap(fd.as_raw_fd(), &mut caps) }?;
        let device_caps =
            if caps.device_caps != 0 { caps.device_caps } else { caps.capabilities };
        if device_caps & sys::V4L2_CAP_VIDEO_CAPTURE_MPLANE == 0
            || device_caps & sys::V4L2_CAP_STREAMING == 0
        {
            return Err(Error::invalid(format!(
                "{} is not a streaming capture device",
                self.path.display()
            )));
        }

        self.state.lock().unwrap().fd = Some(fd);
        Ok(())
    }

    fn close(&self) {
        self.state.lock().unwrap().fd = None;
    }

    fn raw_fd(&self) -> Result<i32, Error> {
        self.state
            .lock()
            .unwrap()
            .fd
            .as_ref()
            .map(|fd| fd.as_raw_fd())
            .ok_or_else(|| Error::InvalidState("video node not open".into()))
    }

    fn poll_fd(&self) -> Result<i32, Error> {
        self.raw_fd()
    }

    fn set_format(&self, format: DeviceFormat) -> Result<DeviceFormat, Error> {
        let fd = self.raw_fd()?;

        let mut pix: sys::V4l2PixFormatMplane = unsafe { std::mem::zeroed() };
        pix.width = format.size.width;
        pix.height = format.size.height;
        pix.pixelformat = format.fourcc.as_u32();
        pix.field = sys::V4L2_FIELD_NONE;
        pix.num_planes = format.planes as u8;

        let mut raw = sys::V4l2Format::zeroed(sys::V4L2_BUF_TYPE_VIDEO_CAPTURE_MPLANE);
        raw.fmt = sys::V4l2FormatUnion { pix_mp: pix };
        unsafe { sys::vidioc_s_fmt(fd, &mut raw) }?;

        let pix = unsafe { raw.fmt.pix_mp };
        self.state.lock().unwrap().num_planes = u32::from(pix.num_planes);

        let (width, height, pixelformat, num_planes) =
            (pix.width, pix.height, pix.pixelformat, pix.num_planes);
        Ok(DeviceFormat {
            size: Size::new(width, height),
            fourcc: FourCC::from(pixelformat),
            planes: u32::from(num_planes),
        })
    }

    fn get_format(&self) -> Result<DeviceFormat, Error> {
        let fd = self.raw_fd()?;
        let mut raw = sys::V4l2Format::zeroed(sys::V4L2_BUF_TYPE_VIDEO_CAPTURE_MPLANE);
        unsafe { sys::vidioc_g_fmt(fd, &mut raw) }?;

        let pix = unsafe { raw.fmt.pix_mp };
        let (width, height, pixelformat, num_planes) =
            (pix.width, pix.height, pix.pixelformat, pix.num_planes);
        Ok(DeviceFormat {
            size: Size::new(width, height),
            fourcc: FourCC::from(pixelformat),
            planes: u32::from(num_planes),
        })
    }

    fn export_buffers(&self, count: u32) -> Result<Vec<BufferMemory>, Error> {
        let fd = self.raw_fd()?;

        let mut req = sys::V4l2RequestBuffers {
            count,
            type_: sys::V4L2_BUF_TYPE_VIDEO_CAPTURE_MPLANE,
            memory: sys::V4L2_MEMORY_MMAP,
            reserved: [0; 2],
        };
        unsafe { sys::vidioc_reqbufs(fd, &mut req) }?;
        if req.count < count {
            return Err(Error::invalid(format!(
                "driver granted {} of {} buffers",
                req.count, count
            )));
        }

        let mut mems = Vec::with_capacity(count as usize);
        for index in 0..count {
            let mut planes = [sys::V4l2Plane::default(); sys::VIDEO_MAX_PLANES];
            let mut buf = sys::V4l2Buffer::zeroed();
            buf.index = index;
            buf.type_ = sys::V4L2_BUF_TYPE_VIDEO_CAPTURE_MPLANE;
            buf.memory = sys::V4L2_MEMORY_MMAP;
            buf.length = sys::VIDEO_MAX_PLANES as u32;
            buf.m.planes = planes.as_mut_ptr();
            unsafe { sys::vidioc_querybuf(fd, &mut buf) }?;

            let mut mapped = Vec::with_capacity(buf.length as usize);
            for plane in planes.iter().take(buf.length as usize) {
                let offset = unsafe { plane.m.mem_offset };
                mapped.push(BufferPlane::mmap(fd, i64::from(offset), plane.length as usize)?);
            }
            mems.push(BufferMemory::new(mapped));
        }
        Ok(mems)
    }

    fn release_buffers(&self) -> Result<(), Error> {
        let fd = self.raw_fd()?;
        let mut req = sys::V4l2RequestBuffers {
            count: 0,
            type_: sys::V4L2_BUF_TYPE_VIDEO_CAPTURE_MPLANE,
            memory: sys::V4L2_MEMORY_MMAP,
            reserved: [0; 2],
        };
        unsafe { sys::vidioc_reqbufs(fd, &mut req) }?;
        Ok(())
    }

    fn queue(&self, index: u32) -> Result<(), Error> {
        let (fd, num_planes) = {
            let state = self.state.lock().unwrap();
            let fd = state
                .fd
                .as_ref()
                .map(|fd| fd.as_raw_fd())
                .ok_or_else(|| Error::InvalidState("video node not open".into()))?;
            (fd, state.num_planes)
        };

        let mut planes = [sys::V4l2Plane::default(); sys::VIDEO_MAX_PLANES];
        let mut buf = sys::V4l2Buffer::zeroed();
        buf.index = index;
        buf.type_ = sys::V4L2_BUF_TYPE_VIDEO_CAPTURE_MPLANE;
        buf.memory = sys::V4L2_MEMORY_MMAP;
        buf.length = num_planes;
        buf.m.planes = planes.as_mut_ptr();
        unsafe { sys::vidioc_qbuf(fd, &mut buf) }?;
        Ok(())
    }

    fn dequeue(&self) -> Result<Option<Completion>, Error> {
        let (fd, num_planes) = {
            let state = self.state.lock().unwrap();
            let fd = state
                .fd
                .as_ref()
                .map(|fd| fd.as_raw_fd())
                .ok_or_else(|| Error::InvalidState("video node not open".into()))?;
            (fd, state.num_planes)
        };

        let mut planes = [sys::V4l2Plane::default(); sys::VIDEO_MAX_PLANES];
        let mut buf = sys::V4l2Buffer::zeroed();
        buf.type_ = sys::V4L2_BUF_TYPE_VIDEO_CAPTURE_MPLANE;
        buf.memory = sys::V4L2_MEMORY_MMAP;
        buf.length = num_planes;
        buf.m.planes = planes.as_mut_ptr();

        match unsafe { sys::vidioc_dqbuf(fd, &mut buf) } {
            Ok(_) => {}
            Err(nix::errno::Errno::EAGAIN) => return Ok(None),
            Err(err) => return Err(err.into()),
        }

        let bytes_used: u32 =
            planes.iter().take(buf.length as usize).map(|p| p.bytesused).sum();
        let timestamp = buf.timestamp.tv_sec as u64 * 1_000_000_000
            + buf.timestamp.tv_usec as u64 * 1_000;

        Ok(Some(Completion {
            index: buf.index,
            bytes_used,
            timestamp,
            sequence: buf.sequence,
            error: buf.flags & sys::V4L2_BUF_FLAG_ERROR != 0,
        }))
    }

    fn stream_on(&self) -> Result<(), Error> {
        let fd = self.raw_fd()?;
        let type_: libc::c_int = sys::V4L2_BUF_TYPE_VIDEO_CAPTURE_MPLANE as libc::c_int;
        unsafe { sys::vidioc_streamon(fd, &type_) }?;
        Ok(())
    }

    fn stream_off(&self) -> Result<(), Error> {
        let fd = self.raw_fd()?;
        let type_: libc::c_int = sys::V4L2_BUF_TYPE_VIDEO_CAPTURE_MPLANE as libc::c_int;
        unsafe { sys::vidioc_streamoff(fd, &type_) }?;
        Ok(())
    }
}
