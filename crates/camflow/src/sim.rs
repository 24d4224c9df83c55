// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Synthetic IPU3-class media and V4L2 backend.
//!
//! The simulator models the CIO2 + ImgU media topology and enough V4L2
//! behavior to run the full capture path without hardware: sensor
//! subdevices with a configurable format table, link state, buffer export
//! into heap memory, and FIFO frame completion signalled through an eventfd
//! so completions are delivered by the event dispatcher exactly like kernel
//! completions.
//!
//! # Example
//!
//! ```
//! use camflow::geometry::Size;
//! use camflow::sim::{ipu3_enumerator, SimSensor};
//!
//! let (enumerator, _hub) =
//!     ipu3_enumerator(&[SimSensor::bayer("imx219", Size::new(3280, 2464))]);
//! assert_eq!(enumerator.devices().len(), 2);
//! ```

use std::collections::{HashMap, VecDeque};
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, Weak};
use std::time::Instant;

use crate::buffer::{BufferMemory, BufferPlane};
use crate::fourcc::FourCC;
use crate::geometry::{Rectangle, Size, SizeRange};
use crate::media::device::{MediaBackend, MediaDevice};
use crate::media::{DeviceEnumerator, EntityFunction, PadDirection, Topology};
use crate::v4l2::{
    DeviceFormat, SubdeviceFormat, MEDIA_BUS_FMT_SGRBG10_1X10,
};
use crate::Error;

/// Shared state of one simulated media/V4L2 complex.
pub struct SimHub {
    epoch: Instant,
    state: Mutex<HubState>,
}

#[derive(Default)]
struct HubState {
    nodes: HashMap<String, Arc<SimVideoNode>>,
    subdevs: HashMap<String, Arc<SimSubdevice>>,
}

impl SimHub {
    pub fn new() -> Arc<SimHub> {
        Arc::new(SimHub { epoch: Instant::now(), state: Mutex::new(HubState::default()) })
    }

    fn timestamp_ns(&self) -> u64 {
        self.epoch.elapsed().as_nanos() as u64
    }

    /// Fetch (or lazily create) the simulated video node behind an entity.
    pub(crate) fn video_node(self: &Arc<Self>, name: &str) -> Result<Arc<SimVideoNode>, Error> {
        let mut state = self.state.lock().unwrap();
        if let Some(node) = state.nodes.get(name) {
            return Ok(node.clone());
        }
        let node = Arc::new(SimVideoNode::new(Arc::downgrade(self))?);
        state.nodes.insert(name.to_owned(), node.clone());
        Ok(node)
    }

    /// Fetch (or lazily create) the simulated subdevice behind an entity.
    pub(crate) fn subdevice(&self, name: &str) -> Arc<SimSubdevice> {
        let mut state = self.state.lock().unwrap();
        state
            .subdevs
            .entry(name.to_owned())
            .or_insert_with(|| Arc::new(SimSubdevice::default()))
            .clone()
    }

    /// Install the format table of a sensor subdevice.
    pub fn set_sensor_formats(&self, name: &str, formats: Vec<(u32, Vec<SizeRange>)>) {
        self.subdevice(name).install_formats(formats);
    }

    /// Current pad-0 format of a subdevice, for inspection.
    pub fn sensor_format(&self, name: &str) -> SubdeviceFormat {
        self.subdevice(name).get_format(0)
    }

    /// Current format of a video node, if one was negotiated.
    pub fn video_node_format(&self, name: &str) -> Option<DeviceFormat> {
        self.state.lock().unwrap().nodes.get(name).and_then(|node| node.get_format())
    }
}

/// A frame completion produced by the simulated kernel.
pub(crate) struct SimCompletion {
    pub index: u32,
    pub bytes_used: u32,
    pub timestamp: u64,
    pub sequence: u32,
    pub error: bool,
}

#[derive(Default)]
struct NodeState {
    format: Option<DeviceFormat>,
    exported: u32,
    frame_bytes: u32,
    queued: VecDeque<u32>,
    done: VecDeque<SimCompletion>,
    streaming: bool,
    sequence: u32,
}

/// Simulated V4L2 video capture node.
///
/// Queued buffers complete in FIFO order as soon as streaming is active;
/// completion readiness is signalled on a per-node eventfd.
pub(crate) struct SimVideoNode {
    hub: Weak<SimHub>,
    event_fd: OwnedFd,
    state: Mutex<NodeState>,
}

impl SimVideoNode {
    fn new(hub: Weak<SimHub>) -> Result<SimVideoNode, Error> {
        let fd = unsafe { libc::eventfd(0, libc::EFD_CLOEXEC | libc::EFD_NONBLOCK) };
        if fd < 0 {
            return Err(Error::Io(io::Error::last_os_error()));
        }
        Ok(SimVideoNode {
            hub,
            event_fd: unsafe { OwnedFd::from_raw_fd(fd) },
            state: Mutex::new(NodeState::default()),
        })
    }

    pub(crate) fn event_fd(&self) -> RawFd {
        self.event_fd.as_raw_fd()
    }

    pub(crate) fn set_format(&self, fmt: DeviceFormat) -> DeviceFormat {
        self.state.lock().unwrap().format = Some(fmt);
        fmt
    }

    pub(crate) fn get_format(&self) -> Option<DeviceFormat> {
        self.state.lock().unwrap().format
    }

    pub(crate) fn export_buffers(&self, count: u32) -> Result<Vec<BufferMemory>, Error> {
        let mut state = self.state.lock().unwrap();
        let format = state
            .format
            .ok_or_else(|| Error::InvalidState("no format set before buffer export".into()))?;

        let sizes = plane_sizes(&format);
        state.exported = count;
        state.frame_bytes = sizes.iter().sum::<usize>() as u32;

        Ok((0..count)
            .map(|_| BufferMemory::new(sizes.iter().map(|&len| BufferPlane::heap(len)).collect()))
            .collect())
    }

    pub(crate) fn release_buffers(&self) -> Result<(), Error> {
        let mut state = self.state.lock().unwrap();
        if state.streaming {
            return Err(Error::Busy);
        }
        state.exported = 0;
        state.queued.clear();
        state.done.clear();
        Ok(())
    }

    pub(crate) fn queue(&self, index: u32) -> Result<(), Error> {
        let mut state = self.state.lock().unwrap();
        if index >= state.exported {
            return Err(Error::invalid(format!("buffer index {} not exported", index)));
        }
        if state.streaming {
            self.complete(&mut state, index);
        } else {
            state.queued.push_back(index);
        }
        Ok(())
    }

    pub(crate) fn stream_on(&self) -> Result<(), Error> {
        let mut state = self.state.lock().unwrap();
        state.streaming = true;
        while let Some(index) = state.queued.pop_front() {
            self.complete(&mut state, index);
        }
        Ok(())
    }

    pub(crate) fn stream_off(&self) -> Result<(), Error> {
        let mut state = self.state.lock().unwrap();
        state.streaming = false;
        state.queued.clear();
        state.done.clear();
        drop(state);

        // Swallow any readiness left from frames that were never dequeued.
        let mut scratch = [0u8; 8];
        let _ = unsafe {
            libc::read(self.event_fd.as_raw_fd(), scratch.as_mut_ptr() as *mut libc::c_void, 8)
        };
        Ok(())
    }

    pub(crate) fn dequeue(&self) -> Option<SimCompletion> {
        self.state.lock().unwrap().done.pop_front()
    }

    /// Clear readiness and report how many completions are waiting.
    pub(crate) fn consume_ready(&self) -> usize {
        let mut scratch = [0u8; 8];
        let _ = unsafe {
            libc::read(self.event_fd.as_raw_fd(), scratch.as_mut_ptr() as *mut libc::c_void, 8)
        };
        self.state.lock().unwrap().done.len()
    }

    fn complete(&self, state: &mut NodeState, index: u32) {
        let sequence = state.sequence;
        state.sequence += 1;
        let timestamp = self.hub.upgrade().map(|hub| hub.timestamp_ns()).unwrap_or(0);
        state.done.push_back(SimCompletion {
            index,
            bytes_used: state.frame_bytes,
            timestamp,
            sequence,
            error: false,
        });

        let one: u64 = 1;
        let _ = unsafe {
            libc::write(
                self.event_fd.as_raw_fd(),
                &one as *const u64 as *const libc::c_void,
                8,
            )
        };
    }
}

#[derive(Default)]
struct SubdevState {
    formats: Vec<(u32, Vec<SizeRange>)>,
    pad_formats: HashMap<u32, SubdeviceFormat>,
    selections: HashMap<(u32, u32), Rectangle>,
}

/// Simulated pad-addressable subdevice.
#[derive(Default)]
pub(crate) struct SimSubdevice {
    state: Mutex<SubdevState>,
}

impl SimSubdevice {
    fn install_formats(&self, formats: Vec<(u32, Vec<SizeRange>)>) {
        let mut state = self.state.lock().unwrap();

        // Sensors power up at their largest supported size.
        let current = formats
            .iter()
            .flat_map(|(code, ranges)| ranges.iter().map(move |r| (*code, r.max)))
            .max_by_key(|(_, size)| size.area());
        if let Some((code, size)) = current {
            state.pad_formats.insert(0, SubdeviceFormat { size, mbus_code: code });
        }

        state.formats = formats;
    }

    pub(crate) fn formats(&self, _pad: u32) -> Vec<(u32, Vec<SizeRange>)> {
        self.state.lock().unwrap().formats.clone()
    }

    pub(crate) fn set_format(&self, pad: u32, fmt: SubdeviceFormat) -> SubdeviceFormat {
        self.state.lock().unwrap().pad_formats.insert(pad, fmt);
        fmt
    }

    pub(crate) fn get_format(&self, pad: u32) -> SubdeviceFormat {
        self.state.lock().unwrap().pad_formats.get(&pad).copied().unwrap_or_default()
    }

    pub(crate) fn set_selection(&self, pad: u32, target: u32, rect: Rectangle) -> Rectangle {
        self.state.lock().unwrap().selections.insert((pad, target), rect);
        rect
    }

    pub(crate) fn get_selection(&self, pad: u32, target: u32) -> Option<Rectangle> {
        self.state.lock().unwrap().selections.get(&(pad, target)).copied()
    }
}

/// Per-plane byte sizes for a negotiated format.
fn plane_sizes(fmt: &DeviceFormat) -> Vec<usize> {
    let w = fmt.size.width as usize;
    let h = fmt.size.height as usize;

    if fmt.fourcc == FourCC::NV12 && fmt.planes == 2 {
        return vec![w * h, w * h / 2];
    }

    let bytes = match fmt.fourcc {
        // Packed 10-bit Bayer: 25 pixels per 32 bytes.
        FourCC::IPU3_SBGGR10
        | FourCC::IPU3_SGBRG10
        | FourCC::IPU3_SGRBG10
        | FourCC::IPU3_SRGGB10 => w * h * 32 / 25,
        _ => w * h * 2,
    };
    vec![bytes]
}

/// A sensor description for the simulated topology.
#[derive(Debug, Clone)]
pub struct SimSensor {
    pub name: String,
    pub formats: Vec<(u32, Vec<SizeRange>)>,
}

impl SimSensor {
    /// A 10-bit Bayer sensor advertising a ladder of discrete sizes up to
    /// `max`.
    pub fn bayer(name: &str, max: Size) -> SimSensor {
        let mut sizes: Vec<Size> = [Size::new(640, 480), Size::new(1280, 720), Size::new(1920, 1080)]
            .into_iter()
            .filter(|s| max.contains(*s) && *s != max)
            .collect();
        sizes.push(max);

        SimSensor {
            name: name.to_owned(),
            formats: vec![(
                MEDIA_BUS_FMT_SGRBG10_1X10,
                sizes.into_iter().map(SizeRange::fixed).collect(),
            )],
        }
    }
}

/// Build the CIO2 and ImgU media devices of a simulated IPU3 with the given
/// sensors attached to the first CSI-2 ports, and an enumerator presenting
/// them.
pub fn ipu3_enumerator(sensors: &[SimSensor]) -> (DeviceEnumerator, Arc<SimHub>) {
    let hub = SimHub::new();
    let mut kernel_id = 0u32;
    let mut next_id = || {
        kernel_id += 1;
        kernel_id
    };

    let mut cio2 = Topology::new();
    for index in 0..4 {
        let csi2 = cio2.add_entity(
            &format!("ipu3-csi2 {}", index),
            EntityFunction::Other(0x2_0000),
            next_id(),
            None,
        );
        let csi2_sink = cio2.add_pad(csi2, PadDirection::Sink);
        let csi2_src = cio2.add_pad(csi2, PadDirection::Source);

        let capture = cio2.add_entity(
            &format!("ipu3-cio2 {}", index),
            EntityFunction::IoVideo,
            next_id(),
            None,
        );
        let capture_sink = cio2.add_pad(capture, PadDirection::Sink);
        cio2.add_link(csi2_src, capture_sink, true, true);

        if let Some(sensor) = sensors.get(index) {
            let entity =
                cio2.add_entity(&sensor.name, EntityFunction::CameraSensor, next_id(), None);
            let src = cio2.add_pad(entity, PadDirection::Source);
            // Default-enabled, as drivers leave it; match() disables it and
            // camera registration re-enables it.
            cio2.add_link(src, csi2_sink, true, false);
            hub.set_sensor_formats(&sensor.name, sensor.formats.clone());
        }
    }

    let mut imgu = Topology::new();
    for index in 0..2 {
        let name = format!("ipu3-imgu {}", index);
        let subdev = imgu.add_entity(&name, EntityFunction::Other(0x2_0000), next_id(), None);
        let sd_input = imgu.add_pad(subdev, PadDirection::Sink);
        let sd_params = imgu.add_pad(subdev, PadDirection::Sink);
        let sd_output = imgu.add_pad(subdev, PadDirection::Source);
        let sd_vf = imgu.add_pad(subdev, PadDirection::Source);
        let sd_stat = imgu.add_pad(subdev, PadDirection::Source);

        let mut io_node = |suffix: &str, imgu: &mut Topology| {
            let entity = imgu.add_entity(
                &format!("{} {}", name, suffix),
                EntityFunction::IoVideo,
                next_id(),
                None,
            );
            entity
        };

        let input = io_node("input", &mut imgu);
        let input_src = imgu.add_pad(input, PadDirection::Source);
        imgu.add_link(input_src, sd_input, true, false);

        let params = io_node("parameters", &mut imgu);
        let params_src = imgu.add_pad(params, PadDirection::Source);
        imgu.add_link(params_src, sd_params, true, false);

        let output = io_node("output", &mut imgu);
        let output_sink = imgu.add_pad(output, PadDirection::Sink);
        imgu.add_link(sd_output, output_sink, true, false);

        let viewfinder = io_node("viewfinder", &mut imgu);
        let vf_sink = imgu.add_pad(viewfinder, PadDirection::Sink);
        imgu.add_link(sd_vf, vf_sink, true, false);

        let stat = io_node("3a stat", &mut imgu);
        let stat_sink = imgu.add_pad(stat, PadDirection::Sink);
        imgu.add_link(sd_stat, stat_sink, true, false);
    }

    let mut enumerator = DeviceEnumerator::new();
    enumerator.add(Arc::new(MediaDevice::new(
        "ipu3-cio2",
        "Intel IPU3 CIO2",
        PathBuf::from("/dev/media-sim0"),
        cio2,
        MediaBackend::Sim(hub.clone()),
    )));
    enumerator.add(Arc::new(MediaDevice::new(
        "ipu3-imgu",
        "Intel IPU3 ImgU",
        PathBuf::from("/dev/media-sim1"),
        imgu,
        MediaBackend::Sim(hub.clone()),
    )));

    (enumerator, hub)
}
