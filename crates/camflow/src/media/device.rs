// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Media device: one kernel media controller instance and its graph.

use std::collections::HashMap;
use std::fs;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::media::graph::{EntityFunction, EntityId, LinkId, PadDirection, Topology};
use crate::sim::SimHub;
use crate::v4l2::sys;
use crate::Error;

pub(crate) enum MediaBackend {
    /// A real `/dev/mediaN` node.
    Kernel,
    /// The synthetic backend; entity handles resolve through the hub.
    Sim(Arc<SimHub>),
}

struct DeviceInner {
    topology: Topology,
    /// Held only while the device is open for link manipulation.
    fd: Option<OwnedFd>,
    open: bool,
}

/// A media device: driver and model identity plus the entity graph.
///
/// The device is shared between pipeline handlers during matching but
/// acquired exclusively by the one that registers cameras from it;
/// [`acquire`](MediaDevice::acquire) is a compare-and-swap and fails while
/// another handler holds the device.
pub struct MediaDevice {
    driver: String,
    model: String,
    dev_node: PathBuf,
    acquired: AtomicBool,
    inner: Mutex<DeviceInner>,
    backend: MediaBackend,
}

impl MediaDevice {
    pub(crate) fn new(
        driver: &str,
        model: &str,
        dev_node: PathBuf,
        topology: Topology,
        backend: MediaBackend,
    ) -> MediaDevice {
        MediaDevice {
            driver: driver.to_owned(),
            model: model.to_owned(),
            dev_node,
            acquired: AtomicBool::new(false),
            inner: Mutex::new(DeviceInner { topology, fd: None, open: false }),
            backend,
        }
    }

    /// Read the identity and topology of a kernel media node.
    ///
    /// The device node is opened only for the duration of the scan.
    pub(crate) fn from_dev_node(path: &Path) -> Result<Arc<MediaDevice>, Error> {
        let fd = crate::v4l2::open_device_node(path)?;

        let mut info = sys::MediaDeviceInfo::default();
        unsafe { sys::media_ioc_device_info(fd.as_raw_fd(), &mut info) }?;

        let driver = cstr_field(&info.driver);
        let model = cstr_field(&info.model);
        let topology = load_topology(fd.as_raw_fd())?;
        drop(fd);

        log::debug!(
            "media device {} driver '{}' model '{}' with {} entities",
            path.display(),
            driver,
            model,
            topology.entities().len()
        );

        Ok(Arc::new(MediaDevice::new(
            &driver,
            &model,
            path.to_owned(),
            topology,
            MediaBackend::Kernel,
        )))
    }

    pub fn driver(&self) -> &str {
        &self.driver
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn dev_node(&self) -> &Path {
        &self.dev_node
    }

    pub(crate) fn backend(&self) -> &MediaBackend {
        &self.backend
    }

    /// Take exclusive ownership of the device. Returns false if another
    /// pipeline handler already holds it.
    pub fn acquire(&self) -> bool {
        self.acquired
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn release(&self) {
        self.acquired.store(false, Ordering::Release);
    }

    pub fn busy(&self) -> bool {
        self.acquired.load(Ordering::Acquire)
    }

    /// Open the device node for link manipulation.
    pub fn open(&self) -> Result<(), Error> {
        let mut inner = self.inner.lock().unwrap();
        if inner.open {
            return Err(Error::Busy);
        }
        if let MediaBackend::Kernel = self.backend {
            inner.fd = Some(crate::v4l2::open_device_node(&self.dev_node)?);
        }
        inner.open = true;
        Ok(())
    }

    pub fn close(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.fd = None;
        inner.open = false;
    }

    /// Run `f` against the current topology.
    pub fn with_topology<R>(&self, f: impl FnOnce(&Topology) -> R) -> R {
        f(&self.inner.lock().unwrap().topology)
    }

    pub fn entity_by_name(&self, name: &str) -> Option<EntityId> {
        self.with_topology(|topo| topo.entity_by_name(name))
    }

    pub(crate) fn entity_dev_node(&self, id: EntityId) -> Option<PathBuf> {
        self.with_topology(|topo| topo.entity(id).dev_node.clone())
    }

    /// Change the enable state of a link. The device must be open.
    pub fn setup_link(&self, id: LinkId, enable: bool) -> Result<(), Error> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.open {
            return Err(Error::InvalidState("media device not open".into()));
        }

        let link = inner.topology.link(id).clone();
        if link.immutable {
            return if link.enabled == enable {
                Ok(())
            } else {
                Err(Error::invalid("immutable link"))
            };
        }
        if link.enabled == enable {
            return Ok(());
        }

        if let Some(fd) = inner.fd.as_ref() {
            let desc = link_desc(&inner.topology, id, enable);
            let mut desc = desc;
            unsafe { sys::media_ioc_setup_link(fd.as_raw_fd(), &mut desc) }?;
        }

        inner.topology.link_mut(id).enabled = enable;
        Ok(())
    }

    /// Disable every mutable link that is currently enabled.
    ///
    /// Camera registration re-enables only the links it needs, so the graph
    /// starts from a known state.
    pub fn disable_links(&self) -> Result<(), Error> {
        let to_disable: Vec<LinkId> = self.with_topology(|topo| {
            topo.link_ids()
                .filter(|&id| {
                    let link = topo.link(id);
                    link.enabled && !link.immutable
                })
                .collect()
        });

        for id in to_disable {
            self.setup_link(id, false)?;
        }
        Ok(())
    }
}

fn link_desc(topo: &Topology, id: LinkId, enable: bool) -> sys::MediaLinkDesc {
    let link = topo.link(id);
    let source = topo.pad(link.source);
    let sink = topo.pad(link.sink);

    sys::MediaLinkDesc {
        source: sys::MediaPadDesc {
            entity: topo.entity(source.entity).kernel_id,
            index: source.index as u16,
            flags: sys::MEDIA_PAD_FL_SOURCE,
            reserved: [0; 2],
        },
        sink: sys::MediaPadDesc {
            entity: topo.entity(sink.entity).kernel_id,
            index: sink.index as u16,
            flags: sys::MEDIA_PAD_FL_SINK,
            reserved: [0; 2],
        },
        flags: if enable { sys::MEDIA_LNK_FL_ENABLED } else { 0 },
        reserved: [0; 2],
    }
}

/// Extract a NUL-terminated string from a fixed-size kernel char field.
fn cstr_field(field: &[u8]) -> String {
    let len = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    String::from_utf8_lossy(&field[..len]).into_owned()
}

/// Enumerate entities, pads and links through the legacy media controller
/// ioctls and assemble the index-addressed topology.
fn load_topology(fd: RawFd) -> Result<Topology, Error> {
    struct RawEntity {
        kernel_id: u32,
        name: String,
        function: EntityFunction,
        pads: Vec<sys::MediaPadDesc>,
        links: Vec<sys::MediaLinkDesc>,
        dev_node: Option<PathBuf>,
    }

    let mut raw_entities = Vec::new();
    let mut next = 0u32;
    loop {
        let mut desc = sys::MediaEntityDesc::zeroed();
        desc.id = next | sys::MEDIA_ENT_ID_FLAG_NEXT;
        match unsafe { sys::media_ioc_enum_entities(fd, &mut desc) } {
            Ok(_) => {}
            Err(nix::errno::Errno::EINVAL) => break,
            Err(err) => return Err(err.into()),
        }
        next = desc.id;

        let mut pads = vec![sys::MediaPadDesc::default(); desc.pads as usize];
        let mut links = vec![sys::MediaLinkDesc::default(); desc.links as usize];
        let mut links_enum = sys::MediaLinksEnum {
            entity: desc.id,
            pads: pads.as_mut_ptr(),
            links: links.as_mut_ptr(),
            reserved: [0; 4],
        };
        unsafe { sys::media_ioc_enum_links(fd, &mut links_enum) }?;

        let dev = unsafe { desc.u.dev };
        raw_entities.push(RawEntity {
            kernel_id: desc.id,
            name: cstr_field(&desc.name),
            function: EntityFunction::from_raw(desc.type_),
            pads,
            links,
            dev_node: resolve_dev_node(dev.major, dev.minor),
        });
    }

    let mut topo = Topology::new();
    let mut by_kernel_id: HashMap<u32, EntityId> = HashMap::new();

    for raw in &raw_entities {
        let id = topo.add_entity(&raw.name, raw.function, raw.kernel_id, raw.dev_node.clone());
        by_kernel_id.insert(raw.kernel_id, id);
        for pad in &raw.pads {
            let direction = if pad.flags & sys::MEDIA_PAD_FL_SINK != 0 {
                PadDirection::Sink
            } else {
                PadDirection::Source
            };
            topo.add_pad(id, direction);
        }
    }

    for raw in &raw_entities {
        for link in &raw.links {
            // The kernel reports backward links too; keep only the forward
            // view so each link is recorded once.
            if link.source.entity != raw.kernel_id {
                continue;
            }
            let (Some(&src_ent), Some(&sink_ent)) = (
                by_kernel_id.get(&link.source.entity),
                by_kernel_id.get(&link.sink.entity),
            ) else {
                continue;
            };
            let src_pad = topo.entity(src_ent).pads[link.source.index as usize];
            let sink_pad = topo.entity(sink_ent).pads[link.sink.index as usize];
            topo.add_link(
                src_pad,
                sink_pad,
                link.flags & sys::MEDIA_LNK_FL_ENABLED != 0,
                link.flags & sys::MEDIA_LNK_FL_IMMUTABLE != 0,
            );
        }
    }

    Ok(topo)
}

/// Map a character device major:minor to its /dev path via sysfs.
fn resolve_dev_node(major: u32, minor: u32) -> Option<PathBuf> {
    if major == 0 {
        return None;
    }
    let uevent = fs::read_to_string(format!("/sys/dev/char/{}:{}/uevent", major, minor)).ok()?;
    uevent
        .lines()
        .find_map(|line| line.strip_prefix("DEVNAME="))
        .map(|name| PathBuf::from("/dev").join(name))
}
