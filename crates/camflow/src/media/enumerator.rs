// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Media device enumeration and matching.

use std::path::PathBuf;
use std::sync::Arc;

use crate::media::device::MediaDevice;

/// Name-based match requirements for one media device.
///
/// A media device matches when its driver name equals the required driver
/// and every required entity name is present in its graph.
#[derive(Debug, Clone)]
pub struct DeviceMatch {
    driver: String,
    entities: Vec<String>,
}

impl DeviceMatch {
    pub fn new(driver: &str) -> DeviceMatch {
        DeviceMatch { driver: driver.to_owned(), entities: Vec::new() }
    }

    /// Require the named entity to be present.
    pub fn add(&mut self, entity: &str) {
        self.entities.push(entity.to_owned());
    }

    pub fn matches(&self, device: &MediaDevice) -> bool {
        if device.driver() != self.driver {
            return false;
        }
        self.entities.iter().all(|name| device.entity_by_name(name).is_some())
    }
}

/// Discovers media devices and answers match queries.
///
/// Results are stable for identical inputs within one enumeration scope:
/// devices are held in scan order and [`search`](DeviceEnumerator::search)
/// returns the first non-busy match.
pub struct DeviceEnumerator {
    devices: Vec<Arc<MediaDevice>>,
}

impl DeviceEnumerator {
    /// An empty enumerator; devices are added with
    /// [`add`](DeviceEnumerator::add).
    pub fn new() -> DeviceEnumerator {
        DeviceEnumerator { devices: Vec::new() }
    }

    /// Scan `/dev/media*` for kernel media devices.
    ///
    /// Nodes that fail to open or identify are skipped, not fatal; the scan
    /// succeeds with whatever devices are accessible.
    pub fn system() -> Result<DeviceEnumerator, crate::Error> {
        let mut enumerator = DeviceEnumerator::new();
        for index in 0..64 {
            let path = PathBuf::from(format!("/dev/media{}", index));
            if !path.exists() {
                continue;
            }
            match MediaDevice::from_dev_node(&path) {
                Ok(device) => enumerator.add(device),
                Err(err) => {
                    log::warn!("skipping {}: {}", path.display(), err);
                }
            }
        }
        log::info!("enumerated {} media devices", enumerator.devices.len());
        Ok(enumerator)
    }

    pub fn add(&mut self, device: Arc<MediaDevice>) {
        self.devices.push(device);
    }

    pub fn devices(&self) -> &[Arc<MediaDevice>] {
        &self.devices
    }

    /// Return the first non-busy device satisfying `device_match`.
    ///
    /// Devices already acquired by another pipeline handler are skipped.
    pub fn search(&self, device_match: &DeviceMatch) -> Option<Arc<MediaDevice>> {
        self.devices
            .iter()
            .find(|dev| !dev.busy() && device_match.matches(dev))
            .cloned()
    }
}

impl Default for DeviceEnumerator {
    fn default() -> DeviceEnumerator {
        DeviceEnumerator::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::graph::{EntityFunction, PadDirection, Topology};
    use crate::sim::SimHub;

    fn device(driver: &str, entities: &[&str]) -> Arc<MediaDevice> {
        let mut topo = Topology::new();
        for (i, name) in entities.iter().enumerate() {
            let id = topo.add_entity(name, EntityFunction::Other(0), i as u32 + 1, None);
            topo.add_pad(id, PadDirection::Source);
        }
        Arc::new(crate::media::device::MediaDevice::new(
            driver,
            driver,
            PathBuf::from(format!("/dev/media-sim-{}", driver)),
            topo,
            crate::media::device::MediaBackend::Sim(SimHub::new()),
        ))
    }

    #[test]
    fn test_match_requires_driver_and_entities() {
        let dev = device("ipu3-cio2", &["ipu3-csi2 0", "ipu3-cio2 0"]);

        let mut dm = DeviceMatch::new("ipu3-cio2");
        dm.add("ipu3-csi2 0");
        assert!(dm.matches(&dev));

        dm.add("ipu3-csi2 1");
        assert!(!dm.matches(&dev));

        let other = DeviceMatch::new("uvcvideo");
        assert!(!other.matches(&dev));
    }

    #[test]
    fn test_search_skips_busy() {
        let first = device("ipu3-cio2", &["ipu3-csi2 0"]);
        let second = device("ipu3-cio2", &["ipu3-csi2 0"]);

        let mut enumerator = DeviceEnumerator::new();
        enumerator.add(first.clone());
        enumerator.add(second.clone());

        let dm = {
            let mut dm = DeviceMatch::new("ipu3-cio2");
            dm.add("ipu3-csi2 0");
            dm
        };

        let found = enumerator.search(&dm).unwrap();
        assert!(Arc::ptr_eq(&found, &first));

        assert!(found.acquire());
        let next = enumerator.search(&dm).unwrap();
        assert!(Arc::ptr_eq(&next, &second));

        assert!(next.acquire());
        assert!(enumerator.search(&dm).is_none());
    }

    #[test]
    fn test_search_is_deterministic() {
        let mut enumerator = DeviceEnumerator::new();
        enumerator.add(device("ipu3-imgu", &["ipu3-imgu 0"]));
        enumerator.add(device("ipu3-imgu", &["ipu3-imgu 0"]));

        let mut dm = DeviceMatch::new("ipu3-imgu");
        dm.add("ipu3-imgu 0");

        let a = enumerator.search(&dm).unwrap();
        let b = enumerator.search(&dm).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }
}
