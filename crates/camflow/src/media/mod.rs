// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Media Controller device discovery and graph matching.
//!
//! This module models the kernel's media graph (entities connected by links
//! between pads), enumerates media devices present on the system, and
//! answers [`DeviceMatch`] queries from pipeline handlers. A matched
//! [`MediaDevice`] is acquired exclusively by exactly one pipeline handler;
//! the enumerator skips devices another handler already holds.
//!
//! # Example
//!
//! ```no_run
//! use camflow::media::{DeviceEnumerator, DeviceMatch};
//!
//! let enumerator = DeviceEnumerator::system()?;
//!
//! let mut dm = DeviceMatch::new("ipu3-cio2");
//! dm.add("ipu3-csi2 0");
//! dm.add("ipu3-cio2 0");
//!
//! if let Some(media) = enumerator.search(&dm) {
//!     println!("matched {} ({})", media.model(), media.driver());
//! }
//! # Ok::<(), camflow::Error>(())
//! ```

pub(crate) mod device;
mod enumerator;
mod graph;

pub use device::MediaDevice;
pub use enumerator::{DeviceEnumerator, DeviceMatch};
pub use graph::{
    EntityFunction, EntityId, LinkId, MediaEntity, MediaLink, MediaPad, PadDirection, PadId,
    Topology,
};
