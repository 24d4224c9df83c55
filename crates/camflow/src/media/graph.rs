// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Media graph topology: entities, pads and links.
//!
//! The topology is stored as three index-addressed tables to keep the graph
//! free of reference cycles; entity, pad and link handles are plain indices
//! into the owning [`Topology`].

#![forbid(unsafe_code)]

use std::path::PathBuf;

/// Index of an entity in its [`Topology`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntityId(pub usize);

/// Index of a pad in its [`Topology`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PadId(pub usize);

/// Index of a link in its [`Topology`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LinkId(pub usize);

/// Entity function, from the media controller `MEDIA_ENT_F_*` codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityFunction {
    /// An image sensor (`MEDIA_ENT_F_CAM_SENSOR`).
    CameraSensor,
    /// A V4L2 video node (`MEDIA_ENT_F_IO_V4L`).
    IoVideo,
    /// Any other function, carrying the raw kernel code.
    Other(u32),
}

impl EntityFunction {
    const MEDIA_ENT_F_IO_V4L: u32 = 0x0001_0001;
    const MEDIA_ENT_F_CAM_SENSOR: u32 = 0x0002_0001;

    pub fn from_raw(raw: u32) -> EntityFunction {
        match raw {
            Self::MEDIA_ENT_F_CAM_SENSOR => EntityFunction::CameraSensor,
            Self::MEDIA_ENT_F_IO_V4L => EntityFunction::IoVideo,
            other => EntityFunction::Other(other),
        }
    }
}

/// Direction of a pad.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PadDirection {
    Sink,
    Source,
}

/// A media entity: one node of the graph.
#[derive(Debug, Clone)]
pub struct MediaEntity {
    pub name: String,
    pub function: EntityFunction,
    /// Entity id assigned by the kernel, used in link setup ioctls.
    pub kernel_id: u32,
    /// Device node backing the entity, when one exists.
    pub dev_node: Option<PathBuf>,
    /// Pads in pad-index order.
    pub pads: Vec<PadId>,
}

/// A pad: an addressable terminal on an entity.
#[derive(Debug, Clone)]
pub struct MediaPad {
    pub entity: EntityId,
    /// Pad index local to the entity.
    pub index: u32,
    pub direction: PadDirection,
    /// Links terminating or originating at this pad.
    pub links: Vec<LinkId>,
}

/// A directed link between a source pad and a sink pad.
#[derive(Debug, Clone)]
pub struct MediaLink {
    pub source: PadId,
    pub sink: PadId,
    pub enabled: bool,
    /// Immutable links cannot change enable state.
    pub immutable: bool,
}

/// The complete graph of one media device.
#[derive(Debug, Clone, Default)]
pub struct Topology {
    entities: Vec<MediaEntity>,
    pads: Vec<MediaPad>,
    links: Vec<MediaLink>,
}

impl Topology {
    pub fn new() -> Topology {
        Topology::default()
    }

    pub fn add_entity(
        &mut self,
        name: &str,
        function: EntityFunction,
        kernel_id: u32,
        dev_node: Option<PathBuf>,
    ) -> EntityId {
        let id = EntityId(self.entities.len());
        self.entities.push(MediaEntity {
            name: name.to_owned(),
            function,
            kernel_id,
            dev_node,
            pads: Vec::new(),
        });
        id
    }

    pub fn add_pad(&mut self, entity: EntityId, direction: PadDirection) -> PadId {
        let id = PadId(self.pads.len());
        let index = self.entities[entity.0].pads.len() as u32;
        self.pads.push(MediaPad { entity, index, direction, links: Vec::new() });
        self.entities[entity.0].pads.push(id);
        id
    }

    pub fn add_link(&mut self, source: PadId, sink: PadId, enabled: bool, immutable: bool) -> LinkId {
        let id = LinkId(self.links.len());
        self.links.push(MediaLink { source, sink, enabled, immutable });
        self.pads[source.0].links.push(id);
        self.pads[sink.0].links.push(id);
        id
    }

    pub fn entity(&self, id: EntityId) -> &MediaEntity {
        &self.entities[id.0]
    }

    pub fn pad(&self, id: PadId) -> &MediaPad {
        &self.pads[id.0]
    }

    pub fn link(&self, id: LinkId) -> &MediaLink {
        &self.links[id.0]
    }

    pub(crate) fn link_mut(&mut self, id: LinkId) -> &mut MediaLink {
        &mut self.links[id.0]
    }

    pub fn entities(&self) -> &[MediaEntity] {
        &self.entities
    }

    pub fn links(&self) -> &[MediaLink] {
        &self.links
    }

    pub fn entity_by_name(&self, name: &str) -> Option<EntityId> {
        self.entities.iter().position(|e| e.name == name).map(EntityId)
    }

    /// All link ids, for link-state sweeps.
    pub fn link_ids(&self) -> impl Iterator<Item = LinkId> {
        (0..self.links.len()).map(LinkId)
    }
}
