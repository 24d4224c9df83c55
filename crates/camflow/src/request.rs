// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Capture requests.

use std::collections::BTreeMap;

use crate::buffer::{Buffer, BufferStatus};
use crate::Error;

/// Completion status of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestStatus {
    /// Enqueued, awaiting its buffers.
    Pending,
    /// Every constituent buffer finished successfully.
    Complete,
    /// The request was cancelled, or a buffer completed in error.
    Cancelled,
}

/// A client-constructed capture transaction.
///
/// A request borrows one buffer per stream for the duration of the
/// transaction; the camera completes it once every buffer has finished,
/// in submission order.
#[derive(Clone)]
pub struct Request {
    cookie: u64,
    buffers: BTreeMap<usize, Buffer>,
    pending: usize,
    status: RequestStatus,
}

impl Request {
    pub(crate) fn new(cookie: u64) -> Request {
        Request { cookie, buffers: BTreeMap::new(), pending: 0, status: RequestStatus::Pending }
    }

    /// Opaque identifier assigned at creation, unique per camera.
    pub fn cookie(&self) -> u64 {
        self.cookie
    }

    pub fn status(&self) -> RequestStatus {
        self.status
    }

    /// Attach `buffer` as the payload for stream index `stream`.
    pub fn add_buffer(&mut self, stream: usize, buffer: Buffer) -> Result<(), Error> {
        if self.buffers.contains_key(&stream) {
            return Err(Error::invalid(format!("stream {} already has a buffer", stream)));
        }
        self.buffers.insert(stream, buffer);
        self.pending += 1;
        Ok(())
    }

    /// The buffer attached for stream index `stream`, if any.
    pub fn buffer(&self, stream: usize) -> Option<&Buffer> {
        self.buffers.get(&stream)
    }

    pub fn buffers(&self) -> impl Iterator<Item = (usize, &Buffer)> {
        self.buffers.iter().map(|(k, v)| (*k, v))
    }

    /// Record the completion of the buffer for `stream` and return true
    /// when this was the last outstanding buffer.
    pub(crate) fn complete_buffer(
        &mut self,
        stream: usize,
        bytes_used: u32,
        timestamp: u64,
        sequence: u32,
        status: BufferStatus,
    ) -> bool {
        if let Some(buffer) = self.buffers.get_mut(&stream) {
            buffer.set_result(bytes_used, timestamp, sequence, status);
            if status != BufferStatus::Success {
                self.status = RequestStatus::Cancelled;
            }
            self.pending = self.pending.saturating_sub(1);
        }
        self.pending == 0
    }

    /// Finalize the request status once all buffers have completed.
    pub(crate) fn finish(&mut self) {
        if self.status == RequestStatus::Pending {
            self.status = RequestStatus::Complete;
        }
    }

    /// Cancel every outstanding buffer and the request itself.
    pub(crate) fn cancel(&mut self) {
        for buffer in self.buffers.values_mut() {
            buffer.cancel();
        }
        self.pending = 0;
        self.status = RequestStatus::Cancelled;
    }
}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Request")
            .field("cookie", &self.cookie)
            .field("streams", &self.buffers.len())
            .field("status", &self.status)
            .finish()
    }
}
