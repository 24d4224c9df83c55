// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Frame buffers and buffer pools.
//!
//! A [`BufferPool`] owns a fixed-count set of frame buffers tied to one
//! stream. Pool slots are installed when a video node exports its kernel
//! buffers; [`BufferPool::create_buffer`] hands out an owned [`Buffer`]
//! handle referring to a slot by index. The pool conservatively tracks how
//! many buffers are queued in the kernel and refuses to release while any
//! are in flight.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use crate::Error;

/// Completion status of a captured frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferStatus {
    /// The frame completed with valid data.
    Success,
    /// The kernel reported a capture error for this frame.
    Error,
    /// The frame was cancelled before completion.
    Cancelled,
}

enum Backing {
    Heap(#[allow(dead_code)] Box<[u8]>),
    Mmap,
}

/// One contiguous plane of frame memory.
pub struct BufferPlane {
    ptr: *mut u8,
    len: usize,
    backing: Backing,
}

// The plane memory is handed between the kernel and exactly one frame
// owner at a time; the request/buffer engine serializes that handoff.
unsafe impl Send for BufferPlane {}
unsafe impl Sync for BufferPlane {}

impl BufferPlane {
    /// Allocate a zeroed heap-backed plane.
    pub(crate) fn heap(len: usize) -> BufferPlane {
        let mut data = vec![0u8; len].into_boxed_slice();
        let ptr = data.as_mut_ptr();
        BufferPlane { ptr, len, backing: Backing::Heap(data) }
    }

    /// Map `len` bytes of a driver-exported buffer at `offset`.
    pub(crate) fn mmap(fd: i32, offset: i64, len: usize) -> Result<BufferPlane, std::io::Error> {
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                offset,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(std::io::Error::last_os_error());
        }
        Ok(BufferPlane { ptr: ptr as *mut u8, len, backing: Backing::Mmap })
    }

    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// View the plane contents. Valid between dequeue and requeue of the
    /// owning buffer.
    pub fn mapped(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.ptr, self.len) }
    }
}

impl Drop for BufferPlane {
    fn drop(&mut self) {
        if let Backing::Mmap = self.backing {
            unsafe {
                libc::munmap(self.ptr as *mut libc::c_void, self.len);
            }
        }
    }
}

/// The memory planes of one pool slot.
pub struct BufferMemory {
    planes: Vec<BufferPlane>,
}

impl BufferMemory {
    pub(crate) fn new(planes: Vec<BufferPlane>) -> BufferMemory {
        BufferMemory { planes }
    }

    pub fn planes(&self) -> &[BufferPlane] {
        &self.planes
    }
}

/// A single frame: pool slot reference plus completion metadata.
///
/// A buffer is owned by exactly one pool; handles borrow a slot for the
/// duration of a request and carry the completion metadata once the kernel
/// returns the frame.
#[derive(Clone)]
pub struct Buffer {
    index: u32,
    bytes_used: u32,
    timestamp: u64,
    sequence: u32,
    status: BufferStatus,
    mem: Arc<BufferMemory>,
}

impl Buffer {
    pub(crate) fn new(index: u32, mem: Arc<BufferMemory>) -> Buffer {
        Buffer {
            index,
            bytes_used: 0,
            timestamp: 0,
            sequence: 0,
            status: BufferStatus::Success,
            mem,
        }
    }

    /// Pool slot index.
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Bytes of payload produced by the kernel.
    pub fn bytes_used(&self) -> u32 {
        self.bytes_used
    }

    /// Capture timestamp in nanoseconds.
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    /// Kernel frame sequence number.
    pub fn sequence(&self) -> u32 {
        self.sequence
    }

    pub fn status(&self) -> BufferStatus {
        self.status
    }

    pub fn planes(&self) -> &[BufferPlane] {
        self.mem.planes()
    }

    pub(crate) fn set_result(
        &mut self,
        bytes_used: u32,
        timestamp: u64,
        sequence: u32,
        status: BufferStatus,
    ) {
        self.bytes_used = bytes_used;
        self.timestamp = timestamp;
        self.sequence = sequence;
        self.status = status;
    }

    pub(crate) fn cancel(&mut self) {
        self.status = BufferStatus::Cancelled;
    }
}

impl std::fmt::Debug for Buffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buffer")
            .field("index", &self.index)
            .field("bytes_used", &self.bytes_used)
            .field("sequence", &self.sequence)
            .field("status", &self.status)
            .finish()
    }
}

/// Tracks how many pool buffers are queued in the kernel.
#[derive(Default)]
pub(crate) struct PoolTracker {
    queued: AtomicU32,
}

impl PoolTracker {
    pub(crate) fn mark_queued(&self) {
        self.queued.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn mark_done(&self) {
        let prev = self.queued.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "buffer completion without a queued buffer");
    }

    pub(crate) fn reset(&self) {
        self.queued.store(0, Ordering::Release);
    }

    pub(crate) fn queued(&self) -> u32 {
        self.queued.load(Ordering::Acquire)
    }
}

/// Fixed-size, index-addressable collection of frame buffers.
pub struct BufferPool {
    slots: Vec<Arc<BufferMemory>>,
    tracker: Arc<PoolTracker>,
}

impl BufferPool {
    pub fn new() -> BufferPool {
        BufferPool { slots: Vec::new(), tracker: Arc::new(PoolTracker::default()) }
    }

    /// Install driver-exported memory into the pool slots.
    pub(crate) fn install(&mut self, mems: Vec<Arc<BufferMemory>>) {
        self.slots = mems;
        self.tracker.reset();
    }

    pub fn count(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Number of buffers currently queued in the kernel.
    pub fn in_flight(&self) -> u32 {
        self.tracker.queued()
    }

    pub(crate) fn tracker(&self) -> Arc<PoolTracker> {
        self.tracker.clone()
    }

    /// Hand out an owned buffer handle for slot `index`.
    pub fn create_buffer(&self, index: u32) -> Result<Buffer, Error> {
        let mem = self
            .slots
            .get(index as usize)
            .ok_or_else(|| Error::invalid(format!("buffer index {} out of range", index)))?;
        Ok(Buffer::new(index, mem.clone()))
    }

    /// Tear down all buffers. Fails with [`Error::Busy`] while any buffer
    /// is still queued in the kernel.
    pub fn release(&mut self) -> Result<(), Error> {
        if self.tracker.queued() > 0 {
            return Err(Error::Busy);
        }
        self.slots.clear();
        Ok(())
    }
}

impl Default for BufferPool {
    fn default() -> BufferPool {
        BufferPool::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool_with(count: usize, plane_len: usize) -> BufferPool {
        let mut pool = BufferPool::new();
        let mems = (0..count)
            .map(|_| Arc::new(BufferMemory::new(vec![BufferPlane::heap(plane_len)])))
            .collect();
        pool.install(mems);
        pool
    }

    #[test]
    fn test_create_buffer_bounds() {
        let pool = pool_with(4, 16);
        assert_eq!(pool.count(), 4);
        assert!(pool.create_buffer(3).is_ok());
        assert!(matches!(pool.create_buffer(4), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_release_fails_while_in_flight() {
        let mut pool = pool_with(2, 16);
        let tracker = pool.tracker();

        tracker.mark_queued();
        assert!(matches!(pool.release(), Err(Error::Busy)));

        tracker.mark_done();
        pool.release().unwrap();
        assert!(pool.is_empty());
    }

    #[test]
    fn test_buffer_metadata_defaults() {
        let pool = pool_with(1, 16);
        let buf = pool.create_buffer(0).unwrap();
        assert_eq!(buf.index(), 0);
        assert_eq!(buf.bytes_used(), 0);
        assert_eq!(buf.sequence(), 0);
        assert_eq!(buf.status(), BufferStatus::Success);
        assert_eq!(buf.planes().len(), 1);
        assert_eq!(buf.planes()[0].len(), 16);
    }

    #[test]
    fn test_buffer_result_update() {
        let pool = pool_with(1, 16);
        let mut buf = pool.create_buffer(0).unwrap();
        buf.set_result(16, 1_000_000, 7, BufferStatus::Error);
        assert_eq!(buf.bytes_used(), 16);
        assert_eq!(buf.timestamp(), 1_000_000);
        assert_eq!(buf.sequence(), 7);
        assert_eq!(buf.status(), BufferStatus::Error);

        buf.cancel();
        assert_eq!(buf.status(), BufferStatus::Cancelled);
    }

    #[test]
    fn test_plane_is_zeroed_and_writable() {
        let plane = BufferPlane::heap(8);
        assert_eq!(plane.mapped(), &[0u8; 8]);
        unsafe { *plane.as_ptr() = 0xAB };
        assert_eq!(plane.mapped()[0], 0xAB);
    }
}
