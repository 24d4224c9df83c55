// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! V4L2 compatibility front-end.
//!
//! [`V4l2CompatCamera`] wraps one [`Camera`] as a single-stream capture
//! target with the kernel's streaming buffer protocol semantics: clients
//! queue buffers by pool index, dequeue completed frame metadata, and map
//! buffer memory, as they would against a native video node.
//!
//! The front-end keeps a FIFO of submitted requests and a FIFO of completed
//! frame metadata, both behind one mutex, plus a counting semaphore whose
//! value tracks the buffers currently owned by client space.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};

use crate::buffer::{Buffer, BufferStatus};
use crate::camera::{Camera, CameraConfiguration};
use crate::fourcc::FourCC;
use crate::geometry::Size;
use crate::request::Request;
use crate::stream::StreamConfiguration;
use crate::Error;

/// Immutable snapshot of one completed frame.
#[derive(Debug, Clone, Copy)]
pub struct FrameMetadata {
    index: u32,
    bytes_used: u32,
    timestamp: u64,
    sequence: u32,
    status: BufferStatus,
}

impl FrameMetadata {
    fn from_buffer(buffer: &Buffer) -> FrameMetadata {
        FrameMetadata {
            index: buffer.index(),
            bytes_used: buffer.bytes_used(),
            timestamp: buffer.timestamp(),
            sequence: buffer.sequence(),
            status: buffer.status(),
        }
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn bytes_used(&self) -> u32 {
        self.bytes_used
    }

    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    pub fn sequence(&self) -> u32 {
        self.sequence
    }

    pub fn status(&self) -> BufferStatus {
        self.status
    }
}

/// Counting semaphore.
///
/// [`acquire`](Semaphore::acquire) is the front-end's only blocking wait.
pub struct Semaphore {
    count: Mutex<usize>,
    cond: Condvar,
}

impl Semaphore {
    pub fn new(count: usize) -> Semaphore {
        Semaphore { count: Mutex::new(count), cond: Condvar::new() }
    }

    pub fn available(&self) -> usize {
        *self.count.lock().unwrap()
    }

    /// Block until `n` units are available, then take them.
    pub fn acquire(&self, n: usize) {
        let mut count = self.count.lock().unwrap();
        while *count < n {
            count = self.cond.wait(count).unwrap();
        }
        *count -= n;
    }

    /// Take `n` units without blocking; false if unavailable.
    pub fn try_acquire(&self, n: usize) -> bool {
        let mut count = self.count.lock().unwrap();
        if *count < n {
            return false;
        }
        *count -= n;
        true
    }

    pub fn release(&self, n: usize) {
        let mut count = self.count.lock().unwrap();
        *count += n;
        self.cond.notify_all();
    }

    fn reset(&self, n: usize) {
        *self.count.lock().unwrap() = n;
        self.cond.notify_all();
    }
}

#[derive(Default)]
struct CompatState {
    is_running: bool,
    pending: VecDeque<u64>,
    completed: VecDeque<FrameMetadata>,
}

struct CompatInner {
    camera: Camera,
    sema: Semaphore,
    state: Mutex<CompatState>,
}

/// Re-exposes one framework camera through V4L2 streaming semantics.
pub struct V4l2CompatCamera {
    inner: Arc<CompatInner>,
}

impl V4l2CompatCamera {
    pub fn new(camera: Camera) -> V4l2CompatCamera {
        let inner = Arc::new(CompatInner {
            camera: camera.clone(),
            sema: Semaphore::new(0),
            state: Mutex::new(CompatState::default()),
        });

        let weak = Arc::downgrade(&inner);
        camera.request_completed().connect(move |request: &Request| {
            if let Some(inner) = weak.upgrade() {
                inner.request_complete(request);
            }
        });

        V4l2CompatCamera { inner }
    }

    /// Acquire the underlying camera.
    pub fn open(&self) -> Result<(), Error> {
        self.inner.camera.acquire()
    }

    /// Release the underlying camera.
    pub fn close(&self) {
        if let Err(err) = self.inner.camera.release() {
            log::warn!("close: {}", err);
        }
    }

    /// The camera's current single stream configuration.
    pub fn get_stream_config(&self) -> Result<StreamConfiguration, Error> {
        self.inner
            .camera
            .configuration()
            .and_then(|config| config.streams.first().copied())
            .ok_or_else(|| Error::InvalidState("camera is not configured".into()))
    }

    /// Configure the camera; returns the driver-adjusted configuration.
    pub fn configure(
        &self,
        size: Size,
        pixel_format: FourCC,
        buffer_count: u32,
    ) -> Result<StreamConfiguration, Error> {
        let config = CameraConfiguration {
            streams: vec![StreamConfiguration {
                width: size.width,
                height: size.height,
                pixel_format,
                buffer_count,
            }],
        };
        self.inner.camera.configure(&config)?;
        self.get_stream_config()
    }

    /// Allocate and export `count` buffers. All buffers start client-owned:
    /// the semaphore counter is initialized to `count`.
    pub fn alloc_buffers(&self, count: u32) -> Result<(), Error> {
        let mut config = self
            .inner
            .camera
            .configuration()
            .ok_or_else(|| Error::InvalidState("camera is not configured".into()))?;

        if config.streams[0].buffer_count != count {
            config.streams[0].buffer_count = count;
            self.inner.camera.configure(&config)?;
        }
        self.inner.camera.allocate_buffers()?;

        let mut state = self.inner.state.lock().unwrap();
        state.pending.clear();
        state.completed.clear();
        drop(state);
        self.inner.sema.reset(count as usize);
        Ok(())
    }

    /// Free the buffers. Requires streaming stopped and no in-flight
    /// requests.
    pub fn free_buffers(&self) -> Result<(), Error> {
        {
            let state = self.inner.state.lock().unwrap();
            if state.is_running || !state.pending.is_empty() {
                return Err(Error::Busy);
            }
        }
        self.inner.camera.free_buffers()
    }

    /// Map the memory of the buffer at pool `index`.
    pub fn mmap(&self, index: u32) -> Result<*mut u8, Error> {
        let buffer = self.inner.camera.create_buffer(index)?;
        let plane = buffer
            .planes()
            .first()
            .ok_or_else(|| Error::invalid(format!("buffer {} has no planes", index)))?;
        Ok(plane.as_ptr())
    }

    /// Queue the buffer at pool `index` for capture.
    ///
    /// Takes one unit from the buffer semaphore: the buffer leaves client
    /// ownership until its completion returns it.
    pub fn qbuf(&self, index: u32) -> Result<(), Error> {
        let mut request = self.inner.camera.create_request()?;
        request.add_buffer(0, self.inner.camera.create_buffer(index)?)?;
        let cookie = request.cookie();

        self.inner.sema.acquire(1);

        // Record the cookie before submitting: the completion may fire from
        // the dispatcher thread before queue_request returns.
        self.inner.state.lock().unwrap().pending.push_back(cookie);

        if let Err(err) = self.inner.camera.queue_request(request) {
            self.inner.state.lock().unwrap().pending.retain(|c| *c != cookie);
            self.inner.sema.release(1);
            return Err(err);
        }
        Ok(())
    }

    pub fn stream_on(&self) -> Result<(), Error> {
        self.inner.camera.start()?;
        self.inner.state.lock().unwrap().is_running = true;
        Ok(())
    }

    /// Stop streaming. Pending requests drain to cancellation; their frame
    /// metadata lands in the completed queue with `Cancelled` status so
    /// waiting consumers unblock.
    pub fn stream_off(&self) -> Result<(), Error> {
        let was_running = {
            let state = self.inner.state.lock().unwrap();
            state.is_running
        };

        if was_running {
            // stop() completes every pending request with RequestCancelled;
            // the completion slot files their metadata as it runs.
            self.inner.camera.stop()?;
        }

        self.inner.state.lock().unwrap().is_running = false;
        Ok(())
    }

    /// Drain and return all completed frame metadata entries.
    pub fn completed_buffers(&self) -> Vec<FrameMetadata> {
        self.inner.state.lock().unwrap().completed.drain(..).collect()
    }

    /// Number of buffers currently owned by client space.
    pub fn buffers_available(&self) -> usize {
        self.inner.sema.available()
    }

    /// Number of requests submitted and not yet completed.
    pub fn pending_requests(&self) -> usize {
        self.inner.state.lock().unwrap().pending.len()
    }
}

impl CompatInner {
    fn request_complete(&self, request: &Request) {
        let mut state = self.state.lock().unwrap();

        match state.pending.pop_front() {
            Some(cookie) if cookie == request.cookie() => {}
            Some(cookie) => {
                log::error!(
                    "request {} completed while {} was the queue head",
                    request.cookie(),
                    cookie
                );
                debug_assert!(false, "request completion out of submission order");
            }
            None => {
                log::error!("request {} completed with none pending", request.cookie());
                return;
            }
        }

        if let Some(buffer) = request.buffer(0) {
            state.completed.push_back(FrameMetadata::from_buffer(buffer));
        }
        drop(state);

        // One more buffer is back in client hands.
        self.sema.release(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_semaphore_counts() {
        let sema = Semaphore::new(2);
        assert_eq!(sema.available(), 2);
        assert!(sema.try_acquire(1));
        assert!(sema.try_acquire(1));
        assert!(!sema.try_acquire(1));

        sema.release(1);
        assert_eq!(sema.available(), 1);
    }

    #[test]
    fn test_semaphore_acquire_blocks_until_release() {
        let sema = Arc::new(Semaphore::new(0));
        let acquired = Arc::new(AtomicBool::new(false));

        let thread_sema = sema.clone();
        let thread_acquired = acquired.clone();
        let handle = thread::spawn(move || {
            thread_sema.acquire(1);
            thread_acquired.store(true, Ordering::SeqCst);
        });

        thread::sleep(Duration::from_millis(20));
        assert!(!acquired.load(Ordering::SeqCst));

        sema.release(1);
        handle.join().unwrap();
        assert!(acquired.load(Ordering::SeqCst));
    }
}
