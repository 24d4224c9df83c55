// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Pipeline handlers and the request/buffer engine.
//!
//! A pipeline handler is the per-hardware-family plugin owning one pipeline
//! instance: it matches the media graph, registers cameras, and implements
//! the camera operations by programming its device handles. Handlers
//! self-register into a process-wide table through [`register`]; the
//! [`CameraManager`](crate::camera::CameraManager) seeds the table with the
//! built-in handlers and iterates it at enumeration time.
//!
//! The request engine lives in [`CameraData`]: an ordered queue of in-flight
//! requests per camera with FIFO completion. Completion events fan out
//! through the camera's [`CameraSignals`], with every `buffer_completed`
//! emission strictly preceding the owning request's `request_completed`.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::buffer::Buffer;
use crate::event::EventDispatcher;
use crate::media::DeviceEnumerator;
use crate::request::Request;
use crate::signal::{Signal, Signal2};
use crate::stream::{StreamConfiguration, StreamRole};
use crate::Error;

pub mod ipu3;

/// Identifier of one camera within its pipeline handler.
pub type CameraId = usize;

/// The notification sinks of one camera.
///
/// Shared between the camera façade (where clients connect) and the
/// handler's per-camera data (where the engine emits).
pub struct CameraSignals {
    /// Fired once per completed buffer, before the owning request completes.
    pub buffer_completed: Signal2<Request, Buffer>,
    /// Fired once per request, in submission order.
    pub request_completed: Signal<Request>,
}

impl CameraSignals {
    pub fn new() -> Arc<CameraSignals> {
        Arc::new(CameraSignals {
            buffer_completed: Signal2::new(),
            request_completed: Signal::new(),
        })
    }
}

/// Outcome of applying a kernel buffer completion to the queue head.
pub(crate) struct HeadCompletion {
    /// Snapshot of the affected request with updated buffer metadata.
    pub request: Request,
    /// True once every buffer of the request has completed; the request has
    /// then been removed from the queue.
    pub finished: bool,
}

/// Per-camera request queue and completion engine.
#[derive(Default)]
pub struct CameraData {
    queued: VecDeque<Request>,
}

impl CameraData {
    pub fn new() -> CameraData {
        CameraData::default()
    }

    pub fn queued_requests(&self) -> usize {
        self.queued.len()
    }

    pub(crate) fn push(&mut self, request: Request) {
        self.queued.push_back(request);
    }

    /// Apply a completed kernel buffer to the head-of-queue request.
    ///
    /// The kernel completes buffers in submission order, so the completed
    /// buffer must belong to the queue head; a mismatch indicates a pipeline
    /// bug and is diagnosed, then the head is completed regardless.
    pub(crate) fn complete_head(&mut self, stream: usize, buffer: &Buffer) -> Option<HeadCompletion> {
        let head = match self.queued.front_mut() {
            Some(head) => head,
            None => {
                log::error!("buffer {} completed with no queued request", buffer.index());
                return None;
            }
        };

        match head.buffer(stream) {
            Some(own) if own.index() == buffer.index() => {}
            _ => {
                log::error!(
                    "completed buffer {} does not match head request {}",
                    buffer.index(),
                    head.cookie()
                );
                debug_assert!(false, "out-of-order buffer completion");
            }
        }

        let finished = head.complete_buffer(
            stream,
            buffer.bytes_used(),
            buffer.timestamp(),
            buffer.sequence(),
            buffer.status(),
        );

        if finished {
            let mut request = self.queued.pop_front().unwrap();
            request.finish();
            Some(HeadCompletion { request, finished: true })
        } else {
            Some(HeadCompletion { request: head.clone(), finished: false })
        }
    }

    /// Drain the queue, cancelling every request without waiting for kernel
    /// completions. The caller emits the completion signals.
    pub(crate) fn cancel_all(&mut self) -> Vec<Request> {
        let mut cancelled: Vec<Request> = self.queued.drain(..).collect();
        for request in &mut cancelled {
            request.cancel();
        }
        cancelled
    }
}

/// Collects the cameras a handler registers during matching.
pub struct CameraRegistrar {
    cameras: Vec<RegisteredCamera>,
}

pub(crate) struct RegisteredCamera {
    pub name: String,
    pub id: CameraId,
    pub signals: Arc<CameraSignals>,
}

impl CameraRegistrar {
    pub(crate) fn new() -> CameraRegistrar {
        CameraRegistrar { cameras: Vec::new() }
    }

    /// Announce a viable camera. `id` is the handler-local camera index.
    pub fn register(&mut self, name: String, id: CameraId, signals: Arc<CameraSignals>) {
        log::info!("registered camera [{}] \"{}\"", self.cameras.len(), name);
        self.cameras.push(RegisteredCamera { name, id, signals });
    }

    pub(crate) fn take(self) -> Vec<RegisteredCamera> {
        self.cameras
    }
}

/// The camera operations one hardware pipeline implements.
///
/// Methods take the handler-local [`CameraId`] announced at registration.
/// All methods are serialized by the camera façade; `stop` returns the
/// cancelled requests instead of emitting their completions so the façade
/// can fan them out without holding the handler lock.
pub trait PipelineHandler: Send {
    fn name(&self) -> &'static str;

    /// Match the media graph, acquire devices and register cameras.
    /// Returns true if at least one camera was registered.
    fn match_devices(
        &mut self,
        enumerator: &DeviceEnumerator,
        registrar: &mut CameraRegistrar,
    ) -> bool;

    /// Suggested configuration, one entry per requested role.
    fn default_configuration(
        &mut self,
        camera: CameraId,
        roles: &[StreamRole],
    ) -> Result<Vec<StreamConfiguration>, Error>;

    /// Propagate the client configuration through the pipeline stages.
    fn configure(
        &mut self,
        camera: CameraId,
        config: &[StreamConfiguration],
    ) -> Result<(), Error>;

    fn allocate_buffers(&mut self, camera: CameraId) -> Result<(), Error>;

    fn free_buffers(&mut self, camera: CameraId) -> Result<(), Error>;

    /// Hand out a buffer handle for a pool slot of one stream.
    fn create_buffer(
        &mut self,
        camera: CameraId,
        stream: usize,
        index: u32,
    ) -> Result<Buffer, Error>;

    fn start(&mut self, camera: CameraId) -> Result<(), Error>;

    /// Stop streaming and return the requests that were still pending,
    /// already marked cancelled.
    fn stop(&mut self, camera: CameraId) -> Vec<Request>;

    fn queue_request(&mut self, camera: CameraId, request: Request) -> Result<(), Error>;
}

/// Constructor signature for pipeline handler registration.
pub type HandlerFactory = fn(Arc<EventDispatcher>) -> Box<dyn PipelineHandler>;

static REGISTRY: Mutex<Vec<(&'static str, HandlerFactory)>> = Mutex::new(Vec::new());

/// Register a pipeline handler factory in the process-wide table.
///
/// Registration is idempotent per name; the built-in handlers are seeded by
/// the camera manager.
pub fn register(name: &'static str, factory: HandlerFactory) {
    let mut registry = REGISTRY.lock().unwrap();
    if !registry.iter().any(|(n, _)| *n == name) {
        registry.push((name, factory));
    }
}

pub(crate) fn register_builtin() {
    register("ipu3", ipu3::create);
}

pub(crate) fn factories() -> Vec<(&'static str, HandlerFactory)> {
    REGISTRY.lock().unwrap().clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{BufferMemory, BufferPlane, BufferPool, BufferStatus};

    fn pool(count: usize) -> BufferPool {
        let mut pool = BufferPool::new();
        pool.install(
            (0..count)
                .map(|_| Arc::new(BufferMemory::new(vec![BufferPlane::heap(16)])))
                .collect(),
        );
        pool
    }

    fn request_with_buffer(cookie: u64, pool: &BufferPool, index: u32) -> Request {
        let mut request = Request::new(cookie);
        request.add_buffer(0, pool.create_buffer(index).unwrap()).unwrap();
        request
    }

    fn completed(pool: &BufferPool, index: u32, sequence: u32) -> Buffer {
        let mut buffer = pool.create_buffer(index).unwrap();
        buffer.set_result(64, 1000 + u64::from(sequence), sequence, BufferStatus::Success);
        buffer
    }

    #[test]
    fn test_fifo_head_completion() {
        let pool = pool(2);
        let mut data = CameraData::new();
        data.push(request_with_buffer(1, &pool, 0));
        data.push(request_with_buffer(2, &pool, 1));

        let first = data.complete_head(0, &completed(&pool, 0, 0)).unwrap();
        assert!(first.finished);
        assert_eq!(first.request.cookie(), 1);
        assert_eq!(data.queued_requests(), 1);

        let second = data.complete_head(0, &completed(&pool, 1, 1)).unwrap();
        assert_eq!(second.request.cookie(), 2);
        assert_eq!(data.queued_requests(), 0);
    }

    #[test]
    fn test_completion_without_requests_is_diagnosed() {
        let pool = pool(1);
        let mut data = CameraData::new();
        assert!(data.complete_head(0, &completed(&pool, 0, 0)).is_none());
    }

    #[test]
    fn test_cancel_all_marks_requests() {
        let pool = pool(2);
        let mut data = CameraData::new();
        data.push(request_with_buffer(1, &pool, 0));
        data.push(request_with_buffer(2, &pool, 1));

        let cancelled = data.cancel_all();
        assert_eq!(cancelled.len(), 2);
        assert_eq!(data.queued_requests(), 0);
        for request in &cancelled {
            assert_eq!(request.status(), crate::request::RequestStatus::Cancelled);
        }
    }

    #[test]
    fn test_registry_is_idempotent() {
        // The registry is process-wide, so the test factory must stay inert
        // for any camera manager constructed by other tests.
        struct NullHandler;

        impl PipelineHandler for NullHandler {
            fn name(&self) -> &'static str {
                "test-handler"
            }
            fn match_devices(
                &mut self,
                _: &DeviceEnumerator,
                _: &mut CameraRegistrar,
            ) -> bool {
                false
            }
            fn default_configuration(
                &mut self,
                _: CameraId,
                _: &[StreamRole],
            ) -> Result<Vec<StreamConfiguration>, Error> {
                Err(Error::NoDevice)
            }
            fn configure(&mut self, _: CameraId, _: &[StreamConfiguration]) -> Result<(), Error> {
                Err(Error::NoDevice)
            }
            fn allocate_buffers(&mut self, _: CameraId) -> Result<(), Error> {
                Err(Error::NoDevice)
            }
            fn free_buffers(&mut self, _: CameraId) -> Result<(), Error> {
                Err(Error::NoDevice)
            }
            fn create_buffer(&mut self, _: CameraId, _: usize, _: u32) -> Result<Buffer, Error> {
                Err(Error::NoDevice)
            }
            fn start(&mut self, _: CameraId) -> Result<(), Error> {
                Err(Error::NoDevice)
            }
            fn stop(&mut self, _: CameraId) -> Vec<Request> {
                Vec::new()
            }
            fn queue_request(&mut self, _: CameraId, _: Request) -> Result<(), Error> {
                Err(Error::NoDevice)
            }
        }

        fn factory(_: Arc<EventDispatcher>) -> Box<dyn PipelineHandler> {
            Box::new(NullHandler)
        }

        register("test-handler", factory);
        register("test-handler", factory);
        let count =
            factories().iter().filter(|(name, _)| *name == "test-handler").count();
        assert_eq!(count, 1);
    }
}
