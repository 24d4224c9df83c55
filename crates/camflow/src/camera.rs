// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Camera façade and camera manager.
//!
//! [`Camera`] is the public per-camera state machine multiplexing client
//! operations over the owning pipeline handler:
//!
//! ```text
//! Available --acquire--> Acquired --configure--> Configured
//!    ^                      |                       |
//!    |                      |                       v
//!    +----release-----------+                   Prepared --start--> Running
//!                                                   ^                 |
//!                                                   +------stop-------+
//! ```
//!
//! Illegal transitions fail with [`Error::InvalidState`]. The two signals
//! `buffer_completed` and `request_completed` are the camera's only outward
//! notifications.
//!
//! [`CameraManager`] coordinates enumeration: it seeds the pipeline handler
//! registry, matches handlers against the media devices present, and owns
//! the event dispatcher that delivers kernel completions.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::buffer::Buffer;
use crate::event::EventDispatcher;
use crate::media::DeviceEnumerator;
use crate::pipeline::{self, CameraId, CameraRegistrar, CameraSignals, PipelineHandler};
use crate::request::Request;
use crate::signal::{Signal, Signal2};
use crate::stream::{StreamConfiguration, StreamRole};
use crate::Error;

/// Lifecycle state of a camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CameraState {
    Available,
    Acquired,
    Configured,
    Prepared,
    Running,
}

/// The stream set a client asks a camera to run.
#[derive(Debug, Clone)]
pub struct CameraConfiguration {
    pub streams: Vec<StreamConfiguration>,
}

struct CameraInner {
    name: String,
    id: CameraId,
    pipe: Arc<Mutex<Box<dyn PipelineHandler>>>,
    signals: Arc<CameraSignals>,
    state: Mutex<CameraState>,
    config: Mutex<Option<CameraConfiguration>>,
    next_cookie: AtomicU64,
}

/// Public handle to one registered camera.
///
/// Handles are cheap to clone and share the underlying state machine.
#[derive(Clone)]
pub struct Camera {
    inner: Arc<CameraInner>,
}

impl Camera {
    pub(crate) fn new(
        name: String,
        id: CameraId,
        pipe: Arc<Mutex<Box<dyn PipelineHandler>>>,
        signals: Arc<CameraSignals>,
    ) -> Camera {
        Camera {
            inner: Arc::new(CameraInner {
                name,
                id,
                pipe,
                signals,
                state: Mutex::new(CameraState::Available),
                config: Mutex::new(None),
                next_cookie: AtomicU64::new(1),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn state(&self) -> CameraState {
        *self.inner.state.lock().unwrap()
    }

    /// The active configuration, set by the last successful
    /// [`configure`](Camera::configure).
    pub fn configuration(&self) -> Option<CameraConfiguration> {
        self.inner.config.lock().unwrap().clone()
    }

    /// Signal fired once per completed buffer, before the owning request's
    /// `request_completed`.
    pub fn buffer_completed(&self) -> &Signal2<Request, Buffer> {
        &self.inner.signals.buffer_completed
    }

    /// Signal fired once per request, in submission order.
    pub fn request_completed(&self) -> &Signal<Request> {
        &self.inner.signals.request_completed
    }

    /// Take exclusive use of the camera.
    pub fn acquire(&self) -> Result<(), Error> {
        let mut state = self.inner.state.lock().unwrap();
        if *state != CameraState::Available {
            return Err(Error::InvalidState(format!(
                "camera {} cannot be acquired while {:?}",
                self.inner.name, *state
            )));
        }
        *state = CameraState::Acquired;
        Ok(())
    }

    /// Give the camera back. Legal from any state except Running.
    pub fn release(&self) -> Result<(), Error> {
        let mut state = self.inner.state.lock().unwrap();
        if *state == CameraState::Running {
            return Err(Error::InvalidState(format!(
                "camera {} cannot be released while running",
                self.inner.name
            )));
        }
        *state = CameraState::Available;
        Ok(())
    }

    /// Produce sensible configuration defaults for the requested roles.
    pub fn generate_configuration(
        &self,
        roles: &[StreamRole],
    ) -> Result<CameraConfiguration, Error> {
        let streams =
            self.inner.pipe.lock().unwrap().default_configuration(self.inner.id, roles)?;
        Ok(CameraConfiguration { streams })
    }

    /// Apply a configuration to the pipeline.
    ///
    /// On failure the device-side formats are unspecified and the camera
    /// stays in its previous state; reconfigure before streaming.
    pub fn configure(&self, config: &CameraConfiguration) -> Result<(), Error> {
        let mut state = self.inner.state.lock().unwrap();
        if !matches!(*state, CameraState::Acquired | CameraState::Configured) {
            return Err(Error::InvalidState(format!(
                "camera {} cannot be configured while {:?}",
                self.inner.name, *state
            )));
        }

        self.inner.pipe.lock().unwrap().configure(self.inner.id, &config.streams)?;

        *self.inner.config.lock().unwrap() = Some(config.clone());
        *state = CameraState::Configured;
        Ok(())
    }

    /// Allocate and export the stream buffers.
    pub fn allocate_buffers(&self) -> Result<(), Error> {
        let mut state = self.inner.state.lock().unwrap();
        if *state != CameraState::Configured {
            return Err(Error::InvalidState(format!(
                "camera {} has no configuration to allocate for",
                self.inner.name
            )));
        }

        self.inner.pipe.lock().unwrap().allocate_buffers(self.inner.id)?;
        *state = CameraState::Prepared;
        Ok(())
    }

    /// Release the stream buffers.
    pub fn free_buffers(&self) -> Result<(), Error> {
        let mut state = self.inner.state.lock().unwrap();
        if *state != CameraState::Prepared {
            return Err(Error::InvalidState(format!(
                "camera {} has no buffers to free",
                self.inner.name
            )));
        }

        self.inner.pipe.lock().unwrap().free_buffers(self.inner.id)?;
        *state = CameraState::Configured;
        Ok(())
    }

    /// Create an empty capture request.
    pub fn create_request(&self) -> Result<Request, Error> {
        let state = *self.inner.state.lock().unwrap();
        if !matches!(state, CameraState::Prepared | CameraState::Running) {
            return Err(Error::InvalidState(format!(
                "camera {} cannot create requests while {:?}",
                self.inner.name, state
            )));
        }
        Ok(Request::new(self.inner.next_cookie.fetch_add(1, Ordering::Relaxed)))
    }

    /// Hand out a buffer handle for pool slot `index` of the single stream.
    pub fn create_buffer(&self, index: u32) -> Result<Buffer, Error> {
        self.create_buffer_for(0, index)
    }

    /// Hand out a buffer handle for pool slot `index` of stream `stream`.
    pub fn create_buffer_for(&self, stream: usize, index: u32) -> Result<Buffer, Error> {
        let state = *self.inner.state.lock().unwrap();
        if !matches!(state, CameraState::Prepared | CameraState::Running) {
            return Err(Error::InvalidState(format!(
                "camera {} has no buffers while {:?}",
                self.inner.name, state
            )));
        }
        self.inner.pipe.lock().unwrap().create_buffer(self.inner.id, stream, index)
    }

    /// Start streaming.
    pub fn start(&self) -> Result<(), Error> {
        let mut state = self.inner.state.lock().unwrap();
        if *state != CameraState::Prepared {
            return Err(Error::InvalidState(format!(
                "camera {} cannot start while {:?}",
                self.inner.name, *state
            )));
        }

        match self.inner.pipe.lock().unwrap().start(self.inner.id) {
            Ok(()) => {
                *state = CameraState::Running;
                Ok(())
            }
            Err(err) => {
                // A fatal device failure invalidates the whole session; the
                // camera falls back to Available and must be reacquired.
                if matches!(err, Error::Io(_)) {
                    *state = CameraState::Available;
                }
                Err(err)
            }
        }
    }

    /// Stop streaming.
    ///
    /// Every request still pending completes with `RequestCancelled` before
    /// this returns; no completion for a prior request is observed
    /// afterwards.
    pub fn stop(&self) -> Result<(), Error> {
        {
            let mut state = self.inner.state.lock().unwrap();
            if *state != CameraState::Running {
                return Err(Error::InvalidState(format!(
                    "camera {} is not running",
                    self.inner.name
                )));
            }
            // Leave Running before the cancellations fan out so re-entrant
            // queue_request calls from completion slots are rejected.
            *state = CameraState::Prepared;
        }

        let cancelled = self.inner.pipe.lock().unwrap().stop(self.inner.id);
        for request in cancelled {
            for (_, buffer) in request.buffers() {
                self.inner.signals.buffer_completed.emit(&request, buffer);
            }
            self.inner.signals.request_completed.emit(&request);
        }
        Ok(())
    }

    /// Submit a capture request. Requires the camera to be running.
    pub fn queue_request(&self, request: Request) -> Result<(), Error> {
        let state = *self.inner.state.lock().unwrap();
        if state != CameraState::Running {
            return Err(Error::InvalidState(format!(
                "camera {} cannot queue requests while {:?}",
                self.inner.name, state
            )));
        }

        let result = self.inner.pipe.lock().unwrap().queue_request(self.inner.id, request);
        if let Err(Error::Io(_)) = &result {
            // The device went away under us; the camera is gone until the
            // client reacquires it.
            *self.inner.state.lock().unwrap() = CameraState::Available;
        }
        result
    }
}

impl std::fmt::Debug for Camera {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Camera")
            .field("name", &self.inner.name)
            .field("state", &self.state())
            .finish()
    }
}

/// Coordinates pipeline handler matching and owns the event dispatcher.
///
/// The manager is explicitly constructed by the application; it is not a
/// hidden singleton. Completions are delivered while the dispatcher is
/// driven, either through [`process_events`](CameraManager::process_events)
/// or by handing [`dispatcher`](CameraManager::dispatcher) to a dedicated
/// thread.
pub struct CameraManager {
    dispatcher: Arc<EventDispatcher>,
    handlers: Vec<Arc<Mutex<Box<dyn PipelineHandler>>>>,
    cameras: Vec<Camera>,
    started: bool,
}

impl CameraManager {
    pub fn new() -> CameraManager {
        pipeline::register_builtin();
        CameraManager {
            dispatcher: Arc::new(EventDispatcher::new()),
            handlers: Vec::new(),
            cameras: Vec::new(),
            started: false,
        }
    }

    /// Enumerate the system's media devices and register cameras.
    pub fn start(&mut self) -> Result<(), Error> {
        let enumerator = DeviceEnumerator::system()?;
        self.start_with(enumerator)
    }

    /// Register cameras from an explicit enumerator (used with the
    /// synthetic backend).
    pub fn start_with(&mut self, enumerator: DeviceEnumerator) -> Result<(), Error> {
        if self.started {
            return Err(Error::Busy);
        }

        for (name, factory) in pipeline::factories() {
            let mut handler = factory(self.dispatcher.clone());
            let mut registrar = CameraRegistrar::new();
            if !handler.match_devices(&enumerator, &mut registrar) {
                continue;
            }

            log::debug!("pipeline handler {} matched", name);
            let pipe = Arc::new(Mutex::new(handler));
            for registered in registrar.take() {
                self.cameras.push(Camera::new(
                    registered.name,
                    registered.id,
                    pipe.clone(),
                    registered.signals,
                ));
            }
            self.handlers.push(pipe);
        }

        self.started = true;
        log::info!("camera manager started with {} cameras", self.cameras.len());
        Ok(())
    }

    /// Drop all cameras and handlers; matched media devices are released.
    pub fn stop(&mut self) {
        self.cameras.clear();
        self.handlers.clear();
        self.started = false;
    }

    /// All registered cameras, in registration order.
    pub fn cameras(&self) -> &[Camera] {
        &self.cameras
    }

    /// Look up a camera by name.
    pub fn get(&self, name: &str) -> Option<Camera> {
        self.cameras.iter().find(|cam| cam.name() == name).cloned()
    }

    pub fn dispatcher(&self) -> &Arc<EventDispatcher> {
        &self.dispatcher
    }

    /// Run one iteration of the event loop.
    pub fn process_events(&self, timeout: Option<Duration>) -> Result<(), Error> {
        self.dispatcher.process_events(timeout)
    }
}

impl Default for CameraManager {
    fn default() -> CameraManager {
        CameraManager::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Size;
    use crate::sim::{ipu3_enumerator, SimSensor};

    fn managed_camera() -> (CameraManager, Camera) {
        let (enumerator, _hub) =
            ipu3_enumerator(&[SimSensor::bayer("ov13858", Size::new(4224, 3136))]);
        let mut manager = CameraManager::new();
        manager.start_with(enumerator).unwrap();
        let camera = manager.cameras().first().cloned().unwrap();
        (manager, camera)
    }

    #[test]
    fn test_manager_registers_and_finds_camera() {
        let (manager, camera) = managed_camera();
        assert_eq!(camera.name(), "ov13858 0");
        assert!(manager.get("ov13858 0").is_some());
        assert!(manager.get("missing").is_none());
    }

    #[test]
    fn test_state_machine_happy_path() {
        let (_manager, camera) = managed_camera();
        assert_eq!(camera.state(), CameraState::Available);

        camera.acquire().unwrap();
        assert_eq!(camera.state(), CameraState::Acquired);

        let config = camera.generate_configuration(&[StreamRole::VideoRecording]).unwrap();
        camera.configure(&config).unwrap();
        assert_eq!(camera.state(), CameraState::Configured);

        camera.allocate_buffers().unwrap();
        assert_eq!(camera.state(), CameraState::Prepared);

        camera.start().unwrap();
        assert_eq!(camera.state(), CameraState::Running);

        camera.stop().unwrap();
        assert_eq!(camera.state(), CameraState::Prepared);

        camera.free_buffers().unwrap();
        camera.release().unwrap();
        assert_eq!(camera.state(), CameraState::Available);
    }

    #[test]
    fn test_illegal_transitions_fail() {
        let (_manager, camera) = managed_camera();

        assert!(matches!(camera.start(), Err(Error::InvalidState(_))));
        assert!(matches!(camera.allocate_buffers(), Err(Error::InvalidState(_))));
        assert!(matches!(camera.create_request(), Err(Error::InvalidState(_))));

        camera.acquire().unwrap();
        assert!(matches!(camera.acquire(), Err(Error::InvalidState(_))));
        assert!(matches!(camera.start(), Err(Error::InvalidState(_))));

        let config = camera.generate_configuration(&[StreamRole::Viewfinder]).unwrap();
        camera.configure(&config).unwrap();
        camera.allocate_buffers().unwrap();
        camera.start().unwrap();
        assert!(matches!(camera.release(), Err(Error::InvalidState(_))));
        camera.stop().unwrap();
    }

    #[test]
    fn test_failed_configure_keeps_state() {
        let (_manager, camera) = managed_camera();
        camera.acquire().unwrap();

        let bad = CameraConfiguration {
            streams: vec![StreamConfiguration {
                width: 10,
                height: 4,
                pixel_format: crate::fourcc::FourCC::IPU3_SGRBG10,
                buffer_count: 4,
            }],
        };
        assert!(matches!(camera.configure(&bad), Err(Error::InvalidArgument(_))));
        assert_eq!(camera.state(), CameraState::Acquired);
        assert!(camera.configuration().is_none());
    }

    #[test]
    fn test_queue_request_requires_running() {
        let (_manager, camera) = managed_camera();
        camera.acquire().unwrap();
        let config = camera.generate_configuration(&[StreamRole::VideoRecording]).unwrap();
        camera.configure(&config).unwrap();
        camera.allocate_buffers().unwrap();

        let request = camera.create_request().unwrap();
        assert!(matches!(camera.queue_request(request), Err(Error::InvalidState(_))));
    }

    #[test]
    fn test_manager_restart_cycle() {
        let (enumerator, _hub) =
            ipu3_enumerator(&[SimSensor::bayer("imx258", Size::new(4208, 3120))]);
        let mut manager = CameraManager::new();
        manager.start_with(enumerator).unwrap();
        assert_eq!(manager.cameras().len(), 1);

        let (other, _hub) = ipu3_enumerator(&[]);
        assert!(matches!(manager.start_with(other), Err(Error::Busy)));

        manager.stop();
        assert!(manager.cameras().is_empty());
    }
}
