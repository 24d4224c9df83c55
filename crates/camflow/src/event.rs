// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Event dispatching and timers.
//!
//! The [`EventDispatcher`] is the framework's only waiting primitive: it
//! polls registered file-descriptor notifiers for readiness and fires
//! single-shot [`Timer`]s whose deadline has passed. The camera manager
//! thread drives it with [`EventDispatcher::process_events`]; tests drive it
//! the same way from the test thread.

use std::io;
use std::os::fd::RawFd;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};

use crate::signal::Signal;
use crate::Error;

/// Token identifying a registered fd notifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotifierId(u64);

struct Notifier {
    id: NotifierId,
    fd: RawFd,
    callback: Arc<dyn Fn() + Send + Sync>,
}

#[derive(Default)]
struct DispatcherState {
    notifiers: Vec<Notifier>,
    timers: Vec<Weak<TimerState>>,
}

/// Poll-based readiness loop over fd notifiers and single-shot timers.
pub struct EventDispatcher {
    state: Mutex<DispatcherState>,
    next_id: AtomicU64,
}

impl EventDispatcher {
    pub fn new() -> EventDispatcher {
        EventDispatcher { state: Mutex::new(DispatcherState::default()), next_id: AtomicU64::new(1) }
    }

    /// Register `callback` to run whenever `fd` reports read readiness.
    pub fn register_notifier<F>(&self, fd: RawFd, callback: F) -> NotifierId
    where
        F: Fn() + Send + Sync + 'static,
    {
        let id = NotifierId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.state.lock().unwrap().notifiers.push(Notifier {
            id,
            fd,
            callback: Arc::new(callback),
        });
        id
    }

    pub fn unregister_notifier(&self, id: NotifierId) {
        self.state.lock().unwrap().notifiers.retain(|n| n.id != id);
    }

    fn register_timer(&self, timer: &Arc<TimerState>) {
        let mut state = self.state.lock().unwrap();
        state.timers.retain(|t| t.strong_count() > 0);
        if !state.timers.iter().any(|t| t.as_ptr() == Arc::as_ptr(timer)) {
            state.timers.push(Arc::downgrade(timer));
        }
    }

    /// Run one iteration of the event loop.
    ///
    /// Blocks until a notifier fd becomes readable, a timer expires, or
    /// `timeout` elapses (`None` waits for the next event with no cap).
    /// Returns after dispatching whatever became ready.
    pub fn process_events(&self, timeout: Option<Duration>) -> Result<(), Error> {
        let now = Instant::now();

        let (mut pollfds, callbacks, timer_deadline) = {
            let state = self.state.lock().unwrap();
            let pollfds: Vec<libc::pollfd> = state
                .notifiers
                .iter()
                .map(|n| libc::pollfd { fd: n.fd, events: libc::POLLIN, revents: 0 })
                .collect();
            let callbacks: Vec<_> =
                state.notifiers.iter().map(|n| (n.fd, n.callback.clone())).collect();
            let deadline = state
                .timers
                .iter()
                .filter_map(|t| t.upgrade())
                .filter_map(|t| *t.deadline.lock().unwrap())
                .min();
            (pollfds, callbacks, deadline)
        };

        let wait = match (timeout, timer_deadline) {
            (None, None) => None,
            (Some(t), None) => Some(t),
            (None, Some(d)) => Some(d.saturating_duration_since(now)),
            (Some(t), Some(d)) => Some(t.min(d.saturating_duration_since(now))),
        };
        let wait_ms: libc::c_int = match wait {
            None => -1,
            // Round up so a 1 ms deadline does not spin at 0 ms granularity.
            Some(d) => {
                let rounded =
                    d.as_millis() + u128::from(d.subsec_nanos() % 1_000_000 != 0);
                rounded.min(i32::MAX as u128) as libc::c_int
            }
        };

        let ret = unsafe {
            libc::poll(pollfds.as_mut_ptr(), pollfds.len() as libc::nfds_t, wait_ms)
        };
        if ret < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(());
            }
            return Err(Error::Io(err));
        }

        for pfd in pollfds.iter().filter(|p| p.revents != 0) {
            for (fd, callback) in &callbacks {
                if *fd == pfd.fd {
                    callback();
                }
            }
        }

        self.fire_timers();

        Ok(())
    }

    fn fire_timers(&self) {
        let now = Instant::now();
        let expired: Vec<Arc<TimerState>> = {
            let mut state = self.state.lock().unwrap();
            state.timers.retain(|t| t.strong_count() > 0);
            state
                .timers
                .iter()
                .filter_map(|t| t.upgrade())
                .filter(|t| {
                    let mut deadline = t.deadline.lock().unwrap();
                    match *deadline {
                        Some(d) if d <= now => {
                            // Disarm before emitting: the timer is single-shot
                            // and a slot may restart it.
                            *deadline = None;
                            true
                        }
                        _ => false,
                    }
                })
                .collect()
        };

        for timer in expired {
            timer.timeout.emit(&());
        }
    }
}

impl Default for EventDispatcher {
    fn default() -> EventDispatcher {
        EventDispatcher::new()
    }
}

struct TimerState {
    deadline: Mutex<Option<Instant>>,
    timeout: Signal<()>,
}

/// Single-shot millisecond timer.
///
/// Started with [`start`](Timer::start), the timer emits its `timeout`
/// signal once when the interval elapses while the owning dispatcher is
/// being driven. [`stop`](Timer::stop) disarms it; once `stop` returns from
/// the dispatch thread the signal will not be emitted. Restarting a running
/// timer is equivalent to stop followed by start.
pub struct Timer {
    state: Arc<TimerState>,
    dispatcher: Arc<EventDispatcher>,
}

impl Timer {
    pub fn new(dispatcher: &Arc<EventDispatcher>) -> Timer {
        let state =
            Arc::new(TimerState { deadline: Mutex::new(None), timeout: Signal::new() });
        Timer { state, dispatcher: dispatcher.clone() }
    }

    /// Start or restart the timer with a timeout of `msec`.
    pub fn start(&self, msec: u64) {
        *self.state.deadline.lock().unwrap() =
            Some(Instant::now() + Duration::from_millis(msec));
        self.dispatcher.register_timer(&self.state);
        log::trace!("timer armed for {} ms", msec);
    }

    /// Stop the timer. No `timeout` emission happens after this returns.
    pub fn stop(&self) {
        *self.state.deadline.lock().unwrap() = None;
    }

    pub fn is_running(&self) -> bool {
        self.state.deadline.lock().unwrap().is_some()
    }

    /// Signal emitted when the timer expires.
    pub fn timeout(&self) -> &Signal<()> {
        &self.state.timeout
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_timer_fires_once() {
        let dispatcher = Arc::new(EventDispatcher::new());
        let timer = Timer::new(&dispatcher);
        let fired = Arc::new(AtomicUsize::new(0));

        let fired2 = fired.clone();
        timer.timeout().connect(move |_| {
            fired2.fetch_add(1, Ordering::SeqCst);
        });

        timer.start(10);
        assert!(timer.is_running());
        while timer.is_running() {
            dispatcher.process_events(Some(Duration::from_millis(50))).unwrap();
        }
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        // Single shot: further dispatching does not re-fire.
        dispatcher.process_events(Some(Duration::from_millis(20))).unwrap();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_timer_stop_prevents_emission() {
        let dispatcher = Arc::new(EventDispatcher::new());
        let timer = Timer::new(&dispatcher);
        let fired = Arc::new(AtomicUsize::new(0));

        let fired2 = fired.clone();
        timer.timeout().connect(move |_| {
            fired2.fetch_add(1, Ordering::SeqCst);
        });

        timer.start(500);
        timer.stop();
        assert!(!timer.is_running());
        dispatcher.process_events(Some(Duration::from_millis(10))).unwrap();
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_restart_extends_deadline() {
        let dispatcher = Arc::new(EventDispatcher::new());
        let timer = Timer::new(&dispatcher);

        timer.start(1);
        timer.start(5000);
        dispatcher.process_events(Some(Duration::from_millis(20))).unwrap();
        assert!(timer.is_running());
    }
}
