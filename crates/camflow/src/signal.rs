// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Typed publish-subscribe signals.
//!
//! Components expose notifications as [`Signal`] (one argument) or
//! [`Signal2`] (two arguments) members. Slots connect with a closure and
//! receive a [`Connection`] token for later disconnection. Emission is a
//! synchronous fan-out on the emitting thread; receivers that live on
//! another thread synchronize through their own state, the framework only
//! emits from the thread driving the event dispatcher.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Token identifying a slot connection, used to disconnect it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Connection(u64);

static NEXT_CONNECTION: AtomicU64 = AtomicU64::new(1);

fn next_connection() -> Connection {
    Connection(NEXT_CONNECTION.fetch_add(1, Ordering::Relaxed))
}

/// A one-argument signal.
///
/// Slots are invoked in connection order. A slot may connect or disconnect
/// slots of the same signal from within its body; the change takes effect on
/// the next emission.
pub struct Signal<T> {
    slots: Mutex<Vec<(Connection, Arc<dyn Fn(&T) + Send + Sync>)>>,
}

impl<T> Signal<T> {
    pub fn new() -> Signal<T> {
        Signal { slots: Mutex::new(Vec::new()) }
    }

    pub fn connect<F>(&self, slot: F) -> Connection
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let conn = next_connection();
        self.slots.lock().unwrap().push((conn, Arc::new(slot)));
        conn
    }

    pub fn disconnect(&self, conn: Connection) {
        self.slots.lock().unwrap().retain(|(c, _)| *c != conn);
    }

    pub fn emit(&self, arg: &T) {
        // Snapshot the slot list so slots can reconnect without deadlocking.
        let slots: Vec<_> =
            self.slots.lock().unwrap().iter().map(|(_, s)| s.clone()).collect();
        for slot in slots {
            slot(arg);
        }
    }
}

impl<T> Default for Signal<T> {
    fn default() -> Signal<T> {
        Signal::new()
    }
}

/// A two-argument signal.
pub struct Signal2<A, B> {
    slots: Mutex<Vec<(Connection, Arc<dyn Fn(&A, &B) + Send + Sync>)>>,
}

impl<A, B> Signal2<A, B> {
    pub fn new() -> Signal2<A, B> {
        Signal2 { slots: Mutex::new(Vec::new()) }
    }

    pub fn connect<F>(&self, slot: F) -> Connection
    where
        F: Fn(&A, &B) + Send + Sync + 'static,
    {
        let conn = next_connection();
        self.slots.lock().unwrap().push((conn, Arc::new(slot)));
        conn
    }

    pub fn disconnect(&self, conn: Connection) {
        self.slots.lock().unwrap().retain(|(c, _)| *c != conn);
    }

    pub fn emit(&self, a: &A, b: &B) {
        let slots: Vec<_> =
            self.slots.lock().unwrap().iter().map(|(_, s)| s.clone()).collect();
        for slot in slots {
            slot(a, b);
        }
    }
}

impl<A, B> Default for Signal2<A, B> {
    fn default() -> Signal2<A, B> {
        Signal2::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_emit_fans_out() {
        let signal = Signal::<u32>::new();
        let count = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let count = count.clone();
            signal.connect(move |v: &u32| {
                count.fetch_add(*v as usize, Ordering::SeqCst);
            });
        }

        signal.emit(&2);
        assert_eq!(count.load(Ordering::SeqCst), 6);
    }

    #[test]
    fn test_disconnect() {
        let signal = Signal::<()>::new();
        let count = Arc::new(AtomicUsize::new(0));

        let count2 = count.clone();
        let conn = signal.connect(move |_| {
            count2.fetch_add(1, Ordering::SeqCst);
        });

        signal.emit(&());
        signal.disconnect(conn);
        signal.emit(&());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_reentrant_connect() {
        let signal = Arc::new(Signal::<()>::new());
        let count = Arc::new(AtomicUsize::new(0));

        let inner_signal = signal.clone();
        let inner_count = count.clone();
        signal.connect(move |_| {
            let count = inner_count.clone();
            inner_signal.connect(move |_| {
                count.fetch_add(1, Ordering::SeqCst);
            });
        });

        // First emission installs a new slot, second runs it.
        signal.emit(&());
        assert_eq!(count.load(Ordering::SeqCst), 0);
        signal.emit(&());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_signal2() {
        let signal = Signal2::<u32, u32>::new();
        let sum = Arc::new(AtomicUsize::new(0));

        let sum2 = sum.clone();
        signal.connect(move |a: &u32, b: &u32| {
            sum2.fetch_add((*a + *b) as usize, Ordering::SeqCst);
        });

        signal.emit(&3, &4);
        assert_eq!(sum.load(Ordering::SeqCst), 7);
    }
}
