// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Device event notification system.
//!
//! Host adapters and the worker register listeners to learn about state
//! transitions without polling the controller.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::device::state::{DeviceState, MonoSnapshot};

/// Unique identifier for a registered listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl ListenerId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// Trait for components that want to receive device events.
///
/// All methods have default no-op implementations, so listeners can
/// selectively override only the events they care about.
pub trait DeviceListener: Send + Sync {
    /// Called when the state machine transitions.
    fn on_state_change(&self, _old: DeviceState, _new: DeviceState) {}

    /// Called whenever state, port or grating changed.
    fn on_snapshot(&self, _snapshot: &MonoSnapshot) {}
}

/// Manages registered listeners and dispatches events.
#[derive(Default)]
pub struct DeviceEventEmitter {
    listeners: Vec<(ListenerId, Arc<dyn DeviceListener>)>,
}

impl DeviceEventEmitter {
    pub fn new() -> Self {
        Self {
            listeners: Vec::new(),
        }
    }

    /// Register a listener to receive events.
    /// Returns an ID that can be used to unregister the listener.
    pub fn register(&mut self, listener: Arc<dyn DeviceListener>) -> ListenerId {
        let id = ListenerId::new();
        self.listeners.push((id, listener));
        id
    }

    pub fn unregister(&mut self, id: ListenerId) {
        self.listeners.retain(|(lid, _)| *lid != id);
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    pub fn notify_state_change(&self, old: DeviceState, new: DeviceState) {
        for (_, listener) in &self.listeners {
            listener.on_state_change(old, new);
        }
    }

    pub fn notify_snapshot(&self, snapshot: &MonoSnapshot) {
        for (_, listener) in &self.listeners {
            listener.on_snapshot(snapshot);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct TestListener {
        transitions: Mutex<Vec<(DeviceState, DeviceState)>>,
    }

    impl DeviceListener for TestListener {
        fn on_state_change(&self, old: DeviceState, new: DeviceState) {
            self.transitions.lock().unwrap().push((old, new));
        }
    }

    #[test]
    fn test_register_and_notify() {
        let mut emitter = DeviceEventEmitter::new();
        let listener = Arc::new(TestListener::default());
        let id = emitter.register(listener.clone());
        assert_eq!(emitter.listener_count(), 1);

        emitter.notify_state_change(DeviceState::Disconnected, DeviceState::Connected);
        emitter.notify_snapshot(&MonoSnapshot::default());
        assert_eq!(
            *listener.transitions.lock().unwrap(),
            vec![(DeviceState::Disconnected, DeviceState::Connected)]
        );

        emitter.unregister(id);
        assert_eq!(emitter.listener_count(), 0);
    }
}
