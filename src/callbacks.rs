// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! De-duplicating fan-out of recording-state and connection-state
//! transitions to external observers (spec.md §4.9).
//!
//! Observers are held weakly — the controller never extends an observer's
//! lifetime — and identified by pointer identity so registration is
//! idempotent and unregistration is reliable even though the trait object
//! isn't `Eq`.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, warn};

/// Receives connection-state transitions (`on_connection_state` in
/// spec.md §6).
pub trait ConnectionObserver: Send + Sync {
    fn on_connection_state(&self, camera_id: &str, is_connected: bool);
}

/// Receives recording-state transitions (`on_recording_state` in
/// spec.md §6).
pub trait RecordingObserver: Send + Sync {
    fn on_recording_state(&self, camera_id: &str, is_recording: bool);
}

struct Entry<T: ?Sized> {
    ptr: *const (),
    observer: Weak<T>,
}

// Safety: the raw pointer is used only as an opaque identity key, never
// dereferenced; the actual access goes through `Weak::upgrade`.
unsafe impl<T: ?Sized> Send for Entry<T> {}
unsafe impl<T: ?Sized> Sync for Entry<T> {}

fn weak_identity<T: ?Sized>(weak: &Weak<T>) -> *const () {
    // `Weak::as_ptr` is stable and gives a pointer stable for the object's
    // identity regardless of whether the allocation is still live.
    Weak::as_ptr(weak) as *const ()
}

pub struct CallbackRegistry {
    connection: Mutex<Vec<Entry<dyn ConnectionObserver>>>,
    recording: Mutex<Vec<Entry<dyn RecordingObserver>>>,
}

impl Default for CallbackRegistry {
    fn default() -> Self {
        Self { connection: Mutex::new(Vec::new()), recording: Mutex::new(Vec::new()) }
    }
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_connection(&self, observer: &Arc<dyn ConnectionObserver>) {
        let weak = Arc::downgrade(observer);
        let id = weak_identity(&weak);
        let mut list = self.connection.lock();
        if list.iter().any(|e| e.ptr == id) {
            return;
        }
        list.push(Entry { ptr: id, observer: weak });
    }

    pub fn unregister_connection(&self, observer: &Arc<dyn ConnectionObserver>) {
        let id = weak_identity(&Arc::downgrade(observer));
        self.connection.lock().retain(|e| e.ptr != id);
    }

    pub fn register_recording(&self, observer: &Arc<dyn RecordingObserver>) {
        let weak = Arc::downgrade(observer);
        let id = weak_identity(&weak);
        let mut list = self.recording.lock();
        if list.iter().any(|e| e.ptr == id) {
            return;
        }
        list.push(Entry { ptr: id, observer: weak });
    }

    pub fn unregister_recording(&self, observer: &Arc<dyn RecordingObserver>) {
        let id = weak_identity(&Arc::downgrade(observer));
        self.recording.lock().retain(|e| e.ptr != id);
    }

    /// Notify all live connection observers, in registration order. Dead
    /// (dropped) observers are pruned as they're encountered. A panicking
    /// observer is caught so it can never prevent others from firing.
    pub fn notify_connection(&self, camera_id: &str, is_connected: bool) {
        let snapshot: Vec<_> = {
            let mut list = self.connection.lock();
            list.retain(|e| e.observer.strong_count() > 0);
            list.iter().filter_map(|e| e.observer.upgrade()).collect()
        };
        for observer in snapshot {
            let camera_id = camera_id.to_string();
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                observer.on_connection_state(&camera_id, is_connected);
            }));
            if result.is_err() {
                warn!(camera_id, "connection observer panicked; other observers still notified");
            }
        }
        debug!(camera_id, is_connected, "connection observers notified");
    }

    /// Notify all live recording observers, in registration order.
    pub fn notify_recording(&self, camera_id: &str, is_recording: bool) {
        let snapshot: Vec<_> = {
            let mut list = self.recording.lock();
            list.retain(|e| e.observer.strong_count() > 0);
            list.iter().filter_map(|e| e.observer.upgrade()).collect()
        };
        for observer in snapshot {
            let camera_id = camera_id.to_string();
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                observer.on_recording_state(&camera_id, is_recording);
            }));
            if result.is_err() {
                warn!(camera_id, "recording observer panicked; other observers still notified");
            }
        }
        debug!(camera_id, is_recording, "recording observers notified");
    }

    /// Clear both registries. Called on controller teardown.
    pub fn clear(&self) {
        self.connection.lock().clear();
        self.recording.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counter(AtomicUsize);
    impl ConnectionObserver for Counter {
        fn on_connection_state(&self, _camera_id: &str, _is_connected: bool) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn duplicate_registration_is_a_no_op() {
        let registry = CallbackRegistry::new();
        let observer: Arc<dyn ConnectionObserver> = Arc::new(Counter(AtomicUsize::new(0)));
        registry.register_connection(&observer);
        registry.register_connection(&observer);
        assert_eq!(registry.connection.lock().len(), 1);
    }

    #[test]
    fn notify_reaches_every_registered_observer() {
        let registry = CallbackRegistry::new();
        let a: Arc<dyn ConnectionObserver> = Arc::new(Counter(AtomicUsize::new(0)));
        let b: Arc<dyn ConnectionObserver> = Arc::new(Counter(AtomicUsize::new(0)));
        registry.register_connection(&a);
        registry.register_connection(&b);
        registry.notify_connection("cam1", true);

        let count_a = unsafe { &*(Arc::as_ptr(&a) as *const Counter) }.0.load(Ordering::SeqCst);
        let count_b = unsafe { &*(Arc::as_ptr(&b) as *const Counter) }.0.load(Ordering::SeqCst);
        assert_eq!(count_a, 1);
        assert_eq!(count_b, 1);
    }

    #[test]
    fn unregister_stops_future_notifications() {
        let registry = CallbackRegistry::new();
        let observer: Arc<dyn ConnectionObserver> = Arc::new(Counter(AtomicUsize::new(0)));
        registry.register_connection(&observer);
        registry.unregister_connection(&observer);
        assert!(registry.connection.lock().is_empty());
    }

    #[test]
    fn dropped_observer_is_pruned_on_next_notify() {
        let registry = CallbackRegistry::new();
        {
            let observer: Arc<dyn ConnectionObserver> = Arc::new(Counter(AtomicUsize::new(0)));
            registry.register_connection(&observer);
        }
        // `observer` has been dropped; registry still holds a dead Weak.
        registry.notify_connection("cam1", false);
        assert!(registry.connection.lock().is_empty());
    }

    #[test]
    fn clear_empties_both_registries() {
        let registry = CallbackRegistry::new();
        let observer: Arc<dyn ConnectionObserver> = Arc::new(Counter(AtomicUsize::new(0)));
        registry.register_connection(&observer);
        registry.clear();
        assert!(registry.connection.lock().is_empty());
    }
}
