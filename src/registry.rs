// FlowState - Closed-loop entrainment control
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.


//! Observer registry
//!
//! A set of callbacks that can be added and removed at run time and notified
//! all at once. Callbacks are identified by `Arc` pointer identity, so adding
//! the same `Arc` twice registers it once. A callback that panics is logged
//! and skipped; the remaining callbacks still receive the value.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::warn;

/// Shared callback type
pub type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Registry of observer callbacks
pub struct ObserverRegistry<T> {
    name: &'static str,
    callbacks: Mutex<Vec<Callback<T>>>,
}

impl<T> ObserverRegistry<T> {
    /// Create an empty registry; `name` is used in log lines
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            callbacks: Mutex::new(Vec::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Callback<T>>> {
        // A poisoned list is still a valid list.
        self.callbacks.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Add a callback; returns false if it was already registered
    pub fn add(&self, callback: Callback<T>) -> bool {
        let mut callbacks = self.lock();
        if callbacks.iter().any(|c| Arc::ptr_eq(c, &callback)) {
            return false;
        }
        callbacks.push(callback);
        true
    }

    /// Remove a callback; returns false if it was not registered
    pub fn remove(&self, callback: &Callback<T>) -> bool {
        let mut callbacks = self.lock();
        let before = callbacks.len();
        callbacks.retain(|c| !Arc::ptr_eq(c, callback));
        callbacks.len() != before
    }

    /// Check whether a callback is registered
    pub fn contains(&self, callback: &Callback<T>) -> bool {
        self.lock().iter().any(|c| Arc::ptr_eq(c, callback))
    }

    /// Number of registered callbacks
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Check if no callbacks are registered
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Remove all callbacks
    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Deliver a value to every callback
    ///
    /// The list is snapshotted first, so callbacks may add or remove
    /// observers without deadlocking. Returns the number of callbacks that
    /// completed without panicking.
    pub fn notify(&self, value: &T) -> usize {
        let snapshot: Vec<Callback<T>> = self.lock().clone();
        let mut delivered = 0;

        for callback in snapshot {
            match catch_unwind(AssertUnwindSafe(|| callback(value))) {
                Ok(()) => delivered += 1,
                Err(panic) => {
                    let reason = panic
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "unknown panic".to_string());
                    warn!(registry = self.name, %reason, "Observer failed, continuing");
                }
            }
        }

        delivered
    }
}

impl<T> std::fmt::Debug for ObserverRegistry<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObserverRegistry")
            .field("name", &self.name)
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counter() -> (Arc<AtomicUsize>, Callback<u32>) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let cb: Callback<u32> = Arc::new(move |_: &u32| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        (count, cb)
    }

    #[test]
    fn test_add_is_unique() {
        let registry = ObserverRegistry::<u32>::new("test");
        let (_, cb) = counter();

        assert!(registry.add(Arc::clone(&cb)));
        assert!(!registry.add(Arc::clone(&cb)));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_remove() {
        let registry = ObserverRegistry::<u32>::new("test");
        let (count, cb) = counter();

        registry.add(Arc::clone(&cb));
        assert!(registry.remove(&cb));
        assert!(!registry.remove(&cb));
        assert!(registry.is_empty());

        registry.notify(&1);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_notify_all() {
        let registry = ObserverRegistry::<u32>::new("test");
        let (a, cb_a) = counter();
        let (b, cb_b) = counter();
        registry.add(cb_a);
        registry.add(cb_b);

        assert_eq!(registry.notify(&7), 2);
        assert_eq!(a.load(Ordering::SeqCst), 1);
        assert_eq!(b.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_panicking_observer_does_not_block_others() {
        let registry = ObserverRegistry::<u32>::new("test");
        let (count, cb) = counter();
        registry.add(Arc::new(|_: &u32| panic!("observer bug")));
        registry.add(cb);

        assert_eq!(registry.notify(&1), 1);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_observer_can_unregister_itself() {
        let registry = Arc::new(ObserverRegistry::<u32>::new("test"));
        let slot: Arc<Mutex<Option<Callback<u32>>>> = Arc::new(Mutex::new(None));

        let reg = Arc::clone(&registry);
        let slot_ref = Arc::clone(&slot);
        let cb: Callback<u32> = Arc::new(move |_: &u32| {
            if let Some(me) = slot_ref.lock().unwrap().as_ref() {
                reg.remove(me);
            }
        });
        *slot.lock().unwrap() = Some(Arc::clone(&cb));
        registry.add(cb);

        registry.notify(&1);
        assert!(registry.is_empty());
    }
}
