//! Protocol event observers.

use parking_lot::Mutex;
use std::sync::Arc;

/// Receives edge-triggered protocol notifications.
///
/// Callbacks run on whichever peer thread produced the change, after the
/// protocol has released its internal locks; implementations should return
/// quickly.
pub trait ProtocolObserver: Send + Sync {
    /// The best known network tip height changed.
    fn observed_height_updated(&self, _height: u64) {}

    /// The count of handshaken peers changed.
    fn peer_count_updated(&self, _count: usize) {}
}

/// Mutex-guarded observer fan-out.
#[derive(Default)]
pub struct ObserverList {
    observers: Mutex<Vec<Arc<dyn ProtocolObserver>>>,
}

impl ObserverList {
    /// Create an empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an observer.
    pub fn add(&self, observer: Arc<dyn ProtocolObserver>) {
        self.observers.lock().push(observer);
    }

    /// Unregister a previously added observer.
    pub fn remove(&self, observer: &Arc<dyn ProtocolObserver>) {
        self.observers
            .lock()
            .retain(|existing| !Arc::ptr_eq(existing, observer));
    }

    /// Invoke `f` on every registered observer.
    ///
    /// The list lock is released before any callback runs, so observers may
    /// re-enter the protocol.
    pub fn notify(&self, f: impl Fn(&dyn ProtocolObserver)) {
        let snapshot: Vec<_> = self.observers.lock().clone();
        for observer in snapshot {
            f(observer.as_ref());
        }
    }
}
