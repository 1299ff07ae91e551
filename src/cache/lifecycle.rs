//! Host lifecycle signals
//!
//! The hosting application delivers background transitions and memory
//! pressure through a `LifecycleHub`. Caches subscribe; the hub keeps only
//! weak references so a dropped cache unsubscribes itself.

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::debug;

/// Event delivered by the host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// The application moved to the background
    EnterBackground,
    /// The system reported memory pressure
    MemoryWarning,
}

impl fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecycleEvent::EnterBackground => write!(f, "enter-background"),
            LifecycleEvent::MemoryWarning => write!(f, "memory-warning"),
        }
    }
}

/// Receiver of lifecycle events
pub trait LifecycleObserver: Send + Sync {
    fn on_lifecycle_event(&self, event: LifecycleEvent);
}

/// Fan-out point for lifecycle events
#[derive(Default)]
pub struct LifecycleHub {
    observers: Mutex<Vec<Weak<dyn LifecycleObserver>>>,
}

impl LifecycleHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe `observer` for as long as it is alive
    pub fn subscribe<O>(&self, observer: &Arc<O>)
    where
        O: LifecycleObserver + 'static,
    {
        let observer: Arc<dyn LifecycleObserver> = observer.clone();
        self.observers.lock().push(Arc::downgrade(&observer));
    }

    /// Deliver `event` to every live observer
    pub fn post(&self, event: LifecycleEvent) {
        let live: Vec<Arc<dyn LifecycleObserver>> = {
            let mut observers = self.observers.lock();
            observers.retain(|observer| observer.strong_count() > 0);
            observers.iter().filter_map(Weak::upgrade).collect()
        };
        debug!(%event, observers = live.len(), "Delivering lifecycle event");
        for observer in live {
            observer.on_lifecycle_event(event);
        }
    }

    /// Number of live observers
    pub fn observer_count(&self) -> usize {
        self.observers
            .lock()
            .iter()
            .filter(|observer| observer.strong_count() > 0)
            .count()
    }
}

// =============================================================================
// Tests
// =============================================================================
