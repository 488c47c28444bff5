//! Ordered fan-out of delivered notifications to subscriber callbacks.
//!
//! [`DispatchRegistry`] invokes every registered callback once per event,
//! in registration order. Each pass runs over a snapshot of the subscriber
//! list, so a callback may register or unregister subscribers (or close the
//! registry) without invalidating the iteration. A panicking callback is
//! isolated: it is logged and the remaining callbacks still run.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use insyd_core::Notification;

/// A subscriber callback.
pub type Subscriber = Arc<dyn Fn(&Notification) + Send + Sync>;

/// Handle returned by [`DispatchRegistry::register`], used to unregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Result of one dispatch pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchOutcome {
    /// Callbacks that returned normally.
    pub delivered: usize,
    /// Callbacks that panicked.
    pub failed: usize,
}

#[derive(Default)]
struct RegistryInner {
    next_id: u64,
    subscribers: Vec<(SubscriptionId, Subscriber)>,
    closed: bool,
}

/// Ordered set of subscriber callbacks.
///
/// Duplicate registrations are not detected: registering the same callback
/// twice means it runs twice per event.
#[derive(Default)]
pub struct DispatchRegistry {
    inner: Mutex<RegistryInner>,
}

impl DispatchRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a subscriber. Returns `None` once the registry is closed.
    pub fn register<F>(&self, callback: F) -> Option<SubscriptionId>
    where
        F: Fn(&Notification) + Send + Sync + 'static,
    {
        let mut inner = self.lock();
        if inner.closed {
            return None;
        }
        let id = SubscriptionId(inner.next_id);
        inner.next_id += 1;
        inner.subscribers.push((id, Arc::new(callback)));
        Some(id)
    }

    /// Remove a subscriber. Returns `false` if it was not registered.
    pub fn unregister(&self, id: SubscriptionId) -> bool {
        let mut inner = self.lock();
        let before = inner.subscribers.len();
        inner.subscribers.retain(|(sid, _)| *sid != id);
        inner.subscribers.len() != before
    }

    /// Drop every subscriber and refuse new registrations.
    ///
    /// A dispatch pass already in progress stops before the next callback.
    pub fn close(&self) {
        let mut inner = self.lock();
        inner.closed = true;
        inner.subscribers.clear();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn len(&self) -> usize {
        self.lock().subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Invoke every subscriber with `notification`, in registration order.
    pub fn dispatch(&self, notification: &Notification) -> DispatchOutcome {
        let snapshot: Vec<(SubscriptionId, Subscriber)> = {
            let inner = self.lock();
            if inner.closed {
                return DispatchOutcome::default();
            }
            inner.subscribers.clone()
        };

        let mut outcome = DispatchOutcome::default();
        for (id, callback) in snapshot {
            if self.is_closed() {
                break;
            }
            match panic::catch_unwind(AssertUnwindSafe(|| callback(notification))) {
                Ok(()) => outcome.delivered += 1,
                Err(payload) => {
                    outcome.failed += 1;
                    tracing::error!(
                        subscription = id.0,
                        notification_id = %notification.id,
                        panic = panic_message(payload.as_ref()),
                        "Subscriber panicked during dispatch",
                    );
                }
            }
        }
        outcome
    }

    // Subscribers never run under the lock, so poisoning can only come from
    // a bug in this module; the data is still consistent.
    fn lock(&self) -> MutexGuard<'_, RegistryInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "<non-string panic payload>"
    }
}
