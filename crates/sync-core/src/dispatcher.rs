use std::{
    fmt,
    panic::{AssertUnwindSafe, catch_unwind},
    sync::{
        Arc, Mutex, PoisonError, Weak,
        atomic::{AtomicU64, Ordering},
    },
};

use tracing::{error, trace};

type Handler<E> = Arc<dyn Fn(&E) + Send + Sync + 'static>;

struct Registry<E> {
    next_id: AtomicU64,
    handlers: Mutex<Vec<(u64, Handler<E>)>>,
}

/// Synchronous fan-out of transport events to registered handlers.
///
/// Handlers run in registration order on the delivering task. There is no
/// buffering: a handler only sees events dispatched while it is registered.
/// A panicking handler is logged and skipped; later handlers still run.
pub struct EventDispatcher<E> {
    registry: Arc<Registry<E>>,
}

impl<E> Clone for EventDispatcher<E> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
        }
    }
}

impl<E> fmt::Debug for EventDispatcher<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("handlers", &self.handler_count())
            .finish()
    }
}

impl<E> Default for EventDispatcher<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> EventDispatcher<E> {
    pub fn new() -> Self {
        Self {
            registry: Arc::new(Registry {
                next_id: AtomicU64::new(1),
                handlers: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Register a handler. Dropping the returned guard unsubscribes it.
    pub fn subscribe<F>(&self, handler: F) -> Subscription<E>
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let id = self.registry.next_id.fetch_add(1, Ordering::Relaxed);
        let handler: Handler<E> = Arc::new(handler);
        self.registry
            .handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, handler));
        trace!(subscription_id = id, "dispatcher handler registered");

        Subscription {
            id,
            registry: Arc::downgrade(&self.registry),
        }
    }

    /// Deliver one event to every handler registered right now.
    pub fn dispatch(&self, event: &E) {
        // Snapshot so handlers may (un)subscribe without deadlocking.
        let handlers: Vec<(u64, Handler<E>)> = self
            .registry
            .handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        for (id, handler) in handlers {
            if catch_unwind(AssertUnwindSafe(|| handler(event))).is_err() {
                error!(subscription_id = id, "dispatcher handler panicked; continuing");
            }
        }
    }

    /// Number of currently registered handlers.
    pub fn handler_count(&self) -> usize {
        self.registry
            .handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Registration guard returned by [`EventDispatcher::subscribe`].
#[must_use = "dropping a subscription unsubscribes its handler"]
pub struct Subscription<E> {
    id: u64,
    registry: Weak<Registry<E>>,
}

impl<E> Subscription<E> {
    /// Remove the handler now.
    pub fn unsubscribe(self) {}

    fn remove(&self) {
        let Some(registry) = self.registry.upgrade() else {
            return;
        };
        registry
            .handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|(id, _)| *id != self.id);
        trace!(subscription_id = self.id, "dispatcher handler removed");
    }
}

impl<E> Drop for Subscription<E> {
    fn drop(&mut self) {
        self.remove();
    }
}
