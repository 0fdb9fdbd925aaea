//! One-shot waiters.
//!
//! A waiter is registered under an event name and resolved by the first
//! dispatch of that name whose arguments satisfy its predicate. Registration
//! happens when the [`WaitFor`] builder is registered (or turned into a future
//! by `.await`), never lazily on first poll, so a wait registered before a
//! dispatch always observes it.
//!
//! # Example
//!
//! ```rust,ignore
//! let reply = dispatcher
//!     .wait_for("message_new")
//!     .matching(|msg: &Message| msg.from_id == author)
//!     .timeout(Duration::from_secs(30))
//!     .await?;
//! ```
//!
//! Predicates run with the registry unlocked, so they may use the
//! dispatcher, including registering further waits. A wait registered while
//! an event is being resolved is offered only later dispatches.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::future::{Future, IntoFuture};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use std::time::Duration;

use parking_lot::{Mutex, ReentrantMutex};
use tokio::sync::oneshot;
use tokio::time::{Instant, Sleep, sleep_until};
use tracing::{trace, warn};

use super::supervisor::panic_message;
use crate::foundation::error::{WaitError, WaitResult};
use crate::foundation::event::{EventArgs, Resolved};

type Predicate = Box<dyn FnMut(&EventArgs) -> anyhow::Result<bool> + Send>;

struct Listener {
    id: u64,
    slot: oneshot::Sender<WaitResult<Resolved>>,
    predicate: Option<Predicate>,
}

impl Listener {
    fn evaluate(&mut self, args: &EventArgs) -> WaitResult<bool> {
        let Some(predicate) = self.predicate.as_mut() else {
            return Ok(true);
        };
        match catch_unwind(AssertUnwindSafe(|| predicate(args))) {
            Ok(verdict) => verdict.map_err(|e| WaitError::Predicate(Arc::new(e))),
            Err(panic) => Err(WaitError::PredicatePanicked(panic_message(panic.as_ref()))),
        }
    }
}

// =============================================================================
// WaiterRegistry
// =============================================================================

/// Per-event ordered lists of pending waiters.
///
/// `listeners` is only locked for short map edits. `resolving` serializes
/// resolution across threads; it is reentrant so a predicate may dispatch.
#[derive(Default)]
pub(crate) struct WaiterRegistry {
    listeners: Mutex<HashMap<String, Vec<Listener>>>,
    resolving: ReentrantMutex<()>,
    next_id: AtomicU64,
}

impl WaiterRegistry {
    fn insert(
        &self,
        event: &str,
        predicate: Option<Predicate>,
    ) -> (u64, oneshot::Receiver<WaitResult<Resolved>>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (slot, rx) = oneshot::channel();
        self.listeners
            .lock()
            .entry(event.to_string())
            .or_default()
            .push(Listener {
                id,
                slot,
                predicate,
            });
        (id, rx)
    }

    /// Offers one dispatch to every waiter of `event`, in registration order.
    ///
    /// Returns the number of waiters that were completed (resolved or failed).
    pub(crate) fn resolve(&self, event: &str, args: &EventArgs) -> usize {
        let _resolving = self.resolving.lock();
        let detached = self.listeners.lock().remove(event);
        let Some(detached) = detached else {
            return 0;
        };

        let mut completed = 0;
        let mut kept = Vec::with_capacity(detached.len());
        for mut listener in detached {
            if listener.slot.is_closed() {
                trace!(event, id = listener.id, "Dropping abandoned waiter");
                continue;
            }
            let outcome = match listener.evaluate(args) {
                Ok(false) => {
                    kept.push(listener);
                    continue;
                }
                Ok(true) => Ok(args.resolve()),
                Err(e) => {
                    warn!(event, id = listener.id, error = %e, "Wait predicate failed");
                    Err(e)
                }
            };
            completed += 1;
            // The receiver may have gone away while the predicate ran.
            let _ = listener.slot.send(outcome);
        }

        // Waits dropped or timed out during evaluation closed their slots.
        kept.retain(|listener| !listener.slot.is_closed());
        let mut listeners = self.listeners.lock();
        if let Some(added) = listeners.remove(event) {
            kept.extend(added);
        }
        if !kept.is_empty() {
            listeners.insert(event.to_string(), kept);
        }
        completed
    }

    /// Removes one waiter. Returns `false` if it was no longer registered.
    pub(crate) fn remove(&self, event: &str, id: u64) -> bool {
        let mut listeners = self.listeners.lock();
        let Some(list) = listeners.get_mut(event) else {
            return false;
        };
        let Some(index) = list.iter().position(|l| l.id == id) else {
            return false;
        };
        list.remove(index);
        if list.is_empty() {
            listeners.remove(event);
        }
        true
    }

    /// Number of waiters pending on `event`.
    pub(crate) fn pending(&self, event: &str) -> usize {
        self.listeners.lock().get(event).map_or(0, Vec::len)
    }

    /// Returns `true` if any waiter is pending on `event`.
    pub(crate) fn is_waiting(&self, event: &str) -> bool {
        self.listeners.lock().contains_key(event)
    }
}

impl fmt::Debug for WaiterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let listeners = self.listeners.lock();
        let mut map = f.debug_map();
        for (event, list) in listeners.iter() {
            map.entry(event, &list.len());
        }
        map.finish()
    }
}

// =============================================================================
// WaitFor builder
// =============================================================================

/// Builder for a one-shot wait, returned by `Dispatcher::wait_for`.
#[must_use = "a wait is not registered until `.register()` or `.await`"]
pub struct WaitFor {
    registry: Arc<WaiterRegistry>,
    event: String,
    predicate: Option<Predicate>,
    timeout: Option<Duration>,
}

impl WaitFor {
    pub(crate) fn new(registry: Arc<WaiterRegistry>, event: String) -> Self {
        Self {
            registry,
            event,
            predicate: None,
            timeout: None,
        }
    }

    /// Only resolve on dispatches for which `predicate` returns `Ok(true)`.
    ///
    /// An `Err` fails the wait with [`WaitError::Predicate`].
    pub fn check<F>(mut self, predicate: F) -> Self
    where
        F: FnMut(&EventArgs) -> anyhow::Result<bool> + Send + 'static,
    {
        self.predicate = Some(Box::new(predicate));
        self
    }

    /// Only resolve when the first argument is a `T` accepted by `filter`.
    pub fn matching<T, F>(self, filter: F) -> Self
    where
        T: Any,
        F: Fn(&T) -> bool + Send + 'static,
    {
        self.check(move |args| Ok(args.first::<T>().is_some_and(&filter)))
    }

    /// Fails the wait with [`WaitError::Timeout`] after `timeout`.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Inserts the waiter now and returns the future that completes it.
    pub fn register(self) -> Wait {
        let deadline = self.timeout.map(|t| Instant::now() + t);
        let (id, rx) = self.registry.insert(&self.event, self.predicate);
        trace!(event = %self.event, id, timeout = ?self.timeout, "Waiter registered");
        Wait {
            event: self.event,
            id,
            rx,
            timeout: self.timeout,
            deadline,
            sleep: None,
            registry: Arc::downgrade(&self.registry),
            done: false,
        }
    }
}

impl IntoFuture for WaitFor {
    type Output = WaitResult<Resolved>;
    type IntoFuture = Wait;

    fn into_future(self) -> Self::IntoFuture {
        self.register()
    }
}

impl fmt::Debug for WaitFor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WaitFor")
            .field("event", &self.event)
            .field("has_check", &self.predicate.is_some())
            .field("timeout", &self.timeout)
            .finish()
    }
}

// =============================================================================
// Wait future
// =============================================================================

/// A registered one-shot wait.
///
/// Dropping it before completion unregisters the waiter.
pub struct Wait {
    event: String,
    id: u64,
    rx: oneshot::Receiver<WaitResult<Resolved>>,
    timeout: Option<Duration>,
    deadline: Option<Instant>,
    sleep: Option<Pin<Box<Sleep>>>,
    registry: Weak<WaiterRegistry>,
    done: bool,
}

impl Wait {
    /// The (normalized) event name being waited on.
    pub fn event(&self) -> &str {
        &self.event
    }

    fn unregister(&self) -> bool {
        self.registry
            .upgrade()
            .is_some_and(|registry| registry.remove(&self.event, self.id))
    }
}

impl Future for Wait {
    type Output = WaitResult<Resolved>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;
        if this.done {
            return Poll::Ready(Err(WaitError::Cancelled));
        }

        match Pin::new(&mut this.rx).poll(cx) {
            Poll::Ready(result) => {
                this.done = true;
                return Poll::Ready(result.unwrap_or(Err(WaitError::Cancelled)));
            }
            Poll::Pending => {}
        }

        let Some(deadline) = this.deadline else {
            return Poll::Pending;
        };
        let sleep = this
            .sleep
            .get_or_insert_with(|| Box::pin(sleep_until(deadline)));
        if sleep.as_mut().poll(cx).is_pending() {
            return Poll::Pending;
        }

        this.done = true;
        if !this.unregister() {
            // Detached by a resolution in progress. Closing the slot makes it
            // drop the waiter; a result sent before that still wins.
            this.rx.close();
            if let Ok(result) = this.rx.try_recv() {
                return Poll::Ready(result);
            }
        }
        trace!(event = %this.event, id = this.id, "Waiter timed out");
        Poll::Ready(Err(WaitError::Timeout(this.timeout.unwrap_or_default())))
    }
}

impl Drop for Wait {
    fn drop(&mut self) {
        if !self.done && self.unregister() {
            trace!(event = %self.event, id = self.id, "Waiter dropped");
        }
    }
}

impl fmt::Debug for Wait {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Wait")
            .field("event", &self.event)
            .field("id", &self.id)
            .field("timeout", &self.timeout)
            .field("done", &self.done)
            .finish()
    }
}
