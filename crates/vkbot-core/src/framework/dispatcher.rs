//! Event dispatcher for the vkbot client.
//!
//! The [`Dispatcher`] is the single entry point through which every event
//! (network-originated or synthetic, like `ready`) reaches application code.
//! It serves two kinds of consumers:
//!
//! 1. **One-shot waiters** registered with [`Dispatcher::wait_for`]. They are
//!    offered every dispatch of their event name, in registration order, and
//!    resolve at most once.
//! 2. **Persistent handlers** bound with [`Dispatcher::on`]. At most one per
//!    event name; each dispatch schedules one invocation on the
//!    [`TaskSupervisor`].
//!
//! ```rust,ignore
//! use vkbot_core::{Dispatcher, EventArgs, TaskSupervisor};
//!
//! let dispatcher = Dispatcher::new(TaskSupervisor::new(Handle::current()));
//!
//! dispatcher.on("message_new", |args: EventArgs| async move {
//!     // ...
//!     Ok(())
//! });
//!
//! let next = dispatcher.wait_for("message_new").register();
//! dispatcher.dispatch("message_new", args![message]);
//! let msg = next.await?;
//! ```
//!
//! `dispatch` never suspends and never fails: waiter failures are delivered to
//! the waiter, handler failures to the supervisor's error hook.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, trace};

use super::handler::{BoxedHandler, Handler};
use super::supervisor::{DispatchTask, TaskSupervisor};
use super::waiter::{WaitFor, WaiterRegistry};
use crate::foundation::event::{EventArgs, normalize_event_name};

struct DispatcherInner {
    waiters: Arc<WaiterRegistry>,
    handlers: RwLock<HashMap<String, BoxedHandler>>,
    supervisor: TaskSupervisor,
}

/// Routes events to one-shot waiters and persistent handlers.
///
/// Cloning is cheap; all clones share the same registries.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

impl Dispatcher {
    /// Creates a dispatcher whose handlers run on `supervisor`.
    pub fn new(supervisor: TaskSupervisor) -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                waiters: Arc::new(WaiterRegistry::default()),
                handlers: RwLock::new(HashMap::new()),
                supervisor,
            }),
        }
    }

    /// Returns the supervisor handler invocations run on.
    pub fn supervisor(&self) -> &TaskSupervisor {
        &self.inner.supervisor
    }

    // =========================================================================
    // Handlers
    // =========================================================================

    /// Binds `handler` to `event`, returning the handler it replaces.
    pub fn on<H: Handler>(&self, event: &str, handler: H) -> Option<BoxedHandler> {
        let event = normalize_event_name(event).into_owned();
        debug!(event = %event, "Binding handler");
        self.inner.handlers.write().insert(event, Arc::new(handler))
    }

    /// Unbinds the handler of `event`.
    pub fn remove_handler(&self, event: &str) -> Option<BoxedHandler> {
        self.inner
            .handlers
            .write()
            .remove(normalize_event_name(event).as_ref())
    }

    /// Returns `true` if a handler is bound to `event`.
    pub fn has_handler(&self, event: &str) -> bool {
        self.inner
            .handlers
            .read()
            .contains_key(normalize_event_name(event).as_ref())
    }

    // =========================================================================
    // Waiters
    // =========================================================================

    /// Starts building a one-shot wait for the next matching `event`.
    pub fn wait_for(&self, event: &str) -> WaitFor {
        WaitFor::new(
            Arc::clone(&self.inner.waiters),
            normalize_event_name(event).into_owned(),
        )
    }

    /// Number of waiters pending on `event`.
    pub fn pending_waiters(&self, event: &str) -> usize {
        self.inner
            .waiters
            .pending(normalize_event_name(event).as_ref())
    }

    /// Returns `true` if a dispatch of `event` would reach anyone.
    pub fn is_observed(&self, event: &str) -> bool {
        let event = normalize_event_name(event);
        self.inner.waiters.is_waiting(&event)
            || self.inner.handlers.read().contains_key(event.as_ref())
    }

    // =========================================================================
    // Dispatch
    // =========================================================================

    /// Delivers one event to its waiters, then to its handler.
    ///
    /// Returns the scheduled handler invocation, if a handler is bound.
    pub fn dispatch(&self, event: &str, args: EventArgs) -> Option<DispatchTask> {
        let event = normalize_event_name(event);
        trace!(event = %event, args = ?args, "Dispatching event");

        let completed = self.inner.waiters.resolve(&event, &args);
        if completed > 0 {
            debug!(event = %event, completed, "Waiters completed");
        }

        let handler = self.inner.handlers.read().get(event.as_ref()).cloned();
        match handler {
            Some(handler) => Some(self.inner.supervisor.schedule(handler, &event, args)),
            None => {
                trace!(event = %event, "No handler bound");
                None
            }
        }
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let handlers: Vec<String> = self.inner.handlers.read().keys().cloned().collect();
        f.debug_struct("Dispatcher")
            .field("handlers", &handlers)
            .field("waiters", &self.inner.waiters)
            .finish()
    }
}
