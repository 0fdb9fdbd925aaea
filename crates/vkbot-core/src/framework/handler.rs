//! Persistent event handlers and the failure hook.
//!
//! A [`Handler`] is bound to one event name for the lifetime of the client
//! and invoked with the arguments of every dispatch of that event. Any
//! `Fn(EventArgs) -> impl Future<Output = anyhow::Result<()>>` is a handler:
//!
//! ```rust,ignore
//! dispatcher.on("message_new", |args: EventArgs| async move {
//!     let msg = args.first::<Message>().context("missing message")?;
//!     println!("{}", msg.text);
//!     Ok(())
//! });
//! ```
//!
//! Failing handlers never reach the ingestion loop; the
//! [`TaskSupervisor`](super::supervisor::TaskSupervisor) hands their errors to
//! an [`ErrorHook`].

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::error;

use crate::foundation::event::EventArgs;

/// A type alias for a boxed, pinned future that is `Send`.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// What a handler invocation returns.
pub type HandlerResult = anyhow::Result<()>;

// ============================================================================
// Handler Trait
// ============================================================================

/// A persistent subscriber for one event name.
pub trait Handler: Send + Sync + 'static {
    /// Starts one invocation with the dispatched arguments.
    fn call(&self, args: EventArgs) -> BoxFuture<'static, HandlerResult>;
}

impl<F, Fut> Handler for F
where
    F: Fn(EventArgs) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    fn call(&self, args: EventArgs) -> BoxFuture<'static, HandlerResult> {
        Box::pin((self)(args))
    }
}

/// A type-erased handler that can be stored in the dispatcher.
pub type BoxedHandler = Arc<dyn Handler>;

/// Converts a handler into its boxed form.
pub fn into_handler<H: Handler>(handler: H) -> BoxedHandler {
    Arc::new(handler)
}

// ============================================================================
// ErrorHook
// ============================================================================

/// Receives the failure of a handler invocation.
///
/// Called exactly once per failing invocation with the handler's method name
/// (`on_<event>`), the arguments it was called with and the error. Errors
/// returned from the hook itself are logged and dropped.
#[async_trait]
pub trait ErrorHook: Send + Sync + 'static {
    /// Handles a handler failure. The default logs it.
    async fn on_error(
        &self,
        event_method: &str,
        args: EventArgs,
        error: anyhow::Error,
    ) -> anyhow::Result<()> {
        error!(
            event_method = %event_method,
            args = ?args,
            error = ?error,
            "Ignoring exception in {event_method}"
        );
        Ok(())
    }
}

/// The default hook: records failures to the log and nothing else.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogErrorHook;

#[async_trait]
impl ErrorHook for LogErrorHook {}
