//! Supervised execution of handler invocations.
//!
//! Every handler invocation runs as its own task on the runtime handle the
//! supervisor was built with. The ingestion loop never awaits these tasks.
//!
//! Outcomes:
//!
//! | Outcome | Effect |
//! |---------|--------|
//! | `Ok(())` | nothing |
//! | `Err(e)` or panic | one call to [`ErrorHook::on_error`] |
//! | cancelled (shutdown / abort) | nothing, not a failure |
//! | hook fails or panics | logged at `error`, swallowed |

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{Instrument, debug, error, info_span, trace};

use super::handler::{BoxedHandler, ErrorHook, LogErrorHook};
use crate::foundation::event::EventArgs;

/// Runs handler invocations in isolation and routes their failures.
#[derive(Clone)]
pub struct TaskSupervisor {
    handle: Handle,
    hook: Arc<dyn ErrorHook>,
    token: CancellationToken,
    tracker: TaskTracker,
}

impl TaskSupervisor {
    /// Creates a supervisor that spawns onto `handle` and logs failures.
    pub fn new(handle: Handle) -> Self {
        Self {
            handle,
            hook: Arc::new(LogErrorHook),
            token: CancellationToken::new(),
            tracker: TaskTracker::new(),
        }
    }

    /// Replaces the failure hook.
    pub fn with_error_hook(mut self, hook: impl ErrorHook) -> Self {
        self.hook = Arc::new(hook);
        self
    }

    /// Returns the runtime handle tasks are spawned onto.
    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    /// Token cancelled by [`shutdown`](Self::shutdown).
    pub fn shutdown_token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Number of tasks still running.
    pub fn active_tasks(&self) -> usize {
        self.tracker.len()
    }

    /// Launches one handler invocation.
    pub fn schedule(&self, handler: BoxedHandler, event: &str, args: EventArgs) -> DispatchTask {
        let event_method = format!("on_{event}");
        let span = info_span!("handler", event_method = %event_method);

        let task = run_event(
            handler,
            Arc::clone(&self.hook),
            self.token.clone(),
            event_method.clone(),
            args,
        );
        let join = self
            .tracker
            .spawn_on(task.instrument(span), &self.handle);

        trace!(event_method = %event_method, "Handler scheduled");
        DispatchTask { event_method, join }
    }

    /// Launches a background job that is cancelled on shutdown.
    ///
    /// Used for work that must not hold up the ingestion loop, such as
    /// hydration that needs its own network calls.
    pub fn spawn<F>(&self, name: &'static str, job: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let token = self.token.clone();
        self.tracker.spawn_on(
            async move {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => trace!(job = name, "Background job cancelled"),
                    _ = job => {}
                }
            },
            &self.handle,
        )
    }

    /// Cancels every outstanding task.
    pub fn shutdown(&self) {
        debug!(active = self.tracker.len(), "Cancelling supervised tasks");
        self.token.cancel();
    }

    /// Waits until every task scheduled so far has finished.
    pub async fn wait_idle(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }
}

impl fmt::Debug for TaskSupervisor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskSupervisor")
            .field("active_tasks", &self.tracker.len())
            .field("cancelled", &self.token.is_cancelled())
            .finish()
    }
}

async fn run_event(
    handler: BoxedHandler,
    hook: Arc<dyn ErrorHook>,
    token: CancellationToken,
    event_method: String,
    args: EventArgs,
) {
    let call_args = args.clone();
    let invocation = AssertUnwindSafe(async move { handler.call(call_args).await }).catch_unwind();

    let outcome = tokio::select! {
        biased;
        _ = token.cancelled() => {
            trace!("Handler cancelled");
            return;
        }
        outcome = invocation => outcome,
    };

    let failure = match outcome {
        Ok(Ok(())) => return,
        Ok(Err(e)) => e,
        Err(panic) => anyhow::anyhow!("handler panicked: {}", panic_message(panic.as_ref())),
    };

    let report = AssertUnwindSafe(hook.on_error(&event_method, args, failure)).catch_unwind();
    let reported = tokio::select! {
        biased;
        _ = token.cancelled() => return,
        reported = report => reported,
    };

    match reported {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            error!(event_method = %event_method, error = ?e, "Error hook failed");
        }
        Err(panic) => {
            error!(
                event_method = %event_method,
                panic = %panic_message(panic.as_ref()),
                "Error hook panicked"
            );
        }
    }
}

/// Text of a panic payload caught with `catch_unwind`.
pub fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "<non-string panic payload>".to_string()
    }
}

// =============================================================================
// DispatchTask
// =============================================================================

/// Handle to one scheduled handler invocation.
///
/// Dropping it detaches the task; it keeps running.
pub struct DispatchTask {
    event_method: String,
    join: JoinHandle<()>,
}

impl DispatchTask {
    /// The handler's method name, e.g. `on_message_new`.
    pub fn event_method(&self) -> &str {
        &self.event_method
    }

    /// Returns `true` once the invocation (including any failure hook) ended.
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Cancels the invocation. Cancellation is not reported as a failure.
    pub fn abort(&self) {
        self.join.abort();
    }

    /// Waits for the invocation to end, however it ends.
    pub async fn finished(self) {
        let _ = self.join.await;
    }
}

impl fmt::Debug for DispatchTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = if self.join.is_finished() {
            "finished"
        } else {
            "pending"
        };
        write!(f, "<DispatchTask state={state} event={}>", self.event_method)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framework::handler::into_handler;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct RecordingHook {
        calls: Mutex<Vec<(String, i64, String)>>,
    }

    #[async_trait]
    impl ErrorHook for Arc<RecordingHook> {
        async fn on_error(
            &self,
            event_method: &str,
            args: EventArgs,
            error: anyhow::Error,
        ) -> anyhow::Result<()> {
            let n = args.first::<i64>().copied().unwrap_or(-1);
            self.calls
                .lock()
                .push((event_method.to_string(), n, error.to_string()));
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_failing_handler_never_stops_others() {
        let hook = Arc::new(RecordingHook::default());
        let supervisor = TaskSupervisor::new(Handle::current()).with_error_hook(Arc::clone(&hook));

        let invocations = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&invocations);
        let handler = into_handler(move |args: EventArgs| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                let n = *args.first::<i64>().expect("numbered event");
                if n % 2 == 1 {
                    anyhow::bail!("odd event {n}");
                }
                Ok(())
            }
        });

        for n in 0..10_i64 {
            supervisor.schedule(Arc::clone(&handler), "tick", EventArgs::one(n));
        }
        supervisor.wait_idle().await;

        assert_eq!(invocations.load(Ordering::SeqCst), 10);
        let mut failed: Vec<i64> = hook.calls.lock().iter().map(|c| c.1).collect();
        failed.sort_unstable();
        assert_eq!(failed, vec![1, 3, 5, 7, 9]);
        assert!(hook.calls.lock().iter().all(|c| c.0 == "on_tick"));
    }

    #[tokio::test]
    async fn test_panicking_handler_reaches_hook_once() {
        let hook = Arc::new(RecordingHook::default());
        let supervisor = TaskSupervisor::new(Handle::current()).with_error_hook(Arc::clone(&hook));

        let handler = into_handler(|_args: EventArgs| async move {
            if true {
                panic!("boom");
            }
            anyhow::Ok(())
        });
        let task = supervisor.schedule(handler, "explode", EventArgs::one(7_i64));
        assert_eq!(task.event_method(), "on_explode");
        task.finished().await;

        let calls = hook.calls.lock();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].1, 7);
        assert!(calls[0].2.contains("boom"));
    }

    #[tokio::test]
    async fn test_cancelled_handler_is_not_a_failure() {
        let hook = Arc::new(RecordingHook::default());
        let supervisor = TaskSupervisor::new(Handle::current()).with_error_hook(Arc::clone(&hook));

        let handler = into_handler(|_args: EventArgs| async move {
            std::future::pending::<()>().await;
            anyhow::Ok(())
        });
        supervisor.schedule(Arc::clone(&handler), "stuck", EventArgs::empty());
        let aborted = supervisor.schedule(handler, "stuck", EventArgs::empty());

        tokio::task::yield_now().await;
        aborted.abort();
        supervisor.shutdown();
        supervisor.wait_idle().await;

        assert_eq!(supervisor.active_tasks(), 0);
        assert!(hook.calls.lock().is_empty());
    }

    struct FailingHook(Arc<AtomicUsize>);

    #[async_trait]
    impl ErrorHook for FailingHook {
        async fn on_error(
            &self,
            _event_method: &str,
            _args: EventArgs,
            _error: anyhow::Error,
        ) -> anyhow::Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            anyhow::bail!("hook is broken too")
        }
    }

    #[tokio::test]
    async fn test_failing_hook_is_swallowed() {
        let hook_calls = Arc::new(AtomicUsize::new(0));
        let supervisor = TaskSupervisor::new(Handle::current())
            .with_error_hook(FailingHook(Arc::clone(&hook_calls)));

        let handler = into_handler(|_args: EventArgs| async move { anyhow::bail!("nope") });
        for _ in 0..3 {
            supervisor.schedule(Arc::clone(&handler), "bad", EventArgs::empty());
        }
        supervisor.wait_idle().await;

        assert_eq!(hook_calls.load(Ordering::SeqCst), 3);
    }
}
