//! The ingestion loop.
//!
//! ```text
//!            ┌──────────────┐  fatal error
//!  start ──► │ Negotiating  │ ────────────► return Err
//!            └──────┬───────┘
//!                   │ cursor (first time: diagnostics, then `ready`)
//!                   ▼
//!            ┌──────────────┐  CursorInvalid / transport failure
//!            │   Polling    │ ─────────────────────────► Negotiating
//!            └──────┬───────┘
//!                   │ batch (position adopted)
//!                   ▼
//!            ┌──────────────┐
//!            │ Dispatching  │ ──► Polling
//!            └──────────────┘
//! ```
//!
//! The loop owns the [`Cursor`]. Every successful poll replaces its position,
//! even when the batch is empty; a local timeout counts as an empty batch
//! and keeps the old position.
//!
//! Within a batch, updates are handled in order. `Ordered` hydrations are
//! awaited before the next update, `Detached` ones run on the supervisor and
//! dispatch whenever they finish. A failure while handling one update is
//! logged and the batch continues.

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use vkbot_core::{
    BoxFuture, Cursor, Dispatcher, Emission, EventArgs, HydrationFuture, Hydrated, Hydrator,
    PollError, PollTransport, READY_EVENT, RawUpdate, SessionNegotiator, SessionResult,
    panic_message,
};

/// Default pause between failed negotiation attempts.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Runs once, after the first successful negotiation and before `ready`.
pub type StartupHook = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send + Sync>;

/// Polls, hydrates and dispatches until shut down or a fatal error.
pub struct IngestionLoop {
    transport: Arc<dyn PollTransport>,
    negotiator: Arc<dyn SessionNegotiator>,
    hydrator: Arc<dyn Hydrator>,
    dispatcher: Dispatcher,
    retry_delay: Duration,
    shutdown: CancellationToken,
    startup_hook: Option<StartupHook>,
}

impl IngestionLoop {
    /// Wires a loop from its collaborators.
    pub fn new(
        transport: Arc<dyn PollTransport>,
        negotiator: Arc<dyn SessionNegotiator>,
        hydrator: Arc<dyn Hydrator>,
        dispatcher: Dispatcher,
    ) -> Self {
        Self {
            transport,
            negotiator,
            hydrator,
            dispatcher,
            retry_delay: DEFAULT_RETRY_DELAY,
            shutdown: CancellationToken::new(),
            startup_hook: None,
        }
    }

    /// Sets the pause between failed negotiation attempts.
    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Uses `token` to stop the loop.
    pub fn shutdown_on(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    /// Runs `hook` once the first session is up, before `ready`.
    pub fn on_startup<F, Fut>(mut self, hook: F) -> Self
    where
        F: FnOnce() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.startup_hook = Some(Box::new(move || Box::pin(hook())));
        self
    }

    /// Token that stops the loop when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// The dispatcher events are delivered to.
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Runs until the shutdown token is cancelled (`Ok`) or negotiation
    /// fails fatally (`Err`). An in-flight poll is abandoned on shutdown.
    pub async fn run(&mut self) -> SessionResult<()> {
        let shutdown = self.shutdown.clone();
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                info!("Ingestion loop stopped");
                Ok(())
            }
            result = self.drive() => result,
        }
    }

    async fn drive(&mut self) -> SessionResult<()> {
        let mut cursor = self.negotiate().await?;

        if let Some(hook) = self.startup_hook.take() {
            hook().await;
        }
        self.dispatcher.dispatch(READY_EVENT, EventArgs::empty());
        info!(server = %cursor.server(), "Long-poll started");

        loop {
            let polled = self.transport.poll(&cursor).await;
            match polled {
                Ok(batch) => {
                    trace!(
                        position = %batch.position,
                        updates = batch.updates.len(),
                        "Batch received"
                    );
                    cursor.advance(batch.position);
                    self.handle_batch(batch.updates).await;
                }
                Err(PollError::Timeout) => trace!("Poll timed out, no events"),
                Err(PollError::CursorInvalid { code }) => {
                    debug!(?code, "Long-poll session expired, renegotiating");
                    cursor = self.negotiate().await?;
                }
                Err(PollError::Transport(e)) => {
                    warn!(error = %e, "Ignoring exception in longpoll cycle");
                    cursor = self.negotiate().await?;
                }
            }
        }
    }

    /// Obtains a fresh cursor, retrying recoverable failures without a cap.
    async fn negotiate(&self) -> SessionResult<Cursor> {
        loop {
            match self.negotiator.negotiate().await {
                Ok(cursor) => {
                    debug!(position = %cursor.position(), "Long-poll session negotiated");
                    return Ok(cursor);
                }
                Err(e) if e.is_fatal() => {
                    error!(error = %e, "Long-poll negotiation failed");
                    return Err(e);
                }
                Err(e) => {
                    warn!(
                        error = %e,
                        retry_in = ?self.retry_delay,
                        "Long-poll negotiation failed, retrying"
                    );
                    tokio::time::sleep(self.retry_delay).await;
                }
            }
        }
    }

    async fn handle_batch(&self, updates: Vec<RawUpdate>) {
        for update in updates {
            let event_type = update.event_type.clone();
            let hydrated = std::panic::catch_unwind(AssertUnwindSafe(|| {
                self.hydrator.hydrate(update, &self.dispatcher)
            }));

            match hydrated {
                Ok(Ok(Hydrated::Ready(emission))) => self.emit(emission),
                Ok(Ok(Hydrated::Ordered(future))) => {
                    if let Some(emission) = settle(&event_type, future).await {
                        self.emit(emission);
                    }
                }
                Ok(Ok(Hydrated::Detached(future))) => {
                    let dispatcher = self.dispatcher.clone();
                    self.dispatcher.supervisor().spawn("hydrate", async move {
                        if let Some(emission) = settle(&event_type, future).await {
                            dispatcher.dispatch(&emission.event, emission.args);
                        }
                    });
                }
                Ok(Ok(Hydrated::Ignored)) => {}
                Ok(Err(e)) => warn!(
                    event = %event_type,
                    error = %format_args!("{e:#}"),
                    "Ignoring exception while handling update"
                ),
                Err(panic) => error!(
                    event = %event_type,
                    panic = %panic_message(panic.as_ref()),
                    "Update decoding panicked"
                ),
            }
        }
    }

    fn emit(&self, emission: Emission) {
        self.dispatcher.dispatch(&emission.event, emission.args);
    }
}

/// Awaits a hydration future, logging failures and panics.
async fn settle(event_type: &str, future: HydrationFuture) -> Option<Emission> {
    match AssertUnwindSafe(future).catch_unwind().await {
        Ok(Ok(emission)) => Some(emission),
        Ok(Err(e)) => {
            warn!(
                event = %event_type,
                error = %format_args!("{e:#}"),
                "Ignoring exception while hydrating update"
            );
            None
        }
        Err(panic) => {
            error!(
                event = %event_type,
                panic = %panic_message(panic.as_ref()),
                "Update hydration panicked"
            );
            None
        }
    }
}

impl fmt::Debug for IngestionLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IngestionLoop")
            .field("retry_delay", &self.retry_delay)
            .field("stopped", &self.shutdown.is_cancelled())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::json;
    use tokio::runtime::Handle;
    use vkbot_core::{PollBatch, Position, SessionError, TaskSupervisor, TransportError};
    use vkbot_model::Message;

    use crate::hydrate::GroupHydrator;

    type PollResult = Result<PollBatch, PollError>;

    /// Replays scripted poll results, then stops the loop.
    struct ScriptedTransport {
        script: Mutex<VecDeque<PollResult>>,
        seen: Mutex<Vec<Position>>,
        stop: CancellationToken,
    }

    impl ScriptedTransport {
        fn new(script: Vec<PollResult>, stop: CancellationToken) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                seen: Mutex::default(),
                stop,
            })
        }

        fn seen(&self) -> Vec<String> {
            self.seen.lock().iter().map(|p| p.to_string()).collect()
        }
    }

    #[async_trait]
    impl PollTransport for ScriptedTransport {
        async fn poll(&self, cursor: &Cursor) -> PollResult {
            self.seen.lock().push(cursor.position().clone());
            let next = self.script.lock().pop_front();
            match next {
                Some(result) => result,
                None => {
                    self.stop.cancel();
                    std::future::pending().await
                }
            }
        }
    }

    /// Hands out cursors at positions `100`, `200`, ...; scripted failures first.
    #[derive(Default)]
    struct CountingNegotiator {
        failures: Mutex<VecDeque<SessionError>>,
        calls: AtomicUsize,
    }

    impl CountingNegotiator {
        fn failing(failures: Vec<SessionError>) -> Arc<Self> {
            Arc::new(Self {
                failures: Mutex::new(failures.into()),
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl SessionNegotiator for CountingNegotiator {
        async fn negotiate(&self) -> SessionResult<Cursor> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if let Some(error) = self.failures.lock().pop_front() {
                return Err(error);
            }
            Ok(Cursor::new(
                Position::new(format!("{}", n * 100)),
                "key",
                "https://lp.vk.com/wh1",
            ))
        }
    }

    /// API that must not be reached.
    struct NoApi;

    #[async_trait]
    impl vkbot_transport::ApiCaller for NoApi {
        async fn call(
            &self,
            method: &str,
            _params: serde_json::Value,
        ) -> vkbot_core::ApiResult<serde_json::Value> {
            panic!("unexpected API call {method}");
        }
    }

    fn dispatcher() -> Dispatcher {
        Dispatcher::new(TaskSupervisor::new(Handle::current()))
    }

    fn group_loop(
        transport: Arc<ScriptedTransport>,
        negotiator: Arc<CountingNegotiator>,
        dispatcher: Dispatcher,
        stop: CancellationToken,
    ) -> IngestionLoop {
        IngestionLoop::new(
            transport,
            negotiator,
            Arc::new(GroupHydrator::new(Arc::new(NoApi))),
            dispatcher,
        )
        .shutdown_on(stop)
    }

    fn batch(ts: &str, updates: Vec<RawUpdate>) -> PollResult {
        Ok(PollBatch {
            position: Position::new(ts),
            updates,
        })
    }

    fn message_new(text: &str) -> RawUpdate {
        RawUpdate::new(
            "message_new",
            json!({"message": {"id": 1, "peer_id": 5, "from_id": 5, "text": text}}),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_position_adopted_on_every_batch() {
        let stop = CancellationToken::new();
        let transport = ScriptedTransport::new(
            vec![batch("101", vec![]), Err(PollError::Timeout), batch("102", vec![])],
            stop.clone(),
        );
        let negotiator = Arc::new(CountingNegotiator::default());
        let mut ingest = group_loop(transport.clone(), negotiator.clone(), dispatcher(), stop);

        ingest.run().await.unwrap();
        assert_eq!(transport.seen(), vec!["100", "101", "101", "102"]);
        assert_eq!(negotiator.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_cursor_renegotiates_without_surfacing() {
        let stop = CancellationToken::new();
        let transport = ScriptedTransport::new(
            vec![
                Err(PollError::CursorInvalid { code: Some(2) }),
                Err(PollError::CursorInvalid { code: Some(3) }),
                Err(PollError::CursorInvalid { code: None }),
                batch("401", vec![message_new("after")]),
            ],
            stop.clone(),
        );
        let negotiator = Arc::new(CountingNegotiator::default());
        let d = dispatcher();
        let wait = d.wait_for("message_new").register();
        let mut ingest = group_loop(transport.clone(), negotiator.clone(), d, stop);

        ingest.run().await.unwrap();
        assert_eq!(negotiator.calls(), 4);
        assert_eq!(transport.seen(), vec!["100", "200", "300", "400", "401"]);
        let message = wait.await.unwrap();
        assert_eq!(message.downcast_ref::<Message>().unwrap().text, "after");
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_failure_renegotiates() {
        let stop = CancellationToken::new();
        let transport = ScriptedTransport::new(
            vec![Err(PollError::Transport(TransportError::RequestFailed {
                url: "https://lp.vk.com/wh1".into(),
                reason: "connection reset".into(),
            }))],
            stop.clone(),
        );
        let negotiator = Arc::new(CountingNegotiator::default());
        let mut ingest = group_loop(transport.clone(), negotiator.clone(), dispatcher(), stop);

        ingest.run().await.unwrap();
        assert_eq!(negotiator.calls(), 2);
        assert_eq!(transport.seen(), vec!["100", "200"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_message_reaches_handler() {
        let stop = CancellationToken::new();
        let transport = ScriptedTransport::new(
            vec![batch("101", vec![message_new("hello")])],
            stop.clone(),
        );
        let d = dispatcher();
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = received.clone();
        d.on("message_new", move |args: EventArgs| {
            let sink = sink.clone();
            async move {
                let message = args.first::<Message>().expect("message argument");
                sink.lock().push(message.text.clone());
                anyhow::Ok(())
            }
        });
        let wait = d
            .wait_for("message_new")
            .matching(|m: &Message| m.text == "hello")
            .register();

        let mut ingest = group_loop(
            transport,
            Arc::new(CountingNegotiator::default()),
            d.clone(),
            stop,
        );
        ingest.run().await.unwrap();
        d.supervisor().wait_idle().await;

        assert!(wait.await.is_ok());
        assert_eq!(*received.lock(), vec!["hello".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retryable_negotiation_errors_wait_and_retry() {
        let stop = CancellationToken::new();
        let transport = ScriptedTransport::new(vec![], stop.clone());
        let negotiator = CountingNegotiator::failing(vec![
            SessionError::Transport(TransportError::RequestFailed {
                url: "https://api.vk.com/method/groups.getLongPollServer".into(),
                reason: "dns".into(),
            }),
            SessionError::Api(vkbot_core::ApiError::Vk {
                code: 10,
                message: "Internal server error".into(),
            }),
        ]);
        let mut ingest = group_loop(transport.clone(), negotiator.clone(), dispatcher(), stop)
            .retry_delay(Duration::from_secs(3));

        let started = tokio::time::Instant::now();
        ingest.run().await.unwrap();
        assert_eq!(negotiator.calls(), 3);
        assert!(started.elapsed() >= Duration::from_secs(6));
        assert_eq!(transport.seen(), vec!["300"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_negotiation_error_ends_the_loop() {
        let stop = CancellationToken::new();
        let transport = ScriptedTransport::new(
            vec![Err(PollError::CursorInvalid { code: Some(2) })],
            stop.clone(),
        );
        let negotiator = Arc::new(CountingNegotiator::default());
        negotiator
            .failures
            .lock()
            .extend([SessionError::Configuration("long-poll disabled".into())]);
        let mut ingest = group_loop(transport.clone(), negotiator.clone(), dispatcher(), stop);

        let err = ingest.run().await.unwrap_err();
        assert!(matches!(err, SessionError::Configuration(_)));
        assert!(transport.seen().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_token_ends_the_loop() {
        let stop = CancellationToken::new();
        let transport = ScriptedTransport::new(vec![], stop.clone());
        let negotiator = CountingNegotiator::failing(vec![SessionError::Api(
            vkbot_core::ApiError::Vk {
                code: 5,
                message: "User authorization failed: invalid access_token".into(),
            },
        )]);
        let mut ingest = group_loop(transport.clone(), negotiator.clone(), dispatcher(), stop);

        let result = tokio::time::timeout(Duration::from_secs(3600), ingest.run())
            .await
            .expect("loop keeps retrying a rejected token");
        assert!(matches!(result, Err(SessionError::Api(_))));
        assert_eq!(negotiator.calls(), 1);
        assert!(transport.seen().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_ready_follows_startup_hook_once() {
        let stop = CancellationToken::new();
        let transport = ScriptedTransport::new(
            vec![Err(PollError::CursorInvalid { code: Some(2) })],
            stop.clone(),
        );
        let d = dispatcher();
        let order = Arc::new(Mutex::new(Vec::new()));

        let on_ready = order.clone();
        d.on(READY_EVENT, move |_args: EventArgs| {
            let on_ready = on_ready.clone();
            async move {
                on_ready.lock().push("ready");
                anyhow::Ok(())
            }
        });
        let on_startup = order.clone();
        let mut ingest = group_loop(
            transport,
            Arc::new(CountingNegotiator::default()),
            d.clone(),
            stop,
        )
        .on_startup(move || async move { on_startup.lock().push("diagnostics") });

        ingest.run().await.unwrap();
        d.supervisor().wait_idle().await;
        assert_eq!(*order.lock(), vec!["diagnostics", "ready"]);
    }

    /// Records hydration order; `slow` updates resolve after a delay.
    struct OrderProbe {
        log: Arc<Mutex<Vec<String>>>,
    }

    impl Hydrator for OrderProbe {
        fn hydrate(&self, update: RawUpdate, _dispatcher: &Dispatcher) -> anyhow::Result<Hydrated> {
            let name = update.event_type;
            self.log.lock().push(format!("hydrate {name}"));
            let log = self.log.clone();
            let kind = name.clone();
            match kind.as_str() {
                "fail" => anyhow::bail!("undecodable"),
                "boom" => panic!("decoder bug"),
                "detached" => Ok(Hydrated::detached(async move {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    log.lock().push(format!("resolve {name}"));
                    Ok(Emission::new(name, EventArgs::empty()))
                })),
                _ => Ok(Hydrated::ordered(async move {
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    log.lock().push(format!("resolve {name}"));
                    Ok(Emission::new(name, EventArgs::empty()))
                })),
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_ordered_hydration_blocks_the_batch_and_failures_are_contained() {
        let stop = CancellationToken::new();
        let updates = ["detached", "first", "fail", "boom", "second"]
            .into_iter()
            .map(|name| RawUpdate::new(name, json!({})))
            .collect();
        let transport = ScriptedTransport::new(vec![batch("101", updates)], stop.clone());
        let log = Arc::new(Mutex::new(Vec::new()));
        let d = dispatcher();
        let detached = d.wait_for("detached").register();

        let mut ingest = IngestionLoop::new(
            transport,
            Arc::new(CountingNegotiator::default()),
            Arc::new(OrderProbe { log: log.clone() }),
            d,
        )
        .shutdown_on(stop);
        let stop = ingest.shutdown_token();

        let runner = tokio::spawn(async move { ingest.run().await });
        detached.await.unwrap();
        stop.cancel();
        runner.await.unwrap().unwrap();

        assert_eq!(
            *log.lock(),
            vec![
                "hydrate detached",
                "hydrate first",
                "resolve first",
                "hydrate fail",
                "hydrate boom",
                "hydrate second",
                "resolve second",
                "resolve detached",
            ]
        );
    }
}
