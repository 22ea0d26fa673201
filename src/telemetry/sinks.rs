use super::events::{AttemptStage, ProvisionEvent};
use futures::future::BoxFuture;
use std::convert::Infallible;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use tower::Service;

/// A sink that consumes provisioning events.
pub trait TelemetrySink:
    tower::Service<ProvisionEvent, Response = (), Error = Self::SinkError> + Clone + Send + 'static
{
    type SinkError: std::error::Error + Send + 'static;
}

/// Deliver an event, honoring `poll_ready`, and swallow any sink error.
///
/// Diagnostics never change a provisioning outcome.
pub async fn emit_best_effort<S>(sink: S, event: ProvisionEvent)
where
    S: tower::Service<ProvisionEvent, Response = ()> + Send + Clone + 'static,
    S::Error: std::error::Error + Send + 'static,
    S::Future: Send + 'static,
{
    use tower::ServiceExt;

    if let Ok(mut ready) = sink.ready_oneshot().await {
        let _ = ready.call(event).await;
    }
}

/// Discards every event.
#[derive(Clone, Debug, Default)]
pub struct NullSink;

impl Service<ProvisionEvent> for NullSink {
    type Response = ();
    type Error = Infallible;
    type Future = BoxFuture<'static, Result<(), Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, _event: ProvisionEvent) -> Self::Future {
        Box::pin(async { Ok(()) })
    }
}

impl TelemetrySink for NullSink {
    type SinkError = Infallible;
}

/// Renders events through `tracing` with structured fields.
///
/// Failed attempts log at `error`, cancellation and backoff at `warn`/`debug`, success at `info`.
#[derive(Clone, Debug, Default)]
pub struct LogSink;

impl LogSink {
    fn log(event: &ProvisionEvent) {
        match event {
            ProvisionEvent::AttemptFailed { bucket, attempt, stage, error, elapsed } => match stage {
                AttemptStage::Create => tracing::error!(
                    bucket = %bucket,
                    attempt = *attempt,
                    elapsed_ms = elapsed.as_millis() as u64,
                    error = %error,
                    "failed to create bucket"
                ),
                AttemptStage::Wait => tracing::error!(
                    bucket = %bucket,
                    attempt = *attempt,
                    elapsed_ms = elapsed.as_millis() as u64,
                    error = %error,
                    "failed waiting for bucket to exist"
                ),
            },
            ProvisionEvent::BackoffScheduled { bucket, next_attempt, delay } => tracing::debug!(
                bucket = %bucket,
                next_attempt = *next_attempt,
                delay_ms = delay.as_millis() as u64,
                "backing off before next attempt"
            ),
            ProvisionEvent::Provisioned { bucket, attempts, elapsed } => tracing::info!(
                bucket = %bucket,
                attempts = *attempts,
                elapsed_ms = elapsed.as_millis() as u64,
                "bucket created successfully"
            ),
            ProvisionEvent::Exhausted { bucket, attempts, last_error, elapsed } => tracing::error!(
                bucket = %bucket,
                attempts = *attempts,
                elapsed_ms = elapsed.as_millis() as u64,
                error = %last_error,
                "failed to create bucket after multiple attempts"
            ),
            ProvisionEvent::Cancelled { bucket, attempt } => {
                tracing::warn!(bucket = %bucket, attempt = *attempt, "provisioning cancelled")
            }
            ProvisionEvent::Rejected { bucket, attempt, error } => tracing::error!(
                bucket = %bucket,
                attempt = *attempt,
                error = %error,
                "bucket creation failed with a non-retryable error"
            ),
            ProvisionEvent::TornDown { bucket } => {
                tracing::info!(bucket = %bucket, "bucket deleted successfully")
            }
            ProvisionEvent::TeardownFailed { bucket, error } => {
                tracing::error!(bucket = %bucket, error = %error, "failed to delete bucket")
            }
        }
    }
}

impl Service<ProvisionEvent> for LogSink {
    type Response = ();
    type Error = Infallible;
    type Future = BoxFuture<'static, Result<(), Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, event: ProvisionEvent) -> Self::Future {
        Self::log(&event);
        Box::pin(async { Ok(()) })
    }
}

impl TelemetrySink for LogSink {
    type SinkError = Infallible;
}

/// Keeps events in memory, evicting the oldest once `capacity` is reached.
#[derive(Clone, Debug)]
pub struct MemorySink {
    events: Arc<Mutex<Vec<ProvisionEvent>>>,
    capacity: usize,
    evicted: Arc<AtomicU64>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::with_capacity(1_000)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            events: Arc::new(Mutex::new(Vec::new())),
            capacity: capacity.max(1),
            evicted: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn events(&self) -> Vec<ProvisionEvent> {
        self.events.lock().map(|events| events.clone()).unwrap_or_default()
    }

    /// Number of `AttemptFailed` events recorded.
    pub fn attempt_failures(&self) -> usize {
        self.events().iter().filter(|e| e.is_attempt_failure()).count()
    }

    /// The most recent terminal event, if any.
    pub fn terminal(&self) -> Option<ProvisionEvent> {
        self.events().into_iter().rev().find(ProvisionEvent::is_terminal)
    }

    pub fn len(&self) -> usize {
        self.events.lock().map(|events| events.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        if let Ok(mut events) = self.events.lock() {
            events.clear();
        }
    }

    pub fn evicted(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new()
    }
}

impl Service<ProvisionEvent> for MemorySink {
    type Response = ();
    type Error = Infallible;
    type Future = BoxFuture<'static, Result<(), Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, event: ProvisionEvent) -> Self::Future {
        if let Ok(mut events) = self.events.lock() {
            if events.len() >= self.capacity {
                events.remove(0);
                self.evicted.fetch_add(1, Ordering::Relaxed);
            }
            events.push(event);
        }
        Box::pin(async { Ok(()) })
    }
}

impl TelemetrySink for MemorySink {
    type SinkError = Infallible;
}

/// Error from a composed sink, wrapping whichever inner sink failed.
#[derive(Debug, thiserror::Error)]
#[error("telemetry sink error: {0}")]
pub struct ComposedSinkError(#[source] Box<dyn std::error::Error + Send + Sync>);

/// Sends every event to both sinks.
#[derive(Clone, Debug)]
pub struct MulticastSink<A, B> {
    sink_a: A,
    sink_b: B,
}

impl<A, B> MulticastSink<A, B> {
    pub fn new(sink_a: A, sink_b: B) -> Self {
        Self { sink_a, sink_b }
    }
}

impl<A, B> Service<ProvisionEvent> for MulticastSink<A, B>
where
    A: tower::Service<ProvisionEvent, Response = ()> + Clone + Send + 'static,
    A::Error: std::error::Error + Send + Sync + 'static,
    A::Future: Send + 'static,
    B: tower::Service<ProvisionEvent, Response = ()> + Clone + Send + 'static,
    B::Error: std::error::Error + Send + Sync + 'static,
    B::Future: Send + 'static,
{
    type Response = ();
    type Error = ComposedSinkError;
    type Future = BoxFuture<'static, Result<(), Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, event: ProvisionEvent) -> Self::Future {
        let mut sink_a = self.sink_a.clone();
        let mut sink_b = self.sink_b.clone();
        let copy = event.clone();

        Box::pin(async move {
            let (res_a, res_b) = tokio::join!(sink_a.call(event), sink_b.call(copy));
            res_a.map_err(|e| ComposedSinkError(Box::new(e)))?;
            res_b.map_err(|e| ComposedSinkError(Box::new(e)))?;
            Ok(())
        })
    }
}

impl<A, B> TelemetrySink for MulticastSink<A, B>
where
    A: tower::Service<ProvisionEvent, Response = ()> + Clone + Send + 'static,
    A::Error: std::error::Error + Send + Sync + 'static,
    A::Future: Send + 'static,
    B: tower::Service<ProvisionEvent, Response = ()> + Clone + Send + 'static,
    B::Error: std::error::Error + Send + Sync + 'static,
    B::Future: Send + 'static,
{
    type SinkError = ComposedSinkError;
}
