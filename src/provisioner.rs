//! Retry orchestrator: create a bucket, confirm it exists, retry within bounds.
//!
//! Semantics:
//! - `max_attempts` counts total attempts (initial try + retries) and must be > 0.
//! - Each attempt gets its own deadline of `attempt_timeout`, covering both `create` and the
//!   existence wait. There is no overall deadline; a hung attempt cannot eat into the next one.
//! - A `create` still running at the deadline is dropped, which closes its connection.
//! - A failed attempt is recorded, reported to the sink, and (if the retry predicate agrees)
//!   followed by a backoff and the next attempt.
//! - The caller sees `Ok(ProvisionReport)`, `Exhausted` carrying the *last* attempt's error,
//!   `Rejected` when the predicate refuses an error, or `Cancelled`.
//!
//! Invariants:
//! - Success is reported only when the final attempt's `create` succeeded and the waiter saw the
//!   bucket before that attempt's deadline.
//! - Attempts never overlap; attempt N is fully resolved before N+1 starts.
//! - Cancellation is checked first at every suspension point and is never reported as exhaustion.
//!
//! ```rust
//! use bucketwise::backend::{BackendError, CreateStatus};
//! use bucketwise::scripted::{Operation, Script, ScriptedBackend};
//! use bucketwise::telemetry::MemorySink;
//! use bucketwise::Provisioner;
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let backend = ScriptedBackend::builder()
//!     .create(Script::fail_times(2, BackendError::other("mocked create error"))
//!         .then_ok(CreateStatus::Created))
//!     .build();
//! let sink = MemorySink::new();
//! let provisioner = Provisioner::builder().with_sink(sink.clone()).build().unwrap();
//!
//! let report = provisioner.provision(&backend, "bucket-x", "eu-west-2", 3).await.unwrap();
//! assert_eq!(report.attempts.len(), 3);
//! assert_eq!(backend.calls(Operation::Create), 3);
//! assert_eq!(sink.attempt_failures(), 2);
//! # });
//! ```

use crate::backend::{BucketBackend, BucketName, CreateStatus, LocationHint, RequestError};
use crate::error::{AttemptError, BuildError, CreateError, ProvisionError, TeardownError, WaitError};
use crate::telemetry::{emit_best_effort, AttemptStage, LogSink, ProvisionEvent, TelemetrySink};
use crate::waiter::{ExistenceWaiter, WaiterConfig};
use crate::{Backoff, Jitter, Sleeper, TokioSleeper};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Attempts made by `provision_default` unless configured otherwise.
pub const DEFAULT_MAX_ATTEMPTS: usize = 3;
/// Deadline for each attempt, create and confirmation together.
pub const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(5);

/// How to treat a `create` that reports the bucket as already owned by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "snake_case")
)]
pub enum ExistingBucketPolicy {
    /// Always fail the attempt with `CreateError::Conflict`.
    Reject,
    /// Accept only if an earlier attempt in the same call may have created it: its `create`
    /// succeeded, timed out, or failed transiently.
    #[default]
    AdoptAfterOwnAttempt,
    /// Accept any bucket the caller already owns.
    Adopt,
}

/// What happened in one attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// Created (or adopted) and confirmed.
    Success { adopted: bool, polls: usize },
    CreateFailed(CreateError),
    WaitFailed(WaitError),
}

impl AttemptOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, AttemptOutcome::Success { .. })
    }

    /// The failure, unified as an [`AttemptError`]; `None` on success.
    pub fn error(&self) -> Option<AttemptError> {
        match self {
            AttemptOutcome::Success { .. } => None,
            AttemptOutcome::CreateFailed(e) => Some(AttemptError::Create(e.clone())),
            AttemptOutcome::WaitFailed(e) => Some(AttemptError::Wait(e.clone())),
        }
    }

    fn stage(&self) -> AttemptStage {
        match self {
            AttemptOutcome::WaitFailed(_) => AttemptStage::Wait,
            _ => AttemptStage::Create,
        }
    }
}

/// One attempt's result, kept for the duration of a single call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptRecord {
    /// 1-based.
    pub attempt: usize,
    pub outcome: AttemptOutcome,
    /// Time from the start of `create` to the attempt's outcome.
    pub elapsed: Duration,
}

/// Successful provisioning.
#[derive(Debug, Clone)]
pub struct ProvisionReport {
    pub bucket: BucketName,
    /// Every attempt made, the last one successful.
    pub attempts: Vec<AttemptRecord>,
    /// Total time across all attempts and backoffs.
    pub elapsed: Duration,
}

impl ProvisionReport {
    /// True when the bucket already existed and was adopted rather than created.
    pub fn adopted(&self) -> bool {
        matches!(
            self.attempts.last().map(|r| &r.outcome),
            Some(AttemptOutcome::Success { adopted: true, .. })
        )
    }
}

/// The attempt was abandoned because the caller cancelled.
struct Interrupted;

type RetryPredicate = Arc<dyn Fn(&AttemptError) -> bool + Send + Sync>;

/// Drives bounded create → confirm attempts against a [`BucketBackend`].
///
/// Holds configuration only. The backend is borrowed per call.
#[derive(Clone)]
pub struct Provisioner<S = LogSink> {
    max_attempts: usize,
    attempt_timeout: Duration,
    backoff: Backoff,
    jitter: Jitter,
    should_retry: RetryPredicate,
    existing: ExistingBucketPolicy,
    waiter: ExistenceWaiter,
    sleeper: Arc<dyn Sleeper>,
    sink: S,
}

impl<S> std::fmt::Debug for Provisioner<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Provisioner")
            .field("max_attempts", &self.max_attempts)
            .field("attempt_timeout", &self.attempt_timeout)
            .field("backoff", &self.backoff)
            .field("jitter", &self.jitter)
            .field("existing", &self.existing)
            .field("waiter", self.waiter.config())
            .field("should_retry", &"<predicate>")
            .field("sink", &"<sink>")
            .finish()
    }
}

impl Provisioner<LogSink> {
    /// Start from the defaults; see [`ProvisionerBuilder::new`].
    pub fn builder() -> ProvisionerBuilder<LogSink> {
        ProvisionerBuilder::new()
    }
}

impl<S> Provisioner<S> {
    /// Attempt budget used by [`provision_default`](Self::provision_default).
    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    /// Deadline applied to each attempt and to teardown.
    pub fn attempt_timeout(&self) -> Duration {
        self.attempt_timeout
    }
}

impl<S> Provisioner<S>
where
    S: TelemetrySink,
    S::Future: Send + 'static,
{
    /// Provision with the configured default attempt budget.
    pub async fn provision_default<B>(
        &self,
        backend: &B,
        name: &str,
        location: &str,
    ) -> Result<ProvisionReport, ProvisionError>
    where
        B: BucketBackend + ?Sized,
    {
        self.provision(backend, name, location, self.max_attempts).await
    }

    /// Provision `name` at `location` with at most `max_attempts` attempts.
    pub async fn provision<B>(
        &self,
        backend: &B,
        name: &str,
        location: &str,
        max_attempts: usize,
    ) -> Result<ProvisionReport, ProvisionError>
    where
        B: BucketBackend + ?Sized,
    {
        let never = CancellationToken::new();
        self.provision_with_cancel(backend, name, location, max_attempts, &never).await
    }

    /// Like [`provision`](Self::provision), aborting as soon as `cancel` fires.
    pub async fn provision_with_cancel<B>(
        &self,
        backend: &B,
        name: &str,
        location: &str,
        max_attempts: usize,
        cancel: &CancellationToken,
    ) -> Result<ProvisionReport, ProvisionError>
    where
        B: BucketBackend + ?Sized,
    {
        let bucket = BucketName::new(name)?;
        if max_attempts == 0 {
            return Err(RequestError::ZeroAttempts(max_attempts).into());
        }
        let location = LocationHint::new(location);
        let started = Instant::now();
        let mut history: Vec<AttemptRecord> = Vec::new();
        let mut may_have_landed = false;

        for attempt in 1..=max_attempts {
            if cancel.is_cancelled() {
                return Err(self.cancelled(&bucket, attempt).await);
            }

            let attempt_started = Instant::now();
            let outcome = match self
                .run_attempt(backend, &bucket, &location, &mut may_have_landed, cancel)
                .await
            {
                Ok(outcome) => outcome,
                Err(Interrupted) => return Err(self.cancelled(&bucket, attempt).await),
            };
            let elapsed = attempt_started.elapsed();
            let stage = outcome.stage();
            let error = outcome.error();
            history.push(AttemptRecord { attempt, outcome, elapsed });

            let Some(error) = error else {
                let elapsed = started.elapsed();
                self.emit(ProvisionEvent::Provisioned {
                    bucket: bucket.to_string(),
                    attempts: attempt,
                    elapsed,
                })
                .await;
                return Ok(ProvisionReport { bucket, attempts: history, elapsed });
            };

            self.emit(ProvisionEvent::AttemptFailed {
                bucket: bucket.to_string(),
                attempt,
                stage,
                error: error.to_string(),
                elapsed,
            })
            .await;

            if !(self.should_retry)(&error) {
                self.emit(ProvisionEvent::Rejected {
                    bucket: bucket.to_string(),
                    attempt,
                    error: error.to_string(),
                })
                .await;
                return Err(ProvisionError::Rejected { attempt, error });
            }

            if attempt == max_attempts {
                self.emit(ProvisionEvent::Exhausted {
                    bucket: bucket.to_string(),
                    attempts: attempt,
                    last_error: error.to_string(),
                    elapsed: started.elapsed(),
                })
                .await;
                return Err(ProvisionError::exhausted(attempt, error, history));
            }

            let delay = self.jitter.apply(self.backoff.delay(attempt));
            if !delay.is_zero() {
                self.emit(ProvisionEvent::BackoffScheduled {
                    bucket: bucket.to_string(),
                    next_attempt: attempt + 1,
                    delay,
                })
                .await;
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(self.cancelled(&bucket, attempt + 1).await),
                    _ = self.sleeper.sleep(delay) => {}
                }
            }
        }

        // Every iteration returns on its last attempt, and max_attempts > 0 was checked above.
        unreachable!("provisioning loop ended without a terminal outcome")
    }

    /// One create → confirm cycle under a fresh deadline.
    async fn run_attempt<B>(
        &self,
        backend: &B,
        bucket: &BucketName,
        location: &LocationHint,
        may_have_landed: &mut bool,
        cancel: &CancellationToken,
    ) -> Result<AttemptOutcome, Interrupted>
    where
        B: BucketBackend + ?Sized,
    {
        let deadline = Instant::now() + self.attempt_timeout;

        let created = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Interrupted),
            created = tokio::time::timeout_at(deadline, backend.create(bucket, location)) => created,
        };

        let status = match created {
            Err(_) => {
                *may_have_landed = true;
                let timeout = self.attempt_timeout;
                return Ok(AttemptOutcome::CreateFailed(CreateError::TimedOut { timeout }));
            }
            Ok(Err(e)) => {
                *may_have_landed |= e.is_transient();
                return Ok(AttemptOutcome::CreateFailed(CreateError::Backend(e)));
            }
            Ok(Ok(status)) => status,
        };

        let adopted = match (status, self.existing) {
            (CreateStatus::Created, _) => {
                *may_have_landed = true;
                false
            }
            (CreateStatus::AlreadyOwned, ExistingBucketPolicy::Adopt) => true,
            (CreateStatus::AlreadyOwned, ExistingBucketPolicy::AdoptAfterOwnAttempt)
                if *may_have_landed =>
            {
                true
            }
            (CreateStatus::AlreadyOwned, _) => {
                tracing::warn!(
                    bucket = %bucket,
                    "bucket already exists but this call cannot vouch for creating it"
                );
                let conflict = CreateError::Conflict { bucket: bucket.to_string() };
                return Ok(AttemptOutcome::CreateFailed(conflict));
            }
        };

        match self.waiter.wait_until_exists(backend, bucket, deadline, cancel).await {
            Ok(report) => Ok(AttemptOutcome::Success { adopted, polls: report.polls }),
            Err(WaitError::Cancelled) => Err(Interrupted),
            Err(e) => Ok(AttemptOutcome::WaitFailed(e)),
        }
    }

    /// Delete `name`. A missing bucket is `TeardownError::NotFound`.
    pub async fn teardown<B>(&self, backend: &B, name: &str) -> Result<(), TeardownError>
    where
        B: BucketBackend + ?Sized,
    {
        let never = CancellationToken::new();
        self.teardown_with_cancel(backend, name, &never).await
    }

    /// Like [`teardown`](Self::teardown), returning `TeardownError::Cancelled` as soon as
    /// `cancel` fires.
    pub async fn teardown_with_cancel<B>(
        &self,
        backend: &B,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<(), TeardownError>
    where
        B: BucketBackend + ?Sized,
    {
        let bucket = BucketName::new(name)?;
        let deleted = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(TeardownError::Cancelled { bucket: bucket.to_string() });
            }
            deleted = tokio::time::timeout(self.attempt_timeout, backend.delete(&bucket)) => deleted,
        };

        let result = match deleted {
            Err(_) => Err(TeardownError::TimedOut { timeout: self.attempt_timeout }),
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) if e.is_not_found() => {
                Err(TeardownError::NotFound { bucket: bucket.to_string() })
            }
            Ok(Err(e)) => Err(TeardownError::Backend(e)),
        };

        let event = match &result {
            Ok(()) => ProvisionEvent::TornDown { bucket: bucket.to_string() },
            Err(e) => ProvisionEvent::TeardownFailed { bucket: bucket.to_string(), error: e.to_string() },
        };
        self.emit(event).await;
        result
    }

    /// Idempotent teardown: a bucket that is already gone counts as success.
    pub async fn ensure_absent<B>(&self, backend: &B, name: &str) -> Result<(), TeardownError>
    where
        B: BucketBackend + ?Sized,
    {
        match self.teardown(backend, name).await {
            Err(TeardownError::NotFound { .. }) => Ok(()),
            other => other,
        }
    }

    async fn cancelled(&self, bucket: &BucketName, attempt: usize) -> ProvisionError {
        self.emit(ProvisionEvent::Cancelled { bucket: bucket.to_string(), attempt }).await;
        ProvisionError::Cancelled { bucket: bucket.to_string(), attempt }
    }

    async fn emit(&self, event: ProvisionEvent) {
        emit_best_effort(self.sink.clone(), event).await;
    }
}

/// Default retry predicate: everything except a name conflict, which no retry can fix.
fn retry_unless_conflict(error: &AttemptError) -> bool {
    !matches!(error, AttemptError::Create(CreateError::Conflict { .. }))
}

/// Builder for [`Provisioner`].
pub struct ProvisionerBuilder<S> {
    max_attempts: usize,
    attempt_timeout: Duration,
    backoff: Backoff,
    jitter: Jitter,
    should_retry: RetryPredicate,
    existing: ExistingBucketPolicy,
    waiter: ExistenceWaiter,
    sleeper: Arc<dyn Sleeper>,
    sink: S,
}

impl ProvisionerBuilder<LogSink> {
    /// Defaults: 3 attempts, 5s per attempt, no backoff, [`WaiterConfig::short`] polls,
    /// `LogSink`.
    pub fn new() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            attempt_timeout: DEFAULT_ATTEMPT_TIMEOUT,
            backoff: Backoff::none(),
            jitter: Jitter::None,
            should_retry: Arc::new(retry_unless_conflict),
            existing: ExistingBucketPolicy::default(),
            waiter: ExistenceWaiter::new(WaiterConfig::short()),
            sleeper: Arc::new(TokioSleeper),
            sink: LogSink,
        }
    }
}

impl Default for ProvisionerBuilder<LogSink> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> ProvisionerBuilder<S> {
    /// Default attempt budget for `provision_default`. Must be > 0.
    pub fn max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Deadline for each attempt (create + wait). Must be > 0.
    pub fn attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    /// Delay between attempts.
    pub fn backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Jitter applied to each backoff delay.
    pub fn with_jitter(mut self, jitter: Jitter) -> Self {
        self.jitter = jitter;
        self
    }

    /// Existence waiter schedule; polls sleep on the tokio timer.
    pub fn waiter(mut self, config: WaiterConfig) -> Self {
        self.waiter = ExistenceWaiter::new(config);
        self
    }

    /// Schedule of the waiter currently configured.
    pub fn waiter_config(&self) -> &WaiterConfig {
        self.waiter.config()
    }

    /// Replace the existence waiter wholesale (custom sleeper included).
    pub fn existence_waiter(mut self, waiter: ExistenceWaiter) -> Self {
        self.waiter = waiter;
        self
    }

    /// Decide whether a failed attempt may be retried.
    pub fn should_retry<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&AttemptError) -> bool + Send + Sync + 'static,
    {
        self.should_retry = Arc::new(predicate);
        self
    }

    /// How to treat a bucket that `create` reports as already owned.
    pub fn existing_bucket(mut self, policy: ExistingBucketPolicy) -> Self {
        self.existing = policy;
        self
    }

    /// Sleeper used for backoff between attempts.
    pub fn with_sleeper<T>(mut self, sleeper: T) -> Self
    where
        T: Sleeper + 'static,
    {
        self.sleeper = Arc::new(sleeper);
        self
    }

    /// Route diagnostic events to `sink`.
    pub fn with_sink<T>(self, sink: T) -> ProvisionerBuilder<T>
    where
        T: TelemetrySink,
    {
        ProvisionerBuilder {
            max_attempts: self.max_attempts,
            attempt_timeout: self.attempt_timeout,
            backoff: self.backoff,
            jitter: self.jitter,
            should_retry: self.should_retry,
            existing: self.existing,
            waiter: self.waiter,
            sleeper: self.sleeper,
            sink,
        }
    }

    /// Validate the configuration.
    ///
    /// The waiter's first poll interval must be shorter than the attempt deadline, otherwise
    /// a freshly created bucket would get a single `head` before the attempt times out.
    pub fn build(self) -> Result<Provisioner<S>, BuildError> {
        if self.max_attempts == 0 {
            return Err(BuildError::InvalidMaxAttempts(0));
        }
        if self.attempt_timeout.is_zero() {
            return Err(BuildError::ZeroDuration { field: "attempt_timeout" });
        }
        let poll = self.waiter.config().min_delay();
        if poll >= self.attempt_timeout {
            return Err(BuildError::PollExceedsAttempt { poll, timeout: self.attempt_timeout });
        }
        Ok(Provisioner {
            max_attempts: self.max_attempts,
            attempt_timeout: self.attempt_timeout,
            backoff: self.backoff,
            jitter: self.jitter,
            should_retry: self.should_retry,
            existing: self.existing,
            waiter: self.waiter,
            sleeper: self.sleeper,
            sink: self.sink,
        })
    }
}
