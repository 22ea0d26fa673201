//! Existence waiter: poll `head` until a freshly created bucket is visible.
//!
//! Object stores typically offer only eventual read-after-create consistency, so a successful
//! `create` is not proof that dependent calls will find the bucket. The waiter polls immediately,
//! then backs off exponentially from `min_delay` up to `max_delay` (with jitter, never below
//! `min_delay`), and clamps every sleep to the time left before its deadline.
//!
//! Outcomes:
//! - `Exists` → `Ok(WaitReport)`.
//! - `NotFound` or a transient error → poll again.
//! - any other backend error → `WaitError::Backend` at once.
//! - deadline reached, including while a `head` call is in flight → `WaitError::TimedOut`.
//! - cancellation → `WaitError::Cancelled` at once.
//!
//! The waiter needs a sleeper that advances time (the default [`TokioSleeper`], which also honors
//! paused tokio time in tests); with [`InstantSleeper`](crate::InstantSleeper) a bucket that never
//! appears would be polled without pause.

use crate::backend::{BucketBackend, BucketName, HeadStatus};
use crate::error::{BuildError, WaitError};
use crate::{Backoff, Jitter, Sleeper, TokioSleeper};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Defaults mirror the AWS SDK bucket-exists waiter.
pub const DEFAULT_MIN_POLL_DELAY: Duration = Duration::from_secs(5);
/// Longest sleep between polls under [`WaiterConfig::default`].
pub const DEFAULT_MAX_POLL_DELAY: Duration = Duration::from_secs(120);
/// Budget for one wait, whatever the caller's deadline.
pub const DEFAULT_MAX_WAIT: Duration = Duration::from_secs(60);

/// First poll interval of [`WaiterConfig::short`], sized for attempts of a few seconds.
pub const SHORT_MIN_POLL_DELAY: Duration = Duration::from_secs(1);
/// Longest poll interval of [`WaiterConfig::short`].
pub const SHORT_MAX_POLL_DELAY: Duration = Duration::from_secs(2);

/// Polling schedule and overall budget for one wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaiterConfig {
    min_delay: Duration,
    max_delay: Duration,
    max_wait: Duration,
    jitter: Jitter,
}

impl WaiterConfig {
    /// Start from the AWS-style defaults.
    pub fn builder() -> WaiterConfigBuilder {
        WaiterConfigBuilder::new()
    }

    /// Schedule for short attempt budgets: 1s, then 2s between polls, equal jitter.
    ///
    /// The default [`ProvisionerBuilder`](crate::ProvisionerBuilder) uses this, so a bucket that
    /// shows up a second after `create` is confirmed inside a 5s attempt.
    pub const fn short() -> Self {
        Self {
            min_delay: SHORT_MIN_POLL_DELAY,
            max_delay: SHORT_MAX_POLL_DELAY,
            max_wait: DEFAULT_MAX_WAIT,
            jitter: Jitter::Equal,
        }
    }

    /// Fixed-interval schedule; used by presets whose values are known to be valid.
    pub(crate) const fn fixed(interval: Duration, max_wait: Duration) -> Self {
        Self { min_delay: interval, max_delay: interval, max_wait, jitter: Jitter::None }
    }

    /// Builder seeded with this configuration.
    pub fn to_builder(&self) -> WaiterConfigBuilder {
        WaiterConfigBuilder { config: *self }
    }

    /// Sleep after the first poll, and the floor for every later one.
    pub fn min_delay(&self) -> Duration {
        self.min_delay
    }

    /// Cap on the exponential poll interval.
    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    /// Upper bound on a single wait, regardless of the caller's deadline.
    pub fn max_wait(&self) -> Duration {
        self.max_wait
    }

    /// Delay to sleep after poll number `polls` (1-based).
    pub fn poll_delay(&self, polls: usize) -> Duration {
        let base = Backoff::exponential(self.min_delay).delay(polls).min(self.max_delay);
        self.jitter.apply(base).max(self.min_delay)
    }
}

impl Default for WaiterConfig {
    fn default() -> Self {
        Self {
            min_delay: DEFAULT_MIN_POLL_DELAY,
            max_delay: DEFAULT_MAX_POLL_DELAY,
            max_wait: DEFAULT_MAX_WAIT,
            jitter: Jitter::Equal,
        }
    }
}

/// Builder for [`WaiterConfig`].
#[derive(Debug, Clone)]
pub struct WaiterConfigBuilder {
    config: WaiterConfig,
}

impl WaiterConfigBuilder {
    /// Seeded with [`WaiterConfig::default`].
    pub fn new() -> Self {
        Self { config: WaiterConfig::default() }
    }

    /// First sleep between polls; must be > 0.
    pub fn min_delay(mut self, delay: Duration) -> Self {
        self.config.min_delay = delay;
        self
    }

    /// Cap on the sleep between polls; must be >= `min_delay`.
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.config.max_delay = delay;
        self
    }

    /// Budget for one wait; must be > 0.
    pub fn max_wait(mut self, budget: Duration) -> Self {
        self.config.max_wait = budget;
        self
    }

    /// Jitter applied to each poll interval (never below `min_delay`).
    pub fn with_jitter(mut self, jitter: Jitter) -> Self {
        self.config.jitter = jitter;
        self
    }

    /// Validate and produce the configuration.
    pub fn build(self) -> Result<WaiterConfig, BuildError> {
        let c = self.config;
        if c.min_delay.is_zero() {
            return Err(BuildError::ZeroDuration { field: "min_delay" });
        }
        if c.max_wait.is_zero() {
            return Err(BuildError::ZeroDuration { field: "max_wait" });
        }
        if c.min_delay > c.max_delay {
            return Err(BuildError::DelayRange { min: c.min_delay, max: c.max_delay });
        }
        Ok(c)
    }
}

impl Default for WaiterConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Successful wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitReport {
    /// `head` calls made, including the one that saw the bucket.
    pub polls: usize,
    /// Time from the first poll until the bucket was seen.
    pub elapsed: Duration,
}

/// Polls a backend until a bucket exists.
#[derive(Debug, Clone)]
pub struct ExistenceWaiter {
    config: WaiterConfig,
    sleeper: Arc<dyn Sleeper>,
}

impl ExistenceWaiter {
    /// Waiter sleeping on the tokio timer.
    pub fn new(config: WaiterConfig) -> Self {
        Self { config, sleeper: Arc::new(TokioSleeper) }
    }

    /// Sleep between polls with `sleeper` instead.
    pub fn with_sleeper<S>(mut self, sleeper: S) -> Self
    where
        S: Sleeper + 'static,
    {
        self.sleeper = Arc::new(sleeper);
        self
    }

    /// The polling schedule.
    pub fn config(&self) -> &WaiterConfig {
        &self.config
    }

    /// Wait up to the configured `max_wait`.
    pub async fn wait<B>(
        &self,
        backend: &B,
        name: &BucketName,
        cancel: &CancellationToken,
    ) -> Result<WaitReport, WaitError>
    where
        B: BucketBackend + ?Sized,
    {
        let deadline = Instant::now() + self.config.max_wait;
        self.wait_until_exists(backend, name, deadline, cancel).await
    }

    /// Wait until `deadline` (or `max_wait` from now, whichever comes first).
    pub async fn wait_until_exists<B>(
        &self,
        backend: &B,
        name: &BucketName,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> Result<WaitReport, WaitError>
    where
        B: BucketBackend + ?Sized,
    {
        let start = Instant::now();
        let deadline = deadline.min(start + self.config.max_wait);
        let mut polls = 0usize;
        let mut last_error = None;

        loop {
            if cancel.is_cancelled() {
                return Err(WaitError::Cancelled);
            }
            if Instant::now() >= deadline {
                return Err(WaitError::TimedOut { elapsed: start.elapsed(), polls, last_error });
            }

            polls += 1;
            let polled = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(WaitError::Cancelled),
                polled = tokio::time::timeout_at(deadline, backend.head(name)) => polled,
            };

            match polled {
                Err(_) => {
                    return Err(WaitError::TimedOut { elapsed: start.elapsed(), polls, last_error });
                }
                Ok(Ok(HeadStatus::Exists)) => {
                    tracing::debug!(bucket = %name, polls, "bucket is visible");
                    return Ok(WaitReport { polls, elapsed: start.elapsed() });
                }
                Ok(Ok(HeadStatus::NotFound)) => {
                    tracing::trace!(bucket = %name, polls, "bucket not visible yet");
                }
                Ok(Err(e)) if e.is_transient() => {
                    tracing::debug!(bucket = %name, polls, error = %e, "transient existence check failure");
                    last_error = Some(e);
                }
                Ok(Err(e)) => return Err(WaitError::Backend(e)),
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                continue;
            }
            let delay = self.config.poll_delay(polls).min(remaining);
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(WaitError::Cancelled),
                _ = self.sleeper.sleep(delay) => {}
            }
        }
    }
}

impl Default for ExistenceWaiter {
    fn default() -> Self {
        Self::new(WaiterConfig::default())
    }
}
