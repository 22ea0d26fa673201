//! Error types for provisioning and teardown.
//!
//! Per-attempt errors ([`CreateError`], [`WaitError`], joined as [`AttemptError`]) are absorbed by
//! the retry loop and only reach the caller inside [`ProvisionError::Exhausted`] (or `Rejected`
//! when a custom retry predicate refuses one). Cancellation always escapes immediately.

use crate::backend::{BackendError, RequestError};
use crate::provisioner::AttemptRecord;
use std::sync::Arc;
use std::time::Duration;

/// Cap on attempt records kept inside `Exhausted`; the most recent are retained.
pub const MAX_RECORDED_ATTEMPTS: usize = 10;

/// The create half of an attempt failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CreateError {
    /// The backend refused or failed the call.
    #[error("create failed: {0}")]
    Backend(#[source] BackendError),
    /// The call did not finish before the attempt deadline; the request was dropped.
    #[error("create did not complete within {timeout:?}")]
    TimedOut { timeout: Duration },
    /// The bucket already exists and nothing in this call can vouch for having created it.
    #[error("bucket {bucket} already exists and was not created by this call")]
    Conflict { bucket: String },
}

/// The confirm half of an attempt failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WaitError {
    /// The bucket never became visible before the deadline.
    #[error("bucket not visible after {elapsed:?} ({polls} polls){}", last_error_suffix(.last_error))]
    TimedOut { elapsed: Duration, polls: usize, last_error: Option<BackendError> },
    /// `head` returned an error that polling will not fix.
    #[error("existence check failed: {0}")]
    Backend(#[source] BackendError),
    /// The caller cancelled the wait.
    #[error("wait cancelled")]
    Cancelled,
}

fn last_error_suffix(last: &Option<BackendError>) -> String {
    match last {
        Some(err) => format!("; last poll error: {err}"),
        None => String::new(),
    }
}

impl WaitError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, WaitError::TimedOut { .. })
    }
}

/// Why one attempt failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AttemptError {
    #[error(transparent)]
    Create(#[from] CreateError),
    #[error(transparent)]
    Wait(#[from] WaitError),
}

impl AttemptError {
    /// The backend error underneath, if the failure came from the backend.
    pub fn backend_error(&self) -> Option<&BackendError> {
        match self {
            AttemptError::Create(CreateError::Backend(e)) => Some(e),
            AttemptError::Wait(WaitError::Backend(e)) => Some(e),
            _ => None,
        }
    }

    /// Deadline-driven failures, either half.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            AttemptError::Create(CreateError::TimedOut { .. })
                | AttemptError::Wait(WaitError::TimedOut { .. })
        )
    }
}

/// Caller-visible failure of a provisioning call.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProvisionError {
    /// Arguments were invalid; no attempt was made.
    #[error("invalid provisioning request: {0}")]
    InvalidRequest(#[from] RequestError),
    /// Every attempt failed. `last` is the error from the final attempt.
    #[error("provisioning exhausted after {attempts} attempts; last error: {last}")]
    Exhausted {
        attempts: usize,
        #[source]
        last: AttemptError,
        history: Arc<Vec<AttemptRecord>>,
    },
    /// The retry predicate refused an error, ending the call early.
    #[error("attempt {attempt} failed with a non-retryable error: {error}")]
    Rejected {
        attempt: usize,
        #[source]
        error: AttemptError,
    },
    /// The caller cancelled the call.
    #[error("provisioning of {bucket} cancelled during attempt {attempt}")]
    Cancelled { bucket: String, attempt: usize },
}

impl ProvisionError {
    /// Build `Exhausted`, keeping only the most recent `MAX_RECORDED_ATTEMPTS` records.
    pub fn exhausted(attempts: usize, last: AttemptError, history: Vec<AttemptRecord>) -> Self {
        let history = if history.len() > MAX_RECORDED_ATTEMPTS {
            let skip = history.len() - MAX_RECORDED_ATTEMPTS;
            history.into_iter().skip(skip).collect()
        } else {
            history
        };
        ProvisionError::Exhausted { attempts, last, history: Arc::new(history) }
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self, ProvisionError::Exhausted { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, ProvisionError::Cancelled { .. })
    }

    /// Number of attempts made before giving up, if any were made.
    pub fn attempts(&self) -> Option<usize> {
        match self {
            ProvisionError::Exhausted { attempts, .. } => Some(*attempts),
            ProvisionError::Rejected { attempt, .. } | ProvisionError::Cancelled { attempt, .. } => {
                Some(*attempt)
            }
            ProvisionError::InvalidRequest(_) => None,
        }
    }

    /// The last underlying attempt error.
    pub fn last_error(&self) -> Option<&AttemptError> {
        match self {
            ProvisionError::Exhausted { last, .. } => Some(last),
            ProvisionError::Rejected { error, .. } => Some(error),
            _ => None,
        }
    }

    /// Recorded attempts for `Exhausted`.
    pub fn history(&self) -> Option<&[AttemptRecord]> {
        match self {
            ProvisionError::Exhausted { history, .. } => Some(history.as_slice()),
            _ => None,
        }
    }
}

/// Failure of a teardown call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TeardownError {
    #[error("invalid teardown request: {0}")]
    InvalidRequest(#[from] RequestError),
    /// There was nothing to delete.
    #[error("bucket {bucket} does not exist")]
    NotFound { bucket: String },
    #[error("delete did not complete within {timeout:?}")]
    TimedOut { timeout: Duration },
    #[error("delete failed: {0}")]
    Backend(#[source] BackendError),
    #[error("teardown of {bucket} cancelled")]
    Cancelled { bucket: String },
}

impl TeardownError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, TeardownError::NotFound { .. })
    }
}

/// Errors produced while building a provisioner or waiter configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BuildError {
    #[error("max_attempts must be > 0 (got {0})")]
    InvalidMaxAttempts(usize),
    #[error("{field} must be greater than zero")]
    ZeroDuration { field: &'static str },
    #[error("min_delay ({min:?}) must not exceed max_delay ({max:?})")]
    DelayRange { min: Duration, max: Duration },
    #[error("waiter min_delay ({poll:?}) must be shorter than attempt_timeout ({timeout:?})")]
    PollExceedsAttempt { poll: Duration, timeout: Duration },
}
