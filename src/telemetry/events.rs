use std::fmt;
use std::time::Duration;

#[cfg(feature = "telemetry-json")]
use serde_json::json;

/// Which half of an attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptStage {
    Create,
    Wait,
}

impl fmt::Display for AttemptStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptStage::Create => f.write_str("create"),
            AttemptStage::Wait => f.write_str("wait"),
        }
    }
}

/// Diagnostic events emitted while provisioning or tearing down a bucket.
///
/// A provisioning call emits one `AttemptFailed` per failed attempt and exactly one terminal
/// event (`Provisioned`, `Exhausted`, `Cancelled`, or `Rejected`). Errors are carried as rendered
/// strings so events stay cheap to clone and fan out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProvisionEvent {
    /// One attempt failed and its error was absorbed by the retry loop.
    AttemptFailed {
        bucket: String,
        /// 1-based attempt number.
        attempt: usize,
        stage: AttemptStage,
        error: String,
        elapsed: Duration,
    },
    /// The provisioner is about to wait before attempt `next_attempt`.
    BackoffScheduled { bucket: String, next_attempt: usize, delay: Duration },
    /// The bucket was created and confirmed.
    Provisioned { bucket: String, attempts: usize, elapsed: Duration },
    /// Every attempt failed.
    Exhausted { bucket: String, attempts: usize, last_error: String, elapsed: Duration },
    /// The caller cancelled the call during `attempt`.
    Cancelled { bucket: String, attempt: usize },
    /// The retry predicate refused an error; no further attempts were made.
    Rejected { bucket: String, attempt: usize, error: String },
    /// `delete` succeeded.
    TornDown { bucket: String },
    /// `delete` failed.
    TeardownFailed { bucket: String, error: String },
}

impl ProvisionEvent {
    pub fn bucket(&self) -> &str {
        match self {
            ProvisionEvent::AttemptFailed { bucket, .. }
            | ProvisionEvent::BackoffScheduled { bucket, .. }
            | ProvisionEvent::Provisioned { bucket, .. }
            | ProvisionEvent::Exhausted { bucket, .. }
            | ProvisionEvent::Cancelled { bucket, .. }
            | ProvisionEvent::Rejected { bucket, .. }
            | ProvisionEvent::TornDown { bucket }
            | ProvisionEvent::TeardownFailed { bucket, .. } => bucket,
        }
    }

    /// Per-attempt failure events.
    pub fn is_attempt_failure(&self) -> bool {
        matches!(self, ProvisionEvent::AttemptFailed { .. })
    }

    /// Events that end a provisioning call.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProvisionEvent::Provisioned { .. }
                | ProvisionEvent::Exhausted { .. }
                | ProvisionEvent::Cancelled { .. }
                | ProvisionEvent::Rejected { .. }
        )
    }
}

impl fmt::Display for ProvisionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProvisionEvent::AttemptFailed { bucket, attempt, stage, error, elapsed } => write!(
                f,
                "AttemptFailed({bucket}, #{attempt}, {stage}, after {elapsed:?}: {error})"
            ),
            ProvisionEvent::BackoffScheduled { bucket, next_attempt, delay } => {
                write!(f, "BackoffScheduled({bucket}, next=#{next_attempt}, delay={delay:?})")
            }
            ProvisionEvent::Provisioned { bucket, attempts, elapsed } => {
                write!(f, "Provisioned({bucket}, attempts={attempts}, duration={elapsed:?})")
            }
            ProvisionEvent::Exhausted { bucket, attempts, last_error, elapsed } => write!(
                f,
                "Exhausted({bucket}, attempts={attempts}, duration={elapsed:?}, last={last_error})"
            ),
            ProvisionEvent::Cancelled { bucket, attempt } => {
                write!(f, "Cancelled({bucket}, #{attempt})")
            }
            ProvisionEvent::Rejected { bucket, attempt, error } => {
                write!(f, "Rejected({bucket}, #{attempt}: {error})")
            }
            ProvisionEvent::TornDown { bucket } => write!(f, "TornDown({bucket})"),
            ProvisionEvent::TeardownFailed { bucket, error } => {
                write!(f, "TeardownFailed({bucket}: {error})")
            }
        }
    }
}

#[cfg_attr(not(feature = "telemetry-json"), allow(dead_code))]
#[inline]
fn millis(d: &Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// Convert an event into a flat JSON object for log shippers.
#[cfg(feature = "telemetry-json")]
pub fn event_to_json(event: &ProvisionEvent) -> serde_json::Value {
    match event {
        ProvisionEvent::AttemptFailed { bucket, attempt, stage, error, elapsed } => json!({
            "kind": "attempt_failed",
            "bucket": bucket,
            "attempt": *attempt,
            "stage": stage.to_string(),
            "error": error,
            "elapsed_ms": millis(elapsed),
        }),
        ProvisionEvent::BackoffScheduled { bucket, next_attempt, delay } => json!({
            "kind": "backoff_scheduled",
            "bucket": bucket,
            "next_attempt": *next_attempt,
            "delay_ms": millis(delay),
        }),
        ProvisionEvent::Provisioned { bucket, attempts, elapsed } => json!({
            "kind": "provisioned",
            "bucket": bucket,
            "attempts": *attempts,
            "elapsed_ms": millis(elapsed),
        }),
        ProvisionEvent::Exhausted { bucket, attempts, last_error, elapsed } => json!({
            "kind": "exhausted",
            "bucket": bucket,
            "attempts": *attempts,
            "last_error": last_error,
            "elapsed_ms": millis(elapsed),
        }),
        ProvisionEvent::Cancelled { bucket, attempt } => json!({
            "kind": "cancelled",
            "bucket": bucket,
            "attempt": *attempt,
        }),
        ProvisionEvent::Rejected { bucket, attempt, error } => json!({
            "kind": "rejected",
            "bucket": bucket,
            "attempt": *attempt,
            "error": error,
        }),
        ProvisionEvent::TornDown { bucket } => json!({ "kind": "torn_down", "bucket": bucket }),
        ProvisionEvent::TeardownFailed { bucket, error } => json!({
            "kind": "teardown_failed",
            "bucket": bucket,
            "error": error,
        }),
    }
}

#[cfg(all(test, feature = "telemetry-json"))]
mod json_tests {
    use super::*;

    #[test]
    fn attempt_failed_json() {
        let v = event_to_json(&ProvisionEvent::AttemptFailed {
            bucket: "bucket-x".into(),
            attempt: 2,
            stage: AttemptStage::Wait,
            error: "not visible".into(),
            elapsed: Duration::from_millis(1500),
        });
        assert_eq!(v["kind"], "attempt_failed");
        assert_eq!(v["attempt"], 2);
        assert_eq!(v["stage"], "wait");
        assert_eq!(v["elapsed_ms"], 1500);
    }

    #[test]
    fn exhausted_json_carries_last_error() {
        let v = event_to_json(&ProvisionEvent::Exhausted {
            bucket: "bucket-y".into(),
            attempts: 3,
            last_error: "third".into(),
            elapsed: Duration::from_secs(2),
        });
        assert_eq!(v["kind"], "exhausted");
        assert_eq!(v["attempts"], 3);
        assert_eq!(v["last_error"], "third");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failed(attempt: usize) -> ProvisionEvent {
        ProvisionEvent::AttemptFailed {
            bucket: "bucket-x".into(),
            attempt,
            stage: AttemptStage::Create,
            error: "mocked create error".into(),
            elapsed: Duration::from_millis(3),
        }
    }

    #[test]
    fn attempt_failed_display() {
        let text = failed(2).to_string();
        assert!(text.contains("#2"));
        assert!(text.contains("create"));
        assert!(text.contains("mocked create error"));
    }

    #[test]
    fn classification() {
        assert!(failed(1).is_attempt_failure());
        assert!(!failed(1).is_terminal());

        let done = ProvisionEvent::Provisioned {
            bucket: "bucket-x".into(),
            attempts: 3,
            elapsed: Duration::from_millis(10),
        };
        assert!(done.is_terminal());
        assert_eq!(done.bucket(), "bucket-x");

        let torn = ProvisionEvent::TornDown { bucket: "bucket-x".into() };
        assert!(!torn.is_terminal());
        assert!(!torn.is_attempt_failure());
    }
}
