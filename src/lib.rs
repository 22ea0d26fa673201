#![forbid(unsafe_code)]
#![deny(warnings)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # bucketwise
//!
//! Resilient bucket provisioning for async Rust: create a storage bucket through an unreliable
//! API and converge on a definite answer.
//!
//! ## Features
//!
//! - **Bounded attempts**, each under its own deadline covering create *and* confirmation
//! - **Existence waiter** that polls until an eventually-consistent store shows the bucket
//! - **Backoff and jitter** between attempts (constant, linear, exponential)
//! - **Cancellation** through `tokio_util::sync::CancellationToken`, never mistaken for failure
//! - **Diagnostics** as `tower::Service` sinks, logged through `tracing` by default
//! - **Backends**: Amazon S3 (`aws` feature), a scripted double, and an in-memory store
//! - **Fault injection** TCP proxy for integration tests (`fault-injection` feature)
//!
//! ## Quick Start
//!
//! ```rust
//! use bucketwise::memory::InMemoryBackend;
//! use bucketwise::Provisioner;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let backend = InMemoryBackend::new();
//!     let provisioner = Provisioner::builder().max_attempts(3).build()?;
//!
//!     let report = provisioner.provision_default(&backend, "bucket-x", "eu-west-2").await?;
//!     println!("ready after {} attempt(s)", report.attempts.len());
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod backoff;
pub mod error;
#[cfg(feature = "fault-injection")]
pub mod fault;
pub mod jitter;
pub mod memory;
pub mod prelude;
pub mod presets;
pub mod provisioner;
#[cfg(feature = "aws")]
pub mod s3;
pub mod scripted;
#[cfg(feature = "serde")]
pub mod settings;
pub mod sleeper;
pub mod telemetry;
pub mod waiter;

// Re-exports
pub use backend::{
    BackendError, BackendErrorKind, BucketBackend, BucketName, CreateStatus, HeadStatus,
    LocationHint, RequestError,
};
pub use backoff::{Backoff, BackoffError, MAX_BACKOFF};
pub use error::{
    AttemptError, BuildError, CreateError, ProvisionError, TeardownError, WaitError,
    MAX_RECORDED_ATTEMPTS,
};
pub use jitter::Jitter;
pub use presets::Profile;
pub use provisioner::{
    AttemptOutcome, AttemptRecord, ExistingBucketPolicy, ProvisionReport, Provisioner,
    ProvisionerBuilder,
};
pub use sleeper::{InstantSleeper, Sleeper, TokioSleeper, TrackingSleeper};
pub use waiter::{ExistenceWaiter, WaitReport, WaiterConfig};

pub use tokio_util::sync::CancellationToken;
