//! Named provisioning profiles.
//!
//! Each preset returns a [`ProvisionerBuilder`] so callers can still swap the sink, sleeper or
//! retry predicate before building.
//!
//! ```rust
//! use bucketwise::presets;
//! use bucketwise::telemetry::MemorySink;
//! use std::time::Duration;
//!
//! let provisioner = presets::local_stack().with_sink(MemorySink::new()).build().unwrap();
//! assert_eq!(provisioner.attempt_timeout(), Duration::from_secs(5));
//! ```
//!
//! ## Available Presets
//!
//! - [`local_stack`]: emulator on localhost; quick polls, no backoff.
//! - [`integration`]: proxied test environments; same budget as `local_stack`, slower polls.
//! - [`production`]: real cloud endpoints; long attempts, jittered exponential backoff.

use crate::provisioner::ProvisionerBuilder;
use crate::telemetry::LogSink;
use crate::waiter::WaiterConfig;
use crate::{Backoff, Jitter};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

const LOCAL_ATTEMPTS: usize = 3;
const LOCAL_ATTEMPT_TIMEOUT_SECS: u64 = 5;
const LOCAL_POLL_MILLIS: u64 = 1_000;

const INTEGRATION_ATTEMPTS: usize = 3;
const INTEGRATION_ATTEMPT_TIMEOUT_SECS: u64 = 5;
const INTEGRATION_POLL_MILLIS: u64 = 500;

const PRODUCTION_ATTEMPTS: usize = 5;
const PRODUCTION_ATTEMPT_TIMEOUT_SECS: u64 = 60;
const PRODUCTION_BACKOFF_BASE_SECS: u64 = 1;
const PRODUCTION_BACKOFF_MAX_SECS: u64 = 10;

const WAIT_BUDGET_SECS: u64 = 60;

/// Local emulator (LocalStack, MinIO) profile.
///
/// - **Attempts:** 3, 5 seconds each
/// - **Backoff:** none
/// - **Waiter:** fixed 1s polls
pub fn local_stack() -> ProvisionerBuilder<LogSink> {
    ProvisionerBuilder::new()
        .max_attempts(LOCAL_ATTEMPTS)
        .attempt_timeout(Duration::from_secs(LOCAL_ATTEMPT_TIMEOUT_SECS))
        .waiter(WaiterConfig::fixed(
            Duration::from_millis(LOCAL_POLL_MILLIS),
            Duration::from_secs(WAIT_BUDGET_SECS),
        ))
}

/// Test environments reached through a fault-injecting proxy.
///
/// - **Attempts:** 3, 5 seconds each
/// - **Backoff:** none
/// - **Waiter:** fixed 500ms polls
pub fn integration() -> ProvisionerBuilder<LogSink> {
    ProvisionerBuilder::new()
        .max_attempts(INTEGRATION_ATTEMPTS)
        .attempt_timeout(Duration::from_secs(INTEGRATION_ATTEMPT_TIMEOUT_SECS))
        .waiter(WaiterConfig::fixed(
            Duration::from_millis(INTEGRATION_POLL_MILLIS),
            Duration::from_secs(WAIT_BUDGET_SECS),
        ))
}

/// Real cloud endpoints.
///
/// - **Attempts:** 5, 60 seconds each
/// - **Backoff:** exponential from 1s, capped at 10s, full jitter
/// - **Waiter:** AWS-style defaults (5s..120s polls, 60s budget)
pub fn production() -> ProvisionerBuilder<LogSink> {
    let base = Duration::from_secs(PRODUCTION_BACKOFF_BASE_SECS);
    let backoff = Backoff::exponential(base)
        .with_max(Duration::from_secs(PRODUCTION_BACKOFF_MAX_SECS))
        .unwrap_or(Backoff::exponential(base));

    ProvisionerBuilder::new()
        .max_attempts(PRODUCTION_ATTEMPTS)
        .attempt_timeout(Duration::from_secs(PRODUCTION_ATTEMPT_TIMEOUT_SECS))
        .backoff(backoff)
        .with_jitter(Jitter::full())
        .waiter(WaiterConfig::default())
}

/// Preset selector, parsed from `local-stack`, `integration` or `production`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Profile {
    /// [`local_stack`].
    #[default]
    LocalStack,
    /// [`integration`].
    Integration,
    /// [`production`].
    Production,
}

impl Profile {
    /// The preset builder this profile names.
    pub fn builder(self) -> ProvisionerBuilder<LogSink> {
        match self {
            Profile::LocalStack => local_stack(),
            Profile::Integration => integration(),
            Profile::Production => production(),
        }
    }

    /// Canonical kebab-case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Profile::LocalStack => "local-stack",
            Profile::Integration => "integration",
            Profile::Production => "production",
        }
    }
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A profile name that matches no preset.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown profile {0:?} (expected local-stack, integration or production)")]
pub struct UnknownProfile(pub String);

impl FromStr for Profile {
    type Err = UnknownProfile;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "local-stack" | "localstack" | "local" => Ok(Profile::LocalStack),
            "integration" | "test" => Ok(Profile::Integration),
            "production" | "prod" => Ok(Profile::Production),
            _ => Err(UnknownProfile(s.to_string())),
        }
    }
}
