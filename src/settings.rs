//! Plain-data provisioning settings, loadable from any serde format.
//!
//! Every field is optional; unset fields keep the values of the chosen profile.
//!
//! ```rust
//! use bucketwise::settings::ProvisionerSettings;
//!
//! let settings: ProvisionerSettings = serde_json::from_str(
//!     r#"{ "profile": "integration", "max_attempts": 4, "attempt_timeout_ms": 7000 }"#,
//! ).unwrap();
//! let provisioner = settings.into_builder().unwrap().build().unwrap();
//! assert_eq!(provisioner.max_attempts(), 4);
//! ```

use crate::error::BuildError;
use crate::presets::{Profile, UnknownProfile};
use crate::provisioner::{ExistingBucketPolicy, ProvisionerBuilder};
use crate::telemetry::LogSink;
use crate::Backoff;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProvisionerSettings {
    /// `local-stack` (default), `integration` or `production`.
    pub profile: Option<String>,
    pub max_attempts: Option<usize>,
    pub attempt_timeout_ms: Option<u64>,
    /// Constant delay between attempts.
    pub backoff_ms: Option<u64>,
    /// Fixed existence-poll interval.
    pub poll_interval_ms: Option<u64>,
    pub max_wait_ms: Option<u64>,
    pub existing_bucket: Option<ExistingBucketPolicy>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SettingsError {
    #[error(transparent)]
    UnknownProfile(#[from] UnknownProfile),
    #[error("invalid waiter settings: {0}")]
    Waiter(#[from] BuildError),
}

impl ProvisionerSettings {
    pub fn profile(&self) -> Result<Profile, UnknownProfile> {
        self.profile.as_deref().map_or(Ok(Profile::default()), str::parse::<Profile>)
    }

    /// Resolve into a builder. Attempt-level values are validated by `build()`.
    pub fn into_builder(self) -> Result<ProvisionerBuilder<LogSink>, SettingsError> {
        let mut builder = self.profile()?.builder();

        if let Some(attempts) = self.max_attempts {
            builder = builder.max_attempts(attempts);
        }
        if let Some(ms) = self.attempt_timeout_ms {
            builder = builder.attempt_timeout(Duration::from_millis(ms));
        }
        if let Some(ms) = self.backoff_ms {
            builder = builder.backoff(Backoff::constant(Duration::from_millis(ms)));
        }
        if let Some(policy) = self.existing_bucket {
            builder = builder.existing_bucket(policy);
        }

        if self.poll_interval_ms.is_some() || self.max_wait_ms.is_some() {
            let mut waiter = builder.waiter_config().to_builder();
            if let Some(ms) = self.poll_interval_ms {
                let interval = Duration::from_millis(ms);
                waiter = waiter.min_delay(interval).max_delay(interval);
            }
            if let Some(ms) = self.max_wait_ms {
                waiter = waiter.max_wait(Duration::from_millis(ms));
            }
            builder = builder.waiter(waiter.build()?);
        }

        Ok(builder)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_settings_mean_local_stack() {
        let settings = ProvisionerSettings::default();
        assert_eq!(settings.profile(), Ok(Profile::LocalStack));
        let p = settings.into_builder().unwrap().build().unwrap();
        assert_eq!(p.max_attempts(), 3);
        assert_eq!(p.attempt_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn zero_poll_interval_is_rejected() {
        let settings = ProvisionerSettings { poll_interval_ms: Some(0), ..Default::default() };
        assert!(matches!(
            settings.into_builder(),
            Err(SettingsError::Waiter(BuildError::ZeroDuration { field: "min_delay" }))
        ));
    }

    #[test]
    fn unknown_profile_is_reported() {
        let settings = ProvisionerSettings { profile: Some("staging".into()), ..Default::default() };
        assert!(matches!(settings.into_builder(), Err(SettingsError::UnknownProfile(_))));
    }
}
