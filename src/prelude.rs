//! Convenient re-exports for common bucketwise types.
pub use crate::{
    backend::{BackendError, BucketBackend, BucketName, CreateStatus, HeadStatus, LocationHint},
    backoff::Backoff,
    error::{AttemptError, ProvisionError, TeardownError},
    jitter::Jitter,
    presets::{self, Profile},
    provisioner::{ExistingBucketPolicy, ProvisionReport, Provisioner},
    telemetry::{LogSink, MemorySink, ProvisionEvent, TelemetrySink},
    waiter::WaiterConfig,
    CancellationToken,
};
