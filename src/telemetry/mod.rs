//! Diagnostic events for provisioning and teardown.
//!
//! The provisioner reports every failed attempt and every terminal outcome as a
//! [`ProvisionEvent`]. Events flow into a [`TelemetrySink`], which is a
//! `tower::Service<ProvisionEvent>` so sinks compose like any other service.
//!
//! The default sink is [`LogSink`], which renders events through `tracing`. Tests usually reach
//! for [`MemorySink`] and count what was emitted.

pub mod events;
pub mod sinks;

pub use events::{AttemptStage, ProvisionEvent};
#[cfg(feature = "telemetry-json")]
pub use events::event_to_json;
pub use sinks::{
    emit_best_effort, ComposedSinkError, LogSink, MemorySink, MulticastSink, NullSink,
    TelemetrySink,
};
