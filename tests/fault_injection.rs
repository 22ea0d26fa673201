//! Provisioning through a fault-injecting TCP proxy, on real time.
mod common;

use bucketwise::fault::{Fault, FaultProxy};
use bucketwise::telemetry::MemorySink;
use bucketwise::{
    AttemptError, AttemptOutcome, CreateError, Jitter, Provisioner, WaiterConfig,
};
use common::{LineBackend, StubStore};
use std::net::SocketAddr;
use std::time::{Duration, Instant};

const ATTEMPT_TIMEOUT: Duration = Duration::from_secs(1);

fn provisioner(sink: &MemorySink) -> Provisioner<MemorySink> {
    let waiter = WaiterConfig::builder()
        .min_delay(Duration::from_millis(50))
        .max_delay(Duration::from_millis(50))
        .with_jitter(Jitter::None)
        .build()
        .unwrap();
    Provisioner::builder()
        .attempt_timeout(ATTEMPT_TIMEOUT)
        .waiter(waiter)
        .with_sink(sink.clone())
        .build()
        .unwrap()
}

async fn proxied_store() -> (FaultProxy, StubStore, LineBackend) {
    let store = StubStore::spawn().await;
    let proxy = FaultProxy::new();
    let listen: SocketAddr = "127.0.0.1:0".parse().unwrap();
    let addr = proxy.register_route("s3_proxy", listen, store.addr).await.unwrap();
    (proxy, store, LineBackend::new(addr))
}

#[tokio::test]
async fn clean_route_provisions_first_time() {
    let (_proxy, store, backend) = proxied_store().await;
    let sink = MemorySink::new();

    let report = provisioner(&sink).provision(&backend, "bucket-x", "eu-west-2", 3).await.unwrap();

    assert_eq!(report.attempts.len(), 1);
    assert!(store.contains("bucket-x"));
}

#[tokio::test]
async fn latency_past_deadline_times_out_then_next_attempt_succeeds() {
    let (proxy, store, backend) = proxied_store().await;
    proxy
        .add_fault_for(
            "s3_proxy",
            "latency",
            Fault::latency(Duration::from_secs(3)),
            1.0,
            Duration::from_millis(700),
        )
        .unwrap();
    let sink = MemorySink::new();
    let start = Instant::now();

    let report = provisioner(&sink).provision(&backend, "bucket-x", "eu-west-2", 3).await.unwrap();

    assert_eq!(report.attempts.len(), 2);
    let first = &report.attempts[0];
    assert_eq!(
        first.outcome,
        AttemptOutcome::CreateFailed(CreateError::TimedOut { timeout: ATTEMPT_TIMEOUT })
    );
    assert!(
        first.elapsed >= ATTEMPT_TIMEOUT && first.elapsed < ATTEMPT_TIMEOUT * 2,
        "first attempt took {:?}",
        first.elapsed
    );
    assert!(start.elapsed() < Duration::from_secs(3), "took {:?}", start.elapsed());
    assert_eq!(sink.attempt_failures(), 1);
    assert!(store.contains("bucket-x"));
}

#[tokio::test]
async fn persistent_refusal_exhausts_with_transient_errors() {
    let (proxy, store, backend) = proxied_store().await;
    proxy.add_fault("s3_proxy", "down", Fault::Refuse, 1.0).unwrap();
    let sink = MemorySink::new();

    let err = provisioner(&sink).provision(&backend, "bucket-y", "eu-west-2", 2).await.unwrap_err();

    assert_eq!(err.attempts(), Some(2));
    match err.last_error() {
        Some(AttemptError::Create(CreateError::Backend(e))) => assert!(e.is_transient()),
        other => panic!("expected transient create error, got {other:?}"),
    }
    assert!(!store.contains("bucket-y"));
}

#[tokio::test]
async fn removing_the_fault_restores_service() {
    let (proxy, _store, backend) = proxied_store().await;
    proxy.add_fault("s3_proxy", "down", Fault::Refuse, 1.0).unwrap();
    let sink = MemorySink::new();
    let p = provisioner(&sink);

    assert!(p.provision(&backend, "bucket-z", "eu-west-2", 1).await.is_err());

    proxy.remove_fault("s3_proxy", "down").unwrap();
    p.provision(&backend, "bucket-z", "eu-west-2", 1).await.unwrap();
    p.teardown(&backend, "bucket-z").await.unwrap();
    assert!(p.teardown(&backend, "bucket-z").await.unwrap_err().is_not_found());
}
