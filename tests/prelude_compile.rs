//! Compile-time prelude coverage test.
use bucketwise::prelude::*;
use std::time::Duration;

#[tokio::test(start_paused = true)]
async fn prelude_reexports_core_types() {
    let _backoff = Backoff::constant(Duration::from_millis(100));
    let _jitter = Jitter::None;
    let _waiter = WaiterConfig::default();
    let _profile = Profile::default();
    let sink = MemorySink::new();

    let provisioner = presets::local_stack()
        .existing_bucket(ExistingBucketPolicy::Adopt)
        .with_sink(sink.clone())
        .build()
        .unwrap();
    let backend = bucketwise::memory::InMemoryBackend::new();
    let cancel = CancellationToken::new();

    let report: ProvisionReport = provisioner
        .provision_with_cancel(&backend, "bucket-x", "eu-west-2", 1, &cancel)
        .await
        .unwrap();
    assert_eq!(report.bucket, BucketName::new("bucket-x").unwrap());
    assert!(matches!(sink.terminal(), Some(ProvisionEvent::Provisioned { .. })));
}
