//! End-to-end provisioning behavior against the scripted and in-memory backends.
use bucketwise::memory::InMemoryBackend;
use bucketwise::scripted::{Operation, Script, ScriptedBackend};
use bucketwise::telemetry::{MemorySink, ProvisionEvent};
use bucketwise::{
    AttemptError, AttemptOutcome, Backoff, BackendError, BucketBackend, CancellationToken,
    CreateError,
    CreateStatus, HeadStatus, Jitter, ProvisionError, Provisioner, TeardownError, WaitError,
    WaiterConfig,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

fn waiter(poll: Duration) -> WaiterConfig {
    WaiterConfig::builder()
        .min_delay(poll)
        .max_delay(poll)
        .with_jitter(Jitter::None)
        .build()
        .unwrap()
}

fn provisioner(sink: &MemorySink) -> Provisioner<MemorySink> {
    Provisioner::builder()
        .attempt_timeout(Duration::from_secs(5))
        .waiter(waiter(Duration::from_millis(100)))
        .with_sink(sink.clone())
        .build()
        .unwrap()
}

fn cancel_after(delay: Duration) -> CancellationToken {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        trigger.cancel();
    });
    cancel
}

fn create_error_message(err: &ProvisionError) -> Option<String> {
    match err.last_error() {
        Some(AttemptError::Create(CreateError::Backend(e))) => Some(e.message().to_string()),
        _ => None,
    }
}

#[tokio::test(start_paused = true)]
async fn fails_twice_then_succeeds_on_third_attempt() {
    let backend = ScriptedBackend::builder()
        .create(
            Script::fail_times(2, BackendError::other("mocked create error"))
                .then_ok(CreateStatus::Created),
        )
        .build();
    let sink = MemorySink::new();

    let report = provisioner(&sink).provision(&backend, "bucket-x", "eu-west-2", 3).await.unwrap();

    assert_eq!(report.bucket.as_str(), "bucket-x");
    assert_eq!(report.attempts.len(), 3);
    assert!(report.attempts[2].outcome.is_success());
    assert_eq!(backend.calls(Operation::Create), 3);
    assert_eq!(sink.attempt_failures(), 2);
    assert!(matches!(sink.terminal(), Some(ProvisionEvent::Provisioned { attempts: 3, .. })));
}

#[tokio::test(start_paused = true)]
async fn always_failing_create_exhausts_with_last_error() {
    let backend = ScriptedBackend::builder()
        .create(
            Script::new()
                .then_err(BackendError::other("first failure"))
                .then_err(BackendError::other("second failure"))
                .then_err(BackendError::other("third failure")),
        )
        .build();
    let sink = MemorySink::new();

    let err = provisioner(&sink).provision(&backend, "bucket-y", "eu-west-2", 3).await.unwrap_err();

    assert!(err.is_exhausted());
    assert_eq!(err.attempts(), Some(3));
    assert_eq!(create_error_message(&err).as_deref(), Some("third failure"));
    assert_eq!(err.history().map(<[_]>::len), Some(3));
    assert_eq!(backend.calls(Operation::Create), 3);
    assert!(matches!(sink.terminal(), Some(ProvisionEvent::Exhausted { attempts: 3, .. })));
}

#[tokio::test(start_paused = true)]
async fn failure_count_against_budget() {
    for budget in 1..=4usize {
        for failures in 0..=5usize {
            let backend = ScriptedBackend::builder()
                .create(
                    Script::fail_times(failures, BackendError::transient("503"))
                        .then_ok(CreateStatus::Created),
                )
                .build();
            let sink = MemorySink::new();
            let result =
                provisioner(&sink).provision(&backend, "bucket-x", "eu-west-2", budget).await;

            if failures < budget {
                assert!(result.is_ok(), "f={failures} k={budget}");
                assert_eq!(backend.calls(Operation::Create), failures + 1);
            } else {
                let err = result.unwrap_err();
                assert_eq!(err.attempts(), Some(budget), "f={failures} k={budget}");
                assert_eq!(backend.calls(Operation::Create), budget);
            }
        }
    }
}

#[tokio::test(start_paused = true)]
async fn distinct_errors_report_the_second() {
    let backend = ScriptedBackend::builder()
        .create(
            Script::new()
                .then_err(BackendError::transient("connection reset"))
                .then_err(BackendError::other("access denied")),
        )
        .build();
    let sink = MemorySink::new();

    let err = provisioner(&sink).provision(&backend, "bucket-x", "eu-west-2", 2).await.unwrap_err();

    assert_eq!(create_error_message(&err).as_deref(), Some("access denied"));
    assert!(err.to_string().contains("access denied"));
}

#[tokio::test(start_paused = true)]
async fn hung_create_is_cut_at_the_attempt_deadline() {
    let backend = ScriptedBackend::builder()
        .create(
            Script::new()
                .then_delayed_ok(Duration::from_secs(60), CreateStatus::Created)
                .then_ok(CreateStatus::Created),
        )
        .build();
    let sink = MemorySink::new();
    let start = Instant::now();

    let report = provisioner(&sink).provision(&backend, "bucket-x", "eu-west-2", 3).await.unwrap();

    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_secs(5) && elapsed < Duration::from_secs(6), "{elapsed:?}");
    assert_eq!(report.attempts.len(), 2);
    assert_eq!(
        report.attempts[0].outcome,
        AttemptOutcome::CreateFailed(CreateError::TimedOut { timeout: Duration::from_secs(5) })
    );
}

#[tokio::test(start_paused = true)]
async fn each_attempt_gets_a_fresh_deadline() {
    // Attempt 1 burns its whole budget waiting; attempt 2 still gets a full 5s.
    let backend = ScriptedBackend::builder()
        .head(
            Script::new()
                .then_delayed_ok(Duration::from_secs(30), HeadStatus::Exists)
                .then_delayed_ok(Duration::from_millis(4_500), HeadStatus::Exists),
        )
        .build();
    let sink = MemorySink::new();

    let report = provisioner(&sink).provision(&backend, "bucket-x", "eu-west-2", 2).await.unwrap();

    assert_eq!(report.attempts.len(), 2);
    assert!(matches!(
        &report.attempts[0].outcome,
        AttemptOutcome::WaitFailed(WaitError::TimedOut { .. })
    ));
    assert!(report.attempts[1].elapsed >= Duration::from_millis(4_500));
}

#[tokio::test(start_paused = true)]
async fn cancellation_during_wait_beats_imminent_success() {
    let backend = ScriptedBackend::builder()
        .head(Script::new().then_ok(HeadStatus::NotFound).then_ok(HeadStatus::Exists))
        .build();
    let sink = MemorySink::new();
    let p = Provisioner::builder()
        .waiter(waiter(Duration::from_secs(1)))
        .with_sink(sink.clone())
        .build()
        .unwrap();
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        trigger.cancel();
    });

    let err = p
        .provision_with_cancel(&backend, "bucket-x", "eu-west-2", 3, &cancel)
        .await
        .unwrap_err();

    assert!(matches!(err, ProvisionError::Cancelled { attempt: 1, .. }));
    assert!(!err.is_exhausted());
    assert_eq!(backend.calls(Operation::Head), 1);
    assert!(matches!(sink.terminal(), Some(ProvisionEvent::Cancelled { attempt: 1, .. })));
}

#[tokio::test(start_paused = true)]
async fn cancelled_token_stops_before_any_call() {
    let backend = ScriptedBackend::new();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = provisioner(&MemorySink::new())
        .provision_with_cancel(&backend, "bucket-x", "eu-west-2", 3, &cancel)
        .await
        .unwrap_err();

    assert!(err.is_cancelled());
    assert_eq!(backend.calls(Operation::Create), 0);
}

#[tokio::test(start_paused = true)]
async fn cancellation_drops_an_in_flight_create() {
    let backend = ScriptedBackend::builder()
        .create(Script::new().then_delayed_ok(Duration::from_secs(60), CreateStatus::Created))
        .build();
    let sink = MemorySink::new();
    let cancel = cancel_after(Duration::from_millis(200));
    let start = Instant::now();

    let err = provisioner(&sink)
        .provision_with_cancel(&backend, "bucket-x", "eu-west-2", 3, &cancel)
        .await
        .unwrap_err();

    assert!(matches!(err, ProvisionError::Cancelled { attempt: 1, .. }));
    assert!(start.elapsed() < Duration::from_millis(250), "took {:?}", start.elapsed());
    assert_eq!(backend.calls(Operation::Create), 1);
    assert_eq!(backend.calls(Operation::Head), 0);
    assert_eq!(sink.attempt_failures(), 0);
}

#[tokio::test(start_paused = true)]
async fn cancellation_interrupts_the_backoff_sleep() {
    let backend = ScriptedBackend::builder()
        .create(Script::always_err(BackendError::transient("503 Slow Down")))
        .build();
    let sink = MemorySink::new();
    let p = Provisioner::builder()
        .backoff(Backoff::constant(Duration::from_secs(10)))
        .waiter(waiter(Duration::from_millis(100)))
        .with_sink(sink.clone())
        .build()
        .unwrap();
    let cancel = cancel_after(Duration::from_secs(1));
    let start = Instant::now();

    let err = p
        .provision_with_cancel(&backend, "bucket-x", "eu-west-2", 3, &cancel)
        .await
        .unwrap_err();

    assert!(matches!(err, ProvisionError::Cancelled { attempt: 2, .. }));
    assert!(start.elapsed() < Duration::from_secs(2), "took {:?}", start.elapsed());
    assert_eq!(backend.calls(Operation::Create), 1);
    assert_eq!(sink.attempt_failures(), 1);
    assert!(matches!(sink.terminal(), Some(ProvisionEvent::Cancelled { attempt: 2, .. })));
}

#[tokio::test(start_paused = true)]
async fn teardown_cancellation_drops_the_pending_delete() {
    let backend = ScriptedBackend::builder()
        .delete(Script::new().then_delayed_ok(Duration::from_secs(60), ()))
        .build();
    let cancel = cancel_after(Duration::from_millis(200));
    let start = Instant::now();

    let err = provisioner(&MemorySink::new())
        .teardown_with_cancel(&backend, "bucket-x", &cancel)
        .await
        .unwrap_err();

    assert_eq!(err, TeardownError::Cancelled { bucket: "bucket-x".into() });
    assert!(start.elapsed() < Duration::from_millis(250), "took {:?}", start.elapsed());
    assert_eq!(backend.calls(Operation::Delete), 1);
}

#[tokio::test(start_paused = true)]
async fn eventual_visibility_is_confirmed_before_success() {
    let backend = InMemoryBackend::with_visibility_lag(Duration::from_secs(2));
    let sink = MemorySink::new();
    let start = Instant::now();

    let report = provisioner(&sink).provision(&backend, "bucket-x", "eu-west-2", 3).await.unwrap();

    assert!(start.elapsed() >= Duration::from_secs(2));
    assert_eq!(report.attempts.len(), 1);
    assert!(backend.contains("bucket-x"));
    assert_eq!(backend.location_of("bucket-x").map(|l| l.to_string()).as_deref(), Some("eu-west-2"));
}

#[tokio::test(start_paused = true)]
async fn foreign_bucket_is_retried_until_exhausted() {
    let backend = InMemoryBackend::new().with_foreign_bucket("taken");
    let err = provisioner(&MemorySink::new())
        .provision(&backend, "taken", "eu-west-2", 2)
        .await
        .unwrap_err();

    match err.last_error().and_then(AttemptError::backend_error) {
        Some(e) => assert_eq!(e.kind(), bucketwise::BackendErrorKind::AlreadyExists),
        None => panic!("expected a backend error, got {err:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn teardown_of_missing_bucket_is_not_found_without_hanging() {
    let backend = InMemoryBackend::new();
    let start = Instant::now();

    let err = provisioner(&MemorySink::new()).teardown(&backend, "never-created").await.unwrap_err();

    assert!(err.is_not_found());
    assert!(start.elapsed() < Duration::from_secs(1));
}

#[tokio::test(start_paused = true)]
async fn teardown_surfaces_backend_failures() {
    let backend = ScriptedBackend::builder()
        .delete(Script::always_err(BackendError::rejected("BucketNotEmpty")))
        .build();

    let err = provisioner(&MemorySink::new()).teardown(&backend, "bucket-x").await.unwrap_err();

    assert_eq!(err, TeardownError::Backend(BackendError::rejected("BucketNotEmpty")));
}

#[tokio::test(start_paused = true)]
async fn works_through_trait_objects() {
    let backend: Arc<dyn BucketBackend> = Arc::new(InMemoryBackend::new());
    let p = provisioner(&MemorySink::new());

    p.provision(&backend, "bucket-x", "", 1).await.unwrap();
    p.ensure_absent(backend.as_ref(), "bucket-x").await.unwrap();
    p.ensure_absent(backend.as_ref(), "bucket-x").await.unwrap();
}
