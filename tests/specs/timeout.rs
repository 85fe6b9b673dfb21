//! Timeout specs
//!
//! Each attempt carries its own deadline; a fired deadline forces the
//! attempt's result no matter what the operation does afterwards.

use crate::prelude::*;
use std::time::Instant;

#[tokio::test]
async fn a_slow_attempt_times_out() {
    let policies =
        FaultPolicies::none().with_timeout(TimeoutPolicy::new(Duration::from_millis(30)));
    let (executor, metrics) = executor(policies);

    let started = Instant::now();
    let context = executor.new_context(None);
    let handle = executor.execute(never_finishing(), context);

    assert!(matches!(handle.await, Err(Fault::TimedOut)));
    // Resolved by the deadline, not by the operation.
    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(metrics.failed(), 1);
}

#[tokio::test]
async fn a_fast_attempt_is_unaffected() {
    let policies = FaultPolicies::none().with_timeout(TimeoutPolicy::new(Duration::from_secs(5)));
    let (executor, _) = executor(policies);

    let context = executor.new_context(None);
    let handle = executor.execute(guarded(|| async { Ok(9) }), context);
    assert_eq!(handle.await.ok(), Some(9));
}

#[tokio::test]
async fn timeouts_are_retried_like_failures() {
    let policies = FaultPolicies::none()
        .with_timeout(TimeoutPolicy::new(Duration::from_millis(20)))
        .with_retry(RetryPolicy::new(2));
    let (executor, _) = executor(policies);

    let attempts = Arc::new(std::sync::atomic::AtomicU32::new(0));
    let seen = Arc::clone(&attempts);
    let operation = guarded(move || {
        let seen = Arc::clone(&seen);
        async move {
            seen.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(0)
        }
    });

    let context = executor.new_context(None);
    let handle = executor.execute(operation, context);

    assert!(matches!(handle.await, Err(Fault::TimedOut)));
    assert_eq!(attempts.load(std::sync::atomic::Ordering::SeqCst), 2);
}

#[tokio::test]
async fn deadline_races_resolve_exactly_once() {
    // Completion and deadline land close together; every handle must still
    // resolve, to either outcome.
    let policies =
        FaultPolicies::none().with_timeout(TimeoutPolicy::new(Duration::from_millis(10)));
    let (executor, _) = executor(policies);

    for _ in 0..20 {
        let context = executor.new_context(None);
        let handle = executor.execute(
            guarded(|| async {
                tokio::time::sleep(Duration::from_millis(10)).await;
                Ok(1)
            }),
            context,
        );
        match handle.await {
            Ok(1) | Err(Fault::TimedOut) => {}
            other => panic!("unexpected outcome: {other:?}"),
        }
    }
}
