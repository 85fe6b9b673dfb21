//! Bulkhead specs
//!
//! Concurrency caps, FIFO queueing, and rejection of excess work.

use crate::prelude::*;

#[tokio::test]
async fn excess_work_is_rejected_when_capacity_and_queue_are_full() {
    let policies = FaultPolicies::none().with_bulkhead(BulkheadPolicy::new(2));
    let (executor, metrics) = executor(policies);
    let gate = Arc::new(Notify::new());

    let mut held = Vec::new();
    for n in 0..2 {
        let context = executor.new_context(None);
        held.push(executor.execute(blocked_on(&gate, n), context));
    }

    let context = executor.new_context(None);
    let rejected = executor.execute(guarded(|| async { Ok(99) }), context);
    assert!(matches!(rejected.await, Err(Fault::BulkheadRejected)));
    assert_eq!(metrics.failed(), 1);

    gate.notify_one();
    gate.notify_one();
    for handle in held {
        assert!(handle.await.is_ok());
    }
}

#[tokio::test]
async fn queued_work_runs_once_a_permit_frees() {
    let policies =
        FaultPolicies::none().with_bulkhead(BulkheadPolicy::new(1).with_queue(1));
    let (executor, _) = executor(policies);
    let gate = Arc::new(Notify::new());

    let context = executor.new_context(None);
    let first = executor.execute(blocked_on(&gate, 1), context);

    let context = executor.new_context(None);
    let second = executor.execute(guarded(|| async { Ok(2) }), context);

    // Queue is full now; a third submission is rejected.
    let context = executor.new_context(None);
    let third = executor.execute(guarded(|| async { Ok(3) }), context);
    assert!(matches!(third.await, Err(Fault::BulkheadRejected)));

    gate.notify_one();
    assert_eq!(first.await.ok(), Some(1));
    assert_eq!(second.await.ok(), Some(2));
}

#[tokio::test]
async fn rejection_does_not_wait_for_running_work() {
    let policies = FaultPolicies::none().with_bulkhead(BulkheadPolicy::new(1));
    let (executor, _) = executor(policies);
    let gate = Arc::new(Notify::new());

    let context = executor.new_context(None);
    let held = executor.execute(blocked_on(&gate, 1), context);

    let started = std::time::Instant::now();
    let context = executor.new_context(None);
    let rejected = executor.execute(never_finishing(), context);
    assert!(matches!(rejected.await, Err(Fault::BulkheadRejected)));
    assert!(started.elapsed() < Duration::from_secs(5));

    gate.notify_one();
    assert_eq!(held.await.ok(), Some(1));
}

#[tokio::test]
async fn close_rejects_new_and_discards_queued_work() {
    let policies =
        FaultPolicies::none().with_bulkhead(BulkheadPolicy::new(1).with_queue(1));
    let (executor, _) = executor(policies);
    let gate = Arc::new(Notify::new());

    let context = executor.new_context(None);
    let running = executor.execute(blocked_on(&gate, 1), context);

    let context = executor.new_context(None);
    let queued = executor.execute(guarded(|| async { Ok(2) }), context);

    executor.close();

    // Discarded queue entries resolve as cancelled rather than hanging.
    assert!(matches!(queued.await, Err(Fault::Cancelled)));

    let context = executor.new_context(None);
    let late = executor.execute(guarded(|| async { Ok(3) }), context);
    assert!(matches!(late.await, Err(Fault::BulkheadRejected)));

    // Running work is left to finish.
    gate.notify_one();
    assert_eq!(running.await.ok(), Some(1));
}
