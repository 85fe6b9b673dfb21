//! Circuit breaker specs
//!
//! Driven through the executor on a controllable clock, so the open
//! cooldown can elapse without real waiting.

use crate::prelude::*;
use std::sync::atomic::Ordering;

fn breaker_policies(window: usize, ratio: f64) -> FaultPolicies {
    FaultPolicies::none().with_circuit_breaker(
        CircuitBreakerPolicy::new(window, ratio).with_open_duration(Duration::from_secs(5)),
    )
}

#[tokio::test]
async fn repeated_failures_trip_the_breaker() {
    let executor = executor_at(breaker_policies(2, 1.0), FakeClock::new());
    let (operation, calls) = always_failing();

    for _ in 0..2 {
        let context = executor.new_context(None);
        let handle = executor.execute(operation.clone(), context);
        assert!(matches!(handle.await, Err(Fault::Operation(_))));
    }

    let context = executor.new_context(None);
    let handle = executor.execute(operation.clone(), context);
    assert!(matches!(handle.await, Err(Fault::CircuitOpen)));
    // The rejected call never reached the operation.
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn cooldown_and_a_successful_trial_close_the_breaker() {
    let clock = FakeClock::new();
    let executor = executor_at(breaker_policies(2, 1.0), clock.clone());
    let (failing, _) = always_failing();

    for _ in 0..2 {
        let context = executor.new_context(None);
        let _ = executor.execute(failing.clone(), context).await;
    }

    clock.advance(Duration::from_secs(5));

    // Half-open: the trial runs and its success closes the gate.
    let context = executor.new_context(None);
    let trial = executor.execute(guarded(|| async { Ok(1) }), context);
    assert_eq!(trial.await.ok(), Some(1));

    let context = executor.new_context(None);
    let settled = executor.execute(guarded(|| async { Ok(2) }), context);
    assert_eq!(settled.await.ok(), Some(2));
}

#[tokio::test]
async fn a_failed_trial_reopens_the_breaker() {
    let clock = FakeClock::new();
    let executor = executor_at(breaker_policies(2, 1.0), clock.clone());
    let (failing, calls) = always_failing();

    for _ in 0..2 {
        let context = executor.new_context(None);
        let _ = executor.execute(failing.clone(), context).await;
    }

    clock.advance(Duration::from_secs(5));

    let context = executor.new_context(None);
    let trial = executor.execute(failing.clone(), context);
    assert!(matches!(trial.await, Err(Fault::Operation(_))));

    // Straight back to open, with a fresh cooldown.
    let context = executor.new_context(None);
    let rejected = executor.execute(failing.clone(), context);
    assert!(matches!(rejected.await, Err(Fault::CircuitOpen)));
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    clock.advance(Duration::from_secs(5));
    let context = executor.new_context(None);
    let recovered = executor.execute(guarded(|| async { Ok(7) }), context);
    assert_eq!(recovered.await.ok(), Some(7));
}

#[tokio::test]
async fn a_mixed_window_below_the_ratio_stays_closed() {
    let executor = executor_at(breaker_policies(4, 0.75), FakeClock::new());
    let (flaky_op, calls) = flaky(2, 1);

    // Two failures, then successes: ratio 0.5 over the window of 4.
    for _ in 0..4 {
        let context = executor.new_context(None);
        let _ = executor.execute(flaky_op.clone(), context).await;
    }

    let context = executor.new_context(None);
    let next = executor.execute(flaky_op.clone(), context);
    assert_eq!(next.await.ok(), Some(1));
    assert_eq!(calls.load(Ordering::SeqCst), 5);
}
