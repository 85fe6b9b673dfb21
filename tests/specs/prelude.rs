//! Shared helpers for engine specs

use std::sync::atomic::{AtomicU32, Ordering};

pub use std::sync::Arc;
pub use std::time::Duration;
pub use tokio::sync::Notify;

pub use ward_core::{
    Backoff, BulkheadPolicy, CircuitBreakerPolicy, FakeClock, Fault, FaultPolicies, MetricsSink,
    OpError, RecordingMetrics, RetryPolicy, SequentialIdGen, SystemClock, TimeoutPolicy,
};
pub use ward_engine::{guarded, AsyncExecutor, ExecutorDeps, FallbackFn, GuardedOperation};

pub type TestExecutor = AsyncExecutor<u32, SystemClock, SequentialIdGen>;

pub fn executor(policies: FaultPolicies) -> (TestExecutor, Arc<RecordingMetrics>) {
    executor_with(policies, None)
}

pub fn executor_with(
    policies: FaultPolicies,
    fallback: Option<FallbackFn<u32>>,
) -> (TestExecutor, Arc<RecordingMetrics>) {
    let metrics = Arc::new(RecordingMetrics::new());
    let deps = ExecutorDeps {
        fallback,
        retry_filter: None,
        metrics: Arc::clone(&metrics) as Arc<dyn MetricsSink>,
    };
    let executor = AsyncExecutor::with_deps(
        "lookup-order",
        policies,
        deps,
        SystemClock,
        SequentialIdGen::default(),
    );
    (executor, metrics)
}

/// Executor on a controllable clock, for breaker cooldown specs.
pub fn executor_at(
    policies: FaultPolicies,
    clock: FakeClock,
) -> AsyncExecutor<u32, FakeClock, SequentialIdGen> {
    AsyncExecutor::with_deps(
        "lookup-order",
        policies,
        ExecutorDeps::default(),
        clock,
        SequentialIdGen::default(),
    )
}

/// Operation failing its first `failures` calls, then returning `value`.
/// The counter reports how many attempts actually ran.
pub fn flaky(failures: u32, value: u32) -> (GuardedOperation<u32>, Arc<AtomicU32>) {
    let calls = Arc::new(AtomicU32::new(0));
    let seen = Arc::clone(&calls);
    let operation = guarded(move || {
        let seen = Arc::clone(&seen);
        async move {
            if seen.fetch_add(1, Ordering::SeqCst) < failures {
                Err::<u32, OpError>("transient".into())
            } else {
                Ok(value)
            }
        }
    });
    (operation, calls)
}

pub fn always_failing() -> (GuardedOperation<u32>, Arc<AtomicU32>) {
    flaky(u32::MAX, 0)
}

/// Operation that sleeps far past any test deadline.
pub fn never_finishing() -> GuardedOperation<u32> {
    guarded(|| async {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(0)
    })
}

/// Operation that parks until the gate is notified, then returns `value`.
pub fn blocked_on(gate: &Arc<Notify>, value: u32) -> GuardedOperation<u32> {
    let gate = Arc::clone(gate);
    guarded(move || {
        let gate = Arc::clone(&gate);
        async move {
            gate.notified().await;
            Ok(value)
        }
    })
}
