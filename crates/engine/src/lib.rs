// SPDX-License-Identifier: MIT

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! ward-engine: Asynchronous fault-tolerance execution engine
//!
//! An [`AsyncExecutor`] guards one async operation with the policies from
//! `ward-core`: bulkhead admission, circuit breaking, per-attempt timeouts,
//! retries with backoff, and fallback. [`AsyncExecutor::execute`] returns an
//! [`ExecutionHandle`] immediately; the handle resolves exactly once with the
//! committed outcome and supports cancellation.
//!
//! Requires a tokio runtime: attempts, timers, and delayed retries run as
//! spawned tasks.

pub mod breaker;
pub mod bulkhead;
pub mod context;
pub mod executor;
pub mod retry;
pub mod timeout;

// Re-exports
pub use breaker::CircuitBreakerState;
pub use bulkhead::{AttemptTask, BulkheadReservation, BulkheadState, ExecutionReference};
pub use context::{
    guarded, AttemptContext, ExecutionContext, ExecutionHandle, GuardedOperation, OperationFuture,
};
pub use executor::{AsyncExecutor, ExecutorDeps, FallbackFn};
pub use retry::{RetryDecision, RetryFilter, RetryState};
pub use timeout::TimeoutState;
