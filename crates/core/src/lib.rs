// SPDX-License-Identifier: MIT

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! ward-core: Policy and outcome types for the Ward fault-tolerance engine
//!
//! This crate provides:
//! - Immutable resilience policies (retry, circuit breaker, timeout, bulkhead)
//! - The outcome taxonomy for guarded executions
//! - Clock and ID abstractions for testable time and identity
//! - The write-only metrics sink consumed by the engine

pub mod clock;
pub mod id;
pub mod metrics;
pub mod outcome;
pub mod policy;

// Re-exports
pub use clock::{Clock, FakeClock, SystemClock};
pub use id::{IdGen, SequentialIdGen, UuidIdGen};
pub use metrics::{MetricsSink, NoopMetrics, RecordingMetrics};
pub use outcome::{ExecutionOutcome, Fault, OpError};
pub use policy::{
    Backoff, BulkheadPolicy, CircuitBreakerPolicy, FaultPolicies, RetryPolicy, TimeoutPolicy,
};
