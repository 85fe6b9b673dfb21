// SPDX-License-Identifier: MIT

//! Write-only metrics sink
//!
//! The engine reports invocation outcomes and fallback usage through this
//! trait. Counters never feed back into engine decisions.

use std::sync::atomic::{AtomicU64, Ordering};

/// Receives engine counters. Implementations must be cheap and non-blocking.
pub trait MetricsSink: Send + Sync {
    /// One logical execution completed (after all retries).
    fn invocation(&self);
    /// The committed result of an execution was a failure.
    fn invocation_failed(&self);
    /// A fallback function was invoked.
    fn fallback_call(&self);
}

/// Discards all counters
#[derive(Default)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn invocation(&self) {}
    fn invocation_failed(&self) {}
    fn fallback_call(&self) {}
}

/// In-memory counters for tests and simple introspection
#[derive(Default)]
pub struct RecordingMetrics {
    invocations: AtomicU64,
    failed: AtomicU64,
    fallbacks: AtomicU64,
}

impl RecordingMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn invocations(&self) -> u64 {
        self.invocations.load(Ordering::SeqCst)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::SeqCst)
    }

    pub fn fallbacks(&self) -> u64 {
        self.fallbacks.load(Ordering::SeqCst)
    }
}

impl MetricsSink for RecordingMetrics {
    fn invocation(&self) {
        self.invocations.fetch_add(1, Ordering::SeqCst);
    }

    fn invocation_failed(&self) {
        self.failed.fetch_add(1, Ordering::SeqCst);
    }

    fn fallback_call(&self) {
        self.fallbacks.fetch_add(1, Ordering::SeqCst);
    }
}
