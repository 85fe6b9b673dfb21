// SPDX-License-Identifier: MIT

//! Outcome taxonomy for guarded executions
//!
//! Every execution attempt converges on exactly one [`ExecutionOutcome`]. The
//! [`Fault`] variants classify how an attempt failed, and that classification
//! drives the resilience pipeline: which faults are recorded by the circuit
//! breaker, which are retried, and which may be substituted by a fallback.

use thiserror::Error;

/// Error type produced by a guarded operation.
pub type OpError = Box<dyn std::error::Error + Send + Sync>;

/// Terminal result of one execution (or one attempt, before retry handling).
pub type ExecutionOutcome<T> = Result<T, Fault>;

/// Classification of a failed attempt.
#[derive(Debug, Error)]
pub enum Fault {
    /// The guarded operation itself returned an error.
    #[error("operation failed: {0}")]
    Operation(#[source] OpError),

    /// The attempt exceeded its deadline and was aborted.
    #[error("operation timed out")]
    TimedOut,

    /// The circuit breaker denied permission; the operation never ran.
    #[error("circuit breaker open")]
    CircuitOpen,

    /// The bulkhead had no permit or queue slot; the operation never ran.
    #[error("bulkhead rejected execution")]
    BulkheadRejected,

    /// The caller cancelled the execution.
    #[error("execution cancelled")]
    Cancelled,

    /// An engine-internal error. Always terminal; bypasses retry and fallback.
    #[error("internal fault tolerance error: {0}")]
    Internal(String),
}

impl Fault {
    /// True for engine-caused failures that must short-circuit the pipeline.
    pub fn is_internal(&self) -> bool {
        matches!(self, Fault::Internal(_))
    }

    /// True if the attempt actually held a circuit-breaker permission slot.
    ///
    /// Rejections happen before the operation runs, so they are never
    /// recorded into the breaker's rolling window.
    pub fn consumed_permission(&self) -> bool {
        !matches!(self, Fault::CircuitOpen | Fault::BulkheadRejected)
    }

    /// True if the retry policy may schedule another attempt for this fault.
    pub fn eligible_for_retry(&self) -> bool {
        matches!(self, Fault::Operation(_) | Fault::TimedOut)
    }

    /// True if a configured fallback may substitute a result for this fault.
    pub fn eligible_for_fallback(&self) -> bool {
        !matches!(self, Fault::Cancelled | Fault::Internal(_))
    }
}

#[cfg(test)]
#[path = "outcome_tests.rs"]
mod tests;
