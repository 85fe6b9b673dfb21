// SPDX-License-Identifier: MIT

//! Per-execution retry budget
//!
//! Tracks attempts made against the policy's count and elapsed-time bounds
//! and computes the backoff delay for the next attempt. The orchestrator owns
//! the actual scheduling; this state only decides.

use std::sync::Arc;
use std::time::{Duration, Instant};
use ward_core::{Clock, ExecutionOutcome, Fault, RetryPolicy};

/// Optional filter narrowing which faults are retried. Applied on top of the
/// built-in eligibility rules, never widening them.
pub type RetryFilter = Arc<dyn Fn(&Fault) -> bool + Send + Sync>;

/// What the orchestrator should do after an attempt
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RetryDecision {
    Retry { delay: Duration },
    Stop,
}

/// Attempt budget for one logical execution
pub struct RetryState<C: Clock> {
    policy: Option<RetryPolicy>,
    filter: Option<RetryFilter>,
    clock: C,
    started: Instant,
    attempts: u32,
}

impl<C: Clock> RetryState<C> {
    pub fn new(policy: Option<RetryPolicy>, filter: Option<RetryFilter>, clock: C) -> Self {
        let started = clock.now();
        Self {
            policy,
            filter,
            clock,
            started,
            attempts: 0,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Consume one attempt result and decide whether to run another.
    pub fn record_result<T>(&mut self, outcome: &ExecutionOutcome<T>) -> RetryDecision {
        self.attempts += 1;

        let Some(policy) = &self.policy else {
            return RetryDecision::Stop;
        };
        let Err(fault) = outcome else {
            return RetryDecision::Stop;
        };
        if !fault.eligible_for_retry() {
            return RetryDecision::Stop;
        }
        if let Some(filter) = &self.filter {
            if !filter(fault) {
                return RetryDecision::Stop;
            }
        }
        if let Some(max) = policy.max_attempts {
            if self.attempts >= max {
                return RetryDecision::Stop;
            }
        }
        if let Some(max) = policy.max_duration {
            if self.clock.now().duration_since(self.started) >= max {
                return RetryDecision::Stop;
            }
        }

        RetryDecision::Retry {
            delay: policy.delay_for_attempt(self.attempts),
        }
    }
}

#[cfg(test)]
#[path = "retry_tests.rs"]
mod tests;
