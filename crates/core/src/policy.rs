// SPDX-License-Identifier: MIT

//! Immutable resilience policies
//!
//! Policies are produced by the caller (or deserialized from configuration),
//! handed to the engine at construction, and never mutated afterwards. Each
//! policy is optional; an absent policy disables that feature entirely.

use rand::RngExt;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Backoff shape applied between retry attempts
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backoff {
    /// Same delay before every retry
    Fixed,
    /// Delay grows by `factor` per attempt, capped at `max`
    Exponential {
        factor: f64,
        #[serde(with = "humantime_serde")]
        max: Duration,
    },
}

impl Default for Backoff {
    fn default() -> Self {
        Backoff::Fixed
    }
}

/// Retry budget and backoff configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum total attempts, including the first. `None` means unbounded
    /// by count (bound by `max_duration` instead).
    #[serde(default)]
    pub max_attempts: Option<u32>,
    /// Maximum elapsed time across all attempts of one execution.
    #[serde(default, with = "humantime_serde::option")]
    pub max_duration: Option<Duration>,
    /// Base delay before a retry.
    #[serde(with = "humantime_serde")]
    pub delay: Duration,
    #[serde(default)]
    pub backoff: Backoff,
    /// Uniform jitter applied to the computed delay, in `[-jitter, +jitter]`.
    #[serde(with = "humantime_serde")]
    pub jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3)
    }
}

impl RetryPolicy {
    /// Policy bounded by attempt count, with no delay between attempts
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: Some(max_attempts),
            max_duration: None,
            delay: Duration::ZERO,
            backoff: Backoff::Fixed,
            jitter: Duration::ZERO,
        }
    }

    /// Policy unbounded by count, retrying until `max_duration` elapses
    pub fn for_duration(max_duration: Duration) -> Self {
        Self {
            max_attempts: None,
            max_duration: Some(max_duration),
            delay: Duration::ZERO,
            backoff: Backoff::Fixed,
            jitter: Duration::ZERO,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn with_max_duration(mut self, max_duration: Duration) -> Self {
        self.max_duration = Some(max_duration);
        self
    }

    /// Delay to wait before the next attempt, given how many attempts have
    /// already run. Applies backoff growth and jitter.
    pub fn delay_for_attempt(&self, attempts_so_far: u32) -> Duration {
        let base = match self.backoff {
            Backoff::Fixed => self.delay,
            Backoff::Exponential { factor, max } => {
                let step = attempts_so_far.saturating_sub(1).min(i32::MAX as u32) as i32;
                let secs = self.delay.as_secs_f64() * factor.powi(step);
                Duration::try_from_secs_f64(secs).map_or(max, |d| d.min(max))
            }
        };
        apply_jitter(base, self.jitter)
    }
}

fn apply_jitter(base: Duration, jitter: Duration) -> Duration {
    if jitter.is_zero() {
        return base;
    }
    let base_ns = u64::try_from(base.as_nanos()).unwrap_or(u64::MAX);
    let jitter_ns = u64::try_from(jitter.as_nanos()).unwrap_or(u64::MAX);
    let offset = rand::rng().random_range(0..=jitter_ns.saturating_mul(2));
    Duration::from_nanos(base_ns.saturating_add(offset).saturating_sub(jitter_ns))
}

/// Circuit-breaker thresholds
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CircuitBreakerPolicy {
    /// Rolling-window size. Doubles as the minimum sample count: the breaker
    /// never opens before the window is full.
    pub window: usize,
    /// Failure ratio over the window at which the breaker opens.
    pub failure_ratio: f64,
    /// How long the breaker stays open before allowing trial requests.
    #[serde(with = "humantime_serde")]
    pub open_duration: Duration,
    /// Consecutive trial successes required to close from half-open.
    pub trial_successes: u32,
}

impl Default for CircuitBreakerPolicy {
    fn default() -> Self {
        Self::new(20, 0.5)
    }
}

impl CircuitBreakerPolicy {
    pub fn new(window: usize, failure_ratio: f64) -> Self {
        Self {
            window,
            failure_ratio,
            open_duration: Duration::from_secs(5),
            trial_successes: 1,
        }
    }

    pub fn with_open_duration(mut self, open_duration: Duration) -> Self {
        self.open_duration = open_duration;
        self
    }

    pub fn with_trial_successes(mut self, trial_successes: u32) -> Self {
        self.trial_successes = trial_successes;
        self
    }
}

/// Per-attempt deadline
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TimeoutPolicy {
    #[serde(with = "humantime_serde")]
    pub duration: Duration,
}

impl Default for TimeoutPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

impl TimeoutPolicy {
    pub fn new(duration: Duration) -> Self {
        Self { duration }
    }
}

/// Concurrency and queue admission bounds
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BulkheadPolicy {
    /// Maximum attempts running at once.
    pub max_concurrent: usize,
    /// Maximum attempts waiting for a permit. Zero disables queueing.
    pub max_queue: usize,
}

impl Default for BulkheadPolicy {
    fn default() -> Self {
        Self {
            max_concurrent: 10,
            max_queue: 10,
        }
    }
}

impl BulkheadPolicy {
    /// Bulkhead with no wait queue
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            max_concurrent,
            max_queue: 0,
        }
    }

    pub fn with_queue(mut self, max_queue: usize) -> Self {
        self.max_queue = max_queue;
        self
    }
}

/// The full policy bundle for one guarded operation
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FaultPolicies {
    #[serde(default)]
    pub retry: Option<RetryPolicy>,
    #[serde(default)]
    pub circuit_breaker: Option<CircuitBreakerPolicy>,
    #[serde(default)]
    pub timeout: Option<TimeoutPolicy>,
    #[serde(default)]
    pub bulkhead: Option<BulkheadPolicy>,
}

impl FaultPolicies {
    /// No resilience at all: a single unguarded attempt
    pub fn none() -> Self {
        Self::default()
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn with_circuit_breaker(mut self, circuit_breaker: CircuitBreakerPolicy) -> Self {
        self.circuit_breaker = Some(circuit_breaker);
        self
    }

    pub fn with_timeout(mut self, timeout: TimeoutPolicy) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_bulkhead(mut self, bulkhead: BulkheadPolicy) -> Self {
        self.bulkhead = Some(bulkhead);
        self
    }
}

#[cfg(test)]
#[path = "policy_tests.rs"]
mod tests;
