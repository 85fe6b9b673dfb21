// SPDX-License-Identifier: MIT

//! Circuit-breaker gate state machine
//!
//! Shared by every execution of one guarded operation. The gate moves
//! Closed -> Open when the failure ratio over a full rolling window meets the
//! policy threshold, Open -> HalfOpen after the open duration elapses, and
//! HalfOpen -> Closed (all trials succeed) or back to Open (any trial fails).
//!
//! [`CircuitBreakerState::request_permission`] is the only read gate and
//! [`CircuitBreakerState::record_result`] the only mutator; both are safe to
//! call from concurrent attempts.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Instant;
use ward_core::{CircuitBreakerPolicy, Clock};

#[derive(Debug)]
enum Gate {
    Closed,
    Open { since: Instant },
    HalfOpen { started: u32, succeeded: u32 },
}

struct Window {
    gate: Gate,
    /// Rolling record of recent attempts, `true` for success.
    outcomes: VecDeque<bool>,
}

/// Per-operation failure tracker and gate
pub struct CircuitBreakerState<C: Clock> {
    policy: Option<CircuitBreakerPolicy>,
    clock: C,
    window: Mutex<Window>,
}

impl<C: Clock> CircuitBreakerState<C> {
    /// With no policy the breaker always permits and records nothing.
    pub fn new(policy: Option<CircuitBreakerPolicy>, clock: C) -> Self {
        Self {
            policy,
            clock,
            window: Mutex::new(Window {
                gate: Gate::Closed,
                outcomes: VecDeque::new(),
            }),
        }
    }

    /// Ask whether an attempt may run right now.
    ///
    /// Promotes Open -> HalfOpen once the open duration has elapsed; in
    /// HalfOpen, admits at most `trial_successes` in-flight trials.
    pub fn request_permission(&self) -> bool {
        let Some(policy) = &self.policy else {
            return true;
        };
        let mut window = self.window.lock().unwrap_or_else(|e| e.into_inner());
        match window.gate {
            Gate::Closed => true,
            Gate::Open { since } => {
                if self.clock.now().duration_since(since) >= policy.open_duration {
                    tracing::debug!("circuit breaker half-open, admitting trial");
                    window.gate = Gate::HalfOpen {
                        started: 1,
                        succeeded: 0,
                    };
                    true
                } else {
                    false
                }
            }
            Gate::HalfOpen {
                ref mut started, ..
            } => {
                if *started < policy.trial_successes {
                    *started += 1;
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Record the outcome of an attempt that was granted permission.
    pub fn record_result(&self, success: bool) {
        let Some(policy) = &self.policy else {
            return;
        };
        let mut window = self.window.lock().unwrap_or_else(|e| e.into_inner());
        match window.gate {
            Gate::Closed => {
                window.outcomes.push_back(success);
                while window.outcomes.len() > policy.window {
                    window.outcomes.pop_front();
                }
                if window.outcomes.len() >= policy.window
                    && failure_ratio(&window.outcomes) >= policy.failure_ratio
                {
                    tracing::info!("circuit breaker opened");
                    window.gate = Gate::Open {
                        since: self.clock.now(),
                    };
                    window.outcomes.clear();
                }
            }
            Gate::HalfOpen {
                started,
                succeeded,
            } => {
                if success {
                    if succeeded + 1 >= policy.trial_successes {
                        tracing::info!("circuit breaker closed after successful trials");
                        window.gate = Gate::Closed;
                    } else {
                        window.gate = Gate::HalfOpen {
                            started,
                            succeeded: succeeded + 1,
                        };
                    }
                } else {
                    tracing::info!("circuit breaker reopened after failed trial");
                    window.gate = Gate::Open {
                        since: self.clock.now(),
                    };
                }
            }
            // A straggler from before the gate opened; the window was reset.
            Gate::Open { .. } => {}
        }
    }
}

fn failure_ratio(outcomes: &VecDeque<bool>) -> f64 {
    if outcomes.is_empty() {
        return 0.0;
    }
    let failures = outcomes.iter().filter(|success| !**success).count();
    failures as f64 / outcomes.len() as f64
}

#[cfg(test)]
#[path = "breaker_tests.rs"]
mod tests;
