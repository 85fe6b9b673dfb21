// SPDX-License-Identifier: MIT

//! Clock abstraction so time-based policy state is testable
//!
//! Circuit-breaker open durations and retry elapsed-time budgets read the
//! clock through this trait. Production code uses [`SystemClock`]; tests use
//! [`FakeClock`] and advance it explicitly instead of sleeping.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// A source of the current time
pub trait Clock: Clone + Send + Sync {
    fn now(&self) -> Instant;
}

/// Real monotonic clock
#[derive(Clone, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Controllable clock for tests
#[derive(Clone)]
pub struct FakeClock {
    now: Arc<Mutex<Instant>>,
}

impl FakeClock {
    pub fn new() -> Self {
        Self {
            now: Arc::new(Mutex::new(Instant::now())),
        }
    }

    /// Move the clock forward by `duration`
    pub fn advance(&self, duration: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += duration;
    }
}

impl Default for FakeClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for FakeClock {
    fn now(&self) -> Instant {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
#[path = "clock_tests.rs"]
mod tests;
