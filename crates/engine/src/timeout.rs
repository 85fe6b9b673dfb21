// SPDX-License-Identifier: MIT

//! Per-attempt deadline timer
//!
//! One [`TimeoutState`] guards one execution attempt. The atomic state is the
//! single source of truth when a timeout races a normal completion: whichever
//! side wins the transition out of `Running` owns finalization, and the loser
//! must do nothing further.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;

const IDLE: u8 = 0;
const RUNNING: u8 = 1;
const STOPPED: u8 = 2;
const TIMED_OUT: u8 = 3;

/// Deadline state machine: Idle -> Running -> {Stopped | TimedOut}
pub struct TimeoutState {
    state: AtomicU8,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl TimeoutState {
    /// A state that never times out (no timeout policy).
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(IDLE),
            timer: Mutex::new(None),
        }
    }

    /// Start the deadline. `on_timeout` runs on a timer task only if the
    /// deadline elapses before [`TimeoutState::stop`] is called.
    pub fn start(self: &Arc<Self>, duration: Duration, on_timeout: impl FnOnce() + Send + 'static) {
        if self
            .state
            .compare_exchange(IDLE, RUNNING, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        let state = Arc::clone(self);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            if state
                .state
                .compare_exchange(RUNNING, TIMED_OUT, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                on_timeout();
            }
        });
        *self.timer.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);
    }

    /// Stop the timer. Returns `true` if the attempt completed in time (the
    /// caller owns finalization) and `false` if the timeout already fired
    /// (the timeout path owns finalization). Idempotent.
    pub fn stop(&self) -> bool {
        let won = match self.state.compare_exchange(
            RUNNING,
            STOPPED,
            Ordering::SeqCst,
            Ordering::SeqCst,
        ) {
            Ok(_) => true,
            Err(current) => current != TIMED_OUT,
        };
        if let Some(handle) = self.timer.lock().unwrap_or_else(|e| e.into_inner()).take() {
            handle.abort();
        }
        won
    }

    pub fn is_timed_out(&self) -> bool {
        self.state.load(Ordering::SeqCst) == TIMED_OUT
    }
}

impl Default for TimeoutState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "timeout_tests.rs"]
mod tests;
