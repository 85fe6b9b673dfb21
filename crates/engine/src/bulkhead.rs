// SPDX-License-Identifier: MIT

//! Bulkhead admission control
//!
//! Bounds how many attempts of one guarded operation run at once, with an
//! optional FIFO wait queue. Accepted attempts own exactly one permit through
//! a [`BulkheadReservation`]; the reservation releases explicitly on the
//! normal path and from `Drop` when a task is aborted, so permits cannot
//! leak. Releasing a permit promotes the oldest queued attempt.
//!
//! Tasks are only spawned and only dropped outside the slot mutex: at runtime
//! shutdown tokio drops a freshly spawned future inline, and that drop
//! releases a reservation, which takes the same mutex.
//!
//! Must be used from within a tokio runtime: accepted tasks are spawned onto
//! the shared worker pool.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use ward_core::BulkheadPolicy;

/// A unit of work accepted by the bulkhead. Receives the permit reservation
/// it must release when done.
pub type AttemptTask =
    Box<dyn FnOnce(BulkheadReservation) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send>;

enum SubmissionStatus {
    Queued,
    Running(JoinHandle<()>),
    Aborted,
}

struct Submission {
    status: Mutex<SubmissionStatus>,
}

struct Queued {
    task: AttemptTask,
    submission: Arc<Submission>,
}

struct Slots {
    running: usize,
    queue: VecDeque<Queued>,
    closed: bool,
}

/// Shared admission state for one guarded operation
pub struct BulkheadState {
    limits: Option<BulkheadPolicy>,
    slots: Arc<Mutex<Slots>>,
}

/// Handle to an accepted attempt
#[derive(Clone)]
pub struct ExecutionReference {
    submission: Arc<Submission>,
}

impl ExecutionReference {
    /// Abort the attempt. A queued attempt is discarded; a running attempt is
    /// interrupted only if `may_interrupt` is set. The caller owns
    /// finalization of the abandoned attempt.
    pub fn abort(&self, may_interrupt: bool) {
        let mut status = self
            .submission
            .status
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        match &*status {
            SubmissionStatus::Queued => *status = SubmissionStatus::Aborted,
            SubmissionStatus::Running(handle) => {
                if may_interrupt {
                    handle.abort();
                }
            }
            SubmissionStatus::Aborted => {}
        }
    }
}

/// One permit, owned by a running attempt. Released exactly once.
pub struct BulkheadReservation {
    slots: Arc<Mutex<Slots>>,
    released: AtomicBool,
}

impl BulkheadReservation {
    /// Return the permit and promote the oldest queued attempt, if any.
    pub fn release(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut skipped = Vec::new();
        let promoted = {
            let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
            slots.running = slots.running.saturating_sub(1);
            let mut promoted = None;
            while let Some(next) = slots.queue.pop_front() {
                let aborted = matches!(
                    *next.submission.status.lock().unwrap_or_else(|e| e.into_inner()),
                    SubmissionStatus::Aborted
                );
                if aborted {
                    skipped.push(next);
                    continue;
                }
                slots.running += 1;
                promoted = Some(next);
                break;
            }
            promoted
        };
        drop(skipped);
        if let Some(next) = promoted {
            launch(&self.slots, &next.submission, next.task);
        }
    }
}

// Permit safety net: an aborted or panicked attempt never calls release()
// itself, so the drop of its reservation must.
impl Drop for BulkheadReservation {
    fn drop(&mut self) {
        self.release();
    }
}

fn launch(slots: &Arc<Mutex<Slots>>, submission: &Arc<Submission>, task: AttemptTask) {
    let reservation = BulkheadReservation {
        slots: Arc::clone(slots),
        released: AtomicBool::new(false),
    };
    let handle = tokio::spawn(task(reservation));
    let mut status = submission.status.lock().unwrap_or_else(|e| e.into_inner());
    match &*status {
        // Aborted while sitting in the queue, promoted before the abort was
        // observed. Cancel the freshly spawned task; its reservation drop
        // releases the permit.
        SubmissionStatus::Aborted => handle.abort(),
        _ => *status = SubmissionStatus::Running(handle),
    }
}

enum Admission {
    Run(AttemptTask),
    Wait,
}

impl BulkheadState {
    /// With no policy, every submission is accepted and spawned immediately.
    pub fn new(limits: Option<BulkheadPolicy>) -> Self {
        Self {
            limits,
            slots: Arc::new(Mutex::new(Slots {
                running: 0,
                queue: VecDeque::new(),
                closed: false,
            })),
        }
    }

    /// Submit an attempt: runs it now or queues it. A rejected attempt's
    /// task is handed back untouched so the caller decides its fate.
    pub fn submit(&self, task: AttemptTask) -> Result<ExecutionReference, AttemptTask> {
        let submission = Arc::new(Submission {
            status: Mutex::new(SubmissionStatus::Queued),
        });

        let admission = {
            let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
            if slots.closed {
                return Err(task);
            }
            match &self.limits {
                Some(policy) if slots.running >= policy.max_concurrent => {
                    if slots.queue.len() >= policy.max_queue {
                        tracing::debug!(
                            running = slots.running,
                            queued = slots.queue.len(),
                            "bulkhead rejected submission"
                        );
                        return Err(task);
                    }
                    slots.queue.push_back(Queued {
                        task,
                        submission: Arc::clone(&submission),
                    });
                    Admission::Wait
                }
                _ => {
                    slots.running += 1;
                    Admission::Run(task)
                }
            }
        };

        if let Admission::Run(task) = admission {
            launch(&self.slots, &submission, task);
        }
        Ok(ExecutionReference { submission })
    }

    /// Stop admitting work and discard the wait queue. Running attempts are
    /// left to finish.
    pub fn close(&self) {
        let drained: Vec<Queued> = {
            let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
            slots.closed = true;
            slots.queue.drain(..).collect()
        };
        for queued in &drained {
            let mut status = queued
                .submission
                .status
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            *status = SubmissionStatus::Aborted;
        }
        drop(drained);
    }
}

#[cfg(test)]
#[path = "bulkhead_tests.rs"]
mod tests;
