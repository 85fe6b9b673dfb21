// SPDX-License-Identifier: MIT

//! Orchestrator for asynchronous fault-tolerant executions
//!
//! `execute` returns a handle immediately; everything else happens on pool
//! threads. Flow for each attempt:
//!
//! - `enqueue_attempt` asks the circuit breaker for permission, starts the
//!   timeout timer, and submits the attempt to the bulkhead
//! - `run_execution_attempt` runs the guarded operation on a worker task and
//!   hands the result to `process_attempt_result`
//! - `finalize_attempt` is the convergence point for every signal (normal
//!   completion, timeout, cancellation, rejection, internal error). The
//!   attempt's single-use "ended" flag makes it exactly-once; it records the
//!   outcome into the breaker, consults the retry budget, applies fallback,
//!   and commits the final result into the return handle

use crate::breaker::CircuitBreakerState;
use crate::bulkhead::{AttemptTask, BulkheadReservation, BulkheadState};
use crate::context::{AttemptContext, ExecutionContext, ExecutionHandle, GuardedOperation};
use crate::retry::{RetryDecision, RetryFilter, RetryState};
use futures::FutureExt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tokio::sync::oneshot;
use ward_core::{
    Clock, ExecutionOutcome, Fault, FaultPolicies, IdGen, MetricsSink, NoopMetrics, OpError,
    SystemClock, UuidIdGen,
};

/// Substitute result producer, invoked when retries are exhausted and the
/// failure is user-visible. Runs synchronously on whichever thread happens to
/// finalize the attempt (worker, timer, or cancelling caller).
pub type FallbackFn<T> = Arc<dyn Fn(&Fault) -> Result<T, OpError> + Send + Sync>;

/// Optional collaborators for an [`AsyncExecutor`]
pub struct ExecutorDeps<T> {
    pub fallback: Option<FallbackFn<T>>,
    pub retry_filter: Option<RetryFilter>,
    pub metrics: Arc<dyn MetricsSink>,
}

impl<T> Default for ExecutorDeps<T> {
    fn default() -> Self {
        Self {
            fallback: None,
            retry_filter: None,
            metrics: Arc::new(NoopMetrics),
        }
    }
}

/// Executor for one guarded operation.
///
/// Circuit-breaker and bulkhead state are shared by every execution started
/// through the same executor; clones of those states are not independent.
pub struct AsyncExecutor<T, C: Clock = SystemClock, I: IdGen = UuidIdGen> {
    engine: Arc<Engine<T, C>>,
    id_gen: I,
}

/// Shared engine state, kept behind one `Arc` so attempts, timers, and
/// cancellation hooks can all reach it.
struct Engine<T, C: Clock> {
    operation_label: Arc<str>,
    policies: FaultPolicies,
    fallback: Option<FallbackFn<T>>,
    retry_filter: Option<RetryFilter>,
    breaker: CircuitBreakerState<C>,
    bulkhead: BulkheadState,
    metrics: Arc<dyn MetricsSink>,
    clock: C,
}

impl<T: Send + 'static> AsyncExecutor<T> {
    /// Executor with default collaborators: no fallback, no retry filter,
    /// discarded metrics, system clock, UUID execution ids.
    pub fn new(operation_label: impl Into<Arc<str>>, policies: FaultPolicies) -> Self {
        Self::with_deps(
            operation_label,
            policies,
            ExecutorDeps::default(),
            SystemClock,
            UuidIdGen,
        )
    }
}

impl<T: Send + 'static, C: Clock + 'static, I: IdGen> AsyncExecutor<T, C, I> {
    pub fn with_deps(
        operation_label: impl Into<Arc<str>>,
        policies: FaultPolicies,
        deps: ExecutorDeps<T>,
        clock: C,
        id_gen: I,
    ) -> Self {
        let breaker = CircuitBreakerState::new(policies.circuit_breaker.clone(), clock.clone());
        let bulkhead = BulkheadState::new(policies.bulkhead.clone());
        Self {
            engine: Arc::new(Engine {
                operation_label: operation_label.into(),
                policies,
                fallback: deps.fallback,
                retry_filter: deps.retry_filter,
                breaker,
                bulkhead,
                metrics: deps.metrics,
                clock,
            }),
            id_gen,
        }
    }

    /// Fresh per-call context. Generates an execution ID when the caller
    /// does not supply one.
    pub fn new_context(&self, id: Option<String>) -> ExecutionContext<T, C> {
        let id = id.unwrap_or_else(|| self.id_gen.next());
        let retry = RetryState::new(
            self.engine.policies.retry.clone(),
            self.engine.retry_filter.clone(),
            self.engine.clock.clone(),
        );
        ExecutionContext::new(id, Arc::clone(&self.engine.operation_label), retry)
    }

    /// Start a guarded execution. Returns immediately; the handle resolves
    /// exactly once with the committed outcome. Never blocks on the
    /// operation and never fails synchronously.
    pub fn execute(
        &self,
        operation: GuardedOperation<T>,
        context: ExecutionContext<T, C>,
    ) -> ExecutionHandle<T> {
        tracing::info!(
            operation = %context.operation_label(),
            execution_id = %context.id(),
            "starting guarded execution"
        );

        context.bind_operation(operation);
        let (sender, receiver) = oneshot::channel();
        context.bind_committer(sender);

        let context = Arc::new(context);
        self.engine.enqueue_attempt(&context);

        // Weak so the handle does not keep a committed execution alive; once
        // the engine is done with the context, cancel becomes a no-op.
        let canceller = Arc::downgrade(&context);
        ExecutionHandle::new(
            receiver,
            Arc::new(move |may_interrupt| {
                if let Some(context) = canceller.upgrade() {
                    context.cancel(may_interrupt);
                }
            }),
        )
    }

    /// Release the bulkhead: reject new work and discard queued attempts.
    pub fn close(&self) {
        self.engine.bulkhead.close();
    }
}

impl<T: Send + 'static, C: Clock + 'static> Engine<T, C> {
    /// Start one attempt: breaker permission, timeout timer, bulkhead
    /// submission, cancellation hook.
    fn enqueue_attempt(self: &Arc<Self>, context: &Arc<ExecutionContext<T, C>>) {
        let attempt = Arc::new(AttemptContext::new(Arc::clone(context)));

        // Cancelled between attempts (e.g. during a retry delay): commit
        // directly, no attempt ran so nothing is recorded anywhere.
        if context.is_cancelled() {
            if attempt.end() {
                self.metrics.invocation();
                self.metrics.invocation_failed();
                context.commit(Err(Fault::Cancelled));
            }
            return;
        }

        tracing::debug!(execution_id = %context.id(), "enqueuing execution attempt");

        if !self.breaker.request_permission() {
            tracing::debug!(execution_id = %context.id(), "circuit breaker open, not executing");
            self.finalize_attempt(&attempt, Err(Fault::CircuitOpen));
            return;
        }

        // The timer starts before bulkhead submission, so time spent queued
        // counts against the deadline. The abort target is bound afterwards
        // through the attempt's reference slot.
        if let Some(timeout) = &self.policies.timeout {
            let engine = Arc::clone(self);
            let timed = Arc::clone(&attempt);
            attempt.timeout.start(timeout.duration, move || {
                engine.timeout_attempt(&timed);
            });
        }

        // The pending guard finalizes with `Cancelled` if the bulkhead drops
        // the task without ever running it (queue discarded on close), so the
        // caller's handle still resolves.
        let mut pending = PendingAttempt {
            engine: Arc::clone(self),
            attempt: Arc::clone(&attempt),
            armed: true,
        };
        let task: AttemptTask = Box::new(move |reservation| {
            pending.armed = false;
            let engine = Arc::clone(&pending.engine);
            let running = Arc::clone(&pending.attempt);
            Box::pin(async move {
                engine.run_execution_attempt(&running, reservation).await;
            })
        });
        let reference = match self.bulkhead.submit(task) {
            Ok(reference) => reference,
            Err(rejected) => {
                tracing::debug!(execution_id = %context.id(), "bulkhead rejected execution");
                attempt.timeout.stop();
                self.finalize_attempt(&attempt, Err(Fault::BulkheadRejected));
                // The attempt is already ended, so the armed guard inside the
                // returned task finalizes into a no-op when dropped here.
                drop(rejected);
                return;
            }
        };

        attempt.bind_reference(reference.clone());

        let engine = Arc::clone(self);
        let cancelled = Arc::clone(&attempt);
        context.bind_cancel_hook(Box::new(move |may_interrupt| {
            reference.abort(may_interrupt);
            engine.finalize_attempt(&cancelled, Err(Fault::Cancelled));
        }));
    }

    /// Runs on a pooled worker task, holding the bulkhead permit.
    async fn run_execution_attempt(
        self: &Arc<Self>,
        attempt: &Arc<AttemptContext<T, C>>,
        reservation: BulkheadReservation,
    ) {
        tracing::debug!(execution_id = %attempt.execution.id(), "running execution attempt");
        // Panic barrier for the guarded operation itself: an unwinding
        // operation must still finalize, or the caller's handle never
        // resolves.
        let outcome = match attempt.execution.operation() {
            Some(operation) => match AssertUnwindSafe(operation()).catch_unwind().await {
                Ok(result) => result.map_err(Fault::Operation),
                Err(panic) => Err(Fault::Internal(panic_message(panic.as_ref()))),
            },
            None => Err(Fault::Internal(
                "no operation bound to execution context".to_string(),
            )),
        };
        self.process_attempt_result(attempt, outcome, &reservation);
    }

    /// Release the permit, stop the timer, and finalize unless the timeout
    /// path already owns this attempt.
    fn process_attempt_result(
        self: &Arc<Self>,
        attempt: &Arc<AttemptContext<T, C>>,
        outcome: ExecutionOutcome<T>,
        reservation: &BulkheadReservation,
    ) {
        reservation.release();
        if attempt.timeout.stop() {
            self.finalize_attempt(attempt, outcome);
        } else {
            tracing::debug!(
                execution_id = %attempt.execution.id(),
                "attempt completed after timeout, discarding result"
            );
        }
    }

    /// Runs on the timer task when the deadline fires first.
    fn timeout_attempt(self: &Arc<Self>, attempt: &Arc<AttemptContext<T, C>>) {
        tracing::debug!(
            execution_id = %attempt.execution.id(),
            "attempt timed out, aborting execution"
        );
        if let Some(reference) = attempt.reference() {
            reference.abort(true);
        }
        self.finalize_attempt(attempt, Err(Fault::TimedOut));
    }

    /// Convergence point for every attempt signal. Safe to call from the
    /// worker, timer, and cancellation paths concurrently; exactly one
    /// caller proceeds past the ended flag.
    ///
    /// Doubles as the engine's error barrier: if the resilience pipeline
    /// itself fails, an internal failure is committed so the caller's handle
    /// always resolves.
    fn finalize_attempt(
        self: &Arc<Self>,
        attempt: &Arc<AttemptContext<T, C>>,
        outcome: ExecutionOutcome<T>,
    ) {
        if let Err(panic) = catch_unwind(AssertUnwindSafe(|| self.try_finalize(attempt, outcome))) {
            tracing::error!(
                execution_id = %attempt.execution.id(),
                "internal error while finalizing attempt"
            );
            attempt
                .execution
                .commit(Err(Fault::Internal(panic_message(panic.as_ref()))));
        }
    }

    fn try_finalize(
        self: &Arc<Self>,
        attempt: &Arc<AttemptContext<T, C>>,
        mut outcome: ExecutionOutcome<T>,
    ) {
        if !attempt.end() {
            // Another path already finalized this attempt.
            return;
        }
        attempt.timeout.stop();

        let context = &attempt.execution;
        tracing::debug!(
            execution_id = %context.id(),
            success = outcome.is_ok(),
            "finalizing attempt"
        );

        // Rejections never consumed a permission slot, so they are not
        // recorded into the breaker's window.
        match &outcome {
            Ok(_) => self.breaker.record_result(true),
            Err(fault) if fault.consumed_permission() => self.breaker.record_result(false),
            Err(_) => {}
        }

        let internal = matches!(&outcome, Err(fault) if fault.is_internal());
        if !internal && !context.is_cancelled() {
            let decision = {
                let mut retry = context.retry.lock().unwrap_or_else(|e| e.into_inner());
                retry.record_result(&outcome)
            };
            if let RetryDecision::Retry { delay } = decision {
                tracing::info!(
                    execution_id = %context.id(),
                    delay = ?delay,
                    "retrying"
                );
                let engine = Arc::clone(self);
                let context = Arc::clone(context);
                if delay.is_zero() {
                    engine.enqueue_attempt(&context);
                } else {
                    tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        engine.enqueue_attempt(&context);
                    });
                }
                // The retry owns the remainder of this execution.
                return;
            }

            outcome = self.apply_fallback(outcome, context);
        }

        // A cancellation can land after the attempt's hook was consumed (or
        // before a retry's hook was bound); the flag is authoritative, so a
        // raced result is discarded here rather than committed.
        if !internal && context.is_cancelled() {
            outcome = Err(Fault::Cancelled);
        }

        self.metrics.invocation();
        if outcome.is_err() {
            self.metrics.invocation_failed();
        }
        context.commit(outcome);
    }

    fn apply_fallback(
        &self,
        outcome: ExecutionOutcome<T>,
        context: &Arc<ExecutionContext<T, C>>,
    ) -> ExecutionOutcome<T> {
        let Err(fault) = outcome else {
            return outcome;
        };
        if !fault.eligible_for_fallback() {
            return Err(fault);
        }
        let Some(fallback) = &self.fallback else {
            return Err(fault);
        };

        tracing::debug!(execution_id = %context.id(), "invoking fallback");
        self.metrics.fallback_call();
        match fallback(&fault) {
            Ok(value) => Ok(value),
            Err(error) => Err(Fault::Operation(error)),
        }
    }
}

/// Armed while an attempt task sits in the bulkhead queue. If the task is
/// dropped without being invoked, the attempt is finalized as cancelled.
struct PendingAttempt<T: Send + 'static, C: Clock + 'static> {
    engine: Arc<Engine<T, C>>,
    attempt: Arc<AttemptContext<T, C>>,
    armed: bool,
}

impl<T: Send + 'static, C: Clock + 'static> Drop for PendingAttempt<T, C> {
    fn drop(&mut self) {
        if self.armed {
            self.engine
                .finalize_attempt(&self.attempt, Err(Fault::Cancelled));
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown internal error".to_string()
    }
}

#[cfg(test)]
#[path = "executor_tests.rs"]
mod tests;
