// SPDX-License-Identifier: MIT

//! Per-call and per-attempt state
//!
//! An [`ExecutionContext`] lives for one logical call and owns the guarded
//! operation, the write-once result committer, the retry budget, and the
//! cancellation hook (rebound for every attempt). An [`AttemptContext`] lives
//! for one attempt and carries its own timeout state plus the single-use
//! "ended" flag that makes finalization exactly-once.

use crate::bulkhead::ExecutionReference;
use crate::retry::RetryState;
use crate::timeout::TimeoutState;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use tokio::sync::oneshot;
use ward_core::{Clock, ExecutionOutcome, Fault, OpError};

/// One attempt of the guarded operation.
pub type OperationFuture<T> = Pin<Box<dyn Future<Output = Result<T, OpError>> + Send>>;

/// The guarded operation: a factory producing one future per attempt.
pub type GuardedOperation<T> = Arc<dyn Fn() -> OperationFuture<T> + Send + Sync>;

/// Wrap an async closure as a guarded operation.
pub fn guarded<T, F, Fut>(f: F) -> GuardedOperation<T>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, OpError>> + Send + 'static,
{
    Arc::new(move || Box::pin(f()))
}

type CancelHook = Box<dyn FnOnce(bool) + Send>;

/// State for one logical call through the engine
pub struct ExecutionContext<T, C: Clock> {
    id: String,
    operation_label: Arc<str>,
    operation: Mutex<Option<GuardedOperation<T>>>,
    committer: Mutex<Option<oneshot::Sender<ExecutionOutcome<T>>>>,
    pub(crate) retry: Mutex<RetryState<C>>,
    cancel_hook: Mutex<Option<CancelHook>>,
    cancelled: AtomicBool,
}

impl<T, C: Clock> ExecutionContext<T, C> {
    pub(crate) fn new(id: String, operation_label: Arc<str>, retry: RetryState<C>) -> Self {
        Self {
            id,
            operation_label,
            operation: Mutex::new(None),
            committer: Mutex::new(None),
            retry: Mutex::new(retry),
            cancel_hook: Mutex::new(None),
            cancelled: AtomicBool::new(false),
        }
    }

    /// Opaque execution ID, for diagnostics only
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Opaque identity of the guarded operation, for diagnostics only
    pub fn operation_label(&self) -> &str {
        &self.operation_label
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub(crate) fn bind_operation(&self, operation: GuardedOperation<T>) {
        *self.operation.lock().unwrap_or_else(|e| e.into_inner()) = Some(operation);
    }

    pub(crate) fn operation(&self) -> Option<GuardedOperation<T>> {
        self.operation
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub(crate) fn bind_committer(&self, sender: oneshot::Sender<ExecutionOutcome<T>>) {
        *self.committer.lock().unwrap_or_else(|e| e.into_inner()) = Some(sender);
    }

    /// Write the terminal result into the return handle. The first commit
    /// wins; later calls are no-ops.
    pub(crate) fn commit(&self, outcome: ExecutionOutcome<T>) {
        let sender = self.committer.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(sender) = sender {
            // The caller may have dropped the handle; nothing to do then.
            let _ = sender.send(outcome);
        }
        // The hook closure references the attempt, which references this
        // context; dropping it here breaks that cycle once the result is in.
        self.cancel_hook
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
    }

    /// Replace the cancellation hook for the current attempt.
    pub(crate) fn bind_cancel_hook(&self, hook: CancelHook) {
        *self.cancel_hook.lock().unwrap_or_else(|e| e.into_inner()) = Some(hook);
    }

    /// Caller-initiated cancellation: mark the context and fire the hook
    /// bound by the active attempt.
    pub(crate) fn cancel(&self, may_interrupt: bool) {
        self.cancelled.store(true, Ordering::SeqCst);
        let hook = self.cancel_hook.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(hook) = hook {
            hook(may_interrupt);
        }
    }
}

/// State for one attempt of one execution
pub struct AttemptContext<T, C: Clock> {
    pub(crate) execution: Arc<ExecutionContext<T, C>>,
    pub(crate) timeout: Arc<TimeoutState>,
    reference: Mutex<Option<ExecutionReference>>,
    ended: AtomicBool,
}

impl<T, C: Clock> AttemptContext<T, C> {
    pub(crate) fn new(execution: Arc<ExecutionContext<T, C>>) -> Self {
        Self {
            execution,
            timeout: Arc::new(TimeoutState::new()),
            reference: Mutex::new(None),
            ended: AtomicBool::new(false),
        }
    }

    /// Mark the attempt finalized. Returns `true` for exactly one caller.
    pub(crate) fn end(&self) -> bool {
        !self.ended.swap(true, Ordering::SeqCst)
    }

    pub(crate) fn bind_reference(&self, reference: ExecutionReference) {
        *self.reference.lock().unwrap_or_else(|e| e.into_inner()) = Some(reference);
    }

    pub(crate) fn reference(&self) -> Option<ExecutionReference> {
        self.reference
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

/// Future-shaped handle returned to the caller immediately.
///
/// Resolves exactly once with the committed [`ExecutionOutcome`].
pub struct ExecutionHandle<T> {
    receiver: oneshot::Receiver<ExecutionOutcome<T>>,
    // Weak-backed so the handle alone never keeps a finished execution alive.
    canceller: Arc<dyn Fn(bool) + Send + Sync>,
}

impl<T> ExecutionHandle<T> {
    pub(crate) fn new(
        receiver: oneshot::Receiver<ExecutionOutcome<T>>,
        canceller: Arc<dyn Fn(bool) + Send + Sync>,
    ) -> Self {
        Self {
            receiver,
            canceller,
        }
    }

    /// Request cancellation of the execution. With `may_interrupt`, a
    /// running attempt is aborted; otherwise it runs to completion but its
    /// result is discarded.
    pub fn cancel(&self, may_interrupt: bool) {
        (self.canceller)(may_interrupt);
    }
}

impl<T> Future for ExecutionHandle<T> {
    type Output = ExecutionOutcome<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver).poll(cx).map(|received| {
            received.unwrap_or_else(|_| {
                Err(Fault::Internal(
                    "execution abandoned without committing a result".to_string(),
                ))
            })
        })
    }
}
