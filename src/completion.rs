//! Completion futures bridging engine callbacks to waiting callers.
//!
//! # State Machine
//! ```text
//! Pending ──complete──▶ Done
//!    │ ──cancel────▶ Cancelled
//!    └──wait expiry─▶ Timeout
//! ```
//! Terminal states are final. Whichever of {callback, cancel, timeout}
//! takes the state lock first performs the single transition and releases
//! the wait gate; the others observe a terminal state and do nothing.
//!
//! # Design Decisions
//! - The check-and-set of the state happens under one mutex, so the gate
//!   (condvar broadcast plus registered wakers) is released exactly once
//! - The operation handle is cancelled outside the lock: an engine may
//!   invoke our callback while holding its own locks
//! - A bounded wait is an explicit caller option; there is no built-in
//!   timeout
//! - A wait that expires forwards cancellation to the handle unless the
//!   caller opts out through [`WaitOptions`]; after an opt-out the caller can
//!   still [`cancel`](Completion::cancel) the timed-out operation
//! - The handle is forwarded a cancel at most once, and a handle attached
//!   after cancellation is cancelled on arrival

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll, Waker};
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::bucket::error::{BucketError, BucketResult};
use crate::engine::{Callback, Cas, EngineError, OpHandle};
use crate::observability::metrics;

/// Lifecycle of a [`Completion`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FutureStatus {
    Pending,
    Done,
    Cancelled,
    Timeout,
}

impl FutureStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, FutureStatus::Pending)
    }

    fn as_label(&self) -> &'static str {
        match self {
            FutureStatus::Pending => "pending",
            FutureStatus::Done => "done",
            FutureStatus::Cancelled => "cancelled",
            FutureStatus::Timeout => "timeout",
        }
    }
}

/// How long to wait, and what to do when the wait expires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitOptions {
    /// `None` waits until the operation reaches a terminal state.
    pub timeout: Option<Duration>,
    /// Forward cancellation to the operation handle when the wait expires.
    pub cancel_on_timeout: bool,
}

impl WaitOptions {
    pub fn unbounded() -> Self {
        Self {
            timeout: None,
            cancel_on_timeout: true,
        }
    }

    pub fn bounded(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
            cancel_on_timeout: true,
        }
    }
}

impl Default for WaitOptions {
    fn default() -> Self {
        Self::unbounded()
    }
}

struct State<T> {
    status: FutureStatus,
    result: Option<BucketResult<T>>,
    op: Option<OpHandle>,
    /// Set once cancellation has been requested for the handle.
    cancel_requested: bool,
    wakers: Vec<(u64, Waker)>,
    next_waiter: u64,
}

struct Shared<T> {
    state: Mutex<State<T>>,
    gate: Condvar,
    op: &'static str,
    op_id: Uuid,
    started: Instant,
}

/// Single-result container populated by an engine callback.
///
/// Clones share the same slot. Supports blocking [`wait`](Self::wait),
/// async [`wait_async`](Self::wait_async) (or plain `.await`), and
/// [`cancel`](Self::cancel).
pub struct Completion<T> {
    shared: Arc<Shared<T>>,
    /// Waker slot registered by this handle while it is being polled.
    waiter: Option<u64>,
}

/// Future returned by the asynchronous mutation paths.
pub type OpFuture = Completion<Cas>;

impl<T> Clone for Completion<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            waiter: None,
        }
    }
}

impl<T: Clone + Send + 'static> Completion<T> {
    /// Create a pending completion with no operation attached yet.
    pub fn new(op: &'static str) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    status: FutureStatus::Pending,
                    result: None,
                    op: None,
                    cancel_requested: false,
                    wakers: Vec::new(),
                    next_waiter: 0,
                }),
                gate: Condvar::new(),
                op,
                op_id: Uuid::new_v4(),
                started: Instant::now(),
            }),
            waiter: None,
        }
    }

    /// Create a completion that is already done with `error`.
    pub fn failed(op: &'static str, error: BucketError) -> Self {
        let completion = Self::new(op);
        completion.complete(Err(error));
        completion
    }

    /// Issue an operation through `launcher` and track its completion.
    ///
    /// The launcher receives the callback to register with the engine and
    /// returns the engine's handle. A submission error completes the future
    /// immediately with [`BucketError::Submit`].
    pub fn submit<F>(op: &'static str, launcher: F) -> Self
    where
        F: FnOnce(Callback<T>) -> Result<OpHandle, EngineError>,
    {
        let completion = Self::new(op);
        let completer = completion.clone();
        let callback: Callback<T> = Box::new(move |result: Result<T, EngineError>| {
            completer.complete(result.map_err(BucketError::Engine));
        });

        match launcher(callback) {
            Ok(handle) => completion.set_operation(handle),
            Err(e) => {
                tracing::warn!(
                    op,
                    op_id = %completion.shared.op_id,
                    error = %e,
                    "Operation rejected at submission"
                );
                metrics::record_submit_failure(op);
                completion.complete(Err(BucketError::Submit(e)));
            }
        }
        completion
    }

    /// Attach the engine handle that [`cancel`](Self::cancel) forwards to.
    ///
    /// If cancellation was already requested the handle is cancelled
    /// immediately instead of being stored.
    pub fn set_operation(&self, handle: OpHandle) {
        let mut state = self.lock();
        if !state.cancel_requested {
            state.op = Some(handle);
            return;
        }
        drop(state);

        handle.cancel();
        tracing::debug!(op = self.shared.op, op_id = %self.shared.op_id, "Late handle cancelled on attach");
    }

    /// Record the outcome delivered by the engine.
    ///
    /// Returns `true` if this call performed the terminal transition. Once
    /// the future is terminal (cancelled or timed out first) the call is a
    /// no-op and the earlier outcome stands.
    pub fn complete(&self, result: BucketResult<T>) -> bool {
        let mut state = self.lock();
        if state.status.is_terminal() {
            tracing::debug!(
                op = self.shared.op,
                op_id = %self.shared.op_id,
                status = state.status.as_label(),
                "Late completion dropped"
            );
            return false;
        }

        let outcome = if result.is_ok() { "ok" } else { "error" };
        state.status = FutureStatus::Done;
        state.result = Some(result);
        self.release(state);

        tracing::trace!(op = self.shared.op, op_id = %self.shared.op_id, outcome, "Operation completed");
        metrics::record_operation(self.shared.op, outcome, self.shared.started);
        true
    }

    /// Cancel the operation.
    ///
    /// A pending future moves to [`FutureStatus::Cancelled`]. A future that
    /// timed out without cancelling its handle keeps the
    /// [`FutureStatus::Timeout`] outcome, but the handle is cancelled now.
    /// Returns `true` if this call did either; calling it again, or after
    /// completion, does nothing.
    pub fn cancel(&self) -> bool {
        let mut state = self.lock();
        match state.status {
            FutureStatus::Pending => {
                state.status = FutureStatus::Cancelled;
                state.result = Some(Err(BucketError::Cancelled));
                state.cancel_requested = true;
                let op = state.op.take();
                self.release(state);

                if let Some(op) = op {
                    op.cancel();
                }
                tracing::debug!(op = self.shared.op, op_id = %self.shared.op_id, "Operation cancelled");
                metrics::record_operation(self.shared.op, "cancelled", self.shared.started);
            }
            FutureStatus::Timeout if !state.cancel_requested => {
                state.cancel_requested = true;
                let op = state.op.take();
                drop(state);

                if let Some(op) = op {
                    op.cancel();
                }
                tracing::debug!(op = self.shared.op, op_id = %self.shared.op_id, "Timed-out operation cancelled");
            }
            _ => return false,
        }
        metrics::record_cancellation(self.shared.op);
        true
    }

    /// Block until the future is terminal or `timeout` elapses.
    ///
    /// On expiry the future moves to [`FutureStatus::Timeout`] and the
    /// operation handle is cancelled. Waiting on a terminal future returns
    /// the stored outcome immediately.
    pub fn wait(&self, timeout: Option<Duration>) -> BucketResult<T> {
        self.wait_with(WaitOptions {
            timeout,
            cancel_on_timeout: true,
        })
    }

    pub fn wait_with(&self, options: WaitOptions) -> BucketResult<T> {
        let mut state = self.lock();
        match options.timeout {
            None => {
                while !state.status.is_terminal() {
                    state = self
                        .shared
                        .gate
                        .wait(state)
                        .unwrap_or_else(PoisonError::into_inner);
                }
            }
            Some(timeout) => {
                let deadline = Instant::now() + timeout;
                while !state.status.is_terminal() {
                    let now = Instant::now();
                    if now >= deadline {
                        return self.expire(state, timeout, options.cancel_on_timeout);
                    }
                    state = self
                        .shared
                        .gate
                        .wait_timeout(state, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0;
                }
            }
        }
        Self::stored(&state)
    }

    /// Asynchronous counterpart of [`wait`](Self::wait).
    ///
    /// A bounded wait uses [`tokio::time`] and must run inside a Tokio
    /// runtime with the time driver enabled; it panics otherwise. Awaiting
    /// the completion directly, or passing `None`, works on any executor.
    pub async fn wait_async(&self, timeout: Option<Duration>) -> BucketResult<T> {
        self.wait_async_with(WaitOptions {
            timeout,
            cancel_on_timeout: true,
        })
        .await
    }

    /// Same Tokio requirement as [`wait_async`](Self::wait_async) when
    /// `options.timeout` is set.
    pub async fn wait_async_with(&self, options: WaitOptions) -> BucketResult<T> {
        let mut waiter = self.clone();
        let outcome = std::future::poll_fn(move |cx| waiter.poll_outcome(cx));
        let Some(timeout) = options.timeout else {
            return outcome.await;
        };

        let waited = tokio::time::timeout(timeout, outcome).await;
        match waited {
            Ok(result) => result,
            Err(_) => {
                let state = self.lock();
                if state.status.is_terminal() {
                    return Self::stored(&state);
                }
                self.expire(state, timeout, options.cancel_on_timeout)
            }
        }
    }

    /// Current lifecycle state.
    pub fn status(&self) -> FutureStatus {
        self.lock().status
    }

    pub fn is_terminal(&self) -> bool {
        self.status().is_terminal()
    }

    /// Correlation id used in log events for this operation.
    pub fn op_id(&self) -> Uuid {
        self.shared.op_id
    }

    fn expire(
        &self,
        mut state: MutexGuard<'_, State<T>>,
        after: Duration,
        cancel_on_timeout: bool,
    ) -> BucketResult<T> {
        state.status = FutureStatus::Timeout;
        state.result = Some(Err(BucketError::Timeout(after)));
        let op = if cancel_on_timeout {
            state.cancel_requested = true;
            state.op.take()
        } else {
            None
        };
        self.release(state);

        if let Some(op) = op {
            op.cancel();
        }
        tracing::warn!(
            op = self.shared.op,
            op_id = %self.shared.op_id,
            timeout_ms = after.as_millis() as u64,
            cancelled = cancel_on_timeout,
            "Operation timed out"
        );
        metrics::record_timeout(self.shared.op);
        metrics::record_operation(self.shared.op, "timeout", self.shared.started);
        Err(BucketError::Timeout(after))
    }

    /// Each polling handle owns one waker slot, refreshed on every poll and
    /// removed when the handle is dropped.
    fn poll_outcome(&mut self, cx: &mut Context<'_>) -> Poll<BucketResult<T>> {
        let mut state = self.shared.lock();
        if state.status.is_terminal() {
            self.waiter = None;
            return Poll::Ready(Self::stored(&state));
        }

        let slot = self
            .waiter
            .and_then(|id| state.wakers.iter().position(|(slot, _)| *slot == id));
        match slot {
            Some(i) => {
                if !state.wakers[i].1.will_wake(cx.waker()) {
                    state.wakers[i].1 = cx.waker().clone();
                }
            }
            None => {
                let id = state.next_waiter;
                state.next_waiter += 1;
                state.wakers.push((id, cx.waker().clone()));
                self.waiter = Some(id);
            }
        }
        Poll::Pending
    }
}

impl<T> Shared<T> {
    fn lock(&self) -> MutexGuard<'_, State<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T> Completion<T> {
    fn lock(&self) -> MutexGuard<'_, State<T>> {
        self.shared.lock()
    }

    /// Open the gate. Callers have just made the single terminal transition.
    fn release(&self, mut state: MutexGuard<'_, State<T>>) {
        let wakers = std::mem::take(&mut state.wakers);
        drop(state);
        self.shared.gate.notify_all();
        for (_, waker) in wakers {
            waker.wake();
        }
    }
}

impl<T: Clone> Completion<T> {
    fn stored(state: &State<T>) -> BucketResult<T> {
        match &state.result {
            Some(result) => result.clone(),
            None => Err(BucketError::Cancelled),
        }
    }
}

impl<T: Clone + Send + 'static> Future for Completion<T> {
    type Output = BucketResult<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.get_mut().poll_outcome(cx)
    }
}

impl<T> Drop for Completion<T> {
    fn drop(&mut self) {
        if let Some(id) = self.waiter.take() {
            self.shared.lock().wakers.retain(|(slot, _)| *slot != id);
        }
    }
}

impl<T> std::fmt::Debug for Completion<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Completion")
            .field("op", &self.shared.op)
            .field("op_id", &self.shared.op_id)
            .field("status", &self.lock().status)
            .finish()
    }
}
