//! Queued units of work and their lifecycle.
//!
//! Implement [`QueueAction`] for the work itself, wrap it in an [`Action`]
//! handle, and submit the handle to a [`Queue`](crate::queue::Queue). The
//! handle is shared: producers keep a clone to inspect the outcome while the
//! queue's worker drives the lifecycle.
//!
//! ```text
//! new ──add──▶ pending ──dispatch──▶ started ──▶ finished
//!                 │                                  │
//!                 └──kill──▶ killed + finished ◀─────┘ reset() → new
//! ```

use std::fmt;
use std::marker::PhantomData;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, Thread, ThreadId};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Condvar, Mutex};

use crate::cancel::CancelToken;
use crate::error::{QueueError, Result};
use crate::failure::{DispatchFailure, Failure, Fault, WaitError};
use crate::priority::Priority;
use crate::queue::Shared;

// ---------------------------------------------------------------------------
// QueueAction
// ---------------------------------------------------------------------------

/// The authoring surface: a work function plus an optional failure handler.
pub trait QueueAction: Send + 'static {
    type Output: Send + 'static;
    type Error: fmt::Display + fmt::Debug + Send + 'static;

    /// Runs on the queue's worker thread, at most once per submission.
    fn run(&mut self, cancel: &CancelToken) -> std::result::Result<Self::Output, Self::Error>;

    /// Called for fire-and-forget submissions that failed. Return `true` to
    /// absorb the failure: it is then cleared from the action.
    fn failure_handler(&mut self, _failure: &Failure<Self::Error>) -> bool {
        false
    }
}

/// Adapter turning a closure into a [`QueueAction`].
pub struct FnAction<F, T, E> {
    f: F,
    _marker: PhantomData<fn() -> (T, E)>,
}

impl<F, T, E> QueueAction for FnAction<F, T, E>
where
    F: FnMut(&CancelToken) -> std::result::Result<T, E> + Send + 'static,
    T: Send + 'static,
    E: fmt::Display + fmt::Debug + Send + 'static,
{
    type Output = T;
    type Error = E;

    fn run(&mut self, cancel: &CancelToken) -> std::result::Result<T, E> {
        (self.f)(cancel)
    }
}

// ---------------------------------------------------------------------------
// CallerInfo
// ---------------------------------------------------------------------------

/// Who submitted an action. The backtrace is only captured in debug mode.
#[derive(Debug, Clone)]
pub struct CallerInfo {
    pub thread_id: ThreadId,
    pub thread_name: Option<String>,
    pub submitted_at: DateTime<Utc>,
    pub backtrace: Option<String>,
}

impl CallerInfo {
    pub(crate) fn capture(debug: bool) -> Self {
        let current = thread::current();
        Self {
            thread_id: current.id(),
            thread_name: current.name().map(str::to_string),
            submitted_at: Utc::now(),
            backtrace: debug.then(|| std::backtrace::Backtrace::force_capture().to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// Action
// ---------------------------------------------------------------------------

struct Outcome<T, E> {
    result: Option<T>,
    failure: Option<Failure<E>>,
}

#[derive(Default)]
struct Lifecycle {
    queue: Option<Weak<Shared>>,
    worker: Option<Thread>,
    caller: Option<CallerInfo>,
    token: CancelToken,
    queued: bool,
    executing: bool,
    detached: bool,
}

struct Inner<A: QueueAction> {
    work: Mutex<A>,
    priority: AtomicU8,
    started: AtomicBool,
    finished: AtomicBool,
    killed: AtomicBool,
    lifecycle: Mutex<Lifecycle>,
    outcome: Mutex<Outcome<A::Output, A::Error>>,
    done: Condvar,
}

/// Shared handle to a queued unit of work. Clones refer to the same action.
///
/// Lock order inside the handle is `lifecycle` → `outcome` → `work`.
pub struct Action<A: QueueAction> {
    inner: Arc<Inner<A>>,
}

impl<A: QueueAction> Clone for Action<A> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<A: QueueAction> fmt::Debug for Action<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Action")
            .field("priority", &self.priority())
            .field("started", &self.is_started())
            .field("finished", &self.is_finished())
            .field("killed", &self.is_killed())
            .finish_non_exhaustive()
    }
}

impl<F, T, E> Action<FnAction<F, T, E>>
where
    F: FnMut(&CancelToken) -> std::result::Result<T, E> + Send + 'static,
    T: Send + 'static,
    E: fmt::Display + fmt::Debug + Send + 'static,
{
    pub fn from_fn(f: F) -> Self {
        Self::new(FnAction {
            f,
            _marker: PhantomData,
        })
    }
}

impl<A: QueueAction> Action<A> {
    pub fn new(work: A) -> Self {
        Self::with_priority(work, Priority::default())
    }

    pub fn with_priority(work: A, priority: Priority) -> Self {
        Self {
            inner: Arc::new(Inner {
                work: Mutex::new(work),
                priority: AtomicU8::new(priority.to_u8()),
                started: AtomicBool::new(false),
                finished: AtomicBool::new(false),
                killed: AtomicBool::new(false),
                lifecycle: Mutex::new(Lifecycle::default()),
                outcome: Mutex::new(Outcome {
                    result: None,
                    failure: None,
                }),
                done: Condvar::new(),
            }),
        }
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn priority(&self) -> Priority {
        Priority::from_u8(self.inner.priority.load(Ordering::Acquire))
    }

    /// Takes effect on the next submission; a pending action keeps the slot it
    /// was inserted at.
    pub fn set_priority(&self, priority: Priority) {
        self.inner
            .priority
            .store(priority.to_u8(), Ordering::Release);
    }

    pub fn is_started(&self) -> bool {
        self.inner.started.load(Ordering::Acquire)
    }

    pub fn is_finished(&self) -> bool {
        self.inner.finished.load(Ordering::Acquire)
    }

    pub fn is_killed(&self) -> bool {
        self.inner.killed.load(Ordering::Acquire)
    }

    pub fn is_queued(&self) -> bool {
        self.inner.lifecycle.lock().queued
    }

    pub fn has_failure(&self) -> bool {
        self.inner.outcome.lock().failure.is_some()
    }

    pub fn failure_message(&self) -> Option<String> {
        self.inner
            .outcome
            .lock()
            .failure
            .as_ref()
            .map(|f| f.to_string())
    }

    pub fn take_failure(&self) -> Option<Failure<A::Error>> {
        self.inner.outcome.lock().failure.take()
    }

    pub fn take_result(&self) -> Option<A::Output> {
        self.inner.outcome.lock().result.take()
    }

    pub fn caller(&self) -> Option<CallerInfo> {
        self.inner.lifecycle.lock().caller.clone()
    }

    /// Submitter backtrace, present only when the queue was in debug mode.
    pub fn caller_backtrace(&self) -> Option<String> {
        self.inner
            .lifecycle
            .lock()
            .caller
            .as_ref()
            .and_then(|c| c.backtrace.clone())
    }

    /// The worker thread that executed this action.
    pub fn worker_thread(&self) -> Option<Thread> {
        self.inner.lifecycle.lock().worker.clone()
    }

    /// Name of the queue this action was last submitted to, while that queue
    /// is alive.
    pub fn queue_name(&self) -> Option<String> {
        self.inner
            .lifecycle
            .lock()
            .queue
            .as_ref()
            .and_then(Weak::upgrade)
            .map(|q| q.name().to_string())
    }

    /// The token handed to the current (or next) execution.
    pub fn cancel_token(&self) -> CancelToken {
        self.inner.lifecycle.lock().token.clone()
    }

    /// Inspect or adjust the work value. Blocks while the action executes.
    pub fn with_work<R>(&self, f: impl FnOnce(&mut A) -> R) -> R {
        f(&mut self.inner.work.lock())
    }

    // -----------------------------------------------------------------------
    // Lifecycle control
    // -----------------------------------------------------------------------

    /// Cooperative cancellation. A no-op once finished. Otherwise marks the
    /// action killed and finished, wakes blocked submitters and cancels the
    /// token. A pending action is skipped by the worker; a running one keeps
    /// running until it checks its token.
    pub fn kill(&self) {
        Dispatch::kill(&*self.inner);
    }

    /// Restore the action to a pristine, resubmittable state.
    pub fn reset(&self) -> Result<()> {
        let mut life = self.inner.lifecycle.lock();
        if life.executing {
            return Err(QueueError::ActionBusy);
        }
        if life.queued {
            return Err(QueueError::AlreadyQueued);
        }
        let mut outcome = self.inner.outcome.lock();
        outcome.result = None;
        outcome.failure = None;
        *life = Lifecycle::default();
        self.inner.started.store(false, Ordering::Release);
        self.inner.killed.store(false, Ordering::Release);
        self.inner.finished.store(false, Ordering::Release);
        Ok(())
    }

    /// Offer a captured failure to [`QueueAction::failure_handler`]. Returns
    /// `true` when there is no failure left, either because there never was
    /// one or because the handler absorbed it.
    pub fn try_handle_failure(&self) -> bool {
        Dispatch::try_handle_failure(&*self.inner)
    }

    /// Block until the action finishes, then move its outcome out.
    pub fn wait(&self) -> std::result::Result<A::Output, WaitError<A::Error>> {
        let mut outcome = self.inner.outcome.lock();
        while !self.inner.finished.load(Ordering::Acquire) {
            self.inner.done.wait(&mut outcome);
        }
        if self.inner.killed.load(Ordering::Acquire) {
            return Err(WaitError::Killed);
        }
        if let Some(failure) = outcome.failure.take() {
            return Err(WaitError::Failed(failure));
        }
        outcome.result.take().ok_or(WaitError::NoOutcome)
    }

    /// Wait up to `timeout` for the action to finish. Leaves the outcome in
    /// place.
    pub fn wait_finished(&self, timeout: Duration) -> bool {
        let mut outcome = self.inner.outcome.lock();
        while !self.inner.finished.load(Ordering::Acquire) {
            if self.inner.done.wait_for(&mut outcome, timeout).timed_out() {
                return self.inner.finished.load(Ordering::Acquire);
            }
        }
        true
    }

    pub(crate) fn same_as(&self, ptr: *const ()) -> bool {
        Arc::as_ptr(&self.inner) as *const () == ptr
    }

    pub(crate) fn dispatchable(&self) -> Arc<dyn Dispatch> {
        Arc::clone(&self.inner) as Arc<dyn Dispatch>
    }
}

impl<A> Action<A>
where
    A: QueueAction,
    A::Output: Clone,
{
    pub fn result(&self) -> Option<A::Output> {
        self.inner.outcome.lock().result.clone()
    }
}

impl<A> Action<A>
where
    A: QueueAction,
    A::Error: Clone,
{
    pub fn failure(&self) -> Option<Failure<A::Error>> {
        self.inner.outcome.lock().failure.clone()
    }
}

// ---------------------------------------------------------------------------
// Dispatch — the type-erased view the queue keeps
// ---------------------------------------------------------------------------

pub(crate) trait Dispatch: Send + Sync {
    fn is_killed(&self) -> bool;
    fn is_detached(&self) -> bool;
    fn identity(&self) -> *const ();
    /// Record a submission. Fails if the action is pending or already ran.
    fn mark_submitted(
        &self,
        queue: &Arc<Shared>,
        caller: CallerInfo,
        detached: bool,
    ) -> Result<()>;
    fn mark_dequeued(&self);
    /// Run the work. For a detached submission a failure is offered to the
    /// failure handler before `finished` is published.
    fn execute(&self, queue: &Arc<Shared>, detached: bool) -> std::result::Result<(), Failed>;
    fn try_handle_failure(&self) -> bool;
    fn kill(&self);
}

/// A failed execution as seen by the worker.
#[derive(Debug)]
pub(crate) struct Failed {
    pub(crate) failure: DispatchFailure,
    /// The failure handler absorbed the failure.
    pub(crate) handled: bool,
}

/// Sets `finished` on every exit path from `execute`, including unwinding.
struct FinishGuard<'a, A: QueueAction> {
    inner: &'a Inner<A>,
}

impl<A: QueueAction> Drop for FinishGuard<'_, A> {
    fn drop(&mut self) {
        // Both locks held so `reset` never observes `executing == false`
        // before `finished` is set.
        let mut life = self.inner.lifecycle.lock();
        let _outcome = self.inner.outcome.lock();
        life.executing = false;
        self.inner.finished.store(true, Ordering::Release);
        self.inner.done.notify_all();
    }
}

impl<A: QueueAction> Inner<A> {
    fn record_failure(&self, failure: Failure<A::Error>) {
        self.outcome.lock().failure = Some(failure);
    }
}

impl<A: QueueAction> Dispatch for Inner<A> {
    fn is_killed(&self) -> bool {
        self.killed.load(Ordering::Acquire)
    }

    fn is_detached(&self) -> bool {
        self.lifecycle.lock().detached
    }

    fn identity(&self) -> *const () {
        self as *const Inner<A> as *const ()
    }

    fn mark_submitted(
        &self,
        queue: &Arc<Shared>,
        caller: CallerInfo,
        detached: bool,
    ) -> Result<()> {
        let mut life = self.lifecycle.lock();
        if life.queued {
            return Err(QueueError::AlreadyQueued);
        }
        if life.executing {
            return Err(QueueError::ActionBusy);
        }
        if self.finished.load(Ordering::Acquire) {
            return Err(QueueError::AlreadyFinished);
        }
        life.queued = true;
        life.detached = detached;
        life.caller = Some(caller);
        life.queue = Some(Arc::downgrade(queue));
        Ok(())
    }

    fn mark_dequeued(&self) {
        self.lifecycle.lock().queued = false;
    }

    fn execute(&self, queue: &Arc<Shared>, detached: bool) -> std::result::Result<(), Failed> {
        let token = {
            let mut life = self.lifecycle.lock();
            life.queue = Some(Arc::downgrade(queue));
            life.worker = Some(thread::current());
            life.executing = true;
            life.token.clone()
        };
        self.started.store(true, Ordering::Release);
        let _finish = FinishGuard { inner: self };

        let ran = {
            let mut work = self.work.lock();
            panic::catch_unwind(AssertUnwindSafe(|| work.run(&token)))
        };

        let failure = match ran {
            Ok(Ok(value)) => {
                self.outcome.lock().result = Some(value);
                return Ok(());
            }
            Ok(Err(declared)) => {
                let message = declared.to_string();
                self.record_failure(Failure::Declared(declared));
                DispatchFailure::Declared(message)
            }
            Err(payload) => {
                let fault = Fault::from_panic(payload);
                self.record_failure(Failure::Fault(fault.clone()));
                DispatchFailure::Fault(fault)
            }
        };

        if queue.is_debug() {
            let life = self.lifecycle.lock();
            if let Some(trace) = life.caller.as_ref().and_then(|c| c.backtrace.as_deref()) {
                tracing::error!(
                    queue = %queue.name(),
                    error = %failure,
                    "failing action was submitted from:\n{trace}"
                );
            }
        }

        let handled = detached
            && panic::catch_unwind(AssertUnwindSafe(|| Dispatch::try_handle_failure(self)))
                .unwrap_or_else(|_| {
                    tracing::error!(queue = %queue.name(), "failure handler panicked");
                    false
                });
        Err(Failed { failure, handled })
    }

    fn try_handle_failure(&self) -> bool {
        let mut outcome = self.outcome.lock();
        let Some(failure) = outcome.failure.as_ref() else {
            return true;
        };
        let handled = self.work.lock().failure_handler(failure);
        if handled {
            outcome.failure = None;
        }
        handled
    }

    fn kill(&self) {
        let token = {
            let life = self.lifecycle.lock();
            let _outcome = self.outcome.lock();
            if self.finished.load(Ordering::Acquire) {
                return;
            }
            self.killed.store(true, Ordering::Release);
            self.finished.store(true, Ordering::Release);
            self.done.notify_all();
            life.token.clone()
        };
        token.cancel();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
