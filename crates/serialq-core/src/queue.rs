//! The serializing scheduler.
//!
//! A [`Queue`] owns one worker thread and a priority-ordered pending set.
//! Producers on any thread call [`Queue::add`] or [`Queue::add_and_wait`]; the
//! worker pops the highest priority action (oldest first within a priority),
//! executes it, and moves on. At most one action per queue runs at a time.
//!
//! The worker never dies because of an action: declared failures and panics
//! are captured on the action, logged, and the loop continues.

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle, ThreadId};

use parking_lot::{Condvar, Mutex};
use serde::Serialize;

use crate::action::{Action, CallerInfo, Dispatch, Failed, QueueAction};
use crate::config::{QueueConfig, ShutdownPolicy};
use crate::error::{QueueError, Result};
use crate::failure::{DispatchFailure, WaitError};
use crate::priority::Priority;

// ---------------------------------------------------------------------------
// Pending entries
// ---------------------------------------------------------------------------

struct Entry {
    priority: Priority,
    seq: u64,
    action: Arc<dyn Dispatch>,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    // Max-heap: higher priority first, then lower sequence number first.
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct State {
    pending: BinaryHeap<Entry>,
    next_seq: u64,
    paused: bool,
    closing: Option<ShutdownPolicy>,
}

// ---------------------------------------------------------------------------
// QueueStats
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct Counters {
    submitted: AtomicU64,
    executed: AtomicU64,
    failed: AtomicU64,
    handled: AtomicU64,
    skipped: AtomicU64,
}

/// Snapshot of a queue's lifetime counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub submitted: u64,
    /// Actions whose work function ran, successfully or not.
    pub executed: u64,
    pub failed: u64,
    /// Failures absorbed by a failure handler.
    pub handled: u64,
    /// Actions killed before dispatch and therefore never run.
    pub skipped: u64,
}

// ---------------------------------------------------------------------------
// Shared
// ---------------------------------------------------------------------------

pub(crate) struct Shared {
    name: String,
    debug: AtomicBool,
    policy: ShutdownPolicy,
    state: Mutex<State>,
    available: Condvar,
    worker: OnceLock<ThreadId>,
    counters: Counters,
}

impl Shared {
    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn is_debug(&self) -> bool {
        self.debug.load(Ordering::Acquire)
    }

    fn is_worker_thread(&self) -> bool {
        self.worker.get() == Some(&thread::current().id())
    }

    fn enqueue(
        self: &Arc<Self>,
        action: Arc<dyn Dispatch>,
        priority: Priority,
        detached: bool,
    ) -> Result<()> {
        let caller = CallerInfo::capture(self.is_debug());
        let mut state = self.state.lock();
        if state.closing.is_some() {
            return Err(QueueError::ShutDown(self.name.clone()));
        }
        action.mark_submitted(self, caller, detached)?;
        let seq = state.next_seq;
        state.next_seq += 1;
        state.pending.push(Entry {
            priority,
            seq,
            action,
        });
        self.counters.submitted.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(queue = %self.name, %priority, seq, "action queued");
        self.available.notify_one();
        Ok(())
    }

    /// Record a submission that the worker will run immediately, bypassing
    /// the pending set.
    fn admit_inline(self: &Arc<Self>, action: &dyn Dispatch) -> Result<()> {
        let caller = CallerInfo::capture(self.is_debug());
        let state = self.state.lock();
        if state.closing.is_some() {
            return Err(QueueError::ShutDown(self.name.clone()));
        }
        action.mark_submitted(self, caller, false)?;
        drop(state);
        self.counters.submitted.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn next(&self) -> Option<Entry> {
        let mut state = self.state.lock();
        loop {
            if !state.paused || state.closing.is_some() {
                if let Some(entry) = state.pending.pop() {
                    return Some(entry);
                }
            }
            if state.closing.is_some() {
                return None;
            }
            self.available.wait(&mut state);
        }
    }

    fn dispatch(self: &Arc<Self>, action: &Arc<dyn Dispatch>) {
        action.mark_dequeued();
        // Skip-if-killed: a killed action is never executed.
        if action.is_killed() {
            self.counters.skipped.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(queue = %self.name, "skipping killed action");
            return;
        }

        let detached = action.is_detached();
        let outcome = action.execute(self, detached);
        self.counters.executed.fetch_add(1, Ordering::Relaxed);
        let Err(Failed { failure, handled }) = outcome else {
            return;
        };
        self.counters.failed.fetch_add(1, Ordering::Relaxed);

        if !detached {
            tracing::debug!(
                queue = %self.name,
                error = %failure,
                "action failed; returning failure to waiting submitter"
            );
            return;
        }

        if handled {
            self.counters.handled.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(queue = %self.name, error = %failure, "action failure handled");
            return;
        }

        match failure {
            DispatchFailure::Fault(fault) => {
                tracing::error!(queue = %self.name, error = %fault, "action panicked");
            }
            DispatchFailure::Declared(message) => {
                tracing::warn!(queue = %self.name, error = %message, "action failed");
            }
        }
    }

    fn close(&self, policy: ShutdownPolicy) {
        let discarded: Vec<Entry> = {
            let mut state = self.state.lock();
            if state.closing.is_none() {
                state.closing = Some(policy);
            }
            let discarded = match state.closing {
                Some(ShutdownPolicy::Discard) => state.pending.drain().collect(),
                _ => Vec::new(),
            };
            self.available.notify_all();
            discarded
        };
        if !discarded.is_empty() {
            tracing::info!(
                queue = %self.name,
                count = discarded.len(),
                "discarding pending actions on shutdown"
            );
        }
        for entry in discarded {
            entry.action.mark_dequeued();
            entry.action.kill();
            self.counters.skipped.fetch_add(1, Ordering::Relaxed);
        }
    }
}

fn worker_loop(shared: Arc<Shared>) {
    let _ = shared.worker.set(thread::current().id());
    tracing::debug!(queue = %shared.name, "queue worker started");
    while let Some(entry) = shared.next() {
        shared.dispatch(&entry.action);
    }
    tracing::debug!(queue = %shared.name, "queue worker stopped");
}

// ---------------------------------------------------------------------------
// Queue
// ---------------------------------------------------------------------------

/// A priority-ordered, single-worker action queue.
///
/// Share it between producers with `Arc<Queue>`. Dropping the queue shuts it
/// down with its configured [`ShutdownPolicy`].
pub struct Queue {
    shared: Arc<Shared>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Queue {
    /// Start a queue with default settings and the given worker name.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        Self::with_config(QueueConfig {
            name: name.into(),
            ..QueueConfig::default()
        })
    }

    pub fn with_config(config: QueueConfig) -> Result<Self> {
        if config.name.trim().is_empty() || config.name.contains('\0') {
            return Err(QueueError::InvalidName(config.name));
        }
        let shared = Arc::new(Shared {
            name: config.name.clone(),
            debug: AtomicBool::new(config.debug),
            policy: config.shutdown,
            state: Mutex::new(State {
                pending: BinaryHeap::new(),
                next_seq: 0,
                paused: config.start_paused,
                closing: None,
            }),
            available: Condvar::new(),
            worker: OnceLock::new(),
            counters: Counters::default(),
        });
        let worker_shared = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name(config.name)
            .spawn(move || worker_loop(worker_shared))?;
        Ok(Self {
            shared,
            handle: Mutex::new(Some(handle)),
        })
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn shutdown_policy(&self) -> ShutdownPolicy {
        self.shared.policy
    }

    pub fn is_debug(&self) -> bool {
        self.shared.is_debug()
    }

    /// Toggle submitter backtrace capture for subsequent submissions.
    pub fn set_debug(&self, debug: bool) {
        self.shared.debug.store(debug, Ordering::Release);
    }

    // -----------------------------------------------------------------------
    // Submission
    // -----------------------------------------------------------------------

    /// Fire-and-forget submission at the action's own priority.
    pub fn add<A: QueueAction>(&self, action: &Action<A>) -> Result<()> {
        self.shared
            .enqueue(action.dispatchable(), action.priority(), true)
    }

    /// Fire-and-forget submission, overriding the action's priority.
    pub fn add_with_priority<A: QueueAction>(
        &self,
        action: &Action<A>,
        priority: Priority,
    ) -> Result<()> {
        action.set_priority(priority);
        self.add(action)
    }

    /// Submit and block until the action finishes, returning its result or
    /// its failure as if the work had run inline.
    ///
    /// Called from this queue's own worker thread (an action submitting more
    /// work), the action executes immediately instead of deadlocking.
    pub fn add_and_wait<A: QueueAction>(
        &self,
        action: &Action<A>,
    ) -> std::result::Result<A::Output, WaitError<A::Error>> {
        let dispatch = action.dispatchable();
        if self.shared.is_worker_thread() {
            self.shared.admit_inline(dispatch.as_ref())?;
            self.shared.dispatch(&dispatch);
        } else {
            self.shared
                .enqueue(dispatch, action.priority(), false)?;
        }
        action.wait()
    }

    /// Withdraw a pending action. Returns `false` if it was not pending here
    /// (already dispatched, never submitted, or owned by another queue).
    pub fn remove<A: QueueAction>(&self, action: &Action<A>) -> bool {
        let mut state = self.shared.state.lock();
        let mut removed = None;
        state.pending.retain(|entry| {
            if removed.is_none() && action.same_as(entry.action.identity()) {
                removed = Some(Arc::clone(&entry.action));
                false
            } else {
                true
            }
        });
        drop(state);
        match removed {
            Some(dispatch) => {
                dispatch.mark_dequeued();
                true
            }
            None => false,
        }
    }

    /// Kill and drop every pending action. The running action, if any, is
    /// left alone. Returns how many were killed.
    pub fn kill_pending(&self) -> usize {
        let drained: Vec<Entry> = self.shared.state.lock().pending.drain().collect();
        let count = drained.len();
        for entry in drained {
            entry.action.mark_dequeued();
            entry.action.kill();
            self.shared
                .counters
                .skipped
                .fetch_add(1, Ordering::Relaxed);
        }
        count
    }

    // -----------------------------------------------------------------------
    // Inspection and flow control
    // -----------------------------------------------------------------------

    pub fn len(&self) -> usize {
        self.shared.state.lock().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the calling thread is this queue's worker.
    pub fn is_queue_thread(&self) -> bool {
        self.shared.is_worker_thread()
    }

    /// Stop dispatching. Submissions are still accepted and ordered.
    pub fn pause(&self) {
        self.shared.state.lock().paused = true;
    }

    pub fn resume(&self) {
        self.shared.state.lock().paused = false;
        self.shared.available.notify_all();
    }

    pub fn is_paused(&self) -> bool {
        self.shared.state.lock().paused
    }

    pub fn is_shut_down(&self) -> bool {
        self.shared.state.lock().closing.is_some()
    }

    pub fn stats(&self) -> QueueStats {
        let c = &self.shared.counters;
        QueueStats {
            submitted: c.submitted.load(Ordering::Relaxed),
            executed: c.executed.load(Ordering::Relaxed),
            failed: c.failed.load(Ordering::Relaxed),
            handled: c.handled.load(Ordering::Relaxed),
            skipped: c.skipped.load(Ordering::Relaxed),
        }
    }

    // -----------------------------------------------------------------------
    // Shutdown
    // -----------------------------------------------------------------------

    /// Shut down with the configured policy and join the worker.
    pub fn shutdown(&self) {
        self.shutdown_with(self.shared.policy);
    }

    /// Shut down with an explicit policy. `Drain` runs every pending action
    /// first (even while paused); `Discard` kills them, waking any blocked
    /// submitters. The first policy applied wins.
    ///
    /// Called from the worker thread itself, the worker is not joined.
    pub fn shutdown_with(&self, policy: ShutdownPolicy) {
        self.shared.close(policy);
        if self.shared.is_worker_thread() {
            return;
        }
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                tracing::error!(queue = %self.shared.name, "queue worker panicked");
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn shared(&self) -> &Arc<Shared> {
        &self.shared
    }
}

impl Drop for Queue {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for Queue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Queue")
            .field("name", &self.shared.name)
            .field("debug", &self.is_debug())
            .field("pending", &self.len())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
