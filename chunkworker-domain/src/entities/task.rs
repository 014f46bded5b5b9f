// /////////////////////////////////////////////////////////////////////////////
// chunkworker
// SPDX-License-Identifier: BSD-3-Clause
// /////////////////////////////////////////////////////////////////////////////

//! `Task`: the unit of work submitted to a worker. Grounded on the
//! original `wbase::Task` — a state machine with an orthogonal cancel
//! flag, a weak backref to whichever scheduler currently holds it, and a
//! query-runner handle installed so `cancel()` can interrupt in-flight
//! work.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use uuid::Uuid;

use crate::error::{WorkerError, WorkerResult};
use crate::services::{MemHandle, MemoryManager, SendChannel, SqlDriver, TaskScheduler};
use crate::value_objects::{ChunkId, Priority, ScanInfo};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(pub Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Process-wide set of live task ids, for catching double-free/
/// use-after-finish bugs during development. The original keeps an
/// unconditional `IdSet` for this; tracking here is opt-in via the
/// `debug_tracking` constructor flag so release builds pay nothing for
/// it (the closest stable equivalent to gating it behind
/// `cfg(debug_assertions)` at the call site, which owns the decision of
/// when to enable it).
#[derive(Debug, Default)]
pub struct TaskRegistry {
    tracking: Option<Mutex<std::collections::HashSet<TaskId>>>,
}

impl TaskRegistry {
    pub fn new(debug_tracking: bool) -> Self {
        Self { tracking: debug_tracking.then(|| Mutex::new(std::collections::HashSet::new())) }
    }

    pub fn register(&self, id: TaskId) {
        if let Some(live) = &self.tracking {
            live.lock().insert(id);
        }
    }

    pub fn unregister(&self, id: TaskId) {
        if let Some(live) = &self.tracking {
            live.lock().remove(&id);
        }
    }

    pub fn contains(&self, id: TaskId) -> bool {
        self.tracking.as_ref().is_some_and(|live| live.lock().contains(&id))
    }

    pub fn len(&self) -> usize {
        self.tracking.as_ref().map_or(0, |live| live.lock().len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Lifecycle state. Transitions are monotonic along
/// `CREATED -> QUEUED -> RUNNING -> FINISHED`; `CANCELLED` is not a member
/// of this enum because it is an orthogonal flag observable in any state
/// (§3, §4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Created,
    Queued,
    Running,
    Finished,
}

impl TaskState {
    fn can_advance_to(self, next: TaskState) -> bool {
        use TaskState::*;
        matches!(
            (self, next),
            (Created, Queued) | (Queued, Running) | (Running, Finished)
        )
    }
}

struct TimestampState {
    state: TaskState,
    queued_at: Option<DateTime<Utc>>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
}

/// A unit of work submitted to the worker.
pub struct Task {
    id: TaskId,
    query_id: u64,
    job_id: u64,
    chunk_id: ChunkId,
    priority: Priority,
    scan_info: ScanInfo,
    /// External input contract (§9 open questions): whether this task must
    /// stay pinned to its current group-lane batch, e.g. for near-neighbor
    /// pairs. Set by whatever builds the task; honored as-is here.
    pub sticky_group: bool,

    cancelled: AtomicBool,
    safe_to_move: AtomicBool,

    scheduler: Mutex<Option<Weak<dyn TaskScheduler>>>,
    query_runner: Mutex<Option<Arc<dyn SqlDriver>>>,
    resource_handle: Mutex<Option<MemHandle>>,
    send_channel: Mutex<Option<Arc<dyn SendChannel>>>,

    timestamps: Mutex<TimestampState>,
}

impl Task {
    pub fn new(query_id: u64, job_id: u64, chunk_id: ChunkId, priority: Priority, scan_info: ScanInfo) -> Self {
        Self {
            id: TaskId::new(),
            query_id,
            job_id,
            chunk_id,
            priority,
            scan_info,
            sticky_group: false,
            cancelled: AtomicBool::new(false),
            safe_to_move: AtomicBool::new(false),
            scheduler: Mutex::new(None),
            query_runner: Mutex::new(None),
            resource_handle: Mutex::new(None),
            send_channel: Mutex::new(None),
            timestamps: Mutex::new(TimestampState {
                state: TaskState::Created,
                queued_at: None,
                started_at: None,
                finished_at: None,
            }),
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn query_id(&self) -> u64 {
        self.query_id
    }

    pub fn job_id(&self) -> u64 {
        self.job_id
    }

    pub fn chunk_id(&self) -> &ChunkId {
        &self.chunk_id
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn scan_info(&self) -> &ScanInfo {
        &self.scan_info
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn is_safe_to_move(&self) -> bool {
        self.safe_to_move.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> TaskState {
        self.timestamps.lock().state
    }

    /// Installs the scheduler this task was queued into, so `cancel()` can
    /// notify it. Stored weak: the scheduler owns tasks, not the reverse.
    pub fn attach_scheduler(&self, scheduler: Weak<dyn TaskScheduler>) {
        *self.scheduler.lock() = Some(scheduler);
    }

    /// Installs the SQL-driver handle `cancel()` uses to interrupt the
    /// in-progress query. Returns whether the task was already cancelled
    /// at install time, so the caller can short-circuit immediately
    /// instead of starting the query.
    pub fn set_query_runner(&self, runner: Arc<dyn SqlDriver>) -> bool {
        *self.query_runner.lock() = Some(runner);
        self.is_cancelled()
    }

    pub fn clear_query_runner(&self) {
        *self.query_runner.lock() = None;
    }

    /// Installs the channel result frames and errors are reported back
    /// through (§4.7, §7), mirroring `wbase::Task`'s constructor-injected
    /// `sendChannel`. Attached after construction, like the scheduler and
    /// query-runner collaborators, since this crate builds a `Task` before
    /// it knows which submission path owns the reply channel.
    pub fn attach_send_channel(&self, channel: Arc<dyn SendChannel>) {
        *self.send_channel.lock() = Some(channel);
    }

    /// Routes a query failure to the installed send channel, if any, and
    /// returns whether one was installed to deliver it. A task with no
    /// channel attached (e.g. the CLI harness, which never submits through
    /// a reply path) silently drops the report rather than erroring.
    pub fn report_error(&self, err: &WorkerError) -> bool {
        match self.send_channel.lock().as_ref() {
            Some(channel) => {
                channel.send_error(Err(err.clone()));
                true
            }
            None => false,
        }
    }

    /// Idempotent: sets the cancel flag, forwards to any installed query
    /// runner, and notifies the owning scheduler so a scan-lane queue can
    /// drop the task. Wait-free with respect to the cancel flag itself.
    pub fn cancel(&self) {
        if self.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(runner) = self.query_runner.lock().as_ref() {
            runner.cancel();
        }
        if let Some(scheduler) = self.scheduler.lock().as_ref().and_then(Weak::upgrade) {
            scheduler.task_cancelled(self.id);
        }
    }

    /// Blocks until the memory manager collaborator grants a handle.
    /// Cancellation observed during the wait is honored and returns
    /// `Err(Cancelled)` without ever granting `safe_to_move`.
    pub fn wait_for_resource(&self, mem: &dyn MemoryManager) -> WorkerResult<()> {
        if self.is_cancelled() {
            return Err(WorkerError::Cancelled);
        }
        let handle = mem.acquire(self.id)?;
        if self.is_cancelled() {
            mem.release(handle);
            return Err(WorkerError::Cancelled);
        }
        *self.resource_handle.lock() = Some(handle);
        self.safe_to_move.store(true, Ordering::SeqCst);
        Ok(())
    }

    pub fn release_resource(&self, mem: &dyn MemoryManager) {
        if let Some(handle) = self.resource_handle.lock().take() {
            mem.release(handle);
        }
    }

    fn advance(&self, next: TaskState, stamp: impl FnOnce(&mut TimestampState)) {
        let mut ts = self.timestamps.lock();
        if !ts.state.can_advance_to(next) {
            // Monotonic by construction: callers only drive transitions
            // through queued()/started()/finished(), so this would be a
            // caller bug, not a data condition. Stay silent rather than
            // panic the worker thread over bookkeeping.
            return;
        }
        ts.state = next;
        stamp(&mut ts);
    }

    pub fn queued(&self) {
        self.advance(TaskState::Queued, |ts| ts.queued_at = Some(Utc::now()));
    }

    pub fn started(&self) {
        self.advance(TaskState::Running, |ts| ts.started_at = Some(Utc::now()));
    }

    /// Marks FINISHED and returns the run duration (`finished - started`),
    /// well-defined only once this call has completed.
    pub fn finished(&self) -> Duration {
        let now = Utc::now();
        let mut ts = self.timestamps.lock();
        let started_at = ts.started_at.unwrap_or(now);
        if ts.state.can_advance_to(TaskState::Finished) {
            ts.state = TaskState::Finished;
            ts.finished_at = Some(now);
        }
        (now - started_at).to_std().unwrap_or(Duration::ZERO)
    }

    pub fn queued_at(&self) -> Option<DateTime<Utc>> {
        self.timestamps.lock().queued_at
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.timestamps.lock().started_at
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.timestamps.lock().finished_at
    }
}
