// /////////////////////////////////////////////////////////////////////////////
// chunkworker
// SPDX-License-Identifier: BSD-3-Clause
// /////////////////////////////////////////////////////////////////////////////

//! `CommandQueue` (C3): an abstract FIFO-like command source with
//! pluggable ordering, notified via a condition variable. Grounded on the
//! original `util::CommandQueue` (deque + mutex + condvar, `queCmd`/
//! `getCmd(wait)`, `commandStart`/`commandFinish` hooks).
//!
//! `dequeue(wait = true)` is allowed to return `None` even though the
//! caller asked to wait, if the queue was notified spuriously or a
//! subclass's `ready()` went false between the wakeup and the lock being
//! reacquired; callers must loop and re-check rather than treat `None` as
//! end-of-input.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use chunkworker_domain::value_objects::{ChunkId, Priority};

/// A runnable unit of work pulled from a queue by a pool thread.
///
/// The scheduling metadata methods default to "no affinity" so that
/// non-task commands (the poison pill, lane-internal bookkeeping) need not
/// implement them; the scheduler lanes in `infrastructure::scheduler` rely
/// on them to group and prioritize real task commands.
pub trait Command: Send + Sync {
    fn run(&self);

    /// Distinguished "exit" command (§4.4): when an `EventThread` dequeues
    /// one, it terminates its loop instead of calling `run`. The default
    /// is `false`; only [`PoisonPill`] overrides it.
    fn is_poison(&self) -> bool {
        false
    }

    /// The chunk this command is pinned to, if any (group-lane affinity).
    fn chunk_id(&self) -> Option<&ChunkId> {
        None
    }

    /// Declared scan tables; non-empty routes to the shared-scan lane.
    fn scan_tables(&self) -> &[String] {
        &[]
    }

    fn priority_class(&self) -> Option<Priority> {
        None
    }

    /// External input contract (§9): whether this command must stay
    /// pinned to its current group-lane batch regardless of room.
    fn sticky_group(&self) -> bool {
        false
    }
}

/// The distinguished command `WorkerPool::resize` enqueues to shrink the
/// pool: whichever thread dequeues it exits its event loop.
pub struct PoisonPill;

impl Command for PoisonPill {
    fn run(&self) {}

    fn is_poison(&self) -> bool {
        true
    }
}

/// Capability interface implemented by every scheduling lane (group,
/// shared-scan) and by the blend scheduler that sits in front of them —
/// the sum-type replacement for the source's `CommandQueue`/`Scheduler`
/// inheritance hierarchy (see the redesign note on inheritance
/// hierarchies).
pub trait CommandQueue: Send + Sync {
    fn enqueue(&self, cmd: Arc<dyn Command>);

    /// Enqueues all of `cmds` atomically with respect to concurrent
    /// `dequeue` calls: no dequeuer observes a partial batch.
    fn enqueue_batch(&self, cmds: Vec<Arc<dyn Command>>);

    /// `wait = true` blocks until a command is available or the queue is
    /// notified; implementations may still return `None` on a spurious
    /// wakeup or a ready-check that turned false meanwhile.
    fn dequeue(&self, wait: bool) -> Option<Arc<dyn Command>>;

    fn notify_all(&self);

    fn notify_one(&self);

    /// Whether a `dequeue` call would currently succeed without blocking.
    fn ready(&self) -> bool;

    fn on_start(&self, _cmd: &Arc<dyn Command>) {}

    fn on_finish(&self, _cmd: &Arc<dyn Command>) {}
}

/// The default ordering: plain FIFO.
pub struct FifoQueue {
    deque: Mutex<VecDeque<Arc<dyn Command>>>,
    condvar: Condvar,
}

impl FifoQueue {
    pub fn new() -> Self {
        Self { deque: Mutex::new(VecDeque::new()), condvar: Condvar::new() }
    }
}

impl Default for FifoQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandQueue for FifoQueue {
    fn enqueue(&self, cmd: Arc<dyn Command>) {
        self.deque.lock().push_back(cmd);
        self.condvar.notify_one();
    }

    fn enqueue_batch(&self, cmds: Vec<Arc<dyn Command>>) {
        let mut guard = self.deque.lock();
        guard.extend(cmds);
        self.condvar.notify_all();
    }

    fn dequeue(&self, wait: bool) -> Option<Arc<dyn Command>> {
        let mut guard = self.deque.lock();
        if guard.is_empty() {
            if !wait {
                return None;
            }
            self.condvar.wait(&mut guard);
        }
        guard.pop_front()
    }

    fn notify_all(&self) {
        self.condvar.notify_all();
    }

    fn notify_one(&self) {
        self.condvar.notify_one();
    }

    fn ready(&self) -> bool {
        !self.deque.lock().is_empty()
    }
}
