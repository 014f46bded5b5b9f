// /////////////////////////////////////////////////////////////////////////////
// chunkworker
// SPDX-License-Identifier: BSD-3-Clause
// /////////////////////////////////////////////////////////////////////////////

//! `WorkerPool` (C4): a resizable pool of `EventThread`s pulling from one
//! shared `CommandQueue`. Grounded on the original `util::ThreadPool`
//! (`resize`/`waitForResize`/`release`/`endAll`, a hard ceiling on
//! physical threads) and `PoolEventThread::leavePool` for cooperative
//! eviction, plus `EventThreadJoiner` for the background reaper.
//!
//! Cooperative eviction is split into the two messages the redesign note
//! calls for: [`leave_pool`] runs in the evicting thread and only updates
//! accounting (`detach-from-pool`); spawning the replacement thread
//! (`spawn-replacement`) always runs from the pool's own bookkeeping, never
//! from the thread that is leaving.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};

use super::command_queue::{CommandQueue, PoisonPill};
use super::event_thread::EventThread;

thread_local! {
    static CURRENT_POOL: RefCell<Option<Weak<PoolState>>> = const { RefCell::new(None) };
    static EVICTED: Cell<bool> = const { Cell::new(false) };
}

/// Called by a running [`Command`](super::command_queue::Command) to
/// remove its own thread from the pool without blocking a pool slot for
/// the remainder of its (presumably I/O-bound) work. Returns `false` if
/// called from a thread that is not currently a pool member.
///
/// Blocks if evicting now (plus spawning the eventual replacement) would
/// push the number of physical threads past the pool's hard ceiling,
/// until another evicted thread finishes and is reaped.
pub fn leave_pool() -> bool {
    let weak = CURRENT_POOL.with(|cell| cell.borrow().clone());
    match weak.and_then(|w| w.upgrade()) {
        Some(state) => state.detach_current_thread(),
        None => false,
    }
}

struct Counts {
    pool_members: usize,
    evicted_running: usize,
    target: usize,
}

struct PoolState {
    counts: Mutex<Counts>,
    cv: Condvar,
    max_threads: usize,
    handles: Mutex<HashMap<ThreadId, JoinHandle<()>>>,
    joiner_tx: Sender<ThreadId>,
    queue: Arc<dyn CommandQueue>,
}

impl PoolState {
    fn spawn_thread(self: &Arc<Self>) {
        let state = self.clone();
        let handle = thread::Builder::new()
            .name("chunkworker-pool".to_string())
            .spawn(move || Self::thread_main(state))
            .expect("failed to spawn worker pool thread");
        let id = handle.thread().id();
        self.handles.lock().insert(id, handle);
        let mut counts = self.counts.lock();
        counts.pool_members += 1;
        self.cv.notify_all();
    }

    fn thread_main(state: Arc<PoolState>) {
        CURRENT_POOL.with(|cell| *cell.borrow_mut() = Some(Arc::downgrade(&state)));
        EVICTED.with(|e| e.set(false));

        EventThread::new(state.queue.clone()).run_until(|| EVICTED.with(Cell::get));

        let was_evicted = EVICTED.with(Cell::get);
        {
            let mut counts = state.counts.lock();
            if was_evicted {
                counts.evicted_running -= 1;
            } else {
                counts.pool_members -= 1;
            }
        }
        state.cv.notify_all();
        if let Err(err) = state.joiner_tx.send(thread::current().id()) {
            warn!(?err, "pool joiner channel closed before thread could be reaped");
        }
    }

    fn detach_current_thread(self: &Arc<Self>) -> bool {
        let mut counts = self.counts.lock();
        if counts.pool_members == 0 {
            return false;
        }
        loop {
            // +1 for this thread staying alive as "evicted", +1 for the
            // replacement the pool will spawn.
            let physical_after = (counts.pool_members - 1) + counts.evicted_running + 2;
            if physical_after <= self.max_threads {
                break;
            }
            self.cv.wait(&mut counts);
        }
        counts.pool_members -= 1;
        counts.evicted_running += 1;
        EVICTED.with(|e| e.set(true));
        drop(counts);
        debug!("thread evicted from pool; spawning replacement");
        self.spawn_thread();
        true
    }
}

/// Background reaper: joins the OS threads that left the pool (via
/// [`leave_pool`] or normal shrink-to-poison exit) once they actually
/// finish running. Polls its channel on a timeout so it notices shutdown
/// promptly without busy-waiting.
struct PoolJoiner {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl PoolJoiner {
    fn spawn(state: Arc<PoolState>, rx: Receiver<ThreadId>) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = stop.clone();
        let handle = thread::Builder::new()
            .name("chunkworker-pool-joiner".to_string())
            .spawn(move || loop {
                if stop_flag.load(Ordering::SeqCst) {
                    break;
                }
                match rx.recv_timeout(Duration::from_millis(1000)) {
                    Ok(id) => {
                        if let Some(h) = state.handles.lock().remove(&id) {
                            let _ = h.join();
                        }
                    }
                    Err(RecvTimeoutError::Timeout) => continue,
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            })
            .expect("failed to spawn pool joiner thread");
        Self { stop, handle: Some(handle) }
    }
}

impl Drop for PoolJoiner {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(h) = self.handle.take() {
            let _ = h.join();
        }
    }
}

/// A resizable pool of OS threads driving one shared `CommandQueue`.
pub struct WorkerPool {
    state: Arc<PoolState>,
    _joiner: PoolJoiner,
}

impl WorkerPool {
    pub fn new(queue: Arc<dyn CommandQueue>, initial_size: usize, max_threads: usize) -> Self {
        let (tx, rx) = channel::unbounded();
        let state = Arc::new(PoolState {
            counts: Mutex::new(Counts { pool_members: 0, evicted_running: 0, target: initial_size }),
            cv: Condvar::new(),
            max_threads,
            handles: Mutex::new(HashMap::new()),
            joiner_tx: tx,
            queue,
        });
        let joiner = PoolJoiner::spawn(state.clone(), rx);
        for _ in 0..initial_size {
            state.spawn_thread();
        }
        Self { state, _joiner: joiner }
    }

    /// Grows by spawning new threads; shrinks by enqueueing poison
    /// commands, one per thread to remove. Shrinking is eventually
    /// consistent — see [`Self::wait_for_resize`].
    pub fn resize(&self, target: usize) {
        let mut counts = self.state.counts.lock();
        let current = counts.pool_members;
        counts.target = target;
        drop(counts);
        if target > current {
            for _ in 0..(target - current) {
                self.state.spawn_thread();
            }
        } else {
            for _ in 0..(current.saturating_sub(target)) {
                self.state.queue.enqueue(Arc::new(PoisonPill));
            }
        }
    }

    /// Blocks until the pool's member count equals its target or
    /// `timeout` elapses; returns whether it converged.
    pub fn wait_for_resize(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut counts = self.state.counts.lock();
        while counts.pool_members != counts.target {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            let result = self.state.cv.wait_for(&mut counts, remaining);
            if result.timed_out() {
                break;
            }
        }
        counts.pool_members == counts.target
    }

    /// Sets target to zero and joins all pool threads.
    pub fn shutdown(&self) {
        self.resize(0);
        self.wait_for_resize(Duration::from_secs(60));
    }

    pub fn size(&self) -> usize {
        self.state.counts.lock().pool_members
    }

    pub fn target(&self) -> usize {
        self.state.counts.lock().target
    }

    pub fn evicted_running(&self) -> usize {
        self.state.counts.lock().evicted_running
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::runtime::command_queue::{Command, FifoQueue};
    use std::sync::atomic::AtomicUsize;
    use std::sync::Barrier;

    struct CountAndWait {
        counter: Arc<AtomicUsize>,
        barrier: Arc<Barrier>,
    }
    impl Command for CountAndWait {
        fn run(&self) {
            self.counter.fetch_add(1, Ordering::SeqCst);
            self.barrier.wait();
        }
    }

    #[test]
    fn grows_to_initial_size() {
        let queue = Arc::new(FifoQueue::new());
        let pool = WorkerPool::new(queue, 3, 10);
        assert!(pool.wait_for_resize(Duration::from_secs(2)));
        assert_eq!(pool.size(), 3);
        pool.shutdown();
        assert_eq!(pool.size(), 0);
    }

    #[test]
    fn shrinks_via_poison_pills() {
        let queue = Arc::new(FifoQueue::new());
        let pool = WorkerPool::new(queue, 4, 10);
        assert!(pool.wait_for_resize(Duration::from_secs(2)));
        pool.resize(1);
        assert!(pool.wait_for_resize(Duration::from_secs(2)));
        assert_eq!(pool.size(), 1);
        pool.shutdown();
    }

    #[test]
    fn every_dequeued_command_runs_before_shutdown_joins() {
        let queue: Arc<dyn CommandQueue> = Arc::new(FifoQueue::new());
        let pool = WorkerPool::new(queue.clone(), 4, 10);
        assert!(pool.wait_for_resize(Duration::from_secs(2)));
        let counter = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(5));
        for _ in 0..4 {
            queue.enqueue(Arc::new(CountAndWait { counter: counter.clone(), barrier: barrier.clone() }));
        }
        barrier.wait();
        pool.shutdown();
        assert_eq!(counter.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn leave_pool_outside_a_pool_thread_is_a_no_op() {
        assert!(!leave_pool());
    }
}
