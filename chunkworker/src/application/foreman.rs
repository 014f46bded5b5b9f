// /////////////////////////////////////////////////////////////////////////////
// chunkworker
// SPDX-License-Identifier: BSD-3-Clause
// /////////////////////////////////////////////////////////////////////////////

//! `Foreman` (C8): owns the thread pool, the blended scheduler and the
//! collaborators a running task needs, and is the single entry point new
//! work comes in through. Grounded on the original `wcontrol::Foreman` -
//! a `Scheduler` plus a `ThreadPool` plus a `MySqlConfig`, constructed
//! once, exposing one `processTask` method - generalized here to own the
//! group/scan lanes directly (rather than a single `Scheduler` base
//! class; see the redesign note on inheritance hierarchies) and to drive
//! the scan lane's timeout sweep on a background interval, since the
//! source's scheduler ran that sweep from its own internal thread.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use chunkworker_domain::entities::{Task, TaskRegistry, TaskState};
use chunkworker_domain::services::{ConfigurationRef, MemoryManager, SendChannel, SqlDriver};
use chunkworker_domain::value_objects::Priority;
use chunkworker_domain::WorkerResult;

use crate::infrastructure::runtime::command_queue::{Command, CommandQueue};
use crate::infrastructure::runtime::worker_pool::{self, WorkerPool};
use crate::infrastructure::scheduler::{BlendScheduler, GroupLane, ScanLane, ScanLaneConfig};

/// Wraps a domain [`Task`] as a runtime [`Command`] so the scheduler and
/// pool - which only know about `Command` - can drive it. Installs the
/// SQL driver, waits for a memory grant, and runs the query; timestamps
/// and cancellation are the task's own responsibility.
struct TaskCommand {
    task: Arc<Task>,
    mem: Arc<dyn MemoryManager>,
    driver: Arc<dyn SqlDriver>,
    booted: Arc<Mutex<HashSet<usize>>>,
    /// Own address once wrapped in `Arc<dyn Command>`, set by `Foreman`
    /// right after construction so `run` can recognize itself in the
    /// booted set the timeout sweep populates.
    self_key: AtomicUsize,
}

impl TaskCommand {
    fn new(task: Arc<Task>, mem: Arc<dyn MemoryManager>, driver: Arc<dyn SqlDriver>, booted: Arc<Mutex<HashSet<usize>>>) -> Self {
        Self { task, mem, driver, booted, self_key: AtomicUsize::new(0) }
    }
}

impl Command for TaskCommand {
    fn run(&self) {
        self.task.queued();
        if self.task.set_query_runner(self.driver.clone()) {
            self.task.clear_query_runner();
            return;
        }
        if self.task.wait_for_resource(&*self.mem).is_err() {
            self.task.clear_query_runner();
            return;
        }
        self.task.started();

        // Single checkpoint: the scan lane's timeout sweep can only mark a
        // task "booted" while it is in flight, and a blocking `run_query`
        // call gives no other safe point to notice that before it
        // returns. Evicting the pool slot here does not touch the
        // in-progress query (§5: timeout never auto-cancels the task).
        let key = self.self_key.load(Ordering::SeqCst);
        if self.booted.lock().remove(&key) {
            debug!(task_id = %self.task.id(), "task exceeded its scan timeout; evicting pool slot before running query");
            worker_pool::leave_pool();
        }

        if let Err(err) = self.driver.run_query() {
            warn!(task_id = %self.task.id(), %err, "task query failed");
            self.task.report_error(&err);
        }
        self.task.release_resource(&*self.mem);
        self.task.clear_query_runner();
        let elapsed = self.task.finished();
        debug!(task_id = %self.task.id(), ?elapsed, "task finished");
    }

    fn chunk_id(&self) -> Option<&chunkworker_domain::value_objects::ChunkId> {
        Some(self.task.chunk_id())
    }

    fn scan_tables(&self) -> &[String] {
        &self.task.scan_info().tables
    }

    fn priority_class(&self) -> Option<Priority> {
        self.task.scan_info().priority.or(Some(self.task.priority()))
    }

    fn sticky_group(&self) -> bool {
        self.task.sticky_group
    }
}

fn scan_lane_config(config: &dyn chunkworker_domain::services::Configuration) -> ScanLaneConfig {
    let mut reserved_threads = [0usize; 4];
    let mut active_chunk_cap = [0usize; 4];
    let mut timeout = [Duration::ZERO; 4];
    for (i, &class) in Priority::ALL.iter().enumerate() {
        let reservation = config.scan_reservation(class);
        reserved_threads[i] = reservation.reserved_threads;
        active_chunk_cap[i] = reservation.active_chunk_cap;
        timeout[i] = config.scan_timeout(class);
    }
    ScanLaneConfig {
        reserved_threads,
        active_chunk_cap,
        timeout,
        max_booted_per_query: config.max_booted_per_query(),
        max_booted_total: config.max_booted_total(),
    }
}

/// Background driver for `ScanLane::sweep_timeouts`. Owns its own stop
/// flag so `Foreman::shutdown` can join it deterministically instead of
/// detaching it.
struct TimeoutSweeper {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl TimeoutSweeper {
    fn spawn(scan: Arc<ScanLane>, booted: Arc<Mutex<HashSet<usize>>>, interval: Duration) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = stop.clone();
        let handle = thread::Builder::new()
            .name("chunkworker-timeout-sweep".to_string())
            .spawn(move || {
                while !stop_flag.load(Ordering::SeqCst) {
                    thread::sleep(interval);
                    let newly_booted = scan.sweep_timeouts(Instant::now());
                    if !newly_booted.is_empty() {
                        booted.lock().extend(newly_booted);
                    }
                }
            })
            .expect("failed to spawn timeout sweep thread");
        Self { stop, handle: Some(handle) }
    }
}

impl Drop for TimeoutSweeper {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(h) = self.handle.take() {
            let _ = h.join();
        }
    }
}

/// Owns the thread pool and blended scheduler and is the process's single
/// intake point for new tasks. Not `Clone`; share it behind an `Arc`.
pub struct Foreman {
    queue: Arc<BlendScheduler>,
    pool: WorkerPool,
    mem: Arc<dyn MemoryManager>,
    booted: Arc<Mutex<HashSet<usize>>>,
    /// Tracked so a future admin surface can report in-flight tasks;
    /// entries are pruned lazily on the next `process` call rather than on
    /// completion, since `Command::run` has no hook to remove itself.
    in_flight: Mutex<HashMap<usize, Arc<Task>>>,
    accepting: AtomicBool,
    _sweeper: TimeoutSweeper,
    /// Debug-only live-task tracking (enabled in debug builds); see
    /// `TaskRegistry`'s own doc comment.
    registry: TaskRegistry,
}

impl Foreman {
    /// `sweep_interval` is the cadence the scan lane's per-priority
    /// timeouts are checked at; five seconds is a reasonable default for
    /// timeouts measured in minutes (see `Configuration::scan_timeout`).
    pub fn new(config: ConfigurationRef, mem: Arc<dyn MemoryManager>) -> Self {
        Self::with_sweep_interval(config, mem, Duration::from_secs(5))
    }

    pub fn with_sweep_interval(config: ConfigurationRef, mem: Arc<dyn MemoryManager>, sweep_interval: Duration) -> Self {
        let group = Arc::new(GroupLane::new(config.max_group_size()));
        let scan = Arc::new(ScanLane::new(scan_lane_config(config.as_ref())));
        let queue = Arc::new(BlendScheduler::new(group.clone(), scan.clone()));
        let pool = WorkerPool::new(queue.clone() as Arc<dyn CommandQueue>, config.pool_size(), config.max_threads());
        let booted = Arc::new(Mutex::new(HashSet::new()));
        let sweeper = TimeoutSweeper::spawn(scan.clone(), booted.clone(), sweep_interval);
        info!(pool_size = config.pool_size(), max_threads = config.max_threads(), "foreman started");
        Self {
            queue,
            pool,
            mem,
            booted,
            in_flight: Mutex::new(HashMap::new()),
            accepting: AtomicBool::new(true),
            _sweeper: sweeper,
            registry: TaskRegistry::new(cfg!(debug_assertions)),
        }
    }

    /// Submits `task` for execution against `driver`, with `channel` as
    /// the collaborator query failures are reported to (§4.7, §7).
    /// Non-blocking: the task is handed to the scheduler and this returns
    /// immediately. Rejects new work once `shutdown` has begun.
    pub fn process(&self, task: Arc<Task>, driver: Arc<dyn SqlDriver>, channel: Arc<dyn SendChannel>) -> WorkerResult<()> {
        if !self.accepting.load(Ordering::SeqCst) {
            task.cancel();
            return Err(chunkworker_domain::WorkerError::Cancelled);
        }
        self.prune_finished();
        task.attach_send_channel(channel);
        self.registry.register(task.id());
        let concrete = Arc::new(TaskCommand::new(task.clone(), self.mem.clone(), driver, self.booted.clone()));
        let key = Arc::as_ptr(&concrete) as *const () as usize;
        concrete.self_key.store(key, Ordering::SeqCst);
        self.in_flight.lock().insert(key, task);
        let cmd: Arc<dyn Command> = concrete;
        self.queue.enqueue(cmd);
        Ok(())
    }

    /// Drops already-FINISHED entries from the in-flight table and the
    /// debug registry. Called lazily at the top of `process` rather than
    /// from a completion hook, since `Command::run` has no way to reach
    /// back into `Foreman`.
    fn prune_finished(&self) {
        let mut in_flight = self.in_flight.lock();
        let finished: Vec<usize> =
            in_flight.iter().filter(|(_, task)| task.state() == TaskState::Finished).map(|(&key, _)| key).collect();
        for key in finished {
            if let Some(task) = in_flight.remove(&key) {
                self.registry.unregister(task.id());
            }
        }
    }

    pub fn pool_size(&self) -> usize {
        self.pool.size()
    }

    pub fn resize_pool(&self, target: usize) {
        self.pool.resize(target);
    }

    /// Graceful shutdown, in the order the source's teardown relies on:
    /// stop accepting new work, cancel everything still queued or
    /// in-flight, then drain the pool so no command starts after this
    /// call returns.
    pub fn shutdown(&self) {
        self.accepting.store(false, Ordering::SeqCst);
        for task in self.in_flight.lock().values() {
            task.cancel();
        }
        self.pool.shutdown();
        info!("foreman shut down");
    }
}
