// /////////////////////////////////////////////////////////////////////////////
// chunkworker
// SPDX-License-Identifier: BSD-3-Clause
// /////////////////////////////////////////////////////////////////////////////

//! Shared-scan lane (C5): tasks bucketed by declared priority class, each
//! bucket with a reserved thread budget and an active-chunk cap, dispatch
//! within a bucket ordered by chunk id to exploit locality.
//!
//! Dispatch is two-phase: each class first gets first refusal on its own
//! `reserved_threads` budget in priority order, so a class with pending
//! work is never blocked behind a higher class that hasn't exhausted its
//! own reservation. Only once every class's guaranteed slot has been tried
//! and failed does a second pass allow any class to borrow reserved
//! capacity that another class isn't currently using, again in priority
//! order. This is what keeps a sustained high-priority backlog from
//! starving the lower classes out entirely.
//!
//! No surviving source file in the retrieval pack covers this lane's
//! internals (the original `wsched` scan scheduler was not part of the
//! retrieved set); this is built directly from the prose contract in
//! §4.5/§5 of the specification.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chunkworker_domain::value_objects::Priority;
use parking_lot::{Condvar, Mutex};

use crate::infrastructure::runtime::command_queue::{Command, CommandQueue};

#[derive(Debug, Clone, Copy)]
pub struct ScanLaneConfig {
    pub reserved_threads: [usize; 4],
    pub active_chunk_cap: [usize; 4],
    pub timeout: [Duration; 4],
    pub max_booted_per_query: usize,
    pub max_booted_total: usize,
}

impl ScanLaneConfig {
    fn index(class: Priority) -> usize {
        match class {
            Priority::Fast => 0,
            Priority::Medium => 1,
            Priority::Slow => 2,
            Priority::Snail => 3,
        }
    }

    pub fn reserved_threads_for(&self, class: Priority) -> usize {
        self.reserved_threads[Self::index(class)]
    }

    pub fn active_chunk_cap_for(&self, class: Priority) -> usize {
        self.active_chunk_cap[Self::index(class)]
    }

    pub fn timeout_for(&self, class: Priority) -> Duration {
        self.timeout[Self::index(class)]
    }
}

#[derive(Default)]
struct Bucket {
    pending: std::collections::BTreeMap<u32, VecDeque<Arc<dyn Command>>>,
    active_chunks: HashMap<u32, usize>,
    in_flight: usize,
}

impl Bucket {
    fn has_pending(&self) -> bool {
        self.pending.values().any(|q| !q.is_empty())
    }
}

struct InFlightInfo {
    started: Instant,
    priority: Priority,
    query_id: u64,
}

pub struct ScanLane {
    config: ScanLaneConfig,
    buckets: Mutex<[Bucket; 4]>,
    cv: Condvar,
    in_flight: Mutex<HashMap<usize, InFlightInfo>>,
    booted_total: AtomicUsize,
    booted_per_query: Mutex<HashMap<u64, usize>>,
}

impl ScanLane {
    pub fn new(config: ScanLaneConfig) -> Self {
        Self {
            config,
            buckets: Mutex::new(Default::default()),
            cv: Condvar::new(),
            in_flight: Mutex::new(HashMap::new()),
            booted_total: AtomicUsize::new(0),
            booted_per_query: Mutex::new(HashMap::new()),
        }
    }

    fn key(cmd: &Arc<dyn Command>) -> usize {
        Arc::as_ptr(cmd) as *const () as usize
    }

    /// Query ids aren't part of the `Command` contract (only chunk id,
    /// scan tables and priority are); callers that need timeout
    /// accounting keyed by query should track it themselves and call
    /// `register_query` right after a successful `dequeue`.
    pub fn register_query(&self, cmd: &Arc<dyn Command>, query_id: u64) {
        if let Some(info) = self.in_flight.lock().get_mut(&Self::key(cmd)) {
            info.query_id = query_id;
        }
    }

    /// Returns the task keys (opaque pointers matching [`Self::key`]) that
    /// have exceeded their priority class's wall-clock timeout and were
    /// admitted under the booted-count caps. Admission increments the
    /// caps' counters; callers are responsible for actually evicting the
    /// worker thread (via `runtime::leave_pool`), not cancelling the task
    /// (§5: the task itself is not auto-cancelled on timeout).
    pub fn sweep_timeouts(&self, now: Instant) -> Vec<usize> {
        let in_flight = self.in_flight.lock();
        let mut booted = Vec::new();
        for (key, info) in in_flight.iter() {
            if now.duration_since(info.started) < self.config.timeout_for(info.priority) {
                continue;
            }
            if self.booted_total.load(Ordering::SeqCst) >= self.config.max_booted_total {
                continue;
            }
            let mut per_query = self.booted_per_query.lock();
            let count = per_query.entry(info.query_id).or_insert(0);
            if *count >= self.config.max_booted_per_query {
                continue;
            }
            *count += 1;
            self.booted_total.fetch_add(1, Ordering::SeqCst);
            booted.push(*key);
        }
        booted
    }
}

impl CommandQueue for ScanLane {
    fn enqueue(&self, cmd: Arc<dyn Command>) {
        let priority = cmd.priority_class().unwrap_or(Priority::Medium);
        let chunk_value = cmd.chunk_id().map(|c| c.value()).unwrap_or(0);
        let mut buckets = self.buckets.lock();
        let bucket = &mut buckets[ScanLaneConfig::index(priority)];
        bucket.pending.entry(chunk_value).or_default().push_back(cmd);
        self.cv.notify_one();
    }

    fn enqueue_batch(&self, cmds: Vec<Arc<dyn Command>>) {
        let mut buckets = self.buckets.lock();
        for cmd in cmds {
            let priority = cmd.priority_class().unwrap_or(Priority::Medium);
            let chunk_value = cmd.chunk_id().map(|c| c.value()).unwrap_or(0);
            let bucket = &mut buckets[ScanLaneConfig::index(priority)];
            bucket.pending.entry(chunk_value).or_default().push_back(cmd);
        }
        self.cv.notify_all();
    }

    /// Pops the first chunk-eligible command from `bucket` (ascending by
    /// chunk id, subject to the active-chunk cap), without touching the
    /// reserved-thread budget; callers decide whether `bucket` is allowed
    /// to draw right now.
    fn pop_from_bucket(bucket: &mut Bucket, cap: usize) -> Option<Arc<dyn Command>> {
        let (&chunk_value, _) = bucket
            .pending
            .iter()
            .find(|(chunk, q)| !q.is_empty() && (bucket.active_chunks.contains_key(chunk) || bucket.active_chunks.len() < cap))?;
        let queue = bucket.pending.get_mut(&chunk_value).unwrap();
        let cmd = queue.pop_front().unwrap();
        if queue.is_empty() {
            bucket.pending.remove(&chunk_value);
        }
        *bucket.active_chunks.entry(chunk_value).or_insert(0) += 1;
        bucket.in_flight += 1;
        Some(cmd)
    }

    fn has_eligible(bucket: &Bucket, cap: usize) -> bool {
        bucket
            .pending
            .iter()
            .any(|(chunk, q)| !q.is_empty() && (bucket.active_chunks.contains_key(chunk) || bucket.active_chunks.len() < cap))
    }

    /// Idle reserved capacity: the sum, across classes, of reserved
    /// threads a class isn't currently using. Non-zero means some class's
    /// guarantee is going unused and others may borrow from it.
    fn idle_reserved(&self, buckets: &[Bucket; 4]) -> usize {
        Priority::ALL
            .iter()
            .map(|&class| {
                let idx = ScanLaneConfig::index(class);
                self.config.reserved_threads_for(class).saturating_sub(buckets[idx].in_flight)
            })
            .sum()
    }

    /// Two-phase pick: first give each class a shot at its own reserved
    /// budget (so a bucket with backlog never waits behind a higher class
    /// that hasn't exhausted its own reservation), then, only if some
    /// class's reservation is sitting idle, let any class with pending
    /// work borrow it. A class with `reserved_threads == 0` never gets a
    /// phase-1 slot and only ever runs on borrowed capacity.
    fn pick(&self, buckets: &mut [Bucket; 4]) -> Option<(Priority, Arc<dyn Command>)> {
        for &class in &Priority::ALL {
            let idx = ScanLaneConfig::index(class);
            if buckets[idx].in_flight >= self.config.reserved_threads_for(class) {
                continue;
            }
            let cap = self.config.active_chunk_cap_for(class);
            if let Some(cmd) = Self::pop_from_bucket(&mut buckets[idx], cap) {
                return Some((class, cmd));
            }
        }
        if self.idle_reserved(buckets) == 0 {
            return None;
        }
        for &class in &Priority::ALL {
            let idx = ScanLaneConfig::index(class);
            let cap = self.config.active_chunk_cap_for(class);
            if let Some(cmd) = Self::pop_from_bucket(&mut buckets[idx], cap) {
                return Some((class, cmd));
            }
        }
        None
    }

    fn dequeue(&self, wait: bool) -> Option<Arc<dyn Command>> {
        loop {
            let mut buckets = self.buckets.lock();
            if let Some((class, cmd)) = self.pick(&mut buckets) {
                drop(buckets);
                self.in_flight
                    .lock()
                    .insert(Self::key(&cmd), InFlightInfo { started: Instant::now(), priority: class, query_id: 0 });
                return Some(cmd);
            }
            if !wait {
                return None;
            }
            self.cv.wait(&mut buckets);
        }
    }

    fn notify_all(&self) {
        self.cv.notify_all();
    }

    fn notify_one(&self) {
        self.cv.notify_one();
    }

    fn ready(&self) -> bool {
        let buckets = self.buckets.lock();
        let guaranteed = Priority::ALL.iter().any(|&class| {
            let idx = ScanLaneConfig::index(class);
            buckets[idx].in_flight < self.config.reserved_threads_for(class)
                && Self::has_eligible(&buckets[idx], self.config.active_chunk_cap_for(class))
        });
        if guaranteed {
            return true;
        }
        if self.idle_reserved(&buckets) == 0 {
            return false;
        }
        Priority::ALL
            .iter()
            .any(|&class| Self::has_eligible(&buckets[ScanLaneConfig::index(class)], self.config.active_chunk_cap_for(class)))
    }

    fn on_finish(&self, cmd: &Arc<dyn Command>) {
        let key = Self::key(cmd);
        self.in_flight.lock().remove(&key);
        let priority = cmd.priority_class().unwrap_or(Priority::Medium);
        let chunk_value = cmd.chunk_id().map(|c| c.value()).unwrap_or(0);
        let mut buckets = self.buckets.lock();
        let bucket = &mut buckets[ScanLaneConfig::index(priority)];
        bucket.in_flight = bucket.in_flight.saturating_sub(1);
        if let Some(count) = bucket.active_chunks.get_mut(&chunk_value) {
            *count -= 1;
            if *count == 0 {
                bucket.active_chunks.remove(&chunk_value);
            }
        }
        self.cv.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chunkworker_domain::value_objects::{ChunkId, RangeValidator};

    fn config() -> ScanLaneConfig {
        ScanLaneConfig {
            reserved_threads: [2, 2, 1, 1],
            active_chunk_cap: [2, 2, 1, 1],
            timeout: [
                Duration::from_secs(60),
                Duration::from_secs(120),
                Duration::from_secs(300),
                Duration::from_secs(600),
            ],
            max_booted_per_query: 2,
            max_booted_total: 5,
        }
    }

    struct ScanCmd {
        chunk: ChunkId,
        priority: Priority,
    }
    impl Command for ScanCmd {
        fn run(&self) {}
        fn chunk_id(&self) -> Option<&ChunkId> {
            Some(&self.chunk)
        }
        fn priority_class(&self) -> Option<Priority> {
            Some(self.priority)
        }
    }

    #[test]
    fn dispatch_within_bucket_is_ascending_by_chunk() {
        let lane = ScanLane::new(config());
        let v = RangeValidator::new(0, 100);
        lane.enqueue(Arc::new(ScanCmd { chunk: ChunkId::make(5, v.clone()).unwrap(), priority: Priority::Fast }));
        lane.enqueue(Arc::new(ScanCmd { chunk: ChunkId::make(1, v.clone()).unwrap(), priority: Priority::Fast }));
        let first = lane.dequeue(false).unwrap();
        assert_eq!(first.chunk_id().unwrap().value(), 1);
    }

    #[test]
    fn active_chunk_cap_defers_new_chunks() {
        let mut cfg = config();
        cfg.active_chunk_cap[0] = 1;
        let lane = ScanLane::new(cfg);
        let v = RangeValidator::new(0, 100);
        lane.enqueue(Arc::new(ScanCmd { chunk: ChunkId::make(1, v.clone()).unwrap(), priority: Priority::Fast }));
        lane.enqueue(Arc::new(ScanCmd { chunk: ChunkId::make(2, v.clone()).unwrap(), priority: Priority::Fast }));
        let first = lane.dequeue(false).unwrap();
        assert_eq!(first.chunk_id().unwrap().value(), 1);
        // Chunk 1 is active and the cap is 1, so chunk 2 cannot start yet.
        assert!(lane.dequeue(false).is_none());
        lane.on_finish(&first);
        let second = lane.dequeue(false).unwrap();
        assert_eq!(second.chunk_id().unwrap().value(), 2);
    }

    #[test]
    fn higher_priority_bucket_is_drained_first() {
        let lane = ScanLane::new(config());
        let v = RangeValidator::new(0, 100);
        lane.enqueue(Arc::new(ScanCmd { chunk: ChunkId::make(1, v.clone()).unwrap(), priority: Priority::Snail }));
        lane.enqueue(Arc::new(ScanCmd { chunk: ChunkId::make(1, v.clone()).unwrap(), priority: Priority::Fast }));
        let first = lane.dequeue(false).unwrap();
        assert_eq!(first.priority_class(), Some(Priority::Fast));
    }

    #[test]
    fn low_priority_gets_its_reserved_slot_despite_high_priority_backlog() {
        let mut cfg = config();
        cfg.reserved_threads = [1, 0, 0, 1];
        cfg.active_chunk_cap = [10, 10, 10, 10];
        let lane = ScanLane::new(cfg);
        let v = RangeValidator::new(0, 100);
        for value in [1u32, 2, 3] {
            lane.enqueue(Arc::new(ScanCmd { chunk: ChunkId::make(value, v.clone()).unwrap(), priority: Priority::Fast }));
        }
        lane.enqueue(Arc::new(ScanCmd { chunk: ChunkId::make(1, v.clone()).unwrap(), priority: Priority::Snail }));

        let first = lane.dequeue(false).unwrap();
        assert_eq!(first.priority_class(), Some(Priority::Fast));
        // Fast's single reserved slot is now occupied; two more Fast tasks
        // are still pending, but Snail's own reserved slot is untouched and
        // must be served next rather than waiting behind the Fast backlog.
        let second = lane.dequeue(false).unwrap();
        assert_eq!(second.priority_class(), Some(Priority::Snail));
    }

    #[test]
    fn idle_class_reservation_can_be_borrowed() {
        let mut cfg = config();
        cfg.reserved_threads = [1, 0, 0, 0];
        cfg.active_chunk_cap = [10, 10, 10, 10];
        let lane = ScanLane::new(cfg);
        let v = RangeValidator::new(0, 100);
        // No Fast work at all, so its reserved thread sits idle; Medium has
        // no reservation of its own but should still be able to run on it.
        lane.enqueue(Arc::new(ScanCmd { chunk: ChunkId::make(1, v).unwrap(), priority: Priority::Medium }));
        let first = lane.dequeue(false).unwrap();
        assert_eq!(first.priority_class(), Some(Priority::Medium));
    }

    #[test]
    fn sweep_timeouts_respects_booted_caps() {
        let mut cfg = config();
        cfg.timeout[0] = Duration::from_millis(0);
        cfg.max_booted_total = 1;
        let lane = ScanLane::new(cfg);
        let v = RangeValidator::new(0, 100);
        let a = Arc::new(ScanCmd { chunk: ChunkId::make(1, v.clone()).unwrap(), priority: Priority::Fast });
        let b = Arc::new(ScanCmd { chunk: ChunkId::make(2, v).unwrap(), priority: Priority::Fast });
        lane.enqueue(a.clone() as Arc<dyn Command>);
        lane.enqueue(b.clone() as Arc<dyn Command>);
        let first = lane.dequeue(false).unwrap();
        let second = lane.dequeue(false).unwrap();
        let _ = (first, second);
        let booted = lane.sweep_timeouts(Instant::now() + Duration::from_millis(1));
        assert_eq!(booted.len(), 1);
    }
}
