// /////////////////////////////////////////////////////////////////////////////
// chunkworker
// SPDX-License-Identifier: BSD-3-Clause
// /////////////////////////////////////////////////////////////////////////////

//! Concrete [`MemoryManager`] implementations. No source file in the
//! retrieval pack covers the original memory manager's internals, so this
//! is built directly from the port contract (`acquire` blocks until a
//! handle is available; `release` is idempotent-by-construction since a
//! `Task` only ever holds one handle at a time), following this crate's
//! own `WorkerPool` mutex+condvar idiom rather than inventing a new one.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Condvar, Mutex};

use chunkworker_domain::entities::TaskId;
use chunkworker_domain::services::{MemHandle, MemoryManager};
use chunkworker_domain::WorkerResult;

/// Bounds the number of outstanding grants to `capacity`. Blocks callers
/// past that bound until an earlier grant is released.
pub struct BoundedMemoryManager {
    available: Mutex<usize>,
    cv: Condvar,
    next_handle: AtomicU64,
}

impl BoundedMemoryManager {
    pub fn new(capacity: usize) -> Self {
        Self { available: Mutex::new(capacity), cv: Condvar::new(), next_handle: AtomicU64::new(1) }
    }
}

impl MemoryManager for BoundedMemoryManager {
    fn acquire(&self, _task_id: TaskId) -> WorkerResult<MemHandle> {
        let mut available = self.available.lock();
        while *available == 0 {
            self.cv.wait(&mut available);
        }
        *available -= 1;
        Ok(MemHandle(self.next_handle.fetch_add(1, Ordering::SeqCst)))
    }

    fn release(&self, _handle: MemHandle) {
        let mut available = self.available.lock();
        *available += 1;
        self.cv.notify_one();
    }
}

/// Grants every request immediately. Used where no memory budget is
/// configured; mirrors the original's effectively-unbounded behavior when
/// its memory manager was disabled.
pub struct UnboundedMemoryManager;

impl MemoryManager for UnboundedMemoryManager {
    fn acquire(&self, _task_id: TaskId) -> WorkerResult<MemHandle> {
        Ok(MemHandle(0))
    }

    fn release(&self, _handle: MemHandle) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn bounded_manager_blocks_past_capacity_until_release() {
        let mgr = Arc::new(BoundedMemoryManager::new(1));
        let first = mgr.acquire(TaskId::new()).unwrap();

        let mgr2 = mgr.clone();
        let handle = thread::spawn(move || mgr2.acquire(TaskId::new()).unwrap());
        thread::sleep(Duration::from_millis(50));
        assert!(!handle.is_finished());

        mgr.release(first);
        let second = handle.join().unwrap();
        mgr.release(second);
    }

    #[test]
    fn unbounded_manager_never_blocks() {
        let mgr = UnboundedMemoryManager;
        let a = mgr.acquire(TaskId::new()).unwrap();
        let b = mgr.acquire(TaskId::new()).unwrap();
        mgr.release(a);
        mgr.release(b);
    }
}
