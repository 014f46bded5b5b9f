// /////////////////////////////////////////////////////////////////////////////
// chunkworker
// SPDX-License-Identifier: BSD-3-Clause
// /////////////////////////////////////////////////////////////////////////////

//! `EventThread`: the per-thread command event loop (§4.4, §5). Grounded
//! on the original `util::EventThread::handleCmds` — dequeue, call
//! `on_start`, run the command, call `on_finish` exactly once, repeat
//! until a poison command is dequeued.

use std::sync::Arc;

use super::command_queue::CommandQueue;

/// Drives one `CommandQueue` to completion on the calling thread.
/// `WorkerPool` spawns one OS thread per pool member and has each run an
/// `EventThread` against the pool's shared queue; tests can drive the same
/// loop directly without a pool.
pub struct EventThread {
    queue: Arc<dyn CommandQueue>,
}

impl EventThread {
    pub fn new(queue: Arc<dyn CommandQueue>) -> Self {
        Self { queue }
    }

    /// Runs until a poison command is dequeued, or `should_exit` returns
    /// true right after a (non-poison) command finishes — used by
    /// `WorkerPool` to let an evicted thread finish its current command
    /// and then leave without rejoining the pool.
    pub fn run_until(&self, mut should_exit: impl FnMut() -> bool) {
        loop {
            let cmd = match self.queue.dequeue(true) {
                Some(cmd) => cmd,
                None => continue,
            };
            if cmd.is_poison() {
                break;
            }
            self.queue.on_start(&cmd);
            cmd.run();
            self.queue.on_finish(&cmd);
            if should_exit() {
                break;
            }
        }
    }

    pub fn run(&self) {
        self.run_until(|| false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::runtime::command_queue::{Command, FifoQueue, PoisonPill};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Tick(Arc<AtomicUsize>);
    impl Command for Tick {
        fn run(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn exits_on_poison_pill() {
        let queue: Arc<dyn CommandQueue> = Arc::new(FifoQueue::new());
        let counter = Arc::new(AtomicUsize::new(0));
        queue.enqueue(Arc::new(Tick(counter.clone())));
        queue.enqueue(Arc::new(Tick(counter.clone())));
        queue.enqueue(Arc::new(PoisonPill));

        EventThread::new(queue).run();
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }
}
