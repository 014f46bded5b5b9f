// /////////////////////////////////////////////////////////////////////////////
// chunkworker
// SPDX-License-Identifier: BSD-3-Clause
// /////////////////////////////////////////////////////////////////////////////

//! Throughput benchmarks for the command queue and worker pool (C2/C3):
//! bare FIFO enqueue/dequeue against the blended group/scan scheduler
//! (C4), and end-to-end pool drain time as thread count varies. Grounded
//! on the teacher's `benches/file_io_benchmark.rs` structure (one
//! `criterion_group` per concern, a small fixture builder per benchmark
//! function), adapted to this crate's synchronous, thread-pool-driven
//! domain rather than the teacher's async file I/O.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};

use chunkworker::infrastructure::runtime::{Command, CommandQueue, FifoQueue, WorkerPool};
use chunkworker::infrastructure::scheduler::{BlendScheduler, GroupLane, ScanLane, ScanLaneConfig};

/// A command that does nothing but count itself, used so these benchmarks
/// measure queueing/dispatch overhead rather than any task's own work.
struct CountingCommand {
    counter: Arc<AtomicUsize>,
}

impl Command for CountingCommand {
    fn run(&self) {
        self.counter.fetch_add(1, Ordering::Relaxed);
    }
}

fn scan_lane_config() -> ScanLaneConfig {
    ScanLaneConfig {
        reserved_threads: [2, 2, 1, 1],
        active_chunk_cap: [4, 4, 4, 4],
        timeout: [Duration::from_secs(3600); 4],
        max_booted_per_query: 5,
        max_booted_total: 25,
    }
}

fn benchmark_fifo_queue(c: &mut Criterion) {
    let mut group = c.benchmark_group("fifo_queue");

    for count in [100usize, 1_000, 10_000] {
        group.bench_with_input(BenchmarkId::new("enqueue_dequeue", count), &count, |b, &count| {
            b.iter(|| {
                let queue = FifoQueue::new();
                let counter = Arc::new(AtomicUsize::new(0));
                for _ in 0..count {
                    queue.enqueue(Arc::new(CountingCommand { counter: counter.clone() }));
                }
                for _ in 0..count {
                    if let Some(cmd) = queue.dequeue(false) {
                        cmd.run();
                    }
                }
                assert_eq!(counter.load(Ordering::Relaxed), count);
            });
        });
    }

    group.finish();
}

fn benchmark_blend_scheduler_routing(c: &mut Criterion) {
    let mut group = c.benchmark_group("blend_scheduler_routing");

    group.bench_function("group_only", |b| {
        b.iter(|| {
            let lanes = BlendScheduler::new(
                Arc::new(GroupLane::new(8)),
                Arc::new(ScanLane::new(scan_lane_config())),
            );
            let counter = Arc::new(AtomicUsize::new(0));
            for _ in 0..1_000 {
                lanes.enqueue(Arc::new(CountingCommand { counter: counter.clone() }));
            }
            for _ in 0..1_000 {
                if let Some(cmd) = lanes.dequeue(false) {
                    cmd.run();
                }
            }
            assert_eq!(counter.load(Ordering::Relaxed), 1_000);
        });
    });

    group.finish();
}

fn benchmark_worker_pool_drain(c: &mut Criterion) {
    let mut group = c.benchmark_group("worker_pool_drain");
    group.sample_size(20);

    for threads in [1usize, 4, 16] {
        group.bench_with_input(BenchmarkId::new("threads", threads), &threads, |b, &threads| {
            b.iter(|| {
                let queue = Arc::new(FifoQueue::new());
                let pool = WorkerPool::new(queue.clone(), threads, threads);
                let counter = Arc::new(AtomicUsize::new(0));
                for _ in 0..500 {
                    queue.enqueue(Arc::new(CountingCommand { counter: counter.clone() }));
                }
                pool.shutdown();
                assert_eq!(counter.load(Ordering::Relaxed), 500);
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    benchmark_fifo_queue,
    benchmark_blend_scheduler_routing,
    benchmark_worker_pool_drain,
);
criterion_main!(benches);
