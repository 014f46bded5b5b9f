// /////////////////////////////////////////////////////////////////////////////
// chunkworker
// SPDX-License-Identifier: BSD-3-Clause
// /////////////////////////////////////////////////////////////////////////////

//! Collaborator ports: the contracts this crate's entities and components
//! depend on without knowing the concrete infrastructure behind them.
//! `Configuration`, `SqlDriver`, `MemoryManager`, `SendChannel` and
//! `TaskScheduler` are plain synchronous traits (their implementations may
//! still do blocking I/O internally, matching the source's OS-thread
//! model); `DatabaseServices` is the one port whose natural implementation
//! (network/sqlite round trips) is asynchronous, so it alone is
//! `async_trait`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::entities::task::TaskId;
use crate::entities::{Replica, TxInfo};
use crate::error::WorkerResult;
use crate::value_objects::{ChunkId, WorkerEndpoint, WorkerId};

/// Read-only configuration surface. An explicit value constructed once at
/// process start and passed by reference/`Arc` into the runtime — never a
/// module-wide singleton (see the redesign note on module-wide
/// singletons).
pub trait Configuration: Send + Sync + std::fmt::Debug {
    /// Enabled workers and their endpoints.
    fn workers(&self) -> &[(WorkerId, WorkerEndpoint)];

    /// Databases belonging to the named partitioning family.
    fn family_databases(&self, family: &str) -> Vec<String>;

    /// The family a database belongs to, if any.
    fn database_family(&self, database: &str) -> Option<String>;

    /// The spherical partitioning geometry `(num_stripes,
    /// num_sub_stripes_per_stripe)` declared for the named family, if any
    /// is configured. `None` means no chunk-numbering scheme constrains
    /// this family, matching the CLI harness's unbounded validator.
    fn family_partitioning(&self, family: &str) -> Option<(u32, u32)>;

    fn pool_size(&self) -> usize;

    fn max_threads(&self) -> usize;

    fn max_group_size(&self) -> usize;

    /// Reserved thread budget and active-chunk cap per scan priority class.
    fn scan_reservation(&self, class: crate::value_objects::Priority) -> ScanReservation;

    fn scan_timeout(&self, class: crate::value_objects::Priority) -> Duration;

    fn max_booted_per_query(&self) -> usize;

    fn max_booted_total(&self) -> usize;
}

#[derive(Debug, Clone, Copy)]
pub struct ScanReservation {
    pub reserved_threads: usize,
    pub active_chunk_cap: usize,
}

/// Replica bookkeeping and ingest transaction lookup used by the chunk
/// placement controller.
#[async_trait]
pub trait DatabaseServices: Send + Sync {
    /// Number of replicas a worker hosts, optionally restricted to one
    /// database; `all_databases = true` counts across every database.
    async fn num_worker_replicas(
        &self,
        worker: &WorkerId,
        database: Option<&str>,
        all_databases: bool,
    ) -> WorkerResult<usize>;

    /// Existing replicas of `chunk` in `database`, across enabled workers.
    async fn find_replicas(
        &self,
        chunk: &ChunkId,
        database: &str,
        enabled_only: bool,
    ) -> WorkerResult<Vec<Replica>>;

    /// Batched form of `find_replicas` for multiple chunks at once.
    async fn find_replicas_batch(
        &self,
        chunks: &[ChunkId],
        database: &str,
        enabled_only: bool,
    ) -> WorkerResult<Vec<Replica>>;

    async fn save_replica(&self, replica: Replica) -> WorkerResult<()>;

    async fn transaction(&self, id: u64) -> WorkerResult<TxInfo>;
}

/// The SQL driver handle installed on a `Task` so `Task::cancel` can
/// interrupt an in-progress query.
pub trait SqlDriver: Send + Sync {
    fn run_query(&self) -> WorkerResult<()>;

    /// Idempotent.
    fn cancel(&self);
}

/// An opaque grant from the memory manager collaborator. Lifetime is tied
/// to the task's RUNNING phase: acquired in `wait_for_resource`, released
/// at `on_finish`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemHandle(pub u64);

pub trait MemoryManager: Send + Sync {
    /// Blocks until a handle is granted or cancellation is observed.
    fn acquire(&self, task_id: TaskId) -> WorkerResult<MemHandle>;

    fn release(&self, handle: MemHandle);
}

/// Pushes result frames or an error back to the caller that submitted a
/// task.
pub trait SendChannel: Send + Sync {
    fn send_frame(&self, frame: Vec<u8>) -> WorkerResult<()>;

    fn send_error(&self, error: WorkerResult<()>);
}

/// Notification seam from a `Task` back to whichever scheduler is holding
/// it, used only for `cancel()` to tell a scan-lane queue to drop the
/// task. Held as a `Weak` reference by `Task` to avoid the ownership cycle
/// the source has between tasks and their scheduler.
pub trait TaskScheduler: Send + Sync {
    fn task_cancelled(&self, task_id: TaskId);
}

/// Marker port for whatever transport eventually accepts tasks from
/// outside the process (the source's HTTP/RPC listener). No transport is
/// implemented against this crate's scope; it exists so a future
/// bootstrap-layer adapter has a named seam to implement rather than
/// reaching into the scheduler internals directly.
pub trait RpcSurface: Send + Sync {}

pub type ConfigurationRef = Arc<dyn Configuration>;
