// /////////////////////////////////////////////////////////////////////////////
// chunkworker
// SPDX-License-Identifier: BSD-3-Clause
// /////////////////////////////////////////////////////////////////////////////

//! Error kinds produced by the core scheduling, I/O and placement
//! components. Adapter crates wrap their own library errors (sqlx, io,
//! config) in their own `thiserror` enums and convert into these where they
//! cross into domain logic; they never leak the underlying library type.

use thiserror::Error;

/// Why a chunk placement request was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlacementRejection {
    /// The chunk number failed validation against the family's validator.
    InvalidChunk,
    /// More than one existing replica was found for this chunk/database.
    TooManyReplicas,
    /// No worker could be selected (empty worker set, or every candidate
    /// tied at the sentinel "no data yet" load value).
    NoSuitableWorker,
    /// The ingest transaction this batch was submitted under is not in the
    /// `Started` state, or belongs to a different database.
    TransactionNotOpen,
}

impl std::fmt::Display for PlacementRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PlacementRejection::InvalidChunk => "invalid chunk number",
            PlacementRejection::TooManyReplicas => "too many existing replicas",
            PlacementRejection::NoSuitableWorker => "no suitable worker found",
            PlacementRejection::TransactionNotOpen => "ingest transaction is not open",
        };
        f.write_str(s)
    }
}

/// Errors surfaced by the core: `ChunkId` construction/comparison, the
/// block file reader, `Task` lifecycle, chunk placement, and scheduler
/// wiring.
#[derive(Debug, Error, Clone)]
pub enum WorkerError {
    /// A `ChunkId` was constructed with a value its validator rejects, or
    /// two `ChunkId`s bound to different validator instances were compared.
    #[error("chunk number not valid: {0}")]
    ChunkNumberNotValid(String),

    /// A line exceeded the reader's configured `MAX_LINE_SIZE`.
    #[error("line exceeds maximum size of {max_line_size} bytes")]
    LineTooLong { max_line_size: usize },

    /// A read or open failed; fatal to the current `read` call only.
    #[error("io failed: {0}")]
    IoFailed(String),

    /// The cancel flag was observed at a suspension point.
    #[error("cancelled")]
    Cancelled,

    /// Chunk placement was rejected; see `PlacementRejection` for why.
    #[error("placement rejected: {reason}")]
    PlacementRejected { reason: PlacementRejection },

    /// A task was routed to a scheduler lane that was never installed.
    #[error("scheduler misconfigured: no lane installed for {0}")]
    SchedulerMisconfigured(String),
}

impl WorkerError {
    pub fn placement(reason: PlacementRejection) -> Self {
        WorkerError::PlacementRejected { reason }
    }
}

pub type WorkerResult<T> = Result<T, WorkerError>;
