// /////////////////////////////////////////////////////////////////////////////
// chunkworker
// SPDX-License-Identifier: BSD-3-Clause
// /////////////////////////////////////////////////////////////////////////////

//! Replica records: the input/output of the chunk placement controller
//! (C9), and the ingest transaction state its callers are expected to
//! validate before placing chunks.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::value_objects::{ChunkId, WorkerId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplicaStatus {
    Incomplete,
    Complete,
}

/// A chunk's presence in a given database on a given worker. A chunk has 0
/// or 1 replicas per database per worker during unpublished ingest; the
/// same chunk may have replicas on several workers across the databases of
/// one family (colocation).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Replica {
    pub chunk: ChunkId,
    pub worker: WorkerId,
    pub database: String,
    pub status: ReplicaStatus,
    pub verify_time: DateTime<Utc>,
}

impl Replica {
    pub fn complete_now(chunk: ChunkId, worker: WorkerId, database: impl Into<String>) -> Self {
        Self {
            chunk,
            worker,
            database: database.into(),
            status: ReplicaStatus::Complete,
            verify_time: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxState {
    Started,
    Finished,
    Aborted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxInfo {
    pub state: TxState,
    pub database: String,
}
