// /////////////////////////////////////////////////////////////////////////////
// chunkworker
// SPDX-License-Identifier: BSD-3-Clause
// /////////////////////////////////////////////////////////////////////////////

//! Adapter-local error type wrapping `sqlx::Error` so the `sqlx` type never
//! crosses into domain code; converts into [`WorkerError::IoFailed`] at the
//! boundary.

use chunkworker_domain::WorkerError;

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] sqlx::Error),

    #[error("row references an unknown replica status '{0}'")]
    UnknownReplicaStatus(String),

    #[error("row references an unknown transaction state '{0}'")]
    UnknownTransactionState(String),

    #[error("stored timestamp '{0}' is not valid RFC3339")]
    InvalidTimestamp(String),
}

impl From<RepositoryError> for WorkerError {
    fn from(e: RepositoryError) -> Self {
        WorkerError::IoFailed(e.to_string())
    }
}
