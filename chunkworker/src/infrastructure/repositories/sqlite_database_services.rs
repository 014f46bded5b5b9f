// /////////////////////////////////////////////////////////////////////////////
// chunkworker
// SPDX-License-Identifier: BSD-3-Clause
// /////////////////////////////////////////////////////////////////////////////

//! SQLite-backed [`DatabaseServices`]: replica bookkeeping and ingest
//! transaction lookup for the chunk placement controller (C9), persisted
//! through the `replicas`/`ingest_transactions` tables this crate's own
//! migration owns (see [`super::schema`]).
//!
//! Grounded on the teacher's `SqliteRepository` (connection-pool-plus-
//! parameterized-query style) and its own `find_by_id`/`save` shape,
//! adapted to the domain's `Replica`/`TxInfo` value types instead of a
//! generic JSON-blob entity.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

use chunkworker_domain::entities::{Replica, ReplicaStatus, TxInfo, TxState};
use chunkworker_domain::services::DatabaseServices;
use chunkworker_domain::value_objects::{ChunkId, WorkerId};
use chunkworker_domain::WorkerResult;

use super::error::RepositoryError;

pub struct SqliteDatabaseServices {
    pool: SqlitePool,
}

impl SqliteDatabaseServices {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn find_replicas_raw(&self, chunk_value: u32, database: &str) -> Result<Vec<RawReplica>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT worker_id, status, verify_time FROM replicas WHERE chunk_value = ? AND database = ? AND status = 'Complete'",
        )
        .bind(chunk_value as i64)
        .bind(database)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let worker_id: String = row.get("worker_id");
                let status: String = row.get("status");
                let verify_time: String = row.get("verify_time");
                Ok(RawReplica { worker_id, status, verify_time })
            })
            .collect()
    }
}

struct RawReplica {
    worker_id: String,
    status: String,
    verify_time: String,
}

fn parse_status(s: &str) -> Result<ReplicaStatus, RepositoryError> {
    match s {
        "Complete" => Ok(ReplicaStatus::Complete),
        "Incomplete" => Ok(ReplicaStatus::Incomplete),
        other => Err(RepositoryError::UnknownReplicaStatus(other.to_string())),
    }
}

fn status_str(status: ReplicaStatus) -> &'static str {
    match status {
        ReplicaStatus::Complete => "Complete",
        ReplicaStatus::Incomplete => "Incomplete",
    }
}

fn parse_verify_time(s: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| RepositoryError::InvalidTimestamp(s.to_string()))
}

#[async_trait]
impl DatabaseServices for SqliteDatabaseServices {
    async fn num_worker_replicas(&self, worker: &WorkerId, database: Option<&str>, all_databases: bool) -> WorkerResult<usize> {
        let count: i64 = if all_databases {
            sqlx::query_scalar("SELECT COUNT(*) FROM replicas WHERE worker_id = ? AND status = 'Complete'")
                .bind(worker.as_str())
                .fetch_one(&self.pool)
                .await
                .map_err(RepositoryError::from)?
        } else {
            let database = database.unwrap_or_default();
            sqlx::query_scalar("SELECT COUNT(*) FROM replicas WHERE worker_id = ? AND database = ? AND status = 'Complete'")
                .bind(worker.as_str())
                .bind(database)
                .fetch_one(&self.pool)
                .await
                .map_err(RepositoryError::from)?
        };
        Ok(count as usize)
    }

    async fn find_replicas(&self, chunk: &ChunkId, database: &str, _enabled_only: bool) -> WorkerResult<Vec<Replica>> {
        let raw = self.find_replicas_raw(chunk.value(), database).await?;
        raw.into_iter()
            .map(|r| -> WorkerResult<Replica> {
                Ok(Replica {
                    chunk: chunk.clone(),
                    worker: WorkerId::new(r.worker_id),
                    database: database.to_string(),
                    status: parse_status(&r.status)?,
                    verify_time: parse_verify_time(&r.verify_time)?,
                })
            })
            .collect()
    }

    async fn find_replicas_batch(&self, chunks: &[ChunkId], database: &str, enabled_only: bool) -> WorkerResult<Vec<Replica>> {
        let mut out = Vec::new();
        for chunk in chunks {
            out.extend(self.find_replicas(chunk, database, enabled_only).await?);
        }
        Ok(out)
    }

    async fn save_replica(&self, replica: Replica) -> WorkerResult<()> {
        sqlx::query(
            "INSERT INTO replicas (chunk_value, worker_id, database, status, verify_time) VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(chunk_value, worker_id, database) DO UPDATE SET status = excluded.status, verify_time = excluded.verify_time",
        )
        .bind(replica.chunk.value() as i64)
        .bind(replica.worker.as_str())
        .bind(&replica.database)
        .bind(status_str(replica.status))
        .bind(replica.verify_time.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(RepositoryError::from)?;
        Ok(())
    }

    async fn transaction(&self, id: u64) -> WorkerResult<TxInfo> {
        let row = sqlx::query("SELECT state, database FROM ingest_transactions WHERE id = ?")
            .bind(id as i64)
            .fetch_optional(&self.pool)
            .await
            .map_err(RepositoryError::from)?;

        let row = row.ok_or_else(|| RepositoryError::UnknownReplicaStatus(format!("no transaction {id}")))?;
        let state: String = row.get("state");
        let database: String = row.get("database");
        let state = match state.as_str() {
            "Started" => TxState::Started,
            "Finished" => TxState::Finished,
            "Aborted" => TxState::Aborted,
            other => return Err(RepositoryError::UnknownTransactionState(other.to_string()).into()),
        };
        Ok(TxInfo { state, database })
    }
}
