// /////////////////////////////////////////////////////////////////////////////
// chunkworker
// SPDX-License-Identifier: BSD-3-Clause
// /////////////////////////////////////////////////////////////////////////////

//! Chunk placement controller (C9): decides which worker a newly ingested
//! chunk belongs on. Grounded on the original `HttpIngestChunksModule`'s
//! `_addChunk`/`_addChunks` family - a chunk already replicated in its own
//! database keeps its worker; otherwise a worker is picked from the set
//! already hosting the chunk in a sibling database of the same family
//! (colocation), falling back to every known worker; ties are broken by a
//! `worker -> replica count` cache reused across a batch so the decision
//! doesn't drift mid-batch on stale counts.
//!
//! The whole batch runs under one lock, matching the source's
//! `_ingestManagementMtx`: two concurrent callers must never disagree about
//! where the same chunk goes.

use std::collections::HashMap;
use std::sync::Arc;

use chunkworker_domain::entities::Replica;
use chunkworker_domain::error::PlacementRejection;
use chunkworker_domain::services::{ConfigurationRef, DatabaseServices};
use chunkworker_domain::value_objects::{ChunkId, ChunkValidator, SphericalValidator, WorkerEndpoint, WorkerId};
use chunkworker_domain::{WorkerError, WorkerResult};
use tokio::sync::Mutex;

pub struct ChunkPlacementController {
    config: ConfigurationRef,
    db: Arc<dyn DatabaseServices>,
    /// Serializes placement decisions so two concurrent ingests never pick
    /// different workers for the same chunk. Held across `.await` points,
    /// hence `tokio::sync::Mutex` rather than a blocking one.
    serialize: Mutex<()>,
}

impl ChunkPlacementController {
    pub fn new(config: ConfigurationRef, db: Arc<dyn DatabaseServices>) -> Self {
        Self { config, db, serialize: Mutex::new(()) }
    }

    /// Places a single chunk into `database`.
    pub async fn place_chunk(&self, chunk: &ChunkId, database: &str) -> WorkerResult<(WorkerId, WorkerEndpoint)> {
        self.validate_chunk_numbers(std::slice::from_ref(chunk), database)?;
        let _guard = self.serialize.lock().await;
        let mut cache = HashMap::new();
        let worker = self.place_one(chunk, database, &mut cache).await?;
        let endpoint = self.endpoint_for(&worker)?;
        Ok((worker, endpoint))
    }

    /// Places a batch of chunks under one critical section, reusing the
    /// worker replica-count cache across every chunk so later chunks in the
    /// batch see the effect of earlier placements.
    pub async fn place_chunks(&self, chunks: &[ChunkId], database: &str) -> WorkerResult<Vec<(ChunkId, WorkerId, WorkerEndpoint)>> {
        self.validate_chunk_numbers(chunks, database)?;
        let _guard = self.serialize.lock().await;
        let mut cache = HashMap::new();
        let mut placed = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            let worker = self.place_one(chunk, database, &mut cache).await?;
            let endpoint = self.endpoint_for(&worker)?;
            placed.push((chunk.clone(), worker, endpoint));
        }
        Ok(placed)
    }

    /// Places a batch of chunks on behalf of an open ingest transaction,
    /// validating the transaction is `Started` against `database` before
    /// making any placement decision — matching `_addChunk`/`_addChunks`,
    /// which only proceed once the calling ingest transaction is confirmed
    /// open against the target database.
    pub async fn place_chunks_for_transaction(
        &self,
        tx_id: u64,
        chunks: &[ChunkId],
        database: &str,
    ) -> WorkerResult<Vec<(ChunkId, WorkerId, WorkerEndpoint)>> {
        let tx = self.db.transaction(tx_id).await?;
        if tx.state != chunkworker_domain::entities::TxState::Started || tx.database != database {
            return Err(WorkerError::placement(PlacementRejection::TransactionNotOpen));
        }
        self.place_chunks(chunks, database).await
    }

    /// Rejects the whole request if any chunk number fails the family's
    /// spherical validator, matching `_addChunk`/`_addChunks` building a
    /// `ChunkNumberQservValidator` from the family's stripe counts and
    /// refusing the call before taking the placement lock. A database
    /// whose family carries no declared partitioning (or no family at
    /// all) is not constrained here, same as the CLI harness's unbounded
    /// validator.
    fn validate_chunk_numbers(&self, chunks: &[ChunkId], database: &str) -> WorkerResult<()> {
        let Some(family) = self.config.database_family(database) else { return Ok(()) };
        let Some((num_stripes, num_sub_stripes)) = self.config.family_partitioning(&family) else { return Ok(()) };
        let validator = SphericalValidator::new(num_stripes, num_sub_stripes, 0.0);
        for chunk in chunks {
            if !validator.valid(chunk.value()) {
                return Err(WorkerError::placement(PlacementRejection::InvalidChunk));
            }
        }
        Ok(())
    }

    fn endpoint_for(&self, worker: &WorkerId) -> WorkerResult<WorkerEndpoint> {
        self.config
            .workers()
            .iter()
            .find(|(id, _)| id == worker)
            .map(|(_, endpoint)| endpoint.clone())
            .ok_or_else(|| WorkerError::placement(PlacementRejection::NoSuitableWorker))
    }

    async fn place_one(&self, chunk: &ChunkId, database: &str, cache: &mut HashMap<WorkerId, usize>) -> WorkerResult<WorkerId> {
        let existing = self.db.find_replicas(chunk, database, true).await?;
        if existing.len() > 1 {
            return Err(WorkerError::placement(PlacementRejection::TooManyReplicas));
        }
        if let Some(replica) = existing.into_iter().next() {
            return Ok(replica.worker);
        }

        let mut candidates: Vec<WorkerId> = Vec::new();
        if let Some(family) = self.config.database_family(database) {
            for sibling in self.config.family_databases(&family) {
                for replica in self.db.find_replicas(chunk, &sibling, true).await? {
                    if !candidates.contains(&replica.worker) {
                        candidates.push(replica.worker);
                    }
                }
            }
        }
        if candidates.is_empty() {
            candidates = self.config.workers().iter().map(|(id, _)| id.clone()).collect();
        }
        if candidates.is_empty() {
            return Err(WorkerError::placement(PlacementRejection::NoSuitableWorker));
        }
        // Deterministic tie-break: ascending by worker name, then least
        // replicas loaded. The source's `std::set<string>` iteration order
        // happens to be the same ascending-by-name order; picking it
        // explicitly here makes the tie-break reproducible rather than an
        // accident of container choice.
        candidates.sort();

        let mut chosen: Option<WorkerId> = None;
        let mut fewest = usize::MAX;
        for worker in &candidates {
            let count = match cache.get(worker) {
                Some(&n) => n,
                None => {
                    let n = self.db.num_worker_replicas(worker, None, true).await?;
                    cache.insert(worker.clone(), n);
                    n
                }
            };
            if count < fewest {
                fewest = count;
                chosen = Some(worker.clone());
            }
        }
        let worker = chosen.ok_or_else(|| WorkerError::placement(PlacementRejection::NoSuitableWorker))?;

        self.db.save_replica(Replica::complete_now(chunk.clone(), worker.clone(), database)).await?;
        *cache.entry(worker.clone()).or_insert(0) += 1;
        Ok(worker)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chunkworker_domain::entities::TxInfo;
    use chunkworker_domain::value_objects::{RangeValidator, WorkerEndpoint};
    use parking_lot::Mutex as SyncMutex;
    use std::sync::Arc;

    #[derive(Debug, Default)]
    struct FakeConfig {
        workers: Vec<(WorkerId, WorkerEndpoint)>,
        family_dbs: HashMap<String, Vec<String>>,
        db_family: HashMap<String, String>,
        family_partitioning: HashMap<String, (u32, u32)>,
    }

    fn endpoint() -> WorkerEndpoint {
        WorkerEndpoint { loader_host: "h".into(), loader_port: 1, ingest_host: "h".into(), ingest_port: 2 }
    }

    impl chunkworker_domain::services::Configuration for FakeConfig {
        fn workers(&self) -> &[(WorkerId, WorkerEndpoint)] {
            &self.workers
        }
        fn family_databases(&self, family: &str) -> Vec<String> {
            self.family_dbs.get(family).cloned().unwrap_or_default()
        }
        fn database_family(&self, database: &str) -> Option<String> {
            self.db_family.get(database).cloned()
        }
        fn family_partitioning(&self, family: &str) -> Option<(u32, u32)> {
            self.family_partitioning.get(family).copied()
        }
        fn pool_size(&self) -> usize {
            4
        }
        fn max_threads(&self) -> usize {
            8
        }
        fn max_group_size(&self) -> usize {
            10
        }
        fn scan_reservation(&self, _class: chunkworker_domain::value_objects::Priority) -> chunkworker_domain::services::ScanReservation {
            chunkworker_domain::services::ScanReservation { reserved_threads: 1, active_chunk_cap: 1 }
        }
        fn scan_timeout(&self, _class: chunkworker_domain::value_objects::Priority) -> std::time::Duration {
            std::time::Duration::from_secs(60)
        }
        fn max_booted_per_query(&self) -> usize {
            2
        }
        fn max_booted_total(&self) -> usize {
            5
        }
    }

    #[derive(Default)]
    struct FakeDb {
        replicas: SyncMutex<Vec<Replica>>,
        replica_counts: SyncMutex<HashMap<WorkerId, usize>>,
        transactions: SyncMutex<HashMap<u64, TxInfo>>,
    }

    #[async_trait]
    impl DatabaseServices for FakeDb {
        async fn num_worker_replicas(&self, worker: &WorkerId, _database: Option<&str>, _all_databases: bool) -> WorkerResult<usize> {
            Ok(*self.replica_counts.lock().get(worker).unwrap_or(&0))
        }

        async fn find_replicas(&self, chunk: &ChunkId, database: &str, _enabled_only: bool) -> WorkerResult<Vec<Replica>> {
            Ok(self
                .replicas
                .lock()
                .iter()
                .filter(|r| r.database == database && ChunkId::equal(&r.chunk, chunk).unwrap_or(false))
                .cloned()
                .collect())
        }

        async fn find_replicas_batch(&self, chunks: &[ChunkId], database: &str, enabled_only: bool) -> WorkerResult<Vec<Replica>> {
            let mut out = Vec::new();
            for chunk in chunks {
                out.extend(self.find_replicas(chunk, database, enabled_only).await?);
            }
            Ok(out)
        }

        async fn save_replica(&self, replica: Replica) -> WorkerResult<()> {
            *self.replica_counts.lock().entry(replica.worker.clone()).or_insert(0) += 1;
            self.replicas.lock().push(replica);
            Ok(())
        }

        async fn transaction(&self, id: u64) -> WorkerResult<TxInfo> {
            self.transactions
                .lock()
                .get(&id)
                .cloned()
                .ok_or_else(|| WorkerError::IoFailed(format!("unknown transaction {id}")))
        }
    }

    fn chunk(value: u32) -> ChunkId {
        ChunkId::make(value, RangeValidator::new(0, 10_000)).unwrap()
    }

    #[tokio::test]
    async fn picks_least_loaded_worker_when_no_colocation_hint() {
        let config = Arc::new(FakeConfig {
            workers: vec![
                (WorkerId::from("w1"), endpoint()),
                (WorkerId::from("w2"), endpoint()),
            ],
            ..Default::default()
        });
        let db = Arc::new(FakeDb::default());
        db.replica_counts.lock().insert(WorkerId::from("w1"), 5);
        db.replica_counts.lock().insert(WorkerId::from("w2"), 1);

        let controller = ChunkPlacementController::new(config, db);
        let (worker, resolved_endpoint) = controller.place_chunk(&chunk(1), "db1").await.unwrap();
        assert_eq!(worker, WorkerId::from("w2"));
        assert_eq!(resolved_endpoint, endpoint());
    }

    #[tokio::test]
    async fn existing_single_replica_is_reused() {
        let config = Arc::new(FakeConfig { workers: vec![(WorkerId::from("w1"), endpoint())], ..Default::default() });
        let db = Arc::new(FakeDb::default());
        db.replicas.lock().push(Replica::complete_now(chunk(7), WorkerId::from("w1"), "db1"));

        let controller = ChunkPlacementController::new(config, db);
        let (worker, _endpoint) = controller.place_chunk(&chunk(7), "db1").await.unwrap();
        assert_eq!(worker, WorkerId::from("w1"));
    }

    #[tokio::test]
    async fn more_than_one_existing_replica_is_rejected() {
        let config = Arc::new(FakeConfig {
            workers: vec![(WorkerId::from("w1"), endpoint()), (WorkerId::from("w2"), endpoint())],
            ..Default::default()
        });
        let db = Arc::new(FakeDb::default());
        db.replicas.lock().push(Replica::complete_now(chunk(7), WorkerId::from("w1"), "db1"));
        db.replicas.lock().push(Replica::complete_now(chunk(7), WorkerId::from("w2"), "db1"));

        let controller = ChunkPlacementController::new(config, db);
        let err = controller.place_chunk(&chunk(7), "db1").await.unwrap_err();
        assert!(matches!(err, WorkerError::PlacementRejected { reason: PlacementRejection::TooManyReplicas }));
    }

    #[tokio::test]
    async fn colocation_sibling_replica_wins_over_global_least_loaded() {
        let mut family_dbs = HashMap::new();
        family_dbs.insert("fam".to_string(), vec!["db1".to_string(), "db2".to_string()]);
        let mut db_family = HashMap::new();
        db_family.insert("db1".to_string(), "fam".to_string());
        let config = Arc::new(FakeConfig {
            workers: vec![(WorkerId::from("w1"), endpoint()), (WorkerId::from("w2"), endpoint())],
            family_dbs,
            db_family,
            ..Default::default()
        });
        let db = Arc::new(FakeDb::default());
        // w2 is globally least loaded, but w1 already hosts this chunk in
        // db2 (same family) - colocation should win.
        db.replica_counts.lock().insert(WorkerId::from("w1"), 9);
        db.replica_counts.lock().insert(WorkerId::from("w2"), 0);
        db.replicas.lock().push(Replica::complete_now(chunk(3), WorkerId::from("w1"), "db2"));

        let controller = ChunkPlacementController::new(config, db);
        let (worker, _endpoint) = controller.place_chunk(&chunk(3), "db1").await.unwrap();
        assert_eq!(worker, WorkerId::from("w1"));
    }

    #[tokio::test]
    async fn batch_reuses_replica_cache_across_chunks() {
        let config = Arc::new(FakeConfig {
            workers: vec![(WorkerId::from("w1"), endpoint()), (WorkerId::from("w2"), endpoint())],
            ..Default::default()
        });
        let db = Arc::new(FakeDb::default());
        db.replica_counts.lock().insert(WorkerId::from("w1"), 0);
        db.replica_counts.lock().insert(WorkerId::from("w2"), 0);

        let controller = ChunkPlacementController::new(config, db);
        let placed = controller.place_chunks(&[chunk(1), chunk(2)], "db1").await.unwrap();
        // Both start tied at 0 replicas; the cache bump after the first
        // placement must steer the second chunk to the other worker.
        assert_ne!(placed[0].1, placed[1].1);
        assert_eq!(placed[0].2, endpoint());
    }

    #[tokio::test]
    async fn no_workers_configured_is_rejected() {
        let config = Arc::new(FakeConfig::default());
        let db = Arc::new(FakeDb::default());
        let controller = ChunkPlacementController::new(config, db);
        let err = controller.place_chunk(&chunk(1), "db1").await.unwrap_err();
        assert!(matches!(err, WorkerError::PlacementRejected { reason: PlacementRejection::NoSuitableWorker }));
    }

    #[tokio::test]
    async fn placement_under_an_open_transaction_succeeds() {
        let config = Arc::new(FakeConfig { workers: vec![(WorkerId::from("w1"), endpoint())], ..Default::default() });
        let db = Arc::new(FakeDb::default());
        db.transactions.lock().insert(42, TxInfo { state: chunkworker_domain::entities::TxState::Started, database: "db1".to_string() });

        let controller = ChunkPlacementController::new(config, db);
        let placed = controller.place_chunks_for_transaction(42, &[chunk(1)], "db1").await.unwrap();
        assert_eq!(placed[0].1, WorkerId::from("w1"));
    }

    #[tokio::test]
    async fn placement_under_a_finished_transaction_is_rejected() {
        let config = Arc::new(FakeConfig { workers: vec![(WorkerId::from("w1"), endpoint())], ..Default::default() });
        let db = Arc::new(FakeDb::default());
        db.transactions.lock().insert(42, TxInfo { state: chunkworker_domain::entities::TxState::Finished, database: "db1".to_string() });

        let controller = ChunkPlacementController::new(config, db);
        let err = controller.place_chunks_for_transaction(42, &[chunk(1)], "db1").await.unwrap_err();
        assert!(matches!(err, WorkerError::PlacementRejected { reason: PlacementRejection::TransactionNotOpen }));
    }

    #[tokio::test]
    async fn placement_under_a_transaction_for_a_different_database_is_rejected() {
        let config = Arc::new(FakeConfig { workers: vec![(WorkerId::from("w1"), endpoint())], ..Default::default() });
        let db = Arc::new(FakeDb::default());
        db.transactions.lock().insert(42, TxInfo { state: chunkworker_domain::entities::TxState::Started, database: "other_db".to_string() });

        let controller = ChunkPlacementController::new(config, db);
        let err = controller.place_chunks_for_transaction(42, &[chunk(1)], "db1").await.unwrap_err();
        assert!(matches!(err, WorkerError::PlacementRejected { reason: PlacementRejection::TransactionNotOpen }));
    }

    #[tokio::test]
    async fn chunk_outside_the_family_partitioning_is_rejected() {
        let mut db_family = HashMap::new();
        db_family.insert("db1".to_string(), "fam".to_string());
        let mut family_partitioning = HashMap::new();
        // 2 stripes * 3 sub-stripes = 6 valid chunk numbers, 0..=5.
        family_partitioning.insert("fam".to_string(), (2u32, 3u32));
        let config = Arc::new(FakeConfig {
            workers: vec![(WorkerId::from("w1"), endpoint())],
            db_family,
            family_partitioning,
            ..Default::default()
        });
        let db = Arc::new(FakeDb::default());
        let controller = ChunkPlacementController::new(config, db);

        let err = controller.place_chunk(&chunk(6), "db1").await.unwrap_err();
        assert!(matches!(err, WorkerError::PlacementRejected { reason: PlacementRejection::InvalidChunk }));
    }

    #[tokio::test]
    async fn chunk_inside_the_family_partitioning_is_accepted() {
        let mut db_family = HashMap::new();
        db_family.insert("db1".to_string(), "fam".to_string());
        let mut family_partitioning = HashMap::new();
        family_partitioning.insert("fam".to_string(), (2u32, 3u32));
        let config = Arc::new(FakeConfig {
            workers: vec![(WorkerId::from("w1"), endpoint())],
            db_family,
            family_partitioning,
            ..Default::default()
        });
        let db = Arc::new(FakeDb::default());
        let controller = ChunkPlacementController::new(config, db);

        let (worker, _endpoint) = controller.place_chunk(&chunk(5), "db1").await.unwrap();
        assert_eq!(worker, WorkerId::from("w1"));
    }

    #[tokio::test]
    async fn batch_with_one_invalid_chunk_rejects_the_whole_batch() {
        let mut db_family = HashMap::new();
        db_family.insert("db1".to_string(), "fam".to_string());
        let mut family_partitioning = HashMap::new();
        family_partitioning.insert("fam".to_string(), (2u32, 3u32));
        let config = Arc::new(FakeConfig {
            workers: vec![(WorkerId::from("w1"), endpoint())],
            db_family,
            family_partitioning,
            ..Default::default()
        });
        let db = Arc::new(FakeDb::default());
        let controller = ChunkPlacementController::new(config, db.clone());

        let err = controller.place_chunks(&[chunk(1), chunk(99)], "db1").await.unwrap_err();
        assert!(matches!(err, WorkerError::PlacementRejected { reason: PlacementRejection::InvalidChunk }));
        // Nothing from the batch should have been saved.
        assert!(db.replicas.lock().is_empty());
    }
}
