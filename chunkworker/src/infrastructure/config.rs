// /////////////////////////////////////////////////////////////////////////////
// chunkworker
// SPDX-License-Identifier: BSD-3-Clause
// /////////////////////////////////////////////////////////////////////////////

//! # Configuration
//!
//! Loads the worker's scheduler, worker-set and database-family settings
//! from a layered source stack and exposes them through the domain's
//! [`Configuration`] port.
//!
//! ## Layering
//!
//! Sources are applied in order, each overriding the keys of the one
//! before it:
//!
//! 1. Built-in defaults ([`RawWorkerConfig::default`])
//! 2. An optional TOML file (`chunkworker.toml` by default, or an explicit
//!    path passed to [`WorkerConfig::load`])
//! 3. Environment variables prefixed `CHUNKWORKER__`, nested keys joined
//!    with a double underscore (`CHUNKWORKER__SCHEDULER__GROUP_SIZE=200`)
//!
//! ## Worth noting
//!
//! [`WorkerConfig`] is an explicit value built once by the bootstrap crate
//! and handed to the runtime as `Arc<dyn Configuration>`; nothing in this
//! module keeps process-wide mutable state the way a singleton would.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use config::{Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use chunkworker_domain::services::{Configuration, ScanReservation};
use chunkworker_domain::value_objects::{Priority, WorkerEndpoint, WorkerId};
use chunkworker_domain::{WorkerError, WorkerResult};

const ENV_PREFIX: &str = "CHUNKWORKER";
const DEFAULT_FILE_STEM: &str = "chunkworker";

#[derive(Debug, Clone, Deserialize)]
struct RawWorker {
    name: String,
    loader_host: String,
    loader_port: u16,
    ingest_host: String,
    ingest_port: u16,
}

/// Per-priority-class scheduler settings, named after the four scan
/// priority classes a chunk query can be admitted under.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
struct RawScheduler {
    thread_pool_size: usize,
    max_pool_threads: usize,
    group_size: usize,

    reserve_fast: usize,
    reserve_med: usize,
    reserve_slow: usize,
    reserve_snail: usize,

    maxactivechunks_fast: usize,
    maxactivechunks_med: usize,
    maxactivechunks_slow: usize,
    maxactivechunks_snail: usize,

    scanmaxminutes_fast: u64,
    scanmaxminutes_med: u64,
    scanmaxminutes_slow: u64,
    scanmaxminutes_snail: u64,

    maxtasksbootedperuserquery: usize,
    maxconcurrentbootedtasks: usize,
}

impl Default for RawScheduler {
    fn default() -> Self {
        Self {
            thread_pool_size: 50,
            max_pool_threads: 100,
            group_size: 1,

            reserve_fast: 2,
            reserve_med: 2,
            reserve_slow: 1,
            reserve_snail: 1,

            maxactivechunks_fast: 2,
            maxactivechunks_med: 2,
            maxactivechunks_slow: 2,
            maxactivechunks_snail: 2,

            scanmaxminutes_fast: 60,
            scanmaxminutes_med: 60 * 5,
            scanmaxminutes_slow: 60 * 12,
            scanmaxminutes_snail: 60 * 24,

            maxtasksbootedperuserquery: 5,
            maxconcurrentbootedtasks: 25,
        }
    }
}

/// Spherical-partitioning geometry declared for one family, used to
/// reject out-of-domain chunk numbers at placement time (see
/// `Configuration::family_partitioning`).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct RawFamilyPartitioning {
    num_stripes: u32,
    num_sub_stripes_per_stripe: u32,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct RawWorkerConfig {
    workers: Vec<RawWorker>,
    scheduler: RawScheduler,
    /// Partitioning family name to the databases that belong to it. A
    /// database's membership is looked up by scanning every family's list,
    /// so a database should appear in at most one entry.
    database_families: HashMap<String, Vec<String>>,
    /// Chunk-numbering geometry per family. A family with no entry here is
    /// unconstrained: any chunk number its databases see is accepted.
    family_partitioning: HashMap<String, RawFamilyPartitioning>,
}

/// TOML-serializable view of a [`WorkerConfig`], used only by
/// [`WorkerConfig::to_toml`]; kept separate from [`RawWorkerConfig`] since
/// the latter is an input shape (`Deserialize`) and this is an output
/// shape borrowed from the already-validated config rather than owning
/// its fields.
#[derive(Serialize)]
struct ConfigSnapshot<'a> {
    workers: Vec<WorkerSnapshot<'a>>,
    scheduler: &'a RawScheduler,
    database_families: &'a HashMap<String, Vec<String>>,
    family_partitioning: &'a HashMap<String, RawFamilyPartitioning>,
}

#[derive(Serialize)]
struct WorkerSnapshot<'a> {
    name: &'a str,
    loader_host: &'a str,
    loader_port: u16,
    ingest_host: &'a str,
    ingest_port: u16,
}

/// Read-only snapshot of worker configuration, built once by
/// [`WorkerConfig::load`] and shared behind an `Arc` for the lifetime of
/// the process.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    workers: Vec<(WorkerId, WorkerEndpoint)>,
    scheduler: RawScheduler,
    family_databases: HashMap<String, Vec<String>>,
    database_family: HashMap<String, String>,
    family_partitioning: HashMap<String, RawFamilyPartitioning>,
}

impl WorkerConfig {
    /// Loads configuration from `path` (required to exist if given), the
    /// default `chunkworker.toml` in the working directory (silently
    /// skipped if absent), and `CHUNKWORKER__*` environment overrides, in
    /// that order of increasing precedence.
    pub fn load(path: Option<&Path>) -> WorkerResult<Self> {
        let mut builder = config::Config::builder();
        builder = match path {
            Some(path) => builder.add_source(File::from(path).required(true)),
            None => builder.add_source(File::with_name(DEFAULT_FILE_STEM).required(false)),
        };
        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        );

        let settings = builder
            .build()
            .map_err(|e| WorkerError::IoFailed(e.to_string()))?;
        let raw: RawWorkerConfig = settings
            .try_deserialize()
            .map_err(|e| WorkerError::IoFailed(e.to_string()))?;

        Self::from_raw(raw)
    }

    /// Parses a single TOML document with no environment overlay; used in
    /// tests and by `validate-config`-style tooling.
    pub fn from_toml_str(toml: &str) -> WorkerResult<Self> {
        let settings = config::Config::builder()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()
            .map_err(|e| WorkerError::IoFailed(e.to_string()))?;
        let raw: RawWorkerConfig = settings
            .try_deserialize()
            .map_err(|e| WorkerError::IoFailed(e.to_string()))?;
        Self::from_raw(raw)
    }

    /// Renders the resolved configuration back to TOML, for `validate-config`
    /// to print something an operator can diff against a config file rather
    /// than `Debug` output of this crate's own internal field layout.
    pub fn to_toml(&self) -> WorkerResult<String> {
        let snapshot = ConfigSnapshot {
            workers: self
                .workers
                .iter()
                .map(|(id, endpoint)| WorkerSnapshot {
                    name: id.as_str(),
                    loader_host: &endpoint.loader_host,
                    loader_port: endpoint.loader_port,
                    ingest_host: &endpoint.ingest_host,
                    ingest_port: endpoint.ingest_port,
                })
                .collect(),
            scheduler: &self.scheduler,
            database_families: &self.family_databases,
            family_partitioning: &self.family_partitioning,
        };
        toml::to_string_pretty(&snapshot).map_err(|e| WorkerError::IoFailed(e.to_string()))
    }

    fn from_raw(raw: RawWorkerConfig) -> WorkerResult<Self> {
        let mut workers = Vec::with_capacity(raw.workers.len());
        let mut seen = std::collections::HashSet::new();
        for w in raw.workers {
            if !seen.insert(w.name.clone()) {
                return Err(WorkerError::IoFailed(format!(
                    "duplicate worker entry '{}' in configuration",
                    w.name
                )));
            }
            let endpoint = WorkerEndpoint {
                loader_host: w.loader_host,
                loader_port: w.loader_port,
                ingest_host: w.ingest_host,
                ingest_port: w.ingest_port,
            };
            workers.push((WorkerId::new(w.name), endpoint));
        }

        let mut database_family = HashMap::new();
        for (family, databases) in &raw.database_families {
            for db in databases {
                if let Some(prior) = database_family.insert(db.clone(), family.clone()) {
                    return Err(WorkerError::IoFailed(format!(
                        "database '{db}' listed under families '{prior}' and '{family}'"
                    )));
                }
            }
        }

        Ok(Self {
            workers,
            scheduler: raw.scheduler,
            family_databases: raw.database_families,
            database_family,
            family_partitioning: raw.family_partitioning,
        })
    }
}

impl Configuration for WorkerConfig {
    fn workers(&self) -> &[(WorkerId, WorkerEndpoint)] {
        &self.workers
    }

    fn family_databases(&self, family: &str) -> Vec<String> {
        self.family_databases.get(family).cloned().unwrap_or_default()
    }

    fn database_family(&self, database: &str) -> Option<String> {
        self.database_family.get(database).cloned()
    }

    fn family_partitioning(&self, family: &str) -> Option<(u32, u32)> {
        self.family_partitioning
            .get(family)
            .map(|p| (p.num_stripes, p.num_sub_stripes_per_stripe))
    }

    fn pool_size(&self) -> usize {
        self.scheduler.thread_pool_size
    }

    fn max_threads(&self) -> usize {
        self.scheduler.max_pool_threads
    }

    fn max_group_size(&self) -> usize {
        self.scheduler.group_size
    }

    fn scan_reservation(&self, class: Priority) -> ScanReservation {
        let (reserved_threads, active_chunk_cap) = match class {
            Priority::Fast => (self.scheduler.reserve_fast, self.scheduler.maxactivechunks_fast),
            Priority::Medium => (self.scheduler.reserve_med, self.scheduler.maxactivechunks_med),
            Priority::Slow => (self.scheduler.reserve_slow, self.scheduler.maxactivechunks_slow),
            Priority::Snail => (self.scheduler.reserve_snail, self.scheduler.maxactivechunks_snail),
        };
        ScanReservation { reserved_threads, active_chunk_cap }
    }

    fn scan_timeout(&self, class: Priority) -> Duration {
        let minutes = match class {
            Priority::Fast => self.scheduler.scanmaxminutes_fast,
            Priority::Medium => self.scheduler.scanmaxminutes_med,
            Priority::Slow => self.scheduler.scanmaxminutes_slow,
            Priority::Snail => self.scheduler.scanmaxminutes_snail,
        };
        Duration::from_secs(minutes * 60)
    }

    fn max_booted_per_query(&self) -> usize {
        self.scheduler.maxtasksbootedperuserquery
    }

    fn max_booted_total(&self) -> usize {
        self.scheduler.maxconcurrentbootedtasks
    }
}
