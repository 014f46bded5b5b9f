// /////////////////////////////////////////////////////////////////////////////
// chunkworker
// SPDX-License-Identifier: BSD-3-Clause
// /////////////////////////////////////////////////////////////////////////////

//! Process entry point: parses the CLI, loads configuration, installs
//! logging, and dispatches to one of the three subcommands. Typed errors
//! propagate with `?` throughout; `main` itself collapses everything into
//! `anyhow::Error` for process-level reporting, matching the teacher's
//! own split between internal `thiserror` types and an `anyhow` edge.

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;

use chunkworker::infrastructure::config::WorkerConfig;
use chunkworker::infrastructure::logging::{self, LoggingOptions};
use chunkworker::infrastructure::placement::ChunkPlacementController;
use chunkworker::infrastructure::repositories::schema::initialize_database;
use chunkworker::infrastructure::repositories::SqliteDatabaseServices;
use chunkworker::infrastructure::runtime::BoundedMemoryManager;
use chunkworker::Foreman;
use chunkworker_domain::services::{Configuration, SqlDriver};
use chunkworker_domain::value_objects::RangeValidator;
use chunkworker_domain::WorkerResult;

use chunkworker_bootstrap::logger::{BootstrapLogger, ConsoleLogger};
use chunkworker_bootstrap::{Cli, Command, ShutdownCoordinator};

/// Stand-in `SqlDriver` for the `run` subcommand's local harness: this
/// crate's scope stops at accepting and scheduling tasks, not executing
/// SQL against a query engine (see the domain's own note on `SqlDriver`
/// being installed by whatever owns the real query execution path).
struct NoopDriver;

impl SqlDriver for NoopDriver {
    fn run_query(&self) -> WorkerResult<()> {
        Ok(())
    }

    fn cancel(&self) {}
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let logger = ConsoleLogger;

    logging::init(&LoggingOptions { level: cli.log_level(), log_file: None })
        .context("failed to initialize logging")?;

    let config = WorkerConfig::load(cli.config.as_deref()).context("failed to load configuration")?;
    logger.info(&format!("loaded configuration: {} worker(s) configured", config.workers().len()));

    match cli.command {
        Command::Run => run(config, &logger).await,
        Command::PlaceChunks { chunks, database, transaction } => {
            place_chunks(&cli.database_url, config, chunks, database, transaction).await
        }
        Command::ValidateConfig => {
            let rendered = config.to_toml().context("failed to render configuration")?;
            println!("{rendered}");
            Ok(())
        }
    }
}

async fn run(config: WorkerConfig, logger: &dyn BootstrapLogger) -> anyhow::Result<()> {
    let config: Arc<dyn Configuration> = Arc::new(config);
    let mem = Arc::new(BoundedMemoryManager::new(config.max_threads().max(1)));
    let foreman = Foreman::new(config, mem);

    let coordinator = ShutdownCoordinator::default();
    let signal_coordinator = coordinator.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            signal_coordinator.initiate_shutdown();
        }
    });

    logger.info(&format!("foreman started with {} worker thread(s); waiting for shutdown signal", foreman.pool_size()));
    coordinator.token().cancelled().await;

    logger.info("shutdown signal received; draining in-flight tasks");
    let drained = tokio::task::spawn_blocking(move || {
        foreman.shutdown();
    });
    let grace_ok = tokio::select! {
        res = drained => {
            res.context("foreman shutdown task panicked")?;
            true
        }
        ok = coordinator.wait_for_shutdown() => ok,
    };
    coordinator.complete_shutdown();

    if !grace_ok {
        logger.warn("foreman did not drain within the shutdown grace period");
    } else {
        logger.info("foreman shut down cleanly");
    }
    Ok(())
}

async fn place_chunks(
    database_url: &str,
    config: WorkerConfig,
    chunks: Vec<u32>,
    database: String,
    transaction: Option<u64>,
) -> anyhow::Result<()> {
    let pool = initialize_database(database_url).await.context("failed to initialize sqlite database")?;
    let db = Arc::new(SqliteDatabaseServices::new(pool));
    let config: Arc<dyn Configuration> = Arc::new(config);
    let controller = ChunkPlacementController::new(config, db);

    // No chunk-numbering scheme is configured for the CLI path, so chunks
    // are accepted under an unbounded validator; the placement controller
    // itself does not constrain chunk values any further.
    let validator = RangeValidator::unbounded();
    let chunk_ids = chunks
        .into_iter()
        .map(|value| chunkworker_domain::value_objects::ChunkId::make(value, validator.clone()))
        .collect::<WorkerResult<Vec<_>>>()
        .context("invalid chunk number")?;

    let placed = match transaction {
        Some(tx_id) => controller.place_chunks_for_transaction(tx_id, &chunk_ids, &database).await,
        None => controller.place_chunks(&chunk_ids, &database).await,
    }
    .context("chunk placement failed")?;

    for (chunk, worker, endpoint) in placed {
        println!(
            "{} -> {} ({}:{})",
            chunk.value(),
            worker,
            endpoint.loader_host,
            endpoint.loader_port
        );
    }
    Ok(())
}
