// /////////////////////////////////////////////////////////////////////////////
// chunkworker
// SPDX-License-Identifier: BSD-3-Clause
// /////////////////////////////////////////////////////////////////////////////

//! SQLite schema helpers for the replica/transaction tables. Applies
//! migrations on start-up so every process (and every integration test)
//! sees a consistent schema regardless of whether the database file is
//! new or has been running for a while.

use sqlx::migrate::MigrateDatabase;
use sqlx::SqlitePool;
use tracing::{debug, info};

/// Runs pending migrations against the provided pool. Idempotent: sqlx
/// tracks which migrations have already applied.
pub async fn ensure_schema(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    debug!("ensuring replica/transaction schema is up to date");
    sqlx::migrate!("./migrations").run(pool).await?;
    info!("replica/transaction schema is up to date");
    Ok(())
}

/// Creates the SQLite database file at `database_url` if it doesn't exist.
/// `SqlitePool::connect` otherwise fails against a missing file.
pub async fn create_database_if_missing(database_url: &str) -> Result<(), sqlx::Error> {
    if !sqlx::Sqlite::database_exists(database_url).await? {
        debug!(database_url, "creating sqlite database");
        sqlx::Sqlite::create_database(database_url).await?;
    }
    Ok(())
}

/// Creates the database file if missing, connects, and runs migrations —
/// the single call bootstrap code needs at start-up.
pub async fn initialize_database(database_url: &str) -> Result<SqlitePool, sqlx::Error> {
    create_database_if_missing(database_url).await?;
    let pool = SqlitePool::connect(database_url).await?;
    ensure_schema(&pool).await?;
    Ok(pool)
}
