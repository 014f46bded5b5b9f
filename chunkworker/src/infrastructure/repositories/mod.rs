// /////////////////////////////////////////////////////////////////////////////
// chunkworker
// SPDX-License-Identifier: BSD-3-Clause
// /////////////////////////////////////////////////////////////////////////////

pub mod error;
pub mod schema;
pub mod sqlite_database_services;

pub use error::RepositoryError;
pub use sqlite_database_services::SqliteDatabaseServices;
