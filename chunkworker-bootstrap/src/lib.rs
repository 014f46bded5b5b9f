// /////////////////////////////////////////////////////////////////////////////
// chunkworker
// SPDX-License-Identifier: BSD-3-Clause
// /////////////////////////////////////////////////////////////////////////////

//! Entry-point layer: CLI parsing, bootstrap-phase logging, and graceful
//! shutdown coordination. Sits outside the domain/application/
//! infrastructure split and is the only crate allowed to depend on all of
//! them at once; it wires the configuration and runtime together and maps
//! top-level failures onto `anyhow::Error` for process reporting.

pub mod cli;
pub mod logger;
pub mod shutdown;

pub use cli::{Cli, Command};
pub use shutdown::{CancellationToken, ShutdownCoordinator};
