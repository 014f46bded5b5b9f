// /////////////////////////////////////////////////////////////////////////////
// chunkworker
// SPDX-License-Identifier: BSD-3-Clause
// /////////////////////////////////////////////////////////////////////////////

//! Command-line surface: global flags plus the three subcommands this
//! crate exposes (`run`, `place-chunks`, `validate-config`). Grounded on
//! the teacher's top-level `Cli`/`Commands` derive (`#[command(...)]`
//! struct plus a `Subcommand` enum, `-v`/`--config` as global flags).

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "chunkworker")]
#[command(about = "Worker-side task execution and chunk placement for a sharded analytic query engine")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Increase log verbosity; repeat for more (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Path to a TOML configuration file. Falls back to `./chunkworker.toml`
    /// if present, then built-in defaults; see `infrastructure::config`.
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// sqlite connection string backing replica/transaction bookkeeping.
    #[arg(long, global = true, default_value = "sqlite://chunkworker.db")]
    pub database_url: String,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the foreman and accept tasks from a local harness channel
    /// until a shutdown signal arrives.
    Run,

    /// Place a batch of chunks into a database, invoking the same
    /// placement controller the ingest path uses.
    PlaceChunks {
        /// Chunk numbers to place.
        #[arg(long, value_delimiter = ',', required = true)]
        chunks: Vec<u32>,

        /// Target database name.
        #[arg(long)]
        database: String,

        /// Ingest transaction id the chunks are being placed under. When
        /// omitted, placement runs without the transaction-state gate.
        #[arg(long)]
        transaction: Option<u64>,
    },

    /// Load the resolved configuration and print it, for deployment
    /// sanity checks. Exits non-zero if the configuration fails to load.
    ValidateConfig,
}

impl Cli {
    pub fn log_level(&self) -> tracing::Level {
        match self.verbose {
            0 => tracing::Level::WARN,
            1 => tracing::Level::INFO,
            2 => tracing::Level::DEBUG,
            _ => tracing::Level::TRACE,
        }
    }
}
