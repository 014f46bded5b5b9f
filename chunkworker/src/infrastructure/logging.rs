// /////////////////////////////////////////////////////////////////////////////
// chunkworker
// SPDX-License-Identifier: BSD-3-Clause
// /////////////////////////////////////////////////////////////////////////////

//! # Logging
//!
//! Initializes the process-wide `tracing` subscriber: a compact layer for
//! interactive stdout use, or a line-delimited JSON layer when logs are
//! directed to a file, both gated by an `EnvFilter` that defaults to this
//! crate's own target when `RUST_LOG` is unset.

use std::fs::File;
use std::path::Path;

use tracing::Level;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use chunkworker_domain::{WorkerError, WorkerResult};

/// What to initialize logging with. Built by the bootstrap crate from CLI
/// flags and the loaded [`crate::infrastructure::config::WorkerConfig`].
#[derive(Debug, Clone)]
pub struct LoggingOptions {
    pub level: Level,
    pub log_file: Option<std::path::PathBuf>,
}

impl Default for LoggingOptions {
    fn default() -> Self {
        Self { level: Level::INFO, log_file: None }
    }
}

/// Installs the global subscriber. Idempotent only in the sense that a
/// second call is an error — `tracing`'s global dispatcher can only be set
/// once per process, matching `tracing_subscriber::util::SubscriberInitExt::init`.
pub fn init(options: &LoggingOptions) -> WorkerResult<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(format!("chunkworker={}", options.level)))
        .map_err(|e| WorkerError::IoFailed(e.to_string()))?;

    match &options.log_file {
        Some(path) => init_file(path, env_filter),
        None => {
            init_stdout(env_filter);
            Ok(())
        }
    }
}

fn init_stdout(env_filter: EnvFilter) {
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_span_events(FmtSpan::NONE)
        .compact();

    tracing_subscriber::registry().with(env_filter).with(fmt_layer).init();
}

fn init_file(path: &Path, env_filter: EnvFilter) -> WorkerResult<()> {
    let file = File::create(path).map_err(|e| WorkerError::IoFailed(e.to_string()))?;

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(file)
        .with_target(true)
        .with_thread_ids(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(false)
        .json();

    tracing_subscriber::registry().with(env_filter).with(fmt_layer).init();
    Ok(())
}

/// Installs a subscriber suitable for `cargo test` runs: writes to the test
/// harness's captured output and is safe to call from every test in a
/// binary since only the first call takes effect.
#[cfg(test)]
pub fn init_test_logging() {
    use std::sync::Once;
    static INIT: Once = Once::new();

    INIT.call_once(|| {
        let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("chunkworker=debug"));
        let fmt_layer = tracing_subscriber::fmt::layer().with_test_writer().with_target(false).compact();
        tracing_subscriber::registry().with(env_filter).with(fmt_layer).try_init().ok();
    });
}
