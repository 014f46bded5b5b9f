// /////////////////////////////////////////////////////////////////////////////
// chunkworker
// SPDX-License-Identifier: BSD-3-Clause
// /////////////////////////////////////////////////////////////////////////////

//! Shutdown coordination: a cancellation token plus a grace-period
//! coordinator, signalled from `tokio::signal::ctrl_c` (see `main.rs`)
//! and propagated into `Foreman::shutdown`. Ported from the teacher's
//! `ShutdownCoordinator`/`CancellationToken`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;

pub const DEFAULT_GRACE_PERIOD_SECS: u64 = 10;

/// Lightweight clone-able cancellation signal for async tasks.
#[derive(Clone)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl CancellationToken {
    fn new() -> Self {
        Self { cancelled: Arc::new(AtomicBool::new(false)), notify: Arc::new(Notify::new()) }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }
        self.notify.notified().await;
    }
}

/// Coordinates a graceful shutdown with a grace period: `Foreman::shutdown`
/// runs on a blocking thread while the coordinator's timeout races it.
#[derive(Clone)]
pub struct ShutdownCoordinator {
    token: CancellationToken,
    grace_period: Duration,
    shutdown_initiated: Arc<AtomicBool>,
    shutdown_complete: Arc<Notify>,
}

impl ShutdownCoordinator {
    pub fn new(grace_period: Duration) -> Self {
        Self {
            token: CancellationToken::new(),
            grace_period,
            shutdown_initiated: Arc::new(AtomicBool::new(false)),
            shutdown_complete: Arc::new(Notify::new()),
        }
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown_initiated.load(Ordering::SeqCst)
    }

    pub fn initiate_shutdown(&self) {
        if self.shutdown_initiated.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst).is_ok() {
            tracing::info!(grace_period = ?self.grace_period, "initiating graceful shutdown");
            self.token.cancel();
        }
    }

    /// Waits for `complete_shutdown` or the grace period, whichever comes
    /// first. Returns whether shutdown completed gracefully.
    pub async fn wait_for_shutdown(&self) -> bool {
        if !self.is_shutting_down() {
            return true;
        }
        tokio::select! {
            _ = self.shutdown_complete.notified() => true,
            _ = tokio::time::sleep(self.grace_period) => {
                tracing::warn!("shutdown grace period expired");
                false
            }
        }
    }

    pub fn complete_shutdown(&self) {
        self.shutdown_complete.notify_waiters();
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new(Duration::from_secs(DEFAULT_GRACE_PERIOD_SECS))
    }
}
