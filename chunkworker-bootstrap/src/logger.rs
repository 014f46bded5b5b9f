// /////////////////////////////////////////////////////////////////////////////
// chunkworker
// SPDX-License-Identifier: BSD-3-Clause
// /////////////////////////////////////////////////////////////////////////////

//! Bootstrap-phase logging: a minimal trait so the early start-up path
//! (before `infrastructure::logging::init` has installed the process-wide
//! subscriber) can still report progress and failures, and so tests can
//! assert on bootstrap messages without a real subscriber installed.
//! Grounded on the teacher's `BootstrapLogger`/`ConsoleLogger`/`NoOpLogger`.

pub trait BootstrapLogger: Send + Sync {
    fn error(&self, message: &str);
    fn warn(&self, message: &str);
    fn info(&self, message: &str);
}

/// Routes bootstrap messages through `tracing`, targeted so they're easy
/// to filter separately from runtime logs.
pub struct ConsoleLogger;

impl BootstrapLogger for ConsoleLogger {
    fn error(&self, message: &str) {
        tracing::error!(target: "bootstrap", "{message}");
    }

    fn warn(&self, message: &str) {
        tracing::warn!(target: "bootstrap", "{message}");
    }

    fn info(&self, message: &str) {
        tracing::info!(target: "bootstrap", "{message}");
    }
}

/// Discards everything. Used where bootstrap logic is exercised in tests
/// without wanting log output.
pub struct NoOpLogger;

impl BootstrapLogger for NoOpLogger {
    fn error(&self, _message: &str) {}
    fn warn(&self, _message: &str) {}
    fn info(&self, _message: &str) {}
}

#[cfg(test)]
pub struct CapturingLogger {
    messages: std::sync::Mutex<Vec<String>>,
}

#[cfg(test)]
impl CapturingLogger {
    pub fn new() -> Self {
        Self { messages: std::sync::Mutex::new(Vec::new()) }
    }

    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }
}

#[cfg(test)]
impl BootstrapLogger for CapturingLogger {
    fn error(&self, message: &str) {
        self.messages.lock().unwrap().push(format!("ERROR {message}"));
    }
    fn warn(&self, message: &str) {
        self.messages.lock().unwrap().push(format!("WARN {message}"));
    }
    fn info(&self, message: &str) {
        self.messages.lock().unwrap().push(format!("INFO {message}"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_logger_does_not_panic() {
        let logger = NoOpLogger;
        logger.error("x");
        logger.warn("x");
        logger.info("x");
    }

    #[test]
    fn capturing_logger_records_level_and_message() {
        let logger = CapturingLogger::new();
        logger.info("starting");
        logger.warn("missing optional config");
        assert_eq!(logger.messages(), vec!["INFO starting", "WARN missing optional config"]);
    }
}
