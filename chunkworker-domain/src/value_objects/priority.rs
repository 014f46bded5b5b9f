// /////////////////////////////////////////////////////////////////////////////
// chunkworker
// SPDX-License-Identifier: BSD-3-Clause
// /////////////////////////////////////////////////////////////////////////////

//! Priority classes for the shared-scan lane's reserved-thread buckets.

use serde::{Deserialize, Serialize};

/// Declared priority class of a scan task. Ordered fast to slowest so that
/// `Priority::Fast < Priority::Snail` reads the way the reservation
/// hierarchy expects (fast gets first claim on reserved threads).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Priority {
    Fast,
    Medium,
    Slow,
    Snail,
}

impl Priority {
    pub const ALL: [Priority; 4] = [Priority::Fast, Priority::Medium, Priority::Slow, Priority::Snail];

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Fast => "fast",
            Priority::Medium => "medium",
            Priority::Slow => "slow",
            Priority::Snail => "snail",
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
