// /////////////////////////////////////////////////////////////////////////////
// chunkworker
// SPDX-License-Identifier: BSD-3-Clause
// /////////////////////////////////////////////////////////////////////////////

//! Scan-table metadata carried on a `Task`, used by the blend scheduler to
//! decide group lane vs. shared-scan lane routing (§4.6).

use serde::{Deserialize, Serialize};

use crate::value_objects::Priority;

/// Scan-table declaration for a task. A task with a non-empty `tables` set
/// is routed to the shared-scan lane; an empty set routes to the group
/// lane.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScanInfo {
    /// Fully-qualified table names the task will scan.
    pub tables: Vec<String>,
    /// Declared priority class within the shared-scan lane.
    pub priority: Option<Priority>,
    /// Whether this is an interactive (as opposed to background) scan.
    pub interactive: bool,
}

impl ScanInfo {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn is_scan(&self) -> bool {
        !self.tables.is_empty()
    }
}
