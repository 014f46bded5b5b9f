// /////////////////////////////////////////////////////////////////////////////
// chunkworker
// SPDX-License-Identifier: BSD-3-Clause
// /////////////////////////////////////////////////////////////////////////////

pub mod chunk_id;
pub mod priority;
pub mod scan_info;
pub mod worker_id;

pub use chunk_id::{ChunkId, ChunkValidator, RangeValidator, SphericalValidator, OVERFLOW_VALUE};
pub use priority::Priority;
pub use scan_info::ScanInfo;
pub use worker_id::{WorkerEndpoint, WorkerId};
