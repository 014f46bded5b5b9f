// /////////////////////////////////////////////////////////////////////////////
// chunkworker
// SPDX-License-Identifier: BSD-3-Clause
// /////////////////////////////////////////////////////////////////////////////

pub mod blend;
pub mod group_lane;
pub mod scan_lane;

pub use blend::BlendScheduler;
pub use group_lane::GroupLane;
pub use scan_lane::{ScanLane, ScanLaneConfig};
