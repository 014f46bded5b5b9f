// /////////////////////////////////////////////////////////////////////////////
// chunkworker
// SPDX-License-Identifier: BSD-3-Clause
// /////////////////////////////////////////////////////////////////////////////

pub mod chunk_placement_controller;

pub use chunk_placement_controller::ChunkPlacementController;
