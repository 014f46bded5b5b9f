// /////////////////////////////////////////////////////////////////////////////
// chunkworker
// SPDX-License-Identifier: BSD-3-Clause
// /////////////////////////////////////////////////////////////////////////////

//! The worker runtime: a resizable thread pool driven by a blended,
//! priority-aware scheduler, a block-aligned parallel line reader for
//! ingest/partitioning pipelines, and the chunk placement controller that
//! feeds new chunks into the worker set.

pub mod application;
pub mod infrastructure;

pub use application::foreman::Foreman;
