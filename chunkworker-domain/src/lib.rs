// /////////////////////////////////////////////////////////////////////////////
// chunkworker
// SPDX-License-Identifier: BSD-3-Clause
// /////////////////////////////////////////////////////////////////////////////

//! Pure domain model for the worker-side task execution subsystem and the
//! ingest chunk-placement controller: value objects, entities, and the
//! collaborator ports the runtime crate adapts to concrete infrastructure.
//!
//! Nothing in this crate spawns a thread, opens a socket, or reads a file.
//! The two ports that are inherently asynchronous (`DatabaseServices`,
//! `SqlDriver`) are expressed with `async_trait` so callers can choose their
//! own executor; everything else is synchronous and `Send + Sync` where it
//! needs to cross thread boundaries.

pub mod entities;
pub mod error;
pub mod services;
pub mod value_objects;

pub use error::{PlacementRejection, WorkerError, WorkerResult};
