// /////////////////////////////////////////////////////////////////////////////
// chunkworker
// SPDX-License-Identifier: BSD-3-Clause
// /////////////////////////////////////////////////////////////////////////////

pub mod command_queue;
pub mod event_thread;
pub mod memory_manager;
pub mod send_channel;
pub mod worker_pool;

pub use command_queue::{Command, CommandQueue, FifoQueue, PoisonPill};
pub use event_thread::EventThread;
pub use memory_manager::{BoundedMemoryManager, UnboundedMemoryManager};
pub use send_channel::LoggingSendChannel;
pub use worker_pool::{leave_pool, WorkerPool};
