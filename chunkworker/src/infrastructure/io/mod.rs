// /////////////////////////////////////////////////////////////////////////////
// chunkworker
// SPDX-License-Identifier: BSD-3-Clause
// /////////////////////////////////////////////////////////////////////////////

pub mod block_file_reader;

pub use block_file_reader::{BlockFileReader, MAX_LINE_SIZE};
