// /////////////////////////////////////////////////////////////////////////////
// chunkworker
// SPDX-License-Identifier: BSD-3-Clause
// /////////////////////////////////////////////////////////////////////////////

//! Default `SendChannel` (C7): logs result frames and errors rather than
//! pushing them over a transport, since no RPC surface is implemented
//! against this crate's scope (see `RpcSurface`'s own doc comment). A
//! transport-backed implementation can wrap the same trait without this
//! module changing.

use tracing::{debug, warn};

use chunkworker_domain::services::SendChannel;
use chunkworker_domain::WorkerResult;

#[derive(Debug, Default)]
pub struct LoggingSendChannel;

impl SendChannel for LoggingSendChannel {
    fn send_frame(&self, frame: Vec<u8>) -> WorkerResult<()> {
        debug!(bytes = frame.len(), "result frame ready for delivery");
        Ok(())
    }

    fn send_error(&self, error: WorkerResult<()>) {
        if let Err(err) = error {
            warn!(%err, "task error routed to send channel");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_frame_always_succeeds() {
        let channel = LoggingSendChannel;
        assert!(channel.send_frame(vec![1, 2, 3]).is_ok());
    }

    #[test]
    fn send_error_does_not_panic_on_ok() {
        let channel = LoggingSendChannel;
        channel.send_error(Ok(()));
    }
}
