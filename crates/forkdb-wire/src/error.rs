// SPDX-FileCopyrightText: 2026 Forkdb Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Errors raised while moving bytes between a parent and a worker.

use std::time::Duration;

use forkdb_core::{ForkDbError, WorkerId};
use thiserror::Error;

/// A transport-level failure. Any of these leaves the channel out of sync.
#[derive(Debug, Error)]
pub enum WireError {
    /// Reading or writing a pipe failed.
    #[error("pipe i/o failed: {0}")]
    Io(#[from] std::io::Error),

    /// The peer closed its end of the pipe.
    #[error("peer closed the channel")]
    Closed,

    /// No reply arrived within the request timeout.
    #[error("no reply within {0:?}")]
    Timeout(Duration),

    /// The peer sent bytes that do not follow the protocol.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// Creating a shared mapping failed.
    #[error("shared memory mapping failed: {0}")]
    Map(std::io::Error),
}

impl WireError {
    pub fn protocol(message: impl Into<String>) -> Self {
        WireError::Protocol(message.into())
    }

    /// Attributes the failure to a worker's channel.
    pub fn into_fork_error(self, worker: WorkerId) -> ForkDbError {
        match self {
            WireError::Timeout(duration) => ForkDbError::Timeout { worker, duration },
            WireError::Io(err) | WireError::Map(err) => ForkDbError::channel(worker, err),
            other => ForkDbError::Channel {
                worker,
                message: other.to_string(),
                source: None,
            },
        }
    }
}
