// SPDX-FileCopyrightText: 2026 Forkdb Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Wire protocol between a forkdb parent and its worker processes.
//!
//! A channel is two pipes plus a shared buffer. Small fixed-size values
//! (opcodes, indices, status codes) travel over the pipes; variable-size
//! payloads (paths, statements, parameters, rows) go through the shared
//! buffer, split into chunks when they exceed its capacity.

pub mod channel;
pub mod chunk;
pub mod codec;
pub mod endpoint;
pub mod error;
pub mod pipe;
pub mod protocol;
pub mod shm;

use std::sync::OnceLock;

pub use channel::Channel;
pub use endpoint::Endpoint;
pub use error::WireError;
pub use pipe::{PipeReader, PipeWriter, pipe};
pub use protocol::Opcode;
pub use shm::{ErrorBuffer, SharedBuffer};

/// Ignores `SIGPIPE` process-wide so a dead peer surfaces as a write error.
pub fn ignore_sigpipe() {
    static IGNORE: OnceLock<()> = OnceLock::new();
    // SAFETY: installing SIG_IGN has no preconditions.
    IGNORE.get_or_init(|| unsafe {
        libc::signal(libc::SIGPIPE, libc::SIG_IGN);
    });
}

/// The pipes and mappings of one channel, before they are split between a
/// parent [`Channel`] and a worker [`Endpoint`].
#[derive(Debug)]
pub struct ChannelParts {
    pub to_worker: (PipeReader, PipeWriter),
    pub from_worker: (PipeReader, PipeWriter),
    pub shm: SharedBuffer,
    pub errors: ErrorBuffer,
}

impl ChannelParts {
    pub fn new(shared_buffer_bytes: usize, error_buffer_bytes: usize) -> Result<Self, WireError> {
        Ok(Self {
            to_worker: pipe()?,
            from_worker: pipe()?,
            shm: SharedBuffer::new(shared_buffer_bytes)?,
            errors: ErrorBuffer::new(error_buffer_bytes)?,
        })
    }

    /// Fresh pipes around existing mappings, for respawning a worker.
    pub fn with_mappings(shm: SharedBuffer, errors: ErrorBuffer) -> Result<Self, WireError> {
        Ok(Self {
            to_worker: pipe()?,
            from_worker: pipe()?,
            shm,
            errors,
        })
    }

    /// Splits into the two sides. Each side must drop the other after a fork.
    pub fn split(self, worker: forkdb_core::WorkerId) -> (Channel, Endpoint) {
        let (to_worker_r, to_worker_w) = self.to_worker;
        let (from_worker_r, from_worker_w) = self.from_worker;
        let channel = Channel::new(
            worker,
            to_worker_w,
            from_worker_r,
            self.shm.clone(),
            self.errors.clone(),
        );
        let endpoint = Endpoint::new(to_worker_r, from_worker_w, self.shm, self.errors);
        (channel, endpoint)
    }
}
