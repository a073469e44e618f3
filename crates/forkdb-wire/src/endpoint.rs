// SPDX-FileCopyrightText: 2026 Forkdb Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Worker side of a channel: the mirror image of [`crate::channel::Channel`].

use forkdb_core::{CountInfo, ResultSet};

use crate::chunk::{ChunkWriter, receive_bytes, send_bytes};
use crate::codec;
use crate::error::WireError;
use crate::pipe::{PipeReader, PipeWriter};
use crate::shm::{ErrorBuffer, SharedBuffer};

#[derive(Debug)]
pub struct Endpoint {
    from_parent: PipeReader,
    to_parent: PipeWriter,
    shm: SharedBuffer,
    errors: ErrorBuffer,
    aux: Vec<u8>,
}

impl Endpoint {
    pub fn new(
        from_parent: PipeReader,
        to_parent: PipeWriter,
        shm: SharedBuffer,
        errors: ErrorBuffer,
    ) -> Self {
        Self {
            from_parent,
            to_parent,
            shm,
            errors,
            aux: Vec::new(),
        }
    }

    pub fn shared_buffer(&self) -> &SharedBuffer {
        &self.shm
    }

    /// Blocks for the next opcode byte. `None` means the parent closed the pipe.
    pub fn next_opcode(&mut self) -> Result<Option<u8>, WireError> {
        self.from_parent.read_byte()
    }

    pub fn read_i32(&mut self) -> Result<i32, WireError> {
        self.from_parent.read_i32()
    }

    /// Receives a chunked request argument.
    pub fn read_payload(&mut self) -> Result<&[u8], WireError> {
        receive_bytes(
            &self.shm,
            &mut self.from_parent,
            &mut self.to_parent,
            &mut self.aux,
        )?;
        Ok(&self.aux)
    }

    pub fn read_text(&mut self, what: &str) -> Result<String, WireError> {
        let raw = self.read_payload()?;
        codec::utf8(raw, what)
    }

    pub fn reply(&mut self, status: i32) -> Result<(), WireError> {
        self.to_parent.write_i32(status)
    }

    /// Sends `status` followed by `value` as a chunked transfer.
    pub fn reply_with_bytes(&mut self, status: i32, value: &[u8]) -> Result<(), WireError> {
        self.to_parent.write_i32(status)?;
        send_bytes(&self.shm, &mut self.to_parent, &mut self.from_parent, value).map(|_| ())
    }

    /// Streams `rs`; the final chunk size doubles as the fetch status.
    pub fn reply_result_set(&mut self, rs: &ResultSet) -> Result<usize, WireError> {
        let mut writer = ChunkWriter::new(&self.shm, &mut self.to_parent, &mut self.from_parent);
        codec::encode_result_set(rs, &mut writer)?;
        writer.finish()
    }

    /// Places `info` at the start of the payload area.
    pub fn write_counts(&self, info: &CountInfo) -> Result<(), WireError> {
        self.shm.write(0, &codec::encode_counts(info))
    }

    pub fn set_error(&self, message: &str) {
        self.errors.set(message);
    }

    pub fn clear_error(&self) {
        self.errors.clear();
    }
}
